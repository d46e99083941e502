// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error taxonomy shared by the bus, node adapter and graph.
//!
//! Everything here is a fault of the current call: the caller (or a node
//! implementation) broke a contract. Node-runtime problems such as a missing
//! image file are not errors; they travel through
//! [`Annotation`](crate::node::Annotation)s instead.

use crate::expr::ExprError;
use crate::node::NodeHandle;
use crate::port::{DataType, PortId};

/// Error raised by graph, adapter and bus operations
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// An internal invariant or a caller contract was broken
    #[error("constraint violated: {0}")]
    ConstraintViolated(String),

    /// Node not found
    #[error("Node not found: {0}")]
    NodeNotFound(NodeHandle),

    /// Port not found on a node
    #[error("Port not found: {port} on node {node}")]
    PortNotFound {
        /// Node that was searched
        node: NodeHandle,
        /// Missing port
        port: PortId,
    },

    /// Port data types do not agree
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// Type the caller asked for
        expected: DataType,
        /// Type the port was declared with
        found: DataType,
    },

    /// Self-loop not allowed
    #[error("Self-loop not allowed on node {0}")]
    SelfLoop(NodeHandle),

    /// Graph contains a cycle
    #[error("Graph contains a cycle")]
    CycleDetected,

    /// Expression failed to parse or evaluate
    #[error(transparent)]
    Expression(#[from] ExprError),
}

impl GraphError {
    /// Shorthand for [`GraphError::ConstraintViolated`]
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolated(message.into())
    }
}

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;
