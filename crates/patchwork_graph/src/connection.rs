// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection (edge) definitions for the graph.
//!
//! The graph does not store edges: a connection exists while an input's
//! current slot aliases another node's output slot. [`Connection`] is the
//! value form of that relation, derived from slot provenance on demand and
//! used by the project reader for back-references it has yet to wire.

use crate::node::NodeHandle;
use crate::port::PortId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A connection from a provider output to a receiver input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Providing node
    pub from_node: NodeHandle,
    /// Output id on the providing node
    pub from_port: PortId,
    /// Receiving node
    pub to_node: NodeHandle,
    /// Input id on the receiving node
    pub to_port: PortId,
}

impl Connection {
    /// Create a new connection
    pub fn new(from_node: NodeHandle, from_port: PortId, to_node: NodeHandle, to_port: PortId) -> Self {
        Self {
            from_node,
            from_port,
            to_node,
            to_port,
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.out{} -> {}.in{}",
            self.from_node, self.from_port, self.to_node, self.to_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_both_ends() {
        let connection = Connection::new(NodeHandle(3), PortId(0), NodeHandle(12), PortId(2));
        assert_eq!(connection.to_string(), "3.out0 -> 12.in2");
    }
}
