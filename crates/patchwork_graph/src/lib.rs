// SPDX-License-Identifier: MIT OR Apache-2.0
//! Dataflow node graph runtime for patchwork.
//!
//! Nodes declare typed input/output ports and are wired into a directed graph
//! over shared typed storage:
//! - [`bus`]: one growable value array per data type, addressed by slot
//! - [`node`]: the init/run/update contract a node is written against
//! - [`spec`]: the adapter mapping a node's port ids to bus slots
//! - [`graph`]: connection, execution and slot rewiring
//! - [`dump`]: the textual project format
//! - [`expr`]: per-element arithmetic expressions
//!
//! ## Architecture
//!
//! An output owns a slot; a connected input aliases it. Nothing is copied
//! along a connection, so running a receiver right after its provider reads
//! exactly what the provider wrote.

pub mod bus;
pub mod config;
pub mod connection;
pub mod dump;
pub mod error;
pub mod expr;
pub mod graph;
pub mod node;
pub mod port;
pub mod spec;
pub mod view;

pub use bus::{Buses, Slot};
pub use config::{ConfigError, EngineConfig};
pub use connection::Connection;
pub use dump::{DumpError, DumpMode};
pub use error::{GraphError, Result};
pub use expr::{Expr, ExprError, Transform};
pub use graph::Graph;
pub use node::{
    Annotation, Canvas, Chunker, InitContext, InitContextExt, Node, NodeFactory, NodeHandle, NodeRegistry,
    RunContext, RunContextExt, Severity, UpdateContext, UpdateContextExt,
};
pub use port::{DataType, PortData, PortDirection, PortId, PortInfo, Stability, Value, ValueMut, ValueRef};
pub use spec::{NodeSpec, Position};
pub use view::GraphView;
