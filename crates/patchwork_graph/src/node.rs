// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node contract: the traits a node implementation is built against.
//!
//! A node never sees the graph. Each lifecycle phase hands it a narrow
//! capability:
//! - [`InitContext`] to declare ports and a name, exactly once
//! - [`RunContext`] to read inputs and write outputs
//! - [`UpdateContext`] to renegotiate unstable outputs from stable inputs

use crate::error::{GraphError, Result};
use crate::expr::Transform;
use crate::port::{DataType, PortData, PortId, Value, ValueMut, ValueRef};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a node within one graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle(pub usize);

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A computation unit with declared typed ports
pub trait Node: Send {
    /// Declare name and ports
    fn init(&mut self, ctx: &mut dyn InitContext) -> Result<()>;

    /// Read inputs, write outputs
    fn run(&mut self, ctx: &mut dyn RunContext<'_>) -> Result<()>;

    /// Rebuild unstable outputs from stable inputs
    fn update(&mut self, ctx: &mut dyn UpdateContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// Capabilities available while a node initialises
pub trait InitContext {
    /// Set the node name; must be a single non-empty word
    fn set_name(&mut self, name: &str) -> Result<()>;

    /// Declare an input holding `default` until something is connected
    fn declare_input(&mut self, id: PortId, default: Value, title: &str) -> Result<()>;

    /// Declare a stable output
    fn declare_output(&mut self, id: PortId, data_type: DataType, title: &str) -> Result<()>;
}

/// Typed helpers over [`InitContext`]
pub trait InitContextExt: InitContext {
    /// Declare an input of type `T`
    fn input<T: PortData>(&mut self, id: PortId, default: T, title: &str) -> Result<()> {
        self.declare_input(id, default.into_value(), title)
    }

    /// Declare an output of type `T`
    fn output<T: PortData>(&mut self, id: PortId, title: &str) -> Result<()> {
        self.declare_output(id, T::DATA_TYPE, title)
    }
}

impl<C: InitContext + ?Sized> InitContextExt for C {}

/// Capabilities available while a node runs.
///
/// Inputs borrow from the graph's buses for `'a`, so they stay readable while
/// outputs are written.
pub trait RunContext<'a> {
    /// Current value of an input
    fn input(&self, id: PortId) -> Result<ValueRef<'a>>;

    /// Exclusive access to one of this node's outputs
    fn output(&mut self, id: PortId) -> Result<ValueMut<'_>>;

    /// Compile an expression into a float transform
    fn parse_transform(&self, text: &str) -> Result<Transform>;

    /// Chunked iteration primitive configured for this graph
    fn chunker(&self) -> Chunker;

    /// Record a non-fatal warning
    fn warning(&mut self, message: &str);

    /// Record a non-fatal error; the node should leave its outputs alone
    fn error(&mut self, message: &str);

    /// Hand a raster preview to the presentation layer
    fn canvas(&mut self, width: usize, height: usize, data: &[f32]);
}

/// Typed helpers over [`RunContext`]
pub trait RunContextExt<'a>: RunContext<'a> {
    /// Read an input as `T`
    fn read<T: PortData>(&self, id: PortId) -> Result<&'a T> {
        let value = self.input(id)?;
        let found = value.data_type();
        T::from_ref(value).ok_or(GraphError::TypeMismatch {
            expected: T::DATA_TYPE,
            found,
        })
    }

    /// Write an output as `T`
    fn write<T: PortData>(&mut self, id: PortId) -> Result<&mut T> {
        let value = self.output(id)?;
        let found = value.data_type();
        T::from_mut(value).ok_or(GraphError::TypeMismatch {
            expected: T::DATA_TYPE,
            found,
        })
    }
}

impl<'a, C: RunContext<'a> + ?Sized> RunContextExt<'a> for C {}

/// Capabilities available while a node updates its port set
pub trait UpdateContext {
    /// Current value of a stable input
    fn stable_input(&self, id: PortId) -> Result<ValueRef<'_>>;

    /// Free and forget every unstable output
    fn remove_unstable_outputs(&mut self) -> Result<()>;

    /// Declare an output that the next update tears down again
    fn declare_unstable_output(&mut self, id: PortId, data_type: DataType, title: &str) -> Result<()>;
}

/// Typed helpers over [`UpdateContext`]
pub trait UpdateContextExt: UpdateContext {
    /// Read a stable input as `T`
    fn stable<T: PortData>(&self, id: PortId) -> Result<&T> {
        let value = self.stable_input(id)?;
        let found = value.data_type();
        T::from_ref(value).ok_or(GraphError::TypeMismatch {
            expected: T::DATA_TYPE,
            found,
        })
    }

    /// Declare an unstable output of type `T`
    fn unstable_output<T: PortData>(&mut self, id: PortId, title: &str) -> Result<()> {
        self.declare_unstable_output(id, T::DATA_TYPE, title)
    }
}

impl<C: UpdateContext + ?Sized> UpdateContextExt for C {}

/// Splits an output slice into fixed-size chunks.
///
/// Every callback owns its chunk exclusively and receives the index of the
/// chunk's first element, so chunks are order-independent by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
}

impl Chunker {
    /// Chunks of `size` elements; zero is treated as one
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    /// Elements per chunk
    pub fn size(&self) -> usize {
        self.size
    }

    /// Invoke `f(start, chunk)` for every chunk of `out`, stopping at the
    /// first error
    pub fn for_each<T, F>(self, out: &mut [T], f: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Sync,
    {
        out.chunks_mut(self.size)
            .enumerate()
            .try_for_each(|(i, chunk)| f(i * self.size, chunk))
    }
}

/// Severity of a run annotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Output is usable but suspicious
    Warning,
    /// Node gave up; outputs keep their previous values
    Error,
}

/// Non-fatal message emitted by a node during its last run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Severity
    pub severity: Severity,
    /// Message text
    pub message: String,
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Warning => write!(f, "warning: {}", self.message),
            Severity::Error => write!(f, "error: {}", self.message),
        }
    }
}

/// Raster preview handed to the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    /// Width in pixels
    pub width: usize,
    /// Height in pixels
    pub height: usize,
    /// Float samples, row-major
    pub data: Vec<f32>,
}

/// Creates nodes by name
pub trait NodeFactory {
    /// Create a fresh node, or `None` for an unknown name
    fn create(&self, name: &str) -> Option<Box<dyn Node>>;
}

/// Constructor stored in a [`NodeRegistry`]
pub type NodeConstructor = fn() -> Box<dyn Node>;

/// Registry of available node types
pub struct NodeRegistry {
    /// Registered constructors by name
    constructors: IndexMap<String, NodeConstructor>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            constructors: IndexMap::new(),
        }
    }

    /// Register a node type
    pub fn register(&mut self, name: impl Into<String>, constructor: NodeConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeFactory for NodeRegistry {
    fn create(&self, name: &str) -> Option<Box<dyn Node>> {
        self.constructors.get(name).map(|constructor| constructor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_starts_cover_the_slice() {
        let mut out = vec![0usize; 10];
        Chunker::new(4)
            .for_each(&mut out, |start, chunk| {
                for (i, v) in chunk.iter_mut().enumerate() {
                    *v = start + i;
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        assert_eq!(Chunker::new(0).size(), 1);
    }

    #[test]
    fn test_chunker_stops_at_first_error() {
        let mut out = vec![0; 8];
        let result = Chunker::new(2).for_each(&mut out, |start, chunk| {
            if start >= 4 {
                return Err(GraphError::constraint("stop"));
            }
            chunk.fill(1);
            Ok(())
        });
        assert!(result.is_err());
        assert_eq!(out, vec![1, 1, 1, 1, 0, 0, 0, 0]);
    }
}
