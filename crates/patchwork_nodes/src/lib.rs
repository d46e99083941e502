// SPDX-License-Identifier: MIT OR Apache-2.0
//! Standard node library for patchwork.
//!
//! | name            | inputs                               | outputs                      |
//! |-----------------|--------------------------------------|------------------------------|
//! | `summ-i32`      | a, b                                 | a+b                          |
//! | `map-f`         | expression, buffer                   | buffer                       |
//! | `canvas-f`      | width, height, buffer                | buffer (plus a preview)      |
//! | `splitbuffer-f` | buffer, channels                     | one buffer per channel       |
//! | `readimg-f`     | path                                 | width, height, channels, buffer |
//! | `writeimg-f`    | path, width, height, channels, buffer | none                        |

pub mod buffer;
pub mod image_io;
pub mod math;

pub use buffer::{CanvasPreview, Map, SplitBuffer};
pub use image_io::{ReadImage, WriteImage};
pub use math::Sum;

use patchwork_graph::{Node, NodeRegistry};

fn boxed<N: Node + Default + 'static>() -> Box<dyn Node> {
    Box::new(N::default())
}

/// Registry holding every node of this crate under its project-format name
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(Sum::NAME, boxed::<Sum>);
    registry.register(Map::NAME, boxed::<Map>);
    registry.register(CanvasPreview::NAME, boxed::<CanvasPreview>);
    registry.register(SplitBuffer::NAME, boxed::<SplitBuffer>);
    registry.register(ReadImage::NAME, boxed::<ReadImage>);
    registry.register(WriteImage::NAME, boxed::<WriteImage>);
    tracing::debug!("standard registry: {} node types", registry.names().count());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchwork_graph::{Graph, NodeFactory};

    #[test]
    fn test_registered_names_match_node_names() {
        let registry = standard_registry();
        let mut graph = Graph::new();
        for name in registry.names() {
            let node = registry.create(name).unwrap();
            let handle = graph.add_node(node).unwrap();
            assert_eq!(graph.name(handle).unwrap(), name);
        }
        assert_eq!(graph.node_count(), 6);
        assert!(registry.create("nope").is_none());
    }
}
