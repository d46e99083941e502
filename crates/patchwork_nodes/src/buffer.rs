// SPDX-License-Identifier: MIT OR Apache-2.0
//! Float buffer nodes: per-element mapping, canvas preview and channel split.

use patchwork_graph::{
    InitContext, InitContextExt, Node, PortId, Result, RunContext, RunContextExt, UpdateContext,
    UpdateContextExt,
};

/// `map-f`: applies a one-variable expression to every element.
///
/// The element is bound to `a`. An expression that reads further variables
/// is reported as an error annotation and the output is left alone.
#[derive(Debug, Default, Clone, Copy)]
pub struct Map;

impl Map {
    /// Project-format name
    pub const NAME: &'static str = "map-f";
    /// Expression text
    pub const EXPRESSION: PortId = PortId(0);
    /// Source buffer
    pub const BUFFER_IN: PortId = PortId(1);
    /// Mapped buffer
    pub const BUFFER_OUT: PortId = PortId(0);
    /// Expression a fresh node starts with
    pub const DEFAULT_EXPRESSION: &'static str = "a * 1 + 0";
}

impl Node for Map {
    fn init(&mut self, ctx: &mut dyn InitContext) -> Result<()> {
        ctx.set_name(Self::NAME)?;
        ctx.input(Self::EXPRESSION, Self::DEFAULT_EXPRESSION.to_string(), "expression")?;
        ctx.input(Self::BUFFER_IN, Vec::<f32>::new(), "buffer")?;
        ctx.output::<Vec<f32>>(Self::BUFFER_OUT, "mapped")
    }

    fn run(&mut self, ctx: &mut dyn RunContext<'_>) -> Result<()> {
        let text = ctx.read::<String>(Self::EXPRESSION)?;
        let transform = ctx.parse_transform(text)?;
        if transform.arity() > 1 {
            ctx.error(&format!(
                "expression '{text}' reads {} variables but map-f binds only 'a'",
                transform.arity()
            ));
            return Ok(());
        }

        // Evaluated aside so a fault leaves the previous output in place
        let input = ctx.read::<Vec<f32>>(Self::BUFFER_IN)?;
        let mut mapped = vec![0.0; input.len()];
        ctx.chunker().for_each(&mut mapped, |start, chunk| {
            for (offset, value) in chunk.iter_mut().enumerate() {
                *value = transform.call(&[input[start + offset]])?;
            }
            Ok(())
        })?;
        *ctx.write::<Vec<f32>>(Self::BUFFER_OUT)? = mapped;
        Ok(())
    }
}

/// `canvas-f`: hands its buffer to the preview sink and passes it through.
///
/// A canvas smaller than the buffer warns "W x H canvas can't cover buffer
/// size"; a larger one warns "buffer size can't cover W x H canvas". Projects
/// from older tools that showed these two messages the other way round render
/// the same, only the wording differs.
#[derive(Debug, Default, Clone, Copy)]
pub struct CanvasPreview;

impl CanvasPreview {
    /// Project-format name
    pub const NAME: &'static str = "canvas-f";
    /// Canvas width
    pub const WIDTH: PortId = PortId(0);
    /// Canvas height
    pub const HEIGHT: PortId = PortId(1);
    /// Samples, row-major
    pub const BUFFER_IN: PortId = PortId(2);
    /// Unchanged samples
    pub const BUFFER_OUT: PortId = PortId(0);
}

impl Node for CanvasPreview {
    fn init(&mut self, ctx: &mut dyn InitContext) -> Result<()> {
        ctx.set_name(Self::NAME)?;
        ctx.input(Self::WIDTH, 128i32, "width")?;
        ctx.input(Self::HEIGHT, 128i32, "height")?;
        ctx.input(Self::BUFFER_IN, Vec::<f32>::new(), "buffer")?;
        ctx.output::<Vec<f32>>(Self::BUFFER_OUT, "buffer")
    }

    fn run(&mut self, ctx: &mut dyn RunContext<'_>) -> Result<()> {
        let input = ctx.read::<Vec<f32>>(Self::BUFFER_IN)?;
        let width = *ctx.read::<i32>(Self::WIDTH)?;
        let height = *ctx.read::<i32>(Self::HEIGHT)?;
        let (Ok(w), Ok(h)) = (usize::try_from(width), usize::try_from(height)) else {
            ctx.error("W & H can't be negative");
            return Ok(());
        };

        let area = w.saturating_mul(h);
        if area < input.len() {
            ctx.warning("W x H canvas can't cover buffer size");
        }
        if area > input.len() {
            ctx.warning("buffer size can't cover W x H canvas");
        }
        ctx.canvas(w, h, input);
        ctx.write::<Vec<f32>>(Self::BUFFER_OUT)?.clone_from(input);
        Ok(())
    }
}

/// `splitbuffer-f`: de-interleaves a buffer into one output per channel.
///
/// The outputs are unstable: `update` rebuilds them from the `channels`
/// input, with output `i` carrying channel `i`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SplitBuffer;

impl SplitBuffer {
    /// Project-format name
    pub const NAME: &'static str = "splitbuffer-f";
    /// Interleaved samples
    pub const BUFFER_IN: PortId = PortId(0);
    /// Number of channels
    pub const CHANNELS: PortId = PortId(1);

    /// Output carrying `channel`
    pub fn channel_output(channel: usize) -> PortId {
        PortId(channel)
    }
}

impl Node for SplitBuffer {
    fn init(&mut self, ctx: &mut dyn InitContext) -> Result<()> {
        ctx.set_name(Self::NAME)?;
        ctx.input(Self::BUFFER_IN, Vec::<f32>::new(), "buffer")?;
        ctx.input(Self::CHANNELS, 1i32, "channels")
    }

    fn update(&mut self, ctx: &mut dyn UpdateContext) -> Result<()> {
        let channels = usize::try_from(*ctx.stable::<i32>(Self::CHANNELS)?).unwrap_or(0);
        ctx.remove_unstable_outputs()?;
        for channel in 0..channels {
            ctx.unstable_output::<Vec<f32>>(Self::channel_output(channel), &format!("channel {channel}"))?;
        }
        Ok(())
    }

    fn run(&mut self, ctx: &mut dyn RunContext<'_>) -> Result<()> {
        let data = ctx.read::<Vec<f32>>(Self::BUFFER_IN)?;
        let channels = match usize::try_from(*ctx.read::<i32>(Self::CHANNELS)?) {
            Ok(channels) if channels > 0 => channels,
            _ => {
                ctx.error("insufficient channel number");
                return Ok(());
            }
        };
        if (0..channels).any(|channel| ctx.output(Self::channel_output(channel)).is_err()) {
            ctx.error("channel outputs are out of date, update the node");
            return Ok(());
        }
        if data.len() % channels != 0 {
            ctx.warning("some values will be lost");
        }

        let frames = data.len() / channels;
        let chunker = ctx.chunker();
        for channel in 0..channels {
            let out = ctx.write::<Vec<f32>>(Self::channel_output(channel))?;
            out.clear();
            out.resize(frames, 0.0);
            chunker.for_each(out, |start, chunk| {
                for (offset, value) in chunk.iter_mut().enumerate() {
                    *value = data[(start + offset) * channels + channel];
                }
                Ok(())
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchwork_graph::{Annotation, DataType, ExprError, Graph, GraphError, Severity};

    #[test]
    fn test_map_applies_expression() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(Map)).unwrap();
        graph.set_input(node, Map::EXPRESSION, "2 * a - 1").unwrap();
        graph.set_input(node, Map::BUFFER_IN, vec![0.0, 0.5, 1.0]).unwrap();
        graph.run(node).unwrap();
        assert_eq!(graph.output::<Vec<f32>>(node, Map::BUFFER_OUT).unwrap(), &vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_map_parse_failure_is_a_fault() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(Map)).unwrap();
        graph.set_input(node, Map::EXPRESSION, "a * (1 +").unwrap();
        assert!(matches!(graph.run(node), Err(GraphError::Expression(_))));
    }

    #[test]
    fn test_map_fault_keeps_previous_output() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(Map)).unwrap();
        graph.set_input(node, Map::BUFFER_IN, vec![1.0, 2.0]).unwrap();
        graph.run(node).unwrap();

        graph.set_input(node, Map::EXPRESSION, "foo(a)").unwrap();
        assert!(matches!(
            graph.run(node),
            Err(GraphError::Expression(ExprError::Unsupported(ref name))) if name == "foo"
        ));
        assert_eq!(graph.output::<Vec<f32>>(node, Map::BUFFER_OUT).unwrap(), &vec![1.0, 2.0]);
    }

    #[test]
    fn test_map_rejects_extra_variables() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(Map)).unwrap();
        graph.set_input(node, Map::BUFFER_IN, vec![1.0]).unwrap();
        graph.run(node).unwrap();
        graph.set_input(node, Map::EXPRESSION, "a + b").unwrap();
        graph.set_input(node, Map::BUFFER_IN, vec![5.0, 6.0]).unwrap();
        graph.run(node).unwrap();

        assert_eq!(graph.annotations(node).unwrap()[0].severity, Severity::Error);
        assert_eq!(graph.output::<Vec<f32>>(node, Map::BUFFER_OUT).unwrap(), &vec![1.0], "output untouched");
    }

    #[test]
    fn test_canvas_reports_coverage_and_previews() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(CanvasPreview)).unwrap();
        graph.set_input(node, CanvasPreview::WIDTH, 2).unwrap();
        graph.set_input(node, CanvasPreview::HEIGHT, 2).unwrap();
        graph.set_input(node, CanvasPreview::BUFFER_IN, vec![0.25; 3]).unwrap();
        graph.run(node).unwrap();

        assert_eq!(
            graph.annotations(node).unwrap(),
            &[Annotation {
                severity: Severity::Warning,
                message: "buffer size can't cover W x H canvas".to_string(),
            }]
        );
        let preview = graph.preview(node).unwrap().unwrap();
        assert_eq!((preview.width, preview.height), (2, 2));
        assert_eq!(graph.output::<Vec<f32>>(node, CanvasPreview::BUFFER_OUT).unwrap(), &vec![0.25; 3]);

        graph.set_input(node, CanvasPreview::WIDTH, -1).unwrap();
        graph.run(node).unwrap();
        assert_eq!(graph.annotations(node).unwrap()[0].severity, Severity::Error);
    }

    #[test]
    fn test_split_deinterleaves() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(SplitBuffer)).unwrap();
        graph.set_input(node, SplitBuffer::CHANNELS, 3).unwrap();
        graph.set_input(node, SplitBuffer::BUFFER_IN, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]).unwrap();
        graph.update(node).unwrap();
        graph.run(node).unwrap();

        let outputs = graph.output_ports(node).unwrap();
        assert_eq!(outputs.len(), 3);
        assert!(outputs.iter().all(|port| port.data_type == DataType::FBuffer));
        assert_eq!(graph.output::<Vec<f32>>(node, SplitBuffer::channel_output(0)).unwrap(), &vec![1.0, 4.0]);
        assert_eq!(graph.output::<Vec<f32>>(node, SplitBuffer::channel_output(2)).unwrap(), &vec![3.0, 6.0]);
        assert_eq!(graph.annotations(node).unwrap()[0].message, "some values will be lost");
    }

    #[test]
    fn test_split_needs_update_after_channel_change() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(SplitBuffer)).unwrap();
        graph.set_input(node, SplitBuffer::CHANNELS, 2).unwrap();
        graph.run(node).unwrap();
        assert_eq!(graph.annotations(node).unwrap()[0].severity, Severity::Error);

        graph.update(node).unwrap();
        graph.update(node).unwrap();
        assert_eq!(graph.output_ports(node).unwrap().len(), 2, "update does not accumulate");
        graph.run(node).unwrap();
        assert!(graph.annotations(node).unwrap().is_empty());

        graph.set_input(node, SplitBuffer::CHANNELS, 0).unwrap();
        graph.run(node).unwrap();
        assert_eq!(graph.annotations(node).unwrap()[0].message, "insufficient channel number");
    }
}
