// SPDX-License-Identifier: MIT OR Apache-2.0
//! Integer arithmetic nodes.

use patchwork_graph::{InitContext, InitContextExt, Node, PortId, Result, RunContext, RunContextExt};

/// `summ-i32`: adds two integers, wrapping on overflow
#[derive(Debug, Default, Clone, Copy)]
pub struct Sum;

impl Sum {
    /// Project-format name
    pub const NAME: &'static str = "summ-i32";
    /// First addend
    pub const A: PortId = PortId(0);
    /// Second addend
    pub const B: PortId = PortId(1);
    /// `a + b`
    pub const SUM: PortId = PortId(0);
}

impl Node for Sum {
    fn init(&mut self, ctx: &mut dyn InitContext) -> Result<()> {
        ctx.set_name(Self::NAME)?;
        ctx.input(Self::A, 0i32, "a")?;
        ctx.input(Self::B, 0i32, "b")?;
        ctx.output::<i32>(Self::SUM, "a+b")
    }

    fn run(&mut self, ctx: &mut dyn RunContext<'_>) -> Result<()> {
        let sum = ctx.read::<i32>(Self::A)?.wrapping_add(*ctx.read::<i32>(Self::B)?);
        *ctx.write::<i32>(Self::SUM)? = sum;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchwork_graph::Graph;

    #[test]
    fn test_sum_wraps() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(Sum)).unwrap();
        graph.set_input(node, Sum::A, i32::MAX).unwrap();
        graph.set_input(node, Sum::B, 1).unwrap();
        graph.run(node).unwrap();
        assert_eq!(*graph.output::<i32>(node, Sum::SUM).unwrap(), i32::MIN);
    }

    #[test]
    fn test_sum_reads_connected_input() {
        let mut graph = Graph::new();
        let first = graph.add_node(Box::new(Sum)).unwrap();
        let second = graph.add_node(Box::new(Sum)).unwrap();
        graph.set_input(first, Sum::A, 42).unwrap();
        graph.set_input(first, Sum::B, 69).unwrap();
        graph.connect(first, Sum::SUM, second, Sum::A).unwrap();

        graph.run(first).unwrap();
        graph.run(second).unwrap();
        assert_eq!(*graph.output::<i32>(first, Sum::SUM).unwrap(), 111);
        assert_eq!(*graph.output::<i32>(second, Sum::SUM).unwrap(), 111);
    }
}
