// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure: node adapters indexed by handle, over shared buses.

use crate::bus::{Buses, Slot};
use crate::config::EngineConfig;
use crate::connection::Connection;
use crate::dump::{self, DumpError, DumpMode};
use crate::error::{GraphError, Result};
use crate::node::{Annotation, Canvas, Chunker, Node, NodeFactory, NodeHandle};
use crate::port::{DataType, PortData, PortId, PortInfo, Value, ValueRef};
use crate::spec::{NodeSpec, Position};
use std::collections::{BTreeMap, HashSet};

/// Input elsewhere in the graph that reads one of a node's outputs
#[derive(Debug, Clone, Copy)]
struct Receiver {
    node: NodeHandle,
    port: PortId,
    data_type: DataType,
    slot: Slot,
}

/// A node graph
#[derive(Debug)]
pub struct Graph {
    /// Live adapters by handle
    nodes: BTreeMap<NodeHandle, NodeSpec>,
    /// Handle the next `add_node` hands out; never moves backwards
    next_handle: usize,
    /// Value storage shared by all nodes
    buses: Buses,
    config: EngineConfig,
}

impl Graph {
    /// Create a new empty graph with the default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a new empty graph
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            nodes: BTreeMap::new(),
            next_handle: 0,
            buses: Buses::with_capacity(config.initial_bus_capacity),
            config,
        }
    }

    /// Configuration the graph was created with
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Value storage, for inspection
    pub fn buses(&self) -> &Buses {
        &self.buses
    }

    /// Add a node at the next unused handle
    pub fn add_node(&mut self, node: Box<dyn Node>) -> Result<NodeHandle> {
        let handle = NodeHandle(self.next_handle);
        let next = self
            .next_handle
            .checked_add(1)
            .ok_or_else(|| GraphError::constraint("node handles exhausted"))?;
        let spec = NodeSpec::new(handle, node, &mut self.buses)?;
        tracing::debug!("added node {} '{}'", handle, spec.name());
        self.nodes.insert(handle, spec);
        self.next_handle = next;
        Ok(handle)
    }

    /// Place a node at `handle`, replacing whatever lives there.
    ///
    /// Inputs that read the replaced node's outputs fall back to their own
    /// literals. If the new node fails to initialise the old one stays.
    pub fn set_node(&mut self, handle: NodeHandle, node: Box<dyn Node>) -> Result<()> {
        let next = handle
            .0
            .checked_add(1)
            .ok_or_else(|| GraphError::constraint(format!("node handle {handle} is out of range")))?;
        let spec = NodeSpec::new(handle, node, &mut self.buses)?;
        let receivers = self.receivers_of(handle);
        if let Some(old) = self.nodes.remove(&handle) {
            old.release(&mut self.buses)?;
            self.detach(&receivers, |_, _| true)?;
        }
        tracing::debug!("set node {} to '{}'", handle, spec.name());
        self.nodes.insert(handle, spec);
        self.next_handle = self.next_handle.max(next);
        Ok(())
    }

    /// Remove a node, leaving its handle empty for good
    pub fn remove_node(&mut self, handle: NodeHandle) -> Result<()> {
        let receivers = self.receivers_of(handle);
        let spec = self.nodes.remove(&handle).ok_or(GraphError::NodeNotFound(handle))?;
        tracing::debug!("removing node {} '{}'", handle, spec.name());
        spec.release(&mut self.buses)?;
        self.detach(&receivers, |_, _| true)
    }

    /// Get a node adapter by handle
    pub fn node(&self, handle: NodeHandle) -> Option<&NodeSpec> {
        self.nodes.get(&handle)
    }

    fn spec(&self, handle: NodeHandle) -> Result<&NodeSpec> {
        self.node(handle).ok_or(GraphError::NodeNotFound(handle))
    }

    fn spec_mut(&mut self, handle: NodeHandle) -> Result<&mut NodeSpec> {
        self.nodes.get_mut(&handle).ok_or(GraphError::NodeNotFound(handle))
    }

    /// Handles of all non-removed nodes, ascending
    pub fn live_handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes.keys().copied()
    }

    /// Get all live node adapters, ascending by handle
    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.values()
    }

    /// Get the number of live nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Name a node set during init
    pub fn name(&self, handle: NodeHandle) -> Result<&str> {
        Ok(self.spec(handle)?.name())
    }

    /// Move a node; metadata only
    pub fn move_node(&mut self, handle: NodeHandle, x: i32, y: i32) -> Result<()> {
        self.spec_mut(handle)?.position = Position { x, y };
        Ok(())
    }

    /// Position of a node
    pub fn position(&self, handle: NodeHandle) -> Result<Position> {
        Ok(self.spec(handle)?.position())
    }

    /// Bind a receiver input to a provider output.
    ///
    /// A later connect to the same input replaces the earlier one. On error
    /// no binding changes.
    pub fn connect(
        &mut self,
        provider: NodeHandle,
        output: PortId,
        receiver: NodeHandle,
        input: PortId,
    ) -> Result<()> {
        if provider == receiver {
            return Err(GraphError::SelfLoop(provider));
        }
        let (data_type, slot) = {
            let out = self.spec(provider)?.ports.output(output)?;
            (out.data_type, out.slot)
        };
        let target = self.spec_mut(receiver)?.ports.input_mut(input)?;
        if target.data_type != data_type {
            return Err(GraphError::TypeMismatch {
                expected: target.data_type,
                found: data_type,
            });
        }
        target.slot = slot;
        tracing::debug!("connected {}", Connection::new(provider, output, receiver, input));
        Ok(())
    }

    /// Return an input to its own literal
    pub fn disconnect(&mut self, receiver: NodeHandle, input: PortId) -> Result<()> {
        let target = self.spec_mut(receiver)?.ports.input_mut(input)?;
        target.slot = target.default_slot;
        tracing::debug!("disconnected {}.in{}", receiver, input);
        Ok(())
    }

    /// Provider of a connected input, `None` while it uses its literal
    pub fn source(&self, receiver: NodeHandle, input: PortId) -> Result<Option<Connection>> {
        let target = self.spec(receiver)?.ports.input(input)?;
        if !target.is_connected() {
            return Ok(None);
        }
        let provenance = self
            .buses
            .provenance(target.data_type, target.slot)
            .ok_or_else(|| {
                GraphError::constraint(format!(
                    "input {input} of node {receiver} aliases {} slot {} which no output owns",
                    target.data_type, target.slot
                ))
            })?;
        Ok(Some(Connection::new(provenance.node, provenance.output, receiver, input)))
    }

    /// Every connection in the graph, ordered by receiver
    pub fn connections(&self) -> Result<Vec<Connection>> {
        let mut connections = Vec::new();
        for spec in self.nodes() {
            for &input in spec.ports.inputs.keys() {
                if let Some(connection) = self.source(spec.handle(), input)? {
                    connections.push(connection);
                }
            }
        }
        Ok(connections)
    }

    /// Write a literal into an input's own slot.
    ///
    /// A connected input keeps reading its provider until disconnected.
    pub fn set_input(&mut self, handle: NodeHandle, input: PortId, value: impl Into<Value>) -> Result<()> {
        let target = self.spec(handle)?.ports.input(input)?;
        let (data_type, slot) = (target.data_type, target.default_slot);
        self.buses.put(data_type, slot, value.into())
    }

    /// Current value of an input, literal or upstream
    pub fn input_value(&self, handle: NodeHandle, input: PortId) -> Result<ValueRef<'_>> {
        let target = self.spec(handle)?.ports.input(input)?;
        self.buses.get(target.data_type, target.slot)
    }

    /// Current value of an output
    pub fn output_value(&self, handle: NodeHandle, output: PortId) -> Result<ValueRef<'_>> {
        let out = self.spec(handle)?.ports.output(output)?;
        self.buses.get(out.data_type, out.slot)
    }

    /// Current value of an input as `T`
    pub fn input<T: PortData>(&self, handle: NodeHandle, input: PortId) -> Result<&T> {
        downcast(self.input_value(handle, input)?)
    }

    /// Current value of an output as `T`
    pub fn output<T: PortData>(&self, handle: NodeHandle, output: PortId) -> Result<&T> {
        downcast(self.output_value(handle, output)?)
    }

    /// Input descriptors of a node, in declaration order
    pub fn input_ports(&self, handle: NodeHandle) -> Result<Vec<PortInfo>> {
        Ok(self.spec(handle)?.inputs())
    }

    /// Output descriptors of a node, in declaration order
    pub fn output_ports(&self, handle: NodeHandle) -> Result<Vec<PortInfo>> {
        Ok(self.spec(handle)?.outputs())
    }

    /// Annotations the node emitted during its last run
    pub fn annotations(&self, handle: NodeHandle) -> Result<&[Annotation]> {
        Ok(self.spec(handle)?.annotations())
    }

    /// Raster preview the node produced during its last run
    pub fn preview(&self, handle: NodeHandle) -> Result<Option<&Canvas>> {
        Ok(self.spec(handle)?.preview())
    }

    /// Run one node against the current contents of its slots
    pub fn run(&mut self, handle: NodeHandle) -> Result<()> {
        let chunker = Chunker::new(self.config.chunk_size);
        let spec = self
            .nodes
            .get_mut(&handle)
            .ok_or(GraphError::NodeNotFound(handle))?;
        spec.run(&mut self.buses, chunker)
    }

    /// Let a node rebuild its unstable outputs.
    ///
    /// Inputs elsewhere that read a torn-down output fall back to their own
    /// literals; the caller re-issues `connect` for the new ports.
    pub fn update(&mut self, handle: NodeHandle) -> Result<()> {
        let receivers = self.receivers_of(handle);
        let mut freed = Vec::new();
        let spec = self
            .nodes
            .get_mut(&handle)
            .ok_or(GraphError::NodeNotFound(handle))?;
        let result = spec.update(&mut self.buses, &mut freed);
        self.detach(&receivers, |data_type, slot| freed.contains(&(data_type, slot)))?;
        if !freed.is_empty() {
            tracing::debug!("update of node {} freed {} slot(s)", handle, freed.len());
        }
        result
    }

    /// Run every live node, providers before receivers
    pub fn run_all(&mut self) -> Result<()> {
        for handle in self.execution_order()? {
            self.run(handle)?;
        }
        Ok(())
    }

    /// Live handles ordered so that every provider precedes its receivers.
    ///
    /// Unrelated nodes keep ascending handle order.
    pub fn execution_order(&self) -> Result<Vec<NodeHandle>> {
        let mut visited = HashSet::new();
        let mut temp_mark = HashSet::new();
        let mut order = Vec::new();

        for handle in self.live_handles() {
            if !visited.contains(&handle) {
                self.visit(handle, &mut visited, &mut temp_mark, &mut order)?;
            }
        }

        Ok(order)
    }

    /// Every node `handle` reads from, directly or through other nodes,
    /// providers first. Nodes on a cycle through `handle` are listed once.
    pub(crate) fn upstream(&self, handle: NodeHandle) -> Result<Vec<NodeHandle>> {
        let mut visited = HashSet::from([handle]);
        let mut order = Vec::new();
        self.collect_upstream(handle, &mut visited, &mut order)?;
        Ok(order)
    }

    fn collect_upstream(
        &self,
        handle: NodeHandle,
        visited: &mut HashSet<NodeHandle>,
        order: &mut Vec<NodeHandle>,
    ) -> Result<()> {
        for &input in self.spec(handle)?.ports.inputs.keys() {
            if let Some(connection) = self.source(handle, input)? {
                if visited.insert(connection.from_node) {
                    self.collect_upstream(connection.from_node, visited, order)?;
                    order.push(connection.from_node);
                }
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        handle: NodeHandle,
        visited: &mut HashSet<NodeHandle>,
        temp_mark: &mut HashSet<NodeHandle>,
        order: &mut Vec<NodeHandle>,
    ) -> Result<()> {
        if temp_mark.contains(&handle) {
            return Err(GraphError::CycleDetected);
        }
        if visited.contains(&handle) {
            return Ok(());
        }

        temp_mark.insert(handle);

        // Visit all nodes that this node reads from
        for &input in self.spec(handle)?.ports.inputs.keys() {
            if let Some(connection) = self.source(handle, input)? {
                self.visit(connection.from_node, visited, temp_mark, order)?;
            }
        }

        temp_mark.remove(&handle);
        visited.insert(handle);
        order.push(handle);

        Ok(())
    }

    /// Render the graph in the project format
    pub fn dump(&self, mode: DumpMode) -> Result<String> {
        dump::write(self, mode)
    }

    /// Replace this graph with the one described by `text`.
    ///
    /// On any error the graph is left exactly as it was.
    pub fn read_dump(&mut self, text: &str, factory: &dyn NodeFactory) -> std::result::Result<(), DumpError> {
        let scratch = dump::read(text, factory, self.config.clone())?;
        tracing::info!("read project with {} node(s)", scratch.node_count());
        *self = scratch;
        Ok(())
    }

    /// Inputs on other nodes currently bound to one of `provider`'s outputs
    fn receivers_of(&self, provider: NodeHandle) -> Vec<Receiver> {
        let mut receivers = Vec::new();
        for spec in self.nodes() {
            for (&port, input) in &spec.ports.inputs {
                if !input.is_connected() {
                    continue;
                }
                let owner = self.buses.provenance(input.data_type, input.slot);
                if owner.is_some_and(|p| p.node == provider) {
                    receivers.push(Receiver {
                        node: spec.handle(),
                        port,
                        data_type: input.data_type,
                        slot: input.slot,
                    });
                }
            }
        }
        receivers
    }

    /// Reset the receivers whose slot was freed back to their own literal
    fn detach(&mut self, receivers: &[Receiver], freed: impl Fn(DataType, Slot) -> bool) -> Result<()> {
        for receiver in receivers {
            if !freed(receiver.data_type, receiver.slot) {
                continue;
            }
            let Some(spec) = self.nodes.get_mut(&receiver.node) else {
                continue;
            };
            let input = spec.ports.input_mut(receiver.port)?;
            input.slot = input.default_slot;
            tracing::debug!("detached {}.in{} from freed slot {}", receiver.node, receiver.port, receiver.slot);
        }
        Ok(())
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

fn downcast<T: PortData>(value: ValueRef<'_>) -> Result<&T> {
    let found = value.data_type();
    T::from_ref(value).ok_or(GraphError::TypeMismatch {
        expected: T::DATA_TYPE,
        found,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{InitContext, InitContextExt, RunContext, RunContextExt, UpdateContext, UpdateContextExt};

    const A: PortId = PortId(0);
    const B: PortId = PortId(1);
    const SUM: PortId = PortId(0);

    struct Add;

    impl Node for Add {
        fn init(&mut self, ctx: &mut dyn InitContext) -> Result<()> {
            ctx.set_name("add")?;
            ctx.input(A, 0i32, "a")?;
            ctx.input(B, 0i32, "b")?;
            ctx.output::<i32>(SUM, "a+b")
        }

        fn run(&mut self, ctx: &mut dyn RunContext<'_>) -> Result<()> {
            let sum = ctx.read::<i32>(A)? + ctx.read::<i32>(B)?;
            *ctx.write::<i32>(SUM)? = sum;
            Ok(())
        }
    }

    /// Declares one unstable i32 output per unit of its `count` input
    struct Fan;

    impl Node for Fan {
        fn init(&mut self, ctx: &mut dyn InitContext) -> Result<()> {
            ctx.set_name("fan")?;
            ctx.input(PortId(0), 0i32, "count")
        }

        fn run(&mut self, _ctx: &mut dyn RunContext<'_>) -> Result<()> {
            Ok(())
        }

        fn update(&mut self, ctx: &mut dyn UpdateContext) -> Result<()> {
            let count = *ctx.stable::<i32>(PortId(0))?;
            ctx.remove_unstable_outputs()?;
            for i in 0..count.max(0) as usize {
                ctx.unstable_output::<i32>(PortId(i), "out")?;
            }
            Ok(())
        }
    }

    struct Nameless;

    impl Node for Nameless {
        fn init(&mut self, ctx: &mut dyn InitContext) -> Result<()> {
            ctx.input(A, 0i32, "a")
        }

        fn run(&mut self, _ctx: &mut dyn RunContext<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_add_and_connect() {
        let mut graph = Graph::new();
        let first = graph.add_node(Box::new(Add)).unwrap();
        let second = graph.add_node(Box::new(Add)).unwrap();
        graph.set_input(first, A, 2).unwrap();
        graph.set_input(first, B, 3).unwrap();
        graph.set_input(second, B, 10).unwrap();
        graph.connect(first, SUM, second, A).unwrap();

        graph.run_all().unwrap();
        assert_eq!(*graph.output::<i32>(first, SUM).unwrap(), 5);
        assert_eq!(*graph.output::<i32>(second, SUM).unwrap(), 15);
        assert_eq!(graph.connections().unwrap(), vec![Connection::new(first, SUM, second, A)]);
    }

    #[test]
    fn test_self_loop_is_rejected() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(Add)).unwrap();
        assert!(matches!(graph.connect(node, SUM, node, A), Err(GraphError::SelfLoop(_))));
    }

    #[test]
    fn test_missing_name_releases_slots() {
        let mut graph = Graph::new();
        assert!(matches!(
            graph.add_node(Box::new(Nameless)),
            Err(GraphError::ConstraintViolated(_))
        ));
        assert_eq!(graph.node_count(), 0);
        assert_eq!(graph.buses().free_count(DataType::I32), graph.buses().len(DataType::I32));
    }

    #[test]
    fn test_set_input_keeps_connection() {
        let mut graph = Graph::new();
        let first = graph.add_node(Box::new(Add)).unwrap();
        let second = graph.add_node(Box::new(Add)).unwrap();
        graph.set_input(first, A, 4).unwrap();
        graph.connect(first, SUM, second, A).unwrap();
        graph.run(first).unwrap();

        graph.set_input(second, A, 100).unwrap();
        assert_eq!(*graph.input::<i32>(second, A).unwrap(), 4);
        graph.disconnect(second, A).unwrap();
        assert_eq!(*graph.input::<i32>(second, A).unwrap(), 100);
    }

    #[test]
    fn test_remove_detaches_receivers() {
        let mut graph = Graph::new();
        let first = graph.add_node(Box::new(Add)).unwrap();
        let second = graph.add_node(Box::new(Add)).unwrap();
        graph.connect(first, SUM, second, A).unwrap();

        graph.remove_node(first).unwrap();
        assert!(graph.node(first).is_none());
        assert_eq!(graph.source(second, A).unwrap(), None);
        assert_eq!(graph.live_handles().collect::<Vec<_>>(), vec![second]);

        let third = graph.add_node(Box::new(Add)).unwrap();
        assert_eq!(third, NodeHandle(2), "handles are never reused");
    }

    #[test]
    fn test_update_detaches_only_torn_down_outputs() {
        let mut graph = Graph::new();
        let fan = graph.add_node(Box::new(Fan)).unwrap();
        let sink = graph.add_node(Box::new(Add)).unwrap();
        graph.set_input(fan, PortId(0), 2).unwrap();
        graph.update(fan).unwrap();
        graph.connect(fan, PortId(1), sink, B).unwrap();

        graph.update(fan).unwrap();
        assert_eq!(graph.output_ports(fan).unwrap().len(), 2);
        assert_eq!(graph.source(sink, B).unwrap(), None, "recreated ports start unconnected");
    }

    #[test]
    fn test_execution_order_puts_providers_first() {
        let mut graph = Graph::new();
        let last = graph.add_node(Box::new(Add)).unwrap();
        let first = graph.add_node(Box::new(Add)).unwrap();
        graph.connect(first, SUM, last, A).unwrap();
        assert_eq!(graph.execution_order().unwrap(), vec![first, last]);

        graph.connect(last, SUM, first, B).unwrap();
        assert!(matches!(graph.execution_order(), Err(GraphError::CycleDetected)));
    }

    #[test]
    fn test_replace_keeps_old_node_on_failed_init() {
        let mut graph = Graph::new();
        let node = graph.add_node(Box::new(Add)).unwrap();
        assert!(graph.set_node(node, Box::new(Nameless)).is_err());
        assert_eq!(graph.name(node).unwrap(), "add");
    }
}
