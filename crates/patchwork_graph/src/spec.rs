// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node adapter: owns a node instance and maps its port ids to bus slots.
//!
//! [`NodeSpec`] implements the three node capabilities through short-lived
//! views ([`InitView`], [`RunView`], [`UpdateView`]), each borrowing only what
//! its phase may touch. During a run the node's outputs are moved out of the
//! buses into a staging map, so only the owning node can write them.

use crate::bus::{Buses, Slot};
use crate::error::{GraphError, Result};
use crate::expr::Transform;
use crate::node::{
    Annotation, Canvas, Chunker, InitContext, Node, NodeHandle, RunContext, Severity,
    UpdateContext,
};
use crate::port::{DataType, PortDirection, PortId, PortInfo, Stability, Value, ValueMut, ValueRef};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Node position in the editor canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate
    pub x: i32,
    /// Vertical coordinate
    pub y: i32,
}

#[derive(Debug, Clone)]
pub(crate) struct InputSpec {
    pub(crate) data_type: DataType,
    pub(crate) title: String,
    pub(crate) default_slot: Slot,
    pub(crate) slot: Slot,
    pub(crate) stability: Stability,
}

impl InputSpec {
    pub(crate) fn is_connected(&self) -> bool {
        self.slot != self.default_slot
    }
}

#[derive(Debug, Clone)]
pub(crate) struct OutputSpec {
    pub(crate) data_type: DataType,
    pub(crate) title: String,
    pub(crate) slot: Slot,
    pub(crate) stability: Stability,
}

/// Name and port table of one node
#[derive(Debug, Clone)]
pub(crate) struct Ports {
    pub(crate) handle: NodeHandle,
    pub(crate) name: String,
    pub(crate) inputs: IndexMap<PortId, InputSpec>,
    pub(crate) outputs: IndexMap<PortId, OutputSpec>,
}

impl Ports {
    fn new(handle: NodeHandle) -> Self {
        Self {
            handle,
            name: String::new(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }

    pub(crate) fn input(&self, id: PortId) -> Result<&InputSpec> {
        self.inputs.get(&id).ok_or(GraphError::PortNotFound {
            node: self.handle,
            port: id,
        })
    }

    pub(crate) fn input_mut(&mut self, id: PortId) -> Result<&mut InputSpec> {
        let node = self.handle;
        self.inputs
            .get_mut(&id)
            .ok_or(GraphError::PortNotFound { node, port: id })
    }

    pub(crate) fn output(&self, id: PortId) -> Result<&OutputSpec> {
        self.outputs.get(&id).ok_or(GraphError::PortNotFound {
            node: self.handle,
            port: id,
        })
    }

    fn add_output(
        &mut self,
        buses: &mut Buses,
        id: PortId,
        data_type: DataType,
        title: &str,
        stability: Stability,
    ) -> Result<()> {
        if self.outputs.contains_key(&id) {
            return Err(GraphError::constraint(format!(
                "node '{}' declares output {id} twice",
                self.name
            )));
        }
        let slot = buses.allocate_next_free(data_type);
        buses.record_provenance(data_type, slot, self.handle, id)?;
        self.outputs.insert(
            id,
            OutputSpec {
                data_type,
                title: title.to_string(),
                slot,
                stability,
            },
        );
        Ok(())
    }

    /// Free every slot this table claims
    fn release(&mut self, buses: &mut Buses) -> Result<()> {
        for (_, input) in self.inputs.drain(..) {
            buses.free(input.data_type, input.default_slot)?;
        }
        for (_, output) in self.outputs.drain(..) {
            buses.free(output.data_type, output.slot)?;
        }
        Ok(())
    }
}

/// Per-node adapter owned by the graph
pub struct NodeSpec {
    node: Box<dyn Node>,
    pub(crate) ports: Ports,
    pub(crate) position: Position,
    annotations: Vec<Annotation>,
    preview: Option<Canvas>,
}

impl NodeSpec {
    /// Wrap `node` and run its init against `buses`.
    ///
    /// On failure every slot the node managed to claim is released again.
    pub(crate) fn new(handle: NodeHandle, mut node: Box<dyn Node>, buses: &mut Buses) -> Result<Self> {
        let mut ports = Ports::new(handle);
        let mut result = node.init(&mut InitView {
            ports: &mut ports,
            buses: &mut *buses,
        });
        if result.is_ok() && ports.name.is_empty() {
            result = Err(GraphError::constraint(format!("node {handle} did not set a name")));
        }
        if let Err(err) = result {
            ports.release(buses)?;
            return Err(err);
        }
        Ok(Self {
            node,
            ports,
            position: Position::default(),
            annotations: Vec::new(),
            preview: None,
        })
    }

    /// Name set during init
    pub fn name(&self) -> &str {
        &self.ports.name
    }

    /// Handle this adapter was created for
    pub fn handle(&self) -> NodeHandle {
        self.ports.handle
    }

    /// Position in the editor canvas
    pub fn position(&self) -> Position {
        self.position
    }

    /// Annotations emitted by the last run
    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    /// Raster preview from the last run, if the node produced one
    pub fn preview(&self) -> Option<&Canvas> {
        self.preview.as_ref()
    }

    /// Whether the node currently declares output `id`
    pub fn has_output(&self, id: PortId) -> bool {
        self.ports.outputs.contains_key(&id)
    }

    /// Input descriptors in declaration order
    pub fn inputs(&self) -> Vec<PortInfo> {
        self.ports
            .inputs
            .iter()
            .map(|(&id, input)| PortInfo {
                id,
                direction: PortDirection::Input,
                data_type: input.data_type,
                title: input.title.clone(),
                stability: input.stability,
                slot: input.slot,
                connected: input.is_connected(),
            })
            .collect()
    }

    /// Output descriptors in declaration order
    pub fn outputs(&self) -> Vec<PortInfo> {
        self.ports
            .outputs
            .iter()
            .map(|(&id, output)| PortInfo {
                id,
                direction: PortDirection::Output,
                data_type: output.data_type,
                title: output.title.clone(),
                stability: output.stability,
                slot: output.slot,
                connected: false,
            })
            .collect()
    }

    /// Run the node with its bound ports
    pub(crate) fn run(&mut self, buses: &mut Buses, chunker: Chunker) -> Result<()> {
        let Self {
            node,
            ports,
            annotations,
            preview,
            ..
        } = self;
        annotations.clear();

        let mut staged = IndexMap::with_capacity(ports.outputs.len());
        for (&id, output) in &ports.outputs {
            staged.insert(id, buses.take(output.data_type, output.slot)?);
        }

        let result = node.run(&mut RunView {
            ports: &*ports,
            buses: &*buses,
            outputs: &mut staged,
            annotations: &mut *annotations,
            preview,
            chunker,
        });

        for (id, value) in staged {
            let output = ports.output(id)?;
            buses.put(output.data_type, output.slot, value)?;
        }

        for annotation in annotations.iter() {
            match annotation.severity {
                Severity::Warning => tracing::warn!("{} (node {}): {}", ports.name, ports.handle, annotation.message),
                Severity::Error => tracing::error!("{} (node {}): {}", ports.name, ports.handle, annotation.message),
            }
        }
        result
    }

    /// Let the node renegotiate its unstable outputs.
    ///
    /// Every slot freed along the way is appended to `freed`, also when the
    /// node fails halfway.
    pub(crate) fn update(&mut self, buses: &mut Buses, freed: &mut Vec<(DataType, Slot)>) -> Result<()> {
        let Self { node, ports, .. } = self;
        node.update(&mut UpdateView { ports, buses, freed })
    }

    /// Free every slot of this node; consumes the adapter
    pub(crate) fn release(mut self, buses: &mut Buses) -> Result<()> {
        self.ports.release(buses)
    }
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("ports", &self.ports)
            .field("position", &self.position)
            .field("annotations", &self.annotations)
            .finish_non_exhaustive()
    }
}

/// Init-phase view of an adapter
struct InitView<'a> {
    ports: &'a mut Ports,
    buses: &'a mut Buses,
}

impl InitContext for InitView<'_> {
    fn set_name(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(GraphError::constraint("node name must not be empty"));
        }
        if name.chars().any(|c| c.is_whitespace() || c == '"' || c == '#') {
            return Err(GraphError::constraint(format!(
                "node name '{name}' must be a single word without quotes or '#'"
            )));
        }
        self.ports.name = name.to_string();
        Ok(())
    }

    fn declare_input(&mut self, id: PortId, default: Value, title: &str) -> Result<()> {
        if self.ports.inputs.contains_key(&id) {
            return Err(GraphError::constraint(format!(
                "node '{}' declares input {id} twice",
                self.ports.name
            )));
        }
        let data_type = default.data_type();
        let slot = self.buses.allocate_next_free(data_type);
        self.buses.put(data_type, slot, default)?;
        self.ports.inputs.insert(
            id,
            InputSpec {
                data_type,
                title: title.to_string(),
                default_slot: slot,
                slot,
                stability: Stability::Stable,
            },
        );
        Ok(())
    }

    fn declare_output(&mut self, id: PortId, data_type: DataType, title: &str) -> Result<()> {
        self.ports
            .add_output(self.buses, id, data_type, title, Stability::Stable)
    }
}

/// Run-phase view of an adapter
struct RunView<'a> {
    ports: &'a Ports,
    buses: &'a Buses,
    outputs: &'a mut IndexMap<PortId, Value>,
    annotations: &'a mut Vec<Annotation>,
    preview: &'a mut Option<Canvas>,
    chunker: Chunker,
}

impl<'a> RunContext<'a> for RunView<'a> {
    fn input(&self, id: PortId) -> Result<ValueRef<'a>> {
        let input = self.ports.input(id)?;
        let buses: &'a Buses = self.buses;
        buses.get(input.data_type, input.slot)
    }

    fn output(&mut self, id: PortId) -> Result<ValueMut<'_>> {
        let node = self.ports.handle;
        self.outputs
            .get_mut(&id)
            .map(Value::as_value_mut)
            .ok_or(GraphError::PortNotFound { node, port: id })
    }

    fn parse_transform(&self, text: &str) -> Result<Transform> {
        Ok(Transform::compile(text)?)
    }

    fn chunker(&self) -> Chunker {
        self.chunker
    }

    fn warning(&mut self, message: &str) {
        self.annotations.push(Annotation {
            severity: Severity::Warning,
            message: message.to_string(),
        });
    }

    fn error(&mut self, message: &str) {
        self.annotations.push(Annotation {
            severity: Severity::Error,
            message: message.to_string(),
        });
    }

    fn canvas(&mut self, width: usize, height: usize, data: &[f32]) {
        *self.preview = Some(Canvas {
            width,
            height,
            data: data.to_vec(),
        });
    }
}

/// Update-phase view of an adapter
struct UpdateView<'a> {
    ports: &'a mut Ports,
    buses: &'a mut Buses,
    freed: &'a mut Vec<(DataType, Slot)>,
}

impl UpdateContext for UpdateView<'_> {
    fn stable_input(&self, id: PortId) -> Result<ValueRef<'_>> {
        let input = self.ports.input(id)?;
        if input.stability != Stability::Stable {
            return Err(GraphError::constraint(format!(
                "input {id} of '{}' is not stable",
                self.ports.name
            )));
        }
        self.buses.get(input.data_type, input.slot)
    }

    fn remove_unstable_outputs(&mut self) -> Result<()> {
        let unstable: Vec<PortId> = self
            .ports
            .outputs
            .iter()
            .filter(|(_, output)| output.stability == Stability::Unstable)
            .map(|(&id, _)| id)
            .collect();
        for id in unstable {
            if let Some(output) = self.ports.outputs.shift_remove(&id) {
                self.buses.free(output.data_type, output.slot)?;
                self.freed.push((output.data_type, output.slot));
            }
        }
        Ok(())
    }

    fn declare_unstable_output(&mut self, id: PortId, data_type: DataType, title: &str) -> Result<()> {
        self.ports
            .add_output(self.buses, id, data_type, title, Stability::Unstable)
    }
}
