// SPDX-License-Identifier: MIT OR Apache-2.0
//! Typed value buses and the slot ledger.
//!
//! Each [`DataType`] owns one [`Bus`]: a growable array of values plus an
//! occupancy ledger. Ports address values by [`Slot`]. An output owns its
//! slot; a connected input aliases the provider's slot. Freed slots go to a
//! free list that is consulted before the array grows.

use crate::error::{GraphError, Result};
use crate::node::NodeHandle;
use crate::port::{DataType, PortData, PortId, Value, ValueRef};
use std::collections::HashMap;
use std::fmt;

/// Index into a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(usize);

impl Slot {
    /// Raw index into the bus array
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Producer of an output slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Provenance {
    /// Producing node
    pub node: NodeHandle,
    /// Output id on the producing node
    pub output: PortId,
}

/// Backing store for one data type
#[derive(Debug, Clone)]
pub struct Bus<T> {
    values: Vec<T>,
    live: Vec<bool>,
    free: Vec<Slot>,
    provenance: HashMap<Slot, Provenance>,
}

impl<T: PortData> Bus<T> {
    /// Create an empty bus with room for `capacity` slots
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            live: Vec::with_capacity(capacity),
            free: Vec::new(),
            provenance: HashMap::new(),
        }
    }

    /// Claim a slot, reusing a freed one before growing.
    ///
    /// The slot starts out holding `T::default()`.
    pub fn allocate(&mut self) -> Slot {
        if let Some(slot) = self.free.pop() {
            self.values[slot.0] = T::default();
            self.live[slot.0] = true;
            return slot;
        }
        self.values.push(T::default());
        self.live.push(true);
        Slot(self.values.len() - 1)
    }

    /// Return a slot to the free list.
    ///
    /// The caller guarantees that no live input still aliases it.
    pub fn free(&mut self, slot: Slot) -> Result<()> {
        self.check_live(slot)?;
        self.live[slot.0] = false;
        self.provenance.remove(&slot);
        self.free.push(slot);
        Ok(())
    }

    /// Attach producer identity to an output slot
    pub fn record_provenance(&mut self, slot: Slot, provenance: Provenance) -> Result<()> {
        self.check_live(slot)?;
        self.provenance.insert(slot, provenance);
        Ok(())
    }

    /// Producer of an output slot, if the slot belongs to an output
    pub fn provenance(&self, slot: Slot) -> Option<Provenance> {
        self.provenance.get(&slot).copied()
    }

    /// Read a live slot
    pub fn get(&self, slot: Slot) -> Result<&T> {
        self.check_live(slot)?;
        Ok(&self.values[slot.0])
    }

    /// Write access to a live slot
    pub fn get_mut(&mut self, slot: Slot) -> Result<&mut T> {
        self.check_live(slot)?;
        Ok(&mut self.values[slot.0])
    }

    /// Whether the slot is currently claimed
    pub fn is_live(&self, slot: Slot) -> bool {
        self.live.get(slot.0).copied().unwrap_or(false)
    }

    /// Number of slots ever allocated
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no slot was ever allocated
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of slots waiting on the free list
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    fn check_live(&self, slot: Slot) -> Result<()> {
        if slot.0 >= self.values.len() {
            return Err(GraphError::constraint(format!(
                "{} slot {slot} is beyond bus capacity {}",
                T::DATA_TYPE,
                self.values.len()
            )));
        }
        if !self.live[slot.0] {
            return Err(GraphError::constraint(format!(
                "{} slot {slot} is not allocated",
                T::DATA_TYPE
            )));
        }
        Ok(())
    }
}

impl<T: PortData> Default for Bus<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

/// All buses of a graph, one per data type
#[derive(Debug, Clone, Default)]
pub struct Buses {
    pub(crate) i32: Bus<i32>,
    pub(crate) str: Bus<String>,
    pub(crate) fbuffer: Bus<Vec<f32>>,
}

impl Buses {
    /// Create buses with room for `capacity` slots each
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            i32: Bus::with_capacity(capacity),
            str: Bus::with_capacity(capacity),
            fbuffer: Bus::with_capacity(capacity),
        }
    }

    /// Typed view of one bus
    pub fn bus<T: PortData>(&self) -> &Bus<T> {
        T::bus(self)
    }

    /// Claim a slot on the bus of `data_type`
    pub fn allocate_next_free(&mut self, data_type: DataType) -> Slot {
        match data_type {
            DataType::I32 => self.i32.allocate(),
            DataType::Str => self.str.allocate(),
            DataType::FBuffer => self.fbuffer.allocate(),
        }
    }

    /// Release a slot on the bus of `data_type`
    pub fn free(&mut self, data_type: DataType, slot: Slot) -> Result<()> {
        match data_type {
            DataType::I32 => self.i32.free(slot),
            DataType::Str => self.str.free(slot),
            DataType::FBuffer => self.fbuffer.free(slot),
        }
    }

    /// Attach producer identity to an output slot
    pub fn record_provenance(
        &mut self,
        data_type: DataType,
        slot: Slot,
        node: NodeHandle,
        output: PortId,
    ) -> Result<()> {
        let provenance = Provenance { node, output };
        match data_type {
            DataType::I32 => self.i32.record_provenance(slot, provenance),
            DataType::Str => self.str.record_provenance(slot, provenance),
            DataType::FBuffer => self.fbuffer.record_provenance(slot, provenance),
        }
    }

    /// Producer of an output slot
    pub fn provenance(&self, data_type: DataType, slot: Slot) -> Option<Provenance> {
        match data_type {
            DataType::I32 => self.i32.provenance(slot),
            DataType::Str => self.str.provenance(slot),
            DataType::FBuffer => self.fbuffer.provenance(slot),
        }
    }

    /// Read a slot without knowing its Rust type
    pub fn get(&self, data_type: DataType, slot: Slot) -> Result<ValueRef<'_>> {
        Ok(match data_type {
            DataType::I32 => ValueRef::I32(self.i32.get(slot)?),
            DataType::Str => ValueRef::Str(self.str.get(slot)?),
            DataType::FBuffer => ValueRef::FBuffer(self.fbuffer.get(slot)?),
        })
    }

    /// Move a value out of its slot, leaving the type's default behind
    pub fn take(&mut self, data_type: DataType, slot: Slot) -> Result<Value> {
        Ok(match data_type {
            DataType::I32 => Value::I32(std::mem::take(self.i32.get_mut(slot)?)),
            DataType::Str => Value::Str(std::mem::take(self.str.get_mut(slot)?)),
            DataType::FBuffer => Value::FBuffer(std::mem::take(self.fbuffer.get_mut(slot)?)),
        })
    }

    /// Store a value into a slot of the bus of `data_type`
    pub fn put(&mut self, data_type: DataType, slot: Slot, value: Value) -> Result<()> {
        if value.data_type() != data_type {
            return Err(GraphError::TypeMismatch {
                expected: data_type,
                found: value.data_type(),
            });
        }
        match value {
            Value::I32(v) => *self.i32.get_mut(slot)? = v,
            Value::Str(v) => *self.str.get_mut(slot)? = v,
            Value::FBuffer(v) => *self.fbuffer.get_mut(slot)? = v,
        }
        Ok(())
    }

    /// Number of slots ever allocated on the bus of `data_type`
    pub fn len(&self, data_type: DataType) -> usize {
        match data_type {
            DataType::I32 => self.i32.len(),
            DataType::Str => self.str.len(),
            DataType::FBuffer => self.fbuffer.len(),
        }
    }

    /// Number of freed slots on the bus of `data_type`
    pub fn free_count(&self, data_type: DataType) -> usize {
        match data_type {
            DataType::I32 => self.i32.free_count(),
            DataType::Str => self.str.free_count(),
            DataType::FBuffer => self.fbuffer.free_count(),
        }
    }

    /// Whether a slot is claimed on the bus of `data_type`
    pub fn is_live(&self, data_type: DataType, slot: Slot) -> bool {
        match data_type {
            DataType::I32 => self.i32.is_live(slot),
            DataType::Str => self.str.is_live(slot),
            DataType::FBuffer => self.fbuffer.is_live(slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_slots_are_reused_before_growing() {
        let mut bus = Bus::<i32>::default();
        let a = bus.allocate();
        let b = bus.allocate();
        *bus.get_mut(b).unwrap() = 42;
        bus.free(b).unwrap();
        assert_eq!(bus.free_count(), 1);

        let c = bus.allocate();
        assert_eq!(c, b);
        assert_eq!(bus.len(), 2);
        assert_eq!(*bus.get(c).unwrap(), 0, "reused slot starts from default");
        assert_ne!(a, c);
    }

    #[test]
    fn test_access_beyond_capacity_is_a_violation() {
        let bus = Bus::<String>::default();
        assert!(matches!(bus.get(Slot(3)), Err(GraphError::ConstraintViolated(_))));
    }

    #[test]
    fn test_freed_slot_loses_provenance() {
        let mut buses = Buses::default();
        let slot = buses.allocate_next_free(DataType::FBuffer);
        buses
            .record_provenance(DataType::FBuffer, slot, NodeHandle(2), PortId(1))
            .unwrap();
        assert_eq!(
            buses.provenance(DataType::FBuffer, slot),
            Some(Provenance { node: NodeHandle(2), output: PortId(1) })
        );

        buses.free(DataType::FBuffer, slot).unwrap();
        assert_eq!(buses.provenance(DataType::FBuffer, slot), None);
        assert!(buses.get(DataType::FBuffer, slot).is_err());
        assert!(buses.free(DataType::FBuffer, slot).is_err(), "double free");
    }

    #[test]
    fn test_take_and_put() {
        let mut buses = Buses::default();
        let slot = buses.allocate_next_free(DataType::Str);
        buses.put(DataType::Str, slot, Value::from("hello")).unwrap();
        assert!(buses.put(DataType::Str, slot, Value::from(1)).is_err());
        assert_eq!(buses.take(DataType::Str, slot).unwrap(), Value::from("hello"));
        assert_eq!(buses.get(DataType::Str, slot).unwrap(), ValueRef::Str(&String::new()));
    }
}
