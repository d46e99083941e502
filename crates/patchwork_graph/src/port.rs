// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inputs/outputs and the data flowing through them.

use crate::bus::{Bus, Buses, Slot};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical identifier of a port, chosen by the node implementation.
///
/// Ids are scoped to a node and to a direction: input 0 and output 0 are
/// different ports. They stay the same across `update` calls even when the
/// backing slot changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub usize);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    /// Input port
    Input,
    /// Output port
    Output,
}

/// Whether a port survives `update`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Stability {
    /// Declared during init, lives as long as the node
    #[default]
    Stable,
    /// Declared during update, torn down by the next update
    Unstable,
}

/// Data type that can flow through ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 32-bit signed integer
    I32,
    /// UTF-8 string
    Str,
    /// Sequence of 32-bit floats
    FBuffer,
}

impl DataType {
    /// Every data type, in bus order
    pub const ALL: [DataType; 3] = [DataType::I32, DataType::Str, DataType::FBuffer];

    /// Tag used by the project format
    pub fn tag(self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::Str => "str",
            Self::FBuffer => "fbuffer",
        }
    }

    /// Parse a project format tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.tag() == tag)
    }

    /// Get the color for this data type (for UI)
    pub fn color(self) -> [u8; 3] {
        match self {
            Self::I32 => [80, 200, 200],
            Self::Str => [200, 180, 150],
            Self::FBuffer => [80, 200, 80],
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Owned value of any port type
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Integer
    I32(i32),
    /// String
    Str(String),
    /// Float sequence
    FBuffer(Vec<f32>),
}

impl Value {
    /// Get the data type for this value
    pub fn data_type(&self) -> DataType {
        match self {
            Self::I32(_) => DataType::I32,
            Self::Str(_) => DataType::Str,
            Self::FBuffer(_) => DataType::FBuffer,
        }
    }

    /// Default value of a data type
    pub fn default_for(data_type: DataType) -> Self {
        match data_type {
            DataType::I32 => Self::I32(0),
            DataType::Str => Self::Str(String::new()),
            DataType::FBuffer => Self::FBuffer(Vec::new()),
        }
    }

    /// Borrow the value
    pub fn as_value_ref(&self) -> ValueRef<'_> {
        match self {
            Self::I32(v) => ValueRef::I32(v),
            Self::Str(v) => ValueRef::Str(v),
            Self::FBuffer(v) => ValueRef::FBuffer(v),
        }
    }

    /// Mutably borrow the value without letting its type change
    pub fn as_value_mut(&mut self) -> ValueMut<'_> {
        match self {
            Self::I32(v) => ValueMut::I32(v),
            Self::Str(v) => ValueMut::Str(v),
            Self::FBuffer(v) => ValueMut::FBuffer(v),
        }
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::I32(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<Vec<f32>> for Value {
    fn from(value: Vec<f32>) -> Self {
        Self::FBuffer(value)
    }
}

/// Shared borrow of a port value
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRef<'a> {
    /// Integer
    I32(&'a i32),
    /// String
    Str(&'a String),
    /// Float sequence
    FBuffer(&'a Vec<f32>),
}

impl ValueRef<'_> {
    /// Get the data type for this value
    pub fn data_type(&self) -> DataType {
        match self {
            Self::I32(_) => DataType::I32,
            Self::Str(_) => DataType::Str,
            Self::FBuffer(_) => DataType::FBuffer,
        }
    }

    /// Clone into an owned value
    pub fn to_value(&self) -> Value {
        match *self {
            Self::I32(v) => Value::I32(*v),
            Self::Str(v) => Value::Str(v.clone()),
            Self::FBuffer(v) => Value::FBuffer(v.clone()),
        }
    }
}

/// Exclusive borrow of a port value; the variant is fixed
#[derive(Debug, PartialEq)]
pub enum ValueMut<'a> {
    /// Integer
    I32(&'a mut i32),
    /// String
    Str(&'a mut String),
    /// Float sequence
    FBuffer(&'a mut Vec<f32>),
}

impl ValueMut<'_> {
    /// Get the data type for this value
    pub fn data_type(&self) -> DataType {
        match self {
            Self::I32(_) => DataType::I32,
            Self::Str(_) => DataType::Str,
            Self::FBuffer(_) => DataType::FBuffer,
        }
    }
}

/// Rust type backing one [`DataType`].
///
/// Implemented for `i32`, `String` and `Vec<f32>`; each has its own [`Bus`].
pub trait PortData: Clone + Default + fmt::Debug + Send + 'static {
    /// Data type tag of this Rust type
    const DATA_TYPE: DataType;

    /// Downcast a shared borrow
    fn from_ref<'a>(value: ValueRef<'a>) -> Option<&'a Self>;

    /// Downcast an exclusive borrow
    fn from_mut<'a>(value: ValueMut<'a>) -> Option<&'a mut Self>;

    /// Wrap into an owned value
    fn into_value(self) -> Value;

    /// Select this type's bus
    fn bus(buses: &Buses) -> &Bus<Self>;

    /// Select this type's bus mutably
    fn bus_mut(buses: &mut Buses) -> &mut Bus<Self>;
}

impl PortData for i32 {
    const DATA_TYPE: DataType = DataType::I32;

    fn from_ref<'a>(value: ValueRef<'a>) -> Option<&'a Self> {
        match value {
            ValueRef::I32(v) => Some(v),
            _ => None,
        }
    }

    fn from_mut<'a>(value: ValueMut<'a>) -> Option<&'a mut Self> {
        match value {
            ValueMut::I32(v) => Some(v),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::I32(self)
    }

    fn bus(buses: &Buses) -> &Bus<Self> {
        &buses.i32
    }

    fn bus_mut(buses: &mut Buses) -> &mut Bus<Self> {
        &mut buses.i32
    }
}

impl PortData for String {
    const DATA_TYPE: DataType = DataType::Str;

    fn from_ref<'a>(value: ValueRef<'a>) -> Option<&'a Self> {
        match value {
            ValueRef::Str(v) => Some(v),
            _ => None,
        }
    }

    fn from_mut<'a>(value: ValueMut<'a>) -> Option<&'a mut Self> {
        match value {
            ValueMut::Str(v) => Some(v),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Str(self)
    }

    fn bus(buses: &Buses) -> &Bus<Self> {
        &buses.str
    }

    fn bus_mut(buses: &mut Buses) -> &mut Bus<Self> {
        &mut buses.str
    }
}

impl PortData for Vec<f32> {
    const DATA_TYPE: DataType = DataType::FBuffer;

    fn from_ref<'a>(value: ValueRef<'a>) -> Option<&'a Self> {
        match value {
            ValueRef::FBuffer(v) => Some(v),
            _ => None,
        }
    }

    fn from_mut<'a>(value: ValueMut<'a>) -> Option<&'a mut Self> {
        match value {
            ValueMut::FBuffer(v) => Some(v),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::FBuffer(self)
    }

    fn bus(buses: &Buses) -> &Bus<Self> {
        &buses.fbuffer
    }

    fn bus_mut(buses: &mut Buses) -> &mut Bus<Self> {
        &mut buses.fbuffer
    }
}

/// Read-only description of a declared port, for inspection and UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Logical port id
    pub id: PortId,
    /// Port direction
    pub direction: PortDirection,
    /// Data type
    pub data_type: DataType,
    /// Human-readable title
    pub title: String,
    /// Whether the port survives `update`
    pub stability: Stability,
    /// Backing slot right now
    pub slot: Slot,
    /// For inputs: bound to an upstream output instead of the own literal
    pub connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip() {
        for ty in DataType::ALL {
            assert_eq!(DataType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(DataType::from_tag("f32"), None);
    }

    #[test]
    fn test_downcasts_respect_type() {
        let value = Value::from(vec![1.0, 2.0]);
        assert_eq!(<Vec<f32>>::from_ref(value.as_value_ref()), Some(&vec![1.0, 2.0]));
        assert_eq!(i32::from_ref(value.as_value_ref()), None);

        let mut value = Value::from(7);
        *i32::from_mut(value.as_value_mut()).unwrap() += 1;
        assert_eq!(value, Value::I32(8));
        assert!(String::from_mut(value.as_value_mut()).is_none());
    }
}
