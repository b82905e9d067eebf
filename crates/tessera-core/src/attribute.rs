//! Node attributes.

use crate::types::TensorValue;
use std::collections::HashMap;

/// Attribute map attached to every node.
pub type Attributes = HashMap<String, AttributeValue>;

/// Value of a single node attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    Ints(Vec<i64>),
    Float(f32),
    String(String),
    Bool(bool),
    /// Literal carried by a target `const` node.
    Tensor(TensorValue),
    /// Zero points attached to a quantized target convolution.
    ConvQuantization { input_zp: i64, weight_zp: i64 },
}

impl AttributeValue {
    /// Short name of the variant, used in attribute error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            AttributeValue::Int(_) => "int",
            AttributeValue::Ints(_) => "ints",
            AttributeValue::Float(_) => "float",
            AttributeValue::String(_) => "string",
            AttributeValue::Bool(_) => "bool",
            AttributeValue::Tensor(_) => "tensor",
            AttributeValue::ConvQuantization { .. } => "conv_quantization",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            AttributeValue::Ints(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_tensor(&self) -> Option<&TensorValue> {
        match self {
            AttributeValue::Tensor(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(value: Vec<i64>) -> Self {
        AttributeValue::Ints(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<TensorValue> for AttributeValue {
    fn from(value: TensorValue) -> Self {
        AttributeValue::Tensor(value)
    }
}
