use std::fmt;

use crate::types::IntType;

/// A value produced by comptime evaluation.
///
/// Integers carry their type once one is known; literals that never met a
/// typed operand stay untyped.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ComptimeValue {
    Int { value: i128, ty: Option<IntType> },
    Bool(bool),
    Void,
    Array(Vec<ComptimeValue>),
    Struct {
        name: String,
        fields: Vec<(String, ComptimeValue)>,
    },
}

impl ComptimeValue {
    pub fn int(value: i128, ty: IntType) -> Self {
        ComptimeValue::Int {
            value,
            ty: Some(ty),
        }
    }

    pub fn untyped(value: i128) -> Self {
        ComptimeValue::Int { value, ty: None }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            ComptimeValue::Int { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Non-negative integer usable as a length, count or alignment.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_int().and_then(|v| u64::try_from(v).ok())
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ComptimeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn int_type(&self) -> Option<IntType> {
        match self {
            ComptimeValue::Int { ty, .. } => *ty,
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ComptimeValue::Int { .. } => "integer",
            ComptimeValue::Bool(_) => "bool",
            ComptimeValue::Void => "void",
            ComptimeValue::Array(_) => "array",
            ComptimeValue::Struct { .. } => "struct",
        }
    }

    /// Integer elements of an array value, if every element is an integer.
    pub fn int_elements(&self) -> Option<Vec<i128>> {
        match self {
            ComptimeValue::Array(items) => items.iter().map(ComptimeValue::as_int).collect(),
            _ => None,
        }
    }
}

impl fmt::Display for ComptimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComptimeValue::Int { value, .. } => write!(f, "{value}"),
            ComptimeValue::Bool(b) => write!(f, "{b}"),
            ComptimeValue::Void => f.write_str("void"),
            ComptimeValue::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            ComptimeValue::Struct { name, fields } => {
                write!(f, "{name} {{ ")?;
                for (i, (field, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}: {value}")?;
                }
                f.write_str(" }")
            }
        }
    }
}
