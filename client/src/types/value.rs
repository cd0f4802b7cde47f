//! Typed column and parameter values and their proto conversion.

use crate::proto;
use crate::types::{ProtoDeserializable, ProtoSerializable};

/// Declared type of a column or parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    Text,
    Bytes,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Bool => "Bool",
            Self::Int32 => "Int32",
            Self::Uint32 => "Uint32",
            Self::Int64 => "Int64",
            Self::Uint64 => "Uint64",
            Self::Double => "Double",
            Self::Text => "Text",
            Self::Bytes => "Bytes",
        };
        write!(f, "{name}")
    }
}

impl TryFrom<proto::ValueType> for ValueType {
    type Error = String;

    fn try_from(value: proto::ValueType) -> Result<Self, Self::Error> {
        match value {
            proto::ValueType::Bool => Ok(Self::Bool),
            proto::ValueType::Int32 => Ok(Self::Int32),
            proto::ValueType::Uint32 => Ok(Self::Uint32),
            proto::ValueType::Int64 => Ok(Self::Int64),
            proto::ValueType::Uint64 => Ok(Self::Uint64),
            proto::ValueType::Double => Ok(Self::Double),
            proto::ValueType::Text => Ok(Self::Text),
            proto::ValueType::Bytes => Ok(Self::Bytes),
            proto::ValueType::Unspecified => Err("column type is unspecified".to_string()),
        }
    }
}

impl From<ValueType> for proto::ValueType {
    fn from(value: ValueType) -> Self {
        match value {
            ValueType::Bool => Self::Bool,
            ValueType::Int32 => Self::Int32,
            ValueType::Uint32 => Self::Uint32,
            ValueType::Int64 => Self::Int64,
            ValueType::Uint64 => Self::Uint64,
            ValueType::Double => Self::Double,
            ValueType::Text => Self::Text,
            ValueType::Bytes => Self::Bytes,
        }
    }
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// The value's type, or `None` for `Null`.
    #[must_use]
    pub const fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ValueType::Bool),
            Self::Int32(_) => Some(ValueType::Int32),
            Self::Uint32(_) => Some(ValueType::Uint32),
            Self::Int64(_) => Some(ValueType::Int64),
            Self::Uint64(_) => Some(ValueType::Uint64),
            Self::Double(_) => Some(ValueType::Double),
            Self::Text(_) => Some(ValueType::Text),
            Self::Bytes(_) => Some(ValueType::Bytes),
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Uint32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Self::Uint64(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl ProtoSerializable<proto::TypedValue> for Value {
    fn to_proto(self) -> proto::TypedValue {
        use proto::typed_value::Value as Wire;

        let value = match self {
            Self::Null => Wire::NullFlag(true),
            Self::Bool(b) => Wire::Bool(b),
            Self::Int32(n) => Wire::Int32(n),
            Self::Uint32(n) => Wire::Uint32(n),
            Self::Int64(n) => Wire::Int64(n),
            Self::Uint64(n) => Wire::Uint64(n),
            Self::Double(n) => Wire::Double(n),
            Self::Text(s) => Wire::Text(s),
            Self::Bytes(b) => Wire::Bytes(b),
        };
        proto::TypedValue { value: Some(value) }
    }
}

impl ProtoDeserializable<proto::TypedValue> for Value {
    /// An absent oneof is rejected rather than read as null; null is explicit
    /// on the wire.
    fn from_proto(proto_value: proto::TypedValue) -> Result<Self, String> {
        use proto::typed_value::Value as Wire;

        match proto_value.value {
            Some(Wire::NullFlag(_)) => Ok(Self::Null),
            Some(Wire::Bool(b)) => Ok(Self::Bool(b)),
            Some(Wire::Int32(n)) => Ok(Self::Int32(n)),
            Some(Wire::Uint32(n)) => Ok(Self::Uint32(n)),
            Some(Wire::Int64(n)) => Ok(Self::Int64(n)),
            Some(Wire::Uint64(n)) => Ok(Self::Uint64(n)),
            Some(Wire::Double(n)) => Ok(Self::Double(n)),
            Some(Wire::Text(s)) => Ok(Self::Text(s)),
            Some(Wire::Bytes(b)) => Ok(Self::Bytes(b)),
            None => Err("value has no payload".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_of_null_is_none() {
        assert_eq!(Value::Null.value_type(), None);
        assert!(Value::Null.is_null());
        assert_eq!(Value::from(7i32).value_type(), Some(ValueType::Int32));
        assert_eq!(Value::from("x").value_type(), Some(ValueType::Text));
    }

    #[test]
    fn test_null_travels_explicitly() {
        let wire = Value::Null.to_proto();
        assert_eq!(
            wire.value,
            Some(proto::typed_value::Value::NullFlag(true))
        );
        assert_eq!(Value::from_proto(wire), Ok(Value::Null));
    }

    #[test]
    fn test_missing_payload_is_rejected() {
        let result = Value::from_proto(proto::TypedValue { value: None });
        assert!(result.is_err());
    }

    #[test]
    fn test_unspecified_wire_type_is_rejected() {
        assert!(ValueType::try_from(proto::ValueType::Unspecified).is_err());
        assert_eq!(
            ValueType::try_from(proto::ValueType::Uint64),
            Ok(ValueType::Uint64)
        );
    }
}
