//! # Typed Process Variables
//!
//! The tagged-union variable model shared by every other component. A
//! [`TypedValue`] carries a value plus enough type metadata to reconstruct it
//! on the other side of the wire; the closed variant set means "which mapper
//! applies" is a `match`, not a runtime type probe. User-defined types travel
//! through the single [`TypedValue::Object`] escape hatch.

pub mod mappers;
pub mod wire;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::{ClientError, ClientResult};

/// Map of variable name to typed value, as attached to a task or a report
pub type VariableMap = HashMap<String, TypedValue>;

/// A process variable with its type tag
///
/// Primitive variants map one-to-one onto the engine's primitive value types.
/// The `Object` variant holds the authoritative serialized form of a
/// user-defined value; materializing it back into a native value goes through
/// the [`mappers::ValueMapperRegistry`].
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Boolean(bool),
    String(String),
    Short(i16),
    Integer(i32),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
    Bytes(Vec<u8>),
    Object(ObjectValue),
}

/// A user-defined value in its serialized wire form
///
/// The `serialized_value` is authoritative. A materialized native object is
/// only ever a cache that can be discarded and reconstructed within the same
/// session, so this struct does not carry one.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectValue {
    /// Value serialized in `serialization_format`
    pub serialized_value: String,
    /// MIME-style format identifier, e.g. `application/json`
    pub serialization_format: String,
    /// Logical type name the receiving side resolves through its registered
    /// decoder table
    pub object_type_name: String,
}

impl ObjectValue {
    pub fn new(
        serialized_value: impl Into<String>,
        serialization_format: impl Into<String>,
        object_type_name: impl Into<String>,
    ) -> Self {
        Self {
            serialized_value: serialized_value.into(),
            serialization_format: serialization_format.into(),
            object_type_name: object_type_name.into(),
        }
    }
}

impl TypedValue {
    /// The mapper-facing type name of this value (decapitalized convention)
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            TypedValue::Null => "null",
            TypedValue::Boolean(_) => "boolean",
            TypedValue::String(_) => "string",
            TypedValue::Short(_) => "short",
            TypedValue::Integer(_) => "integer",
            TypedValue::Long(_) => "long",
            TypedValue::Double(_) => "double",
            TypedValue::Date(_) => "date",
            TypedValue::Bytes(_) => "bytes",
            TypedValue::Object(_) => "object",
        }
    }

    /// Resolve an untyped JSON runtime value to exactly one typed variant
    ///
    /// This backs the untyped convenience puts: scalars map onto the matching
    /// primitive variant, integral numbers pick the narrowest of
    /// `Integer`/`Long`. Arrays and JSON objects have no implicit mapping and
    /// must be passed as an explicit [`TypedValue::Object`]; anything else is
    /// an unsupported-type error, never a silent string conversion.
    pub fn of(value: serde_json::Value) -> ClientResult<Self> {
        match value {
            serde_json::Value::Null => Ok(TypedValue::Null),
            serde_json::Value::Bool(b) => Ok(TypedValue::Boolean(b)),
            serde_json::Value::String(s) => Ok(TypedValue::String(s)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if let Ok(int) = i32::try_from(i) {
                        Ok(TypedValue::Integer(int))
                    } else {
                        Ok(TypedValue::Long(i))
                    }
                } else if let Some(f) = n.as_f64() {
                    Ok(TypedValue::Double(f))
                } else {
                    Err(ClientError::data_format(format!(
                        "number {n} fits no supported numeric variant"
                    )))
                }
            }
            other => Err(ClientError::data_format(format!(
                "no value mapper claims runtime value of JSON kind {}; wrap it \
                 in an explicit object value",
                json_kind(&other)
            ))),
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            TypedValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Widening numeric accessor over `Short`/`Integer`/`Long`
    pub fn as_long(&self) -> Option<i64> {
        match self {
            TypedValue::Short(v) => Some(i64::from(*v)),
            TypedValue::Integer(v) => Some(i64::from(*v)),
            TypedValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            TypedValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            TypedValue::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

impl From<bool> for TypedValue {
    fn from(v: bool) -> Self {
        TypedValue::Boolean(v)
    }
}

impl From<i16> for TypedValue {
    fn from(v: i16) -> Self {
        TypedValue::Short(v)
    }
}

impl From<i32> for TypedValue {
    fn from(v: i32) -> Self {
        TypedValue::Integer(v)
    }
}

impl From<i64> for TypedValue {
    fn from(v: i64) -> Self {
        TypedValue::Long(v)
    }
}

impl From<f64> for TypedValue {
    fn from(v: f64) -> Self {
        TypedValue::Double(v)
    }
}

impl From<String> for TypedValue {
    fn from(v: String) -> Self {
        TypedValue::String(v)
    }
}

impl From<&str> for TypedValue {
    fn from(v: &str) -> Self {
        TypedValue::String(v.to_string())
    }
}

impl From<Vec<u8>> for TypedValue {
    fn from(v: Vec<u8>) -> Self {
        TypedValue::Bytes(v)
    }
}

impl From<DateTime<Utc>> for TypedValue {
    fn from(v: DateTime<Utc>) -> Self {
        TypedValue::Date(v)
    }
}

impl From<ObjectValue> for TypedValue {
    fn from(v: ObjectValue) -> Self {
        TypedValue::Object(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn runtime_resolution_picks_narrowest_integer() {
        assert_eq!(TypedValue::of(json!(12)).unwrap(), TypedValue::Integer(12));
        assert_eq!(
            TypedValue::of(json!(i64::from(i32::MAX) + 1)).unwrap(),
            TypedValue::Long(i64::from(i32::MAX) + 1)
        );
    }

    #[test]
    fn runtime_resolution_handles_scalars() {
        assert_eq!(TypedValue::of(json!(null)).unwrap(), TypedValue::Null);
        assert_eq!(
            TypedValue::of(json!(true)).unwrap(),
            TypedValue::Boolean(true)
        );
        assert_eq!(
            TypedValue::of(json!("abc")).unwrap(),
            TypedValue::String("abc".into())
        );
        assert_eq!(
            TypedValue::of(json!(1.5)).unwrap(),
            TypedValue::Double(1.5)
        );
    }

    #[test]
    fn runtime_resolution_rejects_unclaimed_kinds() {
        let err = TypedValue::of(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ClientError::DataFormat(_)));

        let err = TypedValue::of(json!({"a": 1})).unwrap_err();
        assert!(matches!(err, ClientError::DataFormat(_)));
    }
}
