//! Wire representation of typed values
//!
//! The engine exchanges variables as `{type, value, valueInfo}` objects where
//! the type name is capitalized (`"Integer"`) while the client's mappers are
//! registered under decapitalized names (`"integer"`). The normalization lives
//! here in a single pair of functions instead of scattered string munging.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single variable as it appears on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireValue {
    /// Capitalized wire type name, e.g. `Integer`, `Object`
    #[serde(rename = "type")]
    pub value_type: String,
    /// The value payload; `Object` values carry their serialized form here
    #[serde(default)]
    pub value: serde_json::Value,
    /// Type metadata for `Object` values, empty for primitives
    #[serde(default, skip_serializing_if = "ValueInfo::is_empty")]
    pub value_info: ValueInfo,
}

impl WireValue {
    pub fn primitive(value_type: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            value_type: value_type.into(),
            value,
            value_info: ValueInfo::default(),
        }
    }
}

/// The `valueInfo` block attached to object values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serialization_data_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transient: Option<bool>,
}

impl ValueInfo {
    pub fn is_empty(&self) -> bool {
        self.object_type_name.is_none()
            && self.serialization_data_format.is_none()
            && self.transient.is_none()
    }
}

/// Variable map as it appears in wire payloads
pub type WireVariables = HashMap<String, WireValue>;

/// Decapitalize the first letter of a wire type name
///
/// `"Integer"` becomes `"integer"`; already-lowercase names pass through. The
/// inverse of [`capitalize`]. This is the one place the server's naming
/// convention is bridged to the mapper registry's.
#[must_use]
pub fn decapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Capitalize the first letter of a mapper type name for the wire
#[must_use]
pub fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn type_name_normalization_round_trips() {
        assert_eq!(decapitalize("Integer"), "integer");
        assert_eq!(decapitalize("integer"), "integer");
        assert_eq!(capitalize("integer"), "Integer");
        assert_eq!(decapitalize(""), "");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn primitive_wire_value_omits_empty_value_info() {
        let wire = WireValue::primitive("Integer", json!(42));
        let encoded = serde_json::to_value(&wire).unwrap();
        assert_eq!(encoded, json!({"type": "Integer", "value": 42}));
    }

    #[test]
    fn object_wire_value_keeps_value_info() {
        let wire = WireValue {
            value_type: "Object".into(),
            value: json!("{\"total\":3}"),
            value_info: ValueInfo {
                object_type_name: Some("Order".into()),
                serialization_data_format: Some("application/json".into()),
                transient: None,
            },
        };
        let encoded = serde_json::to_value(&wire).unwrap();
        assert_eq!(
            encoded["valueInfo"],
            json!({
                "objectTypeName": "Order",
                "serializationDataFormat": "application/json"
            })
        );

        let decoded: WireValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, wire);
    }
}
