//! # Value Mapper Registry
//!
//! Converts between the [`TypedValue`] model and the `{type, value, valueInfo}`
//! wire shape. Primitive mappers are total, pure functions selected by a
//! `match` over the closed variant set. The object mapper is the single
//! configuration-bearing piece: it holds a pluggable serializer (JSON by
//! default) and an explicit table of registered object type names, supplied by
//! the application at configuration time. Unknown wire type names and unknown
//! object type names are data errors, never best-effort decodes.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::{ClientError, ClientResult};
use crate::variables::wire::{capitalize, decapitalize, ValueInfo, WireValue};
use crate::variables::{ObjectValue, TypedValue};

/// Wire format for date values, millisecond precision with a numeric offset
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Serializer plugged into the object mapper
///
/// The default is [`JsonObjectSerializer`]; applications exchanging XML or a
/// custom format with the engine provide their own implementation.
pub trait ObjectSerializer: Send + Sync {
    /// Format identifier as declared in `valueInfo.serializationDataFormat`
    fn serialization_format(&self) -> &str;

    /// Serialize a native (JSON-modeled) value into its wire string
    fn serialize(&self, value: &serde_json::Value) -> ClientResult<String>;

    /// Parse a wire string back into a native value
    fn deserialize(&self, serialized: &str) -> ClientResult<serde_json::Value>;
}

/// Default object serializer: `application/json`
#[derive(Debug, Default)]
pub struct JsonObjectSerializer;

impl ObjectSerializer for JsonObjectSerializer {
    fn serialization_format(&self) -> &str {
        "application/json"
    }

    fn serialize(&self, value: &serde_json::Value) -> ClientResult<String> {
        serde_json::to_string(value).map_err(ClientError::from)
    }

    fn deserialize(&self, serialized: &str) -> ClientResult<serde_json::Value> {
        serde_json::from_str(serialized).map_err(ClientError::from)
    }
}

/// Decoder registered for one object type name
type ObjectDecoder = Arc<dyn Fn(&serde_json::Value) -> ClientResult<serde_json::Value> + Send + Sync>;

/// Per-kind converters between [`TypedValue`] and [`WireValue`]
///
/// One registry instance is shared by the fetch client (decoding) and the
/// outcome reporter (encoding); it is injected through their constructors, no
/// global singleton. Object type names are matched against the explicit
/// decoder table; wire type names are matched case-normalized through
/// [`decapitalize`].
pub struct ValueMapperRegistry {
    serializer: Arc<dyn ObjectSerializer>,
    object_decoders: HashMap<String, ObjectDecoder>,
}

impl std::fmt::Debug for ValueMapperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueMapperRegistry")
            .field("serialization_format", &self.serializer.serialization_format())
            .field(
                "registered_object_types",
                &self.object_decoders.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for ValueMapperRegistry {
    fn default() -> Self {
        Self::new(Arc::new(JsonObjectSerializer))
    }
}

impl ValueMapperRegistry {
    pub fn new(serializer: Arc<dyn ObjectSerializer>) -> Self {
        Self {
            serializer,
            object_decoders: HashMap::new(),
        }
    }

    /// The serialization format object values are encoded with
    pub fn serialization_format(&self) -> &str {
        self.serializer.serialization_format()
    }

    /// Register a decoder for an object type name
    ///
    /// Materializing an [`ObjectValue`] whose `object_type_name` was never
    /// registered fails with [`ClientError::DataFormat`]; there is no
    /// reflective fallback. The decoder parses into `T` for validation and a
    /// canonical re-encoding.
    pub fn register_object_type<T>(&mut self, type_name: impl Into<String>)
    where
        T: DeserializeOwned + serde::Serialize + 'static,
    {
        let decoder: ObjectDecoder = Arc::new(|raw: &serde_json::Value| {
            let typed: T = serde_json::from_value(raw.clone()).map_err(|e| {
                ClientError::data_format(format!("object value does not match registered type: {e}"))
            })?;
            serde_json::to_value(typed).map_err(ClientError::from)
        });
        self.object_decoders.insert(type_name.into(), decoder);
    }

    /// Whether a decoder was registered for `type_name`
    pub fn has_object_type(&self, type_name: &str) -> bool {
        self.object_decoders.contains_key(type_name)
    }

    /// Encode a typed value into its wire representation
    pub fn serialize(&self, value: &TypedValue) -> ClientResult<WireValue> {
        let wire = match value {
            TypedValue::Null => WireValue::primitive("Null", serde_json::Value::Null),
            TypedValue::Boolean(b) => WireValue::primitive("Boolean", json!(b)),
            TypedValue::String(s) => WireValue::primitive("String", json!(s)),
            TypedValue::Short(v) => WireValue::primitive("Short", json!(v)),
            TypedValue::Integer(v) => WireValue::primitive("Integer", json!(v)),
            TypedValue::Long(v) => WireValue::primitive("Long", json!(v)),
            TypedValue::Double(v) => {
                if !v.is_finite() {
                    return Err(ClientError::data_format(format!(
                        "double value {v} is not representable on the wire"
                    )));
                }
                WireValue::primitive("Double", json!(v))
            }
            TypedValue::Date(d) => {
                WireValue::primitive("Date", json!(d.format(DATE_FORMAT).to_string()))
            }
            TypedValue::Bytes(b) => WireValue::primitive("Bytes", json!(BASE64.encode(b))),
            TypedValue::Object(o) => WireValue {
                value_type: capitalize(value.type_name()),
                value: json!(o.serialized_value),
                value_info: ValueInfo {
                    object_type_name: Some(o.object_type_name.clone()),
                    serialization_data_format: Some(o.serialization_format.clone()),
                    transient: None,
                },
            },
        };
        Ok(wire)
    }

    /// Decode a wire value back into a typed value
    ///
    /// The wire type name is resolved case-normalized against the built-in
    /// mapper set. An unresolvable name is a hard [`ClientError::DataFormat`];
    /// for `Object` values the declared serialization format must match this
    /// registry's supported format.
    pub fn deserialize(&self, wire: &WireValue) -> ClientResult<TypedValue> {
        let type_name = decapitalize(&wire.value_type);
        match type_name.as_str() {
            "null" => Ok(TypedValue::Null),
            "boolean" => wire
                .value
                .as_bool()
                .map(TypedValue::Boolean)
                .ok_or_else(|| mismatch("boolean", &wire.value)),
            "string" => wire
                .value
                .as_str()
                .map(|s| TypedValue::String(s.to_string()))
                .ok_or_else(|| mismatch("string", &wire.value)),
            "short" => {
                let n = wire
                    .value
                    .as_i64()
                    .ok_or_else(|| mismatch("short", &wire.value))?;
                i16::try_from(n).map(TypedValue::Short).map_err(|_| {
                    ClientError::data_format(format!("value {n} out of range for short"))
                })
            }
            "integer" => {
                let n = wire
                    .value
                    .as_i64()
                    .ok_or_else(|| mismatch("integer", &wire.value))?;
                i32::try_from(n).map(TypedValue::Integer).map_err(|_| {
                    ClientError::data_format(format!("value {n} out of range for integer"))
                })
            }
            "long" => wire
                .value
                .as_i64()
                .map(TypedValue::Long)
                .ok_or_else(|| mismatch("long", &wire.value)),
            "double" => wire
                .value
                .as_f64()
                .map(TypedValue::Double)
                .ok_or_else(|| mismatch("double", &wire.value)),
            "date" => {
                let raw = wire
                    .value
                    .as_str()
                    .ok_or_else(|| mismatch("date", &wire.value))?;
                parse_wire_date(raw).map(TypedValue::Date)
            }
            "bytes" => {
                let raw = wire
                    .value
                    .as_str()
                    .ok_or_else(|| mismatch("bytes", &wire.value))?;
                BASE64.decode(raw).map(TypedValue::Bytes).map_err(|e| {
                    ClientError::data_format(format!("invalid base64 in bytes value: {e}"))
                })
            }
            "object" => self.deserialize_object(wire),
            other => Err(ClientError::data_format(format!(
                "no value mapper registered for wire type '{other}'"
            ))),
        }
    }

    fn deserialize_object(&self, wire: &WireValue) -> ClientResult<TypedValue> {
        let serialized = wire
            .value
            .as_str()
            .ok_or_else(|| mismatch("object", &wire.value))?;

        let format = wire
            .value_info
            .serialization_data_format
            .as_deref()
            .ok_or_else(|| {
                ClientError::data_format("object value is missing serializationDataFormat")
            })?;
        if format != self.serializer.serialization_format() {
            return Err(ClientError::data_format(format!(
                "unsupported object serialization format '{format}', this client supports '{}'",
                self.serializer.serialization_format()
            )));
        }

        let type_name = wire
            .value_info
            .object_type_name
            .as_deref()
            .ok_or_else(|| ClientError::data_format("object value is missing objectTypeName"))?;

        Ok(TypedValue::Object(ObjectValue::new(
            serialized, format, type_name,
        )))
    }

    /// Materialize an object value into the native value its registered
    /// decoder produces
    ///
    /// Validates the declared format against the configured serializer and the
    /// type name against the decoder table; a mismatch on either is a
    /// [`ClientError::DataFormat`], never a silently wrong value.
    pub fn materialize(&self, object: &ObjectValue) -> ClientResult<serde_json::Value> {
        if object.serialization_format != self.serializer.serialization_format() {
            return Err(ClientError::data_format(format!(
                "object declares serialization format '{}', this client supports '{}'",
                object.serialization_format,
                self.serializer.serialization_format()
            )));
        }

        let decoder = self.object_decoders.get(&object.object_type_name).ok_or_else(|| {
            ClientError::data_format(format!(
                "no decoder registered for object type '{}'",
                object.object_type_name
            ))
        })?;

        let raw = self.serializer.deserialize(&object.serialized_value)?;
        decoder(&raw)
    }

    /// Build an object value from a native serializable value
    ///
    /// The inverse of [`materialize`](Self::materialize) for the configured
    /// serializer.
    pub fn object_value<T: serde::Serialize>(
        &self,
        value: &T,
        object_type_name: impl Into<String>,
    ) -> ClientResult<ObjectValue> {
        let raw = serde_json::to_value(value).map_err(ClientError::from)?;
        let serialized = self.serializer.serialize(&raw)?;
        Ok(ObjectValue::new(
            serialized,
            self.serializer.serialization_format(),
            object_type_name,
        ))
    }
}

/// Parse an engine-formatted timestamp, as used for both date variables and
/// task lock expirations
pub(crate) fn parse_wire_date(raw: &str) -> ClientResult<DateTime<Utc>> {
    DateTime::parse_from_str(raw, DATE_FORMAT)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| ClientError::data_format(format!("cannot parse date '{raw}': {e}")))
}

fn mismatch(expected: &str, got: &serde_json::Value) -> ClientError {
    ClientError::data_format(format!(
        "wire value {got} does not match declared type '{expected}'"
    ))
}
