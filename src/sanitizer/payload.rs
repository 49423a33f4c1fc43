use crate::models::trace_error::short_type_name;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Scalar leaf of a payload
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

/// Captured input or output of a unit of work
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Primitive(Primitive),
    Sequence(Vec<Payload>),
    Mapping(BTreeMap<String, Payload>),
    /// The value could not be represented (its `Serialize` impl failed)
    Unrepresentable { type_name: String, reason: String },
}

impl Payload {
    /// Capture any serializable value; serialization failures become
    /// [`Payload::Unrepresentable`] instead of an error.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(json) => Payload::from(json),
            Err(e) => Payload::Unrepresentable {
                type_name: short_type_name::<T>(),
                reason: e.to_string(),
            },
        }
    }

    pub fn null() -> Self {
        Payload::Primitive(Primitive::Null)
    }

    pub fn string(value: impl Into<String>) -> Self {
        Payload::Primitive(Primitive::String(value.into()))
    }

    /// Kind name used in serialization failure markers
    pub fn type_name(&self) -> &str {
        match self {
            Payload::Primitive(Primitive::Null) => "null",
            Payload::Primitive(Primitive::Bool(_)) => "boolean",
            Payload::Primitive(Primitive::Number(_)) => "number",
            Payload::Primitive(Primitive::String(_)) => "string",
            Payload::Sequence(_) => "array",
            Payload::Mapping(_) => "object",
            Payload::Unrepresentable { type_name, .. } => type_name.as_str(),
        }
    }

    /// Convert to JSON, failing on the first unrepresentable node
    pub fn to_json(&self) -> Result<Value, (String, String)> {
        Ok(match self {
            Payload::Primitive(p) => primitive_to_json(p),
            Payload::Sequence(items) => Value::Array(
                items
                    .iter()
                    .map(Payload::to_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Payload::Mapping(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_json()?);
                }
                Value::Object(map)
            }
            Payload::Unrepresentable { type_name, reason } => {
                return Err((type_name.clone(), reason.clone()))
            }
        })
    }
}

pub(crate) fn primitive_to_json(primitive: &Primitive) -> Value {
    match primitive {
        Primitive::Null => Value::Null,
        Primitive::Bool(b) => Value::Bool(*b),
        Primitive::Number(n) => Value::Number(n.clone()),
        Primitive::String(s) => Value::String(s.clone()),
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Payload::Primitive(Primitive::Null),
            Value::Bool(b) => Payload::Primitive(Primitive::Bool(b)),
            Value::Number(n) => Payload::Primitive(Primitive::Number(n)),
            Value::String(s) => Payload::Primitive(Primitive::String(s)),
            Value::Array(items) => Payload::Sequence(items.into_iter().map(Payload::from).collect()),
            Value::Object(map) => {
                Payload::Mapping(map.into_iter().map(|(k, v)| (k, Payload::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::string(value)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::string(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;
    use std::collections::HashMap;

    struct Broken;

    impl Serialize for Broken {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("cycle detected"))
        }
    }

    #[test]
    fn test_from_json_round_trips() {
        let value = json!({"a": [1, "two", null, true], "b": {"c": 3.5}});
        let payload = Payload::from(value.clone());
        assert_eq!(payload.to_json().unwrap(), value);
    }

    #[test]
    fn test_failing_serialize_is_unrepresentable() {
        let payload = Payload::from_serialize(&Broken);
        match payload {
            Payload::Unrepresentable { type_name, reason } => {
                assert_eq!(type_name, "Broken");
                assert!(reason.contains("cycle detected"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_non_string_map_keys_are_unrepresentable() {
        let mut map = HashMap::new();
        map.insert(vec![1u8], "value");
        assert!(matches!(
            Payload::from_serialize(&map),
            Payload::Unrepresentable { .. }
        ));
    }

    #[test]
    fn test_nested_unrepresentable_fails_conversion() {
        let payload = Payload::Sequence(vec![
            Payload::string("ok"),
            Payload::Unrepresentable {
                type_name: "Socket".to_string(),
                reason: "not serializable".to_string(),
            },
        ]);
        let (type_name, _) = payload.to_json().unwrap_err();
        assert_eq!(type_name, "Socket");
    }
}
