use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};

/// Structured signal/queue payload.
///
/// Maps are ordered so that anything derived from a payload (rendered text,
/// serialized JSON) is byte-for-byte stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<Payload>),
    Map(BTreeMap<String, Payload>),
}

impl Payload {
    /// Looks up a dotted path such as `customer.name` or `items.0.sku`.
    ///
    /// Numeric segments index into lists. Returns `None` as soon as a segment
    /// does not resolve.
    pub fn get_path(&self, path: &str) -> Option<&Payload> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }

        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                Payload::Map(map) => map.get(segment)?,
                Payload::List(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        Some(current)
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Payload::Null => false,
            Payload::Bool(b) => *b,
            Payload::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            Payload::String(s) => !s.is_empty(),
            Payload::List(items) => !items.is_empty(),
            Payload::Map(map) => !map.is_empty(),
        }
    }

    /// Text form used when substituting the value into a template.
    pub fn to_display_string(&self) -> String {
        match self {
            Payload::Null => String::new(),
            Payload::Bool(b) => b.to_string(),
            Payload::Number(n) => n.to_string(),
            Payload::String(s) => s.clone(),
            Payload::List(_) | Payload::Map(_) => self.to_json().to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Payload::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Payload::Null => JsonValue::Null,
            Payload::Bool(b) => JsonValue::Bool(*b),
            Payload::Number(n) => JsonValue::Number(n.clone()),
            Payload::String(s) => JsonValue::String(s.clone()),
            Payload::List(items) => JsonValue::Array(items.iter().map(Payload::to_json).collect()),
            Payload::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl From<JsonValue> for Payload {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Payload::Null,
            JsonValue::Bool(b) => Payload::Bool(b),
            JsonValue::Number(n) => Payload::Number(n),
            JsonValue::String(s) => Payload::String(s),
            JsonValue::Array(items) => {
                Payload::List(items.into_iter().map(Payload::from).collect())
            }
            JsonValue::Object(map) => {
                Payload::Map(map.into_iter().map(|(k, v)| (k, Payload::from(v))).collect())
            }
        }
    }
}

impl From<&Payload> for JsonValue {
    fn from(payload: &Payload) -> Self {
        payload.to_json()
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::String(value.to_string())
    }
}
