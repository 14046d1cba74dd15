// Lenient JSON object access for appliance REST payloads.
//
// pfSense and RouterOS both return loosely typed JSON: numbers arrive as
// strings, booleans as "yes"/"true"/1, and optional fields simply vanish.
// `JsonObject` papers over that so converters can read fields without a
// serde model per firmware revision.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A JSON object with forgiving typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonObject(Map<String, Value>);

impl JsonObject {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }

    /// String value of `key`. Non-string scalars are formatted; missing
    /// and null values yield an empty string.
    pub fn get_string(&self, key: &str) -> String {
        self.0.get(key).map(value_to_string).unwrap_or_default()
    }

    /// First non-empty string among `keys`.
    pub fn get_string_any(&self, keys: &[&str]) -> String {
        keys.iter()
            .map(|key| self.get_string(key))
            .find(|value| !value.is_empty())
            .unwrap_or_default()
    }

    /// Integer value of `key`. Floats are truncated, numeric strings parsed;
    /// anything else yields 0.
    pub fn get_int(&self, key: &str) -> i64 {
        match self.0.get(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(truncate_float))
                .unwrap_or_default(),
            Some(Value::String(s)) => parse_int(s),
            Some(Value::Bool(b)) => i64::from(*b),
            _ => 0,
        }
    }

    /// Boolean value of `key`. Accepts booleans, `1`, and the usual string
    /// spellings (`true`, `yes`, `on`, `1`).
    pub fn get_bool(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            Some(Value::String(s)) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "t" | "1" | "yes" | "on"
            ),
            _ => false,
        }
    }

    /// Array value of `key`, or an empty slice.
    pub fn get_array(&self, key: &str) -> &[Value] {
        match self.0.get(key) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }
}

impl From<Map<String, Value>> for JsonObject {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<JsonObject> for Value {
    fn from(obj: JsonObject) -> Self {
        Value::Object(obj.0)
    }
}

impl FromIterator<(String, Value)> for JsonObject {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn parse_int(raw: &str) -> i64 {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(truncate_float))
        .unwrap_or_default()
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn truncate_float(value: f64) -> i64 {
    value.trunc() as i64
}
