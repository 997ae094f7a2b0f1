//! The in-memory form of one application message.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key that names the action of every envelope.
pub const ACTION_KEY: &str = "action";

/// A named bag of typed values.
///
/// On the JSON path this is exactly the JSON object on the wire. On the
/// binary path the codec fills it from the schema, so it holds `action`
/// plus every declared field and nothing else.
///
/// A key whose value is JSON `null` reads as absent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope(Map<String, Value>);

impl Envelope {
    /// An envelope holding only its action name.
    pub fn new(action: &str) -> Self {
        let mut fields = Map::new();
        fields.insert(ACTION_KEY.to_string(), Value::from(action));
        Self(fields)
    }

    /// The action name, if present and a string.
    pub fn action(&self) -> Option<&str> {
        self.get(ACTION_KEY).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Envelope {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}
