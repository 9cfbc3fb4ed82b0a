//! Per-turn state: an opaque bag of values with one special slot.

use serde_json::{Map, Value};

/// The scratch state a handler reads and writes over the course of one
/// turn.
///
/// Per §3.4, this is opaque to the dispatcher except for the
/// `temp.input` slot: the dispatcher writes the mention-stripped
/// activity text there before the turn starts, and the turn may
/// overwrite it (e.g. after further normalization) without that change
/// leaking into anything the dispatcher itself inspects. Every other
/// key is the handler's business.
pub trait TurnState: Send + Sync {
    /// Read a value by key.
    fn get(&self, key: &str) -> Option<&Value>;

    /// Set a value by key, overwriting any existing value.
    fn set(&mut self, key: &str, value: Value);

    /// Remove a key.
    fn remove(&mut self, key: &str);

    /// The dispatcher-populated, handler-mutable input slot.
    fn temp_input(&self) -> Option<&str> {
        self.get("temp.input").and_then(Value::as_str)
    }

    /// Overwrite the `temp.input` slot.
    fn set_temp_input(&mut self, text: impl Into<String>) {
        self.set("temp.input", Value::String(text.into()));
    }
}

/// A [`TurnState`] backed by a plain JSON object, suitable for
/// in-process use and for round-tripping through [`crate::Storage`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonTurnState(Map<String, Value>);

impl JsonTurnState {
    /// An empty state bag.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from an existing JSON object, e.g. one just read back
    /// from storage.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Consume this state, returning the underlying JSON object for
    /// persistence.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl TurnState for JsonTurnState {
    fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }
}
