//! Process-wide session key/value store.
//!
//! Owned by one server instance, created at construction and cleared at
//! shutdown. Never persisted. Writes are last-writer-wins.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

#[derive(Debug, Default)]
pub struct SessionStore {
    values: RwLock<HashMap<String, Value>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, returning the previous value if any.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.write().insert(key.into(), value)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    pub fn clear(&self) {
        self.values.write().clear();
    }
}
