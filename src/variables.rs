//! Per-iteration workflow state.

use std::collections::HashMap;

use serde_json::Value;

/// Mutable name → value mapping scoped to a single iteration.
///
/// A fresh map is created when an iteration starts and dropped when it ends.
/// It is owned by exactly one executor and never shared.
#[derive(Debug, Default)]
pub struct Variables {
    data: HashMap<String, Value>,
}

impl Variables {
    pub fn new() -> Variables {
        Variables {
            data: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.data.insert(name.into(), value);
    }

    /// Merge extracted values into this iteration's scope.
    pub fn merge(&mut self, values: HashMap<String, Value>) {
        self.data.extend(values);
    }
}
