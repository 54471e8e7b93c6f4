use std::collections::BTreeMap;

use serde_json::Value;

pub const EXPECTED_STRUCTURE: &str = "expectedStructure";
pub const EXPECTED_CHECKSUM: &str = "expectedChecksum";

/// Caller supplied hints shared by all validators of one run. Unknown keys are ignored.
#[derive(Clone, Debug, Default)]
pub struct ValidationContext {
    values: BTreeMap<String, Value>,
}

impl ValidationContext {
    pub fn new() -> ValidationContext {
        return ValidationContext::default();
    }

    pub fn with<V: Into<Value>>(mut self, key: &str, value: V) -> ValidationContext {
        self.insert(key, value);
        return self;
    }

    pub fn insert<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.values.insert(String::from(key), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        return self.values.get(key);
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        return self.values.get(key).and_then(|v| v.as_str());
    }
}
