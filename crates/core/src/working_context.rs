//! Working context: per-conversation memory of discovered entities.
//!
//! Keys are plain strings (`current_repo_id`, `current_branch`, ...) and
//! values are arbitrary JSON. A `BTreeMap` keeps the rendered snapshot
//! stable so identical state produces an identical prompt.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkingContext {
    entries: BTreeMap<String, serde_json::Value>,
}

impl WorkingContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key)
    }

    /// Set a key. Returns `true` when the stored value changed.
    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) -> bool {
        let key = key.into();
        if self.entries.get(&key) == Some(&value) {
            return false;
        }
        self.entries.insert(key, value);
        true
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.entries.remove(key)
    }

    /// Apply a batch of updates. Returns the number of keys that changed.
    pub fn apply<I>(&mut self, updates: I) -> usize
    where
        I: IntoIterator<Item = (String, serde_json::Value)>,
    {
        updates
            .into_iter()
            .filter(|(k, v)| self.set(k.clone(), v.clone()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.entries.iter()
    }

    /// JSON snapshot sent to the model.
    pub fn snapshot(&self) -> String {
        serde_json::to_string(&self.entries).unwrap_or_else(|_| "{}".into())
    }
}
