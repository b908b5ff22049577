//! Conversation memory and snapshot diffing.
//!
//! Memory is a flat map from string keys to JSON values. Stores that persist
//! incrementally can compute a diff between the loaded snapshot and the
//! final snapshot of a run rather than rewriting the whole map.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Per-conversation memory: string keys to JSON-serializable values.
pub type ConversationMemory = Map<String, JsonValue>;

/// Difference between two memory snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDiff {
    /// Keys added or changed, with their new values.
    pub set: ConversationMemory,
    /// Keys removed.
    pub remove: Vec<String>,
}

impl MemoryDiff {
    /// Returns whether the diff changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}

/// Computes the diff that turns `prev` into `next`.
///
/// Equality is deep-structural over JSON values.
#[must_use]
pub fn diff_memory(prev: &ConversationMemory, next: &ConversationMemory) -> MemoryDiff {
    let mut set = ConversationMemory::new();
    for (key, value) in next {
        if prev.get(key) != Some(value) {
            set.insert(key.clone(), value.clone());
        }
    }

    let remove = prev
        .keys()
        .filter(|key| !next.contains_key(*key))
        .cloned()
        .collect();

    MemoryDiff { set, remove }
}

/// Applies a diff to a base snapshot: merge `set`, then drop `remove`.
#[must_use]
pub fn apply_memory_diff(base: &ConversationMemory, diff: &MemoryDiff) -> ConversationMemory {
    let mut result = base.clone();
    for (key, value) in &diff.set {
        result.insert(key.clone(), value.clone());
    }
    for key in &diff.remove {
        result.remove(key);
    }
    result
}
