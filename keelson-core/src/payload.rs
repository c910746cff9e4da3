//! Typed, versioned context payloads.
//!
//! Context and environment payloads are structural types rather than
//! free-form blobs: every payload carries a schema version, and merge
//! semantics are defined here, field by field, instead of ad-hoc deep
//! merging of arbitrary shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The payload carried by a context record.
///
/// Merge semantics (see [`ContextPayload::merge`]):
/// - `schema_version`: the maximum of the two versions wins.
/// - `entries`: merged key-wise; object values merge recursively, every
///   other value type is replaced by the incoming value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ContextPayload {
    /// Structural version of this payload.
    pub schema_version: u32,
    /// Named payload fields. BTreeMap keeps serialization deterministic.
    pub entries: BTreeMap<String, Value>,
}

impl ContextPayload {
    /// Create an empty payload at schema version 1.
    pub fn new() -> Self {
        Self {
            schema_version: 1,
            entries: BTreeMap::new(),
        }
    }

    /// Add an entry (builder style).
    pub fn with_entry(mut self, key: &str, value: Value) -> Self {
        self.entries.insert(key.to_string(), value);
        self
    }

    /// Insert or replace an entry.
    pub fn insert(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
    }

    /// Look up an entry by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Whether this payload has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge `other` into `self` using the semantics documented on the type.
    pub fn merge(&mut self, other: &ContextPayload) {
        self.schema_version = self.schema_version.max(other.schema_version);
        for (key, incoming) in &other.entries {
            match (self.entries.get_mut(key), incoming) {
                (Some(Value::Object(existing)), Value::Object(update)) => {
                    merge_objects(existing, update);
                }
                _ => {
                    self.entries.insert(key.clone(), incoming.clone());
                }
            }
        }
    }

    /// Replace this payload wholesale with `other`.
    pub fn replace(&mut self, other: ContextPayload) {
        *self = other;
    }

    /// Serialized byte length, used as an importance signal.
    pub fn serialized_len(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(0)
    }
}

/// Recursive merge for JSON object values: object-into-object recurses,
/// anything else replaces.
fn merge_objects(existing: &mut serde_json::Map<String, Value>, update: &serde_json::Map<String, Value>) {
    for (key, incoming) in update {
        match (existing.get_mut(key), incoming) {
            (Some(Value::Object(nested)), Value::Object(nested_update)) => {
                merge_objects(nested, nested_update);
            }
            _ => {
                existing.insert(key.clone(), incoming.clone());
            }
        }
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn arb_payload() -> impl Strategy<Value = ContextPayload> {
        (
            1u32..5,
            prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 0..6),
        )
            .prop_map(|(version, entries)| ContextPayload {
                schema_version: version,
                entries: entries
                    .into_iter()
                    .map(|(k, v)| (k, json!(v)))
                    .collect(),
            })
    }

    proptest! {
        /// Merging a payload into itself is idempotent.
        #[test]
        fn prop_self_merge_idempotent(payload in arb_payload()) {
            let mut merged = payload.clone();
            merged.merge(&payload);
            prop_assert_eq!(merged, payload);
        }

        /// After a merge, every key from the incoming payload is present.
        #[test]
        fn prop_merge_preserves_incoming_keys(
            base in arb_payload(),
            incoming in arb_payload(),
        ) {
            let mut merged = base;
            merged.merge(&incoming);
            for key in incoming.entries.keys() {
                prop_assert!(merged.entries.contains_key(key));
            }
            prop_assert!(merged.schema_version >= incoming.schema_version);
        }
    }
}
