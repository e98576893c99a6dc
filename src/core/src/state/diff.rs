//! Shallow structural diff between two state snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A value that changed between snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueChange {
    pub from: Value,
    pub to: Value,
}

/// Key-level difference between two snapshots. Groups that would be empty
/// are `None` and are left out when serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<BTreeMap<String, ValueChange>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<BTreeMap<String, Value>>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_none() && self.updated.is_none() && self.removed.is_none()
    }

    /// Number of keys touched across all groups.
    pub fn changed_keys(&self) -> usize {
        self.added.as_ref().map_or(0, BTreeMap::len)
            + self.updated.as_ref().map_or(0, BTreeMap::len)
            + self.removed.as_ref().map_or(0, BTreeMap::len)
    }
}

/// Top-level entries of a snapshot. Objects contribute their fields, arrays
/// their indices; any other value has no keys.
fn entries(value: &Value) -> BTreeMap<String, &Value> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn non_empty<V>(map: BTreeMap<String, V>) -> Option<BTreeMap<String, V>> {
    (!map.is_empty()).then_some(map)
}

/// Compare two snapshots key by key. Nested values are compared with `==`
/// and never recursed into. A missing snapshot on either side yields an
/// empty diff.
pub fn diff(prev: Option<&Value>, next: Option<&Value>) -> StateDiff {
    let (Some(prev), Some(next)) = (prev, next) else {
        return StateDiff::default();
    };

    let before = entries(prev);
    let after = entries(next);

    let mut added = BTreeMap::new();
    let mut updated = BTreeMap::new();
    for (key, to) in &after {
        match before.get(key) {
            None => {
                added.insert(key.clone(), (*to).clone());
            }
            Some(from) if from != to => {
                updated.insert(
                    key.clone(),
                    ValueChange {
                        from: (*from).clone(),
                        to: (*to).clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }

    let removed = before
        .iter()
        .filter(|(key, _)| !after.contains_key(*key))
        .map(|(key, value)| (key.clone(), (*value).clone()))
        .collect();

    StateDiff {
        added: non_empty(added),
        updated: non_empty(updated),
        removed: non_empty(removed),
    }
}
