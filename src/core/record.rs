//! # Record Model
//!
//! A record is an instance of a model: a JSON object carrying the base
//! attributes (id, timestamps, soft-delete markers, ACL arrays) plus the
//! attributes defined by the model's fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Base columns every record carries, in storage order.
pub const BASE_COLUMNS: [&str; 9] = [
    "id",
    "created_at",
    "updated_at",
    "trashed_at",
    "deleted_at",
    "access_read",
    "access_edit",
    "access_full",
    "access_deny",
];

/// Stat columns removed from responses when `stat=false`.
pub const STAT_COLUMNS: [&str; 4] = ["created_at", "updated_at", "trashed_at", "deleted_at"];

/// ACL columns removed from responses when `access=false`.
pub const ACCESS_COLUMNS: [&str; 4] = ["access_read", "access_edit", "access_full", "access_deny"];

/// One record, as a JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(pub Map<String, Value>);

impl Record {
    /// Empty record
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap an existing JSON object
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Build from any JSON value; non-objects are rejected by the caller
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Field access
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Field assignment
    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    /// Remove a field
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// The record id, when present and well-formed
    pub fn id(&self) -> Option<Uuid> {
        self.0
            .get("id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// Timestamp accessor for the base columns
    pub fn timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        self.0
            .get(column)
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Whether the soft-delete marker is set
    pub fn is_trashed(&self) -> bool {
        matches!(self.0.get("trashed_at"), Some(v) if !v.is_null())
    }

    /// Whether the compliance tombstone is set
    pub fn is_deleted(&self) -> bool {
        matches!(self.0.get("deleted_at"), Some(v) if !v.is_null())
    }

    /// One ACL array as user-id strings; absent or malformed lists are empty
    pub fn acl(&self, column: &str) -> Vec<String> {
        match self.0.get(column) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether a user id appears in the given ACL array
    pub fn acl_contains(&self, column: &str, user_id: Uuid) -> bool {
        let needle = user_id.to_string();
        self.acl(column).iter().any(|id| *id == needle)
    }

    /// Remove the stat columns (response shaping)
    pub fn strip_stat(&mut self) {
        for col in STAT_COLUMNS {
            self.0.remove(col);
        }
    }

    /// Remove the ACL columns (response shaping)
    pub fn strip_access(&mut self) {
        for col in ACCESS_COLUMNS {
            self.0.remove(col);
        }
    }

    /// Extract a projection of dotted paths, e.g. `["name", "meta.color"]`
    pub fn pick(&self, paths: &[String]) -> Record {
        let mut out = Map::new();
        for path in paths {
            if let Some(value) = lookup_path(&Value::Object(self.0.clone()), path) {
                out.insert(path.clone(), value);
            }
        }
        Record(out)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        Record::from_value(json!({
            "id": "0b106cf5-5f09-4d1d-9b35-9a41bbd2eb54",
            "created_at": "2026-01-05T10:00:00Z",
            "updated_at": "2026-01-05T10:00:00Z",
            "trashed_at": null,
            "deleted_at": null,
            "access_read": ["00000000-0000-0000-0000-000000000000"],
            "access_edit": [],
            "access_full": [],
            "access_deny": [],
            "name": "Widget",
            "meta": {"color": "red", "size": 3}
        }))
        .unwrap()
    }

    #[test]
    fn test_id_and_timestamps() {
        let rec = sample();
        assert!(rec.id().is_some());
        assert!(rec.timestamp("created_at").is_some());
        assert!(!rec.is_trashed());
        assert!(!rec.is_deleted());
    }

    #[test]
    fn test_acl_membership() {
        let rec = sample();
        assert!(rec.acl_contains("access_read", Uuid::nil()));
        assert!(!rec.acl_contains("access_deny", Uuid::nil()));
    }

    #[test]
    fn test_strip_stat_and_access() {
        let mut rec = sample();
        rec.strip_stat();
        rec.strip_access();
        assert!(rec.get("created_at").is_none());
        assert!(rec.get("access_read").is_none());
        assert!(rec.get("name").is_some());
    }

    #[test]
    fn test_pick_dotted_paths() {
        let rec = sample();
        let picked = rec.pick(&["name".into(), "meta.color".into()]);
        assert_eq!(picked.get("name"), Some(&json!("Widget")));
        assert_eq!(picked.get("meta.color"), Some(&json!("red")));
        assert!(picked.get("meta.size").is_none());
    }
}
