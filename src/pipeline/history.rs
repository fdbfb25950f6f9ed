//! # Change History
//!
//! Post-phase observer that appends one `tracked` entry per affected
//! record when the model has tracked fields, plus the read side used by
//! the history endpoints.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::adapter::{Database, Transaction};
use crate::core::context::SystemContext;
use crate::core::error::{ApiError, ApiResult};
use crate::core::record::Record;

use super::observer::{Observer, ObserverEvent, Operation, Phase, Target};

/// History writer. Register one instance per post phase.
pub struct HistoryObserver {
    phase: Phase,
}

impl HistoryObserver {
    pub fn new(phase: Phase) -> Self {
        Self { phase }
    }
}

impl Observer for HistoryObserver {
    fn name(&self) -> &'static str {
        "history"
    }

    fn target(&self) -> Target {
        Target::Wildcard
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn run(
        &self,
        ctx: &SystemContext,
        tx: &Transaction<'_>,
        event: &mut ObserverEvent<'_>,
    ) -> ApiResult<()> {
        // History never tracks itself.
        if event.schema.table() == "tracked" {
            return Ok(());
        }
        let tracked = event.schema.tracked_fields();
        if tracked.is_empty() {
            return Ok(());
        }
        let tracked_names: Vec<&str> = tracked.iter().map(|f| f.field_name.as_str()).collect();

        for (i, record) in event.records.iter().enumerate() {
            let previous = event.previous.and_then(|rows| rows.get(i));
            let changes = diff_tracked(&tracked_names, event.operation, previous, record);
            // An update that touched no tracked field leaves no entry;
            // creates and deletes are always recorded.
            if changes.is_empty()
                && !matches!(event.operation, Operation::Create | Operation::Delete)
            {
                continue;
            }

            let record_id = record
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ApiError::internal("history: record without id"))?;
            write_entry(
                tx,
                event.schema.table(),
                record_id,
                event.operation,
                Value::Object(changes),
                ctx.principal.user_id,
            )?;
        }
        Ok(())
    }
}

fn diff_tracked(
    tracked: &[&str],
    operation: Operation,
    previous: Option<&Record>,
    current: &Record,
) -> Map<String, Value> {
    let mut changes = Map::new();
    for name in tracked {
        let old = previous.and_then(|r| r.get(name)).cloned().unwrap_or(Value::Null);
        let new = current.get(name).cloned().unwrap_or(Value::Null);
        match operation {
            Operation::Create => {
                if !new.is_null() {
                    changes.insert(name.to_string(), json!({"old": null, "new": new}));
                }
            }
            Operation::Delete => {
                changes.insert(name.to_string(), json!({"old": new, "new": null}));
            }
            _ => {
                if old != new {
                    changes.insert(name.to_string(), json!({"old": old, "new": new}));
                }
            }
        }
    }
    changes
}

fn write_entry(
    tx: &Transaction<'_>,
    model_name: &str,
    record_id: &str,
    operation: Operation,
    changes: Value,
    created_by: Uuid,
) -> ApiResult<()> {
    let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    tx.execute(
        "INSERT INTO \"tracked\" (\"id\", \"created_at\", \"updated_at\", \"model_name\", \
         \"record_id\", \"operation\", \"changes\", \"created_by\") \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        &[
            json!(Uuid::new_v4().to_string()),
            json!(now),
            json!(now),
            json!(model_name),
            json!(record_id),
            json!(operation.as_str()),
            json!(changes.to_string()),
            json!(created_by.to_string()),
        ],
    )?;
    Ok(())
}

/// One change entry, decoded for the surface.
pub fn decode_change(row: &Record) -> Record {
    let mut out = row.clone();
    if let Some(Value::String(changes)) = row.get("changes") {
        if let Ok(parsed) = serde_json::from_str::<Value>(changes) {
            out.set("changes", parsed);
        }
    }
    if let Some(Value::String(metadata)) = row.get("metadata") {
        if let Ok(parsed) = serde_json::from_str::<Value>(metadata) {
            out.set("metadata", parsed);
        }
    }
    out
}

/// List a record's changes, newest first.
pub fn list_changes(db: &Database, model_name: &str, record_id: &str) -> ApiResult<Vec<Record>> {
    let result = db.query(
        "SELECT * FROM \"tracked\" WHERE \"model_name\" = ?1 AND \"record_id\" = ?2 \
         ORDER BY \"change_id\" DESC",
        &[json!(model_name), json!(record_id)],
    )?;
    Ok(result.rows.iter().map(decode_change).collect())
}

/// Read one change by its monotonic id.
pub fn get_change(
    db: &Database,
    model_name: &str,
    record_id: &str,
    change_id: i64,
) -> ApiResult<Record> {
    let result = db.query(
        "SELECT * FROM \"tracked\" WHERE \"model_name\" = ?1 AND \"record_id\" = ?2 \
         AND \"change_id\" = ?3",
        &[json!(model_name), json!(record_id), json!(change_id)],
    )?;
    result
        .rows
        .first()
        .map(decode_change)
        .ok_or_else(|| ApiError::RecordNotFound(format!("change {}", change_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_diff_update_restricted_to_changed_tracked_fields() {
        let old = Record::from_value(json!({"name": "a", "email": "x@y", "status": "on"})).unwrap();
        let new = Record::from_value(json!({"name": "a", "email": "z@y", "status": "off"})).unwrap();
        let changes = diff_tracked(&["name", "email"], Operation::Update, Some(&old), &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get("email"), Some(&json!({"old": "x@y", "new": "z@y"})));
        assert!(changes.get("status").is_none());
    }

    #[test]
    fn test_diff_create_records_initial_values() {
        let new = Record::from_value(json!({"name": "a", "email": null})).unwrap();
        let changes = diff_tracked(&["name", "email"], Operation::Create, None, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get("name"), Some(&json!({"old": null, "new": "a"})));
    }

    #[test]
    fn test_diff_delete_tombstones_tracked_values() {
        let rec = Record::from_value(json!({"name": "a"})).unwrap();
        let changes = diff_tracked(&["name"], Operation::Delete, None, &rec);
        assert_eq!(changes.get("name"), Some(&json!({"old": "a", "new": null})));
    }

    #[test]
    fn test_decode_change_parses_json_columns() {
        let row = Record::from_value(json!({
            "change_id": 1,
            "changes": "{\"email\":{\"old\":null,\"new\":\"x\"}}"
        }))
        .unwrap();
        let decoded = decode_change(&row);
        assert_eq!(
            decoded.get("changes"),
            Some(&json!({"email": {"old": null, "new": "x"}}))
        );
    }
}
