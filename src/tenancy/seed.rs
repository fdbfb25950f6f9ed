//! # Tenant Seed Schema
//!
//! The static seed deployed into every tenant namespace: the seven core
//! tables, their self-describing metadata rows, the root user, and the
//! initial filesystem tree. The table script is the one multi-statement
//! script in the system and runs through `execute_batch`.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::adapter::Transaction;
use crate::core::context::ROOT_USER_ID;
use crate::core::error::{ApiError, ApiResult};

/// The core tables present in every tenant namespace.
pub const CORE_TABLES: [&str; 7] = [
    "models",
    "fields",
    "users",
    "filters",
    "credentials",
    "tracked",
    "fs",
];

/// Core table DDL. Every table carries the base record columns; `tracked`
/// additionally carries the monotonic `change_id`.
pub const SEED_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS "models" (
  "id" TEXT PRIMARY KEY,
  "created_at" TEXT NOT NULL,
  "updated_at" TEXT NOT NULL,
  "trashed_at" TEXT,
  "deleted_at" TEXT,
  "access_read" TEXT NOT NULL DEFAULT '[]',
  "access_edit" TEXT NOT NULL DEFAULT '[]',
  "access_full" TEXT NOT NULL DEFAULT '[]',
  "access_deny" TEXT NOT NULL DEFAULT '[]',
  "model_name" TEXT NOT NULL UNIQUE,
  "status" TEXT NOT NULL DEFAULT 'pending',
  "sudo" INTEGER NOT NULL DEFAULT 0,
  "frozen" INTEGER NOT NULL DEFAULT 0,
  "immutable" INTEGER NOT NULL DEFAULT 0,
  "external" INTEGER NOT NULL DEFAULT 0,
  "description" TEXT
);

CREATE TABLE IF NOT EXISTS "fields" (
  "id" TEXT PRIMARY KEY,
  "created_at" TEXT NOT NULL,
  "updated_at" TEXT NOT NULL,
  "trashed_at" TEXT,
  "deleted_at" TEXT,
  "access_read" TEXT NOT NULL DEFAULT '[]',
  "access_edit" TEXT NOT NULL DEFAULT '[]',
  "access_full" TEXT NOT NULL DEFAULT '[]',
  "access_deny" TEXT NOT NULL DEFAULT '[]',
  "model_name" TEXT NOT NULL,
  "field_name" TEXT NOT NULL,
  "type" TEXT NOT NULL,
  "required" INTEGER NOT NULL DEFAULT 0,
  "default_value" TEXT,
  "description" TEXT,
  "minimum" REAL,
  "maximum" REAL,
  "pattern" TEXT,
  "enum_values" TEXT,
  "is_array" INTEGER NOT NULL DEFAULT 0,
  "unique" INTEGER NOT NULL DEFAULT 0,
  "index" INTEGER NOT NULL DEFAULT 0,
  "searchable" INTEGER NOT NULL DEFAULT 0,
  "immutable" INTEGER NOT NULL DEFAULT 0,
  "sudo" INTEGER NOT NULL DEFAULT 0,
  "tracked" INTEGER NOT NULL DEFAULT 0,
  "transform" TEXT,
  "relationship_type" TEXT,
  "related_model" TEXT,
  "related_field" TEXT,
  "relationship_name" TEXT,
  "cascade_delete" INTEGER NOT NULL DEFAULT 0,
  "required_relationship" INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS "idx_fields_model_name" ON "fields" ("model_name");

CREATE TABLE IF NOT EXISTS "users" (
  "id" TEXT PRIMARY KEY,
  "created_at" TEXT NOT NULL,
  "updated_at" TEXT NOT NULL,
  "trashed_at" TEXT,
  "deleted_at" TEXT,
  "access_read" TEXT NOT NULL DEFAULT '[]',
  "access_edit" TEXT NOT NULL DEFAULT '[]',
  "access_full" TEXT NOT NULL DEFAULT '[]',
  "access_deny" TEXT NOT NULL DEFAULT '[]',
  "name" TEXT,
  "auth" TEXT NOT NULL,
  "access" TEXT NOT NULL DEFAULT 'read'
);

CREATE TABLE IF NOT EXISTS "filters" (
  "id" TEXT PRIMARY KEY,
  "created_at" TEXT NOT NULL,
  "updated_at" TEXT NOT NULL,
  "trashed_at" TEXT,
  "deleted_at" TEXT,
  "access_read" TEXT NOT NULL DEFAULT '[]',
  "access_edit" TEXT NOT NULL DEFAULT '[]',
  "access_full" TEXT NOT NULL DEFAULT '[]',
  "access_deny" TEXT NOT NULL DEFAULT '[]',
  "name" TEXT NOT NULL,
  "model_name" TEXT NOT NULL,
  "select" TEXT,
  "where" TEXT,
  "order" TEXT,
  "limit" INTEGER,
  "offset" INTEGER
);

CREATE TABLE IF NOT EXISTS "credentials" (
  "id" TEXT PRIMARY KEY,
  "created_at" TEXT NOT NULL,
  "updated_at" TEXT NOT NULL,
  "trashed_at" TEXT,
  "deleted_at" TEXT,
  "access_read" TEXT NOT NULL DEFAULT '[]',
  "access_edit" TEXT NOT NULL DEFAULT '[]',
  "access_full" TEXT NOT NULL DEFAULT '[]',
  "access_deny" TEXT NOT NULL DEFAULT '[]',
  "user_id" TEXT NOT NULL,
  "auth_type" TEXT NOT NULL,
  "secret_hash" TEXT,
  "expires_at" TEXT
);

CREATE TABLE IF NOT EXISTS "tracked" (
  "change_id" INTEGER PRIMARY KEY AUTOINCREMENT,
  "id" TEXT NOT NULL UNIQUE,
  "created_at" TEXT NOT NULL,
  "updated_at" TEXT NOT NULL,
  "trashed_at" TEXT,
  "deleted_at" TEXT,
  "access_read" TEXT NOT NULL DEFAULT '[]',
  "access_edit" TEXT NOT NULL DEFAULT '[]',
  "access_full" TEXT NOT NULL DEFAULT '[]',
  "access_deny" TEXT NOT NULL DEFAULT '[]',
  "model_name" TEXT NOT NULL,
  "record_id" TEXT NOT NULL,
  "operation" TEXT NOT NULL,
  "changes" TEXT NOT NULL DEFAULT '{}',
  "created_by" TEXT,
  "metadata" TEXT
);
CREATE INDEX IF NOT EXISTS "idx_tracked_record" ON "tracked" ("model_name", "record_id");

CREATE TABLE IF NOT EXISTS "fs" (
  "id" TEXT PRIMARY KEY,
  "created_at" TEXT NOT NULL,
  "updated_at" TEXT NOT NULL,
  "trashed_at" TEXT,
  "deleted_at" TEXT,
  "access_read" TEXT NOT NULL DEFAULT '[]',
  "access_edit" TEXT NOT NULL DEFAULT '[]',
  "access_full" TEXT NOT NULL DEFAULT '[]',
  "access_deny" TEXT NOT NULL DEFAULT '[]',
  "path" TEXT NOT NULL UNIQUE,
  "parent_path" TEXT,
  "node_type" TEXT NOT NULL DEFAULT 'dir',
  "model_name" TEXT,
  "record_id" TEXT,
  "size" INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS "idx_fs_parent" ON "fs" ("parent_path");
"#;

/// Self-describing model rows: one per core table. `filters` stays
/// writable on the public surface (saved queries are user records);
/// everything else is system-protected.
const SYSTEM_MODELS: [(&str, &str, &str); 7] = [
    (
        "models",
        "system",
        "Model definitions; every record type is itself a record",
    ),
    ("fields", "system", "Field definitions backing model columns"),
    ("users", "system", "Per-tenant principals"),
    (
        "filters",
        "active",
        "Saved queries executable as named read endpoints",
    ),
    ("credentials", "system", "Authentication material for users"),
    ("tracked", "system", "Append-only change history"),
    ("fs", "system", "Virtual filesystem tree"),
];

/// Self-describing field rows: (model, field, wire type, required).
const SYSTEM_FIELDS: [(&str, &str, &str, bool); 40] = [
    ("models", "model_name", "text", true),
    ("models", "status", "text", true),
    ("models", "sudo", "boolean", false),
    ("models", "frozen", "boolean", false),
    ("models", "immutable", "boolean", false),
    ("models", "external", "boolean", false),
    ("models", "description", "text", false),
    ("fields", "model_name", "text", true),
    ("fields", "field_name", "text", true),
    ("fields", "type", "text", true),
    ("fields", "required", "boolean", false),
    ("fields", "default_value", "jsonb", false),
    ("fields", "description", "text", false),
    ("fields", "minimum", "decimal", false),
    ("fields", "maximum", "decimal", false),
    ("fields", "pattern", "text", false),
    ("fields", "enum_values", "jsonb", false),
    ("fields", "is_array", "boolean", false),
    ("fields", "unique", "boolean", false),
    ("fields", "index", "boolean", false),
    ("fields", "searchable", "boolean", false),
    ("fields", "immutable", "boolean", false),
    ("fields", "sudo", "boolean", false),
    ("fields", "tracked", "boolean", false),
    ("fields", "transform", "text", false),
    ("fields", "relationship_type", "text", false),
    ("fields", "related_model", "text", false),
    ("fields", "related_field", "text", false),
    ("fields", "relationship_name", "text", false),
    ("fields", "cascade_delete", "boolean", false),
    ("fields", "required_relationship", "boolean", false),
    ("users", "name", "text", false),
    ("users", "auth", "text", true),
    ("users", "access", "text", true),
    ("filters", "name", "text", true),
    ("filters", "model_name", "text", true),
    ("filters", "select", "jsonb", false),
    ("filters", "where", "jsonb", false),
    ("filters", "order", "jsonb", false),
    ("filters", "limit", "integer", false),
];

/// Remaining field rows that do not fit the flat table above.
const SYSTEM_FIELDS_EXTRA: [(&str, &str, &str, bool); 12] = [
    ("filters", "offset", "integer", false),
    ("credentials", "user_id", "uuid", true),
    ("credentials", "auth_type", "text", true),
    ("credentials", "secret_hash", "text", false),
    ("credentials", "expires_at", "timestamp", false),
    ("tracked", "change_id", "bigserial", false),
    ("tracked", "model_name", "text", true),
    ("tracked", "record_id", "uuid", true),
    ("tracked", "operation", "text", true),
    ("tracked", "changes", "jsonb", false),
    ("tracked", "created_by", "uuid", false),
    ("tracked", "metadata", "jsonb", false),
];

/// Remaining fs field rows.
const SYSTEM_FS_FIELDS: [(&str, &str, &str, bool); 6] = [
    ("fs", "path", "text", true),
    ("fs", "parent_path", "text", false),
    ("fs", "node_type", "text", true),
    ("fs", "model_name", "text", false),
    ("fs", "record_id", "uuid", false),
    ("fs", "size", "integer", false),
];

/// SHA-256 checksum of the table script, recorded per deployed tenant.
pub fn seed_checksum() -> String {
    let mut hasher = Sha256::new();
    hasher.update(SEED_TABLES_SQL.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deploy the seed schema inside an open provisioning transaction.
/// Returns the owner's user id (the zero UUID when the owner is root).
pub fn deploy(tx: &Transaction<'_>, owner_username: &str) -> ApiResult<Uuid> {
    tx.execute_batch(SEED_TABLES_SQL)?;

    let now = now_string();
    for (name, status, description) in SYSTEM_MODELS {
        insert_row(
            tx,
            "models",
            &now,
            &[
                ("model_name", json!(name)),
                ("status", json!(status)),
                ("sudo", json!(0)),
                ("frozen", json!(0)),
                ("immutable", json!(0)),
                ("external", json!(0)),
                ("description", json!(description)),
            ],
        )?;
    }

    let all_fields = SYSTEM_FIELDS
        .iter()
        .chain(SYSTEM_FIELDS_EXTRA.iter())
        .chain(SYSTEM_FS_FIELDS.iter());
    for (model, field, wire_type, required) in all_fields {
        insert_row(
            tx,
            "fields",
            &now,
            &[
                ("model_name", json!(model)),
                ("field_name", json!(field)),
                ("type", json!(wire_type)),
                ("required", json!(*required as i64)),
            ],
        )?;
    }

    // Root user always exists under the reserved zero UUID.
    insert_user(tx, &now, ROOT_USER_ID, "root", "root", "root")?;

    let owner_id = if owner_username != "root" {
        let id = Uuid::new_v4();
        insert_user(tx, &now, id, owner_username, owner_username, "full")?;
        id
    } else {
        ROOT_USER_ID
    };

    // Initial filesystem tree.
    for (path, parent) in [("/", None), ("/data", Some("/")), ("/meta", Some("/"))] {
        insert_row(
            tx,
            "fs",
            &now,
            &[
                ("path", json!(path)),
                ("parent_path", parent.map(|p| json!(p)).unwrap_or(Value::Null)),
                ("node_type", json!("dir")),
                ("size", json!(0)),
            ],
        )?;
    }

    Ok(owner_id)
}

fn insert_user(
    tx: &Transaction<'_>,
    now: &str,
    id: Uuid,
    name: &str,
    auth: &str,
    access: &str,
) -> ApiResult<()> {
    crate::core::context::AccessLevel::parse(access)?;
    insert_row_with_id(
        tx,
        "users",
        now,
        id,
        &[
            ("name", json!(name)),
            ("auth", json!(auth)),
            ("access", json!(access)),
        ],
    )
}

fn insert_row(
    tx: &Transaction<'_>,
    table: &str,
    now: &str,
    extra: &[(&str, Value)],
) -> ApiResult<()> {
    insert_row_with_id(tx, table, now, Uuid::new_v4(), extra)
}

fn insert_row_with_id(
    tx: &Transaction<'_>,
    table: &str,
    now: &str,
    id: Uuid,
    extra: &[(&str, Value)],
) -> ApiResult<()> {
    let mut columns: Vec<&str> = vec![
        "id",
        "created_at",
        "updated_at",
        "access_read",
        "access_edit",
        "access_full",
        "access_deny",
    ];
    let mut values: Vec<Value> = vec![
        json!(id.to_string()),
        json!(now),
        json!(now),
        json!([]),
        json!([]),
        json!([]),
        json!([]),
    ];
    for (column, value) in extra {
        columns.push(*column);
        values.push(value.clone());
    }

    let column_sql = columns
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=values.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        table, column_sql, placeholders
    );
    let inserted = tx.execute(&sql, &values)?;
    if inserted != 1 {
        return Err(ApiError::internal(format!(
            "seed insert into {} affected {} rows",
            table, inserted
        )));
    }
    Ok(())
}

fn now_string() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_hex() {
        let sum = seed_checksum();
        assert_eq!(sum.len(), 64);
        assert_eq!(sum, seed_checksum());
    }

    #[test]
    fn test_every_core_table_has_a_model_row() {
        for table in CORE_TABLES {
            assert!(
                SYSTEM_MODELS.iter().any(|(name, _, _)| *name == table),
                "missing model row for {}",
                table
            );
        }
    }

    #[test]
    fn test_only_filters_is_public() {
        for (name, status, _) in SYSTEM_MODELS {
            if name == "filters" {
                assert_eq!(status, "active");
            } else {
                assert_eq!(status, "system");
            }
        }
    }

    #[test]
    fn test_every_core_table_has_field_rows() {
        for table in CORE_TABLES {
            let count = SYSTEM_FIELDS
                .iter()
                .chain(SYSTEM_FIELDS_EXTRA.iter())
                .chain(SYSTEM_FS_FIELDS.iter())
                .filter(|(model, ..)| *model == table)
                .count();
            assert!(count > 0, "no field rows for {}", table);
        }
    }

    #[test]
    fn test_field_types_are_valid_wire_types() {
        for (_, _, wire_type, _) in SYSTEM_FIELDS
            .iter()
            .chain(SYSTEM_FIELDS_EXTRA.iter())
            .chain(SYSTEM_FS_FIELDS.iter())
        {
            crate::schema::FieldType::parse(wire_type).unwrap();
        }
    }
}
