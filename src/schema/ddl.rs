//! # DDL Emission
//!
//! Materialises model definitions as backing tables and additive ALTER
//! steps. Identifiers go through the same validator as the query engine;
//! default values are the only literals in DDL and are escaped here.

use serde_json::Value;

use crate::core::error::{ApiError, ApiResult};
use crate::filter::quote_ident;

use super::definition::FieldDef;
use super::validator::Schema;

/// Base columns present on every backing table.
const BASE_COLUMNS_SQL: &str = "\
\"id\" TEXT PRIMARY KEY,
  \"created_at\" TEXT NOT NULL,
  \"updated_at\" TEXT NOT NULL,
  \"trashed_at\" TEXT,
  \"deleted_at\" TEXT,
  \"access_read\" TEXT NOT NULL DEFAULT '[]',
  \"access_edit\" TEXT NOT NULL DEFAULT '[]',
  \"access_full\" TEXT NOT NULL DEFAULT '[]',
  \"access_deny\" TEXT NOT NULL DEFAULT '[]'";

/// CREATE TABLE for a model.
pub fn create_table_sql(schema: &Schema) -> ApiResult<String> {
    let table = quote_ident(schema.table())?;
    let mut columns = vec![BASE_COLUMNS_SQL.to_string()];
    for field in &schema.fields {
        columns.push(format!("  {}", column_def(field)?));
    }
    Ok(format!(
        "CREATE TABLE {} (\n  {}\n)",
        table,
        columns.join(",\n")
    ))
}

/// Secondary indexes for fields flagged `index` or `unique`.
pub fn create_index_sql(table: &str, field: &FieldDef) -> ApiResult<String> {
    let unique = if field.unique { "UNIQUE " } else { "" };
    Ok(format!(
        "CREATE {}INDEX {} ON {} ({})",
        unique,
        quote_ident(&format!("idx_{}_{}", table, field.field_name))?,
        quote_ident(table)?,
        quote_ident(&field.field_name)?
    ))
}

/// ADD COLUMN for an additive change. `NOT NULL` needs a default: the
/// backing store refuses NOT NULL additions without one even on empty
/// tables, so emptiness only relaxes nothing here; the requiredness is
/// still enforced by the validator.
pub fn add_column_sql(table: &str, field: &FieldDef, _table_empty: bool) -> ApiResult<String> {
    Ok(format!(
        "ALTER TABLE {} ADD COLUMN {}",
        quote_ident(table)?,
        column_def_for_alter(field)?
    ))
}

/// DROP COLUMN. Callers check column existence first so a missing column
/// surfaces as `COLUMN_NOT_FOUND` rather than a driver error.
pub fn drop_column_sql(table: &str, field_name: &str) -> ApiResult<String> {
    Ok(format!(
        "ALTER TABLE {} DROP COLUMN {}",
        quote_ident(table)?,
        quote_ident(field_name)?
    ))
}

/// Drop a field's secondary index. Indexed columns cannot be dropped
/// while their index exists.
pub fn drop_index_sql(table: &str, field_name: &str) -> ApiResult<String> {
    Ok(format!(
        "DROP INDEX IF EXISTS {}",
        quote_ident(&format!("idx_{}_{}", table, field_name))?
    ))
}

/// DROP TABLE for a soft-deleted model.
pub fn drop_table_sql(table: &str) -> ApiResult<String> {
    Ok(format!("DROP TABLE IF EXISTS {}", quote_ident(table)?))
}

/// Change rules: metadata-only edits pass freely; a type change must be a
/// widening and the column must not hold non-null values.
pub fn validate_field_change(
    old: &FieldDef,
    new: &FieldDef,
    column_has_values: bool,
) -> ApiResult<()> {
    if old.field_type == new.field_type {
        return Ok(());
    }
    if column_has_values {
        return Err(ApiError::validation(format!(
            "field '{}' type cannot change while the column holds values",
            old.field_name
        )));
    }
    let old_ty = old.ty()?;
    let new_ty = new.ty()?;
    if !old_ty.widens_to(&new_ty) {
        return Err(ApiError::validation(format!(
            "field '{}' cannot narrow from {} to {}",
            old.field_name, old.field_type, new.field_type
        )));
    }
    Ok(())
}

fn column_def(field: &FieldDef) -> ApiResult<String> {
    let mut sql = format!(
        "{} {}",
        quote_ident(&field.field_name)?,
        field.ty()?.column_type()
    );
    if let Some(default) = &field.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(&sql_literal(default));
    }
    if field.required {
        sql.push_str(" NOT NULL");
    }
    if field.unique {
        sql.push_str(" UNIQUE");
    }
    Ok(sql)
}

fn column_def_for_alter(field: &FieldDef) -> ApiResult<String> {
    let mut sql = format!(
        "{} {}",
        quote_ident(&field.field_name)?,
        field.ty()?.column_type()
    );
    if let Some(default) = &field.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(&sql_literal(default));
        if field.required {
            sql.push_str(" NOT NULL");
        }
    }
    Ok(sql)
}

/// Render a default value as a SQL literal. Strings escape embedded
/// quotes; arrays and objects are stored as JSON text.
fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}
