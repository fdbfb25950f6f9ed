//! # Model & Field Definitions
//!
//! Models and fields are themselves records in the `models` and `fields`
//! tables. These types are the parsed view of those rows.

use serde_json::Value;

use crate::core::error::{ApiError, ApiResult};
use crate::core::record::Record;

use super::types::FieldType;

/// Model lifecycle status. System models are read-only on the public
/// surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelStatus {
    Pending,
    Active,
    System,
}

impl ModelStatus {
    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "system" => Ok(Self::System),
            other => Err(ApiError::validation(format!(
                "unknown model status '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::System => "system",
        }
    }
}

/// A model definition row.
#[derive(Debug, Clone)]
pub struct ModelDef {
    pub id: Option<String>,
    pub model_name: String,
    pub status: ModelStatus,
    pub sudo: bool,
    pub frozen: bool,
    pub immutable: bool,
    pub external: bool,
    pub description: Option<String>,
}

impl ModelDef {
    pub fn from_record(record: &Record) -> ApiResult<Self> {
        let model_name = required_str(record, "model_name")?;
        validate_model_name(&model_name)?;
        let status = match record.get("status").and_then(|v| v.as_str()) {
            Some(s) => ModelStatus::parse(s)?,
            None => ModelStatus::Pending,
        };
        Ok(Self {
            id: record.get("id").and_then(|v| v.as_str()).map(String::from),
            model_name,
            status,
            sudo: as_bool(record.get("sudo")),
            frozen: as_bool(record.get("frozen")),
            immutable: as_bool(record.get("immutable")),
            external: as_bool(record.get("external")),
            description: optional_str(record, "description"),
        })
    }
}

/// A field definition row.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub id: Option<String>,
    pub model_name: String,
    pub field_name: String,
    /// Wire type exactly as given, e.g. `text[]`
    pub field_type: String,
    pub required: bool,
    pub default_value: Option<Value>,
    pub description: Option<String>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub pattern: Option<String>,
    pub enum_values: Option<Vec<Value>>,
    pub is_array: bool,
    pub unique: bool,
    pub index: bool,
    pub searchable: bool,
    pub immutable: bool,
    pub sudo: bool,
    pub tracked: bool,
    pub transform: Option<String>,
    pub relationship_type: Option<String>,
    pub related_model: Option<String>,
    pub related_field: Option<String>,
    pub relationship_name: Option<String>,
    pub cascade_delete: bool,
    pub required_relationship: bool,
}

impl FieldDef {
    pub fn from_record(record: &Record) -> ApiResult<Self> {
        let field_name = required_str(record, "field_name")?;
        crate::filter::validate_identifier(&field_name)?;

        // The type is mandatory; defaulting the omission away hides typos.
        let field_type = record
            .get("type")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| {
                ApiError::validation(format!("field '{}' requires a type", field_name))
            })?;
        FieldType::parse(&field_type)?;

        Ok(Self {
            id: record.get("id").and_then(|v| v.as_str()).map(String::from),
            model_name: required_str(record, "model_name")?,
            field_name,
            field_type,
            required: as_bool(record.get("required")),
            default_value: parse_json_column(record.get("default_value"))?,
            description: optional_str(record, "description"),
            minimum: record.get("minimum").and_then(|v| v.as_f64()),
            maximum: record.get("maximum").and_then(|v| v.as_f64()),
            pattern: optional_str(record, "pattern"),
            enum_values: parse_json_array(record.get("enum_values"))?,
            is_array: as_bool(record.get("is_array")),
            unique: as_bool(record.get("unique")),
            index: as_bool(record.get("index")),
            searchable: as_bool(record.get("searchable")),
            immutable: as_bool(record.get("immutable")),
            sudo: as_bool(record.get("sudo")),
            tracked: as_bool(record.get("tracked")),
            transform: optional_str(record, "transform"),
            relationship_type: optional_str(record, "relationship_type"),
            related_model: optional_str(record, "related_model"),
            related_field: optional_str(record, "related_field"),
            relationship_name: optional_str(record, "relationship_name"),
            cascade_delete: as_bool(record.get("cascade_delete")),
            required_relationship: as_bool(record.get("required_relationship")),
        })
    }

    /// Parsed wire type
    pub fn ty(&self) -> ApiResult<FieldType> {
        let ty = FieldType::parse(&self.field_type)?;
        if self.is_array && !ty.is_array() {
            return Ok(FieldType::Array(Box::new(ty)));
        }
        Ok(ty)
    }
}

/// Model names: lowercase slug, letters/digits/underscores.
pub fn validate_model_name(name: &str) -> ApiResult<()> {
    let mut chars = name.chars();
    let head_ok = chars.next().map(|c| c.is_ascii_lowercase()).unwrap_or(false);
    let rest_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if head_ok && rest_ok && name.len() <= 64 {
        Ok(())
    } else {
        Err(ApiError::validation(format!(
            "model name '{}' must match ^[a-z][a-z0-9_]*$",
            name
        )))
    }
}

fn required_str(record: &Record, key: &str) -> ApiResult<String> {
    record
        .get(key)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| ApiError::validation(format!("missing '{}'", key)))
}

fn optional_str(record: &Record, key: &str) -> Option<String> {
    record
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Booleans come back as 0/1 from storage and as booleans from the wire.
fn as_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    }
}

/// JSON columns come back as text from storage and as values from the wire.
fn parse_json_column(value: Option<&Value>) -> ApiResult<Option<Value>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => match serde_json::from_str(s) {
            Ok(parsed) => Ok(Some(parsed)),
            // A bare string default is a valid default for text fields.
            Err(_) => Ok(Some(Value::String(s.clone()))),
        },
        Some(other) => Ok(Some(other.clone())),
    }
}

fn parse_json_array(value: Option<&Value>) -> ApiResult<Option<Vec<Value>>> {
    match parse_json_column(value)? {
        None => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(ApiError::validation("enum_values must be an array")),
    }
}
