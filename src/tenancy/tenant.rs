//! # Tenant Model
//!
//! Core types for multi-tenant management. A tenant is an isolated
//! namespace in the backing store, identified by `(db_type, database,
//! schema)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::core::error::{ApiError, ApiResult};
use crate::core::record::Record;

/// Tenant isolation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbType {
    /// Namespace inside the shared store
    #[serde(rename = "relational-shared")]
    RelationalShared,
    /// Dedicated per-tenant database file
    #[serde(rename = "relational-file")]
    RelationalFile,
}

impl Default for DbType {
    fn default() -> Self {
        Self::RelationalShared
    }
}

impl DbType {
    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "relational-shared" => Ok(Self::RelationalShared),
            "relational-file" => Ok(Self::RelationalFile),
            other => Err(ApiError::validation(format!(
                "db_type must be relational-shared|relational-file, got '{}'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelationalShared => "relational-shared",
            Self::RelationalFile => "relational-file",
        }
    }
}

/// Registered tenant
#[derive(Debug, Clone, Serialize)]
pub struct Tenant {
    pub id: Uuid,
    /// Slug, globally unique among active tenants
    pub name: String,
    pub db_type: DbType,
    /// Physical database name
    pub database: String,
    /// Namespace inside that database
    pub schema: String,
    pub owner_id: Option<Uuid>,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub trashed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn from_record(record: &Record) -> ApiResult<Self> {
        let str_field = |key: &str| -> ApiResult<String> {
            record
                .get(key)
                .and_then(|v| v.as_str())
                .map(String::from)
                .ok_or_else(|| ApiError::internal(format!("tenant row missing '{}'", key)))
        };
        let id = Uuid::parse_str(&str_field("id")?)
            .map_err(|e| ApiError::internal(format!("tenant id: {}", e)))?;
        let owner_id = record
            .get("owner_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        Ok(Self {
            id,
            name: str_field("name")?,
            db_type: DbType::parse(&str_field("db_type")?)?,
            database: str_field("database")?,
            schema: str_field("schema")?,
            owner_id,
            is_active: matches!(record.get("is_active"), Some(Value::Number(n)) if n.as_i64() == Some(1)),
            description: record
                .get("description")
                .and_then(|v| v.as_str())
                .map(String::from),
            created_at: record
                .timestamp("created_at")
                .ok_or_else(|| ApiError::internal("tenant row missing created_at"))?,
            updated_at: record
                .timestamp("updated_at")
                .ok_or_else(|| ApiError::internal("tenant row missing updated_at"))?,
            trashed_at: record.timestamp("trashed_at"),
            deleted_at: record.timestamp("deleted_at"),
        })
    }
}

/// Request to create a new tenant
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    #[serde(default)]
    pub db_type: DbType,
    pub owner_username: Option<String>,
    pub description: Option<String>,
}

/// A user row created during provisioning
#[derive(Debug, Clone, Serialize)]
pub struct TenantUser {
    pub id: Uuid,
    pub name: String,
    pub auth: String,
    pub access: String,
}

/// Tenant slugs share the model-name shape: lowercase, digits,
/// underscores; 2-64 chars.
pub fn validate_tenant_name(name: &str) -> ApiResult<()> {
    let head_ok = name
        .chars()
        .next()
        .map(|c| c.is_ascii_lowercase())
        .unwrap_or(false);
    let rest_ok = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if head_ok && rest_ok && name.len() >= 2 && name.len() <= 64 {
        Ok(())
    } else {
        Err(ApiError::validation(format!(
            "tenant name '{}' must match ^[a-z][a-z0-9_]*$ (2-64 chars)",
            name
        )))
    }
}
