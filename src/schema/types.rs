//! # Wire Field Types
//!
//! The field types of the public surface. Types are stored in field
//! metadata exactly as given; mapping to storage column types is the
//! adapter dialect's concern and happens only at DDL time.

use crate::core::error::{ApiError, ApiResult};

/// A parsed wire type, e.g. `integer` or `text[]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Integer,
    Decimal,
    Numeric,
    Boolean,
    Timestamp,
    Date,
    Uuid,
    Jsonb,
    Binary,
    BigSerial,
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parse a wire type string. Array forms use the `[]` suffix; nested
    /// arrays are not a thing.
    pub fn parse(wire: &str) -> ApiResult<Self> {
        if let Some(element) = wire.strip_suffix("[]") {
            let inner = Self::parse(element)?;
            if inner.is_array() {
                return Err(ApiError::validation(format!(
                    "nested array type '{}' is not supported",
                    wire
                )));
            }
            return Ok(Self::Array(Box::new(inner)));
        }
        match wire {
            "text" => Ok(Self::Text),
            "integer" => Ok(Self::Integer),
            "decimal" => Ok(Self::Decimal),
            "numeric" => Ok(Self::Numeric),
            "boolean" => Ok(Self::Boolean),
            "timestamp" => Ok(Self::Timestamp),
            "date" => Ok(Self::Date),
            "uuid" => Ok(Self::Uuid),
            "jsonb" => Ok(Self::Jsonb),
            "binary" => Ok(Self::Binary),
            "bigserial" => Ok(Self::BigSerial),
            other => Err(ApiError::validation(format!(
                "unknown field type '{}'",
                other
            ))),
        }
    }

    /// The wire representation
    pub fn wire(&self) -> String {
        match self {
            Self::Text => "text".into(),
            Self::Integer => "integer".into(),
            Self::Decimal => "decimal".into(),
            Self::Numeric => "numeric".into(),
            Self::Boolean => "boolean".into(),
            Self::Timestamp => "timestamp".into(),
            Self::Date => "date".into(),
            Self::Uuid => "uuid".into(),
            Self::Jsonb => "jsonb".into(),
            Self::Binary => "binary".into(),
            Self::BigSerial => "bigserial".into(),
            Self::Array(inner) => format!("{}[]", inner.wire()),
        }
    }

    /// Storage column type (SQLite affinity)
    pub fn column_type(&self) -> &'static str {
        match self {
            Self::Text | Self::Timestamp | Self::Date | Self::Uuid | Self::Jsonb => "TEXT",
            Self::Integer | Self::Boolean | Self::BigSerial => "INTEGER",
            Self::Decimal => "REAL",
            Self::Numeric => "NUMERIC",
            Self::Binary => "BLOB",
            Self::Array(_) => "TEXT",
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Whether a stored column of this type can be relabelled as `target`
    /// without data loss. Only widening conversions qualify.
    pub fn widens_to(&self, target: &FieldType) -> bool {
        if self == target {
            return true;
        }
        matches!(
            (self, target),
            (Self::Integer, Self::Decimal)
                | (Self::Integer, Self::Numeric)
                | (Self::Integer, Self::Text)
                | (Self::BigSerial, Self::Integer)
                | (Self::Decimal, Self::Text)
                | (Self::Numeric, Self::Text)
                | (Self::Date, Self::Timestamp)
                | (Self::Uuid, Self::Text)
        )
    }
}
