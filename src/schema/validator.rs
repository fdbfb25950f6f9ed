//! # Payload Validator
//!
//! A [`Schema`] is the cached view of one model plus its fields. It
//! validates record payloads before any SQL is assembled: required fields,
//! type coercion, bounds, pattern, enum membership, and array shape.

use base64::Engine as _;
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde_json::Value;
use uuid::Uuid;

use crate::core::error::{ApiError, ApiResult};
use crate::core::record::{Record, BASE_COLUMNS};

use super::definition::{FieldDef, ModelDef, ModelStatus};
use super::types::FieldType;

/// One model plus its field definitions.
#[derive(Debug, Clone)]
pub struct Schema {
    pub model: ModelDef,
    pub fields: Vec<FieldDef>,
}

impl Schema {
    pub fn new(model: ModelDef, fields: Vec<FieldDef>) -> Self {
        Self { model, fields }
    }

    /// The backing table name
    pub fn table(&self) -> &str {
        &self.model.model_name
    }

    pub fn is_system(&self) -> bool {
        self.model.status == ModelStatus::System
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.field_name == name)
    }

    /// Fields with change tracking enabled
    pub fn tracked_fields(&self) -> Vec<&FieldDef> {
        self.fields.iter().filter(|f| f.tracked).collect()
    }

    /// All column names: base columns then field columns
    pub fn columns(&self) -> Vec<String> {
        BASE_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.fields.iter().map(|f| f.field_name.clone()))
            .collect()
    }

    /// Validate a record in place: defaults, required, coercion, bounds.
    /// Unknown keys (outside base columns and defined fields) are rejected.
    pub fn validate_or_throw(&self, record: &mut Record) -> ApiResult<()> {
        let unknown: Vec<String> = record
            .0
            .keys()
            .filter(|k| !BASE_COLUMNS.contains(&k.as_str()) && self.field(k).is_none())
            .cloned()
            .collect();
        if let Some(key) = unknown.first() {
            return Err(ApiError::validation(format!(
                "unknown field '{}' on model '{}'",
                key,
                self.model.model_name
            )));
        }

        for field in &self.fields {
            let current = record.get(&field.field_name).cloned();
            let value = match current {
                None | Some(Value::Null) => match &field.default_value {
                    Some(default) => default.clone(),
                    None => Value::Null,
                },
                Some(v) => v,
            };

            if value.is_null() {
                if field.required {
                    return Err(ApiError::validation(format!(
                        "field '{}' is required",
                        field.field_name
                    )));
                }
                record.set(&field.field_name, Value::Null);
                continue;
            }

            let coerced = coerce(field, &field.ty()?, value)?;
            check_bounds(field, &coerced)?;
            check_pattern(field, &coerced)?;
            check_enum(field, &coerced)?;
            record.set(&field.field_name, coerced);
        }
        Ok(())
    }
}

/// Coerce one value to its field type. Lenient on the wire forms that are
/// unambiguous (numeric strings, 0/1 booleans); everything else rejects.
fn coerce(field: &FieldDef, ty: &FieldType, value: Value) -> ApiResult<Value> {
    let kind = value_kind(&value);
    let fail = |what: &str| -> ApiResult<Value> {
        Err(ApiError::validation(format!(
            "field '{}' expects {}, got a {} value",
            field.field_name, what, kind
        )))
    };

    match ty {
        FieldType::Text => match value {
            Value::String(s) => Ok(Value::String(s)),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            _ => fail("text"),
        },
        FieldType::Integer | FieldType::BigSerial => match value {
            Value::Number(n) => {
                if n.is_i64() || n.is_u64() {
                    Ok(Value::Number(n))
                } else {
                    let f = n.as_f64().unwrap_or(f64::NAN);
                    if f.fract() == 0.0 {
                        Ok(Value::from(f as i64))
                    } else {
                        fail("an integer")
                    }
                }
            }
            Value::String(s) => match s.parse::<i64>() {
                Ok(i) => Ok(Value::from(i)),
                Err(_) => fail("an integer"),
            },
            _ => fail("an integer"),
        },
        FieldType::Decimal | FieldType::Numeric => match value {
            Value::Number(n) => Ok(Value::Number(n)),
            Value::String(s) => match s.parse::<f64>() {
                Ok(f) => Ok(Value::from(f)),
                Err(_) => fail("a number"),
            },
            _ => fail("a number"),
        },
        FieldType::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(b)),
            Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Bool(false)),
                Some(1) => Ok(Value::Bool(true)),
                _ => fail("a boolean"),
            },
            Value::String(s) if s == "true" => Ok(Value::Bool(true)),
            Value::String(s) if s == "false" => Ok(Value::Bool(false)),
            _ => fail("a boolean"),
        },
        FieldType::Timestamp => match value {
            Value::String(s) => match DateTime::parse_from_rfc3339(&s) {
                Ok(_) => Ok(Value::String(s)),
                Err(_) => fail("an RFC 3339 timestamp"),
            },
            _ => fail("an RFC 3339 timestamp"),
        },
        FieldType::Date => match value {
            Value::String(s) => match NaiveDate::parse_from_str(&s, "%Y-%m-%d") {
                Ok(_) => Ok(Value::String(s)),
                Err(_) => fail("a YYYY-MM-DD date"),
            },
            _ => fail("a YYYY-MM-DD date"),
        },
        FieldType::Uuid => match value {
            Value::String(s) => match Uuid::parse_str(&s) {
                Ok(_) => Ok(Value::String(s)),
                Err(_) => fail("a uuid"),
            },
            _ => fail("a uuid"),
        },
        FieldType::Jsonb => Ok(value),
        FieldType::Binary => match value {
            Value::String(s) => {
                match base64::engine::general_purpose::STANDARD.decode(s.as_bytes()) {
                    Ok(_) => Ok(Value::String(s)),
                    Err(_) => fail("base64 data"),
                }
            }
            _ => fail("base64 data"),
        },
        FieldType::Array(element) => match value {
            Value::Array(items) => {
                let coerced = items
                    .into_iter()
                    .map(|item| coerce(field, element, item))
                    .collect::<ApiResult<Vec<_>>>()?;
                Ok(Value::Array(coerced))
            }
            _ => fail("an array"),
        },
    }
}

/// minimum/maximum: numeric value for numbers, length for strings and
/// arrays.
fn check_bounds(field: &FieldDef, value: &Value) -> ApiResult<()> {
    let measure = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        _ => None,
    };
    let Some(measure) = measure else {
        return Ok(());
    };
    if let Some(min) = field.minimum {
        if measure < min {
            return Err(ApiError::validation(format!(
                "field '{}' is below minimum {}",
                field.field_name, min
            )));
        }
    }
    if let Some(max) = field.maximum {
        if measure > max {
            return Err(ApiError::validation(format!(
                "field '{}' exceeds maximum {}",
                field.field_name, max
            )));
        }
    }
    Ok(())
}

fn check_pattern(field: &FieldDef, value: &Value) -> ApiResult<()> {
    let Some(pattern) = &field.pattern else {
        return Ok(());
    };
    let re = Regex::new(pattern).map_err(|e| {
        ApiError::validation(format!(
            "field '{}' has an invalid pattern: {}",
            field.field_name, e
        ))
    })?;
    let check_one = |s: &str| -> ApiResult<()> {
        if re.is_match(s) {
            Ok(())
        } else {
            Err(ApiError::validation(format!(
                "field '{}' does not match pattern",
                field.field_name
            )))
        }
    };
    match value {
        Value::String(s) => check_one(s),
        Value::Array(items) => {
            for item in items {
                if let Value::String(s) = item {
                    check_one(s)?;
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_enum(field: &FieldDef, value: &Value) -> ApiResult<()> {
    let Some(allowed) = &field.enum_values else {
        return Ok(());
    };
    let check_one = |v: &Value| -> ApiResult<()> {
        if allowed.contains(v) {
            Ok(())
        } else {
            Err(ApiError::validation(format!(
                "field '{}' must be one of the enum values",
                field.field_name
            )))
        }
    };
    match value {
        Value::Array(items) => {
            for item in items {
                check_one(item)?;
            }
            Ok(())
        }
        other => check_one(other),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(name: &str, ty: &str) -> FieldDef {
        FieldDef::from_record(
            &Record::from_value(json!({
                "model_name": "products",
                "field_name": name,
                "type": ty
            }))
            .unwrap(),
        )
        .unwrap()
    }

    fn schema(fields: Vec<FieldDef>) -> Schema {
        let model = ModelDef::from_record(
            &Record::from_value(json!({"model_name": "products", "status": "active"})).unwrap(),
        )
        .unwrap();
        Schema::new(model, fields)
    }

    #[test]
    fn test_required_enforced() {
        let mut name = field("name", "text");
        name.required = true;
        let s = schema(vec![name]);

        let mut rec = Record::from_value(json!({})).unwrap();
        let err = s.validate_or_throw(&mut rec).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");

        let mut rec = Record::from_value(json!({"name": "Widget"})).unwrap();
        s.validate_or_throw(&mut rec).unwrap();
    }

    #[test]
    fn test_default_applied_before_required() {
        let mut status = field("status", "text");
        status.required = true;
        status.default_value = Some(json!("open"));
        let s = schema(vec![status]);

        let mut rec = Record::from_value(json!({})).unwrap();
        s.validate_or_throw(&mut rec).unwrap();
        assert_eq!(rec.get("status"), Some(&json!("open")));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let s = schema(vec![field("name", "text")]);
        let mut rec = Record::from_value(json!({"name": "x", "colour": "red"})).unwrap();
        assert!(s.validate_or_throw(&mut rec).is_err());
    }

    #[test]
    fn test_integer_coercion() {
        let s = schema(vec![field("n", "integer")]);

        let mut rec = Record::from_value(json!({"n": "42"})).unwrap();
        s.validate_or_throw(&mut rec).unwrap();
        assert_eq!(rec.get("n"), Some(&json!(42)));

        let mut rec = Record::from_value(json!({"n": 3.5})).unwrap();
        assert!(s.validate_or_throw(&mut rec).is_err());
    }

    #[test]
    fn test_decimal_accepts_string() {
        let s = schema(vec![field("price", "decimal")]);
        let mut rec = Record::from_value(json!({"price": "29.99"})).unwrap();
        s.validate_or_throw(&mut rec).unwrap();
        assert_eq!(rec.get("price"), Some(&json!(29.99)));
    }

    #[test]
    fn test_boolean_forms() {
        let s = schema(vec![field("flag", "boolean")]);
        for (input, expected) in [(json!(true), true), (json!(1), true), (json!("false"), false)] {
            let mut rec = Record::from_value(json!({ "flag": input })).unwrap();
            s.validate_or_throw(&mut rec).unwrap();
            assert_eq!(rec.get("flag"), Some(&json!(expected)));
        }
        let mut rec = Record::from_value(json!({"flag": "yes"})).unwrap();
        assert!(s.validate_or_throw(&mut rec).is_err());
    }

    #[test]
    fn test_timestamp_and_date() {
        let s = schema(vec![field("at", "timestamp"), field("on", "date")]);
        let mut rec =
            Record::from_value(json!({"at": "2026-01-05T10:00:00Z", "on": "2026-01-05"})).unwrap();
        s.validate_or_throw(&mut rec).unwrap();

        let mut rec = Record::from_value(json!({"at": "yesterday", "on": null})).unwrap();
        assert!(s.validate_or_throw(&mut rec).is_err());
    }

    #[test]
    fn test_uuid_validation() {
        let s = schema(vec![field("ref", "uuid")]);
        let mut rec =
            Record::from_value(json!({"ref": "0b106cf5-5f09-4d1d-9b35-9a41bbd2eb54"})).unwrap();
        s.validate_or_throw(&mut rec).unwrap();

        let mut rec = Record::from_value(json!({"ref": "not-a-uuid"})).unwrap();
        assert!(s.validate_or_throw(&mut rec).is_err());
    }

    #[test]
    fn test_array_elements_coerced() {
        let s = schema(vec![field("ns", "integer[]")]);
        let mut rec = Record::from_value(json!({"ns": ["1", 2, "3"]})).unwrap();
        s.validate_or_throw(&mut rec).unwrap();
        assert_eq!(rec.get("ns"), Some(&json!([1, 2, 3])));

        let mut rec = Record::from_value(json!({"ns": 1})).unwrap();
        assert!(s.validate_or_throw(&mut rec).is_err());
    }

    #[test]
    fn test_bounds_on_numbers_and_strings() {
        let mut price = field("price", "decimal");
        price.minimum = Some(0.0);
        price.maximum = Some(1000.0);
        let mut code = field("code", "text");
        code.minimum = Some(3.0);
        let s = schema(vec![price, code]);

        let mut rec = Record::from_value(json!({"price": -1, "code": "abc"})).unwrap();
        assert!(s.validate_or_throw(&mut rec).is_err());

        let mut rec = Record::from_value(json!({"price": 10, "code": "ab"})).unwrap();
        assert!(s.validate_or_throw(&mut rec).is_err());

        let mut rec = Record::from_value(json!({"price": 10, "code": "abc"})).unwrap();
        s.validate_or_throw(&mut rec).unwrap();
    }

    #[test]
    fn test_pattern_and_enum() {
        let mut sku = field("sku", "text");
        sku.pattern = Some("^[A-Z]{3}-\\d+$".into());
        let mut status = field("status", "text");
        status.enum_values = Some(vec![json!("open"), json!("closed")]);
        let s = schema(vec![sku, status]);

        let mut rec = Record::from_value(json!({"sku": "ABC-42", "status": "open"})).unwrap();
        s.validate_or_throw(&mut rec).unwrap();

        let mut rec = Record::from_value(json!({"sku": "abc", "status": "open"})).unwrap();
        assert!(s.validate_or_throw(&mut rec).is_err());

        let mut rec = Record::from_value(json!({"sku": "ABC-42", "status": "held"})).unwrap();
        assert!(s.validate_or_throw(&mut rec).is_err());
    }

    #[test]
    fn test_tracked_fields() {
        let mut name = field("name", "text");
        name.tracked = true;
        let email = field("email", "text");
        let s = schema(vec![name, email]);
        let tracked: Vec<&str> = s
            .tracked_fields()
            .iter()
            .map(|f| f.field_name.as_str())
            .collect();
        assert_eq!(tracked, vec!["name"]);
    }
}
