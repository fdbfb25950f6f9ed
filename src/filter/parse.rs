//! # Filter Parser
//!
//! Parses the document form into the typed AST. Every malformed shape is
//! rejected here, before any SQL is assembled.

use serde_json::Value;

use super::ast::{CmpOp, FieldOp, FilterDoc, OrderTerm, SizeCond, SortDir, WhereNode};
use crate::core::context::TrashedMode;
use crate::core::error::{ApiError, ApiResult};

/// Validate an identifier (table, column, alias) for safe quoting.
pub fn validate_identifier(name: &str) -> ApiResult<()> {
    let mut chars = name.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if head_ok && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(ApiError::validation(format!("invalid identifier '{}'", name)))
    }
}

/// Parse a full filter document.
pub fn parse_filter(value: &Value) -> ApiResult<FilterDoc> {
    let obj = match value {
        Value::Null => return Ok(FilterDoc::default()),
        Value::Object(obj) => obj,
        _ => return Err(ApiError::validation("filter must be an object")),
    };

    let mut doc = FilterDoc::default();
    for (key, val) in obj {
        match key.as_str() {
            "select" => doc.select = parse_select(val)?,
            "where" => doc.where_clause = parse_where(val)?,
            "order" => doc.order = parse_order(val)?,
            "limit" => doc.limit = Some(parse_bound(val, "limit")?),
            "offset" => doc.offset = Some(parse_bound(val, "offset")?),
            "options" => parse_options(val, &mut doc)?,
            other => {
                return Err(ApiError::validation(format!(
                    "unknown filter key '{}'",
                    other
                )))
            }
        }
    }
    Ok(doc)
}

/// Parse a WHERE document. A string is the `id` shorthand; null means no
/// constraint; anything else must be an object.
pub fn parse_where(value: &Value) -> ApiResult<Option<WhereNode>> {
    match value {
        Value::Null => Ok(None),
        Value::String(id) => Ok(Some(WhereNode::Field {
            field: "id".to_string(),
            op: FieldOp::Eq(Value::String(id.clone())),
        })),
        Value::Object(obj) => {
            if obj.is_empty() {
                return Ok(None);
            }
            Ok(Some(parse_where_object(obj)?))
        }
        _ => Err(ApiError::validation(
            "where must be an object or an id string",
        )),
    }
}

fn parse_where_object(obj: &serde_json::Map<String, Value>) -> ApiResult<WhereNode> {
    let mut nodes = Vec::new();
    for (key, val) in obj {
        if let Some(op) = key.strip_prefix('$') {
            nodes.push(parse_logical(op, val)?);
        } else {
            validate_identifier(key)?;
            nodes.extend(parse_field(key, val)?);
        }
    }
    match nodes.len() {
        0 => Err(ApiError::validation("empty where document")),
        1 => Ok(nodes.into_iter().next().unwrap()),
        _ => Ok(WhereNode::And(nodes)),
    }
}

fn parse_logical(op: &str, value: &Value) -> ApiResult<WhereNode> {
    match op {
        "and" | "or" | "nand" | "nor" => {
            let items = value.as_array().ok_or_else(|| {
                ApiError::validation(format!("${} requires an array of subdocuments", op))
            })?;
            if items.is_empty() {
                return Err(ApiError::validation(format!("${} must not be empty", op)));
            }
            let mut nodes = Vec::with_capacity(items.len());
            for item in items {
                let obj = item.as_object().ok_or_else(|| {
                    ApiError::validation(format!("${} elements must be objects", op))
                })?;
                nodes.push(parse_where_object(obj)?);
            }
            Ok(match op {
                "and" => WhereNode::And(nodes),
                "or" => WhereNode::Or(nodes),
                "nand" => WhereNode::Nand(nodes),
                _ => WhereNode::Nor(nodes),
            })
        }
        "not" => {
            let obj = value
                .as_object()
                .ok_or_else(|| ApiError::validation("$not requires an object"))?;
            Ok(WhereNode::Not(Box::new(parse_where_object(obj)?)))
        }
        other => Err(ApiError::validation(format!(
            "unknown logical operator '${}'",
            other
        ))),
    }
}

/// Parse one field entry. A bare array is implicit `$in`; a plain value is
/// equality; an object whose keys all start with `$` is an operator set.
fn parse_field(field: &str, value: &Value) -> ApiResult<Vec<WhereNode>> {
    let ops = match value {
        Value::Array(items) => vec![FieldOp::In(items.clone())],
        Value::Object(obj) if obj.keys().any(|k| k.starts_with('$')) => {
            if !obj.keys().all(|k| k.starts_with('$')) {
                return Err(ApiError::validation(format!(
                    "field '{}' mixes operators and literal keys",
                    field
                )));
            }
            let mut ops = Vec::with_capacity(obj.len());
            for (op, operand) in obj {
                ops.push(parse_operator(field, &op[1..], operand)?);
            }
            ops
        }
        other => vec![FieldOp::Eq(other.clone())],
    };

    Ok(ops
        .into_iter()
        .map(|op| WhereNode::Field {
            field: field.to_string(),
            op,
        })
        .collect())
}

fn parse_operator(field: &str, op: &str, operand: &Value) -> ApiResult<FieldOp> {
    let scalar = |v: &Value| -> ApiResult<Value> {
        if v.is_array() || v.is_object() {
            Err(ApiError::validation(format!(
                "${} on '{}' requires a scalar operand",
                op, field
            )))
        } else {
            Ok(v.clone())
        }
    };
    let string = |v: &Value| -> ApiResult<String> {
        v.as_str().map(|s| s.to_string()).ok_or_else(|| {
            ApiError::validation(format!("${} on '{}' requires a string operand", op, field))
        })
    };
    let array = |v: &Value| -> ApiResult<Vec<Value>> {
        v.as_array().cloned().ok_or_else(|| {
            ApiError::validation(format!("${} on '{}' requires an array operand", op, field))
        })
    };
    let boolean = |v: &Value| -> ApiResult<bool> {
        v.as_bool().ok_or_else(|| {
            ApiError::validation(format!("${} on '{}' requires a boolean", op, field))
        })
    };

    Ok(match op {
        "eq" => FieldOp::Eq(scalar(operand)?),
        "ne" => FieldOp::Ne(scalar(operand)?),
        "gt" => FieldOp::Gt(scalar(operand)?),
        "gte" => FieldOp::Gte(scalar(operand)?),
        "lt" => FieldOp::Lt(scalar(operand)?),
        "lte" => FieldOp::Lte(scalar(operand)?),
        "in" => FieldOp::In(array(operand)?),
        "nin" => FieldOp::Nin(array(operand)?),
        "like" => FieldOp::Like(string(operand)?),
        "nlike" => FieldOp::NotLike(string(operand)?),
        "ilike" => FieldOp::ILike(string(operand)?),
        "nilike" => FieldOp::NotILike(string(operand)?),
        "regex" => FieldOp::Regex(string(operand)?),
        "nregex" => FieldOp::NotRegex(string(operand)?),
        "any" => FieldOp::Any(array(operand)?),
        "nany" => FieldOp::NotAny(array(operand)?),
        "all" => FieldOp::All(array(operand)?),
        "nall" => FieldOp::NotAll(array(operand)?),
        "size" => FieldOp::Size(parse_size(field, operand)?),
        "between" => {
            let items = array(operand)?;
            if items.len() != 2 || items.iter().any(|v| v.is_null()) {
                return Err(ApiError::validation(format!(
                    "$between on '{}' requires exactly two non-null elements",
                    field
                )));
            }
            FieldOp::Between(items[0].clone(), items[1].clone())
        }
        "exists" => FieldOp::Exists(boolean(operand)?),
        "null" => FieldOp::Null(boolean(operand)?),
        "find" => FieldOp::Find(string(operand)?),
        "text" => FieldOp::Text(string(operand)?),
        other => {
            return Err(ApiError::validation(format!(
                "unknown operator '${}' on '{}'",
                other, field
            )))
        }
    })
}

/// `$size` takes a number (exact length) or a nested comparison doc.
fn parse_size(field: &str, operand: &Value) -> ApiResult<Vec<SizeCond>> {
    match operand {
        Value::Number(n) => {
            let value = n.as_i64().ok_or_else(|| {
                ApiError::validation(format!("$size on '{}' requires an integer", field))
            })?;
            Ok(vec![SizeCond {
                cmp: CmpOp::Eq,
                value,
            }])
        }
        Value::Object(obj) if !obj.is_empty() => {
            let mut conds = Vec::with_capacity(obj.len());
            for (key, val) in obj {
                let cmp = match key.as_str() {
                    "$eq" => CmpOp::Eq,
                    "$ne" => CmpOp::Ne,
                    "$gt" => CmpOp::Gt,
                    "$gte" => CmpOp::Gte,
                    "$lt" => CmpOp::Lt,
                    "$lte" => CmpOp::Lte,
                    other => {
                        return Err(ApiError::validation(format!(
                            "$size on '{}' does not accept '{}'",
                            field, other
                        )))
                    }
                };
                let value = val.as_i64().ok_or_else(|| {
                    ApiError::validation(format!("$size on '{}' requires integer bounds", field))
                })?;
                conds.push(SizeCond { cmp, value });
            }
            Ok(conds)
        }
        _ => Err(ApiError::validation(format!(
            "$size on '{}' requires a number or comparison doc",
            field
        ))),
    }
}

fn parse_select(value: &Value) -> ApiResult<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| ApiError::validation("select must be an array of field names"))?;
    let mut fields = Vec::with_capacity(items.len());
    for item in items {
        let name = item
            .as_str()
            .ok_or_else(|| ApiError::validation("select entries must be strings"))?;
        validate_identifier(name)?;
        fields.push(name.to_string());
    }
    Ok(fields)
}

fn parse_order(value: &Value) -> ApiResult<Vec<OrderTerm>> {
    let items = value
        .as_array()
        .ok_or_else(|| ApiError::validation("order must be an array"))?;
    let mut terms = Vec::with_capacity(items.len());
    for item in items {
        let term = match item {
            // "name" means ascending
            Value::String(field) => OrderTerm {
                field: field.clone(),
                sort: SortDir::Asc,
            },
            Value::Object(obj) => {
                let field = obj
                    .get("field")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ApiError::validation("order entries require a field"))?;
                let sort = match obj.get("sort").and_then(|v| v.as_str()).unwrap_or("asc") {
                    s if s.eq_ignore_ascii_case("asc") => SortDir::Asc,
                    s if s.eq_ignore_ascii_case("desc") => SortDir::Desc,
                    other => {
                        return Err(ApiError::validation(format!(
                            "order sort must be asc|desc, got '{}'",
                            other
                        )))
                    }
                };
                OrderTerm {
                    field: field.to_string(),
                    sort,
                }
            }
            _ => return Err(ApiError::validation("order entries must be objects")),
        };
        validate_identifier(&term.field)?;
        terms.push(term);
    }
    Ok(terms)
}

fn parse_bound(value: &Value, name: &str) -> ApiResult<i64> {
    let n = value
        .as_i64()
        .ok_or_else(|| ApiError::validation(format!("{} must be an integer", name)))?;
    if n < 0 {
        return Err(ApiError::validation(format!("{} must not be negative", name)));
    }
    Ok(n)
}

fn parse_options(value: &Value, doc: &mut FilterDoc) -> ApiResult<()> {
    let obj = value
        .as_object()
        .ok_or_else(|| ApiError::validation("options must be an object"))?;
    for (key, val) in obj {
        match key.as_str() {
            "trashed" => {
                let mode = val
                    .as_str()
                    .ok_or_else(|| ApiError::validation("options.trashed must be a string"))?;
                doc.trashed = Some(TrashedMode::parse(mode)?);
            }
            other => {
                return Err(ApiError::validation(format!(
                    "unknown filter option '{}'",
                    other
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_equality() {
        let node = parse_where(&json!({"name": "Widget"})).unwrap().unwrap();
        assert_eq!(
            node,
            WhereNode::Field {
                field: "name".into(),
                op: FieldOp::Eq(json!("Widget")),
            }
        );
    }

    #[test]
    fn test_field_map_is_implicit_and() {
        let node = parse_where(&json!({"a": 1, "b": 2})).unwrap().unwrap();
        match node {
            WhereNode::And(nodes) => assert_eq!(nodes.len(), 2),
            other => panic!("expected And, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_array_is_implicit_in() {
        let node = parse_where(&json!({"status": ["a", "b"]})).unwrap().unwrap();
        assert_eq!(
            node,
            WhereNode::Field {
                field: "status".into(),
                op: FieldOp::In(vec![json!("a"), json!("b")]),
            }
        );
    }

    #[test]
    fn test_string_where_is_id_shorthand() {
        let node = parse_where(&json!("abc-123")).unwrap().unwrap();
        assert_eq!(
            node,
            WhereNode::Field {
                field: "id".into(),
                op: FieldOp::Eq(json!("abc-123")),
            }
        );
    }

    #[test]
    fn test_empty_logical_rejected() {
        assert!(parse_where(&json!({"$and": []})).is_err());
        assert!(parse_where(&json!({"$or": []})).is_err());
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = parse_where(&json!({"a": {"$near": 1}})).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_between_shape() {
        assert!(parse_where(&json!({"n": {"$between": [1, 10]}})).is_ok());
        assert!(parse_where(&json!({"n": {"$between": [1]}})).is_err());
        assert!(parse_where(&json!({"n": {"$between": [1, 2, 3]}})).is_err());
        assert!(parse_where(&json!({"n": {"$between": [1, null]}})).is_err());
    }

    #[test]
    fn test_exists_requires_boolean() {
        assert!(parse_where(&json!({"a": {"$exists": true}})).is_ok());
        assert!(parse_where(&json!({"a": {"$exists": 1}})).is_err());
        assert!(parse_where(&json!({"a": {"$null": "yes"}})).is_err());
    }

    #[test]
    fn test_size_forms() {
        let node = parse_where(&json!({"tags": {"$size": 3}})).unwrap().unwrap();
        assert_eq!(
            node,
            WhereNode::Field {
                field: "tags".into(),
                op: FieldOp::Size(vec![SizeCond {
                    cmp: CmpOp::Eq,
                    value: 3
                }]),
            }
        );
        assert!(parse_where(&json!({"tags": {"$size": {"$gt": 1, "$lte": 5}}})).is_ok());
        assert!(parse_where(&json!({"tags": {"$size": "big"}})).is_err());
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        assert!(parse_where(&json!({"bad-name": 1})).is_err());
        assert!(parse_where(&json!({"drop table": 1})).is_err());
        assert!(parse_where(&json!({"1starts_with_digit": 1})).is_err());
    }

    #[test]
    fn test_where_must_be_object_or_string() {
        assert!(parse_where(&json!(42)).is_err());
        assert!(parse_where(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_filter_doc_defaults() {
        let doc = parse_filter(&json!({})).unwrap();
        assert!(doc.where_clause.is_none());
        assert!(doc.select.is_empty());
        assert_eq!(doc.trashed, None);
    }

    #[test]
    fn test_filter_doc_full() {
        let doc = parse_filter(&json!({
            "select": ["name", "price"],
            "where": {"price": {"$gte": 10}},
            "order": [{"field": "price", "sort": "desc"}],
            "limit": 5,
            "offset": 10,
            "options": {"trashed": "include"}
        }))
        .unwrap();
        assert_eq!(doc.select, vec!["name", "price"]);
        assert!(doc.where_clause.is_some());
        assert_eq!(doc.order[0].sort, SortDir::Desc);
        assert_eq!(doc.limit, Some(5));
        assert_eq!(doc.offset, Some(10));
        assert_eq!(doc.trashed, Some(TrashedMode::Include));
    }

    #[test]
    fn test_unknown_filter_key_rejected() {
        assert!(parse_filter(&json!({"wheer": {}})).is_err());
    }

    #[test]
    fn test_negative_limit_rejected() {
        assert!(parse_filter(&json!({"limit": -1})).is_err());
    }

    #[test]
    fn test_nested_logicals() {
        let doc = parse_where(&json!({
            "$or": [
                {"status": "open", "$and": [{"n": {"$gt": 1}}]},
                {"$not": {"status": "closed"}}
            ]
        }))
        .unwrap()
        .unwrap();
        match doc {
            WhereNode::Or(nodes) => assert_eq!(nodes.len(), 2),
            other => panic!("expected Or, got {:?}", other),
        }
    }
}
