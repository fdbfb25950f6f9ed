//! # Aggregation Lowering
//!
//! Renders `{aggregations, group_by?, where?}` documents into grouped
//! aggregate SELECTs with the same binding discipline as the main engine.

use serde_json::Value;

use super::ast::FilterDoc;
use super::parse::validate_identifier;
use super::sql::{quote_ident, ParamList, SqlQuery};
use crate::core::error::{ApiError, ApiResult};

/// Supported aggregation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Distinct,
}

impl AggFunc {
    fn parse(op: &str) -> ApiResult<Self> {
        match op {
            "$sum" => Ok(Self::Sum),
            "$avg" => Ok(Self::Avg),
            "$min" => Ok(Self::Min),
            "$max" => Ok(Self::Max),
            "$count" => Ok(Self::Count),
            "$distinct" => Ok(Self::Distinct),
            other => Err(ApiError::validation(format!(
                "unknown aggregation function '{}'",
                other
            ))),
        }
    }
}

/// One alias → function(field) entry.
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub alias: String,
    pub func: AggFunc,
    pub field: String,
}

/// Parse the `aggregations` map. At least one entry is required.
pub fn parse_aggregations(value: &Value) -> ApiResult<Vec<Aggregation>> {
    let obj = value
        .as_object()
        .ok_or_else(|| ApiError::validation("aggregations must be an object"))?;
    if obj.is_empty() {
        return Err(ApiError::validation("at least one aggregation is required"));
    }

    let mut aggs = Vec::with_capacity(obj.len());
    for (alias, spec) in obj {
        validate_identifier(alias)?;
        let spec = spec.as_object().ok_or_else(|| {
            ApiError::validation(format!("aggregation '{}' must be an object", alias))
        })?;
        if spec.len() != 1 {
            return Err(ApiError::validation(format!(
                "aggregation '{}' must hold exactly one function",
                alias
            )));
        }
        let (op, field) = spec.iter().next().unwrap();
        let func = AggFunc::parse(op)?;
        let field = field.as_str().ok_or_else(|| {
            ApiError::validation(format!("aggregation '{}' field must be a string", alias))
        })?;
        if field == "*" {
            if func != AggFunc::Count {
                return Err(ApiError::validation(format!(
                    "aggregation '{}': '*' is only valid for $count",
                    alias
                )));
            }
        } else {
            validate_identifier(field)?;
        }
        aggs.push(Aggregation {
            alias: alias.clone(),
            func,
            field: field.to_string(),
        });
    }
    Ok(aggs)
}

/// Parse the optional `group_by` list of column names.
pub fn parse_group_by(value: Option<&Value>) -> ApiResult<Vec<String>> {
    let Some(value) = value else {
        return Ok(Vec::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| ApiError::validation("group_by must be an array"))?;
    let mut cols = Vec::with_capacity(items.len());
    for item in items {
        let name = item
            .as_str()
            .ok_or_else(|| ApiError::validation("group_by entries must be strings"))?;
        validate_identifier(name)?;
        cols.push(name.to_string());
    }
    Ok(cols)
}

/// Render the aggregate SELECT. Group columns are prepended to the select
/// list; WHERE handling (soft delete included) matches the main engine.
pub fn to_aggregate_sql(
    table: &str,
    doc: &FilterDoc,
    aggregations: &[Aggregation],
    group_by: &[String],
    starting_index: usize,
) -> ApiResult<SqlQuery> {
    if aggregations.is_empty() {
        return Err(ApiError::validation("at least one aggregation is required"));
    }
    let table_sql = quote_ident(table)?;
    let mut params = ParamList::new(starting_index);

    let mut select_parts = Vec::with_capacity(group_by.len() + aggregations.len());
    for col in group_by {
        select_parts.push(quote_ident(col)?);
    }
    for agg in aggregations {
        let alias = quote_ident(&agg.alias)?;
        let expr = match (agg.func, agg.field.as_str()) {
            (AggFunc::Count, "*") => "COUNT(*)".to_string(),
            (AggFunc::Count, field) => format!("COUNT({})", quote_ident(field)?),
            (AggFunc::Distinct, field) => format!("COUNT(DISTINCT {})", quote_ident(field)?),
            (AggFunc::Sum, field) => format!("SUM({})", quote_ident(field)?),
            (AggFunc::Avg, field) => format!("AVG({})", quote_ident(field)?),
            (AggFunc::Min, field) => format!("MIN({})", quote_ident(field)?),
            (AggFunc::Max, field) => format!("MAX({})", quote_ident(field)?),
        };
        select_parts.push(format!("{} AS {}", expr, alias));
    }

    let mut sql = format!("SELECT {} FROM {}", select_parts.join(", "), table_sql);
    sql.push_str(&super::sql::to_where_fragment(
        &doc.where_clause,
        doc.trashed_mode(),
        &mut params,
    )?);

    if !group_by.is_empty() {
        let cols = group_by
            .iter()
            .map(|c| quote_ident(c))
            .collect::<ApiResult<Vec<_>>>()?;
        sql.push_str(" GROUP BY ");
        sql.push_str(&cols.join(", "));
    }

    Ok(SqlQuery {
        sql,
        params: params.into_params(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse::parse_filter;
    use serde_json::json;

    #[test]
    fn test_sum_and_count() {
        let aggs = parse_aggregations(&json!({
            "total": {"$sum": "amount"},
            "n": {"$count": "*"}
        }))
        .unwrap();
        let doc = parse_filter(&json!({})).unwrap();
        let q = to_aggregate_sql("orders", &doc, &aggs, &[], 1).unwrap();
        assert!(q.sql.contains("SUM(\"amount\") AS \"total\""));
        assert!(q.sql.contains("COUNT(*) AS \"n\""));
        assert!(q.sql.contains("FROM \"orders\""));
        assert!(q.sql.contains("\"deleted_at\" IS NULL"));
    }

    #[test]
    fn test_distinct_renders_count_distinct() {
        let aggs = parse_aggregations(&json!({"uniq": {"$distinct": "status"}})).unwrap();
        let doc = parse_filter(&json!({})).unwrap();
        let q = to_aggregate_sql("orders", &doc, &aggs, &[], 1).unwrap();
        assert!(q.sql.contains("COUNT(DISTINCT \"status\") AS \"uniq\""));
    }

    #[test]
    fn test_group_by_prepended() {
        let aggs = parse_aggregations(&json!({"total": {"$sum": "amount"}})).unwrap();
        let doc = parse_filter(&json!({"where": {"amount": {"$gte": 100}}})).unwrap();
        let group = parse_group_by(Some(&json!(["status"]))).unwrap();
        let q = to_aggregate_sql("orders", &doc, &aggs, &group, 1).unwrap();
        assert!(q
            .sql
            .starts_with("SELECT \"status\", SUM(\"amount\") AS \"total\" FROM \"orders\""));
        assert!(q.sql.ends_with("GROUP BY \"status\""));
        assert_eq!(q.params, vec![json!(100)]);
    }

    #[test]
    fn test_unknown_function_rejected() {
        let err = parse_aggregations(&json!({"x": {"$median": "amount"}})).unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_empty_aggregations_rejected() {
        assert!(parse_aggregations(&json!({})).is_err());
    }

    #[test]
    fn test_star_only_for_count() {
        assert!(parse_aggregations(&json!({"x": {"$sum": "*"}})).is_err());
    }

    #[test]
    fn test_bad_alias_rejected() {
        assert!(parse_aggregations(&json!({"bad alias": {"$sum": "amount"}})).is_err());
    }
}
