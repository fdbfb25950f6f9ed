//! # SQL Lowering
//!
//! Renders the typed AST into parameterised SQL. One parameter counter per
//! statement; identifiers are validated and quoted at this boundary. The
//! soft-delete clauses are appended outside the user-visible group.

use serde_json::Value;

use super::ast::{FieldOp, FilterDoc, SortDir, WhereNode};
use super::parse::validate_identifier;
use crate::core::context::TrashedMode;
use crate::core::error::ApiResult;

/// A rendered statement plus its bound parameters, in position order.
#[derive(Debug, Clone)]
pub struct SqlQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Positional parameter accumulator. Callers that splice a filter fragment
/// into a larger statement start the counter after their own parameters.
#[derive(Debug, Default)]
pub struct ParamList {
    params: Vec<Value>,
    next: usize,
}

impl ParamList {
    pub fn new(starting_index: usize) -> Self {
        Self {
            params: Vec::new(),
            next: starting_index.max(1),
        }
    }

    /// Bind one value, yielding its placeholder
    pub fn bind(&mut self, value: Value) -> String {
        let placeholder = format!("?{}", self.next);
        self.next += 1;
        self.params.push(value);
        placeholder
    }

    pub fn next_index(&self) -> usize {
        self.next
    }

    pub fn into_params(self) -> Vec<Value> {
        self.params
    }
}

/// Quote a validated identifier.
pub fn quote_ident(name: &str) -> ApiResult<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name))
}

/// Render a full SELECT for a filter document.
pub fn to_select_sql(table: &str, doc: &FilterDoc, starting_index: usize) -> ApiResult<SqlQuery> {
    let table_sql = quote_ident(table)?;
    let mut params = ParamList::new(starting_index);

    let select_sql = if doc.select.is_empty() {
        "*".to_string()
    } else {
        doc.select
            .iter()
            .map(|f| quote_ident(f))
            .collect::<ApiResult<Vec<_>>>()?
            .join(", ")
    };

    let mut sql = format!("SELECT {} FROM {}", select_sql, table_sql);
    sql.push_str(&where_with_soft_delete(
        &doc.where_clause,
        doc.trashed_mode(),
        &mut params,
    )?);
    sql.push_str(&order_limit_offset(doc, &mut params)?);

    Ok(SqlQuery {
        sql,
        params: params.into_params(),
    })
}

/// Render a COUNT(*) for a filter document. Order and bounds are ignored.
pub fn to_count_sql(table: &str, doc: &FilterDoc, starting_index: usize) -> ApiResult<SqlQuery> {
    let table_sql = quote_ident(table)?;
    let mut params = ParamList::new(starting_index);
    let mut sql = format!("SELECT COUNT(*) AS \"count\" FROM {}", table_sql);
    sql.push_str(&where_with_soft_delete(
        &doc.where_clause,
        doc.trashed_mode(),
        &mut params,
    )?);
    Ok(SqlQuery {
        sql,
        params: params.into_params(),
    })
}

/// Render just the WHERE tail (user predicates + soft-delete clauses) for
/// callers splicing into a larger statement, e.g. `UPDATE … WHERE`.
pub fn to_where_fragment(
    where_clause: &Option<WhereNode>,
    trashed: TrashedMode,
    params: &mut ParamList,
) -> ApiResult<String> {
    where_with_soft_delete(where_clause, trashed, params)
}

fn where_with_soft_delete(
    where_clause: &Option<WhereNode>,
    trashed: TrashedMode,
    params: &mut ParamList,
) -> ApiResult<String> {
    let mut clauses = Vec::new();
    if let Some(node) = where_clause {
        clauses.push(format!("({})", render_node(node, params)?));
    }
    // Tombstoned rows are never visible.
    clauses.push("\"deleted_at\" IS NULL".to_string());
    match trashed {
        TrashedMode::Exclude => clauses.push("\"trashed_at\" IS NULL".to_string()),
        TrashedMode::Include => {}
        TrashedMode::Only => clauses.push("\"trashed_at\" IS NOT NULL".to_string()),
    }
    Ok(format!(" WHERE {}", clauses.join(" AND ")))
}

fn order_limit_offset(doc: &FilterDoc, params: &mut ParamList) -> ApiResult<String> {
    let mut sql = String::new();
    if !doc.order.is_empty() {
        let terms = doc
            .order
            .iter()
            .map(|t| {
                Ok(format!(
                    "{} {}",
                    quote_ident(&t.field)?,
                    match t.sort {
                        SortDir::Asc => "ASC",
                        SortDir::Desc => "DESC",
                    }
                ))
            })
            .collect::<ApiResult<Vec<_>>>()?;
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));
    }
    if let Some(limit) = doc.limit {
        sql.push_str(" LIMIT ");
        sql.push_str(&params.bind(Value::from(limit)));
        // OFFSET is only meaningful under a LIMIT.
        if let Some(offset) = doc.offset {
            sql.push_str(" OFFSET ");
            sql.push_str(&params.bind(Value::from(offset)));
        }
    }
    Ok(sql)
}

fn render_node(node: &WhereNode, params: &mut ParamList) -> ApiResult<String> {
    match node {
        WhereNode::And(nodes) => render_group(nodes, " AND ", false, params),
        WhereNode::Or(nodes) => render_group(nodes, " OR ", false, params),
        WhereNode::Nand(nodes) => render_group(nodes, " AND ", true, params),
        WhereNode::Nor(nodes) => render_group(nodes, " OR ", true, params),
        WhereNode::Not(inner) => Ok(format!("NOT ({})", render_node(inner, params)?)),
        WhereNode::Field { field, op } => render_field(field, op, params),
    }
}

fn render_group(
    nodes: &[WhereNode],
    joiner: &str,
    negated: bool,
    params: &mut ParamList,
) -> ApiResult<String> {
    let parts = nodes
        .iter()
        .map(|n| render_node(n, params))
        .collect::<ApiResult<Vec<_>>>()?;
    let body = format!("({})", parts.join(joiner));
    Ok(if negated { format!("NOT {}", body) } else { body })
}

fn render_field(field: &str, op: &FieldOp, params: &mut ParamList) -> ApiResult<String> {
    let col = quote_ident(field)?;
    Ok(match op {
        FieldOp::Eq(Value::Null) => format!("{} IS NULL", col),
        FieldOp::Eq(v) => format!("{} = {}", col, params.bind(v.clone())),
        FieldOp::Ne(Value::Null) => format!("{} IS NOT NULL", col),
        FieldOp::Ne(v) => format!("{} != {}", col, params.bind(v.clone())),
        FieldOp::Gt(v) => format!("{} > {}", col, params.bind(v.clone())),
        FieldOp::Gte(v) => format!("{} >= {}", col, params.bind(v.clone())),
        FieldOp::Lt(v) => format!("{} < {}", col, params.bind(v.clone())),
        FieldOp::Lte(v) => format!("{} <= {}", col, params.bind(v.clone())),
        // Empty set membership degenerates to a constant, per contract.
        FieldOp::In(items) if items.is_empty() => "(1 = 0)".to_string(),
        FieldOp::In(items) => format!("{} IN ({})", col, bind_list(items, params)),
        FieldOp::Nin(items) if items.is_empty() => "(1 = 1)".to_string(),
        FieldOp::Nin(items) => format!("{} NOT IN ({})", col, bind_list(items, params)),
        FieldOp::Like(p) => format!("{} LIKE {}", col, params.bind(Value::from(p.clone()))),
        FieldOp::NotLike(p) => format!("{} NOT LIKE {}", col, params.bind(Value::from(p.clone()))),
        FieldOp::ILike(p) => format!(
            "LOWER({}) LIKE LOWER({})",
            col,
            params.bind(Value::from(p.clone()))
        ),
        FieldOp::NotILike(p) => format!(
            "LOWER({}) NOT LIKE LOWER({})",
            col,
            params.bind(Value::from(p.clone()))
        ),
        FieldOp::Regex(p) => format!("{} REGEXP {}", col, params.bind(Value::from(p.clone()))),
        FieldOp::NotRegex(p) => format!(
            "({} IS NOT NULL AND NOT ({} REGEXP {}))",
            col,
            col,
            params.bind(Value::from(p.clone()))
        ),
        FieldOp::Any(items) if items.is_empty() => "(1 = 0)".to_string(),
        FieldOp::Any(items) => format!(
            "EXISTS (SELECT 1 FROM json_each({}) WHERE json_each.\"value\" IN ({}))",
            col,
            bind_list(items, params)
        ),
        FieldOp::NotAny(items) if items.is_empty() => "(1 = 1)".to_string(),
        FieldOp::NotAny(items) => format!(
            "NOT EXISTS (SELECT 1 FROM json_each({}) WHERE json_each.\"value\" IN ({}))",
            col,
            bind_list(items, params)
        ),
        FieldOp::All(items) if items.is_empty() => "(1 = 1)".to_string(),
        FieldOp::All(items) => render_all(&col, items, false, params),
        FieldOp::NotAll(items) if items.is_empty() => "(1 = 0)".to_string(),
        FieldOp::NotAll(items) => render_all(&col, items, true, params),
        FieldOp::Size(conds) => {
            let parts: Vec<String> = conds
                .iter()
                .map(|c| {
                    format!(
                        "json_array_length({}) {} {}",
                        col,
                        c.cmp.sql(),
                        params.bind(Value::from(c.value))
                    )
                })
                .collect();
            if parts.len() == 1 {
                parts.into_iter().next().unwrap()
            } else {
                format!("({})", parts.join(" AND "))
            }
        }
        FieldOp::Between(low, high) => format!(
            "{} BETWEEN {} AND {}",
            col,
            params.bind(low.clone()),
            params.bind(high.clone())
        ),
        FieldOp::Exists(true) | FieldOp::Null(false) => format!("{} IS NOT NULL", col),
        FieldOp::Exists(false) | FieldOp::Null(true) => format!("{} IS NULL", col),
        FieldOp::Find(s) | FieldOp::Text(s) => format!(
            "LOWER({}) LIKE LOWER({})",
            col,
            params.bind(Value::from(format!("%{}%", s)))
        ),
    })
}

fn render_all(col: &str, items: &[Value], negated: bool, params: &mut ParamList) -> String {
    let mut distinct: Vec<Value> = Vec::new();
    for item in items {
        if !distinct.contains(item) {
            distinct.push(item.clone());
        }
    }
    let count = distinct.len() as i64;
    let list = bind_list(&distinct, params);
    let body = format!(
        "(SELECT COUNT(DISTINCT json_each.\"value\") FROM json_each({}) WHERE json_each.\"value\" IN ({})) = {}",
        col,
        list,
        params.bind(Value::from(count))
    );
    if negated {
        format!("NOT ({})", body)
    } else {
        body
    }
}

fn bind_list(items: &[Value], params: &mut ParamList) -> String {
    items
        .iter()
        .map(|v| params.bind(v.clone()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::parse::{parse_filter, parse_where};
    use serde_json::json;

    fn select(table: &str, filter: serde_json::Value) -> SqlQuery {
        let doc = parse_filter(&filter).unwrap();
        to_select_sql(table, &doc, 1).unwrap()
    }

    #[test]
    fn test_plain_select_appends_soft_delete() {
        let q = select("products", json!({}));
        assert_eq!(
            q.sql,
            "SELECT * FROM \"products\" WHERE \"deleted_at\" IS NULL AND \"trashed_at\" IS NULL"
        );
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_where_group_is_parenthesised() {
        let q = select("products", json!({"where": {"price": {"$gte": 10}}}));
        assert_eq!(
            q.sql,
            "SELECT * FROM \"products\" WHERE (\"price\" >= ?1) \
             AND \"deleted_at\" IS NULL AND \"trashed_at\" IS NULL"
        );
        assert_eq!(q.params, vec![json!(10)]);
    }

    #[test]
    fn test_trashed_modes() {
        let q = select("t", json!({"options": {"trashed": "include"}}));
        assert_eq!(q.sql, "SELECT * FROM \"t\" WHERE \"deleted_at\" IS NULL");

        let q = select("t", json!({"options": {"trashed": "only"}}));
        assert_eq!(
            q.sql,
            "SELECT * FROM \"t\" WHERE \"deleted_at\" IS NULL AND \"trashed_at\" IS NOT NULL"
        );
    }

    #[test]
    fn test_empty_in_and_nin() {
        let q = select("t", json!({"where": {"a": {"$in": []}}}));
        assert!(q.sql.contains("(1 = 0)"));
        assert!(q.params.is_empty());

        let q = select("t", json!({"where": {"a": {"$nin": []}}}));
        assert!(q.sql.contains("(1 = 1)"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_in_binds_every_element() {
        let q = select("t", json!({"where": {"a": {"$in": ["x", "y", "z"]}}}));
        assert!(q.sql.contains("\"a\" IN (?1, ?2, ?3)"));
        assert_eq!(q.params, vec![json!("x"), json!("y"), json!("z")]);
    }

    #[test]
    fn test_null_equality_maps_to_is_null() {
        let q = select("t", json!({"where": {"a": {"$eq": null}}}));
        assert!(q.sql.contains("\"a\" IS NULL"));
        let q = select("t", json!({"where": {"a": {"$ne": null}}}));
        assert!(q.sql.contains("\"a\" IS NOT NULL"));
    }

    #[test]
    fn test_logical_nesting() {
        let q = select(
            "t",
            json!({"where": {"$or": [{"a": 1}, {"b": {"$lt": 5}}]}}),
        );
        assert!(q.sql.contains("((\"a\" = ?1 OR \"b\" < ?2))"));
        assert_eq!(q.params, vec![json!(1), json!(5)]);
    }

    #[test]
    fn test_nand_nor_negate_groups() {
        let q = select("t", json!({"where": {"$nand": [{"a": 1}, {"b": 2}]}}));
        assert!(q.sql.contains("NOT (\"a\" = ?1 AND \"b\" = ?2)"));

        let q = select("t", json!({"where": {"$nor": [{"a": 1}, {"b": 2}]}}));
        assert!(q.sql.contains("NOT (\"a\" = ?1 OR \"b\" = ?2)"));
    }

    #[test]
    fn test_between_binds_both_bounds() {
        let q = select("t", json!({"where": {"n": {"$between": [5, 10]}}}));
        assert!(q.sql.contains("\"n\" BETWEEN ?1 AND ?2"));
        assert_eq!(q.params, vec![json!(5), json!(10)]);
    }

    #[test]
    fn test_find_wraps_in_wildcards() {
        let q = select("t", json!({"where": {"name": {"$find": "widg"}}}));
        assert!(q.sql.contains("LOWER(\"name\") LIKE LOWER(?1)"));
        assert_eq!(q.params, vec![json!("%widg%")]);
    }

    #[test]
    fn test_size_lowering() {
        let q = select("t", json!({"where": {"tags": {"$size": 3}}}));
        assert!(q.sql.contains("json_array_length(\"tags\") = ?1"));
        assert_eq!(q.params, vec![json!(3)]);
    }

    #[test]
    fn test_any_all_lowering() {
        let q = select("t", json!({"where": {"tags": {"$any": ["a", "b"]}}}));
        assert!(q
            .sql
            .contains("EXISTS (SELECT 1 FROM json_each(\"tags\") WHERE json_each.\"value\" IN (?1, ?2))"));

        let q = select("t", json!({"where": {"tags": {"$all": ["a", "b"]}}}));
        assert!(q.sql.contains("COUNT(DISTINCT json_each.\"value\")"));
        // two elements plus the distinct count
        assert_eq!(q.params, vec![json!("a"), json!("b"), json!(2)]);
    }

    #[test]
    fn test_order_limit_offset() {
        let q = select(
            "t",
            json!({"order": [{"field": "price", "sort": "desc"}, "name"], "limit": 10, "offset": 20}),
        );
        assert!(q.sql.ends_with("ORDER BY \"price\" DESC, \"name\" ASC LIMIT ?1 OFFSET ?2"));
        assert_eq!(q.params, vec![json!(10), json!(20)]);
    }

    #[test]
    fn test_offset_ignored_without_limit() {
        let q = select("t", json!({"offset": 20}));
        assert!(!q.sql.contains("OFFSET"));
        assert!(q.params.is_empty());
    }

    #[test]
    fn test_starting_param_index_offsets_placeholders() {
        let doc = parse_filter(&json!({"where": {"a": 1, "b": 2}})).unwrap();
        let q = to_select_sql("t", &doc, 5).unwrap();
        assert!(q.sql.contains("?5"));
        assert!(q.sql.contains("?6"));
        assert!(!q.sql.contains("?1"));
        assert_eq!(q.params.len(), 2);
    }

    #[test]
    fn test_count_sql() {
        let doc = parse_filter(&json!({"where": {"a": 1}, "limit": 5})).unwrap();
        let q = to_count_sql("t", &doc, 1).unwrap();
        assert_eq!(
            q.sql,
            "SELECT COUNT(*) AS \"count\" FROM \"t\" WHERE (\"a\" = ?1) \
             AND \"deleted_at\" IS NULL AND \"trashed_at\" IS NULL"
        );
    }

    #[test]
    fn test_every_identifier_is_quoted() {
        let q = select(
            "orders",
            json!({
                "select": ["amount", "status"],
                "where": {"$or": [{"amount": {"$gt": 100}}, {"status": ["open", "held"]}]},
                "order": [{"field": "amount", "sort": "desc"}]
            }),
        );
        // No bare identifiers: every name appears double-quoted.
        for name in ["orders", "amount", "status"] {
            assert!(q.sql.contains(&format!("\"{}\"", name)));
        }
        // No literal from the input leaks into the SQL text.
        for literal in ["100", "open", "held"] {
            assert!(!q.sql.contains(literal));
        }
    }

    #[test]
    fn test_not_regex_excludes_nulls() {
        let node = parse_where(&json!({"name": {"$nregex": "^a"}})).unwrap().unwrap();
        let mut params = ParamList::new(1);
        let sql = render_node(&node, &mut params).unwrap();
        assert_eq!(
            sql,
            "(\"name\" IS NOT NULL AND NOT (\"name\" REGEXP ?1))"
        );
    }
}
