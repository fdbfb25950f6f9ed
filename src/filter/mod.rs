//! # Filter / Query Engine
//!
//! Translates document-style filter expressions into parameterised SQL.
//! Input is parsed to a typed AST ([`ast`]), then lowered ([`sql`],
//! [`aggregate`]) with a single parameter counter and identifier
//! validation at the boundary, so every literal is a bound parameter by
//! construction.

pub mod aggregate;
pub mod ast;
pub mod parse;
pub mod sql;

pub use aggregate::{parse_aggregations, parse_group_by, to_aggregate_sql, AggFunc, Aggregation};
pub use ast::{FieldOp, FilterDoc, OrderTerm, SortDir, WhereNode};
pub use parse::{parse_filter, parse_where, validate_identifier};
pub use sql::{quote_ident, to_count_sql, to_select_sql, to_where_fragment, ParamList, SqlQuery};
