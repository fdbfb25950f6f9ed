//! # Filter AST
//!
//! Typed form of the document filter language. Input documents are parsed
//! into these nodes first; SQL is only ever rendered from the typed form,
//! which makes the everything-is-bound property structural.

use serde_json::Value;

use crate::core::context::TrashedMode;

/// A parsed filter document: `{select?, where?, order?, limit?, offset?, options?}`.
#[derive(Debug, Clone, Default)]
pub struct FilterDoc {
    pub select: Vec<String>,
    pub where_clause: Option<WhereNode>,
    pub order: Vec<OrderTerm>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    /// Soft-delete visibility; `None` falls back to the request option
    pub trashed: Option<TrashedMode>,
}

impl FilterDoc {
    /// Effective soft-delete mode
    pub fn trashed_mode(&self) -> TrashedMode {
        self.trashed.unwrap_or_default()
    }
}

/// One ORDER BY term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub field: String,
    pub sort: SortDir,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

/// A WHERE node: a logical combinator or one field predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereNode {
    And(Vec<WhereNode>),
    Or(Vec<WhereNode>),
    Nand(Vec<WhereNode>),
    Nor(Vec<WhereNode>),
    Not(Box<WhereNode>),
    Field { field: String, op: FieldOp },
}

/// Comparison used by `$size` conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CmpOp {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// One condition on an array length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeCond {
    pub cmp: CmpOp,
    pub value: i64,
}

/// One field predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Like(String),
    NotLike(String),
    ILike(String),
    NotILike(String),
    Regex(String),
    NotRegex(String),
    Any(Vec<Value>),
    NotAny(Vec<Value>),
    All(Vec<Value>),
    NotAll(Vec<Value>),
    Size(Vec<SizeCond>),
    Between(Value, Value),
    Exists(bool),
    Null(bool),
    Find(String),
    Text(String),
}
