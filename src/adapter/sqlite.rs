//! # SQLite Adapter
//!
//! Parameterised execution, transactions, and dynamic value conversion
//! over a pooled SQLite connection. Statements exceeding the slow-query
//! threshold are logged at warn.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use base64::Engine as _;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Value};

use crate::core::error::{ApiError, ApiResult};
use crate::core::record::Record;

/// Result of a query: decoded rows plus the affected/returned row count.
#[derive(Debug, Clone)]
pub struct QueryResult {
    pub rows: Vec<Record>,
    pub row_count: usize,
}

/// A handle over one pooled connection, scoped to a namespace and request.
///
/// Reads and writes lock the connection per statement; a [`Transaction`]
/// holds the lock for its whole scope so no other request can interleave.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    namespace: String,
    deadline: Option<Instant>,
    slow_query_ms: u64,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("namespace", &self.namespace)
            .field("deadline", &self.deadline)
            .field("slow_query_ms", &self.slow_query_ms)
            .finish()
    }
}

impl Database {
    pub(crate) fn new(
        conn: Arc<Mutex<Connection>>,
        namespace: String,
        deadline: Option<Instant>,
        slow_query_ms: u64,
    ) -> Self {
        Self {
            conn,
            namespace,
            deadline,
            slow_query_ms,
        }
    }

    /// Namespace label, used in logs and errors
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Rebind the handle to a request deadline
    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Run a SELECT (or any row-returning statement) with bound parameters
    pub fn query(&self, sql: &str, params: &[Value]) -> ApiResult<QueryResult> {
        self.check_deadline()?;
        let guard = self.lock()?;
        run_query(&guard, sql, params, self.slow_query_ms, &self.namespace)
    }

    /// Run a non-returning statement; yields the affected row count
    pub fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<usize> {
        self.check_deadline()?;
        let guard = self.lock()?;
        run_execute(&guard, sql, params, self.slow_query_ms, &self.namespace)
    }

    /// Run a multi-statement script. Reserved for seed scripts; everything
    /// else goes through `query`/`execute` with bound parameters.
    pub fn execute_batch(&self, sql: &str) -> ApiResult<()> {
        self.check_deadline()?;
        let guard = self.lock()?;
        guard.execute_batch(sql)?;
        Ok(())
    }

    /// Begin a transaction. The returned guard holds the connection for its
    /// whole scope and rolls back on drop unless committed.
    pub fn transaction(&self) -> ApiResult<Transaction<'_>> {
        self.check_deadline()?;
        let guard = self.lock()?;
        if !guard.is_autocommit() {
            return Err(ApiError::internal(format!(
                "nested transaction on namespace {}",
                self.namespace
            )));
        }
        guard.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Transaction {
            guard,
            namespace: self.namespace.clone(),
            deadline: self.deadline,
            slow_query_ms: self.slow_query_ms,
            finished: false,
        })
    }

    fn lock(&self) -> ApiResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ApiError::internal("connection mutex poisoned"))
    }

    fn check_deadline(&self) -> ApiResult<()> {
        check_deadline(self.deadline, &self.namespace)
    }
}

/// Scoped transaction. Holds the connection lock; rolls back on drop
/// unless `commit` was called, so an unwind can never leak an open
/// transaction back to the pool.
pub struct Transaction<'a> {
    guard: MutexGuard<'a, Connection>,
    namespace: String,
    deadline: Option<Instant>,
    slow_query_ms: u64,
    finished: bool,
}

impl Transaction<'_> {
    pub fn query(&self, sql: &str, params: &[Value]) -> ApiResult<QueryResult> {
        check_deadline(self.deadline, &self.namespace)?;
        run_query(&self.guard, sql, params, self.slow_query_ms, &self.namespace)
    }

    pub fn execute(&self, sql: &str, params: &[Value]) -> ApiResult<usize> {
        check_deadline(self.deadline, &self.namespace)?;
        run_execute(&self.guard, sql, params, self.slow_query_ms, &self.namespace)
    }

    pub fn execute_batch(&self, sql: &str) -> ApiResult<()> {
        check_deadline(self.deadline, &self.namespace)?;
        self.guard.execute_batch(sql)?;
        Ok(())
    }

    pub fn commit(mut self) -> ApiResult<()> {
        self.guard.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> ApiResult<()> {
        self.guard.execute_batch("ROLLBACK")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.guard.execute_batch("ROLLBACK") {
                tracing::error!(namespace = %self.namespace, error = %e, "rollback on drop failed");
            } else {
                tracing::debug!(namespace = %self.namespace, "transaction rolled back on drop");
            }
        }
    }
}

/// Open a connection with the standard pragmas and the `regexp()` function.
pub(crate) fn open_connection(path: &std::path::Path) -> ApiResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    register_regexp(&conn)?;
    Ok(conn)
}

/// Register `regexp(pattern, text)` so `col REGEXP ?` works in queries.
fn register_regexp(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: String = ctx.get(0)?;
            let text = match ctx.get_raw(1) {
                ValueRef::Null => return Ok(false),
                ValueRef::Text(t) => String::from_utf8_lossy(t).into_owned(),
                other => match other.as_i64() {
                    Ok(i) => i.to_string(),
                    Err(_) => match other.as_f64() {
                        Ok(f) => f.to_string(),
                        Err(_) => return Ok(false),
                    },
                },
            };
            let re = Regex::new(&pattern)
                .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
            Ok(re.is_match(&text))
        },
    )
}

fn check_deadline(deadline: Option<Instant>, namespace: &str) -> ApiResult<()> {
    if let Some(deadline) = deadline {
        if Instant::now() >= deadline {
            return Err(ApiError::Timeout(format!(
                "request deadline exceeded before statement on {}",
                namespace
            )));
        }
    }
    Ok(())
}

fn run_query(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    slow_query_ms: u64,
    namespace: &str,
) -> ApiResult<QueryResult> {
    let started = Instant::now();
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt.query(rusqlite::params_from_iter(params.iter().map(bind_value)))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Map::new();
        for (i, name) in columns.iter().enumerate() {
            map.insert(name.clone(), column_to_json(row.get_ref(i)?));
        }
        out.push(Record::from_map(map));
    }
    log_slow(started, slow_query_ms, namespace, sql);

    let row_count = out.len();
    Ok(QueryResult {
        rows: out,
        row_count,
    })
}

fn run_execute(
    conn: &Connection,
    sql: &str,
    params: &[Value],
    slow_query_ms: u64,
    namespace: &str,
) -> ApiResult<usize> {
    let started = Instant::now();
    let affected = conn.execute(sql, rusqlite::params_from_iter(params.iter().map(bind_value)))?;
    log_slow(started, slow_query_ms, namespace, sql);
    Ok(affected)
}

fn log_slow(started: Instant, slow_query_ms: u64, namespace: &str, sql: &str) {
    let elapsed = started.elapsed();
    if elapsed.as_millis() as u64 >= slow_query_ms {
        tracing::warn!(
            namespace = %namespace,
            elapsed_ms = elapsed.as_millis() as u64,
            sql,
            "slow statement"
        );
    }
}

/// Tag for the one non-JSON binding: `{"$blob": "<base64>"}` binds as a
/// BLOB. Produced only by [`blob_param`]; the filter parser rejects
/// `$`-prefixed keys as unknown operators, so user documents cannot
/// smuggle the tag in.
const BLOB_TAG: &str = "$blob";

/// Wrap a base64 payload so it binds as raw bytes instead of JSON text.
/// Callers writing `binary`-typed columns go through this; everything
/// else uses plain JSON values.
pub fn blob_param(base64_payload: &str) -> Value {
    serde_json::json!({ BLOB_TAG: base64_payload })
}

/// Convert one JSON parameter into its storage value. Arrays and objects
/// are stored as JSON text; booleans as 0/1; a tagged blob wrapper as
/// raw bytes.
fn bind_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Sql::Integer(i)
            } else {
                Sql::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Sql::Text(s.clone()),
        Value::Object(map) => match decode_blob_tag(map) {
            Some(bytes) => Sql::Blob(bytes),
            None => Sql::Text(value.to_string()),
        },
        other => Sql::Text(other.to_string()),
    }
}

fn decode_blob_tag(map: &Map<String, Value>) -> Option<Vec<u8>> {
    if map.len() != 1 {
        return None;
    }
    let Some(Value::String(payload)) = map.get(BLOB_TAG) else {
        return None;
    };
    base64::engine::general_purpose::STANDARD
        .decode(payload.as_bytes())
        .ok()
}

/// Convert one stored column back to JSON. Blobs come back base64-encoded.
fn column_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(base64::engine::general_purpose::STANDARD.encode(b)),
    }
}
