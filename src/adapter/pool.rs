//! # Connection Pool
//!
//! Process-wide pool of SQLite connections keyed by database file.
//! Handles are checked out per request as [`Database`] values; the pooled
//! connection itself is shared and serialised behind a mutex.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use rusqlite::Connection;

use super::sqlite::{open_connection, Database};
use crate::core::error::{ApiError, ApiResult};

/// Pool of one shared connection per physical database file.
pub struct ConnectionPool {
    conns: RwLock<HashMap<PathBuf, Arc<Mutex<Connection>>>>,
    slow_query_ms: u64,
}

impl ConnectionPool {
    pub fn new(slow_query_ms: u64) -> Self {
        Self {
            conns: RwLock::new(HashMap::new()),
            slow_query_ms,
        }
    }

    /// Checkout a handle for an existing namespace. A missing file is a
    /// schema lookup failure, not a reason to create storage.
    pub fn database(
        &self,
        path: &Path,
        namespace: &str,
        deadline: Option<Instant>,
    ) -> ApiResult<Database> {
        if !self.is_open(path) && !path.exists() {
            return Err(ApiError::SchemaNotFound(namespace.to_string()));
        }
        self.checkout(path, namespace, deadline)
    }

    /// Checkout a handle, creating the database file (and parent
    /// directories) if needed. Used by provisioning only.
    pub fn database_create(
        &self,
        path: &Path,
        namespace: &str,
        deadline: Option<Instant>,
    ) -> ApiResult<Database> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.checkout(path, namespace, deadline)
    }

    /// Drop the pooled connection for a namespace so its file can be
    /// removed (provisioning rollback).
    pub fn evict(&self, path: &Path) {
        if let Ok(mut conns) = self.conns.write() {
            conns.remove(path);
        }
    }

    fn is_open(&self, path: &Path) -> bool {
        self.conns
            .read()
            .map(|conns| conns.contains_key(path))
            .unwrap_or(false)
    }

    fn checkout(
        &self,
        path: &Path,
        namespace: &str,
        deadline: Option<Instant>,
    ) -> ApiResult<Database> {
        if let Some(conn) = self
            .conns
            .read()
            .map_err(|_| ApiError::internal("pool lock poisoned"))?
            .get(path)
        {
            return Ok(Database::new(
                conn.clone(),
                namespace.to_string(),
                deadline,
                self.slow_query_ms,
            ));
        }

        let mut conns = self
            .conns
            .write()
            .map_err(|_| ApiError::internal("pool lock poisoned"))?;
        let conn = match conns.get(path) {
            Some(existing) => existing.clone(),
            None => {
                let opened = Arc::new(Mutex::new(open_connection(path)?));
                conns.insert(path.to_path_buf(), opened.clone());
                tracing::debug!(namespace, path = %path.display(), "opened database");
                opened
            }
        };
        Ok(Database::new(
            conn,
            namespace.to_string(),
            deadline,
            self.slow_query_ms,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_namespace_is_schema_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::new(10_000);
        let err = pool
            .database(&dir.path().join("absent.db"), "absent", None)
            .unwrap_err();
        assert_eq!(err.error_code(), "SCHEMA_NOT_FOUND");
    }

    #[test]
    fn test_create_then_checkout_shares_connection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared/acme.db");
        let pool = ConnectionPool::new(10_000);

        let db = pool.database_create(&path, "acme", None).unwrap();
        db.execute_batch("CREATE TABLE t (\"id\" TEXT)").unwrap();
        db.execute("INSERT INTO t (\"id\") VALUES (?1)", &[json!("a")])
            .unwrap();

        let again = pool.database(&path, "acme", None).unwrap();
        let result = again.query("SELECT * FROM t", &[]).unwrap();
        assert_eq!(result.row_count, 1);
    }

    #[test]
    fn test_evict_releases_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenants/gone.db");
        let pool = ConnectionPool::new(10_000);

        pool.database_create(&path, "gone", None).unwrap();
        pool.evict(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(!path.exists());
    }
}
