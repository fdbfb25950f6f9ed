//! # Shared Data-Access Adapter
//!
//! The only layer that touches the backing store and its SQL dialect.
//! Every other component is dialect-neutral and reaches the store through
//! the [`Database`] handle.

pub mod pool;
pub mod sqlite;

pub use pool::ConnectionPool;
pub use sqlite::{blob_param, Database, QueryResult, Transaction};
