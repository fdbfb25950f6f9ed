//! # Core Module
//!
//! Shared building blocks: the unified error type, the per-request
//! context, and the record model.

pub mod context;
pub mod error;
pub mod record;

pub use context::{
    AccessLevel, Principal, RequestOptions, SystemContext, TenantRef, TrashedMode, ROOT_USER_ID,
};
pub use error::{ApiError, ApiResult, ErrorKind};
pub use record::Record;
