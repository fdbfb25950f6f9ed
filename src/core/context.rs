//! # Per-Request Context
//!
//! Every core call receives an explicit [`SystemContext`]: the target
//! tenant, the authenticated principal, the request options, and the
//! database handle scoped to the tenant's namespace. Surfaces multiplex
//! contexts per request, so nothing here lives in task-local state.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapter::Database;
use crate::core::error::{ApiError, ApiResult};

/// The reserved id of every tenant's root user.
pub const ROOT_USER_ID: Uuid = Uuid::nil();

/// Coarse per-tenant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    Root,
    Full,
    Edit,
    Read,
    Deny,
}

impl AccessLevel {
    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "root" => Ok(Self::Root),
            "full" => Ok(Self::Full),
            "edit" => Ok(Self::Edit),
            "read" => Ok(Self::Read),
            "deny" => Ok(Self::Deny),
            other => Err(ApiError::validation(format!("unknown access level '{}'", other))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Full => "full",
            Self::Edit => "edit",
            Self::Read => "read",
            Self::Deny => "deny",
        }
    }

    /// Whether this role may read records at all
    pub fn can_read(&self) -> bool {
        !matches!(self, Self::Deny)
    }

    /// Whether this role may write records
    pub fn can_write(&self) -> bool {
        matches!(self, Self::Root | Self::Full | Self::Edit)
    }

    /// Whether this role may edit record ACLs and model definitions
    pub fn can_administer(&self) -> bool {
        matches!(self, Self::Root | Self::Full)
    }
}

/// The authenticated principal, as established by the outer auth layer.
#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub user_id: Uuid,
    pub access: AccessLevel,
}

impl Principal {
    /// The tenant root user
    pub fn root() -> Self {
        Self {
            user_id: ROOT_USER_ID,
            access: AccessLevel::Root,
        }
    }
}

/// Soft-delete visibility for reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrashedMode {
    #[default]
    Exclude,
    Include,
    Only,
}

impl TrashedMode {
    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "exclude" => Ok(Self::Exclude),
            "include" => Ok(Self::Include),
            "only" => Ok(Self::Only),
            other => Err(ApiError::validation(format!(
                "trashed option must be exclude|include|only, got '{}'",
                other
            ))),
        }
    }
}

/// Per-request options carried by the context.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    /// Soft-delete visibility (default: exclude)
    pub trashed: TrashedMode,
    /// Include stat columns in responses (default: true)
    pub stat: bool,
    /// Include ACL columns in responses (default: true)
    pub access: bool,
    /// Required for revert operations
    pub include_trashed: bool,
    /// Projection paths applied after filtering
    pub pick: Vec<String>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            trashed: TrashedMode::Exclude,
            stat: true,
            access: true,
            include_trashed: false,
            pick: Vec::new(),
        }
    }
}

/// Reference to the tenant a request targets.
#[derive(Debug, Clone)]
pub struct TenantRef {
    pub name: String,
}

/// The explicit per-request context flowed through every core call.
#[derive(Clone)]
pub struct SystemContext {
    pub tenant: TenantRef,
    pub principal: Principal,
    pub options: RequestOptions,
    pub deadline: Option<Instant>,
    /// Elevated surface: bypasses system-model protection and record ACLs
    pub sudo: bool,
    db: Database,
}

impl SystemContext {
    pub fn new(
        tenant: TenantRef,
        principal: Principal,
        options: RequestOptions,
        db: Database,
        deadline: Option<Instant>,
    ) -> Self {
        let db = db.with_deadline(deadline);
        Self {
            tenant,
            principal,
            options,
            deadline,
            sudo: false,
            db,
        }
    }

    /// The tenant-scoped database handle
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// An elevated copy for internal metadata writes
    pub fn as_sudo(&self) -> Self {
        let mut ctx = self.clone();
        ctx.sudo = true;
        ctx
    }

    /// Whether record ACLs and model protection flags are bypassed.
    /// System-model protection is stricter: it checks `sudo` alone.
    pub fn is_elevated(&self) -> bool {
        self.sudo || self.principal.access == AccessLevel::Root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_level_parse() {
        assert_eq!(AccessLevel::parse("root").unwrap(), AccessLevel::Root);
        assert_eq!(AccessLevel::parse("deny").unwrap(), AccessLevel::Deny);
        assert!(AccessLevel::parse("admin").is_err());
    }

    #[test]
    fn test_access_level_capabilities() {
        assert!(AccessLevel::Read.can_read());
        assert!(!AccessLevel::Read.can_write());
        assert!(AccessLevel::Edit.can_write());
        assert!(!AccessLevel::Edit.can_administer());
        assert!(AccessLevel::Full.can_administer());
        assert!(!AccessLevel::Deny.can_read());
    }

    #[test]
    fn test_trashed_mode_parse() {
        assert_eq!(TrashedMode::parse("only").unwrap(), TrashedMode::Only);
        assert!(TrashedMode::parse("all").is_err());
        assert_eq!(TrashedMode::default(), TrashedMode::Exclude);
    }

    #[test]
    fn test_root_principal() {
        let p = Principal::root();
        assert_eq!(p.user_id, ROOT_USER_ID);
        assert_eq!(p.access, AccessLevel::Root);
    }
}
