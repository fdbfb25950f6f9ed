//! # Tenancy Module
//!
//! Multi-tenant infrastructure: tenant model, registry, provisioning,
//! and the per-tenant seed schema.

pub mod manager;
pub mod seed;
pub mod tenant;

pub use manager::TenantManager;
pub use tenant::{validate_tenant_name, CreateTenantRequest, DbType, Tenant, TenantUser};
