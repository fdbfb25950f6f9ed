//! # Tenant & Infrastructure Manager
//!
//! Owns the infrastructure namespace (`tenants`, `tenant_fixtures`) and
//! provisions tenant namespaces: physical storage, seed schema, root
//! user, and registry row. Provisioning is atomic per tenant; the
//! registry never references a half-built namespace.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use uuid::Uuid;

use crate::adapter::{ConnectionPool, Database};
use crate::core::context::ROOT_USER_ID;
use crate::core::error::{ApiError, ApiResult};

use super::seed;
use super::tenant::{validate_tenant_name, CreateTenantRequest, DbType, Tenant, TenantUser};

/// Name of the shared physical database for `relational-shared` tenants.
const SHARED_DATABASE: &str = "strata_shared";

/// Infrastructure table DDL. Idempotent; run on every boot.
const INFRA_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS "tenants" (
  "id" TEXT PRIMARY KEY,
  "name" TEXT NOT NULL,
  "db_type" TEXT NOT NULL,
  "database" TEXT NOT NULL,
  "schema" TEXT NOT NULL,
  "owner_id" TEXT,
  "is_active" INTEGER NOT NULL DEFAULT 1,
  "description" TEXT,
  "created_at" TEXT NOT NULL,
  "updated_at" TEXT NOT NULL,
  "trashed_at" TEXT,
  "deleted_at" TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS "idx_tenants_active_name"
  ON "tenants" ("name") WHERE "deleted_at" IS NULL;

CREATE TABLE IF NOT EXISTS "tenant_fixtures" (
  "id" TEXT PRIMARY KEY,
  "tenant_name" TEXT NOT NULL,
  "fixture" TEXT NOT NULL,
  "checksum" TEXT NOT NULL,
  "applied_at" TEXT NOT NULL
);
"#;

/// Tenant provisioning and registry.
pub struct TenantManager {
    pool: Arc<ConnectionPool>,
    data_dir: PathBuf,
}

impl TenantManager {
    pub fn new(pool: Arc<ConnectionPool>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            data_dir: data_dir.into(),
        }
    }

    /// Idempotent creation of the infrastructure tables.
    pub fn initialize(&self) -> ApiResult<()> {
        let db = self.infra_db(None)?;
        db.execute_batch(INFRA_TABLES_SQL)?;
        tracing::info!(path = %self.infra_path().display(), "infrastructure initialized");
        Ok(())
    }

    /// Create and provision a new tenant. Returns the tenant and its
    /// owner user.
    pub fn create_tenant(&self, request: CreateTenantRequest) -> ApiResult<(Tenant, TenantUser)> {
        validate_tenant_name(&request.name)?;
        let owner_username = request.owner_username.as_deref().unwrap_or("root");

        let infra = self.infra_db(None)?;
        let existing = infra.query(
            "SELECT \"id\" FROM \"tenants\" WHERE \"name\" = ?1 AND \"deleted_at\" IS NULL",
            &[json!(request.name)],
        )?;
        if existing.row_count > 0 {
            return Err(ApiError::TenantExists(request.name));
        }

        let (database, schema) = match request.db_type {
            DbType::RelationalShared => (SHARED_DATABASE.to_string(), request.name.clone()),
            DbType::RelationalFile => (request.name.clone(), "main".to_string()),
        };
        let path = self.namespace_path(request.db_type, &database, &schema);
        if path.exists() {
            return Err(ApiError::TenantExists(format!(
                "{} (storage already present)",
                request.name
            )));
        }

        // Provision the namespace; any failure drops the created storage.
        let owner_id = match self.provision_namespace(&path, &request.name, owner_username) {
            Ok(owner_id) => owner_id,
            Err(e) => {
                self.discard_namespace(&path);
                return Err(e);
            }
        };

        let now = chrono::Utc::now();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name: request.name.clone(),
            db_type: request.db_type,
            database,
            schema,
            owner_id: Some(owner_id),
            is_active: true,
            description: request.description.clone(),
            created_at: now,
            updated_at: now,
            trashed_at: None,
            deleted_at: None,
        };

        if let Err(e) = self.register_tenant(&infra, &tenant) {
            self.discard_namespace(&path);
            return Err(e);
        }

        tracing::info!(tenant = %tenant.name, db_type = tenant.db_type.as_str(), "tenant created");
        let user = TenantUser {
            id: owner_id,
            name: owner_username.to_string(),
            auth: owner_username.to_string(),
            access: if owner_id == ROOT_USER_ID {
                "root".to_string()
            } else {
                "full".to_string()
            },
        };
        Ok((tenant, user))
    }

    /// Deploy the tenant seed schema into a (possibly pre-created)
    /// namespace. Returns the owner's user id.
    pub fn deploy_tenant_schema(
        &self,
        db_type: DbType,
        database: &str,
        schema: &str,
        owner_username: &str,
    ) -> ApiResult<Uuid> {
        let path = self.namespace_path(db_type, database, schema);
        let db = self.pool.database_create(&path, schema, None)?;
        let tx = db.transaction()?;
        let owner_id = seed::deploy(&tx, owner_username)?;
        tx.commit()?;
        Ok(owner_id)
    }

    /// Look up a tenant by name (tombstoned registrations excluded).
    pub fn get_tenant(&self, name: &str) -> ApiResult<Tenant> {
        let infra = self.infra_db(None)?;
        let result = infra.query(
            "SELECT * FROM \"tenants\" WHERE \"name\" = ?1 AND \"deleted_at\" IS NULL",
            &[json!(name)],
        )?;
        let row = result
            .rows
            .first()
            .ok_or_else(|| ApiError::TenantNotFound(name.to_string()))?;
        Tenant::from_record(row)
    }

    /// List registered tenants, newest first.
    pub fn list_tenants(&self) -> ApiResult<Vec<Tenant>> {
        let infra = self.infra_db(None)?;
        let result = infra.query(
            "SELECT * FROM \"tenants\" WHERE \"deleted_at\" IS NULL ORDER BY \"created_at\" DESC",
            &[],
        )?;
        result.rows.iter().map(Tenant::from_record).collect()
    }

    /// Soft-delete a tenant. Physical storage is retained.
    pub fn delete_tenant(&self, name: &str) -> ApiResult<Tenant> {
        let infra = self.infra_db(None)?;
        let now = json!(chrono::Utc::now().to_rfc3339());
        let affected = infra.execute(
            "UPDATE \"tenants\" SET \"is_active\" = 0, \"deleted_at\" = ?1, \"updated_at\" = ?1 \
             WHERE \"name\" = ?2 AND \"deleted_at\" IS NULL",
            &[now, json!(name)],
        )?;
        if affected == 0 {
            return Err(ApiError::TenantNotFound(name.to_string()));
        }
        tracing::info!(tenant = name, "tenant soft-deleted");
        self.get_deleted(name)
    }

    /// Restore a soft-deleted tenant.
    pub fn restore_tenant(&self, name: &str) -> ApiResult<Tenant> {
        let infra = self.infra_db(None)?;
        let now = json!(chrono::Utc::now().to_rfc3339());
        let affected = infra.execute(
            "UPDATE \"tenants\" SET \"is_active\" = 1, \"deleted_at\" = NULL, \"updated_at\" = ?1 \
             WHERE \"name\" = ?2 AND \"deleted_at\" IS NOT NULL",
            &[now, json!(name)],
        )?;
        if affected == 0 {
            return Err(ApiError::TenantNotFound(name.to_string()));
        }
        self.get_tenant(name)
    }

    /// Checkout a database handle scoped to a tenant's namespace.
    pub fn database_for(&self, tenant: &Tenant, deadline: Option<Instant>) -> ApiResult<Database> {
        if tenant.is_deleted() {
            return Err(ApiError::TenantNotFound(tenant.name.clone()));
        }
        if !tenant.is_active {
            return Err(ApiError::AccessDenied(format!(
                "tenant '{}' is inactive",
                tenant.name
            )));
        }
        let path = self.namespace_path(tenant.db_type, &tenant.database, &tenant.schema);
        self.pool.database(&path, &tenant.name, deadline)
    }

    /// Physical location of a namespace.
    pub fn namespace_path(&self, db_type: DbType, database: &str, schema: &str) -> PathBuf {
        match db_type {
            DbType::RelationalShared => self.data_dir.join("shared").join(format!("{}.db", schema)),
            DbType::RelationalFile => self
                .data_dir
                .join("tenants")
                .join(format!("{}.db", database)),
        }
    }

    fn infra_path(&self) -> PathBuf {
        self.data_dir.join("strata.db")
    }

    fn infra_db(&self, deadline: Option<Instant>) -> ApiResult<Database> {
        self.pool
            .database_create(&self.infra_path(), "infrastructure", deadline)
    }

    fn provision_namespace(
        &self,
        path: &Path,
        tenant_name: &str,
        owner_username: &str,
    ) -> ApiResult<Uuid> {
        let db = self.pool.database_create(path, tenant_name, None)?;
        let tx = db.transaction()?;
        let owner_id = seed::deploy(&tx, owner_username)?;
        tx.commit()?;
        Ok(owner_id)
    }

    fn register_tenant(&self, infra: &Database, tenant: &Tenant) -> ApiResult<()> {
        let now = tenant.created_at.to_rfc3339();
        infra.execute(
            "INSERT INTO \"tenants\" (\"id\", \"name\", \"db_type\", \"database\", \"schema\", \
             \"owner_id\", \"is_active\", \"description\", \"created_at\", \"updated_at\") \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            &[
                json!(tenant.id.to_string()),
                json!(tenant.name),
                json!(tenant.db_type.as_str()),
                json!(tenant.database),
                json!(tenant.schema),
                tenant
                    .owner_id
                    .map(|id| json!(id.to_string()))
                    .unwrap_or(serde_json::Value::Null),
                json!(tenant.is_active as i64),
                tenant
                    .description
                    .as_ref()
                    .map(|d| json!(d))
                    .unwrap_or(serde_json::Value::Null),
                json!(now),
                json!(now),
            ],
        )?;
        infra.execute(
            "INSERT INTO \"tenant_fixtures\" (\"id\", \"tenant_name\", \"fixture\", \"checksum\", \"applied_at\") \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            &[
                json!(Uuid::new_v4().to_string()),
                json!(tenant.name),
                json!("core_tables"),
                json!(seed::seed_checksum()),
                json!(now),
            ],
        )?;
        Ok(())
    }

    fn get_deleted(&self, name: &str) -> ApiResult<Tenant> {
        let infra = self.infra_db(None)?;
        let result = infra.query(
            "SELECT * FROM \"tenants\" WHERE \"name\" = ?1 ORDER BY \"updated_at\" DESC",
            &[json!(name)],
        )?;
        let row = result
            .rows
            .first()
            .ok_or_else(|| ApiError::TenantNotFound(name.to_string()))?;
        Tenant::from_record(row)
    }

    fn discard_namespace(&self, path: &Path) {
        self.pool.evict(path);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::error!(path = %path.display(), error = %e, "failed to remove namespace file");
            }
        }
        // WAL sidecar files go with the namespace.
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                let _ = std::fs::remove_file(sidecar);
            }
        }
    }
}
