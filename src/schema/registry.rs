//! # Schema Registry
//!
//! Process-wide cache of model schemas keyed by `(tenant, model)`.
//! Entries are invalidated on every pipeline write to `models`/`fields`
//! and expire on TTL so a lost invalidation cannot pin a stale snapshot.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde_json::json;

use crate::core::context::SystemContext;
use crate::core::error::{ApiError, ApiResult};

use super::definition::{FieldDef, ModelDef};
use super::validator::Schema;

struct CacheEntry {
    schema: Arc<Schema>,
    fetched_at: Instant,
}

/// Cached schema lookup.
pub struct SchemaRegistry {
    cache: RwLock<HashMap<(String, String), CacheEntry>>,
    ttl: Duration,
}

impl SchemaRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Resolve the schema for a model, from cache or storage.
    pub fn to_schema(&self, ctx: &SystemContext, model_name: &str) -> ApiResult<Arc<Schema>> {
        crate::filter::validate_identifier(model_name)?;
        let key = (ctx.tenant.name.clone(), model_name.to_string());

        if let Ok(cache) = self.cache.read() {
            if let Some(entry) = cache.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(entry.schema.clone());
                }
            }
        }

        let schema = Arc::new(self.load(ctx, model_name)?);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(
                key,
                CacheEntry {
                    schema: schema.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        Ok(schema)
    }

    /// Load directly from storage, bypassing the cache.
    pub fn load(&self, ctx: &SystemContext, model_name: &str) -> ApiResult<Schema> {
        let db = ctx.db();
        let models = db.query(
            "SELECT * FROM \"models\" WHERE \"model_name\" = ?1 \
             AND \"deleted_at\" IS NULL AND \"trashed_at\" IS NULL",
            &[json!(model_name)],
        )?;
        let model_row = models
            .rows
            .first()
            .ok_or_else(|| ApiError::ModelNotFound(model_name.to_string()))?;
        let model = ModelDef::from_record(model_row)?;

        let fields = db.query(
            "SELECT * FROM \"fields\" WHERE \"model_name\" = ?1 \
             AND \"deleted_at\" IS NULL AND \"trashed_at\" IS NULL \
             ORDER BY \"created_at\", \"field_name\"",
            &[json!(model_name)],
        )?;
        let fields = fields
            .rows
            .iter()
            .map(FieldDef::from_record)
            .collect::<ApiResult<Vec<_>>>()?;

        Ok(Schema::new(model, fields))
    }

    /// Drop one cached entry.
    pub fn invalidate(&self, tenant: &str, model_name: &str) {
        if let Ok(mut cache) = self.cache.write() {
            cache.remove(&(tenant.to_string(), model_name.to_string()));
        }
        tracing::debug!(tenant, model = model_name, "schema cache invalidated");
    }

    /// Drop every cached entry for a tenant.
    pub fn invalidate_tenant(&self, tenant: &str) {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|(t, _), _| t != tenant);
        }
    }
}
