//! # HTTP Surface
//!
//! REST endpoints over the core: describe (dynamic models), data (record
//! pipeline), find/count/aggregate (query engine), history, saved
//! filters, and the root tenant surface. Routing, authentication, and
//! token issuance live in outer collaborators; requests arrive here with
//! the principal established in headers.

pub mod data_routes;
pub mod describe_routes;
pub mod response;
pub mod tenant_routes;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use axum::Router;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::adapter::ConnectionPool;
use crate::cache::PatternCache;
use crate::config::ServerConfig;
use crate::core::context::{
    AccessLevel, Principal, RequestOptions, SystemContext, TenantRef, TrashedMode, ROOT_USER_ID,
};
use crate::core::error::{ApiError, ApiResult};
use crate::describe::ModelAdmin;
use crate::pipeline::history::HistoryObserver;
use crate::pipeline::invalidation::{PatternInvalidationObserver, SchemaInvalidationObserver};
use crate::pipeline::{Phase, RecordPipeline};
use crate::schema::SchemaRegistry;
use crate::tenancy::TenantManager;

/// Shared application state.
pub struct AppState {
    pub config: ServerConfig,
    pub pool: Arc<ConnectionPool>,
    pub tenants: Arc<TenantManager>,
    pub schemas: Arc<SchemaRegistry>,
    pub pipeline: Arc<RecordPipeline>,
    pub admin: ModelAdmin,
    pub patterns: Arc<PatternCache>,
}

impl AppState {
    /// Wire the full stack: pool, tenant manager, schema registry, and
    /// the pipeline with its standard observers.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let pool = Arc::new(ConnectionPool::new(config.slow_query_ms));
        let tenants = Arc::new(TenantManager::new(pool.clone(), config.data_dir.clone()));
        let schemas = Arc::new(SchemaRegistry::new(Duration::from_secs(
            config.schema_cache_ttl_secs,
        )));
        let patterns = Arc::new(PatternCache::new(
            config.pattern_cache.max_entries,
            Duration::from_secs(config.pattern_cache.ttl_secs),
        ));

        let mut pipeline = RecordPipeline::new(schemas.clone());
        for phase in [Phase::CreatePost, Phase::UpdatePost, Phase::DeletePost] {
            pipeline.register_observer(Arc::new(HistoryObserver::new(phase)));
        }
        for phase in [Phase::CreatePost, Phase::UpdatePost, Phase::DeletePost] {
            pipeline.register_observer(Arc::new(SchemaInvalidationObserver::new(
                schemas.clone(),
                phase,
            )));
        }
        for phase in [Phase::CreatePost, Phase::UpdatePost, Phase::DeletePost] {
            pipeline.register_observer(Arc::new(PatternInvalidationObserver::new(
                patterns.clone(),
                phase,
            )));
        }
        let pipeline = Arc::new(pipeline);
        let admin = ModelAdmin::new(pipeline.clone(), config.allow_model_name_reuse);

        Arc::new(Self {
            config,
            pool,
            tenants,
            schemas,
            pipeline,
            admin,
            patterns,
        })
    }
}

/// Build the API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(describe_routes::routes())
        .merge(data_routes::routes())
        .merge(tenant_routes::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Header carrying the target tenant, set by the outer auth layer.
pub const TENANT_HEADER: &str = "x-strata-tenant";
/// Header carrying the authenticated user id; absent means the tenant
/// root user.
pub const USER_HEADER: &str = "x-strata-user";
/// Header elevating a root principal to the sudo surface.
pub const SUDO_HEADER: &str = "x-strata-sudo";

/// Build the per-request context from headers and query parameters.
pub(crate) fn request_context(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> ApiResult<SystemContext> {
    let tenant_name = headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::validation(format!("missing {} header", TENANT_HEADER)))?;
    let tenant = state.tenants.get_tenant(tenant_name)?;

    let deadline = Instant::now() + Duration::from_millis(state.config.request_timeout_ms);
    let db = state.tenants.database_for(&tenant, Some(deadline))?;

    let principal = match headers.get(USER_HEADER).and_then(|v| v.to_str().ok()) {
        None => Principal::root(),
        Some(raw) => {
            let user_id = uuid::Uuid::parse_str(raw)
                .map_err(|_| ApiError::validation(format!("invalid {} header", USER_HEADER)))?;
            if user_id == ROOT_USER_ID {
                Principal::root()
            } else {
                let rows = db.query(
                    "SELECT \"access\" FROM \"users\" WHERE \"id\" = ?1 \
                     AND \"deleted_at\" IS NULL AND \"trashed_at\" IS NULL",
                    &[json!(user_id.to_string())],
                )?;
                let access = rows
                    .rows
                    .first()
                    .and_then(|r| r.get("access"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ApiError::AccessDenied(format!("unknown user {}", user_id))
                    })?;
                Principal {
                    user_id,
                    access: AccessLevel::parse(access)?,
                }
            }
        }
    };

    let options = parse_options(query)?;
    let mut ctx = SystemContext::new(
        TenantRef {
            name: tenant.name.clone(),
        },
        principal,
        options,
        db,
        Some(deadline),
    );

    if header_is_true(headers, SUDO_HEADER) {
        if principal.access != AccessLevel::Root {
            return Err(ApiError::AccessDenied("sudo requires a root principal".into()));
        }
        ctx = ctx.as_sudo();
    }
    Ok(ctx)
}

fn parse_options(query: &HashMap<String, String>) -> ApiResult<RequestOptions> {
    let mut options = RequestOptions::default();
    for (key, value) in query {
        match key.as_str() {
            "trashed" => options.trashed = TrashedMode::parse(value)?,
            "stat" => options.stat = parse_bool(key, value)?,
            "access" => options.access = parse_bool(key, value)?,
            "include_trashed" => options.include_trashed = parse_bool(key, value)?,
            "pick" => {
                options.pick = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }
            // Unknown query parameters belong to outer layers.
            _ => {}
        }
    }
    if matches!(options.trashed, TrashedMode::Include | TrashedMode::Only) {
        options.include_trashed = true;
    }
    Ok(options)
}

fn parse_bool(key: &str, value: &str) -> ApiResult<bool> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(ApiError::validation(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

fn header_is_true(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_options_defaults() {
        let options = parse_options(&HashMap::new()).unwrap();
        assert_eq!(options.trashed, TrashedMode::Exclude);
        assert!(options.stat);
        assert!(options.access);
        assert!(!options.include_trashed);
        assert!(options.pick.is_empty());
    }

    #[test]
    fn test_parse_options_trashed_implies_include() {
        let mut query = HashMap::new();
        query.insert("trashed".to_string(), "include".to_string());
        let options = parse_options(&query).unwrap();
        assert!(options.include_trashed);
    }

    #[test]
    fn test_parse_options_pick_splits() {
        let mut query = HashMap::new();
        query.insert("pick".to_string(), "name, price".to_string());
        let options = parse_options(&query).unwrap();
        assert_eq!(options.pick, vec!["name", "price"]);
    }

    #[test]
    fn test_parse_bool_rejects_garbage() {
        let mut query = HashMap::new();
        query.insert("stat".to_string(), "maybe".to_string());
        assert!(parse_options(&query).is_err());
    }
}
