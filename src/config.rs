//! # Server Configuration
//!
//! Loaded from an optional TOML file, then environment overrides.
//! Validated at boot; nonsense values fail loudly instead of limping.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::{ApiError, ApiResult};

/// Pattern cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternCacheConfig {
    /// Entry lifetime in seconds
    pub ttl_secs: u64,
    /// Maximum entries before LRU eviction
    pub max_entries: usize,
}

impl Default for PatternCacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 1800,
            max_entries: 1000,
        }
    }
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root directory for all physical namespaces
    pub data_dir: PathBuf,
    /// HTTP bind address
    pub bind_addr: String,
    /// Per-request deadline in milliseconds
    pub request_timeout_ms: u64,
    /// Schema cache TTL in seconds
    pub schema_cache_ttl_secs: u64,
    /// Statements slower than this are logged at warn
    pub slow_query_ms: u64,
    /// Allow reusing soft-deleted model names (clears their metadata)
    pub allow_model_name_reuse: bool,
    pub pattern_cache: PatternCacheConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:8100".to_string(),
            request_timeout_ms: 30_000,
            schema_cache_ttl_secs: 30,
            slow_query_ms: 250,
            allow_model_name_reuse: false,
            pattern_cache: PatternCacheConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file (when given), apply env overrides, validate.
    pub fn load(path: Option<&Path>) -> ApiResult<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)
                    .map_err(|e| ApiError::validation(format!("config: {}", e)))?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var("STRATA_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(bind) = std::env::var("STRATA_BIND") {
            self.bind_addr = bind;
        }
    }

    /// Boot-time sanity checks.
    pub fn validate(&self) -> ApiResult<()> {
        self.bind_addr.parse::<SocketAddr>().map_err(|_| {
            ApiError::validation(format!("bind_addr '{}' is not an address", self.bind_addr))
        })?;
        if self.request_timeout_ms == 0 {
            return Err(ApiError::validation("request_timeout_ms must be positive"));
        }
        if self.pattern_cache.max_entries == 0 {
            return Err(ApiError::validation(
                "pattern_cache.max_entries must be positive",
            ));
        }
        Ok(())
    }
}
