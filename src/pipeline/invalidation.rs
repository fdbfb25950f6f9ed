//! # Cache Invalidation Observers
//!
//! Post-phase observers that keep the schema registry and the pattern
//! cache coherent with writes. Invalidation inside a transaction that
//! later rolls back costs one extra reload and nothing else.

use std::sync::Arc;

use crate::adapter::Transaction;
use crate::cache::PatternCache;
use crate::core::context::SystemContext;
use crate::core::error::ApiResult;
use crate::schema::SchemaRegistry;

use super::observer::{Observer, ObserverEvent, Phase, Target};

/// Drops schema cache entries when `models` or `fields` rows change.
pub struct SchemaInvalidationObserver {
    registry: Arc<SchemaRegistry>,
    phase: Phase,
}

impl SchemaInvalidationObserver {
    pub fn new(registry: Arc<SchemaRegistry>, phase: Phase) -> Self {
        Self { registry, phase }
    }
}

impl Observer for SchemaInvalidationObserver {
    fn name(&self) -> &'static str {
        "schema-invalidation"
    }

    fn target(&self) -> Target {
        Target::Wildcard
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn run(
        &self,
        ctx: &SystemContext,
        _tx: &Transaction<'_>,
        event: &mut ObserverEvent<'_>,
    ) -> ApiResult<()> {
        if !matches!(event.schema.table(), "models" | "fields") {
            return Ok(());
        }
        for record in event.records.iter() {
            if let Some(model_name) = record.get("model_name").and_then(|v| v.as_str()) {
                self.registry.invalidate(&ctx.tenant.name, model_name);
            }
        }
        Ok(())
    }
}

/// Drops translated-pattern entries for any model that was written.
pub struct PatternInvalidationObserver {
    cache: Arc<PatternCache>,
    phase: Phase,
}

impl PatternInvalidationObserver {
    pub fn new(cache: Arc<PatternCache>, phase: Phase) -> Self {
        Self { cache, phase }
    }
}

impl Observer for PatternInvalidationObserver {
    fn name(&self) -> &'static str {
        "pattern-invalidation"
    }

    fn target(&self) -> Target {
        Target::Wildcard
    }

    fn phase(&self) -> Phase {
        self.phase
    }

    fn run(
        &self,
        ctx: &SystemContext,
        _tx: &Transaction<'_>,
        event: &mut ObserverEvent<'_>,
    ) -> ApiResult<()> {
        self.cache
            .invalidate_model(&ctx.tenant.name, event.schema.table());
        Ok(())
    }
}
