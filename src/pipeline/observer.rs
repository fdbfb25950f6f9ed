//! # Observer Registry
//!
//! Observers are registered against a `(model, phase)` pair and run in
//! insertion order inside the batch transaction; wildcard observers run
//! before model-specific ones. A pre-phase observer may raise to abort
//! the whole batch.

use std::sync::Arc;

use crate::adapter::Transaction;
use crate::core::context::SystemContext;
use crate::core::error::ApiResult;
use crate::core::record::Record;
use crate::schema::Schema;

/// Pipeline operation, carried on every observer event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Revert,
    Access,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Revert => "revert",
            Self::Access => "access",
        }
    }

    /// The observer phases this operation runs. Revert and access edits
    /// flow through the update phases.
    pub fn phases(&self) -> (Phase, Phase) {
        match self {
            Self::Create => (Phase::CreatePre, Phase::CreatePost),
            Self::Delete => (Phase::DeletePre, Phase::DeletePost),
            Self::Update | Self::Revert | Self::Access => (Phase::UpdatePre, Phase::UpdatePost),
        }
    }
}

/// Observer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    CreatePre,
    CreatePost,
    UpdatePre,
    UpdatePost,
    DeletePre,
    DeletePost,
}

/// Observer target: one model or every model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Wildcard,
    Model(String),
}

impl Target {
    fn matches(&self, model: &str) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Model(name) => name == model,
        }
    }
}

/// The batch an observer sees. `records` is the post-operation state;
/// `previous` carries the fetched rows for update/delete operations.
pub struct ObserverEvent<'a> {
    pub operation: Operation,
    pub schema: &'a Schema,
    pub records: &'a mut Vec<Record>,
    pub previous: Option<&'a [Record]>,
}

/// A pipeline hook.
pub trait Observer: Send + Sync {
    fn name(&self) -> &'static str;
    fn target(&self) -> Target;
    fn phase(&self) -> Phase;
    fn run(
        &self,
        ctx: &SystemContext,
        tx: &Transaction<'_>,
        event: &mut ObserverEvent<'_>,
    ) -> ApiResult<()>;
}

/// Stable-ordered observer registry.
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<Arc<dyn Observer>>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn Observer>) {
        tracing::debug!(observer = observer.name(), "observer registered");
        self.observers.push(observer);
    }

    /// Observers for `(model, phase)`: wildcard first, then
    /// model-specific, each group in insertion order.
    pub fn select(&self, model: &str, phase: Phase) -> Vec<Arc<dyn Observer>> {
        let mut selected: Vec<Arc<dyn Observer>> = self
            .observers
            .iter()
            .filter(|o| o.phase() == phase && o.target() == Target::Wildcard)
            .cloned()
            .collect();
        selected.extend(
            self.observers
                .iter()
                .filter(|o| o.phase() == phase && o.target() != Target::Wildcard)
                .filter(|o| o.target().matches(model))
                .cloned(),
        );
        selected
    }
}
