//! Scheduler Adapter — the narrow facade collaborators (CLI, tools,
//! gateway handlers) are meant to call through instead of touching the
//! [`Scheduler`] or [`JobStore`] directly.
//!
//! Mirrors the shape of `tools::builtins::cron`'s helpers elsewhere in
//! this crate (`create_cron_job`, `delete_cron_job`, `list_cron_jobs`),
//! generalized to the five verbs this crate's core actually needs.

use std::sync::Arc;

use crate::error::CoreResult;
use crate::scheduler::core::Scheduler;
use crate::store::Job;

/// Thin, cloneable facade over a running [`Scheduler`].
#[derive(Clone)]
pub struct Adapter {
    scheduler: Arc<Scheduler>,
}

/// Global adapter instance, set once at daemon startup so CLI
/// subcommands, agent-callable tools, and gateway handlers can reach
/// the running core without threading it through every call site —
/// the same shape as `legacy::scheduler_handle_ref`.
static ADAPTER: tokio::sync::OnceCell<Adapter> = tokio::sync::OnceCell::const_new();

/// Store the adapter globally. Called once during daemon startup.
pub fn set_adapter(adapter: Adapter) {
    let _ = ADAPTER.set(adapter);
}

/// The global adapter, if the scheduling core has been started.
pub fn adapter_ref() -> Option<&'static Adapter> {
    ADAPTER.get()
}

impl Adapter {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }

    /// Validate, persist, and register `job`, replacing any existing
    /// job with the same id.
    pub async fn add_job(&self, job: Job) -> CoreResult<()> {
        self.scheduler.add_job(job).await
    }

    /// Remove a job from the live registry and the store.
    pub async fn remove_job(&self, id: &str) -> CoreResult<()> {
        self.scheduler.remove_job(id).await
    }

    /// Remove a job from the store only, leaving the live registry
    /// untouched. Useful for pruning storage after the registry has
    /// already dropped a job (e.g. an executed one-shot a caller wants
    /// gone immediately rather than waiting for the cleanup sweep).
    pub async fn remove_from_storage(&self, id: &str) -> CoreResult<()> {
        self.scheduler.store().remove(id).await
    }

    /// The durable job set, read straight from storage rather than the
    /// in-memory registry, so callers see exactly what a restart would
    /// rehydrate.
    pub async fn list_jobs(&self) -> CoreResult<Vec<Job>> {
        self.scheduler.store().load().await
    }

    /// Append a job record to storage without registering it with the
    /// live scheduler. Used for bulk imports / migrations where the
    /// caller will trigger a scheduler reload separately.
    pub async fn append_job(&self, job: Job) -> CoreResult<()> {
        self.scheduler.store().append(&job).await
    }
}
