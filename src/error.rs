//! Typed error taxonomy for the scheduling/dispatch core.
//!
//! `anyhow` is still used at the outward CLI/tool boundary (see
//! `cli/mod.rs`, `tools/builtins/*.rs`); this module gives the core
//! components (store, bus, pool, scheduler) a closed set of error
//! kinds that callers can match on.

use thiserror::Error;

/// The six error kinds the scheduling core can produce.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed calendar expression, invariant violation, empty
    /// required field, malformed `session_id`, unsupported tool.
    #[error("validation error: {0}")]
    Validation(String),

    /// `RemoveJob`/`GetJob` on an unknown id.
    #[error("not found: {0}")]
    NotFound(String),

    /// `Start` when already started, `Stop` when not started.
    #[error("invalid state: {0}")]
    State(String),

    /// I/O or encoding failure on the job store.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Bus publication failed, or payload decode failed inside a worker.
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Context cancellation surfaced from a task or a submission.
    #[error("cancelled")]
    Cancellation,
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn dispatch(msg: impl Into<String>) -> Self {
        Self::Dispatch(msg.into())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
