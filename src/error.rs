//! Error taxonomy for the automation core.
//!
//! Browser-interaction failures are normalized into [`crate::job::ActionOutcome`]
//! at the executor boundary; these variants cover everything that can go wrong
//! before that normalization happens, plus the infrastructure failures
//! (database, cleanup) that surface through `Result`.

use std::time::Duration;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing input, rejected synchronously before any browser work.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The pre-check search result does not match the requested account.
    /// Raised before any mutating step has run.
    #[error("target account mismatch: {0}")]
    TargetMismatch(String),

    /// The mutating submission ran but no recognizable confirmation signal
    /// was found within the bounded wait. Distinct from a confirmed failure.
    #[error("could not determine submission outcome: {0}")]
    Indeterminate(String),

    /// A browser resource refused to close during a cleanup sweep.
    #[error("resource close failed: {0}")]
    ResourceLeak(String),

    /// A single browser interaction exceeded its bound.
    #[error("browser step timed out after {0:?}")]
    StepTimeout(Duration),

    /// The full cleanup sweep exceeded its bound.
    #[error("cleanup timed out after {0:?}")]
    CleanupTimeout(Duration),

    #[error("job not found: {0}")]
    JobNotFound(String),

    /// Cancel was requested for a job already in a terminal state. Surfaced
    /// as an explicit error because cancelling a finished job is a caller
    /// logic error, not a no-op.
    #[error("job {job_id} is {state} and can no longer be cancelled")]
    NotCancellable { job_id: String, state: String },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("browser error: {0}")]
    Browser(String),
}

impl Error {
    /// Whether the outcome of the action is unknown rather than a confirmed
    /// failure. Audit rows distinguish the two.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Error::Indeterminate(_))
    }
}
