//! Error taxonomy for the sync core.
//!
//! Callers match on these variants: `AlreadyRunning` is a recoverable,
//! caller-visible signal (a duplicate trigger, not a job failure), while
//! `InvalidTransition` indicates ledger corruption or a missed recovery step
//! and is never swallowed. `Connector` and `Persistence` are the two ways a
//! run can die; both are recorded on the run and retried through the job
//! state machine rather than inside the orchestrator.

use thiserror::Error;

/// Errors surfaced by the job ledger, version store, and orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A job for this scope is already running. Treat a concurrent trigger
    /// as a duplicate request, not a failure.
    #[error("a sync job is already running for scope '{scope}'")]
    AlreadyRunning { scope: String },

    /// A state-machine transition was attempted from the wrong state.
    /// Indicates a race defect or a missed stale-run recovery.
    #[error("invalid transition for {entity} '{id}': {detail}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        detail: String,
    },

    /// The content stream failed mid-sequence.
    #[error("connector failure: {0}")]
    Connector(String),

    /// A version or chunk set could not be committed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl SyncError {
    /// Short human-readable message suitable for storing on a failed run.
    /// Never a structured trace.
    pub fn run_message(&self) -> String {
        match self {
            SyncError::Connector(msg) => msg.clone(),
            SyncError::Persistence(e) => format!("storage error: {}", e),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_message_is_short() {
        let err = SyncError::Connector("drive listing timed out".to_string());
        assert_eq!(err.run_message(), "drive listing timed out");

        let err = SyncError::AlreadyRunning {
            scope: "acct-1:folder-a".to_string(),
        };
        assert!(err.to_string().contains("acct-1:folder-a"));
    }
}
