//! Job-level error types

use std::time::Duration;

/// Failure of one reconciliation job.
///
/// Always delivered as a value on the job's response channel, never dropped.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Failure from rendering, applying or a lifecycle hook
    #[error("{0}")]
    Common(#[from] manifold_common::Error),

    /// The Manifest has no namespace
    #[error("missing namespace on Manifest")]
    MissingNamespace,

    /// The job queue was closed before the job could be submitted
    #[error("job queue is closed")]
    QueueClosed,

    /// No result arrived within the caller's deadline
    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    /// The worker dropped the response channel without answering
    #[error("job was dropped without a result")]
    Dropped,

    /// The handler failed unexpectedly (for example it panicked)
    #[error("internal job error: {0}")]
    Internal(String),
}

impl JobError {
    /// Short reason recorded in the Manifest status
    pub fn status_message(&self) -> String {
        self.to_string()
    }

    /// False when only a change to the Manifest or its content can help
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::Common(e) => e.is_retryable(),
            JobError::MissingNamespace => false,
            JobError::QueueClosed
            | JobError::Timeout(_)
            | JobError::Dropped
            | JobError::Internal(_) => true,
        }
    }
}
