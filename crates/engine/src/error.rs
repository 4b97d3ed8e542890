use tubesync_client::ClientError;
use tubesync_core::{JobId, JobStatus, SourceError};

/// Errors surfaced to callers of [`crate::EngineHandle`].
///
/// Transient producer failures (polls, push channels) never show up here;
/// they are retried and logged inside the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The submitted reference could not be normalized.
    #[error("Invalid source reference: {0}")]
    InvalidSource(#[from] SourceError),

    /// An active job, or a submission in flight, already uses this source.
    #[error("A job for {0} is already active")]
    Duplicate(String),

    /// The job service rejected the request or could not be reached.
    #[error("Job service request failed: {0}")]
    Remote(#[from] ClientError),

    #[error("Job {0} not found")]
    NotFound(JobId),

    /// The action is not allowed in the job's current status.
    #[error("Job {id} is {status}, expected {expected}")]
    InvalidState {
        id: JobId,
        status: JobStatus,
        expected: JobStatus,
    },

    /// The engine task has stopped.
    #[error("Sync engine has shut down")]
    Shutdown,
}

/// Invalid engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got '{value}'")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Invalid job service endpoint: {0}")]
    Endpoint(String),
}
