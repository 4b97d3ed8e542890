use crate::status::JobStatus;

/// A status change outside the lifecycle state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Rejected source reference on submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("Source URL must not be empty")]
    Empty,

    #[error("Source URL is not a valid URL: {0}")]
    Malformed(String),

    #[error("Source URL must use http or https, got: '{0}'")]
    UnsupportedScheme(String),
}
