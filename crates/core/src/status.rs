//! Job lifecycle status and the transition rules between statuses.
//!
//! `Pending -> InProgress -> {Complete, Failed}`. Updates are sampled by two
//! independent channels, so a forward jump that skips `InProgress` is
//! accepted. `Failed -> Pending` is only reachable through a user retry.

use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

/// Remote job status as tracked by the engine.
///
/// Deserializes both the canonical names and the names used by the
/// download service (`DOWNLOADING`, `DOWNLOADED`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    #[serde(alias = "DOWNLOADING", alias = "RUNNING")]
    InProgress,
    #[serde(alias = "DOWNLOADED", alias = "COMPLETED")]
    Complete,
    Failed,
}

/// What caused a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    /// Observed from the remote service (snapshot or push).
    Remote,
    /// Explicit user action, i.e. retrying a failed job.
    UserRetry,
}

impl JobStatus {
    /// Position along the lifecycle. Both terminal states share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::InProgress => 1,
            JobStatus::Complete | JobStatus::Failed => 2,
        }
    }

    /// `Complete` and `Failed` end automatic synchronization for a job.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Whether `next` is strictly further along the lifecycle than `self`.
    pub fn is_forward(self, next: JobStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validate a status change.
///
/// Staying in the same status is always allowed (it is a no-op).
pub fn check_transition(
    from: JobStatus,
    to: JobStatus,
    cause: TransitionCause,
) -> Result<(), TransitionError> {
    if from == to || from.is_forward(to) {
        return Ok(());
    }
    match (from, to, cause) {
        (JobStatus::Failed, JobStatus::Pending, TransitionCause::UserRetry) => Ok(()),
        _ => Err(TransitionError { from, to }),
    }
}
