//! The job record held by the store and its transfer progress.

use serde::{Deserialize, Serialize};

use crate::status::JobStatus;
use crate::types::{JobId, Timestamp};

/// Transfer progress of a running job.
///
/// Every field is optional because the service reports them piecemeal.
/// `sequence` is the freshness marker supplied by the push transport, when
/// it provides one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Completion percentage (0-100).
    pub percent: Option<f64>,
    /// Human-readable transfer rate, e.g. `"1.2MiB/s"`.
    pub transfer_rate: Option<String>,
    /// Human-readable estimated time remaining, e.g. `"0:42"`.
    pub eta: Option<String>,
    pub bytes_done: Option<u64>,
    pub bytes_total: Option<u64>,
    pub sequence: Option<u64>,
}

impl Progress {
    /// Progress with only byte counters set.
    pub fn bytes(done: u64, total: u64) -> Self {
        Self {
            bytes_done: Some(done),
            bytes_total: Some(total),
            ..Default::default()
        }
        .normalized()
    }

    /// Recompute `percent` from the byte counters when both are known.
    pub fn normalized(mut self) -> Self {
        if let (Some(done), Some(total)) = (self.bytes_done, self.bytes_total) {
            if total > 0 {
                let pct = (done as f64 / total as f64) * 100.0;
                self.percent = Some(pct.clamp(0.0, 100.0));
            }
        }
        self
    }

    /// Overwrite the fields present in `incoming`, keeping the rest.
    pub fn absorb(&mut self, incoming: &Progress) {
        macro_rules! take {
            ($($field:ident),+) => {
                $(
                    if incoming.$field.is_some() {
                        self.$field = incoming.$field.clone();
                    }
                )+
            };
        }
        take!(percent, transfer_rate, eta, bytes_done, bytes_total, sequence);
        *self = std::mem::take(self).normalized();
    }
}

/// One remote download task as seen by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source_url: String,
    pub title: Option<String>,
    pub thumbnail_ref: Option<String>,
    pub status: JobStatus,
    /// Only present while `status` is [`JobStatus::Failed`].
    pub error_detail: Option<String>,
    /// Only present while `status` is [`JobStatus::InProgress`].
    pub progress: Option<Progress>,
    /// Size of the finished file in bytes, when reported.
    pub file_size: Option<u64>,
    pub created_at: Timestamp,
}

impl Job {
    /// A freshly created job with no metadata yet.
    pub fn new(id: JobId, source_url: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id,
            source_url: source_url.into(),
            title: None,
            thumbnail_ref: None,
            status: JobStatus::Pending,
            error_detail: None,
            progress: None,
            file_size: None,
            created_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Progress, but only while the job is actually running.
    pub fn active_progress(&self) -> Option<&Progress> {
        match self.status {
            JobStatus::InProgress => self.progress.as_ref(),
            _ => None,
        }
    }

    /// Drop fields that are meaningless for the current status.
    pub(crate) fn enforce_status_invariants(&mut self) {
        if self.status != JobStatus::InProgress {
            self.progress = None;
        }
        if self.status != JobStatus::Failed {
            self.error_detail = None;
        }
    }
}
