//! Partial job updates produced by the poller, the push channels, and the
//! responses to user actions.

use crate::job::{Job, Progress};
use crate::status::JobStatus;
use crate::types::{JobId, Timestamp};

/// Which producer an update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOrigin {
    /// A record from a full `GET` of the job collection.
    Snapshot,
    /// An incremental event from a job's push channel.
    Push,
    /// The record returned by the create call of a submission. Carries no
    /// more authority than a snapshot.
    Created,
    /// A user retry acknowledged by the service. The only origin allowed to
    /// move a `Failed` job back to `Pending`.
    Retry,
}

/// A partial job record. `None` fields leave the stored value unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub id: JobId,
    pub origin: UpdateOrigin,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub thumbnail_ref: Option<String>,
    pub status: Option<JobStatus>,
    pub error_detail: Option<String>,
    pub progress: Option<Progress>,
    pub file_size: Option<u64>,
    pub created_at: Option<Timestamp>,
    /// First event of a fresh push connection. The sender's sequence
    /// counter may have started over.
    pub new_connection: bool,
}

impl JobUpdate {
    pub fn new(id: JobId, origin: UpdateOrigin) -> Self {
        Self {
            id,
            origin,
            source_url: None,
            title: None,
            thumbnail_ref: None,
            status: None,
            error_detail: None,
            progress: None,
            file_size: None,
            created_at: None,
            new_connection: false,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_error(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn on_new_connection(mut self) -> Self {
        self.new_connection = true;
        self
    }

    /// Build a new record from this update, if it carries enough to stand on
    /// its own. Push updates never create records.
    pub fn into_job(self, now: Timestamp) -> Option<Job> {
        if self.origin == UpdateOrigin::Push {
            return None;
        }
        let source_url = self.source_url?;
        let mut job = Job::new(self.id, source_url, self.created_at.unwrap_or(now));
        job.title = self.title;
        job.thumbnail_ref = self.thumbnail_ref;
        job.status = self.status.unwrap_or(JobStatus::Pending);
        job.error_detail = self.error_detail;
        job.progress = self.progress.map(Progress::normalized);
        job.file_size = self.file_size;
        job.enforce_status_invariants();
        Some(job)
    }
}
