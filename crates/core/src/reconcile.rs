//! The single merge function shared by every producer that writes to the
//! job store.
//!
//! Rules, field by field:
//!
//! - Fields absent from the update are left unchanged.
//! - Metadata (`title`, `thumbnail_ref`, `file_size`) is last-write-wins.
//! - Status follows [`check_transition`]. A push update whose status lies
//!   behind the stored one is an out-of-order duplicate and is dropped.
//! - Progress from a snapshot (or an action response) never rewinds progress
//!   already observed: it is compared by sequence when both sides carry one,
//!   then by `bytes_done`, then by `percent`. Push progress is only compared
//!   by sequence, since one connection delivers its events in order. The
//!   first event of a new push connection starts a new sequence.
//! - Progress exists only while `InProgress`; the error detail only while
//!   `Failed`.
//!
//! Applying the same update twice yields the same record as applying it once.

use crate::error::TransitionError;
use crate::job::{Job, Progress};
use crate::status::{check_transition, JobStatus, TransitionCause};
use crate::update::{JobUpdate, UpdateOrigin};

/// Result of merging an update into a stored record.
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub job: Job,
    /// Whether `job` differs from the record passed in.
    pub changed: bool,
    /// Set when the update claimed a transition outside the state machine.
    pub rejected: Option<TransitionError>,
}

/// Merge `update` into `existing`.
pub fn merge(existing: &Job, update: &JobUpdate) -> Merge {
    let mut job = existing.clone();
    let rejected = apply_status(&mut job, update);

    if let Some(title) = &update.title {
        job.title = Some(title.clone());
    }
    if let Some(thumb) = &update.thumbnail_ref {
        job.thumbnail_ref = Some(thumb.clone());
    }
    if let Some(size) = update.file_size {
        job.file_size = Some(size);
    }
    if let Some(detail) = &update.error_detail {
        job.error_detail = Some(detail.clone());
    }
    if let Some(incoming) = &update.progress {
        apply_progress(&mut job, incoming, update);
    }

    job.enforce_status_invariants();

    Merge {
        changed: job != *existing,
        job,
        rejected,
    }
}

fn apply_status(job: &mut Job, update: &JobUpdate) -> Option<TransitionError> {
    let next = update.status?;
    if next == job.status {
        return None;
    }

    if update.origin == UpdateOrigin::Push && next.rank() < job.status.rank() {
        tracing::debug!(
            job_id = %job.id,
            current = %job.status,
            incoming = %next,
            "Dropping out-of-order push status",
        );
        return None;
    }

    let cause = match update.origin {
        UpdateOrigin::Retry => TransitionCause::UserRetry,
        UpdateOrigin::Snapshot | UpdateOrigin::Created | UpdateOrigin::Push => {
            TransitionCause::Remote
        }
    };

    match check_transition(job.status, next, cause) {
        Ok(()) => {
            if job.status == JobStatus::Failed && next == JobStatus::Pending {
                job.progress = None;
                job.error_detail = None;
            }
            job.status = next;
            None
        }
        Err(e) => {
            tracing::warn!(
                job_id = %job.id,
                origin = ?update.origin,
                error = %e,
                "Rejected status transition",
            );
            Some(e)
        }
    }
}

fn apply_progress(job: &mut Job, incoming: &Progress, update: &JobUpdate) {
    let origin = update.origin;
    if job.progress.is_none() {
        job.progress = Some(incoming.clone().normalized());
        return;
    }
    let Some(current) = job.progress.as_mut() else {
        return;
    };

    // Sequences are only comparable within one push connection.
    if update.new_connection {
        current.sequence = None;
    }

    let stale = match origin {
        UpdateOrigin::Push => older_by_sequence(incoming, current),
        UpdateOrigin::Snapshot | UpdateOrigin::Created | UpdateOrigin::Retry => {
            older_by_sequence(incoming, current) || rewinds(incoming, current)
        }
    };

    if stale {
        tracing::debug!(
            job_id = %job.id,
            origin = ?origin,
            current_bytes = ?current.bytes_done,
            incoming_bytes = ?incoming.bytes_done,
            "Keeping fresher progress",
        );
        return;
    }
    current.absorb(incoming);
}

fn older_by_sequence(incoming: &Progress, current: &Progress) -> bool {
    matches!(
        (incoming.sequence, current.sequence),
        (Some(a), Some(b)) if a < b
    )
}

/// Whether `incoming` would move the counters backwards.
fn rewinds(incoming: &Progress, current: &Progress) -> bool {
    match (incoming.bytes_done, current.bytes_done) {
        (Some(a), Some(b)) => a < b,
        _ => matches!(
            (incoming.percent, current.percent),
            (Some(a), Some(b)) if a < b
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobId;

    fn job(status: JobStatus) -> Job {
        let mut job = Job::new(JobId::from(1), "https://example.com/v/abc", chrono::Utc::now());
        job.status = status;
        job
    }

    fn running(done: u64, total: u64) -> Job {
        let mut j = job(JobStatus::InProgress);
        j.progress = Some(Progress::bytes(done, total));
        j
    }

    fn push(id: i64) -> JobUpdate {
        JobUpdate::new(JobId::from(id), UpdateOrigin::Push)
    }

    fn snapshot(id: i64) -> JobUpdate {
        JobUpdate::new(JobId::from(id), UpdateOrigin::Snapshot)
    }

    #[test]
    fn absent_fields_left_unchanged() {
        let mut base = running(10, 100);
        base.title = Some("Title".into());
        let merged = merge(&base, &snapshot(1));
        assert_eq!(merged.job, base);
        assert!(!merged.changed);
    }

    #[test]
    fn snapshot_replaces_metadata() {
        let mut base = job(JobStatus::Pending);
        base.title = Some("old".into());
        let mut update = snapshot(1).with_title("new");
        update.thumbnail_ref = Some("https://img/1.jpg".into());

        let merged = merge(&base, &update);
        assert_eq!(merged.job.title.as_deref(), Some("new"));
        assert_eq!(merged.job.thumbnail_ref.as_deref(), Some("https://img/1.jpg"));
        assert!(merged.changed);
    }

    #[test]
    fn snapshot_does_not_rewind_push_progress() {
        let base = running(500, 1000);
        let update = snapshot(1)
            .with_status(JobStatus::InProgress)
            .with_progress(Progress::bytes(200, 1000));

        let merged = merge(&base, &update);
        assert_eq!(merged.job.progress.unwrap().bytes_done, Some(500));
    }

    #[test]
    fn snapshot_advances_progress() {
        let base = running(500, 1000);
        let update = snapshot(1).with_progress(Progress::bytes(900, 1000));

        let merged = merge(&base, &update);
        assert_eq!(merged.job.progress.unwrap().percent, Some(90.0));
    }

    #[test]
    fn stale_pending_snapshot_keeps_in_progress() {
        let base = running(500, 1000);
        let merged = merge(&base, &snapshot(1).with_status(JobStatus::Pending));

        assert_eq!(merged.job.status, JobStatus::InProgress);
        assert_eq!(merged.job.progress.unwrap().percent, Some(50.0));
        assert!(merged.rejected.is_some());
        assert!(!merged.changed);
    }

    #[test]
    fn snapshot_progress_with_lower_sequence_is_dropped() {
        let mut base = running(500, 1000);
        base.progress.as_mut().unwrap().sequence = Some(9);
        let stale = Progress {
            sequence: Some(3),
            bytes_done: Some(700),
            ..Default::default()
        };

        let merged = merge(&base, &snapshot(1).with_progress(stale));
        assert_eq!(merged.job.progress.unwrap().bytes_done, Some(500));
    }

    #[test]
    fn push_progress_moves_pending_to_in_progress() {
        let base = job(JobStatus::Pending);
        let update = push(1)
            .with_status(JobStatus::InProgress)
            .with_progress(Progress::bytes(500, 1000));

        let merged = merge(&base, &update);
        assert_eq!(merged.job.status, JobStatus::InProgress);
        assert_eq!(merged.job.progress.unwrap().percent, Some(50.0));
    }

    #[test]
    fn late_push_progress_after_complete_is_dropped() {
        let base = job(JobStatus::Complete);
        let update = push(1)
            .with_status(JobStatus::InProgress)
            .with_progress(Progress::bytes(999, 1000));

        let merged = merge(&base, &update);
        assert_eq!(merged.job.status, JobStatus::Complete);
        assert!(merged.job.progress.is_none());
        assert!(merged.rejected.is_none());
        assert!(!merged.changed);
    }

    #[test]
    fn push_cannot_flip_complete_to_failed() {
        let base = job(JobStatus::Complete);
        let update = push(1).with_status(JobStatus::Failed).with_error("boom");

        let merged = merge(&base, &update);
        assert_eq!(merged.job.status, JobStatus::Complete);
        assert!(merged.job.error_detail.is_none());
        assert!(merged.rejected.is_some());
    }

    #[test]
    fn terminal_status_clears_progress() {
        let base = running(500, 1000);
        let merged = merge(&base, &push(1).with_status(JobStatus::Complete));

        assert_eq!(merged.job.status, JobStatus::Complete);
        assert!(merged.job.progress.is_none());
    }

    #[test]
    fn failure_records_error_detail() {
        let base = running(500, 1000);
        let merged = merge(
            &base,
            &push(1).with_status(JobStatus::Failed).with_error("HTTP 403"),
        );

        assert_eq!(merged.job.status, JobStatus::Failed);
        assert_eq!(merged.job.error_detail.as_deref(), Some("HTTP 403"));
    }

    #[test]
    fn remote_cannot_reopen_failed_job() {
        let mut base = job(JobStatus::Failed);
        base.error_detail = Some("boom".into());

        let merged = merge(&base, &snapshot(1).with_status(JobStatus::Pending));
        assert_eq!(merged.job.status, JobStatus::Failed);
        assert!(merged.rejected.is_some());
    }

    #[test]
    fn user_retry_reopens_failed_job() {
        let mut base = job(JobStatus::Failed);
        base.error_detail = Some("boom".into());
        let update = JobUpdate::new(JobId::from(1), UpdateOrigin::Retry)
            .with_status(JobStatus::Pending);

        let merged = merge(&base, &update);
        assert_eq!(merged.job.status, JobStatus::Pending);
        assert!(merged.job.error_detail.is_none());
    }

    #[test]
    fn create_response_cannot_reopen_failed_job() {
        let mut base = job(JobStatus::Failed);
        base.error_detail = Some("HTTP 403".into());
        let update = JobUpdate::new(JobId::from(1), UpdateOrigin::Created)
            .with_source_url("https://example.com/v/abc")
            .with_status(JobStatus::Pending);

        let merged = merge(&base, &update);
        assert_eq!(merged.job.status, JobStatus::Failed);
        assert_eq!(merged.job.error_detail.as_deref(), Some("HTTP 403"));
        assert!(merged.rejected.is_some());
        assert!(!merged.changed);
    }

    #[test]
    fn new_push_connection_restarts_sequence() {
        let mut base = running(400, 1000);
        base.progress.as_mut().unwrap().sequence = Some(50);
        let progress = Progress {
            sequence: Some(1),
            ..Progress::bytes(900, 1000)
        };
        let update = push(1)
            .with_status(JobStatus::InProgress)
            .with_progress(progress);

        // Same connection: a lower sequence is a late duplicate.
        assert_eq!(merge(&base, &update).job.progress, base.progress);

        let fresh = merge(&base, &update.clone().on_new_connection()).job;
        let p = fresh.progress.unwrap();
        assert_eq!(p.bytes_done, Some(900));
        assert_eq!(p.sequence, Some(1));

        // Later events on the new connection compare against its own counter.
        let next = Progress {
            sequence: Some(2),
            ..Progress::bytes(950, 1000)
        };
        let merged = merge(
            &merge(&base, &update.on_new_connection()).job,
            &push(1).with_progress(next),
        );
        assert_eq!(merged.job.progress.unwrap().bytes_done, Some(950));
    }

    #[test]
    fn merge_is_idempotent() {
        let bases = [
            job(JobStatus::Pending),
            running(500, 1000),
            job(JobStatus::Complete),
            job(JobStatus::Failed),
        ];
        let updates = [
            snapshot(1).with_status(JobStatus::Pending),
            snapshot(1)
                .with_status(JobStatus::InProgress)
                .with_progress(Progress::bytes(100, 1000)),
            snapshot(1).with_title("t").with_status(JobStatus::Complete),
            push(1)
                .with_status(JobStatus::InProgress)
                .with_progress(Progress::bytes(800, 1000)),
            push(1).with_status(JobStatus::Failed).with_error("x"),
            JobUpdate::new(JobId::from(1), UpdateOrigin::Retry).with_status(JobStatus::Pending),
            push(1)
                .with_progress(Progress::bytes(300, 1000))
                .on_new_connection(),
        ];

        for base in &bases {
            for update in &updates {
                let once = merge(base, update).job;
                let twice = merge(&once, update).job;
                assert_eq!(once, twice, "base={base:?} update={update:?}");
            }
        }
    }

    #[test]
    fn snapshot_never_lowers_bytes_while_in_progress() {
        let mut current = running(0, 1000);
        let mut high_water = 0;
        for done in [100, 50, 400, 300, 300, 900, 10] {
            let update = snapshot(1)
                .with_status(JobStatus::InProgress)
                .with_progress(Progress::bytes(done, 1000));
            current = merge(&current, &update).job;
            let observed = current.progress.as_ref().unwrap().bytes_done.unwrap();
            assert!(observed >= high_water);
            high_water = observed;
        }
        assert_eq!(high_water, 900);
    }
}
