//! In-memory job store.
//!
//! Owned by the engine task; producers never touch it directly. Every write
//! goes through [`tubesync_core::merge`], and every applied mutation is
//! published on the [`EventBus`] and mirrored into a `watch` snapshot that
//! the view layer can read without a round trip.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use indexmap::IndexMap;
use tokio::sync::watch;
use tokio::time::Instant;
use tubesync_core::{merge, Job, JobId, JobUpdate, TransitionError, UpdateOrigin};

use crate::events::{ChangeEvent, EventBus};

/// What [`JobStore::upsert`] did with an update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The merge produced an identical record.
    Unchanged,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IgnoreReason {
    /// The id was deleted locally.
    Tombstoned,
    /// Not in the store, and the update cannot create a record.
    Unknown,
    /// The update only carried an invalid status transition.
    Rejected(TransitionError),
}

/// Ordered map of job id to [`Job`], plus tombstones of deleted ids.
pub struct JobStore {
    jobs: IndexMap<JobId, Job>,
    /// Deleted ids and when they were deleted.
    tombstones: HashMap<JobId, Instant>,
    bus: EventBus,
    view: watch::Sender<Vec<Job>>,
}

impl JobStore {
    pub fn new(bus: EventBus) -> Self {
        let (view, _) = watch::channel(Vec::new());
        Self {
            jobs: IndexMap::new(),
            tombstones: HashMap::new(),
            bus,
            view,
        }
    }

    /// Merge `update` into the stored record, or insert it when the id is
    /// new and the update is a full record from a snapshot or a local
    /// action.
    pub fn upsert(&mut self, update: JobUpdate) -> UpsertOutcome {
        if self.tombstones.contains_key(&update.id) {
            tracing::debug!(job_id = %update.id, origin = ?update.origin, "Ignoring update for deleted job");
            return UpsertOutcome::Ignored(IgnoreReason::Tombstoned);
        }

        let Some(existing) = self.jobs.get_mut(&update.id) else {
            return self.insert(update);
        };

        let merged = merge(existing, &update);
        if !merged.changed {
            return match merged.rejected {
                Some(e) => UpsertOutcome::Ignored(IgnoreReason::Rejected(e)),
                None => UpsertOutcome::Unchanged,
            };
        }

        *existing = merged.job.clone();
        self.publish(ChangeEvent::Upserted(merged.job));
        UpsertOutcome::Updated
    }

    fn insert(&mut self, update: JobUpdate) -> UpsertOutcome {
        let id = update.id.clone();
        let origin = update.origin;
        if origin == UpdateOrigin::Push {
            tracing::debug!(job_id = %id, "Ignoring push update for unknown job");
            return UpsertOutcome::Ignored(IgnoreReason::Unknown);
        }
        let Some(job) = update.into_job(Utc::now()) else {
            tracing::warn!(job_id = %id, origin = ?origin, "Update for unknown job lacks a source URL");
            return UpsertOutcome::Ignored(IgnoreReason::Unknown);
        };

        tracing::debug!(job_id = %id, status = %job.status, "Job added to store");
        self.jobs.insert(id, job.clone());
        self.publish(ChangeEvent::Upserted(job));
        UpsertOutcome::Inserted
    }

    /// Delete a job and tombstone its id. Returns the removed record.
    pub fn remove(&mut self, id: &JobId) -> Option<Job> {
        self.tombstones.insert(id.clone(), Instant::now());
        let removed = self.jobs.shift_remove(id)?;
        self.publish(ChangeEvent::Removed(id.clone()));
        Some(removed)
    }

    /// Drop the tombstones of ids that a listing requested after their
    /// deletion no longer contains. Older listings may still carry them.
    pub fn forget_tombstones(&mut self, listed: &HashSet<JobId>, fetched_at: Instant) {
        self.tombstones
            .retain(|id, deleted_at| fetched_at <= *deleted_at || listed.contains(id));
    }

    pub fn tombstone_count(&self) -> usize {
        self.tombstones.len()
    }

    /// All jobs in insertion order.
    pub fn snapshot_all(&self) -> Vec<Job> {
        self.jobs.values().cloned().collect()
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// The stored (non-deleted) job using `source_url`, if any.
    pub fn active_source(&self, source_url: &str) -> Option<&Job> {
        self.jobs.values().find(|job| job.source_url == source_url)
    }

    /// Ids of `Pending` and `InProgress` jobs, in insertion order.
    pub fn non_terminal_ids(&self) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|job| !job.is_terminal())
            .map(|job| job.id.clone())
            .collect()
    }

    pub fn has_non_terminal(&self) -> bool {
        self.jobs.values().any(|job| !job.is_terminal())
    }

    /// Receiver for the ordered job list, refreshed on every mutation.
    pub fn watch(&self) -> watch::Receiver<Vec<Job>> {
        self.view.subscribe()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    fn publish(&self, event: ChangeEvent) {
        self.view.send_replace(self.snapshot_all());
        self.bus.publish(event);
    }
}
