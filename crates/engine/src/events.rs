//! Change notifications for the view layer.
//!
//! [`EventBus`] wraps a `tokio::sync::broadcast` channel. The store publishes
//! a [`ChangeEvent`] for every applied mutation, and the engine publishes
//! [`ChangeEvent::PollDegraded`] when a poll cycle exhausts its retries.

use tokio::sync::broadcast;
use tubesync_core::{Job, JobId};

/// Events buffered per subscriber before it starts lagging.
const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A job was inserted or changed; carries the merged record.
    Upserted(Job),
    /// A job was deleted locally.
    Removed(JobId),
    /// A poll cycle failed after all retries. Polling continues.
    PollDegraded { attempts: u32, error: String },
}

/// In-process fan-out of [`ChangeEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    /// Slow receivers observe `RecvError::Lagged` once `capacity` events
    /// are buffered.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped when nobody listens.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
