//! Messages sent to the engine task by its producers.

use tokio::sync::oneshot;
use tokio::time::Instant;
use tubesync_client::{ClientError, JobRecord, PushEvent};
use tubesync_core::JobId;

use crate::error::EngineError;

/// Reply channel for a user command.
pub(crate) type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

pub(crate) enum Inbound {
    /// A full job list from the poll loop, requested at `fetched_at`.
    Snapshot {
        records: Vec<JobRecord>,
        fetched_at: Instant,
    },
    /// A poll cycle failed after its retries.
    PollFailed { attempts: u32, error: ClientError },
    /// An event from the push channel `generation` of job `id`.
    Push {
        id: JobId,
        generation: u64,
        /// First event received on a fresh connection of the channel.
        new_connection: bool,
        event: PushEvent,
    },
    /// The push channel gave up after its reconnect budget.
    ChannelExhausted { id: JobId, generation: u64 },
    /// Completion of a spawned create request.
    Created {
        source_url: String,
        result: Result<JobRecord, ClientError>,
        reply: Reply<tubesync_core::Job>,
    },
    /// Completion of a spawned delete request.
    Deleted {
        id: JobId,
        result: Result<(), ClientError>,
        reply: Reply<()>,
    },
    /// Completion of a spawned retry request.
    Retried {
        id: JobId,
        result: Result<(), ClientError>,
        reply: Reply<tubesync_core::Job>,
    },
    /// Completion of an on-demand refresh.
    Refreshed {
        result: Result<Vec<JobRecord>, ClientError>,
        fetched_at: Instant,
        reply: Reply<usize>,
    },
}
