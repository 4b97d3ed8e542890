//! Push-update multiplexer.
//!
//! Owns one [`ChannelHandle`] per job that should be receiving push events.
//! Each handle runs a task that opens the transport, forwards events to the
//! engine, and reconnects with a bounded [`Backoff`] when the stream errors
//! or ends early. Handles are closed from exactly three places: a terminal
//! event, removal of the job, and exhaustion of the reconnect budget.
//!
//! A channel that exhausted its budget is *parked*: it is not reopened until
//! the job's status changes or the user retries it, and the job is left to
//! the regular poll cycle.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tubesync_client::{Backoff, ClientError, PushTransport, ReconnectConfig};
use tubesync_core::{JobId, JobStatus};

use crate::inbox::Inbound;
use crate::store::JobStore;

/// How long [`PushMultiplexer::shutdown`] waits for each channel task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A live push subscription for one job.
struct ChannelHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct PushMultiplexer {
    transport: Arc<dyn PushTransport>,
    reconnect: ReconnectConfig,
    inbound: mpsc::Sender<Inbound>,
    /// Engine master token; every channel runs on a child of it.
    cancel: CancellationToken,
    channels: HashMap<JobId, ChannelHandle>,
    /// Exhausted channels and the job status they were parked at.
    parked: HashMap<JobId, JobStatus>,
    next_generation: u64,
}

impl PushMultiplexer {
    pub(crate) fn new(
        transport: Arc<dyn PushTransport>,
        reconnect: ReconnectConfig,
        inbound: mpsc::Sender<Inbound>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            reconnect,
            inbound,
            cancel,
            channels: HashMap::new(),
            parked: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Bring the open channels in line with the store: exactly one channel
    /// per non-terminal, non-parked job, and none for anything else.
    pub fn sync(&mut self, store: &JobStore) {
        let wanted: HashSet<JobId> = store.non_terminal_ids().into_iter().collect();

        // A status change since parking releases the park.
        self.parked.retain(|id, parked_at| {
            store
                .get(id)
                .is_some_and(|job| !job.is_terminal() && job.status == *parked_at)
        });

        let stale: Vec<JobId> = self
            .channels
            .keys()
            .filter(|id| !wanted.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            self.close(&id);
        }

        for id in store.non_terminal_ids() {
            if !self.channels.contains_key(&id) && !self.is_parked(&id) {
                self.open(id);
            }
        }
    }

    /// Close the channel for `id`. Returns `false` when none was open.
    pub fn close(&mut self, id: &JobId) -> bool {
        match self.channels.remove(id) {
            Some(handle) => {
                handle.cancel.cancel();
                tracing::debug!(job_id = %id, generation = handle.generation, "Push channel closed");
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) {
        for (_, handle) in self.channels.drain() {
            handle.cancel.cancel();
        }
        self.parked.clear();
    }

    /// Cancel every channel and wait up to 5 seconds per task for a clean
    /// exit.
    pub async fn shutdown(&mut self) {
        for (id, handle) in self.channels.drain() {
            handle.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_GRACE, handle.task).await.is_err() {
                tracing::warn!(job_id = %id, "Push channel did not stop in time");
            }
        }
        self.parked.clear();
    }

    /// Whether `generation` is the live channel for `id`.
    pub fn is_current(&self, id: &JobId, generation: u64) -> bool {
        self.channels
            .get(id)
            .is_some_and(|handle| handle.generation == generation)
    }

    /// Drop the exhausted channel and park `id` at `status`.
    pub fn park(&mut self, id: &JobId, status: JobStatus) {
        self.close(id);
        self.parked.insert(id.clone(), status);
        tracing::info!(job_id = %id, %status, "Push channel parked, falling back to polling");
    }

    /// Allow `id` to be reopened on the next [`sync`](Self::sync).
    pub fn unpark(&mut self, id: &JobId) {
        self.parked.remove(id);
    }

    pub fn is_parked(&self, id: &JobId) -> bool {
        self.parked.contains_key(id)
    }

    pub fn open_count(&self) -> usize {
        self.channels.len()
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Ids with an open channel, sorted.
    pub fn open_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.channels.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn open(&mut self, id: JobId) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = self.cancel.child_token();

        let task = tokio::spawn(run_channel(
            id.clone(),
            generation,
            Arc::clone(&self.transport),
            self.reconnect.clone(),
            self.inbound.clone(),
            cancel.clone(),
        ));

        tracing::debug!(job_id = %id, generation, "Push channel opened");
        self.channels.insert(
            id,
            ChannelHandle {
                generation,
                cancel,
                task,
            },
        );
    }
}

impl Drop for PushMultiplexer {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// How one connection of a channel ended.
enum ConnectionEnd {
    /// A terminal event was delivered, or the engine is gone.
    Finished,
    /// Open failed, the stream errored, or it ended early.
    Failed(ClientError),
}

/// Connect, forward events, reconnect on failure; until a terminal event,
/// cancellation, or exhaustion of the backoff.
async fn run_channel(
    id: JobId,
    generation: u64,
    transport: Arc<dyn PushTransport>,
    config: ReconnectConfig,
    inbound: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(config);

    loop {
        let end = tokio::select! {
            _ = cancel.cancelled() => return,
            end = forward_events(&id, generation, transport.as_ref(), &inbound, &mut backoff) => end,
        };

        let error = match end {
            ConnectionEnd::Finished => return,
            ConnectionEnd::Failed(error) => error,
        };

        match backoff.on_failure() {
            Some(delay) => {
                tracing::warn!(
                    job_id = %id,
                    attempt = backoff.failures(),
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Push channel failed, reconnecting",
                );
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                tracing::warn!(
                    job_id = %id,
                    attempts = backoff.failures(),
                    error = %error,
                    "Push channel exhausted its retries",
                );
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = inbound.send(Inbound::ChannelExhausted { id, generation }) => {}
                }
                return;
            }
        }
    }
}

async fn forward_events(
    id: &JobId,
    generation: u64,
    transport: &dyn PushTransport,
    inbound: &mpsc::Sender<Inbound>,
    backoff: &mut Backoff,
) -> ConnectionEnd {
    let mut stream = match transport.open(id).await {
        Ok(stream) => stream,
        Err(e) => return ConnectionEnd::Failed(e),
    };

    let mut new_connection = true;
    while let Some(item) = stream.next().await {
        let event = match item {
            Ok(event) => event,
            Err(e) => return ConnectionEnd::Failed(e),
        };
        backoff.reset();

        let terminal = event.is_terminal();
        let message = Inbound::Push {
            id: id.clone(),
            generation,
            new_connection,
            event,
        };
        new_connection = false;
        if inbound.send(message).await.is_err() || terminal {
            return ConnectionEnd::Finished;
        }
    }

    ConnectionEnd::Failed(ClientError::Connection(
        "push stream ended before a terminal event".into(),
    ))
}
