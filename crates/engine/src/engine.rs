//! The sync engine task and its handle.
//!
//! A single task owns the [`JobStore`], the [`Poller`] and the
//! [`PushMultiplexer`]. User commands arrive from [`EngineHandle`]s and
//! producer messages from the poll loop, push channels and spawned
//! requests; the task applies them one at a time, so no two writes to the
//! store ever interleave. Network calls are never awaited on the task
//! itself: they run in spawned tasks that report back through the inbox.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tubesync_client::{
    ClientError, JobRecord, JobService, JobsApi, PushTransport, ReconnectConfig,
};
use tubesync_core::{normalize_source_url, Job, JobId, JobStatus, JobUpdate, UpdateOrigin};
use url::Url;

use crate::config::{EngineConfig, PushTransportKind};
use crate::error::EngineError;
use crate::events::{ChangeEvent, EventBus};
use crate::inbox::{Inbound, Reply};
use crate::multiplexer::PushMultiplexer;
use crate::poller::{Poller, PollerConfig};
use crate::store::{JobStore, UpsertOutcome};

const COMMAND_CAPACITY: usize = 64;
const INBOX_CAPACITY: usize = 256;

/// How long [`EngineHandle::shutdown`] waits for the engine task.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Point-in-time counters, mainly for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub jobs: usize,
    pub non_terminal: usize,
    pub open_channels: usize,
    /// Ids with an open push channel, sorted.
    pub open_channel_ids: Vec<JobId>,
    pub parked_channels: usize,
    pub poller_running: bool,
    pub submissions_in_flight: usize,
}

enum Command {
    Submit { raw: String, reply: Reply<Job> },
    Delete { id: JobId, reply: Reply<()> },
    Retry { id: JobId, reply: Reply<Job> },
    Refresh { reply: Reply<usize> },
    PlayUrl { id: JobId, reply: Reply<Url> },
    Snapshot { reply: oneshot::Sender<Vec<Job>> },
    Stats { reply: oneshot::Sender<EngineStats> },
}

/// Entry points for starting the engine.
pub struct SyncEngine;

impl SyncEngine {
    /// Start against the configured job service. Must be called from
    /// within a Tokio runtime.
    pub fn start(config: EngineConfig) -> EngineHandle {
        let api = JobsApi::new(config.endpoints.clone());
        let transport: Arc<dyn PushTransport> = match config.transport {
            PushTransportKind::Sse => Arc::new(api.sse_transport()),
            PushTransportKind::Ws => Arc::new(api.ws_transport()),
        };
        Self::spawn(Arc::new(api), transport, config.poller, config.reconnect)
    }

    /// Start with explicit service and transport implementations.
    pub fn spawn(
        service: Arc<dyn JobService>,
        transport: Arc<dyn PushTransport>,
        poller: PollerConfig,
        reconnect: ReconnectConfig,
    ) -> EngineHandle {
        let cancel = CancellationToken::new();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOX_CAPACITY);

        let bus = EventBus::default();
        let store = JobStore::new(bus.clone());
        let view = store.watch();

        let state = EngineState {
            store,
            poller: Poller::new(
                Arc::clone(&service),
                poller,
                inbound_tx.clone(),
                cancel.clone(),
            ),
            mux: PushMultiplexer::new(transport, reconnect, inbound_tx.clone(), cancel.clone()),
            service,
            inbound_tx,
            in_flight: HashSet::new(),
            primed: false,
        };

        let task = tokio::spawn(state.run(command_rx, inbound_rx, cancel.clone()));

        EngineHandle {
            commands: command_tx,
            bus,
            view,
            cancel,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

/// Cloneable facade for the view layer.
///
/// Dropping every handle stops the engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    bus: EventBus,
    view: watch::Receiver<Vec<Job>>,
    cancel: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl EngineHandle {
    /// Normalize `raw`, guard against duplicates, and create the job.
    pub async fn submit(&self, raw: impl Into<String>) -> Result<Job, EngineError> {
        let raw = raw.into();
        self.ask(|reply| Command::Submit { raw, reply }).await?
    }

    /// Delete a job remotely, then drop it locally.
    pub async fn delete(&self, id: &JobId) -> Result<(), EngineError> {
        let id = id.clone();
        self.ask(|reply| Command::Delete { id, reply }).await?
    }

    /// Retry a `Failed` job.
    pub async fn retry(&self, id: &JobId) -> Result<Job, EngineError> {
        let id = id.clone();
        self.ask(|reply| Command::Retry { id, reply }).await?
    }

    /// Fetch the full collection now. Returns the number of records seen.
    pub async fn refresh(&self) -> Result<usize, EngineError> {
        self.ask(|reply| Command::Refresh { reply }).await?
    }

    /// Playback URL of a `Complete` job.
    pub async fn play_url(&self, id: &JobId) -> Result<Url, EngineError> {
        let id = id.clone();
        self.ask(|reply| Command::PlayUrl { id, reply }).await?
    }

    /// Ordered job list, after every command sent before this one.
    pub async fn snapshot(&self) -> Result<Vec<Job>, EngineError> {
        self.ask(|reply| Command::Snapshot { reply }).await
    }

    /// Ordered job list as of the last store mutation.
    pub fn current(&self) -> Vec<Job> {
        self.view.borrow().clone()
    }

    /// Receiver for the ordered job list, updated on every mutation.
    pub fn watch(&self) -> watch::Receiver<Vec<Job>> {
        self.view.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.bus.subscribe()
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        self.ask(|reply| Command::Stats { reply }).await
    }

    /// Stop the engine, its poller and all push channels.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
            tracing::warn!("Sync engine did not stop in time");
        }
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| EngineError::Shutdown)?;
        rx.await.map_err(|_| EngineError::Shutdown)
    }
}

/// Everything the engine task owns.
struct EngineState {
    store: JobStore,
    poller: Poller,
    mux: PushMultiplexer,
    service: Arc<dyn JobService>,
    inbound_tx: mpsc::Sender<Inbound>,
    /// Normalized source URLs with a create request in flight.
    in_flight: HashSet<String>,
    /// Set once the first snapshot has been applied.
    primed: bool,
}

impl EngineState {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut inbound: mpsc::Receiver<Inbound>,
        cancel: CancellationToken,
    ) {
        tracing::info!("Sync engine started");
        self.reschedule();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = inbound.recv() => self.handle_inbound(message),
            }
        }

        tracing::info!("Sync engine shutting down");
        cancel.cancel();
        self.poller.stop();
        self.mux.shutdown().await;
        tracing::info!("Sync engine stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { raw, reply } => self.submit(raw, reply),
            Command::Delete { id, reply } => self.delete(id, reply),
            Command::Retry { id, reply } => self.retry(id, reply),
            Command::Refresh { reply } => self.poller.refresh(reply),
            Command::PlayUrl { id, reply } => {
                let _ = reply.send(self.play_url(&id));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot_all());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn handle_inbound(&mut self, message: Inbound) {
        match message {
            Inbound::Snapshot {
                records,
                fetched_at,
            } => self.apply_snapshot(records, fetched_at),
            Inbound::PollFailed { attempts, error } => {
                self.store.bus().publish(ChangeEvent::PollDegraded {
                    attempts,
                    error: error.to_string(),
                });
            }
            Inbound::Push {
                id,
                generation,
                new_connection,
                event,
            } => {
                if !self.mux.is_current(&id, generation) {
                    tracing::debug!(job_id = %id, generation, "Discarding event from closed push channel");
                    return;
                }
                let terminal = event.is_terminal();
                let mut update = event.into_update(id.clone());
                if new_connection {
                    update = update.on_new_connection();
                }
                self.store.upsert(update);
                if terminal {
                    self.mux.close(&id);
                }
                self.reschedule();
            }
            Inbound::ChannelExhausted { id, generation } => {
                if !self.mux.is_current(&id, generation) {
                    return;
                }
                match self.store.get(&id).map(|job| job.status) {
                    Some(status) => self.mux.park(&id, status),
                    None => {
                        self.mux.close(&id);
                    }
                }
                self.reschedule();
            }
            Inbound::Created {
                source_url,
                result,
                reply,
            } => {
                self.in_flight.remove(&source_url);
                let _ = reply.send(self.finish_submit(&source_url, result));
            }
            Inbound::Deleted { id, result, reply } => {
                let _ = reply.send(self.finish_delete(&id, result));
            }
            Inbound::Retried { id, result, reply } => {
                let _ = reply.send(self.finish_retry(&id, result));
            }
            Inbound::Refreshed {
                result,
                fetched_at,
                reply,
            } => {
                let _ = reply.send(match result {
                    Ok(records) => {
                        let count = records.len();
                        self.apply_snapshot(records, fetched_at);
                        Ok(count)
                    }
                    Err(e) => Err(EngineError::Remote(e)),
                });
            }
        }
    }

    /// Open and close channels, and run the poller only while something can
    /// still change.
    fn reschedule(&mut self) {
        self.mux.sync(&self.store);
        self.poller
            .set_active(!self.primed || self.store.has_non_terminal());
    }

    /// Merge a full listing. `fetched_at` is when its request was sent.
    fn apply_snapshot(&mut self, records: Vec<JobRecord>, fetched_at: Instant) {
        let listed: HashSet<JobId> = records.iter().map(|r| r.id.clone()).collect();
        for record in records {
            self.store.upsert(record.into_update(UpdateOrigin::Snapshot));
        }
        self.store.forget_tombstones(&listed, fetched_at);
        self.primed = true;
        self.reschedule();
    }

    // ---- submission ----

    fn submit(&mut self, raw: String, reply: Reply<Job>) {
        let source_url = match normalize_source_url(&raw) {
            Ok(url) => url,
            Err(e) => {
                tracing::info!(raw = %raw, error = %e, "Rejecting invalid source reference");
                let _ = reply.send(Err(e.into()));
                return;
            }
        };

        if self.store.active_source(&source_url).is_some() || self.in_flight.contains(&source_url)
        {
            tracing::info!(source_url = %source_url, "Rejecting duplicate submission");
            let _ = reply.send(Err(EngineError::Duplicate(source_url)));
            return;
        }

        self.in_flight.insert(source_url.clone());
        let service = Arc::clone(&self.service);
        let inbound = self.inbound_tx.clone();
        tokio::spawn(async move {
            let result = service.create_job(&source_url).await;
            let _ = inbound
                .send(Inbound::Created {
                    source_url,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn finish_submit(
        &mut self,
        source_url: &str,
        result: Result<JobRecord, ClientError>,
    ) -> Result<Job, EngineError> {
        let record = result.map_err(|e| {
            tracing::warn!(source_url = %source_url, error = %e, "Job submission failed");
            EngineError::Remote(e)
        })?;

        let id = record.id.clone();
        self.store.upsert(record.into_update(UpdateOrigin::Created));
        self.reschedule();

        let job = self
            .store
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        tracing::info!(job_id = %id, source_url = %source_url, "Job submitted");
        Ok(job)
    }

    // ---- user actions ----

    fn delete(&mut self, id: JobId, reply: Reply<()>) {
        if self.store.get(&id).is_none() {
            let _ = reply.send(Err(EngineError::NotFound(id)));
            return;
        }

        let service = Arc::clone(&self.service);
        let inbound = self.inbound_tx.clone();
        tokio::spawn(async move {
            let result = service.delete_job(&id).await;
            let _ = inbound.send(Inbound::Deleted { id, result, reply }).await;
        });
    }

    fn finish_delete(
        &mut self,
        id: &JobId,
        result: Result<(), ClientError>,
    ) -> Result<(), EngineError> {
        result.map_err(|e| {
            tracing::warn!(job_id = %id, error = %e, "Job deletion rejected");
            EngineError::Remote(e)
        })?;

        self.store.remove(id);
        self.mux.close(id);
        self.mux.unpark(id);
        self.reschedule();
        tracing::info!(job_id = %id, "Job deleted");
        Ok(())
    }

    fn retry(&mut self, id: JobId, reply: Reply<Job>) {
        let status = match self.store.get(&id) {
            Some(job) => job.status,
            None => {
                let _ = reply.send(Err(EngineError::NotFound(id)));
                return;
            }
        };
        if status != JobStatus::Failed {
            let _ = reply.send(Err(EngineError::InvalidState {
                id,
                status,
                expected: JobStatus::Failed,
            }));
            return;
        }

        let service = Arc::clone(&self.service);
        let inbound = self.inbound_tx.clone();
        tokio::spawn(async move {
            let result = service.retry_job(&id).await;
            let _ = inbound.send(Inbound::Retried { id, result, reply }).await;
        });
    }

    fn finish_retry(
        &mut self,
        id: &JobId,
        result: Result<(), ClientError>,
    ) -> Result<Job, EngineError> {
        result.map_err(|e| {
            tracing::warn!(job_id = %id, error = %e, "Job retry rejected");
            EngineError::Remote(e)
        })?;

        let update = JobUpdate::new(id.clone(), UpdateOrigin::Retry).with_status(JobStatus::Pending);
        if let UpsertOutcome::Ignored(reason) = self.store.upsert(update) {
            tracing::debug!(job_id = %id, ?reason, "Retry acknowledged but not applied locally");
        }
        self.mux.unpark(id);
        self.reschedule();

        let job = self
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        tracing::info!(job_id = %id, status = %job.status, "Job retry requested");
        Ok(job)
    }

    fn play_url(&self, id: &JobId) -> Result<Url, EngineError> {
        let job = self
            .store
            .get(id)
            .ok_or_else(|| EngineError::NotFound(id.clone()))?;
        if job.status != JobStatus::Complete {
            return Err(EngineError::InvalidState {
                id: id.clone(),
                status: job.status,
                expected: JobStatus::Complete,
            });
        }
        Ok(self.service.stream_url(id)?)
    }

    fn stats(&self) -> EngineStats {
        EngineStats {
            jobs: self.store.len(),
            non_terminal: self.store.non_terminal_ids().len(),
            open_channels: self.mux.open_count(),
            open_channel_ids: self.mux.open_ids(),
            parked_channels: self.mux.parked_count(),
            poller_running: self.poller.is_running(),
            submissions_in_flight: self.in_flight.len(),
        }
    }
}
