//! Full-snapshot poller.
//!
//! While started, a background task fetches the whole job collection every
//! [`PollerConfig::interval`] and hands it to the engine. A failed fetch is
//! retried with a fixed delay; once the retries are spent the cycle is
//! reported as degraded and the loop carries on. The engine starts and
//! stops the poller depending on whether any job is still non-terminal.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tubesync_client::{ClientError, JobRecord, JobService};

use crate::inbox::{Inbound, Reply};

/// Timing of the poll loop.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Pause between two poll cycles.
    pub interval: Duration,
    /// Pause between retries inside one cycle.
    pub retry_delay: Duration,
    /// Retries per cycle after the first failed fetch.
    pub max_retries: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            retry_delay: Duration::from_secs(3),
            max_retries: 5,
        }
    }
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Explicit scheduler for the poll loop.
pub struct Poller {
    service: Arc<dyn JobService>,
    config: PollerConfig,
    inbound: mpsc::Sender<Inbound>,
    /// Engine master token; each loop runs on a child of it.
    cancel: CancellationToken,
    task: Option<PollTask>,
}

impl Poller {
    pub(crate) fn new(
        service: Arc<dyn JobService>,
        config: PollerConfig,
        inbound: mpsc::Sender<Inbound>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service,
            config,
            inbound,
            cancel,
            task: None,
        }
    }

    /// Start the loop. The first fetch happens immediately. No-op when
    /// already running.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(run_poll_loop(
            Arc::clone(&self.service),
            self.config.clone(),
            self.inbound.clone(),
            cancel.clone(),
        ));
        self.task = Some(PollTask { cancel, handle });
    }

    /// Stop the loop. A fetch in flight is abandoned.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel.cancel();
            tracing::debug!("Poller stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|task| !task.cancel.is_cancelled() && !task.handle.is_finished())
    }

    /// Start or stop depending on whether there is anything to poll for.
    pub fn set_active(&mut self, active: bool) {
        match (active, self.is_running()) {
            (true, false) => self.start(),
            (false, true) => self.stop(),
            _ => {}
        }
    }

    /// One-shot fetch outside the loop, without retries.
    pub(crate) fn refresh(&self, reply: Reply<usize>) {
        let service = Arc::clone(&self.service);
        let inbound = self.inbound.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let fetched_at = Instant::now();
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = service.list_jobs() => result,
            };
            let message = Inbound::Refreshed {
                result,
                fetched_at,
                reply,
            };
            let _ = inbound.send(message).await;
        });
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll until cancelled or until the engine goes away.
async fn run_poll_loop(
    service: Arc<dyn JobService>,
    config: PollerConfig,
    inbound: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_ms = config.interval.as_millis() as u64,
        "Poller started",
    );

    loop {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = fetch_with_retry(service.as_ref(), &config, &cancel) => outcome,
        };

        let message = match outcome {
            Some(Ok((records, fetched_at))) => {
                tracing::debug!(count = records.len(), "Poll cycle fetched jobs");
                Inbound::Snapshot {
                    records,
                    fetched_at,
                }
            }
            Some(Err((attempts, error))) => {
                tracing::warn!(attempts, error = %error, "Poll cycle failed");
                Inbound::PollFailed { attempts, error }
            }
            None => break,
        };
        if inbound.send(message).await.is_err() {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }

    tracing::debug!("Poll loop exited");
}

/// Fetch the collection, retrying transient failures with a fixed delay.
///
/// Returns `None` when cancelled during a retry delay, otherwise the
/// records with the time their request was sent, or the last error with the
/// number of attempts made.
async fn fetch_with_retry(
    service: &dyn JobService,
    config: &PollerConfig,
    cancel: &CancellationToken,
) -> Option<Result<(Vec<JobRecord>, Instant), (u32, ClientError)>> {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let sent_at = Instant::now();
        match service.list_jobs().await {
            Ok(records) => return Some(Ok((records, sent_at))),
            Err(e) if e.is_transient() && attempt <= config.max_retries => {
                tracing::warn!(
                    attempt,
                    max_retries = config.max_retries,
                    delay_ms = config.retry_delay.as_millis() as u64,
                    error = %e,
                    "Job poll failed, retrying",
                );
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(config.retry_delay) => {}
                }
            }
            Err(e) => return Some(Err((attempt, e))),
        }
    }
}
