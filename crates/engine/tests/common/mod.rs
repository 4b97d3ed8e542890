//! In-memory job service and push transport shared by the engine tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tubesync_client::wire::DownloadInfo;
use tubesync_client::{
    parse_frame, ClientError, JobRecord, JobService, PushEvent, PushStream, PushTransport,
    ReconnectConfig,
};
use tubesync_core::{JobId, JobStatus};
use tubesync_engine::{EngineHandle, EngineStats, PollerConfig};
use url::Url;

/// How long `until*` helpers wait before failing the test.
const WAIT_LIMIT: Duration = Duration::from_secs(3);

pub fn record(id: i64, status: JobStatus) -> JobRecord {
    JobRecord {
        id: JobId::from(id),
        url: format!("https://example.com/v/{id}"),
        title: None,
        thumbnail_url: None,
        status,
        error_message: None,
        file_size: None,
        created_at: None,
        download_info: None,
    }
}

pub fn running(id: i64, done: u64, total: u64) -> JobRecord {
    JobRecord {
        download_info: Some(DownloadInfo {
            downloaded_bytes: Some(done),
            total_bytes: Some(total),
            ..Default::default()
        }),
        ..record(id, JobStatus::InProgress)
    }
}

pub fn fast_poller() -> PollerConfig {
    PollerConfig {
        interval: Duration::from_millis(30),
        retry_delay: Duration::from_millis(10),
        max_retries: 1,
    }
}

pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        multiplier: 2.0,
        max_attempts: 3,
    }
}

pub fn progress_event(done: u64, total: u64) -> PushEvent {
    numbered_progress_event(done, total, None)
}

/// Progress as delivered with an SSE `id:` field.
pub fn numbered_progress_event(done: u64, total: u64, sequence: Option<u64>) -> PushEvent {
    let body = format!(r#"{{"downloaded_bytes":{done},"total_bytes":{total}}}"#);
    parse_frame(Some("progress"), &body, sequence)
        .unwrap()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Fake job service
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeService {
    records: Mutex<Vec<JobRecord>>,
    list_errors: Mutex<VecDeque<ClientError>>,
    pub list_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    next_id: AtomicI64,
    create_delay: Mutex<Duration>,
    reject_create: Mutex<bool>,
    reject_delete: Mutex<HashSet<JobId>>,
    pub retried: Mutex<Vec<JobId>>,
}

impl FakeService {
    pub fn with_records(records: Vec<JobRecord>) -> Self {
        let service = Self::default();
        service.next_id.store(100, Ordering::SeqCst);
        *service.records.lock().unwrap() = records;
        service
    }

    pub fn set_record(&self, record: JobRecord) {
        let mut records = self.records.lock().unwrap();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    pub fn fail_next_lists(&self, errors: Vec<ClientError>) {
        self.list_errors.lock().unwrap().extend(errors);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    pub fn reject_creates(&self) {
        *self.reject_create.lock().unwrap() = true;
    }

    pub fn reject_delete(&self, id: JobId) {
        self.reject_delete.lock().unwrap().insert(id);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobService for FakeService {
    async fn list_jobs(&self) -> Result<Vec<JobRecord>, ClientError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.list_errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self.records.lock().unwrap().clone())
    }

    /// The job is listed as soon as the request arrives; the response
    /// follows after the configured delay.
    async fn create_job(&self, source_url: &str) -> Result<JobRecord, ClientError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.create_delay.lock().unwrap();

        if *self.reject_create.lock().unwrap() {
            tokio::time::sleep(delay).await;
            return Err(ClientError::Api {
                status: 422,
                body: "unsupported source".into(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let created = JobRecord {
            url: source_url.to_string(),
            ..record(id, JobStatus::Pending)
        };
        self.records.lock().unwrap().push(created.clone());
        tokio::time::sleep(delay).await;
        Ok(created)
    }

    async fn delete_job(&self, id: &JobId) -> Result<(), ClientError> {
        if self.reject_delete.lock().unwrap().contains(id) {
            return Err(ClientError::Api {
                status: 409,
                body: "job is locked".into(),
            });
        }
        self.records.lock().unwrap().retain(|r| &r.id != id);
        Ok(())
    }

    async fn retry_job(&self, id: &JobId) -> Result<(), ClientError> {
        self.retried.lock().unwrap().push(id.clone());
        if let Some(r) = self.records.lock().unwrap().iter_mut().find(|r| &r.id == id) {
            r.status = JobStatus::Pending;
            r.error_message = None;
        }
        Ok(())
    }

    fn stream_url(&self, id: &JobId) -> Result<Url, ClientError> {
        Url::parse(&format!("http://jobs.test/api/videos/{id}/stream"))
            .map_err(|e| ClientError::Endpoint(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Fake push transport
// ---------------------------------------------------------------------------

type EventSender = mpsc::UnboundedSender<Result<PushEvent, ClientError>>;

#[derive(Default)]
pub struct FakeTransport {
    opens: Mutex<HashMap<JobId, usize>>,
    live: Mutex<HashMap<JobId, EventSender>>,
    refuse: Mutex<HashSet<JobId>>,
}

impl FakeTransport {
    /// Every open for `id` fails from now on.
    pub fn refuse(&self, id: JobId) {
        self.refuse.lock().unwrap().insert(id);
    }

    pub fn opens(&self, id: &JobId) -> usize {
        self.opens.lock().unwrap().get(id).copied().unwrap_or(0)
    }

    /// Deliver `event` on the current connection for `id`.
    pub fn push(&self, id: &JobId, event: PushEvent) -> bool {
        match self.live.lock().unwrap().get(id) {
            Some(tx) => tx.unbounded_send(Ok(event)).is_ok(),
            None => false,
        }
    }

    /// Fail the current connection for `id` with a transport error.
    pub fn break_connection(&self, id: &JobId) {
        if let Some(tx) = self.live.lock().unwrap().remove(id) {
            let _ = tx.unbounded_send(Err(ClientError::Connection("reset by peer".into())));
        }
    }

    /// End the current connection for `id` without a terminal event.
    pub fn hang_up(&self, id: &JobId) {
        self.live.lock().unwrap().remove(id);
    }

    /// Whether the engine still reads the connection for `id`.
    pub fn is_connected(&self, id: &JobId) -> bool {
        self.live
            .lock()
            .unwrap()
            .get(id)
            .is_some_and(|tx| !tx.is_closed())
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    async fn open(&self, id: &JobId) -> Result<PushStream, ClientError> {
        *self.opens.lock().unwrap().entry(id.clone()).or_default() += 1;
        if self.refuse.lock().unwrap().contains(id) {
            return Err(ClientError::Connection("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded();
        self.live.lock().unwrap().insert(id.clone(), tx);
        Ok(rx.boxed())
    }
}

// ---------------------------------------------------------------------------
// Waiting helpers
// ---------------------------------------------------------------------------

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn until<F: FnMut() -> bool>(what: &str, mut check: F) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Wait until the engine's stats satisfy `check` and return them.
pub async fn until_stats<F: Fn(&EngineStats) -> bool>(
    engine: &EngineHandle,
    what: &str,
    check: F,
) -> EngineStats {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    loop {
        let stats = engine.stats().await.unwrap();
        if check(&stats) {
            return stats;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}; last stats: {stats:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
