//! Seams between the sync engine and the remote job service.
//!
//! The engine only talks to these traits; [`crate::JobsApi`],
//! [`crate::SseTransport`] and [`crate::WsTransport`] are the network
//! implementations.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tubesync_core::JobId;
use url::Url;

use crate::error::ClientError;
use crate::messages::PushEvent;
use crate::wire::JobRecord;

/// Events from one job's push channel. The stream ending without a terminal
/// event counts as a dropped connection.
pub type PushStream = BoxStream<'static, Result<PushEvent, ClientError>>;

/// Request/response operations of the job service.
#[async_trait]
pub trait JobService: Send + Sync {
    /// Fetch the full job collection.
    async fn list_jobs(&self) -> Result<Vec<JobRecord>, ClientError>;

    /// Create a job for an already normalized source URL.
    async fn create_job(&self, source_url: &str) -> Result<JobRecord, ClientError>;

    async fn delete_job(&self, id: &JobId) -> Result<(), ClientError>;

    /// Ask the service to run a failed job again.
    async fn retry_job(&self, id: &JobId) -> Result<(), ClientError>;

    /// Where the finished media of a job can be played from.
    fn stream_url(&self, id: &JobId) -> Result<Url, ClientError>;
}

/// Opens per-job push channels.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn open(&self, id: &JobId) -> Result<PushStream, ClientError>;
}
