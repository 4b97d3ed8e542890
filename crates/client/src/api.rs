//! REST client for the job service HTTP endpoints.
//!
//! Wraps listing, creation, deletion and retry of jobs using [`reqwest`].

use async_trait::async_trait;
use tubesync_core::JobId;
use url::Url;

use crate::endpoints::Endpoints;
use crate::error::ClientError;
use crate::service::JobService;
use crate::sse::SseTransport;
use crate::wire::JobRecord;
use crate::ws::WsTransport;

/// HTTP client for one job service.
#[derive(Clone)]
pub struct JobsApi {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl JobsApi {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    /// Server-Sent Events transport sharing this client's connection pool.
    pub fn sse_transport(&self) -> SseTransport {
        SseTransport::new(self.client.clone(), self.endpoints.clone())
    }

    /// WebSocket transport on the same service.
    pub fn ws_transport(&self) -> WsTransport {
        WsTransport::new(self.endpoints.clone())
    }

    // ---- response handling ----

    /// Turn a non-2xx response into [`ClientError::Api`] carrying the body.
    pub(crate) async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(response)
    }

    /// Decode the JSON body of a 2xx response.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// For endpoints whose 2xx body carries nothing we need.
    async fn check_status(response: reqwest::Response) -> Result<(), ClientError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl JobService for JobsApi {
    /// `GET {jobs}`.
    async fn list_jobs(&self) -> Result<Vec<JobRecord>, ClientError> {
        let response = self.client.get(self.endpoints.jobs()).send().await?;
        Self::parse_response(response).await
    }

    /// `POST {jobs}` with `{"url": ...}`.
    async fn create_job(&self, source_url: &str) -> Result<JobRecord, ClientError> {
        let body = serde_json::json!({ "url": source_url });
        let response = self
            .client
            .post(self.endpoints.jobs())
            .json(&body)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// `DELETE {jobs}/{id}`.
    async fn delete_job(&self, id: &JobId) -> Result<(), ClientError> {
        let response = self.client.delete(self.endpoints.job(id)?).send().await?;
        Self::check_status(response).await
    }

    /// `POST {jobs}/{id}/retry`.
    async fn retry_job(&self, id: &JobId) -> Result<(), ClientError> {
        let response = self.client.post(self.endpoints.retry(id)?).send().await?;
        Self::check_status(response).await
    }

    fn stream_url(&self, id: &JobId) -> Result<Url, ClientError> {
        self.endpoints.stream(id)
    }
}
