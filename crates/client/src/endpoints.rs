//! URL layout of the job service.
//!
//! | Operation      | Request                          |
//! |----------------|----------------------------------|
//! | list           | `GET    {jobs}`                  |
//! | create         | `POST   {jobs}`                  |
//! | delete         | `DELETE {jobs}/{id}`             |
//! | retry          | `POST   {jobs}/{id}/retry`       |
//! | push (SSE)     | `GET    {jobs}/{id}/progress`    |
//! | push (WS)      | `ws(s)://.../{jobs}/{id}/ws`     |
//! | play           | `GET    {jobs}/{id}/stream`      |

use tubesync_core::JobId;
use url::Url;

use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct Endpoints {
    jobs: Url,
}

impl Endpoints {
    /// * `base_url`  - service root, e.g. `http://localhost:8000`.
    /// * `jobs_path` - collection path, e.g. `/api/videos`.
    pub fn new(base_url: &str, jobs_path: &str) -> Result<Self, ClientError> {
        let raw = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            jobs_path.trim_matches('/')
        );
        let jobs = Url::parse(&raw).map_err(|e| ClientError::Endpoint(format!("{raw}: {e}")))?;
        if !matches!(jobs.scheme(), "http" | "https") {
            return Err(ClientError::Endpoint(format!(
                "{raw}: scheme must be http or https"
            )));
        }
        Ok(Self { jobs })
    }

    /// The job collection.
    pub fn jobs(&self) -> Url {
        self.jobs.clone()
    }

    pub fn job(&self, id: &JobId) -> Result<Url, ClientError> {
        self.job_resource(id, &[])
    }

    pub fn retry(&self, id: &JobId) -> Result<Url, ClientError> {
        self.job_resource(id, &["retry"])
    }

    pub fn progress(&self, id: &JobId) -> Result<Url, ClientError> {
        self.job_resource(id, &["progress"])
    }

    pub fn stream(&self, id: &JobId) -> Result<Url, ClientError> {
        self.job_resource(id, &["stream"])
    }

    /// WebSocket push endpoint, on the same host with a `ws`/`wss` scheme.
    pub fn websocket(&self, id: &JobId) -> Result<Url, ClientError> {
        let mut url = self.job_resource(id, &["ws"])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::Endpoint(format!("cannot switch {url} to {scheme}")))?;
        Ok(url)
    }

    fn job_resource(&self, id: &JobId, tail: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.jobs.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Endpoint(format!("{} cannot be a base", self.jobs)))?
            .pop_if_empty()
            .push(id.as_str())
            .extend(tail);
        Ok(url)
    }
}
