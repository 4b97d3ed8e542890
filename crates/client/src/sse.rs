//! Server-Sent Events push transport.
//!
//! Opens `GET {jobs}/{id}/progress` with `Accept: text/event-stream` and
//! turns the byte stream into [`PushEvent`]s. Frames are split on blank
//! lines; `event:`, `data:` and `id:` fields are honoured, comments and
//! `retry:` are ignored. A numeric `id:` becomes the progress sequence.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use tubesync_core::JobId;

use crate::api::JobsApi;
use crate::endpoints::Endpoints;
use crate::error::ClientError;
use crate::messages::{parse_frame, PushEvent};
use crate::service::{PushStream, PushTransport};

/// One dispatched SSE frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseFrame {
    fn into_push_event(self) -> Result<Option<PushEvent>, ClientError> {
        let sequence = self.id.as_deref().and_then(|id| id.trim().parse().ok());
        parse_frame(self.event.as_deref(), &self.data, sequence)
    }
}

/// Incremental SSE line decoder.
///
/// Bytes may arrive split at any position, including inside a UTF-8
/// sequence, so lines are buffered as raw bytes until a newline is seen.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl SseDecoder {
    /// Feed a chunk and return every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        Some(SseFrame {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
            // The last event id persists across frames.
            id: self.id.clone(),
        })
    }
}

/// Decode an SSE byte stream into push events.
///
/// Malformed frames are logged and skipped; transport errors are yielded so
/// the channel can reconnect.
pub fn decode_events<S, B, E>(bytes: S, job_id: JobId) -> PushStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ClientError> + Send + 'static,
{
    let state = (bytes.boxed(), SseDecoder::default(), VecDeque::<SseFrame>::new());

    stream::unfold(state, move |(mut bytes, mut decoder, mut pending)| {
        let job_id = job_id.clone();
        async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    match frame.into_push_event() {
                        Ok(Some(event)) => return Some((Ok(event), (bytes, decoder, pending))),
                        Ok(None) => continue,
                        Err(e) => {
                            tracing::warn!(job_id = %job_id, error = %e, "Skipping malformed push frame");
                            continue;
                        }
                    }
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.feed(chunk.as_ref())),
                    Some(Err(e)) => return Some((Err(e.into()), (bytes, decoder, pending))),
                    None => return None,
                }
            }
        }
    })
    .boxed()
}

/// Push transport over `text/event-stream`.
#[derive(Clone)]
pub struct SseTransport {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl SseTransport {
    pub fn new(client: reqwest::Client, endpoints: Endpoints) -> Self {
        Self { client, endpoints }
    }
}

#[async_trait]
impl PushTransport for SseTransport {
    async fn open(&self, id: &JobId) -> Result<PushStream, ClientError> {
        let url = self.endpoints.progress(id)?;
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let response = JobsApi::ensure_success(response).await?;

        tracing::debug!(job_id = %id, "Push stream opened");
        Ok(decode_events(response.bytes_stream(), id.clone()))
    }
}
