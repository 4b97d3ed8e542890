//! WebSocket push transport.
//!
//! Connects to `ws(s)://.../{jobs}/{id}/ws` and reads envelope-style text
//! frames. A close frame ends the stream; binary and control frames are
//! ignored.

use async_trait::async_trait;
use futures::{future, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tubesync_core::JobId;

use crate::endpoints::Endpoints;
use crate::error::ClientError;
use crate::messages::{parse_frame, PushEvent};
use crate::service::{PushStream, PushTransport};

/// Push transport over a per-job WebSocket.
#[derive(Clone)]
pub struct WsTransport {
    endpoints: Endpoints,
}

impl WsTransport {
    pub fn new(endpoints: Endpoints) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn open(&self, id: &JobId) -> Result<PushStream, ClientError> {
        let url = self.endpoints.websocket(id)?;

        let (ws_stream, _response) = connect_async(url.as_str()).await.map_err(|e| {
            ClientError::Connection(format!("Failed to connect to {url}: {e}"))
        })?;

        tracing::debug!(job_id = %id, "Push socket opened");

        let job_id = id.clone();
        let events = ws_stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(move |msg| future::ready(frame_to_event(msg, &job_id)));
        Ok(events.boxed())
    }
}

/// Translate one received frame. `None` means nothing to deliver.
fn frame_to_event(
    msg: Result<Message, tungstenite::Error>,
    job_id: &JobId,
) -> Option<Result<PushEvent, ClientError>> {
    match msg {
        Ok(Message::Text(text)) => match parse_frame(None, &text, None) {
            Ok(event) => event.map(Ok),
            Err(e) => {
                tracing::warn!(
                    job_id = %job_id,
                    error = %e,
                    raw_message = %text,
                    "Skipping malformed push frame",
                );
                None
            }
        },
        Ok(Message::Binary(_)) => {
            tracing::trace!(job_id = %job_id, "Ignoring binary frame");
            None
        }
        Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_) | Message::Close(_)) => None,
        Err(e) => Some(Err(ClientError::Connection(format!(
            "WebSocket receive error: {e}"
        )))),
    }
}
