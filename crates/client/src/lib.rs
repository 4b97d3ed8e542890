//! HTTP and push-stream client for the remote download job service.
//!
//! Provides the REST wrapper used for polling and user actions, the wire
//! representation of job records, push frame parsing, the Server-Sent
//! Events and WebSocket push transports, and reconnection backoff.

pub mod api;
pub mod endpoints;
pub mod error;
pub mod messages;
pub mod reconnect;
pub mod service;
pub mod sse;
pub mod wire;
pub mod ws;

pub use api::JobsApi;
pub use endpoints::Endpoints;
pub use error::ClientError;
pub use messages::{parse_frame, PushEvent};
pub use reconnect::{Backoff, ReconnectConfig};
pub use service::{JobService, PushStream, PushTransport};
pub use sse::SseTransport;
pub use wire::JobRecord;
pub use ws::WsTransport;
