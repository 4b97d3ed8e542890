//! Client-side synchronization engine for remote download jobs.
//!
//! Keeps a local, ordered job collection consistent with a remote job
//! service using two unreliable producers: a full-snapshot [`Poller`] and a
//! per-job [`PushMultiplexer`]. Both feed a single engine task that merges
//! every update through [`tubesync_core::merge`]. The view layer talks to
//! the engine through an [`EngineHandle`].

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
mod inbox;
pub mod multiplexer;
pub mod poller;
pub mod store;

pub use config::{EngineConfig, PushTransportKind};
pub use engine::{EngineHandle, EngineStats, SyncEngine};
pub use error::{ConfigError, EngineError};
pub use events::{ChangeEvent, EventBus};
pub use multiplexer::PushMultiplexer;
pub use poller::{Poller, PollerConfig};
pub use store::{IgnoreReason, JobStore, UpsertOutcome};
