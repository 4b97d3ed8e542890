//! Domain model for the tubesync job synchronization engine.
//!
//! Holds the job record, its lifecycle state machine, partial updates, the
//! reconciliation policy that merges them, and source reference
//! normalization. Nothing in this crate performs I/O.

pub mod error;
pub mod job;
pub mod reconcile;
pub mod source;
pub mod status;
pub mod types;
pub mod update;

pub use error::{SourceError, TransitionError};
pub use job::{Job, Progress};
pub use reconcile::{merge, Merge};
pub use source::normalize_source_url;
pub use status::{check_transition, JobStatus, TransitionCause};
pub use types::{JobId, Timestamp};
pub use update::{JobUpdate, UpdateOrigin};
