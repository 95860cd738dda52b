//! Durable job store shared by the control plane and the dispatcher daemon.
//!
//! A job owns one or more media rows; only media carry a status. The job's
//! effective status is derived from its media, which keeps a single source
//! of truth for progress. The control plane only ever inserts QUEUED rows;
//! every later transition belongs to the scheduler.

pub mod metadata;
pub mod models;
mod store;

pub use metadata::{decode_metadata, encode_metadata};
pub use models::{
    derive_status, JobKind, JobRecord, JobWithMedia, MediaRecord, MediaStatus, NewJob, QueuedMedia,
};
pub use store::{JobStore, DB_FILE_NAME};
