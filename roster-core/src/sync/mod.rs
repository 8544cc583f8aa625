//! Offline-first synchronization between the local store and the server.
//!
//! ## Rules
//!
//! - Local writes only mark rows dirty; nothing touches the network until a
//!   sync runs.
//! - Upload precedes download within one sync. A failed create or update
//!   aborts the upload and skips the download; a failed remote delete is
//!   logged and the tombstone is dropped anyway.
//! - Download applies the server's records as the new truth for clean rows,
//!   inserts unknown ones, and never removes local rows.

mod engine;
mod error;
mod summary;

pub use engine::{CancelHandle, SyncEngine};
pub use error::{SyncError, SyncFailure, SyncPhase};
pub use summary::{DownloadSummary, SyncReport, UploadSummary};
