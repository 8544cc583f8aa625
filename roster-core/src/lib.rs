//! Roster Core Library
//!
//! User model, local store, remote client and the offline-first sync engine
//! shared by Roster applications.

pub mod models;
pub mod remote;
pub mod repository;
pub mod store;
pub mod sync;

pub use models::{local_id, User};
pub use remote::{HttpRemoteClient, MemoryRemote, RemoteClient, RemoteError, RemoteOp};
pub use repository::{Repository, RepositoryError};
pub use store::{active_stream, EntityStore, MemoryUserStore, PendingCounts, StoreError};
pub use sync::{
    CancelHandle, DownloadSummary, SyncEngine, SyncError, SyncFailure, SyncPhase, SyncReport,
    UploadSummary,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
