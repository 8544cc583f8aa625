//! Sync error types.

use std::fmt;

use thiserror::Error;

use crate::remote::RemoteError;
use crate::store::StoreError;

/// Errors that stop a sync phase.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The server answered, but with something the local state can't absorb.
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    #[error("Sync cancelled")]
    Cancelled,
}

/// The two phases of a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Upload,
    Download,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Upload => write!(f, "Upload"),
            SyncPhase::Download => write!(f, "Download"),
        }
    }
}

/// A failed full sync, tagged with the phase that failed.
///
/// An upload failure means the download never ran. A download failure leaves
/// whatever the upload already committed in place.
#[derive(Error, Debug)]
#[error("{phase} failed: {error}")]
pub struct SyncFailure {
    pub phase: SyncPhase,
    #[source]
    pub error: SyncError,
}

impl SyncFailure {
    pub fn upload(error: SyncError) -> Self {
        Self {
            phase: SyncPhase::Upload,
            error,
        }
    }

    pub fn download(error: SyncError) -> Self {
        Self {
            phase: SyncPhase::Download,
            error,
        }
    }
}
