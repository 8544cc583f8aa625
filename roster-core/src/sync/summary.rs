use chrono::{DateTime, Utc};
use std::fmt;

/// Outcome of the upload phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    /// Local users created on the server and re-keyed locally.
    pub created: usize,
    /// Existing server users updated.
    pub updated: usize,
    /// Tombstones removed locally.
    pub deleted: usize,
    /// Remote deletes that failed and were ignored.
    pub remote_delete_failures: usize,
}

impl UploadSummary {
    /// Creates and updates together.
    pub fn uploaded(&self) -> usize {
        self.created + self.updated
    }
}

impl fmt::Display for UploadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Upload: {} updated, {} deleted",
            self.uploaded(),
            self.deleted
        )
    }
}

/// Outcome of the download phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Server users that were unknown locally.
    pub inserted: usize,
    /// Known users overwritten with server data.
    pub updated: usize,
    /// Known users left alone because they were dirty when the batch applied.
    pub skipped_dirty: usize,
    /// Server records without a usable id.
    pub ignored: usize,
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Download: {} new, {} updated",
            self.inserted, self.updated
        )?;
        if self.skipped_dirty > 0 {
            write!(f, ", {} kept local", self.skipped_dirty)?;
        }
        Ok(())
    }
}

/// Outcome of a full upload-then-download sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub upload: UploadSummary,
    pub download: DownloadSummary,
    pub finished_at: DateTime<Utc>,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}; {}", self.upload, self.download)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_message() {
        let summary = UploadSummary {
            created: 2,
            updated: 1,
            deleted: 1,
            remote_delete_failures: 0,
        };
        assert_eq!(summary.to_string(), "Upload: 3 updated, 1 deleted");
    }

    #[test]
    fn test_download_message() {
        let mut summary = DownloadSummary {
            inserted: 2,
            updated: 5,
            ..Default::default()
        };
        assert_eq!(summary.to_string(), "Download: 2 new, 5 updated");

        summary.skipped_dirty = 1;
        assert_eq!(summary.to_string(), "Download: 2 new, 5 updated, 1 kept local");
    }
}
