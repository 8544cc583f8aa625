//! Two-phase sync between the local store and the remote service.
//!
//! Upload runs first: dirty users are created or updated remotely, then
//! tombstones are deleted remotely (best effort) and removed locally.
//! Download runs only after a successful upload: the full remote listing is
//! split into inserts and updates against the local id set and applied in two
//! batches.
//!
//! Only one sync runs at a time per engine. [`SyncEngine::sync`] queues behind
//! an in-flight run, [`SyncEngine::try_sync`] skips instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use super::error::{SyncError, SyncFailure};
use super::summary::{DownloadSummary, SyncReport, UploadSummary};
use crate::models::{local_id, User};
use crate::remote::RemoteClient;
use crate::store::EntityStore;

/// Requests cancellation of the sync in flight. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncEngine {
    store: Arc<dyn EntityStore>,
    remote: Arc<dyn RemoteClient>,
    gate: Mutex<()>,
    cancel: CancelHandle,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn EntityStore>, remote: Arc<dyn RemoteClient>) -> Self {
        Self {
            store,
            remote,
            gate: Mutex::new(()),
            cancel: CancelHandle::default(),
        }
    }

    /// Handle for cancelling from another task. Cancellation takes effect at
    /// the next per-user or per-call boundary; a request made while nothing is
    /// running is discarded when the next sync starts.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Upload, then download. Waits for any sync already in flight.
    pub async fn sync(&self) -> Result<SyncReport, SyncFailure> {
        let _guard = self.gate.lock().await;
        self.cancel.reset();
        self.run_both().await
    }

    /// Like [`sync`](Self::sync) but returns `Ok(None)` immediately if another
    /// sync is in flight, so repeated triggers coalesce.
    pub async fn try_sync(&self) -> Result<Option<SyncReport>, SyncFailure> {
        let Ok(_guard) = self.gate.try_lock() else {
            tracing::debug!("Sync already running, skipping");
            return Ok(None);
        };
        self.cancel.reset();
        self.run_both().await.map(Some)
    }

    /// Upload phase on its own.
    pub async fn upload(&self) -> Result<UploadSummary, SyncError> {
        let _guard = self.gate.lock().await;
        self.cancel.reset();
        self.run_upload().await
    }

    /// Download phase on its own.
    pub async fn download(&self) -> Result<DownloadSummary, SyncError> {
        let _guard = self.gate.lock().await;
        self.cancel.reset();
        self.run_download().await
    }

    async fn run_both(&self) -> Result<SyncReport, SyncFailure> {
        let upload = self.run_upload().await.map_err(SyncFailure::upload)?;
        let download = self.run_download().await.map_err(SyncFailure::download)?;

        Ok(SyncReport {
            upload,
            download,
            finished_at: Utc::now(),
        })
    }

    fn check_cancelled(&self) -> Result<(), SyncError> {
        if self.cancel.is_cancelled() {
            tracing::info!("Sync cancelled");
            return Err(SyncError::Cancelled);
        }
        Ok(())
    }

    async fn run_upload(&self) -> Result<UploadSummary, SyncError> {
        let mut summary = UploadSummary::default();

        let dirty = self.store.dirty_for_upload().await?;
        for user in dirty {
            self.check_cancelled()?;
            if user.is_local() {
                self.upload_new(&user).await?;
                summary.created += 1;
            } else {
                self.remote.update(&user.id, &user).await?;
                if !self.store.mark_synced(&user).await? {
                    tracing::debug!("User {} changed during upload, left pending", user.id);
                }
                summary.updated += 1;
            }
        }

        let tombstones = self.store.tombstones_for_upload().await?;
        for user in tombstones {
            self.check_cancelled()?;
            if !user.is_local() {
                if let Err(e) = self.remote.delete(&user.id).await {
                    tracing::warn!("Remote delete of user {} failed, dropping tombstone: {}", user.id, e);
                    summary.remote_delete_failures += 1;
                }
            }
            self.store.physical_delete(&user).await?;
            summary.deleted += 1;
        }

        tracing::info!(
            created = summary.created,
            updated = summary.updated,
            deleted = summary.deleted,
            "Upload finished"
        );
        Ok(summary)
    }

    /// Creates a local user remotely and re-keys the row under the server id.
    async fn upload_new(&self, user: &User) -> Result<(), SyncError> {
        let created = self.remote.create(user).await?;

        if local_id::is_blank(&created.id) || created.is_local() {
            return Err(SyncError::Reconciliation(format!(
                "server returned no usable id for {}",
                user.id
            )));
        }

        self.store.promote(user, &created).await?;
        tracing::debug!("User {} is now {}", user.id, created.id);
        Ok(())
    }

    async fn run_download(&self) -> Result<DownloadSummary, SyncError> {
        let remote_users = self.remote.list_all().await?;
        self.check_cancelled()?;
        let local_ids = self.store.all_identifiers().await?;

        let mut summary = DownloadSummary::default();
        let mut inserts = Vec::new();
        let mut updates = Vec::new();

        for user in remote_users {
            if local_id::is_blank(&user.id) || user.is_local() {
                tracing::warn!("Ignoring server record without a usable id: {:?}", user.id);
                summary.ignored += 1;
            } else if local_ids.contains(&user.id) {
                updates.push(user);
            } else {
                inserts.push(user);
            }
        }

        if !updates.is_empty() {
            summary.updated = self.store.bulk_update(&updates).await?;
            summary.skipped_dirty = updates.len() - summary.updated;
        }
        if !inserts.is_empty() {
            summary.inserted = self.store.bulk_insert(&inserts).await?;
        }

        tracing::info!(
            inserted = summary.inserted,
            updated = summary.updated,
            skipped_dirty = summary.skipped_dirty,
            "Download finished"
        );
        Ok(summary)
    }
}
