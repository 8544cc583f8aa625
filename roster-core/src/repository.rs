//! The single entry point the application talks to.
//!
//! Local writes go straight to the store and never wait on the network. Sync
//! operations delegate to the [`SyncEngine`]. Every operation produces a short
//! status message, returned to the caller and broadcast to subscribers.

use std::sync::Arc;

use futures::Stream;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::models::{local_id, User};
use crate::remote::RemoteClient;
use crate::store::{self, EntityStore, PendingCounts};
use crate::sync::{CancelHandle, SyncEngine, SyncError, SyncFailure, SyncReport};

const NOTIFICATION_CAPACITY: usize = 64;

/// A failed repository operation with a user-facing message.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct RepositoryError {
    pub message: String,
    #[source]
    pub cause: Option<SyncError>,
}

impl RepositoryError {
    fn new(context: &str, cause: impl Into<SyncError>) -> Self {
        let cause = cause.into();
        Self {
            message: format!("{}: {}", context, cause),
            cause: Some(cause),
        }
    }

    /// True when retrying later could succeed, e.g. the server was unreachable.
    pub fn is_transient(&self) -> bool {
        matches!(&self.cause, Some(SyncError::Remote(e)) if e.is_transient())
    }
}

pub struct Repository {
    store: Arc<dyn EntityStore>,
    engine: SyncEngine,
    notifications: broadcast::Sender<String>,
}

impl Repository {
    pub fn new(store: Arc<dyn EntityStore>, remote: Arc<dyn RemoteClient>) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            engine: SyncEngine::new(store.clone(), remote),
            store,
            notifications,
        }
    }

    /// Status messages from every subsequent operation, in order.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<String> {
        self.notifications.subscribe()
    }

    /// Live list of active users. Yields the current list first.
    pub fn active_users(&self) -> impl Stream<Item = Vec<User>> {
        store::active_stream(self.store.as_ref())
    }

    pub async fn list_active(&self) -> Result<Vec<User>, RepositoryError> {
        self.store
            .list_active()
            .await
            .map_err(|e| RepositoryError::new("Could not load users", e))
    }

    /// Looks up an active user. Tombstones read as absent.
    pub async fn get(&self, id: &str) -> Result<Option<User>, RepositoryError> {
        let user = self
            .store
            .get(id)
            .await
            .map_err(|e| RepositoryError::new("Could not load user", e))?;
        Ok(user.filter(User::is_active))
    }

    pub async fn pending_counts(&self) -> Result<PendingCounts, RepositoryError> {
        self.store
            .pending_counts()
            .await
            .map_err(|e| RepositoryError::new("Could not count pending changes", e))
    }

    /// Stores a new user as a pending create. A blank id gets a local one.
    pub async fn insert(&self, user: User) -> Result<String, RepositoryError> {
        let mut user = user.mark_created();
        if local_id::is_blank(&user.id) {
            user.id = local_id::generate();
        }

        let result = self.store.insert(&user).await;
        self.report(result, "User saved locally", "Could not save user")
    }

    /// Replaces a stored user and marks it dirty. A tombstone stays a tombstone.
    pub async fn update(&self, user: User) -> Result<String, RepositoryError> {
        let result = self.store.update(&user.mark_dirty()).await;
        self.report(result, "User updated locally", "Could not update user")
    }

    /// Logical delete: the row stays until the next upload removes it.
    pub async fn delete(&self, user: User) -> Result<String, RepositoryError> {
        let result = self.store.update(&user.mark_deleted()).await;
        self.report(result, "User marked for deletion", "Could not delete user")
    }

    /// Runs only the upload phase.
    pub async fn upload_pending_changes(&self) -> Result<String, RepositoryError> {
        match self.engine.upload().await {
            Ok(summary) => Ok(self.notify(summary.to_string())),
            Err(e) => Err(self.fail(RepositoryError::new("Upload failed", e))),
        }
    }

    /// Runs only the download phase.
    pub async fn sync_from_server(&self) -> Result<String, RepositoryError> {
        match self.engine.download().await {
            Ok(summary) => Ok(self.notify(summary.to_string())),
            Err(e) => Err(self.fail(RepositoryError::new("Download failed", e))),
        }
    }

    /// Upload then download, announcing each step. Waits for any sync already
    /// in flight.
    pub async fn sync(&self) -> Result<SyncReport, RepositoryError> {
        self.notify("Starting sync...".to_string());
        let result = self.engine.sync().await;
        self.finish_sync(result)
    }

    /// Like [`sync`](Self::sync), but returns `Ok(None)` without doing anything
    /// when another sync is in flight. Only the outcome is announced.
    pub async fn try_sync(&self) -> Result<Option<SyncReport>, RepositoryError> {
        match self.engine.try_sync().await {
            Ok(None) => Ok(None),
            Ok(Some(report)) => self.finish_sync(Ok(report)).map(Some),
            Err(failure) => self.finish_sync(Err(failure)).map(Some),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.engine.cancel_handle()
    }

    fn finish_sync(
        &self,
        result: Result<SyncReport, SyncFailure>,
    ) -> Result<SyncReport, RepositoryError> {
        match result {
            Ok(report) => {
                self.notify(report.upload.to_string());
                self.notify(report.download.to_string());
                Ok(report)
            }
            Err(failure) => {
                let message = failure.to_string();
                Err(self.fail(RepositoryError {
                    message,
                    cause: Some(failure.error),
                }))
            }
        }
    }

    fn report(
        &self,
        result: Result<(), store::StoreError>,
        success: &str,
        context: &str,
    ) -> Result<String, RepositoryError> {
        match result {
            Ok(()) => Ok(self.notify(success.to_string())),
            Err(e) => Err(self.fail(RepositoryError::new(context, e))),
        }
    }

    fn notify(&self, message: String) -> String {
        tracing::debug!("{}", message);
        // No subscribers is fine.
        let _ = self.notifications.send(message.clone());
        message
    }

    fn fail(&self, err: RepositoryError) -> RepositoryError {
        tracing::warn!("{}", err.message);
        let _ = self.notifications.send(err.message.clone());
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemote, RemoteOp};
    use crate::store::MemoryUserStore;
    use futures::StreamExt;

    struct TestContext {
        store: Arc<MemoryUserStore>,
        remote: Arc<MemoryRemote>,
        repo: Repository,
    }

    fn setup() -> TestContext {
        let store = Arc::new(MemoryUserStore::new());
        let remote = Arc::new(MemoryRemote::new());
        let repo = Repository::new(store.clone(), remote.clone());
        TestContext {
            store,
            remote,
            repo,
        }
    }

    fn drain(rx: &mut broadcast::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn test_insert_assigns_local_id_and_is_visible() {
        let ctx = setup();
        let mut active = Box::pin(ctx.repo.active_users());
        assert!(active.next().await.unwrap().is_empty());

        let message = ctx.repo.insert(User::new("Ada", "Lovelace")).await.unwrap();
        assert_eq!(message, "User saved locally");

        let view = active.next().await.unwrap();
        assert_eq!(view.len(), 1);
        assert!(view[0].id.starts_with("local_"));
        assert!(view[0].pending_sync);
        assert!(!view[0].pending_delete);
        assert_eq!(ctx.remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_insert_keeps_supplied_id() {
        let ctx = setup();
        ctx.repo
            .insert(User::new("A", "B").with_id("local_fixed"))
            .await
            .unwrap();
        assert!(ctx.store.get("local_fixed").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_update_preserves_tombstone() {
        let ctx = setup();
        let user = User::new("A", "B").with_id("5").mark_deleted();
        ctx.store.insert(&user).await.unwrap();

        ctx.repo.update(user.with_age(30)).await.unwrap();
        let row = ctx.store.get("5").await.unwrap().unwrap();
        assert!(row.pending_delete);
        assert!(row.pending_sync);
        assert_eq!(row.age, 30);
    }

    #[tokio::test]
    async fn test_delete_hides_user_but_keeps_row() {
        let ctx = setup();
        let user = User::new("A", "B").with_id("5");
        ctx.store.insert(&user).await.unwrap();

        let message = ctx.repo.delete(user).await.unwrap();
        assert_eq!(message, "User marked for deletion");

        assert!(ctx.repo.list_active().await.unwrap().is_empty());
        assert!(ctx.repo.get("5").await.unwrap().is_none());
        let row = ctx.store.get("5").await.unwrap().unwrap();
        assert!(row.pending_delete && row.pending_sync);
    }

    #[tokio::test]
    async fn test_store_failure_becomes_repository_error() {
        let ctx = setup();
        let mut rx = ctx.repo.subscribe_notifications();
        ctx.store.set_fail_writes(true);

        let err = ctx.repo.insert(User::new("A", "B")).await.unwrap_err();
        assert!(err.message.starts_with("Could not save user"));
        assert!(matches!(err.cause, Some(SyncError::Storage(_))));
        assert_eq!(drain(&mut rx), vec![err.message]);
    }

    #[tokio::test]
    async fn test_update_of_unknown_user_fails() {
        let ctx = setup();
        let err = ctx
            .repo
            .update(User::new("A", "B").with_id("404"))
            .await
            .unwrap_err();
        assert!(err.message.contains("User not found: 404"));
    }

    #[tokio::test]
    async fn test_sync_announces_each_phase() {
        let ctx = setup();
        ctx.remote.put(User::new("Remote", "User").with_id("10"));
        ctx.repo.insert(User::new("Local", "User")).await.unwrap();
        let mut rx = ctx.repo.subscribe_notifications();

        let report = ctx.repo.sync().await.unwrap();
        assert_eq!(report.upload.created, 1);

        assert_eq!(
            drain(&mut rx),
            vec![
                "Starting sync...".to_string(),
                "Upload: 1 updated, 0 deleted".to_string(),
                "Download: 1 new, 1 updated".to_string(),
            ]
        );
        assert_eq!(ctx.repo.pending_counts().await.unwrap(), PendingCounts::default());
    }

    #[tokio::test]
    async fn test_sync_stops_after_upload_failure() {
        let ctx = setup();
        ctx.repo.insert(User::new("Local", "User")).await.unwrap();
        ctx.remote.fail(RemoteOp::Create);
        let mut rx = ctx.repo.subscribe_notifications();

        let err = ctx.repo.sync().await.unwrap_err();
        assert!(err.message.starts_with("Upload failed: "));

        let messages = drain(&mut rx);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], "Starting sync...");
        assert_eq!(messages[1], err.message);
    }

    #[tokio::test]
    async fn test_phases_can_run_separately() {
        let ctx = setup();
        ctx.remote.put(User::new("Remote", "User").with_id("3"));

        assert_eq!(
            ctx.repo.upload_pending_changes().await.unwrap(),
            "Upload: 0 updated, 0 deleted"
        );
        assert_eq!(
            ctx.repo.sync_from_server().await.unwrap(),
            "Download: 1 new, 0 updated"
        );

        ctx.remote.set_offline(true);
        let err = ctx.repo.sync_from_server().await.unwrap_err();
        assert!(err.message.starts_with("Download failed: "));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_rejected_and_local_failures_are_not_transient() {
        let ctx = setup();
        ctx.repo
            .insert(User::new("A", "B").with_id("5").mark_dirty())
            .await
            .unwrap();

        // The server has no user 5.
        let err = ctx.repo.sync().await.unwrap_err();
        assert!(matches!(err.cause, Some(SyncError::Remote(_))));
        assert!(!err.is_transient());

        ctx.store.set_fail_writes(true);
        let err = ctx.repo.insert(User::new("C", "D")).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_try_sync_runs_when_idle() {
        let ctx = setup();
        ctx.repo.insert(User::new("A", "B")).await.unwrap();

        let report = ctx.repo.try_sync().await.unwrap();
        assert_eq!(report.unwrap().upload.created, 1);
    }
}
