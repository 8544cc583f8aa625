//! Local durable storage of users and their sync-state flags.
//!
//! The store owns the only persisted copy of every user. Each single-row
//! operation is atomic, each bulk call is one atomic batch, and every committed
//! write republishes the active view to subscribers before it returns.

mod memory;

pub use memory::MemoryUserStore;

use std::collections::HashSet;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use thiserror::Error;
use tokio::sync::watch;

use crate::models::User;

/// Errors raised by a store backend. The store never retries.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Corrupt row for user {id}: {reason}")]
    Corrupt { id: String, reason: String },

    /// A write that would break the flag rules, e.g. a tombstone that is not dirty.
    #[error("Invalid row for user {id}: {reason}")]
    Invalid { id: String, reason: String },
}

impl StoreError {
    /// Wraps any backend error (sqlx, io, ...).
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

/// Number of rows waiting for the next upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCounts {
    /// Dirty rows that are not tombstones.
    pub dirty: usize,
    /// Tombstones.
    pub tombstones: usize,
}

impl PendingCounts {
    pub fn is_empty(&self) -> bool {
        self.dirty == 0 && self.tombstones == 0
    }
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Live view of users with `pending_delete = false`.
    fn subscribe_active(&self) -> watch::Receiver<Vec<User>>;

    async fn list_active(&self) -> Result<Vec<User>, StoreError>;

    /// Looks up any row, tombstones included.
    async fn get(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// Inserts a row, replacing any row with the same id.
    async fn insert(&self, user: &User) -> Result<(), StoreError>;

    /// Replaces an existing row. Fails with `NotFound` if there is none.
    async fn update(&self, user: &User) -> Result<(), StoreError>;

    /// Removes the row for good. Removing a missing row is not an error.
    async fn physical_delete(&self, user: &User) -> Result<(), StoreError>;

    /// Clears `pending_sync` on the row uploaded as `snapshot`, but only while
    /// it still holds exactly those fields and is not a tombstone. Returns
    /// whether the row was cleared. A row edited or deleted meanwhile stays
    /// pending for the next upload.
    async fn mark_synced(&self, snapshot: &User) -> Result<bool, StoreError>;

    /// Removes the temporary row uploaded as `snapshot` and stores
    /// [`promoted_row`] under the server id, as a single atomic step.
    async fn promote(&self, snapshot: &User, record: &User) -> Result<(), StoreError>;

    /// Upserts every record with cleared flags in one batch. Returns rows written.
    async fn bulk_insert(&self, users: &[User]) -> Result<usize, StoreError>;

    /// Overwrites every listed row that is clean at apply time, clearing its
    /// flags, in one batch. Dirty rows are left alone. Returns rows changed.
    async fn bulk_update(&self, users: &[User]) -> Result<usize, StoreError>;

    /// Rows with `pending_sync = true` and `pending_delete = false`.
    async fn dirty_for_upload(&self) -> Result<Vec<User>, StoreError>;

    /// Rows with `pending_delete = true`.
    async fn tombstones_for_upload(&self) -> Result<Vec<User>, StoreError>;

    async fn all_identifiers(&self) -> Result<HashSet<String>, StoreError>;

    async fn pending_counts(&self) -> Result<PendingCounts, StoreError>;
}

/// The row stored under the server id after a create.
///
/// An unchanged row takes the server's record with clean flags. A row edited
/// or deleted while the create was in flight keeps its local fields and flags
/// under the new id, so the change goes out with the next upload.
pub fn promoted_row(current: Option<User>, snapshot: &User, record: &User) -> User {
    match current {
        Some(local) if local.pending_delete || !local.same_fields(snapshot) => User {
            id: record.id.clone(),
            ..local
        },
        _ => record.clone().synced(),
    }
}

/// Rejects a tombstone that is not also pending sync.
pub fn check_flags(user: &User) -> Result<(), StoreError> {
    if user.pending_delete && !user.pending_sync {
        return Err(StoreError::Invalid {
            id: user.id.clone(),
            reason: "a row pending delete must also be pending sync".to_string(),
        });
    }
    Ok(())
}

/// Turns a watch receiver into a stream that yields the current value first
/// and then every committed change. Ends when the sender is dropped.
pub fn watch_stream<T>(rx: watch::Receiver<T>) -> impl Stream<Item = T>
where
    T: Clone + Send + Sync + 'static,
{
    stream::unfold((rx, true), |(mut rx, first)| async move {
        if !first && rx.changed().await.is_err() {
            return None;
        }
        let value = rx.borrow_and_update().clone();
        Some((value, (rx, false)))
    })
}

/// Active-view stream for any store.
pub fn active_stream(store: &dyn EntityStore) -> impl Stream<Item = Vec<User>> {
    watch_stream(store.subscribe_active())
}
