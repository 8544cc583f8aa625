//! In-memory user store.
//!
//! Suitable for unit tests and ephemeral sessions that don't need persistence.
//! Semantics match the SQLite store: `insert` and `update` reject a tombstone
//! that is not dirty, and bulk updates skip dirty rows. Rows seeded through
//! [`MemoryUserStore::with_rows`] are taken as given.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;

use super::{check_flags, promoted_row, EntityStore, PendingCounts, StoreError};
use crate::models::User;

#[derive(Debug)]
pub struct MemoryUserStore {
    rows: RwLock<BTreeMap<String, User>>,
    active_tx: watch::Sender<Vec<User>>,
    fail_writes: AtomicBool,
}

impl Default for MemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryUserStore {
    pub fn new() -> Self {
        let (active_tx, _) = watch::channel(Vec::new());
        Self {
            rows: RwLock::new(BTreeMap::new()),
            active_tx,
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Creates a store pre-populated with rows, flags kept as given.
    pub fn with_rows(rows: impl IntoIterator<Item = User>) -> Self {
        let store = Self::new();
        {
            let mut map = store.rows.write();
            for user in rows {
                map.insert(user.id.clone(), user);
            }
            store.publish(&map);
        }
        store
    }

    /// Makes every subsequent write fail until turned off again.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every row, tombstones included, ordered by id.
    pub fn snapshot(&self) -> Vec<User> {
        self.rows.read().values().cloned().collect()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::backend(std::io::Error::other(
                "memory store is read-only",
            )));
        }
        Ok(())
    }

    fn publish(&self, rows: &BTreeMap<String, User>) {
        self.active_tx.send_replace(active_view(rows));
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, User>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.check_writable()?;
        let mut rows = self.rows.write();
        let result = f(&mut rows)?;
        self.publish(&rows);
        Ok(result)
    }
}

fn active_view(rows: &BTreeMap<String, User>) -> Vec<User> {
    let mut active: Vec<User> = rows.values().filter(|u| u.is_active()).cloned().collect();
    active.sort_by(|a, b| {
        (&a.last_name, &a.first_name, &a.id).cmp(&(&b.last_name, &b.first_name, &b.id))
    });
    active
}

#[async_trait]
impl EntityStore for MemoryUserStore {
    fn subscribe_active(&self) -> watch::Receiver<Vec<User>> {
        self.active_tx.subscribe()
    }

    async fn list_active(&self) -> Result<Vec<User>, StoreError> {
        Ok(active_view(&self.rows.read()))
    }

    async fn get(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.rows.read().get(id).cloned())
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        check_flags(user)?;
        self.write(|rows| {
            rows.insert(user.id.clone(), user.clone());
            Ok(())
        })
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        check_flags(user)?;
        self.write(|rows| match rows.get_mut(&user.id) {
            Some(row) => {
                *row = user.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(user.id.clone())),
        })
    }

    async fn physical_delete(&self, user: &User) -> Result<(), StoreError> {
        self.write(|rows| {
            rows.remove(&user.id);
            Ok(())
        })
    }

    async fn mark_synced(&self, snapshot: &User) -> Result<bool, StoreError> {
        self.write(|rows| match rows.get_mut(&snapshot.id) {
            Some(row) if !row.pending_delete && row.same_fields(snapshot) => {
                row.pending_sync = false;
                Ok(true)
            }
            _ => Ok(false),
        })
    }

    async fn promote(&self, snapshot: &User, record: &User) -> Result<(), StoreError> {
        self.write(|rows| {
            let row = promoted_row(rows.remove(&snapshot.id), snapshot, record);
            rows.insert(row.id.clone(), row);
            Ok(())
        })
    }

    async fn bulk_insert(&self, users: &[User]) -> Result<usize, StoreError> {
        self.write(|rows| {
            for user in users {
                rows.insert(user.id.clone(), user.clone().synced());
            }
            Ok(users.len())
        })
    }

    async fn bulk_update(&self, users: &[User]) -> Result<usize, StoreError> {
        self.write(|rows| {
            let mut changed = 0;
            for user in users {
                if let Some(row) = rows.get_mut(&user.id) {
                    if !row.pending_sync {
                        *row = user.clone().synced();
                        changed += 1;
                    }
                }
            }
            Ok(changed)
        })
    }

    async fn dirty_for_upload(&self) -> Result<Vec<User>, StoreError> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|u| u.pending_sync && !u.pending_delete)
            .cloned()
            .collect())
    }

    async fn tombstones_for_upload(&self) -> Result<Vec<User>, StoreError> {
        Ok(self
            .rows
            .read()
            .values()
            .filter(|u| u.pending_delete)
            .cloned()
            .collect())
    }

    async fn all_identifiers(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.rows.read().keys().cloned().collect())
    }

    async fn pending_counts(&self) -> Result<PendingCounts, StoreError> {
        let rows = self.rows.read();
        Ok(PendingCounts {
            dirty: rows
                .values()
                .filter(|u| u.pending_sync && !u.pending_delete)
                .count(),
            tombstones: rows.values().filter(|u| u.pending_delete).count(),
        })
    }
}
