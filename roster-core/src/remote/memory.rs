//! In-process stand-in for the remote service.
//!
//! Assigns sequential numeric ids like a typical REST backend and records
//! every call. Individual operations can be switched to fail so callers can
//! exercise their error paths without a network.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};

use super::{RemoteClient, RemoteError};
use crate::models::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    Create,
    Update,
    Delete,
    List,
}

#[derive(Debug)]
pub struct MemoryRemote {
    records: RwLock<BTreeMap<String, User>>,
    next_id: AtomicU64,
    failing: RwLock<HashSet<RemoteOp>>,
    calls: Mutex<Vec<RemoteOp>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::with_records(Vec::new())
    }

    /// Seeds the server. New ids continue after the highest numeric seed id.
    pub fn with_records(records: impl IntoIterator<Item = User>) -> Self {
        let records: BTreeMap<String, User> = records
            .into_iter()
            .map(|u| (u.id.clone(), u.synced()))
            .collect();
        let next_id = records
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .map_or(1, |max| max + 1);

        Self {
            records: RwLock::new(records),
            next_id: AtomicU64::new(next_id),
            failing: RwLock::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Makes every call of `op` fail with a connection error.
    pub fn fail(&self, op: RemoteOp) {
        self.failing.write().insert(op);
    }

    pub fn recover(&self, op: RemoteOp) {
        self.failing.write().remove(&op);
    }

    /// Fails or restores every operation at once.
    pub fn set_offline(&self, offline: bool) {
        let mut failing = self.failing.write();
        if offline {
            failing.extend([
                RemoteOp::Create,
                RemoteOp::Update,
                RemoteOp::Delete,
                RemoteOp::List,
            ]);
        } else {
            failing.clear();
        }
    }

    /// Every call attempted so far, in order, failed ones included.
    pub fn calls(&self) -> Vec<RemoteOp> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Server-side records ordered by id.
    pub fn records(&self) -> Vec<User> {
        self.records.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<User> {
        self.records.read().get(id).cloned()
    }

    /// Changes a record behind the client's back, as another device would.
    pub fn put(&self, user: User) {
        self.records.write().insert(user.id.clone(), user.synced());
    }

    fn enter(&self, op: RemoteOp) -> Result<(), RemoteError> {
        self.calls.lock().push(op);
        if self.failing.read().contains(&op) {
            return Err(RemoteError::Connection(format!(
                "simulated outage during {:?}",
                op
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn create(&self, user: &User) -> Result<User, RemoteError> {
        self.enter(RemoteOp::Create)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        let record = user.clone().with_id(id).synced();
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, id: &str, user: &User) -> Result<User, RemoteError> {
        self.enter(RemoteOp::Update)?;
        let mut records = self.records.write();
        let row = records
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        *row = user.clone().with_id(id).synced();
        Ok(row.clone())
    }

    async fn delete(&self, id: &str) -> Result<User, RemoteError> {
        self.enter(RemoteOp::Delete)?;
        self.records
            .write()
            .remove(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn list_all(&self) -> Result<Vec<User>, RemoteError> {
        self.enter(RemoteOp::List)?;
        Ok(self.records())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let remote = MemoryRemote::with_records([User::new("A", "A").with_id("41")]);

        let created = remote
            .create(&User::new("B", "B").with_id("local_x").mark_created())
            .await
            .unwrap();
        assert_eq!(created.id, "42");
        assert!(!created.pending_sync);
        assert_eq!(remote.records().len(), 2);
    }

    #[tokio::test]
    async fn test_update_and_delete_missing_are_not_found() {
        let remote = MemoryRemote::new();
        let user = User::new("A", "A");

        assert!(matches!(
            remote.update("9", &user).await,
            Err(RemoteError::NotFound(_))
        ));
        assert!(matches!(
            remote.delete("9").await,
            Err(RemoteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failure_injection_records_calls() {
        let remote = MemoryRemote::new();
        remote.fail(RemoteOp::List);

        assert!(remote.list_all().await.is_err());
        remote.recover(RemoteOp::List);
        assert!(remote.list_all().await.unwrap().is_empty());
        assert_eq!(remote.calls(), vec![RemoteOp::List, RemoteOp::List]);

        remote.set_offline(true);
        assert!(remote.create(&User::new("A", "A")).await.is_err());
        assert!(remote.records().is_empty());
    }
}
