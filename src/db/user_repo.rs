use std::collections::HashSet;

use async_trait::async_trait;
use roster_core::store::{promoted_row, EntityStore, PendingCounts, StoreError};
use roster_core::User;
use sqlx::{SqliteExecutor, SqlitePool};
use tokio::sync::{watch, Mutex};

const COLUMNS: &str = "id, first_name, last_name, email, age, user_name, position_title, image, pending_sync, pending_delete";

/// SQLite-backed user store.
///
/// Every write commits before the active view is re-read and published, so
/// subscribers see the change before the write call returns. A failed re-read
/// is logged and does not fail the committed write.
pub struct SqliteUserStore {
    pool: SqlitePool,
    active_tx: watch::Sender<Vec<User>>,
    publish_lock: Mutex<()>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    first_name: String,
    last_name: String,
    email: String,
    age: i64,
    user_name: String,
    position_title: String,
    image: String,
    pending_sync: bool,
    pending_delete: bool,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let age = i32::try_from(row.age).map_err(|_| StoreError::Corrupt {
            id: row.id.clone(),
            reason: format!("age {} out of range", row.age),
        })?;

        Ok(User {
            id: row.id,
            first_name: row.first_name,
            last_name: row.last_name,
            email: row.email,
            age,
            user_name: row.user_name,
            position_title: row.position_title,
            image: row.image,
            pending_sync: row.pending_sync,
            pending_delete: row.pending_delete,
        })
    }
}

fn into_users(rows: Vec<UserRow>) -> Result<Vec<User>, StoreError> {
    rows.into_iter().map(User::try_from).collect()
}

/// Inserts or replaces a row with the user's own flags.
async fn upsert<'e, E>(executor: E, user: &User) -> Result<u64, sqlx::Error>
where
    E: SqliteExecutor<'e>,
{
    let result = sqlx::query(&format!(
        "INSERT OR REPLACE INTO users ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        COLUMNS
    ))
    .bind(&user.id)
    .bind(&user.first_name)
    .bind(&user.last_name)
    .bind(&user.email)
    .bind(user.age)
    .bind(&user.user_name)
    .bind(&user.position_title)
    .bind(&user.image)
    .bind(user.pending_sync)
    .bind(user.pending_delete)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

impl SqliteUserStore {
    /// Wraps a migrated pool and loads the initial active view.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        let (active_tx, _) = watch::channel(Vec::new());
        let store = Self {
            pool,
            active_tx,
            publish_lock: Mutex::new(()),
        };
        let active = store.query_active().await?;
        store.active_tx.send_replace(active);
        Ok(store)
    }

    async fn query_active(&self) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE pending_delete = 0 ORDER BY last_name, first_name, id",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        into_users(rows)
    }

    async fn query_where(&self, filter: &str) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE {} ORDER BY id",
            COLUMNS, filter
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        into_users(rows)
    }

    async fn publish(&self) {
        // Re-read and send under one lock so concurrent writers publish in order.
        let _guard = self.publish_lock.lock().await;
        match self.query_active().await {
            Ok(active) => {
                self.active_tx.send_replace(active);
            }
            Err(e) => tracing::warn!("Failed to refresh active users: {}", e),
        }
    }
}

#[async_trait]
impl EntityStore for SqliteUserStore {
    fn subscribe_active(&self) -> watch::Receiver<Vec<User>> {
        self.active_tx.subscribe()
    }

    async fn list_active(&self) -> Result<Vec<User>, StoreError> {
        self.query_active().await
    }

    async fn get(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = ?", COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::backend)?;

        row.map(User::try_from).transpose()
    }

    async fn insert(&self, user: &User) -> Result<(), StoreError> {
        upsert(&self.pool, user)
            .await
            .map_err(StoreError::backend)?;
        self.publish().await;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET first_name = ?, last_name = ?, email = ?, age = ?, user_name = ?,
                position_title = ?, image = ?, pending_sync = ?, pending_delete = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.email)
        .bind(user.age)
        .bind(&user.user_name)
        .bind(&user.position_title)
        .bind(&user.image)
        .bind(user.pending_sync)
        .bind(user.pending_delete)
        .bind(&user.id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(user.id.clone()));
        }
        self.publish().await;
        Ok(())
    }

    async fn physical_delete(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(&user.id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        self.publish().await;
        Ok(())
    }

    async fn mark_synced(&self, snapshot: &User) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET pending_sync = 0
            WHERE id = ? AND pending_delete = 0
              AND first_name = ? AND last_name = ? AND email = ? AND age = ?
              AND user_name = ? AND position_title = ? AND image = ?
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.first_name)
        .bind(&snapshot.last_name)
        .bind(&snapshot.email)
        .bind(snapshot.age)
        .bind(&snapshot.user_name)
        .bind(&snapshot.position_title)
        .bind(&snapshot.image)
        .execute(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let cleared = result.rows_affected() > 0;
        if cleared {
            self.publish().await;
        }
        Ok(cleared)
    }

    async fn promote(&self, snapshot: &User, record: &User) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        let current: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = ?", COLUMNS))
                .bind(&snapshot.id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(StoreError::backend)?;
        let row = promoted_row(current.map(User::try_from).transpose()?, snapshot, record);

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(&snapshot.id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;
        upsert(&mut *tx, &row).await.map_err(StoreError::backend)?;

        tx.commit().await.map_err(StoreError::backend)?;
        self.publish().await;
        Ok(())
    }

    async fn bulk_insert(&self, users: &[User]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;

        for user in users {
            upsert(&mut *tx, &user.clone().synced())
                .await
                .map_err(StoreError::backend)?;
        }

        tx.commit().await.map_err(StoreError::backend)?;
        self.publish().await;
        Ok(users.len())
    }

    async fn bulk_update(&self, users: &[User]) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::backend)?;
        let mut changed = 0;

        for user in users {
            // Rows dirtied since the download started keep their local edits.
            let result = sqlx::query(
                r#"
                UPDATE users
                SET first_name = ?, last_name = ?, email = ?, age = ?, user_name = ?,
                    position_title = ?, image = ?, pending_sync = 0, pending_delete = 0
                WHERE id = ? AND pending_sync = 0
                "#,
            )
            .bind(&user.first_name)
            .bind(&user.last_name)
            .bind(&user.email)
            .bind(user.age)
            .bind(&user.user_name)
            .bind(&user.position_title)
            .bind(&user.image)
            .bind(&user.id)
            .execute(&mut *tx)
            .await
            .map_err(StoreError::backend)?;

            changed += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(StoreError::backend)?;
        self.publish().await;
        Ok(changed)
    }

    async fn dirty_for_upload(&self) -> Result<Vec<User>, StoreError> {
        self.query_where("pending_sync = 1 AND pending_delete = 0")
            .await
    }

    async fn tombstones_for_upload(&self) -> Result<Vec<User>, StoreError> {
        self.query_where("pending_delete = 1").await
    }

    async fn all_identifiers(&self) -> Result<HashSet<String>, StoreError> {
        let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM users")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::backend)?;

        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    async fn pending_counts(&self) -> Result<PendingCounts, StoreError> {
        let (dirty, tombstones): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN pending_sync = 1 AND pending_delete = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN pending_delete = 1 THEN 1 ELSE 0 END), 0)
            FROM users
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(PendingCounts {
            dirty: dirty as usize,
            tombstones: tombstones as usize,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use futures::StreamExt;
    use roster_core::{active_stream, MemoryRemote, RemoteOp, Repository, SyncEngine};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct TestContext {
        store: Arc<SqliteUserStore>,
        _temp_dir: TempDir,
    }

    async fn setup_store() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = init_db(&db_path).await.unwrap();
        TestContext {
            store: Arc::new(SqliteUserStore::new(pool).await.unwrap()),
            _temp_dir: temp_dir,
        }
    }

    fn user(id: &str, first: &str) -> User {
        User::new(first, "Test")
            .with_id(id)
            .with_email(format!("{}@example.com", first.to_lowercase()))
            .with_age(30)
    }

    #[tokio::test]
    async fn test_insert_and_get_user() {
        let ctx = setup_store().await;
        let created = user("local_a", "Ada").mark_created();
        ctx.store.insert(&created).await.unwrap();

        let found = ctx.store.get("local_a").await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(ctx.store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_replaces_on_collision() {
        let ctx = setup_store().await;
        ctx.store.insert(&user("1", "A")).await.unwrap();
        ctx.store.insert(&user("1", "B")).await.unwrap();

        let ids = ctx.store.all_identifiers().await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ctx.store.get("1").await.unwrap().unwrap().first_name, "B");
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let ctx = setup_store().await;
        let err = ctx.store.update(&user("9", "A")).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "9"));
    }

    #[tokio::test]
    async fn test_active_view_and_pending_queries() {
        let ctx = setup_store().await;
        for row in [
            user("1", "Clean"),
            user("2", "Gone").mark_deleted(),
            user("local_3", "New").mark_created(),
            user("4", "Edited").mark_dirty(),
        ] {
            ctx.store.insert(&row).await.unwrap();
        }

        let active: Vec<String> = ctx
            .store
            .list_active()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.first_name)
            .collect();
        assert_eq!(active, vec!["Clean", "Edited", "New"]);

        let dirty: Vec<String> = ctx
            .store
            .dirty_for_upload()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect();
        assert_eq!(dirty, vec!["4", "local_3"]);

        let tombstones = ctx.store.tombstones_for_upload().await.unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].id, "2");

        let counts = ctx.store.pending_counts().await.unwrap();
        assert_eq!(counts, PendingCounts { dirty: 2, tombstones: 1 });
    }

    #[tokio::test]
    async fn test_promote_replaces_local_row() {
        let ctx = setup_store().await;
        let local = user("local_1", "A").mark_created();
        ctx.store.insert(&local).await.unwrap();

        ctx.store.promote(&local, &user("42", "A")).await.unwrap();

        let ids = ctx.store.all_identifiers().await.unwrap();
        assert_eq!(ids, HashSet::from(["42".to_string()]));
        assert!(!ctx.store.get("42").await.unwrap().unwrap().pending_sync);
    }

    #[tokio::test]
    async fn test_promote_keeps_local_changes_made_during_create() {
        let ctx = setup_store().await;
        let deleted = user("local_1", "A").mark_created();
        let edited = user("local_2", "B").mark_created();
        ctx.store.insert(&deleted).await.unwrap();
        ctx.store.insert(&edited).await.unwrap();

        ctx.store
            .update(&deleted.clone().mark_deleted())
            .await
            .unwrap();
        ctx.store
            .update(&user("local_2", "B2").mark_dirty())
            .await
            .unwrap();

        ctx.store.promote(&deleted, &user("10", "A")).await.unwrap();
        ctx.store.promote(&edited, &user("11", "B")).await.unwrap();

        let tomb = ctx.store.get("10").await.unwrap().unwrap();
        assert!(tomb.pending_delete && tomb.pending_sync);
        let kept = ctx.store.get("11").await.unwrap().unwrap();
        assert_eq!(kept.first_name, "B2");
        assert!(kept.pending_sync && !kept.pending_delete);

        let counts = ctx.store.pending_counts().await.unwrap();
        assert_eq!(counts, PendingCounts { dirty: 1, tombstones: 1 });
        assert_eq!(ctx.store.all_identifiers().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_synced_skips_changed_rows() {
        let ctx = setup_store().await;
        let sent = user("1", "A").mark_dirty();
        let deleted = user("2", "B").mark_dirty();
        ctx.store.insert(&sent).await.unwrap();
        ctx.store.insert(&deleted).await.unwrap();
        ctx.store
            .update(&deleted.clone().mark_deleted())
            .await
            .unwrap();

        assert!(ctx.store.mark_synced(&sent).await.unwrap());
        assert!(!ctx.store.get("1").await.unwrap().unwrap().pending_sync);

        ctx.store.update(&user("1", "A2").mark_dirty()).await.unwrap();
        assert!(!ctx.store.mark_synced(&sent).await.unwrap());
        assert!(ctx.store.get("1").await.unwrap().unwrap().pending_sync);

        assert!(!ctx.store.mark_synced(&deleted).await.unwrap());
        let tomb = ctx.store.get("2").await.unwrap().unwrap();
        assert!(tomb.pending_delete && tomb.pending_sync);
    }

    #[tokio::test]
    async fn test_write_succeeds_when_refresh_fails() {
        let ctx = setup_store().await;
        // Out of range for i32, so reading the active view fails.
        sqlx::query(
            "INSERT INTO users (id, first_name, last_name, email, age, user_name, position_title, image, pending_sync, pending_delete) \
             VALUES ('bad', 'X', 'Y', '', 99999999999, '', '', '', 0, 0)",
        )
        .execute(&ctx.store.pool)
        .await
        .unwrap();
        assert!(ctx.store.list_active().await.is_err());

        ctx.store.insert(&user("1", "A")).await.unwrap();
        assert!(ctx.store.get("1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_bulk_update_skips_dirty_rows() {
        let ctx = setup_store().await;
        ctx.store.insert(&user("1", "A")).await.unwrap();
        ctx.store.insert(&user("2", "B").mark_dirty()).await.unwrap();

        let changed = ctx
            .store
            .bulk_update(&[user("1", "A2"), user("2", "B2"), user("3", "C")])
            .await
            .unwrap();
        assert_eq!(changed, 1);

        assert_eq!(ctx.store.get("1").await.unwrap().unwrap().first_name, "A2");
        let kept = ctx.store.get("2").await.unwrap().unwrap();
        assert_eq!(kept.first_name, "B");
        assert!(kept.pending_sync);
        assert!(ctx.store.get("3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bulk_insert_clears_flags() {
        let ctx = setup_store().await;
        let inserted = ctx
            .store
            .bulk_insert(&[user("1", "A").mark_dirty(), user("2", "B")])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert!(ctx.store.pending_counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_physical_delete_is_idempotent() {
        let ctx = setup_store().await;
        let row = user("1", "A").mark_deleted();
        ctx.store.insert(&row).await.unwrap();

        ctx.store.physical_delete(&row).await.unwrap();
        ctx.store.physical_delete(&row).await.unwrap();
        assert!(ctx.store.all_identifiers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_stream_sees_commits() {
        let ctx = setup_store().await;
        let mut stream = Box::pin(active_stream(ctx.store.as_ref()));
        assert!(stream.next().await.unwrap().is_empty());

        ctx.store
            .insert(&user("local_1", "A").mark_created())
            .await
            .unwrap();
        assert_eq!(stream.next().await.unwrap().len(), 1);

        ctx.store
            .update(&user("local_1", "A").mark_deleted())
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_existing_rows_are_published_on_open() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        {
            let pool = init_db(&db_path).await.unwrap();
            let store = SqliteUserStore::new(pool.clone()).await.unwrap();
            store.insert(&user("1", "A")).await.unwrap();
            pool.close().await;
        }

        let pool = init_db(&db_path).await.unwrap();
        let store = SqliteUserStore::new(pool).await.unwrap();
        assert_eq!(store.subscribe_active().borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_against_sqlite_store() {
        let ctx = setup_store().await;
        let remote = Arc::new(MemoryRemote::with_records([
            user("1", "Stale").with_age(40),
            user("99", "RemoteOnly"),
            user("7", "Doomed"),
        ]));

        ctx.store.insert(&user("1", "Stale")).await.unwrap();
        ctx.store.insert(&user("7", "Doomed").mark_deleted()).await.unwrap();
        ctx.store
            .insert(&user("local_1", "Fresh").mark_created())
            .await
            .unwrap();

        let engine = SyncEngine::new(ctx.store.clone(), remote.clone());
        let report = engine.sync().await.unwrap();
        assert_eq!(report.upload.created, 1);
        assert_eq!(report.upload.deleted, 1);
        assert_eq!(report.download.inserted, 1);

        let first: Vec<User> = ctx.store.list_active().await.unwrap();
        let ids: HashSet<&str> = first.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["1", "99", "100"]));
        assert_eq!(ctx.store.get("1").await.unwrap().unwrap().age, 40);
        assert!(ctx.store.get("7").await.unwrap().is_none());
        assert!(remote.get("7").is_none());
        assert!(ctx.store.pending_counts().await.unwrap().is_empty());

        engine.sync().await.unwrap();
        assert_eq!(ctx.store.list_active().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_repository_offline_writes_then_sync() {
        let ctx = setup_store().await;
        let remote = Arc::new(MemoryRemote::new());
        remote.set_offline(true);
        let repo = Repository::new(ctx.store.clone(), remote.clone());

        repo.insert(User::new("Ada", "Lovelace")).await.unwrap();
        assert!(repo.sync().await.is_err());
        assert_eq!(repo.pending_counts().await.unwrap().dirty, 1);

        remote.recover(RemoteOp::Create);
        remote.recover(RemoteOp::List);
        repo.sync().await.unwrap();

        let users = repo.list_active().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "1");
        assert!(!users[0].pending_sync);
    }
}
