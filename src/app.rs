//! Wires the SQLite store, the remote client and the repository together.

use std::sync::Arc;

use async_trait::async_trait;
use roster_core::{HttpRemoteClient, RemoteClient, RemoteError, Repository, User};

use crate::config::Config;
use crate::db::{init_db, SqliteUserStore};

/// Everything a command needs, built once per invocation.
pub struct App {
    pub config: Config,
    pub repo: Repository,
    remote: Option<Arc<HttpRemoteClient>>,
}

impl App {
    pub async fn open(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let pool = init_db(&config.database_path.value).await?;
        let store = Arc::new(SqliteUserStore::new(pool).await?);

        let remote = if config.remote.is_configured() {
            let base_url = config.remote.base_url.clone().unwrap_or_default();
            Some(Arc::new(HttpRemoteClient::with_options(
                base_url,
                config.remote.collection.clone(),
                config.remote.timeout(),
            )?))
        } else {
            None
        };

        let client: Arc<dyn RemoteClient> = match &remote {
            Some(remote) => remote.clone(),
            None => Arc::new(UnconfiguredRemote),
        };

        Ok(Self {
            repo: Repository::new(store, client),
            remote,
            config,
        })
    }

    /// The HTTP client, if a server URL is configured.
    pub fn remote(&self) -> Option<&HttpRemoteClient> {
        self.remote.as_deref()
    }
}

/// Stands in for the server when none is configured, so local commands keep
/// working and sync attempts fail with a clear message.
struct UnconfiguredRemote;

impl UnconfiguredRemote {
    fn error() -> RemoteError {
        RemoteError::Connection(
            "no server configured (set remote.base_url or ROSTER_REMOTE_URL)".to_string(),
        )
    }
}

#[async_trait]
impl RemoteClient for UnconfiguredRemote {
    async fn create(&self, _user: &User) -> Result<User, RemoteError> {
        Err(Self::error())
    }

    async fn update(&self, _id: &str, _user: &User) -> Result<User, RemoteError> {
        Err(Self::error())
    }

    async fn delete(&self, _id: &str) -> Result<User, RemoteError> {
        Err(Self::error())
    }

    async fn list_all(&self) -> Result<Vec<User>, RemoteError> {
        Err(Self::error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn config_in(temp_dir: &TempDir, extra: &str) -> Config {
        let config_path = temp_dir.path().join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "database_path: roster.db").unwrap();
        write!(file, "{}", extra).unwrap();
        Config::load(Some(config_path)).unwrap()
    }

    #[tokio::test]
    async fn test_open_without_remote_works_offline() {
        let temp_dir = TempDir::new().unwrap();
        let app = App::open(config_in(&temp_dir, "")).await.unwrap();
        assert!(app.remote().is_none());

        app.repo.insert(User::new("Ada", "Lovelace")).await.unwrap();
        assert_eq!(app.repo.list_active().await.unwrap().len(), 1);

        let err = app.repo.sync().await.unwrap_err();
        assert!(err.message.contains("no server configured"));
        assert_eq!(app.repo.pending_counts().await.unwrap().dirty, 1);
    }

    #[tokio::test]
    async fn test_open_with_remote_builds_http_client() {
        let temp_dir = TempDir::new().unwrap();
        let app = App::open(config_in(
            &temp_dir,
            "remote:\n  base_url: http://127.0.0.1:9\n  collection: people\n",
        ))
        .await
        .unwrap();

        let remote = app.remote().unwrap();
        assert_eq!(remote.collection(), "people");
        assert!(temp_dir.path().join("roster.db").exists());
    }
}
