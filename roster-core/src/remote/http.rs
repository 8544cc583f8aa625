//! JSON-over-HTTP remote client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;

use super::{RemoteClient, RemoteError};
use crate::models::User;

/// Collection path used when none is configured.
pub const DEFAULT_COLLECTION: &str = "users";
/// Per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for the reachability probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Remote client for a REST collection such as `https://host/api/users`.
#[derive(Debug, Clone)]
pub struct HttpRemoteClient {
    base_url: String,
    collection: String,
    client: reqwest::Client,
}

impl HttpRemoteClient {
    /// Creates a client for the default `users` collection.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RemoteError> {
        Self::with_options(base_url, DEFAULT_COLLECTION, DEFAULT_TIMEOUT)
    }

    pub fn with_options(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Connection(e.to_string()))?;

        Ok(Self {
            base_url: normalize_base_url(&base_url.into()),
            collection: collection.into().trim_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Quick reachability probe. Any successful listing counts as reachable.
    pub async fn check_server(&self) -> bool {
        let result = self
            .client
            .get(self.build_url(None))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Server probe failed: {}", e);
                false
            }
        }
    }

    fn build_url(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!(
                "{}/{}/{}",
                self.base_url,
                self.collection,
                urlencoding::encode(id)
            ),
            None => format!("{}/{}", self.base_url, self.collection),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        id: Option<&str>,
    ) -> Result<T, RemoteError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string()
            } else {
                body
            };
            return Err(RemoteError::from_status(status.as_u16(), message, id));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn create(&self, user: &User) -> Result<User, RemoteError> {
        let url = self.build_url(None);
        tracing::debug!("POST {}", url);
        self.send(self.client.post(url).json(user), None).await
    }

    async fn update(&self, id: &str, user: &User) -> Result<User, RemoteError> {
        let url = self.build_url(Some(id));
        tracing::debug!("PUT {}", url);
        self.send(self.client.put(url).json(user), Some(id)).await
    }

    async fn delete(&self, id: &str) -> Result<User, RemoteError> {
        let url = self.build_url(Some(id));
        tracing::debug!("DELETE {}", url);
        self.send(self.client.delete(url), Some(id)).await
    }

    async fn list_all(&self) -> Result<Vec<User>, RemoteError> {
        let url = self.build_url(None);
        tracing::debug!("GET {}", url);
        self.send(self.client.get(url), None).await
    }
}

fn transport_error(e: reqwest::Error) -> RemoteError {
    if e.is_decode() {
        RemoteError::Decode(e.to_string())
    } else {
        RemoteError::Connection(e.to_string())
    }
}

fn normalize_base_url(url: &str) -> String {
    let url = url.trim();
    let with_scheme = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    };
    with_scheme.trim_end_matches('/').to_string()
}
