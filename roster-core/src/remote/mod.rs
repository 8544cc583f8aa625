//! Access to the remote authoritative user service.
//!
//! | Operation | Method | Path                  |
//! |-----------|--------|-----------------------|
//! | list all  | GET    | `/{collection}`       |
//! | create    | POST   | `/{collection}`       |
//! | update    | PUT    | `/{collection}/{id}`  |
//! | delete    | DELETE | `/{collection}/{id}`  |

mod error;
mod http;
mod memory;

pub use error::RemoteError;
pub use http::{HttpRemoteClient, DEFAULT_COLLECTION, DEFAULT_TIMEOUT};
pub use memory::{MemoryRemote, RemoteOp};

use async_trait::async_trait;

use crate::models::User;

/// One network round trip per call; callers decide what a failure means for
/// the rest of their batch.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Creates the user and returns the server's canonical record, which
    /// carries the server-assigned id.
    async fn create(&self, user: &User) -> Result<User, RemoteError>;

    async fn update(&self, id: &str, user: &User) -> Result<User, RemoteError>;

    async fn delete(&self, id: &str) -> Result<User, RemoteError>;

    async fn list_all(&self) -> Result<Vec<User>, RemoteError>;
}
