use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use super::local_id;

/// A user record as kept in the local store and exchanged with the server.
///
/// `pending_sync` and `pending_delete` are local bookkeeping only: they are
/// never serialized and never read from a server payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(
        default,
        deserialize_with = "deserialize_id",
        skip_serializing_if = "local_id::omit_on_wire"
    )]
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub age: i32,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub position_title: String,
    /// Avatar URL.
    #[serde(default, rename = "imagen")]
    pub image: String,
    #[serde(skip)]
    pub pending_sync: bool,
    #[serde(skip)]
    pub pending_delete: bool,
}

impl User {
    /// Creates a user with no id; the repository assigns a local one on insert.
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = email.into();
        self
    }

    pub fn with_age(mut self, age: i32) -> Self {
        self.age = age;
        self
    }

    pub fn with_user_name(mut self, user_name: impl Into<String>) -> Self {
        self.user_name = user_name.into();
        self
    }

    pub fn with_position_title(mut self, title: impl Into<String>) -> Self {
        self.position_title = title.into();
        self
    }

    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image = url.into();
        self
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// True while the id is a temporary local one.
    pub fn is_local(&self) -> bool {
        local_id::is_local(&self.id)
    }

    /// True unless the user is a tombstone.
    pub fn is_active(&self) -> bool {
        !self.pending_delete
    }

    /// A freshly created local record: dirty, not deleted.
    pub fn mark_created(mut self) -> Self {
        self.pending_sync = true;
        self.pending_delete = false;
        self
    }

    /// A locally edited record. A tombstone stays a tombstone.
    pub fn mark_dirty(mut self) -> Self {
        self.pending_sync = true;
        self
    }

    /// A logical delete. The delete itself is an unsynced change.
    pub fn mark_deleted(mut self) -> Self {
        self.pending_delete = true;
        self.pending_sync = true;
        self
    }

    /// The record as confirmed by the server.
    pub fn synced(mut self) -> Self {
        self.pending_sync = false;
        self.pending_delete = false;
        self
    }

    /// Compares business fields only, ignoring id and sync flags.
    pub fn same_fields(&self, other: &User) -> bool {
        self.first_name == other.first_name
            && self.last_name == other.last_name
            && self.email == other.email
            && self.age == other.age
            && self.user_name == other.user_name
            && self.position_title == other.position_title
            && self.image == other.image
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.full_name();
        writeln!(f, "{}", name)?;
        writeln!(f, "{}", "=".repeat(name.len()))?;
        writeln!(f, "ID: {}", self.id)?;

        if !self.user_name.is_empty() {
            writeln!(f, "Username: {}", self.user_name)?;
        }
        if !self.email.is_empty() {
            writeln!(f, "Email: {}", self.email)?;
        }
        if self.age > 0 {
            writeln!(f, "Age: {}", self.age)?;
        }
        if !self.position_title.is_empty() {
            writeln!(f, "Position: {}", self.position_title)?;
        }
        if !self.image.is_empty() {
            writeln!(f, "Image: {}", self.image)?;
        }

        let state = match (self.pending_sync, self.pending_delete) {
            (_, true) => "pending delete",
            (true, false) if self.is_local() => "pending create",
            (true, false) => "pending update",
            (false, false) => "synced",
        };
        writeln!(f, "Sync: {}", state)?;

        Ok(())
    }
}

/// Servers differ on whether ids are JSON strings or numbers.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}
