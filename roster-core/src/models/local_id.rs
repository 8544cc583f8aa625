//! Temporary identifiers for users created while offline.
//!
//! A local id is the `local_` prefix followed by a simple-format UUID. It marks
//! a user the server has never seen; any id without the prefix is assumed to
//! have been assigned by the server.

use uuid::Uuid;

/// Prefix reserved for locally minted ids.
pub const LOCAL_PREFIX: &str = "local_";

/// Generate a fresh local id (`local_<32 hex chars>`).
pub fn generate() -> String {
    format!("{}{}", LOCAL_PREFIX, Uuid::new_v4().simple())
}

/// Returns true if the id was minted locally and has not been replaced yet.
pub fn is_local(id: &str) -> bool {
    id.starts_with(LOCAL_PREFIX)
}

/// Returns true if the id carries no usable value at all.
pub fn is_blank(id: &str) -> bool {
    id.trim().is_empty()
}

/// Ids that must never be sent to the server: blank or local.
pub(crate) fn omit_on_wire(id: &str) -> bool {
    is_blank(id) || is_local(id)
}
