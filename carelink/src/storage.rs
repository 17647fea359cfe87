//! Credential storage seam.
//!
//! The client never talks to the platform key-value store directly; it goes
//! through [`CredentialStore`] so embedders can plug in whatever secure
//! storage the host application uses. [`MemoryStore`] is the in-process
//! implementation used by tests and short-lived embeddings.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

/// Storage key for the signed-in user's id.
pub const USER_ID: &str = "user_id";
/// Storage key for the backend session id.
pub const SESSION_ID: &str = "session_id";
/// Storage key for the display name.
pub const USER_NAME: &str = "user_name";
/// Storage key for the role, e.g. `Doctor`.
pub const USER_TYPE: &str = "user_type";
/// Storage key for the admin flag (`"1"` or `"0"`).
pub const ADMIN: &str = "admin";
/// Storage key for the organization the user belongs to.
pub const ORGANIZATION_ID: &str = "organization_id";
/// Storage key for the signaling endpoint URL.
pub const SOCKET_URL: &str = "socket_url";
/// Storage key for the conference server base URL used in call handoffs.
pub const CONFERENCE_SERVER_URL: &str = "conference_server_url";

/// Every session-scoped key, cleared on forced logout.
pub const SESSION_KEYS: &[&str] = &[
    USER_ID,
    SESSION_ID,
    USER_NAME,
    USER_TYPE,
    ADMIN,
    ORGANIZATION_ID,
    SOCKET_URL,
    CONFERENCE_SERVER_URL,
];

/// Synchronous key-value store for credentials and endpoints.
///
/// Implementations must be cheap to call; the session reads from the store
/// on every join and clears it on forced logout.
pub trait CredentialStore: Send + Sync {
    /// Read a string value; `None` when absent.
    fn get(&self, key: &str) -> Option<String>;
    /// Write a string value.
    fn set(&self, key: &str, value: &str);
    /// Remove a value; removing an absent key is a no-op.
    fn remove(&self, key: &str);
    /// Read a structured value; `None` when absent.
    fn get_object(&self, key: &str) -> Option<Value>;
    /// Write a structured value.
    fn set_object(&self, key: &str, value: &Value);
}

/// In-memory [`CredentialStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        match self.values.read().get(key)? {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    fn set(&self, key: &str, value: &str) {
        self.values
            .write()
            .insert(key.to_string(), Value::String(value.to_string()));
    }

    fn remove(&self, key: &str) {
        self.values.write().remove(key);
    }

    fn get_object(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }

    fn set_object(&self, key: &str, value: &Value) {
        self.values.write().insert(key.to_string(), value.clone());
    }
}

/// The credentials required to join a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user_id: String,
    pub session_id: String,
    /// Role announced to the server; defaults to `Doctor` when unset.
    pub user_type: String,
    pub is_admin: bool,
    pub organization_id: String,
}

impl Credentials {
    /// Loads credentials from the store.
    ///
    /// Returns `None` unless both a user id and a session id are present
    /// and non-empty; joining without either is meaningless.
    pub fn load(store: &dyn CredentialStore) -> Option<Self> {
        let user_id = store.get(USER_ID).filter(|v| !v.trim().is_empty())?;
        let session_id = store.get(SESSION_ID).filter(|v| !v.trim().is_empty())?;
        let user_type = store
            .get(USER_TYPE)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "Doctor".to_string());
        let is_admin = store.get(ADMIN).is_some_and(|v| v.trim() == "1");
        let organization_id = store.get(ORGANIZATION_ID).unwrap_or_default();
        Some(Self {
            user_id,
            session_id,
            user_type,
            is_admin,
            organization_id,
        })
    }
}
