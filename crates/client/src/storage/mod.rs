//! Durable key-value storage.
//!
//! The app persists a handful of string values across restarts: the session
//! token, the user id, the cart cache and the one-shot refresh flag. Storage
//! is a plain `get`/`set`/`remove` contract over string keys; structured
//! values are JSON-encoded by [`load_json`] / [`store_json`].
//!
//! # Stores
//!
//! - [`FileStore`] - one JSON object file, written atomically
//! - [`MemoryStore`] - process-local, for tests and ephemeral sessions

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Storage keys.
pub mod keys {
    /// Bearer token of the current session.
    pub const TOKEN: &str = "token";

    /// Id of the logged-in user.
    pub const USER_ID: &str = "userId";

    /// JSON-encoded `CartLine[]` cart cache.
    pub const CART_ITEMS: &str = "cartItems";

    /// Avatar URL of the logged-in user.
    pub const USER_AVATAR: &str = "userAvatar";

    /// One-shot flag forcing a full UI remount on next mount.
    pub const TRIGGER_APP_REFRESH: &str = "triggerAppRefresh";

    /// Keys that belong to a session and must not outlive it.
    pub const SESSION_SCOPED: &[&str] = &[TOKEN, USER_ID, CART_ITEMS, USER_AVATAR];

    /// Keys logout removes even when everything else fails.
    pub const LOGOUT_MINIMUM: &[&str] = &[TOKEN, USER_ID, CART_ITEMS];
}

/// Errors that can occur when reading or writing storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored value or the backing file could not be (de)serialized.
    #[error("storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// String-keyed durable storage.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Read and decode a JSON value.
///
/// # Errors
///
/// Returns `StorageError` if the read fails or the stored value is not valid
/// JSON for `T`.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
///
/// # Errors
///
/// Returns `StorageError` if encoding or the write fails.
pub async fn store_json<T: Serialize + Sync>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw).await
}
