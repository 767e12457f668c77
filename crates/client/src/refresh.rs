//! One-shot app refresh signal.
//!
//! After a session-affecting event the UI must discard every screen that
//! may hold state computed for the previous user. The session manager sets a
//! persisted flag; the next app-level mount takes it (clearing it before
//! acting, so delivery is at most once) and bumps a remount key that the UI
//! uses to rebuild its tree.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, instrument};

use crate::storage::{KeyValueStore, StorageError, keys};

const FLAG_SET: &str = "true";

/// Persisted refresh flag plus the in-memory remount counter.
pub struct AppRefreshSignal {
    storage: Arc<dyn KeyValueStore>,
    remount_key: AtomicU64,
}

impl AppRefreshSignal {
    /// Create a signal over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        Self {
            storage,
            remount_key: AtomicU64::new(0),
        }
    }

    /// Request a remount on the next mount.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the flag cannot be written.
    #[instrument(skip(self))]
    pub async fn trigger(&self) -> Result<(), StorageError> {
        self.storage.set(keys::TRIGGER_APP_REFRESH, FLAG_SET).await
    }

    /// Observe and clear the flag. Returns whether it was set.
    ///
    /// When set, the remount key is bumped before returning.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the flag cannot be read or cleared. A flag
    /// that cannot be cleared is reported as an error rather than delivered,
    /// so it is never observed twice.
    pub async fn take(&self) -> Result<bool, StorageError> {
        let Some(value) = self.storage.get(keys::TRIGGER_APP_REFRESH).await? else {
            return Ok(false);
        };
        self.storage.remove(keys::TRIGGER_APP_REFRESH).await?;

        if value != FLAG_SET {
            debug!(value = %value, "Ignoring unrecognized refresh flag value");
            return Ok(false);
        }

        let key = self.remount_key.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(remount_key = key, "App refresh signal observed");
        Ok(true)
    }

    /// Current remount key. Changes every time a refresh is taken.
    #[must_use]
    pub fn remount_key(&self) -> u64 {
        self.remount_key.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AppRefreshSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppRefreshSignal")
            .field("remount_key", &self.remount_key())
            .finish_non_exhaustive()
    }
}
