//! Per-product single-flight locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use pocketshop_core::ProductId;
use tokio::sync::OwnedMutexGuard;

/// One async mutex per product, so overlapping mutations of the same line
/// run one after another while different lines proceed in parallel.
///
/// Entries nobody holds or waits on are pruned on the next acquire.
#[derive(Debug, Default)]
pub struct LineLocks {
    locks: Mutex<HashMap<ProductId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held while a product's line is being mutated.
#[derive(Debug)]
pub struct LineGuard {
    _guard: OwnedMutexGuard<()>,
}

impl LineLocks {
    /// Create an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a product's line.
    pub async fn acquire(&self, product_id: &ProductId) -> LineGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(product_id.clone()).or_default())
        };
        LineGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of products with a live lock.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no product has a live lock.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
