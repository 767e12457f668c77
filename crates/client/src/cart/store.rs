//! In-memory cart, the single source of truth for UI reads.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use pocketshop_core::{Cart, OwnerMode};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::events::{SessionEvent, SessionObserver};
use crate::storage::{KeyValueStore, StorageError, keys, load_json, store_json};

/// Ordering token for cart writes.
///
/// Issued when a request starts. A result carrying a ticket older than the
/// last one applied is stale and gets discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
struct StoreState {
    cart: Cart,
    mode: OwnerMode,
    applied: u64,
}

/// The current cart, with persistence to the `cartItems` key.
pub struct CartStore {
    storage: Arc<dyn KeyValueStore>,
    state: RwLock<StoreState>,
    next_ticket: AtomicU64,
    persist_lock: tokio::sync::Mutex<()>,
    changes: watch::Sender<Cart>,
}

impl CartStore {
    /// Create an empty guest cart over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        let (changes, _) = watch::channel(Cart::new());
        Self {
            storage,
            state: RwLock::new(StoreState::default()),
            next_ticket: AtomicU64::new(1),
            persist_lock: tokio::sync::Mutex::new(()),
            changes,
        }
    }

    /// Snapshot of the current cart.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.read().cart.clone()
    }

    /// Which store is authoritative for the current cart.
    #[must_use]
    pub fn mode(&self) -> OwnerMode {
        self.read().mode
    }

    /// Receive every cart change.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<Cart> {
        self.changes.subscribe()
    }

    /// Issue a ticket for a request about to start.
    pub fn issue(&self) -> Ticket {
        Ticket(self.next_ticket.fetch_add(1, Ordering::SeqCst))
    }

    /// Replace the cart wholesale unless a newer result was already applied.
    ///
    /// Returns whether the cart was applied.
    pub fn apply(&self, ticket: Ticket, cart: Cart, mode: OwnerMode) -> bool {
        let mut state = self.write();
        if ticket.0 < state.applied {
            debug!(
                ticket = ticket.0,
                applied = state.applied,
                "Discarding stale cart result"
            );
            return false;
        }
        state.applied = ticket.0;
        state.mode = mode;
        state.cart = cart.clone();
        self.changes.send_replace(cart);
        true
    }

    /// Empty the cart. Anything issued before this call is now stale.
    pub fn clear(&self, mode: OwnerMode) {
        let ticket = self.issue();
        self.apply(ticket, Cart::new(), mode);
    }

    /// Apply a local (guest) mutation and return the resulting cart.
    pub fn update(&self, mutate: impl FnOnce(&mut Cart)) -> Cart {
        let ticket = self.issue();
        let mut state = self.write();
        mutate(&mut state.cart);
        state.applied = state.applied.max(ticket.0);
        state.mode = OwnerMode::Guest;
        let cart = state.cart.clone();
        self.changes.send_replace(cart.clone());
        cart
    }

    /// Write the current cart to `cartItems`.
    ///
    /// Concurrent calls are serialized and each writes the latest cart, so
    /// storage ends up matching memory.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    pub async fn persist(&self) -> Result<(), StorageError> {
        let _guard = self.persist_lock.lock().await;
        let cart = self.cart();
        store_json(self.storage.as_ref(), keys::CART_ITEMS, &cart).await
    }

    /// Set `cartItems` to an empty list without touching memory.
    ///
    /// Used after the guest cart has been replayed to the server.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    pub async fn reset_persisted(&self) -> Result<(), StorageError> {
        let _guard = self.persist_lock.lock().await;
        store_json(self.storage.as_ref(), keys::CART_ITEMS, &Cart::new()).await
    }

    /// Load the persisted guest cart into memory.
    ///
    /// A missing key is an empty cart; an unreadable one is discarded.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if storage cannot be read.
    pub async fn load_guest(&self) -> Result<Cart, StorageError> {
        let ticket = self.issue();
        let cart = match load_json::<Cart>(self.storage.as_ref(), keys::CART_ITEMS).await {
            Ok(cart) => cart.unwrap_or_default(),
            Err(StorageError::Serde(e)) => {
                warn!(error = %e, "Discarding unreadable persisted cart");
                Cart::new()
            }
            Err(e) => return Err(e),
        };
        self.apply(ticket, cart.clone(), OwnerMode::Guest);
        Ok(cart)
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        // The cart is always replaced whole, so a poisoned lock is still consistent
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionObserver for CartStore {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::CartUpdated { cart, .. } => {
                let ticket = self.issue();
                self.apply(ticket, cart.clone(), OwnerMode::Authenticated);
            }
            SessionEvent::Cleared | SessionEvent::ExpiredSession => {
                self.clear(OwnerMode::Guest);
            }
            SessionEvent::UserChanged { .. } => {
                self.clear(OwnerMode::Authenticated);
            }
            SessionEvent::SignedIn { .. } | SessionEvent::ProfileUpdated { .. } => {}
        }
    }
}

impl std::fmt::Debug for CartStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartStore")
            .field("state", &*self.read())
            .finish_non_exhaustive()
    }
}
