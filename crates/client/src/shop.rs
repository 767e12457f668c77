//! The shopping context: one handle the UI holds for session and cart.

use std::sync::Arc;

use pocketshop_core::{Cart, Catalog, OwnerMode, ProductId};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument, warn};

use crate::api::{CommerceApi, HttpCommerceApi, ProfileUpdate, UserProfile};
use crate::cart::{CartError, CartStore, CartSyncEngine, ClearOutcome};
use crate::config::ClientConfig;
use crate::error::{Result, ShopError};
use crate::events::{SessionEvent, SessionEvents};
use crate::refresh::AppRefreshSignal;
use crate::session::{Session, SessionManager};
use crate::storage::{FileStore, KeyValueStore};

/// What the app-level mount observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountOutcome {
    /// Key for the screen tree; a new value means rebuild everything.
    pub remount_key: u64,
    /// Whether the refresh signal fired and the cart was refreshed.
    pub refreshed: bool,
}

/// Session and cart state shared by every screen.
///
/// This struct is cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct Shop {
    inner: Arc<ShopInner>,
}

struct ShopInner {
    config: ClientConfig,
    storage: Arc<dyn KeyValueStore>,
    events: Arc<SessionEvents>,
    refresh: Arc<AppRefreshSignal>,
    session: Arc<SessionManager>,
    store: Arc<CartStore>,
    engine: CartSyncEngine,
}

impl Shop {
    /// Wire the session manager, cart store and engine over the given
    /// collaborators.
    #[must_use]
    pub fn new(
        config: ClientConfig,
        api: Arc<dyn CommerceApi>,
        storage: Arc<dyn KeyValueStore>,
    ) -> Self {
        let events = Arc::new(SessionEvents::new());
        let refresh = Arc::new(AppRefreshSignal::new(Arc::clone(&storage)));
        let store = Arc::new(CartStore::new(Arc::clone(&storage)));
        events.register(store.clone());

        let session = Arc::new(SessionManager::new(
            Arc::clone(&api),
            Arc::clone(&storage),
            Arc::clone(&events),
            Arc::clone(&refresh),
        ));
        let engine = CartSyncEngine::new(
            api,
            Arc::clone(&session),
            Arc::clone(&store),
            config.verify_policy,
        );

        Self {
            inner: Arc::new(ShopInner {
                config,
                storage,
                events,
                refresh,
                session,
                store,
                engine,
            }),
        }
    }

    /// Build a shop talking HTTPS to the configured API, persisting to the
    /// configured file.
    ///
    /// # Errors
    ///
    /// Returns `ShopError` if the HTTP client cannot be built or the state
    /// file cannot be read.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let api = HttpCommerceApi::new(&config)?;
        let storage = FileStore::open(&config.storage_path).await?;
        Ok(Self::new(config, Arc::new(api), Arc::new(storage)))
    }

    /// Get a reference to the client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Get a reference to the durable store.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.storage
    }

    /// Get a reference to the session manager.
    #[must_use]
    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    /// Get a reference to the cart store.
    #[must_use]
    pub fn store(&self) -> &CartStore {
        &self.inner.store
    }

    /// Get a reference to the cart synchronization engine.
    #[must_use]
    pub fn engine(&self) -> &CartSyncEngine {
        &self.inner.engine
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Restore the persisted session and load the matching cart.
    ///
    /// Signed in, the cart comes from the server (empty if that fails);
    /// otherwise the persisted guest cart is loaded.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Option<Session> {
        let session = self.inner.session.restore_session().await;
        if session.is_some() {
            // Failures are logged by the engine and leave the cart empty
            let _ = self.inner.engine.refresh_cart().await;
        } else if let Err(e) = self.inner.store.load_guest().await {
            warn!(error = %e, "Failed to load guest cart");
        }
        session
    }

    /// Observe the app refresh signal. Call on every app-level mount.
    ///
    /// When the signal fired, the cart is refreshed and the returned remount
    /// key has changed.
    #[instrument(skip(self))]
    pub async fn mount(&self) -> MountOutcome {
        let refreshed = match self.inner.refresh.take().await {
            Ok(fired) => fired,
            Err(e) => {
                warn!(error = %e, "Failed to read app refresh signal");
                false
            }
        };
        if refreshed {
            let _ = self.inner.engine.refresh_cart().await;
        }
        MountOutcome {
            remount_key: self.inner.refresh.remount_key(),
            refreshed,
        }
    }

    // =========================================================================
    // Session
    // =========================================================================

    /// Log in and move the guest cart into the user's server cart.
    ///
    /// # Errors
    ///
    /// Returns `ShopError::Auth` if login fails. A failed cart sync does not
    /// fail the login; it is logged.
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile> {
        // Login clears the persisted cart, so take the guest lines first
        let guest = if self.inner.store.mode() == OwnerMode::Guest {
            self.inner.store.cart()
        } else {
            Cart::new()
        };

        let profile = self.inner.session.login(email, password).await?;

        match self.inner.engine.sync_local_cart_to_server(&guest).await {
            Ok(report) if !report.is_complete() => {
                warn!(
                    replayed = report.replayed,
                    failed = report.failed,
                    "Guest cart only partially synced"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Guest cart sync failed"),
        }

        info!(user_id = %profile.id, "Shopper signed in");
        Ok(profile)
    }

    /// Log out. Always succeeds locally.
    pub async fn logout(&self) {
        self.inner.session.logout().await;
    }

    /// Create an account. The caller routes to login afterwards.
    ///
    /// # Errors
    ///
    /// Returns `ShopError::Auth` describing why registration failed.
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<()> {
        Ok(self.inner.session.register(name, email, password).await?)
    }

    /// Update the signed-in user's profile.
    ///
    /// # Errors
    ///
    /// Returns `ShopError::Auth` describing why the update failed.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        Ok(self.inner.session.update_profile(update).await?)
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    // =========================================================================
    // Cart
    // =========================================================================

    /// Current cart.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.inner.store.cart()
    }

    /// Receive every cart change.
    #[must_use]
    pub fn watch_cart(&self) -> watch::Receiver<Cart> {
        self.inner.store.watch()
    }

    /// Add one unit of a product.
    ///
    /// # Errors
    ///
    /// Returns `ShopError::Cart` if the mutation fails.
    pub async fn add_to_cart(&self, product_id: &ProductId) -> Result<Cart> {
        reported(self.inner.engine.add_to_cart(product_id).await)
    }

    /// Remove a product's line.
    ///
    /// # Errors
    ///
    /// Returns `ShopError::Cart` if the mutation fails.
    pub async fn remove_from_cart(&self, product_id: &ProductId) -> Result<Cart> {
        reported(self.inner.engine.remove_from_cart(product_id).await)
    }

    /// Set a product's quantity; zero or less removes it.
    ///
    /// # Errors
    ///
    /// Returns `ShopError::Cart` if the mutation fails.
    pub async fn update_cart_item_count(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<Cart> {
        reported(
            self.inner
                .engine
                .update_cart_item_count(product_id, quantity)
                .await,
        )
    }

    /// Empty the cart.
    pub async fn clear_cart(&self) -> ClearOutcome {
        self.inner.engine.clear_cart().await
    }

    /// Pull the latest cart, e.g. when a cart or checkout screen gains focus.
    ///
    /// # Errors
    ///
    /// Returns `ShopError::Cart` if the refresh failed; the cart is then empty.
    pub async fn refresh_cart(&self) -> Result<Cart> {
        Ok(self.inner.engine.refresh_cart().await?)
    }

    /// Total units in the cart.
    #[must_use]
    pub fn total_cart_items(&self) -> u64 {
        self.inner.engine.total_cart_items()
    }

    /// Total price of the cart over `catalog`.
    #[must_use]
    pub fn total_cart_amount(&self, catalog: &Catalog) -> Decimal {
        self.inner.engine.total_cart_amount(catalog)
    }
}

impl std::fmt::Debug for Shop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shop")
            .field("session", &self.inner.session)
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

/// Report internal cart failures before handing them to the UI.
fn reported(result: std::result::Result<Cart, CartError>) -> Result<Cart> {
    result.map_err(|e| {
        let err = ShopError::from(e);
        err.report();
        err
    })
}
