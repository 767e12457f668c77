//! Cart synchronization engine.
//!
//! Guest carts live in the [`CartStore`] and local storage only. Signed-in
//! carts live on the server: every mutation asks the server who the token
//! belongs to, writes to that user's cart, applies the returned cart
//! wholesale and then reads it back once more according to the configured
//! [`VerifyPolicy`]. Any failed fetch empties the cart rather than leaving a
//! possibly stale one on screen.
//!
//! Each signed-in operation is bound to the token it started with. If that
//! token stops being the session's token mid-flight (logout, or another
//! login), the operation ends with `IdentityMismatch` and leaves the new
//! session, its cart and storage alone.

use std::sync::Arc;

use pocketshop_core::{Cart, Catalog, OwnerMode, ProductId, Quantity, UserId};
use rust_decimal::Decimal;
use secrecy::SecretString;
use tracing::{debug, info, instrument, warn};

use super::{CartError, CartStore, LineLocks, Ticket};
use crate::api::{ApiError, CommerceApi};
use crate::config::VerifyPolicy;
use crate::error::add_breadcrumb;
use crate::session::SessionManager;

/// Result of replaying a guest cart to the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Units added to the server cart.
    pub replayed: u32,
    /// Units whose add call failed.
    pub failed: u32,
}

impl SyncReport {
    /// Whether every unit made it to the server.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Result of clearing the cart.
///
/// The local cart is always empty afterwards; these fields describe the
/// server side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearOutcome {
    /// Which store was authoritative when the cart was cleared.
    pub mode: OwnerMode,
    /// Lines were removed one by one because bulk clear was unavailable.
    pub used_fallback: bool,
    /// Units the server still reported after clearing (0 for guests, or when
    /// the verification read failed).
    pub items_remaining: u64,
}

#[derive(Debug, Clone, Copy)]
enum CartWrite {
    Add,
    Remove,
}

impl CartWrite {
    async fn send(
        self,
        api: &dyn CommerceApi,
        token: &SecretString,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Cart, ApiError> {
        match self {
            Self::Add => api.add_to_cart(token, user_id, product_id).await,
            Self::Remove => api.remove_from_cart(token, user_id, product_id).await,
        }
    }
}

/// Performs cart mutations and keeps the [`CartStore`] in line with the
/// server.
pub struct CartSyncEngine {
    api: Arc<dyn CommerceApi>,
    session: Arc<SessionManager>,
    store: Arc<CartStore>,
    locks: LineLocks,
    policy: VerifyPolicy,
}

impl CartSyncEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        api: Arc<dyn CommerceApi>,
        session: Arc<SessionManager>,
        store: Arc<CartStore>,
        policy: VerifyPolicy,
    ) -> Self {
        Self {
            api,
            session,
            store,
            locks: LineLocks::new(),
            policy,
        }
    }

    /// The store this engine writes to.
    #[must_use]
    pub const fn store(&self) -> &Arc<CartStore> {
        &self.store
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Fetch `expected`'s cart and apply it wholesale.
    ///
    /// If the signed-in user is not `expected`, before or after the request,
    /// nothing is applied. Any failure leaves the cart empty, unless the
    /// session ended or changed hands while the request was in flight.
    ///
    /// # Errors
    ///
    /// Returns `CartError::IdentityMismatch` for a stale request,
    /// `CartError::SessionExpired` if the token was rejected, or the
    /// underlying API/storage error.
    #[instrument(skip(self), fields(user_id = %expected))]
    pub async fn fetch_cart_data(&self, expected: &UserId) -> Result<Cart, CartError> {
        let Some(token) = self.session.token() else {
            warn!("Cart fetch without a session; clearing cart");
            self.clear_local(None).await;
            return Err(CartError::NotAuthenticated);
        };
        self.fetch_with(&token, expected).await
    }

    async fn fetch_with(&self, token: &SecretString, expected: &UserId) -> Result<Cart, CartError> {
        let ticket = self.store.issue();
        let result = self.fetch_guarded(token, expected, ticket).await;
        if let Err(e) = &result {
            warn!(error = %e, "Cart fetch failed; clearing cart");
            self.clear_local(Some(token)).await;
        }
        result
    }

    async fn fetch_guarded(
        &self,
        token: &SecretString,
        expected: &UserId,
        ticket: Ticket,
    ) -> Result<Cart, CartError> {
        self.check_identity(token, expected)?;

        let cart = match self.api.get_cart(token, expected).await {
            Ok(cart) => cart,
            Err(e) => return Err(self.api_failure(e, token).await),
        };

        // The session may have changed while the request was in flight
        self.check_identity(token, expected)?;
        self.apply_server_cart(ticket, cart.clone()).await?;
        Ok(cart)
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Add one unit of a product.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the mutation or persisting the cart fails.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn add_to_cart(&self, product_id: &ProductId) -> Result<Cart, CartError> {
        let _line = self.locks.acquire(product_id).await;
        add_breadcrumb("cart", "Added to cart", Some(&[("product_id", product_id.as_str())]));
        self.add_locked(product_id).await
    }

    /// Remove a product's line entirely.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the mutation or persisting the cart fails.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn remove_from_cart(&self, product_id: &ProductId) -> Result<Cart, CartError> {
        let _line = self.locks.acquire(product_id).await;
        add_breadcrumb(
            "cart",
            "Removed from cart",
            Some(&[("product_id", product_id.as_str())]),
        );
        self.remove_locked(product_id).await
    }

    /// Set a product's quantity. Zero or less removes the line.
    ///
    /// Signed in, there is no server-side "set quantity": the line is removed
    /// and then added back one unit at a time, each a full round trip. A
    /// failure part-way leaves the server with fewer units than requested.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidQuantity` for quantities beyond `u32`, or
    /// the first failing mutation's error.
    #[instrument(skip(self), fields(product_id = %product_id))]
    pub async fn update_cart_item_count(
        &self,
        product_id: &ProductId,
        quantity: i64,
    ) -> Result<Cart, CartError> {
        let _line = self.locks.acquire(product_id).await;
        if quantity <= 0 {
            return self.remove_locked(product_id).await;
        }
        let quantity = Quantity::try_from(quantity)?;

        let Some(token) = self.session.token() else {
            let cart = self
                .store
                .update(|cart| cart.set_quantity(product_id.clone(), quantity.get()));
            self.store.persist().await?;
            return Ok(cart);
        };

        let mut cart = self
            .write_authenticated(&token, product_id, CartWrite::Remove)
            .await?;
        for _ in 0..quantity.get() {
            cart = self
                .write_authenticated(&token, product_id, CartWrite::Add)
                .await?;
        }
        Ok(cart)
    }

    async fn add_locked(&self, product_id: &ProductId) -> Result<Cart, CartError> {
        let Some(token) = self.session.token() else {
            let cart = self.store.update(|cart| cart.add_one(product_id.clone()));
            self.store.persist().await?;
            return Ok(cart);
        };
        self.write_authenticated(&token, product_id, CartWrite::Add)
            .await
    }

    async fn remove_locked(&self, product_id: &ProductId) -> Result<Cart, CartError> {
        let Some(token) = self.session.token() else {
            let cart = self.store.update(|cart| {
                cart.remove(product_id);
            });
            self.store.persist().await?;
            return Ok(cart);
        };
        self.write_authenticated(&token, product_id, CartWrite::Remove)
            .await
    }

    /// identity → scoped write → wholesale apply → verification read.
    async fn write_authenticated(
        &self,
        token: &SecretString,
        product_id: &ProductId,
        write: CartWrite,
    ) -> Result<Cart, CartError> {
        let user_id = self.current_identity(token).await?;
        let ticket = self.store.issue();

        let written = match write
            .send(self.api.as_ref(), token, &user_id, product_id)
            .await
        {
            Ok(cart) => cart,
            Err(e) if e.is_unauthorized() => return Err(self.api_failure(e, token).await),
            Err(e) => {
                warn!(error = %e, ?write, "Cart write failed; refetching to recover");
                if let Err(refetch) = self.fetch_with(token, &user_id).await {
                    warn!(error = %refetch, "Recovery fetch failed");
                }
                return Err(e.into());
            }
        };

        self.check_identity(token, &user_id)?;
        self.apply_server_cart(ticket, written.clone()).await?;
        self.verify(token, &user_id, written).await
    }

    /// Read the cart back after a write and settle disagreements per policy.
    async fn verify(
        &self,
        token: &SecretString,
        user_id: &UserId,
        written: Cart,
    ) -> Result<Cart, CartError> {
        let ticket = self.store.issue();
        let verified = match self.api.get_cart(token, user_id).await {
            Ok(cart) => cart,
            Err(e) if e.is_unauthorized() => return Err(self.api_failure(e, token).await),
            Err(e) => {
                warn!(error = %e, "Verification fetch failed; keeping write response");
                return Ok(written);
            }
        };

        if same_contents(&written, &verified) {
            return Ok(written);
        }

        warn!(
            written = written.total_items(),
            verified = verified.total_items(),
            policy = ?self.policy,
            "Verification fetch disagrees with write response"
        );
        match self.policy {
            VerifyPolicy::TrustWrite => Ok(written),
            VerifyPolicy::TrustVerification => {
                self.check_identity(token, user_id)?;
                self.apply_server_cart(ticket, verified.clone()).await?;
                Ok(verified)
            }
            VerifyPolicy::SurfaceConflict => {
                Err(CartError::VerificationMismatch { written, verified })
            }
        }
    }

    // =========================================================================
    // Clear
    // =========================================================================

    /// Empty the cart.
    ///
    /// The local cart is cleared first and always ends up empty. Signed in,
    /// the server cart is then cleared in bulk, or line by line when the
    /// bulk endpoint is unavailable, and read back once. Items left on the
    /// server are only logged.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self) -> ClearOutcome {
        let lines = self.store.cart();
        let token = self.session.token();
        self.clear_local(token.as_ref()).await;
        add_breadcrumb("cart", "Cleared cart", None);

        let Some(token) = token else {
            return ClearOutcome {
                mode: OwnerMode::Guest,
                used_fallback: false,
                items_remaining: 0,
            };
        };
        let mut outcome = ClearOutcome {
            mode: OwnerMode::Authenticated,
            used_fallback: false,
            items_remaining: 0,
        };

        let user_id = match self.current_identity(&token).await {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!(error = %e, "Could not confirm identity; server cart not cleared");
                return outcome;
            }
        };

        match self.api.clear_cart(&token, &user_id).await {
            Ok(true) => {}
            Err(e) if e.is_unauthorized() => {
                self.api_failure(e, &token).await;
                return outcome;
            }
            Ok(false) | Err(_) => {
                debug!("Bulk clear unavailable; removing lines individually");
                outcome.used_fallback = true;
                for line in lines.lines() {
                    if let Err(e) = self
                        .api
                        .remove_from_cart(&token, &user_id, &line.product_id)
                        .await
                    {
                        warn!(error = %e, product_id = %line.product_id, "Failed to remove line");
                    }
                }
            }
        }

        match self.api.get_cart(&token, &user_id).await {
            Ok(remaining) if !remaining.is_empty() => {
                warn!(
                    items = remaining.total_items(),
                    "Server cart not empty after clear"
                );
                outcome.items_remaining = remaining.total_items();
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Could not verify server cart after clear"),
        }
        outcome
    }

    // =========================================================================
    // Session transitions
    // =========================================================================

    /// Replay a guest cart into the signed-in user's server cart.
    ///
    /// The server cart is fetched first as the baseline. Each unit of each
    /// guest line is then added with its own call (merge by addition: units
    /// already on the server are kept and added to). Failed units are
    /// counted and skipped. Afterwards `cartItems` is reset to `[]`.
    ///
    /// # Errors
    ///
    /// Returns `CartError::NotAuthenticated` without a session,
    /// `CartError::SessionExpired` if the token is rejected,
    /// `CartError::IdentityMismatch` if the session changed mid-replay, or a
    /// storage error if the persisted cart cannot be reset.
    #[instrument(skip(self, guest), fields(lines = guest.len()))]
    pub async fn sync_local_cart_to_server(&self, guest: &Cart) -> Result<SyncReport, CartError> {
        let token = self.session.token().ok_or(CartError::NotAuthenticated)?;
        let user_id = self.current_identity(&token).await?;

        if let Err(e) = self.fetch_with(&token, &user_id).await {
            warn!(error = %e, "Baseline cart fetch failed; replaying anyway");
        }

        let mut report = SyncReport::default();
        for line in guest.lines() {
            let _line = self.locks.acquire(&line.product_id).await;
            for _ in 0..line.quantity.get() {
                match self
                    .write_authenticated(&token, &line.product_id, CartWrite::Add)
                    .await
                {
                    Ok(_) => report.replayed += 1,
                    Err(e @ (CartError::SessionExpired | CartError::IdentityMismatch { .. })) => {
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(error = %e, product_id = %line.product_id, "Failed to replay unit");
                        report.failed += 1;
                    }
                }
            }
        }

        self.store.reset_persisted().await?;
        info!(
            replayed = report.replayed,
            failed = report.failed,
            "Guest cart synced to server"
        );
        Ok(report)
    }

    /// Pull the latest cart.
    ///
    /// Guests reload the persisted cart. Signed in, the identity is
    /// re-derived from the server (reconciling a drifted cached user id)
    /// and the cart refetched; failures leave the cart empty and are only
    /// logged here, the error is returned for callers that care.
    ///
    /// # Errors
    ///
    /// Returns `CartError` if the refresh failed.
    #[instrument(skip(self))]
    pub async fn refresh_cart(&self) -> Result<Cart, CartError> {
        let Some(token) = self.session.token() else {
            return Ok(self.store.load_guest().await?);
        };

        let result = match self.current_identity(&token).await {
            Ok(user_id) => self.fetch_with(&token, &user_id).await,
            Err(e) => {
                self.clear_local(Some(&token)).await;
                Err(e)
            }
        };
        if let Err(e) = &result {
            warn!(error = %e, "Background cart refresh failed");
        }
        result
    }

    // =========================================================================
    // Totals
    // =========================================================================

    /// Total units in the cart.
    #[must_use]
    pub fn total_cart_items(&self) -> u64 {
        self.store.cart().total_items()
    }

    /// Total price of the cart. Lines missing from `catalog` count as zero.
    #[must_use]
    pub fn total_cart_amount(&self, catalog: &Catalog) -> Decimal {
        self.store.cart().total_amount(catalog)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Ask the server who the token belongs to.
    ///
    /// The answer is only adopted while `token` is still the session's.
    async fn current_identity(&self, token: &SecretString) -> Result<UserId, CartError> {
        let profile = match self.api.current_user(token).await {
            Ok(profile) => profile,
            Err(e) => return Err(self.api_failure(e, token).await),
        };
        match self.session.adopt_identity(token, &profile).await {
            Some(_) => Ok(profile.id),
            None => Err(CartError::IdentityMismatch {
                expected: profile.id,
                current: self.session.user_id(),
            }),
        }
    }

    /// The session still holds `token` and belongs to `expected`.
    fn check_identity(&self, token: &SecretString, expected: &UserId) -> Result<(), CartError> {
        let current = self.session.user_id();
        if self.session.holds_token(token) && current.as_ref() == Some(expected) {
            Ok(())
        } else {
            Err(CartError::IdentityMismatch {
                expected: expected.clone(),
                current,
            })
        }
    }

    async fn apply_server_cart(&self, ticket: Ticket, cart: Cart) -> Result<(), CartError> {
        if self.store.apply(ticket, cart, OwnerMode::Authenticated) {
            self.store.persist().await?;
        }
        Ok(())
    }

    /// Empty the cart on behalf of the session holding `token` (`None` for
    /// guests). Nothing happens once that session is gone.
    async fn clear_local(&self, token: Option<&SecretString>) {
        let still_current = match token {
            Some(token) => self.session.holds_token(token),
            None => !self.session.is_authenticated(),
        };
        if !still_current {
            debug!("Session changed; leaving cart to the current session");
            return;
        }
        let mode = if self.session.is_authenticated() {
            OwnerMode::Authenticated
        } else {
            OwnerMode::Guest
        };
        self.store.clear(mode);
        if let Err(e) = self.store.persist().await {
            warn!(error = %e, "Failed to persist cleared cart");
        }
    }

    /// Turn an API failure into a cart error, dropping the session when the
    /// server rejected `token` and it is still the session's.
    async fn api_failure(&self, err: ApiError, token: &SecretString) -> CartError {
        if err.is_unauthorized() {
            self.session.expire(token).await;
            CartError::SessionExpired
        } else {
            CartError::Api(err)
        }
    }
}

impl std::fmt::Debug for CartSyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartSyncEngine")
            .field("store", &self.store)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Same lines and quantities, in any order.
fn same_contents(a: &Cart, b: &Cart) -> bool {
    a.len() == b.len()
        && a.lines()
            .iter()
            .all(|line| b.quantity_of(&line.product_id) == Some(line.quantity))
}
