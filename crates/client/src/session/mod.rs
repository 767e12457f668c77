//! Session manager.
//!
//! The only component allowed to create or destroy the session token. It
//! knows who is logged in, persists the session-scoped keys, and tells the
//! rest of the client about changes through [`SessionEvents`].
//!
//! # Trust
//!
//! A session restored while the profile endpoint is unreachable is built from
//! the token's own payload and marked [`Trust::Degraded`]. That identity is
//! for display only; the cart engine re-derives identity from the server
//! before every write regardless of trust.

mod error;
pub mod token;

pub use error::AuthError;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use pocketshop_core::{Cart, Email, Role, UserId};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument, warn};

use crate::api::{CommerceApi, ProfileUpdate, RegisterRequest, UserProfile};
use crate::error::{clear_sentry_user, set_sentry_user};
use crate::events::{SessionEvent, SessionEvents};
use crate::refresh::AppRefreshSignal;
use crate::storage::{KeyValueStore, StorageError, keys, store_json};

/// How far the session identity has been confirmed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    /// Identity confirmed by the server.
    Verified,
    /// Identity decoded from the token while the server was unreachable.
    Degraded,
}

/// The logged-in user.
///
/// `Debug` is implemented manually to redact the token.
#[derive(Clone)]
pub struct Session {
    token: SecretString,
    user_id: UserId,
    role: Role,
    profile: Option<UserProfile>,
    trust: Trust,
}

impl Session {
    /// Bearer token.
    #[must_use]
    pub const fn token(&self) -> &SecretString {
        &self.token
    }

    /// Logged-in user.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Role of the logged-in user.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Full profile, when the server has provided one.
    #[must_use]
    pub const fn profile(&self) -> Option<&UserProfile> {
        self.profile.as_ref()
    }

    /// How far the identity has been confirmed.
    #[must_use]
    pub const fn trust(&self) -> Trust {
        self.trust
    }

    fn verified(token: SecretString, profile: UserProfile) -> Self {
        Self {
            token,
            user_id: profile.id.clone(),
            role: profile.role,
            profile: Some(profile),
            trust: Trust::Verified,
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("profile", &self.profile)
            .field("trust", &self.trust)
            .finish()
    }
}

#[derive(Debug, Default)]
struct SessionState {
    session: Option<Session>,
    last_error: Option<String>,
}

/// Owner of the authentication token and current identity.
pub struct SessionManager {
    api: Arc<dyn CommerceApi>,
    storage: Arc<dyn KeyValueStore>,
    events: Arc<SessionEvents>,
    refresh: Arc<AppRefreshSignal>,
    state: RwLock<SessionState>,
}

impl SessionManager {
    /// Create a session manager with no session.
    #[must_use]
    pub fn new(
        api: Arc<dyn CommerceApi>,
        storage: Arc<dyn KeyValueStore>,
        events: Arc<SessionEvents>,
        refresh: Arc<AppRefreshSignal>,
    ) -> Self {
        Self {
            api,
            storage,
            events,
            refresh,
            state: RwLock::new(SessionState::default()),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Current session, if any.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.read().session.clone()
    }

    /// Current bearer token, if any.
    #[must_use]
    pub fn token(&self) -> Option<SecretString> {
        self.read().session.as_ref().map(|s| s.token.clone())
    }

    /// Currently known user, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.read().session.as_ref().map(|s| s.user_id.clone())
    }

    /// Whether a token is present.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.read().session.is_some()
    }

    /// Whether `token` is still the current session's token.
    ///
    /// False once the session has been dropped or replaced by another login.
    #[must_use]
    pub fn holds_token(&self, token: &SecretString) -> bool {
        self.read()
            .session
            .as_ref()
            .is_some_and(|s| s.token.expose_secret() == token.expose_secret())
    }

    /// User-facing message from the last failed login, register or profile
    /// update. Cleared by the next success.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    /// Dismiss the last error.
    pub fn clear_error(&self) {
        self.write().last_error = None;
    }

    // =========================================================================
    // Restore
    // =========================================================================

    /// Restore the session from the persisted token at startup.
    ///
    /// - Profile fetch succeeds: verified session.
    /// - Server rejects the token: token discarded, no session.
    /// - Any other failure: degraded session from the token payload, or no
    ///   session if the payload is unreadable or expired.
    #[instrument(skip(self))]
    pub async fn restore_session(&self) -> Option<Session> {
        let raw = match self.storage.get(keys::TOKEN).await {
            Ok(Some(raw)) if !raw.trim().is_empty() => raw,
            Ok(_) => {
                debug!("No persisted token");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read persisted token");
                return None;
            }
        };
        let token = SecretString::from(raw);

        match self.api.current_user(&token).await {
            Ok(profile) => {
                let session = Session::verified(token, profile);
                self.persist_identity(&session).await;
                info!(user_id = %session.user_id, "Session restored");
                Some(self.establish(session))
            }
            Err(e) if e.is_unauthorized() => {
                info!("Persisted token rejected by server");
                self.end_session(SessionEvent::Cleared).await;
                None
            }
            Err(e) => {
                let Some(claims) = token::decode_claims(token.expose_secret())
                    .filter(|claims| !claims.is_expired(Utc::now()))
                else {
                    warn!(error = %e, "Profile unavailable and token unreadable; discarding");
                    self.end_session(SessionEvent::Cleared).await;
                    return None;
                };

                warn!(
                    error = %e,
                    user_id = %claims.user_id,
                    "Profile unavailable; restoring degraded session from token"
                );
                let session = Session {
                    token,
                    user_id: claims.user_id,
                    role: claims.role,
                    profile: None,
                    trust: Trust::Degraded,
                };
                self.persist_identity(&session).await;
                Some(self.establish(session))
            }
        }
    }

    // =========================================================================
    // Login / Register
    // =========================================================================

    /// Log in, replacing any existing session.
    ///
    /// On success the new user's server cart has already been pushed to
    /// the cart store, and the app refresh signal is set.
    ///
    /// # Errors
    ///
    /// Returns `AuthError` describing why login failed. The same error's
    /// user message is also kept in [`last_error`](Self::last_error).
    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, AuthError> {
        let result = self.login_inner(email, password).await;
        self.record(result.as_ref().err());
        result
    }

    async fn login_inner(&self, email: &str, password: &str) -> Result<UserProfile, AuthError> {
        if email.trim().is_empty() {
            return Err(AuthError::MissingField("email"));
        }
        if password.is_empty() {
            return Err(AuthError::MissingField("password"));
        }
        let email = Email::parse(email)?;

        // No bleed-over from whoever was logged in before
        self.clear_session_keys().await?;
        self.reset(SessionEvent::Cleared);

        let response = self
            .api
            .login(email.as_str(), password)
            .await
            .map_err(AuthError::from_login)?;
        if response.token.trim().is_empty() {
            return Err(AuthError::Server(
                "Login failed. Please try again".to_string(),
            ));
        }
        let token = SecretString::from(response.token.clone());
        self.storage.set(keys::TOKEN, token.expose_secret()).await?;

        let session = match self.api.current_user(&token).await {
            Ok(profile) => Session::verified(token, profile),
            Err(e) => {
                warn!(error = %e, "Profile fetch after login failed; using login response");
                match response.profile() {
                    Some(profile) => Session::verified(token, profile),
                    None => self.session_from_claims(token).await?,
                }
            }
        };

        self.persist_identity(&session).await;
        let session = self.establish(session);
        info!(user_id = %session.user_id, "Logged in");

        self.push_cart(&session).await;

        if let Err(e) = self.refresh.trigger().await {
            warn!(error = %e, "Failed to set app refresh signal");
        }

        Ok(session.profile.unwrap_or_else(|| UserProfile {
            id: session.user_id,
            name: None,
            email: Some(email.to_string()),
            role: session.role,
            avatar: None,
        }))
    }

    async fn session_from_claims(&self, token: SecretString) -> Result<Session, AuthError> {
        let Some(claims) = token::decode_claims(token.expose_secret()) else {
            // Never keep a token we cannot attribute to a user
            self.clear_session_keys().await?;
            return Err(AuthError::Server(
                "Login failed. Please try again".to_string(),
            ));
        };
        Ok(Session {
            token,
            user_id: claims.user_id,
            role: claims.role,
            profile: None,
            trust: Trust::Degraded,
        })
    }

    /// Fetch the new user's cart and push it to the cart store immediately.
    async fn push_cart(&self, session: &Session) {
        let cart = match self.api.get_cart(&session.token, &session.user_id).await {
            Ok(cart) => cart,
            Err(e) => {
                warn!(error = %e, "Cart fetch after login failed; starting empty");
                Cart::new()
            }
        };

        if let Err(e) = store_json(self.storage.as_ref(), keys::CART_ITEMS, &cart).await {
            warn!(error = %e, "Failed to persist cart after login");
        }
        self.events.emit(SessionEvent::CartUpdated {
            user_id: session.user_id.clone(),
            cart,
        });
    }

    /// Create an account. Never logs in or stores a token.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::UserAlreadyExists` for duplicate accounts,
    /// `AuthError::Validation` when the server rejects the fields, or another
    /// `AuthError` describing the failure.
    #[instrument(skip(self, password))]
    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<(), AuthError> {
        let result = self.register_inner(name, email, password).await;
        self.record(result.as_ref().err());
        result
    }

    async fn register_inner(&self, name: &str, email: &str, password: &str) -> Result<(), AuthError> {
        if name.trim().is_empty() {
            return Err(AuthError::MissingField("name"));
        }
        if email.trim().is_empty() {
            return Err(AuthError::MissingField("email"));
        }
        if password.is_empty() {
            return Err(AuthError::MissingField("password"));
        }
        let email = Email::parse(email)?;

        let response = self
            .api
            .register(&RegisterRequest::shopper(name, email.as_str(), password))
            .await
            .map_err(AuthError::from_register)?;

        if !response.succeeded() {
            let message = response
                .message
                .unwrap_or_else(|| "Registration failed. Please try again".to_string());
            if error::mentions_existing_account(&message) {
                return Err(AuthError::UserAlreadyExists);
            }
            return Err(AuthError::Validation(message));
        }

        info!(email = %email, "Account registered");
        Ok(())
    }

    // =========================================================================
    // Logout / Expiry
    // =========================================================================

    /// Log out. Always succeeds locally.
    ///
    /// The server logout is best effort. If clearing the session keys fails,
    /// the minimum set (token, user id, cart) is removed key by key.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Some(token) = self.token() {
            if let Err(e) = self.api.logout(&token).await {
                warn!(error = %e, "Server logout failed; continuing with local logout");
            }
        }

        self.end_session(SessionEvent::Cleared).await;
        info!("Logged out");
    }

    /// Drop the session after the server rejected `token` mid-operation.
    ///
    /// Same local effect as [`logout`](Self::logout) without the server call.
    /// Does nothing if `token` no longer belongs to the current session.
    /// Returns whether the session was dropped.
    #[instrument(skip_all)]
    pub async fn expire(&self, token: &SecretString) -> bool {
        if !self.holds_token(token) {
            debug!("Rejected token is no longer current; session kept");
            return false;
        }
        warn!("Session token rejected; signing out locally");
        self.end_session(SessionEvent::ExpiredSession).await;
        true
    }

    async fn end_session(&self, event: SessionEvent) {
        if let Err(e) = self.clear_session_keys().await {
            warn!(error = %e, "Failed to clear session keys; forcing minimum set");
            for key in keys::LOGOUT_MINIMUM {
                if let Err(e) = self.storage.remove(key).await {
                    tracing::error!(key, error = %e, "Failed to remove session key");
                }
            }
        }
        self.reset(event);
    }

    // =========================================================================
    // Profile
    // =========================================================================

    /// Update the profile and merge the result into the session.
    ///
    /// The token is always preserved.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NotAuthenticated` without a session,
    /// `AuthError::SessionExpired` if the server rejects the token (the
    /// session is then dropped), or another `AuthError` describing the failure.
    #[instrument(skip(self, update))]
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, AuthError> {
        let result = self.update_profile_inner(update).await;
        self.record(result.as_ref().err());
        result
    }

    async fn update_profile_inner(&self, update: &ProfileUpdate) -> Result<UserProfile, AuthError> {
        let session = self.session().ok_or(AuthError::NotAuthenticated)?;
        if update.is_empty() {
            return Err(AuthError::Validation("Nothing to update".to_string()));
        }

        let updated = match self.api.update_profile(&session.token, update).await {
            Ok(profile) => profile,
            Err(e) => {
                let err = AuthError::from_authenticated(e);
                if matches!(err, AuthError::SessionExpired) {
                    self.expire(&session.token).await;
                }
                return Err(err);
            }
        };

        let merged = {
            let mut state = self.write();
            let Some(current) = state
                .session
                .as_mut()
                .filter(|s| s.user_id == session.user_id)
            else {
                // Logged out or switched user while the request was in flight
                return Err(AuthError::NotAuthenticated);
            };
            let (id, role) = (current.user_id.clone(), current.role);
            let profile = current.profile.get_or_insert_with(|| UserProfile {
                id,
                name: None,
                email: None,
                role,
                avatar: None,
            });
            profile.merge(updated);
            current.role = profile.role;
            profile.clone()
        };

        if let Some(avatar) = &merged.avatar {
            if let Err(e) = self.storage.set(keys::USER_AVATAR, avatar).await {
                warn!(error = %e, "Failed to persist avatar");
            }
        }
        self.events.emit(SessionEvent::ProfileUpdated {
            user_id: merged.id.clone(),
        });
        Ok(merged)
    }

    // =========================================================================
    // Identity reconciliation
    // =========================================================================

    /// Adopt the identity the server reported for `token`.
    ///
    /// Upgrades a degraded session to verified. If the server reports a
    /// different user than the cached one, the cached user id is replaced
    /// and `UserChanged` is emitted. Returns whether the user changed, or
    /// `None` without touching anything when `token` is no longer the
    /// session's token.
    pub async fn adopt_identity(&self, token: &SecretString, profile: &UserProfile) -> Option<bool> {
        let changed = {
            let mut state = self.write();
            let session = state
                .session
                .as_mut()
                .filter(|s| s.token.expose_secret() == token.expose_secret())?;
            let changed = session.user_id != profile.id;
            session.user_id = profile.id.clone();
            session.role = profile.role;
            session.profile = Some(profile.clone());
            session.trust = Trust::Verified;
            changed
        };

        if changed {
            warn!(user_id = %profile.id, "Cached user id drifted from server identity");
            if let Err(e) = self.storage.set(keys::USER_ID, profile.id.as_str()).await {
                warn!(error = %e, "Failed to persist reconciled user id");
            }
            self.events.emit(SessionEvent::UserChanged {
                user_id: profile.id.clone(),
            });
        }
        Some(changed)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        // State is always replaced whole, so a poisoned lock is still consistent
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, error: Option<&AuthError>) {
        self.write().last_error = error.map(AuthError::user_message);
    }

    /// Install a session and announce it.
    fn establish(&self, session: Session) -> Session {
        self.write().session = Some(session.clone());
        set_sentry_user(
            &session.user_id,
            session.profile.as_ref().and_then(|p| p.email.as_deref()),
        );
        self.events.emit(SessionEvent::SignedIn {
            user_id: session.user_id.clone(),
        });
        session
    }

    /// Drop the in-memory session and announce why.
    fn reset(&self, event: SessionEvent) {
        let had_session = self.write().session.take().is_some();
        if had_session {
            clear_sentry_user();
        }
        self.events.emit(event);
    }

    async fn persist_identity(&self, session: &Session) {
        if let Err(e) = self.storage.set(keys::TOKEN, session.token.expose_secret()).await {
            warn!(error = %e, "Failed to persist token");
        }
        if let Err(e) = self.storage.set(keys::USER_ID, session.user_id.as_str()).await {
            warn!(error = %e, "Failed to persist user id");
        }
        let avatar = session.profile.as_ref().and_then(|p| p.avatar.as_deref());
        let result = match avatar {
            Some(avatar) => self.storage.set(keys::USER_AVATAR, avatar).await,
            None => self.storage.remove(keys::USER_AVATAR).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist avatar");
        }
    }

    /// Remove every session-scoped key, attempting all of them.
    async fn clear_session_keys(&self) -> Result<(), StorageError> {
        let mut first_error = None;
        for key in keys::SESSION_SCOPED {
            if let Err(e) = self.storage.remove(key).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("session", &self.read().session)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::fake::{FakeCommerceApi, FailingStore, jwt_for};
    use crate::storage::{MemoryStore, load_json};
    use pocketshop_core::ProductId;

    struct Harness {
        api: Arc<FakeCommerceApi>,
        storage: Arc<MemoryStore>,
        events: Arc<SessionEvents>,
        manager: SessionManager,
    }

    fn harness() -> Harness {
        let api = Arc::new(FakeCommerceApi::new());
        let storage = Arc::new(MemoryStore::new());
        let events = Arc::new(SessionEvents::new());
        let refresh = Arc::new(AppRefreshSignal::new(storage.clone()));
        let manager = SessionManager::new(api.clone(), storage.clone(), events.clone(), refresh);
        Harness {
            api,
            storage,
            events,
            manager,
        }
    }

    #[tokio::test]
    async fn test_login_persists_session_and_pushes_cart() {
        let h = harness();
        h.api.add_user("u1", "ada@example.com", "hunter22");
        h.api.seed_cart("u1", &[("p1", 2)]);
        let mut rx = h.events.subscribe();

        let profile = h.manager.login("Ada@Example.com", "hunter22").await.unwrap();

        assert_eq!(profile.id.as_str(), "u1");
        assert_eq!(h.manager.user_id().unwrap().as_str(), "u1");
        assert_eq!(h.manager.session().unwrap().trust(), Trust::Verified);
        assert!(h.storage.contains(keys::TOKEN));
        assert_eq!(
            h.storage.get(keys::USER_ID).await.unwrap().as_deref(),
            Some("u1")
        );
        assert!(h.storage.contains(keys::TRIGGER_APP_REFRESH));

        let persisted: Cart = load_json(h.storage.as_ref(), keys::CART_ITEMS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.total_items(), 2);

        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Cleared);
        assert!(matches!(rx.recv().await.unwrap(), SessionEvent::SignedIn { .. }));
        match rx.recv().await.unwrap() {
            SessionEvent::CartUpdated { user_id, cart } => {
                assert_eq!(user_id.as_str(), "u1");
                assert_eq!(cart.quantity_of(&ProductId::new("p1")).unwrap().get(), 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(h.manager.last_error(), None);
    }

    #[tokio::test]
    async fn test_login_clears_previous_user_keys() {
        let h = harness();
        h.api.add_user("u1", "ada@example.com", "hunter22");
        h.storage.set(keys::USER_AVATAR, "old.png").await.unwrap();
        h.storage.set(keys::CART_ITEMS, "[]").await.unwrap();

        h.manager.login("ada@example.com", "hunter22").await.unwrap();
        assert!(!h.storage.contains(keys::USER_AVATAR));
    }

    #[tokio::test]
    async fn test_login_failures_are_recorded() {
        let h = harness();
        h.api.add_user("u1", "ada@example.com", "hunter22");

        let err = h.manager.login("ada@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
        assert_eq!(
            h.manager.last_error().as_deref(),
            Some("Invalid email or password")
        );
        assert!(!h.manager.is_authenticated());

        let err = h.manager.login("nobody@example.com", "x").await.unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));

        let err = h.manager.login("", "x").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingField("email")));
        assert_eq!(h.api.calls("login"), 2);
    }

    #[tokio::test]
    async fn test_login_server_error_is_not_a_credential_error() {
        let h = harness();
        h.api.fail_next("login", ApiError::Status { status: 503, message: String::new() });
        let err = h.manager.login("ada@example.com", "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::Server(_)));
        assert!(!matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_login_falls_back_to_login_response_profile() {
        let h = harness();
        h.api.add_user("u1", "ada@example.com", "hunter22");
        h.api.fail_next("current_user", ApiError::Status { status: 500, message: String::new() });

        let profile = h.manager.login("ada@example.com", "hunter22").await.unwrap();
        assert_eq!(profile.id.as_str(), "u1");
        assert_eq!(h.manager.session().unwrap().trust(), Trust::Verified);
    }

    #[tokio::test]
    async fn test_register_never_stores_token() {
        let h = harness();
        h.manager.register("Ada", "ada@example.com", "hunter22").await.unwrap();
        assert!(!h.storage.contains(keys::TOKEN));
        assert!(!h.manager.is_authenticated());

        let err = h
            .manager
            .register("Ada", "ada@example.com", "hunter22")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UserAlreadyExists));

        let err = h.manager.register("", "x@example.com", "pw").await.unwrap_err();
        assert!(matches!(err, AuthError::MissingField("name")));
    }

    #[tokio::test]
    async fn test_logout_survives_server_failure() {
        let h = harness();
        h.api.add_user("u1", "ada@example.com", "hunter22");
        h.manager.login("ada@example.com", "hunter22").await.unwrap();
        h.api.fail_next("logout", ApiError::Status { status: 500, message: String::new() });

        h.manager.logout().await;

        for key in keys::SESSION_SCOPED {
            assert!(!h.storage.contains(key), "{key} still present");
        }
        assert!(!h.manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_forces_minimum_keys_when_storage_fails() {
        let api = Arc::new(FakeCommerceApi::new());
        let storage = Arc::new(FailingStore::failing_on(keys::USER_AVATAR));
        let events = Arc::new(SessionEvents::new());
        let refresh = Arc::new(AppRefreshSignal::new(storage.clone()));
        let manager = SessionManager::new(api.clone(), storage.clone(), events, refresh);
        api.add_user("u1", "ada@example.com", "hunter22");
        storage.inner().set(keys::TOKEN, "t").await.unwrap();
        storage.inner().set(keys::USER_ID, "u1").await.unwrap();
        storage.inner().set(keys::CART_ITEMS, "[]").await.unwrap();

        manager.logout().await;

        for key in keys::LOGOUT_MINIMUM {
            assert!(!storage.inner().contains(key), "{key} still present");
        }
    }

    #[tokio::test]
    async fn test_restore_verified_session() {
        let h = harness();
        h.api.add_user("u1", "ada@example.com", "hunter22");
        h.storage.set(keys::TOKEN, &jwt_for("u1")).await.unwrap();

        let session = h.manager.restore_session().await.unwrap();
        assert_eq!(session.user_id().as_str(), "u1");
        assert_eq!(session.trust(), Trust::Verified);
    }

    #[tokio::test]
    async fn test_restore_degrades_when_profile_unavailable() {
        let h = harness();
        h.storage.set(keys::TOKEN, &jwt_for("u9")).await.unwrap();
        h.api.fail_next("current_user", ApiError::Status { status: 502, message: String::new() });

        let session = h.manager.restore_session().await.unwrap();
        assert_eq!(session.user_id().as_str(), "u9");
        assert_eq!(session.trust(), Trust::Degraded);
        assert!(h.storage.contains(keys::TOKEN));
    }

    #[tokio::test]
    async fn test_restore_discards_rejected_token() {
        let h = harness();
        h.storage.set(keys::TOKEN, &jwt_for("u1")).await.unwrap();
        h.api.fail_next("current_user", ApiError::Unauthorized("jwt expired".into()));

        assert!(h.manager.restore_session().await.is_none());
        assert!(!h.storage.contains(keys::TOKEN));
    }

    #[tokio::test]
    async fn test_restore_discards_unreadable_token_when_offline() {
        let h = harness();
        h.storage.set(keys::TOKEN, "opaque").await.unwrap();
        h.api.fail_next("current_user", ApiError::Status { status: 500, message: String::new() });

        assert!(h.manager.restore_session().await.is_none());
        assert!(!h.storage.contains(keys::TOKEN));
    }

    #[tokio::test]
    async fn test_update_profile_keeps_token() {
        let h = harness();
        h.api.add_user("u1", "ada@example.com", "hunter22");
        h.manager.login("ada@example.com", "hunter22").await.unwrap();
        let token_before = h.manager.token().unwrap().expose_secret().to_string();

        let update = ProfileUpdate {
            name: Some("Ada L".to_string()),
            ..Default::default()
        };
        let profile = h.manager.update_profile(&update).await.unwrap();

        assert_eq!(profile.name.as_deref(), Some("Ada L"));
        assert_eq!(h.manager.token().unwrap().expose_secret(), token_before);
    }

    #[tokio::test]
    async fn test_update_profile_requires_session() {
        let h = harness();
        let update = ProfileUpdate {
            name: Some("x".to_string()),
            ..Default::default()
        };
        let err = h.manager.update_profile(&update).await.unwrap_err();
        assert!(matches!(err, AuthError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_adopt_identity_reports_drift() {
        let h = harness();
        h.api.add_user("u1", "ada@example.com", "hunter22");
        h.manager.login("ada@example.com", "hunter22").await.unwrap();
        let mut rx = h.events.subscribe();

        let other = UserProfile {
            id: UserId::new("u2"),
            name: None,
            email: None,
            role: Role::User,
            avatar: None,
        };
        let token = h.manager.token().unwrap();
        assert_eq!(h.manager.adopt_identity(&token, &other).await, Some(true));
        assert_eq!(h.manager.user_id().unwrap().as_str(), "u2");
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::UserChanged {
                user_id: UserId::new("u2")
            }
        );
        assert_eq!(h.manager.adopt_identity(&token, &other).await, Some(false));
    }

    #[tokio::test]
    async fn test_previous_login_token_cannot_touch_session() {
        let h = harness();
        h.api.add_user("u1", "ada@example.com", "hunter22");
        h.api.add_user("u2", "bob@example.com", "hunter22");
        h.manager.login("ada@example.com", "hunter22").await.unwrap();
        let old_token = h.manager.token().unwrap();
        let old_profile = h.manager.session().unwrap().profile().cloned().unwrap();

        h.manager.logout().await;
        h.manager.login("bob@example.com", "hunter22").await.unwrap();

        assert!(!h.manager.holds_token(&old_token));
        assert_eq!(h.manager.adopt_identity(&old_token, &old_profile).await, None);
        assert!(!h.manager.expire(&old_token).await);
        assert_eq!(h.manager.user_id().unwrap().as_str(), "u2");
        assert!(h.storage.contains(keys::TOKEN));
        assert_eq!(
            h.storage.get(keys::USER_ID).await.unwrap().as_deref(),
            Some("u2")
        );
    }
}
