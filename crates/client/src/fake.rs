//! In-process commerce backend and storage doubles for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pocketshop_core::{Cart, ProductId, Role, UserId};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Notify;

use crate::api::{
    ApiError, CommerceApi, LoginResponse, ProfileFields, ProfileUpdate, RegisterRequest,
    RegisterResponse, UserProfile,
};
use crate::session::token::decode_claims;
use crate::storage::{KeyValueStore, MemoryStore, StorageError};

/// An unsigned JWT-shaped token naming `user_id`.
pub fn jwt_for(user_id: &str) -> String {
    let payload = serde_json::json!({ "id": user_id, "role": "user" }).to_string();
    format!("eyJhbGciOiJub25lIn0.{}.sig", URL_SAFE_NO_PAD.encode(payload))
}

/// A call paused by [`FakeCommerceApi::hold_next`].
#[derive(Default)]
pub struct Hold {
    reached: Notify,
    release: Notify,
}

impl Hold {
    /// Wait until the held call has started.
    pub async fn reached(&self) {
        self.reached.notified().await;
    }

    /// Let the held call continue.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

struct FakeUser {
    profile: UserProfile,
    password: String,
}

#[derive(Default)]
struct FakeState {
    users: Vec<FakeUser>,
    carts: HashMap<UserId, Cart>,
    calls: HashMap<&'static str, usize>,
    adds: HashMap<ProductId, usize>,
    removes: HashMap<ProductId, usize>,
    failures: HashMap<&'static str, VecDeque<ApiError>>,
    remap: HashMap<UserId, UserId>,
    drift: Option<(UserId, Cart)>,
    bulk_clear_disabled: bool,
    holds: HashMap<&'static str, Arc<Hold>>,
}

/// Scriptable in-memory commerce API.
#[derive(Default)]
pub struct FakeCommerceApi {
    state: Mutex<FakeState>,
}

impl FakeCommerceApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn add_user(&self, id: &str, email: &str, password: &str) {
        self.lock().users.push(FakeUser {
            profile: UserProfile {
                id: UserId::new(id),
                name: None,
                email: Some(email.to_string()),
                role: Role::User,
                avatar: None,
            },
            password: password.to_string(),
        });
    }

    pub fn seed_cart(&self, user_id: &str, lines: &[(&str, i64)]) {
        self.lock().carts.insert(UserId::new(user_id), cart_of(lines));
    }

    pub fn server_cart(&self, user_id: &str) -> Cart {
        self.lock()
            .carts
            .get(&UserId::new(user_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Make the next call to `method` fail with `error`.
    pub fn fail_next(&self, method: &'static str, error: ApiError) {
        self.lock().failures.entry(method).or_default().push_back(error);
    }

    /// After the next add/remove, replace the server cart behind the
    /// write response's back.
    pub fn drift_after_write(&self, user_id: &str, lines: &[(&str, i64)]) {
        self.lock().drift = Some((UserId::new(user_id), cart_of(lines)));
    }

    /// Pause the next call to `method` until the hold is released.
    pub fn hold_next(&self, method: &'static str) -> Arc<Hold> {
        let hold = Arc::new(Hold::default());
        self.lock().holds.insert(method, Arc::clone(&hold));
        hold
    }

    pub fn disable_bulk_clear(&self) {
        self.lock().bulk_clear_disabled = true;
    }

    /// Tokens issued for `from` now resolve to `to`.
    pub fn remap_token_user(&self, from: &str, to: &str) {
        self.lock().remap.insert(UserId::new(from), UserId::new(to));
    }

    pub fn calls(&self, method: &str) -> usize {
        self.lock().calls.get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    pub fn add_calls(&self, product_id: &ProductId) -> usize {
        self.lock().adds.get(product_id).copied().unwrap_or(0)
    }

    pub fn remove_calls(&self, product_id: &ProductId) -> usize {
        self.lock().removes.get(product_id).copied().unwrap_or(0)
    }

    async fn pause(&self, method: &'static str) {
        let hold = self.lock().holds.remove(method);
        if let Some(hold) = hold {
            hold.reached.notify_one();
            hold.release.notified().await;
        }
    }

    /// Count the call and pop any scripted failure.
    fn enter(&self, method: &'static str) -> Result<MutexGuard<'_, FakeState>, ApiError> {
        let mut state = self.lock();
        *state.calls.entry(method).or_default() += 1;
        if let Some(err) = state.failures.get_mut(method).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }
}

impl FakeState {
    fn resolve(&self, token: &SecretString) -> Result<&FakeUser, ApiError> {
        let claims = decode_claims(token.expose_secret())
            .ok_or_else(|| ApiError::Unauthorized("invalid token".into()))?;
        let user_id = self.remap.get(&claims.user_id).unwrap_or(&claims.user_id);
        self.users
            .iter()
            .find(|u| &u.profile.id == user_id)
            .ok_or_else(|| ApiError::Unauthorized("unknown user".into()))
    }

    fn authorize(&self, token: &SecretString, user_id: &UserId) -> Result<(), ApiError> {
        if &self.resolve(token)?.profile.id == user_id {
            Ok(())
        } else {
            Err(ApiError::Unauthorized("forbidden".into()))
        }
    }

    fn write(&mut self, user_id: &UserId, mutate: impl FnOnce(&mut Cart)) -> Cart {
        let cart = self.carts.entry(user_id.clone()).or_default();
        mutate(cart);
        let written = cart.clone();
        if let Some((drift_user, drifted)) = self.drift.take() {
            self.carts.insert(drift_user, drifted);
        }
        written
    }
}

#[async_trait]
impl CommerceApi for FakeCommerceApi {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let state = self.enter("login")?;
        let user = state
            .users
            .iter()
            .find(|u| u.profile.email.as_deref() == Some(email))
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
        if user.password != password {
            return Err(ApiError::Unauthorized("Invalid credentials".into()));
        }
        Ok(LoginResponse {
            token: jwt_for(user.profile.id.as_str()),
            user: None,
            fields: ProfileFields {
                id: Some(user.profile.id.clone()),
                email: user.profile.email.clone(),
                ..Default::default()
            },
        })
    }

    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        let mut state = self.enter("register")?;
        if state
            .users
            .iter()
            .any(|u| u.profile.email.as_deref() == Some(request.email.as_str()))
        {
            return Err(ApiError::Conflict("User already exists".into()));
        }
        let id = format!("u{}", state.users.len() + 100);
        state.users.push(FakeUser {
            profile: UserProfile {
                id: UserId::new(id),
                name: Some(request.name.clone()),
                email: Some(request.email.clone()),
                role: request.role,
                avatar: None,
            },
            password: request.password.clone(),
        });
        Ok(RegisterResponse {
            success: Some(true),
            message: None,
        })
    }

    async fn current_user(&self, token: &SecretString) -> Result<UserProfile, ApiError> {
        self.pause("current_user").await;
        let state = self.enter("current_user")?;
        Ok(state.resolve(token)?.profile.clone())
    }

    async fn logout(&self, token: &SecretString) -> Result<(), ApiError> {
        let state = self.enter("logout")?;
        state.resolve(token).map(|_| ())
    }

    async fn update_profile(
        &self,
        token: &SecretString,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, ApiError> {
        let mut state = self.enter("update_profile")?;
        let id = state.resolve(token)?.profile.id.clone();
        let user = state
            .users
            .iter_mut()
            .find(|u| u.profile.id == id)
            .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
        if let Some(name) = &update.name {
            user.profile.name = Some(name.clone());
        }
        if let Some(email) = &update.email {
            user.profile.email = Some(email.clone());
        }
        if let Some(avatar) = &update.avatar {
            user.profile.avatar = Some(avatar.clone());
        }
        Ok(user.profile.clone())
    }

    async fn get_cart(&self, token: &SecretString, user_id: &UserId) -> Result<Cart, ApiError> {
        self.pause("get_cart").await;
        let state = self.enter("get_cart")?;
        state.authorize(token, user_id)?;
        Ok(state.carts.get(user_id).cloned().unwrap_or_default())
    }

    async fn add_to_cart(
        &self,
        token: &SecretString,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Cart, ApiError> {
        let mut state = self.enter("add_to_cart")?;
        state.authorize(token, user_id)?;
        *state.adds.entry(product_id.clone()).or_default() += 1;
        Ok(state.write(user_id, |cart| cart.add_one(product_id.clone())))
    }

    async fn remove_from_cart(
        &self,
        token: &SecretString,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Cart, ApiError> {
        let mut state = self.enter("remove_from_cart")?;
        state.authorize(token, user_id)?;
        *state.removes.entry(product_id.clone()).or_default() += 1;
        Ok(state.write(user_id, |cart| {
            cart.remove(product_id);
        }))
    }

    async fn clear_cart(&self, token: &SecretString, user_id: &UserId) -> Result<bool, ApiError> {
        let mut state = self.enter("clear_cart")?;
        state.authorize(token, user_id)?;
        if state.bulk_clear_disabled {
            return Err(ApiError::NotFound(format!(
                "Cannot DELETE /order/clearcart/{user_id}"
            )));
        }
        state.carts.remove(user_id);
        Ok(true)
    }
}

fn cart_of(lines: &[(&str, i64)]) -> Cart {
    Cart::from_raw(lines.iter().map(|(p, q)| (ProductId::new(*p), *q)))
}

/// Memory store that fails every operation on one key.
pub struct FailingStore {
    inner: MemoryStore,
    failing_key: &'static str,
}

impl FailingStore {
    pub fn failing_on(key: &'static str) -> Self {
        Self {
            inner: MemoryStore::new(),
            failing_key: key,
        }
    }

    pub const fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self, key: &str) -> Result<(), StorageError> {
        if key == self.failing_key {
            Err(StorageError::Io(std::io::Error::other("injected failure")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check(key)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check(key)?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check(key)?;
        self.inner.remove(key).await
    }
}
