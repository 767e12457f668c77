//! Integration tests for pocketshop.
//!
//! The client is exercised end to end: real `reqwest` calls against an
//! in-process mock commerce backend, and a real file-backed store in a
//! temporary directory.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p pocketshop-integration-tests
//! ```
//!
//! # Mock Backend
//!
//! [`MockBackend`] serves the commerce API routes with `axum` on an
//! ephemeral loopback port. Accounts and carts live in memory. Tokens are
//! unsigned JWT-shaped strings whose payload names the user, so the client's
//! offline token decoding works against them. Faults (failing logout,
//! profile endpoint down, missing bulk clear, revoked tokens) are toggled
//! per test.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use pocketshop_client::ClientConfig;
use pocketshop_client::config::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// An unsigned JWT-shaped token naming `user_id`, expiring at `exp`
/// (seconds since the epoch) when given.
#[must_use]
pub fn mint_token(user_id: &str, exp: Option<i64>) -> String {
    let mut payload = json!({ "id": user_id, "role": "user" });
    if let Some(exp) = exp {
        payload["exp"] = json!(exp);
    }
    format!(
        "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.{}.mock",
        URL_SAFE_NO_PAD.encode(payload.to_string())
    )
}

/// A cart line as the backend stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerLine {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone)]
struct Account {
    id: String,
    name: String,
    email: String,
    password: String,
    avatar: Option<String>,
}

impl Account {
    fn profile(&self) -> Value {
        json!({
            "_id": self.id,
            "name": self.name,
            "email": self.email,
            "role": "user",
            "avatar": self.avatar,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    logout_fails: bool,
    profile_unavailable: bool,
    bulk_clear_missing: bool,
    tokens_revoked: bool,
}

#[derive(Debug, Default)]
struct Backend {
    accounts: Vec<Account>,
    carts: HashMap<String, Vec<ServerLine>>,
    adds: HashMap<String, usize>,
    requests: HashMap<&'static str, usize>,
    faults: Faults,
}

type SharedBackend = Arc<Mutex<Backend>>;

fn lock(backend: &SharedBackend) -> MutexGuard<'_, Backend> {
    backend.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-process commerce backend. Stops serving when dropped.
pub struct MockBackend {
    addr: SocketAddr,
    backend: SharedBackend,
    server: JoinHandle<()>,
}

impl MockBackend {
    /// Bind an ephemeral loopback port and start serving.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the listener cannot be bound.
    pub async fn start() -> std::io::Result<Self> {
        let backend = SharedBackend::default();
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let app = router(Arc::clone(&backend));
        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Mock backend stopped");
            }
        });

        Ok(Self {
            addr,
            backend,
            server,
        })
    }

    /// Base URL of the backend.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Client configuration pointing at this backend, persisting to
    /// `storage_path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the base URL is rejected.
    pub fn client_config(
        &self,
        storage_path: impl Into<PathBuf>,
    ) -> Result<ClientConfig, ConfigError> {
        let mut config = ClientConfig::new(&self.base_url())?;
        config.storage_path = storage_path.into();
        Ok(config)
    }

    /// Create an account and return its id.
    pub fn add_user(&self, email: &str, password: &str) -> String {
        let mut backend = lock(&self.backend);
        let id = format!("u{}", backend.accounts.len() + 1);
        backend.accounts.push(Account {
            id: id.clone(),
            name: email.split('@').next().unwrap_or_default().to_string(),
            email: email.to_string(),
            password: password.to_string(),
            avatar: None,
        });
        id
    }

    /// Replace a user's server cart.
    pub fn seed_cart(&self, user_id: &str, lines: &[(&str, i64)]) {
        let lines = lines
            .iter()
            .map(|(product_id, quantity)| ServerLine {
                product_id: (*product_id).to_string(),
                quantity: *quantity,
            })
            .collect();
        lock(&self.backend).carts.insert(user_id.to_string(), lines);
    }

    /// A user's server cart.
    #[must_use]
    pub fn cart(&self, user_id: &str) -> Vec<ServerLine> {
        lock(&self.backend)
            .carts
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Quantity of `product_id` in a user's server cart.
    #[must_use]
    pub fn quantity(&self, user_id: &str, product_id: &str) -> i64 {
        self.cart(user_id)
            .iter()
            .find(|line| line.product_id == product_id)
            .map_or(0, |line| line.quantity)
    }

    /// Number of add-to-cart calls for `product_id`, across all users.
    #[must_use]
    pub fn add_calls(&self, product_id: &str) -> usize {
        lock(&self.backend)
            .adds
            .get(product_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of requests served by `route`, e.g. `"logout"`.
    #[must_use]
    pub fn requests(&self, route: &str) -> usize {
        lock(&self.backend)
            .requests
            .get(route)
            .copied()
            .unwrap_or(0)
    }

    /// Make `GET /auth/logout` answer 500.
    pub fn fail_logout(&self) {
        lock(&self.backend).faults.logout_fails = true;
    }

    /// Make `GET /auth/me` answer 503 (or serve again).
    pub fn set_profile_available(&self, available: bool) {
        lock(&self.backend).faults.profile_unavailable = !available;
    }

    /// Make `DELETE /order/clearcart/:userId` answer 404 as if the route
    /// did not exist.
    pub fn remove_bulk_clear(&self) {
        lock(&self.backend).faults.bulk_clear_missing = true;
    }

    /// Reject every token issued so far with 401.
    pub fn revoke_tokens(&self) {
        lock(&self.backend).faults.tokens_revoked = true;
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn router(backend: SharedBackend) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/me", get(me))
        .route("/auth/logout", get(logout))
        .route("/auth/profile", put(update_profile))
        .route("/auth/cart/{user_id}", get(get_cart))
        .route("/auth/addtocart/{user_id}", post(add_to_cart))
        .route("/auth/removefromcart/{user_id}", post(remove_from_cart))
        .route("/order/clearcart/{user_id}", delete(clear_cart))
        .with_state(backend)
}

// =============================================================================
// Helpers
// =============================================================================

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn cart_response(lines: &[ServerLine]) -> Response {
    Json(json!({ "cart": lines })).into_response()
}

impl Backend {
    fn count(&mut self, route: &'static str) {
        *self.requests.entry(route).or_default() += 1;
    }

    /// Account named by the bearer token.
    fn authenticate(&self, headers: &HeaderMap) -> Result<&Account, Response> {
        let unauthorized = || error(StatusCode::UNAUTHORIZED, "Invalid token");
        if self.faults.tokens_revoked {
            return Err(unauthorized());
        }
        let token = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(unauthorized)?;
        let user_id = token
            .split('.')
            .nth(1)
            .and_then(|payload| URL_SAFE_NO_PAD.decode(payload).ok())
            .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
            .and_then(|claims| claims.get("id").and_then(Value::as_str).map(str::to_owned))
            .ok_or_else(unauthorized)?;
        self.accounts
            .iter()
            .find(|account| account.id == user_id)
            .ok_or_else(unauthorized)
    }

    /// Authenticate and require the token to belong to `user_id`.
    fn authorize(&self, headers: &HeaderMap, user_id: &str) -> Result<(), Response> {
        if self.authenticate(headers)?.id == user_id {
            Ok(())
        } else {
            Err(error(StatusCode::FORBIDDEN, "Forbidden"))
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(backend): State<SharedBackend>, Json(body): Json<LoginBody>) -> Response {
    let mut backend = lock(&backend);
    backend.count("login");
    let Some(account) = backend.accounts.iter().find(|a| a.email == body.email) else {
        return error(StatusCode::NOT_FOUND, "User not found");
    };
    if account.password != body.password {
        return error(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }
    let mut response = account.profile();
    response["token"] = json!(mint_token(&account.id, None));
    Json(response).into_response()
}

#[derive(Deserialize)]
struct RegisterBody {
    name: String,
    email: String,
    password: String,
}

async fn register(
    State(backend): State<SharedBackend>,
    Json(body): Json<RegisterBody>,
) -> Response {
    let mut backend = lock(&backend);
    backend.count("register");
    if body.name.is_empty() || body.email.is_empty() || body.password.is_empty() {
        return error(StatusCode::BAD_REQUEST, "All fields are required");
    }
    if backend.accounts.iter().any(|a| a.email == body.email) {
        return error(StatusCode::CONFLICT, "User already exists");
    }
    let id = format!("u{}", backend.accounts.len() + 1);
    backend.accounts.push(Account {
        id,
        name: body.name,
        email: body.email,
        password: body.password,
        avatar: None,
    });
    (StatusCode::CREATED, Json(json!({ "success": true }))).into_response()
}

async fn me(State(backend): State<SharedBackend>, headers: HeaderMap) -> Response {
    let mut backend = lock(&backend);
    backend.count("me");
    if backend.faults.profile_unavailable {
        return error(StatusCode::SERVICE_UNAVAILABLE, "Service unavailable");
    }
    match backend.authenticate(&headers) {
        Ok(account) => Json(json!({ "user": account.profile() })).into_response(),
        Err(response) => response,
    }
}

async fn logout(State(backend): State<SharedBackend>) -> Response {
    let mut backend = lock(&backend);
    backend.count("logout");
    if backend.faults.logout_fails {
        return error(StatusCode::INTERNAL_SERVER_ERROR, "Logout failed");
    }
    Json(json!({ "success": true })).into_response()
}

#[derive(Deserialize)]
struct ProfileBody {
    name: Option<String>,
    email: Option<String>,
    avatar: Option<String>,
}

async fn update_profile(
    State(backend): State<SharedBackend>,
    headers: HeaderMap,
    Json(body): Json<ProfileBody>,
) -> Response {
    let mut backend = lock(&backend);
    backend.count("profile");
    let id = match backend.authenticate(&headers) {
        Ok(account) => account.id.clone(),
        Err(response) => return response,
    };
    let Some(account) = backend.accounts.iter_mut().find(|a| a.id == id) else {
        return error(StatusCode::NOT_FOUND, "User not found");
    };
    if let Some(name) = body.name {
        account.name = name;
    }
    if let Some(email) = body.email {
        account.email = email;
    }
    if body.avatar.is_some() {
        account.avatar = body.avatar;
    }
    Json(json!({ "user": account.profile() })).into_response()
}

async fn get_cart(
    State(backend): State<SharedBackend>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut backend = lock(&backend);
    backend.count("cart");
    if let Err(response) = backend.authorize(&headers, &user_id) {
        return response;
    }
    cart_response(
        backend
            .carts
            .get(&user_id)
            .map(Vec::as_slice)
            .unwrap_or_default(),
    )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductBody {
    product_id: String,
}

async fn add_to_cart(
    State(backend): State<SharedBackend>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ProductBody>,
) -> Response {
    let mut backend = lock(&backend);
    backend.count("addtocart");
    if let Err(response) = backend.authorize(&headers, &user_id) {
        return response;
    }
    *backend.adds.entry(body.product_id.clone()).or_default() += 1;

    let cart = backend.carts.entry(user_id).or_default();
    match cart.iter_mut().find(|line| line.product_id == body.product_id) {
        Some(line) => line.quantity += 1,
        None => cart.push(ServerLine {
            product_id: body.product_id,
            quantity: 1,
        }),
    }
    cart_response(cart)
}

async fn remove_from_cart(
    State(backend): State<SharedBackend>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ProductBody>,
) -> Response {
    let mut backend = lock(&backend);
    backend.count("removefromcart");
    if let Err(response) = backend.authorize(&headers, &user_id) {
        return response;
    }
    let cart = backend.carts.entry(user_id).or_default();
    cart.retain(|line| line.product_id != body.product_id);
    cart_response(cart)
}

async fn clear_cart(
    State(backend): State<SharedBackend>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let mut backend = lock(&backend);
    backend.count("clearcart");
    if backend.faults.bulk_clear_missing {
        return (
            StatusCode::NOT_FOUND,
            format!("Cannot DELETE /order/clearcart/{user_id}"),
        )
            .into_response();
    }
    if let Err(response) = backend.authorize(&headers, &user_id) {
        return response;
    }
    backend.carts.remove(&user_id);
    Json(json!({ "success": true })).into_response()
}
