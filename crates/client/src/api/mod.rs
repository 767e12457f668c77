//! Commerce API contract.
//!
//! # Architecture
//!
//! - [`CommerceApi`] is the seam between the session/cart core and the
//!   network. The core only ever talks to this trait.
//! - [`HttpCommerceApi`] implements it over HTTPS with `reqwest`.
//! - The backend is the source of truth for authenticated carts: every cart
//!   endpoint returns the complete cart, which callers apply wholesale.
//!
//! # Endpoints
//!
//! | Method | Path                            | Result                |
//! |--------|---------------------------------|-----------------------|
//! | GET    | `/auth/me`                      | profile               |
//! | POST   | `/auth/login`                   | token + profile       |
//! | POST   | `/auth/register`                | success               |
//! | GET    | `/auth/logout`                  | ignored               |
//! | PUT    | `/auth/profile`                 | profile               |
//! | GET    | `/auth/cart/:userId`            | cart                  |
//! | POST   | `/auth/addtocart/:userId`       | cart                  |
//! | POST   | `/auth/removefromcart/:userId`  | cart                  |
//! | DELETE | `/order/clearcart/:userId`      | success (optional)    |
//!
//! Authenticated calls carry `Authorization: Bearer <token>`. The token is
//! passed per call, so there is no shared header to forget to clear.

mod http;
pub mod types;

pub use http::HttpCommerceApi;
pub use types::*;

use async_trait::async_trait;
use pocketshop_core::{Cart, ProductId, UserId};
use secrecy::SecretString;
use thiserror::Error;

/// Errors that can occur when calling the commerce API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Could not reach the server (connect failure or timeout).
    #[error("Network error: {0}")]
    Network(#[source] reqwest::Error),

    /// Any other transport failure.
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// Credentials or token rejected (401/403).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource or route not found (404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflicting resource, e.g. duplicate account (409).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request rejected as invalid (400/422).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limited by the server.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Any other non-success status.
    #[error("HTTP {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Server-provided message or truncated body.
        message: String,
    },

    /// Response body did not match the expected shape.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Endpoint URL could not be built.
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Network(err)
        } else {
            Self::Http(err)
        }
    }
}

impl ApiError {
    /// The server explicitly rejected the credentials or token.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized(_))
    }

    /// The failure may go away on its own (unreachable, throttled, 5xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Http(_) | Self::RateLimited(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// The endpoint itself does not exist on this backend.
    #[must_use]
    pub const fn is_endpoint_missing(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Status { status, .. } => *status == 405 || *status == 501,
            _ => false,
        }
    }

    /// Message provided by the server, when there is one.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Unauthorized(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::BadRequest(m)
            | Self::Status { message: m, .. } => Some(m.as_str()).filter(|m| !m.is_empty()),
            _ => None,
        }
    }
}

/// The remote commerce backend, as consumed by the session and cart core.
#[async_trait]
pub trait CommerceApi: Send + Sync {
    /// `POST /auth/login`.
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError>;

    /// `POST /auth/register`. Never establishes a session.
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError>;

    /// `GET /auth/me`: the profile the server associates with `token`.
    async fn current_user(&self, token: &SecretString) -> Result<UserProfile, ApiError>;

    /// `GET /auth/logout`. Best effort.
    async fn logout(&self, token: &SecretString) -> Result<(), ApiError>;

    /// `PUT /auth/profile`.
    async fn update_profile(
        &self,
        token: &SecretString,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, ApiError>;

    /// `GET /auth/cart/:userId`.
    async fn get_cart(&self, token: &SecretString, user_id: &UserId) -> Result<Cart, ApiError>;

    /// `POST /auth/addtocart/:userId`: adds exactly one unit.
    async fn add_to_cart(
        &self,
        token: &SecretString,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Cart, ApiError>;

    /// `POST /auth/removefromcart/:userId`: removes the product's line.
    async fn remove_from_cart(
        &self,
        token: &SecretString,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Cart, ApiError>;

    /// `DELETE /order/clearcart/:userId`. Returns the server's `success` flag.
    async fn clear_cart(&self, token: &SecretString, user_id: &UserId) -> Result<bool, ApiError>;
}
