//! Wire types for the commerce API.
//!
//! These mirror the backend's JSON. They are converted into core types
//! ([`Cart`], [`UserId`], ...) at the edge so nothing above the API layer
//! deals with alternate field names.

use core::fmt;

use pocketshop_core::{Cart, ProductId, Role, UserId};
use serde::{Deserialize, Serialize};

// =============================================================================
// Profiles
// =============================================================================

/// A user profile as returned by `/auth/me` and `/auth/profile`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Backend user id (`id` or `_id` on the wire).
    #[serde(alias = "_id")]
    pub id: UserId,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Account email.
    #[serde(default)]
    pub email: Option<String>,
    /// Account role.
    #[serde(default)]
    pub role: Role,
    /// Avatar image URL.
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserProfile {
    /// Overlay fields from `other` that are present, keeping `self.id`.
    pub fn merge(&mut self, other: Self) {
        if other.name.is_some() {
            self.name = other.name;
        }
        if other.email.is_some() {
            self.email = other.email;
        }
        if other.avatar.is_some() {
            self.avatar = other.avatar;
        }
        self.role = other.role;
    }
}

/// `/auth/me` either returns the profile itself or wraps it in `user`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MeResponse {
    Wrapped { user: UserProfile },
    Bare(UserProfile),
}

impl From<MeResponse> for UserProfile {
    fn from(response: MeResponse) -> Self {
        match response {
            MeResponse::Wrapped { user } | MeResponse::Bare(user) => user,
        }
    }
}

/// Profile fields that may accompany a login response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileFields {
    #[serde(default, alias = "_id")]
    pub id: Option<UserId>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub avatar: Option<String>,
}

// =============================================================================
// Authentication
// =============================================================================

/// `POST /auth/login` response: `{token, ...profileFields}`.
///
/// `Debug` is implemented manually to redact the token.
#[derive(Clone, Deserialize)]
pub struct LoginResponse {
    /// Bearer token for subsequent calls.
    pub token: String,
    /// Profile nested under `user`, when the backend sends it that way.
    #[serde(default)]
    pub user: Option<UserProfile>,
    /// Profile fields at the top level.
    #[serde(flatten)]
    pub fields: ProfileFields,
}

impl LoginResponse {
    /// Best profile carried by the response, if it includes an id.
    #[must_use]
    pub fn profile(&self) -> Option<UserProfile> {
        if let Some(user) = &self.user {
            return Some(user.clone());
        }
        let id = self.fields.id.clone()?;
        Some(UserProfile {
            id,
            name: self.fields.name.clone(),
            email: self.fields.email.clone(),
            role: self.fields.role.unwrap_or_default(),
            avatar: self.fields.avatar.clone(),
        })
    }
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("token", &"[REDACTED]")
            .field("user", &self.user)
            .field("fields", &self.fields)
            .finish()
    }
}

/// `POST /auth/login` body.
#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// `POST /auth/register` body.
///
/// `Debug` is implemented manually to redact the password.
#[derive(Clone, Serialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .field("role", &self.role)
            .finish()
    }
}

impl RegisterRequest {
    /// Build a registration request for a shopper account.
    ///
    /// The client always asks for the shopper role; admins are promoted
    /// server-side.
    #[must_use]
    pub fn shopper(name: &str, email: &str, password: &str) -> Self {
        Self {
            name: name.trim().to_string(),
            email: email.to_string(),
            password: password.to_string(),
            role: Role::User,
        }
    }
}

/// `POST /auth/register` response: `{token}` or `{success}`.
///
/// Any token is deliberately not kept: registration never logs in.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}

impl RegisterResponse {
    /// Whether the backend reported the account as created.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.success != Some(false)
    }
}

/// `PUT /auth/profile` body. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl ProfileUpdate {
    /// Whether the update carries no fields.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.avatar.is_none()
    }
}

// =============================================================================
// Cart
// =============================================================================

/// A cart line as sent by the backend, before invariants are enforced.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCartLine {
    #[serde(alias = "product_id", alias = "itemId")]
    pub product_id: ProductId,
    #[serde(default)]
    pub quantity: i64,
}

/// `{cart: CartLine[]}` response envelope.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CartEnvelope {
    #[serde(default)]
    pub cart: Vec<WireCartLine>,
}

impl From<CartEnvelope> for Cart {
    fn from(envelope: CartEnvelope) -> Self {
        Self::from_raw(
            envelope
                .cart
                .into_iter()
                .map(|line| (line.product_id, line.quantity)),
        )
    }
}

/// `{productId}` body for add/remove.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ProductRef<'a> {
    pub product_id: &'a ProductId,
}

/// `DELETE /order/clearcart/:userId` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ClearCartResponse {
    #[serde(default)]
    pub success: bool,
}
