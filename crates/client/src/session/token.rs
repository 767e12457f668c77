//! Unverified token payload decoding.
//!
//! Used only to show a minimal identity when the profile endpoint is
//! unreachable. Nothing decoded here is ever used to authorize a server write:
//! the signature is not checked and the claims may be stale.

use base64::Engine as _;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use pocketshop_core::{Role, UserId};
use serde::Deserialize;

/// Identity claims read from a token payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// User the token was issued to.
    pub user_id: UserId,
    /// Role claim, `user` when absent.
    pub role: Role,
    /// Expiry, when the token carries one.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenClaims {
    /// Whether the token's own expiry has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    id: Option<String>,
    #[serde(default, rename = "userId")]
    user_id: Option<String>,
    #[serde(default, rename = "_id")]
    object_id: Option<String>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    exp: Option<i64>,
}

/// Decode the identity claims of a JWT-shaped token without verifying it.
///
/// Returns `None` when the token has no decodable JSON payload or the
/// payload names no user.
#[must_use]
pub fn decode_claims(token: &str) -> Option<TokenClaims> {
    let payload = token.split('.').nth(1)?.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| STANDARD_NO_PAD.decode(payload))
        .ok()?;
    let raw: RawClaims = serde_json::from_slice(&bytes).ok()?;

    let user_id = [raw.id, raw.user_id, raw.object_id, raw.sub]
        .into_iter()
        .flatten()
        .find(|id| !id.trim().is_empty())?;

    Some(TokenClaims {
        user_id: UserId::new(user_id),
        role: raw.role.unwrap_or_default(),
        expires_at: raw.exp.and_then(|secs| DateTime::from_timestamp(secs, 0)),
    })
}
