//! Account roles reported by the commerce backend.

use serde::{Deserialize, Serialize};

/// Role of an authenticated account.
///
/// Unknown role strings from the backend are treated as [`Role::User`] so a
/// new server-side role never grants admin capabilities on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Store administrator.
    Admin,
    /// Regular shopper.
    #[default]
    #[serde(other)]
    User,
}

impl Role {
    /// Returns the wire representation of the role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
        }
    }

    /// Whether this role may open the admin panel.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }
}
