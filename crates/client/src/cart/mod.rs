//! Cart store and synchronization engine.
//!
//! # Architecture
//!
//! - [`CartStore`] holds the cart the UI reads. Server results replace it
//!   wholesale, ordered by [`Ticket`]s so a slow stale response cannot
//!   overwrite a newer one.
//! - [`CartSyncEngine`] performs mutations: directly on the store for
//!   guests, through the commerce API for signed-in users, re-deriving the
//!   user's identity from the server before every write.
//! - [`LineLocks`] serializes overlapping mutations of the same product.

mod engine;
mod locks;
mod store;

pub use engine::{CartSyncEngine, ClearOutcome, SyncReport};
pub use locks::{LineGuard, LineLocks};
pub use store::{CartStore, Ticket};

use pocketshop_core::{Cart, QuantityError, UserId};
use thiserror::Error;

use crate::api::ApiError;
use crate::storage::StorageError;

/// Errors that can occur during cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// The operation needs a signed-in user.
    #[error("not signed in")]
    NotAuthenticated,

    /// The server rejected the session token; the session has been dropped.
    #[error("session expired")]
    SessionExpired,

    /// The signed-in user changed while the request was in flight.
    #[error("identity changed: expected {expected}, now {current:?}")]
    IdentityMismatch {
        /// User the request was issued for.
        expected: UserId,
        /// User known when the result arrived.
        current: Option<UserId>,
    },

    /// The verification fetch disagreed with the write response.
    #[error(
        "cart verification mismatch: write returned {} items, server reports {}",
        .written.total_items(),
        .verified.total_items()
    )]
    VerificationMismatch {
        /// Cart returned by the write.
        written: Cart,
        /// Cart returned by the verification fetch.
        verified: Cart,
    },

    /// Requested quantity is not representable.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(#[from] QuantityError),

    /// Commerce API call failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Persisting the cart failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl CartError {
    /// Message for the dismissable alert shown after a failed mutation.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotAuthenticated | Self::SessionExpired => {
                "Your session has expired. Please log in again".to_string()
            }
            Self::IdentityMismatch { .. } => {
                "Your account changed. Please check your cart and try again".to_string()
            }
            Self::VerificationMismatch { .. } => {
                "Your cart was updated elsewhere. Please review it".to_string()
            }
            Self::InvalidQuantity(_) => "Please choose a valid quantity".to_string(),
            Self::Api(err) if err.is_transient() => {
                "Network error. Please check your connection and try again".to_string()
            }
            Self::Api(_) => "Could not update your cart. Please try again".to_string(),
            Self::Storage(_) => "Could not save your cart".to_string(),
        }
    }

    /// Whether this error points at a defect or outage rather than expected
    /// session churn.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        match self {
            Self::Api(err) => !err.is_unauthorized(),
            Self::Storage(_) => true,
            _ => false,
        }
    }
}
