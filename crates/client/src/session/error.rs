//! Authentication error types.

use thiserror::Error;

use crate::api::ApiError;
use crate::storage::StorageError;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// A required field was left empty.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Invalid email format.
    #[error("invalid email: {0}")]
    InvalidEmail(#[from] pocketshop_core::EmailError),

    /// Wrong email or password.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// No account with this email.
    #[error("user not found")]
    UserNotFound,

    /// An account with this email already exists.
    #[error("user already exists")]
    UserAlreadyExists,

    /// The server rejected the submitted fields.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The server could not be reached.
    #[error("network error: {0}")]
    Network(#[source] ApiError),

    /// The operation needs a session and there is none.
    #[error("not signed in")]
    NotAuthenticated,

    /// The server rejected the session token.
    #[error("session expired")]
    SessionExpired,

    /// Any other server failure, with the best available message.
    #[error("server error: {0}")]
    Server(String),

    /// Persisting session state failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Message suitable for showing inline next to the form.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::MissingField(field) => format!("Please enter your {field}"),
            Self::InvalidEmail(_) => "Please enter a valid email address".to_string(),
            Self::InvalidCredentials => "Invalid email or password".to_string(),
            Self::UserNotFound => "No account found with this email".to_string(),
            Self::UserAlreadyExists => "An account with this email already exists".to_string(),
            Self::Validation(msg) | Self::Server(msg) => msg.clone(),
            Self::Network(_) => {
                "Network error. Please check your connection and try again".to_string()
            }
            Self::NotAuthenticated | Self::SessionExpired => {
                "Your session has expired. Please log in again".to_string()
            }
            Self::Storage(_) => "Something went wrong. Please try again".to_string(),
        }
    }

    /// Whether retrying the same input may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Map a failed login call.
    pub(crate) fn from_login(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(_) | ApiError::BadRequest(_) => Self::InvalidCredentials,
            ApiError::NotFound(_) => Self::UserNotFound,
            other => Self::from_api(other, "Login failed. Please try again"),
        }
    }

    /// Map a failed registration call.
    pub(crate) fn from_register(err: ApiError) -> Self {
        match err {
            ApiError::Conflict(_) => Self::UserAlreadyExists,
            ApiError::BadRequest(msg) if mentions_existing_account(&msg) => {
                Self::UserAlreadyExists
            }
            ApiError::BadRequest(msg) if !msg.is_empty() => Self::Validation(msg),
            ApiError::BadRequest(_) => {
                Self::Validation("Please check your details and try again".to_string())
            }
            other => Self::from_api(other, "Registration failed. Please try again"),
        }
    }

    /// Map a failed call made with the session token.
    pub(crate) fn from_authenticated(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized(_) => Self::SessionExpired,
            ApiError::BadRequest(msg) if !msg.is_empty() => Self::Validation(msg),
            other => Self::from_api(other, "Request failed. Please try again"),
        }
    }

    fn from_api(err: ApiError, fallback: &str) -> Self {
        match err {
            ApiError::Network(_) | ApiError::Http(_) => Self::Network(err),
            ApiError::RateLimited(secs) => Self::Server(format!(
                "Too many attempts. Please try again in {secs} seconds"
            )),
            other => Self::Server(
                other
                    .server_message()
                    .map_or_else(|| fallback.to_string(), str::to_owned),
            ),
        }
    }
}

/// Some backends report duplicate accounts as a plain 400.
pub(crate) fn mentions_existing_account(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already exists") || message.contains("already registered")
}
