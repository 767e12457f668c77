//! `reqwest` implementation of the commerce API.

use std::sync::Arc;

use async_trait::async_trait;
use pocketshop_core::{Cart, ProductId, UserId};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use super::types::{
    CartEnvelope, ClearCartResponse, LoginRequest, LoginResponse, MeResponse, ProductRef,
    ProfileUpdate, RegisterRequest, RegisterResponse, UserProfile,
};
use super::{ApiError, CommerceApi};
use crate::config::ClientConfig;

/// Longest body excerpt kept in errors and logs.
const BODY_EXCERPT_CHARS: usize = 200;

/// HTTPS client for the commerce backend.
///
/// Cheaply cloneable; clones share one connection pool.
#[derive(Clone)]
pub struct HttpCommerceApi {
    inner: Arc<HttpCommerceApiInner>,
}

struct HttpCommerceApiInner {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpCommerceApi {
    /// Create a new API client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpCommerceApiInner {
                client,
                base_url: config.api_base_url.clone(),
            }),
        })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Build a request for `segments`, percent-encoding each one.
    fn request(
        &self,
        method: Method,
        segments: &[&str],
        token: Option<&SecretString>,
    ) -> Result<RequestBuilder, ApiError> {
        let path = segments
            .iter()
            .map(|s| urlencoding::encode(s))
            .collect::<Vec<_>>()
            .join("/");
        let url = self.inner.base_url.join(&path)?;

        let mut builder = self.inner.client.request(method, url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        Ok(builder)
    }

    /// Send a request and decode a JSON body, mapping non-success statuses.
    async fn execute<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(ApiError::RateLimited(retry_after));
        }

        // Get response body as text first for better error diagnostics
        let response_text = response.text().await?;

        if !status.is_success() {
            if status.is_server_error() {
                tracing::error!(
                    status = %status,
                    body = %excerpt(&response_text),
                    "Commerce API returned non-success status"
                );
            } else {
                debug!(status = %status, "Commerce API rejected request");
            }
            return Err(status_error(status, &response_text));
        }

        let body = if response_text.trim().is_empty() {
            "null"
        } else {
            response_text.as_str()
        };
        serde_json::from_str(body).map_err(|e| {
            tracing::error!(
                error = %e,
                body = %excerpt(&response_text),
                "Failed to parse commerce API response"
            );
            ApiError::Parse(e)
        })
    }
}

#[async_trait]
impl CommerceApi for HttpCommerceApi {
    #[instrument(skip(self, password))]
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let builder = self
            .request(Method::POST, &["auth", "login"], None)?
            .json(&LoginRequest { email, password });
        self.execute(builder).await
    }

    #[instrument(skip(self, request), fields(email = %request.email))]
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        let builder = self
            .request(Method::POST, &["auth", "register"], None)?
            .json(request);
        let response: Option<RegisterResponse> = self.execute(builder).await?;
        Ok(response.unwrap_or_default())
    }

    #[instrument(skip_all)]
    async fn current_user(&self, token: &SecretString) -> Result<UserProfile, ApiError> {
        let builder = self.request(Method::GET, &["auth", "me"], Some(token))?;
        let response: MeResponse = self.execute(builder).await?;
        Ok(response.into())
    }

    #[instrument(skip_all)]
    async fn logout(&self, token: &SecretString) -> Result<(), ApiError> {
        let builder = self.request(Method::GET, &["auth", "logout"], Some(token))?;
        let _: serde_json::Value = self.execute(builder).await?;
        Ok(())
    }

    #[instrument(skip(self, token))]
    async fn update_profile(
        &self,
        token: &SecretString,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, ApiError> {
        let builder = self
            .request(Method::PUT, &["auth", "profile"], Some(token))?
            .json(update);
        let response: MeResponse = self.execute(builder).await?;
        Ok(response.into())
    }

    #[instrument(skip(self, token), fields(user_id = %user_id))]
    async fn get_cart(&self, token: &SecretString, user_id: &UserId) -> Result<Cart, ApiError> {
        let builder = self.request(Method::GET, &["auth", "cart", user_id.as_str()], Some(token))?;
        let envelope: CartEnvelope = self.execute(builder).await?;
        Ok(envelope.into())
    }

    #[instrument(skip(self, token), fields(user_id = %user_id, product_id = %product_id))]
    async fn add_to_cart(
        &self,
        token: &SecretString,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Cart, ApiError> {
        let builder = self
            .request(
                Method::POST,
                &["auth", "addtocart", user_id.as_str()],
                Some(token),
            )?
            .json(&ProductRef { product_id });
        let envelope: CartEnvelope = self.execute(builder).await?;
        Ok(envelope.into())
    }

    #[instrument(skip(self, token), fields(user_id = %user_id, product_id = %product_id))]
    async fn remove_from_cart(
        &self,
        token: &SecretString,
        user_id: &UserId,
        product_id: &ProductId,
    ) -> Result<Cart, ApiError> {
        let builder = self
            .request(
                Method::POST,
                &["auth", "removefromcart", user_id.as_str()],
                Some(token),
            )?
            .json(&ProductRef { product_id });
        let envelope: CartEnvelope = self.execute(builder).await?;
        Ok(envelope.into())
    }

    #[instrument(skip(self, token), fields(user_id = %user_id))]
    async fn clear_cart(&self, token: &SecretString, user_id: &UserId) -> Result<bool, ApiError> {
        let builder = self.request(
            Method::DELETE,
            &["order", "clearcart", user_id.as_str()],
            Some(token),
        )?;
        let response: Option<ClearCartResponse> = self.execute(builder).await?;
        Ok(response.is_some_and(|r| r.success))
    }
}

/// Map a non-success status and body to an `ApiError`.
fn status_error(status: StatusCode, body: &str) -> ApiError {
    let message = server_message(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized(message),
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        StatusCode::CONFLICT => ApiError::Conflict(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ApiError::BadRequest(message)
        }
        _ => ApiError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

/// Pull a human-readable message out of an error body.
///
/// Prefers a JSON `message` or `error` field, falling back to the raw body.
fn server_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            ["message", "error", "errors"]
                .iter()
                .find_map(|key| value.get(*key).and_then(serde_json::Value::as_str))
                .map(str::to_owned)
        })
        .unwrap_or_else(|| excerpt(body))
}

fn excerpt(body: &str) -> String {
    body.trim().chars().take(BODY_EXCERPT_CHARS).collect()
}
