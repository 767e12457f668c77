//! Client configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `POCKETSHOP_API_BASE_URL` - Base URL of the commerce API (https; http allowed for loopback)
//!
//! ## Optional
//! - `POCKETSHOP_REQUEST_TIMEOUT_SECS` - Hard read timeout per request (default: 30)
//! - `POCKETSHOP_CONNECT_TIMEOUT_SECS` - Hard connect timeout (default: 10)
//! - `POCKETSHOP_STORAGE_PATH` - File backing the durable key-value store (default: pocketshop-state.json)
//! - `POCKETSHOP_VERIFY_POLICY` - Read-after-write policy: `write`, `verify` or `conflict` (default: verify)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STORAGE_PATH: &str = "pocketshop-state.json";

/// Hosts allowed to use plain http.
const LOOPBACK_HOSTS: &[&str] = &["localhost", "127.0.0.1", "[::1]", "::1"];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure API URL {0}: {1}")]
    InsecureUrl(String, String),
}

/// What to do when the read-after-write verification fetch disagrees with
/// the cart returned by the write itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifyPolicy {
    /// Keep the write response; the verification fetch is only logged.
    TrustWrite,
    /// Overwrite the cart with the verification fetch.
    #[default]
    TrustVerification,
    /// Keep the write response and report the disagreement to the caller.
    SurfaceConflict,
}

impl FromStr for VerifyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "write" => Ok(Self::TrustWrite),
            "verify" => Ok(Self::TrustVerification),
            "conflict" => Ok(Self::SurfaceConflict),
            other => Err(format!("expected write, verify or conflict (got '{other}')")),
        }
    }
}

/// Storefront client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the commerce API
    pub api_base_url: Url,
    /// Hard read timeout for each request
    pub request_timeout: Duration,
    /// Hard connect timeout
    pub connect_timeout: Duration,
    /// File backing the durable key-value store
    pub storage_path: PathBuf,
    /// Read-after-write verification policy for cart mutations
    pub verify_policy: VerifyPolicy,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

impl ClientConfig {
    /// Build a configuration with default settings for the given API.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the URL is invalid or not https on a
    /// non-loopback host.
    pub fn new(api_base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base_url: parse_base_url("POCKETSHOP_API_BASE_URL", api_base_url)?,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            verify_policy: VerifyPolicy::default(),
            sentry_dsn: None,
            sentry_environment: None,
        })
    }

    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let base_url = get_required_env("POCKETSHOP_API_BASE_URL")?;
        let mut config = Self::new(&base_url)?;

        config.request_timeout = get_duration_secs(
            "POCKETSHOP_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        config.connect_timeout = get_duration_secs(
            "POCKETSHOP_CONNECT_TIMEOUT_SECS",
            DEFAULT_CONNECT_TIMEOUT_SECS,
        )?;
        config.storage_path =
            PathBuf::from(get_env_or_default("POCKETSHOP_STORAGE_PATH", DEFAULT_STORAGE_PATH));
        config.verify_policy = get_env_or_default("POCKETSHOP_VERIFY_POLICY", "verify")
            .parse()
            .map_err(|e| ConfigError::InvalidEnvVar("POCKETSHOP_VERIFY_POLICY".to_string(), e))?;
        config.sentry_dsn = get_optional_env("SENTRY_DSN");
        config.sentry_environment = get_optional_env("SENTRY_ENVIRONMENT");

        Ok(config)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a positive number of seconds as a `Duration`.
fn get_duration_secs(key: &str, default: u64) -> Result<Duration, ConfigError> {
    let raw = get_env_or_default(key, &default.to_string());
    let secs = raw
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    if secs == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(Duration::from_secs(secs))
}

/// Parse the API base URL and require https outside of loopback hosts.
///
/// A trailing slash is added so relative endpoint paths join under the base
/// path instead of replacing its last segment.
fn parse_base_url(var_name: &str, raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim())
        .map_err(|e| ConfigError::InvalidEnvVar(var_name.to_string(), e.to_string()))?;

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match url.scheme() {
        "https" => {}
        "http" if LOOPBACK_HOSTS.contains(&host.as_str()) => {}
        scheme => {
            return Err(ConfigError::InsecureUrl(
                raw.to_string(),
                format!("scheme '{scheme}' is only allowed for loopback hosts"),
            ));
        }
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
