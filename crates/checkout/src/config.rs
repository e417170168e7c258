//! Checkout engine configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `CHECKOUT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `CHECKOUT_BASE_URL` - Public site URL used to build resume and magic links
//! - `IDENTITY_API_URL` - Identity provider admin API base URL
//! - `IDENTITY_SERVICE_KEY` - Identity provider service key (high entropy)
//!
//! ## Optional
//! - `CHECKOUT_HOST` - Bind address (default: 127.0.0.1)
//! - `CHECKOUT_PORT` - Listen port (default: 3100)
//! - `ORDER_TTL_HOURS` - Pending order lifetime (default: 24)
//! - `MAGIC_LINK_TTL_HOURS` - Magic link lifetime (default: 168)
//! - `SYNC_BACKOFF_BASE_SECS` / `SYNC_BACKOFF_MAX_SECS` - Retry backoff (default: 60 / 3600)
//! - `SYNC_RETRY_CEILING` - Failed pushes before escalation (default: 5)
//! - `SYNC_BATCH_SIZE` - Entries per reconcile sweep (default: 100)
//! - `SWEEP_INTERVAL_SECS` - Background sweep cadence (default: 300)
//! - `PLAN_CACHE_TTL_SECS` - Plan mapping cache lifetime (default: 300)
//! - `ENTITLEMENT_API_URL` + `ENTITLEMENT_API_KEY` - Entitlement system; unset keeps sync entries pending
//! - `NOTIFY_WEBHOOK_URL` - Notification dispatcher; unset logs notifications instead
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use crate::models::SyncPolicy;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Checkout server configuration.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public site URL; links are built under it
    pub base_url: Url,
    pub engine: EngineSettings,
    pub identity: IdentityConfig,
    /// Entitlement system; `None` keeps sync entries pending
    pub entitlement: Option<EntitlementConfig>,
    /// Notification dispatcher webhook; `None` logs instead
    pub notify_webhook_url: Option<Url>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    pub sentry_environment: Option<String>,
}

/// Timing and batching knobs for the engine's services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub order_ttl: TimeDelta,
    pub magic_link_ttl: TimeDelta,
    pub sync: SyncPolicy,
    pub sweep_interval: Duration,
    pub plan_cache_ttl: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            order_ttl: TimeDelta::hours(24),
            magic_link_ttl: TimeDelta::hours(168),
            sync: SyncPolicy::default(),
            sweep_interval: Duration::from_secs(300),
            plan_cache_ttl: Duration::from_secs(300),
        }
    }
}

/// Identity provider configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct IdentityConfig {
    /// Admin API base URL (with trailing slash)
    pub api_url: Url,
    pub service_key: SecretString,
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("api_url", &self.api_url.as_str())
            .field("service_key", &"[REDACTED]")
            .finish()
    }
}

/// Entitlement (master subscription) system configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct EntitlementConfig {
    pub api_url: Url,
    pub api_key: SecretString,
}

impl std::fmt::Debug for EntitlementConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntitlementConfig")
            .field("api_url", &self.api_url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl CheckoutConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("CHECKOUT_DATABASE_URL")?;
        let host = parse_env_or_default("CHECKOUT_HOST", "127.0.0.1")?;
        let port = parse_env_or_default("CHECKOUT_PORT", "3100")?;
        let base_url = get_required_url("CHECKOUT_BASE_URL")?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            engine: EngineSettings::from_env()?,
            identity: IdentityConfig::from_env()?,
            entitlement: EntitlementConfig::from_env()?,
            notify_webhook_url: get_optional_url("NOTIFY_WEBHOOK_URL")?,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Settings for batch tooling that runs without the HTTP server.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub database_url: SecretString,
    pub engine: EngineSettings,
    pub entitlement: Option<EntitlementConfig>,
}

impl OperatorConfig {
    /// Load the subset of [`CheckoutConfig`] the operator CLI needs.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the database URL is missing or a set
    /// variable is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_database_url("CHECKOUT_DATABASE_URL")?,
            engine: EngineSettings::from_env()?,
            entitlement: EntitlementConfig::from_env()?,
        })
    }
}

impl EngineSettings {
    /// Load engine settings, falling back to defaults per variable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if a variable is set but malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backoff_base: u64 = parse_env_or_default("SYNC_BACKOFF_BASE_SECS", "60")?;
        let backoff_max: u64 = parse_env_or_default("SYNC_BACKOFF_MAX_SECS", "3600")?;
        if backoff_max < backoff_base {
            return Err(ConfigError::InvalidEnvVar(
                "SYNC_BACKOFF_MAX_SECS".to_string(),
                "must not be smaller than SYNC_BACKOFF_BASE_SECS".to_string(),
            ));
        }

        Ok(Self {
            order_ttl: hours("ORDER_TTL_HOURS", "24")?,
            magic_link_ttl: hours("MAGIC_LINK_TTL_HOURS", "168")?,
            sync: SyncPolicy {
                backoff_base: Duration::from_secs(backoff_base),
                backoff_max: Duration::from_secs(backoff_max),
                retry_ceiling: positive("SYNC_RETRY_CEILING", "5")?,
                batch_size: positive("SYNC_BATCH_SIZE", "100")?,
            },
            sweep_interval: Duration::from_secs(positive("SWEEP_INTERVAL_SECS", "300")?.into()),
            plan_cache_ttl: Duration::from_secs(parse_env_or_default("PLAN_CACHE_TTL_SECS", "300")?),
        })
    }
}

impl IdentityConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            api_url: directory_url(get_required_url("IDENTITY_API_URL")?),
            service_key: get_validated_secret("IDENTITY_SERVICE_KEY")?,
        })
    }
}

impl EntitlementConfig {
    /// Both variables or neither.
    fn from_env() -> Result<Option<Self>, ConfigError> {
        match (get_optional_url("ENTITLEMENT_API_URL")?, get_optional_env("ENTITLEMENT_API_KEY")) {
            (Some(api_url), Some(_)) => Ok(Some(Self {
                api_url: directory_url(api_url),
                api_key: get_validated_secret("ENTITLEMENT_API_KEY")?,
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(ConfigError::MissingEnvVar("ENTITLEMENT_API_KEY".to_string())),
            (None, Some(_)) => Err(ConfigError::MissingEnvVar("ENTITLEMENT_API_URL".to_string())),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, or the default when unset.
fn parse_env_or_default<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn positive(key: &str, default: &str) -> Result<u32, ConfigError> {
    let value: u32 = parse_env_or_default(key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

fn hours(key: &str, default: &str) -> Result<TimeDelta, ConfigError> {
    Ok(TimeDelta::hours(i64::from(positive(key, default)?)))
}

fn parse_url(key: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

fn get_required_url(key: &str) -> Result<Url, ConfigError> {
    parse_url(key, &get_required_env(key)?)
}

fn get_optional_url(key: &str) -> Result<Option<Url>, ConfigError> {
    get_optional_env(key)
        .map(|value| parse_url(key, &value))
        .transpose()
}

/// Ensure a trailing slash so `Url::join` appends instead of replacing the last segment.
fn directory_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}
