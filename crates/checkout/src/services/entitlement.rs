//! Entitlement (master subscription) system client.

use async_trait::async_trait;
use reqwest::header::HeaderValue;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::EntitlementConfig;
use crate::models::SyncEntry;

/// Errors from pushing an entry to the entitlement system.
#[derive(Debug, Error)]
pub enum TargetError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Target answered with an error status.
    #[error("entitlement system rejected entry: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Target answered with something we could not read.
    #[error("invalid entitlement response: {0}")]
    InvalidResponse(String),

    /// No target configured; entries stay pending until one is.
    #[error("entitlement system not configured")]
    Unconfigured,
}

/// Receives sync entries and returns the id it filed them under.
#[async_trait]
pub trait EntitlementTarget: Send + Sync {
    /// Push one entry. Implementations must treat `source_ref` as an
    /// idempotency key: pushing the same stream twice yields the same ref.
    async fn push(&self, entry: &SyncEntry) -> Result<String, TargetError>;
}

#[derive(Serialize)]
struct PushBody<'a> {
    event_type: &'a str,
    source_ref: &'a str,
    payload: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct PushResponse {
    id: String,
}

/// HTTP client for the entitlement system's sync endpoint.
#[derive(Clone)]
pub struct HttpEntitlementClient {
    client: reqwest::Client,
    config: EntitlementConfig,
}

impl std::fmt::Debug for HttpEntitlementClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEntitlementClient")
            .field("api_url", &self.config.api_url.as_str())
            .field("api_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpEntitlementClient {
    #[must_use]
    pub const fn new(client: reqwest::Client, config: EntitlementConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl EntitlementTarget for HttpEntitlementClient {
    #[instrument(skip(self, entry), fields(entry_id = ?entry.id, event_type = %entry.event_type))]
    async fn push(&self, entry: &SyncEntry) -> Result<String, TargetError> {
        let url = self
            .config
            .api_url
            .join("sync/events")
            .map_err(|e| TargetError::InvalidResponse(format!("bad entitlement url: {e}")))?;
        let idempotency_key = HeaderValue::from_str(&entry.source_ref)
            .map_err(|e| TargetError::InvalidResponse(format!("bad source ref: {e}")))?;

        let response = self
            .client
            .post(url)
            .bearer_auth(self.config.api_key.expose_secret())
            .header("Idempotency-Key", idempotency_key)
            .json(&PushBody {
                event_type: &entry.event_type,
                source_ref: &entry.source_ref,
                payload: &entry.payload,
            })
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TargetError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body: PushResponse = response
            .json()
            .await
            .map_err(|e| TargetError::InvalidResponse(e.to_string()))?;
        debug!(target_ref = %body.id, "Entry accepted by entitlement system");
        Ok(body.id)
    }
}

/// Stand-in used when no entitlement system is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTarget;

#[async_trait]
impl EntitlementTarget for LogTarget {
    async fn push(&self, entry: &SyncEntry) -> Result<String, TargetError> {
        debug!(entry_id = ?entry.id, "Entitlement system not configured, deferring entry");
        Err(TargetError::Unconfigured)
    }
}
