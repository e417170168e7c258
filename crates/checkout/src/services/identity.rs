//! Identity provider client.
//!
//! The engine never authenticates anyone itself; it only asks the identity
//! provider for the user id that belongs to an e-mail, creating the user on
//! first contact. The HTTP client speaks the provider's admin user API:
//! `GET {base}/admin/users?email=` to look up and `POST {base}/admin/users`
//! to create.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use alliance_core::{Email, OrderId, UserId};

use crate::config::IdentityConfig;

/// Errors from the identity provider.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with an error status.
    #[error("identity provider rejected request: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Provider answered with something we could not read.
    #[error("invalid identity provider response: {0}")]
    InvalidResponse(String),

    /// Provider switched off (in-memory provider only).
    #[error("identity provider unavailable")]
    Unavailable,
}

impl IdentityError {
    /// Whether the same request may succeed later.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Unavailable => true,
            Self::Rejected { status, .. } => *status >= 500 || *status == 429,
            Self::InvalidResponse(_) => false,
        }
    }
}

/// Attributes attached to a newly created identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityMetadata {
    pub full_name: String,
    /// How the identity came to exist, e.g. `magic_link`.
    pub source: String,
    pub order_id: OrderId,
}

impl IdentityMetadata {
    pub const SOURCE_MAGIC_LINK: &'static str = "magic_link";
}

/// Looks up or creates the identity owning an e-mail.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Idempotent on `email`: an existing identity is returned as is.
    async fn create_or_fetch_identity(
        &self,
        email: &Email,
        metadata: &IdentityMetadata,
    ) -> Result<UserId, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct UserBody {
    id: UserId,
}

#[derive(Debug, Deserialize)]
struct UserList {
    users: Vec<UserBody>,
}

#[derive(Serialize)]
struct CreateUser<'a> {
    email: &'a str,
    email_confirm: bool,
    user_metadata: &'a IdentityMetadata,
}

/// HTTP client for the identity provider's admin API.
#[derive(Clone)]
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    config: IdentityConfig,
}

impl std::fmt::Debug for HttpIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpIdentityProvider")
            .field("api_url", &self.config.api_url.as_str())
            .field("service_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl HttpIdentityProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, config: IdentityConfig) -> Self {
        Self { client, config }
    }

    fn users_url(&self) -> Result<Url, IdentityError> {
        self.config
            .api_url
            .join("admin/users")
            .map_err(|e| IdentityError::InvalidResponse(format!("bad identity url: {e}")))
    }

    async fn fetch(&self, email: &Email) -> Result<Option<UserId>, IdentityError> {
        let mut url = self.users_url()?;
        url.query_pairs_mut().append_pair("email", email.as_str());

        let response = self
            .client
            .get(url)
            .bearer_auth(self.config.service_key.expose_secret())
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(IdentityError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let list: UserList = response
            .json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;
        Ok(list.users.into_iter().next().map(|u| u.id))
    }

    async fn create(
        &self,
        email: &Email,
        metadata: &IdentityMetadata,
    ) -> Result<Option<UserId>, IdentityError> {
        let response = self
            .client
            .post(self.users_url()?)
            .bearer_auth(self.config.service_key.expose_secret())
            .json(&CreateUser {
                email: email.as_str(),
                email_confirm: true,
                user_metadata: metadata,
            })
            .send()
            .await?;
        let status = response.status();

        // Lost a race with a concurrent sign-up.
        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(IdentityError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let user: UserBody = response
            .json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))?;
        Ok(Some(user.id))
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip(self, email, metadata), fields(order_id = %metadata.order_id))]
    async fn create_or_fetch_identity(
        &self,
        email: &Email,
        metadata: &IdentityMetadata,
    ) -> Result<UserId, IdentityError> {
        if let Some(id) = self.fetch(email).await? {
            debug!(user_id = %id, "Identity already exists");
            return Ok(id);
        }
        if let Some(id) = self.create(email, metadata).await? {
            debug!(user_id = %id, "Identity created");
            return Ok(id);
        }
        self.fetch(email).await?.ok_or_else(|| {
            IdentityError::InvalidResponse("user reported as existing but not found".into())
        })
    }
}

/// In-process identity provider for tests and local demos.
#[derive(Debug, Default)]
pub struct MemoryIdentityProvider {
    users: Mutex<HashMap<Email, UserId>>,
    created: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryIdentityProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity that existed before checkout (separate sign-up).
    pub fn insert(&self, email: Email, user_id: UserId) {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(email, user_id);
    }

    /// Make every call fail with [`IdentityError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Identities created through this provider.
    #[must_use]
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn lookup(&self, email: &Email) -> Option<UserId> {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(email)
            .copied()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn create_or_fetch_identity(
        &self,
        email: &Email,
        _metadata: &IdentityMetadata,
    ) -> Result<UserId, IdentityError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(IdentityError::Unavailable);
        }
        let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *users.entry(email.clone()).or_insert_with(|| {
            self.created.fetch_add(1, Ordering::SeqCst);
            UserId::generate()
        });
        Ok(id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn metadata() -> IdentityMetadata {
        IdentityMetadata {
            full_name: "Mei Ling".into(),
            source: IdentityMetadata::SOURCE_MAGIC_LINK.into(),
            order_id: OrderId::generate(),
        }
    }

    #[tokio::test]
    async fn test_memory_provider_is_idempotent_on_email() {
        let provider = MemoryIdentityProvider::new();
        let email = Email::parse("mei@example.com").unwrap();

        let first = provider.create_or_fetch_identity(&email, &metadata()).await.unwrap();
        let second = provider.create_or_fetch_identity(&email, &metadata()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.created_count(), 1);
    }

    #[tokio::test]
    async fn test_memory_provider_reuses_existing_signup() {
        let provider = MemoryIdentityProvider::new();
        let email = Email::parse("mei@example.com").unwrap();
        let existing = UserId::generate();
        provider.insert(email.clone(), existing);

        let id = provider.create_or_fetch_identity(&email, &metadata()).await.unwrap();
        assert_eq!(id, existing);
        assert_eq!(provider.created_count(), 0);
    }

    #[tokio::test]
    async fn test_failing_provider_is_retryable() {
        let provider = MemoryIdentityProvider::new();
        provider.set_failing(true);
        let email = Email::parse("mei@example.com").unwrap();

        let err = provider
            .create_or_fetch_identity(&email, &metadata())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        let err = IdentityError::Rejected {
            status: 400,
            message: "bad".into(),
        };
        assert!(!err.is_retryable());
    }
}
