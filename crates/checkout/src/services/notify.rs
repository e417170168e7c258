//! Notification dispatch.
//!
//! The engine hands a [`Notification`] to a dispatcher and forgets about it;
//! templating and delivery happen elsewhere.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

use alliance_core::{Email, LinkToken, Locale};

use crate::models::OrderSummary;

/// Errors from a notification dispatcher.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Dispatcher answered with an error status.
    #[error("dispatcher rejected notification: {status} - {message}")]
    Rejected { status: u16, message: String },
}

/// Which link a notification carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Abandoned-cart recovery.
    Resume,
    /// Account claim after a successful payment.
    MagicLink,
}

/// A message for the buyer.
#[derive(Clone, Serialize)]
pub struct Notification {
    pub to: Email,
    pub kind: NotificationKind,
    pub token: LinkToken,
    pub link: Url,
    pub order_summary: OrderSummary,
    pub locale: Locale,
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notification")
            .field("kind", &self.kind)
            .field("order_id", &self.order_summary.order_id)
            .field("locale", &self.locale)
            .field("link", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// Hands notifications to whatever delivers them.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Logs notifications instead of sending them. Used when no dispatcher is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            kind = ?notification.kind,
            order_id = %notification.order_summary.order_id,
            "Notification dispatcher not configured, dropping notification"
        );
        Ok(())
    }
}

/// Posts notifications as JSON to a dispatcher webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Url,
}

impl WebhookNotifier {
    #[must_use]
    pub const fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, notification), fields(kind = ?notification.kind, order_id = %notification.order_summary.order_id))]
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(notification)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

/// Keeps every dispatched notification in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Most recent notification of `kind` sent to `email`.
    #[must_use]
    pub fn last_for(&self, email: &Email, kind: NotificationKind) -> Option<Notification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|n| &n.to == email && n.kind == kind)
            .cloned()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification.clone());
        Ok(())
    }
}
