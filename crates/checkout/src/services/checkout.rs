//! Checkout orchestration: ties the ledger and link services to buyer
//! notifications.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use url::Url;

use alliance_core::{CartItem, GuestContact, LinkToken, OrderId, PaymentOutcome};

use super::CheckoutError;
use super::magic_link::MagicLinkProvisioner;
use super::notify::{Notification, NotificationKind, Notifier};
use super::orders::OrderLedger;
use super::resume::ResumeTokenService;
use crate::config::ConfigError;
use crate::models::{GuestOrder, PaymentTransition};

/// Builds the public URLs that carry link tokens.
#[derive(Debug, Clone)]
pub struct LinkBuilder {
    base: Url,
}

impl LinkBuilder {
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` if `base` cannot carry a path.
    pub fn new(base: Url) -> Result<Self, ConfigError> {
        if base.cannot_be_a_base() {
            return Err(ConfigError::InvalidEnvVar(
                "CHECKOUT_BASE_URL".to_string(),
                "URL cannot carry a path".to_string(),
            ));
        }
        Ok(Self { base })
    }

    /// `{base}/checkout/resume/{token}`
    #[must_use]
    pub fn resume(&self, token: &LinkToken) -> Url {
        self.link(&["checkout", "resume", token.as_str()])
    }

    /// `{base}/auth/magic/{token}`
    #[must_use]
    pub fn magic(&self, token: &LinkToken) -> Url {
        self.link(&["auth", "magic", token.as_str()])
    }

    fn link(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}

/// Gateway callback payload.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentCallback {
    pub order_ref: OrderId,
    pub status: PaymentOutcome,
    pub provider_transaction_id: Option<String>,
}

/// A freshly created order with its recovery link.
#[derive(Debug, Clone, Serialize)]
pub struct StartedCheckout {
    pub order: GuestOrder,
    pub resume_link: Url,
}

#[derive(Clone)]
pub struct CheckoutService {
    ledger: OrderLedger,
    resume: ResumeTokenService,
    provisioner: MagicLinkProvisioner,
    notifier: Arc<dyn Notifier>,
    links: LinkBuilder,
}

impl CheckoutService {
    #[must_use]
    pub fn new(
        ledger: OrderLedger,
        resume: ResumeTokenService,
        provisioner: MagicLinkProvisioner,
        notifier: Arc<dyn Notifier>,
        links: LinkBuilder,
    ) -> Self {
        Self {
            ledger,
            resume,
            provisioner,
            notifier,
            links,
        }
    }

    #[must_use]
    pub const fn ledger(&self) -> &OrderLedger {
        &self.ledger
    }

    #[must_use]
    pub const fn resume_tokens(&self) -> &ResumeTokenService {
        &self.resume
    }

    #[must_use]
    pub const fn provisioner(&self) -> &MagicLinkProvisioner {
        &self.provisioner
    }

    /// Create an order and its resume token.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Validation` for an invalid cart.
    pub async fn start(
        &self,
        items: Vec<CartItem>,
        contact: GuestContact,
    ) -> Result<StartedCheckout, CheckoutError> {
        let order = self.ledger.create_order(items, contact).await?;
        let (order, token) = self.resume.issue(order.id).await?;
        Ok(StartedCheckout {
            resume_link: self.links.resume(&token),
            order,
        })
    }

    /// Apply a gateway callback. A fresh success also sends the magic link;
    /// a failed send is logged and left for [`Self::resend_magic_link`].
    ///
    /// # Errors
    ///
    /// Same as [`OrderLedger::apply_payment_result`].
    #[instrument(skip(self, callback), fields(order_id = %callback.order_ref))]
    pub async fn handle_payment_callback(
        &self,
        callback: &PaymentCallback,
    ) -> Result<PaymentTransition, CheckoutError> {
        let transition = self
            .ledger
            .apply_payment_result(
                callback.order_ref,
                callback.status,
                callback.provider_transaction_id.as_deref(),
            )
            .await?;

        if transition.is_fresh()
            && callback.status == PaymentOutcome::Succeeded
            && let Err(e) = self.resend_magic_link(callback.order_ref).await
        {
            warn!(error = %e, "Magic link not sent after payment");
        }
        Ok(transition)
    }

    /// Issue (or reuse) the resume token and send it to the buyer.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::NotFoundOrExpired` if the order can no longer
    /// be paid, `CheckoutError::Notify` if the dispatcher refused.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn send_recovery(&self, order_id: OrderId) -> Result<(), CheckoutError> {
        let (order, token) = self.resume.issue(order_id).await?;
        let link = self.links.resume(&token);
        self.dispatch(&order, NotificationKind::Resume, token, link)
            .await
    }

    /// Rotate the magic-link token and send the new link.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::StateConflict` if the order is unpaid or
    /// already provisioned, `CheckoutError::Notify` if the dispatcher refused.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn resend_magic_link(&self, order_id: OrderId) -> Result<(), CheckoutError> {
        let (order, token) = self.provisioner.issue(order_id).await?;
        let link = self.links.magic(&token);
        self.dispatch(&order, NotificationKind::MagicLink, token, link)
            .await
    }

    async fn dispatch(
        &self,
        order: &GuestOrder,
        kind: NotificationKind,
        token: LinkToken,
        link: Url,
    ) -> Result<(), CheckoutError> {
        let notification = Notification {
            to: order.contact.email.clone(),
            kind,
            token,
            link,
            order_summary: order.summary(),
            locale: order.contact.locale,
        };
        self.notifier.dispatch(&notification).await?;
        info!(kind = ?kind, "Notification dispatched");
        Ok(())
    }
}
