//! Guest order domain types.
//!
//! These types represent validated domain objects separate from database row types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use alliance_core::{Cart, Currency, DualPrice, GuestContact, LinkToken, OrderId, PaymentStatus, UserId};

/// A purchase recorded before the buyer has an account.
///
/// Link tokens are bearer secrets and are never serialized, not even for
/// operator lookups.
#[derive(Debug, Clone, Serialize)]
pub struct GuestOrder {
    pub id: OrderId,
    pub contact: GuestContact,
    pub cart: Cart,
    /// Sum of line prices, computed server-side at creation.
    pub totals: DualPrice,
    pub payment_status: PaymentStatus,
    pub payment_attempts: i32,
    pub last_payment_attempt_at: Option<DateTime<Utc>>,
    /// Gateway transaction id from the callback that settled the order.
    pub provider_ref: Option<String>,
    #[serde(skip)]
    pub resume_token: Option<LinkToken>,
    pub order_expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub magic_link_token: Option<LinkToken>,
    pub magic_link_sent_at: Option<DateTime<Utc>>,
    pub account_created: bool,
    pub user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GuestOrder {
    /// Whether a resume link for this order may still be honoured.
    #[must_use]
    pub fn is_resumable_at(&self, now: DateTime<Utc>) -> bool {
        self.payment_status == PaymentStatus::Pending && self.order_expires_at > now
    }

    /// The provisioning guard: paid and not yet claimed.
    #[must_use]
    pub fn awaits_provisioning(&self) -> bool {
        self.payment_status == PaymentStatus::Succeeded && !self.account_created
    }

    /// Amount charged, in the buyer's preferred currency.
    #[must_use]
    pub const fn amount_due(&self) -> Decimal {
        self.totals.amount_in(self.contact.preferred_currency)
    }

    /// Compact description used in notifications.
    #[must_use]
    pub fn summary(&self) -> OrderSummary {
        let currency = self.contact.preferred_currency;
        OrderSummary {
            order_id: self.id,
            item_names: self.cart.items().iter().map(|i| i.name.clone()).collect(),
            total: self.totals.amount_in(currency),
            currency,
            total_display: self.totals.display_in(currency),
        }
    }
}

/// Input for inserting a new order; everything else takes its initial value.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub contact: GuestContact,
    pub cart: Cart,
    pub totals: DualPrice,
    pub order_expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// What the buyer bought, for emails and resume pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub item_names: Vec<String>,
    pub total: Decimal,
    pub currency: Currency,
    /// Formatted total (e.g. "RM800.00").
    pub total_display: String,
}

/// Result of applying a gateway callback to an order.
#[derive(Debug, Clone)]
pub enum PaymentTransition {
    /// The order moved out of `pending` with this call.
    Applied(GuestOrder),
    /// The order already carried this outcome; nothing changed.
    AlreadyApplied(GuestOrder),
}

impl PaymentTransition {
    #[must_use]
    pub const fn order(&self) -> &GuestOrder {
        match self {
            Self::Applied(order) | Self::AlreadyApplied(order) => order,
        }
    }

    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}
