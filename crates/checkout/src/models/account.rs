//! Account-side records created by provisioning.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use alliance_core::{
    Currency, DualPrice, Email, GuestContact, Locale, OrderId, PaymentId, PlanCode,
    ProfileState, ServiceId, SubscriptionId, SubscriptionStatus, UserId,
};

/// A buyer profile, seeded from the contact snapshot of their first order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub user_id: UserId,
    pub email: Email,
    pub full_name: String,
    pub phone: Option<String>,
    pub locale: Locale,
    pub preferred_currency: Currency,
    pub profile_state: ProfileState,
    /// Percentage of optional profile fields the buyer has filled in.
    pub completion_pct: i16,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// A draft profile built from a guest order's contact snapshot.
    #[must_use]
    pub fn draft(user_id: UserId, contact: &GuestContact, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            email: contact.email.clone(),
            full_name: contact.name.clone(),
            phone: contact.phone.clone(),
            locale: contact.locale,
            preferred_currency: contact.preferred_currency,
            profile_state: ProfileState::Draft,
            completion_pct: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A commerce-side subscription: one per purchased line, plus one for an
/// applied bundle upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub order_id: OrderId,
    pub service_id: ServiceId,
    pub service_name: String,
    pub category: Option<String>,
    /// Entitlement tier granted; `None` when the service has no mapping.
    pub plan_code: Option<PlanCode>,
    pub price: DualPrice,
    pub status: SubscriptionStatus,
    pub is_bundle: bool,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Mirror of the gateway charge, recorded at provisioning time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub user_id: UserId,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub currency: Currency,
    pub gateway: String,
    pub status: String,
    pub transaction_id: Option<String>,
    pub paid_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub const GATEWAY: &'static str = "stripe";
    pub const STATUS_COMPLETED: &'static str = "completed";
}

/// Everything support staff see for one buyer.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub profile: Profile,
    pub subscriptions: Vec<Subscription>,
    pub payments: Vec<PaymentRecord>,
}
