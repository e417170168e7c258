//! Guest order endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use url::Url;

use alliance_core::{CartItem, Currency, DualPrice, GuestContact, Locale, OrderId, PaymentStatus};

use crate::error::Result;
use crate::models::GuestOrder;
use crate::services::CheckoutError;
use crate::state::AppState;

/// Contact fields as submitted by the checkout form.
#[derive(Debug, Deserialize)]
pub struct ContactInput {
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub locale: Option<Locale>,
    #[serde(default)]
    pub preferred_currency: Option<Currency>,
}

/// Request body for `POST /api/orders`.
///
/// Client-side totals are not accepted; the ledger computes them.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<CartItem>,
    pub contact: ContactInput,
}

/// Order state as shown to the buyer.
#[derive(Debug, Serialize)]
pub struct OrderView {
    pub order_id: OrderId,
    pub payment_status: PaymentStatus,
    pub totals: DualPrice,
    pub currency: Currency,
    pub payment_attempts: i32,
    pub order_expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_link: Option<Url>,
}

impl From<&GuestOrder> for OrderView {
    fn from(order: &GuestOrder) -> Self {
        Self {
            order_id: order.id,
            payment_status: order.payment_status,
            totals: order.totals,
            currency: order.contact.preferred_currency,
            payment_attempts: order.payment_attempts,
            order_expires_at: order.order_expires_at,
            resume_link: None,
        }
    }
}

/// POST /api/orders
///
/// # Errors
///
/// 422 for an invalid cart or contact.
#[instrument(skip_all, fields(lines = req.items.len()))]
pub async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderView>)> {
    let contact = req.contact;
    let mut guest = GuestContact::new(&contact.email, &contact.name)
        .map_err(CheckoutError::from)?
        .with_phone(contact.phone.as_deref());
    if let Some(locale) = contact.locale {
        guest = guest.with_locale(locale);
    }
    if let Some(currency) = contact.preferred_currency {
        guest = guest.with_currency(currency);
    }

    let started = state.checkout().start(req.items, guest).await?;
    let view = OrderView {
        resume_link: Some(started.resume_link),
        ..OrderView::from(&started.order)
    };
    Ok((StatusCode::CREATED, Json(view)))
}

/// POST /api/orders/{id}/attempts
///
/// # Errors
///
/// 404 for an unknown order.
pub async fn record_attempt(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderView>> {
    let order = state.checkout().ledger().mark_payment_attempt(id).await?;
    Ok(Json(OrderView::from(&order)))
}

/// POST /api/orders/{id}/magic-link
///
/// Rotates the token, so any earlier link for the order stops working.
///
/// # Errors
///
/// 409 if the order is unpaid or already provisioned.
pub async fn resend_magic_link(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<StatusCode> {
    state.checkout().resend_magic_link(id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/orders/{id}/recovery
///
/// # Errors
///
/// 404 if the order is unknown, settled or expired.
pub async fn send_recovery(
    State(state): State<AppState>,
    Path(id): Path<OrderId>,
) -> Result<StatusCode> {
    state.checkout().send_recovery(id).await?;
    Ok(StatusCode::ACCEPTED)
}
