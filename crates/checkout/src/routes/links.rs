//! Buyer link endpoints.
//!
//! Every failure here renders as `410 Gone` with one generic message, so a
//! prober cannot tell an unknown token from a used or expired one.

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use alliance_core::{CartItem, Currency, DualPrice, Locale, OrderId};

use crate::error::{AppError, Result};
use crate::services::Provisioned;
use crate::state::AppState;

/// Cart snapshot for a resumed checkout.
#[derive(Debug, Serialize)]
pub struct ResumedCheckout {
    pub order_id: OrderId,
    pub items: Vec<CartItem>,
    pub totals: DualPrice,
    pub currency: Currency,
    pub locale: Locale,
    pub name: String,
    pub order_expires_at: DateTime<Utc>,
}

/// GET /api/checkout/resume/{token}
///
/// # Errors
///
/// 410 if the token does not lead to a payable order.
pub async fn resume(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<ResumedCheckout>> {
    let order = state
        .checkout()
        .resume_tokens()
        .resolve(&token)
        .await
        .map_err(AppError::link)?;

    Ok(Json(ResumedCheckout {
        order_id: order.id,
        items: order.cart.items().to_vec(),
        totals: order.totals,
        currency: order.contact.preferred_currency,
        locale: order.contact.locale,
        name: order.contact.name,
        order_expires_at: order.order_expires_at,
    }))
}

/// POST /api/magic-link/{token}
///
/// # Errors
///
/// 410 if the link is unknown, unpaid, expired or already used; 503 if a
/// collaborator is down and the link can be retried.
pub async fn claim(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Provisioned>> {
    let provisioned = state
        .checkout()
        .provisioner()
        .validate_and_provision(&token)
        .await
        .map_err(AppError::link)?;
    Ok(Json(provisioned))
}
