//! Payment gateway callbacks.

use axum::{Json, extract::State};
use serde::Serialize;
use tracing::instrument;

use alliance_core::{OrderId, PaymentStatus};

use crate::error::Result;
use crate::services::PaymentCallback;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CallbackAck {
    pub order_id: OrderId,
    pub payment_status: PaymentStatus,
    /// `false` when the callback repeated an outcome already recorded.
    pub applied: bool,
}

/// POST /api/webhooks/payment
///
/// Signature verification happens upstream of this service.
///
/// # Errors
///
/// 409 if the outcome contradicts the order's settled status.
#[instrument(skip_all, fields(order_id = %callback.order_ref))]
pub async fn payment(
    State(state): State<AppState>,
    Json(callback): Json<PaymentCallback>,
) -> Result<Json<CallbackAck>> {
    let transition = state.checkout().handle_payment_callback(&callback).await?;
    let order = transition.order();
    Ok(Json(CallbackAck {
        order_id: order.id,
        payment_status: order.payment_status,
        applied: transition.is_fresh(),
    }))
}
