//! HTTP route handlers for the checkout service.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                         - Liveness
//! GET  /health/ready                   - Store reachable
//!
//! # Orders
//! POST /api/orders                     - Create order (resume link issued)
//! POST /api/orders/{id}/attempts       - Count a payment attempt
//! POST /api/orders/{id}/magic-link     - Rotate and resend the magic link
//! POST /api/orders/{id}/recovery       - Send the resume link
//!
//! # Gateway
//! POST /api/webhooks/payment           - Payment result callback
//!
//! # Buyer links (410 on any failure)
//! GET  /api/checkout/resume/{token}    - Cart snapshot for a resumable order
//! POST /api/magic-link/{token}         - Claim the order and provision the account
//!
//! # Operations
//! GET  /api/sync/health                - Sync log aggregate
//! ```

pub mod links;
pub mod orders;
pub mod sync;
pub mod webhooks;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the order routes router.
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(orders::create))
        .route("/{id}/attempts", post(orders::record_attempt))
        .route("/{id}/magic-link", post(orders::resend_magic_link))
        .route("/{id}/recovery", post(orders::send_recovery))
}

/// Create all routes for the checkout service.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .nest("/api/orders", order_routes())
        .route("/api/webhooks/payment", post(webhooks::payment))
        .route("/api/checkout/resume/{token}", get(links::resume))
        .route("/api/magic-link/{token}", post(links::claim))
        .route("/api/sync/health", get(sync::health))
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable if the store is not reachable.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match state.store().ping().await {
        Ok(()) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
