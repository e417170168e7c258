use axum::{Json, extract::State};

use crate::error::Result;
use crate::models::SyncHealth;
use crate::state::AppState;

/// GET /api/sync/health
///
/// # Errors
///
/// 503 if the store is unreachable.
pub async fn health(State(state): State<AppState>) -> Result<Json<SyncHealth>> {
    Ok(Json(state.sync().health_snapshot().await?))
}
