//! Sync outbox commands.

use std::sync::Arc;
use std::time::Duration;

use alliance_checkout::services::{
    EntitlementTarget, HttpEntitlementClient, LogTarget, SyncReconciler,
};

use super::{CliError, connect, print_json};

async fn reconciler() -> Result<SyncReconciler, CliError> {
    let (config, store) = connect().await?;
    let target: Arc<dyn EntitlementTarget> = match config.entitlement {
        Some(entitlement) => {
            let http = reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()?;
            Arc::new(HttpEntitlementClient::new(http, entitlement))
        }
        None => {
            tracing::warn!("ENTITLEMENT_API_URL not set, entries will stay pending");
            Arc::new(LogTarget)
        }
    };
    Ok(SyncReconciler::new(store, target, config.engine.sync))
}

/// Push every due pending entry once and print the sweep report.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn reconcile() -> Result<(), CliError> {
    let report = reconciler().await?.reconcile_pending().await?;
    print_json(&report)
}

/// Print counts by status, the oldest pending entry and recent escalations.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn health() -> Result<(), CliError> {
    let health = reconciler().await?.health_snapshot().await?;
    if health.error > 0 {
        tracing::warn!(errors = health.error, "Sync entries need operator attention");
    }
    print_json(&health)
}
