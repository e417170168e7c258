//! Batch sweeps for cron use.

use chrono::Utc;

use alliance_checkout::services::OrderLedger;

use super::{CliError, connect, print_json};

/// Abandon every pending order past its expiry and print the ids moved.
///
/// # Errors
///
/// Returns an error if the database is unreachable.
pub async fn abandoned() -> Result<(), CliError> {
    let (config, store) = connect().await?;
    let ledger = OrderLedger::new(store, config.engine.order_ttl);

    let moved = ledger.sweep_abandoned(Utc::now()).await?;
    tracing::info!(count = moved.len(), "Abandoned-order sweep complete");
    print_json(&moved)
}
