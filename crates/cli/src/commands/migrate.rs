//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! ma-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `CHECKOUT_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! Migrations live in `crates/checkout/migrations/` and are embedded at build time.

use alliance_checkout::config::OperatorConfig;
use alliance_checkout::db;

use super::CliError;

/// Apply pending checkout migrations.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), CliError> {
    let config = OperatorConfig::from_env()?;

    tracing::info!("Connecting to checkout database...");
    let pool = db::create_pool(&config.database_url).await?;

    tracing::info!("Running checkout migrations...");
    db::migrate(&pool).await?;

    tracing::info!("Checkout migrations complete!");
    Ok(())
}
