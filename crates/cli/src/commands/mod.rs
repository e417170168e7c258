//! `ma-cli` subcommands.

pub mod lookup;
pub mod migrate;
pub mod seed;
pub mod sweep;
pub mod sync;

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use alliance_checkout::config::{ConfigError, OperatorConfig};
use alliance_checkout::db::{self, CheckoutStore, PgStore};
use alliance_checkout::services::{CheckoutError, SeedError};

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("database connection error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("cannot encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Load operator configuration and connect to the checkout database.
async fn connect() -> Result<(OperatorConfig, Arc<dyn CheckoutStore>), CliError> {
    let config = OperatorConfig::from_env()?;

    tracing::info!("Connecting to checkout database...");
    let pool = db::create_pool(&config.database_url).await?;
    Ok((config, Arc::new(PgStore::new(pool))))
}

/// Print a value as pretty JSON on stdout.
fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let out = serde_json::to_string_pretty(value)?;
    #[allow(clippy::print_stdout)]
    {
        println!("{out}");
    }
    Ok(())
}
