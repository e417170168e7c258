//! Persistence for the checkout engine.
//!
//! # Schema: `checkout`
//!
//! ## Tables
//!
//! - `guest_order` - Orders, payment state, resume and magic-link tokens
//! - `profile` - Buyer profiles (one per provisioned identity)
//! - `subscription` - Commerce-side subscriptions created by provisioning
//! - `payment` - Payment mirror written at provisioning time
//! - `service_plan_mapping` - Service to entitlement plan reference data
//! - `sync_log` - Append-only outbox towards the entitlement system
//!
//! # Stores
//!
//! Services talk to the [`CheckoutStore`] trait. [`PgStore`] is the
//! production implementation; [`MemoryStore`] backs tests and local demos.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/checkout/migrations/` and run via:
//! ```bash
//! cargo run -p alliance-cli -- migrate
//! ```

use std::time::Duration;

use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub mod accounts;
pub mod memory;
pub mod orders;
pub mod pg;
pub mod plan_mappings;
pub mod provisioning;
pub mod store;
pub mod sync_log;

pub use memory::{Fault, MemoryStore};
pub use pg::PgStore;
pub use store::{
    AccountStore, CheckoutStore, OrderStore, PlanMappingStore, ProvisioningStore, ProvisioningTx,
    SyncLogStore,
};

/// Serialization failure under concurrent transactions.
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
/// Deadlock detected.
const SQLSTATE_DEADLOCK: &str = "40P01";

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row data failed domain validation.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Record not found.
    #[error("record not found")]
    NotFound,

    /// Unique constraint violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Store temporarily unreachable (in-memory fault injection).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_),
            )
            | Self::Unavailable(_) => true,
            Self::Database(sqlx::Error::Database(db_err)) => db_err.code().is_some_and(|code| {
                code == SQLSTATE_SERIALIZATION_FAILURE || code == SQLSTATE_DEADLOCK
            }),
            _ => false,
        }
    }

    /// Map a unique violation to [`RepositoryError::Conflict`].
    pub(crate) fn from_unique(e: sqlx::Error, what: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = e
            && db_err.is_unique_violation()
        {
            return Self::Conflict(format!("{what} already exists"));
        }
        Self::Database(e)
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Apply the embedded migrations.
///
/// # Errors
///
/// Returns `sqlx::migrate::MigrateError` if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
