//! Metaphysics Alliance checkout CLI - migrations, seeding and operator tools.
//!
//! # Usage
//!
//! ```bash
//! # Apply checkout database migrations
//! ma-cli migrate
//!
//! # Upsert service-to-plan mappings
//! ma-cli seed plans crates/cli/seeds/service_plans.yaml
//!
//! # Cron sweeps
//! ma-cli sweep abandoned
//! ma-cli sync reconcile
//!
//! # Diagnostics (JSON on stdout)
//! ma-cli sync health
//! ma-cli lookup orders --email buyer@example.com
//! ma-cli lookup account --user-id 6f1c...
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use uuid::Uuid;

mod commands;

#[derive(Parser)]
#[command(name = "ma-cli")]
#[command(author, version, about = "Metaphysics Alliance checkout CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate,
    /// Seed reference data
    Seed {
        #[command(subcommand)]
        target: SeedTarget,
    },
    /// Run batch sweeps
    Sweep {
        #[command(subcommand)]
        target: SweepTarget,
    },
    /// Inspect and drain the sync outbox
    Sync {
        #[command(subcommand)]
        action: SyncAction,
    },
    /// Read-only support lookups
    Lookup {
        #[command(subcommand)]
        target: LookupTarget,
    },
}

#[derive(Subcommand)]
enum SeedTarget {
    /// Upsert service-to-plan mappings from a YAML file
    Plans {
        /// Path to the YAML file
        file: String,
    },
}

#[derive(Subcommand)]
enum SweepTarget {
    /// Mark expired pending orders abandoned
    Abandoned,
}

#[derive(Subcommand)]
enum SyncAction {
    /// Push due pending entries to the entitlement system
    Reconcile,
    /// Show counts by status and recent escalations
    Health,
}

#[derive(Subcommand)]
enum LookupTarget {
    /// Orders placed with an email address
    Orders {
        #[arg(short, long)]
        email: String,
    },
    /// Provisioned account by email or user id
    Account {
        #[arg(short, long, conflicts_with = "user_id", required_unless_present = "user_id")]
        email: Option<String>,

        #[arg(short, long)]
        user_id: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Seed { target } => match target {
            SeedTarget::Plans { file } => commands::seed::plans(&file).await?,
        },
        Commands::Sweep { target } => match target {
            SweepTarget::Abandoned => commands::sweep::abandoned().await?,
        },
        Commands::Sync { action } => match action {
            SyncAction::Reconcile => commands::sync::reconcile().await?,
            SyncAction::Health => commands::sync::health().await?,
        },
        Commands::Lookup { target } => match target {
            LookupTarget::Orders { email } => commands::lookup::orders(&email).await?,
            LookupTarget::Account { email, user_id } => {
                commands::lookup::account(email.as_deref(), user_id).await?;
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_account_lookup_needs_exactly_one_key() {
        assert!(Cli::try_parse_from(["ma-cli", "lookup", "account"]).is_err());
        assert!(
            Cli::try_parse_from([
                "ma-cli",
                "lookup",
                "account",
                "--email",
                "a@example.com",
                "--user-id",
                "6f1c2f7e-3c1a-4b2e-9f65-0b7a8d9c1e2f",
            ])
            .is_err()
        );
        assert!(
            Cli::try_parse_from(["ma-cli", "lookup", "account", "--email", "a@example.com"]).is_ok()
        );
    }
}
