//! Read-only support lookups.
//!
//! Output carries full row-level detail and is meant for operators only.

use uuid::Uuid;

use alliance_checkout::services::SupportLookup;
use alliance_core::{Email, UserId};

use super::{CliError, connect, print_json};

fn parse_email(email: &str) -> Result<Email, CliError> {
    Email::parse(email).map_err(|e| CliError::InvalidArgument(e.to_string()))
}

async fn support() -> Result<SupportLookup, CliError> {
    let (_, store) = connect().await?;
    Ok(SupportLookup::new(store))
}

/// Print every order placed with `email`, newest first.
///
/// # Errors
///
/// Returns an error for a malformed address or an unreachable database.
pub async fn orders(email: &str) -> Result<(), CliError> {
    let email = parse_email(email)?;
    let orders = support().await?.orders_by_email(&email).await?;
    tracing::info!(count = orders.len(), "Orders found");
    print_json(&orders)
}

/// Print the account (profile, subscriptions, payments) for a buyer.
///
/// # Errors
///
/// Returns an error for malformed input or an unreachable database.
pub async fn account(email: Option<&str>, user_id: Option<Uuid>) -> Result<(), CliError> {
    let support = support().await?;
    let account = match (email, user_id) {
        (Some(email), None) => support.account_by_email(&parse_email(email)?).await?,
        (None, Some(id)) => support.account_by_user_id(UserId::new(id)).await?,
        _ => {
            return Err(CliError::InvalidArgument(
                "pass exactly one of --email or --user-id".to_string(),
            ));
        }
    };

    if account.is_none() {
        tracing::info!("No account found");
    }
    print_json(&account)
}
