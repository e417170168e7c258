//! Postgres provisioning transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};

use alliance_core::{LinkToken, OrderId, UserId};

use super::orders::{OrderRow, order_columns};
use super::store::ProvisioningTx;
use super::{RepositoryError, accounts, sync_log};
use crate::models::{GuestOrder, NewSyncEntry, PaymentRecord, Profile, Subscription, SyncEntry};

/// One open transaction; rolls back on drop.
pub struct PgProvisioningTx {
    tx: Transaction<'static, Postgres>,
}

impl PgProvisioningTx {
    pub(crate) const fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ProvisioningTx for PgProvisioningTx {
    async fn lock_order_by_magic_token(
        &mut self,
        token: &LinkToken,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        // No state predicate here: the caller classifies what it finds.
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "SELECT ",
            order_columns!(),
            " FROM checkout.guest_order WHERE magic_link_token = $1 FOR UPDATE"
        ))
        .bind(token.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.map(GuestOrder::try_from).transpose()
    }

    async fn profile(&mut self, user_id: UserId) -> Result<Option<Profile>, RepositoryError> {
        accounts::fetch_profile(&mut *self.tx, user_id).await
    }

    async fn insert_profile(&mut self, profile: &Profile) -> Result<(), RepositoryError> {
        accounts::insert_profile(&mut *self.tx, profile).await
    }

    async fn insert_subscription(&mut self, sub: &Subscription) -> Result<(), RepositoryError> {
        accounts::insert_subscription(&mut *self.tx, sub).await
    }

    async fn insert_payment(&mut self, payment: &PaymentRecord) -> Result<(), RepositoryError> {
        accounts::insert_payment(&mut *self.tx, payment).await
    }

    async fn append_sync(&mut self, entry: &NewSyncEntry) -> Result<SyncEntry, RepositoryError> {
        sync_log::insert_entry(&mut *self.tx, entry).await
    }

    async fn mark_account_created(
        &mut self,
        id: OrderId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE checkout.guest_order
             SET account_created = TRUE, user_id = $2, updated_at = $3
             WHERE id = $1 AND payment_status = 'succeeded' AND account_created = FALSE",
        )
        .bind(id)
        .bind(user_id)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }
}
