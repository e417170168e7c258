//! `PostgreSQL`-backed [`CheckoutStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use alliance_core::{Email, LinkToken, OrderId, PaymentStatus, UserId};

use super::accounts::AccountRepository;
use super::orders::OrderRepository;
use super::plan_mappings::PlanMappingRepository;
use super::provisioning::PgProvisioningTx;
use super::store::{
    AccountStore, CheckoutStore, OrderStore, PlanMappingStore, ProvisioningStore, ProvisioningTx,
    SyncLogStore,
};
use super::sync_log::SyncLogRepository;
use super::RepositoryError;
use crate::models::{
    GuestOrder, NewOrder, NewPlanMapping, NewSyncEntry, PaymentRecord, PlanMapping, Profile,
    Subscription, SyncEntry, SyncHealth, SyncPolicy,
};

/// Store over a shared connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &NewOrder) -> Result<GuestOrder, RepositoryError> {
        OrderRepository::new(&self.pool).insert(order).await
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<GuestOrder>, RepositoryError> {
        OrderRepository::new(&self.pool).get(id).await
    }

    async fn record_payment_attempt(
        &self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        OrderRepository::new(&self.pool).record_attempt(id, at).await
    }

    async fn transition_payment(
        &self,
        id: OrderId,
        to: PaymentStatus,
        provider_ref: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        OrderRepository::new(&self.pool)
            .transition(id, to, provider_ref, at)
            .await
    }

    async fn abandon_expired(&self, now: DateTime<Utc>) -> Result<Vec<OrderId>, RepositoryError> {
        OrderRepository::new(&self.pool).abandon_expired(now).await
    }

    async fn ensure_resume_token(
        &self,
        id: OrderId,
        token: &LinkToken,
        now: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        OrderRepository::new(&self.pool)
            .ensure_resume_token(id, token, now)
            .await
    }

    async fn find_by_resume_token(
        &self,
        token: &LinkToken,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        OrderRepository::new(&self.pool)
            .find_by_resume_token(token)
            .await
    }

    async fn rotate_magic_link_token(
        &self,
        id: OrderId,
        token: &LinkToken,
        sent_at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        OrderRepository::new(&self.pool)
            .rotate_magic_link_token(id, token, sent_at)
            .await
    }

    async fn orders_by_email(&self, email: &Email) -> Result<Vec<GuestOrder>, RepositoryError> {
        OrderRepository::new(&self.pool).by_email(email).await
    }
}

#[async_trait]
impl PlanMappingStore for PgStore {
    async fn active_mappings(&self) -> Result<Vec<PlanMapping>, RepositoryError> {
        PlanMappingRepository::new(&self.pool).active().await
    }

    async fn upsert_mapping(
        &self,
        mapping: &NewPlanMapping,
    ) -> Result<PlanMapping, RepositoryError> {
        PlanMappingRepository::new(&self.pool).upsert(mapping).await
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn profile(&self, user_id: UserId) -> Result<Option<Profile>, RepositoryError> {
        AccountRepository::new(&self.pool).profile(user_id).await
    }

    async fn profile_by_email(&self, email: &Email) -> Result<Option<Profile>, RepositoryError> {
        AccountRepository::new(&self.pool)
            .profile_by_email(email)
            .await
    }

    async fn subscriptions_for(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        AccountRepository::new(&self.pool)
            .subscriptions(user_id)
            .await
    }

    async fn payments_for(&self, user_id: UserId) -> Result<Vec<PaymentRecord>, RepositoryError> {
        AccountRepository::new(&self.pool).payments(user_id).await
    }
}

#[async_trait]
impl SyncLogStore for PgStore {
    async fn append_sync(&self, entry: &NewSyncEntry) -> Result<SyncEntry, RepositoryError> {
        SyncLogRepository::new(&self.pool).append(entry).await
    }

    async fn stream_head(
        &self,
        event_type: &str,
        source_ref: &str,
    ) -> Result<Option<SyncEntry>, RepositoryError> {
        SyncLogRepository::new(&self.pool)
            .head(event_type, source_ref)
            .await
    }

    async fn stream_history(
        &self,
        event_type: &str,
        source_ref: &str,
    ) -> Result<Vec<SyncEntry>, RepositoryError> {
        SyncLogRepository::new(&self.pool)
            .history(event_type, source_ref)
            .await
    }

    async fn due_heads(
        &self,
        now: DateTime<Utc>,
        policy: &SyncPolicy,
    ) -> Result<Vec<SyncEntry>, RepositoryError> {
        SyncLogRepository::new(&self.pool)
            .due_heads(now, policy)
            .await
    }

    async fn sync_health(&self, recent_errors: u32) -> Result<SyncHealth, RepositoryError> {
        SyncLogRepository::new(&self.pool)
            .health(recent_errors)
            .await
    }
}

#[async_trait]
impl ProvisioningStore for PgStore {
    async fn begin_provisioning(&self) -> Result<Box<dyn ProvisioningTx>, RepositoryError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgProvisioningTx::new(tx)))
    }
}

#[async_trait]
impl CheckoutStore for PgStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
