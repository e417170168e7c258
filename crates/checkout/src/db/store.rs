//! Store seams used by the checkout services.
//!
//! Every state transition is expressed as a guarded write: the precondition
//! travels with the update, and a `None`/`false` result means the row did not
//! satisfy it (already transitioned, unknown, or expired). Callers never
//! read-then-write outside a [`ProvisioningTx`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use alliance_core::{Email, LinkToken, OrderId, PaymentStatus, UserId};

use super::RepositoryError;
use crate::models::{
    GuestOrder, NewOrder, NewPlanMapping, NewSyncEntry, PaymentRecord, PlanMapping, Profile,
    Subscription, SyncEntry, SyncHealth, SyncPolicy,
};

/// Guest order persistence.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &NewOrder) -> Result<GuestOrder, RepositoryError>;

    async fn get_order(&self, id: OrderId) -> Result<Option<GuestOrder>, RepositoryError>;

    /// Bump the attempt counter, whatever the order's state.
    async fn record_payment_attempt(
        &self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError>;

    /// Move a `pending` order to `to`. `None` if the order is not pending.
    async fn transition_payment(
        &self,
        id: OrderId,
        to: PaymentStatus,
        provider_ref: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError>;

    /// Mark every pending order with `order_expires_at <= now` abandoned.
    /// Returns the ids that moved.
    async fn abandon_expired(&self, now: DateTime<Utc>) -> Result<Vec<OrderId>, RepositoryError>;

    /// Store `token` unless the order already carries a resume token.
    /// Guarded by `pending` and not expired at `now`.
    async fn ensure_resume_token(
        &self,
        id: OrderId,
        token: &LinkToken,
        now: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError>;

    async fn find_by_resume_token(
        &self,
        token: &LinkToken,
    ) -> Result<Option<GuestOrder>, RepositoryError>;

    /// Replace the magic-link token. Guarded by `succeeded` and not yet
    /// provisioned.
    async fn rotate_magic_link_token(
        &self,
        id: OrderId,
        token: &LinkToken,
        sent_at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError>;

    /// Orders placed with `email`, newest first.
    async fn orders_by_email(&self, email: &Email) -> Result<Vec<GuestOrder>, RepositoryError>;
}

/// Service-to-plan reference data.
#[async_trait]
pub trait PlanMappingStore: Send + Sync {
    async fn active_mappings(&self) -> Result<Vec<PlanMapping>, RepositoryError>;

    /// Insert a mapping, or update the existing row with the same
    /// `(service_id, plan_code)`, keeping its id and so its insertion order.
    async fn upsert_mapping(&self, mapping: &NewPlanMapping)
    -> Result<PlanMapping, RepositoryError>;
}

/// Read access to provisioned accounts.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn profile(&self, user_id: UserId) -> Result<Option<Profile>, RepositoryError>;

    async fn profile_by_email(&self, email: &Email) -> Result<Option<Profile>, RepositoryError>;

    async fn subscriptions_for(&self, user_id: UserId)
    -> Result<Vec<Subscription>, RepositoryError>;

    async fn payments_for(&self, user_id: UserId) -> Result<Vec<PaymentRecord>, RepositoryError>;
}

/// Append-only sync log.
#[async_trait]
pub trait SyncLogStore: Send + Sync {
    /// Append an entry. `Conflict` if its `supersedes_id` already has a
    /// successor.
    async fn append_sync(&self, entry: &NewSyncEntry) -> Result<SyncEntry, RepositoryError>;

    /// Newest entry of a stream.
    async fn stream_head(
        &self,
        event_type: &str,
        source_ref: &str,
    ) -> Result<Option<SyncEntry>, RepositoryError>;

    /// Every entry of a stream, oldest first.
    async fn stream_history(
        &self,
        event_type: &str,
        source_ref: &str,
    ) -> Result<Vec<SyncEntry>, RepositoryError>;

    /// Pending heads whose backoff window has elapsed at `now`, oldest first.
    async fn due_heads(
        &self,
        now: DateTime<Utc>,
        policy: &SyncPolicy,
    ) -> Result<Vec<SyncEntry>, RepositoryError>;

    async fn sync_health(&self, recent_errors: u32) -> Result<SyncHealth, RepositoryError>;
}

/// The single multi-entity transaction of the engine.
#[async_trait]
pub trait ProvisioningStore: Send + Sync {
    async fn begin_provisioning(&self) -> Result<Box<dyn ProvisioningTx>, RepositoryError>;
}

/// An open provisioning transaction.
///
/// Dropping it without [`ProvisioningTx::commit`] rolls every write back.
#[async_trait]
pub trait ProvisioningTx: Send {
    /// Find the order carrying `token` and lock it for the rest of the
    /// transaction. Concurrent callers for the same order queue here.
    async fn lock_order_by_magic_token(
        &mut self,
        token: &LinkToken,
    ) -> Result<Option<GuestOrder>, RepositoryError>;

    async fn profile(&mut self, user_id: UserId) -> Result<Option<Profile>, RepositoryError>;

    async fn insert_profile(&mut self, profile: &Profile) -> Result<(), RepositoryError>;

    async fn insert_subscription(&mut self, sub: &Subscription) -> Result<(), RepositoryError>;

    async fn insert_payment(&mut self, payment: &PaymentRecord) -> Result<(), RepositoryError>;

    async fn append_sync(&mut self, entry: &NewSyncEntry) -> Result<SyncEntry, RepositoryError>;

    /// Flip `account_created` and set `user_id`, guarded by the provisioning
    /// predicate. `false` if the guard no longer holds.
    async fn mark_account_created(
        &mut self,
        id: OrderId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// Everything the checkout services need from persistence.
#[async_trait]
pub trait CheckoutStore:
    OrderStore + PlanMappingStore + AccountStore + SyncLogStore + ProvisioningStore
{
    /// Cheap reachability probe for readiness checks.
    async fn ping(&self) -> Result<(), RepositoryError>;
}
