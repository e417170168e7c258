//! In-memory [`CheckoutStore`] for tests and local demos.
//!
//! Mirrors the guards and unique constraints of the Postgres schema. The
//! provisioning transaction holds the state lock for its whole lifetime and
//! works on a staged copy, so concurrent provisioning attempts serialize the
//! way `SELECT ... FOR UPDATE` makes them serialize in Postgres.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use alliance_core::{
    Email, LinkToken, MappingId, OrderId, PaymentStatus, SyncEntryId, SyncStatus, UserId,
};

use super::RepositoryError;
use super::store::{
    AccountStore, CheckoutStore, OrderStore, PlanMappingStore, ProvisioningStore, ProvisioningTx,
    SyncLogStore,
};
use crate::models::{
    GuestOrder, NewOrder, NewPlanMapping, NewSyncEntry, PaymentRecord, PlanMapping, Profile,
    Subscription, SyncEntry, SyncHealth, SyncPolicy,
};

/// A failure the store can be told to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Every operation fails as if the store were unreachable.
    Offline,
    /// Inserting a payment record fails.
    PaymentInsert,
    /// Appending to the sync log fails.
    SyncAppend,
}

type Faults = Arc<std::sync::Mutex<HashSet<Fault>>>;

fn check(faults: &Faults, fault: Fault) -> Result<(), RepositoryError> {
    let active = faults.lock().unwrap_or_else(PoisonError::into_inner);
    if active.contains(&Fault::Offline) || active.contains(&fault) {
        return Err(RepositoryError::Unavailable(format!("injected fault: {fault:?}")));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    orders: HashMap<OrderId, GuestOrder>,
    profiles: HashMap<UserId, Profile>,
    subscriptions: Vec<Subscription>,
    payments: Vec<PaymentRecord>,
    mappings: Vec<PlanMapping>,
    next_mapping_id: i32,
    sync_log: Vec<SyncEntry>,
    next_sync_id: i64,
}

impl MemoryState {
    /// Whether another order already carries `token` in the slot `pick` reads.
    fn token_taken(
        &self,
        id: OrderId,
        token: &LinkToken,
        pick: fn(&GuestOrder) -> Option<&LinkToken>,
    ) -> bool {
        self.orders
            .values()
            .any(|o| o.id != id && pick(o) == Some(token))
    }

    fn insert_subscription(&mut self, sub: &Subscription) -> Result<(), RepositoryError> {
        if self.subscriptions.iter().any(|s| s.id == sub.id) {
            return Err(RepositoryError::Conflict("subscription already exists".into()));
        }
        if !self.profiles.contains_key(&sub.user_id) || !self.orders.contains_key(&sub.order_id) {
            return Err(RepositoryError::Conflict("subscription references unknown rows".into()));
        }
        self.subscriptions.push(sub.clone());
        Ok(())
    }

    fn insert_payment(&mut self, payment: &PaymentRecord) -> Result<(), RepositoryError> {
        if self
            .payments
            .iter()
            .any(|p| p.id == payment.id || p.order_id == payment.order_id)
        {
            return Err(RepositoryError::Conflict("payment for order already exists".into()));
        }
        self.payments.push(payment.clone());
        Ok(())
    }

    fn append_sync(&mut self, e: &NewSyncEntry) -> Result<SyncEntry, RepositoryError> {
        let clash = match e.supersedes_id {
            Some(prev) => {
                if !self.sync_log.iter().any(|s| s.id == prev) {
                    return Err(RepositoryError::Conflict(format!(
                        "superseded sync entry {prev:?} does not exist"
                    )));
                }
                self.sync_log.iter().any(|s| s.supersedes_id == Some(prev))
            }
            None => self.sync_log.iter().any(|s| {
                s.supersedes_id.is_none()
                    && s.event_type == e.event_type
                    && s.source_ref == e.source_ref
            }),
        };
        if clash {
            return Err(RepositoryError::Conflict(
                "successor for sync entry already exists".into(),
            ));
        }

        self.next_sync_id += 1;
        let entry = SyncEntry {
            id: SyncEntryId::new(self.next_sync_id),
            event_type: e.event_type.clone(),
            source_ref: e.source_ref.clone(),
            target_ref: e.target_ref.clone(),
            status: e.status,
            last_error: e.last_error.clone(),
            retry_count: e.retry_count,
            payload: e.payload.clone(),
            supersedes_id: e.supersedes_id,
            created_at: e.created_at,
        };
        self.sync_log.push(entry.clone());
        Ok(entry)
    }

    fn is_head(&self, entry: &SyncEntry) -> bool {
        !self
            .sync_log
            .iter()
            .any(|s| s.supersedes_id == Some(entry.id))
    }

    fn heads(&self) -> impl Iterator<Item = &SyncEntry> {
        self.sync_log.iter().filter(move |e| self.is_head(e))
    }
}

/// Store holding everything in process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    faults: Faults,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent operations fail with `fault` until cleared.
    pub fn inject_fault(&self, fault: Fault) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fault);
    }

    pub fn clear_faults(&self) {
        self.faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Every sync log entry, in append order.
    pub async fn sync_log(&self) -> Vec<SyncEntry> {
        self.state.lock().await.sync_log.clone()
    }

    /// Number of subscription rows, across all users.
    pub async fn subscription_count(&self) -> usize {
        self.state.lock().await.subscriptions.len()
    }

    /// Number of payment rows, across all users.
    pub async fn payment_count(&self) -> usize {
        self.state.lock().await.payments.len()
    }

    /// Number of profile rows.
    pub async fn profile_count(&self) -> usize {
        self.state.lock().await.profiles.len()
    }

    /// Overwrite an order's expiry, for tests that need an expired order.
    pub async fn set_order_expiry(&self, id: OrderId, expires_at: DateTime<Utc>) {
        if let Some(order) = self.state.lock().await.orders.get_mut(&id) {
            order.order_expires_at = expires_at;
        }
    }

    async fn update_order(
        &self,
        id: OrderId,
        guard: impl FnOnce(&GuestOrder) -> bool + Send,
        apply: impl FnOnce(&mut GuestOrder) + Send,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(None);
        };
        if !guard(order) {
            return Ok(None);
        }
        apply(order);
        Ok(Some(order.clone()))
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &NewOrder) -> Result<GuestOrder, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let mut state = self.state.lock().await;
        if state.orders.contains_key(&order.id) {
            return Err(RepositoryError::Conflict("order already exists".into()));
        }
        let row = GuestOrder {
            id: order.id,
            contact: order.contact.clone(),
            cart: order.cart.clone(),
            totals: order.totals,
            payment_status: PaymentStatus::Pending,
            payment_attempts: 0,
            last_payment_attempt_at: None,
            provider_ref: None,
            resume_token: None,
            order_expires_at: order.order_expires_at,
            magic_link_token: None,
            magic_link_sent_at: None,
            account_created: false,
            user_id: None,
            created_at: order.created_at,
            updated_at: order.created_at,
        };
        state.orders.insert(order.id, row.clone());
        Ok(row)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<GuestOrder>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn record_payment_attempt(
        &self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        self.update_order(
            id,
            |_| true,
            |o| {
                o.payment_attempts += 1;
                o.last_payment_attempt_at = Some(at);
                o.updated_at = at;
            },
        )
        .await
    }

    async fn transition_payment(
        &self,
        id: OrderId,
        to: PaymentStatus,
        provider_ref: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let provider_ref = provider_ref.map(str::to_owned);
        self.update_order(
            id,
            |o| o.payment_status == PaymentStatus::Pending,
            |o| {
                o.payment_status = to;
                if provider_ref.is_some() {
                    o.provider_ref = provider_ref;
                }
                o.updated_at = at;
            },
        )
        .await
    }

    async fn abandon_expired(&self, now: DateTime<Utc>) -> Result<Vec<OrderId>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let mut state = self.state.lock().await;
        let mut moved: Vec<OrderId> = state
            .orders
            .values_mut()
            .filter(|o| o.payment_status == PaymentStatus::Pending && o.order_expires_at <= now)
            .map(|o| {
                o.payment_status = PaymentStatus::Abandoned;
                o.updated_at = now;
                o.id
            })
            .collect();
        moved.sort();
        Ok(moved)
    }

    async fn ensure_resume_token(
        &self,
        id: OrderId,
        token: &LinkToken,
        now: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let mut state = self.state.lock().await;
        if state.token_taken(id, token, |o| o.resume_token.as_ref()) {
            return Err(RepositoryError::Conflict("resume token already exists".into()));
        }
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(None);
        };
        if !order.is_resumable_at(now) {
            return Ok(None);
        }
        if order.resume_token.is_none() {
            order.resume_token = Some(token.clone());
        }
        order.updated_at = now;
        Ok(Some(order.clone()))
    }

    async fn find_by_resume_token(
        &self,
        token: &LinkToken,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .find(|o| o.resume_token.as_ref() == Some(token))
            .cloned())
    }

    async fn rotate_magic_link_token(
        &self,
        id: OrderId,
        token: &LinkToken,
        sent_at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let mut state = self.state.lock().await;
        if state.token_taken(id, token, |o| o.magic_link_token.as_ref()) {
            return Err(RepositoryError::Conflict("magic link token already exists".into()));
        }
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(None);
        };
        if !order.awaits_provisioning() {
            return Ok(None);
        }
        order.magic_link_token = Some(token.clone());
        order.magic_link_sent_at = Some(sent_at);
        order.updated_at = sent_at;
        Ok(Some(order.clone()))
    }

    async fn orders_by_email(&self, email: &Email) -> Result<Vec<GuestOrder>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let state = self.state.lock().await;
        let mut orders: Vec<GuestOrder> = state
            .orders
            .values()
            .filter(|o| &o.contact.email == email)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }
}

#[async_trait]
impl PlanMappingStore for MemoryStore {
    async fn active_mappings(&self) -> Result<Vec<PlanMapping>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let state = self.state.lock().await;
        let mut active: Vec<PlanMapping> =
            state.mappings.iter().filter(|m| m.active).cloned().collect();
        active.sort_by_key(|m| m.id);
        Ok(active)
    }

    async fn upsert_mapping(
        &self,
        mapping: &NewPlanMapping,
    ) -> Result<PlanMapping, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .mappings
            .iter_mut()
            .find(|m| m.service_id == mapping.service_id && m.plan_code == mapping.plan_code)
        {
            existing.service_name.clone_from(&mapping.service_name);
            existing.priority = mapping.priority;
            existing.active = mapping.active;
            existing.bundle_rule.clone_from(&mapping.bundle_rule);
            return Ok(existing.clone());
        }

        state.next_mapping_id += 1;
        let row = PlanMapping {
            id: MappingId::new(state.next_mapping_id),
            service_id: mapping.service_id.clone(),
            service_name: mapping.service_name.clone(),
            plan_code: mapping.plan_code.clone(),
            priority: mapping.priority,
            active: mapping.active,
            bundle_rule: mapping.bundle_rule.clone(),
            created_at: Utc::now(),
        };
        state.mappings.push(row.clone());
        Ok(row)
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn profile(&self, user_id: UserId) -> Result<Option<Profile>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        Ok(self.state.lock().await.profiles.get(&user_id).cloned())
    }

    async fn profile_by_email(&self, email: &Email) -> Result<Option<Profile>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let state = self.state.lock().await;
        Ok(state
            .profiles
            .values()
            .filter(|p| &p.email == email)
            .min_by_key(|p| p.created_at)
            .cloned())
    }

    async fn subscriptions_for(
        &self,
        user_id: UserId,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let state = self.state.lock().await;
        let mut subs: Vec<Subscription> = state
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        subs.sort_by(|a, b| {
            (a.started_at, a.is_bundle, a.id).cmp(&(b.started_at, b.is_bundle, b.id))
        });
        Ok(subs)
    }

    async fn payments_for(&self, user_id: UserId) -> Result<Vec<PaymentRecord>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let state = self.state.lock().await;
        let mut payments: Vec<PaymentRecord> = state
            .payments
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.paid_at);
        Ok(payments)
    }
}

#[async_trait]
impl SyncLogStore for MemoryStore {
    async fn append_sync(&self, entry: &NewSyncEntry) -> Result<SyncEntry, RepositoryError> {
        check(&self.faults, Fault::SyncAppend)?;
        self.state.lock().await.append_sync(entry)
    }

    async fn stream_head(
        &self,
        event_type: &str,
        source_ref: &str,
    ) -> Result<Option<SyncEntry>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let state = self.state.lock().await;
        Ok(state
            .heads()
            .filter(|e| e.event_type == event_type && e.source_ref == source_ref)
            .max_by_key(|e| e.id)
            .cloned())
    }

    async fn stream_history(
        &self,
        event_type: &str,
        source_ref: &str,
    ) -> Result<Vec<SyncEntry>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let state = self.state.lock().await;
        Ok(state
            .sync_log
            .iter()
            .filter(|e| e.event_type == event_type && e.source_ref == source_ref)
            .cloned()
            .collect())
    }

    async fn due_heads(
        &self,
        now: DateTime<Utc>,
        policy: &SyncPolicy,
    ) -> Result<Vec<SyncEntry>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let state = self.state.lock().await;
        let mut due: Vec<SyncEntry> = state
            .heads()
            .filter(|e| policy.is_due(e, now))
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.created_at, e.id));
        due.truncate(usize::try_from(policy.batch_size).unwrap_or(usize::MAX));
        Ok(due)
    }

    async fn sync_health(&self, recent_errors: u32) -> Result<SyncHealth, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let state = self.state.lock().await;
        let mut health = SyncHealth::default();
        let mut errors = Vec::new();
        for head in state.heads() {
            match head.status {
                SyncStatus::Pending => {
                    health.pending += 1;
                    health.oldest_pending_at = Some(
                        health
                            .oldest_pending_at
                            .map_or(head.created_at, |t| t.min(head.created_at)),
                    );
                }
                SyncStatus::Succeeded => health.succeeded += 1,
                SyncStatus::Error => {
                    health.error += 1;
                    errors.push(head.clone());
                }
            }
        }
        errors.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        errors.truncate(usize::try_from(recent_errors).unwrap_or(usize::MAX));
        health.recent_errors = errors;
        Ok(health)
    }
}

/// Provisioning transaction over a staged copy of the state.
struct MemoryProvisioningTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    faults: Faults,
}

#[async_trait]
impl ProvisioningTx for MemoryProvisioningTx {
    async fn lock_order_by_magic_token(
        &mut self,
        token: &LinkToken,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        Ok(self
            .staged
            .orders
            .values()
            .find(|o| o.magic_link_token.as_ref() == Some(token))
            .cloned())
    }

    async fn profile(&mut self, user_id: UserId) -> Result<Option<Profile>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        Ok(self.staged.profiles.get(&user_id).cloned())
    }

    async fn insert_profile(&mut self, profile: &Profile) -> Result<(), RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        self.staged
            .profiles
            .entry(profile.user_id)
            .or_insert_with(|| profile.clone());
        Ok(())
    }

    async fn insert_subscription(&mut self, sub: &Subscription) -> Result<(), RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        self.staged.insert_subscription(sub)
    }

    async fn insert_payment(&mut self, payment: &PaymentRecord) -> Result<(), RepositoryError> {
        check(&self.faults, Fault::PaymentInsert)?;
        self.staged.insert_payment(payment)
    }

    async fn append_sync(&mut self, entry: &NewSyncEntry) -> Result<SyncEntry, RepositoryError> {
        check(&self.faults, Fault::SyncAppend)?;
        self.staged.append_sync(entry)
    }

    async fn mark_account_created(
        &mut self,
        id: OrderId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let Some(order) = self.staged.orders.get_mut(&id) else {
            return Ok(false);
        };
        if !order.awaits_provisioning() {
            return Ok(false);
        }
        order.account_created = true;
        order.user_id = Some(user_id);
        order.updated_at = at;
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let Self {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }
}

#[async_trait]
impl ProvisioningStore for MemoryStore {
    async fn begin_provisioning(&self) -> Result<Box<dyn ProvisioningTx>, RepositoryError> {
        check(&self.faults, Fault::Offline)?;
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryProvisioningTx {
            guard,
            staged,
            faults: Arc::clone(&self.faults),
        }))
    }
}

#[async_trait]
impl CheckoutStore for MemoryStore {
    async fn ping(&self) -> Result<(), RepositoryError> {
        check(&self.faults, Fault::Offline)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(source_ref: &str) -> NewSyncEntry {
        NewSyncEntry::pending("subscription.created", source_ref, json!({}), Utc::now())
    }

    #[tokio::test]
    async fn test_second_successor_of_same_head_conflicts() {
        let store = MemoryStore::new();
        let root = store.append_sync(&pending("sub-1")).await.unwrap();

        let next = NewSyncEntry::following(&root, SyncStatus::Succeeded, Utc::now());
        store.append_sync(&next).await.unwrap();

        let err = store.append_sync(&next).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_stream_has_single_root() {
        let store = MemoryStore::new();
        store.append_sync(&pending("sub-1")).await.unwrap();
        let err = store.append_sync(&pending("sub-1")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));

        store.append_sync(&pending("sub-2")).await.unwrap();
    }

    #[tokio::test]
    async fn test_head_is_newest_entry() {
        let store = MemoryStore::new();
        let root = store.append_sync(&pending("sub-1")).await.unwrap();
        let next = store
            .append_sync(&NewSyncEntry::following(&root, SyncStatus::Error, Utc::now()))
            .await
            .unwrap();

        let head = store
            .stream_head("subscription.created", "sub-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.id, next.id);
        assert_eq!(
            store
                .stream_history("subscription.created", "sub-1")
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_uncommitted_provisioning_is_discarded() {
        let store = MemoryStore::new();
        {
            let mut tx = store.begin_provisioning().await.unwrap();
            tx.append_sync(&pending("sub-1")).await.unwrap();
        }
        assert!(store.sync_log().await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_fault_fails_everything() {
        let store = MemoryStore::new();
        store.inject_fault(Fault::Offline);
        let err = store.ping().await.unwrap_err();
        assert!(err.is_transient());

        store.clear_faults();
        store.ping().await.unwrap();
    }
}
