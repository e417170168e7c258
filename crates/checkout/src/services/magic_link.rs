//! Magic links: one-time account claims for paid guest orders.
//!
//! Issuing a link only rotates a token on the order. Validating it runs the
//! provisioning transaction: identity, profile, subscriptions, payment
//! record and sync outbox entries are written together or not at all.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::json;
use tracing::{info, instrument, warn};

use alliance_core::{
    DualPrice, LinkToken, OrderId, PaymentId, PaymentStatus, PlanCode, SubscriptionId,
    SubscriptionStatus, UserId,
};

use super::CheckoutError;
use super::identity::{IdentityMetadata, IdentityProvider};
use super::plans::{ServicePlanMapper, resolve_logged};
use crate::db::CheckoutStore;
use crate::models::sync::event;
use crate::models::{GuestOrder, NewSyncEntry, PaymentRecord, Profile, Subscription};

/// Result of a successful claim.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Provisioned {
    pub order_id: OrderId,
    pub user_id: UserId,
    /// Whether this claim created the buyer's profile.
    pub profile_created: bool,
    /// Effective plan granted (bundle plan if one applied).
    pub plan: Option<PlanCode>,
    pub subscriptions: Vec<Subscription>,
}

#[derive(Clone)]
pub struct MagicLinkProvisioner {
    store: Arc<dyn CheckoutStore>,
    mapper: ServicePlanMapper,
    identity: Arc<dyn IdentityProvider>,
    magic_link_ttl: TimeDelta,
}

impl MagicLinkProvisioner {
    #[must_use]
    pub fn new(
        store: Arc<dyn CheckoutStore>,
        mapper: ServicePlanMapper,
        identity: Arc<dyn IdentityProvider>,
        magic_link_ttl: TimeDelta,
    ) -> Self {
        Self {
            store,
            mapper,
            identity,
            magic_link_ttl,
        }
    }

    /// Generate a fresh link token for a paid, unclaimed order. Any earlier
    /// token for the order stops working.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::StateConflict` if the order is unpaid or
    /// already provisioned, `CheckoutError::NotFoundOrExpired` if unknown.
    pub async fn issue(
        &self,
        order_id: OrderId,
    ) -> Result<(GuestOrder, LinkToken), CheckoutError> {
        self.issue_at(order_id, Utc::now()).await
    }

    /// [`Self::issue`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Self::issue`].
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn issue_at(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<(GuestOrder, LinkToken), CheckoutError> {
        let token = LinkToken::generate();
        if let Some(order) = self
            .store
            .rotate_magic_link_token(order_id, &token, now)
            .await?
        {
            info!("Magic link issued");
            return Ok((order, token));
        }

        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or(CheckoutError::NotFoundOrExpired)?;
        if order.account_created {
            warn!(
                anomaly = "reissue_after_provisioning",
                "Magic link requested for provisioned order"
            );
            return Err(CheckoutError::StateConflict("order already provisioned".into()));
        }
        Err(CheckoutError::StateConflict(format!(
            "order payment is {}, magic links need a succeeded payment",
            order.payment_status
        )))
    }

    /// Claim the order behind `token` and provision its account.
    ///
    /// # Errors
    ///
    /// - `CheckoutError::NotFoundOrExpired` for an unknown, unpaid or expired link
    /// - `CheckoutError::StateConflict` if the order was already provisioned
    /// - `CheckoutError::Identity` / `CheckoutError::TransientStore` on
    ///   collaborator failure; nothing is persisted and the call may be retried
    pub async fn validate_and_provision(&self, token: &str) -> Result<Provisioned, CheckoutError> {
        self.validate_and_provision_at(token, Utc::now()).await
    }

    /// [`Self::validate_and_provision`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Self::validate_and_provision`].
    #[instrument(skip_all, fields(order_id = tracing::field::Empty))]
    pub async fn validate_and_provision_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Provisioned, CheckoutError> {
        let token = LinkToken::parse(token).ok_or(CheckoutError::NotFoundOrExpired)?;
        // Loaded before the transaction: the table read must not queue
        // behind the order lock.
        let table = self.mapper.table().await?;

        let mut tx = self.store.begin_provisioning().await?;
        let order = tx
            .lock_order_by_magic_token(&token)
            .await?
            .ok_or(CheckoutError::NotFoundOrExpired)?;
        tracing::Span::current().record("order_id", tracing::field::display(order.id));

        if order.account_created {
            warn!(
                anomaly = "reprovision_attempt",
                order_id = %order.id,
                "Magic link used for an already provisioned order"
            );
            return Err(CheckoutError::StateConflict("order already provisioned".into()));
        }
        if order.payment_status != PaymentStatus::Succeeded {
            return Err(CheckoutError::NotFoundOrExpired);
        }
        let expired = order
            .magic_link_sent_at
            .is_none_or(|sent| sent + self.magic_link_ttl <= now);
        if expired {
            info!(order_id = %order.id, "Magic link expired");
            return Err(CheckoutError::NotFoundOrExpired);
        }

        let metadata = IdentityMetadata {
            full_name: order.contact.name.clone(),
            source: IdentityMetadata::SOURCE_MAGIC_LINK.to_string(),
            order_id: order.id,
        };
        let user_id = self
            .identity
            .create_or_fetch_identity(&order.contact.email, &metadata)
            .await?;

        let profile_created = if tx.profile(user_id).await?.is_none() {
            tx.insert_profile(&Profile::draft(user_id, &order.contact, now))
                .await?;
            true
        } else {
            false
        };

        let resolution = resolve_logged(order.cart.items(), &table);
        let mut subscriptions: Vec<Subscription> = order
            .cart
            .items()
            .iter()
            .zip(&resolution.lines)
            .map(|(item, line)| Subscription {
                id: SubscriptionId::generate(),
                user_id,
                order_id: order.id,
                service_id: item.service_id.clone(),
                service_name: item.name.clone(),
                category: item.category.clone(),
                plan_code: line.plan.clone(),
                price: item.price,
                status: SubscriptionStatus::Active,
                is_bundle: false,
                started_at: now,
                expires_at: None,
            })
            .collect();
        if let Some(bundle) = &resolution.bundle {
            subscriptions.push(Subscription {
                id: SubscriptionId::generate(),
                user_id,
                order_id: order.id,
                service_id: bundle.service_id.clone(),
                service_name: bundle.service_name.clone(),
                category: None,
                plan_code: Some(bundle.plan.clone()),
                price: DualPrice::zero(),
                status: SubscriptionStatus::Active,
                is_bundle: true,
                started_at: now,
                expires_at: None,
            });
        }
        for sub in &subscriptions {
            tx.insert_subscription(sub).await?;
        }

        tx.insert_payment(&PaymentRecord {
            id: PaymentId::generate(),
            user_id,
            order_id: order.id,
            amount: order.amount_due(),
            currency: order.contact.preferred_currency,
            gateway: PaymentRecord::GATEWAY.to_string(),
            status: PaymentRecord::STATUS_COMPLETED.to_string(),
            transaction_id: order.provider_ref.clone(),
            paid_at: now,
        })
        .await?;

        let plan = resolution.effective_plan().cloned();
        tx.append_sync(&NewSyncEntry::pending(
            event::ACCOUNT_PROVISIONED,
            order.id.to_string(),
            json!({
                "user_id": user_id,
                "order_id": order.id,
                "plan_code": plan,
                "subscription_ids": subscriptions.iter().map(|s| s.id).collect::<Vec<_>>(),
            }),
            now,
        ))
        .await?;
        for sub in &subscriptions {
            tx.append_sync(&NewSyncEntry::pending(
                event::SUBSCRIPTION_CREATED,
                sub.id.to_string(),
                json!({
                    "subscription_id": sub.id,
                    "user_id": user_id,
                    "order_id": order.id,
                    "service_id": sub.service_id,
                    "plan_code": sub.plan_code,
                    "is_bundle": sub.is_bundle,
                    "status": sub.status,
                    "started_at": sub.started_at,
                }),
                now,
            ))
            .await?;
        }

        if !tx.mark_account_created(order.id, user_id, now).await? {
            warn!(
                anomaly = "reprovision_attempt",
                order_id = %order.id,
                "Provisioning guard failed at commit"
            );
            return Err(CheckoutError::StateConflict("order already provisioned".into()));
        }
        tx.commit().await?;

        info!(
            order_id = %order.id,
            user_id = %user_id,
            subscriptions = subscriptions.len(),
            profile_created,
            "Account provisioned from magic link"
        );
        Ok(Provisioned {
            order_id: order.id,
            user_id,
            profile_created,
            plan,
            subscriptions,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::db::MemoryStore;
    use crate::services::OrderLedger;
    use crate::services::identity::MemoryIdentityProvider;
    use alliance_core::{CartItem, GuestContact, PaymentOutcome, ServiceId};
    use rust_decimal::Decimal;

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: OrderLedger,
        identity: Arc<MemoryIdentityProvider>,
        links: MagicLinkProvisioner,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn CheckoutStore> = store.clone();
        let identity = Arc::new(MemoryIdentityProvider::new());
        let mapper = ServicePlanMapper::new(Arc::clone(&dyn_store), Duration::from_secs(60));
        Fixture {
            ledger: OrderLedger::new(Arc::clone(&dyn_store), TimeDelta::hours(24)),
            links: MagicLinkProvisioner::new(
                dyn_store,
                mapper,
                identity.clone(),
                TimeDelta::hours(168),
            ),
            store,
            identity,
        }
    }

    async fn paid_order(f: &Fixture) -> GuestOrder {
        let order = f
            .ledger
            .create_order(
                vec![CartItem {
                    service_id: ServiceId::parse("bazi").unwrap(),
                    name: "BaZi Consultation".into(),
                    category: Some("consultation".into()),
                    price: DualPrice::new(Decimal::from(800), Decimal::from(180)),
                }],
                GuestContact::new("buyer@example.com", "Tan Wei").unwrap(),
            )
            .await
            .unwrap();
        f.ledger
            .apply_payment_result(order.id, PaymentOutcome::Succeeded, Some("pi_123"))
            .await
            .unwrap();
        order
    }

    #[tokio::test]
    async fn test_issue_requires_paid_order() {
        let f = fixture();
        let order = f
            .ledger
            .create_order(
                vec![CartItem {
                    service_id: ServiceId::parse("bazi").unwrap(),
                    name: "BaZi".into(),
                    category: None,
                    price: DualPrice::zero(),
                }],
                GuestContact::new("buyer@example.com", "Tan Wei").unwrap(),
            )
            .await
            .unwrap();

        let err = f.links.issue(order.id).await.unwrap_err();
        assert!(matches!(err, CheckoutError::StateConflict(_)));
    }

    #[tokio::test]
    async fn test_reissue_invalidates_previous_token() {
        let f = fixture();
        let order = paid_order(&f).await;
        let (_, old) = f.links.issue(order.id).await.unwrap();
        let (_, new) = f.links.issue(order.id).await.unwrap();
        assert_ne!(old, new);

        let err = f.links.validate_and_provision(old.as_str()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFoundOrExpired));
        f.links.validate_and_provision(new.as_str()).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_link_is_rejected() {
        let f = fixture();
        let order = paid_order(&f).await;
        let (issued, token) = f.links.issue(order.id).await.unwrap();
        let later = issued.magic_link_sent_at.unwrap() + TimeDelta::hours(168);

        let err = f
            .links
            .validate_and_provision_at(token.as_str(), later)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::NotFoundOrExpired));
    }

    #[tokio::test]
    async fn test_identity_outage_leaves_order_claimable() {
        let f = fixture();
        let order = paid_order(&f).await;
        let (_, token) = f.links.issue(order.id).await.unwrap();

        f.identity.set_failing(true);
        let err = f
            .links
            .validate_and_provision(token.as_str())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(!f.ledger.get(order.id).await.unwrap().account_created);

        f.identity.set_failing(false);
        let done = f.links.validate_and_provision(token.as_str()).await.unwrap();
        assert_eq!(done.subscriptions.len(), 1);
        assert!(done.profile_created);
        assert_eq!(f.store.payment_count().await, 1);
    }
}
