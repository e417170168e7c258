//! Order ledger: guest orders and their payment state machine.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, instrument, warn};

use alliance_core::{Cart, CartItem, GuestContact, OrderId, PaymentOutcome, PaymentStatus};

use super::CheckoutError;
use crate::db::CheckoutStore;
use crate::models::{GuestOrder, NewOrder, PaymentTransition};

/// Owns guest orders until they are provisioned.
#[derive(Clone)]
pub struct OrderLedger {
    store: Arc<dyn CheckoutStore>,
    order_ttl: TimeDelta,
}

impl OrderLedger {
    #[must_use]
    pub fn new(store: Arc<dyn CheckoutStore>, order_ttl: TimeDelta) -> Self {
        Self { store, order_ttl }
    }

    /// Record a new pending order. Totals are computed from the lines.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Validation` for an invalid cart; nothing is stored.
    pub async fn create_order(
        &self,
        items: Vec<CartItem>,
        contact: GuestContact,
    ) -> Result<GuestOrder, CheckoutError> {
        self.create_order_at(items, contact, Utc::now()).await
    }

    /// [`Self::create_order`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Validation` for an invalid cart; nothing is stored.
    #[instrument(skip(self, items, contact), fields(lines = items.len()))]
    pub async fn create_order_at(
        &self,
        items: Vec<CartItem>,
        contact: GuestContact,
        now: DateTime<Utc>,
    ) -> Result<GuestOrder, CheckoutError> {
        let cart = Cart::new(items)?;
        let order = NewOrder {
            id: OrderId::generate(),
            totals: cart.totals(),
            contact,
            cart,
            order_expires_at: now + self.order_ttl,
            created_at: now,
        };

        let order = self.store.insert_order(&order).await?;
        info!(order_id = %order.id, "Guest order created");
        Ok(order)
    }

    /// # Errors
    ///
    /// Returns `CheckoutError::NotFoundOrExpired` if the order does not exist.
    pub async fn get(&self, id: OrderId) -> Result<GuestOrder, CheckoutError> {
        self.store
            .get_order(id)
            .await?
            .ok_or(CheckoutError::NotFoundOrExpired)
    }

    /// Count a payment attempt. Informational only; never changes status.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::NotFoundOrExpired` if the order does not exist.
    #[instrument(skip(self), fields(order_id = %id))]
    pub async fn mark_payment_attempt(&self, id: OrderId) -> Result<GuestOrder, CheckoutError> {
        self.store
            .record_payment_attempt(id, Utc::now())
            .await?
            .ok_or(CheckoutError::NotFoundOrExpired)
    }

    /// Apply a gateway callback.
    ///
    /// Replaying the outcome an order already carries is a no-op; any other
    /// outcome for a settled order is a `StateConflict`.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::StateConflict` for a contradictory outcome and
    /// `CheckoutError::NotFoundOrExpired` for an unknown order.
    pub async fn apply_payment_result(
        &self,
        id: OrderId,
        outcome: PaymentOutcome,
        provider_ref: Option<&str>,
    ) -> Result<PaymentTransition, CheckoutError> {
        self.apply_payment_result_at(id, outcome, provider_ref, Utc::now())
            .await
    }

    /// [`Self::apply_payment_result`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Self::apply_payment_result`].
    #[instrument(skip(self, provider_ref), fields(order_id = %id, outcome = ?outcome))]
    pub async fn apply_payment_result_at(
        &self,
        id: OrderId,
        outcome: PaymentOutcome,
        provider_ref: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<PaymentTransition, CheckoutError> {
        let target = PaymentStatus::from(outcome);

        if let Some(order) = self
            .store
            .transition_payment(id, target, provider_ref, now)
            .await?
        {
            info!(status = %target, "Payment result applied");
            return Ok(PaymentTransition::Applied(order));
        }

        // Guard missed: the order is unknown or already settled.
        let order = self
            .store
            .get_order(id)
            .await?
            .ok_or(CheckoutError::NotFoundOrExpired)?;

        if order.payment_status == target {
            info!(status = %target, "Duplicate payment callback ignored");
            return Ok(PaymentTransition::AlreadyApplied(order));
        }

        warn!(
            anomaly = "contradictory_payment_result",
            current = %order.payment_status,
            attempted = %target,
            "Payment result contradicts settled order"
        );
        Err(CheckoutError::StateConflict(format!(
            "order is already {}, cannot apply {target}",
            order.payment_status
        )))
    }

    /// Abandon every pending order past its expiry. Returns the ids moved.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::TransientStore` if the store is unreachable.
    #[instrument(skip(self))]
    pub async fn sweep_abandoned(&self, now: DateTime<Utc>) -> Result<Vec<OrderId>, CheckoutError> {
        let moved = self.store.abandon_expired(now).await?;
        if !moved.is_empty() {
            info!(count = moved.len(), "Abandoned expired orders");
        }
        Ok(moved)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use alliance_core::{DualPrice, ServiceId, ValidationError};
    use rust_decimal::Decimal;

    fn ledger() -> OrderLedger {
        OrderLedger::new(Arc::new(MemoryStore::new()), TimeDelta::hours(24))
    }

    fn item(id: &str, myr: i64, usd: i64) -> CartItem {
        CartItem {
            service_id: ServiceId::parse(id).unwrap(),
            name: format!("Service {id}"),
            category: None,
            price: DualPrice::new(Decimal::from(myr), Decimal::from(usd)),
        }
    }

    fn contact() -> GuestContact {
        GuestContact::new("buyer@example.com", "Tan Wei").unwrap()
    }

    #[tokio::test]
    async fn test_totals_are_computed_server_side() {
        let order = ledger()
            .create_order(vec![item("bazi", 800, 180), item("feng_shui", 1200, 270)], contact())
            .await
            .unwrap();

        assert_eq!(order.totals, DualPrice::new(Decimal::from(2000), Decimal::from(450)));
        assert_eq!(order.payment_status, PaymentStatus::Pending);
        assert_eq!(order.order_expires_at, order.created_at + TimeDelta::hours(24));
    }

    #[tokio::test]
    async fn test_empty_cart_is_rejected() {
        let err = ledger().create_order(vec![], contact()).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(ValidationError::EmptyCart)));
    }

    #[tokio::test]
    async fn test_attempts_do_not_change_status() {
        let ledger = ledger();
        let order = ledger.create_order(vec![item("bazi", 800, 180)], contact()).await.unwrap();

        ledger.mark_payment_attempt(order.id).await.unwrap();
        let order = ledger.mark_payment_attempt(order.id).await.unwrap();

        assert_eq!(order.payment_attempts, 2);
        assert!(order.last_payment_attempt_at.is_some());
        assert_eq!(order.payment_status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_order_is_not_found() {
        let err = ledger()
            .apply_payment_result(OrderId::generate(), PaymentOutcome::Succeeded, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::NotFoundOrExpired));
    }
}
