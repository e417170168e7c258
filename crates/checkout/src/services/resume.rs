//! Resume links for abandoned checkouts.
//!
//! A resume token is only as valid as its order: once the order leaves
//! `pending` or passes its expiry, the token resolves to nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use alliance_core::{LinkToken, OrderId};

use super::CheckoutError;
use crate::db::CheckoutStore;
use crate::models::GuestOrder;

#[derive(Clone)]
pub struct ResumeTokenService {
    store: Arc<dyn CheckoutStore>,
}

impl ResumeTokenService {
    #[must_use]
    pub fn new(store: Arc<dyn CheckoutStore>) -> Self {
        Self { store }
    }

    /// Token for a pending order. Reissuing returns the token already stored.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::NotFoundOrExpired` if the order is unknown,
    /// settled, or expired.
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
        let candidate = LinkToken::generate();
        let order = self
            .store
            .ensure_resume_token(order_id, &candidate, now)
            .await?
            .ok_or(CheckoutError::NotFoundOrExpired)?;

        let token = order
            .resume_token
            .clone()
            .ok_or_else(|| CheckoutError::StateConflict("resume token was not stored".into()))?;
        debug!(reused = token != candidate, "Resume token issued");
        Ok((order, token))
    }

    /// The order behind a resume token, if it can still be paid.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::NotFoundOrExpired` for a malformed or unknown
    /// token, or for an order that is no longer pending.
    pub async fn resolve(&self, token: &str) -> Result<GuestOrder, CheckoutError> {
        self.resolve_at(token, Utc::now()).await
    }

    /// [`Self::resolve`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Self::resolve`].
    #[instrument(skip_all)]
    pub async fn resolve_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<GuestOrder, CheckoutError> {
        let token = LinkToken::parse(token).ok_or(CheckoutError::NotFoundOrExpired)?;
        let order = self
            .store
            .find_by_resume_token(&token)
            .await?
            .ok_or(CheckoutError::NotFoundOrExpired)?;

        if !order.is_resumable_at(now) {
            debug!(
                order_id = %order.id,
                status = %order.payment_status,
                "Resume token for settled or expired order"
            );
            return Err(CheckoutError::NotFoundOrExpired);
        }
        Ok(order)
    }
}
