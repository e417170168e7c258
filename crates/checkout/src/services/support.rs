//! Read-only lookups for support tooling.

use std::sync::Arc;

use tracing::instrument;

use alliance_core::{Email, UserId};

use super::CheckoutError;
use crate::db::CheckoutStore;
use crate::models::{Account, GuestOrder, Profile};

#[derive(Clone)]
pub struct SupportLookup {
    store: Arc<dyn CheckoutStore>,
}

impl SupportLookup {
    #[must_use]
    pub fn new(store: Arc<dyn CheckoutStore>) -> Self {
        Self { store }
    }

    /// Orders placed with `email`, newest first.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::TransientStore` if the store is unreachable.
    #[instrument(skip_all)]
    pub async fn orders_by_email(&self, email: &Email) -> Result<Vec<GuestOrder>, CheckoutError> {
        Ok(self.store.orders_by_email(email).await?)
    }

    /// # Errors
    ///
    /// Returns `CheckoutError::TransientStore` if the store is unreachable.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn account_by_user_id(
        &self,
        user_id: UserId,
    ) -> Result<Option<Account>, CheckoutError> {
        match self.store.profile(user_id).await? {
            Some(profile) => self.account(profile).await.map(Some),
            None => Ok(None),
        }
    }

    /// # Errors
    ///
    /// Returns `CheckoutError::TransientStore` if the store is unreachable.
    #[instrument(skip_all)]
    pub async fn account_by_email(&self, email: &Email) -> Result<Option<Account>, CheckoutError> {
        match self.store.profile_by_email(email).await? {
            Some(profile) => self.account(profile).await.map(Some),
            None => Ok(None),
        }
    }

    async fn account(&self, profile: Profile) -> Result<Account, CheckoutError> {
        let subscriptions = self.store.subscriptions_for(profile.user_id).await?;
        let payments = self.store.payments_for(profile.user_id).await?;
        Ok(Account {
            profile,
            subscriptions,
            payments,
        })
    }
}
