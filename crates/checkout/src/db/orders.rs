//! Guest order repository.
//!
//! Queries are runtime-checked (`sqlx::query_as`) so the crate builds
//! without a database. Enum columns travel as text and are cast at the
//! SQL boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use alliance_core::{
    Cart, CartItem, DualPrice, Email, GuestContact, LinkToken, OrderId, PaymentStatus, UserId,
};

use super::RepositoryError;
use crate::models::{GuestOrder, NewOrder};

/// Column list shared by every query returning a full order.
macro_rules! order_columns {
    () => {
        "id, guest_email, guest_name, guest_phone, locale::text AS locale, \
         preferred_currency::text AS preferred_currency, cart_items, total_myr, total_usd, \
         payment_status::text AS payment_status, payment_attempts, last_payment_attempt_at, \
         provider_ref, resume_token, order_expires_at, magic_link_token, magic_link_sent_at, \
         account_created, user_id, created_at, updated_at"
    };
}
pub(crate) use order_columns;

/// Raw `checkout.guest_order` row.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OrderRow {
    id: Uuid,
    guest_email: String,
    guest_name: String,
    guest_phone: Option<String>,
    locale: String,
    preferred_currency: String,
    cart_items: Json<Vec<CartItem>>,
    total_myr: Decimal,
    total_usd: Decimal,
    payment_status: String,
    payment_attempts: i32,
    last_payment_attempt_at: Option<DateTime<Utc>>,
    provider_ref: Option<String>,
    resume_token: Option<String>,
    order_expires_at: DateTime<Utc>,
    magic_link_token: Option<String>,
    magic_link_sent_at: Option<DateTime<Utc>>,
    account_created: bool,
    user_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn corrupt(what: &str, e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::DataCorruption(format!("invalid {what} in database: {e}"))
}

fn stored_token(value: Option<String>) -> Result<Option<LinkToken>, RepositoryError> {
    value
        .map(|t| LinkToken::parse(&t).ok_or_else(|| corrupt("link token", "malformed")))
        .transpose()
}

impl TryFrom<OrderRow> for GuestOrder {
    type Error = RepositoryError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        let contact = GuestContact {
            email: Email::parse(&r.guest_email).map_err(|e| corrupt("email", e))?,
            name: r.guest_name,
            phone: r.guest_phone,
            locale: r.locale.parse().map_err(|e| corrupt("locale", e))?,
            preferred_currency: r
                .preferred_currency
                .parse()
                .map_err(|e| corrupt("currency", e))?,
        };

        Ok(Self {
            id: OrderId::new(r.id),
            contact,
            cart: Cart::new(r.cart_items.0).map_err(|e| corrupt("cart", e))?,
            totals: DualPrice::new(r.total_myr, r.total_usd),
            payment_status: r
                .payment_status
                .parse()
                .map_err(|e| corrupt("payment status", e))?,
            payment_attempts: r.payment_attempts,
            last_payment_attempt_at: r.last_payment_attempt_at,
            provider_ref: r.provider_ref,
            resume_token: stored_token(r.resume_token)?,
            order_expires_at: r.order_expires_at,
            magic_link_token: stored_token(r.magic_link_token)?,
            magic_link_sent_at: r.magic_link_sent_at,
            account_created: r.account_created,
            user_id: r.user_id.map(UserId::new),
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

fn convert(row: Option<OrderRow>) -> Result<Option<GuestOrder>, RepositoryError> {
    row.map(GuestOrder::try_from).transpose()
}

/// Repository for guest order database operations.
pub struct OrderRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> OrderRepository<'a> {
    /// Create a new order repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new pending order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the id already exists.
    pub async fn insert(&self, order: &NewOrder) -> Result<GuestOrder, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "INSERT INTO checkout.guest_order
                 (id, guest_email, guest_name, guest_phone, locale, preferred_currency,
                  cart_items, total_myr, total_usd, order_expires_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5::checkout.locale, $6::checkout.currency_code,
                     $7, $8, $9, $10, $11, $11)
             RETURNING ",
            order_columns!()
        ))
        .bind(order.id)
        .bind(order.contact.email.as_str())
        .bind(&order.contact.name)
        .bind(order.contact.phone.as_deref())
        .bind(order.contact.locale.as_str())
        .bind(order.contact.preferred_currency.code())
        .bind(Json(order.cart.items()))
        .bind(order.totals.myr)
        .bind(order.totals.usd)
        .bind(order.order_expires_at)
        .bind(order.created_at)
        .fetch_one(self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "order"))?;

        row.try_into()
    }

    /// Get an order by id.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn get(&self, id: OrderId) -> Result<Option<GuestOrder>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "SELECT ",
            order_columns!(),
            " FROM checkout.guest_order WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        convert(row)
    }

    /// Increment the payment attempt counter.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn record_attempt(
        &self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "UPDATE checkout.guest_order
             SET payment_attempts = payment_attempts + 1,
                 last_payment_attempt_at = $2,
                 updated_at = $2
             WHERE id = $1
             RETURNING ",
            order_columns!()
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(self.pool)
        .await?;

        convert(row)
    }

    /// Move a pending order to a terminal payment status.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn transition(
        &self,
        id: OrderId,
        to: PaymentStatus,
        provider_ref: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "UPDATE checkout.guest_order
             SET payment_status = $2::checkout.payment_status,
                 provider_ref = COALESCE($3, provider_ref),
                 updated_at = $4
             WHERE id = $1 AND payment_status = 'pending'
             RETURNING ",
            order_columns!()
        ))
        .bind(id)
        .bind(to.as_str())
        .bind(provider_ref)
        .bind(at)
        .fetch_optional(self.pool)
        .await?;

        convert(row)
    }

    /// Abandon every pending order past its expiry.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn abandon_expired(&self, now: DateTime<Utc>) -> Result<Vec<OrderId>, RepositoryError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "UPDATE checkout.guest_order
             SET payment_status = 'abandoned', updated_at = $1
             WHERE payment_status = 'pending' AND order_expires_at <= $1
             RETURNING id",
        )
        .bind(now)
        .fetch_all(self.pool)
        .await?;

        Ok(ids.into_iter().map(OrderId::new).collect())
    }

    /// Set the resume token unless one exists.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the token collides with another order's.
    pub async fn ensure_resume_token(
        &self,
        id: OrderId,
        token: &LinkToken,
        now: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "UPDATE checkout.guest_order
             SET resume_token = COALESCE(resume_token, $2), updated_at = $3
             WHERE id = $1 AND payment_status = 'pending' AND order_expires_at > $3
             RETURNING ",
            order_columns!()
        ))
        .bind(id)
        .bind(token.as_str())
        .bind(now)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "resume token"))?;

        convert(row)
    }

    /// Find an order by resume token.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn find_by_resume_token(
        &self,
        token: &LinkToken,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "SELECT ",
            order_columns!(),
            " FROM checkout.guest_order WHERE resume_token = $1"
        ))
        .bind(token.as_str())
        .fetch_optional(self.pool)
        .await?;

        convert(row)
    }

    /// Replace the magic-link token of a paid, unclaimed order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the token collides with another order's.
    pub async fn rotate_magic_link_token(
        &self,
        id: OrderId,
        token: &LinkToken,
        sent_at: DateTime<Utc>,
    ) -> Result<Option<GuestOrder>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(concat!(
            "UPDATE checkout.guest_order
             SET magic_link_token = $2, magic_link_sent_at = $3, updated_at = $3
             WHERE id = $1 AND payment_status = 'succeeded' AND account_created = FALSE
             RETURNING ",
            order_columns!()
        ))
        .bind(id)
        .bind(token.as_str())
        .bind(sent_at)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| RepositoryError::from_unique(e, "magic link token"))?;

        convert(row)
    }

    /// Orders placed with an email, newest first.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn by_email(&self, email: &Email) -> Result<Vec<GuestOrder>, RepositoryError> {
        let rows = sqlx::query_as::<_, OrderRow>(concat!(
            "SELECT ",
            order_columns!(),
            " FROM checkout.guest_order WHERE guest_email = $1 ORDER BY created_at DESC"
        ))
        .bind(email.as_str())
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(GuestOrder::try_from).collect()
    }
}
