//! Profile, subscription and payment repository.
//!
//! Write helpers are generic over the executor so the provisioning
//! transaction and plain pool access share one set of statements.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use alliance_core::{
    DualPrice, Email, OrderId, PaymentId, PlanCode, ServiceId, SubscriptionId, UserId,
};

use super::RepositoryError;
use crate::models::{PaymentRecord, Profile, Subscription};

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    user_id: Uuid,
    email: String,
    full_name: String,
    phone: Option<String>,
    locale: String,
    preferred_currency: String,
    profile_state: String,
    completion_pct: i16,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ProfileRow> for Profile {
    type Error = RepositoryError;

    fn try_from(r: ProfileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            user_id: UserId::new(r.user_id),
            email: Email::parse(&r.email).map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
            })?,
            full_name: r.full_name,
            phone: r.phone,
            locale: r.locale.parse().map_err(RepositoryError::DataCorruption)?,
            preferred_currency: r
                .preferred_currency
                .parse()
                .map_err(RepositoryError::DataCorruption)?,
            profile_state: r
                .profile_state
                .parse()
                .map_err(RepositoryError::DataCorruption)?,
            completion_pct: r.completion_pct,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    order_id: Uuid,
    service_id: String,
    service_name: String,
    category: Option<String>,
    plan_code: Option<String>,
    price_myr: Decimal,
    price_usd: Decimal,
    status: String,
    is_bundle: bool,
    started_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = RepositoryError;

    fn try_from(r: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: SubscriptionId::new(r.id),
            user_id: UserId::new(r.user_id),
            order_id: OrderId::new(r.order_id),
            service_id: ServiceId::parse(&r.service_id)
                .ok_or_else(|| RepositoryError::DataCorruption("empty service id".into()))?,
            service_name: r.service_name,
            category: r.category,
            plan_code: r.plan_code.as_deref().and_then(PlanCode::parse),
            price: DualPrice::new(r.price_myr, r.price_usd),
            status: r.status.parse().map_err(RepositoryError::DataCorruption)?,
            is_bundle: r.is_bundle,
            started_at: r.started_at,
            expires_at: r.expires_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    order_id: Uuid,
    amount: Decimal,
    currency: String,
    gateway: String,
    status: String,
    transaction_id: Option<String>,
    paid_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = RepositoryError;

    fn try_from(r: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: PaymentId::new(r.id),
            user_id: UserId::new(r.user_id),
            order_id: OrderId::new(r.order_id),
            amount: r.amount,
            currency: r.currency.parse().map_err(RepositoryError::DataCorruption)?,
            gateway: r.gateway,
            status: r.status,
            transaction_id: r.transaction_id,
            paid_at: r.paid_at,
        })
    }
}

const PROFILE_COLUMNS: &str = "user_id, email, full_name, phone, locale::text AS locale, \
     preferred_currency::text AS preferred_currency, profile_state::text AS profile_state, \
     completion_pct, created_at, updated_at";

pub(crate) async fn fetch_profile<'e, E: PgExecutor<'e>>(
    exec: E,
    user_id: UserId,
) -> Result<Option<Profile>, RepositoryError> {
    let sql = format!("SELECT {PROFILE_COLUMNS} FROM checkout.profile WHERE user_id = $1");
    let row = sqlx::query_as::<_, ProfileRow>(&sql)
        .bind(user_id)
        .fetch_optional(exec)
        .await?;

    row.map(Profile::try_from).transpose()
}

/// Insert a profile; an existing profile for the same user is kept as is.
pub(crate) async fn insert_profile<'e, E: PgExecutor<'e>>(
    exec: E,
    p: &Profile,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO checkout.profile
             (user_id, email, full_name, phone, locale, preferred_currency,
              profile_state, completion_pct, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5::checkout.locale, $6::checkout.currency_code,
                 $7::checkout.profile_state, $8, $9, $10)
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(p.user_id)
    .bind(p.email.as_str())
    .bind(&p.full_name)
    .bind(p.phone.as_deref())
    .bind(p.locale.as_str())
    .bind(p.preferred_currency.code())
    .bind(p.profile_state.as_str())
    .bind(p.completion_pct)
    .bind(p.created_at)
    .bind(p.updated_at)
    .execute(exec)
    .await?;

    Ok(())
}

pub(crate) async fn insert_subscription<'e, E: PgExecutor<'e>>(
    exec: E,
    s: &Subscription,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO checkout.subscription
             (id, user_id, order_id, service_id, service_name, category, plan_code,
              price_myr, price_usd, status, is_bundle, started_at, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                 $10::checkout.subscription_status, $11, $12, $13)",
    )
    .bind(s.id)
    .bind(s.user_id)
    .bind(s.order_id)
    .bind(s.service_id.as_str())
    .bind(&s.service_name)
    .bind(s.category.as_deref())
    .bind(s.plan_code.as_ref().map(PlanCode::as_str))
    .bind(s.price.myr)
    .bind(s.price.usd)
    .bind(s.status.as_str())
    .bind(s.is_bundle)
    .bind(s.started_at)
    .bind(s.expires_at)
    .execute(exec)
    .await
    .map_err(|e| RepositoryError::from_unique(e, "subscription"))?;

    Ok(())
}

pub(crate) async fn insert_payment<'e, E: PgExecutor<'e>>(
    exec: E,
    p: &PaymentRecord,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO checkout.payment
             (id, user_id, order_id, amount, currency, gateway, status, transaction_id, paid_at)
         VALUES ($1, $2, $3, $4, $5::checkout.currency_code, $6, $7, $8, $9)",
    )
    .bind(p.id)
    .bind(p.user_id)
    .bind(p.order_id)
    .bind(p.amount)
    .bind(p.currency.code())
    .bind(&p.gateway)
    .bind(&p.status)
    .bind(p.transaction_id.as_deref())
    .bind(p.paid_at)
    .execute(exec)
    .await
    .map_err(|e| RepositoryError::from_unique(e, "payment for order"))?;

    Ok(())
}

/// Repository for read-only account lookups.
pub struct AccountRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> AccountRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn profile(&self, user_id: UserId) -> Result<Option<Profile>, RepositoryError> {
        fetch_profile(self.pool, user_id).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn profile_by_email(&self, email: &Email) -> Result<Option<Profile>, RepositoryError> {
        let sql = format!(
            "SELECT {PROFILE_COLUMNS} FROM checkout.profile WHERE email = $1 \
             ORDER BY created_at LIMIT 1"
        );
        let row = sqlx::query_as::<_, ProfileRow>(&sql)
            .bind(email.as_str())
            .fetch_optional(self.pool)
            .await?;

        row.map(Profile::try_from).transpose()
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn subscriptions(&self, user_id: UserId) -> Result<Vec<Subscription>, RepositoryError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT id, user_id, order_id, service_id, service_name, category, plan_code,
                    price_myr, price_usd, status::text AS status, is_bundle, started_at, expires_at
             FROM checkout.subscription
             WHERE user_id = $1
             ORDER BY started_at, is_bundle, id",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn payments(&self, user_id: UserId) -> Result<Vec<PaymentRecord>, RepositoryError> {
        let rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT id, user_id, order_id, amount, currency::text AS currency, gateway, status,
                    transaction_id, paid_at
             FROM checkout.payment
             WHERE user_id = $1
             ORDER BY paid_at",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(PaymentRecord::try_from).collect()
    }
}
