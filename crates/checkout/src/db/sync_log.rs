//! Sync log repository.
//!
//! A head is an entry no other entry supersedes. The unique index on
//! `supersedes_id` makes "append a successor to this head" a compare-and-set:
//! of two racing appends, one fails with a unique violation.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool};

use alliance_core::{SyncEntryId, SyncStatus};

use super::RepositoryError;
use crate::models::{NewSyncEntry, SyncEntry, SyncHealth, SyncPolicy};

#[derive(Debug, sqlx::FromRow)]
struct SyncRow {
    id: i64,
    event_type: String,
    source_ref: String,
    target_ref: Option<String>,
    sync_status: String,
    last_error: Option<String>,
    retry_count: i32,
    payload: Json<serde_json::Value>,
    supersedes_id: Option<i64>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SyncRow> for SyncEntry {
    type Error = RepositoryError;

    fn try_from(r: SyncRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: SyncEntryId::new(r.id),
            event_type: r.event_type,
            source_ref: r.source_ref,
            target_ref: r.target_ref,
            status: r.sync_status.parse().map_err(RepositoryError::DataCorruption)?,
            last_error: r.last_error,
            retry_count: r.retry_count,
            payload: r.payload.0,
            supersedes_id: r.supersedes_id.map(SyncEntryId::new),
            created_at: r.created_at,
        })
    }
}

macro_rules! sync_columns {
    ($alias:literal) => {
        concat!(
            $alias, ".id, ", $alias, ".event_type, ", $alias, ".source_ref, ",
            $alias, ".target_ref, ", $alias, ".sync_status::text AS sync_status, ",
            $alias, ".last_error, ", $alias, ".retry_count, ", $alias, ".payload, ",
            $alias, ".supersedes_id, ", $alias, ".created_at"
        )
    };
}

/// Heads only: entries without a successor.
const IS_HEAD: &str =
    "NOT EXISTS (SELECT 1 FROM checkout.sync_log n WHERE n.supersedes_id = s.id)";

pub(crate) async fn insert_entry<'e, E: PgExecutor<'e>>(
    exec: E,
    e: &NewSyncEntry,
) -> Result<SyncEntry, RepositoryError> {
    let row = sqlx::query_as::<_, SyncRow>(concat!(
        "INSERT INTO checkout.sync_log AS s
             (event_type, source_ref, target_ref, sync_status, last_error, retry_count,
              payload, supersedes_id, created_at)
         VALUES ($1, $2, $3, $4::checkout.sync_status, $5, $6, $7, $8, $9)
         RETURNING ",
        sync_columns!("s")
    ))
    .bind(&e.event_type)
    .bind(&e.source_ref)
    .bind(e.target_ref.as_deref())
    .bind(e.status.as_str())
    .bind(e.last_error.as_deref())
    .bind(e.retry_count)
    .bind(Json(&e.payload))
    .bind(e.supersedes_id)
    .bind(e.created_at)
    .fetch_one(exec)
    .await
    .map_err(|err| RepositoryError::from_unique(err, "successor for sync entry"))?;

    row.try_into()
}

/// Repository for the sync log.
pub struct SyncLogRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> SyncLogRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the superseded entry already has a successor.
    pub async fn append(&self, entry: &NewSyncEntry) -> Result<SyncEntry, RepositoryError> {
        insert_entry(self.pool, entry).await
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn head(
        &self,
        event_type: &str,
        source_ref: &str,
    ) -> Result<Option<SyncEntry>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM checkout.sync_log s
             WHERE s.event_type = $1 AND s.source_ref = $2 AND {IS_HEAD}
             ORDER BY s.id DESC LIMIT 1",
            sync_columns!("s")
        );
        let row = sqlx::query_as::<_, SyncRow>(&sql)
            .bind(event_type)
            .bind(source_ref)
            .fetch_optional(self.pool)
            .await?;

        row.map(SyncEntry::try_from).transpose()
    }

    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn history(
        &self,
        event_type: &str,
        source_ref: &str,
    ) -> Result<Vec<SyncEntry>, RepositoryError> {
        let rows = sqlx::query_as::<_, SyncRow>(concat!(
            "SELECT ",
            sync_columns!("s"),
            " FROM checkout.sync_log s
             WHERE s.event_type = $1 AND s.source_ref = $2
             ORDER BY s.id"
        ))
        .bind(event_type)
        .bind(source_ref)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter().map(SyncEntry::try_from).collect()
    }

    /// Pending heads past their backoff window.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn due_heads(
        &self,
        now: DateTime<Utc>,
        policy: &SyncPolicy,
    ) -> Result<Vec<SyncEntry>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM checkout.sync_log s
             WHERE s.sync_status = 'pending' AND {IS_HEAD}
               AND s.created_at
                   + LEAST($2 * power(2, LEAST(s.retry_count, 31)), $3) * interval '1 second'
                   <= $1
             ORDER BY s.created_at, s.id
             LIMIT $4",
            sync_columns!("s")
        );
        let rows = sqlx::query_as::<_, SyncRow>(&sql)
            .bind(now)
            .bind(policy.backoff_base.as_secs_f64())
            .bind(policy.backoff_max.as_secs_f64())
            .bind(i64::from(policy.batch_size))
            .fetch_all(self.pool)
            .await?;

        rows.into_iter().map(SyncEntry::try_from).collect()
    }

    /// Head counts by status, plus the most recent escalations.
    ///
    /// Plain reads: never takes row locks, so writers are not blocked.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn health(&self, recent_errors: u32) -> Result<SyncHealth, RepositoryError> {
        let sql = format!(
            "SELECT s.sync_status::text, COUNT(*), MIN(s.created_at)
             FROM checkout.sync_log s
             WHERE {IS_HEAD}
             GROUP BY s.sync_status"
        );
        let counts = sqlx::query_as::<_, (String, i64, Option<DateTime<Utc>>)>(&sql)
            .fetch_all(self.pool)
            .await?;

        let mut health = SyncHealth::default();
        for (status, count, oldest) in counts {
            let count = u64::try_from(count).unwrap_or(0);
            match status.parse().map_err(RepositoryError::DataCorruption)? {
                SyncStatus::Pending => {
                    health.pending = count;
                    health.oldest_pending_at = oldest;
                }
                SyncStatus::Succeeded => health.succeeded = count,
                SyncStatus::Error => health.error = count,
            }
        }

        let sql = format!(
            "SELECT {} FROM checkout.sync_log s
             WHERE s.sync_status = 'error' AND {IS_HEAD}
             ORDER BY s.created_at DESC, s.id DESC
             LIMIT $1",
            sync_columns!("s")
        );
        let rows = sqlx::query_as::<_, SyncRow>(&sql)
            .bind(i64::from(recent_errors))
            .fetch_all(self.pool)
            .await?;
        health.recent_errors = rows
            .into_iter()
            .map(SyncEntry::try_from)
            .collect::<Result<_, _>>()?;

        Ok(health)
    }
}
