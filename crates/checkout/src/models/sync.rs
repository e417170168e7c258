//! Sync log entries: the outbox between the commerce ledger and the
//! entitlement system.
//!
//! The log is append-only. Entries sharing `(event_type, source_ref)` form a
//! stream; each new attempt supersedes the previous entry instead of editing
//! it, and only the newest entry of a stream (its head) is acted upon.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use alliance_core::{SyncEntryId, SyncStatus};

/// Event type names.
pub mod event {
    pub const ACCOUNT_PROVISIONED: &str = "account.provisioned";
    pub const SUBSCRIPTION_CREATED: &str = "subscription.created";
    pub const SUBSCRIPTION_UPDATED: &str = "subscription.updated";
    pub const SUBSCRIPTION_CANCELLED: &str = "subscription.cancelled";
    pub const SUBSCRIPTION_REACTIVATED: &str = "subscription.reactivated";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncEntry {
    pub id: SyncEntryId,
    pub event_type: String,
    pub source_ref: String,
    pub target_ref: Option<String>,
    pub status: SyncStatus,
    pub last_error: Option<String>,
    pub retry_count: i32,
    pub payload: serde_json::Value,
    /// Entry this one replaces within its stream.
    pub supersedes_id: Option<SyncEntryId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSyncEntry {
    pub event_type: String,
    pub source_ref: String,
    pub target_ref: Option<String>,
    pub status: SyncStatus,
    pub last_error: Option<String>,
    pub retry_count: i32,
    pub payload: serde_json::Value,
    pub supersedes_id: Option<SyncEntryId>,
    pub created_at: DateTime<Utc>,
}

impl NewSyncEntry {
    /// First entry of a fresh stream, waiting to be pushed.
    #[must_use]
    pub fn pending(
        event_type: &str,
        source_ref: impl Into<String>,
        payload: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: event_type.to_owned(),
            source_ref: source_ref.into(),
            target_ref: None,
            status: SyncStatus::Pending,
            last_error: None,
            retry_count: 0,
            payload,
            supersedes_id: None,
            created_at: now,
        }
    }

    /// Successor of `head`, inheriting its stream, payload and retry count.
    #[must_use]
    pub fn following(head: &SyncEntry, status: SyncStatus, now: DateTime<Utc>) -> Self {
        Self {
            event_type: head.event_type.clone(),
            source_ref: head.source_ref.clone(),
            target_ref: head.target_ref.clone(),
            status,
            last_error: None,
            retry_count: head.retry_count,
            payload: head.payload.clone(),
            supersedes_id: Some(head.id),
            created_at: now,
        }
    }
}

/// Retry schedule for pending heads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Failed pushes after which a stream is escalated to `error`.
    pub retry_ceiling: u32,
    pub batch_size: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_secs(60),
            backoff_max: Duration::from_secs(3600),
            retry_ceiling: 5,
            batch_size: 100,
        }
    }
}

impl SyncPolicy {
    /// Wait before a head with `retry_count` failures is due:
    /// `min(base * 2^retry_count, max)`.
    #[must_use]
    pub fn backoff(&self, retry_count: i32) -> Duration {
        let exponent = u32::try_from(retry_count.max(0)).unwrap_or(0).min(31);
        self.backoff_base
            .checked_mul(1_u32 << exponent)
            .map_or(self.backoff_max, |d| d.min(self.backoff_max))
    }

    /// Whether `head` should be re-attempted at `now`.
    #[must_use]
    pub fn is_due(&self, head: &SyncEntry, now: DateTime<Utc>) -> bool {
        if head.status != SyncStatus::Pending {
            return false;
        }
        let wait = TimeDelta::from_std(self.backoff(head.retry_count)).unwrap_or(TimeDelta::MAX);
        head.created_at
            .checked_add_signed(wait)
            .is_some_and(|due_at| due_at <= now)
    }
}

/// Aggregate view over stream heads.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncHealth {
    pub pending: u64,
    pub succeeded: u64,
    pub error: u64,
    pub oldest_pending_at: Option<DateTime<Utc>>,
    /// Most recent escalated heads, newest first.
    pub recent_errors: Vec<SyncEntry>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn head(retry_count: i32, created_at: DateTime<Utc>) -> SyncEntry {
        SyncEntry {
            id: SyncEntryId::new(1),
            event_type: event::SUBSCRIPTION_CREATED.into(),
            source_ref: "sub-1".into(),
            target_ref: None,
            status: SyncStatus::Pending,
            last_error: None,
            retry_count,
            payload: serde_json::json!({}),
            supersedes_id: None,
            created_at,
        }
    }

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = SyncPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(60));
        assert_eq!(policy.backoff(1), Duration::from_secs(120));
        assert_eq!(policy.backoff(5), Duration::from_secs(1920));
        assert_eq!(policy.backoff(6), Duration::from_secs(3600));
        assert_eq!(policy.backoff(40), Duration::from_secs(3600));
    }

    #[test]
    fn test_due_after_backoff_window() {
        let policy = SyncPolicy::default();
        let t0 = Utc::now();
        let entry = head(1, t0);
        assert!(!policy.is_due(&entry, t0 + TimeDelta::seconds(119)));
        assert!(policy.is_due(&entry, t0 + TimeDelta::seconds(120)));
    }

    #[test]
    fn test_settled_heads_are_never_due() {
        let policy = SyncPolicy::default();
        let t0 = Utc::now();
        let mut entry = head(0, t0);
        entry.status = SyncStatus::Error;
        assert!(!policy.is_due(&entry, t0 + TimeDelta::days(30)));
    }
}
