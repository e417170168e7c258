//! Sync reconciler: pushes outbox entries to the entitlement system.
//!
//! Every outcome is a new entry superseding the stream's head. Two sweeps
//! racing on the same head both push (the target deduplicates by
//! `source_ref`), but only one of them can append the successor; the other
//! sees a conflict and skips.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use alliance_core::SyncStatus;

use super::CheckoutError;
use super::entitlement::{EntitlementTarget, TargetError};
use crate::db::{CheckoutStore, RepositoryError};
use crate::models::{NewSyncEntry, SyncEntry, SyncHealth, SyncPolicy};

/// Number of escalated heads included in a health snapshot.
pub const RECENT_ERROR_LIMIT: u32 = 10;

/// Counts from one reconcile sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub escalated: usize,
    /// Heads another sweep settled first.
    pub skipped: usize,
    /// Heads left untouched because no target is configured.
    pub deferred: usize,
}

#[derive(Clone)]
pub struct SyncReconciler {
    store: Arc<dyn CheckoutStore>,
    target: Arc<dyn EntitlementTarget>,
    policy: SyncPolicy,
}

impl SyncReconciler {
    #[must_use]
    pub fn new(
        store: Arc<dyn CheckoutStore>,
        target: Arc<dyn EntitlementTarget>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            store,
            target,
            policy,
        }
    }

    /// Append a new state for a stream. With a head present the entry
    /// supersedes it; otherwise it starts the stream. Recording `pending`
    /// requeues the stream with a fresh retry budget.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::StateConflict` if a concurrent writer appended first.
    #[instrument(skip(self, payload))]
    pub async fn record(
        &self,
        event_type: &str,
        source_ref: &str,
        status: SyncStatus,
        payload: Option<serde_json::Value>,
    ) -> Result<SyncEntry, CheckoutError> {
        let now = Utc::now();
        let entry = match self.store.stream_head(event_type, source_ref).await? {
            Some(head) => {
                let mut next = NewSyncEntry::following(&head, status, now);
                if let Some(payload) = payload {
                    next.payload = payload;
                }
                if status == SyncStatus::Pending {
                    next.retry_count = 0;
                }
                next
            }
            None => NewSyncEntry {
                status,
                ..NewSyncEntry::pending(
                    event_type,
                    source_ref,
                    payload.unwrap_or_else(|| serde_json::json!({})),
                    now,
                )
            },
        };
        Ok(self.store.append_sync(&entry).await?)
    }

    /// Push every due pending head once.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::TransientStore` if the store is unreachable.
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport, CheckoutError> {
        self.reconcile_pending_at(Utc::now()).await
    }

    /// [`Self::reconcile_pending`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// See [`Self::reconcile_pending`].
    #[instrument(skip(self))]
    pub async fn reconcile_pending_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport, CheckoutError> {
        let heads = self.store.due_heads(now, &self.policy).await?;
        let mut report = ReconcileReport {
            examined: heads.len(),
            ..ReconcileReport::default()
        };

        for (idx, head) in heads.iter().enumerate() {
            let next = match self.target.push(head).await {
                Ok(target_ref) => {
                    let mut next = NewSyncEntry::following(head, SyncStatus::Succeeded, now);
                    next.target_ref = Some(target_ref);
                    next
                }
                Err(TargetError::Unconfigured) => {
                    report.deferred = heads.len() - idx;
                    break;
                }
                Err(e) => self.failed(head, &e, now),
            };

            match self.store.append_sync(&next).await {
                Ok(_) => match next.status {
                    SyncStatus::Succeeded => report.succeeded += 1,
                    SyncStatus::Pending => report.retried += 1,
                    SyncStatus::Error => report.escalated += 1,
                },
                Err(RepositoryError::Conflict(_)) => report.skipped += 1,
                Err(e) => return Err(e.into()),
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                succeeded = report.succeeded,
                retried = report.retried,
                escalated = report.escalated,
                skipped = report.skipped,
                deferred = report.deferred,
                "Sync reconcile sweep finished"
            );
        }
        Ok(report)
    }

    fn failed(&self, head: &SyncEntry, err: &TargetError, now: DateTime<Utc>) -> NewSyncEntry {
        let retry_count = head.retry_count.saturating_add(1);
        let exhausted =
            u32::try_from(retry_count).is_ok_and(|n| n >= self.policy.retry_ceiling);

        let status = if exhausted {
            error!(
                anomaly = "sync_escalated",
                entry_id = ?head.id,
                event_type = %head.event_type,
                source_ref = %head.source_ref,
                retry_count,
                error = %err,
                "Sync entry exceeded retry ceiling"
            );
            SyncStatus::Error
        } else {
            warn!(
                entry_id = ?head.id,
                event_type = %head.event_type,
                retry_count,
                error = %err,
                "Sync push failed, will retry"
            );
            SyncStatus::Pending
        };

        let mut next = NewSyncEntry::following(head, status, now);
        next.retry_count = retry_count;
        next.last_error = Some(err.to_string());
        next
    }

    /// Aggregate view over stream heads. Read-only.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::TransientStore` if the store is unreachable.
    pub async fn health_snapshot(&self) -> Result<SyncHealth, CheckoutError> {
        Ok(self.store.sync_health(RECENT_ERROR_LIMIT).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::db::{MemoryStore, SyncLogStore};
    use crate::services::entitlement::LogTarget;

    #[tokio::test]
    async fn test_record_appends_instead_of_editing() {
        let store = Arc::new(MemoryStore::new());
        let sync = SyncReconciler::new(store.clone(), Arc::new(LogTarget), SyncPolicy::default());

        let first = sync
            .record("subscription.cancelled", "sub-9", SyncStatus::Pending, None)
            .await
            .unwrap();
        let second = sync
            .record("subscription.cancelled", "sub-9", SyncStatus::Error, None)
            .await
            .unwrap();

        assert_eq!(second.supersedes_id, Some(first.id));
        let history = store
            .stream_history("subscription.cancelled", "sub-9")
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_unconfigured_target_defers_everything() {
        let store = Arc::new(MemoryStore::new());
        let sync = SyncReconciler::new(store.clone(), Arc::new(LogTarget), SyncPolicy::default());
        sync.record("account.provisioned", "order-1", SyncStatus::Pending, None)
            .await
            .unwrap();

        let later = Utc::now() + chrono::TimeDelta::hours(1);
        let report = sync.reconcile_pending_at(later).await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.deferred, 1);
        assert_eq!(store.sync_log().await.len(), 1);
    }
}
