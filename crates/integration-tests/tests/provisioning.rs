//! Integration tests for magic-link provisioning.
//!
//! These tests verify that a claim writes the whole account or nothing,
//! and that an order is provisioned at most once no matter how many
//! claims race for it.

#![allow(clippy::unwrap_used)]

use alliance_checkout::db::Fault;
use alliance_checkout::models::sync::event;
use alliance_checkout::services::CheckoutError;
use alliance_core::{Email, ProfileState, SyncStatus, UserId};
use alliance_integration_tests::{TestContext, item, mapping};

// =============================================================================
// Happy Path
// =============================================================================

#[tokio::test]
async fn test_first_claim_provisions_everything() {
    let ctx = TestContext::new();
    ctx.seed_plans(vec![mapping("bazi", "PREMIUM", 1)]).await;
    let (order, token) = ctx
        .paid_order(vec![item("bazi", 800, 180)], "buyer@example.com")
        .await;

    let provisioned = ctx
        .provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap();

    assert!(provisioned.profile_created);
    assert_eq!(provisioned.order_id, order.id);
    assert_eq!(provisioned.subscriptions.len(), 1);
    assert_eq!(ctx.store.payment_count().await, 1);
    assert_eq!(ctx.identity.created_count(), 1);

    let claimed = ctx.ledger.get(order.id).await.unwrap();
    assert!(claimed.account_created);
    assert_eq!(claimed.user_id, Some(provisioned.user_id));

    let log = ctx.store.sync_log().await;
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|e| e.status == SyncStatus::Pending));
    assert!(
        log.iter()
            .any(|e| e.event_type == event::ACCOUNT_PROVISIONED
                && e.source_ref == order.id.to_string())
    );
    assert!(log.iter().any(|e| e.event_type == event::SUBSCRIPTION_CREATED
        && e.source_ref == provisioned.subscriptions[0].id.to_string()));
}

#[tokio::test]
async fn test_provisioned_account_is_visible_to_support() {
    let ctx = TestContext::new();
    let (_, token) = ctx
        .paid_order(vec![item("bazi", 800, 180), item("fengshui", 1200, 270)], "buyer@example.com")
        .await;
    let provisioned = ctx
        .provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap();

    let email = Email::parse("buyer@example.com").unwrap();
    let account = ctx.support.account_by_email(&email).await.unwrap().unwrap();
    assert_eq!(account.profile.user_id, provisioned.user_id);
    assert_eq!(account.profile.profile_state, ProfileState::Draft);
    assert_eq!(account.subscriptions.len(), 2);
    assert_eq!(account.payments.len(), 1);
    assert_eq!(account.payments[0].transaction_id.as_deref(), Some("pi_test"));

    let orders = ctx.support.orders_by_email(&email).await.unwrap();
    assert_eq!(orders.len(), 1);
}

#[tokio::test]
async fn test_returning_buyer_reuses_identity_and_profile() {
    let ctx = TestContext::new();
    let (_, first) = ctx
        .paid_order(vec![item("bazi", 800, 180)], "buyer@example.com")
        .await;
    let (_, second) = ctx
        .paid_order(vec![item("fengshui", 1200, 270)], "buyer@example.com")
        .await;

    let a = ctx
        .provisioner
        .validate_and_provision_at(first.as_str(), ctx.now)
        .await
        .unwrap();
    let b = ctx
        .provisioner
        .validate_and_provision_at(second.as_str(), ctx.now)
        .await
        .unwrap();

    assert_eq!(a.user_id, b.user_id);
    assert!(a.profile_created);
    assert!(!b.profile_created);
    assert_eq!(ctx.store.profile_count().await, 1);
    assert_eq!(ctx.store.subscription_count().await, 2);
    assert_eq!(ctx.store.payment_count().await, 2);
}

#[tokio::test]
async fn test_existing_identity_is_adopted() {
    let ctx = TestContext::new();
    let email = Email::parse("member@example.com").unwrap();
    let known = UserId::generate();
    ctx.identity.insert(email.clone(), known);

    let (_, token) = ctx
        .paid_order(vec![item("bazi", 800, 180)], "member@example.com")
        .await;
    let provisioned = ctx
        .provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap();

    assert_eq!(provisioned.user_id, known);
    assert_eq!(ctx.identity.created_count(), 0);
}

// =============================================================================
// Link Validity
// =============================================================================

#[tokio::test]
async fn test_second_claim_conflicts_and_writes_nothing() {
    let ctx = TestContext::new();
    let (_, token) = ctx
        .paid_order(vec![item("bazi", 800, 180)], "buyer@example.com")
        .await;
    ctx.provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap();

    let err = ctx
        .provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::StateConflict(_)));
    assert_eq!(ctx.store.subscription_count().await, 1);
    assert_eq!(ctx.store.sync_log().await.len(), 2);
}

#[tokio::test]
async fn test_link_expires_after_ttl() {
    let ctx = TestContext::new();
    let (order, token) = ctx
        .paid_order(vec![item("bazi", 800, 180)], "buyer@example.com")
        .await;

    let too_late = ctx.now + ctx.settings.magic_link_ttl;
    let err = ctx
        .provisioner
        .validate_and_provision_at(token.as_str(), too_late)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::NotFoundOrExpired));

    // A fresh link brings the order back.
    let (_, fresh) = ctx.provisioner.issue_at(order.id, too_late).await.unwrap();
    ctx.provisioner
        .validate_and_provision_at(fresh.as_str(), too_late)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reissue_revokes_previous_link() {
    let ctx = TestContext::new();
    let (order, old) = ctx
        .paid_order(vec![item("bazi", 800, 180)], "buyer@example.com")
        .await;
    let (_, new) = ctx.provisioner.issue_at(order.id, ctx.now).await.unwrap();
    assert_ne!(old, new);

    let err = ctx
        .provisioner
        .validate_and_provision_at(old.as_str(), ctx.now)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::NotFoundOrExpired));
}

#[tokio::test]
async fn test_no_reissue_after_provisioning() {
    let ctx = TestContext::new();
    let (order, token) = ctx
        .paid_order(vec![item("bazi", 800, 180)], "buyer@example.com")
        .await;
    ctx.provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap();

    let err = ctx.provisioner.issue_at(order.id, ctx.now).await.unwrap_err();
    assert!(matches!(err, CheckoutError::StateConflict(_)));
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failed_payment_insert_rolls_back_everything() {
    let ctx = TestContext::new();
    let (order, token) = ctx
        .paid_order(vec![item("bazi", 800, 180)], "buyer@example.com")
        .await;

    ctx.store.inject_fault(Fault::PaymentInsert);
    let err = ctx
        .provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap_err();
    assert!(err.is_retryable());

    assert_eq!(ctx.store.profile_count().await, 0);
    assert_eq!(ctx.store.subscription_count().await, 0);
    assert_eq!(ctx.store.payment_count().await, 0);
    assert!(ctx.store.sync_log().await.is_empty());
    assert!(!ctx.ledger.get(order.id).await.unwrap().account_created);

    // Same link works once the store recovers.
    ctx.store.clear_faults();
    ctx.provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap();
    assert_eq!(ctx.store.payment_count().await, 1);
}

#[tokio::test]
async fn test_failed_sync_append_rolls_back_everything() {
    let ctx = TestContext::new();
    let (order, token) = ctx
        .paid_order(vec![item("bazi", 800, 180)], "buyer@example.com")
        .await;

    ctx.store.inject_fault(Fault::SyncAppend);
    ctx.provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap_err();

    assert_eq!(ctx.store.payment_count().await, 0);
    assert!(!ctx.ledger.get(order.id).await.unwrap().account_created);
}

#[tokio::test]
async fn test_identity_outage_is_retryable() {
    let ctx = TestContext::new();
    let (order, token) = ctx
        .paid_order(vec![item("bazi", 800, 180)], "buyer@example.com")
        .await;

    ctx.identity.set_failing(true);
    let err = ctx
        .provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::Identity(_)));
    assert!(err.is_retryable());
    assert!(!ctx.ledger.get(order.id).await.unwrap().account_created);

    ctx.identity.set_failing(false);
    ctx.provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap();
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_provision_once() {
    const CLAIMS: usize = 8;

    let ctx = TestContext::new();
    let (order, token) = ctx
        .paid_order(vec![item("bazi", 800, 180), item("fengshui", 1200, 270)], "buyer@example.com")
        .await;

    let handles: Vec<_> = (0..CLAIMS)
        .map(|_| {
            let provisioner = ctx.provisioner.clone();
            let token = token.as_str().to_string();
            let now = ctx.now;
            tokio::spawn(async move { provisioner.validate_and_provision_at(&token, now).await })
        })
        .collect();

    let mut succeeded = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(CheckoutError::StateConflict(_)) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(conflicts, CLAIMS - 1);
    assert_eq!(ctx.store.profile_count().await, 1);
    assert_eq!(ctx.store.subscription_count().await, 2);
    assert_eq!(ctx.store.payment_count().await, 1);
    // account.provisioned plus one subscription.created per line.
    assert_eq!(ctx.store.sync_log().await.len(), 3);
    assert!(ctx.ledger.get(order.id).await.unwrap().account_created);
}
