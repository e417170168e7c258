//! Integration tests for resume links.

#![allow(clippy::unwrap_used)]

use alliance_checkout::services::{CheckoutError, NotificationKind};
use alliance_core::{Email, LinkToken, PaymentOutcome};
use alliance_integration_tests::{TestContext, contact, item};

#[tokio::test]
async fn test_resume_token_resolves_pending_order() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(vec![item("bazi", 800, 180)], "a@example.com").await;

    let (_, token) = ctx.resume.issue_at(order.id, ctx.now).await.unwrap();
    let resumed = ctx.resume.resolve_at(token.as_str(), ctx.now).await.unwrap();

    assert_eq!(resumed.id, order.id);
    assert_eq!(resumed.cart, order.cart);
}

#[tokio::test]
async fn test_reissue_keeps_the_first_token() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(vec![item("bazi", 800, 180)], "a@example.com").await;

    let (_, first) = ctx.resume.issue_at(order.id, ctx.now).await.unwrap();
    let (_, second) = ctx.resume.issue_at(order.id, ctx.after_hours(1)).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_tokens_are_unique_per_order() {
    let ctx = TestContext::new();
    let a = ctx.pending_order(vec![item("bazi", 800, 180)], "a@example.com").await;
    let b = ctx.pending_order(vec![item("bazi", 800, 180)], "a@example.com").await;

    let (_, ta) = ctx.resume.issue_at(a.id, ctx.now).await.unwrap();
    let (_, tb) = ctx.resume.issue_at(b.id, ctx.now).await.unwrap();
    assert_ne!(ta, tb);
}

#[tokio::test]
async fn test_settled_order_stops_resolving() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(vec![item("bazi", 800, 180)], "a@example.com").await;
    let (_, token) = ctx.resume.issue_at(order.id, ctx.now).await.unwrap();

    ctx.ledger
        .apply_payment_result_at(order.id, PaymentOutcome::Failed, None, ctx.now)
        .await
        .unwrap();

    let err = ctx.resume.resolve_at(token.as_str(), ctx.now).await.unwrap_err();
    assert!(matches!(err, CheckoutError::NotFoundOrExpired));
}

#[tokio::test]
async fn test_expired_order_stops_resolving_before_sweep() {
    let ctx = TestContext::new();
    let order = ctx.pending_order(vec![item("bazi", 800, 180)], "a@example.com").await;
    let (_, token) = ctx.resume.issue_at(order.id, ctx.now).await.unwrap();

    // Past expiry but not yet swept: still pending in storage.
    let err = ctx
        .resume
        .resolve_at(token.as_str(), ctx.after_hours(25))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::NotFoundOrExpired));

    let err = ctx.resume.issue_at(order.id, ctx.after_hours(25)).await.unwrap_err();
    assert!(matches!(err, CheckoutError::NotFoundOrExpired));
}

#[tokio::test]
async fn test_malformed_and_unknown_tokens_look_the_same() {
    let ctx = TestContext::new();
    let unknown = LinkToken::generate();
    let candidates = [
        String::new(),
        "short".to_string(),
        "x".repeat(200),
        unknown.as_str().to_string(),
    ];
    for token in &candidates {
        let err = ctx.resume.resolve_at(token, ctx.now).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFoundOrExpired), "token {token:?}");
    }
}

#[tokio::test]
async fn test_recovery_notification_carries_stored_token() {
    let ctx = TestContext::new();
    let started = ctx
        .checkout
        .start(vec![item("bazi", 800, 180)], contact("a@example.com"))
        .await
        .unwrap();
    ctx.checkout.send_recovery(started.order.id).await.unwrap();

    let email = Email::parse("a@example.com").unwrap();
    let sent = ctx
        .notifier
        .last_for(&email, NotificationKind::Resume)
        .unwrap();
    assert_eq!(Some(&sent.token), started.order.resume_token.as_ref());
    assert_eq!(sent.link, started.resume_link);
}
