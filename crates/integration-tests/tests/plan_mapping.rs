//! Integration tests for service-to-plan mapping.
//!
//! Resolution through the cached mapper, seeding, and the plans that end up
//! on provisioned subscriptions.

#![allow(clippy::unwrap_used)]

use alliance_checkout::db::PlanMappingStore;
use alliance_checkout::models::NewPlanMapping;
use alliance_checkout::services::SeedError;
use alliance_core::{CartItem, DualPrice, PlanCode, ServiceId};
use alliance_integration_tests::{TestContext, bundle, item, mapping};

fn plan(code: &str) -> Option<PlanCode> {
    PlanCode::parse(code)
}

// =============================================================================
// Resolution
// =============================================================================

#[tokio::test]
async fn test_single_service_takes_its_mapped_plan() {
    let ctx = TestContext::new();
    ctx.seed_plans(vec![
        mapping("bazi", "BASIC", 1),
        mapping("bazi", "PREMIUM", 5),
        bundle("bundle_2_services", 2, "ENTERPRISE", 10),
    ])
    .await;

    let res = ctx.mapper.resolve(&[item("bazi", 800, 180)]).await.unwrap();
    assert_eq!(res.lines[0].plan, plan("PREMIUM"));
    assert!(res.bundle.is_none());
    assert_eq!(res.effective_plan(), plan("PREMIUM").as_ref());
}

#[tokio::test]
async fn test_bundle_applies_at_threshold() {
    let ctx = TestContext::new();
    ctx.seed_plans(vec![
        mapping("bazi", "BASIC", 1),
        mapping("fengshui", "BASIC", 1),
        bundle("bundle_2_services", 2, "ENTERPRISE", 10),
    ])
    .await;

    let res = ctx
        .mapper
        .resolve(&[item("bazi", 800, 180), item("fengshui", 1200, 270)])
        .await
        .unwrap();
    let applied = res.bundle.as_ref().unwrap();
    assert_eq!(applied.plan.as_str(), "ENTERPRISE");
    assert!(res.lines.iter().all(|l| l.plan == plan("ENTERPRISE")));
    assert!(res.lines.iter().all(|l| l.base_plan == plan("BASIC")));
}

#[tokio::test]
async fn test_repeated_service_does_not_reach_threshold() {
    let ctx = TestContext::new();
    ctx.seed_plans(vec![
        mapping("bazi", "BASIC", 1),
        bundle("bundle_2_services", 2, "ENTERPRISE", 10),
    ])
    .await;

    let res = ctx
        .mapper
        .resolve(&[item("bazi", 800, 180), item("bazi", 800, 180)])
        .await
        .unwrap();
    assert!(res.bundle.is_none());
}

#[tokio::test]
async fn test_padded_wire_id_counts_as_the_same_service() {
    let ctx = TestContext::new();
    ctx.seed_plans(vec![
        mapping("bazi", "BASIC", 1),
        bundle("bundle_2_services", 2, "ENTERPRISE", 10),
    ])
    .await;

    let items: Vec<CartItem> = serde_json::from_value(serde_json::json!([
        { "service_id": "bazi", "name": "BaZi", "price": { "myr": "800", "usd": "180" } },
        { "service_id": " bazi ", "name": "BaZi", "price": { "myr": "0", "usd": "0" } }
    ]))
    .unwrap();

    let res = ctx.mapper.resolve(&items).await.unwrap();
    assert!(res.bundle.is_none());
    assert!(res.unmapped.is_empty());
    assert!(res.lines.iter().all(|l| l.plan == plan("BASIC")));
}

#[tokio::test]
async fn test_unmapped_service_resolves_to_no_plan() {
    let ctx = TestContext::new();
    ctx.seed_plans(vec![mapping("bazi", "BASIC", 1)]).await;

    let res = ctx
        .mapper
        .resolve(&[item("bazi", 800, 180), item("tarot", 100, 25)])
        .await
        .unwrap();
    assert_eq!(res.lines[1].plan, None);
    assert_eq!(res.unmapped, vec![ServiceId::parse("tarot").unwrap()]);
}

#[tokio::test]
async fn test_table_is_cached_until_invalidated() {
    let ctx = TestContext::new();
    ctx.seed_plans(vec![mapping("bazi", "BASIC", 1)]).await;
    assert_eq!(ctx.mapper.table().await.unwrap().len(), 1);

    // Written behind the mapper's back.
    ctx.store
        .upsert_mapping(&NewPlanMapping {
            service_id: ServiceId::parse("tarot").unwrap(),
            service_name: "Tarot".into(),
            plan_code: PlanCode::parse("BASIC").unwrap(),
            priority: 1,
            active: true,
            bundle_rule: None,
        })
        .await
        .unwrap();
    assert_eq!(ctx.mapper.table().await.unwrap().len(), 1);

    ctx.mapper.invalidate().await;
    assert_eq!(ctx.mapper.table().await.unwrap().len(), 2);
}

// =============================================================================
// Seeding
// =============================================================================

#[tokio::test]
async fn test_reseeding_updates_in_place() {
    let ctx = TestContext::new();
    let first = ctx
        .mapper
        .seed(&[mapping("bazi", "BASIC", 1), mapping("fengshui", "BASIC", 1)])
        .await
        .unwrap();
    assert_eq!(first.active, 2);

    let mut retired = mapping("fengshui", "BASIC", 1);
    retired.active = false;
    let second = ctx
        .mapper
        .seed(&[mapping("bazi", "BASIC", 7), retired])
        .await
        .unwrap();
    assert_eq!(second.upserted, 2);
    assert_eq!(second.active, 1);

    let table = ctx.mapper.table().await.unwrap();
    assert_eq!(table.mappings()[0].priority, 7);
}

#[tokio::test]
async fn test_invalid_seed_writes_nothing() {
    let ctx = TestContext::new();
    let err = ctx
        .mapper
        .seed(&[mapping("bazi", "BASIC", 1), mapping("fengshui", "BASIC", 0)])
        .await
        .unwrap_err();

    match err {
        SeedError::Invalid(problems) => assert_eq!(problems.len(), 1),
        SeedError::Checkout(e) => panic!("unexpected store error: {e}"),
    }
    assert!(ctx.mapper.table().await.unwrap().is_empty());
}

// =============================================================================
// Provisioned Plans
// =============================================================================

#[tokio::test]
async fn test_bundle_purchase_provisions_upgraded_subscriptions() {
    let ctx = TestContext::new();
    ctx.seed_plans(vec![
        mapping("bazi", "BASIC", 1),
        mapping("fengshui", "BASIC", 1),
        bundle("bundle_2_services", 2, "ENTERPRISE", 10),
    ])
    .await;
    let (_, token) = ctx
        .paid_order(
            vec![item("bazi", 800, 180), item("fengshui", 1200, 270)],
            "buyer@example.com",
        )
        .await;

    let provisioned = ctx
        .provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap();

    assert_eq!(provisioned.plan, plan("ENTERPRISE"));
    assert_eq!(provisioned.subscriptions.len(), 3);
    let (bundles, lines): (Vec<_>, Vec<_>) =
        provisioned.subscriptions.iter().partition(|s| s.is_bundle);
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].price, DualPrice::zero());
    assert!(lines.iter().all(|s| s.plan_code == plan("ENTERPRISE")));
}

#[tokio::test]
async fn test_purchase_without_mappings_still_provisions() {
    let ctx = TestContext::new();
    let (_, token) = ctx
        .paid_order(vec![item("tarot", 100, 25)], "buyer@example.com")
        .await;

    let provisioned = ctx
        .provisioner
        .validate_and_provision_at(token.as_str(), ctx.now)
        .await
        .unwrap();
    assert_eq!(provisioned.plan, None);
    assert_eq!(provisioned.subscriptions.len(), 1);
    assert_eq!(provisioned.subscriptions[0].plan_code, None);
}
