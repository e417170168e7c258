//! Scenario tests for the checkout engine.
//!
//! Everything runs in-process against [`MemoryStore`] with in-memory
//! collaborators, so no database or network is needed.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p alliance-integration-tests
//! ```
//!
//! # Test Files
//!
//! - `order_ledger` - payment state machine and the abandoned sweep
//! - `resume_tokens` - resume links against order state
//! - `plan_mapping` - plan resolution, bundle rules, seeding
//! - `provisioning` - magic-link provisioning, including concurrent claims
//! - `sync_reconciler` - outbox push, backoff and escalation

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rust_decimal::Decimal;
use url::Url;

use alliance_checkout::config::EngineSettings;
use alliance_checkout::db::MemoryStore;
use alliance_checkout::models::{GuestOrder, PlanMappingSeed, SyncEntry};
use alliance_checkout::services::{
    CheckoutService, EntitlementTarget, LinkBuilder, MagicLinkProvisioner,
    MemoryIdentityProvider, OrderLedger, RecordingNotifier, ResumeTokenService,
    ServicePlanMapper, SupportLookup, SyncReconciler, TargetError,
};
use alliance_core::{CartItem, DualPrice, GuestContact, LinkToken, PaymentOutcome, ServiceId};

/// What the scripted target answers to the next push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Accept,
    Reject(u16),
}

/// Entitlement target whose answers are queued by the test.
///
/// With an empty script every push is accepted and filed as
/// `master-{source_ref}`.
#[derive(Debug, Default)]
pub struct ScriptedTarget {
    script: Mutex<VecDeque<Scripted>>,
    pushed: Mutex<Vec<(String, String)>>,
    unconfigured: AtomicBool,
}

impl ScriptedTarget {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue answers for the next pushes, in order.
    pub fn script(&self, answers: impl IntoIterator<Item = Scripted>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(answers);
    }

    /// Behave like a deployment with no entitlement system configured.
    pub fn set_unconfigured(&self, unconfigured: bool) {
        self.unconfigured.store(unconfigured, Ordering::SeqCst);
    }

    /// `(event_type, source_ref)` of every push attempted so far.
    #[must_use]
    pub fn pushes(&self) -> Vec<(String, String)> {
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl EntitlementTarget for ScriptedTarget {
    async fn push(&self, entry: &SyncEntry) -> Result<String, TargetError> {
        if self.unconfigured.load(Ordering::SeqCst) {
            return Err(TargetError::Unconfigured);
        }
        self.pushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((entry.event_type.clone(), entry.source_ref.clone()));

        let answer = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or(Scripted::Accept);
        match answer {
            Scripted::Accept => Ok(format!("master-{}", entry.source_ref)),
            Scripted::Reject(status) => Err(TargetError::Rejected {
                status,
                message: "scripted rejection".to_string(),
            }),
        }
    }
}

/// Every service wired over one in-memory store.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub identity: Arc<MemoryIdentityProvider>,
    pub notifier: Arc<RecordingNotifier>,
    pub target: Arc<ScriptedTarget>,
    pub settings: EngineSettings,
    pub ledger: OrderLedger,
    pub resume: ResumeTokenService,
    pub mapper: ServicePlanMapper,
    pub provisioner: MagicLinkProvisioner,
    pub sync: SyncReconciler,
    pub checkout: CheckoutService,
    pub support: SupportLookup,
    /// Fixed "now" for the `_at` service variants.
    pub now: DateTime<Utc>,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    /// # Panics
    ///
    /// Never; the base URL is a constant.
    #[must_use]
    pub fn with_settings(settings: EngineSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MemoryIdentityProvider::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let target = Arc::new(ScriptedTarget::new());

        let ledger = OrderLedger::new(store.clone(), settings.order_ttl);
        let resume = ResumeTokenService::new(store.clone());
        let mapper = ServicePlanMapper::new(store.clone(), settings.plan_cache_ttl);
        let provisioner = MagicLinkProvisioner::new(
            store.clone(),
            mapper.clone(),
            identity.clone(),
            settings.magic_link_ttl,
        );
        let links = LinkBuilder::new(
            Url::parse("https://shop.example.com").expect("constant URL parses"),
        )
        .expect("constant URL is a base");
        let checkout = CheckoutService::new(
            ledger.clone(),
            resume.clone(),
            provisioner.clone(),
            notifier.clone(),
            links,
        );
        let sync = SyncReconciler::new(store.clone(), target.clone(), settings.sync);
        let support = SupportLookup::new(store.clone());

        Self {
            store,
            identity,
            notifier,
            target,
            settings,
            ledger,
            resume,
            mapper,
            provisioner,
            sync,
            checkout,
            support,
            now: Utc::now(),
        }
    }

    /// `now` shifted by `hours`.
    #[must_use]
    pub fn after_hours(&self, hours: i64) -> DateTime<Utc> {
        self.now + TimeDelta::hours(hours)
    }

    /// Create a pending order at `now`.
    ///
    /// # Panics
    ///
    /// If the order is rejected.
    pub async fn pending_order(&self, items: Vec<CartItem>, email: &str) -> GuestOrder {
        self.ledger
            .create_order_at(items, contact(email), self.now)
            .await
            .expect("order is valid")
    }

    /// Create an order, mark it paid, and issue its magic link at `now`.
    ///
    /// # Panics
    ///
    /// If any step fails.
    pub async fn paid_order(&self, items: Vec<CartItem>, email: &str) -> (GuestOrder, LinkToken) {
        let order = self.pending_order(items, email).await;
        self.ledger
            .apply_payment_result_at(order.id, PaymentOutcome::Succeeded, Some("pi_test"), self.now)
            .await
            .expect("payment applies");
        self.provisioner
            .issue_at(order.id, self.now)
            .await
            .expect("magic link issues")
    }

    /// Seed plan mappings through the mapper.
    ///
    /// # Panics
    ///
    /// If the seeds are invalid.
    pub async fn seed_plans(&self, seeds: Vec<PlanMappingSeed>) {
        self.mapper.seed(&seeds).await.expect("seeds are valid");
    }
}

/// A cart line priced in whole units.
///
/// # Panics
///
/// If `service_id` is blank.
#[must_use]
pub fn item(service_id: &str, myr: i64, usd: i64) -> CartItem {
    CartItem {
        service_id: ServiceId::parse(service_id).expect("service id is not blank"),
        name: format!("Service {service_id}"),
        category: None,
        price: DualPrice::new(Decimal::from(myr), Decimal::from(usd)),
    }
}

/// # Panics
///
/// If `email` is malformed.
#[must_use]
pub fn contact(email: &str) -> GuestContact {
    GuestContact::new(email, "Guest Buyer").expect("contact is valid")
}

/// A plain service-to-plan mapping.
#[must_use]
pub fn mapping(service_id: &str, plan_code: &str, priority: i32) -> PlanMappingSeed {
    PlanMappingSeed {
        service_id: service_id.to_string(),
        service_name: format!("Service {service_id}"),
        plan_code: plan_code.to_string(),
        priority,
        active: true,
        min_services_for_upgrade: None,
        upgrade_to_plan_code: None,
    }
}

/// A bundle rule mapping.
#[must_use]
pub fn bundle(service_id: &str, min_services: u32, upgrade_to: &str, priority: i32) -> PlanMappingSeed {
    PlanMappingSeed {
        min_services_for_upgrade: Some(min_services),
        upgrade_to_plan_code: Some(upgrade_to.to_string()),
        ..mapping(service_id, "PREMIUM", priority)
    }
}
