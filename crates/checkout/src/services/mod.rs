//! Checkout engine services.
//!
//! # Services
//!
//! - `orders` - guest order ledger and payment state machine
//! - `resume` - resume tokens for abandoned checkouts
//! - `plans` - service-to-plan resolution and mapping seeds
//! - `magic_link` - magic-link issue and account provisioning
//! - `sync` - outbox reconciliation with the entitlement system
//! - `checkout` - orchestration with buyer notifications
//! - `support` - read-only operator lookups
//!
//! External collaborators sit behind traits in `identity`, `notify` and
//! `entitlement`, each with an HTTP client and an in-process stand-in.

pub mod checkout;
pub mod entitlement;
pub mod error;
pub mod identity;
pub mod magic_link;
pub mod notify;
pub mod orders;
pub mod plans;
pub mod resume;
pub mod support;
pub mod sync;

pub use checkout::{CheckoutService, LinkBuilder, PaymentCallback, StartedCheckout};
pub use entitlement::{EntitlementTarget, HttpEntitlementClient, LogTarget, TargetError};
pub use error::CheckoutError;
pub use identity::{
    HttpIdentityProvider, IdentityError, IdentityMetadata, IdentityProvider,
    MemoryIdentityProvider,
};
pub use magic_link::{MagicLinkProvisioner, Provisioned};
pub use notify::{
    LogNotifier, Notification, NotificationKind, Notifier, NotifyError, RecordingNotifier,
    WebhookNotifier,
};
pub use orders::OrderLedger;
pub use plans::{SeedError, SeedReport, ServicePlanMapper};
pub use resume::ResumeTokenService;
pub use support::SupportLookup;
pub use sync::{ReconcileReport, SyncReconciler};
