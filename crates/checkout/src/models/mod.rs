//! Domain models for the checkout engine.
//!
//! Validated domain objects, separate from database row types.

pub mod account;
pub mod order;
pub mod plan;
pub mod sync;

pub use account::{Account, PaymentRecord, Profile, Subscription};
pub use order::{GuestOrder, NewOrder, OrderSummary, PaymentTransition};
pub use plan::{
    AppliedBundle, BundleRule, MappingTable, NewPlanMapping, PlanMapping, PlanMappingSeed,
    PlanResolution, PlanSeedFile, ResolvedLine,
};
pub use sync::{NewSyncEntry, SyncEntry, SyncHealth, SyncPolicy};
