//! Service-to-plan reference data and resolution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use alliance_core::{MappingId, PlanCode, ServiceId};

/// Upgrade granted when enough distinct services are bought together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BundleRule {
    pub min_services_for_upgrade: u32,
    pub upgrade_to_plan_code: PlanCode,
}

/// One row of the mapping table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanMapping {
    /// Sequence id; lower means inserted earlier.
    pub id: MappingId,
    pub service_id: ServiceId,
    pub service_name: String,
    pub plan_code: PlanCode,
    pub priority: i32,
    pub active: bool,
    pub bundle_rule: Option<BundleRule>,
    pub created_at: DateTime<Utc>,
}

/// Validated input for inserting or replacing a mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPlanMapping {
    pub service_id: ServiceId,
    pub service_name: String,
    pub plan_code: PlanCode,
    pub priority: i32,
    pub active: bool,
    pub bundle_rule: Option<BundleRule>,
}

/// A snapshot of the active mapping rows, as handed to the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingTable {
    mappings: Vec<PlanMapping>,
}

impl MappingTable {
    /// Build a table, dropping inactive rows.
    #[must_use]
    pub fn new(mut mappings: Vec<PlanMapping>) -> Self {
        mappings.retain(|m| m.active);
        mappings.sort_by_key(|m| m.id);
        Self { mappings }
    }

    #[must_use]
    pub fn mappings(&self) -> &[PlanMapping] {
        &self.mappings
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

/// The plan chosen for one cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLine {
    pub service_id: ServiceId,
    pub mapping_id: Option<MappingId>,
    /// Plan from the service's own mapping, before any bundle upgrade.
    pub base_plan: Option<PlanCode>,
    /// Plan actually granted.
    pub plan: Option<PlanCode>,
}

/// The bundle rule that fired for a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedBundle {
    pub rule_id: MappingId,
    pub service_id: ServiceId,
    pub service_name: String,
    pub plan: PlanCode,
}

/// Output of plan resolution, line-aligned with the cart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanResolution {
    pub lines: Vec<ResolvedLine>,
    pub bundle: Option<AppliedBundle>,
    /// Distinct services with no active mapping, in cart order.
    pub unmapped: Vec<ServiceId>,
}

impl PlanResolution {
    /// The tier the buyer effectively holds: the bundle plan if one applied,
    /// otherwise the plan of the first mapped line.
    #[must_use]
    pub fn effective_plan(&self) -> Option<&PlanCode> {
        self.bundle
            .as_ref()
            .map(|b| &b.plan)
            .or_else(|| self.lines.iter().find_map(|l| l.plan.as_ref()))
    }
}

/// One entry of a seed file, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanMappingSeed {
    pub service_id: String,
    pub service_name: String,
    pub plan_code: String,
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub min_services_for_upgrade: Option<u32>,
    #[serde(default)]
    pub upgrade_to_plan_code: Option<String>,
}

const fn default_active() -> bool {
    true
}

/// Seed file layout.
///
/// ```yaml
/// mappings:
///   - service_id: bazi_consultation_basic
///     service_name: BaZi Consultation (Basic)
///     plan_code: BASIC
///     priority: 1
///   - service_id: bundle_2_services
///     service_name: Multi-Service Bundle
///     plan_code: PREMIUM
///     priority: 10
///     min_services_for_upgrade: 2
///     upgrade_to_plan_code: ENTERPRISE
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PlanSeedFile {
    pub mappings: Vec<PlanMappingSeed>,
}
