//! Service-to-plan resolution.
//!
//! [`resolve`] is a pure function of the cart lines and a mapping table
//! snapshot; [`ServicePlanMapper`] adds the cached table and seeding.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use thiserror::Error;
use tracing::{info, instrument, warn};

use alliance_core::{CartItem, PlanCode, ServiceId};

use super::CheckoutError;
use crate::db::CheckoutStore;
use crate::models::{
    AppliedBundle, BundleRule, MappingTable, NewPlanMapping, PlanMapping, PlanMappingSeed,
    PlanResolution, ResolvedLine,
};

/// Prefer higher priority; among equals, the earlier-inserted row.
fn outranks(a: &PlanMapping, b: &PlanMapping) -> bool {
    (a.priority, std::cmp::Reverse(a.id)) > (b.priority, std::cmp::Reverse(b.id))
}

fn best<'a>(candidates: impl Iterator<Item = &'a PlanMapping>) -> Option<&'a PlanMapping> {
    candidates.fold(None, |best, m| match best {
        Some(b) if !outranks(m, b) => Some(b),
        _ => Some(m),
    })
}

/// Resolve entitlement plans for cart lines.
///
/// Each line takes the plan of its service's best mapping. Then the best
/// bundle rule whose threshold the cart's distinct service count meets (if
/// any) replaces the plan of every mapped line. Services without a mapping
/// resolve to no plan and are listed in `unmapped`.
#[must_use]
pub fn resolve(items: &[CartItem], table: &MappingTable) -> PlanResolution {
    let mut unmapped: Vec<ServiceId> = Vec::new();
    let mut lines: Vec<ResolvedLine> = items
        .iter()
        .map(|item| {
            let mapping = best(
                table
                    .mappings()
                    .iter()
                    .filter(|m| m.service_id == item.service_id),
            );
            if mapping.is_none() && !unmapped.contains(&item.service_id) {
                unmapped.push(item.service_id.clone());
            }
            let plan = mapping.map(|m| m.plan_code.clone());
            ResolvedLine {
                service_id: item.service_id.clone(),
                mapping_id: mapping.map(|m| m.id),
                base_plan: plan.clone(),
                plan,
            }
        })
        .collect();

    // Bundle thresholds count distinct services; repeated lines count once.
    let distinct = items
        .iter()
        .map(|i| &i.service_id)
        .collect::<HashSet<_>>()
        .len();

    let rule = best(table.mappings().iter().filter(|m| {
        m.bundle_rule.as_ref().is_some_and(|r: &BundleRule| {
            usize::try_from(r.min_services_for_upgrade).is_ok_and(|min| distinct >= min)
        })
    }));

    let bundle = rule.and_then(|m| {
        let upgrade = m.bundle_rule.as_ref()?.upgrade_to_plan_code.clone();
        for line in lines.iter_mut().filter(|l| l.plan.is_some()) {
            line.plan = Some(upgrade.clone());
        }
        Some(AppliedBundle {
            rule_id: m.id,
            service_id: m.service_id.clone(),
            service_name: m.service_name.clone(),
            plan: upgrade,
        })
    });

    PlanResolution {
        lines,
        bundle,
        unmapped,
    }
}

/// Seed input rejected before any write.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("invalid plan mappings: {}", .0.join("; "))]
    Invalid(Vec<String>),
    #[error(transparent)]
    Checkout(#[from] CheckoutError),
}

/// Outcome of a seeding run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SeedReport {
    pub upserted: usize,
    pub active: usize,
}

fn parse_seed(seed: &PlanMappingSeed) -> Result<NewPlanMapping, Vec<String>> {
    let mut errors = Vec::new();
    let label = if seed.service_id.trim().is_empty() {
        "<empty>"
    } else {
        seed.service_id.trim()
    };

    let service_id = ServiceId::parse(&seed.service_id);
    if service_id.is_none() {
        errors.push("service_id cannot be empty".to_string());
    }
    if seed.service_name.trim().is_empty() {
        errors.push(format!("{label}: service_name cannot be empty"));
    }
    let plan_code = PlanCode::parse(&seed.plan_code);
    if plan_code.is_none() {
        errors.push(format!("{label}: plan_code cannot be empty"));
    }
    if seed.priority <= 0 {
        errors.push(format!("{label}: priority must be positive (got {})", seed.priority));
    }

    let bundle_rule = match (seed.min_services_for_upgrade, seed.upgrade_to_plan_code.as_deref()) {
        (Some(min), Some(upgrade)) => {
            if min < 2 {
                errors.push(format!(
                    "{label}: min_services_for_upgrade must be at least 2 (got {min})"
                ));
            }
            match PlanCode::parse(upgrade) {
                Some(upgrade_to_plan_code) => Some(BundleRule {
                    min_services_for_upgrade: min,
                    upgrade_to_plan_code,
                }),
                None => {
                    errors.push(format!("{label}: upgrade_to_plan_code cannot be empty"));
                    None
                }
            }
        }
        (None, None) => None,
        _ => {
            errors.push(format!(
                "{label}: min_services_for_upgrade and upgrade_to_plan_code must be set together"
            ));
            None
        }
    };

    match (service_id, plan_code) {
        (Some(service_id), Some(plan_code)) if errors.is_empty() => Ok(NewPlanMapping {
            service_id,
            service_name: seed.service_name.trim().to_string(),
            plan_code,
            priority: seed.priority,
            active: seed.active,
            bundle_rule,
        }),
        _ => Err(errors),
    }
}

/// Validate seed entries, returning every problem found.
///
/// # Errors
///
/// Returns the list of problems if any entry is invalid or a
/// `(service_id, plan_code)` pair appears twice.
pub fn validate_seeds(seeds: &[PlanMappingSeed]) -> Result<Vec<NewPlanMapping>, Vec<String>> {
    let mut errors = Vec::new();
    let mut parsed = Vec::with_capacity(seeds.len());
    let mut seen = HashSet::new();

    for (idx, seed) in seeds.iter().enumerate() {
        match parse_seed(seed) {
            Ok(mapping) => {
                if !seen.insert((mapping.service_id.clone(), mapping.plan_code.clone())) {
                    errors.push(format!(
                        "entry {}: duplicate mapping {} -> {}",
                        idx + 1,
                        mapping.service_id,
                        mapping.plan_code
                    ));
                }
                parsed.push(mapping);
            }
            Err(problems) => errors.extend(
                problems
                    .into_iter()
                    .map(|p| format!("entry {}: {p}", idx + 1)),
            ),
        }
    }

    if errors.is_empty() {
        Ok(parsed)
    } else {
        Err(errors)
    }
}

const TABLE_KEY: () = ();

/// Plan resolution over the stored mapping table.
#[derive(Clone)]
pub struct ServicePlanMapper {
    store: Arc<dyn CheckoutStore>,
    cache: Cache<(), Arc<MappingTable>>,
}

impl ServicePlanMapper {
    #[must_use]
    pub fn new(store: Arc<dyn CheckoutStore>, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(cache_ttl)
            .build();
        Self { store, cache }
    }

    /// Current active mapping table, cached.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::TransientStore` if the store is unreachable.
    pub async fn table(&self) -> Result<Arc<MappingTable>, CheckoutError> {
        if let Some(table) = self.cache.get(&TABLE_KEY).await {
            return Ok(table);
        }
        let table = Arc::new(MappingTable::new(self.store.active_mappings().await?));
        self.cache.insert(TABLE_KEY, Arc::clone(&table)).await;
        Ok(table)
    }

    /// Resolve cart lines against the current table.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::TransientStore` if the table cannot be loaded.
    pub async fn resolve(&self, items: &[CartItem]) -> Result<PlanResolution, CheckoutError> {
        let table = self.table().await?;
        Ok(resolve_logged(items, &table))
    }

    /// Drop the cached table.
    pub async fn invalidate(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Validate and upsert mappings, then drop the cached table.
    ///
    /// # Errors
    ///
    /// Returns `SeedError::Invalid` without writing anything if any entry is invalid.
    #[instrument(skip(self, seeds), fields(entries = seeds.len()))]
    pub async fn seed(&self, seeds: &[PlanMappingSeed]) -> Result<SeedReport, SeedError> {
        let mappings = validate_seeds(seeds).map_err(SeedError::Invalid)?;

        for mapping in &mappings {
            self.store
                .upsert_mapping(mapping)
                .await
                .map_err(CheckoutError::from)?;
        }
        self.invalidate().await;

        let active = self.table().await?.len();
        info!(upserted = mappings.len(), active, "Plan mappings seeded");
        Ok(SeedReport {
            upserted: mappings.len(),
            active,
        })
    }
}

/// [`resolve`], warning about services that have no mapping.
pub(crate) fn resolve_logged(items: &[CartItem], table: &MappingTable) -> PlanResolution {
    let resolution = resolve(items, table);
    for service_id in &resolution.unmapped {
        warn!(service_id = %service_id, "No active plan mapping for service");
    }
    resolution
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use alliance_core::{DualPrice, MappingId};
    use chrono::Utc;

    fn mapping(id: i32, service: &str, plan: &str, priority: i32) -> PlanMapping {
        PlanMapping {
            id: MappingId::new(id),
            service_id: ServiceId::parse(service).unwrap(),
            service_name: service.to_string(),
            plan_code: PlanCode::parse(plan).unwrap(),
            priority,
            active: true,
            bundle_rule: None,
            created_at: Utc::now(),
        }
    }

    fn bundle(id: i32, priority: i32, min: u32, upgrade: &str) -> PlanMapping {
        PlanMapping {
            bundle_rule: Some(BundleRule {
                min_services_for_upgrade: min,
                upgrade_to_plan_code: PlanCode::parse(upgrade).unwrap(),
            }),
            ..mapping(id, &format!("bundle_{id}"), "PREMIUM", priority)
        }
    }

    fn item(service: &str) -> CartItem {
        CartItem {
            service_id: ServiceId::parse(service).unwrap(),
            name: service.to_string(),
            category: None,
            price: DualPrice::zero(),
        }
    }

    fn plan(code: &str) -> Option<PlanCode> {
        PlanCode::parse(code)
    }

    #[test]
    fn test_highest_priority_mapping_wins() {
        let table = MappingTable::new(vec![
            mapping(1, "bazi", "BASIC", 1),
            mapping(2, "bazi", "PREMIUM", 2),
        ]);
        let res = resolve(&[item("bazi")], &table);
        assert_eq!(res.lines[0].plan, plan("PREMIUM"));
        assert_eq!(res.lines[0].mapping_id, Some(MappingId::new(2)));
    }

    #[test]
    fn test_priority_tie_goes_to_earliest_mapping() {
        let table = MappingTable::new(vec![
            mapping(7, "bazi", "PREMIUM", 2),
            mapping(3, "bazi", "BASIC", 2),
        ]);
        let res = resolve(&[item("bazi")], &table);
        assert_eq!(res.lines[0].plan, plan("BASIC"));
    }

    #[test]
    fn test_inactive_mappings_are_ignored() {
        let mut premium = mapping(2, "bazi", "PREMIUM", 5);
        premium.active = false;
        let table = MappingTable::new(vec![mapping(1, "bazi", "BASIC", 1), premium]);
        assert_eq!(resolve(&[item("bazi")], &table).lines[0].plan, plan("BASIC"));
    }

    #[test]
    fn test_unmapped_service_does_not_block() {
        let table = MappingTable::new(vec![mapping(1, "bazi", "BASIC", 1)]);
        let res = resolve(&[item("bazi"), item("tarot"), item("tarot")], &table);
        assert_eq!(res.lines.len(), 3);
        assert_eq!(res.lines[1].plan, None);
        assert_eq!(res.unmapped, vec![ServiceId::parse("tarot").unwrap()]);
    }

    #[test]
    fn test_bundle_upgrades_mapped_lines() {
        let table = MappingTable::new(vec![
            mapping(1, "bazi", "BASIC", 1),
            mapping(2, "date_selection", "BASIC", 1),
            bundle(3, 10, 2, "ENTERPRISE"),
        ]);
        let res = resolve(&[item("bazi"), item("date_selection")], &table);

        let applied = res.bundle.as_ref().unwrap();
        assert_eq!(applied.plan, plan("ENTERPRISE").unwrap());
        assert_eq!(res.effective_plan(), plan("ENTERPRISE").as_ref());
        assert!(res.lines.iter().all(|l| l.plan == plan("ENTERPRISE")));
        assert!(res.lines.iter().all(|l| l.base_plan == plan("BASIC")));
    }

    #[test]
    fn test_repeated_service_counts_once_for_bundle() {
        let table = MappingTable::new(vec![
            mapping(1, "bazi", "BASIC", 1),
            bundle(2, 10, 2, "ENTERPRISE"),
        ]);
        let res = resolve(&[item("bazi"), item("bazi")], &table);
        assert!(res.bundle.is_none());
    }

    #[test]
    fn test_single_bundle_rule_applies() {
        let table = MappingTable::new(vec![
            mapping(1, "a", "BASIC", 1),
            mapping(2, "b", "BASIC", 1),
            mapping(3, "c", "BASIC", 1),
            bundle(4, 10, 2, "PREMIUM"),
            bundle(5, 20, 3, "ENTERPRISE"),
            bundle(6, 20, 2, "PLATINUM"),
        ]);
        let res = resolve(&[item("a"), item("b"), item("c")], &table);
        assert_eq!(res.bundle.unwrap().rule_id, MappingId::new(5));

        let res = resolve(&[item("a"), item("b")], &table);
        assert_eq!(res.bundle.unwrap().rule_id, MappingId::new(6));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let table = MappingTable::new(vec![
            mapping(1, "a", "BASIC", 1),
            mapping(2, "b", "BASIC", 1),
            bundle(3, 10, 2, "ENTERPRISE"),
        ]);
        let cart = [item("b"), item("a"), item("x")];
        assert_eq!(resolve(&cart, &table), resolve(&cart, &table));
    }

    fn seed(service: &str, plan: &str, priority: i32) -> PlanMappingSeed {
        PlanMappingSeed {
            service_id: service.to_string(),
            service_name: format!("{service} name"),
            plan_code: plan.to_string(),
            priority,
            active: true,
            min_services_for_upgrade: None,
            upgrade_to_plan_code: None,
        }
    }

    #[test]
    fn test_validate_seeds_collects_every_problem() {
        let mut half_rule = seed("bundle", "PREMIUM", 10);
        half_rule.min_services_for_upgrade = Some(2);
        let mut low_min = seed("bundle_1", "PREMIUM", 10);
        low_min.min_services_for_upgrade = Some(1);
        low_min.upgrade_to_plan_code = Some("ENTERPRISE".into());

        let errors = validate_seeds(&[
            seed("bazi", "BASIC", 0),
            half_rule,
            low_min,
            seed("x", "basic", 1),
            seed("x", "BASIC", 2),
        ])
        .unwrap_err();

        assert_eq!(errors.len(), 4);
        assert!(errors[0].contains("priority"));
        assert!(errors[1].contains("set together"));
        assert!(errors[2].contains("at least 2"));
        assert!(errors[3].contains("duplicate"));
    }

    #[test]
    fn test_validate_seeds_normalizes_plan_codes() {
        let mappings = validate_seeds(&[seed(" bazi ", "premium", 2)]).unwrap();
        assert_eq!(mappings[0].service_id.as_str(), "bazi");
        assert_eq!(mappings[0].plan_code.as_str(), "PREMIUM");
    }
}
