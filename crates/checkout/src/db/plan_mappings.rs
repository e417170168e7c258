//! Service-to-plan mapping repository.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use alliance_core::{MappingId, PlanCode, ServiceId};

use super::RepositoryError;
use crate::models::{BundleRule, NewPlanMapping, PlanMapping};

#[derive(Debug, sqlx::FromRow)]
struct MappingRow {
    id: i32,
    service_id: String,
    service_name: String,
    plan_code: String,
    priority: i32,
    active: bool,
    min_services_for_upgrade: Option<i32>,
    upgrade_to_plan_code: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<MappingRow> for PlanMapping {
    type Error = RepositoryError;

    fn try_from(r: MappingRow) -> Result<Self, Self::Error> {
        let id = r.id;
        let corrupt =
            |what: &str| RepositoryError::DataCorruption(format!("mapping {id}: invalid {what}"));

        let bundle_rule = match (r.min_services_for_upgrade, r.upgrade_to_plan_code.as_deref()) {
            (Some(min), Some(plan)) => Some(BundleRule {
                min_services_for_upgrade: u32::try_from(min)
                    .map_err(|_| corrupt("min_services_for_upgrade"))?,
                upgrade_to_plan_code: PlanCode::parse(plan)
                    .ok_or_else(|| corrupt("upgrade_to_plan_code"))?,
            }),
            (None, None) => None,
            _ => return Err(corrupt("bundle rule")),
        };

        Ok(Self {
            id: MappingId::new(r.id),
            service_id: ServiceId::parse(&r.service_id).ok_or_else(|| corrupt("service_id"))?,
            service_name: r.service_name,
            plan_code: PlanCode::parse(&r.plan_code).ok_or_else(|| corrupt("plan_code"))?,
            priority: r.priority,
            active: r.active,
            bundle_rule,
            created_at: r.created_at,
        })
    }
}

const MAPPING_COLUMNS: &str = "id, service_id, service_name, plan_code, priority, active, \
     min_services_for_upgrade, upgrade_to_plan_code, created_at";

/// Repository for plan mapping reference data.
pub struct PlanMappingRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> PlanMappingRepository<'a> {
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Active mappings in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn active(&self) -> Result<Vec<PlanMapping>, RepositoryError> {
        let sql = format!(
            "SELECT {MAPPING_COLUMNS} FROM checkout.service_plan_mapping \
             WHERE active ORDER BY id"
        );
        let rows = sqlx::query_as::<_, MappingRow>(&sql)
            .fetch_all(self.pool)
            .await?;

        rows.into_iter().map(PlanMapping::try_from).collect()
    }

    /// Insert or update by `(service_id, plan_code)`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the query fails.
    pub async fn upsert(&self, m: &NewPlanMapping) -> Result<PlanMapping, RepositoryError> {
        let sql = format!(
            "INSERT INTO checkout.service_plan_mapping
                 (service_id, service_name, plan_code, priority, active,
                  min_services_for_upgrade, upgrade_to_plan_code)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (service_id, plan_code) DO UPDATE SET
                 service_name = EXCLUDED.service_name,
                 priority = EXCLUDED.priority,
                 active = EXCLUDED.active,
                 min_services_for_upgrade = EXCLUDED.min_services_for_upgrade,
                 upgrade_to_plan_code = EXCLUDED.upgrade_to_plan_code,
                 updated_at = now()
             RETURNING {MAPPING_COLUMNS}"
        );

        let (min, upgrade) = m.bundle_rule.as_ref().map_or((None, None), |rule| {
            (
                i32::try_from(rule.min_services_for_upgrade).ok(),
                Some(rule.upgrade_to_plan_code.as_str()),
            )
        });

        let row = sqlx::query_as::<_, MappingRow>(&sql)
            .bind(m.service_id.as_str())
            .bind(&m.service_name)
            .bind(m.plan_code.as_str())
            .bind(m.priority)
            .bind(m.active)
            .bind(min)
            .bind(upgrade)
            .fetch_one(self.pool)
            .await?;

        row.try_into()
    }
}
