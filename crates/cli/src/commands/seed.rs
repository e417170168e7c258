//! Plan-mapping seeding from YAML.
//!
//! # Usage
//!
//! ```bash
//! ma-cli seed plans crates/cli/seeds/service_plans.yaml
//! ```
//!
//! The whole file is validated before connecting, so a bad entry never
//! leaves the table half-seeded.

use tracing::{error, info};

use alliance_checkout::models::PlanSeedFile;
use alliance_checkout::services::plans::validate_seeds;
use alliance_checkout::services::{SeedError, ServicePlanMapper};

use super::{CliError, connect, print_json};

/// Parse and validate a seed file without touching the database.
///
/// # Errors
///
/// Returns `CliError::Yaml` for malformed YAML and `CliError::Seed` listing
/// every invalid entry.
pub fn parse_plan_file(content: &str) -> Result<PlanSeedFile, CliError> {
    let file: PlanSeedFile = serde_yaml::from_str(content)?;
    info!(entries = file.mappings.len(), "Parsed plan mappings");

    if let Err(errors) = validate_seeds(&file.mappings) {
        error!("Plan mapping validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        return Err(SeedError::Invalid(errors).into());
    }
    Ok(file)
}

/// Upsert plan mappings from a YAML file and print the resulting counts.
///
/// # Errors
///
/// Returns an error if the file cannot be read or validated, or the
/// database write fails.
pub async fn plans(file_path: &str) -> Result<(), CliError> {
    info!(path = %file_path, "Loading plan mappings from file");
    let content = tokio::fs::read_to_string(file_path)
        .await
        .map_err(|source| CliError::Read {
            path: file_path.to_string(),
            source,
        })?;
    let file = parse_plan_file(&content)?;
    info!("Plan mappings validated successfully");

    let (config, store) = connect().await?;
    let mapper = ServicePlanMapper::new(store, config.engine.plan_cache_ttl);
    let report = mapper.seed(&file.mappings).await?;

    info!("Seeding complete!");
    print_json(&report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_seed_file_is_valid() {
        let file = parse_plan_file(include_str!("../../seeds/service_plans.yaml")).unwrap();
        assert_eq!(file.mappings.len(), 7);
        assert_eq!(
            file.mappings
                .iter()
                .filter(|m| m.min_services_for_upgrade.is_some())
                .count(),
            1
        );
    }

    #[test]
    fn test_invalid_entries_are_all_reported() {
        let yaml = r"
mappings:
  - service_id: bazi
    service_name: BaZi
    plan_code: BASIC
    priority: 0
  - service_id: feng_shui
    service_name: Feng Shui
    plan_code: PREMIUM
    priority: 2
    min_services_for_upgrade: 2
";
        match parse_plan_file(yaml) {
            Err(CliError::Seed(SeedError::Invalid(errors))) => {
                assert_eq!(errors.len(), 2);
                assert!(errors[0].starts_with("entry 1:"));
                assert!(errors[1].starts_with("entry 2:"));
            }
            other => panic!("expected validation errors, got {other:?}"),
        }
    }
}
