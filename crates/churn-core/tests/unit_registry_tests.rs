//! Unit tests for the registries
//!
//! These tests cover the registry contract other crates rely on: column
//! order, specialist partitioning, config loading from disk and template coverage.

use churn_core::registry::{FeatureGroup, FeatureRegistry, ModelConfig, Specialist, TemplateTable};
use std::collections::HashSet;
use tempfile::TempDir;

#[test]
fn test_every_feature_belongs_to_exactly_one_specialist() {
    let registry = FeatureRegistry::standard();
    let mut seen = HashSet::new();

    for specialist in Specialist::ALL {
        for feature in registry.specialist_features(specialist) {
            assert!(seen.insert(feature.clone()), "{} assigned twice", feature);
            assert_eq!(registry.specialist_of(feature), Some(specialist));
        }
    }

    let all: HashSet<String> = registry.all_features().iter().cloned().collect();
    assert_eq!(seen, all);
}

#[test]
fn test_specialist_groups() {
    assert_eq!(
        Specialist::Frequency.groups(),
        vec![FeatureGroup::Frequency, FeatureGroup::Engagement]
    );
    assert_eq!(
        Specialist::Tenure.groups(),
        vec![FeatureGroup::Tenure, FeatureGroup::Recency]
    );
    assert_eq!(
        Specialist::Context.groups(),
        vec![
            FeatureGroup::Seasonality,
            FeatureGroup::Demographic,
            FeatureGroup::Segment
        ]
    );
}

#[test]
fn test_passthrough_features_are_registered() {
    let registry = FeatureRegistry::standard();
    assert_eq!(
        registry.passthrough_features(),
        &[
            "days_since_last_checkin",
            "days_until_contract_end",
            "checkin_trend"
        ]
    );
    for p in registry.passthrough_features() {
        assert!(registry.contains(p));
    }
}

#[test]
fn test_sparse_group_is_checkin_derived() {
    let registry = FeatureRegistry::standard();
    let sparse = registry.sparse_features();
    assert!(sparse.contains(&"days_since_last_checkin".to_string()));
    assert!(sparse.contains(&"checkins_last_7d".to_string()));
    assert!(!sparse.contains(&"tenure_days".to_string()));
    assert!(!sparse.contains(&"has_ever_checked_in".to_string()));
}

#[test]
fn test_model_config_load_from_file() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("model.yaml");
    std::fs::write(
        &path,
        r#"
branch_ids: [1, 2]
overrides:
  xgb_freq:
    n_estimators: 20
monitoring:
  psi_alert: 0.25
"#,
    )?;

    let config = ModelConfig::load_from_file(&path)?;
    assert_eq!(config.branch_ids, vec![1, 2]);
    assert_eq!(config.specialist_params(Specialist::Frequency).n_estimators, 20);
    // a partially given override drops the other default override fields
    assert_eq!(config.specialist_params(Specialist::Frequency).max_depth, 6);
    assert_eq!(config.monitoring.psi_alert, 0.25);
    assert_eq!(config.monitoring.psi_warning, 0.10);
    Ok(())
}

#[test]
fn test_model_config_missing_file_is_error() {
    let dir = TempDir::new().unwrap();
    assert!(ModelConfig::load_from_file(dir.path().join("absent.yaml")).is_err());
}

#[test]
fn test_templates_cover_registry_except_generic_features() {
    let registry = FeatureRegistry::standard();
    let table = TemplateTable::standard().unwrap();

    let missing: Vec<&String> = registry
        .all_features()
        .iter()
        .filter(|f| table.get(f).is_none())
        .collect();
    // these fall back to the generic sentence
    assert_eq!(missing, vec!["checkins_last_14d", "checkins_last_90d"]);
}
