//! Model and threshold configuration
//!
//! `ModelConfig::default()` is the production configuration. A YAML file may
//! override any subset of fields; omitted fields keep their defaults.

use super::features::Specialist;
use crate::error::{CoreError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Gradient-boosted tree hyperparameters for one specialist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterParams {
    pub max_depth: usize,
    pub learning_rate: f64,
    pub n_estimators: usize,
    /// Minimum hessian sum per child
    pub min_child_weight: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    /// Minimum split gain
    pub gamma: f64,
    pub reg_alpha: f64,
    pub reg_lambda: f64,
    pub random_state: u64,
    pub early_stopping_rounds: usize,
    /// Histogram bins per feature
    pub max_bins: usize,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            max_depth: 6,
            learning_rate: 0.05,
            n_estimators: 500,
            min_child_weight: 10.0,
            subsample: 0.8,
            colsample_bytree: 0.8,
            gamma: 1.0,
            reg_alpha: 0.1,
            reg_lambda: 1.0,
            random_state: 42,
            early_stopping_rounds: 50,
            max_bins: 256,
        }
    }
}

impl BoosterParams {
    fn validate(&self, name: &str) -> Result<()> {
        let fail = |msg: &str| Err(CoreError::Config(format!("{}: {}", name, msg)));
        if self.max_depth == 0 {
            return fail("max_depth must be >= 1");
        }
        if self.n_estimators == 0 {
            return fail("n_estimators must be >= 1");
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return fail("learning_rate must be in (0, 1]");
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return fail("subsample must be in (0, 1]");
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return fail("colsample_bytree must be in (0, 1]");
        }
        if self.min_child_weight < 0.0 || self.gamma < 0.0 {
            return fail("min_child_weight and gamma must be non-negative");
        }
        if self.reg_alpha < 0.0 || self.reg_lambda < 0.0 {
            return fail("regularization terms must be non-negative");
        }
        if self.max_bins < 2 || self.max_bins > 65_535 {
            return fail("max_bins must be in [2, 65535]");
        }
        Ok(())
    }
}

/// Per-specialist overrides applied on top of the base params
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterOverride {
    pub max_depth: Option<usize>,
    pub n_estimators: Option<usize>,
    pub learning_rate: Option<f64>,
    pub min_child_weight: Option<f64>,
}

impl BoosterOverride {
    fn depth_and_trees(max_depth: usize, n_estimators: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
            n_estimators: Some(n_estimators),
            ..Default::default()
        }
    }

    fn apply(&self, base: &BoosterParams) -> BoosterParams {
        let mut params = base.clone();
        if let Some(v) = self.max_depth {
            params.max_depth = v;
        }
        if let Some(v) = self.n_estimators {
            params.n_estimators = v;
        }
        if let Some(v) = self.learning_rate {
            params.learning_rate = v;
        }
        if let Some(v) = self.min_child_weight {
            params.min_child_weight = v;
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecialistOverrides {
    pub xgb_freq: BoosterOverride,
    pub xgb_fin: BoosterOverride,
    pub xgb_tenure: BoosterOverride,
    pub xgb_context: BoosterOverride,
}

impl Default for SpecialistOverrides {
    fn default() -> Self {
        Self {
            xgb_freq: BoosterOverride::depth_and_trees(7, 600),
            xgb_fin: BoosterOverride::depth_and_trees(4, 300),
            xgb_tenure: BoosterOverride::depth_and_trees(6, 500),
            xgb_context: BoosterOverride::depth_and_trees(5, 400),
        }
    }
}

impl SpecialistOverrides {
    pub fn get(&self, specialist: Specialist) -> &BoosterOverride {
        match specialist {
            Specialist::Frequency => &self.xgb_freq,
            Specialist::Financial => &self.xgb_fin,
            Specialist::Tenure => &self.xgb_tenure,
            Specialist::Context => &self.xgb_context,
        }
    }
}

/// L2 logistic regression meta-learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetaLearnerParams {
    /// Inverse regularization strength
    #[serde(rename = "C", alias = "c")]
    pub c: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for MetaLearnerParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tol: 1e-8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            high: 0.70,
            medium: 0.40,
        }
    }
}

/// Business rules for churn typing and derived features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChurnRules {
    /// Days without check-in that count as behavioral absence
    pub behavioral_churn_days: f64,
    /// Monthly contracts auto-renew on this cycle
    pub contract_renewal_cycle_days: f64,
}

impl Default for ChurnRules {
    fn default() -> Self {
        Self {
            behavioral_churn_days: 10.0,
            contract_renewal_cycle_days: 30.0,
        }
    }
}

/// Evaluation targets checked after final training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationTargets {
    pub pr_auc: f64,
    pub precision_at_20: f64,
    pub brier_score: f64,
    pub roc_auc: f64,
}

impl Default for ValidationTargets {
    fn default() -> Self {
        Self {
            pr_auc: 0.45,
            precision_at_20: 0.50,
            brier_score: 0.10,
            roc_auc: 0.80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringThresholds {
    pub psi_warning: f64,
    pub psi_alert: f64,
    pub psi_bins: usize,
    pub psi_min_samples: usize,
    pub concept_drift_ratio: f64,
    pub concept_drift_lookback_months: u32,
    pub hit_rate_floor: f64,
    /// Scoring halts if any required feature exceeds this null rate
    pub null_rate_breaker: f64,
    /// Relaxed breaker for the check-in group
    pub sparse_null_rate_breaker: f64,
    /// Mean 7-day check-ins of churners at spell end above this looks like look-ahead
    pub leakage_checkin_threshold: f64,
}

impl Default for MonitoringThresholds {
    fn default() -> Self {
        Self {
            psi_warning: 0.10,
            psi_alert: 0.20,
            psi_bins: 10,
            psi_min_samples: 10,
            concept_drift_ratio: 0.30,
            concept_drift_lookback_months: 3,
            hit_rate_floor: 0.50,
            null_rate_breaker: 0.05,
            sparse_null_rate_breaker: 0.45,
            leakage_checkin_threshold: 3.0,
        }
    }
}

/// Temporal layout of training and evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    pub train_start: NaiveDate,
    pub test_start: NaiveDate,
    pub test_end: NaiveDate,
    /// No training row may be dated after this
    pub data_cutoff: NaiveDate,
    pub window_months: u32,
    /// First validation window opens this many months after `train_start`
    pub validation_offset_months: u32,
    /// Informational sizing target
    pub min_churn_events_per_fold: usize,
    /// Folds below this are flagged unreliable
    pub min_val_positives: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            train_start: ymd(2024, 3, 1),
            test_start: ymd(2025, 7, 1),
            test_end: ymd(2026, 1, 1),
            data_cutoff: ymd(2026, 2, 10),
            window_months: 1,
            validation_offset_months: 6,
            min_churn_events_per_fold: 200,
            min_val_positives: 50,
        }
    }
}

fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

/// Complete model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub risk: RiskThresholds,
    pub rules: ChurnRules,
    pub booster: BoosterParams,
    pub overrides: SpecialistOverrides,
    pub meta_learner: MetaLearnerParams,
    pub targets: ValidationTargets,
    pub monitoring: MonitoringThresholds,
    pub walk_forward: WalkForwardConfig,
    /// Branches scored by the daily batch
    pub branch_ids: Vec<i64>,
    /// `"{TIER}_{CHURN_TYPE}"` -> playbook id
    pub playbooks: BTreeMap<String, String>,
    pub default_playbook: String,
    /// Share of top-scored rows used for precision@k
    pub precision_top_fraction: f64,
    /// Trailing window for branch comparison averages
    pub branch_stats_window_days: i64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        let playbooks = [
            ("HIGH_BEHAVIORAL", "PB_HIGH_BEHAVIORAL"),
            ("HIGH_FINANCIAL", "PB_HIGH_FINANCIAL"),
            ("HIGH_DEFAULT", "PB_HIGH_FINANCIAL"),
            ("HIGH_FULL", "PB_HIGH_FULL"),
            ("MEDIUM_BEHAVIORAL", "PB_MEDIUM_BEHAVIORAL"),
            ("MEDIUM_FINANCIAL", "PB_MEDIUM_FINANCIAL"),
            ("MEDIUM_DEFAULT", "PB_MEDIUM_FINANCIAL"),
            ("LOW_NONE", "PB_LOW_ACTIVE"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            risk: RiskThresholds::default(),
            rules: ChurnRules::default(),
            booster: BoosterParams::default(),
            overrides: SpecialistOverrides::default(),
            meta_learner: MetaLearnerParams::default(),
            targets: ValidationTargets::default(),
            monitoring: MonitoringThresholds::default(),
            walk_forward: WalkForwardConfig::default(),
            branch_ids: vec![345, 181, 59, 233, 401, 166, 33, 6, 149],
            playbooks,
            default_playbook: "PB_LOW_ACTIVE".to_string(),
            precision_top_fraction: 0.20,
            branch_stats_window_days: 90,
        }
    }
}

impl ModelConfig {
    /// Base params with the specialist's overrides applied
    pub fn specialist_params(&self, specialist: Specialist) -> BoosterParams {
        self.overrides.get(specialist).apply(&self.booster)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: ModelConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
            .map_err(|e| CoreError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        let risk = &self.risk;
        if !(0.0 < risk.medium && risk.medium < risk.high && risk.high <= 1.0) {
            return Err(CoreError::Config(format!(
                "risk thresholds must satisfy 0 < medium < high <= 1 (got medium={}, high={})",
                risk.medium, risk.high
            )));
        }

        self.booster.validate("booster")?;
        for s in Specialist::ALL {
            self.specialist_params(s).validate(s.name())?;
        }

        if self.meta_learner.c <= 0.0 || self.meta_learner.max_iter == 0 {
            return Err(CoreError::Config(
                "meta_learner: C must be positive and max_iter >= 1".to_string(),
            ));
        }

        let m = &self.monitoring;
        if m.psi_warning > m.psi_alert {
            return Err(CoreError::Config(format!(
                "psi_warning ({}) must not exceed psi_alert ({})",
                m.psi_warning, m.psi_alert
            )));
        }
        if m.psi_bins < 2 {
            return Err(CoreError::Config("psi_bins must be >= 2".to_string()));
        }
        for (name, rate) in [
            ("null_rate_breaker", m.null_rate_breaker),
            ("sparse_null_rate_breaker", m.sparse_null_rate_breaker),
            ("hit_rate_floor", m.hit_rate_floor),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(CoreError::Config(format!("{} must be in [0, 1]", name)));
            }
        }

        let wf = &self.walk_forward;
        if wf.window_months == 0 {
            return Err(CoreError::Config("window_months must be >= 1".to_string()));
        }
        if wf.test_start >= wf.test_end {
            return Err(CoreError::Config(format!(
                "test window is empty: [{}, {})",
                wf.test_start, wf.test_end
            )));
        }
        if wf.train_start >= wf.test_start {
            return Err(CoreError::Config(format!(
                "train_start {} must precede test_start {}",
                wf.train_start, wf.test_start
            )));
        }

        if !(self.precision_top_fraction > 0.0 && self.precision_top_fraction <= 1.0) {
            return Err(CoreError::Config(
                "precision_top_fraction must be in (0, 1]".to_string(),
            ));
        }
        if self.default_playbook.is_empty() {
            return Err(CoreError::Config("default_playbook must be set".to_string()));
        }
        Ok(())
    }
}
