//! Stacking ensemble
//!
//! Level 0 is four gradient-boosted specialists, each on its own fixed feature
//! subset. Level 1 is a logistic regression over the four specialist
//! probabilities plus the registry's passthrough columns, followed by Platt
//! calibration. The meta-learner and the calibrator are fit on the
//! validation partition so level-1 never sees level-0 training outputs.
//!
//! The ensemble is either completely fitted or not fitted at all: every
//! fitted component lives in one `FittedState` that is swapped in at the end
//! of `fit`/`load`.

use super::artifact::{publish_dir, read_json, write_json};
use super::booster::GradientBoostedTrees;
use super::calibration::PlattCalibrator;
use super::logistic::LogisticRegression;
use super::metrics::{average_precision, roc_auc, EvaluationMetrics};
use crate::error::{Result, RuntimeError};
use chrono::{DateTime, Utc};
use churn_core::registry::{BoosterParams, FeatureRegistry, ModelConfig, Specialist};
use churn_core::{FeatureTable, RiskTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

pub const META_LEARNER_FILE: &str = "meta_learner.json";
pub const CALIBRATOR_FILE: &str = "calibrator.json";
pub const SNAPSHOT_FILE: &str = "config_snapshot.json";

/// Validation ROC-AUC / PR-AUC of one specialist
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpecialistMetrics {
    pub roc_auc: f64,
    pub pr_auc: f64,
}

/// A fitted level-0 model
#[derive(Debug, Clone)]
pub struct SpecialistModel {
    specialist: Specialist,
    model: GradientBoostedTrees,
}

impl SpecialistModel {
    pub fn specialist(&self) -> Specialist {
        self.specialist
    }

    pub fn name(&self) -> &'static str {
        self.specialist.name()
    }

    pub fn features(&self) -> &[String] {
        self.model.features()
    }

    pub fn params(&self) -> &BoosterParams {
        self.model.params()
    }

    pub fn model(&self) -> &GradientBoostedTrees {
        &self.model
    }

    pub fn predict_proba(&self, x: &FeatureTable) -> Result<Vec<f64>> {
        self.model.predict_proba(&x.project(self.features())?)
    }

    /// Per-row `(bias, attributions)` in log-odds over `features()`
    pub fn contributions(&self, x: &FeatureTable) -> Result<Vec<(f64, Vec<f64>)>> {
        self.model.contributions(&x.project(self.features())?)
    }
}

/// Metadata written next to the model files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub scale_pos_weight: f64,
    pub training_metrics: EvaluationMetrics,
    pub specialist_metrics: BTreeMap<String, SpecialistMetrics>,
    pub specialist_features: BTreeMap<String, Vec<String>>,
    pub passthrough_features: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct FittedState {
    specialists: [SpecialistModel; 4],
    meta_learner: LogisticRegression,
    calibrator: PlattCalibrator,
    scale_pos_weight: f64,
    metrics: EvaluationMetrics,
    specialist_metrics: BTreeMap<String, SpecialistMetrics>,
}

#[derive(Debug, Clone)]
pub struct StackingEnsemble {
    registry: FeatureRegistry,
    config: ModelConfig,
    state: Option<FittedState>,
}

impl StackingEnsemble {
    pub fn new(registry: &FeatureRegistry, config: &ModelConfig) -> Self {
        Self {
            registry: registry.clone(),
            config: config.clone(),
            state: None,
        }
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    fn fitted(&self) -> Result<&FittedState> {
        self.state.as_ref().ok_or_else(|| {
            RuntimeError::InvalidState("ensemble is not fitted; call fit() or load() first".to_string())
        })
    }

    /// Train all levels. Returns calibrated validation metrics.
    pub fn fit(
        &mut self,
        x_train: &FeatureTable,
        y_train: &[u8],
        x_val: &FeatureTable,
        y_val: &[u8],
    ) -> Result<EvaluationMetrics> {
        check_split("training", x_train, y_train)?;
        check_split("validation", x_val, y_val)?;

        let n_pos = y_train.iter().filter(|&&y| y == 1).count();
        let n_neg = y_train.len() - n_pos;
        let scale_pos_weight = n_neg as f64 / n_pos.max(1) as f64;
        info!(
            "Class balance: {} negative, {} positive (scale_pos_weight={:.2})",
            n_neg, n_pos, scale_pos_weight
        );

        // ========== Level 0 ==========
        info!("Training L0 specialists...");
        let mut fitted = Vec::with_capacity(Specialist::ALL.len());
        let mut val_probs = Vec::with_capacity(Specialist::ALL.len());
        let mut specialist_metrics = BTreeMap::new();

        for specialist in Specialist::ALL {
            let features = self.registry.specialist_features(specialist).to_vec();
            let params = self.config.specialist_params(specialist);
            info!("  Training {} on {} features...", specialist, features.len());

            let xt = x_train.project(&features)?;
            let xv = x_val.project(&features)?;
            let model = GradientBoostedTrees::fit(
                features,
                &params,
                scale_pos_weight,
                &xt,
                y_train,
                Some((xv.as_slice(), y_val)),
            )?;
            let probs = model.predict_proba(&xv)?;

            let m = SpecialistMetrics {
                roc_auc: roc_auc(y_val, &probs),
                pr_auc: average_precision(y_val, &probs),
            };
            info!(
                "    {}: {} trees, ROC-AUC {:.4}, PR-AUC {:.4}",
                specialist,
                model.trees().len(),
                m.roc_auc,
                m.pr_auc
            );
            specialist_metrics.insert(specialist.name().to_string(), m);
            val_probs.push(probs);
            fitted.push(SpecialistModel { specialist, model });
        }
        let specialists: [SpecialistModel; 4] = fitted.try_into().map_err(|_| {
            RuntimeError::InvalidState("expected exactly four specialists".to_string())
        })?;

        // ========== Level 1 ==========
        info!("Training L1 meta-learner...");
        let l1_val = self.level1_input(x_val, &val_probs)?;
        let meta_learner = LogisticRegression::fit(
            self.level1_names(),
            &self.config.meta_learner,
            &l1_val,
            y_val,
        )?;

        info!("Calibrating with Platt scaling...");
        let decision = meta_learner.decision_function(&l1_val)?;
        let calibrator = PlattCalibrator::fit(&decision, y_val)?;
        let calibrated = calibrator.transform(&decision);

        let metrics =
            EvaluationMetrics::compute(y_val, &calibrated, self.config.precision_top_fraction);
        metrics.log_against(&self.config.targets);

        for (name, coef) in meta_learner.feature_names().iter().zip(meta_learner.coef()) {
            info!("  L1 coefficient {}: {:.4}", name, coef);
        }

        self.state = Some(FittedState {
            specialists,
            meta_learner,
            calibrator,
            scale_pos_weight,
            metrics,
            specialist_metrics,
        });
        Ok(metrics)
    }

    /// Calibrated churn probability per row
    pub fn predict_proba(&self, x: &FeatureTable) -> Result<Vec<f64>> {
        let state = self.fitted()?;
        let probs = state
            .specialists
            .iter()
            .map(|s| s.predict_proba(x))
            .collect::<Result<Vec<_>>>()?;
        let l1 = self.level1_input(x, &probs)?;
        let decision = state.meta_learner.decision_function(&l1)?;
        Ok(state.calibrator.transform(&decision))
    }

    pub fn predict_risk_tier(&self, probabilities: &[f64]) -> Result<Vec<RiskTier>> {
        self.fitted()?;
        let risk = &self.config.risk;
        Ok(probabilities
            .iter()
            .map(|&p| RiskTier::from_probability(p, risk.high, risk.medium))
            .collect())
    }

    pub fn specialists(&self) -> Result<&[SpecialistModel; 4]> {
        Ok(&self.fitted()?.specialists)
    }

    pub fn meta_learner(&self) -> Result<&LogisticRegression> {
        Ok(&self.fitted()?.meta_learner)
    }

    pub fn calibrator(&self) -> Result<&PlattCalibrator> {
        Ok(&self.fitted()?.calibrator)
    }

    pub fn metrics(&self) -> Option<&EvaluationMetrics> {
        self.state.as_ref().map(|s| &s.metrics)
    }

    pub fn scale_pos_weight(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.scale_pos_weight)
    }

    pub fn specialist_metrics(&self) -> Option<&BTreeMap<String, SpecialistMetrics>> {
        self.state.as_ref().map(|s| &s.specialist_metrics)
    }

    /// Specialist names followed by passthrough names
    fn level1_names(&self) -> Vec<String> {
        Specialist::ALL
            .iter()
            .map(|s| s.name().to_string())
            .chain(self.registry.passthrough_features().iter().cloned())
            .collect()
    }

    fn level1_input(&self, x: &FeatureTable, probs: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        let passthrough = x.project(self.registry.passthrough_features())?;
        Ok(passthrough
            .into_iter()
            .enumerate()
            .map(|(i, pt)| probs.iter().map(|p| p[i]).chain(pt).collect())
            .collect())
    }

    // ========== Persistence ==========

    /// Write every component to `dir` as one atomic unit
    pub fn save(&self, dir: &Path) -> Result<()> {
        let state = self.fitted()?;
        let snapshot = ConfigSnapshot {
            scale_pos_weight: state.scale_pos_weight,
            training_metrics: state.metrics,
            specialist_metrics: state.specialist_metrics.clone(),
            specialist_features: state
                .specialists
                .iter()
                .map(|s| (s.name().to_string(), s.features().to_vec()))
                .collect(),
            passthrough_features: self.registry.passthrough_features().to_vec(),
            created_at: Utc::now(),
        };

        publish_dir(dir, |staging| {
            for s in &state.specialists {
                write_json(staging, &format!("{}.json", s.name()), &s.model)?;
            }
            write_json(staging, META_LEARNER_FILE, &state.meta_learner)?;
            write_json(staging, CALIBRATOR_FILE, &state.calibrator)?;
            write_json(staging, SNAPSHOT_FILE, &snapshot)
        })?;

        info!("Model saved to {}", dir.display());
        Ok(())
    }

    /// Restore a saved ensemble; the artifact must match this registry
    pub fn load(&mut self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            return Err(RuntimeError::Artifact(format!(
                "model directory {} does not exist",
                dir.display()
            )));
        }

        let snapshot: ConfigSnapshot = read_json(dir, SNAPSHOT_FILE)?;
        let mut loaded = Vec::with_capacity(Specialist::ALL.len());
        for specialist in Specialist::ALL {
            let model: GradientBoostedTrees = read_json(dir, &format!("{}.json", specialist.name()))?;
            let expected = self.registry.specialist_features(specialist);
            if model.features() != expected {
                return Err(RuntimeError::Artifact(format!(
                    "{} was trained on {:?}, registry expects {:?}",
                    specialist,
                    model.features(),
                    expected
                )));
            }
            loaded.push(SpecialistModel { specialist, model });
        }
        let specialists: [SpecialistModel; 4] = loaded.try_into().map_err(|_| {
            RuntimeError::Artifact("expected exactly four specialists".to_string())
        })?;

        let meta_learner: LogisticRegression = read_json(dir, META_LEARNER_FILE)?;
        if meta_learner.feature_names() != self.level1_names().as_slice() {
            return Err(RuntimeError::Artifact(format!(
                "meta-learner inputs {:?} do not match the registry",
                meta_learner.feature_names()
            )));
        }
        let calibrator: PlattCalibrator = read_json(dir, CALIBRATOR_FILE)?;

        self.state = Some(FittedState {
            specialists,
            meta_learner,
            calibrator,
            scale_pos_weight: snapshot.scale_pos_weight,
            metrics: snapshot.training_metrics,
            specialist_metrics: snapshot.specialist_metrics,
        });
        info!("Model loaded from {}", dir.display());
        Ok(())
    }
}

fn check_split(what: &str, x: &FeatureTable, y: &[u8]) -> Result<()> {
    if x.is_empty() {
        return Err(RuntimeError::InvalidInput(format!("{} set is empty", what)));
    }
    if x.len() != y.len() {
        return Err(RuntimeError::InvalidInput(format!(
            "{} set has {} rows but {} labels",
            what,
            x.len(),
            y.len()
        )));
    }
    let pos = y.iter().filter(|&&v| v == 1).count();
    if pos == 0 || pos == y.len() {
        return Err(RuntimeError::InvalidInput(format!(
            "{} labels must contain both classes ({} positive of {})",
            what,
            pos,
            y.len()
        )));
    }
    Ok(())
}
