//! Training pipeline
//!
//! Walk-forward validation over expanding folds, then one final model
//! trained on everything before the holdout and evaluated on it. The final
//! model is written to `output_dir/<version>` with a `metrics.json` beside
//! the model files.

use crate::config::PipelineConfig;
use crate::error::{Result, SdkError};
use chrono::{DateTime, NaiveDate, Utc};
use churn_core::registry::FeatureRegistry;
use churn_core::FeatureTable;
use churn_runtime::model::artifact::write_json;
use churn_runtime::model::model_version;
use churn_runtime::split::positive_rate;
use churn_runtime::{
    split_features_target, DataLoader, EvaluationMetrics, FoldInfo, SampleStore, StackingEnsemble,
    TargetCheck, WalkForwardSplitter,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const METRICS_FILE: &str = "metrics.json";

/// Distribution of one metric across folds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricSummary {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std: var.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    pub info: FoldInfo,
    pub metrics: EvaluationMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub folds: Vec<FoldResult>,
    /// Folds that could not be fit (single-class train or validation)
    pub skipped: Vec<usize>,
    pub aggregate: BTreeMap<String, MetricSummary>,
}

/// Contents of `metrics.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub test_metrics: EvaluationMetrics,
    pub target_checks: Vec<TargetCheck>,
    pub train_samples: usize,
    pub test_samples: usize,
    pub train_positive_rate: f64,
    pub test_positive_rate: f64,
    pub train_period: (NaiveDate, NaiveDate),
    pub test_period: (NaiveDate, NaiveDate),
    pub feature_count: usize,
    pub features: Vec<String>,
}

impl TrainingReport {
    pub fn all_targets_passed(&self) -> bool {
        self.target_checks.iter().all(|c| c.passed)
    }
}

/// A freshly trained and saved model
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub ensemble: StackingEnsemble,
    pub model_dir: PathBuf,
    pub report: TrainingReport,
}

/// Result of a full training run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub walk_forward: Option<WalkForwardReport>,
    pub model: TrainedModel,
}

pub struct Trainer {
    config: PipelineConfig,
    registry: &'static FeatureRegistry,
}

impl Trainer {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            registry: FeatureRegistry::standard(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Labeled samples in `[train_start, data_cutoff)`
    pub async fn load(&self, store: &dyn SampleStore) -> Result<FeatureTable> {
        let wf = &self.config.model.walk_forward;
        let loader = DataLoader::new(self.registry, &self.config.model);
        Ok(loader
            .load_training_samples(store, wf.train_start, wf.data_cutoff)
            .await?)
    }

    fn splitter(&self) -> Result<WalkForwardSplitter> {
        Ok(WalkForwardSplitter::from_config(&self.config.model.walk_forward)?)
    }

    /// Fit a fresh ensemble on every fold and summarize its validation metrics
    pub fn run_walk_forward_validation(&self, samples: &FeatureTable) -> Result<WalkForwardReport> {
        info!("========== WALK-FORWARD VALIDATION ==========");
        let folds = self.splitter()?.generate_folds(samples)?;

        let mut results = Vec::with_capacity(folds.len());
        let mut skipped = Vec::new();
        for fold in folds {
            let info = fold.info;
            if info.n_train_pos == 0
                || info.n_train_pos == info.n_train
                || info.n_val_pos == 0
                || info.n_val_pos == info.n_val
            {
                warn!(
                    "Fold {}: single-class train or validation window, skipping",
                    info.index
                );
                skipped.push(info.index);
                continue;
            }

            let (x_train, y_train) = split_features_target(&fold.train, self.registry)?;
            let (x_val, y_val) = split_features_target(&fold.validation, self.registry)?;
            let mut ensemble = StackingEnsemble::new(self.registry, &self.config.model);
            let metrics = ensemble.fit(&x_train, &y_train, &x_val, &y_val)?;
            info!(
                "Fold {} [{} - {}): PR-AUC={:.4}, ROC-AUC={:.4}, Brier={:.4}{}",
                info.index,
                info.val_start,
                info.val_end,
                metrics.pr_auc,
                metrics.roc_auc,
                metrics.brier_score,
                if info.unreliable { " (unreliable)" } else { "" }
            );
            results.push(FoldResult { info, metrics });
        }

        let aggregate = aggregate_metrics(&results);
        if aggregate.is_empty() {
            warn!("No folds could be evaluated");
        } else {
            info!("Walk-forward summary over {} folds:", results.len());
            for (name, s) in &aggregate {
                info!(
                    "  {}: {:.4} +/- {:.4} (min {:.4}, max {:.4})",
                    name, s.mean, s.std, s.min, s.max
                );
            }
        }

        Ok(WalkForwardReport {
            folds: results,
            skipped,
            aggregate,
        })
    }

    /// Train on `[train_start, test_start)`, evaluate on the holdout and save
    /// the model under `output_dir/<version>`.
    pub fn train_final_model(&self, samples: &FeatureTable, output_dir: &Path) -> Result<TrainedModel> {
        info!("========== FINAL MODEL ==========");
        let splitter = self.splitter()?;
        let (test_start, test_end) = splitter.holdout_range();
        let (train, test) = splitter.generate_holdout(samples, test_start)?;
        if test.is_empty() {
            return Err(SdkError::EmptyHoldout(format!(
                "no samples in [{}, {})",
                test_start, test_end
            )));
        }
        if train.is_empty() {
            return Err(SdkError::EmptyHoldout(format!(
                "no training samples before {}",
                test_start
            )));
        }

        let (x_train, y_train) = split_features_target(&train, self.registry)?;
        let (x_test, y_test) = split_features_target(&test, self.registry)?;
        let mut ensemble = StackingEnsemble::new(self.registry, &self.config.model);
        let metrics = ensemble.fit(&x_train, &y_train, &x_test, &y_test)?;

        let targets = &self.config.model.targets;
        metrics.log_against(targets);
        let target_checks = metrics.check(targets);
        let failed: Vec<&str> = target_checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.metric.as_str())
            .collect();
        if failed.is_empty() {
            info!("All targets passed");
        } else {
            warn!("Targets not met: {}", failed.join(", "));
        }

        let version = model_version();
        let model_dir = output_dir.join(&version);
        ensemble.save(&model_dir)?;

        let features = self.registry.all_features().to_vec();
        let report = TrainingReport {
            version,
            trained_at: Utc::now(),
            test_metrics: metrics,
            target_checks,
            train_samples: train.len(),
            test_samples: test.len(),
            train_positive_rate: positive_rate(&train),
            test_positive_rate: positive_rate(&test),
            train_period: (splitter.train_start(), test_start),
            test_period: (test_start, test_end),
            feature_count: features.len(),
            features,
        };
        write_json(&model_dir, METRICS_FILE, &report)?;
        info!("Model {} saved to {}", report.version, model_dir.display());

        Ok(TrainedModel {
            ensemble,
            model_dir,
            report,
        })
    }

    /// Load, optionally cross-validate, then train and save the final model
    pub async fn run(&self, store: &dyn SampleStore) -> Result<TrainingOutcome> {
        self.config.validate()?;
        let samples = self.load(store).await?;

        let walk_forward = if self.config.skip_cv {
            info!("Skipping walk-forward validation");
            None
        } else {
            Some(self.run_walk_forward_validation(&samples)?)
        };

        let model = self.train_final_model(&samples, &self.config.output_dir)?;
        Ok(TrainingOutcome {
            walk_forward,
            model,
        })
    }
}

fn aggregate_metrics(results: &[FoldResult]) -> BTreeMap<String, MetricSummary> {
    EvaluationMetrics::NAMES
        .iter()
        .filter_map(|&name| {
            let values: Vec<f64> = results.iter().filter_map(|r| r.metrics.get(name)).collect();
            MetricSummary::from_values(&values).map(|s| (name.to_string(), s))
        })
        .collect()
}
