//! Daily batch scorer
//!
//! Scores every active member of the configured branches with a saved model
//! and publishes the day's predictions. A run either replaces the whole day
//! or leaves it untouched.

use crate::config::PipelineConfig;
use crate::error::{Result, SdkError};
use chrono::{Duration, Local, NaiveDate};
use churn_core::registry::{FeatureRegistry, TemplateTable};
use churn_core::{ChurnType, FeatureTable, RiskTier};
use churn_runtime::{
    check_null_rates, ChurnTypeClassifier, DataLoader, ExplanationEngine, PredictionStore, Reason,
    SampleStore, ScoredPrediction, StackingEnsemble,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Segment written for every scored member
pub const DEFAULT_SEGMENT: &str = "REGULAR";

/// Counts reported at the end of a scoring run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringSummary {
    pub total_scored: usize,
    pub score_date: NaiveDate,
    pub model_version: String,
    pub tier_counts: BTreeMap<String, usize>,
    pub churn_type_counts: BTreeMap<String, usize>,
}

impl ScoringSummary {
    fn empty(score_date: NaiveDate, model_version: &str) -> Self {
        Self {
            total_scored: 0,
            score_date,
            model_version: model_version.to_string(),
            tier_counts: BTreeMap::new(),
            churn_type_counts: BTreeMap::new(),
        }
    }

    fn from_predictions(predictions: &[ScoredPrediction], score_date: NaiveDate, model_version: &str) -> Self {
        let mut summary = Self::empty(score_date, model_version);
        summary.total_scored = predictions.len();
        for p in predictions {
            *summary.tier_counts.entry(p.risk_tier.to_string()).or_default() += 1;
            *summary
                .churn_type_counts
                .entry(p.churn_type.to_string())
                .or_default() += 1;
        }
        summary
    }

    pub fn tier_count(&self, tier: RiskTier) -> usize {
        self.tier_counts.get(tier.as_str()).copied().unwrap_or(0)
    }

    pub fn churn_type_count(&self, churn_type: ChurnType) -> usize {
        self.churn_type_counts.get(churn_type.as_str()).copied().unwrap_or(0)
    }
}

pub struct BatchScorer {
    config: PipelineConfig,
    ensemble: StackingEnsemble,
    templates: &'static TemplateTable,
    model_version: String,
    score_date: NaiveDate,
}

impl BatchScorer {
    /// Load the model saved in `model_dir`; its directory name is the version
    pub fn load(model_dir: &Path, config: PipelineConfig) -> Result<Self> {
        let model_version = model_dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                SdkError::ConfigError(format!("invalid model directory {}", model_dir.display()))
            })?;

        let mut ensemble = StackingEnsemble::new(FeatureRegistry::standard(), &config.model);
        ensemble.load(model_dir)?;
        info!("Loaded model {} from {}", model_version, model_dir.display());

        Self::from_ensemble(ensemble, model_version, config)
    }

    /// Score with an ensemble already in memory
    pub fn from_ensemble(
        ensemble: StackingEnsemble,
        model_version: impl Into<String>,
        config: PipelineConfig,
    ) -> Result<Self> {
        if !ensemble.is_fitted() {
            return Err(SdkError::ConfigError(
                "batch scorer needs a fitted ensemble".to_string(),
            ));
        }
        Ok(Self {
            config,
            ensemble,
            templates: TemplateTable::standard()?,
            model_version: model_version.into(),
            score_date: Local::now().date_naive(),
        })
    }

    pub fn with_score_date(mut self, score_date: NaiveDate) -> Self {
        self.score_date = score_date;
        self
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn score_date(&self) -> NaiveDate {
        self.score_date
    }

    pub fn ensemble(&self) -> &StackingEnsemble {
        &self.ensemble
    }

    /// Predictions for every active member, nothing written
    pub async fn score(&self, samples: &dyn SampleStore) -> Result<Vec<ScoredPrediction>> {
        let model = &self.config.model;
        let registry = FeatureRegistry::standard();

        if self.config.refresh_views {
            info!("Refreshing warehouse views");
            samples.refresh().await?;
        }

        let rows = samples.active_members(&model.branch_ids, self.score_date).await?;
        if rows.is_empty() {
            warn!("No active members found for branches {:?}", model.branch_ids);
            return Ok(Vec::new());
        }
        info!("Scoring {} active members", rows.len());

        let loader = DataLoader::new(registry, model);
        let table = loader.prepare_features(&rows)?;
        check_null_rates(&table, registry, &model.monitoring)?;

        let probabilities = self.ensemble.predict_proba(&table)?;
        let tiers = self.ensemble.predict_risk_tier(&probabilities)?;

        let classifier = ChurnTypeClassifier::new(model);
        let churn_types = classifier.classify_table(&table, &tiers)?;
        let playbooks = classifier.assign_playbooks(&tiers, &churn_types);

        let reasons = self.explain_by_branch(&table, samples).await?;

        let predictions = (0..table.len())
            .map(|i| {
                let meta = &table.meta()[i];
                ScoredPrediction {
                    member_id: meta.member_id,
                    branch_id: meta.branch_id,
                    score_date: self.score_date,
                    churn_probability: probabilities[i],
                    risk_tier: tiers[i],
                    churn_type: churn_types[i],
                    playbook_id: playbooks[i].clone(),
                    top_3_reasons: reasons[i].clone(),
                    days_until_contract_end: table.value(i, "days_until_contract_end"),
                    days_since_last_checkin: table.value(i, "days_since_last_checkin"),
                    avg_weekly_checkins: table.value(i, "avg_weekly_checkins_90d"),
                    segment: DEFAULT_SEGMENT.to_string(),
                    model_version: self.model_version.clone(),
                }
            })
            .collect();
        Ok(predictions)
    }

    /// Explanations grouped by branch; branch averages are fetched once per branch
    async fn explain_by_branch(
        &self,
        table: &FeatureTable,
        samples: &dyn SampleStore,
    ) -> Result<Vec<Vec<Reason>>> {
        let mut by_branch: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, meta) in table.meta().iter().enumerate() {
            by_branch.entry(meta.branch_id).or_default().push(i);
        }

        let since = self
            .score_date
            .checked_sub_signed(Duration::days(self.config.model.branch_stats_window_days))
            .unwrap_or(self.score_date);
        let engine = ExplanationEngine::new(&self.ensemble, self.templates);

        let mut reasons = vec![Vec::new(); table.len()];
        for (branch_id, indices) in by_branch {
            let stats = samples.branch_stats(branch_id, since).await?;
            let rows = engine.explain_batch(&table.select(&indices), &stats)?;
            for (i, row) in indices.into_iter().zip(rows) {
                reasons[i] = row;
            }
        }
        Ok(reasons)
    }

    /// Score and publish the day's predictions
    pub async fn run(
        &self,
        samples: &dyn SampleStore,
        predictions: &dyn PredictionStore,
    ) -> Result<ScoringSummary> {
        info!(
            "========== DAILY SCORING {} (model {}) ==========",
            self.score_date, self.model_version
        );
        let scored = self.score(samples).await?;
        if scored.is_empty() {
            return Ok(ScoringSummary::empty(self.score_date, &self.model_version));
        }

        predictions.publish(self.score_date, &scored).await?;

        let summary = ScoringSummary::from_predictions(&scored, self.score_date, &self.model_version);
        info!("Scored {} members", summary.total_scored);
        for (tier, n) in &summary.tier_counts {
            info!("  {}: {}", tier, n);
        }
        for (churn_type, n) in &summary.churn_type_counts {
            info!("  {}: {}", churn_type, n);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(tier: RiskTier, churn_type: ChurnType) -> ScoredPrediction {
        ScoredPrediction {
            member_id: 1,
            branch_id: 59,
            score_date: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            churn_probability: 0.5,
            risk_tier: tier,
            churn_type,
            playbook_id: "PB".to_string(),
            top_3_reasons: Vec::new(),
            days_until_contract_end: None,
            days_since_last_checkin: None,
            avg_weekly_checkins: None,
            segment: DEFAULT_SEGMENT.to_string(),
            model_version: "v1".to_string(),
        }
    }

    #[test]
    fn test_summary_counts() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap();
        let summary = ScoringSummary::from_predictions(
            &[
                prediction(RiskTier::High, ChurnType::Default),
                prediction(RiskTier::High, ChurnType::Behavioral),
                prediction(RiskTier::Low, ChurnType::None),
            ],
            date,
            "v1",
        );
        assert_eq!(summary.total_scored, 3);
        assert_eq!(summary.tier_count(RiskTier::High), 2);
        assert_eq!(summary.tier_count(RiskTier::Medium), 0);
        assert_eq!(summary.churn_type_count(ChurnType::Default), 1);
    }

    #[test]
    fn test_unfitted_ensemble_is_rejected() {
        let config = PipelineConfig::new();
        let ensemble = StackingEnsemble::new(FeatureRegistry::standard(), &config.model);
        assert!(matches!(
            BatchScorer::from_ensemble(ensemble, "v1", config),
            Err(SdkError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_missing_model_dir_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let result = BatchScorer::load(&tmp.path().join("v20250101_000000"), PipelineConfig::new());
        assert!(matches!(result, Err(SdkError::RuntimeError(_))));
    }
}
