//! Drift monitor runner
//!
//! Reads feature snapshots from the sample store and verified history from
//! the prediction store, then hands them to the runtime drift statistics.

use crate::config::{DriftWindows, PipelineConfig};
use crate::error::Result;
use chrono::{Local, Months, NaiveDate};
use churn_core::registry::FeatureRegistry;
use churn_core::FeatureTable;
use churn_runtime::drift::{concept_drift, feature_drift, hit_rate_by_tier, HIT_RATE_WINDOW_MONTHS};
use churn_runtime::{
    DataLoader, DriftReport, FeatureDrift, MonthlyDrift, PredictionStore, SampleStore, TierHitRate,
};
use tracing::info;

pub struct DriftMonitor {
    config: PipelineConfig,
    today: NaiveDate,
}

impl DriftMonitor {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            today: Local::now().date_naive(),
        }
    }

    /// Run as of another day
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    async fn snapshot(&self, samples: &dyn SampleStore, start: NaiveDate, end: NaiveDate) -> Result<FeatureTable> {
        let rows = samples.feature_snapshot(start, end).await?;
        let loader = DataLoader::new(FeatureRegistry::standard(), &self.config.model);
        Ok(loader.prepare_features(&rows)?)
    }

    /// PSI of every registry feature, reference window against current window
    pub async fn check_feature_drift(
        &self,
        samples: &dyn SampleStore,
        windows: &DriftWindows,
    ) -> Result<Vec<FeatureDrift>> {
        let (cur_start, cur_end) = windows.current_range(self.today);
        info!(
            "Feature drift: reference [{}, {}) vs current [{}, {})",
            windows.reference_start, windows.reference_end, cur_start, cur_end
        );

        let reference = self
            .snapshot(samples, windows.reference_start, windows.reference_end)
            .await?;
        let current = self.snapshot(samples, cur_start, cur_end).await?;
        info!(
            "Reference: {} samples, current: {} samples",
            reference.len(),
            current.len()
        );

        Ok(feature_drift(
            &reference,
            &current,
            FeatureRegistry::standard().all_features(),
            &self.config.model.monitoring,
        ))
    }

    /// Predicted vs. observed churn per month over the lookback window
    pub async fn check_concept_drift(&self, predictions: &dyn PredictionStore) -> Result<Vec<MonthlyDrift>> {
        let monitoring = &self.config.model.monitoring;
        let history = predictions
            .verified_history(self.months_back(monitoring.concept_drift_lookback_months))
            .await?;
        Ok(concept_drift(
            &history,
            self.today,
            monitoring.concept_drift_lookback_months,
            monitoring.concept_drift_ratio,
        ))
    }

    /// Hit rate per tier over the trailing hit-rate window
    pub async fn check_hit_rate(&self, predictions: &dyn PredictionStore) -> Result<Vec<TierHitRate>> {
        let since = self.months_back(HIT_RATE_WINDOW_MONTHS);
        let history = predictions.verified_history(since).await?;
        let executions = predictions.playbook_executions(since).await?;
        Ok(hit_rate_by_tier(
            &history,
            &executions,
            self.today,
            self.config.model.monitoring.hit_rate_floor,
        ))
    }

    pub async fn run_full_check(
        &self,
        samples: &dyn SampleStore,
        predictions: &dyn PredictionStore,
    ) -> Result<DriftReport> {
        info!("========== DRIFT CHECK {} ==========", self.today);
        self.config.drift.validate()?;

        let feature = self.check_feature_drift(samples, &self.config.drift).await?;
        let concept = self.check_concept_drift(predictions).await?;
        let hit_rate = self.check_hit_rate(predictions).await?;
        Ok(DriftReport::new(feature, concept, hit_rate))
    }

    fn months_back(&self, months: u32) -> NaiveDate {
        self.today
            .checked_sub_months(Months::new(months))
            .unwrap_or(NaiveDate::MIN)
    }
}
