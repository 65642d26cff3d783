//! Prediction persistence
//!
//! Two tables back a scoring run:
//! - `churn_predictions`: one current row per member, keyed by score date.
//!   A run deletes that day's rows and inserts the new ones.
//! - `churn_predictions_history`: append-only log read by the drift monitor.
//!   Rows gain `actual_churned` / `outcome_verified_at` once ground truth
//!   is known.
//!
//! Both writes happen in one unit: a failed run leaves the day untouched.

use crate::error::{Result, RuntimeError};
use crate::explain::Reason;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use churn_core::{ChurnType, RiskTier};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::RwLock;

/// One member's prediction for a scoring day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPrediction {
    pub member_id: i64,
    pub branch_id: i64,
    pub score_date: NaiveDate,
    pub churn_probability: f64,
    pub risk_tier: RiskTier,
    pub churn_type: ChurnType,
    pub playbook_id: String,
    pub top_3_reasons: Vec<Reason>,
    pub days_until_contract_end: Option<f64>,
    pub days_since_last_checkin: Option<f64>,
    pub avg_weekly_checkins: Option<f64>,
    pub segment: String,
    pub model_version: String,
}

/// A history row as read back by the drift monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub member_id: i64,
    pub branch_id: i64,
    pub score_date: NaiveDate,
    pub churn_probability: f64,
    pub risk_tier: RiskTier,
    pub churn_type: ChurnType,
    pub playbook_id: String,
    pub model_version: String,
    #[serde(default)]
    pub actual_churned: Option<bool>,
    #[serde(default)]
    pub outcome_verified_at: Option<DateTime<Utc>>,
}

impl HistoryRecord {
    pub fn from_prediction(p: &ScoredPrediction) -> Self {
        Self {
            member_id: p.member_id,
            branch_id: p.branch_id,
            score_date: p.score_date,
            churn_probability: p.churn_probability,
            risk_tier: p.risk_tier,
            churn_type: p.churn_type,
            playbook_id: p.playbook_id.clone(),
            model_version: p.model_version.clone(),
            actual_churned: None,
            outcome_verified_at: None,
        }
    }

    /// Outcome is known and usable for monitoring
    pub fn verified_outcome(&self) -> Option<bool> {
        self.outcome_verified_at.and(self.actual_churned)
    }
}

/// An intervention run for a prediction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlaybookExecution {
    pub member_id: i64,
    pub prediction_date: NaiveDate,
    pub playbook_id: String,
}

/// Lookup of (member, prediction date) pairs that received an intervention
pub fn execution_index(executions: &[PlaybookExecution]) -> HashSet<(i64, NaiveDate)> {
    executions
        .iter()
        .map(|e| (e.member_id, e.prediction_date))
        .collect()
}

#[async_trait]
pub trait PredictionStore: Send + Sync {
    /// Replace `score_date`'s current predictions and append them to history
    async fn publish(&self, score_date: NaiveDate, predictions: &[ScoredPrediction]) -> Result<()>;

    /// Current predictions for one day
    async fn current(&self, score_date: NaiveDate) -> Result<Vec<ScoredPrediction>>;

    /// History rows with a verified outcome and `score_date >= since`
    async fn verified_history(&self, since: NaiveDate) -> Result<Vec<HistoryRecord>>;

    async fn playbook_executions(&self, since: NaiveDate) -> Result<Vec<PlaybookExecution>>;
}

#[derive(Debug, Default)]
struct MemoryTables {
    current: Vec<ScoredPrediction>,
    history: Vec<HistoryRecord>,
    executions: Vec<PlaybookExecution>,
}

/// Prediction store held in memory
#[derive(Debug, Default)]
pub struct InMemoryPredictionStore {
    tables: RwLock<MemoryTables>,
}

impl InMemoryPredictionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the ground truth for a history row
    pub async fn verify_outcome(
        &self,
        member_id: i64,
        score_date: NaiveDate,
        churned: bool,
        verified_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut found = false;
        for row in tables
            .history
            .iter_mut()
            .filter(|r| r.member_id == member_id && r.score_date == score_date)
        {
            row.actual_churned = Some(churned);
            row.outcome_verified_at = Some(verified_at);
            found = true;
        }
        if !found {
            return Err(RuntimeError::DataSource(format!(
                "no history row for member {} on {}",
                member_id, score_date
            )));
        }
        Ok(())
    }

    pub async fn record_execution(&self, execution: PlaybookExecution) {
        self.tables.write().await.executions.push(execution);
    }

    pub async fn append_history(&self, records: Vec<HistoryRecord>) {
        self.tables.write().await.history.extend(records);
    }

    pub async fn history_len(&self) -> usize {
        self.tables.read().await.history.len()
    }
}

#[async_trait]
impl PredictionStore for InMemoryPredictionStore {
    async fn publish(&self, score_date: NaiveDate, predictions: &[ScoredPrediction]) -> Result<()> {
        if let Some(p) = predictions.iter().find(|p| p.score_date != score_date) {
            return Err(RuntimeError::InvalidInput(format!(
                "prediction for member {} is dated {}, run date is {}",
                p.member_id, p.score_date, score_date
            )));
        }
        let mut tables = self.tables.write().await;
        tables.current.retain(|p| p.score_date != score_date);
        tables.current.extend(predictions.iter().cloned());
        tables
            .history
            .extend(predictions.iter().map(HistoryRecord::from_prediction));
        Ok(())
    }

    async fn current(&self, score_date: NaiveDate) -> Result<Vec<ScoredPrediction>> {
        Ok(self
            .tables
            .read()
            .await
            .current
            .iter()
            .filter(|p| p.score_date == score_date)
            .cloned()
            .collect())
    }

    async fn verified_history(&self, since: NaiveDate) -> Result<Vec<HistoryRecord>> {
        Ok(self
            .tables
            .read()
            .await
            .history
            .iter()
            .filter(|r| r.outcome_verified_at.is_some() && r.score_date >= since)
            .cloned()
            .collect())
    }

    async fn playbook_executions(&self, since: NaiveDate) -> Result<Vec<PlaybookExecution>> {
        Ok(self
            .tables
            .read()
            .await
            .executions
            .iter()
            .filter(|e| e.prediction_date >= since)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
    }

    fn prediction(member_id: i64, score_date: NaiveDate) -> ScoredPrediction {
        ScoredPrediction {
            member_id,
            branch_id: 59,
            score_date,
            churn_probability: 0.8,
            risk_tier: RiskTier::High,
            churn_type: ChurnType::Behavioral,
            playbook_id: "PB_HIGH_BEHAVIORAL".to_string(),
            top_3_reasons: Vec::new(),
            days_until_contract_end: Some(12.0),
            days_since_last_checkin: Some(20.0),
            avg_weekly_checkins: None,
            segment: "REGULAR".to_string(),
            model_version: "v20250901_000000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_replaces_day_and_appends_history() {
        let store = InMemoryPredictionStore::new();
        store.publish(day(1), &[prediction(1, day(1)), prediction(2, day(1))]).await.unwrap();
        store.publish(day(1), &[prediction(3, day(1))]).await.unwrap();

        let current = store.current(day(1)).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].member_id, 3);
        assert_eq!(store.history_len().await, 3);
    }

    #[tokio::test]
    async fn test_publish_rejects_mismatched_dates() {
        let store = InMemoryPredictionStore::new();
        let err = store.publish(day(2), &[prediction(1, day(1))]).await;
        assert!(err.is_err());
        assert_eq!(store.history_len().await, 0);
    }

    #[tokio::test]
    async fn test_only_verified_history_is_returned() {
        let store = InMemoryPredictionStore::new();
        store.publish(day(1), &[prediction(1, day(1)), prediction(2, day(1))]).await.unwrap();
        store.verify_outcome(1, day(1), true, Utc::now()).await.unwrap();
        assert!(store.verify_outcome(9, day(1), true, Utc::now()).await.is_err());

        let verified = store.verified_history(day(1)).await.unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].verified_outcome(), Some(true));
        assert!(store.verified_history(day(2)).await.unwrap().is_empty());
    }
}
