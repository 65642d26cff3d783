use super::persistence::{HistoryRecord, PlaybookExecution, PredictionStore, ScoredPrediction};
use crate::error::{Result, RuntimeError};
use crate::explain::Reason;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use churn_core::{ChurnType, RiskTier};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Prediction store backed by `ml.churn_predictions`,
/// `ml.churn_predictions_history` and `ml.playbook_executions`
pub struct PgPredictionStore {
    pool: PgPool,
}

impl PgPredictionStore {
    pub fn new(pool: PgPool) -> Self {
        tracing::info!("Creating PgPredictionStore with database connection pool");
        Self { pool }
    }
}

#[async_trait]
impl PredictionStore for PgPredictionStore {
    async fn publish(&self, score_date: NaiveDate, predictions: &[ScoredPrediction]) -> Result<()> {
        tracing::debug!("Starting publish transaction for score_date {}", score_date);
        let scored_at = Utc::now();

        let mut tx = self.pool.begin().await.map_err(|e| {
            tracing::error!("Failed to begin transaction: {}", e);
            RuntimeError::DataSource(format!("Failed to begin transaction: {}", e))
        })?;

        let deleted = sqlx::query("DELETE FROM ml.churn_predictions WHERE score_date = $1")
            .bind(score_date)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted > 0 {
            tracing::info!("Replaced {} existing predictions for {}", deleted, score_date);
        }

        for p in predictions {
            if p.score_date != score_date {
                return Err(RuntimeError::InvalidInput(format!(
                    "prediction for member {} is dated {}, run date is {}",
                    p.member_id, p.score_date, score_date
                )));
            }
            let reasons = serde_json::to_value(&p.top_3_reasons)?;

            sqlx::query(
                r#"
                INSERT INTO ml.churn_predictions (
                    member_id, branch_id, scored_at, churn_probability,
                    risk_tier, churn_type, top_3_reasons, playbook_id,
                    days_until_contract_end, days_since_last_checkin,
                    avg_weekly_checkins, segmento, model_version, score_date
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(p.member_id)
            .bind(p.branch_id)
            .bind(scored_at)
            .bind(round_to(p.churn_probability, 4))
            .bind(p.risk_tier.as_str())
            .bind(p.churn_type.as_str())
            .bind(&reasons)
            .bind(&p.playbook_id)
            .bind(p.days_until_contract_end.map(|d| d as i32))
            .bind(p.days_since_last_checkin.map(|d| d as i32))
            .bind(p.avg_weekly_checkins.map(|v| round_to(v, 2)))
            .bind(&p.segment)
            .bind(&p.model_version)
            .bind(p.score_date)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!("Failed to insert prediction for member {}: {}", p.member_id, e);
                RuntimeError::DataSource(format!("Failed to insert prediction: {}", e))
            })?;

            sqlx::query(
                r#"
                INSERT INTO ml.churn_predictions_history (
                    member_id, branch_id, scored_at, score_date,
                    churn_probability, risk_tier, churn_type, playbook_id, model_version
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(p.member_id)
            .bind(p.branch_id)
            .bind(scored_at)
            .bind(p.score_date)
            .bind(round_to(p.churn_probability, 4))
            .bind(p.risk_tier.as_str())
            .bind(p.churn_type.as_str())
            .bind(&p.playbook_id)
            .bind(&p.model_version)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.map_err(|e| {
            tracing::error!("Failed to commit predictions for {}: {}", score_date, e);
            RuntimeError::DataSource(format!("Failed to commit transaction: {}", e))
        })?;
        tracing::info!(
            "Wrote {} predictions to ml.churn_predictions and history (score_date={})",
            predictions.len(),
            score_date
        );
        Ok(())
    }

    async fn current(&self, score_date: NaiveDate) -> Result<Vec<ScoredPrediction>> {
        let rows = sqlx::query(
            r#"
            SELECT member_id, branch_id, score_date, churn_probability::FLOAT8 AS churn_probability,
                   risk_tier, churn_type, playbook_id, top_3_reasons,
                   days_until_contract_end::FLOAT8 AS days_until_contract_end,
                   days_since_last_checkin::FLOAT8 AS days_since_last_checkin,
                   avg_weekly_checkins::FLOAT8 AS avg_weekly_checkins,
                   segmento, model_version
            FROM ml.churn_predictions
            WHERE score_date = $1
            ORDER BY member_id
            "#,
        )
        .bind(score_date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ScoredPrediction> {
                let reasons: serde_json::Value = row.try_get("top_3_reasons")?;
                Ok(ScoredPrediction {
                    member_id: row.try_get("member_id")?,
                    branch_id: row.try_get("branch_id")?,
                    score_date: row.try_get("score_date")?,
                    churn_probability: row.try_get("churn_probability")?,
                    risk_tier: tier(row)?,
                    churn_type: churn_type(row)?,
                    playbook_id: row.try_get("playbook_id")?,
                    top_3_reasons: serde_json::from_value::<Vec<Reason>>(reasons)?,
                    days_until_contract_end: row.try_get("days_until_contract_end")?,
                    days_since_last_checkin: row.try_get("days_since_last_checkin")?,
                    avg_weekly_checkins: row.try_get("avg_weekly_checkins")?,
                    segment: row.try_get("segmento")?,
                    model_version: row.try_get("model_version")?,
                })
            })
            .collect()
    }

    async fn verified_history(&self, since: NaiveDate) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT member_id, branch_id, score_date, churn_probability::FLOAT8 AS churn_probability,
                   risk_tier, churn_type, playbook_id, model_version,
                   actual_churned, outcome_verified_at
            FROM ml.churn_predictions_history
            WHERE outcome_verified_at IS NOT NULL
              AND score_date >= $1
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<HistoryRecord> {
                Ok(HistoryRecord {
                    member_id: row.try_get("member_id")?,
                    branch_id: row.try_get("branch_id")?,
                    score_date: row.try_get("score_date")?,
                    churn_probability: row.try_get("churn_probability")?,
                    risk_tier: tier(row)?,
                    churn_type: churn_type(row)?,
                    playbook_id: row.try_get::<Option<String>, _>("playbook_id")?.unwrap_or_default(),
                    model_version: row.try_get("model_version")?,
                    actual_churned: row.try_get::<Option<bool>, _>("actual_churned")?,
                    outcome_verified_at: row.try_get::<Option<DateTime<Utc>>, _>("outcome_verified_at")?,
                })
            })
            .collect()
    }

    async fn playbook_executions(&self, since: NaiveDate) -> Result<Vec<PlaybookExecution>> {
        let rows = sqlx::query(
            "SELECT member_id, prediction_date, playbook_id FROM ml.playbook_executions \
             WHERE prediction_date >= $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<PlaybookExecution> {
                Ok(PlaybookExecution {
                    member_id: row.try_get("member_id")?,
                    prediction_date: row.try_get("prediction_date")?,
                    playbook_id: row.try_get("playbook_id")?,
                })
            })
            .collect()
    }
}

fn tier(row: &PgRow) -> Result<RiskTier> {
    let raw: String = row.try_get("risk_tier")?;
    RiskTier::parse(&raw).ok_or_else(|| RuntimeError::DataSource(format!("unknown risk tier: {}", raw)))
}

fn churn_type(row: &PgRow) -> Result<ChurnType> {
    let raw: String = row.try_get("churn_type")?;
    ChurnType::parse(&raw).ok_or_else(|| RuntimeError::DataSource(format!("unknown churn type: {}", raw)))
}

fn round_to(v: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (v * scale).round() / scale
}
