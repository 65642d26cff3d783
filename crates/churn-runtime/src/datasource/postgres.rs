//! PostgreSQL sample store over `ml.training_samples` and the analytics views

use super::SampleStore;
use crate::error::{Result, RuntimeError};
use crate::explain::{BranchStats, BRANCH_STAT_FEATURES};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use churn_core::{LabelType, RawSample, SampleMeta, Value};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row};
use std::collections::HashMap;

/// Views rebuilt before each scoring run, in dependency order
const MATERIALIZED_VIEWS: [&str; 4] = [
    "analytics.mv_contract_classified",
    "analytics.mv_spells_v2",
    "analytics.mv_churn_events",
    "analytics.mv_member_kpi_base",
];

const META_COLUMNS: [&str; 7] = [
    "member_id",
    "id_member",
    "branch_id",
    "reference_date",
    "prediction_horizon",
    "label_type",
    "churned_in_30d",
];

const TRAINING_SQL: &str = "SELECT * FROM ml.training_samples \
     WHERE reference_date >= $1 AND reference_date < $2 \
       AND label_type IN ('CHURN', 'ACTIVE') \
     ORDER BY reference_date, member_id";

const SNAPSHOT_SQL: &str = "SELECT * FROM ml.training_samples \
     WHERE reference_date >= $1 AND reference_date < $2";

const ACTIVE_MEMBERS_SQL: &str = "WITH active_regular AS ( \
         SELECT DISTINCT m.id_member AS member_id, m.id_branch AS branch_id \
         FROM core.evo_members m \
         JOIN analytics.mv_contract_classified cc ON cc.member_id = m.id_member \
         WHERE cc.segmento = 'REGULAR' AND cc.status = 'Ativo' \
           AND m.id_branch = ANY($1) \
     ) \
     SELECT ar.member_id, ar.branch_id, kpi.* \
     FROM active_regular ar \
     LEFT JOIN analytics.mv_member_kpi_base kpi ON kpi.id_member = ar.member_id";

pub struct PgSampleStore {
    pool: PgPool,
}

impl PgSampleStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        tracing::info!("Creating PostgreSQL connection pool");
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| RuntimeError::DataSource(format!("Failed to connect to PostgreSQL: {}", e)))?;
        tracing::info!(
            "PostgreSQL connection pool created (max_connections: {})",
            max_connections.max(1)
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_range(&self, sql: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawSample>> {
        let rows = sqlx::query(sql)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|r| decode_sample(r, None)).collect()
    }
}

#[async_trait]
impl SampleStore for PgSampleStore {
    async fn training_samples(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawSample>> {
        let rows = self.fetch_range(TRAINING_SQL, start, end).await?;
        tracing::debug!("Fetched {} training rows", rows.len());
        Ok(rows)
    }

    async fn active_members(&self, branch_ids: &[i64], as_of: NaiveDate) -> Result<Vec<RawSample>> {
        let rows = sqlx::query(ACTIVE_MEMBERS_SQL)
            .bind(branch_ids)
            .fetch_all(&self.pool)
            .await?;
        tracing::info!("Loaded {} active REGULAR members for scoring", rows.len());
        rows.iter().map(|r| decode_sample(r, Some(as_of))).collect()
    }

    async fn feature_snapshot(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<RawSample>> {
        self.fetch_range(SNAPSHOT_SQL, start, end).await
    }

    async fn branch_stats(&self, branch_id: i64, since: NaiveDate) -> Result<BranchStats> {
        let select = BRANCH_STAT_FEATURES
            .iter()
            .map(|f| format!("AVG({f})::FLOAT8 AS {f}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM ml.training_samples \
             WHERE branch_id = $1 AND label_type = 'ACTIVE' AND reference_date >= $2",
            select
        );
        let row = sqlx::query(&sql)
            .bind(branch_id)
            .bind(since)
            .fetch_one(&self.pool)
            .await?;

        let mut stats = BranchStats::new();
        for feature in BRANCH_STAT_FEATURES {
            // AVG over no rows is NULL
            if let Some(v) = row.try_get::<Option<f64>, _>(feature)? {
                stats.insert(feature.to_string(), v);
            }
        }
        Ok(stats)
    }

    async fn refresh(&self) -> Result<()> {
        tracing::info!("Refreshing materialized views...");
        let mut tx = self.pool.begin().await?;
        for view in MATERIALIZED_VIEWS {
            tracing::info!("Refreshing {}...", view);
            sqlx::query(&format!("REFRESH MATERIALIZED VIEW CONCURRENTLY {}", view))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::info!("All materialized views refreshed");
        Ok(())
    }
}

fn decode_sample(row: &PgRow, as_of: Option<NaiveDate>) -> Result<RawSample> {
    let member_id = row
        .try_get::<i64, _>("member_id")
        .or_else(|_| row.try_get::<i32, _>("member_id").map(i64::from))?;
    let branch_id = row
        .try_get::<i64, _>("branch_id")
        .or_else(|_| row.try_get::<i32, _>("branch_id").map(i64::from))?;
    let reference_date = match as_of {
        Some(date) => date,
        None => row.try_get::<NaiveDate, _>("reference_date")?,
    };

    let mut meta = SampleMeta::new(member_id, branch_id, reference_date);
    meta.prediction_horizon = row.try_get::<Option<String>, _>("prediction_horizon").ok().flatten();
    meta.label_type = row
        .try_get::<Option<String>, _>("label_type")
        .ok()
        .flatten()
        .and_then(|s| LabelType::parse(&s));

    let mut columns = HashMap::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        if META_COLUMNS.contains(&name) {
            continue;
        }
        columns.insert(name.to_string(), decode_value(row, idx));
    }

    Ok(RawSample {
        meta,
        churned_in_30d: row.try_get::<Option<bool>, _>("churned_in_30d").ok().flatten(),
        columns,
    })
}

/// Best-effort conversion of one cell. NUMERIC goes through BigDecimal.
fn decode_value(row: &PgRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<bigdecimal::BigDecimal>, _>(idx) {
        return v
            .and_then(|bd| bd.to_string().parse::<f64>().ok())
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(Value::Number).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map(|f| Value::Number(f as f64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|i| Value::from(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map(|i| Value::from(i as i64)).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<NaiveDate>, _>(idx) {
        return v.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
        return v.map(|dt| Value::String(dt.to_rfc3339())).unwrap_or(Value::Null);
    }
    tracing::debug!("Column {} has an unsupported type, reading as NULL", idx);
    Value::Null
}
