//! Shared fixtures for pipeline tests

#![allow(dead_code)]

use chrono::{Days, Months, NaiveDate, Utc};
use churn_core::registry::{BoosterOverride, Encoding, FeatureRegistry, ModelConfig, SpecialistOverrides};
use churn_core::{ChurnType, LabelType, RawSample, RiskTier, SampleMeta, Value};
use churn_runtime::HistoryRecord;
use churn_sdk::PipelineConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Eight months of data from March 2024: validation folds June to
/// September, holdout October.
pub fn pipeline_config(output_dir: &Path) -> PipelineConfig {
    let mut model = ModelConfig::default();
    model.booster.n_estimators = 30;
    model.booster.max_depth = 3;
    model.booster.learning_rate = 0.25;
    model.booster.min_child_weight = 1.0;
    model.booster.early_stopping_rounds = 10;
    model.overrides = SpecialistOverrides {
        xgb_freq: BoosterOverride::default(),
        xgb_fin: BoosterOverride::default(),
        xgb_tenure: BoosterOverride::default(),
        xgb_context: BoosterOverride::default(),
    };
    model.walk_forward.train_start = ymd(2024, 3, 1);
    model.walk_forward.validation_offset_months = 3;
    model.walk_forward.test_start = ymd(2024, 10, 1);
    model.walk_forward.test_end = ymd(2024, 11, 1);
    model.walk_forward.data_cutoff = ymd(2024, 11, 1);
    model.walk_forward.min_val_positives = 5;
    model.branch_ids = vec![59, 60];

    PipelineConfig::new()
        .with_model_config(model)
        .with_output_dir(output_dir)
}

/// Every raw feature filled; churners stop coming and near contract end
pub fn gym_member(rng: &mut StdRng, member_id: i64, branch_id: i64, date: NaiveDate, churner: bool) -> RawSample {
    let registry = FeatureRegistry::standard();
    let mut row = RawSample::new(SampleMeta::new(member_id, branch_id, date));
    for name in registry.raw_features() {
        let value = match registry.get(&name).map(|d| d.encoding) {
            Some(Encoding::Boolean) => Value::Bool(rng.gen_bool(0.15)),
            Some(Encoding::Categorical) => Value::from(if rng.gen_bool(0.5) { "F" } else { "M" }),
            _ => Value::Number(rng.gen_range(1.0..90.0_f64).round()),
        };
        row = row.with_column(name, value);
    }

    if churner {
        row.with_column("days_since_last_checkin", rng.gen_range(15.0..50.0_f64).round())
            .with_column("checkins_last_7d", 0.0)
            .with_column("checkins_last_30d", rng.gen_range(0.0..2.0_f64).round())
            .with_column("avg_weekly_checkins_90d", rng.gen_range(0.0..0.8))
            .with_column("checkin_trend", -0.5)
            .with_column("days_until_contract_end", rng.gen_range(0.0..20.0_f64).round())
            .with_column("has_open_receivable", rng.gen_bool(0.5))
    } else {
        row.with_column("days_since_last_checkin", rng.gen_range(0.0..6.0_f64).round())
            .with_column("checkins_last_7d", rng.gen_range(2.0..6.0_f64).round())
            .with_column("checkins_last_30d", rng.gen_range(8.0..20.0_f64).round())
            .with_column("avg_weekly_checkins_90d", rng.gen_range(2.0..5.0))
            .with_column("checkin_trend", rng.gen_range(-0.1..0.3))
            .with_column("days_until_contract_end", rng.gen_range(30.0..300.0_f64).round())
            .with_column("has_open_receivable", false)
    }
}

/// Labeled history: `per_month` rows a month for `months` months
pub fn training_samples(seed: u64, start: NaiveDate, months: u32, per_month: usize) -> Vec<RawSample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::new();
    for m in 0..months {
        for k in 0..per_month {
            let member_id = (m as usize * per_month + k + 1) as i64;
            let date = start + Months::new(m) + Days::new((k % 28) as u64);
            let churner = rng.gen_bool(0.3);
            // a few noisy labels
            let label = if rng.gen_bool(0.04) { !churner } else { churner };
            let mut row = gym_member(&mut rng, member_id, 59 + member_id % 2, date, churner);
            row.meta.label_type = Some(if label { LabelType::Churn } else { LabelType::Active });
            rows.push(row.with_label(label));
        }
    }
    rows
}

/// Unlabeled current rows for scoring
pub fn active_members(seed: u64, count: usize) -> Vec<RawSample> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|k| {
            let member_id = 10_000 + k as i64;
            let churner = k % 4 == 0;
            gym_member(&mut rng, member_id, 59 + member_id % 2, ymd(2024, 11, 1), churner)
        })
        .collect()
}

/// Blocked for non-payment and absent for weeks
pub fn blocked_defaulter(member_id: i64) -> RawSample {
    let mut rng = StdRng::seed_from_u64(member_id as u64);
    gym_member(&mut rng, member_id, 59, ymd(2024, 11, 1), true)
        .with_column("has_open_receivable", true)
        .with_column("days_since_last_payment", 45.0)
        .with_column("days_since_last_checkin", 40.0)
}

pub fn verified(member_id: i64, score_date: NaiveDate, tier: RiskTier, p: f64, churned: bool) -> HistoryRecord {
    HistoryRecord {
        member_id,
        branch_id: 59,
        score_date,
        churn_probability: p,
        risk_tier: tier,
        churn_type: ChurnType::None,
        playbook_id: "PB_LOW_ACTIVE".to_string(),
        model_version: "v20240901_000000".to_string(),
        actual_churned: Some(churned),
        outcome_verified_at: Some(Utc::now()),
    }
}
