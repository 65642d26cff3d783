//! Shared fixtures: deterministic synthetic members and a fast model config

#![allow(dead_code)]

use chrono::{Days, Months, NaiveDate};
use churn_core::registry::{BoosterOverride, FeatureRegistry, ModelConfig, SpecialistOverrides};
use churn_core::{LabelType, RawSample, SampleMeta, Value};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Small trees so the suite stays fast
pub fn fast_config() -> ModelConfig {
    let mut config = ModelConfig::default();
    config.booster.n_estimators = 40;
    config.booster.max_depth = 3;
    config.booster.learning_rate = 0.2;
    config.booster.min_child_weight = 1.0;
    config.booster.early_stopping_rounds = 10;
    config.overrides = SpecialistOverrides {
        xgb_freq: BoosterOverride::default(),
        xgb_fin: BoosterOverride::default(),
        xgb_tenure: BoosterOverride::default(),
        xgb_context: BoosterOverride::default(),
    };
    config
}

/// One synthetic member row. Churners stop checking in and their
/// contracts are close to ending; labels are flipped for ~5% of rows.
pub fn member(rng: &mut StdRng, member_id: i64, branch_id: i64, date: NaiveDate) -> RawSample {
    let churn = rng.gen_bool(0.3);
    let label = if rng.gen_bool(0.05) { !churn } else { churn };
    let label_type = if label { LabelType::Churn } else { LabelType::Active };

    let mut sample = RawSample::new(SampleMeta::new(member_id, branch_id, date).with_label_type(label_type))
        .with_label(label);

    let registry = FeatureRegistry::standard();
    for name in registry.raw_features() {
        let value = match registry.get(&name).map(|d| d.encoding) {
            Some(churn_core::registry::Encoding::Boolean) => Value::Bool(rng.gen_bool(0.2)),
            Some(churn_core::registry::Encoding::Categorical) => {
                Value::from(if rng.gen_bool(0.5) { "M" } else { "F" })
            }
            _ => Value::Number(rng.gen_range(0.0..100.0_f64).round()),
        };
        sample = sample.with_column(name, value);
    }

    let (days_inactive, weekly, contract_left) = if churn {
        (rng.gen_range(12.0..60.0), rng.gen_range(0.0..1.0), rng.gen_range(0.0..25.0))
    } else {
        (rng.gen_range(0.0..8.0), rng.gen_range(2.0..6.0), rng.gen_range(20.0..300.0))
    };
    sample
        .with_column("days_since_last_checkin", f64::round(days_inactive))
        .with_column("checkins_last_7d", if churn { 0.0 } else { f64::round(weekly) })
        .with_column("checkins_last_30d", f64::round(weekly * 4.0))
        .with_column("avg_weekly_checkins_90d", weekly)
        .with_column("checkin_trend", if churn { -0.6 } else { rng.gen_range(-0.1..0.3) })
        .with_column("days_until_contract_end", f64::round(contract_left))
        .with_column("has_open_receivable", churn && rng.gen_bool(0.4))
        .with_column("days_since_last_payment", f64::round(rng.gen_range(0.0..40.0)))
}

/// `per_month` rows on each month starting at `start`
pub fn synthetic_samples(seed: u64, start: NaiveDate, months: u32, per_month: usize) -> Vec<RawSample> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut rows = Vec::with_capacity(months as usize * per_month);
    let mut id = 0;
    for m in 0..months {
        let month = start + Months::new(m);
        for k in 0..per_month {
            id += 1;
            let date = month + Days::new((k % 28) as u64);
            rows.push(member(&mut rng, id, 59 + (id % 2), date));
        }
    }
    rows
}

/// A member that is blocked for non-payment and has stopped coming
pub fn defaulter(member_id: i64, date: NaiveDate) -> RawSample {
    let mut rng = StdRng::seed_from_u64(member_id as u64);
    member(&mut rng, member_id, 59, date)
        .with_column("has_open_receivable", true)
        .with_column("days_since_last_payment", 45.0)
        .with_column("days_since_last_checkin", 40.0)
}
