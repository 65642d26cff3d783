//! Data loader
//!
//! Turns loosely typed sample-store rows into a `FeatureTable` in registry
//! column order:
//! - booleans become 1.0 / 0.0 with NULL kept as NaN
//! - `gender` is encoded M=0, F=1, anything else 0.5
//! - `has_ever_checked_in` and `is_defaulter` are derived
//!
//! Training loads additionally run the leakage guard. Scoring loads share
//! `prepare_features` and go through the null-rate circuit breaker.

use crate::datasource::SampleStore;
use crate::error::{Result, RuntimeError};
use chrono::NaiveDate;
use churn_core::registry::{Encoding, FeatureRegistry, ModelConfig, MonitoringThresholds};
use churn_core::{FeatureTable, RawSample, Value};
use tracing::{error, info, warn};

const HAS_EVER_CHECKED_IN: &str = "has_ever_checked_in";
const IS_DEFAULTER: &str = "is_defaulter";
const AT_SPELL_END: &str = "at_spell_end";

pub struct DataLoader<'a> {
    registry: &'a FeatureRegistry,
    config: &'a ModelConfig,
}

impl<'a> DataLoader<'a> {
    pub fn new(registry: &'a FeatureRegistry, config: &'a ModelConfig) -> Self {
        Self { registry, config }
    }

    /// Labeled samples with `reference_date` in `[start, end)`, leakage-checked
    pub async fn load_training_samples(
        &self,
        store: &dyn SampleStore,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FeatureTable> {
        if start >= end {
            return Err(RuntimeError::InvalidInput(format!(
                "empty date range [{}, {})",
                start, end
            )));
        }
        info!("Loading training data: {} to {}", start, end);

        let rows: Vec<RawSample> = store
            .training_samples(start, end)
            .await?
            .into_iter()
            .filter(|r| r.meta.label_type.is_some())
            .filter(|r| r.meta.reference_date >= start && r.meta.reference_date < end)
            .collect();

        if let Some(r) = rows.iter().find(|r| r.churned_in_30d.is_none()) {
            return Err(RuntimeError::InvalidInput(format!(
                "training row for member {} on {} has no churned_in_30d label",
                r.meta.member_id, r.meta.reference_date
            )));
        }

        let table = self.prepare_features(&rows)?;
        let positives = table.positives();
        info!(
            "Loaded {} samples ({} positive, {} negative)",
            table.len(),
            positives,
            table.len() - positives
        );

        self.check_leakage(&table)?;
        self.log_diagnostics(&table);
        Ok(table)
    }

    /// Type enforcement and derived features for raw rows.
    ///
    /// A required warehouse column absent from every row is an error; a
    /// column missing from individual rows reads as NaN.
    pub fn prepare_features(&self, rows: &[RawSample]) -> Result<FeatureTable> {
        if !rows.is_empty() {
            let missing: Vec<String> = self
                .registry
                .raw_features()
                .into_iter()
                .filter(|f| rows.iter().all(|r| r.get(f).is_none()))
                .collect();
            if !missing.is_empty() {
                return Err(RuntimeError::MissingFeature(missing));
            }
        }

        let columns = self.registry.all_features().to_vec();
        let mut table = FeatureTable::new(columns.clone());
        let days_idx = index_of(&columns, "days_since_last_checkin");
        let receivable_idx = index_of(&columns, "has_open_receivable");
        let payment_idx = index_of(&columns, "days_since_last_payment");
        let renewal_days = self.config.rules.contract_renewal_cycle_days;

        for row in rows {
            let mut values: Vec<f64> = self
                .registry
                .definitions()
                .iter()
                .map(|def| match def.encoding {
                    _ if def.derived => f64::NAN,
                    Encoding::Boolean => boolean(row.get(&def.name)),
                    Encoding::Categorical => categorical(&def.name, row.get(&def.name)),
                    Encoding::Continuous => continuous(row.get(&def.name)),
                })
                .collect();

            let days = days_idx.map_or(f64::NAN, |j| values[j]);
            let receivable = receivable_idx.map_or(f64::NAN, |j| values[j]);
            let since_payment = payment_idx.map_or(f64::NAN, |j| values[j]);
            if let Some(j) = index_of(&columns, HAS_EVER_CHECKED_IN) {
                values[j] = if days.is_nan() { 0.0 } else { 1.0 };
            }
            if let Some(j) = index_of(&columns, IS_DEFAULTER) {
                // NaN comparisons are false
                let defaulter = receivable == 1.0 && since_payment > renewal_days;
                values[j] = if defaulter { 1.0 } else { 0.0 };
            }

            let label = row.churned_in_30d.map(u8::from);
            table.push_row(row.meta.clone(), values, label)?;
        }
        Ok(table)
    }

    /// Future-dated rows abort the run; suspicious at-spell-end activity is logged only
    pub fn check_leakage(&self, table: &FeatureTable) -> Result<()> {
        let cutoff = self.config.walk_forward.data_cutoff;
        let future = table
            .meta()
            .iter()
            .filter(|m| m.reference_date > cutoff)
            .count();
        if future > 0 {
            error!("{} samples dated after the data cutoff {}", future, cutoff);
            return Err(RuntimeError::Leakage(format!(
                "{} samples have reference_date after data cutoff {}",
                future, cutoff
            )));
        }

        let at_end: Vec<usize> = (0..table.len())
            .filter(|&i| {
                table.labels()[i] == Some(1)
                    && table.meta()[i].prediction_horizon.as_deref() == Some(AT_SPELL_END)
            })
            .collect();
        if !at_end.is_empty() {
            let checkins = mean_of(table, &at_end, "checkins_last_7d");
            let inactive = mean_of(table, &at_end, "days_since_last_checkin");
            info!(
                "Leakage check: churned at spell end avg checkins_7d={:.2}, avg days inactive={:.1}",
                checkins.unwrap_or(f64::NAN),
                inactive.unwrap_or(f64::NAN)
            );
            let threshold = self.config.monitoring.leakage_checkin_threshold;
            if checkins.is_some_and(|c| c > threshold) {
                warn!(
                    "POTENTIAL LEAKAGE: churned members at spell end average {:.1} check-ins in the last 7 days (expected < 1)",
                    checkins.unwrap_or_default()
                );
            }
        }
        Ok(())
    }

    /// Distribution of the derived flags
    pub fn log_diagnostics(&self, table: &FeatureTable) {
        if table.is_empty() {
            return;
        }
        if let Some(has_ever) = table.column(HAS_EVER_CHECKED_IN) {
            let share = has_ever.iter().filter(|&&v| v == 1.0).count() as f64 / table.len() as f64;
            info!(
                "has_ever_checked_in: {:.1}% true, {:.1}% false",
                share * 100.0,
                (1.0 - share) * 100.0
            );
        }
        if let Some(defaulter) = table.column(IS_DEFAULTER) {
            let rows: Vec<usize> = (0..table.len()).filter(|&i| defaulter[i] == 1.0).collect();
            info!(
                "is_defaulter: {} members ({:.1}%) identified as defaulters",
                rows.len(),
                rows.len() as f64 / table.len() as f64 * 100.0
            );
            if !rows.is_empty() {
                info!(
                    "Defaulter check: avg checkins_7d={:.2} (expected ~0, turnstile blocked)",
                    mean_of(table, &rows, "checkins_last_7d").unwrap_or(f64::NAN)
                );
            }
        }
    }
}

/// Registry columns and 0/1 targets. Every registry column must be present.
pub fn split_features_target(
    table: &FeatureTable,
    registry: &FeatureRegistry,
) -> Result<(FeatureTable, Vec<u8>)> {
    let x = table.with_columns(registry.all_features())?;
    let y = table.targets()?;
    Ok((x, y))
}

/// Halt scoring when any registry feature is missing too often.
///
/// Sparse check-in features use the relaxed threshold.
pub fn check_null_rates(
    table: &FeatureTable,
    registry: &FeatureRegistry,
    thresholds: &MonitoringThresholds,
) -> Result<()> {
    let mut violations = Vec::new();
    for def in registry.definitions() {
        let Some(rate) = table.null_rate(&def.name) else {
            continue;
        };
        let limit = if def.sparse {
            thresholds.sparse_null_rate_breaker
        } else {
            thresholds.null_rate_breaker
        };
        if rate > limit {
            warn!(
                "CIRCUIT BREAKER: {} null rate {:.1}% > {:.1}% threshold",
                def.name,
                rate * 100.0,
                limit * 100.0
            );
            violations.push(format!("{} ({:.1}%)", def.name, rate * 100.0));
        }
    }
    if !violations.is_empty() {
        let msg = format!(
            "scoring halted: {} feature(s) exceed the null-rate threshold: {}",
            violations.len(),
            violations.join(", ")
        );
        error!("{}", msg);
        return Err(RuntimeError::DataQuality(msg));
    }
    info!("Quality gate passed: all null rates within thresholds");
    Ok(())
}

fn index_of(columns: &[String], name: &str) -> Option<usize> {
    columns.iter().position(|c| c == name)
}

fn mean_of(table: &FeatureTable, rows: &[usize], column: &str) -> Option<f64> {
    let values: Vec<f64> = rows.iter().filter_map(|&i| table.value(i, column)).collect();
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn boolean(value: Option<&Value>) -> f64 {
    match value.and_then(Value::as_f64) {
        Some(v) if v != 0.0 => 1.0,
        Some(_) => 0.0,
        None => f64::NAN,
    }
}

fn continuous(value: Option<&Value>) -> f64 {
    value.and_then(Value::as_f64).unwrap_or(f64::NAN)
}

fn categorical(name: &str, value: Option<&Value>) -> f64 {
    match name {
        "gender" => match value.and_then(Value::as_str).map(|s| s.trim().to_ascii_uppercase()) {
            Some(s) if s == "M" => 0.0,
            Some(s) if s == "F" => 1.0,
            _ => 0.5,
        },
        // other categoricals arrive as numeric codes
        _ => continuous(value),
    }
}
