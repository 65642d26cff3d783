//! Drift statistics
//!
//! - Feature drift: Population Stability Index per feature
//! - Concept drift: predicted vs. observed churn rate per month
//! - Hit rate by tier: share of predictions confirmed by churn or by a
//!   recovery intervention
//!
//! Everything here is a pure function of already-loaded data; the SDK's
//! drift monitor does the store IO.

use crate::result::{execution_index, HistoryRecord, PlaybookExecution};
use chrono::{Datelike, Months, NaiveDate};
use churn_core::registry::MonitoringThresholds;
use churn_core::{FeatureTable, RiskTier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{info, warn};

const PSI_EPS: f64 = 1e-6;

/// Floor for the observed rate in the concept-drift ratio
const MIN_ACTUAL_RATE: f64 = 0.01;

/// Trailing window for tier hit rates
pub const HIT_RATE_WINDOW_MONTHS: u32 = 3;

// ========== PSI ==========

/// Linear-interpolated percentile of sorted values, `q` in [0, 100]
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let pos = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn proportions(counts: &[usize]) -> Vec<f64> {
    let total: usize = counts.iter().sum();
    let denom = total as f64 + PSI_EPS * counts.len() as f64;
    counts.iter().map(|&c| (c as f64 + PSI_EPS) / denom).collect()
}

/// PSI of `actual` against the `expected` reference distribution.
///
/// Bins come from the reference deciles (`n_bins` quantile bins, fewer when
/// breakpoints coincide); the outermost bins are open-ended so out-of-range
/// current values still count. NaN values are ignored. Returns 0 when either
/// side has fewer than `min_samples` values.
pub fn compute_psi(expected: &[f64], actual: &[f64], n_bins: usize, min_samples: usize) -> f64 {
    let mut expected: Vec<f64> = expected.iter().copied().filter(|v| !v.is_nan()).collect();
    let actual: Vec<f64> = actual.iter().copied().filter(|v| !v.is_nan()).collect();

    if expected.len() < min_samples.max(1) || actual.len() < min_samples.max(1) {
        warn!(
            "Insufficient data for PSI: expected={}, actual={}",
            expected.len(),
            actual.len()
        );
        return 0.0;
    }

    expected.sort_by(|a, b| a.total_cmp(b));
    let n_bins = n_bins.max(1);
    let mut breakpoints: Vec<f64> = (0..=n_bins)
        .map(|k| percentile(&expected, k as f64 * 100.0 / n_bins as f64))
        .collect();
    breakpoints.dedup();

    let (expected_counts, actual_counts) = if breakpoints.len() < 2 {
        // constant reference: on the value vs. anywhere else
        let c = breakpoints[0];
        let bucket = |values: &[f64]| {
            let same = values.iter().filter(|&&v| v == c).count();
            vec![same, values.len() - same]
        };
        (bucket(&expected), bucket(&actual))
    } else {
        let interior = &breakpoints[1..breakpoints.len() - 1];
        let bucket = |values: &[f64]| {
            let mut counts = vec![0usize; interior.len() + 1];
            for &v in values {
                counts[interior.partition_point(|&e| e <= v)] += 1;
            }
            counts
        };
        (bucket(&expected), bucket(&actual))
    };

    let e = proportions(&expected_counts);
    let a = proportions(&actual_counts);
    e.iter()
        .zip(&a)
        .map(|(&e, &a)| (a - e) * (a / e).ln())
        .sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriftStatus {
    Ok,
    Warning,
    Alert,
}

impl DriftStatus {
    pub fn from_psi(psi: f64, thresholds: &MonitoringThresholds) -> Self {
        if psi > thresholds.psi_alert {
            DriftStatus::Alert
        } else if psi > thresholds.psi_warning {
            DriftStatus::Warning
        } else {
            DriftStatus::Ok
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DriftStatus::Ok => "OK",
            DriftStatus::Warning => "WARNING",
            DriftStatus::Alert => "ALERT",
        }
    }
}

impl fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDrift {
    pub feature: String,
    pub psi: f64,
    pub status: DriftStatus,
    pub ref_mean: Option<f64>,
    pub cur_mean: Option<f64>,
}

fn nan_mean(values: &[f64]) -> Option<f64> {
    let (sum, n) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// PSI for every listed feature present in both tables
pub fn feature_drift(
    reference: &FeatureTable,
    current: &FeatureTable,
    features: &[String],
    thresholds: &MonitoringThresholds,
) -> Vec<FeatureDrift> {
    features
        .iter()
        .filter_map(|feature| {
            let ref_values = reference.column(feature)?;
            let cur_values = current.column(feature)?;
            let psi = compute_psi(
                &ref_values,
                &cur_values,
                thresholds.psi_bins,
                thresholds.psi_min_samples,
            );
            let drift = FeatureDrift {
                feature: feature.clone(),
                psi: round4(psi),
                status: DriftStatus::from_psi(psi, thresholds),
                ref_mean: nan_mean(&ref_values),
                cur_mean: nan_mean(&cur_values),
            };
            if drift.status != DriftStatus::Ok {
                warn!(
                    "Feature drift {}: {} (PSI={:.4}, ref_mean={:.2}, cur_mean={:.2})",
                    feature,
                    drift.status,
                    psi,
                    drift.ref_mean.unwrap_or(f64::NAN),
                    drift.cur_mean.unwrap_or(f64::NAN)
                );
            }
            Some(drift)
        })
        .collect()
}

// ========== Concept drift ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyDrift {
    /// First day of the month
    pub month: NaiveDate,
    pub predicted_rate: f64,
    pub actual_rate: f64,
    pub drift_ratio: f64,
    pub total_predictions: usize,
    pub flagged: bool,
}

fn month_start(d: NaiveDate) -> NaiveDate {
    d.with_day(1).unwrap_or(d)
}

fn months_before(today: NaiveDate, months: u32) -> NaiveDate {
    today
        .checked_sub_months(Months::new(months))
        .unwrap_or(NaiveDate::MIN)
}

/// Mean predicted probability vs. observed churn rate per month, newest first.
///
/// Only rows with a verified outcome scored on or after
/// `today - lookback_months` are used.
pub fn concept_drift(
    history: &[HistoryRecord],
    today: NaiveDate,
    lookback_months: u32,
    ratio_threshold: f64,
) -> Vec<MonthlyDrift> {
    let since = months_before(today, lookback_months);
    // month -> (n, sum of probabilities, churned)
    let mut months: BTreeMap<NaiveDate, (usize, f64, usize)> = BTreeMap::new();
    for r in history.iter().filter(|r| r.score_date >= since) {
        let Some(churned) = r.verified_outcome() else {
            continue;
        };
        let entry = months.entry(month_start(r.score_date)).or_default();
        entry.0 += 1;
        entry.1 += r.churn_probability;
        entry.2 += usize::from(churned);
    }

    if months.is_empty() {
        info!("No verified outcomes yet for concept drift analysis");
    }

    months
        .into_iter()
        .rev()
        .map(|(month, (n, sum_p, churned))| {
            let predicted = sum_p / n as f64;
            let actual = churned as f64 / n as f64;
            let ratio = (predicted - actual).abs() / actual.max(MIN_ACTUAL_RATE);
            let flagged = ratio > ratio_threshold;
            if flagged {
                warn!(
                    "Concept drift {}: predicted={:.3}, actual={:.3} (ratio={:.2})",
                    month, predicted, actual, ratio
                );
            }
            MonthlyDrift {
                month,
                predicted_rate: round4(predicted),
                actual_rate: round4(actual),
                drift_ratio: round4(ratio),
                total_predictions: n,
                flagged,
            }
        })
        .collect()
}

// ========== Hit rate ==========

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierHitRate {
    pub tier: RiskTier,
    pub total: usize,
    pub true_positives: usize,
    /// Did not churn and received an intervention for that prediction
    pub recovered: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub hit_rate: f64,
    pub below_floor: bool,
}

/// Hit rate per tier over the trailing window, in HIGH, MEDIUM, LOW order.
///
/// Tiers without verified rows are omitted. Only HIGH and MEDIUM can fall
/// below the floor.
pub fn hit_rate_by_tier(
    history: &[HistoryRecord],
    executions: &[PlaybookExecution],
    today: NaiveDate,
    floor: f64,
) -> Vec<TierHitRate> {
    let since = months_before(today, HIT_RATE_WINDOW_MONTHS);
    let executed = execution_index(executions);

    let mut rates: Vec<TierHitRate> = RiskTier::ALL
        .into_iter()
        .filter_map(|tier| {
            let rows: Vec<(&HistoryRecord, bool)> = history
                .iter()
                .filter(|r| r.risk_tier == tier && r.score_date >= since)
                .filter_map(|r| r.verified_outcome().map(|c| (r, c)))
                .collect();
            if rows.is_empty() {
                return None;
            }

            let total = rows.len();
            let true_positives = rows.iter().filter(|(_, c)| *c).count();
            let recovered = rows
                .iter()
                .filter(|(r, c)| !*c && executed.contains(&(r.member_id, r.score_date)))
                .count();
            let false_positives = if tier.is_at_risk() {
                total - true_positives
            } else {
                0
            };
            let false_negatives = if tier == RiskTier::Low { true_positives } else { 0 };
            let hit_rate = (true_positives + recovered) as f64 / total.max(1) as f64;

            Some(TierHitRate {
                tier,
                total,
                true_positives,
                recovered,
                false_positives,
                false_negatives,
                hit_rate: round4(hit_rate),
                below_floor: tier.is_at_risk() && hit_rate < floor,
            })
        })
        .collect();

    for r in rates.iter().filter(|r| r.below_floor) {
        warn!(
            "Hit rate for {} tier: {:.1}% is below the {:.0}% floor",
            r.tier,
            r.hit_rate * 100.0,
            floor * 100.0
        );
    }
    rates.sort_by_key(|r| std::cmp::Reverse(r.tier));
    rates
}

// ========== Report ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Healthy,
    RetrainRecommended,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Healthy => "HEALTHY",
            OverallStatus::RetrainRecommended => "RETRAIN_RECOMMENDED",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub feature_drift: Vec<FeatureDrift>,
    pub concept_drift: Vec<MonthlyDrift>,
    pub hit_rate: Vec<TierHitRate>,
    pub overall_status: OverallStatus,
}

impl DriftReport {
    /// Retrain when any feature is in ALERT or an at-risk tier misses its floor
    pub fn new(
        feature_drift: Vec<FeatureDrift>,
        concept_drift: Vec<MonthlyDrift>,
        hit_rate: Vec<TierHitRate>,
    ) -> Self {
        let alert = feature_drift.iter().any(|f| f.status == DriftStatus::Alert);
        let low_hit_rate = hit_rate.iter().any(|h| h.below_floor);
        let overall_status = if alert || low_hit_rate {
            OverallStatus::RetrainRecommended
        } else {
            OverallStatus::Healthy
        };
        info!("Overall model health: {}", overall_status);
        Self {
            feature_drift,
            concept_drift,
            hit_rate,
            overall_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use churn_core::ChurnType;

    fn thresholds() -> MonitoringThresholds {
        MonitoringThresholds::default()
    }

    #[test]
    fn test_psi_of_identical_distributions_is_zero() {
        let x: Vec<f64> = (0..200).map(|i| ((i * 37) % 101) as f64 / 7.0).collect();
        assert!(compute_psi(&x, &x, 10, 10).abs() < 1e-12);
    }

    #[test]
    fn test_psi_shifted_mean_is_alert() {
        let expected: Vec<f64> = (0..100).map(|i| (i % 20) as f64 / 10.0).collect();
        let actual: Vec<f64> = expected.iter().map(|v| v + 10.0).collect();
        let psi = compute_psi(&expected, &actual, 10, 10);
        assert!(psi > 0.20, "psi = {}", psi);
        assert_eq!(DriftStatus::from_psi(psi, &thresholds()), DriftStatus::Alert);
    }

    #[test]
    fn test_psi_insufficient_data_is_zero() {
        let small = vec![1.0, 2.0, 3.0];
        let big: Vec<f64> = (0..50).map(|i| i as f64).collect();
        assert_eq!(compute_psi(&small, &big, 10, 10), 0.0);
        let mostly_nan: Vec<f64> = (0..50).map(|i| if i < 45 { f64::NAN } else { 1.0 }).collect();
        assert_eq!(compute_psi(&big, &mostly_nan, 10, 10), 0.0);
    }

    #[test]
    fn test_psi_constant_reference() {
        let constant = vec![0.0; 30];
        assert!(compute_psi(&constant, &constant, 10, 10).abs() < 1e-12);
        let moved = vec![1.0; 30];
        assert!(compute_psi(&constant, &moved, 10, 10) > 0.20);
    }

    #[test]
    fn test_status_boundaries() {
        let t = thresholds();
        assert_eq!(DriftStatus::from_psi(0.10, &t), DriftStatus::Ok);
        assert_eq!(DriftStatus::from_psi(0.15, &t), DriftStatus::Warning);
        assert_eq!(DriftStatus::from_psi(0.20, &t), DriftStatus::Warning);
        assert_eq!(DriftStatus::from_psi(0.21, &t), DriftStatus::Alert);
    }

    fn record(member_id: i64, date: NaiveDate, tier: RiskTier, p: f64, churned: Option<bool>) -> HistoryRecord {
        HistoryRecord {
            member_id,
            branch_id: 1,
            score_date: date,
            churn_probability: p,
            risk_tier: tier,
            churn_type: ChurnType::None,
            playbook_id: "PB".to_string(),
            model_version: "v1".to_string(),
            actual_churned: churned,
            outcome_verified_at: churned.map(|_| Utc::now()),
        }
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_concept_drift_groups_by_month() {
        let today = d(2025, 10, 15);
        let history = vec![
            record(1, d(2025, 9, 2), RiskTier::High, 0.8, Some(true)),
            record(2, d(2025, 9, 20), RiskTier::Low, 0.2, Some(false)),
            record(3, d(2025, 8, 1), RiskTier::Low, 0.3, Some(false)),
            // unverified and out-of-window rows are ignored
            record(4, d(2025, 9, 3), RiskTier::High, 0.9, None),
            record(5, d(2025, 6, 1), RiskTier::High, 0.9, Some(true)),
        ];
        let drift = concept_drift(&history, today, 3, 0.30);
        assert_eq!(drift.len(), 2);
        assert_eq!(drift[0].month, d(2025, 9, 1));
        assert_eq!(drift[0].total_predictions, 2);
        assert!((drift[0].predicted_rate - 0.5).abs() < 1e-12);
        assert!((drift[0].actual_rate - 0.5).abs() < 1e-12);
        assert!(!drift[0].flagged);

        // actual 0 -> floor 0.01: |0.3 - 0| / 0.01 = 30
        assert_eq!(drift[1].month, d(2025, 8, 1));
        assert!(drift[1].flagged);
    }

    #[test]
    fn test_hit_rate_counts_recovered_members() {
        let today = d(2025, 10, 15);
        let day = d(2025, 9, 1);
        let history = vec![
            record(1, day, RiskTier::High, 0.9, Some(true)),
            record(2, day, RiskTier::High, 0.9, Some(false)),
            record(3, day, RiskTier::High, 0.9, Some(false)),
            record(4, day, RiskTier::Medium, 0.5, Some(false)),
            record(5, day, RiskTier::Low, 0.1, Some(true)),
        ];
        let executions = vec![PlaybookExecution {
            member_id: 2,
            prediction_date: day,
            playbook_id: "PB_HIGH_BEHAVIORAL".to_string(),
        }];
        let rates = hit_rate_by_tier(&history, &executions, today, 0.5);
        assert_eq!(rates.len(), 3);
        assert_eq!(rates[0].tier, RiskTier::High);
        assert_eq!(rates[0].true_positives, 1);
        assert_eq!(rates[0].recovered, 1);
        assert_eq!(rates[0].false_positives, 2);
        assert!((rates[0].hit_rate - 0.6667).abs() < 1e-9);
        assert!(!rates[0].below_floor);

        assert_eq!(rates[1].tier, RiskTier::Medium);
        assert!(rates[1].below_floor);

        assert_eq!(rates[2].tier, RiskTier::Low);
        assert_eq!(rates[2].false_negatives, 1);
        assert!(!rates[2].below_floor);

        let report = DriftReport::new(Vec::new(), Vec::new(), rates);
        assert_eq!(report.overall_status, OverallStatus::RetrainRecommended);
    }

    #[test]
    fn test_report_is_healthy_without_alerts() {
        let report = DriftReport::new(
            vec![FeatureDrift {
                feature: "idade".to_string(),
                psi: 0.15,
                status: DriftStatus::Warning,
                ref_mean: Some(30.0),
                cur_mean: Some(31.0),
            }],
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(report.overall_status, OverallStatus::Healthy);
        assert_eq!(
            serde_json::to_string(&report.overall_status).unwrap(),
            "\"HEALTHY\""
        );
    }
}
