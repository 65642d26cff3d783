//! Evaluation metrics for binary churn scores

use churn_core::registry::ValidationTargets;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::info;

/// Validation-set metrics on calibrated probabilities
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub pr_auc: f64,
    pub roc_auc: f64,
    pub brier_score: f64,
    pub precision_at_20pct: f64,
}

/// One metric compared against its target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetCheck {
    pub metric: String,
    pub value: f64,
    pub target: f64,
    pub passed: bool,
}

impl TargetCheck {
    pub fn status(&self) -> &'static str {
        if self.passed {
            "PASS"
        } else {
            "FAIL"
        }
    }
}

impl EvaluationMetrics {
    pub fn compute(y: &[u8], prob: &[f64], top_fraction: f64) -> Self {
        Self {
            pr_auc: average_precision(y, prob),
            roc_auc: roc_auc(y, prob),
            brier_score: brier_score(y, prob),
            precision_at_20pct: precision_at_top(y, prob, top_fraction),
        }
    }

    /// Lower is better for Brier, higher for the rest
    pub fn check(&self, targets: &ValidationTargets) -> Vec<TargetCheck> {
        let check = |metric: &str, value: f64, target: f64, higher_is_better: bool| TargetCheck {
            metric: metric.to_string(),
            value,
            target,
            passed: if higher_is_better {
                value >= target
            } else {
                value <= target
            },
        };
        vec![
            check("pr_auc", self.pr_auc, targets.pr_auc, true),
            check("roc_auc", self.roc_auc, targets.roc_auc, true),
            check("brier_score", self.brier_score, targets.brier_score, false),
            check(
                "precision_at_20pct",
                self.precision_at_20pct,
                targets.precision_at_20,
                true,
            ),
        ]
    }

    pub fn log_against(&self, targets: &ValidationTargets) {
        info!("========== EVALUATION RESULTS ==========");
        for c in self.check(targets) {
            info!("  {}: {:.4} {} (target {:.2})", c.metric, c.value, c.status(), c.target);
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "pr_auc" => Some(self.pr_auc),
            "roc_auc" => Some(self.roc_auc),
            "brier_score" => Some(self.brier_score),
            "precision_at_20pct" => Some(self.precision_at_20pct),
            _ => None,
        }
    }

    pub const NAMES: [&'static str; 4] = ["pr_auc", "roc_auc", "brier_score", "precision_at_20pct"];
}

/// Indices sorted by descending score
fn order_desc(prob: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..prob.len()).collect();
    idx.sort_by(|&a, &b| prob[b].partial_cmp(&prob[a]).unwrap_or(Ordering::Equal));
    idx
}

/// Area under the precision-recall curve as a step-wise sum over thresholds.
///
/// Tied scores form a single threshold. Returns 0 when there are no positives.
pub fn average_precision(y: &[u8], prob: &[f64]) -> f64 {
    let total_pos = y.iter().filter(|&&v| v == 1).count();
    if total_pos == 0 {
        return 0.0;
    }
    let order = order_desc(prob);
    let mut ap = 0.0;
    let (mut tp, mut fp) = (0usize, 0usize);
    let mut prev_recall = 0.0;
    let mut i = 0;
    while i < order.len() {
        let score = prob[order[i]];
        while i < order.len() && prob[order[i]] == score {
            if y[order[i]] == 1 {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let recall = tp as f64 / total_pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }
    ap
}

/// ROC-AUC via the rank-sum statistic with averaged ranks for ties.
///
/// Undefined with a single class; returns 0.5 in that case.
pub fn roc_auc(y: &[u8], prob: &[f64]) -> f64 {
    let n_pos = y.iter().filter(|&&v| v == 1).count();
    let n_neg = y.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }
    let mut idx: Vec<usize> = (0..prob.len()).collect();
    idx.sort_by(|&a, &b| prob[a].partial_cmp(&prob[b]).unwrap_or(Ordering::Equal));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < idx.len() {
        let mut j = i;
        while j + 1 < idx.len() && prob[idx[j + 1]] == prob[idx[i]] {
            j += 1;
        }
        // 1-based average rank of the tie group
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &idx[i..=j] {
            if y[k] == 1 {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }
    let n_pos = n_pos as f64;
    (rank_sum_pos - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64)
}

pub fn brier_score(y: &[u8], prob: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    y.iter()
        .zip(prob)
        .map(|(&t, &p)| (p - f64::from(t)).powi(2))
        .sum::<f64>()
        / y.len() as f64
}

/// Share of positives among the top `fraction` of rows by score (at least one row)
pub fn precision_at_top(y: &[u8], prob: &[f64], fraction: f64) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let n_top = ((y.len() as f64 * fraction).floor() as usize).max(1).min(y.len());
    let mut idx: Vec<usize> = (0..prob.len()).collect();
    idx.sort_by(|&a, &b| prob[a].partial_cmp(&prob[b]).unwrap_or(Ordering::Equal));
    let top = &idx[idx.len() - n_top..];
    top.iter().filter(|&&i| y[i] == 1).count() as f64 / n_top as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_ranking() {
        let y = [0, 0, 1, 1];
        let p = [0.1, 0.2, 0.8, 0.9];
        assert_eq!(roc_auc(&y, &p), 1.0);
        assert_eq!(average_precision(&y, &p), 1.0);
        assert_eq!(precision_at_top(&y, &p, 0.5), 1.0);
    }

    #[test]
    fn test_roc_auc_with_ties() {
        let y = [0, 1, 0, 1];
        let p = [0.5, 0.5, 0.1, 0.9];
        // pairs: (0.9 vs 0.5) win, (0.9 vs 0.1) win, (0.5 vs 0.5) half, (0.5 vs 0.1) win
        assert!((roc_auc(&y, &p) - 0.875).abs() < 1e-12);
        assert_eq!(roc_auc(&[1, 1], &[0.2, 0.3]), 0.5);
    }

    #[test]
    fn test_average_precision_known_value() {
        // ranks: 0.8 (1), 0.6 (0), 0.4 (1), 0.2 (0)
        let y = [1, 0, 1, 0];
        let p = [0.8, 0.6, 0.4, 0.2];
        // 0.5 * 1.0 + 0.5 * 2/3
        assert!((average_precision(&y, &p) - (0.5 + 1.0 / 3.0)).abs() < 1e-12);
    }

    #[test]
    fn test_brier() {
        assert!((brier_score(&[1, 0], &[0.8, 0.4]) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_precision_at_top_takes_at_least_one_row() {
        let y = [0, 0, 1];
        let p = [0.1, 0.2, 0.3];
        assert_eq!(precision_at_top(&y, &p, 0.2), 1.0);
    }

    #[test]
    fn test_target_checks() {
        let metrics = EvaluationMetrics {
            pr_auc: 0.5,
            roc_auc: 0.7,
            brier_score: 0.08,
            precision_at_20pct: 0.6,
        };
        let checks = metrics.check(&ValidationTargets::default());
        let failed: Vec<&str> = checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.metric.as_str())
            .collect();
        assert_eq!(failed, vec!["roc_auc"]);
    }
}
