//! Per-member explanations
//!
//! Attributions come from the level-0 specialists (log-odds path
//! attributions over each specialist's own features), merged into one
//! feature -> score map per row. The three largest by magnitude are
//! rendered through the explanation templates.

use crate::error::Result;
use crate::model::StackingEnsemble;
use churn_core::{FeatureTable, TemplateTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of reasons kept per member
pub const TOP_REASONS: usize = 3;

/// Features that get a branch comparison average
pub const BRANCH_STAT_FEATURES: [&str; 5] = [
    "days_since_last_checkin",
    "checkins_last_30d",
    "avg_weekly_checkins_90d",
    "avg_monthly_payment_90d",
    "checkin_consistency",
];

/// Branch-level averages keyed by feature name
pub type BranchStats = HashMap<String, f64>;

/// One rendered reason, serialized into `top_3_reasons`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub feature: String,
    /// Raw value, `None` when missing
    pub value: Option<f64>,
    /// Attribution in log-odds, rounded to 4 decimals
    pub impact: f64,
    pub explanation: String,
}

/// Attributions for one row, in merge order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowAttributions {
    pub features: Vec<String>,
    pub scores: Vec<f64>,
}

impl RowAttributions {
    fn merge(&mut self, feature: &str, score: f64, index: &mut HashMap<String, usize>) {
        match index.get(feature) {
            // larger magnitude wins, keeping its sign
            Some(&j) => {
                if score.abs() > self.scores[j].abs() {
                    self.scores[j] = score;
                }
            }
            None => {
                index.insert(feature.to_string(), self.features.len());
                self.features.push(feature.to_string());
                self.scores.push(score);
            }
        }
    }

    /// Indices of the `k` largest |score|, ties kept in merge order
    pub fn top(&self, k: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.scores.len()).collect();
        order.sort_by(|&a, &b| self.scores[b].abs().total_cmp(&self.scores[a].abs()));
        order.truncate(k);
        order
    }
}

pub struct ExplanationEngine<'a> {
    ensemble: &'a StackingEnsemble,
    templates: &'a TemplateTable,
}

impl<'a> ExplanationEngine<'a> {
    pub fn new(ensemble: &'a StackingEnsemble, templates: &'a TemplateTable) -> Self {
        Self {
            ensemble,
            templates,
        }
    }

    /// Merged specialist attributions for every row
    pub fn attributions(&self, x: &FeatureTable) -> Result<Vec<RowAttributions>> {
        let mut rows = vec![RowAttributions::default(); x.len()];
        let mut indices = vec![HashMap::new(); x.len()];

        for specialist in self.ensemble.specialists()? {
            let contributions = specialist.contributions(x)?;
            for (i, (_, scores)) in contributions.into_iter().enumerate() {
                for (feature, score) in specialist.features().iter().zip(scores) {
                    rows[i].merge(feature, score, &mut indices[i]);
                }
            }
        }
        Ok(rows)
    }

    /// Top reasons per row. `branch_stats` supplies the `{avg}` placeholder.
    pub fn explain_batch(&self, x: &FeatureTable, branch_stats: &BranchStats) -> Result<Vec<Vec<Reason>>> {
        let attributions = self.attributions(x)?;
        Ok(attributions
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.top(TOP_REASONS)
                    .into_iter()
                    .map(|j| {
                        let feature = &row.features[j];
                        let impact = row.scores[j];
                        let value = x.value(i, feature);
                        let avg = branch_stats.get(feature).copied();
                        Reason {
                            feature: feature.clone(),
                            value,
                            impact: round4(impact),
                            explanation: self.templates.render(feature, value, avg, impact),
                        }
                    })
                    .collect()
            })
            .collect())
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_keeps_larger_magnitude_with_sign() {
        let mut row = RowAttributions::default();
        let mut index = HashMap::new();
        row.merge("a", 0.2, &mut index);
        row.merge("b", 0.1, &mut index);
        row.merge("a", -0.5, &mut index);
        row.merge("b", 0.05, &mut index);
        assert_eq!(row.features, vec!["a", "b"]);
        assert_eq!(row.scores, vec![-0.5, 0.1]);
    }

    #[test]
    fn test_top_is_stable_on_ties() {
        let row = RowAttributions {
            features: ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect(),
            scores: vec![0.1, -0.3, 0.3, 0.05],
        };
        assert_eq!(row.top(3), vec![1, 2, 0]);
        assert_eq!(row.top(10).len(), 4);
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.123456), 0.1235);
        assert_eq!(round4(-0.00004), -0.0);
    }
}
