//! Gradient-boosted trees for one specialist
//!
//! Second-order boosting on the logistic loss with histogram split finding.
//! Each feature is bucketed on quantile cut points computed from the training
//! rows; missing values are kept out of the histogram and sent to whichever
//! side gains more (sparsity-aware default direction). Training stops early
//! when validation log-loss has not improved for `early_stopping_rounds`
//! trees, and the trees up to the best iteration are kept.

use super::tree::{Node, Tree};
use crate::error::{Result, RuntimeError};
use churn_core::registry::BoosterParams;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MISSING_BIN: u16 = u16::MAX;
const HESSIAN_FLOOR: f64 = 1e-16;

#[inline]
pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Per-feature histogram cut points; `v < cuts[k]` falls in a bin `<= k`
#[derive(Debug, Clone)]
struct BinCuts {
    cuts: Vec<Vec<f64>>,
}

impl BinCuts {
    fn compute(columns: &[Vec<f64>], max_bins: usize) -> Self {
        let cuts = columns
            .iter()
            .map(|col| {
                let mut values: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
                values.sort_by(|a, b| a.total_cmp(b));
                let mut unique = values.clone();
                unique.dedup();

                if unique.len() <= 1 {
                    return Vec::new();
                }
                if unique.len() <= max_bins {
                    // exact: one cut between each pair of adjacent values
                    return unique.windows(2).map(|w| w[0] + (w[1] - w[0]) / 2.0).collect();
                }
                let n = values.len();
                let mut cuts: Vec<f64> = (1..max_bins)
                    .map(|k| values[(k * n / max_bins).min(n - 1)])
                    .filter(|&c| c > values[0])
                    .collect();
                cuts.dedup();
                cuts
            })
            .collect();
        Self { cuts }
    }

    fn bin(&self, feature: usize, v: f64) -> u16 {
        if v.is_nan() {
            MISSING_BIN
        } else {
            self.cuts[feature].partition_point(|&c| c <= v) as u16
        }
    }

    fn n_bins(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct GradPair {
    g: f64,
    h: f64,
}

impl std::ops::AddAssign for GradPair {
    fn add_assign(&mut self, other: Self) {
        self.g += other.g;
        self.h += other.h;
    }
}

struct SplitCandidate {
    feature: usize,
    cut: usize,
    default_left: bool,
    gain: f64,
}

/// Tree builder state shared across one boosting round
struct TreeBuilder<'a> {
    params: &'a BoosterParams,
    bins: &'a [Vec<u16>],
    cuts: &'a BinCuts,
    grads: &'a [GradPair],
    features: Vec<usize>,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    fn soft_threshold(&self, g: f64) -> f64 {
        let alpha = self.params.reg_alpha;
        if g > alpha {
            g - alpha
        } else if g < -alpha {
            g + alpha
        } else {
            0.0
        }
    }

    fn score(&self, sum: GradPair) -> f64 {
        let t = self.soft_threshold(sum.g);
        t * t / (sum.h + self.params.reg_lambda)
    }

    fn leaf_weight(&self, sum: GradPair) -> f64 {
        let denom = sum.h + self.params.reg_lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -self.soft_threshold(sum.g) / denom * self.params.learning_rate
    }

    fn best_split(&self, rows: &[usize], total: GradPair) -> Option<SplitCandidate> {
        let parent = self.score(total);
        let min_child = self.params.min_child_weight;
        let mut best: Option<SplitCandidate> = None;

        for &f in &self.features {
            let n_bins = self.cuts.n_bins(f);
            if n_bins < 2 {
                continue;
            }
            let mut hist = vec![GradPair::default(); n_bins];
            let mut missing = GradPair::default();
            for &r in rows {
                let b = self.bins[f][r];
                if b == MISSING_BIN {
                    missing += self.grads[r];
                } else {
                    hist[b as usize] += self.grads[r];
                }
            }

            let directions: &[bool] = if missing.h > 0.0 { &[false, true] } else { &[true] };
            let mut acc = GradPair::default();
            for (cut, bin) in hist.iter().take(n_bins - 1).enumerate() {
                acc += *bin;
                for &default_left in directions {
                    let mut left = acc;
                    if default_left {
                        left += missing;
                    }
                    let right = GradPair {
                        g: total.g - left.g,
                        h: total.h - left.h,
                    };
                    if left.h < min_child || right.h < min_child {
                        continue;
                    }
                    let gain = 0.5 * (self.score(left) + self.score(right) - parent)
                        - self.params.gamma;
                    if gain > 0.0 && best.as_ref().map_or(true, |b| gain > b.gain) {
                        best = Some(SplitCandidate {
                            feature: f,
                            cut,
                            default_left,
                            gain,
                        });
                    }
                }
            }
        }
        best
    }

    /// Grow a subtree; returns (node index, expected value, cover)
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> (usize, f64, f64) {
        let mut total = GradPair::default();
        for &r in &rows {
            total += self.grads[r];
        }

        let split = if depth < self.params.max_depth && rows.len() >= 2 {
            self.best_split(&rows, total)
        } else {
            None
        };

        let Some(split) = split else {
            let value = self.leaf_weight(total);
            self.nodes.push(Node::Leaf {
                value,
                cover: total.h,
            });
            return (self.nodes.len() - 1, value, total.h);
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.iter().partition(|&&r| {
            let b = self.bins[split.feature][r];
            if b == MISSING_BIN {
                split.default_left
            } else {
                (b as usize) <= split.cut
            }
        });

        // reserve the slot so the parent precedes its children
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: 0.0,
            cover: total.h,
        });
        let (left, lv, lc) = self.grow(left_rows, depth + 1);
        let (right, rv, rc) = self.grow(right_rows, depth + 1);

        let value = if lc + rc > 0.0 {
            (lv * lc + rv * rc) / (lc + rc)
        } else {
            (lv + rv) / 2.0
        };
        self.nodes[idx] = Node::Split {
            feature: split.feature,
            threshold: self.cuts.cuts[split.feature][split.cut],
            default_left: split.default_left,
            left,
            right,
            cover: total.h,
            value,
        };
        (idx, value, total.h)
    }
}

/// Boosted tree ensemble over a fixed, ordered feature subset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    features: Vec<String>,
    params: BoosterParams,
    scale_pos_weight: f64,
    base_margin: f64,
    best_iteration: usize,
    trees: Vec<Tree>,
}

impl GradientBoostedTrees {
    /// Fit on row-major `x_train` (columns in `features` order).
    ///
    /// When `eval` is given, early stopping is driven by its log-loss.
    pub fn fit(
        features: Vec<String>,
        params: &BoosterParams,
        scale_pos_weight: f64,
        x_train: &[Vec<f64>],
        y_train: &[u8],
        eval: Option<(&[Vec<f64>], &[u8])>,
    ) -> Result<Self> {
        let n_features = features.len();
        check_shape(x_train, y_train, n_features, "training")?;
        if let Some((x_val, y_val)) = eval {
            check_shape(x_val, y_val, n_features, "validation")?;
        }
        if x_train.is_empty() {
            return Err(RuntimeError::InvalidInput("empty training set".to_string()));
        }

        let n = x_train.len();
        let columns: Vec<Vec<f64>> = (0..n_features)
            .map(|j| x_train.iter().map(|r| r[j]).collect())
            .collect();
        let cuts = BinCuts::compute(&columns, params.max_bins);
        let bins: Vec<Vec<u16>> = columns
            .iter()
            .enumerate()
            .map(|(j, col)| col.iter().map(|&v| cuts.bin(j, v)).collect())
            .collect();

        let weights: Vec<f64> = y_train
            .iter()
            .map(|&y| if y == 1 { scale_pos_weight } else { 1.0 })
            .collect();

        let mut rng = StdRng::seed_from_u64(params.random_state);
        let mut margins = vec![0.0; n];
        let mut val_margins = eval.map(|(x, _)| vec![0.0; x.len()]);
        let mut trees = Vec::with_capacity(params.n_estimators);
        let mut best_loss = f64::INFINITY;
        let mut best_iteration = 0;
        let n_cols = ((params.colsample_bytree * n_features as f64).round() as usize)
            .clamp(1, n_features.max(1));

        for iteration in 0..params.n_estimators {
            let grads: Vec<GradPair> = (0..n)
                .map(|i| {
                    let p = sigmoid(margins[i]);
                    let y = f64::from(y_train[i]);
                    GradPair {
                        g: (p - y) * weights[i],
                        h: (p * (1.0 - p)).max(HESSIAN_FLOOR) * weights[i],
                    }
                })
                .collect();

            let rows: Vec<usize> = if params.subsample < 1.0 {
                (0..n).filter(|_| rng.gen::<f64>() < params.subsample).collect()
            } else {
                (0..n).collect()
            };
            let mut sampled: Vec<usize> = (0..n_features).collect();
            if n_cols < n_features {
                sampled.shuffle(&mut rng);
                sampled.truncate(n_cols);
                sampled.sort_unstable();
            }

            let mut builder = TreeBuilder {
                params,
                bins: &bins,
                cuts: &cuts,
                grads: &grads,
                features: sampled,
                nodes: Vec::new(),
            };
            if rows.is_empty() {
                builder.nodes.push(Node::Leaf { value: 0.0, cover: 0.0 });
            } else {
                builder.grow(rows, 0);
            }
            let tree = Tree::new(builder.nodes);

            for (i, row) in x_train.iter().enumerate() {
                margins[i] += tree.predict(row);
            }

            if let (Some((x_val, y_val)), Some(vm)) = (eval, val_margins.as_mut()) {
                for (i, row) in x_val.iter().enumerate() {
                    vm[i] += tree.predict(row);
                }
                let loss = log_loss(y_val, vm);
                trees.push(tree);
                if loss < best_loss - 1e-12 {
                    best_loss = loss;
                    best_iteration = iteration;
                } else if iteration - best_iteration >= params.early_stopping_rounds {
                    debug!(
                        "Early stopping at iteration {} (best {} with log-loss {:.5})",
                        iteration, best_iteration, best_loss
                    );
                    break;
                }
            } else {
                trees.push(tree);
                best_iteration = iteration;
            }
        }

        trees.truncate(best_iteration + 1);

        Ok(Self {
            features,
            params: params.clone(),
            scale_pos_weight,
            base_margin: 0.0,
            best_iteration,
            trees,
        })
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn params(&self) -> &BoosterParams {
        &self.params
    }

    pub fn scale_pos_weight(&self) -> f64 {
        self.scale_pos_weight
    }

    pub fn best_iteration(&self) -> usize {
        self.best_iteration
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Raw log-odds for one row
    pub fn predict_margin(&self, row: &[f64]) -> f64 {
        self.base_margin + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        self.check_width(rows)?;
        Ok(rows.iter().map(|r| sigmoid(self.predict_margin(r))).collect())
    }

    /// Per-feature path attributions in log-odds, plus the bias term.
    ///
    /// `bias + sum(contributions) == predict_margin(row)`.
    pub fn contributions(&self, rows: &[Vec<f64>]) -> Result<Vec<(f64, Vec<f64>)>> {
        self.check_width(rows)?;
        Ok(rows
            .iter()
            .map(|row| {
                let mut out = vec![0.0; self.features.len()];
                let mut bias = self.base_margin;
                for tree in &self.trees {
                    bias += tree.contributions(row, &mut out);
                }
                (bias, out)
            })
            .collect())
    }

    fn check_width(&self, rows: &[Vec<f64>]) -> Result<()> {
        match rows.iter().find(|r| r.len() != self.features.len()) {
            Some(r) => Err(RuntimeError::InvalidInput(format!(
                "expected {} features, got {}",
                self.features.len(),
                r.len()
            ))),
            None => Ok(()),
        }
    }
}

fn check_shape(x: &[Vec<f64>], y: &[u8], n_features: usize, what: &str) -> Result<()> {
    if x.len() != y.len() {
        return Err(RuntimeError::InvalidInput(format!(
            "{} set has {} rows but {} labels",
            what,
            x.len(),
            y.len()
        )));
    }
    if let Some(r) = x.iter().find(|r| r.len() != n_features) {
        return Err(RuntimeError::InvalidInput(format!(
            "{} row has {} values, expected {}",
            what,
            r.len(),
            n_features
        )));
    }
    if let Some(bad) = y.iter().find(|&&v| v > 1) {
        return Err(RuntimeError::InvalidInput(format!(
            "{} labels must be 0/1, found {}",
            what, bad
        )));
    }
    Ok(())
}

/// Mean binary log-loss of margins
fn log_loss(y: &[u8], margins: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let eps = 1e-15;
    let total: f64 = y
        .iter()
        .zip(margins)
        .map(|(&y, &m)| {
            let p = sigmoid(m).clamp(eps, 1.0 - eps);
            if y == 1 {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum();
    total / y.len() as f64
}
