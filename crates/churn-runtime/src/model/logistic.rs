//! L2-regularized logistic regression (meta-learner)
//!
//! Minimizes `0.5 * ||w||^2 + C * sum(logloss)` with an unpenalized intercept
//! using damped Newton steps. Inputs with missing values are imputed with the
//! per-column training median, which is stored with the model so scoring uses
//! the same fill values.

use super::booster::sigmoid;
use crate::error::{Result, RuntimeError};
use churn_core::registry::MetaLearnerParams;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    feature_names: Vec<String>,
    coef: Vec<f64>,
    intercept: f64,
    /// Fill value per column for NaN inputs
    medians: Vec<f64>,
    n_iter: usize,
}

impl LogisticRegression {
    pub fn fit(
        feature_names: Vec<String>,
        params: &MetaLearnerParams,
        x: &[Vec<f64>],
        y: &[u8],
    ) -> Result<Self> {
        let d = feature_names.len();
        if x.is_empty() || x.len() != y.len() {
            return Err(RuntimeError::InvalidInput(format!(
                "meta-learner needs matching non-empty inputs (rows={}, labels={})",
                x.len(),
                y.len()
            )));
        }
        if let Some(r) = x.iter().find(|r| r.len() != d) {
            return Err(RuntimeError::InvalidInput(format!(
                "meta-learner row has {} values, expected {}",
                r.len(),
                d
            )));
        }

        let medians: Vec<f64> = (0..d)
            .map(|j| median(x.iter().map(|r| r[j]).filter(|v| !v.is_nan())))
            .collect();
        let x: Vec<Vec<f64>> = x.iter().map(|r| impute(r, &medians)).collect();
        let y: Vec<f64> = y.iter().map(|&v| f64::from(v)).collect();

        // parameters: w[0..d], intercept at w[d]
        let mut w = vec![0.0; d + 1];
        let mut loss = objective(&w, &x, &y, params.c);
        let mut n_iter = 0;
        let mut converged = false;

        for iter in 0..params.max_iter {
            n_iter = iter + 1;
            let (grad, hess) = gradient_hessian(&w, &x, &y, params.c);
            let max_grad = grad.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
            if max_grad < params.tol * (x.len() as f64).max(1.0) {
                converged = true;
                break;
            }

            let step = solve(hess, grad.iter().map(|g| -g).collect()).ok_or_else(|| {
                RuntimeError::InvalidInput("meta-learner Hessian is singular".to_string())
            })?;

            let mut t = 1.0;
            let mut accepted = false;
            for _ in 0..40 {
                let candidate: Vec<f64> = w.iter().zip(&step).map(|(a, s)| a + t * s).collect();
                let candidate_loss = objective(&candidate, &x, &y, params.c);
                if candidate_loss <= loss {
                    w = candidate;
                    loss = candidate_loss;
                    accepted = true;
                    break;
                }
                t *= 0.5;
            }
            if !accepted {
                converged = true;
                break;
            }
        }

        if converged {
            debug!("Meta-learner converged after {} iterations (loss {:.6})", n_iter, loss);
        } else {
            warn!("Meta-learner hit max_iter={} without converging", params.max_iter);
        }

        let intercept = w[d];
        w.truncate(d);
        Ok(Self {
            feature_names,
            coef: w,
            intercept,
            medians,
            n_iter,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn coef(&self) -> &[f64] {
        &self.coef
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    /// Linear score `w.x + b` after median imputation
    pub fn decision_function(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        x.iter()
            .map(|row| {
                if row.len() != self.coef.len() {
                    return Err(RuntimeError::InvalidInput(format!(
                        "meta-learner row has {} values, expected {}",
                        row.len(),
                        self.coef.len()
                    )));
                }
                let row = impute(row, &self.medians);
                Ok(dot(&self.coef, &row) + self.intercept)
            })
            .collect()
    }

    pub fn predict_proba(&self, x: &[Vec<f64>]) -> Result<Vec<f64>> {
        Ok(self.decision_function(x)?.into_iter().map(sigmoid).collect())
    }
}

fn median(values: impl Iterator<Item = f64>) -> f64 {
    let mut v: Vec<f64> = values.collect();
    if v.is_empty() {
        return 0.0;
    }
    v.sort_by(|a, b| a.total_cmp(b));
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        (v[mid - 1] + v[mid]) / 2.0
    } else {
        v[mid]
    }
}

fn impute(row: &[f64], medians: &[f64]) -> Vec<f64> {
    row.iter()
        .zip(medians)
        .map(|(&v, &m)| if v.is_nan() { m } else { v })
        .collect()
}

fn dot(w: &[f64], x: &[f64]) -> f64 {
    w.iter().zip(x).map(|(a, b)| a * b).sum()
}

/// Numerically stable `log(1 + exp(z))`
fn log1p_exp(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

fn objective(w: &[f64], x: &[Vec<f64>], y: &[f64], c: f64) -> f64 {
    let d = w.len() - 1;
    let penalty = 0.5 * w[..d].iter().map(|v| v * v).sum::<f64>();
    let data: f64 = x
        .iter()
        .zip(y)
        .map(|(row, &yi)| {
            let z = dot(&w[..d], row) + w[d];
            log1p_exp(z) - yi * z
        })
        .sum();
    penalty + c * data
}

fn gradient_hessian(w: &[f64], x: &[Vec<f64>], y: &[f64], c: f64) -> (Vec<f64>, Vec<Vec<f64>>) {
    let d = w.len() - 1;
    let mut grad = vec![0.0; d + 1];
    let mut hess = vec![vec![0.0; d + 1]; d + 1];

    for (row, &yi) in x.iter().zip(y) {
        let p = sigmoid(dot(&w[..d], row) + w[d]);
        let r = c * (p - yi);
        let s = c * p * (1.0 - p);
        for j in 0..=d {
            let xj = if j == d { 1.0 } else { row[j] };
            grad[j] += r * xj;
            for k in 0..=j {
                let xk = if k == d { 1.0 } else { row[k] };
                hess[j][k] += s * xj * xk;
            }
        }
    }
    for j in 0..=d {
        for k in 0..j {
            hess[k][j] = hess[j][k];
        }
    }
    for j in 0..d {
        grad[j] += w[j];
        hess[j][j] += 1.0;
    }
    hess[d][d] += 1e-10;
    (grad, hess)
}

/// Gaussian elimination with partial pivoting
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> MetaLearnerParams {
        MetaLearnerParams::default()
    }

    #[test]
    fn test_solve() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let x = solve(a, vec![3.0, 5.0]).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_learns_positive_slope() {
        let x: Vec<Vec<f64>> = (0..100).map(|i| vec![i as f64 / 10.0]).collect();
        // noisy around 5.0
        let y: Vec<u8> = (0..100)
            .map(|i| u8::from((i >= 50 && i % 7 != 0) || (i < 50 && i % 9 == 0)))
            .collect();
        let model = LogisticRegression::fit(vec!["x".to_string()], &params(), &x, &y).unwrap();
        assert!(model.coef()[0] > 0.0);
        let p = model.predict_proba(&[vec![1.0], vec![9.0]]).unwrap();
        assert!(p[0] < 0.3 && p[1] > 0.7);
    }

    #[test]
    fn test_gradient_vanishes_at_solution() {
        let x: Vec<Vec<f64>> = (0..60)
            .map(|i| vec![(i % 6) as f64, ((i * 5) % 11) as f64 / 3.0])
            .collect();
        let y: Vec<u8> = (0..60).map(|i| u8::from(i % 6 >= 3 || i % 13 == 0)).collect();
        let model = LogisticRegression::fit(
            vec!["a".to_string(), "b".to_string()],
            &params(),
            &x,
            &y,
        )
        .unwrap();
        let mut w = model.coef().to_vec();
        w.push(model.intercept());
        let yf: Vec<f64> = y.iter().map(|&v| f64::from(v)).collect();
        let (grad, _) = gradient_hessian(&w, &x, &yf, 1.0);
        assert!(grad.iter().all(|g| g.abs() < 1e-5), "gradient {:?}", grad);
    }

    #[test]
    fn test_missing_values_use_training_median() {
        let x = vec![vec![1.0], vec![2.0], vec![f64::NAN], vec![10.0]];
        let y = vec![0, 0, 1, 1];
        let model = LogisticRegression::fit(vec!["x".to_string()], &params(), &x, &y).unwrap();
        let scores = model.decision_function(&[vec![f64::NAN], vec![2.0]]).unwrap();
        assert_eq!(scores[0], scores[1]);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let names = vec!["x".to_string()];
        assert!(LogisticRegression::fit(names.clone(), &params(), &[], &[]).is_err());
        assert!(LogisticRegression::fit(names, &params(), &[vec![1.0, 2.0]], &[1]).is_err());
    }
}
