//! Platt scaling
//!
//! Fits `P(y=1 | f) = 1 / (1 + exp(A*f + B))` on decision values with the
//! smoothed targets from Platt (1999), solved by the Newton method with
//! backtracking described by Lin, Lin and Weng (2007).

use crate::error::{Result, RuntimeError};
use serde::{Deserialize, Serialize};

const MAX_ITER: usize = 100;
const MIN_STEP: f64 = 1e-10;
const SIGMA: f64 = 1e-12;
const EPS: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattCalibrator {
    pub a: f64,
    pub b: f64,
}

impl PlattCalibrator {
    pub fn fit(decision: &[f64], y: &[u8]) -> Result<Self> {
        if decision.is_empty() || decision.len() != y.len() {
            return Err(RuntimeError::InvalidInput(format!(
                "calibrator needs matching non-empty inputs (scores={}, labels={})",
                decision.len(),
                y.len()
            )));
        }

        let prior1 = y.iter().filter(|&&v| v == 1).count() as f64;
        let prior0 = y.len() as f64 - prior1;
        let hi = (prior1 + 1.0) / (prior1 + 2.0);
        let lo = 1.0 / (prior0 + 2.0);
        let t: Vec<f64> = y.iter().map(|&v| if v == 1 { hi } else { lo }).collect();

        let mut a = 0.0;
        let mut b = ((prior0 + 1.0) / (prior1 + 1.0)).ln();
        let mut fval = loss(decision, &t, a, b);

        for _ in 0..MAX_ITER {
            // gradient and Hessian
            let (mut h11, mut h22, mut h21) = (SIGMA, SIGMA, 0.0);
            let (mut g1, mut g2) = (0.0, 0.0);
            for (&f, &ti) in decision.iter().zip(&t) {
                let fapb = f * a + b;
                let (p, q) = if fapb >= 0.0 {
                    let e = (-fapb).exp();
                    (e / (1.0 + e), 1.0 / (1.0 + e))
                } else {
                    let e = fapb.exp();
                    (1.0 / (1.0 + e), e / (1.0 + e))
                };
                let d2 = p * q;
                h11 += f * f * d2;
                h22 += d2;
                h21 += f * d2;
                let d1 = ti - p;
                g1 += f * d1;
                g2 += d1;
            }
            if g1.abs() < EPS && g2.abs() < EPS {
                break;
            }

            let det = h11 * h22 - h21 * h21;
            let da = -(h22 * g1 - h21 * g2) / det;
            let db = -(-h21 * g1 + h11 * g2) / det;
            let gd = g1 * da + g2 * db;

            let mut step = 1.0;
            while step >= MIN_STEP {
                let new_a = a + step * da;
                let new_b = b + step * db;
                let new_f = loss(decision, &t, new_a, new_b);
                if new_f < fval + 1e-4 * step * gd {
                    a = new_a;
                    b = new_b;
                    fval = new_f;
                    break;
                }
                step /= 2.0;
            }
            if step < MIN_STEP {
                break;
            }
        }

        Ok(Self { a, b })
    }

    pub fn transform_one(&self, f: f64) -> f64 {
        let z = self.a * f + self.b;
        if z >= 0.0 {
            let e = (-z).exp();
            e / (1.0 + e)
        } else {
            1.0 / (1.0 + z.exp())
        }
    }

    pub fn transform(&self, decision: &[f64]) -> Vec<f64> {
        decision.iter().map(|&f| self.transform_one(f)).collect()
    }
}

fn loss(decision: &[f64], t: &[f64], a: f64, b: f64) -> f64 {
    decision
        .iter()
        .zip(t)
        .map(|(&f, &ti)| {
            let fapb = f * a + b;
            if fapb >= 0.0 {
                ti * fapb + (-fapb).exp().ln_1p()
            } else {
                (ti - 1.0) * fapb + fapb.exp().ln_1p()
            }
        })
        .sum()
}
