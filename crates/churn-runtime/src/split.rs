//! Walk-forward temporal splitter
//!
//! Fold k trains on `[train_start, val_k)` and validates on
//! `[val_k, val_k + window)`; `val_k` advances by `window` until it passes
//! `val_end`. The training window only ever grows. Rows on or after the
//! holdout start never enter a fold.

use crate::error::{Result, RuntimeError};
use chrono::{Months, NaiveDate};
use churn_core::registry::WalkForwardConfig;
use churn_core::FeatureTable;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Boundaries and sizes of one fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldInfo {
    /// 1-based, counting skipped folds
    pub index: usize,
    pub train_start: NaiveDate,
    pub train_end: NaiveDate,
    pub val_start: NaiveDate,
    pub val_end: NaiveDate,
    pub n_train: usize,
    pub n_val: usize,
    pub n_train_pos: usize,
    pub n_val_pos: usize,
    /// Too few validation positives for stable metrics
    pub unreliable: bool,
}

#[derive(Debug, Clone)]
pub struct Fold {
    pub info: FoldInfo,
    pub train: FeatureTable,
    pub validation: FeatureTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalkForwardSplitter {
    train_start: NaiveDate,
    val_start: NaiveDate,
    val_end: NaiveDate,
    window_months: u32,
    holdout_start: NaiveDate,
    holdout_end: NaiveDate,
    min_val_positives: usize,
}

impl WalkForwardSplitter {
    /// Validation opens `validation_offset_months` after `train_start`; the
    /// last window opens one month before the holdout.
    pub fn from_config(config: &WalkForwardConfig) -> Result<Self> {
        let val_start = add_months(config.train_start, config.validation_offset_months)?;
        let val_end = config
            .test_start
            .checked_sub_months(Months::new(1))
            .ok_or_else(|| RuntimeError::InvalidInput(format!("date out of range: {}", config.test_start)))?;
        Ok(Self {
            train_start: config.train_start,
            val_start,
            val_end,
            window_months: config.window_months,
            holdout_start: config.test_start,
            holdout_end: config.test_end,
            min_val_positives: config.min_val_positives,
        })
    }

    pub fn with_validation_range(mut self, val_start: NaiveDate, val_end: NaiveDate) -> Self {
        self.val_start = val_start;
        self.val_end = val_end;
        self
    }

    pub fn with_window_months(mut self, window_months: u32) -> Self {
        self.window_months = window_months;
        self
    }

    pub fn with_min_val_positives(mut self, min_val_positives: usize) -> Self {
        self.min_val_positives = min_val_positives;
        self
    }

    pub fn train_start(&self) -> NaiveDate {
        self.train_start
    }

    pub fn holdout_range(&self) -> (NaiveDate, NaiveDate) {
        (self.holdout_start, self.holdout_end)
    }

    /// Expanding-window folds in chronological order.
    ///
    /// Empty folds are skipped and logged. `val_end < val_start` yields none.
    pub fn generate_folds(&self, samples: &FeatureTable) -> Result<Vec<Fold>> {
        if self.window_months == 0 {
            return Err(RuntimeError::InvalidInput(
                "window_months must be at least 1".to_string(),
            ));
        }

        let mut folds = Vec::new();
        let mut current = self.val_start;
        let mut index = 1;

        while current <= self.val_end {
            let next = add_months(current, self.window_months)?;
            let train_end = current.min(self.holdout_start);
            let val_end = next.min(self.holdout_start);

            let train = slice(samples, self.train_start, train_end);
            let validation = slice(samples, current, val_end);
            let info = FoldInfo {
                index,
                train_start: self.train_start,
                train_end,
                val_start: current,
                val_end,
                n_train: train.len(),
                n_val: validation.len(),
                n_train_pos: train.positives(),
                n_val_pos: validation.positives(),
                unreliable: validation.positives() < self.min_val_positives,
            };

            info!(
                "Fold {}: Train [{}, {}) ({} samples, {} pos) -> Val [{}, {}) ({} samples, {} pos)",
                index,
                info.train_start,
                info.train_end,
                info.n_train,
                info.n_train_pos,
                info.val_start,
                info.val_end,
                info.n_val,
                info.n_val_pos
            );
            if info.unreliable {
                warn!(
                    "Fold {} has only {} positive samples in validation, metrics may be unreliable",
                    index, info.n_val_pos
                );
            }

            if train.is_empty() || validation.is_empty() {
                warn!(
                    "Fold {} skipped: train={}, val={} samples",
                    index,
                    train.len(),
                    validation.len()
                );
            } else {
                folds.push(Fold {
                    info,
                    train,
                    validation,
                });
            }

            current = next;
            index += 1;
        }

        info!("Generated {} walk-forward folds", folds.len());
        Ok(folds)
    }

    /// Final split: train on `[train_start, train_end)`, test on the holdout range
    pub fn generate_holdout(&self, samples: &FeatureTable, train_end: NaiveDate) -> Result<(FeatureTable, FeatureTable)> {
        generate_holdout(
            samples,
            self.train_start,
            train_end,
            self.holdout_start,
            self.holdout_end,
        )
    }
}

/// Out-of-time split. The train window must close before the test window opens.
pub fn generate_holdout(
    samples: &FeatureTable,
    train_start: NaiveDate,
    train_end: NaiveDate,
    test_start: NaiveDate,
    test_end: NaiveDate,
) -> Result<(FeatureTable, FeatureTable)> {
    if train_end > test_start {
        return Err(RuntimeError::InvalidInput(format!(
            "train window ends {} after test window starts {}",
            train_end, test_start
        )));
    }
    if test_start >= test_end {
        return Err(RuntimeError::InvalidInput(format!(
            "empty test window [{}, {})",
            test_start, test_end
        )));
    }

    let train = slice(samples, train_start, train_end);
    let test = slice(samples, test_start, test_end);
    info!(
        "Holdout split: Train {} samples ({} pos, {:.1}%) [{}, {}), Test {} samples ({} pos, {:.1}%) [{}, {})",
        train.len(),
        train.positives(),
        positive_rate(&train) * 100.0,
        train_start,
        train_end,
        test.len(),
        test.positives(),
        positive_rate(&test) * 100.0,
        test_start,
        test_end
    );
    Ok((train, test))
}

pub fn positive_rate(table: &FeatureTable) -> f64 {
    if table.is_empty() {
        0.0
    } else {
        table.positives() as f64 / table.len() as f64
    }
}

fn slice(samples: &FeatureTable, start: NaiveDate, end: NaiveDate) -> FeatureTable {
    samples.filter(|m| m.reference_date >= start && m.reference_date < end)
}

fn add_months(date: NaiveDate, months: u32) -> Result<NaiveDate> {
    date.checked_add_months(Months::new(months))
        .ok_or_else(|| RuntimeError::InvalidInput(format!("date out of range: {} + {} months", date, months)))
}
