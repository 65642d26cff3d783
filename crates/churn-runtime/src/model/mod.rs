//! Two-level churn model
//!
//! - `booster` / `tree`: level-0 gradient-boosted specialists
//! - `logistic`: level-1 meta-learner
//! - `calibration`: Platt scaling of the meta-learner output
//! - `metrics`: PR-AUC, ROC-AUC, Brier, precision at top
//! - `ensemble`: the stacking ensemble and its artifact layout

pub mod artifact;
pub mod booster;
pub mod calibration;
pub mod ensemble;
pub mod logistic;
pub mod metrics;
pub mod tree;

pub use artifact::model_version;
pub use booster::GradientBoostedTrees;
pub use calibration::PlattCalibrator;
pub use ensemble::{ConfigSnapshot, SpecialistMetrics, SpecialistModel, StackingEnsemble};
pub use logistic::LogisticRegression;
pub use metrics::{EvaluationMetrics, TargetCheck};
pub use tree::{Node, Tree};
