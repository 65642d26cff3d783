//! Churn Runtime - models, validation and decision rules
//!
//! This crate provides the building blocks behind training and daily
//! scoring: data loading, walk-forward splits, the stacking ensemble,
//! churn-type rules, explanations, drift statistics and the stores.

pub mod churn_type;
pub mod datasource;
pub mod drift;
pub mod error;
pub mod explain;
pub mod loader;
pub mod model;
pub mod result;
pub mod split;

// Re-export main types
pub use churn_type::{ChurnSignals, ChurnTypeClassifier};
pub use datasource::{InMemorySampleStore, SampleStore};
#[cfg(feature = "sqlx")]
pub use datasource::PgSampleStore;
pub use drift::{DriftReport, DriftStatus, FeatureDrift, MonthlyDrift, OverallStatus, TierHitRate};
pub use error::{Result, RuntimeError};
pub use explain::{BranchStats, ExplanationEngine, Reason};
pub use loader::{check_null_rates, split_features_target, DataLoader};
pub use model::{EvaluationMetrics, StackingEnsemble, TargetCheck};
pub use result::{
    HistoryRecord, InMemoryPredictionStore, PlaybookExecution, PredictionStore, ScoredPrediction,
};
#[cfg(feature = "sqlx")]
pub use result::PgPredictionStore;
pub use split::{Fold, FoldInfo, WalkForwardSplitter};
