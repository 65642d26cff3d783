//! Churn SDK - training, daily scoring and drift monitoring
//!
//! High-level pipelines over the runtime building blocks:
//! - `Trainer`: walk-forward validation and the final holdout model
//! - `BatchScorer`: daily predictions, churn types, playbooks and reasons
//! - `DriftMonitor`: feature drift, concept drift and hit rate by tier

pub mod builder;
pub mod config;
pub mod error;
pub mod monitor;
pub mod scorer;
#[cfg(feature = "sqlx")]
pub mod stores;
pub mod training;

// Re-export main types
pub use builder::BatchScorerBuilder;
pub use config::{latest_model_dir, DriftWindows, PipelineConfig};
pub use error::{Result, SdkError};
pub use monitor::DriftMonitor;
pub use scorer::{BatchScorer, ScoringSummary};
#[cfg(feature = "sqlx")]
pub use stores::PgStores;
pub use training::{
    FoldResult, MetricSummary, Trainer, TrainedModel, TrainingOutcome, TrainingReport,
    WalkForwardReport, METRICS_FILE,
};

// Re-export commonly used types from dependencies
pub use churn_core::{ChurnType, ModelConfig, RiskTier};
pub use churn_runtime::{
    DriftReport, InMemoryPredictionStore, InMemorySampleStore, OverallStatus, PredictionStore,
    SampleStore, ScoredPrediction,
};
