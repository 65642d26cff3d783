//! Churn Core - Registries and domain types for gym-member churn prediction
//!
//! This crate provides the pieces every other crate reads:
//! - Feature registry and specialist assignment
//! - Model, threshold and playbook configuration
//! - Explanation templates
//! - Sample, feature table and tier types
//! - Error types

pub mod error;
pub mod registry;
pub mod types;

// Re-export commonly used types
pub use error::{CoreError, Result};
pub use registry::{
    FeatureGroup, FeatureRegistry, ModelConfig, Specialist, TemplateTable, TARGET,
};
pub use types::{ChurnType, FeatureTable, LabelType, RawSample, RiskTier, SampleMeta, Value};
