//! Domain types
//!
//! - Raw column values and sample rows from the sample store
//! - The typed feature table consumed by the models
//! - Risk tiers and churn types

pub mod sample;
pub mod table;
pub mod tier;
pub mod value;

pub use sample::{LabelType, RawSample, SampleMeta};
pub use table::FeatureTable;
pub use tier::{ChurnType, RiskTier};
pub use value::Value;
