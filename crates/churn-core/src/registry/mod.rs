//! Immutable configuration registries
//!
//! - `features`: feature catalog and specialist assignment
//! - `model`: hyperparameters, thresholds, dates and playbooks
//! - `templates`: natural-language explanation templates

pub mod features;
pub mod model;
pub mod templates;

pub use features::{Encoding, FeatureDef, FeatureGroup, FeatureRegistry, Specialist, TARGET};
pub use model::{
    BoosterOverride, BoosterParams, ChurnRules, MetaLearnerParams, ModelConfig,
    MonitoringThresholds, RiskThresholds, SpecialistOverrides, ValidationTargets,
    WalkForwardConfig,
};
pub use templates::{Derived, ExplanationTemplate, TemplateTable};
