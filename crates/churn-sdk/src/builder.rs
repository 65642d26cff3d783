//! Builder pattern for BatchScorer

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::scorer::BatchScorer;
use chrono::NaiveDate;
use churn_core::registry::ModelConfig;
use std::path::{Path, PathBuf};
use tracing::info;

/// Builder for BatchScorer
///
/// # Example
///
/// ```rust,ignore
/// use churn_sdk::BatchScorerBuilder;
///
/// // Newest model under ./models, scored for today
/// let scorer = BatchScorerBuilder::new()
///     .with_output_dir("models")
///     .build()?;
///
/// // Pinned model version and run date, no view refresh
/// let scorer = BatchScorerBuilder::new()
///     .with_model_dir("models/v20260101_040000")
///     .with_score_date(date)
///     .refresh_views(false)
///     .build()?;
/// ```
pub struct BatchScorerBuilder {
    config: PipelineConfig,
    model_config_file: Option<PathBuf>,
    score_date: Option<NaiveDate>,
}

impl BatchScorerBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::new(),
            model_config_file: None,
            score_date: None,
        }
    }

    /// Start from an existing pipeline configuration
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Score with this model version directory
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.model_dir = Some(dir.into());
        self
    }

    /// Pick the newest version under this directory when no model dir is set
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn with_model_config(mut self, model: ModelConfig) -> Self {
        self.config.model = model;
        self
    }

    /// Read model settings from a YAML file at build time
    pub fn with_model_config_file(mut self, path: impl AsRef<Path>) -> Self {
        self.model_config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_score_date(mut self, score_date: NaiveDate) -> Self {
        self.score_date = Some(score_date);
        self
    }

    /// Enable or disable the warehouse refresh before scoring
    pub fn refresh_views(mut self, refresh: bool) -> Self {
        self.config.refresh_views = refresh;
        self
    }

    /// Build the scorer
    pub fn build(self) -> Result<BatchScorer> {
        let mut config = self.config;
        if let Some(path) = &self.model_config_file {
            info!("Loading model config from {}", path.display());
            config = config.with_model_config_file(path)?;
        }
        config.validate()?;

        let model_dir = config.resolve_model_dir()?;
        let scorer = BatchScorer::load(&model_dir, config)?;
        Ok(match self.score_date {
            Some(date) => scorer.with_score_date(date),
            None => scorer,
        })
    }
}

impl Default for BatchScorerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
