//! Configuration types for the training, scoring and drift pipelines

use crate::error::{Result, SdkError};
use chrono::{Days, NaiveDate};
use churn_core::registry::ModelConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Shared pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Hyperparameters, thresholds, dates and playbooks
    pub model: ModelConfig,

    /// Directory receiving one sub-directory per trained model version
    pub output_dir: PathBuf,

    /// Model version used for scoring
    pub model_dir: Option<PathBuf>,

    /// Skip walk-forward validation and only train the final model
    pub skip_cv: bool,

    /// Refresh warehouse views before scoring
    pub refresh_views: bool,

    /// Drift reference window
    pub drift: DriftWindows,
}

impl PipelineConfig {
    /// Create a new pipeline configuration with default model settings
    pub fn new() -> Self {
        Self {
            model: ModelConfig::default(),
            output_dir: PathBuf::from("models"),
            model_dir: None,
            skip_cv: false,
            refresh_views: true,
            drift: DriftWindows::default(),
        }
    }

    pub fn with_model_config(mut self, model: ModelConfig) -> Self {
        self.model = model;
        self
    }

    /// Load and validate model settings from a YAML file
    pub fn with_model_config_file(mut self, path: impl AsRef<Path>) -> Result<Self> {
        self.model = ModelConfig::load_from_file(path)?;
        Ok(self)
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = Some(dir.into());
        self
    }

    pub fn skip_cv(mut self, skip: bool) -> Self {
        self.skip_cv = skip;
        self
    }

    pub fn refresh_views(mut self, refresh: bool) -> Self {
        self.refresh_views = refresh;
        self
    }

    pub fn with_drift_windows(mut self, drift: DriftWindows) -> Self {
        self.drift = drift;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.drift.validate()
    }

    /// The explicit model directory, or the newest version under `output_dir`
    pub fn resolve_model_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.model_dir {
            return Ok(dir.clone());
        }
        latest_model_dir(&self.output_dir)?.ok_or_else(|| {
            SdkError::ConfigError(format!(
                "no model_dir given and no model version found under {}",
                self.output_dir.display()
            ))
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest `v*` directory under `output_dir`. Version names sort chronologically.
pub fn latest_model_dir(output_dir: &Path) -> Result<Option<PathBuf>> {
    if !output_dir.is_dir() {
        return Ok(None);
    }
    let mut versions = Vec::new();
    for entry in std::fs::read_dir(output_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.file_type()?.is_dir() && name.starts_with('v') {
            versions.push(name);
        }
    }
    versions.sort();
    Ok(versions.pop().map(|v| output_dir.join(v)))
}

/// Reference and current date windows for feature drift
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftWindows {
    pub reference_start: NaiveDate,
    pub reference_end: NaiveDate,
    /// Days before the run date covered by the current window
    pub current_days: u64,
}

impl DriftWindows {
    /// Current window `[today - current_days, today)`
    pub fn current_range(&self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let start = today
            .checked_sub_days(Days::new(self.current_days))
            .unwrap_or(today);
        (start, today)
    }

    pub fn validate(&self) -> Result<()> {
        if self.reference_start >= self.reference_end {
            return Err(SdkError::ConfigError(format!(
                "drift reference window [{}, {}) is empty",
                self.reference_start, self.reference_end
            )));
        }
        if self.current_days == 0 {
            return Err(SdkError::ConfigError(
                "drift current window must cover at least one day".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DriftWindows {
    fn default() -> Self {
        Self {
            reference_start: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap_or_default(),
            reference_end: NaiveDate::from_ymd_opt(2025, 12, 1).unwrap_or_default(),
            current_days: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_config_builder() {
        let config = PipelineConfig::new()
            .with_output_dir("artifacts")
            .with_model_dir("artifacts/v20250901_040000")
            .skip_cv(true)
            .refresh_views(false);

        assert_eq!(config.output_dir, PathBuf::from("artifacts"));
        assert!(config.skip_cv);
        assert!(!config.refresh_views);
        assert_eq!(
            config.resolve_model_dir().unwrap(),
            PathBuf::from("artifacts/v20250901_040000")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_latest_model_dir_picks_newest_version() {
        let tmp = tempfile::tempdir().unwrap();
        for v in ["v20250101_000000", "v20250301_000000", "v20250201_000000"] {
            std::fs::create_dir(tmp.path().join(v)).unwrap();
        }
        std::fs::create_dir(tmp.path().join("scratch")).unwrap();

        let config = PipelineConfig::new().with_output_dir(tmp.path());
        assert_eq!(
            config.resolve_model_dir().unwrap(),
            tmp.path().join("v20250301_000000")
        );
    }

    #[test]
    fn test_missing_model_dir_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new().with_output_dir(tmp.path().join("none"));
        assert!(matches!(config.resolve_model_dir(), Err(SdkError::ConfigError(_))));
    }

    #[test]
    fn test_drift_windows() {
        let windows = DriftWindows::default();
        let today = NaiveDate::from_ymd_opt(2026, 1, 10).unwrap();
        assert_eq!(
            windows.current_range(today),
            (NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(), today)
        );

        let empty = DriftWindows {
            reference_end: windows.reference_start,
            ..windows
        };
        assert!(empty.validate().is_err());
    }
}
