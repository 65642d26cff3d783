//! Application configuration

use churn_sdk::{DriftWindows, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Settings shared by every subcommand.
///
/// Read from `config/churn.{toml,yaml}` when present, then `CHURN_*`
/// environment variables (nested keys use `__`, e.g.
/// `CHURN_DRIFT__CURRENT_DAYS=14`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// PostgreSQL connection string; falls back to `DATABASE_URL`
    pub database_url: Option<String>,

    /// Connection pool size
    pub max_connections: u32,

    /// Where trained model versions are written
    pub output_dir: PathBuf,

    /// Model version used for scoring (newest under `output_dir` if unset)
    pub model_dir: Option<PathBuf>,

    /// YAML file overriding the built-in model configuration
    pub model_config: Option<PathBuf>,

    /// Refresh warehouse views before scoring
    pub refresh_views: bool,

    /// Drift reference window
    pub drift: DriftWindows,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            output_dir: PathBuf::from("models"),
            model_dir: None,
            model_config: None,
            refresh_views: true,
            drift: DriftWindows::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables and config file
    pub fn load(env_file: Option<&Path>) -> anyhow::Result<Self> {
        // Load .env file if exists
        match env_file {
            Some(path) => {
                dotenvy::from_path(path)
                    .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", path.display(), e))?;
            }
            None => {
                dotenvy::dotenv().ok();
            }
        }

        let config_result = config::Config::builder()
            .add_source(config::File::with_name("config/churn").required(false))
            .add_source(config::Environment::with_prefix("CHURN").separator("__"))
            .build();

        let mut app: Self = match config_result {
            Ok(cfg) => cfg
                .try_deserialize()
                .map_err(|e| anyhow::anyhow!("Failed to deserialize config: {}", e))?,
            Err(_) => {
                tracing::info!("No config file found, using default configuration");
                Self::default()
            }
        };

        if app.database_url.is_none() {
            app.database_url = std::env::var("DATABASE_URL").ok();
        }
        Ok(app)
    }

    /// Load configuration from one file only
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        config::Config::builder()
            .add_source(config::File::from(path))
            .build()?
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize {}: {}", path.display(), e))
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url.as_deref().ok_or_else(|| {
            anyhow::anyhow!("No database URL: set CHURN_DATABASE_URL, DATABASE_URL or --db-url")
        })
    }

    /// Pipeline configuration with the model config file applied and validated
    pub fn pipeline(&self) -> anyhow::Result<PipelineConfig> {
        let mut pipeline = PipelineConfig::new()
            .with_output_dir(&self.output_dir)
            .refresh_views(self.refresh_views)
            .with_drift_windows(self.drift.clone());
        if let Some(dir) = &self.model_dir {
            pipeline = pipeline.with_model_dir(dir);
        }
        if let Some(path) = &self.model_config {
            tracing::info!("Loading model config from {}", path.display());
            pipeline = pipeline.with_model_config_file(path)?;
        }
        pipeline.validate()?;
        Ok(pipeline)
    }
}
