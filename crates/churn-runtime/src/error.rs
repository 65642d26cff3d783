//! Runtime error types

use churn_core::CoreError;
use thiserror::Error;

/// Runtime error
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Malformed input: bad date ranges, shape mismatches, single-class labels
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Required feature columns absent from the data
    #[error("Missing feature(s): {}", .0.join(", "))]
    MissingFeature(Vec<String>),

    /// Future-dated rows in training data
    #[error("Leakage detected: {0}")]
    Leakage(String),

    /// Circuit breaker tripped on input quality
    #[error("Data quality check failed: {0}")]
    DataQuality(String),

    /// Model used before fit/load
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Model artifact missing, malformed or inconsistent with the registry
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Sample or prediction store failure
    #[error("Data source error: {0}")]
    DataSource(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(CoreError),
}

impl From<CoreError> for RuntimeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MissingFeature(names) => RuntimeError::MissingFeature(names),
            CoreError::InvalidValue(msg) => RuntimeError::InvalidInput(msg),
            other => RuntimeError::Core(other),
        }
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for RuntimeError {
    fn from(err: sqlx::Error) -> Self {
        RuntimeError::DataSource(err.to_string())
    }
}

/// Result type for runtime operations
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_missing_feature_maps_through() {
        let err: RuntimeError = CoreError::MissingFeature(vec!["idade".to_string()]).into();
        assert!(matches!(err, RuntimeError::MissingFeature(ref v) if v == &["idade"]));
        assert_eq!(err.to_string(), "Missing feature(s): idade");
    }

    #[test]
    fn test_core_config_error_is_wrapped() {
        let err: RuntimeError = CoreError::Config("bad".to_string()).into();
        assert_eq!(err.to_string(), "Configuration error: bad");
    }
}
