//! SDK error types

use churn_core::CoreError;
use churn_runtime::RuntimeError;
use thiserror::Error;

/// SDK error type
#[derive(Error, Debug)]
pub enum SdkError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Registry or model configuration rejected by the core crate
    #[error("Core error: {0}")]
    CoreError(#[from] CoreError),

    /// Runtime error
    #[error("Runtime error: {0}")]
    RuntimeError(#[from] RuntimeError),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Report serialization failed
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// No samples fall inside the holdout window
    #[error("Empty holdout set: {0}")]
    EmptyHoldout(String),
}

/// Result type for SDK operations
pub type Result<T> = std::result::Result<T, SdkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error() {
        let error = SdkError::ConfigError("model_dir is not set".to_string());
        assert!(error.to_string().contains("Configuration error"));
        assert!(error.to_string().contains("model_dir"));
    }

    #[test]
    fn test_runtime_error_conversion() {
        let runtime = RuntimeError::DataQuality("idade (12.0%)".to_string());
        let error: SdkError = runtime.into();
        assert!(matches!(error, SdkError::RuntimeError(RuntimeError::DataQuality(_))));
        assert!(error.to_string().contains("Data quality check failed"));
    }

    #[test]
    fn test_empty_holdout() {
        let error = SdkError::EmptyHoldout("[2025-07-01, 2026-01-01)".to_string());
        assert_eq!(error.to_string(), "Empty holdout set: [2025-07-01, 2026-01-01)");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let sdk_error: SdkError = io_error.into();
        assert!(sdk_error.to_string().contains("I/O error"));
        assert!(sdk_error.to_string().contains("File not found"));
    }
}
