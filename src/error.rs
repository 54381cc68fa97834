//! Error types for the anomaly detection engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, KolosalError>;

/// Main error type for the engine.
///
/// Every variant maps onto one protocol error kind through [`KolosalError::kind`],
/// which is what the scoring service reports to callers.
#[derive(Error, Debug)]
pub enum KolosalError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {name} = {value}, {reason}")]
    InvalidConfig {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Model not trained")]
    ModelNotTrained,

    #[error("Dimension mismatch: model expects {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Corrupt or missing model: {0}")]
    CorruptOrMissingModel(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Numerical failure: {0}")]
    NumericalFailure(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl KolosalError {
    /// Shorthand for an [`KolosalError::InvalidConfig`] error
    pub fn invalid_config(
        name: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        KolosalError::InvalidConfig {
            name: name.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Protocol error kind reported in `error_kind`
    pub fn kind(&self) -> &'static str {
        match self {
            KolosalError::InvalidInput(_) => "InvalidInput",
            KolosalError::InvalidConfig { .. } => "InvalidConfig",
            KolosalError::ModelNotTrained => "ModelNotTrained",
            KolosalError::DimensionMismatch { .. } => "DimensionMismatch",
            KolosalError::CorruptOrMissingModel(_) => "CorruptOrMissingModel",
            KolosalError::UnknownCommand(_) => "UnknownCommand",
            KolosalError::UnknownAlgorithm(_) => "UnknownAlgorithm",
            KolosalError::NumericalFailure(_) => "NumericalFailure",
            KolosalError::IoError(_) => "IoError",
            KolosalError::SerializationError(_) => "SerializationError",
        }
    }
}

impl From<serde_json::Error> for KolosalError {
    fn from(err: serde_json::Error) -> Self {
        KolosalError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for KolosalError {
    fn from(err: ndarray::ShapeError) -> Self {
        KolosalError::InvalidInput(format!("invalid matrix shape: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KolosalError::DimensionMismatch { expected: 10, actual: 3 };
        assert_eq!(
            err.to_string(),
            "Dimension mismatch: model expects 10 features, got 3"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(KolosalError::ModelNotTrained.kind(), "ModelNotTrained");
        assert_eq!(
            KolosalError::invalid_config("contamination", 0.7, "must be in (0, 0.5]").kind(),
            "InvalidConfig"
        );
        assert_eq!(
            KolosalError::UnknownAlgorithm("kmeans".to_string()).kind(),
            "UnknownAlgorithm"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KolosalError = io_err.into();
        assert!(matches!(err, KolosalError::IoError(_)));
    }
}
