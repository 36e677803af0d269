//! Error types for the learning pipeline
//!
//! Passive collection and scheduling never surface errors (they are logged),
//! so only training, export and the engine boundary have typed failures.

use thiserror::Error;

/// Failure reported by a training engine implementation
#[derive(Error, Debug)]
pub enum EngineError {
    /// The labeled table could not be used for fitting
    #[error("invalid training data: {0}")]
    InvalidData(String),

    /// Reading or writing an artifact failed
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Artifact (de)serialization failed
    #[error("artifact format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Why a training attempt did not produce a new model version
#[derive(Error, Debug)]
pub enum TrainingError {
    /// Fewer stored interactions than the trigger's threshold
    #[error("Not enough interactions for training (need at least {needed}, have {found})")]
    NotEnoughInteractions { needed: usize, found: usize },

    /// The selected training set had fewer than the minimum number of examples
    #[error("Not enough training examples (need at least {needed})")]
    InsufficientExamples { needed: usize },

    /// The engine failed to fit or persist the artifact
    #[error("engine failure: {0}")]
    Engine(#[from] EngineError),

    /// Writing or promoting the artifact failed
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// The training worker is gone (manager shut down)
    #[error("training worker unavailable")]
    WorkerUnavailable,
}

impl TrainingError {
    /// True for the recoverable "collect more data and retry" family
    pub fn is_insufficient_data(&self) -> bool {
        matches!(
            self,
            TrainingError::NotEnoughInteractions { .. } | TrainingError::InsufficientExamples { .. }
        )
    }
}

/// Caller-visible export failures
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Invalid password provided for model export")]
    InvalidPassword,

    #[error("No trained model found to export")]
    ModelNotFound,

    #[error("Export failed: {0}")]
    ExportFailed(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_family() {
        assert!(TrainingError::NotEnoughInteractions { needed: 5, found: 2 }.is_insufficient_data());
        assert!(TrainingError::InsufficientExamples { needed: 3 }.is_insufficient_data());
        assert!(!TrainingError::WorkerUnavailable.is_insufficient_data());
    }

    #[test]
    fn test_messages() {
        let err = TrainingError::NotEnoughInteractions { needed: 5, found: 1 };
        assert!(err.to_string().contains("need at least 5"));
        assert_eq!(
            ExportError::InvalidPassword.to_string(),
            "Invalid password provided for model export"
        );
    }
}
