//! Local Learner - on-device continual learning library
//!
//! Collects assistant interactions and in-app activity, retrains a local
//! intent classifier from them and hands the host application the path of
//! the newest model:
//! - durable JSON collections with atomic rewrites
//! - debounced and periodic training triggers feeding one training queue
//! - pluggable training engine with a bundled naive Bayes classifier
//! - password-gated model export
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use local_learner::{LearnerConfig, LearningManager, NaiveBayesEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = LearningManager::start(LearnerConfig::load()?, Arc::new(NaiveBayesEngine::new()))?;
//!     manager.set_learning_enabled(true);
//!     manager.record_interaction("sign my app", "Signing now", "sign", 0.92);
//!     println!("{:?}", manager.latest_model_path());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod config;
pub mod learning;
pub mod cli;

pub use config::LearnerConfig;

pub use error::{EngineError, ExportError, TrainingError};

pub use learning::{
    LearningManager,
    LearningStatistics,
    ModelEvent,
    NaiveBayesEngine,
    TrainingEngine,
    TrainingReport,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - On-device continual learning", NAME, VERSION)
}
