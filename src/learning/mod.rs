//! On-device continual learning
//!
//! Captures interactions, behaviors and usage patterns from the host
//! application, stores them locally, periodically retrains a text classifier
//! on them and publishes each new model version. Nothing leaves the device.

pub mod records;
pub mod store;
pub mod prefs;
pub mod engine;
pub mod pipeline;
pub mod scheduler;
pub mod export;
pub mod manager;

pub use records::{Behavior, Details, Feedback, Interaction, UsagePattern};
pub use store::{LearningStore, StoreSnapshot, StoreTally};
pub use prefs::{PreferenceValues, Preferences};
pub use engine::{NaiveBayesEngine, TrainedModel, TrainingEngine, TrainingRow, TrainingTable};
pub use pipeline::{ModelEvent, TrainingPipeline, TrainingReport, TrainingStage};
pub use scheduler::{TrainTrigger, TrainingQueue};
pub use export::{hash_password, ModelExporter, DEFAULT_EXPORT_PASSWORD};
pub use manager::{LearningManager, LearningStatistics, NoRemoteSource, RemoteModelSource};
