//! Learning Manager - the single entry point for the host application
//!
//! Owns the store, preferences, training pipeline, scheduler and export
//! gate. Cheap to clone; every clone drives the same state. Capture calls
//! return immediately and persist on the blocking pool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::engine::{TrainedModel, TrainingEngine};
use super::export::ModelExporter;
use super::pipeline::{ModelEvent, TrainingPipeline, TrainingReport, TrainingStage};
use super::prefs::Preferences;
use super::records::{Behavior, Details, Feedback, Interaction, UsagePattern, MAX_RATING, MIN_RATING};
use super::scheduler::{spawn_training_worker, SchedulePolicy, Scheduler, TrainTrigger};
use super::store::LearningStore;
use crate::config::LearnerConfig;
use crate::error::{EngineError, ExportError, TrainingError};

const EVENT_CAPACITY: usize = 16;

/// Rating at or above which feedback triggers a training attempt
const POSITIVE_RATING: u8 = 4;

/// Aggregate view over the collected data, recomputed on every call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LearningStatistics {
    pub total_interactions: usize,
    pub interactions_with_feedback: usize,
    pub average_feedback_rating: f64,
    pub behavior_count: usize,
    pub pattern_count: usize,
    pub total_data_points: usize,
    pub model_version: String,
    pub last_training: Option<DateTime<Utc>>,
    pub learning_enabled: bool,
    pub trained_model_available: bool,
}

/// Source of models trained elsewhere. Only consulted while server sync is
/// enabled, which this crate never allows.
#[async_trait]
pub trait RemoteModelSource: Send + Sync {
    async fn latest_model_path(&self) -> Option<PathBuf>;
}

/// Remote source that never has anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRemoteSource;

#[async_trait]
impl RemoteModelSource for NoRemoteSource {
    async fn latest_model_path(&self) -> Option<PathBuf> {
        None
    }
}

struct Inner {
    config: LearnerConfig,
    store: Arc<LearningStore>,
    prefs: Arc<Preferences>,
    pipeline: Arc<TrainingPipeline>,
    scheduler: Scheduler,
    exporter: ModelExporter,
    events: broadcast::Sender<ModelEvent>,
    remote: Arc<dyn RemoteModelSource>,
    runtime: Handle,
}

/// Handle to the on-device learning system
#[derive(Clone)]
pub struct LearningManager {
    inner: Arc<Inner>,
}

impl LearningManager {
    /// Open everything under `config.data_dir` and start the schedulers.
    /// Must be called from within a Tokio runtime.
    pub fn start(config: LearnerConfig, engine: Arc<dyn TrainingEngine>) -> Result<Self> {
        Self::start_with_remote(config, engine, Arc::new(NoRemoteSource))
    }

    pub fn start_with_remote(
        config: LearnerConfig,
        engine: Arc<dyn TrainingEngine>,
        remote: Arc<dyn RemoteModelSource>,
    ) -> Result<Self> {
        let runtime = Handle::try_current().context("LearningManager must be started inside a Tokio runtime")?;

        let store = Arc::new(LearningStore::open(&config.data_dir)?);
        let prefs = Arc::new(Preferences::open(config.preferences_path()));
        prefs.disable_server_sync();

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let pipeline = Arc::new(TrainingPipeline::new(
            Arc::clone(&store),
            Arc::clone(&prefs),
            engine,
            config.models_dir(),
            &config.base_version,
            &config.initial_version,
            events.clone(),
        ));

        let (queue, _worker) = spawn_training_worker(&runtime, Arc::clone(&pipeline));
        let scheduler = Scheduler::new(
            Arc::clone(&prefs),
            Arc::clone(&store),
            queue,
            SchedulePolicy::from_config(&config),
            runtime.clone(),
        );

        if config.reconcile_schedule_on_start {
            scheduler.reconcile_stale_schedule();
        }
        scheduler.start_periodic();

        let exporter = ModelExporter::new(&config.export_password_sha256, config.exports_dir());

        info!(
            "Learning manager started (data dir {}, learning {})",
            config.data_dir.display(),
            if prefs.learning_enabled() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                prefs,
                pipeline,
                scheduler,
                exporter,
                events,
                remote,
                runtime,
            }),
        })
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.inner.config
    }

    // ---- learning gate ----

    pub fn is_learning_enabled(&self) -> bool {
        self.inner.prefs.learning_enabled()
    }

    pub fn set_learning_enabled(&self, enabled: bool) {
        self.inner.prefs.set_learning_enabled(enabled);
        info!("Learning {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_server_sync_enabled(&self) -> bool {
        false
    }

    /// Server sync is retired; any request is stored as disabled
    pub fn set_server_sync_enabled(&self, enabled: bool) {
        if enabled {
            warn!("Server sync is not supported; keeping all learning data on this device");
        }
        self.inner.prefs.disable_server_sync();
    }

    // ---- capture ----

    fn persist_later(&self, f: impl FnOnce(&LearningStore) + Send + 'static) {
        let store = Arc::clone(&self.inner.store);
        self.inner.runtime.spawn_blocking(move || f(&store));
    }

    /// Record an assistant exchange; returns the new interaction id, or
    /// `None` while learning is disabled
    pub fn record_interaction(&self, user_message: &str, ai_response: &str, intent: &str, confidence: f64) -> Option<String> {
        self.record_interaction_with_context(user_message, ai_response, intent, confidence, None)
    }

    pub fn record_interaction_with_context(
        &self,
        user_message: &str,
        ai_response: &str,
        intent: &str,
        confidence: f64,
        context: Option<Details>,
    ) -> Option<String> {
        if !self.is_learning_enabled() {
            return None;
        }

        let interaction = Interaction::new(
            user_message,
            ai_response,
            intent,
            confidence,
            context,
            &self.inner.config.app_version,
            &self.inner.pipeline.current_version(),
        );
        let id = interaction.id.clone();
        debug!("Recorded interaction {} ({})", id, intent);

        self.inner.store.interactions.push(interaction);
        self.persist_later(|store| {
            store.interactions.persist();
        });
        self.inner.scheduler.request_processing();
        Some(id)
    }

    /// Record an in-app action; never schedules training by itself
    pub fn record_behavior(&self, action: &str, screen: &str, duration_secs: f64, details: Details) -> bool {
        if !self.is_learning_enabled() {
            return false;
        }
        self.inner.store.behaviors.push(Behavior::new(action, screen, duration_secs, details));
        self.persist_later(|store| {
            store.behaviors.persist();
        });
        true
    }

    pub fn record_usage(&self, feature: &str, time_spent_secs: f64, action_sequence: Vec<String>, completed: bool) -> bool {
        if !self.is_learning_enabled() {
            return false;
        }
        self.inner
            .store
            .patterns
            .push(UsagePattern::new(feature, time_spent_secs, action_sequence, completed));
        self.persist_later(|store| {
            store.patterns.persist();
        });
        true
    }

    /// Record a web search as a `search` behavior and ask for processing
    pub fn record_web_search(&self, query: &str, result_count: usize) -> bool {
        let mut details = Details::new();
        details.insert("query".to_string(), query.to_string());
        details.insert("resultCount".to_string(), result_count.to_string());

        if !self.record_behavior("search", "WebSearch", 0.0, details) {
            return false;
        }
        self.inner.scheduler.request_processing();
        true
    }

    /// Record a screen view. Before the first model exists, enough collected
    /// data triggers a training attempt.
    pub fn record_screen_view(&self, screen: &str, details: Details) -> bool {
        if !self.record_behavior("view", screen, 0.0, details) {
            return false;
        }

        if !self.is_trained_model_available() {
            let tally = self.inner.store.tally();
            let data_points = tally.interactions + tally.behaviors + tally.patterns;
            if data_points >= self.inner.config.min_training_interactions {
                debug!("No trained model yet; {} data points collected", data_points);
                self.inner.scheduler.queue().submit(
                    TrainTrigger::ScreenView,
                    Some(self.inner.config.feedback_training_interactions),
                );
            }
        }
        true
    }

    /// Attach a rating to a stored interaction. Unknown ids are ignored.
    /// Strongly positive feedback queues a training attempt with the lowered
    /// threshold.
    pub fn record_feedback(&self, interaction_id: &str, rating: i32, comment: Option<String>) -> bool {
        if rating < MIN_RATING as i32 || rating > MAX_RATING as i32 {
            warn!("Feedback rating {} out of range; clamping", rating);
        }
        let feedback = Feedback::new(rating, comment);
        let rating = feedback.rating;

        if !self.inner.store.attach_feedback(interaction_id, feedback) {
            debug!("Feedback for unknown interaction {}", interaction_id);
            return false;
        }
        self.persist_later(|store| {
            store.interactions.persist();
        });

        if rating >= POSITIVE_RATING && self.is_learning_enabled() {
            self.inner.scheduler.queue().submit(
                TrainTrigger::Feedback,
                Some(self.inner.config.feedback_training_interactions),
            );
        }
        true
    }

    // ---- models ----

    pub fn current_model_version(&self) -> String {
        self.inner.pipeline.current_version()
    }

    /// Path of the current model, only if the file exists
    pub fn latest_model_path(&self) -> Option<PathBuf> {
        let version = self.inner.prefs.model_version()?;
        let path = self.inner.pipeline.model_path(&version);
        path.is_file().then_some(path)
    }

    /// Like [`LearningManager::latest_model_path`], consulting the remote
    /// source first when server sync is on
    pub async fn latest_model_path_async(&self) -> Option<PathBuf> {
        if self.is_server_sync_enabled() {
            if let Some(path) = self.inner.remote.latest_model_path().await {
                return Some(path);
            }
        }
        self.latest_model_path()
    }

    pub fn is_trained_model_available(&self) -> bool {
        self.latest_model_path().is_some()
    }

    /// Current version and last training time, if a model is on disk
    pub fn trained_model_info(&self) -> Option<(String, Option<DateTime<Utc>>)> {
        self.latest_model_path()?;
        let values = self.inner.prefs.values();
        Some((values.model_version?, values.last_training))
    }

    /// Load the current artifact through the engine
    pub fn load_current_model(&self) -> Result<Option<Box<dyn TrainedModel>>, EngineError> {
        match self.latest_model_path() {
            Some(path) => self.inner.pipeline.engine().load(&path).map(Some),
            None => Ok(None),
        }
    }

    pub fn training_stage(&self) -> TrainingStage {
        self.inner.pipeline.stage()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
        self.inner.events.subscribe()
    }

    // ---- training ----

    /// Train with the default threshold and wait for the outcome
    pub async fn train_now_async(&self) -> Result<TrainingReport, TrainingError> {
        self.inner
            .scheduler
            .queue()
            .submit_and_wait(TrainTrigger::Manual, Some(self.inner.config.min_training_interactions))
            .await
    }

    /// Train with the default threshold; `completion` receives whether a new
    /// version was promoted and a human-readable message
    pub fn train_now<F>(&self, completion: F)
    where
        F: FnOnce(bool, String) + Send + 'static,
    {
        let manager = self.clone();
        self.inner.runtime.spawn(async move {
            match manager.train_now_async().await {
                Ok(report) => completion(true, format!("Successfully trained model version {}", report.version)),
                Err(e) if e.is_insufficient_data() => completion(false, e.to_string()),
                Err(e) => completion(false, format!("Training failed: {}", e)),
            }
        });
    }

    /// Retrain an existing model on everything collected so far. Returns
    /// whether a request was queued.
    pub fn refine_model(&self) -> bool {
        if !self.is_learning_enabled() {
            return false;
        }
        if !self.is_trained_model_available() {
            debug!("No trained model to refine");
            return false;
        }
        if self.inner.store.interactions.is_empty() && self.inner.store.behaviors.is_empty() {
            debug!("No collected data to refine with");
            return false;
        }
        self.inner.scheduler.queue().submit(TrainTrigger::Refine, None)
    }

    // ---- maintenance ----

    pub fn statistics(&self) -> LearningStatistics {
        let tally = self.inner.store.tally();
        let values = self.inner.prefs.values();
        LearningStatistics {
            total_interactions: tally.interactions,
            interactions_with_feedback: tally.interactions_with_feedback,
            average_feedback_rating: tally.average_rating,
            behavior_count: tally.behaviors,
            pattern_count: tally.patterns,
            total_data_points: tally.interactions + tally.behaviors + tally.patterns,
            model_version: values
                .model_version
                .clone()
                .unwrap_or_else(|| self.inner.config.initial_version.clone()),
            last_training: values.last_training,
            learning_enabled: values.learning_enabled,
            trained_model_available: self.is_trained_model_available(),
        }
    }

    /// Drop every stored interaction
    pub fn clear_all_interactions(&self) {
        self.inner.store.interactions.clear();
        info!("Cleared all stored interactions");
    }

    /// Drop interactions, behaviors and usage patterns
    pub fn clear_all_data(&self) {
        self.inner.store.interactions.clear();
        self.inner.store.behaviors.clear();
        self.inner.store.patterns.clear();
        info!("Cleared all collected learning data");
    }

    /// Copy the current model into the exports directory. The password is
    /// checked before the model path is resolved.
    pub fn export_model(&self, password: &str) -> Result<PathBuf, ExportError> {
        if !self.inner.exporter.verify(password) {
            warn!("Rejected model export: invalid password");
            return Err(ExportError::InvalidPassword);
        }
        self.inner
            .exporter
            .export(password, self.latest_model_path().as_deref())
    }

    /// Synchronously write every collection to disk
    pub fn flush(&self) -> bool {
        self.inner.store.persist_all()
    }

    /// Stop the periodic sweep and flush the collections. Training requests
    /// stay serviceable while the runtime is alive; this does not wait for
    /// them.
    pub fn shutdown(&self) {
        self.inner.scheduler.shutdown();
        self.flush();
        info!("Learning manager stopped");
    }
}
