//! Training Pipeline - turns the stored evidence into a new model version
//!
//! Gathering → Selecting → Composing → Fitting → Promoting, then Completed or
//! Failed and back to Idle. The artifact is on disk before the version
//! pointer moves, so an interrupted promotion leaves the previous version
//! authoritative.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::engine::{TrainingEngine, TrainingTable};
use super::prefs::Preferences;
use super::records::{Behavior, Details, Interaction, UsagePattern};
use super::store::LearningStore;
use crate::error::TrainingError;

/// Fewest examples a training set may have
pub const MIN_TRAINING_EXAMPLES: usize = 3;

/// Rated interactions needed before the feedback quality filter applies
const FEEDBACK_FILTER_THRESHOLD: usize = 3;

/// Lowest rating kept by the feedback quality filter
const MIN_KEPT_RATING: u8 = 3;

/// Where a training run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingStage {
    Idle,
    Gathering,
    Selecting,
    Composing,
    Fitting,
    Promoting,
    Completed,
    Failed,
}

impl std::fmt::Display for TrainingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrainingStage::Idle => write!(f, "idle"),
            TrainingStage::Gathering => write!(f, "gathering"),
            TrainingStage::Selecting => write!(f, "selecting"),
            TrainingStage::Composing => write!(f, "composing"),
            TrainingStage::Fitting => write!(f, "fitting"),
            TrainingStage::Promoting => write!(f, "promoting"),
            TrainingStage::Completed => write!(f, "completed"),
            TrainingStage::Failed => write!(f, "failed"),
        }
    }
}

/// Emitted to listeners after a successful promotion
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Updated { version: String, path: PathBuf },
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub version: String,
    pub model_path: PathBuf,
    pub trained_at: DateTime<Utc>,
    pub examples: usize,
    pub interaction_examples: usize,
    pub behavior_examples: usize,
    pub pattern_examples: usize,
    /// Whether the feedback quality filter narrowed the interactions
    pub feedback_filtered: bool,
}

/// Interactions chosen for training
#[derive(Debug)]
pub struct Selection<'a> {
    pub interactions: Vec<&'a Interaction>,
    pub feedback_filtered: bool,
}

/// Pick the interactions to train on.
///
/// With at least three rated interactions only those rated 3 or higher are
/// used; if that leaves fewer than three, the full set is used instead.
pub fn select_training_interactions(all: &[Interaction]) -> Result<Selection<'_>, TrainingError> {
    let rated = all.iter().filter(|i| i.feedback.is_some()).count();

    if rated >= FEEDBACK_FILTER_THRESHOLD {
        let filtered: Vec<&Interaction> = all
            .iter()
            .filter(|i| i.rating().is_some_and(|r| r >= MIN_KEPT_RATING))
            .collect();
        if filtered.len() >= MIN_TRAINING_EXAMPLES {
            return Ok(Selection {
                interactions: filtered,
                feedback_filtered: true,
            });
        }
    }

    if all.len() >= MIN_TRAINING_EXAMPLES {
        if rated >= FEEDBACK_FILTER_THRESHOLD {
            info!("Using all available interactions without feedback filtering");
        }
        return Ok(Selection {
            interactions: all.iter().collect(),
            feedback_filtered: false,
        });
    }

    Err(TrainingError::InsufficientExamples {
        needed: MIN_TRAINING_EXAMPLES,
    })
}

/// Intent label a behavior contributes to the training table
pub fn intent_for_behavior(action: &str, screen: &str) -> String {
    match action {
        "open" => format!("navigate:{}", screen),
        "search" => format!("search:{}", screen),
        "download" => "download".to_string(),
        "install" => "install".to_string(),
        "sign" => "sign".to_string(),
        other => format!("action:{}", other),
    }
}

/// Build the labeled table from the selected interactions, every behavior
/// and every completed usage pattern
pub fn compose_training_table(
    interactions: &[&Interaction],
    behaviors: &[Behavior],
    patterns: &[UsagePattern],
) -> TrainingTable {
    let mut table = TrainingTable::new();

    for interaction in interactions {
        table.push(
            interaction.user_message.clone(),
            interaction.detected_intent.clone(),
            interaction.context.clone().unwrap_or_default(),
        );
    }

    if !behaviors.is_empty() {
        debug!("Incorporating {} behavior records into training", behaviors.len());
    }
    for behavior in behaviors {
        table.push(
            format!("User performed {} on {} screen", behavior.action, behavior.screen),
            intent_for_behavior(&behavior.action, &behavior.screen),
            behavior.details.clone(),
        );
    }

    for pattern in patterns.iter().filter(|p| p.completed_task) {
        let mut metadata = Details::new();
        metadata.insert("sequence".to_string(), pattern.action_sequence.join(","));
        metadata.insert("completed".to_string(), pattern.completed_task.to_string());
        table.push(
            format!("User worked with {} feature", pattern.feature),
            format!("use:{}", pattern.feature),
            metadata,
        );
    }

    table
}

/// Runs training against the store and promotes the result
pub struct TrainingPipeline {
    store: Arc<LearningStore>,
    prefs: Arc<Preferences>,
    engine: Arc<dyn TrainingEngine>,
    models_dir: PathBuf,
    base_version: String,
    initial_version: String,
    events: broadcast::Sender<ModelEvent>,
    stage: Mutex<TrainingStage>,
}

impl TrainingPipeline {
    pub fn new(
        store: Arc<LearningStore>,
        prefs: Arc<Preferences>,
        engine: Arc<dyn TrainingEngine>,
        models_dir: PathBuf,
        base_version: &str,
        initial_version: &str,
        events: broadcast::Sender<ModelEvent>,
    ) -> Self {
        Self {
            store,
            prefs,
            engine,
            models_dir,
            base_version: base_version.to_string(),
            initial_version: initial_version.to_string(),
            events,
            stage: Mutex::new(TrainingStage::Idle),
        }
    }

    pub fn stage(&self) -> TrainingStage {
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, stage: TrainingStage) {
        debug!("Training stage: {}", stage);
        *self.stage.lock().unwrap_or_else(PoisonError::into_inner) = stage;
    }

    /// Version recorded in preferences, or the initial version
    pub fn current_version(&self) -> String {
        self.prefs
            .model_version()
            .unwrap_or_else(|| self.initial_version.clone())
    }

    pub fn model_path(&self, version: &str) -> PathBuf {
        self.models_dir.join(format!("model_{}.model", version))
    }

    pub fn engine(&self) -> &Arc<dyn TrainingEngine> {
        &self.engine
    }

    /// Train only if at least `min_interactions` interactions are stored
    pub fn run_with_threshold(&self, min_interactions: Option<usize>) -> Result<TrainingReport, TrainingError> {
        if let Some(needed) = min_interactions {
            let found = self.store.interactions.len();
            if found < needed {
                warn!("Not enough interactions for training (need at least {}, have {})", needed, found);
                return Err(TrainingError::NotEnoughInteractions { needed, found });
            }
        }
        self.run()
    }

    /// One full training attempt
    pub fn run(&self) -> Result<TrainingReport, TrainingError> {
        info!("Starting model training");
        let result = self.run_stages();

        match &result {
            Ok(report) => {
                self.enter(TrainingStage::Completed);
                info!(
                    "Successfully trained model version {} from {} examples",
                    report.version, report.examples
                );
            }
            Err(e) => {
                self.enter(TrainingStage::Failed);
                if e.is_insufficient_data() {
                    warn!("Training skipped: {}", e);
                } else {
                    error!("Failed to train model: {}", e);
                }
            }
        }

        self.enter(TrainingStage::Idle);
        result
    }

    fn run_stages(&self) -> Result<TrainingReport, TrainingError> {
        self.enter(TrainingStage::Gathering);
        let snapshot = self.store.snapshot();

        self.enter(TrainingStage::Selecting);
        let selection = select_training_interactions(&snapshot.interactions)?;

        self.enter(TrainingStage::Composing);
        let table = compose_training_table(&selection.interactions, &snapshot.behaviors, &snapshot.patterns);
        let interaction_examples = selection.interactions.len();
        let behavior_examples = snapshot.behaviors.len();
        let pattern_examples = table.len() - interaction_examples - behavior_examples;

        self.enter(TrainingStage::Fitting);
        let model = self.engine.fit(&table)?;

        self.enter(TrainingStage::Promoting);
        let version = self.mint_version();
        let model_path = self.model_path(&version);
        std::fs::create_dir_all(&self.models_dir)?;
        let partial = partial_path(&model_path);
        if let Err(e) = model.write_to(&partial) {
            let _ = std::fs::remove_file(&partial);
            return Err(e.into());
        }
        std::fs::rename(&partial, &model_path)?;

        let trained_at = Utc::now();
        self.prefs.record_promotion(&version, trained_at);

        // No receivers is fine
        let _ = self.events.send(ModelEvent::Updated {
            version: version.clone(),
            path: model_path.clone(),
        });

        Ok(TrainingReport {
            version,
            model_path,
            trained_at,
            examples: table.len(),
            interaction_examples,
            behavior_examples,
            pattern_examples,
            feedback_filtered: selection.feedback_filtered,
        })
    }

    /// `<base>.<epoch seconds>`, strictly greater than the current version
    fn mint_version(&self) -> String {
        let now = Utc::now().timestamp();
        let previous = self
            .current_version()
            .rsplit('.')
            .next()
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        let epoch = if now > previous { now } else { previous + 1 };
        format!("{}.{}", self.base_version, epoch)
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}
