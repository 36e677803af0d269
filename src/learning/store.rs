//! Learning Store - durable collections of captured events
//!
//! Each record kind lives in its own mutex-guarded, insertion-ordered
//! collection that is rewritten in full to a JSON file on every change:
//!
//! ```text
//! <data_dir>/
//! ├── interactions.json
//! ├── behaviors.json
//! └── usage_patterns.json
//! ```
//!
//! Whenever more than one collection is locked at once the order is
//! interactions → behaviors → patterns.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info};

use super::records::{Behavior, Feedback, Interaction, UsagePattern};

const INTERACTIONS_FILE: &str = "interactions.json";
const BEHAVIORS_FILE: &str = "behaviors.json";
const PATTERNS_FILE: &str = "usage_patterns.json";

struct CollectionState<T> {
    items: Vec<T>,
    /// Bumped on every in-memory mutation
    generation: u64,
}

/// One record kind: in-memory vector plus its backing file
pub struct Collection<T> {
    name: &'static str,
    path: PathBuf,
    state: Mutex<CollectionState<T>>,
    /// Highest generation known to be on disk
    written: Mutex<u64>,
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Open a collection and load whatever is on disk
    pub fn open(name: &'static str, path: PathBuf) -> Self {
        let collection = Self {
            name,
            path,
            state: Mutex::new(CollectionState { items: Vec::new(), generation: 0 }),
            written: Mutex::new(0),
        };
        collection.load();
        collection
    }

    fn lock_state(&self) -> MutexGuard<'_, CollectionState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the in-memory contents with the file's. A file that fails to
    /// parse leaves the collection empty.
    pub fn load(&self) {
        if !self.path.exists() {
            return;
        }

        let loaded = std::fs::read(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))
            .and_then(|bytes| {
                serde_json::from_slice::<Vec<T>>(&bytes)
                    .with_context(|| format!("Failed to parse {}", self.path.display()))
            });

        let mut state = self.lock_state();
        match loaded {
            Ok(items) => {
                info!("Loaded {} stored {}", items.len(), self.name);
                state.items = items;
            }
            Err(e) => {
                error!("Failed to load stored {}: {:#}", self.name, e);
                state.items.clear();
            }
        }
    }

    /// Append in memory only; call [`Collection::persist`] afterwards
    pub fn push(&self, item: T) {
        let mut state = self.lock_state();
        state.items.push(item);
        state.generation += 1;
    }

    /// Append and rewrite the backing file
    pub fn append(&self, item: T) {
        self.push(item);
        self.persist();
    }

    /// Empty the collection and rewrite the backing file
    pub fn clear(&self) {
        {
            let mut state = self.lock_state();
            state.items.clear();
            state.generation += 1;
        }
        self.persist();
    }

    pub fn len(&self) -> usize {
        self.lock_state().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Vec<T> {
        self.lock_state().items.clone()
    }

    /// Write the collection to disk, logging failures. Returns whether the
    /// file reflects the current in-memory state.
    pub fn persist(&self) -> bool {
        match self.try_persist() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save {}: {:#}", self.name, e);
                false
            }
        }
    }

    fn try_persist(&self) -> Result<()> {
        // Serialize under the collection lock, write after releasing it
        let (generation, bytes) = {
            let state = self.lock_state();
            let bytes = serde_json::to_vec_pretty(&state.items)
                .with_context(|| format!("Failed to serialize {}", self.name))?;
            (state.generation, bytes)
        };

        let mut written = self.written.lock().unwrap_or_else(PoisonError::into_inner);
        if generation <= *written && self.path.exists() {
            debug!("Skipping stale write of {} (generation {})", self.name, generation);
            return Ok(());
        }

        write_atomic(&self.path, &bytes)?;
        *written = generation;
        debug!("Saved {} (generation {})", self.name, generation);
        Ok(())
    }
}

/// Write to a sibling temp file, then rename over the target
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Lock-free copies of all three collections
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub interactions: Vec<Interaction>,
    pub behaviors: Vec<Behavior>,
    pub patterns: Vec<UsagePattern>,
}

/// Counts computed under all three locks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreTally {
    pub interactions: usize,
    pub interactions_with_feedback: usize,
    pub average_rating: f64,
    pub behaviors: usize,
    pub patterns: usize,
}

/// The three durable collections
pub struct LearningStore {
    pub interactions: Collection<Interaction>,
    pub behaviors: Collection<Behavior>,
    pub patterns: Collection<UsagePattern>,
}

impl LearningStore {
    /// Open (and load) the collections under `base_dir`
    pub fn open(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)
            .with_context(|| format!("Failed to create data directory {}", base_dir.display()))?;
        Ok(Self {
            interactions: Collection::open("interactions", base_dir.join(INTERACTIONS_FILE)),
            behaviors: Collection::open("behaviors", base_dir.join(BEHAVIORS_FILE)),
            patterns: Collection::open("usage patterns", base_dir.join(PATTERNS_FILE)),
        })
    }

    /// Copy all three collections, locking in the fixed global order
    pub fn snapshot(&self) -> StoreSnapshot {
        let interactions = self.interactions.lock_state();
        let behaviors = self.behaviors.lock_state();
        let patterns = self.patterns.lock_state();

        StoreSnapshot {
            interactions: interactions.items.clone(),
            behaviors: behaviors.items.clone(),
            patterns: patterns.items.clone(),
        }
    }

    pub fn tally(&self) -> StoreTally {
        let interactions = self.interactions.lock_state();
        let behaviors = self.behaviors.lock_state();
        let patterns = self.patterns.lock_state();

        let ratings: Vec<u8> = interactions.items.iter().filter_map(|i| i.rating()).collect();
        let average_rating = if ratings.is_empty() {
            0.0
        } else {
            ratings.iter().map(|r| *r as f64).sum::<f64>() / ratings.len() as f64
        };

        StoreTally {
            interactions: interactions.items.len(),
            interactions_with_feedback: ratings.len(),
            average_rating,
            behaviors: behaviors.items.len(),
            patterns: patterns.items.len(),
        }
    }

    /// Attach feedback to an interaction. Returns false (and changes nothing)
    /// when the id is unknown.
    pub fn attach_feedback(&self, interaction_id: &str, feedback: Feedback) -> bool {
        let mut state = self.interactions.lock_state();
        match state.items.iter_mut().find(|i| i.id == interaction_id) {
            Some(interaction) => {
                interaction.feedback = Some(feedback);
                state.generation += 1;
                true
            }
            None => false,
        }
    }

    pub fn find_interaction(&self, interaction_id: &str) -> Option<Interaction> {
        self.interactions
            .lock_state()
            .items
            .iter()
            .find(|i| i.id == interaction_id)
            .cloned()
    }

    /// Synchronously persist every collection
    pub fn persist_all(&self) -> bool {
        let i = self.interactions.persist();
        let b = self.behaviors.persist();
        let p = self.patterns.persist();
        i && b && p
    }
}
