//! Persisted learner preferences
//!
//! The small key-value state every component consults: the learning gate,
//! the retired server-sync flag, the current model version pointer, the
//! last training time and the debounce flag pair. Each setter rewrites the
//! whole file.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use tracing::{error, warn};

use super::store::write_atomic;

/// On-disk shape of the preferences file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceValues {
    #[serde(default)]
    pub learning_enabled: bool,
    /// Always false; kept so older files and callers still parse
    #[serde(default)]
    pub server_sync_enabled: bool,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub last_training: Option<DateTime<Utc>>,
    #[serde(default)]
    pub needs_local_processing: bool,
    #[serde(default)]
    pub local_processing_scheduled: bool,
}

impl Default for PreferenceValues {
    fn default() -> Self {
        Self {
            learning_enabled: false,
            server_sync_enabled: false,
            model_version: None,
            last_training: None,
            needs_local_processing: false,
            local_processing_scheduled: false,
        }
    }
}

/// Shared preferences store; `None` path keeps everything in memory
pub struct Preferences {
    path: Option<PathBuf>,
    data: RwLock<PreferenceValues>,
}

impl Preferences {
    /// Open the preferences file, starting from defaults if it is missing
    /// or unreadable
    pub fn open(path: PathBuf) -> Self {
        let data = if path.exists() {
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read preferences from {}", path.display()))
                .and_then(|contents| {
                    serde_json::from_str(&contents)
                        .with_context(|| format!("Failed to parse preferences {}", path.display()))
                })
                .unwrap_or_else(|e| {
                    warn!("Ignoring unreadable preferences: {:#}", e);
                    PreferenceValues::default()
                })
        } else {
            PreferenceValues::default()
        };

        Self {
            path: Some(path),
            data: RwLock::new(data),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: RwLock::new(PreferenceValues::default()),
        }
    }

    /// Copy of every value
    pub fn values(&self) -> PreferenceValues {
        self.data.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Apply several changes and persist them in one write
    pub fn update<R>(&self, f: impl FnOnce(&mut PreferenceValues) -> R) -> R {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut guard);
        guard.server_sync_enabled = false;
        self.persist(&guard);
        result
    }

    fn persist(&self, data: &PreferenceValues) {
        let Some(path) = &self.path else {
            return;
        };
        let written = serde_json::to_vec_pretty(data)
            .context("Failed to serialize preferences")
            .and_then(|bytes| write_atomic(path, &bytes));
        if let Err(e) = written {
            error!("Failed to save preferences: {:#}", e);
        }
    }

    pub fn learning_enabled(&self) -> bool {
        self.values().learning_enabled
    }

    pub fn set_learning_enabled(&self, enabled: bool) {
        self.update(|p| p.learning_enabled = enabled);
    }

    pub fn model_version(&self) -> Option<String> {
        self.values().model_version
    }

    pub fn last_training(&self) -> Option<DateTime<Utc>> {
        self.values().last_training
    }

    /// Advance the version pointer, then the training timestamp, in one write
    pub fn record_promotion(&self, version: &str, at: DateTime<Utc>) {
        self.update(|p| {
            p.model_version = Some(version.to_string());
            p.last_training = Some(at);
        });
    }

    pub fn needs_local_processing(&self) -> bool {
        self.values().needs_local_processing
    }

    pub fn set_needs_local_processing(&self, needed: bool) {
        self.update(|p| p.needs_local_processing = needed);
    }

    pub fn local_processing_scheduled(&self) -> bool {
        self.values().local_processing_scheduled
    }

    pub fn set_local_processing_scheduled(&self, scheduled: bool) {
        self.update(|p| p.local_processing_scheduled = scheduled);
    }

    /// Persist the retired server-sync flag; it can only ever be false
    pub fn disable_server_sync(&self) {
        self.update(|p| p.server_sync_enabled = false);
    }
}
