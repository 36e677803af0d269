//! Configuration management
//!
//! Training thresholds, scheduling intervals, storage locations and the
//! export password hash. Stored as TOML in the platform config directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Learner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnerConfig {
    /// Root directory for collections, preferences, models and exports
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Interactions required before a default-threshold training run
    #[serde(default = "default_min_training_interactions")]
    pub min_training_interactions: usize,
    /// Lowered threshold used after strongly positive feedback
    #[serde(default = "default_feedback_training_interactions")]
    pub feedback_training_interactions: usize,
    /// Minimum whole days between periodic trainings
    #[serde(default = "default_min_days_between_training")]
    pub min_days_between_training: i64,
    /// Debounce window for collapsing processing requests
    #[serde(default = "default_debounce_delay_ms")]
    pub debounce_delay_ms: u64,
    /// Period of the training evaluation sweep
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,
    /// Prefix of minted model versions
    #[serde(default = "default_base_version")]
    pub base_version: String,
    /// Version reported before any model has been trained
    #[serde(default = "default_initial_version")]
    pub initial_version: String,
    /// Hex SHA-256 of the export password
    #[serde(default = "default_export_password_sha256")]
    pub export_password_sha256: String,
    /// Host application version stamped on interactions
    #[serde(default = "default_app_version")]
    pub app_version: String,
    /// Clear a stale "processing scheduled" flag at startup
    #[serde(default)]
    pub reconcile_schedule_on_start: bool,
}

fn default_data_dir() -> PathBuf {
    data_dir().unwrap_or_else(|_| PathBuf::from(".local-learner"))
}

fn default_min_training_interactions() -> usize {
    5
}

fn default_feedback_training_interactions() -> usize {
    3
}

fn default_min_days_between_training() -> i64 {
    1
}

fn default_debounce_delay_ms() -> u64 {
    30_000
}

fn default_evaluation_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_base_version() -> String {
    "1.0".to_string()
}

fn default_initial_version() -> String {
    "1.0.0".to_string()
}

fn default_export_password_sha256() -> String {
    crate::learning::export::hash_password(crate::learning::export::DEFAULT_EXPORT_PASSWORD)
}

fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            min_training_interactions: default_min_training_interactions(),
            feedback_training_interactions: default_feedback_training_interactions(),
            min_days_between_training: default_min_days_between_training(),
            debounce_delay_ms: default_debounce_delay_ms(),
            evaluation_interval_secs: default_evaluation_interval_secs(),
            base_version: default_base_version(),
            initial_version: default_initial_version(),
            export_password_sha256: default_export_password_sha256(),
            app_version: default_app_version(),
            reconcile_schedule_on_start: false,
        }
    }
}

impl LearnerConfig {
    /// Defaults rooted at a specific data directory
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load configuration from the default location, writing defaults if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: LearnerConfig = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = LearnerConfig::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to an explicit file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().context("Config path has no parent")?;
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    pub fn debounce_delay(&self) -> Duration {
        Duration::from_millis(self.debounce_delay_ms)
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.evaluation_interval_secs.max(1))
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "local-learner", "local-learner")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("learner.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "local-learner", "local-learner")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LearnerConfig::with_data_dir("/tmp/learner");
        assert_eq!(config.min_training_interactions, 5);
        assert_eq!(config.feedback_training_interactions, 3);
        assert_eq!(config.debounce_delay(), Duration::from_secs(30));
        assert_eq!(config.evaluation_interval(), Duration::from_secs(86_400));
        assert_eq!(config.initial_version, "1.0.0");
        assert_eq!(config.models_dir(), PathBuf::from("/tmp/learner/models"));
        assert!(!config.reconcile_schedule_on_start);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: LearnerConfig = toml::from_str("debounce_delay_ms = 250\n").unwrap();
        assert_eq!(config.debounce_delay_ms, 250);
        assert_eq!(config.min_days_between_training, 1);
        assert_eq!(config.base_version, "1.0");
    }

    #[test]
    fn test_load_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("learner.toml");

        let config = LearnerConfig::load_from(&path).unwrap();
        assert!(path.exists());

        let reloaded = LearnerConfig::load_from(&path).unwrap();
        assert_eq!(reloaded.export_password_sha256, config.export_password_sha256);
    }
}
