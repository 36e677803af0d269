//! Training engine boundary
//!
//! The pipeline only ever sees [`TrainingEngine`]: a labeled text table goes
//! in, a [`TrainedModel`] that can write itself to a path comes out.
//! [`NaiveBayesEngine`] is the bundled local implementation, a multinomial
//! bag-of-words classifier stored as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

use super::records::Details;
use crate::error::EngineError;

/// One labeled example plus auxiliary metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingRow {
    pub text: String,
    pub label: String,
    /// Rides along with the row; engines may ignore it
    pub metadata: Details,
}

/// The feature table handed to an engine
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingTable {
    rows: Vec<TrainingRow>,
}

impl TrainingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: impl Into<String>, label: impl Into<String>, metadata: Details) {
        self.rows.push(TrainingRow {
            text: text.into(),
            label: label.into(),
            metadata,
        });
    }

    pub fn rows(&self) -> &[TrainingRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Text column
    pub fn texts(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.text.as_str()).collect()
    }

    /// Label column, parallel to [`TrainingTable::texts`]
    pub fn labels(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.label.as_str()).collect()
    }
}

/// Opaque text-classification trainer
#[cfg_attr(test, mockall::automock)]
pub trait TrainingEngine: Send + Sync {
    /// Fit a classifier on the table
    fn fit(&self, table: &TrainingTable) -> Result<Box<dyn TrainedModel>, EngineError>;

    /// Load an artifact previously written by [`TrainedModel::write_to`]
    fn load(&self, path: &Path) -> Result<Box<dyn TrainedModel>, EngineError>;
}

/// A trained artifact
pub trait TrainedModel: Send {
    fn write_to(&self, path: &Path) -> Result<(), EngineError>;

    /// Most likely label for the text, if the model knows any labels
    fn predict(&self, text: &str) -> Option<String>;

    fn labels(&self) -> Vec<String>;
}

const ARTIFACT_FORMAT: u32 = 1;

/// Multinomial Naive Bayes over lowercase word tokens
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveBayesEngine;

impl NaiveBayesEngine {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LabelStats {
    documents: u64,
    total_tokens: u64,
    token_counts: HashMap<String, u64>,
}

/// Artifact produced by [`NaiveBayesEngine`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NaiveBayesModel {
    format: u32,
    trained_at: DateTime<Utc>,
    vocabulary_size: usize,
    labels: BTreeMap<String, LabelStats>,
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

impl TrainingEngine for NaiveBayesEngine {
    fn fit(&self, table: &TrainingTable) -> Result<Box<dyn TrainedModel>, EngineError> {
        let mut labels: BTreeMap<String, LabelStats> = BTreeMap::new();
        let mut vocabulary: HashSet<String> = HashSet::new();

        for row in table.rows() {
            let label = row.label.trim();
            if label.is_empty() {
                continue;
            }
            let stats = labels.entry(label.to_string()).or_default();
            stats.documents += 1;
            for token in tokenize(&row.text) {
                stats.total_tokens += 1;
                *stats.token_counts.entry(token.clone()).or_default() += 1;
                vocabulary.insert(token);
            }
        }

        if labels.is_empty() {
            return Err(EngineError::InvalidData("no labeled rows".to_string()));
        }

        debug!(
            "Fitted naive bayes model: {} labels, {} distinct tokens",
            labels.len(),
            vocabulary.len()
        );

        Ok(Box::new(NaiveBayesModel {
            format: ARTIFACT_FORMAT,
            trained_at: Utc::now(),
            vocabulary_size: vocabulary.len(),
            labels,
        }))
    }

    fn load(&self, path: &Path) -> Result<Box<dyn TrainedModel>, EngineError> {
        let bytes = std::fs::read(path)?;
        let model: NaiveBayesModel = serde_json::from_slice(&bytes)?;
        if model.format != ARTIFACT_FORMAT {
            return Err(EngineError::InvalidData(format!(
                "unsupported artifact format {}",
                model.format
            )));
        }
        Ok(Box::new(model))
    }
}

impl TrainedModel for NaiveBayesModel {
    fn write_to(&self, path: &Path) -> Result<(), EngineError> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    fn predict(&self, text: &str) -> Option<String> {
        let total_documents: u64 = self.labels.values().map(|s| s.documents).sum();
        if total_documents == 0 {
            return None;
        }
        let vocabulary = (self.vocabulary_size.max(1)) as f64;
        let tokens: Vec<String> = tokenize(text).collect();

        self.labels
            .iter()
            .map(|(label, stats)| {
                let prior = (stats.documents as f64 / total_documents as f64).ln();
                let denominator = stats.total_tokens as f64 + vocabulary;
                let likelihood: f64 = tokens
                    .iter()
                    .map(|t| {
                        let count = stats.token_counts.get(t).copied().unwrap_or(0) as f64;
                        ((count + 1.0) / denominator).ln()
                    })
                    .sum();
                (label, prior + likelihood)
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(label, _)| label.clone())
    }

    fn labels(&self) -> Vec<String> {
        self.labels.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TrainingTable {
        let mut table = TrainingTable::new();
        table.push("how do I sign this app", "sign", Details::new());
        table.push("sign my ipa please", "sign", Details::new());
        table.push("download the latest build", "download", Details::new());
        table.push("where can I download it", "download", Details::new());
        table
    }

    #[test]
    fn test_table_columns_are_parallel() {
        let table = table();
        assert_eq!(table.len(), 4);
        assert_eq!(table.texts()[2], "download the latest build");
        assert_eq!(table.labels()[2], "download");
    }

    #[test]
    fn test_fit_and_predict() {
        let model = NaiveBayesEngine::new().fit(&table()).unwrap();
        assert_eq!(model.labels(), vec!["download".to_string(), "sign".to_string()]);
        assert_eq!(model.predict("please sign it").as_deref(), Some("sign"));
        assert_eq!(model.predict("download now").as_deref(), Some("download"));
    }

    #[test]
    fn test_fit_rejects_unlabeled_table() {
        let mut table = TrainingTable::new();
        table.push("text", "  ", Details::new());
        let err = NaiveBayesEngine::new().fit(&table).err().unwrap();
        assert!(matches!(err, EngineError::InvalidData(_)));
    }

    #[test]
    fn test_write_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.model");
        let engine = NaiveBayesEngine::new();
        engine.fit(&table()).unwrap().write_to(&path).unwrap();

        let loaded = engine.load(&path).unwrap();
        assert_eq!(loaded.predict("sign").as_deref(), Some("sign"));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.model");
        std::fs::write(&path, b"{}").unwrap();
        assert!(NaiveBayesEngine::new().load(&path).is_err());
        assert!(matches!(
            NaiveBayesEngine::new().load(&dir.path().join("missing")).err().unwrap(),
            EngineError::Io(_)
        ));
    }
}
