//! Model Bundles - classifier persistence per driver and vehicle system
//!
//! Each trained classifier is saved as one JSON bundle next to the report,
//! named `{DRIVER}_{system}.json`, carrying the model plus everything needed
//! to audit it later (feature names, label map, LOO-CV accuracy, class
//! distribution, training timestamp).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::logic::classifier::{ClassifierOutput, FeatureEngineer, SeverityClassifier};
use crate::logic::frame::Frame;
use crate::logic::model::GbdtClassifier;
use crate::logic::types::Severity;

static FILE_SAFE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^a-zA-Z0-9]").expect("static regex"));

/// Everything persisted for one trained driver+system classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    pub model: GbdtClassifier,
    /// Sanitized names actually fed to the trees.
    pub feature_names: Vec<String>,
    /// Frame column names before sanitization, in training order.
    pub original_feature_names: Vec<String>,
    pub label_map: BTreeMap<String, usize>,
    pub cv_accuracy: f64,
    pub class_distribution: BTreeMap<String, usize>,
    pub n_samples: usize,
    pub trained_at: DateTime<Utc>,
}

/// Orchestrates feature engineering, training, prediction and persistence
/// for one driver. Training failure is never fatal: the ensemble labels
/// pass through as a fallback.
pub struct ClassifierPipeline {
    output_dir: PathBuf,
}

impl ClassifierPipeline {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Bundle path for a driver+system pair. System names come from a
    /// human-readable table ("Power Unit"), so they are made file-safe here.
    pub fn model_path(&self, driver_code: &str, system: &str) -> PathBuf {
        let safe_system = FILE_SAFE_PATTERN.replace_all(system, "_");
        self.output_dir
            .join(format!("{}_{}.json", driver_code, safe_system))
    }

    pub fn save(&self, bundle: &ModelBundle, driver_code: &str, system: &str) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.model_path(driver_code, system);
        let json = serde_json::to_string_pretty(bundle)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(&self, driver_code: &str, system: &str) -> io::Result<ModelBundle> {
        let json = fs::read_to_string(self.model_path(driver_code, system))?;
        serde_json::from_str(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Full classifier stage for one driver+system: enrich the ensemble
    /// frame with temporal/season features, train on the pseudo-labels,
    /// persist the bundle and predict. Falls back to the ensemble labels
    /// when training is not possible.
    pub fn train_and_predict(
        &self,
        driver_code: &str,
        system: &str,
        frame: &Frame,
        feature_cols: &[String],
        labels: &[Severity],
    ) -> ClassifierOutput {
        let (enriched, _all_features) = FeatureEngineer.engineer(frame, feature_cols);

        let classifier = SeverityClassifier;
        match classifier.train(&enriched, labels) {
            Some(bundle) => {
                if let Err(e) = self.save(&bundle, driver_code, system) {
                    log::warn!("Could not persist {} bundle for {}: {}", system, driver_code, e);
                }
                classifier.predict(&enriched, &bundle)
            }
            None => {
                log::info!(
                    "  {} / {}: classifier unavailable, using ensemble labels",
                    driver_code,
                    system
                );
                classifier.fallback(labels)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
