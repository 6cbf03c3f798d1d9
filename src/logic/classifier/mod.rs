//! Classifier Module - supervised refinement on ensemble pseudo-labels
//!
//! Self-training stage: the aggregator's severity levels become noisy
//! training labels for a gradient-boosted multi-class model, weighted by how
//! much the detectors agreed on each race. Produces calibrated per-class
//! probabilities that are smoother than the raw quantile rule.
//!
//! The leakage filter is an implicit contract with the aggregator's column
//! names: every derived column it produces matches the pattern below, so
//! training never sees the ensemble's own outputs as features.

pub mod bundle;
pub mod engineer;

pub use bundle::{ClassifierPipeline, ModelBundle};
pub use engineer::FeatureEngineer;

use std::collections::BTreeMap;

use ndarray::Array2;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::constants::{MIN_CLASSES, MIN_TRAIN_SAMPLES};
use crate::logic::ensemble::aggregate::SCORE_STD;
use crate::logic::frame::Frame;
use crate::logic::model::{GbdtClassifier, GbdtParams};
use crate::logic::stats;
use crate::logic::types::{Severity, SEVERITY_CLASSES};

/// Confidence floor below which a sample is dropped from training.
const CONFIDENCE_THRESHOLD: f64 = 0.1;

static LABEL_LEAK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        "(?i)(anomaly|error|ensemble|score|level|cluster|voted|weighted|\
         enhanced|dynamic|severity|distance|reliability|voting)",
    )
    .expect("static regex")
});

static IDENTIFIER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new("(?i)^(id|_id|index|idx|race|driver|samples|bio_samples)$").expect("static regex")
});

static SANITIZE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^a-zA-Z0-9_]").expect("static regex"));

/// Keep only columns that won't leak label information into training.
pub fn remove_label_leakage(frame: &Frame) -> Frame {
    let safe: Vec<String> = frame
        .columns()
        .iter()
        .filter(|c| !LABEL_LEAK_PATTERN.is_match(c) && !IDENTIFIER_PATTERN.is_match(c))
        .cloned()
        .collect();
    frame.select(&safe)
}

/// Replace characters the tree library can't handle and de-duplicate
/// collisions with `_1`, `_2`, ... suffixes.
pub fn sanitize_feature_names(names: &[String]) -> Vec<String> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let clean = SANITIZE_PATTERN.replace_all(name, "_").to_string();
        match seen.get_mut(&clean) {
            Some(count) => {
                *count += 1;
                out.push(format!("{}_{}", clean, count));
            }
            None => {
                seen.insert(clean.clone(), 0);
                out.push(clean);
            }
        }
    }
    out
}

/// Per-race classifier output with the full expected schema, whether the
/// model trained or the fallback ran.
#[derive(Debug, Clone)]
pub struct ClassifierOutput {
    pub severity: Vec<Severity>,
    pub confidence: Vec<f64>,
    /// Probability per class in label order (normal..critical).
    pub probabilities: Vec<[f64; 5]>,
}

pub struct SeverityClassifier;

impl SeverityClassifier {
    /// Confidence weighting via the ensemble's score disagreement: low
    /// `Anomaly_Score_STD` rank means the detectors agreed, so the
    /// pseudo-label is trustworthy. Returns (keep mask, weights).
    fn compute_confidence_weights(&self, frame: &Frame) -> (Vec<bool>, Option<Vec<f64>>) {
        let n = frame.n_rows();
        let std_col = match frame.column_vec(SCORE_STD) {
            Some(v) => v,
            None => return (vec![true; n], None),
        };

        let confidence: Vec<f64> = stats::rank_pct(&std_col).iter().map(|r| 1.0 - r).collect();
        let mask: Vec<bool> = confidence.iter().map(|&c| c > CONFIDENCE_THRESHOLD).collect();

        // If filtering would starve the trainer, keep every sample
        if mask.iter().filter(|&&m| m).count() < MIN_TRAIN_SAMPLES {
            return (vec![true; n], Some(confidence));
        }

        let kept: Vec<f64> = confidence
            .iter()
            .zip(mask.iter())
            .filter(|(_, &m)| m)
            .map(|(&c, _)| c)
            .collect();
        (mask, Some(kept))
    }

    /// Train the boosted classifier on ensemble pseudo-labels.
    /// Returns `None` (never an error) when training is not possible.
    pub fn train(&self, frame: &Frame, labels: &[Severity]) -> Option<ModelBundle> {
        if labels.len() != frame.n_rows() {
            log::warn!("Label column missing or misaligned");
            return None;
        }

        let y_all: Vec<usize> = labels.iter().map(|s| s.as_label()).collect();
        let mut distinct = y_all.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() < MIN_CLASSES {
            log::info!("Only {} severity class(es) - skipping classifier", distinct.len());
            return None;
        }
        if frame.n_rows() < MIN_TRAIN_SAMPLES {
            log::info!("Only {} samples - skipping classifier", frame.n_rows());
            return None;
        }

        let mut x_clean = remove_label_leakage(frame);
        if x_clean.n_cols() == 0 {
            log::warn!("No features left after leakage removal");
            return None;
        }
        x_clean.sanitize_non_finite();

        let original_features: Vec<String> = x_clean.columns().to_vec();
        let feature_names = sanitize_feature_names(&original_features);

        let (mask, conf_weights) = self.compute_confidence_weights(frame);
        let keep: Vec<usize> = (0..frame.n_rows()).filter(|&i| mask[i]).collect();

        let n_train = keep.len();
        let d = x_clean.n_cols();
        let mut flat = Vec::with_capacity(n_train * d);
        for &i in &keep {
            flat.extend(x_clean.data().row(i).iter().copied());
        }
        let x_train = Array2::from_shape_vec((n_train, d), flat).ok()?;
        let y_train: Vec<usize> = keep.iter().map(|&i| y_all[i]).collect();

        // Class-balance weights: n / (n_classes * class_count)
        let balance = balanced_sample_weights(&y_train);
        let combined: Vec<f64> = match &conf_weights {
            Some(conf) if conf.len() == balance.len() => conf
                .iter()
                .zip(balance.iter())
                .map(|(c, b)| c * b)
                .collect(),
            _ => balance,
        };

        let mut model = GbdtClassifier::new(GbdtParams::production());
        if let Err(e) = model.fit(&x_train, &y_train, &combined) {
            log::warn!("Classifier training failed: {}", e);
            return None;
        }

        let cv_accuracy = self.loo_cv_accuracy(&x_train, &y_train, &combined);

        let mut class_distribution: BTreeMap<String, usize> = BTreeMap::new();
        for &label in &y_train {
            *class_distribution
                .entry(Severity::from_label(label).as_str().to_string())
                .or_insert(0) += 1;
        }

        let label_map: BTreeMap<String, usize> = SEVERITY_CLASSES
            .iter()
            .map(|s| (s.as_str().to_string(), s.as_label()))
            .collect();

        log::info!(
            "  Classifier trained: {} samples, {} classes, LOO-CV={:.1}%, dist={:?}",
            n_train,
            distinct.len(),
            cv_accuracy * 100.0,
            class_distribution
        );

        Some(ModelBundle {
            model,
            feature_names,
            original_feature_names: original_features,
            label_map,
            cv_accuracy,
            class_distribution,
            n_samples: n_train,
            trained_at: chrono::Utc::now(),
        })
    }

    /// Leave-one-out cross-validation with the smaller model profile.
    /// O(n) retrains as a sanity diagnostic, not the production loop.
    fn loo_cv_accuracy(&self, x: &Array2<f64>, y: &[usize], weights: &[f64]) -> f64 {
        let n = y.len();
        if n < MIN_TRAIN_SAMPLES {
            return 0.0;
        }

        let d = x.ncols();
        let mut correct = 0usize;
        for i in 0..n {
            let idx: Vec<usize> = (0..n).filter(|&j| j != i).collect();
            let y_tr: Vec<usize> = idx.iter().map(|&j| y[j]).collect();

            let mut distinct = y_tr.clone();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() < MIN_CLASSES {
                continue;
            }

            let mut flat = Vec::with_capacity(idx.len() * d);
            for &j in &idx {
                flat.extend(x.row(j).iter().copied());
            }
            let x_tr = match Array2::from_shape_vec((idx.len(), d), flat) {
                Ok(m) => m,
                Err(_) => continue,
            };
            let w_tr: Vec<f64> = idx.iter().map(|&j| weights[j]).collect();

            let mut m = GbdtClassifier::new(GbdtParams::loo_cv());
            if m.fit(&x_tr, &y_tr, &w_tr).is_err() {
                continue;
            }
            let held = match Array2::from_shape_vec((1, d), x.row(i).to_vec()) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if let Ok(pred) = m.predict(&held) {
                if pred[0] == y[i] {
                    correct += 1;
                }
            }
        }

        correct as f64 / n as f64
    }

    /// Predict severity + probabilities with a trained bundle. Classes the
    /// model never saw in training get an explicit 0.0 probability.
    pub fn predict(&self, frame: &Frame, model_bundle: &ModelBundle) -> ClassifierOutput {
        let n = frame.n_rows();
        let mut x_clean = remove_label_leakage(frame);
        x_clean.sanitize_non_finite();

        // Align to the training features: missing -> 0, extras dropped
        let d = model_bundle.original_feature_names.len();
        let mut flat = Vec::with_capacity(n * d);
        for r in 0..n {
            for name in &model_bundle.original_feature_names {
                flat.push(x_clean.value(r, name).unwrap_or(0.0));
            }
        }
        let x = match Array2::from_shape_vec((n, d), flat) {
            Ok(m) => m,
            Err(e) => {
                log::error!("Prediction matrix build failed: {}", e);
                return Self::neutral_output(n);
            }
        };

        let (preds, proba) = match (model_bundle.model.predict(&x), model_bundle.model.predict_proba(&x)) {
            (Ok(p), Ok(q)) => (p, q),
            _ => {
                log::error!("Classifier prediction failed");
                return Self::neutral_output(n);
            }
        };

        let trained_classes = model_bundle.model.classes();
        let mut probabilities = Vec::with_capacity(n);
        let mut confidence = Vec::with_capacity(n);
        for row in &proba {
            let mut dist = [0.0f64; 5];
            for (sev_int, slot) in dist.iter_mut().enumerate() {
                if let Some(col) = trained_classes.iter().position(|&c| c == sev_int) {
                    *slot = row[col];
                }
            }
            confidence.push(row.iter().cloned().fold(0.0f64, f64::max));
            probabilities.push(dist);
        }

        ClassifierOutput {
            severity: preds.iter().map(|&p| Severity::from_label(p)).collect(),
            confidence,
            probabilities,
        }
    }

    /// Pass through the ensemble's own labels when no model is available:
    /// full schema, zero confidence, all-zero probabilities.
    pub fn fallback(&self, labels: &[Severity]) -> ClassifierOutput {
        ClassifierOutput {
            severity: labels.to_vec(),
            confidence: vec![0.0; labels.len()],
            probabilities: vec![[0.0; 5]; labels.len()],
        }
    }

    fn neutral_output(n: usize) -> ClassifierOutput {
        ClassifierOutput {
            severity: vec![Severity::Normal; n],
            confidence: vec![0.0; n],
            probabilities: vec![[0.0; 5]; n],
        }
    }
}

/// `compute_sample_weight("balanced")`: n / (n_classes * count(class)).
fn balanced_sample_weights(y: &[usize]) -> Vec<f64> {
    let n = y.len() as f64;
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for &label in y {
        *counts.entry(label).or_insert(0) += 1;
    }
    let k = counts.len() as f64;
    y.iter()
        .map(|label| n / (k * counts[label] as f64))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================
