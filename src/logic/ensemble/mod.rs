//! Ensemble Module - four detectors, one scoring convention
//!
//! Runs IsolationForest, OneClassSVM, KNN-distance and PCA-reconstruction
//! (kept under its historical "Autoencoder" column name) over one vehicle
//! system's race matrix and appends `{Model}_Anomaly` / `{Model}_AnomalyScore`
//! columns. Two-phase by design: raw model output first, then a uniform
//! percentile stretch so no detector's scale dominates fusion.
//!
//! A failing detector is logged and zero-filled; the ensemble never aborts.

pub mod aggregate;

pub use aggregate::{severity_from_votes, AnomalyStatistics};

use crate::logic::frame::Frame;
use crate::logic::model::{
    DetectorOutput, IsolationForest, KnnDistance, PcaReconstruction, SgdOneClassSvm,
};
use crate::logic::stats;

/// Model column prefixes, in the order their columns are appended.
pub const MODEL_NAMES: [&str; 4] = ["IsolationForest", "OneClassSVM", "KNN", "Autoencoder"];

pub const ANOMALY_SUFFIX: &str = "_Anomaly";
pub const SCORE_SUFFIX: &str = "_AnomalyScore";

pub struct AnomalyEnsemble {
    seed: u64,
}

impl AnomalyEnsemble {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Full ensemble pass: run all four detectors on the standardised
    /// matrix, attach flags/scores to the raw frame, then normalise every
    /// score column to the common [0, 1] percentile scale.
    pub fn run_detectors(&self, raw: &mut Frame, scaled: &Frame) {
        let n = scaled.n_rows();
        let data = scaled.data();
        let contamination = stats::estimate_contamination(data);

        let iforest = IsolationForest::new(contamination, n, self.seed)
            .fit_score(data)
            .unwrap_or_else(|e| {
                log::error!("IsolationForest failed: {}", e);
                DetectorOutput::zeros(n)
            });
        attach(raw, "IsolationForest", iforest);

        let svm = SgdOneClassSvm::new(contamination, self.seed)
            .fit_score(data)
            .unwrap_or_else(|e| {
                log::error!("OneClassSVM failed: {}", e);
                DetectorOutput::zeros(n)
            });
        attach(raw, "OneClassSVM", svm);

        let knn = KnnDistance::new().fit_score(data).unwrap_or_else(|e| {
            log::error!("KNN distance score failed: {}", e);
            DetectorOutput::zeros(n)
        });
        attach(raw, "KNN", knn);

        let pca = PcaReconstruction::fit_score(data).unwrap_or_else(|e| {
            log::error!("PCA reconstruction failed: {}", e);
            DetectorOutput::zeros(n)
        });
        attach(raw, "Autoencoder", pca);

        normalize_scores(raw);
    }
}

fn attach(frame: &mut Frame, model: &str, out: DetectorOutput) {
    frame.set_column(
        &format!("{}{}", model, ANOMALY_SUFFIX),
        out.flags.iter().map(|&f| f as f64).collect(),
    );
    frame.set_column(&format!("{}{}", model, SCORE_SUFFIX), out.scores);
}

/// Percentile-based normalisation: normal rows land near 0.1, anomalies
/// near 0.9. Degenerate zero-spread columns collapse to a constant 0.2.
fn normalize_scores(frame: &mut Frame) {
    let score_cols: Vec<String> = frame
        .columns()
        .iter()
        .filter(|c| c.ends_with(SCORE_SUFFIX))
        .cloned()
        .collect();

    for col in score_cols {
        let values = match frame.column_vec(&col) {
            Some(v) => v,
            None => continue,
        };
        let p5 = stats::percentile(&values, 5.0);
        let p95 = stats::percentile(&values, 95.0);
        let normalized: Vec<f64> = if p95 - p5 > 1e-10 {
            values
                .iter()
                .map(|&v| (0.1 + 0.8 * (v - p5) / (p95 - p5)).clamp(0.0, 1.0))
                .collect()
        } else {
            vec![0.2; values.len()]
        };
        frame.set_column(&col, normalized);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::frame::Frame;

    fn race_frame(n: usize) -> Frame {
        let mut speed = Vec::new();
        let mut brake = Vec::new();
        for i in 0..n {
            speed.push(200.0 + (i % 4) as f64);
            brake.push(30.0 + (i % 3) as f64 * 0.5);
        }
        Frame::from_columns(vec![
            ("Speed_mean".to_string(), speed),
            ("Brake_pct".to_string(), brake),
        ])
        .unwrap()
    }

    #[test]
    fn test_adds_four_column_pairs() {
        let mut raw = race_frame(12);
        let scaled = raw.standard_scaled();
        AnomalyEnsemble::new(42).run_detectors(&mut raw, &scaled);

        assert_eq!(raw.n_rows(), 12);
        // 2 originals + 4 flag/score pairs
        assert_eq!(raw.n_cols(), 2 + 8);
        for model in MODEL_NAMES {
            assert!(raw.has_column(&format!("{}{}", model, ANOMALY_SUFFIX)));
            assert!(raw.has_column(&format!("{}{}", model, SCORE_SUFFIX)));
        }
    }

    #[test]
    fn test_normalized_scores_within_unit_interval() {
        let mut raw = race_frame(15);
        let scaled = raw.standard_scaled();
        AnomalyEnsemble::new(42).run_detectors(&mut raw, &scaled);

        for model in MODEL_NAMES {
            let scores = raw
                .column_vec(&format!("{}{}", model, SCORE_SUFFIX))
                .unwrap();
            assert!(
                scores.iter().all(|&s| (0.0..=1.0).contains(&s)),
                "{} scores out of range",
                model
            );
        }
    }

    #[test]
    fn test_constant_column_collapses_to_point_two() {
        let mut frame = Frame::from_columns(vec![(
            format!("X{}", SCORE_SUFFIX),
            vec![3.0, 3.0, 3.0, 3.0],
        )])
        .unwrap();
        normalize_scores(&mut frame);
        assert_eq!(
            frame.column_vec(&format!("X{}", SCORE_SUFFIX)).unwrap(),
            vec![0.2, 0.2, 0.2, 0.2]
        );
    }

    #[test]
    fn test_degenerate_input_degrades_to_zeros() {
        // Single row: every detector refuses, all flag columns zero-filled
        let mut raw = race_frame(1);
        let scaled = raw.standard_scaled();
        AnomalyEnsemble::new(42).run_detectors(&mut raw, &scaled);

        for model in MODEL_NAMES {
            let flags = raw
                .column_vec(&format!("{}{}", model, ANOMALY_SUFFIX))
                .unwrap();
            assert!(flags.iter().all(|&f| f == 0.0));
        }
    }
}
