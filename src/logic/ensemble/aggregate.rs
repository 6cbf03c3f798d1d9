//! Aggregator - fuse detector outputs into one severity judgment per race
//!
//! Majority voting over the binary flags, reliability-weighted score fusion,
//! a disagreement penalty, and an adaptive-quantile severity scale computed
//! from the driver+system's own score distribution ("anomalous" is relative
//! to each driver's typical variance, not a global constant).

use crate::logic::frame::Frame;
use crate::logic::stats;
use crate::logic::types::{ModelWeights, Severity};

use super::{ANOMALY_SUFFIX, SCORE_SUFFIX};

/// Core models whose columns feed the vote/mean/std directly. KNN is folded
/// in afterwards via a weighted running average when its columns exist.
const CORE_MODELS: [&str; 3] = ["IsolationForest", "OneClassSVM", "Autoencoder"];

pub const VOTED_ANOMALY: &str = "Voted_Anomaly";
pub const SCORE_MEAN: &str = "Anomaly_Score_Mean";
pub const SCORE_STD: &str = "Anomaly_Score_STD";
pub const VOTING_SCORE: &str = "Voting_Score";
pub const WEIGHTED_SCORE: &str = "Reliability_Weighted_Score";
pub const ENHANCED_SCORE: &str = "Enhanced_Anomaly_Score";

pub struct AnomalyStatistics {
    weights: ModelWeights,
}

impl AnomalyStatistics {
    pub fn new(weights: ModelWeights) -> Self {
        Self { weights }
    }

    /// Compute voting, weighted scores and severity levels. Appends the
    /// aggregate columns to the frame and returns the per-race level.
    ///
    /// A frame without any detector columns (all upstream models failed)
    /// comes back all-`Normal` without error.
    pub fn anomaly_insights(&self, frame: &mut Frame) -> Vec<Severity> {
        let n = frame.n_rows();

        let anom_cols: Vec<String> = CORE_MODELS
            .iter()
            .map(|m| format!("{}{}", m, ANOMALY_SUFFIX))
            .filter(|c| frame.has_column(c))
            .collect();
        let score_cols: Vec<String> = CORE_MODELS
            .iter()
            .map(|m| format!("{}{}", m, SCORE_SUFFIX))
            .filter(|c| frame.has_column(c))
            .collect();

        if anom_cols.is_empty() || score_cols.is_empty() {
            return vec![Severity::Normal; n];
        }

        let knn_anom = frame.column_vec(&format!("KNN{}", ANOMALY_SUFFIX));
        let knn_score = frame.column_vec(&format!("KNN{}", SCORE_SUFFIX));

        // Per-row vote count, mean and disagreement over the core scores
        let mut anomaly_sum = vec![0.0; n];
        let mut score_mean = vec![0.0; n];
        let mut score_std = vec![0.0; n];
        for r in 0..n {
            let flags: Vec<f64> = anom_cols
                .iter()
                .filter_map(|c| frame.value(r, c))
                .collect();
            let scores: Vec<f64> = score_cols
                .iter()
                .filter_map(|c| frame.value(r, c))
                .collect();
            anomaly_sum[r] = flags.iter().sum();
            score_mean[r] = stats::mean(&scores);
            score_std[r] = stats::std_dev(&scores);
        }

        if let Some(knn) = &knn_anom {
            for r in 0..n {
                anomaly_sum[r] += knn[r];
            }
        }
        if let Some(knn) = &knn_score {
            // Fold KNN into the mean without recomputing from scratch
            let k = score_cols.len() as f64;
            for r in 0..n {
                score_mean[r] = (score_mean[r] * k + knn[r]) / (k + 1.0);
            }
        }

        let voted: Vec<f64> = anomaly_sum.iter().map(|&s| f64::from(s >= 2.0)).collect();
        let total_voters = anom_cols.len() + usize::from(knn_anom.is_some());
        let voting_score: Vec<f64> = anomaly_sum
            .iter()
            .map(|&s| s / total_voters as f64)
            .collect();

        // Reliability-weighted fusion over whichever models are present
        let mut model_names: Vec<String> = anom_cols
            .iter()
            .map(|c| c.trim_end_matches(ANOMALY_SUFFIX).to_string())
            .collect();
        if knn_anom.is_some() {
            model_names.push("KNN".to_string());
        }
        let mut weights: Vec<f64> = model_names.iter().map(|m| self.weights.get(m)).collect();
        let weight_sum: f64 = weights.iter().sum();
        for w in weights.iter_mut() {
            *w /= weight_sum;
        }

        let mut fusion_cols: Vec<String> = score_cols.clone();
        if knn_score.is_some() {
            fusion_cols.push(format!("KNN{}", SCORE_SUFFIX));
        }
        let mut weighted = vec![0.0; n];
        for r in 0..n {
            weighted[r] = fusion_cols
                .iter()
                .zip(weights.iter())
                .filter_map(|(c, &w)| frame.value(r, c).map(|v| v * w))
                .sum();
        }

        // Disagreement penalty + unanimity bonus
        let unanimous = model_names.len() as f64;
        let enhanced: Vec<f64> = (0..n)
            .map(|r| {
                let mut e = weighted[r] - score_std[r] * 0.1;
                if anomaly_sum[r] == unanimous {
                    e += 0.05;
                }
                e
            })
            .collect();

        // Adaptive quantile thresholds from this slice's own distribution
        let sq = [
            stats::percentile(&enhanced, 25.0),
            stats::percentile(&enhanced, 50.0),
            stats::percentile(&enhanced, 75.0),
            stats::percentile(&enhanced, 85.0),
            stats::percentile(&enhanced, 95.0),
        ];
        let std_q = [
            stats::percentile(&score_std, 25.0),
            stats::percentile(&score_std, 50.0),
            stats::percentile(&score_std, 75.0),
        ];

        let levels: Vec<Severity> = (0..n)
            .map(|r| classify(enhanced[r], score_std[r], &sq, &std_q))
            .collect();

        frame.set_column(VOTED_ANOMALY, voted);
        frame.set_column(SCORE_MEAN, score_mean);
        frame.set_column(SCORE_STD, score_std);
        frame.set_column(VOTING_SCORE, voting_score);
        frame.set_column(WEIGHTED_SCORE, weighted);
        frame.set_column(ENHANCED_SCORE, enhanced);

        levels
    }
}

impl Default for AnomalyStatistics {
    fn default() -> Self {
        Self::new(ModelWeights::default())
    }
}

/// Quantile thresholds with a per-race adjustment: races where the models
/// disagree (top std quartile) need a higher bar, low-disagreement races a
/// lower one.
fn classify(score: f64, std_dev: f64, sq: &[f64; 5], std_q: &[f64; 3]) -> Severity {
    let adj = if std_dev >= std_q[2] {
        0.1
    } else if std_dev <= std_q[0] {
        -0.1
    } else {
        0.0
    };

    if score >= sq[4] + adj {
        Severity::Critical
    } else if score >= sq[3] + adj {
        Severity::High
    } else if score >= sq[2] {
        Severity::Medium
    } else if score >= sq[1] {
        Severity::Low
    } else {
        Severity::Normal
    }
}

/// Data-driven severity from raw voting consensus. Reported alongside the
/// quantile-based level as an independent signal; the two may disagree.
pub fn severity_from_votes(vote_count: usize, _total_models: usize) -> Severity {
    match vote_count {
        0 => Severity::Normal,
        1 => Severity::Low,
        2 => Severity::Medium,
        3 => Severity::High,
        _ => Severity::Critical,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::frame::Frame;

    fn frame_with_scores(n: usize, hot_row: usize) -> Frame {
        let mut cols = Vec::new();
        let models = ["IsolationForest", "OneClassSVM", "Autoencoder", "KNN"];
        for (m_idx, model) in models.iter().enumerate() {
            // Baseline scores climb gently so the quantile thresholds have
            // spread to work with; each model sits at a small offset
            let offset = m_idx as f64 * 0.003;
            let mut flags = vec![0.0; n];
            let mut scores: Vec<f64> =
                (0..n).map(|i| 0.10 + 0.01 * i as f64 + offset).collect();
            flags[hot_row] = 1.0;
            scores[hot_row] = 0.92 + offset;
            cols.push((format!("{}{}", model, ANOMALY_SUFFIX), flags));
            cols.push((format!("{}{}", model, SCORE_SUFFIX), scores));
        }
        Frame::from_columns(cols).unwrap()
    }

    #[test]
    fn test_majority_vote_and_columns() {
        let mut frame = frame_with_scores(10, 3);
        let levels = AnomalyStatistics::default().anomaly_insights(&mut frame);

        assert_eq!(levels.len(), 10);
        let voted = frame.column_vec(VOTED_ANOMALY).unwrap();
        assert_eq!(voted[3], 1.0);
        assert!(voted.iter().enumerate().all(|(i, &v)| i == 3 || v == 0.0));

        for col in [SCORE_MEAN, SCORE_STD, VOTING_SCORE, WEIGHTED_SCORE, ENHANCED_SCORE] {
            assert!(frame.has_column(col), "missing {}", col);
        }
    }

    #[test]
    fn test_unanimous_row_is_most_severe() {
        let mut frame = frame_with_scores(12, 5);
        let levels = AnomalyStatistics::default().anomaly_insights(&mut frame);
        assert!(levels[5] >= Severity::High, "hot race got {:?}", levels[5]);
        // The quantile scale always grades the upper quartile as Medium,
        // so only High and above is reserved for the hot race
        for (i, level) in levels.iter().enumerate() {
            if i != 5 {
                assert!(*level <= Severity::Medium, "race {} got {:?}", i, level);
            }
        }
    }

    #[test]
    fn test_missing_columns_defaults_to_normal() {
        let mut frame = Frame::from_columns(vec![(
            "Speed_mean".to_string(),
            vec![1.0, 2.0, 3.0],
        )])
        .unwrap();
        let levels = AnomalyStatistics::default().anomaly_insights(&mut frame);
        assert_eq!(levels, vec![Severity::Normal; 3]);
    }

    #[test]
    fn test_custom_weights_change_fusion() {
        let mut a = frame_with_scores(8, 2);
        let mut b = frame_with_scores(8, 2);
        AnomalyStatistics::default().anomaly_insights(&mut a);
        // Put all reliability on the SVM
        let skewed = ModelWeights {
            isolation_forest: 0.01,
            autoencoder: 0.01,
            one_class_svm: 1.0,
            knn: 0.01,
        };
        AnomalyStatistics::new(skewed).anomaly_insights(&mut b);
        let wa = a.column_vec(WEIGHTED_SCORE).unwrap();
        let wb = b.column_vec(WEIGHTED_SCORE).unwrap();
        assert!(wa != wb);
    }

    #[test]
    fn test_severity_from_votes_exact_mapping() {
        assert_eq!(severity_from_votes(0, 4), Severity::Normal);
        assert_eq!(severity_from_votes(1, 4), Severity::Low);
        assert_eq!(severity_from_votes(2, 4), Severity::Medium);
        assert_eq!(severity_from_votes(3, 4), Severity::High);
        assert_eq!(severity_from_votes(4, 4), Severity::Critical);
        assert_eq!(severity_from_votes(7, 4), Severity::Critical);
    }
}
