//! Feature Engineer - temporal degradation and season-position signals
//!
//! Race-sequential enrichment applied before classifier training: per-column
//! race-over-race deltas (degradation proxy), 3-race trailing rolling stats
//! (trend smoothing), and season-position features encoding accumulated
//! component wear across a season.

use crate::logic::frame::Frame;
use crate::logic::stats;

pub struct FeatureEngineer;

impl FeatureEngineer {
    /// Add race-over-race deltas and rolling stats for each feature column.
    /// Returns the new column names.
    pub fn add_temporal_features(&self, frame: &mut Frame, feature_cols: &[String]) -> Vec<String> {
        let mut new_cols = Vec::new();
        for col in feature_cols {
            let values = match frame.column_vec(col) {
                Some(v) => v,
                None => continue,
            };
            let n = values.len();

            let mut delta = vec![0.0; n];
            for i in 1..n {
                delta[i] = values[i] - values[i - 1];
            }

            let mut roll_mean = vec![0.0; n];
            let mut roll_std = vec![0.0; n];
            for i in 0..n {
                let start = i.saturating_sub(2);
                let window = &values[start..=i];
                roll_mean[i] = stats::mean(window);
                // Single-element windows have no spread; std_dev returns 0
                roll_std[i] = stats::std_dev(window);
            }

            let delta_col = format!("{}_delta", col);
            let mean_col = format!("{}_roll3_mean", col);
            let std_col = format!("{}_roll3_std", col);
            frame.set_column(&delta_col, delta);
            frame.set_column(&mean_col, roll_mean);
            frame.set_column(&std_col, roll_std);
            new_cols.push(delta_col);
            new_cols.push(mean_col);
            new_cols.push(std_col);
        }
        new_cols
    }

    /// Add season-position features (computed once, not per column).
    pub fn add_season_context(&self, frame: &mut Frame) -> Vec<String> {
        let n = frame.n_rows();
        let denom = n.saturating_sub(1).max(1) as f64;
        let race_index: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let season_pct: Vec<f64> = race_index.iter().map(|&i| i / denom).collect();
        let second_half: Vec<f64> = season_pct.iter().map(|&p| f64::from(p >= 0.5)).collect();

        frame.set_column("race_index", race_index);
        frame.set_column("season_pct", season_pct);
        frame.set_column("is_second_half", second_half);
        vec![
            "race_index".to_string(),
            "season_pct".to_string(),
            "is_second_half".to_string(),
        ]
    }

    /// Full pipeline on a copy. Returns (enriched frame, all feature
    /// columns: originals + temporal + season).
    pub fn engineer(&self, frame: &Frame, feature_cols: &[String]) -> (Frame, Vec<String>) {
        let mut enriched = frame.clone();
        let temporal = self.add_temporal_features(&mut enriched, feature_cols);
        let season = self.add_season_context(&mut enriched);

        let mut all: Vec<String> = feature_cols
            .iter()
            .filter(|c| frame.has_column(c))
            .cloned()
            .collect();
        all.extend(temporal);
        all.extend(season);
        (enriched, all)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn frame() -> (Frame, Vec<String>) {
        let f = Frame::from_columns(vec![(
            "RPM_mean".to_string(),
            vec![100.0, 110.0, 105.0, 120.0],
        )])
        .unwrap();
        (f, vec!["RPM_mean".to_string()])
    }

    #[test]
    fn test_delta_first_row_zero() {
        let (f, cols) = frame();
        let (enriched, _) = FeatureEngineer.engineer(&f, &cols);
        let delta = enriched.column_vec("RPM_mean_delta").unwrap();
        assert_eq!(delta, vec![0.0, 10.0, -5.0, 15.0]);
    }

    #[test]
    fn test_rolling_window_min_periods() {
        let (f, cols) = frame();
        let (enriched, _) = FeatureEngineer.engineer(&f, &cols);
        let mean = enriched.column_vec("RPM_mean_roll3_mean").unwrap();
        assert!((mean[0] - 100.0).abs() < 1e-9);
        assert!((mean[1] - 105.0).abs() < 1e-9);
        assert!((mean[2] - 105.0).abs() < 1e-9);
        assert!((mean[3] - (110.0 + 105.0 + 120.0) / 3.0).abs() < 1e-9);

        let std = enriched.column_vec("RPM_mean_roll3_std").unwrap();
        assert_eq!(std[0], 0.0); // one-element window
        assert!(std[1] > 0.0);
    }

    #[test]
    fn test_season_context() {
        let (f, cols) = frame();
        let (enriched, all) = FeatureEngineer.engineer(&f, &cols);
        assert_eq!(enriched.column_vec("race_index").unwrap(), vec![0.0, 1.0, 2.0, 3.0]);
        let pct = enriched.column_vec("season_pct").unwrap();
        assert!((pct[3] - 1.0).abs() < 1e-12);
        assert_eq!(
            enriched.column_vec("is_second_half").unwrap(),
            vec![0.0, 0.0, 1.0, 1.0]
        );
        // originals + 3 temporal + 3 season
        assert_eq!(all.len(), 1 + 3 + 3);
    }

    #[test]
    fn test_single_race_no_divide_by_zero() {
        let f = Frame::from_columns(vec![("X".to_string(), vec![5.0])]).unwrap();
        let (enriched, _) = FeatureEngineer.engineer(&f, &["X".to_string()]);
        assert_eq!(enriched.column_vec("season_pct").unwrap(), vec![0.0]);
    }
}
