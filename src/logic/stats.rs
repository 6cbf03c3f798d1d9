//! Shared Statistics - percentiles, Tukey fences, contamination estimate
//!
//! Small-data helpers used by every scoring stage. Percentile uses linear
//! interpolation between order statistics; std defaults to the sample
//! estimator (ddof = 1) to match the upstream aggregates.

use ndarray::Array2;

/// Linear-interpolation percentile (q in [0, 100]). Empty input returns 0.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let q = q.clamp(0.0, 100.0);
    let pos = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] + (sorted[hi] - sorted[lo]) * frac
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (ddof = 1). Fewer than 2 values -> 0.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Tukey upper fence: Q3 + 1.5 * IQR.
pub fn tukey_upper_fence(values: &[f64]) -> f64 {
    let q1 = percentile(values, 25.0);
    let q3 = percentile(values, 75.0);
    q3 + 1.5 * (q3 - q1)
}

/// Fractional ranks in (0, 1], average rank for ties (pandas `rank(pct=True)`).
pub fn rank_pct(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        // Extend over the tie group and assign the average rank
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let avg_rank = (i + 1 + j + 1) as f64 / 2.0;
        for &idx in &order[i..=j] {
            ranks[idx] = avg_rank / n as f64;
        }
        i = j + 1;
    }
    ranks
}

/// Estimate the anomaly contamination ratio from the data distribution.
///
/// Column-wise Tukey fences, OR-reduced across columns: a row counts as an
/// outlier when any of its features falls outside that feature's fence.
/// The resulting row fraction is clamped to [0.01, 0.25].
pub fn estimate_contamination(data: &Array2<f64>) -> f64 {
    let (n_rows, n_cols) = data.dim();
    if n_rows == 0 || n_cols == 0 {
        return 0.01;
    }

    let mut outlier = vec![false; n_rows];
    for c in 0..n_cols {
        let col: Vec<f64> = data.column(c).to_vec();
        let q1 = percentile(&col, 25.0);
        let q3 = percentile(&col, 75.0);
        let mut iqr = q3 - q1;
        if iqr == 0.0 {
            iqr = 1.0;
        }
        let lower = q1 - 1.5 * iqr;
        let upper = q3 + 1.5 * iqr;
        for r in 0..n_rows {
            let v = data[[r, c]];
            if v < lower || v > upper {
                outlier[r] = true;
            }
        }
    }

    let fraction = outlier.iter().filter(|&&o| o).count() as f64 / n_rows as f64;
    fraction.clamp(0.01, 0.25)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_percentile_interpolation() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&v, 0.0), 1.0);
        assert_eq!(percentile(&v, 100.0), 4.0);
        assert!((percentile(&v, 50.0) - 2.5).abs() < 1e-12);
        assert!((percentile(&v, 25.0) - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_percentile_empty_and_single() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[7.0], 95.0), 7.0);
    }

    #[test]
    fn test_std_dev_sample() {
        // pandas .std() of [1, 2, 3, 4] = 1.2909944...
        let s = std_dev(&[1.0, 2.0, 3.0, 4.0]);
        assert!((s - 1.2909944487358056).abs() < 1e-9);
        assert_eq!(std_dev(&[5.0]), 0.0);
    }

    #[test]
    fn test_tukey_fence() {
        let v = [1.0, 2.0, 3.0, 4.0, 100.0];
        let fence = tukey_upper_fence(&v);
        assert!(fence < 100.0);
        assert!(fence > 4.0);
    }

    #[test]
    fn test_rank_pct_ties() {
        let ranks = rank_pct(&[1.0, 2.0, 2.0, 3.0]);
        assert!((ranks[0] - 0.25).abs() < 1e-12);
        assert!((ranks[1] - 0.625).abs() < 1e-12);
        assert!((ranks[2] - 0.625).abs() < 1e-12);
        assert!((ranks[3] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_contamination_bounds() {
        // Uniform data: no outliers, clamps to 0.01
        let uniform = array![[1.0, 1.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        assert_eq!(estimate_contamination(&uniform), 0.01);

        // Half the rows extreme: clamps to 0.25
        let mut rows = Vec::new();
        for i in 0..20 {
            if i % 2 == 0 {
                rows.extend_from_slice(&[0.0, 0.0]);
            } else {
                rows.extend_from_slice(&[1000.0 * i as f64, -1000.0 * i as f64]);
            }
        }
        let spiky = Array2::from_shape_vec((20, 2), rows).unwrap();
        let c = estimate_contamination(&spiky);
        assert!((0.01..=0.25).contains(&c));
    }
}
