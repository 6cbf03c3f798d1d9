//! KNN Distance - mean Euclidean distance to the k nearest neighbours
//!
//! Brute-force pairwise distances (race matrices are tiny). Flag threshold
//! is the Tukey upper fence of the distance distribution.

use ndarray::Array2;

use super::DetectorOutput;
use crate::logic::stats;

const DEFAULT_K: usize = 5;

pub struct KnnDistance {
    k: usize,
}

impl KnnDistance {
    pub fn new() -> Self {
        Self { k: DEFAULT_K }
    }

    pub fn with_k(k: usize) -> Self {
        Self { k }
    }

    pub fn fit_score(&self, data: &Array2<f64>) -> Result<DetectorOutput, String> {
        let n = data.nrows();
        if n <= 2 {
            return Err(format!("too few samples for KNN scoring: {}", n));
        }
        let k = self.k.min(n - 1).max(2);

        let mut scores = Vec::with_capacity(n);
        for i in 0..n {
            let mut dists: Vec<f64> = (0..n)
                .filter(|&j| j != i)
                .map(|j| {
                    data.row(i)
                        .iter()
                        .zip(data.row(j).iter())
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f64>()
                        .sqrt()
                })
                .collect();
            dists.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            scores.push(stats::mean(&dists[..k]));
        }

        let fence = stats::tukey_upper_fence(&scores);
        let flags = scores.iter().map(|&s| u8::from(s >= fence)).collect();

        Ok(DetectorOutput { scores, flags })
    }
}

impl Default for KnnDistance {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_outlier_has_largest_distance() {
        let mut flat = Vec::new();
        for i in 0..9 {
            flat.extend_from_slice(&[(i % 3) as f64 * 0.1, (i / 3) as f64 * 0.1]);
        }
        flat.extend_from_slice(&[10.0, 10.0]);
        let data = Array2::from_shape_vec((10, 2), flat).unwrap();

        let out = KnnDistance::new().fit_score(&data).unwrap();
        let max_idx = out
            .scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(max_idx, 9);
        assert_eq!(out.flags[9], 1);
    }

    #[test]
    fn test_too_few_samples_is_error() {
        let data = Array2::from_shape_vec((2, 2), vec![0.0, 0.0, 1.0, 1.0]).unwrap();
        assert!(KnnDistance::new().fit_score(&data).is_err());
    }

    #[test]
    fn test_k_shrinks_with_n() {
        // 4 samples: k clamps to min(5, 3) = 3, no panic
        let data =
            Array2::from_shape_vec((4, 2), vec![0.0, 0.0, 0.1, 0.0, 0.0, 0.1, 0.1, 0.1]).unwrap();
        let out = KnnDistance::new().fit_score(&data).unwrap();
        assert_eq!(out.scores.len(), 4);
    }
}
