//! Isolation Forest - random partition trees, path-length anomaly score
//!
//! Anomalies isolate in fewer random splits than normal points, so the
//! expected path length over the forest is short for outliers. Score is the
//! standard `2^(-E[h(x)] / c(psi))` with `c` the average BST path length.
//! Flags mark the top `contamination` fraction of scores.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::DetectorOutput;
use crate::logic::stats;

const DEFAULT_N_ESTIMATORS: usize = 100;

#[derive(Debug)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        value: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

pub struct IsolationForest {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    seed: u64,
}

impl IsolationForest {
    pub fn new(contamination: f64, n_rows: usize, seed: u64) -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_samples: 256.min(n_rows.max(1)),
            contamination,
            seed,
        }
    }

    pub fn fit_score(&self, data: &Array2<f64>) -> Result<DetectorOutput, String> {
        let n = data.nrows();
        if n < 2 || data.ncols() == 0 {
            return Err(format!("too few samples for IsolationForest: {}", n));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let psi = self.max_samples.min(n);
        let depth_limit = (psi as f64).log2().ceil().max(1.0) as usize;

        let mut trees = Vec::with_capacity(self.n_estimators);
        let mut indices: Vec<usize> = (0..n).collect();
        for _ in 0..self.n_estimators {
            indices.shuffle(&mut rng);
            let sample = &indices[..psi];
            trees.push(build_tree(data, sample, 0, depth_limit, &mut rng));
        }

        let c = average_path_length(psi);
        let mut scores = Vec::with_capacity(n);
        for r in 0..n {
            let row: Vec<f64> = data.row(r).to_vec();
            let avg_h: f64 = trees.iter().map(|t| path_length(t, &row, 0)).sum::<f64>()
                / trees.len() as f64;
            scores.push(2f64.powf(-avg_h / c));
        }

        // Flag the top contamination fraction
        let threshold = stats::percentile(&scores, 100.0 * (1.0 - self.contamination));
        let flags = scores
            .iter()
            .map(|&s| u8::from(s > threshold))
            .collect();

        Ok(DetectorOutput { scores, flags })
    }
}

fn build_tree(data: &Array2<f64>, sample: &[usize], depth: usize, limit: usize, rng: &mut StdRng) -> Node {
    if sample.len() <= 1 || depth >= limit {
        return Node::Leaf { size: sample.len() };
    }

    let n_features = data.ncols();
    let feature = rng.gen_range(0..n_features);

    let mut lo = f64::INFINITY;
    let mut hi = f64::NEG_INFINITY;
    for &i in sample {
        let v = data[[i, feature]];
        lo = lo.min(v);
        hi = hi.max(v);
    }
    if hi <= lo {
        return Node::Leaf { size: sample.len() };
    }

    let value = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        sample.iter().partition(|&&i| data[[i, feature]] < value);
    if left.is_empty() || right.is_empty() {
        return Node::Leaf { size: sample.len() };
    }

    Node::Split {
        feature,
        value,
        left: Box::new(build_tree(data, &left, depth + 1, limit, rng)),
        right: Box::new(build_tree(data, &right, depth + 1, limit, rng)),
    }
}

fn path_length(node: &Node, row: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Split {
            feature,
            value,
            left,
            right,
        } => {
            if row[*feature] < *value {
                path_length(left, row, depth + 1)
            } else {
                path_length(right, row, depth + 1)
            }
        }
    }
}

/// Average unsuccessful-search path length in a BST of `n` nodes.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            let harmonic = (n - 1.0).ln() + 0.577_215_664_901_532_9;
            2.0 * harmonic - 2.0 * (n - 1.0) / n
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn cluster_with_outlier() -> Array2<f64> {
        let mut rows = Vec::new();
        for i in 0..19 {
            rows.push(vec![(i % 3) as f64 * 0.1, (i % 5) as f64 * 0.1]);
        }
        rows.push(vec![50.0, -50.0]);
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((20, 2), flat).unwrap()
    }

    #[test]
    fn test_outlier_scores_highest() {
        let data = cluster_with_outlier();
        let forest = IsolationForest::new(0.1, data.nrows(), 42);
        let out = forest.fit_score(&data).unwrap();
        let max_idx = out
            .scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap()
            .0;
        assert_eq!(max_idx, 19);
        assert_eq!(out.flags[19], 1);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let data = cluster_with_outlier();
        let a = IsolationForest::new(0.1, 20, 42).fit_score(&data).unwrap();
        let b = IsolationForest::new(0.1, 20, 42).fit_score(&data).unwrap();
        assert_eq!(a.scores, b.scores);
    }

    #[test]
    fn test_rejects_single_sample() {
        let data = Array2::from_shape_vec((1, 2), vec![1.0, 2.0]).unwrap();
        assert!(IsolationForest::new(0.1, 1, 42).fit_score(&data).is_err());
    }

    #[test]
    fn test_average_path_length_monotone() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(100) > average_path_length(10));
    }
}
