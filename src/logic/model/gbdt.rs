//! GBDT - multi-class Newton-boosted regression trees
//!
//! Small-data gradient boosting for the severity classifier: softmax
//! objective, one regression tree per class per round, leaf values from a
//! Newton step `-sum(w*g) / (sum(w*h) + lambda)` with L2 regularisation.
//! Sample weights flow through both the gradient statistics and the split
//! gain, so confidence x class-balance weighting shapes every split.
//!
//! The model only ever learns the classes observed in training data
//! (`classes()` may be a strict subset of the 5-level space); callers
//! zero-fill probabilities for absent classes.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

const MIN_SPLIT_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub max_leaves: usize,
    pub min_child_samples: usize,
    pub reg_lambda: f64,
}

impl GbdtParams {
    /// Production profile, tuned for ~18 races per driver-system.
    pub fn production() -> Self {
        Self {
            n_estimators: 50,
            learning_rate: 0.1,
            max_depth: 3,
            max_leaves: 7,
            min_child_samples: 3,
            reg_lambda: 2.0,
        }
    }

    /// Smaller profile for the leave-one-out diagnostic loop.
    pub fn loo_cv() -> Self {
        Self {
            n_estimators: 30,
            learning_rate: 0.1,
            max_depth: 3,
            max_leaves: 5,
            min_child_samples: 2,
            reg_lambda: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict(&self, row: &[f64]) -> f64 {
        match self {
            TreeNode::Leaf { value } => *value,
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if row[*feature] <= *threshold {
                    left.predict(row)
                } else {
                    right.predict(row)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbdtClassifier {
    params: GbdtParams,
    /// Observed label integers, sorted ascending. May be a subset of 0..5.
    classes: Vec<usize>,
    /// Per-class initial raw score (weighted log prior).
    init_scores: Vec<f64>,
    /// trees[round][class_index]
    trees: Vec<Vec<TreeNode>>,
}

impl GbdtClassifier {
    pub fn new(params: GbdtParams) -> Self {
        Self {
            params,
            classes: Vec::new(),
            init_scores: Vec::new(),
            trees: Vec::new(),
        }
    }

    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    pub fn is_fitted(&self) -> bool {
        !self.trees.is_empty()
    }

    pub fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        sample_weight: &[f64],
    ) -> Result<(), String> {
        let n = x.nrows();
        if n == 0 {
            return Err("cannot fit with 0 samples".to_string());
        }
        if y.len() != n || sample_weight.len() != n {
            return Err("x, y and sample_weight must have the same length".to_string());
        }

        let mut classes: Vec<usize> = y.to_vec();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err("need at least 2 distinct classes".to_string());
        }
        let kk = classes.len();
        let class_index: Vec<usize> = y
            .iter()
            .map(|label| classes.iter().position(|c| c == label).unwrap())
            .collect();

        // Weighted log priors as the initial raw scores
        let total_w: f64 = sample_weight.iter().sum();
        let mut init = vec![0.0; kk];
        for (i, &ci) in class_index.iter().enumerate() {
            init[ci] += sample_weight[i];
        }
        for v in init.iter_mut() {
            *v = (*v / total_w).max(1e-12).ln();
        }

        self.classes = classes;
        self.init_scores = init.clone();
        self.trees.clear();

        let mut raw = vec![init; n];
        let rows: Vec<Vec<f64>> = (0..n).map(|i| x.row(i).to_vec()).collect();

        for _ in 0..self.params.n_estimators {
            let probs: Vec<Vec<f64>> = raw.iter().map(|r| softmax(r)).collect();
            let mut round_trees = Vec::with_capacity(kk);

            for k in 0..kk {
                let grad: Vec<f64> = (0..n)
                    .map(|i| probs[i][k] - f64::from(u8::from(class_index[i] == k)))
                    .collect();
                let hess: Vec<f64> = (0..n)
                    .map(|i| (probs[i][k] * (1.0 - probs[i][k])).max(1e-12))
                    .collect();

                let indices: Vec<usize> = (0..n).collect();
                let mut leaves_used = 1usize;
                let tree = build_tree(
                    &rows,
                    &indices,
                    &grad,
                    &hess,
                    sample_weight,
                    0,
                    &mut leaves_used,
                    &self.params,
                );

                for i in 0..n {
                    raw[i][k] += self.params.learning_rate * tree.predict(&rows[i]);
                }
                round_trees.push(tree);
            }
            self.trees.push(round_trees);
        }

        Ok(())
    }

    /// Probability distributions over the observed classes, row by row.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Vec<Vec<f64>>, String> {
        if !self.is_fitted() {
            return Err("model not trained yet".to_string());
        }
        let kk = self.classes.len();
        let mut out = Vec::with_capacity(x.nrows());
        for i in 0..x.nrows() {
            let row: Vec<f64> = x.row(i).to_vec();
            let mut raw = self.init_scores.clone();
            for round in &self.trees {
                for (k, tree) in round.iter().enumerate().take(kk) {
                    raw[k] += self.params.learning_rate * tree.predict(&row);
                }
            }
            out.push(softmax(&raw));
        }
        Ok(out)
    }

    /// Predicted label integers (from the observed class set).
    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<usize>, String> {
        let probas = self.predict_proba(x)?;
        Ok(probas
            .iter()
            .map(|p| {
                let best = p
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                self.classes[best]
            })
            .collect())
    }
}

fn softmax(raw: &[f64]) -> Vec<f64> {
    let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = raw.iter().map(|&r| (r - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|&e| e / sum).collect()
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

#[allow(clippy::too_many_arguments)]
fn build_tree(
    rows: &[Vec<f64>],
    indices: &[usize],
    grad: &[f64],
    hess: &[f64],
    weight: &[f64],
    depth: usize,
    leaves_used: &mut usize,
    params: &GbdtParams,
) -> TreeNode {
    let sum_wg: f64 = indices.iter().map(|&i| weight[i] * grad[i]).sum();
    let sum_wh: f64 = indices.iter().map(|&i| weight[i] * hess[i]).sum();
    let leaf = || TreeNode::Leaf {
        value: -sum_wg / (sum_wh + params.reg_lambda),
    };

    if depth >= params.max_depth
        || indices.len() < 2 * params.min_child_samples
        || *leaves_used >= params.max_leaves
    {
        return leaf();
    }

    let best = find_best_split(rows, indices, grad, hess, weight, params, sum_wg, sum_wh);
    match best {
        Some(split) if split.gain > MIN_SPLIT_GAIN => {
            *leaves_used += 1;
            let left = build_tree(
                rows, &split.left, grad, hess, weight, depth + 1, leaves_used, params,
            );
            let right = build_tree(
                rows, &split.right, grad, hess, weight, depth + 1, leaves_used, params,
            );
            TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        _ => leaf(),
    }
}

#[allow(clippy::too_many_arguments)]
fn find_best_split(
    rows: &[Vec<f64>],
    indices: &[usize],
    grad: &[f64],
    hess: &[f64],
    weight: &[f64],
    params: &GbdtParams,
    total_wg: f64,
    total_wh: f64,
) -> Option<SplitCandidate> {
    let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
    let lambda = params.reg_lambda;
    let parent_score = total_wg * total_wg / (total_wh + lambda);

    let mut best: Option<SplitCandidate> = None;
    for f in 0..n_features {
        let mut order: Vec<usize> = indices.to_vec();
        order.sort_by(|&a, &b| {
            rows[a][f]
                .partial_cmp(&rows[b][f])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut left_wg = 0.0;
        let mut left_wh = 0.0;
        for pos in 0..order.len().saturating_sub(1) {
            let i = order[pos];
            left_wg += weight[i] * grad[i];
            left_wh += weight[i] * hess[i];

            // Only split between distinct feature values
            if rows[order[pos]][f] == rows[order[pos + 1]][f] {
                continue;
            }
            let left_n = pos + 1;
            let right_n = order.len() - left_n;
            if left_n < params.min_child_samples || right_n < params.min_child_samples {
                continue;
            }

            let right_wg = total_wg - left_wg;
            let right_wh = total_wh - left_wh;
            let gain = left_wg * left_wg / (left_wh + lambda)
                + right_wg * right_wg / (right_wh + lambda)
                - parent_score;

            if best.as_ref().map_or(true, |b| gain > b.gain) {
                let threshold = (rows[order[pos]][f] + rows[order[pos + 1]][f]) / 2.0;
                best = Some(SplitCandidate {
                    feature: f,
                    threshold,
                    gain,
                    left: order[..left_n].to_vec(),
                    right: order[left_n..].to_vec(),
                });
            }
        }
    }
    best
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn separable_data() -> (Array2<f64>, Vec<usize>, Vec<f64>) {
        // Three well-separated blobs labelled 0, 2, 4 (sparse label space)
        let mut flat = Vec::new();
        let mut y = Vec::new();
        for i in 0..8 {
            flat.extend_from_slice(&[i as f64 * 0.1, 0.0]);
            y.push(0);
        }
        for i in 0..8 {
            flat.extend_from_slice(&[5.0 + i as f64 * 0.1, 5.0]);
            y.push(2);
        }
        for i in 0..8 {
            flat.extend_from_slice(&[10.0 + i as f64 * 0.1, -5.0]);
            y.push(4);
        }
        let x = Array2::from_shape_vec((24, 2), flat).unwrap();
        let w = vec![1.0; 24];
        (x, y, w)
    }

    #[test]
    fn test_learns_separable_blobs() {
        let (x, y, w) = separable_data();
        let mut model = GbdtClassifier::new(GbdtParams::production());
        model.fit(&x, &y, &w).unwrap();

        assert_eq!(model.classes(), &[0, 2, 4]);
        let preds = model.predict(&x).unwrap();
        let correct = preds.iter().zip(y.iter()).filter(|(a, b)| a == b).count();
        assert!(correct >= 22, "only {}/24 correct", correct);
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let (x, y, w) = separable_data();
        let mut model = GbdtClassifier::new(GbdtParams::loo_cv());
        model.fit(&x, &y, &w).unwrap();
        for p in model.predict_proba(&x).unwrap() {
            assert_eq!(p.len(), 3);
            assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_single_class_rejected() {
        let x = Array2::from_shape_vec((4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut model = GbdtClassifier::new(GbdtParams::production());
        assert!(model.fit(&x, &[1, 1, 1, 1], &[1.0; 4]).is_err());
    }

    #[test]
    fn test_unfitted_predict_is_error() {
        let x = Array2::zeros((2, 2));
        let model = GbdtClassifier::new(GbdtParams::production());
        assert!(model.predict(&x).is_err());
    }

    #[test]
    fn test_sample_weight_shifts_decision() {
        // Two overlapping points with conflicting labels: the heavier one wins
        let x = Array2::from_shape_vec(
            (6, 1),
            vec![0.0, 0.1, 0.2, 1.0, 1.1, 0.5],
        )
        .unwrap();
        let y = vec![0, 0, 0, 1, 1, 1];
        // Last sample (x=0.5, label 1) dominated by weight
        let w = vec![1.0, 1.0, 1.0, 1.0, 1.0, 10.0];
        let mut model = GbdtClassifier::new(GbdtParams::loo_cv());
        model.fit(&x, &y, &w).unwrap();
        let mid = Array2::from_shape_vec((1, 1), vec![0.5]).unwrap();
        assert_eq!(model.predict(&mid).unwrap()[0], 1);
    }

    #[test]
    fn test_serde_roundtrip_preserves_predictions() {
        let (x, y, w) = separable_data();
        let mut model = GbdtClassifier::new(GbdtParams::production());
        model.fit(&x, &y, &w).unwrap();

        let json = serde_json::to_string(&model).unwrap();
        let restored: GbdtClassifier = serde_json::from_str(&json).unwrap();
        assert_eq!(model.predict(&x).unwrap(), restored.predict(&x).unwrap());
    }
}
