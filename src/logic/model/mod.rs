//! Model Module - Base Detectors + Boosted Trees
//!
//! In-crate small-data implementations of the four unsupervised detectors
//! and the gradient-boosted classifier that refines their output:
//! - `isolation_forest` - random partition trees, path-length score
//! - `one_class_svm` - linear one-class SVM trained with SGD
//! - `knn` - mean distance to the k nearest neighbours
//! - `pca` - reconstruction error over the top principal components
//! - `gbdt` - multi-class Newton-boosted regression trees

pub mod gbdt;
pub mod isolation_forest;
pub mod knn;
pub mod one_class_svm;
pub mod pca;

pub use gbdt::{GbdtClassifier, GbdtParams};
pub use isolation_forest::IsolationForest;
pub use knn::KnnDistance;
pub use one_class_svm::SgdOneClassSvm;
pub use pca::PcaReconstruction;

/// Per-row output shared by every detector: a continuous anomaly score
/// (higher = more anomalous) and a binary flag.
#[derive(Debug, Clone)]
pub struct DetectorOutput {
    pub scores: Vec<f64>,
    pub flags: Vec<u8>,
}

impl DetectorOutput {
    /// Neutral output used when a detector fails: all-zero scores, no flags.
    pub fn zeros(n: usize) -> Self {
        Self {
            scores: vec![0.0; n],
            flags: vec![0; n],
        }
    }
}
