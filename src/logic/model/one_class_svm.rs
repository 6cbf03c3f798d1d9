//! One-Class SVM - linear variant trained with plain SGD
//!
//! Stochastic substitute for the kernel one-class machine, sized for small
//! per-driver race matrices. Learns a hyperplane `<w, x> = rho` enclosing the
//! bulk of the (standardised) data; the decision function `<w, x> - rho` is
//! negated so higher = more anomalous.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::DetectorOutput;

const EPOCHS: usize = 100;
const INITIAL_LEARNING_RATE: f64 = 0.1;

pub struct SgdOneClassSvm {
    nu: f64,
    seed: u64,
}

impl SgdOneClassSvm {
    /// `nu` bounds the outlier fraction; clamped to [0.01, 0.5] as in the
    /// original contamination plumbing.
    pub fn new(nu: f64, seed: u64) -> Self {
        Self {
            nu: nu.clamp(0.01, 0.5),
            seed,
        }
    }

    pub fn fit_score(&self, data: &Array2<f64>) -> Result<DetectorOutput, String> {
        let (n, d) = data.dim();
        if n < 2 || d == 0 {
            return Err(format!("too few samples for OneClassSVM: {}", n));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut w = vec![0.0f64; d];
        let mut rho = 0.0f64;
        let mut order: Vec<usize> = (0..n).collect();
        let mut t = 0usize;

        for _ in 0..EPOCHS {
            order.shuffle(&mut rng);
            for &i in &order {
                t += 1;
                let eta = INITIAL_LEARNING_RATE / (1.0 + INITIAL_LEARNING_RATE * self.nu * t as f64);
                let margin: f64 = (0..d).map(|j| w[j] * data[[i, j]]).sum();

                // Hinge-loss subgradient on max(0, rho - <w,x>), plus the
                // nu/2 ||w||^2 regulariser and the -nu*rho linear term.
                if margin < rho {
                    for j in 0..d {
                        w[j] -= eta * (self.nu * w[j] - data[[i, j]]);
                    }
                    rho -= eta * (1.0 - self.nu);
                } else {
                    for j in 0..d {
                        w[j] -= eta * self.nu * w[j];
                    }
                    rho += eta * self.nu;
                }
            }
        }

        let mut scores = Vec::with_capacity(n);
        let mut flags = Vec::with_capacity(n);
        for i in 0..n {
            let decision: f64 = (0..d).map(|j| w[j] * data[[i, j]]).sum::<f64>() - rho;
            scores.push(-decision);
            flags.push(u8::from(decision < 0.0));
        }

        Ok(DetectorOutput { scores, flags })
    }
}

// ============================================================================
// TESTS
// ============================================================================
