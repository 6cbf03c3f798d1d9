//! PCA Reconstruction - "Autoencoder" stage of the ensemble
//!
//! Projects the standardised matrix onto its top principal components and
//! measures the per-row mean squared reconstruction error. Components come
//! from power iteration with deflation on the covariance matrix, so no
//! external linear-algebra backend is needed for these tiny matrices.
//!
//! The anomaly score is the empirical percentile rank of the error (robust
//! to outlier magnitude). The detection threshold is the fraction of rows at
//! or below the raw Tukey fence of the error; that turns the fence into a
//! percentile cutoff on the rank scale. Unusual, but preserved from the
//! original scoring behaviour.

use ndarray::{Array1, Array2};

use super::DetectorOutput;
use crate::logic::stats;

const POWER_ITERATIONS: usize = 200;
const CONVERGENCE_EPS: f64 = 1e-10;

pub struct PcaReconstruction;

impl PcaReconstruction {
    /// Components = clamp(n_features / 2, 2, 10), further capped by the
    /// matrix dimensions.
    fn n_components(n_rows: usize, n_cols: usize) -> usize {
        (n_cols / 2).clamp(2, 10).min(n_cols).min(n_rows.saturating_sub(1).max(1))
    }

    pub fn fit_score(data: &Array2<f64>) -> Result<DetectorOutput, String> {
        let (n, d) = data.dim();
        if n < 2 || d == 0 {
            return Err(format!("too few samples for PCA reconstruction: {}", n));
        }

        let k = Self::n_components(n, d);
        let errors = reconstruction_errors(data, k)?;

        // Percentile-rank score, Tukey-derived percentile threshold
        let scores = stats::rank_pct(&errors);
        let fence = stats::tukey_upper_fence(&errors);
        let threshold =
            errors.iter().filter(|&&e| e <= fence).count() as f64 / errors.len() as f64;

        let flags = scores.iter().map(|&s| u8::from(s > threshold)).collect();
        Ok(DetectorOutput { scores, flags })
    }
}

/// Mean squared per-row residual after projecting onto the top `k`
/// principal components.
fn reconstruction_errors(data: &Array2<f64>, k: usize) -> Result<Vec<f64>, String> {
    let (n, d) = data.dim();

    // Center columns (input is standardised upstream, but keep this exact)
    let mut centered = data.clone();
    for c in 0..d {
        let m = stats::mean(&data.column(c).to_vec());
        for r in 0..n {
            centered[[r, c]] -= m;
        }
    }

    let mut cov = centered.t().dot(&centered) / (n as f64 - 1.0).max(1.0);

    let mut components: Vec<Array1<f64>> = Vec::with_capacity(k);
    for comp in 0..k {
        match dominant_eigenvector(&cov, comp, &components) {
            Some((eigval, v)) => {
                // Deflate: remove the found component from the covariance
                let outer = outer_product(&v, &v) * eigval;
                cov = cov - outer;
                components.push(v);
            }
            None => break,
        }
    }
    if components.is_empty() {
        return Err("power iteration found no components".to_string());
    }

    // Projection and reconstruction: R = (X V) V^T
    let mut errors = vec![0.0; n];
    for r in 0..n {
        let row = centered.row(r);
        let mut recon = vec![0.0; d];
        for v in &components {
            let t: f64 = row.iter().zip(v.iter()).map(|(a, b)| a * b).sum();
            for j in 0..d {
                recon[j] += t * v[j];
            }
        }
        let sq: f64 = row
            .iter()
            .zip(recon.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum();
        errors[r] = sq / d as f64;
    }
    Ok(errors)
}

/// Power iteration for the dominant eigenpair of a symmetric matrix.
/// Each iterate is re-orthogonalised against the components already found,
/// so deflation round-off cannot leak an earlier eigendirection back in.
/// Returns None when the matrix has (numerically) no spread left.
fn dominant_eigenvector(
    m: &Array2<f64>,
    comp: usize,
    prior: &[Array1<f64>],
) -> Option<(f64, Array1<f64>)> {
    let d = m.nrows();
    // Deterministic start vector, rotated per component to avoid starting
    // orthogonal to the target eigenvector
    let mut v: Array1<f64> =
        Array1::from_shape_fn(d, |i| if (i + comp) % 2 == 0 { 1.0 } else { 0.5 });
    orthogonalize(&mut v, prior);
    let norm = v.dot(&v).sqrt();
    if norm < CONVERGENCE_EPS {
        return None;
    }
    v /= norm;

    let mut eigval = 0.0;
    for _ in 0..POWER_ITERATIONS {
        let mut next = m.dot(&v);
        orthogonalize(&mut next, prior);
        let norm = next.dot(&next).sqrt();
        if norm < CONVERGENCE_EPS {
            return None;
        }
        let next = next / norm;
        let delta = (&next - &v).mapv(f64::abs).sum();
        v = next;
        eigval = v.dot(&m.dot(&v));
        if delta < CONVERGENCE_EPS {
            break;
        }
    }
    if eigval.abs() < CONVERGENCE_EPS {
        return None;
    }
    Some((eigval, v))
}

/// Subtract the projection onto each prior component (Gram-Schmidt step).
fn orthogonalize(v: &mut Array1<f64>, prior: &[Array1<f64>]) {
    for p in prior {
        let t = v.dot(p);
        for (dst, src) in v.iter_mut().zip(p.iter()) {
            *dst -= t * src;
        }
    }
}

fn outer_product(a: &Array1<f64>, b: &Array1<f64>) -> Array2<f64> {
    let d = a.len();
    Array2::from_shape_fn((d, d), |(i, j)| a[i] * b[j])
}

// ============================================================================
// TESTS
// ============================================================================
