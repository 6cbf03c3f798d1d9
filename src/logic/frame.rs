//! Feature Frame - named-column numeric matrix
//!
//! One row per race, one column per telemetry aggregate. This is the data
//! structure every engine passes around: the ensemble appends score columns
//! to it, the aggregator reads them back by name, and the classifier selects
//! training features from it by column-name filters.

use ndarray::{Array2, ArrayView1};

use crate::logic::stats;

#[derive(Debug, Clone)]
pub struct Frame {
    columns: Vec<String>,
    data: Array2<f64>,
}

impl Frame {
    /// Build from ordered (name, values) pairs. All columns must share the
    /// same length; mismatches are a caller bug and return an error string.
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> Result<Self, String> {
        let n_rows = columns.first().map(|(_, v)| v.len()).unwrap_or(0);
        let mut names = Vec::with_capacity(columns.len());
        let mut flat = Vec::with_capacity(n_rows * columns.len());

        for (name, values) in &columns {
            if values.len() != n_rows {
                return Err(format!(
                    "column '{}' has {} rows, expected {}",
                    name,
                    values.len(),
                    n_rows
                ));
            }
            names.push(name.clone());
        }
        // Column-major input, row-major storage
        for r in 0..n_rows {
            for (_, values) in &columns {
                flat.push(values[r]);
            }
        }

        let data = Array2::from_shape_vec((n_rows, names.len()), flat)
            .map_err(|e| e.to_string())?;
        Ok(Self { columns: names, data })
    }

    pub fn empty(n_rows: usize) -> Self {
        Self {
            columns: Vec::new(),
            data: Array2::zeros((n_rows, 0)),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.data.ncols()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        self.column_index(name).map(|i| self.data.column(i))
    }

    pub fn column_vec(&self, name: &str) -> Option<Vec<f64>> {
        self.column(name).map(|c| c.to_vec())
    }

    pub fn value(&self, row: usize, name: &str) -> Option<f64> {
        self.column_index(name).map(|i| self.data[[row, i]])
    }

    /// Append a column, or overwrite in place when the name already exists.
    pub fn set_column(&mut self, name: &str, values: Vec<f64>) {
        assert_eq!(
            values.len(),
            self.n_rows(),
            "column '{}' length mismatch",
            name
        );
        if let Some(i) = self.column_index(name) {
            let mut col = self.data.column_mut(i);
            for (dst, src) in col.iter_mut().zip(values) {
                *dst = src;
            }
        } else {
            let n = self.n_rows();
            let mut flat = Vec::with_capacity(n * (self.n_cols() + 1));
            for r in 0..n {
                flat.extend(self.data.row(r).iter().copied());
                flat.push(values[r]);
            }
            self.columns.push(name.to_string());
            self.data = Array2::from_shape_vec((n, self.columns.len()), flat)
                .expect("shape consistent by construction");
        }
    }

    /// New frame with only the named columns, in the given order.
    /// Unknown names are skipped.
    pub fn select(&self, names: &[String]) -> Frame {
        let pairs: Vec<(String, Vec<f64>)> = names
            .iter()
            .filter_map(|n| self.column_vec(n).map(|v| (n.clone(), v)))
            .collect();
        Frame::from_columns(pairs).unwrap_or_else(|_| Frame::empty(self.n_rows()))
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    /// Replace NaN and +/-inf with 0 in every column.
    pub fn sanitize_non_finite(&mut self) {
        for v in self.data.iter_mut() {
            if !v.is_finite() {
                *v = 0.0;
            }
        }
    }

    /// Per-column z-score standardisation (population std, matching
    /// StandardScaler). Zero-spread columns come out as all zeros.
    pub fn standard_scaled(&self) -> Frame {
        let mut scaled = self.clone();
        let n = self.n_rows();
        if n == 0 {
            return scaled;
        }
        for i in 0..self.n_cols() {
            let col: Vec<f64> = self.data.column(i).to_vec();
            let m = stats::mean(&col);
            let var = col.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n as f64;
            let sd = var.sqrt();
            for r in 0..n {
                scaled.data[[r, i]] = if sd > 0.0 { (col[r] - m) / sd } else { 0.0 };
            }
        }
        scaled
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Frame {
        Frame::from_columns(vec![
            ("RPM_mean".to_string(), vec![1.0, 2.0, 3.0]),
            ("Speed_mean".to_string(), vec![10.0, 20.0, 30.0]),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_columns_shape() {
        let f = sample();
        assert_eq!(f.n_rows(), 3);
        assert_eq!(f.n_cols(), 2);
        assert_eq!(f.value(1, "Speed_mean"), Some(20.0));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let err = Frame::from_columns(vec![
            ("a".to_string(), vec![1.0]),
            ("b".to_string(), vec![1.0, 2.0]),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn test_set_column_append_and_overwrite() {
        let mut f = sample();
        f.set_column("Brake_pct", vec![5.0, 6.0, 7.0]);
        assert_eq!(f.n_cols(), 3);
        f.set_column("Brake_pct", vec![1.0, 1.0, 1.0]);
        assert_eq!(f.n_cols(), 3);
        assert_eq!(f.value(2, "Brake_pct"), Some(1.0));
    }

    #[test]
    fn test_select_skips_unknown() {
        let f = sample();
        let sel = f.select(&["Speed_mean".to_string(), "Missing".to_string()]);
        assert_eq!(sel.n_cols(), 1);
        assert_eq!(sel.columns()[0], "Speed_mean");
    }

    #[test]
    fn test_sanitize_non_finite() {
        let mut f = Frame::from_columns(vec![(
            "x".to_string(),
            vec![1.0, f64::NAN, f64::INFINITY],
        )])
        .unwrap();
        f.sanitize_non_finite();
        let col = f.column_vec("x").unwrap();
        assert_eq!(col, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_standard_scaled() {
        let f = sample();
        let s = f.standard_scaled();
        let col = s.column_vec("RPM_mean").unwrap();
        assert!((col.iter().sum::<f64>()).abs() < 1e-9);
        // Constant column scales to zeros
        let mut g = sample();
        g.set_column("const", vec![4.0, 4.0, 4.0]);
        let gs = g.standard_scaled();
        assert_eq!(gs.column_vec("const").unwrap(), vec![0.0, 0.0, 0.0]);
    }
}
