//! Validated feature matrix passed into every detector

use crate::error::{KolosalError, Result};
use ndarray::{s, Array2, ArrayView1};

/// Immutable N samples × D features table.
///
/// Construction rejects ragged rows and non-finite values, so detectors can
/// assume every cell is a usable number. Zero rows are allowed here; the
/// detectors decide whether an empty matrix is acceptable for an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    data: Array2<f64>,
}

impl FeatureMatrix {
    /// Wrap an existing array after validating its contents
    pub fn new(data: Array2<f64>) -> Result<Self> {
        if data.nrows() > 0 && data.ncols() == 0 {
            return Err(KolosalError::InvalidInput(
                "samples must have at least one feature".to_string(),
            ));
        }
        if let Some(((row, col), value)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(KolosalError::InvalidInput(format!(
                "non-finite value {} at row {}, column {}",
                value, row, col
            )));
        }
        Ok(Self { data })
    }

    /// Build from row vectors, e.g. the `data` field of a request
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map(|r| r.len()).unwrap_or(0);

        let mut flat = Vec::with_capacity(n_rows * n_cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_cols {
                return Err(KolosalError::InvalidInput(format!(
                    "ragged data: row {} has {} values, expected {}",
                    i,
                    row.len(),
                    n_cols
                )));
            }
            flat.extend_from_slice(row);
        }

        Self::new(Array2::from_shape_vec((n_rows, n_cols), flat)?)
    }

    /// Build an N×1 matrix from a scalar series
    pub fn from_series(values: &[f64]) -> Result<Self> {
        Self::new(Array2::from_shape_vec((values.len(), 1), values.to_vec())?)
    }

    /// Number of samples
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of features
    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Borrow the underlying array
    pub fn as_array(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.data.row(index)
    }

    /// Flatten a single-column matrix into a series
    pub fn to_series(&self) -> Result<Vec<f64>> {
        if self.ncols() != 1 {
            return Err(KolosalError::DimensionMismatch {
                expected: 1,
                actual: self.ncols(),
            });
        }
        Ok(self.data.column(0).to_vec())
    }

    /// Split rows into `[0, at)` and `[at, n)`
    pub fn split_rows(&self, at: usize) -> (FeatureMatrix, FeatureMatrix) {
        let at = at.min(self.nrows());
        let head = self.data.slice(s![..at, ..]).to_owned();
        let tail = self.data.slice(s![at.., ..]).to_owned();
        (Self { data: head }, Self { data: tail })
    }
}

impl From<FeatureMatrix> for Array2<f64> {
    fn from(matrix: FeatureMatrix) -> Self {
        matrix.data
    }
}
