//! Dense expression matrices and the second-moment estimators built on them.
//!
//! Every computation in this crate works on an [`ExpressionMatrix`]: a dense
//! samples × features block of finite `f64` values. Sparse single-cell
//! matrices (`CsrMatrix`, rows = cells, columns = genes) are densified once
//! on entry, since correlation, covariance and TOM are all dense p × p
//! quantities anyway.

use crate::error::{NetworkError, Result};
use nalgebra_sparse::CsrMatrix;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use num_traits::ToPrimitive;
use single_utilities::traits::FloatOpsTS;
use std::collections::HashSet;

/// Samples × features expression values.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    data: Array2<f64>,
    feature_names: Option<Vec<String>>,
}

impl ExpressionMatrix {
    /// Wrap a dense `f64` matrix, rejecting empty shapes and non-finite values.
    pub fn new(data: Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 || data.ncols() == 0 {
            return Err(NetworkError::input_shape(format!(
                "expression matrix must be non-empty, got {} x {}",
                data.nrows(),
                data.ncols()
            )));
        }

        if let Some(((row, col), value)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(NetworkError::numerical(format!(
                "non-finite expression value {} at sample {}, feature {}",
                value, row, col
            )));
        }

        Ok(ExpressionMatrix {
            data,
            feature_names: None,
        })
    }

    /// Attach feature identifiers. Names must be unique and match the column count.
    pub fn with_feature_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.n_features() {
            return Err(NetworkError::input_shape(format!(
                "{} feature names for {} features",
                names.len(),
                self.n_features()
            )));
        }

        let mut seen = HashSet::with_capacity(names.len());
        if let Some(dup) = names.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(NetworkError::input_shape(format!(
                "duplicate feature name '{}'",
                dup
            )));
        }

        self.feature_names = Some(names);
        Ok(self)
    }

    /// Convert any dense matrix of single-rust floats.
    pub fn from_dense<T>(matrix: &Array2<T>) -> Result<Self>
    where
        T: FloatOpsTS,
    {
        let mut data = Array2::<f64>::zeros(matrix.raw_dim());
        for ((row, col), value) in matrix.indexed_iter() {
            data[[row, col]] = ToPrimitive::to_f64(value).ok_or_else(|| {
                NetworkError::numerical(format!(
                    "value at sample {}, feature {} is not representable as f64",
                    row, col
                ))
            })?;
        }
        Self::new(data)
    }

    /// Densify a sparse cells × genes matrix. Absent entries are zero.
    pub fn from_csr<T>(matrix: &CsrMatrix<T>) -> Result<Self>
    where
        T: FloatOpsTS,
    {
        let mut data = Array2::<f64>::zeros((matrix.nrows(), matrix.ncols()));
        for (row, col, value) in matrix.triplet_iter() {
            data[[row, col]] = ToPrimitive::to_f64(value).ok_or_else(|| {
                NetworkError::numerical(format!(
                    "value at cell {}, gene {} is not representable as f64",
                    row, col
                ))
            })?;
        }
        Self::new(data)
    }

    pub fn n_samples(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.data.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn feature_names(&self) -> Option<&[String]> {
        self.feature_names.as_deref()
    }

    /// Name of feature `idx`, or its index rendered as text when it has no name.
    pub fn feature_label(&self, idx: usize) -> String {
        self.feature_names
            .as_ref()
            .and_then(|names| names.get(idx))
            .cloned()
            .unwrap_or_else(|| idx.to_string())
    }

    /// Sub-matrix of the given sample rows, keeping all features.
    pub fn select_samples(&self, rows: &[usize]) -> Result<ExpressionMatrix> {
        if rows.is_empty() {
            return Err(NetworkError::input_shape("sample selection cannot be empty"));
        }
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.n_samples()) {
            return Err(NetworkError::input_shape(format!(
                "sample index {} out of range for {} samples",
                bad,
                self.n_samples()
            )));
        }

        Ok(ExpressionMatrix {
            data: self.data.select(Axis(0), rows),
            feature_names: self.feature_names.clone(),
        })
    }

    /// Columns whose sample variance is numerically zero.
    pub fn zero_variance_features(&self) -> Vec<usize> {
        zero_variance_columns(self.data.view())
    }
}

/// Column indices of `x` with (numerically) zero variance.
pub fn zero_variance_columns(x: ArrayView2<f64>) -> Vec<usize> {
    x.axis_iter(Axis(1))
        .enumerate()
        .filter_map(|(j, col)| {
            let n = col.len() as f64;
            let mean = col.sum() / n;
            let ss: f64 = col.iter().map(|&v| (v - mean) * (v - mean)).sum();
            let scale = mean.abs().max(1.0);
            if ss.sqrt() <= 1e-12 * scale * n.sqrt() {
                Some(j)
            } else {
                None
            }
        })
        .collect()
}

fn centered(x: ArrayView2<f64>) -> Result<Array2<f64>> {
    if x.nrows() < 2 {
        return Err(NetworkError::input_shape(format!(
            "at least 2 samples are needed for second moments, got {}",
            x.nrows()
        )));
    }
    let means: Array1<f64> = x
        .mean_axis(Axis(0))
        .ok_or_else(|| NetworkError::input_shape("cannot average an empty matrix"))?;
    Ok(&x - &means)
}

/// Unbiased sample covariance (features × features).
pub fn covariance(x: ArrayView2<f64>) -> Result<Array2<f64>> {
    let centered = centered(x)?;
    let scale = 1.0 / (x.nrows() as f64 - 1.0);
    let cov = centered.t().dot(&centered) * scale;
    ensure_finite(&cov, "covariance")?;
    Ok(cov)
}

/// Pearson correlation between features.
///
/// Zero-variance features fail with [`NetworkError::DegenerateFeature`]
/// unless `allow_missing` is set, in which case their rows and columns are
/// `NaN` (missing) and every other entry is computed normally.
pub fn correlation(x: ArrayView2<f64>, allow_missing: bool) -> Result<Array2<f64>> {
    let degenerate = zero_variance_columns(x);
    if !degenerate.is_empty() && !allow_missing {
        return Err(NetworkError::DegenerateFeature {
            features: degenerate,
        });
    }

    let mut z = centered(x)?;
    for (j, mut col) in z.axis_iter_mut(Axis(1)).enumerate() {
        if degenerate.binary_search(&j).is_ok() {
            col.fill(0.0);
            continue;
        }
        let norm = col.dot(&col).sqrt();
        col.mapv_inplace(|v| v / norm);
    }

    let mut cor = z.t().dot(&z);
    cor.mapv_inplace(|v| v.clamp(-1.0, 1.0));
    for j in 0..cor.nrows() {
        cor[[j, j]] = 1.0;
    }
    for &j in &degenerate {
        cor.row_mut(j).fill(f64::NAN);
        cor.column_mut(j).fill(f64::NAN);
    }

    let finite_ok = cor
        .indexed_iter()
        .all(|((i, j), v)| v.is_finite() || degenerate.contains(&i) || degenerate.contains(&j));
    if !finite_ok {
        return Err(NetworkError::numerical("non-finite correlation entry"));
    }
    Ok(cor)
}

pub(crate) fn ensure_finite(m: &Array2<f64>, what: &str) -> Result<()> {
    if let Some(((i, j), v)) = m.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(NetworkError::numerical(format!(
            "{} entry ({}, {}) is {}",
            what, i, j, v
        )));
    }
    Ok(())
}
