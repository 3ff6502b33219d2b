use crate::error::{NetworkError, Result};
use crate::matrix::{correlation, ExpressionMatrix};
use crate::network::NetworkType;
use ndarray::{Array1, Array2, Axis, Zip};

/// Soft-threshold a correlation matrix into an adjacency matrix.
///
/// Unsigned networks use `|cor|^power`, signed networks `((1 + cor) / 2)^power`.
/// The diagonal is set to zero so that row sums are connectivities; missing
/// (`NaN`) correlations stay missing.
pub fn adjacency_from_correlation(
    cor: &Array2<f64>,
    power: f64,
    network_type: NetworkType,
) -> Array2<f64> {
    let mut adj = Array2::<f64>::zeros(cor.raw_dim());
    Zip::from(&mut adj).and(cor).par_for_each(|a, &r| {
        *a = if r.is_nan() {
            f64::NAN
        } else {
            match network_type {
                NetworkType::Unsigned => r.abs().powf(power),
                NetworkType::Signed => ((1.0 + r) / 2.0).powf(power),
            }
        };
    });
    for i in 0..adj.nrows() {
        if !adj[[i, i]].is_nan() {
            adj[[i, i]] = 0.0;
        }
    }
    adj
}

/// Correlation followed by soft thresholding.
pub fn adjacency(
    expr: &ExpressionMatrix,
    power: f64,
    network_type: NetworkType,
    allow_missing: bool,
) -> Result<Array2<f64>> {
    if !(power.is_finite() && power > 0.0) {
        return Err(NetworkError::config(format!(
            "soft-threshold power must be positive, got {}",
            power
        )));
    }
    let cor = correlation(expr.view(), allow_missing)?;
    Ok(adjacency_from_correlation(&cor, power, network_type))
}

/// Features whose whole off-diagonal row is missing. Such features are
/// excluded from every sum.
pub fn missing_features(adj: &Array2<f64>) -> Vec<usize> {
    if adj.nrows() < 2 {
        return Vec::new();
    }
    adj.axis_iter(Axis(0))
        .enumerate()
        .filter(|(i, row)| {
            row.iter()
                .enumerate()
                .all(|(u, v)| u == *i || v.is_nan())
        })
        .map(|(i, _)| i)
        .collect()
}

/// Total connectivity `k_i = Σ_{u≠i} A[i][u]`, skipping missing entries.
/// Missing features get `NaN`.
pub fn connectivity(adj: &Array2<f64>) -> Array1<f64> {
    let missing = missing_features(adj);
    let mut k = Array1::<f64>::zeros(adj.nrows());
    for (i, row) in adj.axis_iter(Axis(0)).enumerate() {
        k[i] = if missing.binary_search(&i).is_ok() {
            f64::NAN
        } else {
            row.iter()
                .enumerate()
                .filter(|&(u, v)| u != i && !v.is_nan())
                .map(|(_, v)| *v)
                .sum()
        };
    }
    k
}
