//! Topological overlap.
//!
//! For features `i != j` with adjacency `A` (diagonal ignored),
//!
//! ```text
//! L[i][j] = Σ_{u≠i,j} A[i][u] · A[u][j]
//! k_i     = Σ_{u≠i} A[i][u]
//! Ω[i][j] = (L[i][j] + A[i][j]) / (min(k_i, k_j) + 1 − A[i][j])
//! ```
//!
//! Because `L[i][j] ≤ min(k_i, k_j) − A[i][j]`, every `Ω[i][j]` lies in
//! `[0, 1]` whenever the adjacency does.

use crate::error::{NetworkError, Result};
use crate::network::adjacency::{connectivity, missing_features};
use ndarray::{Array2, Zip};

/// Topological overlap matrix of a symmetric adjacency matrix.
///
/// The diagonal of the result is 1. Features with a missing adjacency row
/// (see [`missing_features`]) get `NaN` rows and columns; individual missing
/// entries contribute nothing to the sums.
pub fn topological_overlap(adj: &Array2<f64>) -> Result<Array2<f64>> {
    validate_adjacency(adj)?;

    let p = adj.nrows();
    let missing = missing_features(adj);
    let is_missing = |i: usize| missing.binary_search(&i).is_ok();

    let mut a = adj.mapv(|v| if v.is_nan() { 0.0 } else { v });
    for i in 0..p {
        a[[i, i]] = 0.0;
    }

    let shared = a.dot(&a);
    let k = connectivity(adj);

    let mut tom = Array2::<f64>::zeros((p, p));
    Zip::indexed(&mut tom).par_for_each(|(i, j), omega| {
        *omega = if is_missing(i) || is_missing(j) {
            f64::NAN
        } else if i == j {
            1.0
        } else {
            let a_ij = a[[i, j]];
            let denom = k[i].min(k[j]) + 1.0 - a_ij;
            ((shared[[i, j]] + a_ij) / denom).clamp(0.0, 1.0)
        };
    });

    Ok(tom)
}

fn validate_adjacency(adj: &Array2<f64>) -> Result<()> {
    if adj.nrows() != adj.ncols() {
        return Err(NetworkError::input_shape(format!(
            "adjacency must be square, got {} x {}",
            adj.nrows(),
            adj.ncols()
        )));
    }

    for ((i, j), &v) in adj.indexed_iter() {
        if i == j || v.is_nan() {
            continue;
        }
        if v.is_infinite() {
            return Err(NetworkError::numerical(format!(
                "adjacency entry ({}, {}) is {}",
                i, j, v
            )));
        }
        if !(0.0..=1.0).contains(&v) {
            return Err(NetworkError::input_shape(format!(
                "adjacency entry ({}, {}) = {} outside [0, 1]",
                i, j, v
            )));
        }
        let mirror = adj[[j, i]];
        if (v - mirror).abs() > 1e-9 {
            return Err(NetworkError::input_shape(format!(
                "adjacency is not symmetric at ({}, {})",
                i, j
            )));
        }
    }
    Ok(())
}
