//! Permutation null distribution of the sparse leading eigenvalue statistic.
//!
//! Every trial owns its own ChaCha8 stream (`seed`, stream = trial index), so
//! the null statistics do not depend on how trials are scheduled across
//! threads.

use crate::error::{NetworkError, Result};
use crate::testing::sparse_eigen::PreparedDifference;
use crate::testing::{difference_matrix, DifferenceTestConfig};
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

/// Relative slack when comparing a null statistic with the observed one.
const TIE_TOLERANCE: f64 = 1e-12;

/// Order of two groups that is independent of which one the caller passed
/// first: smaller group first, then lexicographic on the row-major values.
pub fn canonical_order(x: ArrayView2<f64>, y: ArrayView2<f64>) -> Ordering {
    x.nrows().cmp(&y.nrows()).then_with(|| {
        x.iter()
            .zip(y.iter())
            .map(|(a, b)| a.total_cmp(b))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    })
}

/// Rows `0..n_total` shuffled for one trial and split after `n_first`.
pub fn permuted_split(
    n_total: usize,
    n_first: usize,
    seed: u64,
    trial: usize,
) -> (Vec<usize>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(trial as u64);
    let mut rows: Vec<usize> = (0..n_total).collect();
    rows.shuffle(&mut rng);
    let rest = rows.split_off(n_first.min(n_total));
    (rows, rest)
}

/// Null statistics, one row per trial and one column per radius.
///
/// Checks `cancel` before every trial; a raised flag turns the whole call
/// into [`NetworkError::Cancelled`].
pub fn null_statistics<'a>(
    a: ArrayView2<'a, f64>,
    b: ArrayView2<'a, f64>,
    config: &DifferenceTestConfig,
    radii: &[f64],
    cancel: &AtomicBool,
) -> Result<Vec<Vec<f64>>> {
    let pooled: Array2<f64> = concatenate(Axis(0), &[a, b])
        .map_err(|e| NetworkError::input_shape(format!("cannot pool groups: {}", e)))?;
    let n_first = a.nrows();

    (0..config.n_permutations)
        .into_par_iter()
        .map(|trial| {
            if cancel.load(AtomicOrdering::Relaxed) {
                return Err(NetworkError::Cancelled);
            }
            let (rows_a, rows_b) = permuted_split(pooled.nrows(), n_first, config.seed, trial);
            let xa = pooled.select(Axis(0), &rows_a);
            let xb = pooled.select(Axis(0), &rows_b);
            let d = difference_matrix(xa.view(), xb.view(), config.difference_matrix, true)?;
            let prepared = PreparedDifference::new(&d, config.rho)?;
            radii
                .iter()
                .map(|&r| prepared.solve(r, config.max_iter).map(|s| s.statistic))
                .collect()
        })
        .collect()
}

/// Number of trials whose statistic at `level` reaches `observed`.
pub fn exceedances(null: &[Vec<f64>], level: usize, observed: f64) -> usize {
    let bar = observed - TIE_TOLERANCE * observed.abs().max(1.0);
    null.iter().filter(|trial| trial[level] >= bar).count()
}

/// Empirical p-value, or `(count + 1) / (B + 1)` when smoothed.
pub fn p_value(count: usize, n_permutations: usize, smoothed: bool) -> f64 {
    if smoothed {
        (count + 1) as f64 / (n_permutations + 1) as f64
    } else {
        count as f64 / n_permutations as f64
    }
}
