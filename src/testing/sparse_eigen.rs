//! Sparse leading eigenvector of a symmetric matrix.
//!
//! Maximizes `v'Mv` over unit vectors with `‖v‖₁ ≤ radius` by the
//! penalized matrix decomposition iteration: `v ← soft(Mv, λ) / ‖soft(Mv, λ)‖₂`,
//! with λ chosen by bisection so that the L1 bound holds. The iteration runs
//! on `D + ρI` so that the quadratic form stays positive; the returned
//! objective still includes `ρ`.

use crate::error::{NetworkError, Result};
use crate::testing::Branch;
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2};

const BISECTION_ITERATIONS: usize = 150;
const BISECTION_TOLERANCE: f64 = 1e-6;
const OBJECTIVE_TOLERANCE: f64 = 1e-4;

/// Solution of one sparse eigenproblem.
#[derive(Debug, Clone)]
pub struct SparseComponent {
    /// `v'(D + ρI)v` at the final iterate
    pub objective: f64,
    pub vector: Array1<f64>,
}

/// Both sign branches of a difference matrix, solved at one radius.
#[derive(Debug, Clone)]
pub struct BranchSolution {
    /// `objective − ρ` of the winning branch
    pub statistic: f64,
    pub branch: Branch,
    pub vector: Array1<f64>,
}

/// Shifted matrices and their starting vectors, reusable across radii.
#[derive(Debug, Clone)]
pub struct PreparedDifference {
    rho: f64,
    positive: Array2<f64>,
    negative: Array2<f64>,
    positive_start: Array1<f64>,
    negative_start: Array1<f64>,
}

/// Elementwise soft thresholding, `sign(x)·max(|x| − λ, 0)`.
pub fn soft_threshold(x: &Array1<f64>, lambda: f64) -> Array1<f64> {
    x.mapv(|v| v.signum() * (v.abs() - lambda).max(0.0))
}

fn l1(x: &Array1<f64>) -> f64 {
    x.iter().map(|v| v.abs()).sum()
}

fn l2(x: &Array1<f64>) -> f64 {
    x.dot(x).sqrt()
}

/// Smallest threshold (to bisection accuracy) whose soft-thresholded
/// vector satisfies `‖·‖₁ / ‖·‖₂ ≤ radius`. Zero when `argv` already does.
pub fn bisect_threshold(argv: &Array1<f64>, radius: f64) -> f64 {
    let norm = l2(argv);
    if norm == 0.0 || l1(argv) / norm <= radius {
        return 0.0;
    }

    let max_abs = argv.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let mut lo = 0.0;
    let mut hi = (max_abs - 1e-5).max(0.0);
    for _ in 0..BISECTION_ITERATIONS {
        let mid = (lo + hi) / 2.0;
        let su = soft_threshold(argv, mid);
        if l1(&su) / l2(&su) < radius {
            hi = mid;
        } else {
            lo = mid;
        }
        if hi - lo < BISECTION_TOLERANCE {
            break;
        }
    }
    (lo + hi) / 2.0
}

/// Eigenvectors of the largest and the smallest eigenvalue of a symmetric
/// matrix, each signed so that its largest-magnitude entry is positive.
///
/// Ties between equal eigenvalues go to the lowest index of the
/// decomposition.
pub fn extreme_eigenvectors(m: &Array2<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
    let p = m.nrows();
    if p == 0 || p != m.ncols() {
        return Err(NetworkError::input_shape(
            "eigenvectors need a non-empty square matrix",
        ));
    }
    if m.iter().any(|v| !v.is_finite()) {
        return Err(NetworkError::numerical("non-finite entry in difference matrix"));
    }

    let eigen = SymmetricEigen::new(DMatrix::from_fn(p, p, |i, j| m[[i, j]]));
    let values = &eigen.eigenvalues;
    let mut top = 0;
    let mut bottom = 0;
    for k in 1..p {
        if values[k] > values[top] {
            top = k;
        }
        if values[k] < values[bottom] {
            bottom = k;
        }
    }

    let column = |k: usize| -> Result<Array1<f64>> {
        let mut v: Array1<f64> = eigen.eigenvectors.column(k).iter().copied().collect();
        if v.iter().any(|x| !x.is_finite()) {
            return Err(NetworkError::numerical("non-finite eigenvector"));
        }
        let pivot = v
            .iter()
            .copied()
            .fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
        if pivot < 0.0 {
            v.mapv_inplace(|x| -x);
        }
        Ok(v)
    };
    Ok((column(top)?, column(bottom)?))
}

/// Penalized matrix decomposition of a symmetric matrix at one L1 radius.
pub fn symmetric_pmd(
    m: &Array2<f64>,
    start: &Array1<f64>,
    radius: f64,
    max_iter: usize,
) -> Result<SparseComponent> {
    let mut v = start.clone();
    let mut objective = v.dot(&m.dot(&v));

    for _ in 0..max_iter {
        let argv = m.dot(&v);
        let lambda = bisect_threshold(&argv, radius);
        let sv = soft_threshold(&argv, lambda);
        let norm = l2(&sv);
        if !norm.is_finite() || norm == 0.0 {
            return Err(NetworkError::numerical(
                "sparse eigenvector iterate collapsed to zero",
            ));
        }
        v = sv / norm;

        let next = v.dot(&m.dot(&v));
        if !next.is_finite() {
            return Err(NetworkError::numerical("non-finite sparse eigen objective"));
        }
        let converged = (next - objective).abs() < OBJECTIVE_TOLERANCE;
        objective = next;
        if converged {
            break;
        }
    }

    if v.iter().any(|x| !x.is_finite()) {
        return Err(NetworkError::numerical("non-finite sparse eigenvector"));
    }
    Ok(SparseComponent {
        objective,
        vector: v,
    })
}

impl PreparedDifference {
    /// Shift `d` and `−d` by `ρI` and find their starting vectors.
    pub fn new(d: &Array2<f64>, rho: f64) -> Result<Self> {
        let p = d.nrows();
        if p != d.ncols() {
            return Err(NetworkError::input_shape("difference matrix must be square"));
        }
        if d.iter().any(|v| !v.is_finite()) {
            return Err(NetworkError::numerical("non-finite entry in difference matrix"));
        }

        let identity = Array2::<f64>::eye(p) * rho;
        let negated = d.mapv(|v| -v);
        let (positive_start, negative_start) = extreme_eigenvectors(d)?;

        Ok(PreparedDifference {
            rho,
            positive: d + &identity,
            negative: negated + &identity,
            positive_start,
            negative_start,
        })
    }

    pub fn n_features(&self) -> usize {
        self.positive.nrows()
    }

    /// Solve both branches at `radius`; the larger objective wins, ties go
    /// to the positive branch.
    pub fn solve(&self, radius: f64, max_iter: usize) -> Result<BranchSolution> {
        let pos = symmetric_pmd(&self.positive, &self.positive_start, radius, max_iter)?;
        let neg = symmetric_pmd(&self.negative, &self.negative_start, radius, max_iter)?;
        let (winner, branch) = if neg.objective > pos.objective {
            (neg, Branch::Negative)
        } else {
            (pos, Branch::Positive)
        };
        Ok(BranchSolution {
            statistic: winner.objective - self.rho,
            branch,
            vector: winner.vector,
        })
    }
}
