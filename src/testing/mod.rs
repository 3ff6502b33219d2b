//! Sparse leading eigenvalue (sLED) test for differential co-expression.
//!
//! Given two sample groups over the same features, [`difference_test`]
//! forms the difference `D = M(X) − M(Y)` of their covariance (or
//! correlation, or soft-thresholded adjacency) matrices and measures its
//! largest sparse eigenvalue, solving both `D` and `−D`. A permutation null
//! over the pooled samples turns the statistic into a p-value, and the
//! squared sparse eigenvector gives a per-feature leverage score.
//!
//! ## Example
//!
//! ```rust,no_run
//! use single_network::matrix::ExpressionMatrix;
//! use single_network::testing::{difference_test, DifferenceTestConfig};
//!
//! # fn run(x: &ExpressionMatrix, y: &ExpressionMatrix) -> anyhow::Result<()> {
//! let config = DifferenceTestConfig::new(vec![0.2, 0.5], 100, 1);
//! let result = difference_test(x, y, &config)?;
//! if result.is_significant() {
//!     println!("p = {}, driven by {:?}", result.p_value, result.top_features);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{NetworkError, Result};
use crate::matrix::{correlation, covariance, zero_variance_columns, ExpressionMatrix};
use crate::network::adjacency::adjacency_from_correlation;
use crate::network::NetworkType;
use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView2};
use sparse_eigen::{BranchSolution, PreparedDifference};
use std::cmp::Ordering;
use std::sync::atomic::AtomicBool;

pub mod permutation;
pub mod sparse_eigen;
pub mod utils;

/// Second-moment matrix compared between the two groups.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DifferenceMatrix {
    /// Unbiased sample covariance
    #[default]
    Covariance,
    /// Pearson correlation
    Correlation,
    /// Unsigned soft-thresholded adjacency `|cor|^power`
    Adjacency { power: f64 },
}

/// Which sign of the difference matrix carried the statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// `M(X) − M(Y)`: structure stronger in the first group
    Positive,
    /// `M(Y) − M(X)`: structure stronger in the second group
    Negative,
}

impl Branch {
    pub fn flipped(self) -> Branch {
        match self {
            Branch::Positive => Branch::Negative,
            Branch::Negative => Branch::Positive,
        }
    }
}

/// Parameters of one difference test.
///
/// The sparsity levels, the permutation count and the seed drive the cost
/// and the outcome of the test, so they have no defaults and are passed to
/// [`DifferenceTestConfig::new`].
#[derive(Debug, Clone)]
pub struct DifferenceTestConfig {
    /// Sparsity levels `s` in (0, 1]; the L1 radius is `s·√p`
    pub sparsity_levels: Vec<f64>,
    pub n_permutations: usize,
    pub seed: u64,
    /// `|v|` above which a feature enters the top-feature set
    pub leverage_threshold: f64,
    pub significance: f64,
    /// Diagonal shift applied to the difference matrix during the iteration
    pub rho: f64,
    pub max_iter: usize,
    /// Report `(count + 1) / (B + 1)` instead of `count / B`
    pub smoothed_p_value: bool,
    pub difference_matrix: DifferenceMatrix,
    /// Let zero-variance features through as missing instead of failing
    pub allow_missing: bool,
    pub max_features: usize,
}

impl DifferenceTestConfig {
    pub fn new(sparsity_levels: Vec<f64>, n_permutations: usize, seed: u64) -> Self {
        DifferenceTestConfig {
            sparsity_levels,
            n_permutations,
            seed,
            leverage_threshold: 1e-6,
            significance: 0.05,
            rho: 1000.0,
            max_iter: 20,
            smoothed_p_value: false,
            difference_matrix: DifferenceMatrix::Covariance,
            allow_missing: false,
            max_features: 20_000,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sparsity_levels.is_empty() {
            return Err(NetworkError::config("at least one sparsity level is required"));
        }
        if let Some(s) = self
            .sparsity_levels
            .iter()
            .find(|&&s| !(s.is_finite() && s > 0.0 && s <= 1.0))
        {
            return Err(NetworkError::config(format!(
                "sparsity levels must lie in (0, 1], got {}",
                s
            )));
        }
        if self.n_permutations == 0 {
            return Err(NetworkError::config("n_permutations must be positive"));
        }
        if !(self.leverage_threshold.is_finite() && self.leverage_threshold >= 0.0) {
            return Err(NetworkError::config("leverage_threshold must be non-negative"));
        }
        if !(self.significance > 0.0 && self.significance < 1.0) {
            return Err(NetworkError::config(format!(
                "significance must lie in (0, 1), got {}",
                self.significance
            )));
        }
        if !(self.rho.is_finite() && self.rho > 0.0) {
            return Err(NetworkError::config("rho must be positive"));
        }
        if self.max_iter == 0 {
            return Err(NetworkError::config("max_iter must be positive"));
        }
        if let DifferenceMatrix::Adjacency { power } = self.difference_matrix {
            if !(power.is_finite() && power > 0.0) {
                return Err(NetworkError::config(format!(
                    "adjacency power must be positive, got {}",
                    power
                )));
            }
        }
        if self.max_features == 0 {
            return Err(NetworkError::config("max_features must be positive"));
        }
        Ok(())
    }

    /// L1 radius `s·√p` of every sparsity level.
    pub fn radii(&self, n_features: usize) -> Vec<f64> {
        let root = (n_features as f64).sqrt();
        self.sparsity_levels.iter().map(|s| s * root).collect()
    }
}

/// Outcome at a single sparsity level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelResult {
    pub sparsity: f64,
    pub statistic: f64,
    pub branch: Branch,
    /// Trials whose null statistic reached the observed one
    pub exceedances: usize,
    pub p_value: f64,
}

#[derive(Debug, Clone)]
pub struct DifferenceTestResult {
    /// Smallest p-value over the sparsity levels
    pub p_value: f64,
    /// Sparsity level that produced `p_value`
    pub sparsity: f64,
    pub statistic: f64,
    pub branch: Branch,
    /// Sparse unit eigenvector at the chosen level
    pub vector: Array1<f64>,
    /// Leverage `v²` per feature, as in the sLED paper; sums to 1
    pub leverage: Array1<f64>,
    /// Features with `|v|` above the leverage threshold, by decreasing leverage
    pub top_features: Vec<usize>,
    pub levels: Vec<LevelResult>,
    pub n_permutations: usize,
    pub significance: f64,
}

impl DifferenceTestResult {
    pub fn is_significant(&self) -> bool {
        self.p_value < self.significance
    }

    /// Names (or indices) of the top features in `expr`.
    pub fn top_feature_labels(&self, expr: &ExpressionMatrix) -> Vec<String> {
        self.top_features
            .iter()
            .map(|&j| expr.feature_label(j))
            .collect()
    }
}

/// Difference of the configured second-moment matrix between two groups.
///
/// With `allow_missing`, zero-variance features contribute no difference
/// instead of failing the correlation-based kinds.
pub fn difference_matrix(
    x: ArrayView2<f64>,
    y: ArrayView2<f64>,
    kind: DifferenceMatrix,
    allow_missing: bool,
) -> Result<Array2<f64>> {
    let mut d = match kind {
        DifferenceMatrix::Covariance => covariance(x)? - covariance(y)?,
        DifferenceMatrix::Correlation => {
            correlation(x, allow_missing)? - correlation(y, allow_missing)?
        }
        DifferenceMatrix::Adjacency { power } => {
            let ax = adjacency_from_correlation(
                &correlation(x, allow_missing)?,
                power,
                NetworkType::Unsigned,
            );
            let ay = adjacency_from_correlation(
                &correlation(y, allow_missing)?,
                power,
                NetworkType::Unsigned,
            );
            ax - ay
        }
    };
    if allow_missing {
        d.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v });
    }
    Ok(d)
}

/// Features with `|v_j| > threshold`, largest magnitude first, ties by index.
pub(crate) fn top_features(vector: &Array1<f64>, threshold: f64) -> Vec<usize> {
    let mut top: Vec<usize> = vector
        .iter()
        .enumerate()
        .filter(|&(_, &v)| v.abs() > threshold)
        .map(|(j, _)| j)
        .collect();
    top.sort_by(|&i, &j| vector[j].abs().total_cmp(&vector[i].abs()).then(i.cmp(&j)));
    top
}

/// Run the sLED test of `x` against `y`.
pub fn difference_test(
    x: &ExpressionMatrix,
    y: &ExpressionMatrix,
    config: &DifferenceTestConfig,
) -> Result<DifferenceTestResult> {
    difference_test_with_cancel(x, y, config, &AtomicBool::new(false))
}

/// [`difference_test`] that stops with [`NetworkError::Cancelled`] once
/// `cancel` is raised, checked between permutation trials.
pub fn difference_test_with_cancel(
    x: &ExpressionMatrix,
    y: &ExpressionMatrix,
    config: &DifferenceTestConfig,
    cancel: &AtomicBool,
) -> Result<DifferenceTestResult> {
    config.validate()?;
    let p = x.n_features();
    if y.n_features() != p {
        return Err(NetworkError::input_shape(format!(
            "groups cover different feature counts: {} vs {}",
            p,
            y.n_features()
        )));
    }
    if p > config.max_features {
        return Err(NetworkError::ResourceLimit {
            features: p,
            ceiling: config.max_features,
        });
    }
    let (n1, n2) = (x.n_samples(), y.n_samples());
    if n1 < 2 || n2 < 2 {
        return Err(NetworkError::input_shape(format!(
            "each group needs at least 2 samples, got {} and {}",
            n1, n2
        )));
    }
    if !config.allow_missing {
        let mut degenerate = zero_variance_columns(x.view());
        degenerate.extend(zero_variance_columns(y.view()));
        degenerate.sort_unstable();
        degenerate.dedup();
        if !degenerate.is_empty() {
            return Err(NetworkError::DegenerateFeature {
                features: degenerate,
            });
        }
    }
    if n1 < p || n2 < p {
        debug!(
            "Groups of {} and {} samples over {} features give rank-deficient estimates; power is reduced",
            n1, n2, p
        );
    }

    let swapped = permutation::canonical_order(x.view(), y.view()) == Ordering::Greater;
    let (a, b) = if swapped { (y, x) } else { (x, y) };

    let d = difference_matrix(
        a.view(),
        b.view(),
        config.difference_matrix,
        config.allow_missing,
    )?;
    let prepared = PreparedDifference::new(&d, config.rho)?;
    let radii = config.radii(p);
    let observed: Vec<BranchSolution> = radii
        .iter()
        .map(|&r| prepared.solve(r, config.max_iter))
        .collect::<Result<_>>()?;

    let null = permutation::null_statistics(a.view(), b.view(), config, &radii, cancel)?;

    let levels: Vec<LevelResult> = observed
        .iter()
        .zip(config.sparsity_levels.iter())
        .enumerate()
        .map(|(l, (solution, &sparsity))| {
            let count = permutation::exceedances(&null, l, solution.statistic);
            let p_value =
                permutation::p_value(count, config.n_permutations, config.smoothed_p_value);
            let branch = if swapped {
                solution.branch.flipped()
            } else {
                solution.branch
            };
            debug!(
                "sparsity {}: T = {:.6}, {:?} branch, {}/{} exceedances, p = {}",
                sparsity, solution.statistic, branch, count, config.n_permutations, p_value
            );
            LevelResult {
                sparsity,
                statistic: solution.statistic,
                branch,
                exceedances: count,
                p_value,
            }
        })
        .collect();

    let best = levels
        .iter()
        .enumerate()
        .fold(0, |best, (l, level)| {
            if level.p_value < levels[best].p_value {
                l
            } else {
                best
            }
        });

    let vector = observed[best].vector.clone();
    let leverage = vector.mapv(|v| v * v);
    let top_features = top_features(&vector, config.leverage_threshold);

    let chosen = &levels[best];
    info!(
        "Difference test over {} features: p = {} at sparsity {} ({:?} branch, {} top features)",
        p,
        chosen.p_value,
        chosen.sparsity,
        chosen.branch,
        top_features.len()
    );

    Ok(DifferenceTestResult {
        p_value: chosen.p_value,
        sparsity: chosen.sparsity,
        statistic: chosen.statistic,
        branch: chosen.branch,
        vector,
        leverage,
        top_features,
        levels,
        n_permutations: config.n_permutations,
        significance: config.significance,
    })
}
