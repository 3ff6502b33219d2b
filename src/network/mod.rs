//! Co-expression network construction.
//!
//! The pipeline is correlation → soft-thresholded adjacency → topological
//! overlap (TOM). [`threshold`] picks the soft-threshold power by scale-free
//! fit, [`adjacency`] and [`tom`] hold the two matrix transforms, and
//! [`build_network`] chains them under a [`NetworkConfig`].
//!
//! Missing values are encoded as `NaN`: a zero-variance feature, when the
//! caller allows it, yields a `NaN` row and column in both matrices.

use crate::error::{NetworkError, Result};
use crate::matrix::ExpressionMatrix;
use log::info;
use ndarray::Array2;

pub mod adjacency;
pub mod threshold;
pub mod tom;

/// How correlations map onto edge weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkType {
    /// `|cor|^β`, anti-correlation counts as co-expression
    #[default]
    Unsigned,
    /// `((1 + cor) / 2)^β`, anti-correlated genes are unconnected
    Signed,
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub network_type: NetworkType,
    /// Propagate zero-variance features as missing instead of failing
    pub allow_missing: bool,
    /// Largest feature count accepted before any p x p allocation
    pub max_features: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            network_type: NetworkType::Unsigned,
            allow_missing: false,
            max_features: 20_000,
        }
    }
}

impl NetworkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_features == 0 {
            return Err(NetworkError::config("max_features must be positive"));
        }
        Ok(())
    }

    pub(crate) fn check_ceiling(&self, n_features: usize) -> Result<()> {
        if n_features > self.max_features {
            return Err(NetworkError::ResourceLimit {
                features: n_features,
                ceiling: self.max_features,
            });
        }
        Ok(())
    }
}

/// Adjacency and TOM of one expression matrix at one power.
#[derive(Debug, Clone)]
pub struct Network {
    pub power: f64,
    pub adjacency: Array2<f64>,
    pub tom: Array2<f64>,
    /// Features carried as missing (zero variance)
    pub missing: Vec<usize>,
}

impl Network {
    pub fn n_features(&self) -> usize {
        self.tom.nrows()
    }

    /// `1 − TOM`, with missing entries at the maximal dissimilarity 1.
    pub fn dissimilarity(&self) -> Array2<f64> {
        let mut diss = self
            .tom
            .mapv(|v| if v.is_nan() { 1.0 } else { 1.0 - v });
        for i in 0..diss.nrows() {
            diss[[i, i]] = 0.0;
        }
        diss
    }
}

/// Build the soft-thresholded adjacency and its TOM.
pub fn build_network(
    expr: &ExpressionMatrix,
    power: f64,
    config: &NetworkConfig,
) -> Result<Network> {
    config.validate()?;
    config.check_ceiling(expr.n_features())?;

    let adjacency =
        adjacency::adjacency(expr, power, config.network_type, config.allow_missing)?;
    let missing = adjacency::missing_features(&adjacency);
    let tom = tom::topological_overlap(&adjacency)?;

    info!(
        "Built {:?} network over {} features at power {} ({} missing)",
        config.network_type,
        expr.n_features(),
        power,
        missing.len()
    );

    Ok(Network {
        power,
        adjacency,
        tom,
        missing,
    })
}
