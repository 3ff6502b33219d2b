//! Error types shared by the network, module and difference-testing layers.

use thiserror::Error;

/// Failures raised by the core computations.
///
/// Every variant is fatal for the invocation that produced it. Sweeps run
/// through [`crate::orchestrate`] keep them per comparison instead of
/// aborting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    /// Mismatched or unusable matrix dimensions
    #[error("Input shape error: {message}")]
    InputShape { message: String },

    /// Zero-variance features where a correlation is required
    #[error("Degenerate features (zero variance) at columns {features:?}")]
    DegenerateFeature { features: Vec<usize> },

    /// Non-finite values in a covariance, adjacency or eigenvector computation
    #[error("Numerical instability: {message}")]
    NumericalInstability { message: String },

    /// Invalid parameters, rejected before any computation starts
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Input larger than the configured ceiling
    #[error("Resource limit exceeded: {features} features (ceiling {ceiling})")]
    ResourceLimit { features: usize, ceiling: usize },

    /// Work item skipped after cancellation was requested
    #[error("Cancelled before completion")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, NetworkError>;

impl NetworkError {
    pub fn input_shape(message: impl Into<String>) -> Self {
        Self::InputShape {
            message: message.into(),
        }
    }

    pub fn numerical(message: impl Into<String>) -> Self {
        Self::NumericalInstability {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// No candidate power reached the scale-free fit threshold.
///
/// Recoverable: the selector falls back to another power and hands this
/// back as a warning next to its choice.
#[derive(Error, Debug, Clone, PartialEq)]
#[error(
    "No soft-threshold power reached scale-free R^2 >= {threshold}; best R^2 was {best_r_squared:.3}, using power {fallback_power}"
)]
pub struct ThresholdSelectionFailure {
    pub threshold: f64,
    pub best_r_squared: f64,
    pub fallback_power: f64,
}
