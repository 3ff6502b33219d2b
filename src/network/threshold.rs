//! Soft-threshold power selection by scale-free topology fit.

use crate::error::{NetworkError, Result, ThresholdSelectionFailure};
use crate::matrix::{correlation, ExpressionMatrix};
use crate::network::adjacency::{adjacency_from_correlation, connectivity};
use crate::network::NetworkType;
use log::{debug, info, warn};
use rayon::prelude::*;
use statrs::statistics::{Data, Median, Statistics};

/// Power used when no candidate produced a usable fit at all.
pub const DEFAULT_POWER: f64 = 6.0;

#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    /// Candidate powers, tried in ascending order
    pub powers: Vec<f64>,
    /// Signed R^2 a fit has to exceed
    pub r_squared_threshold: f64,
    /// Equal-width connectivity bins for the fit
    pub n_bins: usize,
    pub network_type: NetworkType,
    /// Treat zero-variance features as missing instead of failing
    pub allow_missing: bool,
    /// Largest feature count accepted before the correlation matrix is built
    pub max_features: usize,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        let mut powers: Vec<f64> = (1..=10).map(f64::from).collect();
        powers.extend((12..=20).step_by(2).map(f64::from));
        ThresholdConfig {
            powers,
            r_squared_threshold: 0.85,
            n_bins: 10,
            network_type: NetworkType::Unsigned,
            allow_missing: false,
            max_features: 20_000,
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        if self.powers.is_empty() {
            return Err(NetworkError::config("candidate power list is empty"));
        }
        if let Some(bad) = self.powers.iter().find(|b| !(b.is_finite() && **b > 0.0)) {
            return Err(NetworkError::config(format!(
                "candidate powers must be positive, got {}",
                bad
            )));
        }
        if !(0.0..=1.0).contains(&self.r_squared_threshold) {
            return Err(NetworkError::config(format!(
                "R^2 threshold must lie in [0, 1], got {}",
                self.r_squared_threshold
            )));
        }
        if self.n_bins < 2 {
            return Err(NetworkError::config("at least 2 connectivity bins are required"));
        }
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

/// One row of the fit table.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleFreeFit {
    pub power: f64,
    /// `-sign(slope) * R^2`; `None` when the regression was degenerate
    pub r_squared: Option<f64>,
    pub slope: Option<f64>,
    pub mean_connectivity: f64,
    pub median_connectivity: f64,
    pub max_connectivity: f64,
}

#[derive(Debug, Clone)]
pub struct SoftThresholdSelection {
    pub power: f64,
    pub fits: Vec<ScaleFreeFit>,
    /// Set when no power reached the threshold and a fallback was used
    pub warning: Option<ThresholdSelectionFailure>,
}

/// Regress `log10 p(k)` on `log10 k` over equal-width connectivity bins.
///
/// Empty bins enter with their midpoint and a frequency of zero (offset by
/// 1e-9 before the log), which penalizes gaps in the distribution. Returns
/// `(signed R^2, slope)`, or `None` if the connectivities carry no spread.
pub fn scale_free_fit(connectivity: &[f64], n_bins: usize) -> Option<(f64, f64)> {
    let k: Vec<f64> = connectivity.iter().copied().filter(|v| v.is_finite()).collect();
    if k.len() < 2 || n_bins < 2 {
        return None;
    }
    let lo = k.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = k.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = (hi - lo) / n_bins as f64;
    if !(width > 0.0) {
        return None;
    }

    let mut sums = vec![0.0; n_bins];
    let mut counts = vec![0usize; n_bins];
    for &v in &k {
        let bin = (((v - lo) / width) as usize).min(n_bins - 1);
        sums[bin] += v;
        counts[bin] += 1;
    }

    let total = k.len() as f64;
    let mut log_k = Vec::with_capacity(n_bins);
    let mut log_p = Vec::with_capacity(n_bins);
    for bin in 0..n_bins {
        let midpoint = lo + width * (bin as f64 + 0.5);
        let dk = if counts[bin] == 0 || sums[bin] == 0.0 {
            midpoint
        } else {
            sums[bin] / counts[bin] as f64
        };
        if dk <= 0.0 {
            continue;
        }
        log_k.push(dk.log10());
        log_p.push((counts[bin] as f64 / total + 1e-9).log10());
    }
    if log_k.len() < 2 {
        return None;
    }

    let var_x = log_k.iter().variance();
    let var_y = log_p.iter().variance();
    if !(var_x > 0.0 && var_y > 0.0) {
        return None;
    }
    let cov = log_k.iter().covariance(log_p.iter());
    let slope = cov / var_x;
    let r_squared = cov * cov / (var_x * var_y);
    Some((-slope.signum() * r_squared, slope))
}

fn fit_power(cor: &ndarray::Array2<f64>, power: f64, config: &ThresholdConfig) -> ScaleFreeFit {
    let adj = adjacency_from_correlation(cor, power, config.network_type);
    let k: Vec<f64> = connectivity(&adj)
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .collect();
    let fit = scale_free_fit(&k, config.n_bins);

    let (mean, median, max) = if k.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        (
            k.iter().mean(),
            Data::new(k.clone()).median(),
            k.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        )
    };

    ScaleFreeFit {
        power,
        r_squared: fit.map(|(r2, _)| r2),
        slope: fit.map(|(_, s)| s),
        mean_connectivity: mean,
        median_connectivity: median,
        max_connectivity: max,
    }
}

/// Pick the smallest power whose signed scale-free R^2 exceeds the threshold.
///
/// Falls back to the best-fitting power (or [`DEFAULT_POWER`] when no fit was
/// usable) and reports a [`ThresholdSelectionFailure`] warning instead of
/// failing.
pub fn pick_soft_threshold(
    expr: &ExpressionMatrix,
    config: &ThresholdConfig,
) -> Result<SoftThresholdSelection> {
    config.validate()?;
    config.check_ceiling(expr.n_features())?;

    let mut powers = config.powers.clone();
    powers.sort_by(|a, b| a.total_cmp(b));
    powers.dedup();

    let cor = correlation(expr.view(), config.allow_missing)?;
    let fits: Vec<ScaleFreeFit> = powers
        .par_iter()
        .map(|&power| fit_power(&cor, power, config))
        .collect();

    for fit in &fits {
        debug!(
            "power {}: R^2 = {:?}, slope = {:?}, mean k = {:.3}",
            fit.power, fit.r_squared, fit.slope, fit.mean_connectivity
        );
    }

    if let Some(fit) = fits
        .iter()
        .find(|f| f.r_squared.is_some_and(|r2| r2 > config.r_squared_threshold))
    {
        info!(
            "Selected soft-threshold power {} (scale-free R^2 = {:.3})",
            fit.power,
            fit.r_squared.unwrap_or_default()
        );
        return Ok(SoftThresholdSelection {
            power: fit.power,
            fits,
            warning: None,
        });
    }

    let best = fits
        .iter()
        .filter_map(|f| f.r_squared.map(|r2| (f.power, r2)))
        .fold(None, |acc: Option<(f64, f64)>, (power, r2)| match acc {
            Some((_, best_r2)) if best_r2 >= r2 => acc,
            _ => Some((power, r2)),
        });

    let (fallback_power, best_r_squared) = best.unwrap_or((DEFAULT_POWER, f64::NAN));
    let warning = ThresholdSelectionFailure {
        threshold: config.r_squared_threshold,
        best_r_squared,
        fallback_power,
    };
    warn!("{}", warning);

    Ok(SoftThresholdSelection {
        power: fallback_power,
        fits,
        warning: Some(warning),
    })
}
