//! Sweeps of difference tests over many sample-group comparisons.
//!
//! A sweep is planned as a list of [`Comparison`]s (two disjoint sample
//! selections under a [`ComparisonKey`]) and run with [`run_sweep`]. Every
//! comparison is an independent work item: they run in parallel, a failure
//! is kept under its key instead of aborting the sweep, and a raised
//! cancellation flag turns every comparison that has not started yet into
//! [`NetworkError::Cancelled`].
//!
//! Planners cover the usual designs:
//!
//! - [`pairwise_comparisons`]: every unordered pair of distinct group labels
//! - [`one_vs_rest_comparisons`]: each label against all other samples
//! - [`marker_split_comparisons`]: samples expressing a marker above a
//!   threshold against the rest
//! - [`marker_pair_comparisons`]: samples expressing one marker against
//!   samples expressing another, for every pair of markers

use crate::error::{NetworkError, Result};
use crate::matrix::ExpressionMatrix;
use crate::modules::{detect_modules, ModuleAssignment, ModuleConfig};
use crate::network::threshold::{pick_soft_threshold, SoftThresholdSelection, ThresholdConfig};
use crate::network::{build_network, NetworkConfig};
use crate::testing::utils::{extract_unique_groups, group_indices, marker_split};
use crate::testing::{difference_test_with_cancel, DifferenceTestConfig, DifferenceTestResult};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identity of one comparison; orders the sweep table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ComparisonKey {
    /// Group `.0` against group `.1`
    Pair(String, String),
    /// A group against every other sample
    OneVsRest(String),
    /// Samples expressing a marker against the rest
    MarkerSplit(String),
    /// Samples expressing marker `.0` but not `.1` against the reverse
    MarkerPair(String, String),
}

impl fmt::Display for ComparisonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonKey::Pair(a, b) => write!(f, "{} vs {}", a, b),
            ComparisonKey::OneVsRest(a) => write!(f, "{} vs rest", a),
            ComparisonKey::MarkerSplit(m) => write!(f, "{}+ vs {}-", m, m),
            ComparisonKey::MarkerPair(a, b) => write!(f, "{}+ vs {}+", a, b),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub key: ComparisonKey,
    pub group_a: Vec<usize>,
    pub group_b: Vec<usize>,
}

/// Every unordered pair of distinct labels, in label order.
pub fn pairwise_comparisons<L>(labels: &[L]) -> Vec<Comparison>
where
    L: Ord + Clone + fmt::Display,
{
    let groups = extract_unique_groups(labels);
    let mut comparisons = Vec::with_capacity(groups.len() * groups.len().saturating_sub(1) / 2);
    for (i, first) in groups.iter().enumerate() {
        for second in &groups[i + 1..] {
            comparisons.push(Comparison {
                key: ComparisonKey::Pair(first.to_string(), second.to_string()),
                group_a: group_indices(labels, first),
                group_b: group_indices(labels, second),
            });
        }
    }
    comparisons
}

/// Each label against all samples carrying another label.
pub fn one_vs_rest_comparisons<L>(labels: &[L]) -> Vec<Comparison>
where
    L: Ord + Clone + fmt::Display,
{
    extract_unique_groups(labels)
        .into_iter()
        .map(|group| {
            let (group_a, group_b): (Vec<usize>, Vec<usize>) =
                (0..labels.len()).partition(|&i| labels[i] == group);
            Comparison {
                key: ComparisonKey::OneVsRest(group.to_string()),
                group_a,
                group_b,
            }
        })
        .collect()
}

fn marker_column(expr: &ExpressionMatrix, marker: usize) -> Result<Vec<f64>> {
    if marker >= expr.n_features() {
        return Err(NetworkError::input_shape(format!(
            "marker feature {} out of range for {} features",
            marker,
            expr.n_features()
        )));
    }
    Ok(expr.view().column(marker).to_vec())
}

/// For each marker, samples with expression above `threshold` against the rest.
pub fn marker_split_comparisons(
    expr: &ExpressionMatrix,
    markers: &[usize],
    threshold: f64,
) -> Result<Vec<Comparison>> {
    markers
        .iter()
        .map(|&m| {
            let (group_a, group_b) = marker_split(&marker_column(expr, m)?, threshold);
            Ok(Comparison {
                key: ComparisonKey::MarkerSplit(expr.feature_label(m)),
                group_a,
                group_b,
            })
        })
        .collect()
}

/// For each pair of markers, samples expressing only the first against
/// samples expressing only the second. Samples expressing both or neither
/// are left out.
pub fn marker_pair_comparisons(
    expr: &ExpressionMatrix,
    markers: &[usize],
    threshold: f64,
) -> Result<Vec<Comparison>> {
    let positive: Vec<BTreeSet<usize>> = markers
        .iter()
        .map(|&m| {
            let (high, _) = marker_split(&marker_column(expr, m)?, threshold);
            Ok(high.into_iter().collect())
        })
        .collect::<Result<_>>()?;

    let mut comparisons = Vec::new();
    for i in 0..markers.len() {
        for j in i + 1..markers.len() {
            comparisons.push(Comparison {
                key: ComparisonKey::MarkerPair(
                    expr.feature_label(markers[i]),
                    expr.feature_label(markers[j]),
                ),
                group_a: positive[i].difference(&positive[j]).copied().collect(),
                group_b: positive[j].difference(&positive[i]).copied().collect(),
            });
        }
    }
    Ok(comparisons)
}

/// Threshold selection, network construction and module detection.
#[derive(Debug, Clone, Default)]
pub struct NetworkPipelineConfig {
    pub threshold: ThresholdConfig,
    pub network: NetworkConfig,
    pub modules: ModuleConfig,
}

impl NetworkPipelineConfig {
    pub fn validate(&self) -> Result<()> {
        self.threshold.validate()?;
        self.network.validate()?;
        self.modules.validate()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub selection: SoftThresholdSelection,
    pub modules: ModuleAssignment,
}

/// Pick a power, build the network at that power and detect its modules.
///
/// The network type and missing-value policy of `config.network` also apply
/// to threshold selection.
pub fn run_network_pipeline(
    expr: &ExpressionMatrix,
    config: &NetworkPipelineConfig,
) -> Result<PipelineOutcome> {
    config.validate()?;
    config.network.check_ceiling(expr.n_features())?;
    let threshold = ThresholdConfig {
        network_type: config.network.network_type,
        allow_missing: config.network.allow_missing,
        ..config.threshold.clone()
    };
    let selection = pick_soft_threshold(expr, &threshold)?;
    let network = build_network(expr, selection.power, &config.network)?;
    let modules = detect_modules(expr, &network, &config.modules)?;
    Ok(PipelineOutcome { selection, modules })
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub test: DifferenceTestConfig,
    /// Also run the network pipeline on group A of every comparison
    pub network: Option<NetworkPipelineConfig>,
}

impl SweepConfig {
    pub fn new(test: DifferenceTestConfig) -> Self {
        SweepConfig {
            test,
            network: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.test.validate()?;
        if let Some(network) = &self.network {
            network.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ComparisonOutcome {
    pub n_a: usize,
    pub n_b: usize,
    pub test: DifferenceTestResult,
    pub network: Option<PipelineOutcome>,
}

/// Per-comparison results keyed by comparison identity.
pub type SweepTable = BTreeMap<ComparisonKey, Result<ComparisonOutcome>>;

pub fn run_sweep(
    expr: &ExpressionMatrix,
    comparisons: &[Comparison],
    config: &SweepConfig,
) -> Result<SweepTable> {
    run_sweep_with_cancel(expr, comparisons, config, &AtomicBool::new(false))
}

/// [`run_sweep`] honoring a cancellation flag between comparisons (and
/// between the permutation trials of a running comparison).
pub fn run_sweep_with_cancel(
    expr: &ExpressionMatrix,
    comparisons: &[Comparison],
    config: &SweepConfig,
    cancel: &AtomicBool,
) -> Result<SweepTable> {
    if comparisons.is_empty() {
        return Err(NetworkError::config("comparison plan is empty"));
    }
    config.validate()?;
    let mut seen = BTreeSet::new();
    if let Some(dup) = comparisons.iter().find(|c| !seen.insert(&c.key)) {
        return Err(NetworkError::config(format!(
            "comparison '{}' is planned twice",
            dup.key
        )));
    }

    info!("Running sweep over {} comparisons", comparisons.len());
    let table: SweepTable = comparisons
        .par_iter()
        .map(|comparison| {
            let outcome = if cancel.load(Ordering::Relaxed) {
                Err(NetworkError::Cancelled)
            } else {
                run_comparison(expr, comparison, config, cancel)
            };
            if let Err(e) = &outcome {
                warn!("Comparison '{}' failed: {}", comparison.key, e);
            }
            (comparison.key.clone(), outcome)
        })
        .collect();

    let failed = table.values().filter(|r| r.is_err()).count();
    info!(
        "Sweep finished: {} succeeded, {} failed",
        table.len() - failed,
        failed
    );
    Ok(table)
}

fn run_comparison(
    expr: &ExpressionMatrix,
    comparison: &Comparison,
    config: &SweepConfig,
    cancel: &AtomicBool,
) -> Result<ComparisonOutcome> {
    debug!(
        "Comparison '{}': {} vs {} samples",
        comparison.key,
        comparison.group_a.len(),
        comparison.group_b.len()
    );
    let x = expr.select_samples(&comparison.group_a)?;
    let y = expr.select_samples(&comparison.group_b)?;
    let test = difference_test_with_cancel(&x, &y, &config.test, cancel)?;
    let network = match &config.network {
        Some(pipeline) => Some(run_network_pipeline(&x, pipeline)?),
        None => None,
    };
    Ok(ComparisonOutcome {
        n_a: x.n_samples(),
        n_b: y.n_samples(),
        test,
        network,
    })
}
