//! Co-expression module detection.
//!
//! Features are clustered on TOM dissimilarity (`1 − TOM`) with average
//! linkage ([`dendrogram`]), the tree is cut into modules by a dynamic
//! branch cut ([`tree_cut`]), and modules whose eigengenes are too similar
//! are merged ([`eigengene`]).
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use single_network::matrix::ExpressionMatrix;
//! use single_network::modules::{detect_modules, ModuleConfig};
//! use single_network::network::{build_network, NetworkConfig};
//!
//! # fn run(expr: &ExpressionMatrix) -> anyhow::Result<()> {
//! let network = build_network(expr, 6.0, &NetworkConfig::default())?;
//! let modules = detect_modules(expr, &network, &ModuleConfig::default())?;
//! println!("{} modules", modules.n_modules());
//! # Ok(())
//! # }
//! ```

use crate::error::{NetworkError, Result};
use crate::matrix::ExpressionMatrix;
use crate::network::Network;
use log::info;
use ndarray::Array1;
use std::collections::BTreeMap;

pub mod dendrogram;
pub mod eigengene;
pub mod tree_cut;

use dendrogram::Dendrogram;
use tree_cut::CutParams;

/// Label reserved for features outside every module.
pub const UNASSIGNED: usize = 0;

#[derive(Debug, Clone)]
pub struct ModuleConfig {
    pub min_cluster_size: usize,
    /// Branch-cut sensitivity, 0 to 4
    pub deep_split: u8,
    /// Modules whose eigengenes correlate above this are merged
    pub merge_threshold: f64,
    /// Explicit tree cut height; derived from the tree when `None`
    pub cut_height: Option<f64>,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        ModuleConfig {
            min_cluster_size: 20,
            deep_split: 2,
            merge_threshold: 0.75,
            cut_height: None,
        }
    }
}

impl ModuleConfig {
    pub fn cut_params(&self) -> CutParams {
        CutParams {
            min_cluster_size: self.min_cluster_size,
            deep_split: self.deep_split,
            cut_height: self.cut_height,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.cut_params().validate()?;
        if !(self.merge_threshold.is_finite() && self.merge_threshold <= 1.0) {
            return Err(NetworkError::config(format!(
                "merge_threshold must be a correlation no larger than 1, got {}",
                self.merge_threshold
            )));
        }
        Ok(())
    }
}

/// Module labels plus the eigengenes and memberships that go with them.
#[derive(Debug, Clone)]
pub struct ModuleAssignment {
    /// One label per feature; [`UNASSIGNED`] outside every module
    pub labels: Vec<usize>,
    /// Labels straight out of the tree cut, before merging
    pub unmerged_labels: Vec<usize>,
    pub eigengenes: BTreeMap<usize, Array1<f64>>,
    /// Correlation of each assigned feature with its module eigengene
    pub membership: Vec<Option<f64>>,
    pub dendrogram: Dendrogram,
}

impl ModuleAssignment {
    pub fn n_modules(&self) -> usize {
        self.labels
            .iter()
            .copied()
            .filter(|&l| l != UNASSIGNED)
            .max()
            .unwrap_or(0)
    }

    pub fn members(&self, label: usize) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(i, &l)| if l == label { Some(i) } else { None })
            .collect()
    }

    pub fn unassigned(&self) -> Vec<usize> {
        self.members(UNASSIGNED)
    }

    /// Size of every module, unassigned included under label 0.
    pub fn module_sizes(&self) -> BTreeMap<usize, usize> {
        let mut sizes = BTreeMap::new();
        for &l in &self.labels {
            *sizes.entry(l).or_insert(0) += 1;
        }
        sizes
    }
}

/// Cluster, cut and merge the features of `network`.
pub fn detect_modules(
    expr: &ExpressionMatrix,
    network: &Network,
    config: &ModuleConfig,
) -> Result<ModuleAssignment> {
    config.validate()?;
    if network.n_features() != expr.n_features() {
        return Err(NetworkError::input_shape(format!(
            "network has {} features but expression matrix has {}",
            network.n_features(),
            expr.n_features()
        )));
    }

    let dendrogram = dendrogram::average_linkage(&network.dissimilarity())?;
    let unmerged_labels = tree_cut::cut(&dendrogram, &config.cut_params())?;
    let labels = eigengene::merge_close_modules(expr, &unmerged_labels, config.merge_threshold)?;
    let eigengenes = eigengene::module_eigengenes(expr, &labels)?;
    let membership = eigengene::module_membership(expr, &labels, &eigengenes);

    let assignment = ModuleAssignment {
        labels,
        unmerged_labels,
        eigengenes,
        membership,
        dendrogram,
    };
    info!(
        "Detected {} modules over {} features ({} unassigned)",
        assignment.n_modules(),
        expr.n_features(),
        assignment.unassigned().len()
    );
    Ok(assignment)
}
