//! # single-network
//!
//! Gene co-expression networks and differential co-expression testing for single-cell data, part of
//! the single-rust ecosystem.
//!
//! The crate reconstructs weighted co-expression networks from expression matrices, finds modules of
//! co-expressed genes in them, and tests whether the covariance structure of two groups of cells
//! differs, pointing at the genes that drive the difference.
//!
//! ## Core Features
//!
//! - **Network Construction**: soft-thresholded correlation adjacency (unsigned or signed) and
//!   topological overlap (TOM), with the threshold power picked by scale-free topology fit
//! - **Module Detection**: average-linkage clustering on TOM dissimilarity, dynamic branch cutting,
//!   eigengene-based module merging and module membership (kME)
//! - **Differential Co-expression**: the sparse leading eigenvalue (sLED) permutation test on
//!   covariance, correlation or adjacency differences, with per-gene leverage scores
//! - **Sweeps**: pairwise, one-vs-rest and marker-based comparison plans run in parallel with
//!   per-comparison failure isolation
//! - **Sparse Matrix Support**: accepts `CsrMatrix` from nalgebra-sparse as well as dense `ndarray`
//!   matrices
//!
//! ## Quick Start
//!
//! Use the [`CoexpressionOps`] trait on a cells × genes matrix:
//!
//! ```rust,no_run
//! use ndarray::Array2;
//! use single_network::CoexpressionOps;
//! use single_network::orchestrate::NetworkPipelineConfig;
//! use single_network::testing::DifferenceTestConfig;
//!
//! # fn run(counts: Array2<f64>, groups: Vec<usize>) -> anyhow::Result<()> {
//! let pipeline = counts.network_pipeline(&NetworkPipelineConfig::default())?;
//! println!("power {}, {} modules", pipeline.selection.power, pipeline.modules.n_modules());
//!
//! let config = DifferenceTestConfig::new(vec![0.2, 0.5], 100, 42);
//! let result = counts.differential_coexpression_by_groups(&groups, &config)?;
//! println!("p = {}, top genes {:?}", result.p_value, result.top_features);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - **[`matrix`]**: expression matrix wrapper, covariance and correlation
//! - **[`network`]**: threshold selection, adjacency and TOM
//! - **[`modules`]**: clustering, tree cutting and eigengenes
//! - **[`testing`]**: the sLED difference test
//! - **[`orchestrate`]**: comparison planning and sweeps
//! - **[`error`]**: error types

pub mod error;
pub mod matrix;
pub mod modules;
pub mod network;
pub mod orchestrate;
pub mod testing;

mod ops;

pub use error::{NetworkError, ThresholdSelectionFailure};
pub use ops::CoexpressionOps;
