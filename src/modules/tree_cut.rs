//! Dynamic branch cutting.
//!
//! [`cut`] walks the merges bottom-up and decides, at every merge, whether
//! its two child branches are distinct modules, whether they continue as one
//! growing branch, or whether the parent is closed to further growth. The
//! decision uses two shape criteria, both scaled to the span between a
//! reference height (5th percentile of merge heights) and the cut height:
//!
//! * core scatter: the average joining height inside a branch, taken when the
//!   branch first reaches `min_cluster_size`, must stay below a maximum;
//! * gap: the distance from that core to the merge height must reach a
//!   minimum.
//!
//! Larger `deep_split` values allow more scatter and smaller gaps, producing
//! more and smaller modules. Branches that never reach `min_cluster_size`
//! stay unassigned (label 0).

use crate::error::{NetworkError, Result};
use crate::modules::dendrogram::Dendrogram;
use crate::modules::UNASSIGNED;

const MAX_CORE_SCATTER: [f64; 5] = [0.64, 0.73, 0.82, 0.91, 0.95];
const REFERENCE_QUANTILE: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutParams {
    pub min_cluster_size: usize,
    /// Sensitivity level, 0 (conservative) to 4 (aggressive)
    pub deep_split: u8,
    /// Merges above this height are never joined; defaults to 99% of the
    /// span from the reference height to the top merge
    pub cut_height: Option<f64>,
}

impl Default for CutParams {
    fn default() -> Self {
        CutParams {
            min_cluster_size: 20,
            deep_split: 2,
            cut_height: None,
        }
    }
}

impl CutParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_cluster_size == 0 {
            return Err(NetworkError::config("min_cluster_size must be at least 1"));
        }
        if self.deep_split as usize >= MAX_CORE_SCATTER.len() {
            return Err(NetworkError::config(format!(
                "deep_split must be between 0 and 4, got {}",
                self.deep_split
            )));
        }
        if let Some(h) = self.cut_height {
            if !h.is_finite() {
                return Err(NetworkError::config("cut_height must be finite"));
            }
        }
        Ok(())
    }
}

/// Absolute thresholds derived from the tree and the parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CutThresholds {
    pub reference_height: f64,
    pub cut_height: f64,
    pub max_core_scatter: f64,
    pub min_gap: f64,
}

pub fn thresholds(tree: &Dendrogram, params: &CutParams) -> CutThresholds {
    let heights = tree.heights();
    if heights.is_empty() {
        return CutThresholds {
            reference_height: 0.0,
            cut_height: params.cut_height.unwrap_or(0.0),
            max_core_scatter: 0.0,
            min_gap: 0.0,
        };
    }

    let ref_index = ((heights.len() as f64 * REFERENCE_QUANTILE).round() as usize).max(1) - 1;
    let reference_height = heights[ref_index];
    let top = heights[heights.len() - 1];
    let cut_height = params
        .cut_height
        .unwrap_or(reference_height + 0.99 * (top - reference_height));
    let span = (cut_height - reference_height).max(0.0);
    let scatter_fraction = MAX_CORE_SCATTER[params.deep_split as usize];

    CutThresholds {
        reference_height,
        cut_height,
        max_core_scatter: reference_height + scatter_fraction * span,
        min_gap: (1.0 - scatter_fraction) * 0.75 * span,
    }
}

#[derive(Debug)]
enum Branch {
    Open {
        members: Vec<usize>,
        height_sum: f64,
        n_joins: usize,
        core_scatter: Option<f64>,
    },
    Closed,
}

impl Branch {
    fn leaf(feature: usize, min_size: usize) -> Branch {
        Branch::Open {
            members: vec![feature],
            height_sum: 0.0,
            n_joins: 0,
            core_scatter: if min_size <= 1 { Some(0.0) } else { None },
        }
    }

    fn qualifies(&self, height: f64, min_size: usize, limits: &CutThresholds) -> bool {
        match self {
            Branch::Open {
                members,
                core_scatter: Some(core),
                ..
            } => {
                members.len() >= min_size
                    && *core <= limits.max_core_scatter
                    && height - *core >= limits.min_gap
            }
            _ => false,
        }
    }

    fn size(&self) -> usize {
        match self {
            Branch::Open { members, .. } => members.len(),
            Branch::Closed => 0,
        }
    }
}

/// Join two open branches at `height`; `a` keeps its core if it has one.
fn join(a: Branch, b: Branch, height: f64, min_size: usize) -> Branch {
    match (a, b) {
        (
            Branch::Open {
                members: mut ma,
                height_sum: sa,
                n_joins: ja,
                core_scatter: ca,
            },
            Branch::Open {
                members: mb,
                height_sum: sb,
                n_joins: jb,
                core_scatter: cb,
            },
        ) => {
            ma.extend(mb);
            let height_sum = sa + sb + height;
            let n_joins = ja + jb + 1;
            let core_scatter = match (ca, cb) {
                (Some(x), _) => Some(x),
                (None, Some(y)) => Some(y),
                (None, None) if ma.len() >= min_size => Some(height_sum / n_joins as f64),
                (None, None) => None,
            };
            Branch::Open {
                members: ma,
                height_sum,
                n_joins,
                core_scatter,
            }
        }
        _ => Branch::Closed,
    }
}

/// Partition the leaves of `tree` into modules.
///
/// Returns one label per leaf: `0` for unassigned, `1..=K` for modules
/// ordered by decreasing size (ties by smallest member).
pub fn cut(tree: &Dendrogram, params: &CutParams) -> Result<Vec<usize>> {
    params.validate()?;
    let n = tree.n_leaves();
    let min_size = params.min_cluster_size;
    let limits = thresholds(tree, params);

    let mut nodes: Vec<Option<Branch>> = (0..n).map(|i| Some(Branch::leaf(i, min_size))).collect();
    nodes.reserve(tree.merges().len());
    let mut modules: Vec<Vec<usize>> = Vec::new();

    for merge in tree.merges() {
        let a = nodes[merge.left]
            .take()
            .ok_or_else(|| NetworkError::input_shape("dendrogram reuses a node"))?;
        let b = nodes[merge.right]
            .take()
            .ok_or_else(|| NetworkError::input_shape("dendrogram reuses a node"))?;
        let h = merge.height;

        let parent = if h > limits.cut_height {
            emit_if_large(a, min_size, &mut modules);
            emit_if_large(b, min_size, &mut modules);
            Branch::Closed
        } else {
            let qa = a.qualifies(h, min_size, &limits);
            let qb = b.qualifies(h, min_size, &limits);
            let open_a = matches!(a, Branch::Open { .. });
            let open_b = matches!(b, Branch::Open { .. });
            match (open_a, open_b) {
                (true, true) => match (qa, qb) {
                    (true, true) => {
                        emit_if_large(a, min_size, &mut modules);
                        emit_if_large(b, min_size, &mut modules);
                        Branch::Closed
                    }
                    (true, false) => join(a, b, h, min_size),
                    (false, true) => join(b, a, h, min_size),
                    (false, false) => {
                        if a.size() >= b.size() {
                            join(a, b, h, min_size)
                        } else {
                            join(b, a, h, min_size)
                        }
                    }
                },
                (true, false) => {
                    if qa {
                        emit_if_large(a, min_size, &mut modules);
                    }
                    Branch::Closed
                }
                (false, true) => {
                    if qb {
                        emit_if_large(b, min_size, &mut modules);
                    }
                    Branch::Closed
                }
                (false, false) => Branch::Closed,
            }
        };
        nodes.push(Some(parent));
    }

    if let Some(root) = nodes.last_mut().and_then(Option::take) {
        emit_if_large(root, min_size, &mut modules);
    }

    Ok(label_by_size(n, modules))
}

fn emit_if_large(branch: Branch, min_size: usize, modules: &mut Vec<Vec<usize>>) {
    if let Branch::Open { members, .. } = branch {
        if members.len() >= min_size {
            modules.push(members);
        }
    }
}

/// Number modules `1..=K` by decreasing size, ties by smallest member.
pub(crate) fn label_by_size(n: usize, mut modules: Vec<Vec<usize>>) -> Vec<usize> {
    for members in modules.iter_mut() {
        members.sort_unstable();
    }
    modules.sort_by(|a, b| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));

    let mut labels = vec![UNASSIGNED; n];
    for (k, members) in modules.iter().enumerate() {
        for &i in members {
            labels[i] = k + 1;
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::dendrogram::average_linkage;
    use ndarray::Array2;

    fn blocks(sizes: &[usize], within: f64, between: f64) -> Array2<f64> {
        let group: Vec<usize> = sizes
            .iter()
            .enumerate()
            .flat_map(|(g, &s)| std::iter::repeat_n(g, s))
            .collect();
        let n = group.len();
        Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                0.0
            } else if group[i] == group[j] {
                within + 0.001 * ((i + j) % 7) as f64
            } else {
                between + 0.001 * ((i * j) % 5) as f64
            }
        })
    }

    #[test]
    fn test_separates_clear_blocks() {
        let tree = average_linkage(&blocks(&[12, 10, 8], 0.2, 0.9)).unwrap();
        let params = CutParams {
            min_cluster_size: 5,
            ..CutParams::default()
        };
        let labels = cut(&tree, &params).unwrap();
        assert!(labels[..12].iter().all(|&l| l == 1));
        assert!(labels[12..22].iter().all(|&l| l == 2));
        assert!(labels[22..].iter().all(|&l| l == 3));
    }

    #[test]
    fn test_small_branches_unassigned() {
        let tree = average_linkage(&blocks(&[12, 10, 2], 0.2, 0.9)).unwrap();
        let params = CutParams {
            min_cluster_size: 5,
            ..CutParams::default()
        };
        let labels = cut(&tree, &params).unwrap();
        assert_eq!(labels[22], UNASSIGNED);
        assert_eq!(labels[23], UNASSIGNED);
        assert!(labels[..12].iter().all(|&l| l == 1));
        assert!(labels[12..22].iter().all(|&l| l == 2));
    }

    #[test]
    fn test_everything_too_small() {
        let tree = average_linkage(&blocks(&[3, 3], 0.2, 0.9)).unwrap();
        let labels = cut(&tree, &CutParams::default()).unwrap();
        assert!(labels.iter().all(|&l| l == UNASSIGNED));
    }

    #[test]
    fn test_rejects_bad_deep_split() {
        let params = CutParams {
            deep_split: 5,
            ..CutParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_label_by_size_orders_modules() {
        let labels = label_by_size(6, vec![vec![5], vec![4, 0, 2]]);
        assert_eq!(labels, vec![1, 0, 1, 0, 1, 2]);
    }
}
