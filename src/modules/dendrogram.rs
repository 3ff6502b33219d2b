//! Average-linkage hierarchical clustering.
//!
//! Uses the nearest-neighbor chain algorithm, which is exact for average
//! linkage (a reducible method) and needs O(p²) time on top of the p × p
//! dissimilarity matrix. Ties between candidate neighbors go to the previous
//! chain element first and then to the lowest index, so the tree is a pure
//! function of the input.

use crate::error::{NetworkError, Result};
use ndarray::Array2;

/// One agglomeration step.
///
/// Node ids below `n_leaves` are features; the node created by merge `k` has
/// id `n_leaves + k`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    pub size: usize,
}

/// Binary merge tree with non-decreasing merge heights.
#[derive(Debug, Clone, PartialEq)]
pub struct Dendrogram {
    n_leaves: usize,
    merges: Vec<Merge>,
}

impl Dendrogram {
    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    pub fn heights(&self) -> Vec<f64> {
        self.merges.iter().map(|m| m.height).collect()
    }

    /// Leaves below `node`, in ascending order.
    pub fn leaves_under(&self, node: usize) -> Vec<usize> {
        let mut leaves = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            if id < self.n_leaves {
                leaves.push(id);
            } else {
                let merge = &self.merges[id - self.n_leaves];
                stack.push(merge.left);
                stack.push(merge.right);
            }
        }
        leaves.sort_unstable();
        leaves
    }
}

/// Cluster a symmetric dissimilarity matrix with average linkage.
///
/// `NaN` entries are read as the maximal dissimilarity (the larger of 1 and
/// the largest finite entry).
pub fn average_linkage(diss: &Array2<f64>) -> Result<Dendrogram> {
    let n = diss.nrows();
    if n != diss.ncols() {
        return Err(NetworkError::input_shape(format!(
            "dissimilarity must be square, got {} x {}",
            n,
            diss.ncols()
        )));
    }
    if n == 0 {
        return Err(NetworkError::input_shape("cannot cluster zero features"));
    }
    if let Some(v) = diss.iter().find(|v| v.is_infinite()) {
        return Err(NetworkError::numerical(format!("dissimilarity entry is {}", v)));
    }

    let ceiling = diss
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(1.0_f64, f64::max);
    let mut d: Vec<f64> = diss
        .iter()
        .map(|&v| if v.is_nan() { ceiling } else { v })
        .collect();
    let at = |i: usize, j: usize| i * n + j;

    let mut active = vec![true; n];
    let mut size = vec![1usize; n];
    let mut floor = vec![0.0_f64; n];
    let mut raw: Vec<(usize, usize, f64)> = Vec::with_capacity(n.saturating_sub(1));
    let mut chain: Vec<usize> = Vec::with_capacity(n);

    while raw.len() + 1 < n {
        if chain.is_empty() {
            if let Some(first) = active.iter().position(|&a| a) {
                chain.push(first);
            }
        }

        let (x, y) = loop {
            let x = chain[chain.len() - 1];
            let prev = if chain.len() >= 2 {
                Some(chain[chain.len() - 2])
            } else {
                None
            };

            let mut best: Option<(usize, f64)> = prev.map(|p| (p, d[at(x, p)]));
            for j in 0..n {
                if !active[j] || j == x {
                    continue;
                }
                let dj = d[at(x, j)];
                match best {
                    Some((_, bd)) if dj >= bd => {}
                    _ => best = Some((j, dj)),
                }
            }
            let (y, _) = match best {
                Some(b) => b,
                None => {
                    return Err(NetworkError::numerical("nearest-neighbor chain lost its partner"));
                }
            };

            if prev == Some(y) {
                chain.pop();
                chain.pop();
                break (x, y);
            }
            chain.push(y);
        };

        let (keep, drop) = if x < y { (x, y) } else { (y, x) };
        let height = d[at(x, y)].max(floor[x]).max(floor[y]);
        raw.push((keep, drop, height));

        let (sk, sd) = (size[keep] as f64, size[drop] as f64);
        for k in 0..n {
            if !active[k] || k == keep || k == drop {
                continue;
            }
            let merged = (sk * d[at(keep, k)] + sd * d[at(drop, k)]) / (sk + sd);
            d[at(keep, k)] = merged;
            d[at(k, keep)] = merged;
        }
        active[drop] = false;
        size[keep] += size[drop];
        floor[keep] = height;
    }

    // Children are always recorded before their parents and never above
    // them, so a stable sort keeps that order.
    raw.sort_by(|a, b| a.2.total_cmp(&b.2));

    let mut parent: Vec<usize> = (0..n).collect();
    let mut node_of: Vec<usize> = (0..n).collect();
    let mut node_size = vec![1usize; n];
    let mut merges = Vec::with_capacity(raw.len());
    for (k, &(a, b, height)) in raw.iter().enumerate() {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        let (na, nb) = (node_of[ra], node_of[rb]);
        let merged_size = node_size[ra] + node_size[rb];
        merges.push(Merge {
            left: na.min(nb),
            right: na.max(nb),
            height,
            size: merged_size,
        });
        parent[rb] = ra;
        node_of[ra] = n + k;
        node_size[ra] = merged_size;
    }

    Ok(Dendrogram {
        n_leaves: n,
        merges,
    })
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}
