//! Module eigengenes and eigengene-based module merging.

use crate::error::{NetworkError, Result};
use crate::matrix::ExpressionMatrix;
use crate::modules::tree_cut::label_by_size;
use crate::modules::UNASSIGNED;
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::collections::BTreeMap;

const POWER_ITERATIONS: usize = 1000;
const TOLERANCE: f64 = 1e-12;

/// Pearson correlation of two profiles; `NaN` if either is constant.
pub fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let n = a.len() as f64;
    let (ma, mb) = (a.sum() / n, b.sum() / n);
    let mut sab = 0.0;
    let mut saa = 0.0;
    let mut sbb = 0.0;
    for (&x, &y) in a.iter().zip(b.iter()) {
        sab += (x - ma) * (y - mb);
        saa += (x - ma) * (x - ma);
        sbb += (y - mb) * (y - mb);
    }
    if saa <= 0.0 || sbb <= 0.0 {
        return f64::NAN;
    }
    (sab / (saa * sbb).sqrt()).clamp(-1.0, 1.0)
}

/// Member columns centered and scaled to unit variance, constant ones dropped.
fn standardized(expr: &ExpressionMatrix, members: &[usize]) -> Option<Array2<f64>> {
    let x = expr.view();
    let n = x.nrows();
    let columns: Vec<Array1<f64>> = members
        .iter()
        .filter_map(|&j| {
            let col = x.column(j);
            let mean = col.sum() / n as f64;
            let centered = col.mapv(|v| v - mean);
            let sd = (centered.dot(&centered) / (n as f64 - 1.0)).sqrt();
            if sd > 1e-12 * mean.abs().max(1.0) {
                Some(centered / sd)
            } else {
                None
            }
        })
        .collect();
    if columns.is_empty() {
        return None;
    }

    let mut z = Array2::<f64>::zeros((n, columns.len()));
    for (k, col) in columns.iter().enumerate() {
        z.column_mut(k).assign(col);
    }
    Some(z)
}

/// First principal component of the standardized member expression.
///
/// Scaled to unit variance and oriented to correlate positively with the
/// module's average standardized profile. `None` when no member varies or
/// there are fewer than 2 samples.
pub fn eigengene(expr: &ExpressionMatrix, members: &[usize]) -> Result<Option<Array1<f64>>> {
    if expr.n_samples() < 2 {
        return Ok(None);
    }
    let z = match standardized(expr, members) {
        Some(z) => z,
        None => return Ok(None),
    };
    let n = z.nrows();

    let average = z
        .mean_axis(Axis(1))
        .ok_or_else(|| NetworkError::input_shape("module has no members"))?;

    let mut u = if average.dot(&average).sqrt() > 1e-8 {
        average.clone()
    } else {
        let best = (0..z.ncols())
            .max_by(|&a, &b| {
                let na = z.column(a).dot(&z.column(a));
                let nb = z.column(b).dot(&z.column(b));
                na.total_cmp(&nb).then(b.cmp(&a))
            })
            .unwrap_or(0);
        z.column(best).to_owned()
    };
    normalize(&mut u)?;

    for _ in 0..POWER_ITERATIONS {
        let mut next = z.dot(&z.t().dot(&u));
        if next.dot(&next) == 0.0 {
            break;
        }
        normalize(&mut next)?;
        let delta = next
            .iter()
            .zip(u.iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max);
        u = next;
        if delta < TOLERANCE {
            break;
        }
    }

    let reference = if average.dot(&average).sqrt() > 1e-8 {
        average
    } else {
        z.column(0).to_owned()
    };
    if u.dot(&reference) < 0.0 {
        u.mapv_inplace(|v| -v);
    }

    let mean = u.sum() / n as f64;
    u.mapv_inplace(|v| v - mean);
    let sd = (u.dot(&u) / (n as f64 - 1.0)).sqrt();
    if !(sd.is_finite() && sd > 0.0) {
        return Ok(None);
    }
    u.mapv_inplace(|v| v / sd);

    if u.iter().any(|v| !v.is_finite()) {
        return Err(NetworkError::numerical("non-finite eigengene"));
    }
    Ok(Some(u))
}

fn normalize(v: &mut Array1<f64>) -> Result<()> {
    let norm = v.dot(v).sqrt();
    if !norm.is_finite() {
        return Err(NetworkError::numerical("non-finite vector norm in eigengene iteration"));
    }
    if norm > 0.0 {
        v.mapv_inplace(|x| x / norm);
    }
    Ok(())
}

/// Members of each labelled module, unassigned excluded.
pub fn members_by_label(labels: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut modules: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, &label) in labels.iter().enumerate() {
        if label != UNASSIGNED {
            modules.entry(label).or_default().push(i);
        }
    }
    modules
}

/// Eigengene of every module that has one.
pub fn module_eigengenes(
    expr: &ExpressionMatrix,
    labels: &[usize],
) -> Result<BTreeMap<usize, Array1<f64>>> {
    let mut eigengenes = BTreeMap::new();
    for (label, members) in members_by_label(labels) {
        if let Some(e) = eigengene(expr, &members)? {
            eigengenes.insert(label, e);
        }
    }
    Ok(eigengenes)
}

/// Merge modules whose eigengenes correlate above `threshold`.
///
/// The most correlated pair is merged first and its eigengene recomputed,
/// until no pair exceeds the threshold. Labels are renumbered by size.
pub fn merge_close_modules(
    expr: &ExpressionMatrix,
    labels: &[usize],
    threshold: f64,
) -> Result<Vec<usize>> {
    let mut modules = members_by_label(labels);
    let mut eigengenes = module_eigengenes(expr, labels)?;

    loop {
        let keys: Vec<usize> = eigengenes.keys().copied().collect();
        let mut best: Option<(usize, usize, f64)> = None;
        for (x, &a) in keys.iter().enumerate() {
            for &b in &keys[x + 1..] {
                let r = pearson(eigengenes[&a].view(), eigengenes[&b].view());
                if r.is_nan() {
                    continue;
                }
                match best {
                    Some((_, _, br)) if br >= r => {}
                    _ => best = Some((a, b, r)),
                }
            }
        }

        let (keep, absorb, r) = match best {
            Some(pair) if pair.2 > threshold => pair,
            _ => break,
        };
        debug!(
            "Merging module {} into {} (eigengene correlation {:.3})",
            absorb, keep, r
        );

        let absorbed = modules.remove(&absorb).unwrap_or_default();
        eigengenes.remove(&absorb);
        let merged = modules.entry(keep).or_default();
        merged.extend(absorbed);
        merged.sort_unstable();
        match eigengene(expr, merged)? {
            Some(e) => {
                eigengenes.insert(keep, e);
            }
            None => {
                eigengenes.remove(&keep);
            }
        }
    }

    Ok(label_by_size(labels.len(), modules.into_values().collect()))
}

/// Correlation of each assigned feature with its module eigengene (kME).
pub fn module_membership(
    expr: &ExpressionMatrix,
    labels: &[usize],
    eigengenes: &BTreeMap<usize, Array1<f64>>,
) -> Vec<Option<f64>> {
    let x = expr.view();
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| {
            eigengenes
                .get(label)
                .map(|e| pearson(x.column(i), e.view()))
                .filter(|r| r.is_finite())
        })
        .collect()
}
