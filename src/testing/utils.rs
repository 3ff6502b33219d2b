/// Distinct group labels in ascending order.
pub fn extract_unique_groups<L: Ord + Clone>(group_ids: &[L]) -> Vec<L> {
    let mut unique_groups = group_ids.to_vec();
    unique_groups.sort();
    unique_groups.dedup();
    unique_groups
}

/// Sample indices carrying `label`.
pub fn group_indices<L: PartialEq>(group_ids: &[L], label: &L) -> Vec<usize> {
    group_ids
        .iter()
        .enumerate()
        .filter_map(|(i, g)| if g == label { Some(i) } else { None })
        .collect()
}

/// Sample indices of the two labels of a two-group labelling.
pub fn get_group_indices<L: PartialEq>(
    group_ids: &[L],
    unique_groups: &[L],
) -> anyhow::Result<(Vec<usize>, Vec<usize>)> {
    if unique_groups.len() != 2 {
        return Err(anyhow::anyhow!(
            "Expected exactly two groups, found {}",
            unique_groups.len()
        ));
    }
    Ok((
        group_indices(group_ids, &unique_groups[0]),
        group_indices(group_ids, &unique_groups[1]),
    ))
}

/// Split samples on `marker` expression: strictly above `threshold`, and the rest.
pub fn marker_split(marker: &[f64], threshold: f64) -> (Vec<usize>, Vec<usize>) {
    (0..marker.len()).partition(|&i| marker[i] > threshold)
}
