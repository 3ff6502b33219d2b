use nalgebra_sparse::{CooMatrix, CsrMatrix};
use ndarray::Array2;
use single_network::matrix::ExpressionMatrix;
use single_network::modules::ModuleConfig;
use single_network::network::threshold::{ThresholdConfig, DEFAULT_POWER};
use single_network::network::{NetworkConfig, NetworkType};
use single_network::orchestrate::NetworkPipelineConfig;
use single_network::testing::{DifferenceMatrix, DifferenceTestConfig};
use single_network::{CoexpressionOps, NetworkError};

/// Deterministic cells x genes counts: genes 0-2 follow one program,
/// genes 3-5 another, and genes 6-7 are sparse noise.
fn counts(n_cells: usize) -> Vec<(usize, usize, f64)> {
    let mut triplets = Vec::new();
    for cell in 0..n_cells {
        let a = (cell % 7) as f64;
        let b = ((cell * 3) % 5) as f64;
        for gene in 0..3 {
            triplets.push((cell, gene, 1.0 + a * (1.0 + 0.1 * gene as f64) + ((cell + gene) % 2) as f64 * 0.2));
        }
        for gene in 3..6 {
            let v = b * (1.0 + 0.2 * gene as f64) + ((cell * gene) % 3) as f64 * 0.1;
            if v > 0.0 {
                triplets.push((cell, gene, v));
            }
        }
        if cell % 3 == 0 {
            triplets.push((cell, 6, 1.0 + (cell % 4) as f64));
        }
        if cell % 4 == 1 {
            triplets.push((cell, 7, 2.0 + (cell % 5) as f64));
        }
    }
    triplets
}

fn csr(n_cells: usize) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(n_cells, 8);
    for (row, col, value) in counts(n_cells) {
        coo.push(row, col, value);
    }
    CsrMatrix::from(&coo)
}

fn dense(n_cells: usize) -> Array2<f32> {
    let mut data = Array2::<f32>::zeros((n_cells, 8));
    for (row, col, value) in counts(n_cells) {
        data[[row, col]] = value as f32;
    }
    data
}

#[cfg(test)]
mod ops_tests {
    use super::*;

    #[test]
    fn check_sparse_and_dense_inputs_agree() {
        let from_csr = csr(30).to_expression_matrix().unwrap();
        let from_dense = CoexpressionOps::<f32>::to_expression_matrix(&dense(30)).unwrap();
        assert_eq!(from_csr.n_samples(), 30);
        assert_eq!(from_csr.n_features(), 8);
        for (a, b) in from_csr.view().iter().zip(from_dense.view().iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn check_network_from_sparse_matrix() {
        let network = csr(30)
            .coexpression_network(6.0, &NetworkConfig::default())
            .unwrap();
        assert_eq!(network.n_features(), 8);
        assert!(network.missing.is_empty());
        // Genes of the same program overlap more than genes of different programs.
        assert!(network.tom[[0, 1]] > network.tom[[0, 4]]);
        assert!(network.tom[[3, 4]] > network.tom[[2, 3]]);
    }

    #[test]
    fn check_signed_network_drops_negative_edges() {
        let config = NetworkConfig {
            network_type: NetworkType::Signed,
            ..NetworkConfig::default()
        };
        let network = csr(30).coexpression_network(2.0, &config).unwrap();
        assert!(network.adjacency.iter().all(|&a| (0.0..=1.0).contains(&a)));

        // Gene 1 mirrors gene 0, gene 2 follows it.
        let data = Array2::from_shape_fn((12, 3), |(i, j)| {
            let base = ((i * 5) % 7) as f64 + 0.1 * i as f64;
            match j {
                0 => base,
                1 => 10.0 - base,
                _ => 2.0 * base + ((i % 3) as f64) * 0.05,
            }
        });
        let signed = data.coexpression_network(2.0, &config).unwrap();
        let unsigned = data
            .coexpression_network(2.0, &NetworkConfig::default())
            .unwrap();
        assert!(signed.adjacency[[0, 1]] < 1e-12);
        assert!(signed.adjacency[[0, 2]] > 0.9);
        assert!(unsigned.adjacency[[0, 1]] > 1.0 - 1e-9);
    }

    #[test]
    fn check_soft_threshold_respects_feature_ceiling() {
        let config = ThresholdConfig {
            max_features: 4,
            ..ThresholdConfig::default()
        };
        assert!(csr(30).soft_threshold(&config).is_err());
        assert!(csr(30)
            .soft_threshold(&ThresholdConfig {
                max_features: 8,
                ..ThresholdConfig::default()
            })
            .is_ok());
    }

    #[test]
    fn check_soft_threshold_returns_full_fit_table() {
        let selection = csr(30).soft_threshold(&ThresholdConfig::default()).unwrap();
        assert_eq!(selection.fits.len(), 15);
        assert!(selection.power >= 1.0);
        match &selection.warning {
            None => {
                let chosen = selection
                    .fits
                    .iter()
                    .find(|f| f.power == selection.power)
                    .unwrap();
                assert!(chosen.r_squared.unwrap() > 0.85);
            }
            Some(warning) => {
                assert_eq!(warning.fallback_power, selection.power);
                assert!(
                    selection.fits.iter().any(|f| f.power == selection.power)
                        || selection.power == DEFAULT_POWER
                );
            }
        }
    }

    #[test]
    fn check_modules_from_dense_matrix() {
        let config = ModuleConfig {
            min_cluster_size: 3,
            ..ModuleConfig::default()
        };
        let modules = dense(40)
            .coexpression_modules(6.0, &NetworkConfig::default(), &config)
            .unwrap();
        assert_eq!(modules.labels.len(), 8);
        for label in 1..=modules.n_modules() {
            assert!(modules.members(label).len() >= 3);
        }
    }

    #[test]
    fn check_pipeline_runs_end_to_end() {
        let config = NetworkPipelineConfig {
            modules: ModuleConfig {
                min_cluster_size: 3,
                ..ModuleConfig::default()
            },
            ..NetworkPipelineConfig::default()
        };
        let outcome = csr(40).network_pipeline(&config).unwrap();
        assert_eq!(outcome.modules.labels.len(), 8);
        assert_eq!(outcome.selection.fits.len(), 15);
    }

    #[test]
    fn check_two_group_difference_test() {
        let groups: Vec<usize> = (0..30).map(|i| i / 15).collect();
        let config = DifferenceTestConfig::new(vec![0.4, 1.0], 30, 8);
        let result = csr(30)
            .differential_coexpression_by_groups(&groups, &config)
            .unwrap();
        assert!(result.p_value >= 0.0 && result.p_value <= 1.0);
        assert_eq!(result.levels.len(), 2);
        assert_eq!(result.leverage.len(), 8);
    }

    #[test]
    fn check_difference_test_flags_silent_gene() {
        // Gene 7 is only expressed in odd cells.
        let groups: Vec<usize> = (0..30).map(|i| i % 2).collect();
        let mut config = DifferenceTestConfig::new(vec![0.5], 20, 8);
        let err = csr(30)
            .differential_coexpression_by_groups(&groups, &config)
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NetworkError>(),
            Some(NetworkError::DegenerateFeature { .. })
        ));

        config.allow_missing = true;
        let result = csr(30)
            .differential_coexpression_by_groups(&groups, &config)
            .unwrap();
        assert_eq!(result.leverage.len(), 8);
    }

    #[test]
    fn check_difference_test_needs_two_groups() {
        let groups: Vec<usize> = (0..30).map(|i| i % 3).collect();
        let config = DifferenceTestConfig::new(vec![0.5], 10, 1);
        assert!(csr(30)
            .differential_coexpression_by_groups(&groups, &config)
            .is_err());
    }

    #[test]
    fn check_adjacency_difference_kind() {
        let mut config = DifferenceTestConfig::new(vec![0.5], 20, 3);
        config.difference_matrix = DifferenceMatrix::Adjacency { power: 2.0 };
        let first: Vec<usize> = (0..20).collect();
        let second: Vec<usize> = (20..40).collect();
        let result = csr(40)
            .differential_coexpression(&first, &second, &config)
            .unwrap();
        assert!(result.statistic.is_finite());
        assert!(result.p_value <= 1.0);
    }

    #[test]
    fn check_named_top_features() {
        let names: Vec<String> = (0..8).map(|g| format!("gene{}", g)).collect();
        let expr = ExpressionMatrix::from_csr(&csr(30))
            .unwrap()
            .with_feature_names(names)
            .unwrap();
        let x = expr.select_samples(&(0..15).collect::<Vec<_>>()).unwrap();
        let y = expr.select_samples(&(15..30).collect::<Vec<_>>()).unwrap();
        let config = DifferenceTestConfig::new(vec![0.3], 10, 2);
        let result = single_network::testing::difference_test(&x, &y, &config).unwrap();
        let labels = result.top_feature_labels(&x);
        assert_eq!(labels.len(), result.top_features.len());
        assert!(labels.iter().all(|l| l.starts_with("gene")));
    }
}
