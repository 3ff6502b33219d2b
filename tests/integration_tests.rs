// Integration tests for the single_network crate
// End-to-end checks across network construction, module detection, the
// difference test and sweeps, on seeded synthetic data.

#[cfg(test)]
mod integration_tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{array, concatenate, s, Array1, Array2, Axis};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rand_distr::StandardNormal;
    use single_network::error::NetworkError;
    use single_network::matrix::ExpressionMatrix;
    use single_network::modules::{detect_modules, ModuleConfig, UNASSIGNED};
    use single_network::network::tom::topological_overlap;
    use single_network::network::{build_network, NetworkConfig};
    use single_network::orchestrate::{pairwise_comparisons, run_sweep, ComparisonKey, SweepConfig};
    use single_network::testing::{difference_test, Branch, DifferenceTestConfig};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn normal_matrix(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        Array2::from_shape_simple_fn((rows, cols), || rng.sample(StandardNormal))
    }

    fn standardized(v: Array1<f64>) -> Array1<f64> {
        let n = v.len() as f64;
        let mean = v.sum() / n;
        let centered = v - mean;
        let sd = (centered.dot(&centered) / (n - 1.0)).sqrt();
        centered / sd
    }

    /// Two centered unit-variance profiles with zero sample correlation.
    fn orthogonal_pair(n: usize, seed: u64) -> (Array1<f64>, Array1<f64>) {
        let raw = normal_matrix(n, 2, seed);
        let z = standardized(raw.column(0).to_owned());
        let e = raw.column(1).to_owned();
        let e = &e - &(&z * (e.dot(&z) / z.dot(&z)));
        (z, standardized(e))
    }

    /// Groups that share every feature except `pair`, which has correlation
    /// 0.9 and variance 9 in X but correlation 0 and variance 1 in Y.
    fn correlated_pair_groups(
        n: usize,
        p: usize,
        pair: (usize, usize),
        seed: u64,
    ) -> (ExpressionMatrix, ExpressionMatrix) {
        let shared = normal_matrix(n, p, seed);
        let (z, e) = orthogonal_pair(n, seed + 1000);
        let mut x = shared.clone();
        let mut y = shared;
        x.column_mut(pair.0).assign(&(&z * 3.0));
        x.column_mut(pair.1)
            .assign(&((&z * 0.9 + &e * 0.19_f64.sqrt()) * 3.0));
        y.column_mut(pair.0).assign(&z);
        y.column_mut(pair.1).assign(&e);
        (
            ExpressionMatrix::new(x).unwrap(),
            ExpressionMatrix::new(y).unwrap(),
        )
    }

    #[test]
    fn test_tom_three_feature_chain() {
        let adj = array![[0.0, 1.0, 0.0], [1.0, 0.0, 1.0], [0.0, 1.0, 0.0]];
        let tom = topological_overlap(&adj).unwrap();
        assert_abs_diff_eq!(tom[[0, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tom[[0, 2]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(tom[[0, 0]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_tom_bounds_on_random_network() {
        let expr = ExpressionMatrix::new(normal_matrix(30, 15, 11)).unwrap();
        for power in [1.0, 6.0, 12.0] {
            let net = build_network(&expr, power, &NetworkConfig::default()).unwrap();
            for ((i, j), &w) in net.tom.indexed_iter() {
                assert!((0.0..=1.0).contains(&w), "TOM[{}, {}] = {}", i, j, w);
                assert_abs_diff_eq!(w, net.tom[[j, i]], epsilon = 1e-12);
            }
            for i in 0..15 {
                assert_eq!(net.tom[[i, i]], 1.0);
            }
        }
    }

    #[test]
    fn test_correlated_pair_scenario() {
        init_logger();
        let (x, y) = correlated_pair_groups(20, 10, (0, 1), 7);
        let config = DifferenceTestConfig::new(vec![0.2], 100, 1);
        let result = difference_test(&x, &y, &config).unwrap();

        assert!(result.p_value < 0.05, "p = {}", result.p_value);
        assert!(result.is_significant());
        assert_eq!(result.branch, Branch::Positive);
        assert!(!result.top_features.is_empty());
        assert!(result.top_features.iter().all(|&j| j == 0 || j == 1));
        assert_abs_diff_eq!(result.leverage.sum(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_swapping_groups_keeps_p_value() {
        let x = ExpressionMatrix::new(normal_matrix(15, 8, 21)).unwrap();
        let y_data = normal_matrix(18, 8, 22) * 1.5;
        let y = ExpressionMatrix::new(y_data).unwrap();
        let config = DifferenceTestConfig::new(vec![0.3, 0.7, 1.0], 60, 9);

        let forward = difference_test(&x, &y, &config).unwrap();
        let backward = difference_test(&y, &x, &config).unwrap();

        assert_eq!(forward.p_value, backward.p_value);
        assert_eq!(forward.sparsity, backward.sparsity);
        assert_eq!(forward.statistic, backward.statistic);
        assert_eq!(forward.leverage, backward.leverage);
        assert_eq!(forward.branch, backward.branch.flipped());
        for (f, b) in forward.levels.iter().zip(backward.levels.iter()) {
            assert_eq!(f.p_value, b.p_value);
            assert_eq!(f.branch, b.branch.flipped());
        }
    }

    #[test]
    fn test_serial_and_parallel_runs_match() {
        let (x, y) = correlated_pair_groups(16, 9, (2, 5), 3);
        let config = DifferenceTestConfig::new(vec![0.2, 0.6], 80, 17);

        let serial_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(1)
            .build()
            .unwrap();
        let serial = serial_pool.install(|| difference_test(&x, &y, &config).unwrap());
        let parallel = difference_test(&x, &y, &config).unwrap();
        let again = difference_test(&x, &y, &config).unwrap();

        assert_eq!(serial.p_value, parallel.p_value);
        assert_eq!(serial.sparsity, parallel.sparsity);
        assert_eq!(serial.leverage, parallel.leverage);
        assert_eq!(serial.levels, parallel.levels);
        assert_eq!(parallel.levels, again.levels);
        assert_eq!(parallel.vector, again.vector);
    }

    #[test]
    fn test_leverage_concentrates_on_changed_features() {
        let (x, y) = correlated_pair_groups(40, 10, (3, 7), 5);
        let config = DifferenceTestConfig::new(vec![0.5], 20, 2);
        let result = difference_test(&x, &y, &config).unwrap();

        assert!(result.leverage[3] + result.leverage[7] > 0.9);
        let mut leading = result.top_features[..2].to_vec();
        leading.sort_unstable();
        assert_eq!(leading, vec![3, 7]);
    }

    #[test]
    fn test_null_p_values_are_calibrated() {
        let config = DifferenceTestConfig::new(vec![1.0], 50, 4);
        let p_values: Vec<f64> = (0..40)
            .map(|k| {
                let x = ExpressionMatrix::new(normal_matrix(15, 5, 100 + 2 * k)).unwrap();
                let y = ExpressionMatrix::new(normal_matrix(15, 5, 101 + 2 * k)).unwrap();
                difference_test(&x, &y, &config).unwrap().p_value
            })
            .collect();

        let mean = p_values.iter().sum::<f64>() / p_values.len() as f64;
        assert!((mean - 0.5).abs() < 0.15, "mean null p-value {}", mean);
        let rejections = p_values.iter().filter(|&&p| p < 0.05).count();
        assert!(rejections <= 8, "{} of 40 null tests rejected", rejections);
    }

    #[test]
    fn test_modules_partition_features() {
        init_logger();
        let n = 40;
        let block = 25;
        let latent = normal_matrix(n, 3, 31);
        let noise = normal_matrix(n, 3 * block, 32);
        let data = Array2::from_shape_fn((n, 3 * block), |(i, j)| {
            0.9 * latent[[i, j / block]] + 0.35 * noise[[i, j]]
        });
        let expr = ExpressionMatrix::new(data).unwrap();
        let network = build_network(&expr, 6.0, &NetworkConfig::default()).unwrap();
        let config = ModuleConfig {
            min_cluster_size: 10,
            ..ModuleConfig::default()
        };
        let modules = detect_modules(&expr, &network, &config).unwrap();

        assert_eq!(modules.labels.len(), 3 * block);
        let k = modules.n_modules();
        assert!(k >= 1 && k <= 3, "{} modules", k);
        assert!(modules.labels.iter().all(|&l| l <= k));

        let sizes = modules.module_sizes();
        let mut previous = usize::MAX;
        for label in 1..=k {
            let members = modules.members(label);
            assert!(members.len() >= config.min_cluster_size);
            assert!(members.len() <= previous);
            previous = members.len();
            assert_eq!(sizes[&label], members.len());
            let home = members[0] / block;
            assert!(members.iter().all(|&j| j / block == home));
            assert!(modules.eigengenes.contains_key(&label));
        }
        for (j, &label) in modules.labels.iter().enumerate() {
            assert_eq!(modules.membership[j].is_some(), label != UNASSIGNED);
        }
    }

    /// Two blocks of 30 features; each block holds two sub-programs of 15
    /// that share the block factor.
    fn nested_programs() -> ExpressionMatrix {
        let n = 50;
        let blocks = normal_matrix(n, 2, 51);
        let programs = normal_matrix(n, 4, 52);
        let noise = normal_matrix(n, 60, 53);
        let data = Array2::from_shape_fn((n, 60), |(i, j)| {
            0.9 * blocks[[i, j / 30]] + 0.25 * programs[[i, j / 15]] + 0.3 * noise[[i, j]]
        });
        ExpressionMatrix::new(data).unwrap()
    }

    fn distinct_modules(labels: &[usize]) -> usize {
        let mut seen: Vec<usize> = labels.iter().copied().filter(|&l| l != UNASSIGNED).collect();
        seen.sort_unstable();
        seen.dedup();
        seen.len()
    }

    #[test]
    fn test_deep_split_refines_modules() {
        let expr = nested_programs();
        let network = build_network(&expr, 6.0, &NetworkConfig::default()).unwrap();
        let counts: Vec<usize> = (0..=4u8)
            .map(|deep_split| {
                let config = ModuleConfig {
                    min_cluster_size: 5,
                    deep_split,
                    merge_threshold: 1.0,
                    cut_height: None,
                };
                let modules = detect_modules(&expr, &network, &config).unwrap();
                distinct_modules(&modules.unmerged_labels)
            })
            .collect();

        for pair in counts.windows(2) {
            assert!(pair[1] >= pair[0], "module counts by deep_split: {:?}", counts);
        }
        assert!(counts[0] >= 1);
        assert!(counts[4] > counts[0], "module counts by deep_split: {:?}", counts);
    }

    #[test]
    fn test_modules_stable_across_runs() {
        let expr = nested_programs();
        let config = ModuleConfig {
            min_cluster_size: 5,
            ..ModuleConfig::default()
        };
        let first_network = build_network(&expr, 6.0, &NetworkConfig::default()).unwrap();
        let second_network = build_network(&expr, 6.0, &NetworkConfig::default()).unwrap();
        let first = detect_modules(&expr, &first_network, &config).unwrap();
        let second = detect_modules(&expr, &second_network, &config).unwrap();

        assert_eq!(first.labels, second.labels);
        assert_eq!(first.unmerged_labels, second.unmerged_labels);
        assert_eq!(first.membership, second.membership);
    }

    #[test]
    fn test_sweep_isolates_failing_comparisons() {
        init_logger();
        let a = normal_matrix(10, 4, 41);
        let b = normal_matrix(10, 4, 42);
        let c = normal_matrix(1, 4, 43);
        let data = concatenate(Axis(0), &[a.view(), b.view(), c.view()]).unwrap();
        let expr = ExpressionMatrix::new(data).unwrap();
        let mut labels = vec!["a"; 10];
        labels.extend(vec!["b"; 10]);
        labels.push("c");

        let plan = pairwise_comparisons(&labels);
        let config = SweepConfig::new(DifferenceTestConfig::new(vec![0.5], 20, 1));
        let table = run_sweep(&expr, &plan, &config).unwrap();

        assert_eq!(table.len(), 3);
        let ab = &table[&ComparisonKey::Pair("a".into(), "b".into())];
        let outcome = ab.as_ref().unwrap();
        assert_eq!((outcome.n_a, outcome.n_b), (10, 10));
        assert!(outcome.network.is_none());
        assert!(matches!(
            table[&ComparisonKey::Pair("a".into(), "c".into())],
            Err(NetworkError::InputShape { .. })
        ));
        assert!(table[&ComparisonKey::Pair("b".into(), "c".into())].is_err());

        // The sweep result for a pair equals a standalone test of that pair.
        let direct = difference_test(
            &ExpressionMatrix::new(a.clone()).unwrap(),
            &ExpressionMatrix::new(b.clone()).unwrap(),
            &config.test,
        )
        .unwrap();
        assert_eq!(outcome.test.p_value, direct.p_value);
        assert_eq!(outcome.test.leverage, direct.leverage);
        assert_eq!(expr.view().slice(s![..10, ..]), a.view());
    }
}
