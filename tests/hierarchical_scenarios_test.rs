//! End-to-end scenarios for the hierarchical sampler: sample sizes, reproducibility,
//! positivity of the scales, shrinkage and configuration errors.

#[cfg(test)]
mod tests {
    use hier_mcmc::config::Config;
    use hier_mcmc::fit;
    use hier_mcmc::model::ObservationSet;
    use hier_mcmc::summary::variance_ratio_draws;
    use hier_mcmc::Error;

    const SEED: u64 = 42;

    /// Deterministic offsets with mean zero for groups of up to 11 observations.
    const OFFSETS: [f64; 11] = [-0.6, 0.3, -0.3, 0.6, 0.0, -0.15, 0.15, -0.45, 0.45, -0.05, 0.05];

    fn group(obs: &mut ObservationSet, label: &str, center: f64, n: usize, spread: f64) {
        let offsets = &OFFSETS[..n];
        let shift = offsets.iter().sum::<f64>() / n as f64;
        for d in offsets {
            obs.push(label, center + spread * (d - shift));
        }
    }

    /// Eight groups of sizes [7, 7, 7, 7, 1, 7, 7, 11]. The fifth has a single low value.
    fn eight_groups() -> ObservationSet {
        let mut obs = ObservationSet::new();
        let centers = [3.6, 4.0, 3.8, 3.5, 1.0, 4.1, 3.7, 3.9];
        let sizes = [7, 7, 7, 7, 1, 7, 7, 11];
        for (j, (&c, &n)) in centers.iter().zip(&sizes).enumerate() {
            group(&mut obs, &format!("g{}", j + 1), c, n, 1.0);
        }
        obs
    }

    fn mean(values: impl Iterator<Item = f64>) -> f64 {
        let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        sum / n as f64
    }

    #[test]
    fn test_single_observation_group_is_shrunk() {
        let obs = eight_groups();
        let config = Config {
            chains: 2,
            iterations: 20_000,
            warmup: 10_000,
            thin: 10,
            seed: SEED,
            ..Default::default()
        };
        let fit = fit(&obs, &config).unwrap();
        assert_eq!(fit.samples.n_draws(), 2_000);

        let grand = mean(fit.samples.column("mu0").unwrap().iter().copied());
        let mu5 = mean(fit.samples.column("mu[5]").unwrap().iter().copied());
        assert!(
            1.0 < mu5 && mu5 < grand,
            "posterior mean of mu[5] = {mu5}, grand mean = {grand}"
        );

        let g5 = &fit.summary.shrinkage.groups[4];
        assert_eq!(g5.n, 1);
        let pooling = g5.pooling.unwrap();
        assert!(pooling > 0.0 && pooling < 1.0, "pooling = {pooling}");
    }

    #[test]
    fn test_scales_positive_and_ratio_in_unit_interval() {
        for shared_sigma in [true, false] {
            let config = Config {
                chains: 2,
                iterations: 3_000,
                warmup: 1_000,
                shared_sigma,
                seed: SEED,
                ..Default::default()
            };
            let fit = fit(&eight_groups(), &config).unwrap();
            let samples = &fit.samples;
            let draws = samples.draws();
            for (k, name) in samples.param_names().iter().enumerate() {
                if name == "tau" || name.starts_with("sigma") {
                    let column = draws.column(k);
                    assert!(column.iter().all(|&x| x > 0.0), "{name} has a draw <= 0");
                }
            }
            let ratios = variance_ratio_draws(samples).unwrap();
            assert_eq!(ratios.ncols(), if shared_sigma { 1 } else { 8 });
            assert!(ratios.iter().all(|&r| (0.0..1.0).contains(&r)));
        }
    }

    #[test]
    fn test_smaller_groups_shrink_further() {
        let mut obs = ObservationSet::new();
        group(&mut obs, "small", 6.0, 2, 3.0);
        group(&mut obs, "large", 6.0, 11, 3.0);
        group(&mut obs, "low_a", 2.0, 9, 3.0);
        group(&mut obs, "low_b", 2.5, 9, 3.0);
        group(&mut obs, "low_c", 1.5, 9, 3.0);

        let config = Config {
            chains: 4,
            iterations: 6_000,
            warmup: 2_000,
            seed: SEED,
            ..Default::default()
        };
        let fit = fit(&obs, &config).unwrap();
        let groups = &fit.summary.shrinkage.groups;
        let (small, large) = (&groups[0], &groups[1]);
        assert_eq!((small.n, large.n), (2, 11));

        let pull_small = small.sample_mean - small.posterior_mean;
        let pull_large = large.sample_mean - large.posterior_mean;
        assert!(pull_large > 0.0, "large group pulled by {pull_large}");
        assert!(
            pull_small > pull_large,
            "small group pulled by {pull_small}, large by {pull_large}"
        );
    }

    #[test]
    fn test_same_seed_same_draws() {
        let config = Config {
            chains: 3,
            iterations: 1_000,
            warmup: 500,
            thin: 2,
            seed: 7,
            ..Default::default()
        };
        let first = fit(&eight_groups(), &config).unwrap();
        let second = fit(&eight_groups(), &config).unwrap();
        assert_eq!(first.samples.draws(), second.samples.draws());
        assert_eq!(first.samples.chain_ids(), second.samples.chain_ids());

        let other = fit(&eight_groups(), &Config { seed: 8, ..config }).unwrap();
        assert_ne!(first.samples.draws(), other.samples.draws());
    }

    #[test]
    fn test_single_chain_has_no_rhat() {
        let config = Config {
            chains: 1,
            iterations: 2_000,
            warmup: 1_000,
            seed: SEED,
            ..Default::default()
        };
        let fit = fit(&eight_groups(), &config).unwrap();
        assert!(fit.diagnostics.params.iter().all(|p| p.rhat.is_none()));
        assert!(fit.diagnostics.params.iter().all(|p| p.ess.is_some()));
        assert!(fit.diagnostics.max_rhat().is_none());
        assert!(fit.diagnostics.run_stats.as_ref().unwrap().rhat.is_none());
    }

    #[test]
    fn test_group_without_observations_fails_before_sampling() {
        let mut obs = ObservationSet::with_groups(["a", "b", "c"]);
        obs.push("a", 1.0);
        obs.push("b", 2.0);
        match fit(&obs, &Config::default()) {
            Err(Error::Configuration(msg)) => assert!(msg.contains("'c'"), "{msg}"),
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_warmup_equal_to_iterations_is_rejected() {
        let config = Config {
            iterations: 500,
            warmup: 500,
            ..Default::default()
        };
        assert!(matches!(
            fit(&eight_groups(), &config),
            Err(Error::Configuration(_))
        ));
    }
}
