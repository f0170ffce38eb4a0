//! Chains started far apart on a well-identified model must agree after warmup.

#[cfg(test)]
mod tests {
    use hier_mcmc::config::Config;
    use hier_mcmc::core::{CancelToken, ChainStatus, InitStrategy, Sampler};
    use hier_mcmc::gibbs::Draw;
    use hier_mcmc::model::{ModelSpec, ObservationSet};
    use hier_mcmc::stats::{autocorrelations, diagnose, trace_summary, ConvergenceWarning};
    use std::time::Duration;

    const SEED: u64 = 42;
    const ITERATIONS: usize = 6_000;
    const WARMUP: usize = 3_000;

    /// Four groups of fifteen observations with means 0, 5, 10 and 15.
    fn separated_groups() -> ModelSpec {
        let mut obs = ObservationSet::new();
        for (j, center) in [0.0, 5.0, 10.0, 15.0].into_iter().enumerate() {
            for i in 0..15 {
                // Symmetric offsets in [-1.4, 1.4].
                let offset = (i as f64 - 7.0) * 0.2;
                obs.push(format!("group_{j}"), center + offset);
            }
        }
        ModelSpec::build(&obs, true).unwrap()
    }

    fn divergent_starts() -> Vec<Draw> {
        let start = |loc: f64, scale: f64| Draw {
            mu: vec![loc; 4],
            mu0: loc,
            tau: scale,
            sigma: vec![scale],
        };
        vec![
            start(-50.0, 0.01),
            start(50.0, 100.0),
            start(0.0, 0.05),
            start(100.0, 20.0),
        ]
    }

    fn config() -> Config {
        Config {
            chains: 4,
            iterations: ITERATIONS,
            warmup: WARMUP,
            seed: SEED,
            ..Default::default()
        }
    }

    #[test]
    fn test_divergent_starts_converge() {
        let model = separated_groups();
        let config = config();
        let samples = Sampler::new(&model, &config)
            .unwrap()
            .init(InitStrategy::Fixed(divergent_starts()))
            .run()
            .unwrap();
        assert_eq!(samples.n_draws(), 4 * (ITERATIONS - WARMUP));

        let report = diagnose(&samples, &config.diagnostics);
        for p in &report.params {
            let rhat = p.rhat.unwrap();
            assert!(rhat < 1.1, "R-hat of {} is {rhat}", p.name);
        }
        assert!(report.max_rhat().unwrap() < 1.1);
        assert!(!report
            .warnings
            .iter()
            .any(|w| matches!(w, ConvergenceWarning::HighRhat { .. })));

        // Group means are pinned by fifteen observations each.
        for (j, center) in [0.0, 5.0, 10.0, 15.0].into_iter().enumerate() {
            let p = report.get(&format!("mu[{}]", j + 1)).unwrap();
            assert!((p.mean - center).abs() < 0.3, "mu[{}] = {}", j + 1, p.mean);
        }
    }

    #[test]
    fn test_trace_and_autocorrelation_per_chain() {
        let model = separated_groups();
        let samples = Sampler::new(&model, &config()).unwrap().run().unwrap();

        let traces = trace_summary(&samples, "sigma").unwrap();
        assert_eq!(traces.len(), 4);
        for t in &traces {
            assert!(t.min > 0.0 && t.min <= t.median && t.median <= t.max);
        }

        let acf = autocorrelations(&samples, "mu[1]", 20).unwrap();
        assert_eq!(acf.len(), 4);
        for chain in &acf {
            assert_eq!(chain.len(), 21);
            assert!((chain[0] - 1.0).abs() < 1e-9);
            assert!(chain.iter().all(|r| r.abs() <= 1.0 + 1e-9));
        }
    }

    #[test]
    fn test_short_run_is_flagged() {
        let model = separated_groups();
        let config = Config {
            chains: 2,
            iterations: 20,
            warmup: 10,
            seed: SEED,
            ..Default::default()
        };
        let samples = Sampler::new(&model, &config).unwrap().run().unwrap();
        let report = diagnose(&samples, &config.diagnostics);
        assert!(report
            .warnings
            .iter()
            .any(|w| matches!(w, ConvergenceWarning::TooFewDraws { draws: 10, .. })));
    }

    #[test]
    fn test_cancellation_is_reported() {
        let model = separated_groups();
        let token = CancelToken::new();
        token.cancel();
        let result = Sampler::new(&model, &config())
            .unwrap()
            .cancel_token(token)
            .run();
        assert!(matches!(result, Err(hier_mcmc::Error::Cancelled(_))));

        let result = Sampler::new(&model, &config())
            .unwrap()
            .time_budget(Duration::ZERO)
            .run();
        match result {
            Err(hier_mcmc::Error::Cancelled(msg)) => assert!(msg.contains("warmup"), "{msg}"),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[test]
    fn test_completed_chains_have_reports() {
        let model = separated_groups();
        let samples = Sampler::new(&model, &config()).unwrap().run().unwrap();
        for (c, report) in samples.chains().iter().enumerate() {
            assert_eq!(report.chain, c);
            assert_eq!(report.status, ChainStatus::Completed);
            assert_eq!(report.iterations, ITERATIONS);
            assert_eq!(report.retained, ITERATIONS - WARMUP);
            let rate = report.acceptance.tau.acceptance_rate();
            assert!(rate > 0.1 && rate < 0.9, "tau acceptance {rate}");
        }
    }
}
