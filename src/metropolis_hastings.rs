/*!
# Log-Scale Random-Walk Metropolis Step.

Scale parameters have no closed-form full conditional under a half-Cauchy prior, so the
Gibbs sweep updates them with a Metropolis step on `eta = ln(x)`:

- propose `eta' = eta + step * z` with `z ~ Normal(0, 1)` (symmetric in `eta`),
- accept if `ln(u) < [logp(x') + eta'] - [logp(x) + eta]`, where the `+ eta` terms are the
  Jacobian of the log transform.

Every proposal is positive by construction. A proposal whose log density is `NaN` or
`+inf`, or whose value overflows, is rejected unconditionally and counted, never raised.

[`AdaptiveScale`] tunes `step` in batches toward a target acceptance rate. The chain manager
only enables adaptation during warmup, so retained draws come from a fixed kernel.
*/

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::distributions::Target;

/// Result of one Metropolis step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Accepted,
    Rejected,
    /// The proposal evaluated to a non-finite value and was rejected.
    NonFinite,
}

/**
Performs one random-walk Metropolis update of a positive scalar on the log scale.

Returns the new value (the current one unless accepted) and the outcome.

```rust
use hier_mcmc::distributions::{HalfCauchy, Normalized, Target};
use hier_mcmc::metropolis_hastings::{log_scale_step, StepOutcome};
use rand::rngs::SmallRng;
use rand::SeedableRng;

struct Prior(HalfCauchy);
impl Target for Prior {
    fn unnorm_logp(&self, x: f64) -> f64 {
        self.0.logp(x)
    }
}

let target = Prior(HalfCauchy::new(1.0).unwrap());
let mut rng = SmallRng::seed_from_u64(42);
let (x, outcome) = log_scale_step(&target, 1.0, 0.5, &mut rng);
assert!(x > 0.0);
assert_ne!(outcome, StepOutcome::NonFinite);
```
*/
pub fn log_scale_step<T, R>(target: &T, current: f64, step: f64, rng: &mut R) -> (f64, StepOutcome)
where
    T: Target + ?Sized,
    R: Rng,
{
    let eta = current.ln();
    let z: f64 = rng.sample(StandardNormal);
    let eta_prop = eta + step * z;
    let proposed = eta_prop.exp();
    if !(proposed.is_finite() && proposed > 0.0) {
        return (current, StepOutcome::NonFinite);
    }

    let proposed_lp = target.unnorm_logp(proposed);
    if proposed_lp == f64::NEG_INFINITY {
        return (current, StepOutcome::Rejected);
    }
    if !proposed_lp.is_finite() {
        return (current, StepOutcome::NonFinite);
    }

    let current_lp = target.unnorm_logp(current);
    let log_accept_ratio = (proposed_lp + eta_prop) - (current_lp + eta);
    if log_accept_ratio.is_nan() {
        return (current, StepOutcome::NonFinite);
    }
    let u: f64 = rng.random();
    if log_accept_ratio > u.ln() {
        (proposed, StepOutcome::Accepted)
    } else {
        (current, StepOutcome::Rejected)
    }
}

/// Tuning of the random-walk proposals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProposalTuning {
    /// Initial proposal standard deviation on the log scale.
    pub initial_step: f64,
    /// Adapt the step during warmup.
    pub adapt: bool,
    /// Acceptance rate the adaptation aims for.
    pub target_accept: f64,
    /// Iterations per adaptation batch.
    pub batch_size: usize,
}

impl Default for ProposalTuning {
    fn default() -> Self {
        Self {
            initial_step: 0.5,
            adapt: true,
            // Optimal rate for one-dimensional random-walk updates.
            target_accept: 0.44,
            batch_size: 50,
        }
    }
}

const MIN_STEP: f64 = 1e-4;
const MAX_STEP: f64 = 10.0;

/// Batch-wise adaptive proposal scale for one Metropolis block.
///
/// After every `batch_size` proposals the step is multiplied by `exp(+delta)` if the batch
/// acceptance rate exceeded the target and by `exp(-delta)` otherwise, with
/// `delta = min(0.25, 1 / sqrt(batch))`.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveScale {
    step: f64,
    target_accept: f64,
    batch_size: usize,
    batch_accepted: usize,
    batch_proposed: usize,
    n_batches: usize,
}

impl AdaptiveScale {
    pub fn new(tuning: &ProposalTuning) -> Self {
        Self {
            step: tuning.initial_step.clamp(MIN_STEP, MAX_STEP),
            target_accept: tuning.target_accept,
            batch_size: tuning.batch_size.max(1),
            batch_accepted: 0,
            batch_proposed: 0,
            n_batches: 0,
        }
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Records an outcome. When `adapt` is true and the batch is full, updates the step.
    pub fn record(&mut self, outcome: StepOutcome, adapt: bool) {
        if !adapt {
            return;
        }
        self.batch_proposed += 1;
        if outcome == StepOutcome::Accepted {
            self.batch_accepted += 1;
        }
        if self.batch_proposed < self.batch_size {
            return;
        }
        self.n_batches += 1;
        let rate = self.batch_accepted as f64 / self.batch_proposed as f64;
        let delta = (1.0 / (self.n_batches as f64).sqrt()).min(0.25);
        let factor = if rate > self.target_accept {
            delta.exp()
        } else {
            (-delta).exp()
        };
        self.step = (self.step * factor).clamp(MIN_STEP, MAX_STEP);
        self.batch_accepted = 0;
        self.batch_proposed = 0;
    }
}

/// Counters of one Metropolis block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub proposed: u64,
    pub accepted: u64,
    pub non_finite: u64,
}

impl BlockStats {
    pub fn record(&mut self, outcome: StepOutcome) {
        self.proposed += 1;
        match outcome {
            StepOutcome::Accepted => self.accepted += 1,
            StepOutcome::NonFinite => self.non_finite += 1,
            StepOutcome::Rejected => {}
        }
    }

    /// Fraction of accepted proposals, `NaN` before the first proposal.
    pub fn acceptance_rate(&self) -> f64 {
        self.accepted as f64 / self.proposed as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Gamma, Normalized};
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    struct GammaTarget(Gamma);

    impl Target for GammaTarget {
        fn unnorm_logp(&self, x: f64) -> f64 {
            self.0.logp(x)
        }
    }

    struct NanTarget;

    impl Target for NanTarget {
        fn unnorm_logp(&self, x: f64) -> f64 {
            if x == 1.0 {
                0.0
            } else {
                f64::NAN
            }
        }
    }

    struct OverflowTarget;

    impl Target for OverflowTarget {
        fn unnorm_logp(&self, _x: f64) -> f64 {
            f64::INFINITY
        }
    }

    fn run_chain<T: Target>(target: &T, start: f64, n: usize, step: f64, seed: u64) -> Vec<f64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut x = start;
        (0..n)
            .map(|_| {
                x = log_scale_step(target, x, step, &mut rng).0;
                x
            })
            .collect()
    }

    #[test]
    fn samples_gamma_target() {
        // Gamma(4, 2): mean 2, variance 1.
        let target = GammaTarget(Gamma::new(4.0, 2.0).unwrap());
        let draws = run_chain(&target, 1.0, 60_000, 0.6, 42);
        let kept = &draws[5_000..];
        let mean = kept.iter().sum::<f64>() / kept.len() as f64;
        let var = kept.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / kept.len() as f64;
        assert!((mean - 2.0).abs() < 0.08, "mean = {mean}");
        assert!((var - 1.0).abs() < 0.15, "var = {var}");
        assert!(kept.iter().all(|&x| x > 0.0));
    }

    #[test]
    fn nan_density_is_rejected_not_propagated() {
        let mut rng = SmallRng::seed_from_u64(1);
        for _ in 0..100 {
            let (x, outcome) = log_scale_step(&NanTarget, 1.0, 0.5, &mut rng);
            assert_eq!(x, 1.0);
            assert_eq!(outcome, StepOutcome::NonFinite);
        }
    }

    #[test]
    fn infinite_density_is_rejected() {
        let mut rng = SmallRng::seed_from_u64(1);
        let (x, outcome) = log_scale_step(&OverflowTarget, 2.0, 0.5, &mut rng);
        assert_eq!(x, 2.0);
        assert_eq!(outcome, StepOutcome::NonFinite);
    }

    #[test]
    fn overflowing_proposal_is_rejected() {
        let target = GammaTarget(Gamma::new(2.0, 1.0).unwrap());
        let mut rng = SmallRng::seed_from_u64(5);
        let (x, outcome) = log_scale_step(&target, 1e300, 1e6, &mut rng);
        assert!(x > 0.0);
        if outcome != StepOutcome::Accepted {
            assert_eq!(x, 1e300);
        }
    }

    #[test]
    fn adaptation_moves_step_toward_target_rate() {
        let tuning = ProposalTuning {
            initial_step: 0.01,
            ..Default::default()
        };
        let mut scale = AdaptiveScale::new(&tuning);
        let target = GammaTarget(Gamma::new(4.0, 2.0).unwrap());
        let mut rng = SmallRng::seed_from_u64(11);
        let mut x = 2.0;
        for _ in 0..5_000 {
            let (next, outcome) = log_scale_step(&target, x, scale.step(), &mut rng);
            x = next;
            scale.record(outcome, true);
        }
        // A tiny step accepts almost everything, so adaptation must have grown it.
        assert!(scale.step() > 0.2, "step = {}", scale.step());
    }

    #[test]
    fn frozen_scale_does_not_change() {
        let mut scale = AdaptiveScale::new(&ProposalTuning::default());
        let before = scale.step();
        for _ in 0..1_000 {
            scale.record(StepOutcome::Accepted, false);
        }
        assert_eq!(scale.step(), before);
    }

    #[test]
    fn block_stats_count_outcomes() {
        let mut stats = BlockStats::default();
        stats.record(StepOutcome::Accepted);
        stats.record(StepOutcome::Rejected);
        stats.record(StepOutcome::NonFinite);
        stats.record(StepOutcome::Accepted);
        assert_eq!(stats.proposed, 4);
        assert_eq!(stats.accepted, 2);
        assert_eq!(stats.non_finite, 1);
        assert_eq!(stats.acceptance_rate(), 0.5);
    }
}
