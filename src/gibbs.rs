/*!
# Metropolis-within-Gibbs Kernel.

This module implements one chain of the sampler. [`GibbsKernel`] owns the joint state
`(mu[1..J], mu0, tau, sigma)` and its random number generator, and advances the state one
Gibbs sweep at a time:

- `mu[j] | rest`: conjugate Normal-Normal update, the precision-weighted average of the
  group mean (weight `n_j / sigma_j^2`) and `mu0` (weight `1 / tau^2`),
- `mu0 | rest`: conjugate update treating the `mu[j]` as observations of `mu0` with scale `tau`,
- `tau | rest`: log-scale random-walk Metropolis (see [`crate::metropolis_hastings`]),
- `sigma | rest`: the same Metropolis step, once per residual scale.

The kernel is a small state machine, see [`KernelStatus`].
*/

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::distributions::{Normalized, Sample, ScalePrior, Target};
use crate::error::{Error, Result};
use crate::metropolis_hastings::{log_scale_step, AdaptiveScale, BlockStats, ProposalTuning};
use crate::model::{GroupStats, ModelSpec};

/// One realized assignment of every model parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Draw {
    /// Group means, one per group.
    pub mu: Vec<f64>,
    /// Grand mean.
    pub mu0: f64,
    /// Between-group standard deviation.
    pub tau: f64,
    /// Residual standard deviations: one entry when shared, one per group otherwise.
    pub sigma: Vec<f64>,
}

impl Draw {
    /// Flattens the draw into the column order of [`ModelSpec::parameter_names`].
    pub fn to_row(&self) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.mu.len() + 2 + self.sigma.len());
        row.extend_from_slice(&self.mu);
        row.push(self.mu0);
        row.push(self.tau);
        row.extend_from_slice(&self.sigma);
        row
    }

    /// Inverse of [`Draw::to_row`] for a model with `n_groups` groups.
    pub fn from_row(row: &[f64], n_groups: usize) -> Self {
        Self {
            mu: row[..n_groups].to_vec(),
            mu0: row[n_groups],
            tau: row[n_groups + 1],
            sigma: row[n_groups + 2..].to_vec(),
        }
    }

    /// Checks that the draw fits `model` and every value is finite, with positive scales.
    pub fn validate(&self, model: &ModelSpec) -> Result<()> {
        if self.mu.len() != model.n_groups() || self.sigma.len() != model.n_sigma() {
            return Err(Error::Configuration(format!(
                "initial state has {} group means and {} residual scales, model needs {} and {}",
                self.mu.len(),
                self.sigma.len(),
                model.n_groups(),
                model.n_sigma()
            )));
        }
        if !self.mu.iter().all(|m| m.is_finite()) || !self.mu0.is_finite() {
            return Err(Error::Configuration(
                "initial state has a non-finite location".to_string(),
            ));
        }
        let positive = |s: f64| s.is_finite() && s > 0.0;
        if !positive(self.tau) || !self.sigma.iter().all(|&s| positive(s)) {
            return Err(Error::Configuration(
                "initial state scales must be finite and > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lifecycle of a [`GibbsKernel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelStatus {
    /// No state yet. The first [`GibbsKernel::step`] draws one from the priors.
    Uninitialized,
    /// Producing draws.
    Running,
    /// Terminal. Further steps return the last draw without sampling.
    Stopped,
}

/// Acceptance counters of the Metropolis blocks plus rejected conjugate updates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcceptanceStats {
    pub tau: BlockStats,
    /// One entry per residual scale.
    pub sigma: Vec<BlockStats>,
    /// Conjugate updates skipped because the closed form was not finite.
    pub conjugate_non_finite: u64,
}

impl AcceptanceStats {
    /// Total number of proposals discarded as numerically unstable.
    pub fn non_finite(&self) -> u64 {
        self.tau.non_finite
            + self.sigma.iter().map(|s| s.non_finite).sum::<u64>()
            + self.conjugate_non_finite
    }
}

/// Full conditional of `tau`: `prod_j Normal(mu[j] | mu0, tau) * prior(tau)`.
struct TauConditional<'a> {
    mu: &'a [f64],
    mu0: f64,
    prior: &'a ScalePrior,
}

impl Target for TauConditional<'_> {
    fn unnorm_logp(&self, tau: f64) -> f64 {
        let ss: f64 = self.mu.iter().map(|m| (m - self.mu0).powi(2)).sum();
        -(self.mu.len() as f64) * tau.ln() - 0.5 * ss / (tau * tau) + self.prior.logp(tau)
    }
}

/// Full conditional of one residual scale over the groups that share it.
struct SigmaConditional<'a> {
    groups: &'a [GroupStats],
    mu: &'a [f64],
    prior: &'a ScalePrior,
}

impl Target for SigmaConditional<'_> {
    fn unnorm_logp(&self, sigma: f64) -> f64 {
        let (n, ss) = self
            .groups
            .iter()
            .zip(self.mu)
            .fold((0.0, 0.0), |(n, ss), (g, &m)| {
                (n + g.n as f64, ss + g.sum_sq_about(m))
            });
        -n * sigma.ln() - 0.5 * ss / (sigma * sigma) + self.prior.logp(sigma)
    }
}

/**
A single Metropolis-within-Gibbs chain for a hierarchical normal model.

# Example

```rust
use hier_mcmc::gibbs::{GibbsKernel, KernelStatus};
use hier_mcmc::model::{ModelSpec, ObservationSet};

let obs = ObservationSet::from_records([("a", 1.0), ("a", 1.4), ("b", 3.0), ("b", 2.6)]);
let model = ModelSpec::build(&obs, true).unwrap();

let mut kernel = GibbsKernel::new(&model, 42);
assert_eq!(kernel.status(), KernelStatus::Uninitialized);

let draw = kernel.step().unwrap().clone();
assert_eq!(kernel.status(), KernelStatus::Running);
assert!(draw.tau > 0.0 && draw.sigma[0] > 0.0);

kernel.stop();
assert_eq!(kernel.step(), Some(&draw));
```
*/
#[derive(Debug, Clone)]
pub struct GibbsKernel<'m> {
    model: &'m ModelSpec,
    state: Option<Draw>,
    status: KernelStatus,
    /// The random seed used for reproducibility.
    seed: u64,
    rng: SmallRng,
    tau_scale: AdaptiveScale,
    sigma_scales: Vec<AdaptiveScale>,
    adapting: bool,
    stats: AcceptanceStats,
    iterations: usize,
}

impl<'m> GibbsKernel<'m> {
    /// Creates an uninitialized kernel whose draws are fully determined by `seed`.
    pub fn new(model: &'m ModelSpec, seed: u64) -> Self {
        Self::with_tuning(model, seed, &ProposalTuning::default())
    }

    pub fn with_tuning(model: &'m ModelSpec, seed: u64, tuning: &ProposalTuning) -> Self {
        let n_sigma = model.n_sigma();
        Self {
            model,
            state: None,
            status: KernelStatus::Uninitialized,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            tau_scale: AdaptiveScale::new(tuning),
            sigma_scales: vec![AdaptiveScale::new(tuning); n_sigma],
            adapting: false,
            stats: AcceptanceStats {
                sigma: vec![BlockStats::default(); n_sigma],
                ..Default::default()
            },
            iterations: 0,
        }
    }

    pub fn status(&self) -> KernelStatus {
        self.status
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of sweeps performed so far.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// The current state, if initialized.
    pub fn current(&self) -> Option<&Draw> {
        self.state.as_ref()
    }

    pub fn acceptance(&self) -> &AcceptanceStats {
        &self.stats
    }

    /// Enables or disables proposal adaptation.
    pub fn set_adapting(&mut self, adapting: bool) {
        self.adapting = adapting;
    }

    /// Current Metropolis step sizes: `tau` first, then each residual scale.
    pub fn proposal_steps(&self) -> Vec<f64> {
        std::iter::once(self.tau_scale.step())
            .chain(self.sigma_scales.iter().map(|s| s.step()))
            .collect()
    }

    /// Starts the chain from a user-supplied state.
    ///
    /// # Errors
    /// [`Error::Configuration`] if the kernel was already initialized or the state is invalid.
    pub fn initialize(&mut self, start: Draw) -> Result<()> {
        if self.status != KernelStatus::Uninitialized {
            return Err(Error::Configuration(format!(
                "kernel can only be initialized once, status is {:?}",
                self.status
            )));
        }
        start.validate(self.model)?;
        self.state = Some(start);
        self.status = KernelStatus::Running;
        Ok(())
    }

    /// Starts the chain from a draw of the priors: `mu0`, `tau` and `sigma` from their
    /// priors, then `mu[j] ~ Normal(mu0, tau)`.
    pub fn initialize_from_prior(&mut self) -> Result<()> {
        let start = prior_draw(self.model, &mut self.rng);
        self.initialize(start)
    }

    /// Moves the kernel to the terminal [`KernelStatus::Stopped`] state.
    pub fn stop(&mut self) {
        self.status = KernelStatus::Stopped;
    }

    /**
    Performs one full Gibbs sweep and returns the new draw.

    On an uninitialized kernel the start is drawn from the priors first. On a stopped kernel
    nothing is sampled and the last draw is returned, or `None` if the kernel never ran.
    */
    pub fn step(&mut self) -> Option<&Draw> {
        match self.status {
            KernelStatus::Stopped => return self.state.as_ref(),
            KernelStatus::Uninitialized => {
                if self.initialize_from_prior().is_err() {
                    // Degenerate prior draw, retried on the next call.
                    return None;
                }
            }
            KernelStatus::Running => {}
        }
        self.sweep();
        self.iterations += 1;
        self.state.as_ref()
    }

    fn sweep(&mut self) {
        let Self {
            model,
            state,
            rng,
            tau_scale,
            sigma_scales,
            adapting,
            stats,
            ..
        } = self;
        let Some(state) = state.as_mut() else {
            return;
        };
        let model: &ModelSpec = model;
        let priors = model.priors();

        // mu[j] | rest
        let inv_tau2 = 1.0 / (state.tau * state.tau);
        for (j, g) in model.groups().iter().enumerate() {
            let s = state.sigma[model.sigma_slot(j)];
            let data_prec = g.n as f64 / (s * s);
            let prec = data_prec + inv_tau2;
            let mean = (data_prec * g.mean + inv_tau2 * state.mu0) / prec;
            let sd = prec.sqrt().recip();
            if mean.is_finite() && sd.is_finite() && sd > 0.0 {
                let z: f64 = rng.sample(StandardNormal);
                state.mu[j] = mean + sd * z;
            } else {
                stats.conjugate_non_finite += 1;
            }
        }

        // mu0 | rest
        let prior = &priors.mu0;
        let prior_prec = 1.0 / (prior.sd * prior.sd);
        let sum_mu: f64 = state.mu.iter().sum();
        let prec = state.mu.len() as f64 * inv_tau2 + prior_prec;
        let mean = (sum_mu * inv_tau2 + prior.mean * prior_prec) / prec;
        let sd = prec.sqrt().recip();
        if mean.is_finite() && sd.is_finite() && sd > 0.0 {
            let z: f64 = rng.sample(StandardNormal);
            state.mu0 = mean + sd * z;
        } else {
            stats.conjugate_non_finite += 1;
        }

        // tau | rest
        let target = TauConditional {
            mu: &state.mu,
            mu0: state.mu0,
            prior: &priors.tau,
        };
        let (tau, outcome) = log_scale_step(&target, state.tau, tau_scale.step(), rng);
        state.tau = tau;
        stats.tau.record(outcome);
        tau_scale.record(outcome, *adapting);

        // sigma | rest, one block per residual scale
        for slot in 0..model.n_sigma() {
            let (groups, mu) = if model.shared_sigma() {
                (model.groups(), &state.mu[..])
            } else {
                (&model.groups()[slot..=slot], &state.mu[slot..=slot])
            };
            let target = SigmaConditional {
                groups,
                mu,
                prior: &priors.sigma,
            };
            let scale = &mut sigma_scales[slot];
            let (sigma, outcome) = log_scale_step(&target, state.sigma[slot], scale.step(), rng);
            state.sigma[slot] = sigma;
            stats.sigma[slot].record(outcome);
            scale.record(outcome, *adapting);
        }
    }
}

/// Draws a starting state from the priors.
pub fn prior_draw<R: Rng>(model: &ModelSpec, rng: &mut R) -> Draw {
    let priors = model.priors();
    let mu0 = priors.mu0.sample(rng);
    let tau = priors.tau.sample(rng);
    let sigma = (0..model.n_sigma())
        .map(|_| priors.sigma.sample(rng))
        .collect();
    let mu = (0..model.n_groups())
        .map(|_| {
            let z: f64 = rng.sample(StandardNormal);
            mu0 + tau * z
        })
        .collect();
    Draw {
        mu,
        mu0,
        tau,
        sigma,
    }
}
