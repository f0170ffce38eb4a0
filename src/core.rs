/*!
# Chain Manager.

This module runs several independent [`GibbsKernel`] chains in parallel (using Rayon) and
assembles their retained draws into [`PosteriorSamples`]. It includes:
- [`Sampler`], configured from a [`ModelSpec`] and a [`Config`], with builder options for the
  starting states ([`InitStrategy`]), cooperative cancellation ([`CancelToken`]) and a
  wall-clock budget.
- [`PosteriorSamples`], the draw matrix with per-row chain ids and per-chain [`ChainReport`]s.
- [`fit`], the whole pipeline from observations to diagnostics and summary.

Chain `c` is seeded with `config.seed + c`, so a run is reproducible bit for bit: chains never
share a generator and rows are assembled in chain order regardless of scheduling.
*/

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use ndarray::{prelude::*, ShapeError};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::dev_tools::Timer;
use crate::error::{Error, Result};
use crate::gibbs::{AcceptanceStats, Draw, GibbsKernel};
use crate::metropolis_hastings::ProposalTuning;
use crate::model::{ModelSpec, ObservationSet};
use crate::stats::{diagnose, DiagnosticReport};
use crate::summary::{summarize, SummaryReport};

/// Mixed into the chain seed for the generator of dispersed starting states.
const INIT_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Upper bound on the draws reserved up front per chain.
const MAX_PREALLOCATED_DRAWS: usize = 1 << 16;

/// How often progress bars are refreshed, in iterations.
const PROGRESS_EVERY: u64 = 100;

/// Shared flag to stop a running sampler between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Chains notice it before their next iteration.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Starting states of the chains.
#[derive(Debug, Clone, PartialEq)]
pub enum InitStrategy {
    /// Draw each start from the priors.
    Prior,
    /// Start near the data (group means, pooled spread), perturbed per chain.
    ///
    /// `jitter` scales the perturbation: locations move by `jitter` standard deviations and
    /// scales by a factor `exp(jitter * z)`.
    Dispersed { jitter: f64 },
    /// One explicit start per chain.
    Fixed(Vec<Draw>),
}

impl Default for InitStrategy {
    fn default() -> Self {
        Self::Dispersed { jitter: 1.0 }
    }
}

/// How a chain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainStatus {
    /// Ran every configured iteration.
    Completed,
    /// Stopped by a [`CancelToken`].
    Cancelled,
    /// Stopped by the time budget.
    Curtailed,
}

/// Outcome of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainReport {
    pub chain: usize,
    pub seed: u64,
    pub status: ChainStatus,
    /// Iterations performed, warmup included.
    pub iterations: usize,
    /// Draws contributed to the sample set. Zero if the chain did not finish warmup.
    pub retained: usize,
    pub acceptance: AcceptanceStats,
    /// Final Metropolis step sizes, `tau` first.
    pub proposal_steps: Vec<f64>,
    pub elapsed: Duration,
}

/**
Retained draws of all chains.

Rows are draws, ordered by chain and then by iteration. Columns follow
[`ModelSpec::parameter_names`]. Only chains that contributed draws appear in the rows, every
chain appears in [`PosteriorSamples::chains`].
*/
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSamples {
    param_names: Vec<String>,
    draws: Array2<f64>,
    chain_ids: Vec<usize>,
    chains: Vec<ChainReport>,
    group_labels: Vec<String>,
    n_sigma: usize,
}

impl PosteriorSamples {
    /// Assembles a sample set from per-chain rows.
    ///
    /// `rows[c]` holds the flattened draws of `chains[c]`, each `param_names.len()` long.
    pub fn from_chains(
        param_names: Vec<String>,
        group_labels: Vec<String>,
        n_sigma: usize,
        chains: Vec<ChainReport>,
        rows: Vec<Vec<f64>>,
    ) -> std::result::Result<Self, ShapeError> {
        let dim = param_names.len();
        let mut chain_ids = Vec::new();
        let mut flat = Vec::new();
        for (report, chain_rows) in chains.iter().zip(&rows) {
            chain_ids.extend(std::iter::repeat(report.chain).take(chain_rows.len() / dim.max(1)));
            flat.extend_from_slice(chain_rows);
        }
        let draws = Array2::from_shape_vec((chain_ids.len(), dim), flat)?;
        Ok(Self {
            param_names,
            draws,
            chain_ids,
            chains,
            group_labels,
            n_sigma,
        })
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// The `(draws, parameters)` matrix.
    pub fn draws(&self) -> ArrayView2<'_, f64> {
        self.draws.view()
    }

    /// Chain id of every row.
    pub fn chain_ids(&self) -> &[usize] {
        &self.chain_ids
    }

    /// Reports of all chains, including those that contributed nothing.
    pub fn chains(&self) -> &[ChainReport] {
        &self.chains
    }

    pub fn group_labels(&self) -> &[String] {
        &self.group_labels
    }

    pub fn n_groups(&self) -> usize {
        self.group_labels.len()
    }

    pub fn n_sigma(&self) -> usize {
        self.n_sigma
    }

    pub fn n_draws(&self) -> usize {
        self.draws.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.nrows() == 0
    }

    /// Ids of the chains that contributed draws, in row order.
    pub fn retained_chains(&self) -> Vec<usize> {
        self.chains
            .iter()
            .filter(|c| c.retained > 0)
            .map(|c| c.chain)
            .collect()
    }

    /// Column index of `name`.
    pub fn param_index(&self, name: &str) -> Result<usize> {
        self.param_names
            .iter()
            .position(|p| p == name)
            .ok_or_else(|| Error::UnknownParameter(name.to_string()))
    }

    /// All draws of `name`.
    pub fn column(&self, name: &str) -> Result<ArrayView1<'_, f64>> {
        Ok(self.draws.column(self.param_index(name)?))
    }

    /// Draws of `name` split by chain, one vector per contributing chain.
    pub fn per_chain(&self, name: &str) -> Result<Vec<Vec<f64>>> {
        let k = self.param_index(name)?;
        let mut out: Vec<Vec<f64>> = Vec::new();
        let mut current = None;
        for (row, &chain) in self.draws.rows().into_iter().zip(&self.chain_ids) {
            if current != Some(chain) {
                out.push(Vec::new());
                current = Some(chain);
            }
            if let Some(last) = out.last_mut() {
                last.push(row[k]);
            }
        }
        Ok(out)
    }

    /// Draws as `(chains, draws, parameters)`, truncated to the shortest contributing chain.
    pub fn chain_array(&self) -> Array3<f64> {
        let lengths: Vec<usize> = self
            .chains
            .iter()
            .map(|c| c.retained)
            .filter(|&n| n > 0)
            .collect();
        let common = lengths.iter().copied().min().unwrap_or(0);
        let mut out = Array3::<f64>::zeros((lengths.len(), common, self.param_names.len()));
        let mut start = 0;
        for (c, &len) in lengths.iter().enumerate() {
            out.index_axis_mut(Axis(0), c)
                .assign(&self.draws.slice(s![start..start + common, ..]));
            start += len;
        }
        out
    }

    /// Row `i` as a structured [`Draw`].
    pub fn draw(&self, i: usize) -> Option<Draw> {
        if i >= self.n_draws() {
            return None;
        }
        let row = self.draws.row(i).to_vec();
        Some(Draw::from_row(&row, self.n_groups()))
    }
}

/**
Runs the chains of one model.

# Example

```rust
use hier_mcmc::config::Config;
use hier_mcmc::core::Sampler;
use hier_mcmc::model::{ModelSpec, ObservationSet};

let obs = ObservationSet::from_records([("a", 1.0), ("a", 1.2), ("b", 3.1), ("b", 2.9)]);
let model = ModelSpec::build(&obs, true).unwrap();
let config = Config { chains: 2, iterations: 300, warmup: 100, thin: 2, ..Default::default() };

let samples = Sampler::new(&model, &config).unwrap().run().unwrap();
assert_eq!(samples.n_draws(), 2 * 100);
assert_eq!(samples.param_names(), ["mu[1]", "mu[2]", "mu0", "tau", "sigma"]);
```
*/
#[derive(Debug, Clone)]
pub struct Sampler<'m> {
    model: &'m ModelSpec,
    chains: usize,
    iterations: usize,
    warmup: usize,
    thin: usize,
    seed: u64,
    tuning: ProposalTuning,
    progress: bool,
    init: InitStrategy,
    cancel: CancelToken,
    time_budget: Option<Duration>,
}

impl<'m> Sampler<'m> {
    /// Validates `config` and prepares a sampler. Nothing runs until [`Sampler::run`].
    pub fn new(model: &'m ModelSpec, config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model,
            chains: config.chains,
            iterations: config.iterations,
            warmup: config.warmup,
            thin: config.thin,
            seed: config.seed,
            tuning: config.tuning.clone(),
            progress: config.progress,
            init: InitStrategy::default(),
            cancel: CancelToken::new(),
            time_budget: config.time_budget(),
        })
    }

    pub fn init(mut self, init: InitStrategy) -> Self {
        self.init = init;
        self
    }

    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Wall-clock limit for the whole run. A budget past the clock's range sets no deadline.
    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Runs all chains in parallel and collects their retained draws.
    ///
    /// # Errors
    /// - [`Error::Configuration`] if a fixed start list does not have one valid start per chain.
    /// - [`Error::Cancelled`] if no chain completed its warmup.
    pub fn run(&self) -> Result<PosteriorSamples> {
        if let InitStrategy::Fixed(starts) = &self.init {
            if starts.len() != self.chains {
                return Err(Error::Configuration(format!(
                    "{} fixed starts given for {} chains",
                    starts.len(),
                    self.chains
                )));
            }
            for start in starts {
                start.validate(self.model)?;
            }
        }
        if let InitStrategy::Dispersed { jitter } = self.init {
            if !jitter.is_finite() || jitter < 0.0 {
                return Err(Error::Configuration(format!(
                    "jitter must be finite and >= 0, got {jitter}"
                )));
            }
        }

        let deadline = self.time_budget.and_then(|b| Instant::now().checked_add(b));
        let multi = if self.progress {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };
        let style = ProgressStyle::default_bar()
            .template("{prefix:8} {bar:40.cyan/blue} {pos}/{len} ({eta}) | {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");

        let mut timer = Timer::new();
        let results: Vec<(ChainReport, Vec<f64>)> = (0..self.chains)
            .into_par_iter()
            .map(|c| {
                let pb = multi.add(ProgressBar::new(self.iterations as u64));
                pb.set_style(style.clone());
                pb.set_prefix(format!("Chain {c}"));
                let out = self.run_chain(c, &pb, deadline);
                pb.finish();
                out
            })
            .collect::<Result<_>>()?;
        timer.log(format!("{} chains finished", self.chains));

        let (reports, rows): (Vec<ChainReport>, Vec<Vec<f64>>) = results.into_iter().unzip();
        if reports.iter().all(|r| r.retained == 0) {
            return Err(Error::Cancelled(format!(
                "none of the {} chains completed its {} warmup iterations",
                self.chains, self.warmup
            )));
        }
        let total: usize = reports.iter().map(|r| r.retained).sum();
        log::info!(
            "sampled {} chains x {} iterations (warmup {}, thin {}): {} draws retained",
            self.chains,
            self.iterations,
            self.warmup,
            self.thin,
            total
        );

        PosteriorSamples::from_chains(
            self.model.parameter_names(),
            self.model.group_labels(),
            self.model.n_sigma(),
            reports,
            rows,
        )
        .map_err(|e| Error::Configuration(format!("draw matrix has an invalid shape: {e}")))
    }

    fn run_chain(
        &self,
        c: usize,
        pb: &ProgressBar,
        deadline: Option<Instant>,
    ) -> Result<(ChainReport, Vec<f64>)> {
        let started = Instant::now();
        let mut timer = Timer::new();
        let seed = self.seed.wrapping_add(c as u64);
        let mut kernel = GibbsKernel::with_tuning(self.model, seed, &self.tuning);
        match &self.init {
            InitStrategy::Prior => kernel.initialize_from_prior()?,
            InitStrategy::Dispersed { jitter } => {
                let mut rng = SmallRng::seed_from_u64(seed ^ INIT_SEED_MIX);
                kernel.initialize(dispersed_start(self.model, *jitter, &mut rng))?
            }
            InitStrategy::Fixed(starts) => kernel.initialize(starts[c].clone())?,
        }
        kernel.set_adapting(self.tuning.adapt && self.warmup > 0);
        timer.log(format!("chain {c} initialized with seed {seed}"));

        let dim = self.model.dim();
        let kept = (self.iterations - self.warmup) / self.thin;
        let mut rows = Vec::with_capacity(kept.min(MAX_PREALLOCATED_DRAWS).saturating_mul(dim));
        let mut status = ChainStatus::Completed;
        let mut done = 0;
        for i in 0..self.iterations {
            if self.cancel.is_cancelled() {
                status = ChainStatus::Cancelled;
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                status = ChainStatus::Curtailed;
                break;
            }
            if i == self.warmup {
                kernel.set_adapting(false);
            }
            let Some(draw) = kernel.step() else {
                break;
            };
            if i >= self.warmup && (i - self.warmup + 1) % self.thin == 0 {
                rows.extend(draw.to_row());
            }
            done = i + 1;

            if done as u64 % PROGRESS_EVERY == 0 {
                pb.set_position(done as u64);
                pb.set_message(format!(
                    "p(accept tau)≈{:.2}",
                    kernel.acceptance().tau.acceptance_rate()
                ));
            }
        }
        kernel.stop();
        pb.set_position(done as u64);

        if done < self.warmup {
            log::warn!(
                "chain {c} stopped ({status:?}) after {done} of {} warmup iterations, its draws are discarded",
                self.warmup
            );
            rows.clear();
        } else if status != ChainStatus::Completed {
            log::warn!(
                "chain {c} stopped ({status:?}) after {done} of {} iterations",
                self.iterations
            );
        }
        timer.log(format!("chain {c} finished {done} iterations"));

        let report = ChainReport {
            chain: c,
            seed,
            status,
            iterations: done,
            retained: rows.len() / dim,
            acceptance: kernel.acceptance().clone(),
            proposal_steps: kernel.proposal_steps(),
            elapsed: started.elapsed(),
        };
        Ok((report, rows))
    }
}

/// Starting state near the data: group means, their spread and the pooled residual scale,
/// each perturbed by `jitter`.
fn dispersed_start<R: Rng>(model: &ModelSpec, jitter: f64, rng: &mut R) -> Draw {
    let groups = model.groups();
    let grand = model.grand_mean();
    let positive_or = |x: f64, fallback: f64| if x.is_finite() && x > 0.0 { x } else { fallback };

    let pooled_ss: f64 = groups.iter().map(|g| g.sum_sq_dev).sum();
    let pooled_sd = positive_or((pooled_ss / model.n_obs() as f64).sqrt(), 1.0);
    let spread = if groups.len() > 1 {
        let ss: f64 = groups.iter().map(|g| (g.mean - grand).powi(2)).sum();
        positive_or((ss / (groups.len() - 1) as f64).sqrt(), pooled_sd)
    } else {
        pooled_sd
    };

    let mut z = || -> f64 { rng.sample(StandardNormal) };
    let mu = groups
        .iter()
        .map(|g| g.mean + jitter * pooled_sd * z())
        .collect();
    let mu0 = grand + jitter * spread * z();
    let tau = positive_or(spread * (jitter * z()).exp(), 1.0);
    let sigma = (0..model.n_sigma())
        .map(|s| {
            let base = if model.shared_sigma() || groups[s].n < 2 {
                pooled_sd
            } else {
                positive_or((groups[s].sum_sq_dev / groups[s].n as f64).sqrt(), pooled_sd)
            };
            positive_or(base * (jitter * z()).exp(), 1.0)
        })
        .collect();
    Draw {
        mu,
        mu0,
        tau,
        sigma,
    }
}

/// Everything a fitted model produces.
#[derive(Debug, Clone)]
pub struct Fit {
    pub model: ModelSpec,
    pub samples: PosteriorSamples,
    pub diagnostics: DiagnosticReport,
    pub summary: SummaryReport,
}

/**
Fits the hierarchical model to `observations`: builds the model, samples, diagnoses and
summarizes.

```rust
use hier_mcmc::config::Config;
use hier_mcmc::core::fit;
use hier_mcmc::model::ObservationSet;

let obs: ObservationSet = [("a", 0.8), ("a", 1.1), ("b", 2.0), ("b", 2.3), ("c", 1.5)]
    .into_iter()
    .collect();
let config = Config { chains: 2, iterations: 400, warmup: 200, ..Default::default() };
let fit = fit(&obs, &config).unwrap();

assert_eq!(fit.samples.n_draws(), 400);
assert!(fit.diagnostics.get("tau").unwrap().rhat.is_some());
assert_eq!(fit.summary.shrinkage.groups.len(), 3);
```
*/
pub fn fit(observations: &ObservationSet, config: &Config) -> Result<Fit> {
    let model = config.build_model(observations)?;
    let samples = Sampler::new(&model, config)?.run()?;
    let diagnostics = diagnose(&samples, &config.diagnostics);
    let summary = summarize(&samples, &model, &config.summary)?;
    Ok(Fit {
        model,
        samples,
        diagnostics,
        summary,
    })
}
