/*!
# Run Configuration.

[`Config`] gathers every knob of a run: chain counts and lengths, seed, model structure,
priors, proposal tuning, diagnostic thresholds and summary options. All structs derive
`serde` with field defaults, so a JSON document only has to name what it changes:

```rust
use hier_mcmc::config::Config;

let config = Config::from_json(r#"{ "chains": 2, "iterations": 500, "warmup": 250 }"#).unwrap();
assert_eq!(config.chains, 2);
assert_eq!(config.thin, 1);
config.validate().unwrap();
```
*/

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::distributions::{Normal, ScalePrior};
use crate::error::{Error, Result};
use crate::metropolis_hastings::ProposalTuning;
use crate::model::{ModelSpec, ObservationSet, Priors};
use crate::stats::DiagnosticsConfig;
use crate::summary::SummaryConfig;

/// Prior settings in the flat form used by configuration files.
///
/// `tau_prior` and `sigma_prior` override the half-Cauchy scales when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorConfig {
    /// `(mean, sd)` of the Normal prior on `mu0`.
    pub mu0_prior: (f64, f64),
    pub tau_prior_scale: f64,
    pub sigma_prior_scale: f64,
    pub tau_prior: Option<ScalePrior>,
    pub sigma_prior: Option<ScalePrior>,
}

impl Default for PriorConfig {
    fn default() -> Self {
        Self {
            mu0_prior: (0.0, 10.0),
            tau_prior_scale: 5.0,
            sigma_prior_scale: 5.0,
            tau_prior: None,
            sigma_prior: None,
        }
    }
}

impl PriorConfig {
    /// Resolves the settings into validated [`Priors`].
    pub fn resolve(&self) -> Result<Priors> {
        let (m0, s0) = self.mu0_prior;
        let tau = match self.tau_prior {
            Some(p) => p,
            None => ScalePrior::half_cauchy(self.tau_prior_scale)?,
        };
        let sigma = match self.sigma_prior {
            Some(p) => p,
            None => ScalePrior::half_cauchy(self.sigma_prior_scale)?,
        };
        let priors = Priors {
            mu0: Normal::new(m0, s0)?,
            tau,
            sigma,
        };
        priors.validate()?;
        Ok(priors)
    }
}

/// Configuration of a sampling run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of independent chains.
    pub chains: usize,
    /// Total iterations per chain, warmup included.
    pub iterations: usize,
    /// Leading iterations discarded from every chain.
    pub warmup: usize,
    /// Keep every `thin`-th post-warmup iteration.
    pub thin: usize,
    /// Base seed. Chain `c` uses `seed + c`.
    pub seed: u64,
    /// One residual scale for all groups instead of one per group.
    pub shared_sigma: bool,
    pub priors: PriorConfig,
    pub tuning: ProposalTuning,
    pub diagnostics: DiagnosticsConfig,
    pub summary: SummaryConfig,
    /// Draw progress bars while sampling.
    pub progress: bool,
    /// Wall-clock budget of the whole run, in seconds.
    pub time_budget_secs: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chains: 4,
            iterations: 2_000,
            warmup: 1_000,
            thin: 1,
            seed: 42,
            shared_sigma: true,
            priors: PriorConfig::default(),
            tuning: ProposalTuning::default(),
            diagnostics: DiagnosticsConfig::default(),
            summary: SummaryConfig::default(),
            progress: false,
            time_budget_secs: None,
        }
    }
}

impl Config {
    /// Parses a JSON document. Missing fields take their defaults.
    ///
    /// The result is not validated, see [`Config::validate`].
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Configuration(format!("invalid JSON: {e}")))
    }

    /// Serializes the configuration as pretty-printed JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Number of draws each completed chain retains.
    pub fn draws_per_chain(&self) -> usize {
        self.iterations.saturating_sub(self.warmup) / self.thin.max(1)
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Checks every setting, returning [`Error::Configuration`] for the first bad one.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Configuration(msg));
        if self.chains == 0 {
            return fail("chains must be >= 1".into());
        }
        if self.iterations == 0 {
            return fail("iterations must be >= 1".into());
        }
        if self.warmup >= self.iterations {
            return fail(format!(
                "warmup ({}) must be smaller than iterations ({})",
                self.warmup, self.iterations
            ));
        }
        if self.thin == 0 {
            return fail("thin must be >= 1".into());
        }
        if self.draws_per_chain() == 0 {
            return fail(format!(
                "thin ({}) exceeds the {} post-warmup iterations, no draw would be kept",
                self.thin,
                self.iterations - self.warmup
            ));
        }
        if let Some(secs) = self.time_budget_secs {
            if !secs.is_finite() || Duration::try_from_secs_f64(secs).is_err() {
                return fail(format!(
                    "time budget must be a finite number of seconds >= 0, got {secs}"
                ));
            }
        }

        let t = &self.tuning;
        if !t.initial_step.is_finite() || t.initial_step <= 0.0 {
            return fail(format!("initial step must be > 0, got {}", t.initial_step));
        }
        if !(t.target_accept > 0.0 && t.target_accept < 1.0) {
            return fail(format!(
                "target acceptance must be in (0, 1), got {}",
                t.target_accept
            ));
        }
        if t.batch_size == 0 {
            return fail("adaptation batch size must be >= 1".into());
        }

        self.diagnostics.validate()?;
        self.summary.validate()?;
        self.priors.resolve().map(|_| ())
    }

    pub fn priors(&self) -> Result<Priors> {
        self.priors.resolve()
    }

    /// Binds `observations` to a model with this configuration's structure and priors.
    pub fn build_model(&self, observations: &ObservationSet) -> Result<ModelSpec> {
        ModelSpec::build(observations, self.shared_sigma)?.with_priors(self.priors()?)
    }
}
