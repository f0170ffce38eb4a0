/*!
# Posterior Summaries.

Everything here consumes [`PosteriorSamples`] and never looks at the chains themselves:

- [`credible_interval`]: equal-tailed interval from empirical quantiles,
- [`shrinkage`]: each group's sample mean next to its posterior mean, and how far it was pooled
  toward the grand mean,
- [`variance_ratio_draws`]: `R = tau^2 / (tau^2 + sigma^2)` per draw, the share of variance
  between groups,
- [`summarize`]: all of the above in one [`SummaryReport`].
*/

use core::fmt;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::PosteriorSamples;
use crate::error::{Error, Result};
use crate::model::ModelSpec;

/// Options of [`summarize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryConfig {
    /// Probability mass of the credible intervals.
    pub level: f64,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self { level: 0.95 }
    }
}

impl SummaryConfig {
    pub fn validate(&self) -> Result<()> {
        check_level(self.level)
    }
}

fn check_level(level: f64) -> Result<()> {
    if !(level.is_finite() && level > 0.0 && level < 1.0) {
        return Err(Error::Configuration(format!(
            "credible level must be in (0, 1), got {level}"
        )));
    }
    Ok(())
}

/// Quantile of already sorted values with linear interpolation between order statistics.
pub fn quantile_linear_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() - 1) as f64;
    let i = pos.floor() as usize;
    let j = pos.ceil() as usize;
    if i == j {
        return sorted[i];
    }
    let t = pos - i as f64;
    (1.0 - t) * sorted[i] + t * sorted[j]
}

/// Posterior mean, median and equal-tailed interval of one quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct CredibleInterval {
    pub param: String,
    pub level: f64,
    pub mean: f64,
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
}

impl CredibleInterval {
    fn from_values(param: &str, values: &[f64], level: f64) -> Result<Self> {
        check_level(level)?;
        if values.is_empty() {
            return Err(Error::Configuration(format!("no draws of {param}")));
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let tail = (1.0 - level) / 2.0;
        Ok(Self {
            param: param.to_string(),
            level,
            mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
            median: quantile_linear_sorted(&sorted, 0.5),
            lower: quantile_linear_sorted(&sorted, tail),
            upper: quantile_linear_sorted(&sorted, 1.0 - tail),
        })
    }

    pub fn contains(&self, x: f64) -> bool {
        self.lower <= x && x <= self.upper
    }
}

impl fmt::Display for CredibleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} mean {:>9.3}  median {:>9.3}  {:.0}% [{:.3}, {:.3}]",
            self.param,
            self.mean,
            self.median,
            self.level * 100.0,
            self.lower,
            self.upper
        )
    }
}

/**
Equal-tailed credible interval of `name` at `level`, e.g. the 2.5% and 97.5% quantiles for
`level = 0.95`.

# Errors
[`Error::UnknownParameter`] for a name that is not a column, [`Error::Configuration`] for a
level outside `(0, 1)`.
*/
pub fn credible_interval(
    samples: &PosteriorSamples,
    name: &str,
    level: f64,
) -> Result<CredibleInterval> {
    let values = samples.column(name)?.to_vec();
    CredibleInterval::from_values(name, &values, level)
}

/// Pooling of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupShrinkage {
    pub label: String,
    pub n: usize,
    pub sample_mean: f64,
    pub posterior_mean: f64,
    /// `(sample_mean - posterior_mean) / (sample_mean - grand_mean)`: 0 means no pooling and 1
    /// complete pooling. `None` when the sample mean equals the posterior grand mean.
    pub pooling: Option<f64>,
}

/// Output of [`shrinkage`].
#[derive(Debug, Clone, PartialEq)]
pub struct Shrinkage {
    pub groups: Vec<GroupShrinkage>,
    /// Posterior mean of `mu0`.
    pub grand_mean: f64,
}

/// Compares each group's sample mean with its posterior mean.
pub fn shrinkage(samples: &PosteriorSamples, model: &ModelSpec) -> Result<Shrinkage> {
    check_compatible(samples, model)?;
    let mean = |name: &str| -> Result<f64> {
        let col = samples.column(name)?;
        Ok(col.sum() / col.len() as f64)
    };
    let grand_mean = mean("mu0")?;
    let groups = model
        .groups()
        .iter()
        .enumerate()
        .map(|(j, g)| {
            let posterior_mean = mean(&format!("mu[{}]", j + 1))?;
            let gap = g.mean - grand_mean;
            Ok(GroupShrinkage {
                label: g.label.clone(),
                n: g.n,
                sample_mean: g.mean,
                posterior_mean,
                pooling: (gap != 0.0).then(|| (g.mean - posterior_mean) / gap),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Shrinkage { groups, grand_mean })
}

fn check_compatible(samples: &PosteriorSamples, model: &ModelSpec) -> Result<()> {
    if samples.param_names() != model.parameter_names().as_slice() {
        return Err(Error::Configuration(format!(
            "samples have parameters {:?}, model expects {:?}",
            samples.param_names(),
            model.parameter_names()
        )));
    }
    Ok(())
}

/// Largest ratio below 1. Reached when `sigma / tau` underflows.
const MAX_RATIO: f64 = 1.0 - f64::EPSILON;

/// `tau^2 / (tau^2 + sigma^2)`, computed as `1 / (1 + (sigma / tau)^2)` to avoid overflow.
fn variance_ratio(tau: f64, sigma: f64) -> f64 {
    let r = sigma / tau;
    (1.0 / (1.0 + r * r)).min(MAX_RATIO)
}

/// Names of the ratio columns: `R`, or `R[1..J]` when sigma is per group.
pub fn variance_ratio_names(samples: &PosteriorSamples) -> Vec<String> {
    if samples.param_index("sigma").is_ok() {
        vec!["R".to_string()]
    } else {
        (1..=samples.n_sigma()).map(|j| format!("R[{j}]")).collect()
    }
}

/**
Variance-decomposition ratio for every draw, shape `(draws, n_sigma)`.

Every value lies in `[0, 1)`.

```rust
use hier_mcmc::config::Config;
use hier_mcmc::core::Sampler;
use hier_mcmc::model::{ModelSpec, ObservationSet};
use hier_mcmc::summary::variance_ratio_draws;

let obs = ObservationSet::from_records([("a", 1.0), ("a", 2.0), ("b", 5.0), ("b", 6.0)]);
let model = ModelSpec::build(&obs, true).unwrap();
let config = Config { chains: 1, iterations: 200, warmup: 100, ..Default::default() };
let samples = Sampler::new(&model, &config).unwrap().run().unwrap();

let r = variance_ratio_draws(&samples).unwrap();
assert_eq!(r.dim(), (100, 1));
assert!(r.iter().all(|&x| (0.0..1.0).contains(&x)));
```
*/
pub fn variance_ratio_draws(samples: &PosteriorSamples) -> Result<Array2<f64>> {
    let tau = samples.column("tau")?;
    let sigma_idx: Vec<usize> = if let Ok(k) = samples.param_index("sigma") {
        vec![k]
    } else {
        (1..=samples.n_sigma())
            .map(|j| samples.param_index(&format!("sigma[{j}]")))
            .collect::<Result<_>>()?
    };
    let draws = samples.draws();
    Ok(Array2::from_shape_fn(
        (samples.n_draws(), sigma_idx.len()),
        |(i, s)| variance_ratio(tau[i], draws[[i, sigma_idx[s]]]),
    ))
}

/// Everything [`summarize`] reports.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    /// One interval per model parameter, in column order.
    pub intervals: Vec<CredibleInterval>,
    pub shrinkage: Shrinkage,
    /// Intervals of the variance ratio, one per residual scale.
    pub variance_ratio: Vec<CredibleInterval>,
}

impl SummaryReport {
    pub fn interval(&self, name: &str) -> Option<&CredibleInterval> {
        self.intervals
            .iter()
            .chain(&self.variance_ratio)
            .find(|c| c.param == name)
    }
}

impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.intervals.iter().chain(&self.variance_ratio) {
            writeln!(f, "{c}")?;
        }
        writeln!(f, "shrinkage toward mu0 = {:.3}:", self.shrinkage.grand_mean)?;
        for g in &self.shrinkage.groups {
            write!(
                f,
                "  {:<12} n = {:<5} sample mean {:>9.3} -> posterior mean {:>9.3}",
                g.label, g.n, g.sample_mean, g.posterior_mean
            )?;
            if let Some(p) = g.pooling {
                write!(f, "  (pooling {p:.2})")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Credible intervals of every parameter and of the variance ratio, plus shrinkage.
pub fn summarize(
    samples: &PosteriorSamples,
    model: &ModelSpec,
    config: &SummaryConfig,
) -> Result<SummaryReport> {
    config.validate()?;
    let shrinkage = shrinkage(samples, model)?;
    let intervals = samples
        .param_names()
        .iter()
        .map(|name| credible_interval(samples, name, config.level))
        .collect::<Result<Vec<_>>>()?;
    let ratios = variance_ratio_draws(samples)?;
    let variance_ratio = variance_ratio_names(samples)
        .iter()
        .zip(ratios.columns())
        .map(|(name, col)| CredibleInterval::from_values(name, &col.to_vec(), config.level))
        .collect::<Result<Vec<_>>>()?;
    Ok(SummaryReport {
        intervals,
        shrinkage,
        variance_ratio,
    })
}
