/*!
# Hierarchical Normal Model Specification.

Binds a grouped observation set to the fixed two-level structure

```text
y[i]   ~ Normal(mu[g(i)], sigma[g(i)])     residual scale shared or per group
mu[j]  ~ Normal(mu0, tau)
mu0    ~ Normal(m0, s0)
tau    ~ ScalePrior           (half-Cauchy by default)
sigma  ~ ScalePrior           (half-Cauchy by default)
```

The sampler only ever needs each group's count, mean and sum of squared deviations,
so [`ModelSpec::build`] reduces the observations to [`GroupStats`] once.
*/

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::distributions::{Normal, ScalePrior};
use crate::error::{Error, Result};

/// One observed value and the label of its group.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub group: String,
    pub value: f64,
}

/// An ordered set of grouped observations.
///
/// Groups are numbered in order of first appearance, or in declaration order when created
/// with [`ObservationSet::with_groups`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservationSet {
    labels: Vec<String>,
    index: HashMap<String, usize>,
    records: Vec<(usize, f64)>,
}

impl ObservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty set with the given groups declared up front.
    ///
    /// A declared group that never receives an observation makes [`ModelSpec::build`] fail.
    pub fn with_groups<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for label in labels {
            set.group_index(label.into());
        }
        set
    }

    /// Builds a set from `(label, value)` records.
    pub fn from_records<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut set = Self::new();
        for (label, value) in records {
            set.push(label, value);
        }
        set
    }

    pub fn push<S: Into<String>>(&mut self, group: S, value: f64) {
        let j = self.group_index(group.into());
        self.records.push((j, value));
    }

    fn group_index(&mut self, label: String) -> usize {
        if let Some(&j) = self.index.get(&label) {
            return j;
        }
        let j = self.labels.len();
        self.index.insert(label.clone(), j);
        self.labels.push(label);
        j
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Iterates over the records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = Observation> + '_ {
        self.records.iter().map(|&(j, value)| Observation {
            group: self.labels[j].clone(),
            value,
        })
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ObservationSet {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        Self::from_records(iter)
    }
}

/// Sufficient statistics of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupStats {
    pub label: String,
    pub n: usize,
    pub mean: f64,
    /// Sum of squared deviations from the group mean. Zero for a single observation.
    pub sum_sq_dev: f64,
}

impl GroupStats {
    fn empty(label: String) -> Self {
        Self {
            label,
            n: 0,
            mean: 0.0,
            sum_sq_dev: 0.0,
        }
    }

    // Welford's update.
    fn push(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.sum_sq_dev += delta * (x - self.mean);
    }

    /// `sum_i (y_i - m)^2` over the group's observations.
    pub fn sum_sq_about(&self, m: f64) -> f64 {
        let d = self.mean - m;
        self.sum_sq_dev + self.n as f64 * d * d
    }
}

/// Priors of the hyperparameter and scale parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Priors {
    pub mu0: Normal,
    pub tau: ScalePrior,
    pub sigma: ScalePrior,
}

impl Priors {
    /// Normal prior on `mu0` and half-Cauchy priors on `tau` and `sigma`.
    pub fn half_cauchy(
        mu0_mean: f64,
        mu0_sd: f64,
        tau_scale: f64,
        sigma_scale: f64,
    ) -> Result<Self> {
        Ok(Self {
            mu0: Normal::new(mu0_mean, mu0_sd)?,
            tau: ScalePrior::half_cauchy(tau_scale)?,
            sigma: ScalePrior::half_cauchy(sigma_scale)?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.mu0.validate()?;
        self.tau.validate()?;
        self.sigma.validate()
    }
}

impl Default for Priors {
    fn default() -> Self {
        Self {
            mu0: Normal {
                mean: 0.0,
                sd: 10.0,
            },
            tau: ScalePrior::HalfCauchy(crate::distributions::HalfCauchy { scale: 5.0 }),
            sigma: ScalePrior::HalfCauchy(crate::distributions::HalfCauchy { scale: 5.0 }),
        }
    }
}

/// A hierarchical normal model bound to its data.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    groups: Vec<GroupStats>,
    shared_sigma: bool,
    priors: Priors,
    n_obs: usize,
}

impl ModelSpec {
    /// Binds `observations` to the hierarchical structure with default [`Priors`].
    ///
    /// # Errors
    /// [`Error::Configuration`] if the set is empty, a declared group has no observations,
    /// or a value is not finite.
    pub fn build(observations: &ObservationSet, shared_sigma: bool) -> Result<Self> {
        if observations.is_empty() {
            return Err(Error::Configuration(
                "observation set is empty".to_string(),
            ));
        }
        let mut groups: Vec<GroupStats> = observations
            .labels
            .iter()
            .cloned()
            .map(GroupStats::empty)
            .collect();
        for (i, &(j, value)) in observations.records.iter().enumerate() {
            if !value.is_finite() {
                return Err(Error::Configuration(format!(
                    "observation {i} in group '{}' is not finite: {value}",
                    groups[j].label
                )));
            }
            groups[j].push(value);
        }
        if let Some(g) = groups.iter().find(|g| g.n == 0) {
            return Err(Error::Configuration(format!(
                "group '{}' has no observations",
                g.label
            )));
        }
        Ok(Self {
            groups,
            shared_sigma,
            priors: Priors::default(),
            n_obs: observations.len(),
        })
    }

    /// Replaces the priors after validating them.
    pub fn with_priors(mut self, priors: Priors) -> Result<Self> {
        priors.validate()?;
        self.priors = priors;
        Ok(self)
    }

    pub fn groups(&self) -> &[GroupStats] {
        &self.groups
    }

    pub fn priors(&self) -> &Priors {
        &self.priors
    }

    pub fn shared_sigma(&self) -> bool {
        self.shared_sigma
    }

    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    /// Number of residual scales: 1 when shared, one per group otherwise.
    pub fn n_sigma(&self) -> usize {
        if self.shared_sigma {
            1
        } else {
            self.groups.len()
        }
    }

    /// Number of columns of a flattened draw.
    pub fn dim(&self) -> usize {
        self.n_groups() + 2 + self.n_sigma()
    }

    /// Index of the residual scale used by group `j`.
    pub fn sigma_slot(&self, j: usize) -> usize {
        if self.shared_sigma {
            0
        } else {
            j
        }
    }

    /// Mean of all observations.
    pub fn grand_mean(&self) -> f64 {
        let total: f64 = self.groups.iter().map(|g| g.mean * g.n as f64).sum();
        total / self.n_obs as f64
    }

    /// Column names in draw order: `mu[1..J]`, `mu0`, `tau`, then `sigma` or `sigma[1..J]`.
    pub fn parameter_names(&self) -> Vec<String> {
        let j = self.n_groups();
        let mut names = Vec::with_capacity(self.dim());
        names.extend((1..=j).map(|i| format!("mu[{i}]")));
        names.push("mu0".into());
        names.push("tau".into());
        if self.shared_sigma {
            names.push("sigma".into());
        } else {
            names.extend((1..=j).map(|i| format!("sigma[{i}]")));
        }
        names
    }

    pub fn group_labels(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.label.clone()).collect()
    }
}
