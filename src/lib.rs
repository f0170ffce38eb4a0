//! # Hier MCMC
//!
//! A compact Rust library for **Bayesian hierarchical normal models** sampled with
//! **Metropolis-within-Gibbs MCMC**. Observations belong to groups, each group has its own
//! mean, and the group means share a common distribution:
//!
//! ```text
//! y[i]  ~ Normal(mu[g(i)], sigma)      sigma shared or per group
//! mu[j] ~ Normal(mu0, tau)
//! mu0   ~ Normal(m0, s0),  tau ~ HalfCauchy,  sigma ~ HalfCauchy
//! ```
//!
//! The library provides:
//! 1. **Model specification** ([`model`]): grouped observations bound to the two-level
//!    structure, with configurable priors.
//! 2. **A Gibbs kernel** ([`gibbs`]): conjugate updates of the means, log-scale random-walk
//!    Metropolis ([`metropolis_hastings`]) for `tau` and `sigma`.
//! 3. **A chain manager** ([`core`]): independent seeded chains run in parallel, with warmup,
//!    thinning, cancellation and a time budget.
//! 4. **Diagnostics** ([`stats`]): split R-hat, effective sample size, autocorrelation and
//!    trace summaries, collected into warnings that never abort a run.
//! 5. **Posterior summaries** ([`summary`]): credible intervals, shrinkage of the group means
//!    toward the grand mean, and the between-group variance ratio.
//!
//! ## Example: groups with unequal sizes
//!
//! ```rust
//! use hier_mcmc::config::Config;
//! use hier_mcmc::fit;
//! use hier_mcmc::model::ObservationSet;
//!
//! let mut obs = ObservationSet::new();
//! for (group, values) in [
//!     ("north", &[4.1, 3.8, 4.4, 4.0, 3.9][..]),
//!     ("south", &[2.9, 3.1, 3.3, 2.7][..]),
//!     ("east", &[1.0][..]),
//! ] {
//!     for &v in values {
//!         obs.push(group, v);
//!     }
//! }
//!
//! let config = Config { chains: 2, iterations: 2_000, warmup: 1_000, ..Default::default() };
//! let fit = fit(&obs, &config)?;
//!
//! assert_eq!(fit.samples.n_draws(), 2_000);
//! for warning in &fit.diagnostics.warnings {
//!     println!("warning: {warning}");
//! }
//! println!("{}", fit.summary);
//! # Ok::<(), hier_mcmc::Error>(())
//! ```
//!
//! ## Features
//! - **Parallel Chains** with per-chain seeds `seed + c`, reproducible bit for bit
//! - **Progress Indicators** (iteration counts, acceptance rates)
//! - **Split R-hat and ESS** following STAN's methodology
//! - **JSON Configuration** via `serde`
//! - **Optional I/O** (CSV, feature `csv`)
//!
//! The library logs through the `log` facade and installs no logger.

pub mod config;
pub mod core;
mod dev_tools;
pub mod distributions;
pub mod error;
pub mod gibbs;
pub mod io;
pub mod metropolis_hastings;
pub mod model;
pub mod stats;
pub mod summary;

pub use crate::core::{fit, Fit};
pub use crate::error::{Error, Result};
