//! Convergence diagnostics: split R-hat, effective sample size, autocorrelation and trace
//! summaries, plus the [`diagnose`] gate that turns them into [`ConvergenceWarning`]s.
//!
//! Functions taking an [`ArrayView3`] expect the shape `(chains, draws, parameters)`.

use core::fmt;
use ndarray::{concatenate, prelude::*};
use ndarray_stats::QuantileExt;
use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::core::{ChainStatus, PosteriorSamples};
use crate::error::{Error, Result};

/// Series up to this length use the brute-force autocovariance.
const BRUTE_FORCE_MAX_LEN: usize = 100;

/// Fewest draws per chain for split R-hat and ESS: two halves of at least two draws.
const MIN_SPLIT_DRAWS: usize = 4;

/// Summary statistics of a set of values.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct BasicStats {
    pub name: String,
    pub min: f64,
    pub median: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl fmt::Display for BasicStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in [{:.2}, {:.2}], median: {:.2}, mean: {:.2} ± {:.2}",
            self.name, self.min, self.max, self.median, self.mean, self.std
        )
    }
}

/// Computes basic statistics of `data`, ignoring NaNs. `None` if nothing is left.
pub fn basic_stats(name: &str, data: &[f64]) -> Option<BasicStats> {
    let mut data: Vec<f64> = data.iter().copied().filter(|x| !x.is_nan()).collect();
    if data.is_empty() {
        return None;
    }
    data.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = data.len();
    let median = if n % 2 == 1 {
        data[n / 2]
    } else {
        0.5 * (data[n / 2 - 1] + data[n / 2])
    };
    let mean = data.iter().sum::<f64>() / n as f64;
    let std = if n > 1 {
        (data.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        0.0
    };
    Some(BasicStats {
        name: name.to_string(),
        min: data[0],
        median,
        max: data[n - 1],
        mean,
        std,
    })
}

/// ESS and R-hat across parameters of a run.
#[derive(Clone, Debug, PartialEq, PartialOrd)]
pub struct RunStats {
    pub ess: BasicStats,
    /// Absent for a single chain.
    pub rhat: Option<BasicStats>,
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ess)?;
        if let Some(rhat) = &self.rhat {
            write!(f, "\n{rhat}")?;
        }
        Ok(())
    }
}

impl RunStats {
    /// Summarizes ESS and split R-hat over all parameters of `sample`.
    ///
    /// `None` when the chains are too short for the split estimators.
    pub fn from_view(sample: ArrayView3<f64>) -> Option<Self> {
        let ess = effective_sample_size(sample)?;
        let ess = basic_stats("ESS", ess.as_slice()?)?;
        let rhat = split_rhat(sample)
            .and_then(|r| basic_stats("Split R-hat", r.as_slice().unwrap_or(&[])));
        Some(RunStats { ess, rhat })
    }
}

/// Takes a (chains, draws, parameters) view and returns a new (2*chains, draws/2, parameters)
/// array by splitting each chain in half. The middle draw of an odd-length chain is dropped.
fn splitcat(sample: ArrayView3<f64>) -> Array3<f64> {
    let n = sample.shape()[1];
    let half = n / 2;
    let half_1 = sample.slice(s![.., ..half, ..]);
    let half_2 = sample.slice(s![.., n - half.., ..]);
    // Both halves have identical shapes, so concatenation cannot fail.
    concatenate(Axis(0), &[half_1, half_2]).unwrap_or_else(|_| half_1.to_owned())
}

/// Within-chain variance `W` and pooled variance estimate `var+` per parameter.
fn withinvar(sample: ArrayView3<f64>) -> (Array1<f64>, Array1<f64>) {
    let (c, n, p) = sample.dim();
    let nf = n as f64;
    let (within, var): (Vec<f64>, Vec<f64>) = (0..p)
        .into_par_iter()
        .map(|param_idx| {
            let data_p = sample.index_axis(Axis(2), param_idx); // (c, n)
            let chain_means: Vec<f64> = data_p.outer_iter().map(|row| row.sum() / nf).collect();
            let overall_mean = chain_means.iter().sum::<f64>() / c as f64;

            let b = if c > 1 {
                chain_means
                    .iter()
                    .map(|m| (m - overall_mean).powi(2))
                    .sum::<f64>()
                    * nf
                    / (c - 1) as f64
            } else {
                0.0
            };
            let w = data_p
                .outer_iter()
                .zip(&chain_means)
                .map(|(row, m)| row.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (nf - 1.0))
                .sum::<f64>()
                / c as f64;
            let v = ((nf - 1.0) / nf) * w + b / nf;
            (w, v)
        })
        .unzip();
    (Array1::from_vec(within), Array1::from_vec(var))
}

/**
Split R-hat (potential scale reduction) per parameter.

Each chain is cut in half and the halves are treated as separate chains, so slow drift
within a chain also inflates the statistic. Values near 1 mean the chains agree.

Returns `None` for fewer than two chains or fewer than four draws per chain.

```rust
use hier_mcmc::stats::split_rhat;
use ndarray::Array3;

let agreeing = Array3::from_shape_fn((2, 8, 1), |(_, i, _)| (i % 4) as f64);
let r = split_rhat(agreeing.view()).unwrap();
assert!(r[0] < 1.1);

let single = Array3::<f64>::zeros((1, 8, 1));
assert!(split_rhat(single.view()).is_none());
```
*/
pub fn split_rhat(sample: ArrayView3<f64>) -> Option<Array1<f64>> {
    let (c, n, _) = sample.dim();
    if c < 2 || n < MIN_SPLIT_DRAWS {
        return None;
    }
    let split = splitcat(sample);
    let (within, var) = withinvar(split.view());
    Some((var / within).mapv(f64::sqrt))
}

/**
Effective sample size per parameter.

Uses the split chains and the initial monotone positive sequence estimator of the
integrated autocorrelation time: lag pairs `rho[2t] + rho[2t+1]` are summed until the first
non-positive pair, each pair capped by its predecessor. The result is clamped to
`[0, chains * draws]` of the split sample.

Returns `None` for fewer than four draws per chain.
*/
pub fn effective_sample_size(sample: ArrayView3<f64>) -> Option<Array1<f64>> {
    if sample.shape()[1] < MIN_SPLIT_DRAWS || sample.shape()[0] == 0 {
        return None;
    }
    let split = splitcat(sample);
    let (within, var) = withinvar(split.view());
    Some(ess(split.view(), within.view(), var.view()))
}

fn ess(sample: ArrayView3<f64>, within: ArrayView1<f64>, var: ArrayView1<f64>) -> Array1<f64> {
    let (n_chains, n_steps, n_params) = sample.dim();
    let chain_acov: Vec<Array2<f64>> = sample.outer_iter().map(autocov).collect();
    let total = (n_chains * n_steps) as f64;

    let ess: Vec<f64> = (0..n_params)
        .into_par_iter()
        .map(|d| {
            let rho: Vec<f64> = (0..n_steps)
                .map(|t| {
                    let avg = chain_acov.iter().map(|a| a[[t, d]]).sum::<f64>() / n_chains as f64;
                    1.0 - (within[d] - avg) / var[d]
                })
                .collect();
            let tau = integrated_autocorr_time(&rho);
            if tau.is_nan() {
                f64::NAN
            } else if tau <= 0.0 {
                total
            } else {
                (total / tau).clamp(0.0, total)
            }
        })
        .collect();
    Array1::from_vec(ess)
}

fn integrated_autocorr_time(rho: &[f64]) -> f64 {
    if rho.iter().any(|r| r.is_nan()) {
        return f64::NAN;
    }
    let mut min = if rho.len() >= 2 {
        rho[0] + rho[1]
    } else {
        0.0
    };
    let mut out = 0.0;
    for pair in rho.chunks_exact(2) {
        let mut p_t = pair[0] + pair[1];
        if p_t <= 0.0 {
            break;
        }
        if p_t > min {
            p_t = min;
        }
        min = p_t;
        out += p_t;
    }
    -1.0 + 2.0 * out
}

fn autocov(sample: ArrayView2<f64>) -> Array2<f64> {
    if sample.nrows() <= BRUTE_FORCE_MAX_LEN {
        autocov_bf(sample)
    } else {
        autocov_fft(sample)
    }
}

/// Autocovariance of each column of an `(n, d)` array via zero-padded FFT.
///
/// The result has the same shape, lag along the rows, normalized by `n`.
fn autocov_fft(sample: ArrayView2<f64>) -> Array2<f64> {
    let (n, d) = sample.dim();
    if n == 0 {
        return Array2::zeros((0, d));
    }
    let mut planner = FftPlanner::new();

    // Next power of 2 >= 2*n - 1 for zero-padding to avoid wrap-around.
    let n_padded = (2 * n - 1).next_power_of_two();
    let fft = planner.plan_fft_forward(n_padded);
    let ffti = planner.plan_fft_inverse(n_padded);

    let mut out = Array2::<f64>::zeros((n, d));
    out.axis_iter_mut(Axis(1))
        .into_par_iter()
        .zip(sample.axis_iter(Axis(1)).into_par_iter())
        .for_each(|(mut out_col, traj)| {
            let traj_mean = traj.sum() / n as f64;
            let mut x: Vec<Complex<f64>> = traj
                .iter()
                .map(|xi| Complex::new(xi - traj_mean, 0.0))
                .chain(std::iter::repeat(Complex::new(0.0, 0.0)).take(n_padded - n))
                .collect();
            fft.process(&mut x);
            x.iter_mut().for_each(|xi| *xi *= xi.conj());
            ffti.process(&mut x);
            // rustfft does not normalize
            for (o, xi) in out_col.iter_mut().zip(&x) {
                *o = xi.re / n_padded as f64 / n as f64;
            }
        });
    out
}

/// Brute-force autocovariance of each column of an `(n, d)` array.
///
/// `out[lag, col] = sum_{t < n - lag} x[t, col] * x[t + lag, col] / n` for the centered `x`.
fn autocov_bf(data: ArrayView2<f64>) -> Array2<f64> {
    let (n, d) = data.dim();
    let mut out = Array2::<f64>::zeros((n, d));

    out.axis_iter_mut(Axis(1))
        .into_par_iter()
        .enumerate()
        .for_each(|(col_idx, mut out_col)| {
            let col = data.column(col_idx);
            let mean = col.sum() / n as f64;
            let centered: Vec<f64> = col.iter().map(|x| x - mean).collect();
            for lag in 0..n {
                let sum_lag: f64 = (0..n - lag).map(|t| centered[t] * centered[t + lag]).sum();
                out_col[lag] = sum_lag / n as f64;
            }
        });
    out
}

/// Normalized autocorrelation of `series` at lags `0..=max_lag`.
///
/// `max_lag` is capped at `series.len() - 1`. An empty series yields an empty vector and a
/// constant series yields `NaN` at every lag.
pub fn autocorrelation(series: &[f64], max_lag: usize) -> Vec<f64> {
    let n = series.len();
    if n == 0 {
        return Vec::new();
    }
    let column = ArrayView2::from_shape((n, 1), series);
    let acov = match column {
        Ok(view) => autocov(view),
        Err(_) => return Vec::new(),
    };
    let lag0 = acov[[0, 0]];
    let max_lag = max_lag.min(n - 1);
    (0..=max_lag)
        .map(|lag| {
            if lag0 > 0.0 {
                acov[[lag, 0]] / lag0
            } else {
                f64::NAN
            }
        })
        .collect()
}

/// Autocorrelation of `param` for each chain that retained draws.
pub fn autocorrelations(
    samples: &PosteriorSamples,
    param: &str,
    max_lag: usize,
) -> Result<Vec<Vec<f64>>> {
    Ok(samples
        .per_chain(param)?
        .iter()
        .map(|chain| autocorrelation(chain, max_lag))
        .collect())
}

/// Per-chain trace summary of `param`, one entry per chain that retained draws.
pub fn trace_summary(samples: &PosteriorSamples, param: &str) -> Result<Vec<BasicStats>> {
    samples
        .per_chain(param)?
        .iter()
        .zip(samples.retained_chains())
        .map(|(values, chain)| {
            basic_stats(&format!("{param} (chain {chain})"), values).ok_or_else(|| {
                Error::Configuration(format!("chain {chain} has no finite draws of {param}"))
            })
        })
        .collect()
}

/// Thresholds of [`diagnose`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// R-hat above this value raises [`ConvergenceWarning::HighRhat`].
    pub rhat_threshold: f64,
    /// ESS below this value raises [`ConvergenceWarning::LowEss`].
    pub min_ess: f64,
    /// Fewer common draws per chain raise [`ConvergenceWarning::TooFewDraws`].
    pub min_draws_per_chain: usize,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            rhat_threshold: 1.1,
            min_ess: 100.0,
            min_draws_per_chain: 20,
        }
    }
}

impl DiagnosticsConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.rhat_threshold.is_finite() && self.rhat_threshold >= 1.0) {
            return Err(Error::Configuration(format!(
                "R-hat threshold must be finite and >= 1, got {}",
                self.rhat_threshold
            )));
        }
        if !(self.min_ess.is_finite() && self.min_ess >= 0.0) {
            return Err(Error::Configuration(format!(
                "ESS floor must be finite and >= 0, got {}",
                self.min_ess
            )));
        }
        Ok(())
    }
}

/// A convergence problem found by [`diagnose`]. Reported next to the draws, never raised.
#[derive(Debug, Clone, PartialEq)]
pub enum ConvergenceWarning {
    HighRhat {
        param: String,
        rhat: f64,
        threshold: f64,
    },
    LowEss {
        param: String,
        ess: f64,
        floor: f64,
    },
    /// Chains retained different numbers of draws. R-hat and ESS use the common prefix.
    UnequalChainLengths { min: usize, max: usize },
    /// A chain stopped before its configured iteration count.
    CurtailedRun {
        chain: usize,
        status: ChainStatus,
        retained: usize,
    },
    TooFewDraws { draws: usize, required: usize },
}

impl ConvergenceWarning {
    /// Whether the warning concerns mixing of the chains rather than how the run ended.
    pub fn is_mixing_problem(&self) -> bool {
        matches!(self, Self::HighRhat { .. } | Self::LowEss { .. })
    }
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighRhat {
                param,
                rhat,
                threshold,
            } => write!(f, "R-hat of {param} is {rhat:.3} (> {threshold})"),
            Self::LowEss { param, ess, floor } => {
                write!(f, "ESS of {param} is {ess:.1} (< {floor})")
            }
            Self::UnequalChainLengths { min, max } => write!(
                f,
                "chains retained between {min} and {max} draws, diagnostics use the first {min}"
            ),
            Self::CurtailedRun {
                chain,
                status,
                retained,
            } => write!(f, "chain {chain} ended {status:?} with {retained} retained draws"),
            Self::TooFewDraws { draws, required } => {
                write!(f, "only {draws} draws per chain, at least {required} recommended")
            }
        }
    }
}

/// Diagnostics of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamDiagnostics {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    /// `None` when the chains are too short.
    pub ess: Option<f64>,
    /// `None` for a single chain or too short chains.
    pub rhat: Option<f64>,
    /// Lag-1 autocorrelation averaged over chains.
    pub lag1_autocorr: f64,
}

/// Output of [`diagnose`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticReport {
    pub params: Vec<ParamDiagnostics>,
    pub warnings: Vec<ConvergenceWarning>,
    /// Chains that contributed draws.
    pub n_chains: usize,
    /// Common number of draws per chain used for R-hat and ESS.
    pub draws_per_chain: usize,
    pub run_stats: Option<RunStats>,
}

impl DiagnosticReport {
    pub fn get(&self, name: &str) -> Option<&ParamDiagnostics> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Largest R-hat over all parameters, skipping NaNs.
    pub fn max_rhat(&self) -> Option<f64> {
        let rhats: Array1<f64> = self.params.iter().filter_map(|p| p.rhat).collect();
        let max = *rhats.max_skipnan();
        max.is_finite().then_some(max)
    }

    /// Smallest ESS over all parameters.
    pub fn min_ess(&self) -> Option<f64> {
        self.params
            .iter()
            .filter_map(|p| p.ess)
            .filter(|e| !e.is_nan())
            .min_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
    }

    /// True when no parameter shows a mixing problem.
    pub fn is_converged(&self) -> bool {
        !self.warnings.iter().any(|w| w.is_mixing_problem())
    }
}

/**
Computes convergence diagnostics for every parameter and collects warnings.

Warnings are logged with `log::warn!` and returned in the report. Nothing here fails: a
run that did not converge still has its draws, and the caller decides what to do.
*/
pub fn diagnose(samples: &PosteriorSamples, config: &DiagnosticsConfig) -> DiagnosticReport {
    let mut warnings = Vec::new();

    for report in samples.chains() {
        if report.status != ChainStatus::Completed {
            warnings.push(ConvergenceWarning::CurtailedRun {
                chain: report.chain,
                status: report.status,
                retained: report.retained,
            });
        }
    }

    let lengths: Vec<usize> = samples
        .chains()
        .iter()
        .map(|c| c.retained)
        .filter(|&n| n > 0)
        .collect();
    let min_len = lengths.iter().copied().min().unwrap_or(0);
    let max_len = lengths.iter().copied().max().unwrap_or(0);
    if min_len != max_len {
        warnings.push(ConvergenceWarning::UnequalChainLengths {
            min: min_len,
            max: max_len,
        });
    }
    if min_len < config.min_draws_per_chain {
        warnings.push(ConvergenceWarning::TooFewDraws {
            draws: min_len,
            required: config.min_draws_per_chain,
        });
    }

    let chains = samples.chain_array();
    let rhat = split_rhat(chains.view());
    let ess = effective_sample_size(chains.view());

    let draws = samples.draws();
    let params: Vec<ParamDiagnostics> = samples
        .param_names()
        .iter()
        .enumerate()
        .map(|(k, name)| {
            let column = draws.column(k);
            let n = column.len() as f64;
            let mean = column.sum() / n;
            let sd = if column.len() > 1 {
                (column.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
            } else {
                f64::NAN
            };
            let lag1: Vec<f64> = chains
                .outer_iter()
                .filter_map(|chain| {
                    let series: Vec<f64> = chain.column(k).to_vec();
                    autocorrelation(&series, 1).get(1).copied()
                })
                .collect();
            let lag1_autocorr = if lag1.is_empty() {
                f64::NAN
            } else {
                lag1.iter().sum::<f64>() / lag1.len() as f64
            };
            ParamDiagnostics {
                name: name.clone(),
                mean,
                sd,
                ess: ess.as_ref().map(|e| e[k]),
                rhat: rhat.as_ref().map(|r| r[k]),
                lag1_autocorr,
            }
        })
        .collect();

    for p in &params {
        if let Some(r) = p.rhat {
            // NaN when every split half is constant.
            if !r.is_finite() || r > config.rhat_threshold {
                warnings.push(ConvergenceWarning::HighRhat {
                    param: p.name.clone(),
                    rhat: r,
                    threshold: config.rhat_threshold,
                });
            }
        }
        if let Some(e) = p.ess {
            if e < config.min_ess {
                warnings.push(ConvergenceWarning::LowEss {
                    param: p.name.clone(),
                    ess: e,
                    floor: config.min_ess,
                });
            }
        }
    }

    for w in &warnings {
        log::warn!("{w}");
    }
    let run_stats = RunStats::from_view(chains.view());
    if let Some(stats) = &run_stats {
        log::info!("{stats}");
    }

    DiagnosticReport {
        params,
        warnings,
        n_chains: chains.shape()[0],
        draws_per_chain: min_len,
        run_stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChainReport;
    use crate::gibbs::AcceptanceStats;
    use approx::assert_abs_diff_eq;
    use std::time::Duration;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn run_test_case(
        autocov_func: &dyn Fn(ArrayView2<f64>) -> Array2<f64>,
        data: &Array2<f64>,
        expected: &Array2<f64>,
    ) {
        let result = autocov_func(data.view());
        assert_eq!(result.dim(), expected.dim());
        assert_abs_diff_eq!(result, *expected, epsilon = 1e-9);
    }

    #[test]
    fn test_single_param() {
        let data = array![[1.0], [2.0], [3.0], [4.0]];
        let expected = array![[1.25], [0.3125], [-0.375], [-0.5625]];
        run_test_case(&autocov_bf, &data, &expected);
        run_test_case(&autocov_fft, &data, &expected);
    }

    #[test]
    fn test_two_params() {
        let data = array![[1.0, 0.3], [2.0, 2.0], [3.0, -2.0], [4.0, 5.0]];
        let expected = array![
            [1.25, 6.516875],
            [0.3125, -3.78890625],
            [-0.375, 1.4721875],
            [-0.5625, -0.94171875],
        ];
        run_test_case(&autocov_bf, &data, &expected);
        run_test_case(&autocov_fft, &data, &expected);
    }

    #[test]
    fn fft_matches_brute_force_on_long_series() {
        let mut rng = SmallRng::seed_from_u64(3);
        let data = Array2::from_shape_fn((300, 2), |_| rng.random::<f64>());
        let bf = autocov_bf(data.view());
        let fft = autocov_fft(data.view());
        assert_abs_diff_eq!(bf, fft, epsilon = 1e-9);
    }

    #[test]
    fn autocorrelation_is_normalized() {
        let rho = autocorrelation(&[1.0, 2.0, 3.0, 4.0], 10);
        assert_eq!(rho.len(), 4);
        assert_abs_diff_eq!(rho[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rho[1], 0.25, epsilon = 1e-12);
        assert!(autocorrelation(&[], 3).is_empty());
        assert!(autocorrelation(&[2.0, 2.0, 2.0], 2).iter().all(|r| r.is_nan()));
    }

    #[test]
    fn rhat_and_ess_of_iid_chains() {
        let mut rng = SmallRng::seed_from_u64(42);
        let data = Array3::from_shape_fn((4, 1000, 1), |_| rng.random::<f64>());
        let rhat = split_rhat(data.view()).unwrap();
        let ess = effective_sample_size(data.view()).unwrap();
        assert!(rhat[0] < 1.01, "rhat = {}", rhat[0]);
        assert!(ess[0] > 3_400.0 && ess[0] <= 4_000.0, "ess = {}", ess[0]);
    }

    #[test]
    fn ess_of_autocorrelated_chains() {
        // AR(1) with phi = 0.9: ESS / N is close to (1 - phi) / (1 + phi) = 0.053.
        let phi = 0.9;
        let mut rng = SmallRng::seed_from_u64(7);
        let mut data = Array3::<f64>::zeros((4, 5_000, 1));
        for mut chain in data.outer_iter_mut() {
            let mut x = 0.0;
            for t in 0..5_000 {
                let z: f64 = rng.sample(StandardNormal);
                x = phi * x + z;
                chain[[t, 0]] = x;
            }
        }
        let ess = effective_sample_size(data.view()).unwrap()[0];
        assert!(ess > 600.0 && ess < 1_600.0, "ess = {ess}");
    }

    #[test]
    fn rhat_detects_separated_chains() {
        let mut rng = SmallRng::seed_from_u64(1);
        let data = Array3::from_shape_fn((2, 500, 1), |(c, _, _)| {
            c as f64 * 5.0 + rng.random::<f64>()
        });
        let rhat = split_rhat(data.view()).unwrap();
        assert!(rhat[0] > 2.0, "rhat = {}", rhat[0]);
    }

    #[test]
    fn rhat_known_value() {
        // Two chains of four draws split into four halves of two draws.
        let data = Array3::from_shape_vec(
            (2, 4, 1),
            vec![0.0, 1.0, 2.0, 3.0, 1.0, 1.0, 0.0, 2.0],
        )
        .unwrap();
        let rhat = split_rhat(data.view()).unwrap();
        // Halves: [0,1] [1,1] [2,3] [0,2]; W = 0.75, B = 1.5, var+ = 1.125.
        assert_abs_diff_eq!(rhat[0], 1.5_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn short_chains_have_no_split_diagnostics() {
        let data = Array3::<f64>::zeros((2, 3, 2));
        assert!(split_rhat(data.view()).is_none());
        assert!(effective_sample_size(data.view()).is_none());
        assert!(RunStats::from_view(data.view()).is_none());
    }

    #[test]
    fn single_chain_ess_without_rhat() {
        let mut rng = SmallRng::seed_from_u64(11);
        let data = Array3::from_shape_fn((1, 400, 1), |_| rng.random::<f64>());
        assert!(split_rhat(data.view()).is_none());
        let stats = RunStats::from_view(data.view()).unwrap();
        assert!(stats.rhat.is_none());
        assert!(stats.ess.min > 0.0 && stats.ess.max <= 400.0);
    }

    #[test]
    fn basic_stats_of_values() {
        let stats = basic_stats("x", &[3.0, 1.0, f64::NAN, 2.0, 4.0]).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_abs_diff_eq!(stats.median, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.mean, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.std, (5.0_f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert!(basic_stats("empty", &[]).is_none());
    }

    fn report(chain: usize, status: ChainStatus, retained: usize) -> ChainReport {
        ChainReport {
            chain,
            seed: chain as u64,
            status,
            iterations: retained,
            retained,
            acceptance: AcceptanceStats::default(),
            proposal_steps: vec![],
            elapsed: Duration::ZERO,
        }
    }

    fn single_param_samples(chains: Vec<ChainReport>, rows: Vec<Vec<f64>>) -> PosteriorSamples {
        PosteriorSamples::from_chains(vec!["x".into()], vec![], 1, chains, rows).unwrap()
    }

    #[test]
    fn curtailed_chain_is_reported() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut series = |n: usize| -> Vec<f64> {
            (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)).collect()
        };
        let rows = vec![series(5), series(10)];
        let samples = single_param_samples(
            vec![
                report(0, ChainStatus::Cancelled, 5),
                report(1, ChainStatus::Completed, 10),
            ],
            rows,
        );
        assert_eq!(samples.n_draws(), 15);

        let diag = diagnose(&samples, &DiagnosticsConfig::default());
        assert_eq!(diag.draws_per_chain, 5);
        assert_eq!(diag.n_chains, 2);
        assert!(diag.warnings.contains(&ConvergenceWarning::CurtailedRun {
            chain: 0,
            status: ChainStatus::Cancelled,
            retained: 5,
        }));
        assert!(diag
            .warnings
            .contains(&ConvergenceWarning::UnequalChainLengths { min: 5, max: 10 }));
        assert!(diag.warnings.contains(&ConvergenceWarning::TooFewDraws {
            draws: 5,
            required: 20,
        }));
        let curtailed = diag
            .warnings
            .iter()
            .filter(|w| matches!(w, ConvergenceWarning::CurtailedRun { .. }))
            .count();
        assert_eq!(curtailed, 1);
    }

    #[test]
    fn stuck_chains_are_flagged() {
        let samples = single_param_samples(
            vec![
                report(0, ChainStatus::Completed, 30),
                report(1, ChainStatus::Completed, 30),
            ],
            vec![vec![2.5; 30], vec![2.5; 30]],
        );
        let diag = diagnose(&samples, &DiagnosticsConfig::default());
        assert!(diag.get("x").unwrap().rhat.unwrap().is_nan());
        assert!(diag.warnings.iter().any(|w| matches!(
            w,
            ConvergenceWarning::HighRhat { param, rhat, .. } if param == "x" && rhat.is_nan()
        )));
        assert!(!diag.is_converged());
    }

    #[test]
    fn warning_display() {
        let w = ConvergenceWarning::HighRhat {
            param: "tau".into(),
            rhat: 1.25,
            threshold: 1.1,
        };
        assert_eq!(w.to_string(), "R-hat of tau is 1.250 (> 1.1)");
        assert!(w.is_mixing_problem());
        assert!(!ConvergenceWarning::TooFewDraws {
            draws: 3,
            required: 20
        }
        .is_mixing_problem());
    }
}
