//! # Critical MAD Values
//!
//! Under the null hypothesis the demagnetization points are isotropic noise,
//! so the scatter matrix of an N-point fit is Wishart(N − 1, I). The
//! critical MAD at level α is the α-quantile of the simulated MAD
//! distribution: a fit whose MAD falls at or below it is a better line than
//! random scatter would produce with probability 1 − α.

use crate::accumulator::{QuantileAccumulator, ResolvedStrategy};
use crate::config::SimulationConfig;
use crate::errors::{validate_open_interval, validate_point_count, MadResult};
use crate::quantile::QuantileMethod;
use crate::rng::{entropy_seed, mix_seed};
use crate::simulation::{run_simulation, SimulationDiagnostics};
use crate::wishart::{ScaleMatrix, WishartSampler};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Critical MAD values for one point count.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CriticalValueTable {
    /// Number of demagnetization points N
    pub n_points: usize,
    /// Significance levels, in the caller's order
    pub alphas: Vec<f64>,
    /// MADc in degrees, aligned with `alphas`
    pub critical_mads: Vec<f64>,
    /// Interpolation rule used for the quantiles
    pub quantile_method: QuantileMethod,
    /// Run bookkeeping
    pub diagnostics: SimulationDiagnostics,
}

impl CriticalValueTable {
    /// MADc for a significance level that was part of the request.
    pub fn critical_mad(&self, alpha: f64) -> Option<f64> {
        self.alphas
            .iter()
            .position(|&a| a == alpha)
            .map(|i| self.critical_mads[i])
    }

    /// `(alpha, MADc)` pairs in request order.
    pub fn rows(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.alphas
            .iter()
            .copied()
            .zip(self.critical_mads.iter().copied())
    }

    /// Whether the values come from a cancelled run.
    pub fn is_partial(&self) -> bool {
        self.diagnostics.partial
    }
}

fn validate_alphas(alphas: &[f64]) -> MadResult<()> {
    for &alpha in alphas {
        validate_open_interval(alpha, 0.0, 1.0, "alpha")?;
    }
    Ok(())
}

/// Warn when a larger α gives a smaller MADc.
///
/// Quantiles of one distribution are monotone, so this only fires on a
/// numerical accident.
fn check_monotone(n_points: usize, alphas: &[f64], critical_mads: &[f64]) -> bool {
    let mut pairs: Vec<(f64, f64)> = alphas
        .iter()
        .copied()
        .zip(critical_mads.iter().copied())
        .filter(|(_, mad)| !mad.is_nan())
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let monotone = pairs.windows(2).all(|w| w[0].1 <= w[1].1);
    if !monotone {
        log::warn!(
            "Critical MAD values for N = {} are not monotone in alpha: {:?}",
            n_points,
            pairs
        );
    }
    monotone
}

/// Critical MAD table with diagnostics.
///
/// # Errors
/// - `InvalidParameter` for N < 2, any α outside (0, 1), or a bad configuration
/// - `MemoryLimitExceeded` for explicit exact accumulation over budget
/// - any simulation error from [`run_simulation`]
pub fn estimate_critical_values(
    n_points: usize,
    alphas: &[f64],
    config: &SimulationConfig,
) -> MadResult<CriticalValueTable> {
    validate_point_count(n_points)?;
    validate_alphas(alphas)?;
    config.validate()?;

    if alphas.is_empty() {
        log::debug!("No significance levels requested for N = {}; skipping simulation", n_points);
        return Ok(CriticalValueTable {
            n_points,
            alphas: Vec::new(),
            critical_mads: Vec::new(),
            quantile_method: config.quantile_method,
            diagnostics: SimulationDiagnostics::default(),
        });
    }

    let strategy = ResolvedStrategy::from_config(config)?;
    let sampler = WishartSampler::for_point_count(n_points, ScaleMatrix::identity())?;
    let outcome = run_simulation(&sampler, config, || QuantileAccumulator::new(strategy))?;

    let mut accumulator = outcome.accumulator;
    let critical_mads = accumulator.quantiles(alphas, config.quantile_method);
    check_monotone(n_points, alphas, &critical_mads);

    log::debug!(
        "Critical MAD for N = {}: {:?} ({:?}, {} valid samples)",
        n_points,
        alphas.iter().zip(&critical_mads).collect::<Vec<_>>(),
        strategy,
        outcome.diagnostics.valid
    );

    Ok(CriticalValueTable {
        n_points,
        alphas: alphas.to_vec(),
        critical_mads,
        quantile_method: config.quantile_method,
        diagnostics: outcome.diagnostics,
    })
}

/// Critical MAD in degrees for each α, in input order.
///
/// # Example
/// ```rust
/// use mad_significance::{critical_mad, SimulationConfig};
///
/// let config = SimulationConfig::builder()
///     .niter(20_000)
///     .seed(7)
///     .build()
///     .unwrap();
/// let values = critical_mad(10, &[0.1, 0.05], &config).unwrap();
/// assert_eq!(values.len(), 2);
/// assert!(values[1] < values[0]);
/// ```
pub fn critical_mad(
    n_points: usize,
    alphas: &[f64],
    config: &SimulationConfig,
) -> MadResult<Vec<f64>> {
    estimate_critical_values(n_points, alphas, config).map(|table| table.critical_mads)
}

/// One critical-value table per point count.
///
/// Each N runs with its own seed derived from the configured seed, so rows
/// are independent and individually reproducible.
pub fn critical_mad_table(
    point_counts: &[usize],
    alphas: &[f64],
    config: &SimulationConfig,
) -> MadResult<Vec<CriticalValueTable>> {
    for &n_points in point_counts {
        validate_point_count(n_points)?;
    }
    validate_alphas(alphas)?;

    let base_seed = config.seed.unwrap_or_else(|| {
        let seed = entropy_seed();
        log::debug!("No seed configured; drew table seed {} from OS entropy", seed);
        seed
    });

    point_counts
        .iter()
        .map(|&n_points| {
            let row_config = SimulationConfig {
                seed: Some(mix_seed(base_seed, n_points as u64)),
                ..config.clone()
            };
            estimate_critical_values(n_points, alphas, &row_config)
        })
        .collect()
}
