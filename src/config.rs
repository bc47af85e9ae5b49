//! # Simulation Configuration
//!
//! Every Monte Carlo knob is explicit configuration passed by the caller:
//! iteration count, seed, chunking, parallelism, quantile rule, memory budget
//! and cancellation. Presets carry the documented defaults for the two
//! estimators.

use crate::errors::{validate_parameter, MadAnalysisError, MadResult};
use crate::quantile::QuantileMethod;
use crate::simulation::CancellationToken;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default iteration count for critical-value tables.
///
/// Low-α tail quantiles need far more samples than the body of the
/// distribution.
pub const DEFAULT_CRITICAL_NITER: u64 = 100_000_000;

/// Default iteration count for power estimates.
pub const DEFAULT_POWER_NITER: u64 = 1_000_000;

/// Default trials per chunk (one RNG stream and one unit of parallel work).
pub const DEFAULT_CHUNK_SIZE: u64 = 100_000;

/// Default histogram resolution over [0°, 90°].
pub const DEFAULT_HISTOGRAM_BINS: usize = 1 << 18;

/// Minimum number of valid samples for a reportable estimate.
pub const DEFAULT_MIN_VALID_SAMPLES: u64 = 100;

/// Default memory budget for exact accumulation, in megabytes.
///
/// 10^6 exact samples fit easily; 10^8 do not and fall back to the histogram.
pub const DEFAULT_MAX_MEMORY_MB: u64 = 256;

/// Fraction of degenerate trials above which a warning is logged.
pub const DEFAULT_INVALID_FRACTION_WARNING: f64 = 0.01;

/// How the MAD distribution is held for quantile estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AccumulationStrategy {
    /// Keep every valid MAD value; quantiles are exact order statistics.
    Exact,
    /// Fixed-width histogram over [0°, 90°]; memory independent of `niter`.
    Histogram {
        /// Number of bins
        bins: usize,
    },
    /// Exact when it fits `max_memory_mb`, histogram otherwise.
    #[default]
    Auto,
}

/// Configuration for one Monte Carlo estimation.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationConfig {
    /// Number of Monte Carlo trials
    pub niter: u64,
    /// Trials per chunk
    pub chunk_size: u64,
    /// Run seed; `None` draws one from OS entropy (logged at debug level)
    pub seed: Option<u64>,
    /// Spread chunks over the rayon pool (requires the `parallel` feature)
    pub parallel: bool,
    /// Interpolation rule for critical values
    pub quantile_method: QuantileMethod,
    /// Storage of the MAD distribution for quantiles
    pub accumulation: AccumulationStrategy,
    /// Memory budget for exact accumulation, in megabytes
    pub max_memory_mb: u64,
    /// Fewer valid samples than this fails with `InsufficientSamples`
    pub min_valid_samples: u64,
    /// Invalid-trial fraction above which a warning is logged
    pub invalid_fraction_warning: f64,
    /// Wall-clock budget; exceeding it cancels the run
    pub time_limit: Option<Duration>,
    /// Return an estimate from completed chunks when cancelled
    pub allow_partial: bool,
    /// External cancellation signal
    #[cfg_attr(feature = "serde", serde(skip))]
    pub cancellation: Option<CancellationToken>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::power()
    }
}

impl SimulationConfig {
    /// Preset for critical-value tables (10^8 trials).
    pub fn critical_values() -> Self {
        Self {
            niter: DEFAULT_CRITICAL_NITER,
            ..Self::power()
        }
    }

    /// Preset for power estimates (10^6 trials).
    pub fn power() -> Self {
        Self {
            niter: DEFAULT_POWER_NITER,
            chunk_size: DEFAULT_CHUNK_SIZE,
            seed: None,
            parallel: true,
            quantile_method: QuantileMethod::Linear,
            accumulation: AccumulationStrategy::Auto,
            max_memory_mb: DEFAULT_MAX_MEMORY_MB,
            min_valid_samples: DEFAULT_MIN_VALID_SAMPLES,
            invalid_fraction_warning: DEFAULT_INVALID_FRACTION_WARNING,
            time_limit: None,
            allow_partial: false,
            cancellation: None,
        }
    }

    /// Small seeded preset for unit tests and examples.
    pub fn test() -> Self {
        Self {
            niter: 20_000,
            chunk_size: 5_000,
            seed: Some(12345),
            ..Self::power()
        }
    }

    /// Start a builder from the power preset.
    pub fn builder() -> SimulationConfigBuilder {
        SimulationConfigBuilder::new()
    }

    /// Memory budget in bytes.
    pub fn max_memory_bytes(&self) -> u64 {
        self.max_memory_mb.saturating_mul(1024 * 1024)
    }

    /// Number of chunks the run is split into.
    pub fn chunk_count(&self) -> u64 {
        if self.chunk_size == 0 {
            0
        } else {
            self.niter.div_ceil(self.chunk_size)
        }
    }

    /// Check every field; called by all estimators before simulating.
    pub fn validate(&self) -> MadResult<()> {
        if self.niter == 0 {
            return Err(MadAnalysisError::invalid(
                "niter",
                0.0,
                "must be greater than 0",
            ));
        }
        if self.chunk_size == 0 {
            return Err(MadAnalysisError::invalid(
                "chunk_size",
                0.0,
                "must be greater than 0",
            ));
        }
        if self.max_memory_mb == 0 {
            return Err(MadAnalysisError::invalid(
                "max_memory_mb",
                0.0,
                "must be greater than 0",
            ));
        }
        if let AccumulationStrategy::Histogram { bins } = self.accumulation {
            if bins == 0 {
                return Err(MadAnalysisError::invalid(
                    "histogram_bins",
                    0.0,
                    "must be greater than 0",
                ));
            }
        }
        validate_parameter(
            self.invalid_fraction_warning,
            0.0,
            1.0,
            "invalid_fraction_warning",
        )?;
        if self.niter < self.min_valid_samples {
            return Err(MadAnalysisError::InsufficientSamples {
                required: self.min_valid_samples,
                actual: self.niter,
            });
        }
        Ok(())
    }
}

/// Fluent builder for [`SimulationConfig`].
#[derive(Debug, Clone)]
pub struct SimulationConfigBuilder {
    config: SimulationConfig,
}

impl Default for SimulationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulationConfigBuilder {
    /// Start from the power preset.
    pub fn new() -> Self {
        Self {
            config: SimulationConfig::power(),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Set the number of trials.
    pub fn niter(mut self, niter: u64) -> Self {
        self.config.niter = niter;
        self
    }

    /// Set the chunk size.
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.config.chunk_size = chunk_size;
        self
    }

    /// Fix the run seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Enable or disable parallel chunks.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    /// Set the quantile rule.
    pub fn quantile_method(mut self, method: QuantileMethod) -> Self {
        self.config.quantile_method = method;
        self
    }

    /// Set the accumulation strategy.
    pub fn accumulation(mut self, strategy: AccumulationStrategy) -> Self {
        self.config.accumulation = strategy;
        self
    }

    /// Set the memory budget in megabytes.
    pub fn max_memory_mb(mut self, mb: u64) -> Self {
        self.config.max_memory_mb = mb;
        self
    }

    /// Set the minimum number of valid samples.
    pub fn min_valid_samples(mut self, min: u64) -> Self {
        self.config.min_valid_samples = min;
        self
    }

    /// Set the invalid-fraction warning threshold.
    pub fn invalid_fraction_warning(mut self, fraction: f64) -> Self {
        self.config.invalid_fraction_warning = fraction;
        self
    }

    /// Set a wall-clock budget.
    pub fn time_limit(mut self, limit: Duration) -> Self {
        self.config.time_limit = Some(limit);
        self
    }

    /// Accept partial estimates on cancellation.
    pub fn allow_partial(mut self, allow: bool) -> Self {
        self.config.allow_partial = allow;
        self
    }

    /// Attach a cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.config.cancellation = Some(token);
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> MadResult<SimulationConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(SimulationConfig::critical_values().niter, 100_000_000);
        assert_eq!(SimulationConfig::power().niter, 1_000_000);
        assert_eq!(SimulationConfig::default().niter, DEFAULT_POWER_NITER);
        assert!(SimulationConfig::test().seed.is_some());
        for config in [
            SimulationConfig::critical_values(),
            SimulationConfig::power(),
            SimulationConfig::test(),
        ] {
            assert!(config.validate().is_ok());
            assert_eq!(config.quantile_method, QuantileMethod::Linear);
        }
    }

    #[test]
    fn test_chunk_count_rounds_up() {
        let config = SimulationConfig::builder()
            .niter(1_050)
            .chunk_size(100)
            .build()
            .unwrap();
        assert_eq!(config.chunk_count(), 11);
    }

    #[test]
    fn test_builder_rejects_invalid_values() {
        assert!(matches!(
            SimulationConfig::builder().niter(0).build(),
            Err(MadAnalysisError::InvalidParameter { .. })
        ));
        assert!(SimulationConfig::builder().chunk_size(0).build().is_err());
        assert!(SimulationConfig::builder().max_memory_mb(0).build().is_err());
        assert!(SimulationConfig::builder()
            .invalid_fraction_warning(1.5)
            .build()
            .is_err());
        assert!(SimulationConfig::builder()
            .accumulation(AccumulationStrategy::Histogram { bins: 0 })
            .build()
            .is_err());
    }

    #[test]
    fn test_niter_below_minimum_is_insufficient() {
        match SimulationConfig::builder().niter(50).build() {
            Err(MadAnalysisError::InsufficientSamples { required, actual }) => {
                assert_eq!(required, DEFAULT_MIN_VALID_SAMPLES);
                assert_eq!(actual, 50);
            }
            other => panic!("Expected InsufficientSamples, got {:?}", other),
        }
    }

    #[test]
    fn test_builder_sets_fields() {
        let token = CancellationToken::new();
        let config = SimulationConfig::builder()
            .niter(5_000)
            .chunk_size(1_000)
            .seed(9)
            .parallel(false)
            .quantile_method(QuantileMethod::Lower)
            .accumulation(AccumulationStrategy::Exact)
            .min_valid_samples(10)
            .time_limit(Duration::from_secs(5))
            .allow_partial(true)
            .cancellation(token)
            .build()
            .unwrap();
        assert_eq!(config.seed, Some(9));
        assert!(!config.parallel);
        assert_eq!(config.quantile_method, QuantileMethod::Lower);
        assert_eq!(config.accumulation, AccumulationStrategy::Exact);
        assert_eq!(config.time_limit, Some(Duration::from_secs(5)));
        assert!(config.allow_partial);
        assert!(config.cancellation.is_some());
        assert_eq!(config.max_memory_bytes(), 256 * 1024 * 1024);
    }
}
