//! Streaming reductions of the MAD distribution.
//!
//! Chunks of trials are reduced independently and then merged. Every merge
//! here is associative and commutative (integer counts, or a multiset that
//! is sorted before use), so the final estimate does not depend on how the
//! chunks were grouped or which thread ran them.

use crate::config::{AccumulationStrategy, SimulationConfig, DEFAULT_HISTOGRAM_BINS};
use crate::errors::{validate_allocation_size, MadAnalysisError, MadResult};
use crate::quantile::{quantile_with, QuantileMethod};

/// Upper end of the MAD range in degrees.
pub const MAD_RANGE_DEG: f64 = 90.0;

const BYTES_PER_SAMPLE: u64 = std::mem::size_of::<f64>() as u64;

/// Reduction over valid MAD values.
pub trait MadAccumulator: Send + Sized {
    /// Add one valid MAD value in degrees.
    fn record(&mut self, mad_deg: f64);

    /// Absorb another accumulator of the same kind.
    fn merge(&mut self, other: Self);

    /// Number of values recorded.
    fn count(&self) -> u64;
}

/// Counts values at or below a fixed threshold.
///
/// O(1) memory; used for power and p-values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdCounter {
    threshold: f64,
    at_or_below: u64,
    total: u64,
}

impl ThresholdCounter {
    /// Counter for `threshold` (degrees).
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            at_or_below: 0,
            total: 0,
        }
    }

    /// Threshold in degrees.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Values ≤ threshold.
    pub fn at_or_below(&self) -> u64 {
        self.at_or_below
    }

    /// Values > threshold.
    pub fn above(&self) -> u64 {
        self.total - self.at_or_below
    }

    /// Proportion of values ≤ threshold; NaN when empty.
    pub fn fraction_at_or_below(&self) -> f64 {
        if self.total == 0 {
            f64::NAN
        } else {
            self.at_or_below as f64 / self.total as f64
        }
    }
}

impl MadAccumulator for ThresholdCounter {
    fn record(&mut self, mad_deg: f64) {
        self.total += 1;
        if mad_deg <= self.threshold {
            self.at_or_below += 1;
        }
    }

    fn merge(&mut self, other: Self) {
        debug_assert_eq!(self.threshold.to_bits(), other.threshold.to_bits());
        self.total += other.total;
        self.at_or_below += other.at_or_below;
    }

    fn count(&self) -> u64 {
        self.total
    }
}

/// Every valid MAD value; exact order statistics.
#[derive(Debug, Clone, Default)]
pub struct ExactSamples {
    values: Vec<f64>,
    sorted: bool,
}

impl ExactSamples {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_sorted(&mut self) {
        if !self.sorted {
            self.values.sort_unstable_by(f64::total_cmp);
            self.sorted = true;
        }
    }

    /// Ascending view of the stored values.
    pub fn sorted_values(&mut self) -> &[f64] {
        self.ensure_sorted();
        &self.values
    }

    /// Quantile at probability `p`.
    pub fn quantile(&mut self, p: f64, method: QuantileMethod) -> f64 {
        self.ensure_sorted();
        let values = &self.values;
        quantile_with(values.len() as u64, p, method, |k| values[k as usize])
    }
}

impl MadAccumulator for ExactSamples {
    fn record(&mut self, mad_deg: f64) {
        self.values.push(mad_deg);
        self.sorted = false;
    }

    fn merge(&mut self, mut other: Self) {
        if other.values.len() > self.values.len() {
            std::mem::swap(&mut self.values, &mut other.values);
        }
        self.values.append(&mut other.values);
        self.sorted = false;
    }

    fn count(&self) -> u64 {
        self.values.len() as u64
    }
}

/// Fixed-width histogram of MAD over [0°, 90°].
///
/// Order statistics are recovered by spreading a bin's values evenly across
/// its width, so the quantile error is bounded by one bin width
/// (90° / bins).
#[derive(Debug, Clone, PartialEq)]
pub struct MadHistogram {
    counts: Vec<u64>,
    total: u64,
}

impl MadHistogram {
    /// Histogram with `bins` equal-width bins (at least one).
    pub fn new(bins: usize) -> Self {
        Self {
            counts: vec![0; bins.max(1)],
            total: 0,
        }
    }

    /// Number of bins.
    pub fn bins(&self) -> usize {
        self.counts.len()
    }

    /// Bin width in degrees.
    pub fn bin_width(&self) -> f64 {
        MAD_RANGE_DEG / self.counts.len() as f64
    }

    fn bin_index(&self, mad_deg: f64) -> usize {
        let bins = self.counts.len();
        let scaled = (mad_deg / MAD_RANGE_DEG) * bins as f64;
        if scaled <= 0.0 {
            0
        } else {
            (scaled as usize).min(bins - 1)
        }
    }

    /// Approximate `k`-th smallest value (0-based).
    pub fn order_statistic(&self, k: u64) -> f64 {
        let width = self.bin_width();
        let mut before = 0u64;
        for (index, &count) in self.counts.iter().enumerate() {
            if count > 0 && k < before + count {
                let rank_in_bin = (k - before) as f64;
                return (index as f64 + (rank_in_bin + 0.5) / count as f64) * width;
            }
            before += count;
        }
        f64::NAN
    }

    /// Quantile at probability `p`.
    pub fn quantile(&self, p: f64, method: QuantileMethod) -> f64 {
        quantile_with(self.total, p, method, |k| self.order_statistic(k))
    }
}

impl MadAccumulator for MadHistogram {
    fn record(&mut self, mad_deg: f64) {
        let index = self.bin_index(mad_deg);
        self.counts[index] += 1;
        self.total += 1;
    }

    fn merge(&mut self, other: Self) {
        debug_assert_eq!(self.counts.len(), other.counts.len());
        for (mine, theirs) in self.counts.iter_mut().zip(other.counts) {
            *mine += theirs;
        }
        self.total += other.total;
    }

    fn count(&self) -> u64 {
        self.total
    }
}

/// Quantile-capable accumulator chosen from the configured strategy.
#[derive(Debug, Clone)]
pub enum QuantileAccumulator {
    /// Exact order statistics
    Exact(ExactSamples),
    /// Bounded-memory histogram
    Histogram(MadHistogram),
}

/// Concrete storage decided once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedStrategy {
    /// Store every value
    Exact,
    /// Histogram with this many bins
    Histogram(usize),
}

impl ResolvedStrategy {
    /// Resolve `config.accumulation` against the memory budget.
    ///
    /// # Errors
    /// `MemoryLimitExceeded` when `Exact` is requested explicitly and
    /// `niter` values would not fit `max_memory_mb`.
    pub fn from_config(config: &SimulationConfig) -> MadResult<Self> {
        let requested = config.niter.saturating_mul(BYTES_PER_SAMPLE);
        let limit = config.max_memory_bytes();
        match config.accumulation {
            AccumulationStrategy::Exact => {
                validate_allocation_size(requested, limit, "exact MAD accumulation")?;
                Ok(ResolvedStrategy::Exact)
            }
            AccumulationStrategy::Histogram { bins } => {
                if bins == 0 {
                    return Err(MadAnalysisError::invalid(
                        "histogram_bins",
                        0.0,
                        "must be greater than 0",
                    ));
                }
                Ok(ResolvedStrategy::Histogram(bins))
            }
            AccumulationStrategy::Auto => {
                if validate_allocation_size(requested, limit, "exact MAD accumulation").is_ok() {
                    Ok(ResolvedStrategy::Exact)
                } else {
                    log::info!(
                        "{} samples exceed the {} MB budget for exact quantiles; using a {}-bin histogram",
                        config.niter,
                        config.max_memory_mb,
                        DEFAULT_HISTOGRAM_BINS
                    );
                    Ok(ResolvedStrategy::Histogram(DEFAULT_HISTOGRAM_BINS))
                }
            }
        }
    }
}

impl QuantileAccumulator {
    /// Empty accumulator for a resolved strategy.
    pub fn new(strategy: ResolvedStrategy) -> Self {
        match strategy {
            ResolvedStrategy::Exact => QuantileAccumulator::Exact(ExactSamples::new()),
            ResolvedStrategy::Histogram(bins) => {
                QuantileAccumulator::Histogram(MadHistogram::new(bins))
            }
        }
    }

    /// Quantiles for each probability, in input order.
    pub fn quantiles(&mut self, probabilities: &[f64], method: QuantileMethod) -> Vec<f64> {
        match self {
            QuantileAccumulator::Exact(samples) => probabilities
                .iter()
                .map(|&p| samples.quantile(p, method))
                .collect(),
            QuantileAccumulator::Histogram(histogram) => probabilities
                .iter()
                .map(|&p| histogram.quantile(p, method))
                .collect(),
        }
    }
}

impl MadAccumulator for QuantileAccumulator {
    fn record(&mut self, mad_deg: f64) {
        match self {
            QuantileAccumulator::Exact(samples) => samples.record(mad_deg),
            QuantileAccumulator::Histogram(histogram) => histogram.record(mad_deg),
        }
    }

    fn merge(&mut self, other: Self) {
        match other {
            QuantileAccumulator::Exact(b) => match self {
                QuantileAccumulator::Exact(a) => a.merge(b),
                QuantileAccumulator::Histogram(a) => b.values.into_iter().for_each(|v| a.record(v)),
            },
            // Mixed kinds degrade to the histogram; exact data is never invented.
            QuantileAccumulator::Histogram(mut b) => match self {
                QuantileAccumulator::Histogram(a) => a.merge(b),
                QuantileAccumulator::Exact(a) => {
                    for &v in &a.values {
                        b.record(v);
                    }
                    *self = QuantileAccumulator::Histogram(b);
                }
            },
        }
    }

    fn count(&self) -> u64 {
        match self {
            QuantileAccumulator::Exact(samples) => samples.count(),
            QuantileAccumulator::Histogram(histogram) => histogram.count(),
        }
    }
}
