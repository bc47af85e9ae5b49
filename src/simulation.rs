//! Chunked Monte Carlo driver.
//!
//! A run of `niter` trials is split into fixed-size chunks. Each chunk owns
//! one random stream (`SimulationRng::for_stream(seed, chunk_index)`), runs
//! the pipeline sample -> eigenvalues -> MAD for its trials, and reduces the
//! valid values into an accumulator. Chunk results are merged with
//! associative, commutative reductions, so a parallel run and a sequential
//! run with the same seed and chunk size produce identical estimates.
//!
//! ## Cancellation
//!
//! The stop signal (a [`CancellationToken`] or the configured time limit) is
//! checked between chunks. Chunks are never interrupted half way, so
//! aggregates always describe whole chunks. A stopped run fails with
//! `Cancelled` unless `allow_partial` is set, in which case the result is
//! flagged `partial`.

use crate::accumulator::MadAccumulator;
use crate::config::SimulationConfig;
use crate::eigen::Degeneracy;
use crate::errors::{MadAnalysisError, MadResult};
use crate::mad::{mad_from_matrix, MadSample};
use crate::rng::{entropy_seed, SimulationRng};
use crate::wishart::WishartSampler;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared flag for stopping a long run from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// New, not yet cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the run stops before its next chunk.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Bookkeeping for one simulation run.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SimulationDiagnostics {
    /// Seed the run used (generated when none was configured)
    pub seed: u64,
    /// Trials requested
    pub requested: u64,
    /// Trials actually simulated
    pub simulated: u64,
    /// Trials with a usable MAD
    pub valid: u64,
    /// Eigen-decomposition did not converge
    pub decomposition_failed: u64,
    /// NaN or infinite matrix entries or eigenvalues
    pub non_finite: u64,
    /// Negative eigenvalue beyond rounding tolerance
    pub negative_eigenvalue: u64,
    /// Largest eigenvalue was zero
    pub zero_principal_eigenvalue: u64,
    /// Chunks fully processed
    pub chunks_completed: u64,
    /// Chunks planned
    pub chunks_total: u64,
    /// The estimate covers only part of the requested trials
    pub partial: bool,
}

impl SimulationDiagnostics {
    /// Total degenerate trials.
    pub fn invalid(&self) -> u64 {
        self.decomposition_failed
            + self.non_finite
            + self.negative_eigenvalue
            + self.zero_principal_eigenvalue
    }

    /// Degenerate trials as a fraction of simulated trials.
    pub fn invalid_fraction(&self) -> f64 {
        if self.simulated == 0 {
            0.0
        } else {
            self.invalid() as f64 / self.simulated as f64
        }
    }

    fn record(&mut self, sample: &MadSample) {
        self.simulated += 1;
        match sample {
            MadSample::Valid(_) => self.valid += 1,
            MadSample::Invalid(Degeneracy::DecompositionFailed) => self.decomposition_failed += 1,
            MadSample::Invalid(Degeneracy::NonFinite) => self.non_finite += 1,
            MadSample::Invalid(Degeneracy::NegativeEigenvalue) => self.negative_eigenvalue += 1,
            MadSample::Invalid(Degeneracy::ZeroPrincipalEigenvalue) => {
                self.zero_principal_eigenvalue += 1
            }
        }
    }

    fn merge(&mut self, other: &Self) {
        self.simulated += other.simulated;
        self.valid += other.valid;
        self.decomposition_failed += other.decomposition_failed;
        self.non_finite += other.non_finite;
        self.negative_eigenvalue += other.negative_eigenvalue;
        self.zero_principal_eigenvalue += other.zero_principal_eigenvalue;
        self.chunks_completed += other.chunks_completed;
    }
}

/// Accumulated distribution plus diagnostics of a finished run.
#[derive(Debug, Clone)]
pub struct SimulationOutcome<A> {
    /// Reduction of all valid MAD values
    pub accumulator: A,
    /// Run bookkeeping
    pub diagnostics: SimulationDiagnostics,
}

struct ChunkState<A> {
    accumulator: A,
    diagnostics: SimulationDiagnostics,
}

impl<A: MadAccumulator> ChunkState<A> {
    fn new(accumulator: A) -> Self {
        Self {
            accumulator,
            diagnostics: SimulationDiagnostics::default(),
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.accumulator.merge(other.accumulator);
        self.diagnostics.merge(&other.diagnostics);
        self
    }
}

struct StopSignal<'a> {
    token: Option<&'a CancellationToken>,
    deadline: Option<Instant>,
}

impl StopSignal<'_> {
    fn should_stop(&self) -> bool {
        if self.token.is_some_and(CancellationToken::is_cancelled) {
            return true;
        }
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

struct ChunkPlan {
    seed: u64,
    niter: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    fn len_of(&self, index: u64) -> u64 {
        let start = index * self.chunk_size;
        self.chunk_size.min(self.niter - start)
    }
}

fn simulate_chunk<A, S>(trial: &S, plan: &ChunkPlan, index: u64, state: &mut ChunkState<A>)
where
    A: MadAccumulator,
    S: Fn(&mut SimulationRng) -> MadSample,
{
    let mut rng = SimulationRng::for_stream(plan.seed, index);
    for _ in 0..plan.len_of(index) {
        let sample = trial(&mut rng);
        if let MadSample::Valid(mad) = sample {
            state.accumulator.record(mad);
        }
        state.diagnostics.record(&sample);
    }
    state.diagnostics.chunks_completed += 1;
}

/// Run the sampling pipeline and reduce the valid MAD values.
///
/// `make_accumulator` creates an empty accumulator; it is called once per
/// unit of parallel work.
///
/// # Errors
/// - `InvalidParameter` / `InsufficientSamples` from configuration checks
/// - `Cancelled` when stopped early without `allow_partial`
/// - `NumericalDegeneracy` when every simulated trial was degenerate
/// - `InsufficientSamples` when fewer than `min_valid_samples` trials were valid
pub fn run_simulation<A, F>(
    sampler: &WishartSampler,
    config: &SimulationConfig,
    make_accumulator: F,
) -> MadResult<SimulationOutcome<A>>
where
    A: MadAccumulator,
    F: Fn() -> A + Sync + Send,
{
    let label = format!("Wishart(df = {})", sampler.df());
    run_trials(
        &label,
        |rng: &mut SimulationRng| mad_from_matrix(&sampler.sample(rng)),
        config,
        make_accumulator,
    )
}

/// Chunked driver over an arbitrary per-trial source.
///
/// `label` names the source in log messages.
pub(crate) fn run_trials<A, F, S>(
    label: &str,
    trial: S,
    config: &SimulationConfig,
    make_accumulator: F,
) -> MadResult<SimulationOutcome<A>>
where
    A: MadAccumulator,
    F: Fn() -> A + Sync + Send,
    S: Fn(&mut SimulationRng) -> MadSample + Sync,
{
    config.validate()?;

    let seed = config.seed.unwrap_or_else(|| {
        let seed = entropy_seed();
        log::debug!("No seed configured; drew run seed {} from OS entropy", seed);
        seed
    });
    let plan = ChunkPlan {
        seed,
        niter: config.niter,
        chunk_size: config.chunk_size,
    };
    let chunks_total = config.chunk_count();
    let stop = StopSignal {
        token: config.cancellation.as_ref(),
        deadline: config.time_limit.map(|limit| Instant::now() + limit),
    };

    log::debug!(
        "Simulating {} {} trials in {} chunks of {} (seed {}, parallel = {})",
        config.niter,
        label,
        chunks_total,
        config.chunk_size,
        seed,
        config.parallel
    );
    let started = Instant::now();

    let state = run_chunks(&trial, &plan, chunks_total, &stop, config.parallel, &make_accumulator);

    let mut diagnostics = state.diagnostics;
    diagnostics.seed = seed;
    diagnostics.requested = config.niter;
    diagnostics.chunks_total = chunks_total;

    if diagnostics.chunks_completed < chunks_total {
        if !config.allow_partial {
            return Err(MadAnalysisError::Cancelled {
                completed: diagnostics.simulated,
                requested: config.niter,
            });
        }
        diagnostics.partial = true;
        log::warn!(
            "Simulation stopped after {} of {} trials; reporting a partial estimate",
            diagnostics.simulated,
            config.niter
        );
    }

    warn_if_degenerate(label, &diagnostics, config.invalid_fraction_warning);

    if diagnostics.simulated > 0 && diagnostics.valid == 0 {
        return Err(MadAnalysisError::NumericalDegeneracy {
            reason: format!(
                "all {} simulated trials were degenerate",
                diagnostics.simulated
            ),
        });
    }

    if diagnostics.valid < config.min_valid_samples {
        return Err(MadAnalysisError::InsufficientSamples {
            required: config.min_valid_samples,
            actual: diagnostics.valid,
        });
    }

    log::info!(
        "Simulated {} trials ({} valid) in {:.2?}",
        diagnostics.simulated,
        diagnostics.valid,
        started.elapsed()
    );

    Ok(SimulationOutcome {
        accumulator: state.accumulator,
        diagnostics,
    })
}

/// Log a warning when degenerate trials exceed `threshold`; returns whether it did.
fn warn_if_degenerate(label: &str, diagnostics: &SimulationDiagnostics, threshold: f64) -> bool {
    let fraction = diagnostics.invalid_fraction();
    if fraction <= threshold {
        return false;
    }
    log::warn!(
        "{:.2}% of {} trials were degenerate ({} of {}: {} decomposition failures, {} non-finite, {} negative, {} zero principal); check the point count and scale matrix",
        fraction * 100.0,
        label,
        diagnostics.invalid(),
        diagnostics.simulated,
        diagnostics.decomposition_failed,
        diagnostics.non_finite,
        diagnostics.negative_eigenvalue,
        diagnostics.zero_principal_eigenvalue
    );
    true
}

fn run_chunks<A, F, S>(
    trial: &S,
    plan: &ChunkPlan,
    chunks_total: u64,
    stop: &StopSignal<'_>,
    parallel: bool,
    make_accumulator: &F,
) -> ChunkState<A>
where
    A: MadAccumulator,
    F: Fn() -> A + Sync + Send,
    S: Fn(&mut SimulationRng) -> MadSample + Sync,
{
    #[cfg(feature = "parallel")]
    {
        if parallel {
            use rayon::prelude::*;

            return (0..chunks_total)
                .into_par_iter()
                .fold(
                    || ChunkState::new(make_accumulator()),
                    |mut state, index| {
                        if !stop.should_stop() {
                            simulate_chunk(trial, plan, index, &mut state);
                        }
                        state
                    },
                )
                .reduce(|| ChunkState::new(make_accumulator()), ChunkState::merge);
        }
    }

    #[cfg(not(feature = "parallel"))]
    let _ = parallel;

    let mut state = ChunkState::new(make_accumulator());
    for index in 0..chunks_total {
        if stop.should_stop() {
            break;
        }
        simulate_chunk(trial, plan, index, &mut state);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::{ExactSamples, ThresholdCounter};
    use crate::wishart::ScaleMatrix;
    use rand::RngCore;
    use std::time::Duration;

    fn null_sampler(n_points: usize) -> WishartSampler {
        WishartSampler::for_point_count(n_points, ScaleMatrix::identity()).unwrap()
    }

    fn config(niter: u64, chunk_size: u64, parallel: bool) -> SimulationConfig {
        SimulationConfig::builder()
            .niter(niter)
            .chunk_size(chunk_size)
            .seed(2718)
            .parallel(parallel)
            .build()
            .unwrap()
    }

    /// Accumulator that cancels a token once it has seen `limit` values.
    struct CancelAfter {
        token: CancellationToken,
        limit: u64,
        inner: ThresholdCounter,
    }

    impl MadAccumulator for CancelAfter {
        fn record(&mut self, mad_deg: f64) {
            self.inner.record(mad_deg);
            if self.inner.count() >= self.limit {
                self.token.cancel();
            }
        }

        fn merge(&mut self, other: Self) {
            self.inner.merge(other.inner);
        }

        fn count(&self) -> u64 {
            self.inner.count()
        }
    }

    #[test]
    fn test_all_trials_simulated() {
        let sampler = null_sampler(10);
        let outcome = run_simulation(&sampler, &config(10_050, 1_000, false), || {
            ThresholdCounter::new(30.0)
        })
        .unwrap();
        let d = &outcome.diagnostics;
        assert_eq!(d.requested, 10_050);
        assert_eq!(d.simulated, 10_050);
        assert_eq!(d.chunks_total, 11);
        assert_eq!(d.chunks_completed, 11);
        assert_eq!(d.valid + d.invalid(), d.simulated);
        assert_eq!(outcome.accumulator.count(), d.valid);
        assert!(!d.partial);
        assert_eq!(d.seed, 2718);
    }

    #[test]
    fn test_same_seed_is_bitwise_reproducible() {
        let sampler = null_sampler(6);
        let cfg = config(8_000, 1_000, false);
        let mut a = run_simulation(&sampler, &cfg, ExactSamples::new).unwrap();
        let mut b = run_simulation(&sampler, &cfg, ExactSamples::new).unwrap();
        assert_eq!(a.accumulator.sorted_values(), b.accumulator.sorted_values());
        assert_eq!(a.diagnostics, b.diagnostics);
    }

    #[test]
    fn test_different_seeds_differ() {
        let sampler = null_sampler(6);
        let mut cfg = config(2_000, 500, false);
        let mut a = run_simulation(&sampler, &cfg, ExactSamples::new).unwrap();
        cfg.seed = Some(2719);
        let mut b = run_simulation(&sampler, &cfg, ExactSamples::new).unwrap();
        assert_ne!(a.accumulator.sorted_values(), b.accumulator.sorted_values());
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_parallel_matches_sequential() {
        let sampler = null_sampler(10);
        let mut sequential =
            run_simulation(&sampler, &config(12_345, 1_000, false), ExactSamples::new).unwrap();
        let mut parallel =
            run_simulation(&sampler, &config(12_345, 1_000, true), ExactSamples::new).unwrap();
        assert_eq!(
            sequential.accumulator.sorted_values(),
            parallel.accumulator.sorted_values()
        );
        assert_eq!(sequential.diagnostics, parallel.diagnostics);
    }

    #[test]
    fn test_cancelled_before_start() {
        let token = CancellationToken::new();
        token.cancel();
        let mut cfg = config(5_000, 1_000, true);
        cfg.cancellation = Some(token);
        match run_simulation(&null_sampler(5), &cfg, || ThresholdCounter::new(20.0)) {
            Err(MadAnalysisError::Cancelled {
                completed,
                requested,
            }) => {
                assert_eq!(completed, 0);
                assert_eq!(requested, 5_000);
            }
            other => panic!("Expected Cancelled, got {:?}", other.map(|o| o.diagnostics)),
        }
    }

    #[test]
    fn test_expired_time_limit_cancels() {
        let mut cfg = config(5_000, 1_000, false);
        cfg.time_limit = Some(Duration::ZERO);
        assert!(matches!(
            run_simulation(&null_sampler(5), &cfg, || ThresholdCounter::new(20.0)),
            Err(MadAnalysisError::Cancelled { .. })
        ));
    }

    #[test]
    fn test_partial_mode_reports_completed_chunks() {
        let token = CancellationToken::new();
        let mut cfg = config(10_000, 1_000, false);
        cfg.cancellation = Some(token.clone());
        cfg.allow_partial = true;

        let outcome = run_simulation(&null_sampler(8), &cfg, || CancelAfter {
            token: token.clone(),
            limit: 10,
            inner: ThresholdCounter::new(35.0),
        })
        .unwrap();

        let d = &outcome.diagnostics;
        assert!(d.partial);
        assert_eq!(d.chunks_completed, 1);
        assert_eq!(d.simulated, 1_000);
        assert_eq!(outcome.accumulator.count(), d.valid);
    }

    #[test]
    fn test_partial_mode_without_samples_is_insufficient() {
        let token = CancellationToken::new();
        token.cancel();
        let mut cfg = config(5_000, 1_000, false);
        cfg.cancellation = Some(token);
        cfg.allow_partial = true;
        assert!(matches!(
            run_simulation(&null_sampler(5), &cfg, || ThresholdCounter::new(20.0)),
            Err(MadAnalysisError::InsufficientSamples { actual: 0, .. })
        ));
    }

    #[test]
    fn test_unseeded_run_records_generated_seed() {
        let mut cfg = config(1_000, 250, false);
        cfg.seed = None;
        let outcome =
            run_simulation(&null_sampler(4), &cfg, || ThresholdCounter::new(10.0)).unwrap();
        let replay_cfg = SimulationConfig {
            seed: Some(outcome.diagnostics.seed),
            ..cfg
        };
        let replay =
            run_simulation(&null_sampler(4), &replay_cfg, || ThresholdCounter::new(10.0)).unwrap();
        assert_eq!(outcome.accumulator, replay.accumulator);
    }

    #[test]
    fn test_two_point_fit_runs() {
        let outcome = run_simulation(&null_sampler(2), &config(2_000, 500, false), ExactSamples::new)
            .unwrap();
        assert_eq!(outcome.diagnostics.simulated, 2_000);
        assert!(outcome.diagnostics.valid > 1_900);
    }

    /// Deterministic trial source: ranks 0..4 of every 50 are degenerate,
    /// one of each kind.
    fn mostly_valid_trial(rng: &mut SimulationRng) -> MadSample {
        match rng.next_u64() % 50 {
            0 => MadSample::Invalid(Degeneracy::DecompositionFailed),
            1 => MadSample::Invalid(Degeneracy::NonFinite),
            2 => MadSample::Invalid(Degeneracy::NegativeEigenvalue),
            3 => MadSample::Invalid(Degeneracy::ZeroPrincipalEigenvalue),
            r => MadSample::Valid(r as f64),
        }
    }

    #[test]
    fn test_all_degenerate_trials_fail_the_run() {
        let result = run_trials(
            "degenerate",
            |_: &mut SimulationRng| MadSample::Invalid(Degeneracy::NonFinite),
            &config(2_000, 500, false),
            || ThresholdCounter::new(30.0),
        );
        match result {
            Err(MadAnalysisError::NumericalDegeneracy { reason }) => {
                assert!(reason.contains("2000"), "{}", reason)
            }
            other => panic!(
                "Expected NumericalDegeneracy, got {:?}",
                other.map(|o| o.diagnostics)
            ),
        }
    }

    #[test]
    fn test_degenerate_trials_are_excluded_and_counted() {
        let outcome = run_trials(
            "mixed",
            mostly_valid_trial,
            &config(20_000, 2_000, false),
            || ThresholdCounter::new(25.0),
        )
        .unwrap();

        let d = &outcome.diagnostics;
        assert_eq!(d.simulated, 20_000);
        assert_eq!(d.valid + d.invalid(), d.simulated);
        assert_eq!(outcome.accumulator.count(), d.valid);
        for count in [
            d.decomposition_failed,
            d.non_finite,
            d.negative_eigenvalue,
            d.zero_principal_eigenvalue,
        ] {
            assert!(count > 0);
        }
        // Four of fifty residues are degenerate.
        assert!((d.invalid_fraction() - 0.08).abs() < 0.01, "{}", d.invalid_fraction());
        assert!(warn_if_degenerate("mixed", d, 0.01));
        assert!(!warn_if_degenerate("mixed", d, 0.5));
    }

    #[cfg(feature = "parallel")]
    #[test]
    fn test_degenerate_counts_match_across_schedules() {
        let run = |parallel| {
            run_trials(
                "mixed",
                mostly_valid_trial,
                &config(9_000, 1_000, parallel),
                || ThresholdCounter::new(25.0),
            )
            .unwrap()
        };
        let sequential = run(false);
        let parallel = run(true);
        assert_eq!(sequential.diagnostics, parallel.diagnostics);
        assert_eq!(sequential.accumulator, parallel.accumulator);
    }

    #[test]
    fn test_clean_run_does_not_warn() {
        let d = SimulationDiagnostics {
            simulated: 1_000,
            valid: 995,
            non_finite: 5,
            ..SimulationDiagnostics::default()
        };
        assert!(!warn_if_degenerate("clean", &d, 0.01));
        assert!(!warn_if_degenerate("empty", &SimulationDiagnostics::default(), 0.0));
    }

    #[test]
    fn test_cancellation_token_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!token.is_cancelled());
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
