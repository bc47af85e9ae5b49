//! # MAD Significance
//!
//! Monte Carlo critical values and test power for the maximum angular
//! deviation (MAD) of paleomagnetic principal-component line fits.
//!
//! A line fitted through N demagnetization points has a 3x3 scatter matrix
//! whose eigenvalues λ1 ≤ λ2 ≤ λ3 give MAD = atan(sqrt((λ1 + λ2) / λ3)).
//! Whether a given MAD is small enough to reject pure random scatter depends
//! on N, and there is no closed form. This crate answers it by simulation:
//! scatter matrices are drawn from the Wishart distribution, reduced to
//! MAD values, and summarized as quantiles (critical values) or threshold
//! proportions (power, p-values).
//!
//! ## Key Features
//!
//! - **Critical values**: MADc at any set of significance levels, for one N
//!   or a table of N
//! - **Test power**: probability of rejecting randomness for a true MAD, plus
//!   power curves
//! - **p-values**: null significance of an observed MAD
//! - **Reproducible**: seeded ChaCha20 streams per chunk; parallel and
//!   sequential runs agree bitwise
//! - **Bounded memory**: exact order statistics when they fit the budget, a
//!   fixed histogram otherwise
//! - **Cancellable**: token or time limit, with optional partial results
//!
//! ## Quick Start
//!
//! ```rust
//! use mad_significance::{critical_mad, estimate_power, SimulationConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SimulationConfig::builder()
//!         .niter(50_000)
//!         .seed(2024)
//!         .build()?;
//!
//!     let madc = critical_mad(10, &[0.05, 0.01], &config)?;
//!     println!("MADc(N=10): 5% = {:.2}°, 1% = {:.2}°", madc[0], madc[1]);
//!
//!     let power = estimate_power(10, 15.0, madc[0], &config)?;
//!     println!("Power against a 15° line: {:.3}", power);
//!     Ok(())
//! }
//! ```
//!
//! Production-size runs use the presets [`SimulationConfig::critical_values`]
//! (10^8 trials) and [`SimulationConfig::power`] (10^6 trials).
//!
//! ## Architecture
//!
//! Data flows Wishart sampler → eigen-decomposition → MAD → accumulator.
//! [`simulation::run_simulation`] drives the pipeline over chunks; the
//! estimators in [`critical`] and [`power`] differ only in the scale matrix
//! and in the accumulator they reduce into.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;
pub mod quantile;
pub mod rng;

// Simulation pipeline
pub mod accumulator;
pub mod eigen;
pub mod mad;
pub mod simulation;
pub mod wishart;

// Estimators
pub mod critical;
pub mod power;

// Re-exports for convenience - main public API
pub use config::{AccumulationStrategy, SimulationConfig, SimulationConfigBuilder};
pub use errors::{MadAnalysisError, MadResult};
pub use quantile::QuantileMethod;

pub use critical::{critical_mad, critical_mad_table, estimate_critical_values, CriticalValueTable};
pub use power::{estimate_power, estimate_power_report, mad_p_value, power_curve, PowerEstimate};

pub use eigen::{eigenvalues_ascending, Degeneracy, EigenvalueTriple};
pub use mad::{mad_degrees, mad_from_eigenvalues, mad_from_matrix, MadSample};
pub use simulation::{run_simulation, CancellationToken, SimulationDiagnostics, SimulationOutcome};
pub use wishart::{ScaleMatrix, WishartSampler};
