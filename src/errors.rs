//! Error types and validation functions for MAD significance estimation.
//!
//! Every public entry point validates its inputs with the helpers in this
//! module before any simulation work starts, so a rejected call never leaves
//! partial state behind.

use thiserror::Error;

/// Error types for Monte Carlo MAD estimation.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum MadAnalysisError {
    /// Invalid parameter value supplied by the caller.
    #[error("Invalid parameter: {parameter} = {value}, expected {constraint}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: f64,
        /// Valid range or constraint description
        constraint: String,
    },

    /// The simulation as a whole produced nothing usable.
    ///
    /// Individual degenerate trials are tagged and excluded; this variant is
    /// only raised when no trial at all survived.
    #[error("Numerical degeneracy: {reason}")]
    NumericalDegeneracy {
        /// Description of the degeneracy
        reason: String,
    },

    /// Too few valid samples for a meaningful quantile or proportion.
    #[error("Insufficient samples: need at least {required} valid samples, got {actual}")]
    InsufficientSamples {
        /// Minimum number of valid samples
        required: u64,
        /// Number of valid samples available
        actual: u64,
    },

    /// Exact accumulation would exceed the configured memory budget.
    #[error("Memory limit exceeded: {requested_bytes} bytes requested, limit is {limit_bytes} bytes")]
    MemoryLimitExceeded {
        /// Bytes the operation would need
        requested_bytes: u64,
        /// Configured budget in bytes
        limit_bytes: u64,
    },

    /// The run was cancelled or hit its time limit before completion.
    #[error("Simulation cancelled after {completed} of {requested} iterations")]
    Cancelled {
        /// Iterations completed before cancellation
        completed: u64,
        /// Iterations requested
        requested: u64,
    },
}

/// Result type for MAD estimation operations.
pub type MadResult<T> = Result<T, MadAnalysisError>;

impl MadAnalysisError {
    pub(crate) fn invalid(parameter: &str, value: f64, constraint: &str) -> Self {
        MadAnalysisError::InvalidParameter {
            parameter: parameter.to_string(),
            value,
            constraint: constraint.to_string(),
        }
    }
}

/// Validates that a parameter lies in the closed interval `[min, max]`.
///
/// # Example
/// ```rust
/// use mad_significance::errors::validate_parameter;
///
/// assert!(validate_parameter(0.5, 0.0, 1.0, "fraction").is_ok());
/// assert!(validate_parameter(1.5, 0.0, 1.0, "fraction").is_err());
/// ```
pub fn validate_parameter(value: f64, min: f64, max: f64, name: &str) -> MadResult<()> {
    if value.is_nan() {
        return Err(MadAnalysisError::invalid(name, value, "must not be NaN"));
    }

    if value < min || value > max {
        Err(MadAnalysisError::invalid(
            name,
            value,
            &format!("[{}, {}]", min, max),
        ))
    } else {
        Ok(())
    }
}

/// Validates that a parameter lies strictly inside `(min, max)`.
///
/// Significance levels and MAD angles are both open-interval quantities:
/// α = 0 or a MAD of exactly 90° has no meaning for the test.
///
/// # Example
/// ```rust
/// use mad_significance::errors::validate_open_interval;
///
/// assert!(validate_open_interval(0.05, 0.0, 1.0, "alpha").is_ok());
/// assert!(validate_open_interval(0.0, 0.0, 1.0, "alpha").is_err());
/// ```
pub fn validate_open_interval(value: f64, min: f64, max: f64, name: &str) -> MadResult<()> {
    if value.is_nan() {
        return Err(MadAnalysisError::invalid(name, value, "must not be NaN"));
    }

    if value <= min || value >= max {
        Err(MadAnalysisError::invalid(
            name,
            value,
            &format!("({}, {})", min, max),
        ))
    } else {
        Ok(())
    }
}

/// Validates that a value is finite and not NaN.
pub fn validate_finite(value: f64, name: &str) -> MadResult<()> {
    if !value.is_finite() {
        Err(MadAnalysisError::invalid(name, value, "must be finite"))
    } else {
        Ok(())
    }
}

/// Validates that the demagnetization point count gives at least one
/// degree of freedom.
pub fn validate_point_count(n_points: usize) -> MadResult<()> {
    if n_points < 2 {
        return Err(MadAnalysisError::invalid(
            "n_points",
            n_points as f64,
            "at least 2 demagnetization points (df = N - 1 >= 1)",
        ));
    }
    Ok(())
}

/// Validate an allocation against a memory budget.
///
/// # Example
/// ```rust
/// use mad_significance::errors::validate_allocation_size;
///
/// assert!(validate_allocation_size(1_000, 1 << 20, "test").is_ok());
/// assert!(validate_allocation_size(2 << 20, 1 << 20, "test").is_err());
/// ```
pub fn validate_allocation_size(size: u64, limit: u64, operation: &str) -> MadResult<()> {
    if size > limit {
        log::debug!(
            "Allocation of {} bytes ({:.2} GB) in '{}' exceeds the {} byte budget",
            size,
            size as f64 / (1024.0 * 1024.0 * 1024.0),
            operation,
            limit
        );
        return Err(MadAnalysisError::MemoryLimitExceeded {
            requested_bytes: size,
            limit_bytes: limit,
        });
    }
    Ok(())
}
