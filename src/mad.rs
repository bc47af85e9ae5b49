//! Maximum angular deviation from an eigenvalue triple.
//!
//! For an unanchored principal-component line fit with scatter eigenvalues
//! λ1 ≤ λ2 ≤ λ3, MAD = atan(sqrt((λ1 + λ2) / λ3)), reported in degrees on
//! [0°, 90°).

use crate::eigen::{eigenvalues_ascending, Degeneracy, EigenvalueTriple};
use nalgebra::Matrix3;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Outcome of one Monte Carlo trial.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MadSample {
    /// MAD in degrees
    Valid(f64),
    /// The trial is excluded from aggregation
    Invalid(Degeneracy),
}

impl MadSample {
    /// MAD value if the trial is valid.
    pub fn value(&self) -> Option<f64> {
        match self {
            MadSample::Valid(v) => Some(*v),
            MadSample::Invalid(_) => None,
        }
    }

    /// Whether the trial produced a usable MAD.
    pub fn is_valid(&self) -> bool {
        matches!(self, MadSample::Valid(_))
    }
}

/// MAD in degrees from ascending eigenvalues.
///
/// Pure and total: returns NaN when λ3 is zero, when any input is negative
/// or not finite, or when the inputs are out of order.
pub fn mad_degrees(l1: f64, l2: f64, l3: f64) -> f64 {
    let finite = l1.is_finite() && l2.is_finite() && l3.is_finite();
    if !finite || l1 < 0.0 || l2 < l1 || l3 < l2 || l3 <= 0.0 {
        return f64::NAN;
    }
    ((l1 + l2) / l3).sqrt().atan().to_degrees()
}

/// MAD for a validated eigenvalue triple.
pub fn mad_from_eigenvalues(triple: &EigenvalueTriple) -> MadSample {
    if triple.largest() <= 0.0 {
        return MadSample::Invalid(Degeneracy::ZeroPrincipalEigenvalue);
    }
    let mad = mad_degrees(triple.smallest(), triple.middle(), triple.largest());
    if mad.is_finite() {
        MadSample::Valid(mad)
    } else {
        MadSample::Invalid(Degeneracy::NonFinite)
    }
}

/// Eigen-decompose a sample matrix and compute its MAD.
pub fn mad_from_matrix(matrix: &Matrix3<f64>) -> MadSample {
    match eigenvalues_ascending(matrix) {
        Ok(triple) => mad_from_eigenvalues(&triple),
        Err(reason) => MadSample::Invalid(reason),
    }
}
