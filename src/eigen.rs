//! Eigen-decomposition of sampled scatter matrices.
//!
//! The MAD formula needs the two smallest eigenvalues identified without
//! ambiguity, so the triple is always returned in ascending order. Rounding
//! near singular matrices can push a zero eigenvalue slightly negative; such
//! values are snapped to zero, while genuinely negative or non-finite
//! results tag the trial as degenerate instead of failing the run.

use nalgebra::{Matrix3, SymmetricEigen};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Eigenvalues with magnitude below this fraction of the largest magnitude
/// are treated as exactly zero.
pub const ZERO_EIGENVALUE_TOLERANCE: f64 = 1e-12;

/// Iteration cap for the symmetric QR algorithm.
pub const MAX_EIGEN_ITERATIONS: usize = 1000;

/// Why a single trial produced no usable MAD value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Degeneracy {
    /// The eigenvalue iteration did not converge.
    DecompositionFailed,
    /// The matrix or one of its eigenvalues was NaN or infinite.
    NonFinite,
    /// An eigenvalue was negative beyond rounding tolerance.
    NegativeEigenvalue,
    /// The largest eigenvalue was zero, so the MAD ratio is undefined.
    ZeroPrincipalEigenvalue,
}

/// Three non-negative eigenvalues, λ1 ≤ λ2 ≤ λ3.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EigenvalueTriple {
    values: [f64; 3],
}

impl EigenvalueTriple {
    /// Sort, clean and validate raw eigenvalues.
    pub fn from_unsorted(mut values: [f64; 3]) -> Result<Self, Degeneracy> {
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Degeneracy::NonFinite);
        }

        values.sort_unstable_by(f64::total_cmp);

        let magnitude = values.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let tolerance = ZERO_EIGENVALUE_TOLERANCE * magnitude;
        for value in values.iter_mut() {
            if value.abs() <= tolerance {
                *value = 0.0;
            } else if *value < 0.0 {
                return Err(Degeneracy::NegativeEigenvalue);
            }
        }

        Ok(Self { values })
    }

    /// λ1
    pub fn smallest(&self) -> f64 {
        self.values[0]
    }

    /// λ2
    pub fn middle(&self) -> f64 {
        self.values[1]
    }

    /// λ3
    pub fn largest(&self) -> f64 {
        self.values[2]
    }

    /// `[λ1, λ2, λ3]`
    pub fn as_array(&self) -> [f64; 3] {
        self.values
    }
}

/// Eigenvalues of a symmetric 3x3 matrix in ascending order.
///
/// Only the lower triangle of `matrix` is read.
pub fn eigenvalues_ascending(matrix: &Matrix3<f64>) -> Result<EigenvalueTriple, Degeneracy> {
    if matrix.iter().any(|v| !v.is_finite()) {
        return Err(Degeneracy::NonFinite);
    }

    let eigen = SymmetricEigen::try_new(*matrix, f64::EPSILON, MAX_EIGEN_ITERATIONS)
        .ok_or(Degeneracy::DecompositionFailed)?;
    let ev = eigen.eigenvalues;
    EigenvalueTriple::from_unsorted([ev[0], ev[1], ev[2]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use nalgebra::Vector3;

    #[test]
    fn test_diagonal_matrix_sorted() {
        let m = Matrix3::from_diagonal(&Vector3::new(5.0, 1.0, 3.0));
        let triple = eigenvalues_ascending(&m).unwrap();
        assert_approx_eq!(triple.smallest(), 1.0, 1e-12);
        assert_approx_eq!(triple.middle(), 3.0, 1e-12);
        assert_approx_eq!(triple.largest(), 5.0, 1e-12);
    }

    #[test]
    fn test_known_symmetric_matrix() {
        // Eigenvalues of [[2,1,0],[1,2,0],[0,0,7]] are 1, 3, 7.
        #[rustfmt::skip]
        let m = Matrix3::new(
            2.0, 1.0, 0.0,
            1.0, 2.0, 0.0,
            0.0, 0.0, 7.0,
        );
        let triple = eigenvalues_ascending(&m).unwrap();
        assert_approx_eq!(triple.smallest(), 1.0, 1e-10);
        assert_approx_eq!(triple.middle(), 3.0, 1e-10);
        assert_approx_eq!(triple.largest(), 7.0, 1e-10);
    }

    #[test]
    fn test_rank_one_matrix_snaps_to_zero() {
        let v = Vector3::new(0.3, -1.2, 2.5);
        let m = v * v.transpose();
        let triple = eigenvalues_ascending(&m).unwrap();
        assert_eq!(triple.smallest(), 0.0);
        assert_eq!(triple.middle(), 0.0);
        assert_approx_eq!(triple.largest(), v.norm_squared(), 1e-10);
    }

    #[test]
    fn test_negative_eigenvalue_is_degenerate() {
        let m = Matrix3::from_diagonal(&Vector3::new(-1.0, 2.0, 3.0));
        assert_eq!(
            eigenvalues_ascending(&m),
            Err(Degeneracy::NegativeEigenvalue)
        );
    }

    #[test]
    fn test_non_finite_is_degenerate() {
        let mut m = Matrix3::identity();
        m[(2, 0)] = f64::NAN;
        assert_eq!(eigenvalues_ascending(&m), Err(Degeneracy::NonFinite));

        assert_eq!(
            EigenvalueTriple::from_unsorted([1.0, f64::INFINITY, 2.0]),
            Err(Degeneracy::NonFinite)
        );
    }

    #[test]
    fn test_tiny_negative_rounding_is_cleaned() {
        let triple = EigenvalueTriple::from_unsorted([4.0, -1e-15, 2.0]).unwrap();
        assert_eq!(triple.as_array(), [0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_zero_matrix_gives_zero_triple() {
        let triple = eigenvalues_ascending(&Matrix3::zeros()).unwrap();
        assert_eq!(triple.as_array(), [0.0, 0.0, 0.0]);
    }
}
