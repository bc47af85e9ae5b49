//! Wishart sampling of 3x3 scatter matrices.
//!
//! Under random demagnetization scatter the orientation tensor of an
//! N-point principal-component fit is Wishart(N - 1, Σ). This module provides
//! a validated scale matrix type and a sampler producing independent draws.
//!
//! ## Algorithms
//!
//! - **Bartlett decomposition** (df ≥ 3): with Σ = L·Lᵀ and lower-triangular
//!   `A`, `A[i][i] = sqrt(χ²(df - i))` and `A[i][j] ~ N(0, 1)` for `i > j`,
//!   the product `(L·A)(L·A)ᵀ` is Wishart(df, Σ). Six random draws per sample.
//! - **Outer-product sum** (df ∈ {1, 2}): the Bartlett factor needs
//!   χ²(df - 2), which does not exist here, so the singular Wishart is built
//!   directly as `Σ_k (L·z_k)(L·z_k)ᵀ` over `df` standard normal vectors.

use crate::errors::{
    validate_finite, validate_open_interval, validate_point_count, MadAnalysisError, MadResult,
};
use crate::rng::SimulationRng;
use nalgebra::{Matrix3, Vector3};
use rand_distr::ChiSquared;

/// Relative tolerance for the symmetry check on scale matrices.
pub const SYMMETRY_TOLERANCE: f64 = 1e-12;

/// MAD of isotropic scatter, atan(√2) in degrees.
///
/// Above this the spread L exceeds 1, the two "minor" axes become the major
/// ones, and the population MAD of diag{1, L, L} is no longer the requested
/// value.
pub const ISOTROPIC_MAD_DEG: f64 = 54.735_610_317_245_35;

/// Smallest df handled by the Bartlett decomposition in three dimensions.
const BARTLETT_MIN_DF: usize = 3;

/// Symmetric positive-definite scale matrix with its Cholesky factor.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleMatrix {
    matrix: Matrix3<f64>,
    cholesky_l: Matrix3<f64>,
}

impl ScaleMatrix {
    /// Validate a scale matrix.
    ///
    /// # Errors
    /// `InvalidParameter` when an entry is not finite, the matrix is not
    /// symmetric within [`SYMMETRY_TOLERANCE`] (relative to its largest
    /// entry), or it is not positive definite.
    pub fn new(matrix: Matrix3<f64>) -> MadResult<Self> {
        for &entry in matrix.iter() {
            validate_finite(entry, "scale_matrix")?;
        }

        let magnitude = matrix.amax().max(f64::MIN_POSITIVE);
        for i in 0..3 {
            for j in (i + 1)..3 {
                let asymmetry = (matrix[(i, j)] - matrix[(j, i)]).abs();
                if asymmetry > SYMMETRY_TOLERANCE * magnitude {
                    return Err(MadAnalysisError::invalid(
                        "scale_matrix",
                        asymmetry,
                        "must be symmetric",
                    ));
                }
            }
        }

        let cholesky = matrix.cholesky().ok_or_else(|| {
            MadAnalysisError::invalid(
                "scale_matrix",
                matrix.determinant(),
                "must be positive definite",
            )
        })?;

        Ok(Self {
            matrix,
            cholesky_l: cholesky.l(),
        })
    }

    /// Isotropic scale used for the null hypothesis.
    pub fn identity() -> Self {
        Self {
            matrix: Matrix3::identity(),
            cholesky_l: Matrix3::identity(),
        }
    }

    /// Diagonal scale matrix.
    pub fn diagonal(entries: [f64; 3]) -> MadResult<Self> {
        Self::new(Matrix3::from_diagonal(&Vector3::from(entries)))
    }

    /// Anisotropic alternative whose underlying MAD equals `true_mad_deg`.
    ///
    /// The scale is diag{1, L, L} with L = tan²(MAD)/2, so that the
    /// population eigenvalues give `atan(sqrt(2L / 1)) = MAD`. The identity
    /// only holds below [`ISOTROPIC_MAD_DEG`]; larger angles are accepted but
    /// logged.
    pub fn for_true_mad(true_mad_deg: f64) -> MadResult<Self> {
        validate_open_interval(true_mad_deg, 0.0, 90.0, "true_mad_deg")?;
        if true_mad_deg >= ISOTROPIC_MAD_DEG {
            log::warn!(
                "True MAD {:.3}° is at or above the isotropic {:.3}°; the alternative's population MAD differs from the request",
                true_mad_deg,
                ISOTROPIC_MAD_DEG
            );
        }
        let spread = true_mad_deg.to_radians().tan().powi(2) / 2.0;
        Self::diagonal([1.0, spread, spread])
    }

    /// The scale matrix Σ.
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Lower-triangular L with Σ = L·Lᵀ.
    pub fn cholesky_factor(&self) -> &Matrix3<f64> {
        &self.cholesky_l
    }
}

/// Sampler for Wishart(df, Σ) in three dimensions.
#[derive(Debug, Clone)]
pub struct WishartSampler {
    df: usize,
    scale: ScaleMatrix,
    /// χ²(df), χ²(df - 1), χ²(df - 2) for the Bartlett diagonal.
    bartlett_diagonal: Option<[ChiSquared<f64>; 3]>,
}

impl WishartSampler {
    /// Create a sampler.
    ///
    /// # Errors
    /// `InvalidParameter` when `df < 1`.
    pub fn new(df: usize, scale: ScaleMatrix) -> MadResult<Self> {
        if df < 1 {
            return Err(MadAnalysisError::invalid(
                "degrees_of_freedom",
                df as f64,
                "must be at least 1",
            ));
        }

        let bartlett_diagonal = if df >= BARTLETT_MIN_DF {
            let chi = |k: usize| {
                ChiSquared::new(k as f64).map_err(|_| {
                    MadAnalysisError::invalid(
                        "degrees_of_freedom",
                        k as f64,
                        "chi-squared degrees of freedom must be positive",
                    )
                })
            };
            Some([chi(df)?, chi(df - 1)?, chi(df - 2)?])
        } else {
            None
        };

        Ok(Self {
            df,
            scale,
            bartlett_diagonal,
        })
    }

    /// Sampler for an N-point fit (df = N - 1).
    pub fn for_point_count(n_points: usize, scale: ScaleMatrix) -> MadResult<Self> {
        validate_point_count(n_points)?;
        Self::new(n_points - 1, scale)
    }

    /// Degrees of freedom.
    pub fn df(&self) -> usize {
        self.df
    }

    /// Scale matrix.
    pub fn scale(&self) -> &ScaleMatrix {
        &self.scale
    }

    /// Draw one sample matrix.
    pub fn sample(&self, rng: &mut SimulationRng) -> Matrix3<f64> {
        match &self.bartlett_diagonal {
            Some(chi) => self.sample_bartlett(chi, rng),
            None => self.sample_outer_products(rng),
        }
    }

    fn sample_bartlett(&self, chi: &[ChiSquared<f64>; 3], rng: &mut SimulationRng) -> Matrix3<f64> {
        let c0 = rng.sample(&chi[0]).sqrt();
        let c1 = rng.sample(&chi[1]).sqrt();
        let c2 = rng.sample(&chi[2]).sqrt();
        let n10 = rng.standard_normal();
        let n20 = rng.standard_normal();
        let n21 = rng.standard_normal();

        #[rustfmt::skip]
        let a = Matrix3::new(
            c0,  0.0, 0.0,
            n10, c1,  0.0,
            n20, n21, c2,
        );

        let la = self.scale.cholesky_l * a;
        la * la.transpose()
    }

    fn sample_outer_products(&self, rng: &mut SimulationRng) -> Matrix3<f64> {
        let mut w = Matrix3::zeros();
        for _ in 0..self.df {
            let z = Vector3::new(
                rng.standard_normal(),
                rng.standard_normal(),
                rng.standard_normal(),
            );
            let x = self.scale.cholesky_l * z;
            w += x * x.transpose();
        }
        w
    }
}
