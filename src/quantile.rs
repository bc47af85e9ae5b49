//! Sample quantile rules.
//!
//! Critical values are compared against published tables, so the rule used to
//! turn order statistics into a percentile is explicit configuration rather
//! than an implementation detail. The rules follow Hyndman & Fan (1996) and
//! the method names used by NumPy's `percentile`.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Rule for interpolating between order statistics.
///
/// With `n` sorted values `x[0..n]` and probability `p`, every rule starts
/// from the fractional rank `h = p * (n - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum QuantileMethod {
    /// Linear interpolation between `x[floor(h)]` and `x[floor(h) + 1]`
    /// (Hyndman-Fan type 7, NumPy's default).
    #[default]
    Linear,
    /// `x[floor(h)]`
    Lower,
    /// `x[ceil(h)]`
    Higher,
    /// The closer of the two neighbours, ties to the even rank.
    Nearest,
    /// Mean of `x[floor(h)]` and `x[ceil(h)]`.
    Midpoint,
}

/// Compute a quantile from an order-statistic accessor.
///
/// `order_statistic(k)` must return the `k`-th smallest value (0-based) of a
/// collection of `n` values. Accumulators that do not hold a sorted array
/// (for example a histogram) provide the accessor instead.
///
/// Returns NaN when `n == 0`.
pub fn quantile_with<F>(n: u64, p: f64, method: QuantileMethod, mut order_statistic: F) -> f64
where
    F: FnMut(u64) -> f64,
{
    if n == 0 || p.is_nan() {
        return f64::NAN;
    }

    let p = p.clamp(0.0, 1.0);
    let h = p * (n - 1) as f64;
    let lo = (h.floor() as u64).min(n - 1);
    let hi = (lo + 1).min(n - 1);
    let frac = h - lo as f64;

    match method {
        QuantileMethod::Linear => {
            let x_lo = order_statistic(lo);
            if frac == 0.0 || hi == lo {
                x_lo
            } else {
                x_lo * (1.0 - frac) + order_statistic(hi) * frac
            }
        }
        QuantileMethod::Lower => order_statistic(lo),
        QuantileMethod::Higher => {
            if frac > 0.0 {
                order_statistic(hi)
            } else {
                order_statistic(lo)
            }
        }
        QuantileMethod::Nearest => {
            let k = if frac < 0.5 {
                lo
            } else if frac > 0.5 {
                hi
            } else if lo % 2 == 0 {
                lo
            } else {
                hi
            };
            order_statistic(k)
        }
        QuantileMethod::Midpoint => {
            if frac > 0.0 {
                0.5 * (order_statistic(lo) + order_statistic(hi))
            } else {
                order_statistic(lo)
            }
        }
    }
}

/// Quantile of an ascending slice of finite values.
pub fn quantile_sorted(sorted: &[f64], p: f64, method: QuantileMethod) -> f64 {
    debug_assert!(
        sorted.windows(2).all(|w| w[0] <= w[1]),
        "quantile_sorted requires ascending input"
    );
    quantile_with(sorted.len() as u64, p, method, |k| sorted[k as usize])
}
