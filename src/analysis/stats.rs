//! Small statistics helpers shared by the analysis and risk modules.

use statrs::function::erf::{erf, erf_inv};
use std::f64::consts::{PI, SQRT_2};

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Sample standard deviation (n − 1 denominator); `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    Some(var.sqrt())
}

/// Simple returns `p[i]/p[i-1] - 1`.
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Annualized close-to-close volatility.
pub fn realized_vol(prices: &[f64], periods_per_year: f64) -> Option<f64> {
    sample_std(&simple_returns(prices)).map(|s| s * periods_per_year.sqrt())
}

/// Percentile of an ascending-sorted slice with linear interpolation
/// between closest ranks. `p` is in [0, 100].
pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 100.0);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Percentile of an unsorted slice.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sort_floats(&mut sorted);
    percentile_sorted(&sorted, p)
}

/// Median of an unsorted slice.
pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// Sort ascending; NaNs compare equal and keep their position.
pub fn sort_floats(values: &mut [f64]) {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
}

/// Inverse standard normal CDF for `p` in (0, 1).
pub fn normal_quantile(p: f64) -> f64 {
    SQRT_2 * erf_inv(2.0 * p - 1.0)
}

/// Standard normal CDF.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / SQRT_2))
}

/// Standard normal PDF.
pub fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mean_and_std() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_relative_eq!(mean(&v).unwrap(), 5.0);
        // Sample std of the classic example: sqrt(32/7)
        assert_relative_eq!(sample_std(&v).unwrap(), (32.0f64 / 7.0).sqrt(), epsilon = 1e-12);
        assert!(mean(&[]).is_none());
        assert!(sample_std(&[1.0]).is_none());
    }

    #[test]
    fn test_percentile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(percentile(&v, 50.0).unwrap(), 3.0);
        assert_relative_eq!(percentile(&v, 25.0).unwrap(), 2.0);
        assert_relative_eq!(percentile(&v, 90.0).unwrap(), 4.6, epsilon = 1e-12);
        assert_relative_eq!(percentile(&[5.0, 1.0], 50.0).unwrap(), 3.0);
        assert!(percentile(&[], 50.0).is_none());
    }

    #[test]
    fn test_returns_and_realized_vol() {
        let r = simple_returns(&[100.0, 110.0, 99.0]);
        assert_relative_eq!(r[0], 0.10, epsilon = 1e-12);
        assert_relative_eq!(r[1], -0.10, epsilon = 1e-12);
        assert!(realized_vol(&[100.0, 100.0, 100.0], 252.0).unwrap().abs() < 1e-12);
        assert!(realized_vol(&[100.0], 252.0).is_none());
    }

    #[test]
    fn test_normal_quantile() {
        assert_relative_eq!(normal_quantile(0.99), 2.326, epsilon = 1e-3);
        assert_relative_eq!(normal_quantile(0.5), 0.0, epsilon = 1e-9);
        assert_relative_eq!(normal_cdf(0.0), 0.5, epsilon = 1e-12);
        assert_relative_eq!(normal_cdf(1.96), 0.975, epsilon = 1e-3);
        assert_relative_eq!(normal_pdf(0.0), 0.398_942_28, epsilon = 1e-8);
    }
}
