//! Robust statistics for spread baselines
//!
//! Interpolated quantiles over a sorted sample, plus the median / IQR pair the
//! anomaly detector uses as its reference band. The IQR ignores the tails, so a
//! handful of extreme spreads cannot drag the band open.

/// Minimum number of finite samples before a baseline is defined.
pub const MIN_BASELINE_SAMPLES: usize = 20;

/// Linearly interpolated quantile of an ascending slice.
///
/// Position is `(n - 1) * q`. An exact index returns that element; otherwise the
/// value is interpolated between the floor and ceil neighbours. Returns `None`
/// for an empty slice.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        1 => Some(sorted[0]),
        _ => {
            let pos = (n - 1) as f64 * q.clamp(0.0, 1.0);
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            if lo == hi {
                return Some(sorted[lo]);
            }
            let w = pos - lo as f64;
            Some(sorted[lo] * (1.0 - w) + sorted[hi] * w)
        }
    }
}

/// Median and inter-quartile range of the finite values in `values`.
///
/// Returns `(None, None)` when fewer than [`MIN_BASELINE_SAMPLES`] finite values
/// remain after filtering.
pub fn median_iqr<I>(values: I) -> (Option<f64>, Option<f64>)
where
    I: IntoIterator<Item = f64>,
{
    let mut sorted: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
    if sorted.len() < MIN_BASELINE_SAMPLES {
        return (None, None);
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let median = quantile(&sorted, 0.5);
    let iqr = match (quantile(&sorted, 0.25), quantile(&sorted, 0.75)) {
        (Some(q25), Some(q75)) => Some(q75 - q25),
        _ => None,
    };
    (median, iqr)
}
