//! Percentile thresholds over sorted timer samples.

use crate::config::{Percentile, Tail};

/// Returns the index into `count` sorted samples holding the threshold value for `percentile`.
///
/// The percentage position is rounded half-up to a sample count (`floor(abs / 100 * count + 0.5)`). For upper-tail
/// percentiles that count is converted to a zero-based offset; lower-tail percentiles use it as-is. The result is
/// clamped to `[0, count - 1]`, which only matters for extreme magnitudes over very few samples (`upper 1` over two
/// samples would otherwise land at `-1`).
///
/// `count` must be at least 1.
pub fn threshold_index(count: usize, percentile: &Percentile) -> usize {
    debug_assert!(count > 0, "threshold index requires at least one sample");

    let rank = ((percentile.absolute() / 100.0) * count as f64 + 0.5).floor() as i64;
    let index = match percentile.tail() {
        Tail::Upper => rank - 1,
        Tail::Lower => rank,
    };

    index.clamp(0, count as i64 - 1) as usize
}

/// Returns the threshold value for `percentile` over `sorted` samples.
///
/// With a single sample there is nothing to index into, so that sample is the threshold for every percentile.
///
/// `sorted` must be non-empty and in ascending order.
pub fn threshold(sorted: &[f64], percentile: &Percentile) -> f64 {
    match sorted {
        [only] => *only,
        _ => sorted[threshold_index(sorted.len(), percentile)],
    }
}
