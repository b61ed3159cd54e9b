//! Statistics derived from native engine primitives.
//!
//! Follows pandas' conventions: sample variance (ddof = 1), NaN when a group
//! has too few values.

/// Sample variance from count, sum and sum of squares
pub fn sample_variance(count: u64, sum: f64, sum_of_squares: f64) -> f64 {
    if count <= 1 {
        return f64::NAN;
    }
    let n = count as f64;
    let mean = sum / n;
    let population = sum_of_squares / n - mean * mean;
    // rounding can push a constant group slightly below zero
    population.max(0.0) * n / (n - 1.0)
}

/// Sample standard deviation from count, sum and sum of squares
pub fn sample_std(count: u64, sum: f64, sum_of_squares: f64) -> f64 {
    sample_variance(count, sum, sum_of_squares).sqrt()
}
