// =============================================================================
// Descriptive statistics
// =============================================================================
//
// Small, allocation-free helpers over `f64` slices.  Two standard-deviation
// flavours are provided because the callers need both:
//
//   population σ  (divide by n)     : rolling volatility features, SMA bands
//   sample s      (divide by n - 1) : spread / cross-sectional z-scores
//
// Degenerate input never panics: empty slices have mean 0, and a z-score
// against a zero deviation is 0 (computed neutral).

/// Deviations at or below this are treated as zero.
pub const EPS: f64 = 1e-12;

/// Arithmetic mean.  Returns 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation (divide by `n`).
pub fn std_population(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Sample standard deviation (divide by `n - 1`).  Returns 0.0 when fewer
/// than two values are supplied.
pub fn std_sample(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// `(value - mean) / std`, or 0.0 when `std` is zero or not finite.
pub fn z_score(value: f64, mean: f64, std: f64) -> f64 {
    if std <= f64::EPSILON || !std.is_finite() {
        return 0.0;
    }
    let z = (value - mean) / std;
    if z.is_finite() {
        z
    } else {
        0.0
    }
}

/// Cross-sectional z-scores using the sample standard deviation.  All zeros
/// when the values carry no dispersion.
pub fn cross_sectional_z(values: &[f64]) -> Vec<f64> {
    let m = mean(values);
    let s = std_sample(values);
    values.iter().map(|&v| z_score(v, m, s)).collect()
}

/// Sample covariance of two equally long series.  0.0 for fewer than two
/// pairs.
pub fn covariance(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mx = mean(&xs[..n]);
    let my = mean(&ys[..n]);
    xs[..n]
        .iter()
        .zip(&ys[..n])
        .map(|(x, y)| (x - mx) * (y - my))
        .sum::<f64>()
        / (n - 1) as f64
}

/// Rolling population σ of `values[i - window ..= i]` (clipped at the start)
/// for every index `i`.
pub fn trailing_std_population(values: &[f64], window: usize) -> Vec<f64> {
    (0..values.len())
        .map(|i| std_population(&values[i.saturating_sub(window)..=i]))
        .collect()
}

/// Length of every maximal run of `target` in `labels`.
pub fn run_lengths<T: PartialEq>(labels: &[T], target: &T) -> Vec<usize> {
    let mut runs = Vec::new();
    let mut count = 0usize;
    for label in labels {
        if label == target {
            count += 1;
        } else if count > 0 {
            runs.push(count);
            count = 0;
        }
    }
    if count > 0 {
        runs.push(count);
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_and_std_basic() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&v) - 5.0).abs() < 1e-12);
        assert!((std_population(&v) - 2.0).abs() < 1e-12);
        assert!((std_sample(&v) - 2.138_089_935).abs() < 1e-6);
    }

    #[test]
    fn empty_and_single_are_zero() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(std_population(&[]), 0.0);
        assert_eq!(std_sample(&[3.0]), 0.0);
    }

    #[test]
    fn z_score_zero_std_is_neutral() {
        assert_eq!(z_score(10.0, 5.0, 0.0), 0.0);
        assert!((z_score(7.0, 5.0, 2.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cross_sectional_z_flat_is_zero() {
        assert!(cross_sectional_z(&[0.1, 0.1, 0.1]).iter().all(|z| *z == 0.0));
        let z = cross_sectional_z(&[1.0, 2.0, 3.0]);
        assert!((z[0] + 1.0).abs() < 1e-12);
        assert!(z[1].abs() < 1e-12);
    }

    #[test]
    fn trailing_std_starts_at_zero() {
        let v = [0.01, 0.02, 0.03, 0.04];
        let s = trailing_std_population(&v, 2);
        assert_eq!(s[0], 0.0);
        assert!((s[3] - std_population(&v[1..4])).abs() < 1e-15);
    }

    #[test]
    fn run_lengths_counts_runs() {
        let labels = [1, 1, 0, 1, 1, 1, 2, 1];
        assert_eq!(run_lengths(&labels, &1), vec![2, 3, 1]);
        assert!(run_lengths(&labels, &5).is_empty());
    }

    #[test]
    fn covariance_of_identical_series_is_variance() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((covariance(&v, &v) - std_sample(&v).powi(2)).abs() < 1e-12);
    }
}
