// =============================================================================
// Bollinger Bands and the mean-reversion score
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ), with σ the population standard deviation of
// the trailing window.  The z-score of the latest close against the band is
// the input of the mean-reversion score used in sideways regimes:
//
//   z      = (close - SMA) / σ
//   score  = -tanh(0.5 * z)          (above the mean => sell, below => buy)

use crate::indicators::stats::EPS;

/// Result of a Bollinger Band calculation.
#[derive(Debug, Clone)]
pub struct BollingerResult {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
    pub std_dev: f64,
    /// z-score of the latest close; 0.0 when `std_dev` is zero.
    pub z_score: f64,
}

/// Calculate Bollinger Bands over the last `period` closes.
///
/// Returns `None` when `period` is zero or fewer than `period` closes are
/// supplied.  A flat window is not an error: it yields `std_dev == 0` and a
/// neutral `z_score` of 0.
pub fn calculate_bollinger(closes: &[f64], period: usize, num_std: f64) -> Option<BollingerResult> {
    if period == 0 || closes.len() < period {
        return None;
    }

    let window = &closes[closes.len() - period..];
    let middle = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();

    let last = closes[closes.len() - 1];
    // Relative tolerance: a constant series can still leave rounding dust.
    let std_dev = if std_dev <= EPS * middle.abs().max(1.0) { 0.0 } else { std_dev };
    let z_score = if std_dev == 0.0 || !std_dev.is_finite() {
        0.0
    } else {
        (last - middle) / std_dev
    };

    Some(BollingerResult {
        upper: middle + num_std * std_dev,
        middle,
        lower: middle - num_std * std_dev,
        std_dev,
        z_score,
    })
}

/// Mean-reversion score in `[-1, 1]`: `-tanh(0.5 * z)` of the latest close
/// against its trailing SMA.
///
/// Returns exactly 0.0 when fewer than `window` closes are available or the
/// window has zero variance.
pub fn mean_reversion_score(closes: &[f64], window: usize) -> f64 {
    match calculate_bollinger(closes, window, 2.0) {
        Some(bands) if bands.std_dev > 0.0 => -(0.5 * bands.z_score).tanh(),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!(bb.z_score > 1.5);
    }

    #[test]
    fn bollinger_insufficient_data() {
        let closes = vec![1.0, 2.0, 3.0];
        assert!(calculate_bollinger(&closes, 20, 2.0).is_none());
    }

    #[test]
    fn bollinger_flat_has_neutral_z() {
        let closes = vec![100.0; 20];
        let bb = calculate_bollinger(&closes, 20, 2.0).unwrap();
        assert_eq!(bb.std_dev, 0.0);
        assert_eq!(bb.z_score, 0.0);
    }

    #[test]
    fn constant_series_scores_exactly_zero() {
        let closes = vec![42.0; 200];
        assert_eq!(mean_reversion_score(&closes, 20), 0.0);
    }

    #[test]
    fn price_above_mean_is_sell_bias() {
        let mut closes = vec![100.0; 19];
        closes.push(110.0);
        let score = mean_reversion_score(&closes, 20);
        assert!(score < 0.0 && score >= -1.0);

        let mut closes = vec![100.0; 19];
        closes.push(90.0);
        assert!(mean_reversion_score(&closes, 20) > 0.0);
    }

    #[test]
    fn short_history_scores_zero() {
        assert_eq!(mean_reversion_score(&[1.0, 2.0], 20), 0.0);
    }
}
