// =============================================================================
// Market Regime Detector — trend × volatility
// =============================================================================
//
// Classifies the target's recent price path into one of five market regimes
// by crossing a trend test with a volatility test:
//
//   1. SIDEWAYS       : |t-stat of mean return| < sideways band
//   2. BULL_* / BEAR_* : sign of the t-stat picks the trend side
//   3. *_HIGH_VOL     : recent realized vol / long-run vol > high-vol ratio
//      *_LOW_VOL      : otherwise
//
// The same label keys the pattern component weights, the network bucket and
// the aggregator weight table.  `Unknown` is never produced by the
// classifier; it is the fallback label when no classification is available.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{FusionError, Result};
use crate::indicators::mean_reversion_score;
use crate::indicators::stats::{mean, std_sample, EPS};
use crate::regime::label::RegimeLabel;
use crate::runtime_config::TrendVolParams;
use crate::types::Action;

/// t-statistic reported for a perfectly smooth trend (zero return variance).
const T_STAT_CAP: f64 = 10.0;

// =============================================================================
// Types
// =============================================================================

/// Four directional regimes plus the neutral and fallback labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    BullLowVol,
    BullHighVol,
    BearLowVol,
    BearHighVol,
    Sideways,
    Unknown,
}

/// Trend side of a [`MarketRegime`], used by tables that ignore volatility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendBucket {
    Bull,
    Bear,
    Sideways,
    Unknown,
}

impl MarketRegime {
    pub const ALL: [MarketRegime; 6] = [
        Self::BullLowVol,
        Self::BullHighVol,
        Self::BearLowVol,
        Self::BearHighVol,
        Self::Sideways,
        Self::Unknown,
    ];

    pub fn trend_bucket(self) -> TrendBucket {
        match self {
            Self::BullLowVol | Self::BullHighVol => TrendBucket::Bull,
            Self::BearLowVol | Self::BearHighVol => TrendBucket::Bear,
            Self::Sideways => TrendBucket::Sideways,
            Self::Unknown => TrendBucket::Unknown,
        }
    }

    pub fn is_bullish(self) -> bool {
        self.trend_bucket() == TrendBucket::Bull
    }

    pub fn is_bearish(self) -> bool {
        self.trend_bucket() == TrendBucket::Bear
    }

    /// Best-effort label when only the HMM regime is known: the HMM has no
    /// volatility axis, so only `Sideways` carries over.
    pub fn from_hmm_label(label: RegimeLabel) -> Self {
        match label {
            RegimeLabel::Sideways => Self::Sideways,
            _ => Self::Unknown,
        }
    }

    /// Fixed directional signal of the trending regimes.  `None` for
    /// `Sideways` (mean reversion) and `Unknown`.
    fn base_signal(self) -> Option<f64> {
        match self {
            Self::BullLowVol => Some(0.8),
            Self::BullHighVol => Some(0.5),
            Self::BearLowVol => Some(-0.5),
            Self::BearHighVol => Some(-0.8),
            Self::Sideways | Self::Unknown => None,
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BullLowVol => write!(f, "BULL_LOW_VOL"),
            Self::BullHighVol => write!(f, "BULL_HIGH_VOL"),
            Self::BearLowVol => write!(f, "BEAR_LOW_VOL"),
            Self::BearHighVol => write!(f, "BEAR_HIGH_VOL"),
            Self::Sideways => write!(f, "SIDEWAYS"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl std::fmt::Display for TrendBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bull => write!(f, "BULL"),
            Self::Bear => write!(f, "BEAR"),
            Self::Sideways => write!(f, "SIDEWAYS"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Classification plus the statistics that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeState {
    pub regime: MarketRegime,

    /// Directional signal in [-1, 1] (already scaled by confidence).
    pub signal: f64,

    /// Confidence in the classification [0.0, 1.0].
    pub confidence: f64,

    pub action: Action,

    /// t-statistic of the mean return over the trend lookback.
    pub trend_t: f64,

    /// Recent realized volatility over long-run realized volatility.
    pub vol_ratio: f64,
}

// =============================================================================
// TrendVolClassifier
// =============================================================================

/// Stateless four-state classifier.  Cheap to clone; holds only parameters.
#[derive(Debug, Clone, Default)]
pub struct TrendVolClassifier {
    params: TrendVolParams,
}

impl TrendVolClassifier {
    pub fn new(params: TrendVolParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TrendVolParams {
        &self.params
    }

    /// Classify the latest period of `prices` (oldest first).
    ///
    /// Needs `trend_lookback + 1` prices, and at least `vol_window + 2`.
    pub fn classify(&self, prices: &[f64]) -> Result<RegimeState> {
        let p = &self.params;
        let required = (p.trend_lookback.max(p.vol_window + 1)) + 1;
        if prices.len() < required {
            return Err(FusionError::InsufficientHistory {
                context: "trend/volatility regime",
                required,
                actual: prices.len(),
            });
        }
        if let Some(bad) = prices.iter().find(|x| !x.is_finite() || **x <= 0.0) {
            return Err(FusionError::InvalidInput(format!(
                "prices must be finite and positive, found {bad}"
            )));
        }

        let returns: Vec<f64> = prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect();

        // --- Trend ------------------------------------------------------------
        let trend_slice = &returns[returns.len() - p.trend_lookback..];
        let trend_t = t_statistic(trend_slice);

        // --- Volatility -------------------------------------------------------
        let recent = &returns[returns.len() - p.vol_window..];
        let long_start = returns.len().saturating_sub(p.long_vol_window.max(p.vol_window));
        let long = &returns[long_start..];
        let recent_vol = std_sample(recent);
        let long_vol = std_sample(long);
        let vol_ratio = if long_vol > EPS {
            recent_vol / long_vol
        } else {
            1.0
        };

        let (regime, confidence) = classify(trend_t, vol_ratio, p);

        let base = match regime.base_signal() {
            Some(b) => b,
            None => mean_reversion_score(prices, p.mean_reversion_window),
        };
        let signal = (base * confidence).clamp(-1.0, 1.0);

        let action = if signal > p.action_threshold {
            Action::Buy
        } else if signal < -p.action_threshold {
            Action::Sell
        } else {
            Action::Hold
        };

        debug!(
            regime = %regime,
            trend_t = format!("{:.3}", trend_t),
            vol_ratio = format!("{:.3}", vol_ratio),
            signal = format!("{:.4}", signal),
            confidence = format!("{:.2}", confidence),
            "Trend/vol regime classified"
        );

        Ok(RegimeState {
            regime,
            signal,
            confidence,
            action,
            trend_t,
            vol_ratio,
        })
    }
}

// =============================================================================
// Classification logic
// =============================================================================

fn t_statistic(returns: &[f64]) -> f64 {
    let m = mean(returns);
    let sd = std_sample(returns);
    if sd <= EPS {
        if m.abs() <= EPS {
            0.0
        } else {
            m.signum() * T_STAT_CAP
        }
    } else {
        (m / (sd / (returns.len() as f64).sqrt())).clamp(-T_STAT_CAP, T_STAT_CAP)
    }
}

/// Determine the regime and a confidence score from the raw statistics.
fn classify(trend_t: f64, vol_ratio: f64, p: &TrendVolParams) -> (MarketRegime, f64) {
    let band = p.sideways_t_band;
    let abs_t = trend_t.abs();

    // 1. SIDEWAYS: no significant drift.
    if abs_t < band {
        let confidence = remap(abs_t, band, 0.0, 0.50, 0.90);
        return (MarketRegime::Sideways, confidence);
    }

    // 2. Directional: side from the t-stat, volatility from the ratio.
    let high_vol = vol_ratio > p.high_vol_ratio;
    let regime = match (trend_t > 0.0, high_vol) {
        (true, false) => MarketRegime::BullLowVol,
        (true, true) => MarketRegime::BullHighVol,
        (false, false) => MarketRegime::BearLowVol,
        (false, true) => MarketRegime::BearHighVol,
    };

    let trend_conf = remap(abs_t, band, band * 3.0, 0.55, 1.0);
    let vol_conf = remap((vol_ratio - p.high_vol_ratio).abs(), 0.0, 0.5, 0.50, 1.0);
    let confidence = (2.0 * trend_conf + vol_conf) / 3.0;

    trace!(
        trend_conf = format!("{:.3}", trend_conf),
        vol_conf = format!("{:.3}", vol_conf),
        "Directional regime confidence"
    );
    (regime, confidence)
}

/// Linearly remap `value` from `[in_lo, in_hi]` to `[out_lo, out_hi]`, clamped
/// to the output range. Works regardless of whether `in_lo < in_hi` or vice
/// versa.
pub(crate) fn remap(value: f64, in_lo: f64, in_hi: f64, out_lo: f64, out_hi: f64) -> f64 {
    let t = if (in_hi - in_lo).abs() < f64::EPSILON {
        0.5
    } else {
        (value - in_lo) / (in_hi - in_lo)
    };
    let clamped = t.clamp(0.0, 1.0);
    out_lo + clamped * (out_hi - out_lo)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TrendVolParams {
        TrendVolParams::default()
    }

    /// Growth path whose per-period return wobbles around `drift` with the
    /// given amplitude; the amplitude can change for the last `tail` periods.
    fn path(n: usize, drift: f64, amp: f64, tail: usize, tail_amp: f64) -> Vec<f64> {
        let mut prices = vec![100.0];
        for i in 1..n {
            let a = if i >= n - tail { tail_amp } else { amp };
            let r = drift + a * ((i as f64) * 1.3).sin();
            let last = prices[i - 1];
            prices.push(last * (1.0 + r));
        }
        prices
    }

    #[test]
    fn test_classify_bull_low_vol() {
        let (regime, conf) = classify(5.0, 0.8, &params());
        assert_eq!(regime, MarketRegime::BullLowVol);
        assert!(conf > 0.5 && conf <= 1.0);
    }

    #[test]
    fn test_classify_bear_high_vol() {
        let (regime, _) = classify(-4.0, 1.8, &params());
        assert_eq!(regime, MarketRegime::BearHighVol);
    }

    #[test]
    fn test_classify_sideways() {
        let (regime, conf) = classify(0.2, 2.0, &params());
        assert_eq!(regime, MarketRegime::Sideways);
        assert!(conf > 0.5);
    }

    #[test]
    fn test_smooth_uptrend_is_bull_low_vol() {
        let prices: Vec<f64> = (0..200).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
        let state = TrendVolClassifier::default().classify(&prices).unwrap();
        assert_eq!(state.regime, MarketRegime::BullLowVol);
        assert!(state.signal > 0.3);
        assert_eq!(state.action, Action::Buy);
    }

    #[test]
    fn test_volatile_downtrend_is_bear_high_vol() {
        let prices = path(200, -0.01, 0.002, 20, 0.008);
        let state = TrendVolClassifier::default().classify(&prices).unwrap();
        assert_eq!(state.regime, MarketRegime::BearHighVol);
        assert!(state.vol_ratio > 1.0);
        assert!(state.signal < 0.0);
    }

    #[test]
    fn test_flat_prices_are_sideways_and_neutral() {
        let prices = vec![50.0; 150];
        let state = TrendVolClassifier::default().classify(&prices).unwrap();
        assert_eq!(state.regime, MarketRegime::Sideways);
        assert_eq!(state.signal, 0.0);
        assert_eq!(state.action, Action::Hold);
    }

    #[test]
    fn test_short_history_is_not_computable() {
        let err = TrendVolClassifier::default().classify(&[1.0, 2.0, 3.0]).unwrap_err();
        assert!(err.is_not_computable());
    }

    #[test]
    fn test_buckets_and_direction() {
        assert_eq!(MarketRegime::BullHighVol.trend_bucket(), TrendBucket::Bull);
        assert_eq!(MarketRegime::BearLowVol.trend_bucket(), TrendBucket::Bear);
        assert!(MarketRegime::BullLowVol.is_bullish());
        assert!(MarketRegime::BearHighVol.is_bearish());
        assert!(!MarketRegime::Unknown.is_bullish());
        assert_eq!(
            MarketRegime::from_hmm_label(RegimeLabel::Sideways),
            MarketRegime::Sideways
        );
        assert_eq!(
            MarketRegime::from_hmm_label(RegimeLabel::Bull),
            MarketRegime::Unknown
        );
    }

    #[test]
    fn test_regime_display_and_serde() {
        assert_eq!(MarketRegime::BearHighVol.to_string(), "BEAR_HIGH_VOL");
        assert_eq!(
            serde_json::to_string(&MarketRegime::BullLowVol).unwrap(),
            "\"BULL_LOW_VOL\""
        );
        assert_eq!(TrendBucket::Sideways.to_string(), "SIDEWAYS");
    }

    #[test]
    fn test_remap() {
        assert!((remap(0.5, 0.0, 1.0, 0.0, 10.0) - 5.0).abs() < 1e-10);
        // Clamping above.
        assert!((remap(2.0, 0.0, 1.0, 0.0, 10.0) - 10.0).abs() < 1e-10);
        // Reversed input range.
        assert!((remap(0.0, 1.0, 0.0, 0.0, 10.0) - 10.0).abs() < 1e-10);
    }
}
