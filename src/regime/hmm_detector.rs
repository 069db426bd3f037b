// =============================================================================
// HMM Regime Detector — smoothed BEAR / SIDEWAYS / BULL regime and signal
// =============================================================================
//
// Features per period: (simple return, trailing population σ of returns over
// `feature_window` periods).  The first `feature_window - 1` returns only warm
// up the volatility window and carry no feature row.
//
// Everything except the fitted model is recomputed from scratch on every
// call; the detector keeps no history of its own.
//
// Smoothing over the last `smoothing_window` labels:
//
//   1. Majority label by count (ties → most bearish).  Stable if
//      count / window ≥ min_duration / window AND its mean probability over
//      the window ≥ confidence_threshold.
//   2. Otherwise the label with the highest window-averaged probability is
//      stable if that average ≥ confidence_threshold.
//   3. Otherwise the last raw label is reported with is_stable = false.
//
// When the fitted states share one mean return (a perfectly steady trend or
// flat prices) the mean-return ordering carries no information: every state
// is labelled SIDEWAYS, probabilities are uniform and the signal is 0.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{FusionError, Result};
use crate::indicators::mean_reversion_score;
use crate::indicators::stats::{run_lengths, trailing_std_population};
use crate::regime::hmm::{GaussianHmm, HmmConfig};
use crate::regime::label::RegimeLabel;
use crate::runtime_config::RegimeParams;
use crate::types::PhaseSignal;

// =============================================================================
// Types
// =============================================================================

/// Probability mass per regime label for one period.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RegimeProbabilities {
    pub bear: f64,
    pub sideways: f64,
    pub bull: f64,
}

impl RegimeProbabilities {
    pub fn get(&self, label: RegimeLabel) -> f64 {
        match label {
            RegimeLabel::Bear => self.bear,
            RegimeLabel::Sideways => self.sideways,
            RegimeLabel::Bull => self.bull,
        }
    }

    fn add(&mut self, label: RegimeLabel, p: f64) {
        match label {
            RegimeLabel::Bear => self.bear += p,
            RegimeLabel::Sideways => self.sideways += p,
            RegimeLabel::Bull => self.bull += p,
        }
    }

    /// Most probable label; ties resolve to the most bearish.
    pub fn argmax(&self) -> RegimeLabel {
        let mut best = RegimeLabel::Bear;
        for label in RegimeLabel::ALL {
            if self.get(label) > self.get(best) {
                best = label;
            }
        }
        best
    }

    pub fn max(&self) -> f64 {
        self.get(self.argmax())
    }

    fn uniform() -> Self {
        let third = 1.0 / 3.0;
        Self {
            bear: third,
            sideways: third,
            bull: third,
        }
    }

    fn mean(rows: &[RegimeProbabilities]) -> Self {
        let mut out = Self::default();
        if rows.is_empty() {
            return out;
        }
        for row in rows {
            for label in RegimeLabel::ALL {
                out.add(label, row.get(label));
            }
        }
        let n = rows.len() as f64;
        Self {
            bear: out.bear / n,
            sideways: out.sideways / n,
            bull: out.bull / n,
        }
    }
}

/// Full-history regime prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePrediction {
    pub regime: RegimeLabel,
    pub regime_name: String,
    /// Probabilities of the latest period.
    pub probabilities: RegimeProbabilities,
    /// Viterbi label of every feature row, oldest first.
    pub history: Vec<RegimeLabel>,
    pub probs_history: Vec<RegimeProbabilities>,
    /// The fitted states cannot be ordered by mean return.
    pub degenerate: bool,
}

/// Smoothed view over the most recent labels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedRegime {
    pub label: RegimeLabel,
    pub confidence: f64,
    pub is_stable: bool,
    /// Fraction of the window carrying `label`.
    pub consistency: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeTransition {
    RegimeChange,
    Stable,
    InsufficientData,
}

impl std::fmt::Display for RegimeTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RegimeChange => write!(f, "REGIME_CHANGE"),
            Self::Stable => write!(f, "STABLE"),
            Self::InsufficientData => write!(f, "INSUFFICIENT_DATA"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingInfo {
    pub window: usize,
    pub consistency: f64,
    /// Unsmoothed label of the latest period.
    pub raw_regime: RegimeLabel,
    /// Label that dominated the preceding window, if any.
    pub previous_regime: Option<RegimeLabel>,
}

/// Directional reading of the regime phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeSignal {
    /// In [-1, 1], already scaled by confidence and stability.
    pub signal: f64,
    pub regime: RegimeLabel,
    pub regime_name: String,
    pub confidence: f64,
    pub transition: RegimeTransition,
    pub is_stable: bool,
    pub probabilities: RegimeProbabilities,
    pub smoothing_info: SmoothingInfo,
}

impl RegimeSignal {
    pub fn phase_signal(&self) -> Result<PhaseSignal> {
        PhaseSignal::new(self.signal, self.confidence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelStats {
    pub count: usize,
    /// Fraction of the history spent in the label.
    pub share: f64,
    /// Mean length of an uninterrupted run, 0 if never visited.
    pub avg_duration: f64,
}

// =============================================================================
// HmmRegimeDetector
// =============================================================================

/// Regime detector around a [`GaussianHmm`].  The fitted model is immutable
/// and shared through an `Arc`, so detectors built from a cache entry are
/// cheap.
#[derive(Debug, Clone, Default)]
pub struct HmmRegimeDetector {
    params: RegimeParams,
    model: Option<Arc<GaussianHmm>>,
}

impl HmmRegimeDetector {
    pub fn new(params: RegimeParams) -> Self {
        Self {
            params,
            model: None,
        }
    }

    /// Detector around an already fitted model.
    pub fn with_model(params: RegimeParams, model: Arc<GaussianHmm>) -> Self {
        Self {
            params,
            model: Some(model),
        }
    }

    pub fn params(&self) -> &RegimeParams {
        &self.params
    }

    pub fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&Arc<GaussianHmm>> {
        self.model.as_ref()
    }

    /// Fit a model to `prices` without attaching it to a detector.
    ///
    /// Fails with `InsufficientHistory` below `2 × feature_window + 1`
    /// prices.
    pub fn fit_model(prices: &[f64], params: &RegimeParams) -> Result<GaussianHmm> {
        let required = 2 * params.feature_window + 1;
        if prices.len() < required {
            return Err(FusionError::InsufficientHistory {
                context: "regime fit",
                required,
                actual: prices.len(),
            });
        }
        let features = features(prices, params.feature_window)?;
        let config = HmmConfig {
            n_states: params.n_states,
            n_iter: params.n_iter,
            tol: params.tol,
            min_covar: params.min_covar,
            seed: params.seed,
        };
        let model = GaussianHmm::fit(features.view(), &config)?;

        info!(
            observations = features.nrows(),
            states = model.n_states(),
            iterations = model.iterations(),
            log_likelihood = format!("{:.4}", model.log_likelihood()),
            "Regime model fitted"
        );
        Ok(model)
    }

    /// Fit (or re-fit) the detector.  Deterministic for a fixed seed.
    pub fn fit(&mut self, prices: &[f64]) -> Result<&mut Self> {
        let model = Self::fit_model(prices, &self.params)?;
        self.model = Some(Arc::new(model));
        Ok(self)
    }

    fn ensure_fitted(&mut self, prices: &[f64]) -> Result<Arc<GaussianHmm>> {
        if let Some(model) = &self.model {
            return Ok(Arc::clone(model));
        }
        if !self.params.auto_fit {
            return Err(FusionError::ModelNotFitted);
        }
        info!(prices = prices.len(), "Regime model not fitted; fitting on first use");
        self.fit(prices)?;
        self.model.clone().ok_or(FusionError::ModelNotFitted)
    }

    /// Labels and probabilities for the whole history.
    ///
    /// Fits on first use when `auto_fit` is set, otherwise fails with
    /// `ModelNotFitted`.
    pub fn predict_regime(&mut self, prices: &[f64]) -> Result<RegimePrediction> {
        self.check_predict_history(prices)?;
        let model = self.ensure_fitted(prices)?;
        predict(&model, prices, &self.params)
    }

    /// Smoothed regime, transition flag and directional signal.
    pub fn get_signal(&mut self, prices: &[f64]) -> Result<RegimeSignal> {
        let prediction = self.predict_regime(prices)?;
        Ok(signal_from_prediction(&prediction, prices, &self.params))
    }

    /// Count, share and mean run length of every label over the history.
    pub fn get_regime_stats(&mut self, prices: &[f64]) -> Result<BTreeMap<RegimeLabel, LabelStats>> {
        let prediction = self.predict_regime(prices)?;
        let total = prediction.history.len().max(1) as f64;
        Ok(RegimeLabel::ALL
            .iter()
            .map(|&label| {
                let runs = run_lengths(&prediction.history, &label);
                let count: usize = runs.iter().sum();
                let avg_duration = if runs.is_empty() {
                    0.0
                } else {
                    count as f64 / runs.len() as f64
                };
                (
                    label,
                    LabelStats {
                        count,
                        share: count as f64 / total,
                        avg_duration,
                    },
                )
            })
            .collect())
    }

    fn check_predict_history(&self, prices: &[f64]) -> Result<()> {
        let required = self.params.feature_window + 2;
        if prices.len() < required {
            return Err(FusionError::InsufficientHistory {
                context: "regime prediction",
                required,
                actual: prices.len(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Feature preparation
// =============================================================================

/// Feature matrix `(return, trailing σ)` with the warm-up rows dropped.
fn features(prices: &[f64], window: usize) -> Result<Array2<f64>> {
    if let Some(bad) = prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
        return Err(FusionError::InvalidInput(format!(
            "prices must be finite and positive, found {bad}"
        )));
    }
    let returns: Vec<f64> = prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
    let vol = trailing_std_population(&returns, window.saturating_sub(1));

    let warmup = window.saturating_sub(1).min(returns.len());
    let rows = returns.len() - warmup;
    let mut out = Array2::<f64>::zeros((rows, 2));
    for (row, i) in (warmup..returns.len()).enumerate() {
        out[[row, 0]] = returns[i];
        out[[row, 1]] = vol[i];
    }
    Ok(out)
}

// =============================================================================
// Prediction and smoothing
// =============================================================================

fn predict(model: &GaussianHmm, prices: &[f64], params: &RegimeParams) -> Result<RegimePrediction> {
    let x = features(prices, params.feature_window)?;
    let n_states = model.n_states();
    let rank = model.state_rank();

    let spread = model.return_mean_spread();
    let degenerate = spread < params.min_state_separation;
    if degenerate {
        debug!(
            spread = format!("{:.3e}", spread),
            "Regime states share one mean return; labelling SIDEWAYS"
        );
    }
    let label_of = |state: usize| {
        if degenerate {
            RegimeLabel::Sideways
        } else {
            RegimeLabel::for_rank(rank[state], n_states)
        }
    };

    let path = model.decode(x.view());
    let gamma = model.posteriors(x.view());

    let history: Vec<RegimeLabel> = path.iter().map(|&s| label_of(s)).collect();

    let probs_history: Vec<RegimeProbabilities> = gamma
        .rows()
        .into_iter()
        .map(|row| {
            if degenerate {
                return RegimeProbabilities::uniform();
            }
            let mut p = RegimeProbabilities::default();
            for (state, &g) in row.iter().enumerate() {
                p.add(label_of(state), g);
            }
            p
        })
        .collect();

    let regime = history.last().copied().ok_or(FusionError::InsufficientHistory {
        context: "regime prediction",
        required: params.feature_window + 2,
        actual: prices.len(),
    })?;
    let probabilities = probs_history.last().copied().unwrap_or_default();

    Ok(RegimePrediction {
        regime,
        regime_name: regime.to_string(),
        probabilities,
        history,
        probs_history,
        degenerate,
    })
}

/// Majority label of `labels`; ties resolve to the most bearish.
fn dominant(labels: &[RegimeLabel]) -> Option<(RegimeLabel, usize)> {
    if labels.is_empty() {
        return None;
    }
    let mut best = (RegimeLabel::Bear, 0usize);
    for label in RegimeLabel::ALL {
        let count = labels.iter().filter(|l| **l == label).count();
        if count > best.1 {
            best = (label, count);
        }
    }
    Some(best)
}

/// Smooth the most recent `window` labels.
pub fn smooth(
    history: &[RegimeLabel],
    probs: &[RegimeProbabilities],
    params: &RegimeParams,
) -> Option<SmoothedRegime> {
    let raw = *history.last()?;
    let w = params.smoothing_window;

    if history.len() < w || probs.len() < w {
        return Some(SmoothedRegime {
            label: raw,
            confidence: probs.last().map(|p| p.max()).unwrap_or(0.0),
            is_stable: false,
            consistency: 0.0,
        });
    }

    let labels = &history[history.len() - w..];
    let window_probs = &probs[probs.len() - w..];
    let consistency_of = |label: RegimeLabel| {
        labels.iter().filter(|l| **l == label).count() as f64 / w as f64
    };

    // 1. Majority vote.
    let (candidate, count) = dominant(labels)?;
    let consistency = count as f64 / w as f64;
    let avg = RegimeProbabilities::mean(window_probs);
    let candidate_prob = avg.get(candidate);
    let min_consistency = params.min_regime_duration as f64 / w as f64;

    if consistency >= min_consistency && candidate_prob >= params.confidence_threshold {
        return Some(SmoothedRegime {
            label: candidate,
            confidence: candidate_prob,
            is_stable: true,
            consistency,
        });
    }

    // 2. Averaged probabilities.
    let best = avg.argmax();
    if avg.get(best) >= params.confidence_threshold {
        return Some(SmoothedRegime {
            label: best,
            confidence: avg.get(best),
            is_stable: true,
            consistency: consistency_of(best),
        });
    }

    // 3. Unsmoothed fallback.
    Some(SmoothedRegime {
        label: raw,
        confidence: avg.get(raw),
        is_stable: false,
        consistency: consistency_of(raw),
    })
}

/// Compare the current regime with the dominant label of the preceding
/// window of equal size.
fn transition(
    history: &[RegimeLabel],
    current: RegimeLabel,
    params: &RegimeParams,
) -> (RegimeTransition, Option<RegimeLabel>) {
    let w = params.smoothing_window;
    let n = history.len();
    let current_len = n.min(w);
    let previous = &history[n.saturating_sub(2 * w)..n.saturating_sub(w)];

    if current_len < params.min_regime_duration.max(1)
        || previous.len() < params.min_regime_duration.max(1)
    {
        return (RegimeTransition::InsufficientData, None);
    }
    match dominant(previous) {
        Some((prev, _)) if prev != current => (RegimeTransition::RegimeChange, Some(prev)),
        Some((prev, _)) => (RegimeTransition::Stable, Some(prev)),
        None => (RegimeTransition::InsufficientData, None),
    }
}

fn signal_from_prediction(
    prediction: &RegimePrediction,
    prices: &[f64],
    params: &RegimeParams,
) -> RegimeSignal {
    let smoothed = if prediction.degenerate {
        SmoothedRegime {
            label: RegimeLabel::Sideways,
            confidence: prediction.probabilities.sideways,
            is_stable: false,
            consistency: if prediction.history.len() >= params.smoothing_window {
                1.0
            } else {
                0.0
            },
        }
    } else {
        smooth(&prediction.history, &prediction.probs_history, params).unwrap_or(
            SmoothedRegime {
                label: prediction.regime,
                confidence: 0.0,
                is_stable: false,
                consistency: 0.0,
            },
        )
    };

    let signal = if prediction.degenerate {
        0.0
    } else {
        let base = smoothed
            .label
            .base_signal()
            .unwrap_or_else(|| mean_reversion_score(prices, params.mean_reversion_window));
        let stability = if smoothed.is_stable {
            1.0
        } else {
            params.unstable_penalty
        };
        (base * smoothed.confidence * stability).clamp(-1.0, 1.0)
    };

    let (transition, previous_regime) = transition(&prediction.history, smoothed.label, params);

    debug!(
        regime = %smoothed.label,
        raw = %prediction.regime,
        stable = smoothed.is_stable,
        transition = %transition,
        signal = format!("{:.4}", signal),
        confidence = format!("{:.2}", smoothed.confidence),
        "Regime signal"
    );

    RegimeSignal {
        signal,
        regime: smoothed.label,
        regime_name: smoothed.label.to_string(),
        confidence: smoothed.confidence.clamp(0.0, 1.0),
        transition,
        is_stable: smoothed.is_stable,
        probabilities: prediction.probabilities,
        smoothing_info: SmoothingInfo {
            window: params.smoothing_window,
            consistency: smoothed.consistency,
            raw_regime: prediction.regime,
            previous_regime,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Strictly increasing prices whose growth rate accelerates, so the
    /// latest periods carry the highest returns.
    fn accelerating_prices(n: usize) -> Vec<f64> {
        let mut prices = vec![100.0];
        for t in 0..n - 1 {
            let last = prices[t];
            prices.push(last * (1.0 + 0.001 + 0.0001 * t as f64));
        }
        prices
    }

    /// Oscillating prices with three alternating drift regimes.
    fn regime_switching_prices() -> Vec<f64> {
        let drifts = [0.004, -0.004, 0.0];
        let mut prices = vec![100.0];
        for t in 0..299 {
            let d = drifts[(t / 50) % 3];
            let noise = 0.002 * ((t as f64) * 2.1).sin();
            let last = prices[t];
            prices.push(last * (1.0 + d + noise));
        }
        prices
    }

    fn p(bear: f64, sideways: f64, bull: f64) -> RegimeProbabilities {
        RegimeProbabilities {
            bear,
            sideways,
            bull,
        }
    }

    #[test]
    fn monotonic_uptrend_ends_bull_and_stable() {
        let prices = accelerating_prices(200);
        assert!(prices.windows(2).all(|w| w[1] > w[0]));

        let mut detector = HmmRegimeDetector::default();
        detector.fit(&prices).unwrap();
        let s = detector.get_signal(&prices).unwrap();

        assert_eq!(s.regime, RegimeLabel::Bull);
        assert_eq!(s.regime_name, "BULL");
        assert!(s.is_stable);
        assert!(s.signal > 0.5, "signal {}", s.signal);
    }

    #[test]
    fn fit_requires_two_windows_of_history() {
        let mut detector = HmmRegimeDetector::default();
        let err = detector.fit(&accelerating_prices(40)).unwrap_err();
        assert_eq!(
            err,
            FusionError::InsufficientHistory {
                context: "regime fit",
                required: 41,
                actual: 40
            }
        );
        assert!(detector.fit(&accelerating_prices(41)).is_ok());
    }

    #[test]
    fn predict_fails_fast_on_short_history() {
        let mut detector = HmmRegimeDetector::default();
        detector.fit(&accelerating_prices(100)).unwrap();
        let err = detector.predict_regime(&accelerating_prices(21)).unwrap_err();
        assert!(err.is_not_computable());
        assert!(detector.predict_regime(&accelerating_prices(22)).is_ok());
    }

    #[test]
    fn model_not_fitted_without_auto_fit() {
        let params = RegimeParams {
            auto_fit: false,
            ..RegimeParams::default()
        };
        let mut detector = HmmRegimeDetector::new(params);
        assert_eq!(
            detector.get_signal(&accelerating_prices(100)).unwrap_err(),
            FusionError::ModelNotFitted
        );
        assert!(!detector.is_fitted());
    }

    #[test]
    fn auto_fit_on_first_use() {
        let mut detector = HmmRegimeDetector::default();
        let prices = accelerating_prices(120);
        detector.predict_regime(&prices).unwrap();
        assert!(detector.is_fitted());
    }

    #[test]
    fn predictions_are_distributions_and_deterministic() {
        let prices = regime_switching_prices();
        let mut a = HmmRegimeDetector::default();
        let mut b = HmmRegimeDetector::default();
        let pa = a.predict_regime(&prices).unwrap();
        let pb = b.predict_regime(&prices).unwrap();

        assert_eq!(pa.history.len(), prices.len() - 20);
        for probs in &pa.probs_history {
            let sum = probs.bear + probs.sideways + probs.bull;
            assert!((sum - 1.0).abs() < 1e-6);
        }
        assert_eq!(
            serde_json::to_string(&pa).unwrap(),
            serde_json::to_string(&pb).unwrap()
        );
    }

    #[test]
    fn signal_bounds_hold_on_noisy_series() {
        let prices = regime_switching_prices();
        let mut detector = HmmRegimeDetector::default();
        let s = detector.get_signal(&prices).unwrap();
        assert!((0.0..=1.0).contains(&s.confidence));
        assert!(s.signal.abs() <= 1.0);
    }

    #[test]
    fn constant_prices_give_finite_signal() {
        let prices = vec![25.0; 120];
        let mut detector = HmmRegimeDetector::default();
        let s = detector.get_signal(&prices).unwrap();
        assert_eq!(s.regime, RegimeLabel::Sideways);
        assert_eq!(s.signal, 0.0);
        assert!(s.confidence < 0.5);
    }

    fn geometric_prices(n: usize, rate: f64) -> Vec<f64> {
        (0..n).map(|i| 100.0 * (1.0 + rate).powi(i as i32)).collect()
    }

    #[test]
    fn steady_trends_with_one_return_are_neutral() {
        for rate in [0.01, -0.01] {
            let prices = geometric_prices(120, rate);
            let mut detector = HmmRegimeDetector::default();
            let prediction = detector.predict_regime(&prices).unwrap();
            assert!(prediction.degenerate, "rate {rate}");
            assert!(prediction.history.iter().all(|l| *l == RegimeLabel::Sideways));
            assert!((prediction.probabilities.bull - 1.0 / 3.0).abs() < 1e-12);

            let s = detector.get_signal(&prices).unwrap();
            assert_eq!(s.regime, RegimeLabel::Sideways);
            assert_eq!(s.signal, 0.0);
            assert!(!s.is_stable);
            assert!(s.confidence < 0.5, "rate {rate}: {}", s.confidence);
        }
    }

    #[test]
    fn separated_states_are_not_degenerate() {
        let prices = regime_switching_prices();
        let mut detector = HmmRegimeDetector::default();
        let prediction = detector.predict_regime(&prices).unwrap();
        assert!(!prediction.degenerate);
        assert!(detector.model().unwrap().return_mean_spread() > 1e-4);
    }

    #[test]
    fn regime_stats_cover_history() {
        let prices = regime_switching_prices();
        let mut detector = HmmRegimeDetector::default();
        let stats = detector.get_regime_stats(&prices).unwrap();
        let total: usize = stats.values().map(|s| s.count).sum();
        assert_eq!(total, prices.len() - 20);
        let share: f64 = stats.values().map(|s| s.share).sum();
        assert!((share - 1.0).abs() < 1e-9);
        for s in stats.values() {
            assert!(s.count == 0 || s.avg_duration >= 1.0);
        }
    }

    #[test]
    fn smoothing_short_history_is_unstable() {
        let params = RegimeParams::default();
        let history = vec![RegimeLabel::Bull, RegimeLabel::Bull];
        let probs = vec![p(0.1, 0.1, 0.8), p(0.05, 0.15, 0.8)];
        let s = smooth(&history, &probs, &params).unwrap();
        assert!(!s.is_stable);
        assert_eq!(s.consistency, 0.0);
        assert_eq!(s.label, RegimeLabel::Bull);
        assert!((s.confidence - 0.8).abs() < 1e-12);
    }

    #[test]
    fn smoothing_majority_vote() {
        let params = RegimeParams::default();
        use RegimeLabel::*;
        let history = vec![Bear, Bull, Bull, Sideways, Bull];
        let probs = vec![
            p(0.6, 0.1, 0.3),
            p(0.1, 0.1, 0.8),
            p(0.1, 0.1, 0.8),
            p(0.2, 0.5, 0.3),
            p(0.0, 0.1, 0.9),
        ];
        // Bull: 3 of 5 labels, mean probability 0.62.
        let s = smooth(&history, &probs, &params).unwrap();
        assert_eq!(s.label, Bull);
        assert!(s.is_stable);
        assert!((s.consistency - 0.6).abs() < 1e-12);
        assert!((s.confidence - 0.62).abs() < 1e-12);
    }

    #[test]
    fn smoothing_falls_back_to_last_raw_label() {
        let params = RegimeParams::default();
        use RegimeLabel::*;
        let history = vec![Bull, Bear, Sideways, Bull, Bear];
        let probs = vec![p(0.34, 0.33, 0.33); 5];
        let s = smooth(&history, &probs, &params).unwrap();
        assert_eq!(s.label, Bear);
        assert!(!s.is_stable);
        assert!((s.consistency - 0.4).abs() < 1e-12);
    }

    #[test]
    fn smoothing_accepts_averaged_probability() {
        let params = RegimeParams::default();
        use RegimeLabel::*;
        // Labels disagree, probabilities clearly favour Sideways.
        let history = vec![Bull, Bear, Sideways, Bull, Bear];
        let probs = vec![p(0.1, 0.7, 0.2); 5];
        let s = smooth(&history, &probs, &params).unwrap();
        assert_eq!(s.label, Sideways);
        assert!(s.is_stable);
    }

    #[test]
    fn transition_flags() {
        let params = RegimeParams::default();
        use RegimeLabel::*;
        let mut history = vec![Bear; 5];
        history.extend(vec![Bull; 5]);
        assert_eq!(
            transition(&history, Bull, &params),
            (RegimeTransition::RegimeChange, Some(Bear))
        );
        assert_eq!(
            transition(&vec![Bull; 10], Bull, &params),
            (RegimeTransition::Stable, Some(Bull))
        );
        assert_eq!(
            transition(&vec![Bull; 6], Bull, &params).0,
            RegimeTransition::InsufficientData
        );
    }

    #[test]
    fn unstable_regime_signal_is_halved() {
        let params = RegimeParams::default();
        use RegimeLabel::*;
        let prediction = RegimePrediction {
            regime: Bull,
            regime_name: "BULL".into(),
            probabilities: p(0.3, 0.3, 0.4),
            history: vec![Sideways, Bear, Sideways, Bear, Bull],
            probs_history: vec![p(0.3, 0.3, 0.4); 5],
            degenerate: false,
        };
        let s = signal_from_prediction(&prediction, &[1.0; 30], &params);
        assert!(!s.is_stable);
        assert_eq!(s.regime, Bull);
        assert!((s.signal - 0.4 * 0.5).abs() < 1e-12);
    }
}
