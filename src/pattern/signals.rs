// =============================================================================
// Pattern Phase — regime classifier + factor alpha + anomalies
// =============================================================================
//
// Three analyzers, blended under weights keyed by the four-state market
// regime of the target:
//
//   composite = Σ w_k · s_k / Σ w_k    over the components that computed
//
// then the regime overrides:
//
//   BEAR_HIGH_VOL   composite = min(composite, bear_cap)        (-0.2)
//   BULL_LOW_VOL    composite = max(composite, bull_floor)      (+0.2)
//   SIDEWAYS        |composite| < 0.3  →  composite × 1.5
//
// Confidence is the same weighted blend of component confidences.  The
// anomaly detector always computes; the regime classifier and factor model
// may be not computable, in which case their weight is redistributed.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FusionError, Result};
use crate::market_data::{MarketFrame, ReturnsMatrix};
use crate::pattern::anomaly::{AnomalyDetector, AnomalySignal};
use crate::pattern::factor::{AlphaModel, CrossSectionalFactorModel, FactorSignal};
use crate::regime::detector::{MarketRegime, RegimeState, TrendVolClassifier};
use crate::runtime_config::{AnomalyParams, FactorParams, PatternParams, PatternWeights, TrendVolParams};
use crate::types::{Action, PhaseSignal};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternComponents {
    pub regime: Option<RegimeState>,
    pub factor: Option<FactorSignal>,
    pub anomaly: AnomalySignal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternSignal {
    pub signal: f64,
    pub confidence: f64,
    pub regime: MarketRegime,
    /// Action suggested by the regime classifier alone.
    pub regime_action: Option<Action>,
    /// Weights actually applied after redistribution.
    pub weights_used: PatternWeights,
    pub components: PatternComponents,
}

impl PatternSignal {
    pub fn phase_signal(&self) -> Result<PhaseSignal> {
        PhaseSignal::new(self.signal, self.confidence)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub asset: String,
    pub signal: f64,
    pub confidence: f64,
    pub regime: MarketRegime,
}

impl Opportunity {
    fn strength(&self) -> f64 {
        (self.signal * self.confidence).abs()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpportunityScan {
    pub buy_candidates: Vec<Opportunity>,
    pub sell_candidates: Vec<Opportunity>,
    /// Every asset that produced a signal, strongest first.
    pub ranked: Vec<Opportunity>,
}

// =============================================================================
// PatternPhase
// =============================================================================

#[derive(Clone)]
pub struct PatternPhase {
    params: PatternParams,
    classifier: TrendVolClassifier,
    factor: Arc<dyn AlphaModel>,
    anomaly: AnomalyDetector,
}

impl Default for PatternPhase {
    fn default() -> Self {
        Self::new(
            PatternParams::default(),
            TrendVolParams::default(),
            FactorParams::default(),
            AnomalyParams::default(),
        )
    }
}

impl std::fmt::Debug for PatternPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternPhase")
            .field("params", &self.params)
            .field("classifier", &self.classifier)
            .field("factor", &self.factor.name())
            .field("anomaly", &self.anomaly)
            .finish()
    }
}

impl PatternPhase {
    /// The anomaly detector runs with the phase's own z threshold.
    pub fn new(
        params: PatternParams,
        trend_vol: TrendVolParams,
        factor: FactorParams,
        anomaly: AnomalyParams,
    ) -> Self {
        let anomaly = AnomalyDetector::new(anomaly).with_z_threshold(params.anomaly_z_threshold);
        Self {
            params,
            classifier: TrendVolClassifier::new(trend_vol),
            factor: Arc::new(CrossSectionalFactorModel::new(factor)),
            anomaly,
        }
    }

    /// Replace the factor model.
    pub fn with_alpha_model(mut self, model: Arc<dyn AlphaModel>) -> Self {
        self.factor = model;
        self
    }

    pub fn params(&self) -> &PatternParams {
        &self.params
    }

    fn weights_for(&self, regime: MarketRegime) -> PatternWeights {
        self.params
            .weights
            .get(&regime)
            .or_else(|| self.params.weights.get(&MarketRegime::Unknown))
            .copied()
            .unwrap_or(PatternWeights {
                regime: 1.0 / 3.0,
                factor: 1.0 / 3.0,
                anomaly: 1.0 / 3.0,
            })
    }

    /// Pattern signal for `target`.  Fails only for caller errors (unknown
    /// asset); short history degrades individual components.
    pub fn generate(&self, frame: &MarketFrame, returns: &ReturnsMatrix, target: &str) -> Result<PatternSignal> {
        let prices = frame.prices_of(target)?;

        let regime_state = optional(self.classifier.classify(&prices), "regime classifier", target)?;
        let factor = optional(self.factor.alpha_signal(returns, target), "factor model", target)?;
        let anomaly = self.anomaly.get_anomaly_signal(frame, returns, target)?;

        let regime = regime_state
            .as_ref()
            .map(|s| s.regime)
            .unwrap_or(MarketRegime::Unknown);
        let base = self.weights_for(regime);

        let w_regime = if regime_state.is_some() { base.regime } else { 0.0 };
        let w_factor = if factor.is_some() { base.factor } else { 0.0 };
        let w_anomaly = base.anomaly;
        let total = w_regime + w_factor + w_anomaly;
        if total <= 0.0 {
            return Err(FusionError::InvalidWeights {
                regime: regime.to_string(),
                sum: total,
            });
        }
        let weights_used = PatternWeights {
            regime: w_regime / total,
            factor: w_factor / total,
            anomaly: w_anomaly / total,
        };

        let mut composite = weights_used.anomaly * anomaly.signal;
        let mut confidence = weights_used.anomaly * anomaly.confidence;
        if let Some(s) = &regime_state {
            composite += weights_used.regime * s.signal;
            confidence += weights_used.regime * s.confidence;
        }
        if let Some(f) = &factor {
            composite += weights_used.factor * f.signal;
            confidence += weights_used.factor * f.confidence;
        }

        let composite = regime_override(&self.params, regime, composite).clamp(-1.0, 1.0);
        let confidence = confidence.clamp(0.0, 1.0);

        debug!(
            target = %target,
            regime = %regime,
            signal = format!("{:.4}", composite),
            confidence = format!("{:.2}", confidence),
            "Pattern signal"
        );

        Ok(PatternSignal {
            signal: composite,
            confidence,
            regime,
            regime_action: regime_state.as_ref().map(|s| s.action),
            weights_used,
            components: PatternComponents {
                regime: regime_state,
                factor,
                anomaly,
            },
        })
    }

    /// Rank every asset of the frame by |signal × confidence|.
    pub fn scan_opportunities(&self, frame: &MarketFrame) -> OpportunityScan {
        let returns = frame.returns();
        let mut ranked: Vec<Opportunity> = frame
            .assets()
            .iter()
            .filter_map(|asset| match self.generate(frame, &returns, asset) {
                Ok(s) => Some(Opportunity {
                    asset: asset.clone(),
                    signal: s.signal,
                    confidence: s.confidence,
                    regime: s.regime,
                }),
                Err(e) => {
                    debug!(asset = %asset, error = %e, "Opportunity scan skipped asset");
                    None
                }
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.strength()
                .partial_cmp(&a.strength())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.asset.cmp(&b.asset))
        });

        let threshold = self.params.opportunity_threshold;
        let top = self.params.opportunity_top;
        OpportunityScan {
            buy_candidates: ranked
                .iter()
                .filter(|o| o.signal > threshold)
                .take(top)
                .cloned()
                .collect(),
            sell_candidates: ranked
                .iter()
                .filter(|o| o.signal < -threshold)
                .take(top)
                .cloned()
                .collect(),
            ranked,
        }
    }
}

/// Regime-specific clamp or amplification of the blended composite.
fn regime_override(p: &PatternParams, regime: MarketRegime, composite: f64) -> f64 {
    match regime {
        MarketRegime::BearHighVol => composite.min(p.bear_cap),
        MarketRegime::BullLowVol => composite.max(p.bull_floor),
        MarketRegime::Sideways if composite.abs() < p.sideways_weak => composite * p.sideways_amplify,
        _ => composite,
    }
}

/// Not-computable components become `None`; other errors propagate.
fn optional<T>(result: Result<T>, component: &str, target: &str) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_computable() => {
            warn!(target = %target, component, error = %e, "Pattern component not computable");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Six assets; `drift[j]` is the per-period growth of asset j, plus a
    /// small oscillation so volatility is never zero.
    fn frame(n: usize, drift: &[f64]) -> MarketFrame {
        let columns = drift
            .iter()
            .enumerate()
            .map(|(j, d)| {
                let prices: Vec<f64> = (0..n)
                    .map(|t| {
                        let t = t as f64;
                        100.0 * (1.0 + d).powf(t) * (1.0 + 0.002 * (t * (0.9 + 0.4 * j as f64)).sin())
                    })
                    .collect();
                (format!("S{j}"), prices)
            })
            .collect();
        MarketFrame::from_columns(columns).unwrap()
    }

    #[test]
    fn uptrend_is_bullish_and_bounded() {
        let f = frame(200, &[0.004, 0.0, 0.0, -0.001, 0.001, 0.0]);
        let phase = PatternPhase::default();
        let s = phase.generate(&f, &f.returns(), "S0").unwrap();
        assert!(s.regime.is_bullish(), "regime {}", s.regime);
        assert!(s.signal > 0.0);
        assert!(s.signal.abs() <= 1.0);
        assert!((0.0..=1.0).contains(&s.confidence));
        let w = s.weights_used;
        assert!((w.regime + w.factor + w.anomaly - 1.0).abs() < 1e-12);
    }

    #[test]
    fn downtrend_is_bearish() {
        let f = frame(200, &[-0.004, 0.0, 0.001, 0.0, 0.0, 0.0]);
        let s = PatternPhase::default().generate(&f, &f.returns(), "S0").unwrap();
        assert!(s.regime.is_bearish(), "regime {}", s.regime);
        assert!(s.signal < 0.0);
    }

    #[test]
    fn volatile_bear_caps_composite() {
        let p = PatternParams::default();
        assert_eq!(regime_override(&p, MarketRegime::BearHighVol, 0.5), -0.2);
        assert_eq!(regime_override(&p, MarketRegime::BearHighVol, -0.1), -0.2);
        assert_eq!(regime_override(&p, MarketRegime::BearHighVol, -0.6), -0.6);
    }

    #[test]
    fn quiet_bull_floors_composite() {
        let p = PatternParams::default();
        assert_eq!(regime_override(&p, MarketRegime::BullLowVol, -0.4), 0.2);
        assert_eq!(regime_override(&p, MarketRegime::BullLowVol, 0.05), 0.2);
        assert_eq!(regime_override(&p, MarketRegime::BullLowVol, 0.7), 0.7);
    }

    #[test]
    fn sideways_amplifies_only_weak_composites() {
        let p = PatternParams::default();
        assert!((regime_override(&p, MarketRegime::Sideways, 0.2) - 0.3).abs() < 1e-12);
        assert!((regime_override(&p, MarketRegime::Sideways, -0.1) + 0.15).abs() < 1e-12);
        assert_eq!(regime_override(&p, MarketRegime::Sideways, 0.3), 0.3);
        assert_eq!(regime_override(&p, MarketRegime::Sideways, -0.45), -0.45);
    }

    #[test]
    fn other_regimes_pass_through() {
        let p = PatternParams::default();
        for regime in [MarketRegime::BullHighVol, MarketRegime::BearLowVol, MarketRegime::Unknown] {
            assert_eq!(regime_override(&p, regime, 0.1), 0.1);
            assert_eq!(regime_override(&p, regime, -0.1), -0.1);
        }
    }

    #[test]
    fn short_history_drops_regime_component() {
        // 30 prices: classifier needs 61, factor and anomaly still run.
        let f = frame(30, &[0.002, 0.0, -0.001, 0.0, 0.001, 0.0]);
        let s = PatternPhase::default().generate(&f, &f.returns(), "S0").unwrap();
        assert!(s.components.regime.is_none());
        assert_eq!(s.regime, MarketRegime::Unknown);
        assert_eq!(s.weights_used.regime, 0.0);
        assert!(s.components.factor.is_some());
        assert!((s.weights_used.factor + s.weights_used.anomaly - 1.0).abs() < 1e-12);
    }

    #[test]
    fn unknown_asset_propagates() {
        let f = frame(80, &[0.0, 0.0, 0.0]);
        assert_eq!(
            PatternPhase::default().generate(&f, &f.returns(), "NOPE").unwrap_err(),
            FusionError::UnknownAsset("NOPE".into())
        );
    }

    #[test]
    fn opportunity_scan_ranks_and_splits() {
        let f = frame(200, &[0.005, -0.005, 0.0, 0.0, 0.0, 0.0]);
        let scan = PatternPhase::default().scan_opportunities(&f);
        assert_eq!(scan.ranked.len(), 6);
        for pair in scan.ranked.windows(2) {
            assert!(pair[0].strength() >= pair[1].strength());
        }
        assert!(scan.buy_candidates.iter().all(|o| o.signal > 0.3));
        assert!(scan.sell_candidates.iter().all(|o| o.signal < -0.3));
        assert!(scan.buy_candidates.len() <= 5 && scan.sell_candidates.len() <= 5);
        let of = |a: &str| scan.ranked.iter().find(|o| o.asset == a).map(|o| o.signal);
        assert!(of("S0").unwrap() > 0.0);
        assert!(of("S1").unwrap() < 0.0);
    }
}
