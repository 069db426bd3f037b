// =============================================================================
// Signal Aggregator — regime-adaptive fusion of phase signals
// =============================================================================
//
// Final fusion point of the engine:
//
//   1. Pick the weight row of the prevailing regime (or the flat default).
//   2. composite  = Σ w·signal / Σ w      over phases present in both the
//      confidence = Σ w·conf   / Σ w      input and the row
//   3. Confirmation bonus: when enough input phases share the composite's
//      sign, confidence × bonus (capped at 1).
//   4. Regime-dependent thresholds turn (composite, confidence) into an
//      action; strong composites promote BUY / SELL to STRONG_*.
//
// An input with no overlap is an explicit `NoValidSignals` error, never a
// zero composite.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{FusionError, Result};
use crate::regime::detector::MarketRegime;
use crate::runtime_config::AggregatorParams;
use crate::signals::weights::WeightTable;
use crate::types::{sign, Action, PhaseOutcome, PhaseSignal};

/// The contribution of a single phase to the composite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalContribution {
    pub phase: String,
    pub weight: f64,
    pub signal: f64,
    pub confidence: f64,
    /// `weight * signal` before normalisation.
    pub contribution: f64,
}

/// Result of one aggregation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub composite_signal: f64,
    pub confidence: f64,
    pub action: Action,
    /// Input phases whose sign matches the composite's.
    pub agreement_count: usize,
    /// The weight row that was applied.
    pub weights_used: BTreeMap<String, f64>,
    /// Phases that actually carried weight.
    pub phases_used: Vec<String>,
    pub regime: MarketRegime,
    pub contributions: Vec<SignalContribution>,
}

/// Regime-adaptive aggregator.  Holds configuration only.
#[derive(Debug, Clone, Default)]
pub struct SignalAggregator {
    params: AggregatorParams,
}

impl SignalAggregator {
    pub fn new(params: AggregatorParams) -> Result<Self> {
        params.weights.validate()?;
        Ok(Self { params })
    }

    /// Aggregator over a custom table, other settings at their defaults.
    pub fn with_table(table: WeightTable) -> Result<Self> {
        Self::new(AggregatorParams {
            weights: table,
            ..AggregatorParams::default()
        })
    }

    pub fn params(&self) -> &AggregatorParams {
        &self.params
    }

    /// Fuse `signals` under `regime`.
    pub fn aggregate(
        &self,
        signals: &BTreeMap<String, PhaseSignal>,
        regime: MarketRegime,
    ) -> Result<AggregationResult> {
        let p = &self.params;

        let weights = if p.adaptive {
            p.weights
                .weights_for(regime)
                .cloned()
                .unwrap_or_else(|| p.default_weights.clone())
        } else {
            p.default_weights.clone()
        };

        let mut contributions = Vec::with_capacity(signals.len());
        let mut weighted_signal = 0.0;
        let mut weighted_confidence = 0.0;
        let mut total_weight = 0.0;

        for (phase, reading) in signals {
            let Some(&weight) = weights.get(phase) else {
                trace!(phase = %phase, "Phase has no weight in this regime; skipped");
                continue;
            };
            weighted_signal += weight * reading.signal();
            weighted_confidence += weight * reading.confidence();
            total_weight += weight;
            contributions.push(SignalContribution {
                phase: phase.clone(),
                weight,
                signal: reading.signal(),
                confidence: reading.confidence(),
                contribution: weight * reading.signal(),
            });
        }

        if total_weight <= 0.0 {
            debug!(regime = %regime, inputs = signals.len(), "No valid signals to aggregate");
            return Err(FusionError::NoValidSignals);
        }

        let composite = weighted_signal / total_weight;
        let mut confidence = weighted_confidence / total_weight;

        // --- Confirmation bonus -----------------------------------------------
        let composite_sign = sign(composite);
        let agreement_count = signals
            .values()
            .filter(|s| sign(s.signal()) == composite_sign)
            .count();
        if agreement_count >= p.confirmation_count {
            confidence = (confidence * p.confirmation_bonus).min(1.0);
        }

        // --- Action -------------------------------------------------------------
        let buy_threshold = if regime.is_bullish() {
            p.bullish_buy_threshold
        } else {
            p.buy_threshold
        };
        let sell_threshold = if regime.is_bearish() {
            p.bearish_sell_threshold
        } else {
            p.sell_threshold
        };

        let mut action = if composite > buy_threshold && confidence > p.min_action_confidence {
            Action::Buy
        } else if composite < sell_threshold && confidence > p.min_action_confidence {
            Action::Sell
        } else {
            Action::Hold
        };
        if composite.abs() > p.strong_signal && confidence > p.strong_confidence {
            action = action.strengthen();
        }

        debug!(
            regime = %regime,
            composite = format!("{:.4}", composite),
            confidence = format!("{:.2}", confidence),
            agreement = agreement_count,
            action = %action,
            "Signals aggregated"
        );

        Ok(AggregationResult {
            composite_signal: composite,
            confidence,
            action,
            agreement_count,
            weights_used: weights,
            phases_used: contributions.iter().map(|c| c.phase.clone()).collect(),
            regime,
            contributions,
        })
    }

    /// Fuse phase outcomes, dropping phases that could not be computed
    /// before weighting.
    pub fn aggregate_outcomes(
        &self,
        outcomes: &BTreeMap<String, PhaseOutcome>,
        regime: MarketRegime,
    ) -> Result<AggregationResult> {
        let signals: BTreeMap<String, PhaseSignal> = outcomes
            .iter()
            .filter_map(|(phase, outcome)| outcome.signal().map(|s| (phase.clone(), s)))
            .collect();
        self.aggregate(&signals, regime)
    }
}
