// =============================================================================
// Regime Weight Table — per-regime phase weights for the aggregator
// =============================================================================

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{FusionError, Result};
use crate::regime::detector::MarketRegime;
use crate::types::{PHASE_FOUNDATION, PHASE_MULTIVARIATE, PHASE_NETWORK, PHASE_PATTERN};

/// Allowed deviation of a weight row from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Mapping `regime → {phase name → weight}`.
///
/// Ordered maps keep iteration (and therefore floating-point summation)
/// deterministic.  Lookups for a regime without its own row fall back to the
/// `UNKNOWN` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightTable {
    rows: BTreeMap<MarketRegime, BTreeMap<String, f64>>,
}

fn row(foundation: f64, network: f64, multivariate: f64, pattern: f64) -> BTreeMap<String, f64> {
    BTreeMap::from([
        (PHASE_FOUNDATION.to_string(), foundation),
        (PHASE_NETWORK.to_string(), network),
        (PHASE_MULTIVARIATE.to_string(), multivariate),
        (PHASE_PATTERN.to_string(), pattern),
    ])
}

impl Default for WeightTable {
    fn default() -> Self {
        Self {
            rows: BTreeMap::from([
                (MarketRegime::BullLowVol, row(0.20, 0.30, 0.10, 0.40)),
                (MarketRegime::BullHighVol, row(0.25, 0.25, 0.15, 0.35)),
                (MarketRegime::BearHighVol, row(0.35, 0.15, 0.20, 0.30)),
                (MarketRegime::BearLowVol, row(0.30, 0.20, 0.20, 0.30)),
                (MarketRegime::Sideways, row(0.30, 0.20, 0.15, 0.35)),
                (MarketRegime::Unknown, row(0.25, 0.25, 0.15, 0.35)),
            ]),
        }
    }
}

impl WeightTable {
    /// Build and validate a table.
    pub fn new(rows: BTreeMap<MarketRegime, BTreeMap<String, f64>>) -> Result<Self> {
        let table = Self { rows };
        table.validate()?;
        Ok(table)
    }

    /// Regime-independent weights used when adaptive weighting is off.
    pub fn default_flat() -> BTreeMap<String, f64> {
        row(0.25, 0.25, 0.15, 0.35)
    }

    /// Weights for `regime`, falling back to the `UNKNOWN` row.  `None` only
    /// when neither row exists.
    pub fn weights_for(&self, regime: MarketRegime) -> Option<&BTreeMap<String, f64>> {
        self.rows
            .get(&regime)
            .or_else(|| self.rows.get(&MarketRegime::Unknown))
    }

    pub fn regimes(&self) -> impl Iterator<Item = &MarketRegime> {
        self.rows.keys()
    }

    /// Every row must be non-negative and sum to 1 within
    /// [`WEIGHT_TOLERANCE`].
    pub fn validate(&self) -> Result<()> {
        for (regime, weights) in &self.rows {
            let sum: f64 = weights.values().sum();
            let negative = weights.values().any(|w| *w < 0.0 || !w.is_finite());
            if negative || (sum - 1.0).abs() > WEIGHT_TOLERANCE {
                return Err(FusionError::InvalidWeights {
                    regime: regime.to_string(),
                    sum,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rows_sum_to_one() {
        let table = WeightTable::default();
        table.validate().unwrap();
        for regime in MarketRegime::ALL {
            let sum: f64 = table.weights_for(regime).unwrap().values().sum();
            assert!((sum - 1.0).abs() < WEIGHT_TOLERANCE, "{regime}: {sum}");
        }
        let flat: f64 = WeightTable::default_flat().values().sum();
        assert!((flat - 1.0).abs() < WEIGHT_TOLERANCE);
    }

    #[test]
    fn missing_regime_falls_back_to_unknown() {
        let table = WeightTable::new(BTreeMap::from([(
            MarketRegime::Unknown,
            BTreeMap::from([("foundation".to_string(), 1.0)]),
        )]))
        .unwrap();
        let w = table.weights_for(MarketRegime::BullLowVol).unwrap();
        assert_eq!(w.len(), 1);
        assert_eq!(w["foundation"], 1.0);
    }

    #[test]
    fn bad_sum_is_rejected() {
        let err = WeightTable::new(BTreeMap::from([(
            MarketRegime::Sideways,
            BTreeMap::from([("a".to_string(), 0.5), ("b".to_string(), 0.4)]),
        )]))
        .unwrap_err();
        assert!(matches!(err, FusionError::InvalidWeights { ref regime, .. } if regime == "SIDEWAYS"));
    }

    #[test]
    fn serializes_as_plain_map() {
        let json = serde_json::to_value(WeightTable::default()).unwrap();
        assert!((json["BEAR_HIGH_VOL"]["foundation"].as_f64().unwrap() - 0.35).abs() < 1e-12);
    }
}
