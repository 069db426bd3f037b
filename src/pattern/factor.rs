// =============================================================================
// Factor Alpha — cross-sectional factor exposure of one asset
// =============================================================================
//
// The pattern phase consumes factor alpha through the `AlphaModel` trait so a
// different model can be plugged in.  The bundled model scores five factors,
// each z-scored across the universe and signed so that a positive value is
// bullish:
//
//   Factor        Raw value                                   Sign
//   ──────────    ──────────────────────────────────────────  ────
//   momentum      Σ returns over momentum_lookback            +
//   reversal      Σ returns over reversal_lookback            −
//   volatility    sample σ over volatility_lookback           −
//   beta          cov(r, market) / var(market) over beta_lb   −
//   idio drift    mean(r − β·market) over beta_lookback       +
//
// signal     = tanh(mean signed exposure)
// confidence = 0.3 + 0.5 · (share of factors agreeing with the signal)

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FusionError, Result};
use crate::indicators::stats::{covariance, cross_sectional_z, mean, std_sample, EPS};
use crate::market_data::ReturnsMatrix;
use crate::runtime_config::FactorParams;
use crate::types::sign;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorSignal {
    pub signal: f64,
    pub confidence: f64,
    /// Signed cross-sectional z-score of the target per factor.
    pub exposures: BTreeMap<String, f64>,
    /// Share of factors whose exposure has the sign of the signal.
    pub agreement: f64,
}

/// Source of a cross-sectional alpha reading for one asset.
pub trait AlphaModel: Send + Sync {
    fn name(&self) -> &str;

    fn alpha_signal(&self, returns: &ReturnsMatrix, target: &str) -> Result<FactorSignal>;
}

#[derive(Debug, Clone, Default)]
pub struct CrossSectionalFactorModel {
    params: FactorParams,
}

impl CrossSectionalFactorModel {
    pub fn new(params: FactorParams) -> Self {
        Self { params }
    }

    /// Raw factor values per asset, one row per factor in the order of
    /// `FACTORS`.
    fn raw_factors(&self, returns: &ReturnsMatrix) -> Vec<Vec<f64>> {
        let p = &self.params;
        let n = returns.len();
        let tail = |column: &[f64], lookback: usize| -> Vec<f64> {
            column[n.saturating_sub(lookback)..].to_vec()
        };

        let market = returns.market_returns();
        let market_beta = tail(&market, p.beta_lookback);
        let market_var = std_sample(&market_beta).powi(2);

        let mut factors = vec![Vec::with_capacity(returns.n_assets()); FACTORS.len()];
        for j in 0..returns.n_assets() {
            let column = returns.column(j);
            let beta_window = tail(&column, p.beta_lookback);
            let beta = if market_var > EPS {
                covariance(&beta_window, &market_beta) / market_var
            } else {
                0.0
            };
            let residual: Vec<f64> = beta_window
                .iter()
                .zip(&market_beta)
                .map(|(r, m)| r - beta * m)
                .collect();

            factors[0].push(tail(&column, p.momentum_lookback).iter().sum());
            factors[1].push(tail(&column, p.reversal_lookback).iter().sum());
            factors[2].push(std_sample(&tail(&column, p.volatility_lookback)));
            factors[3].push(beta);
            factors[4].push(mean(&residual));
        }
        factors
    }
}

/// Factor names with the sign that makes a positive exposure bullish.
const FACTORS: [(&str, f64); 5] = [
    ("momentum", 1.0),
    ("reversal", -1.0),
    ("volatility", -1.0),
    ("beta", -1.0),
    ("idiosyncratic", 1.0),
];

impl AlphaModel for CrossSectionalFactorModel {
    fn name(&self) -> &str {
        "cross_sectional"
    }

    fn alpha_signal(&self, returns: &ReturnsMatrix, target: &str) -> Result<FactorSignal> {
        let t = returns.index_of(target)?;
        if returns.n_assets() < self.params.min_assets {
            return Err(FusionError::InsufficientAssets {
                context: "factor model",
                required: self.params.min_assets,
                actual: returns.n_assets(),
            });
        }
        if returns.len() < 2 {
            return Err(FusionError::InsufficientHistory {
                context: "factor model",
                required: 2,
                actual: returns.len(),
            });
        }

        let raw = self.raw_factors(returns);
        let mut exposures = BTreeMap::new();
        for ((name, direction), values) in FACTORS.iter().zip(&raw) {
            let z = cross_sectional_z(values);
            exposures.insert(name.to_string(), direction * z[t]);
        }

        let avg = exposures.values().sum::<f64>() / exposures.len() as f64;
        let signal = avg.tanh();
        let direction = sign(signal);
        let agreement = if direction == 0 {
            0.0
        } else {
            exposures.values().filter(|&&e| sign(e) == direction).count() as f64
                / exposures.len() as f64
        };
        let confidence = 0.3 + 0.5 * agreement;

        debug!(
            target = %target,
            model = self.name(),
            signal = format!("{:.4}", signal),
            agreement = format!("{:.2}", agreement),
            "Factor alpha"
        );

        Ok(FactorSignal {
            signal,
            confidence,
            exposures,
            agreement,
        })
    }
}
