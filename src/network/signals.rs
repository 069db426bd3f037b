// =============================================================================
// Network Phase — systemic density regime + lead-lag, regime weighted
// =============================================================================
//
// Two components:
//
//   density   Graph density over the latest `window` periods vs the window
//             before it.  Rising co-movement is read as risk-off:
//               Δ >  cutoff  → RISK_OFF  (signal -0.5)
//               Δ < -cutoff  → RISK_ON   (signal +0.3)
//               otherwise    → NORMAL    (signal  0)
//             confidence = min(scale · |Δ|, 1)
//   lead-lag  see `lead_lag.rs`
//
// The composite weights both by the trend bucket of the market regime.  A
// component that cannot be computed (density needs 2 × window periods) is
// dropped and the remaining weight renormalised.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{FusionError, Result};
use crate::market_data::ReturnsMatrix;
use crate::network::graph::CorrelationNetwork;
use crate::network::lead_lag::{LeadLagDetector, LeadLagSignal};
use crate::network::metrics::{Leader, NetworkMetrics, NetworkStats, NodeCentrality};
use crate::regime::detector::{MarketRegime, TrendBucket};
use crate::runtime_config::{LeadLagParams, NetworkParams, NetworkWeights};
use crate::types::PhaseSignal;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DensityRegime {
    RiskOff,
    RiskOn,
    Normal,
}

impl std::fmt::Display for DensityRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RiskOff => write!(f, "RISK_OFF"),
            Self::RiskOn => write!(f, "RISK_ON"),
            Self::Normal => write!(f, "NORMAL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensitySignal {
    pub regime: DensityRegime,
    pub signal: f64,
    pub confidence: f64,
    pub window: usize,
    pub density_current: f64,
    pub density_previous: f64,
    pub density_change: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftConsensus {
    RiskOff,
    RiskOn,
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftDetail {
    pub window: usize,
    pub regime: DensityRegime,
    pub density_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeShift {
    pub consensus: ShiftConsensus,
    /// One entry per window with enough history.
    pub details: Vec<ShiftDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkComponents {
    pub density: Option<DensitySignal>,
    pub lead_lag: Option<LeadLagSignal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSignal {
    pub signal: f64,
    pub confidence: f64,
    pub bucket: TrendBucket,
    pub weights_used: NetworkWeights,
    pub components: NetworkComponents,
    /// Density regime agreement across `shift_windows`.
    pub regime_shift: RegimeShift,
    pub network_stats: NetworkStats,
    pub leaders: Vec<Leader>,
    pub target_centrality: NodeCentrality,
    pub clusters: Vec<Vec<String>>,
}

impl NetworkSignal {
    pub fn phase_signal(&self) -> Result<PhaseSignal> {
        PhaseSignal::new(self.signal, self.confidence)
    }
}

// =============================================================================
// NetworkPhase
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct NetworkPhase {
    params: NetworkParams,
    lead_lag: LeadLagDetector,
}

impl NetworkPhase {
    pub fn new(params: NetworkParams, lead_lag: LeadLagParams) -> Self {
        Self {
            params,
            lead_lag: LeadLagDetector::new(lead_lag),
        }
    }

    fn density_of(&self, returns: &ReturnsMatrix, start: usize, end: usize) -> f64 {
        let net = CorrelationNetwork::build(
            returns.rows(start, end),
            returns.assets(),
            self.params.threshold,
            self.params.density_method,
            self.params.partial_ridge,
        );
        NetworkMetrics::new(&net).density()
    }

    /// Density change between the latest `window` periods and the window
    /// before them.
    pub fn density_regime_signal(&self, returns: &ReturnsMatrix, window: usize) -> Result<DensitySignal> {
        let p = &self.params;
        let n = returns.len();
        let required = 2 * window;
        if window == 0 || n < required {
            return Err(FusionError::InsufficientHistory {
                context: "network density",
                required,
                actual: n,
            });
        }

        let density_current = self.density_of(returns, n - window, n);
        let density_previous = self.density_of(returns, n - 2 * window, n - window);
        let density_change = density_current - density_previous;

        let (regime, signal) = if density_change > p.density_change_cutoff {
            (DensityRegime::RiskOff, p.risk_off_signal)
        } else if density_change < -p.density_change_cutoff {
            (DensityRegime::RiskOn, p.risk_on_signal)
        } else {
            (DensityRegime::Normal, 0.0)
        };

        Ok(DensitySignal {
            regime,
            signal,
            confidence: (p.density_confidence_scale * density_change.abs()).min(1.0),
            window,
            density_current,
            density_previous,
            density_change,
        })
    }

    /// Density regime at several window sizes; RISK_OFF / RISK_ON only if
    /// enough windows agree.
    pub fn detect_regime_shift(&self, returns: &ReturnsMatrix, windows: &[usize]) -> RegimeShift {
        let details: Vec<ShiftDetail> = windows
            .iter()
            .filter_map(|&w| self.density_regime_signal(returns, w).ok())
            .map(|d| ShiftDetail {
                window: d.window,
                regime: d.regime,
                density_change: d.density_change,
            })
            .collect();

        let count = |r: DensityRegime| details.iter().filter(|d| d.regime == r).count();
        let needed = self.params.shift_consensus;
        let consensus = if count(DensityRegime::RiskOff) >= needed {
            ShiftConsensus::RiskOff
        } else if count(DensityRegime::RiskOn) >= needed {
            ShiftConsensus::RiskOn
        } else {
            ShiftConsensus::Mixed
        };

        RegimeShift { consensus, details }
    }

    /// Network signal for `target` under `regime`.
    pub fn generate(
        &self,
        returns: &ReturnsMatrix,
        target: &str,
        regime: MarketRegime,
    ) -> Result<NetworkSignal> {
        let p = &self.params;
        let t = returns.index_of(target)?;
        if returns.n_assets() < 2 {
            return Err(FusionError::InsufficientAssets {
                context: "network phase",
                required: 2,
                actual: returns.n_assets(),
            });
        }

        let net = CorrelationNetwork::build(
            returns.view(),
            returns.assets(),
            p.threshold,
            p.method,
            p.partial_ridge,
        );
        let metrics = NetworkMetrics::new(&net);

        let density = not_computable_to_none(self.density_regime_signal(returns, p.density_window))?;
        let lead_lag_result = self.lead_lag.generate_lag_signals(returns, target);
        let lag_error = lead_lag_result.as_ref().err().cloned();
        let lead_lag = not_computable_to_none(lead_lag_result)?;

        let bucket = regime.trend_bucket();
        let weights = p
            .weights
            .get(&bucket)
            .or_else(|| p.weights.get(&TrendBucket::Unknown))
            .copied()
            .unwrap_or(NetworkWeights {
                regime: 0.30,
                lead_lag: 0.70,
            });

        let mut parts: Vec<(f64, f64, f64)> = Vec::with_capacity(2);
        if let Some(d) = &density {
            parts.push((weights.regime, d.signal, d.confidence));
        }
        if let Some(l) = &lead_lag {
            parts.push((weights.lead_lag, l.signal, l.confidence));
        }
        let total: f64 = parts.iter().map(|(w, _, _)| w).sum();
        if parts.is_empty() || total <= 0.0 {
            return Err(lag_error.unwrap_or(FusionError::InsufficientHistory {
                context: "network phase",
                required: 2 * p.density_window,
                actual: returns.len(),
            }));
        }
        if parts.len() < 2 {
            warn!(
                target = %target,
                density = density.is_some(),
                lead_lag = lead_lag.is_some(),
                "Network component not computable; renormalising weights"
            );
        }
        let signal = parts.iter().map(|(w, s, _)| w * s).sum::<f64>() / total;
        let confidence = parts.iter().map(|(w, _, c)| w * c).sum::<f64>() / total;

        let all = metrics.all_centralities();
        let target_centrality = all
            .get(&returns.assets()[t])
            .copied()
            .unwrap_or_default();

        debug!(
            target = %target,
            bucket = %bucket,
            signal = format!("{:.4}", signal),
            confidence = format!("{:.2}", confidence),
            density = format!("{:.3}", metrics.density()),
            "Network signal"
        );

        Ok(NetworkSignal {
            signal,
            confidence,
            bucket,
            weights_used: weights,
            components: NetworkComponents { density, lead_lag },
            regime_shift: self.detect_regime_shift(returns, &p.shift_windows),
            network_stats: metrics.get_network_stats(),
            leaders: metrics.find_leaders(p.top_leaders),
            target_centrality,
            clusters: metrics.find_clusters(),
        })
    }
}

/// `Ok(None)` for not-computable errors, other errors propagate.
fn not_computable_to_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_computable() => Ok(None),
        Err(e) => Err(e),
    }
}
