// =============================================================================
// Pattern Module
// =============================================================================
//
// Single-asset pattern view of the target:
// - Anomaly detector (pair spreads, momentum, volatility, sector rotation)
// - Cross-sectional factor alpha behind the `AlphaModel` seam
// - Pattern phase signal (trend/vol regime + factor + anomaly, regime weighted)

pub mod anomaly;
pub mod factor;
pub mod signals;

pub use anomaly::{AnomalyDetector, AnomalySignal, PairAction, PairAnomaly};
pub use factor::{AlphaModel, CrossSectionalFactorModel, FactorSignal};
pub use signals::{OpportunityScan, PatternPhase, PatternSignal};
