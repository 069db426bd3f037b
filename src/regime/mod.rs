// =============================================================================
// Regime Detection Module
// =============================================================================
//
// Two independent regime views:
// - HMM regime (BEAR / SIDEWAYS / BULL) over return + volatility features,
//   temporally smoothed, with an explicit cache of fitted models
// - Trend × volatility market regime (BULL/BEAR × LOW/HIGH VOL, SIDEWAYS)
//   that keys the adaptive weight tables

pub mod cache;
pub mod detector;
pub mod hmm;
pub mod hmm_detector;
pub mod label;

pub use cache::{ModelCache, ModelKey};
pub use detector::{MarketRegime, RegimeState, TrendBucket, TrendVolClassifier};
pub use hmm::{GaussianHmm, HmmConfig};
pub use hmm_detector::{
    HmmRegimeDetector, LabelStats, RegimePrediction, RegimeProbabilities, RegimeSignal,
    RegimeTransition, SmoothedRegime, SmoothingInfo,
};
pub use label::RegimeLabel;
