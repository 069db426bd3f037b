// =============================================================================
// Signal Fusion — multi-phase trading signal engine
// =============================================================================
//
// Converts independent statistical readings about one asset into a single
// trading decision:
//
//   MarketFrame ─┬─▶ regime   (HMM BEAR / SIDEWAYS / BULL, smoothed)  ─┐
//                ├─▶ network  (correlation density + lead-lag)         ├─▶ signals ─▶ FusionDecision
//                └─▶ pattern  (trend/vol regime + factor + anomalies) ─┘
//
// `engine::FusionEngine` wires the phases together; each phase is also
// usable on its own.
// =============================================================================

pub mod decision_envelope;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod market_data;
pub mod network;
pub mod pattern;
pub mod regime;
pub mod runtime_config;
pub mod signals;
pub mod types;

pub use decision_envelope::FusionDecision;
pub use engine::FusionEngine;
pub use error::{FusionError, Result};
pub use market_data::{MarketFrame, ReturnsMatrix};
pub use runtime_config::FusionConfig;
pub use types::{Action, PhaseOutcome, PhaseSignal};
