// =============================================================================
// Signals Module
// =============================================================================
//
// Top-level fusion of phase signals:
// - Regime weight tables (validated, deterministic ordering)
// - Regime-adaptive aggregation with confirmation bonus and action thresholds

pub mod aggregator;
pub mod weights;

pub use aggregator::{AggregationResult, SignalAggregator, SignalContribution};
pub use weights::{WeightTable, WEIGHT_TOLERANCE};
