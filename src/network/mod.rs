// =============================================================================
// Network Module
// =============================================================================
//
// Cross-asset structure of the universe:
// - Thresholded Pearson / partial correlation graph
// - Density, centrality, clustering and component metrics
// - Lead-lag detection of assets that move before the target
// - Network phase signal (density regime + lead-lag, regime weighted)

pub mod graph;
pub mod lead_lag;
pub mod metrics;
pub mod signals;

pub use graph::{CorrelationMethod, CorrelationNetwork, Edge};
pub use lead_lag::{LeadLagDetector, LeadLagRelation, LeadLagSignal};
pub use metrics::{Leader, NetworkMetrics, NetworkStats, NodeCentrality};
pub use signals::{
    DensityRegime, DensitySignal, NetworkComponents, NetworkPhase, NetworkSignal, RegimeShift,
    ShiftConsensus, ShiftDetail,
};
