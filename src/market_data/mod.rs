// =============================================================================
// Market Data Module
// =============================================================================
//
// Immutable, validated price and return matrices supplied by the upstream
// data pipeline.

pub mod frame;

pub use frame::{MarketFrame, ReturnsMatrix};
