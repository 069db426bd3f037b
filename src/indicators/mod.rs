// =============================================================================
// Numerical Toolkit
// =============================================================================
//
// Pure, side-effect-free statistics shared by every phase.  Functions that
// can hit a degenerate input (zero variance, singular matrix) either return
// `Option<T>` or resolve to a documented neutral value, so callers never see
// a division fault.

pub mod bollinger;
pub mod correlation;
pub mod stats;

pub use bollinger::{calculate_bollinger, mean_reversion_score, BollingerResult};
pub use correlation::{
    correlation_matrix, invert, lagged_correlation, partial_correlation_matrix, pearson,
    spd_inverse,
};
