// =============================================================================
// Error types shared by every phase of the fusion engine
// =============================================================================
//
// Validation-class failures (short history, unknown asset, bad weights) are
// surfaced to the caller immediately.  Numerical degeneracy (zero variance,
// singular matrices) is never an error: each computation resolves it locally
// to a documented neutral value.

use thiserror::Error;

/// Errors returned by the public entry points of the library.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FusionError {
    /// History is shorter than a required window.
    #[error("insufficient history for {context}: need {required} observations, got {actual}")]
    InsufficientHistory {
        context: &'static str,
        required: usize,
        actual: usize,
    },

    /// Cross-sectional computation needs more assets than supplied.
    #[error("insufficient assets for {context}: need {required}, got {actual}")]
    InsufficientAssets {
        context: &'static str,
        required: usize,
        actual: usize,
    },

    /// Prediction requested before the regime model was fitted and
    /// auto-fitting is disabled.
    #[error("regime model has not been fitted")]
    ModelNotFitted,

    /// No supplied phase overlaps the weight table of the regime.
    #[error("No valid signals")]
    NoValidSignals,

    /// The requested asset is not a column of the market frame.
    #[error("asset {0} not found")]
    UnknownAsset(String),

    /// Malformed input data (non-positive prices, ragged matrix, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A weight table row does not sum to 1.
    #[error("weights for regime {regime} sum to {sum:.6}, expected 1.0")]
    InvalidWeights { regime: String, sum: f64 },

    /// A phase signal carried a non-finite value.
    #[error("invalid phase signal: {0}")]
    InvalidSignal(String),
}

impl FusionError {
    /// `true` for errors that mean "this phase could not be computed from
    /// the data supplied", as opposed to caller mistakes.
    pub fn is_not_computable(&self) -> bool {
        matches!(
            self,
            Self::InsufficientHistory { .. } | Self::InsufficientAssets { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, FusionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_valid_signals_message_is_stable() {
        assert_eq!(FusionError::NoValidSignals.to_string(), "No valid signals");
    }

    #[test]
    fn insufficient_data_is_not_computable() {
        let err = FusionError::InsufficientHistory {
            context: "density",
            required: 120,
            actual: 40,
        };
        assert!(err.is_not_computable());
        assert!(err.to_string().contains("need 120"));
        assert!(!FusionError::UnknownAsset("VCB".into()).is_not_computable());
    }
}
