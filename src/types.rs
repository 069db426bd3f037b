// =============================================================================
// Shared types used across the fusion engine
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{FusionError, Result};

/// Phase name of the HMM regime detector.
pub const PHASE_FOUNDATION: &str = "foundation";
/// Phase name of the correlation-network phase.
pub const PHASE_NETWORK: &str = "network";
/// Phase name reserved for an external multivariate collaborator.
pub const PHASE_MULTIVARIATE: &str = "multivariate";
/// Phase name of the pattern phase.
pub const PHASE_PATTERN: &str = "pattern";

/// One directional reading produced by a phase.
///
/// [`PhaseSignal::new`] rejects non-finite values and clamps `signal` to
/// `[-1, 1]` and `confidence` to `[0, 1]`, logging a warning when it has to.
/// Deserialised input goes through [`PhaseSignal::checked`] and is rejected
/// when out of range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPhaseSignal")]
pub struct PhaseSignal {
    signal: f64,
    confidence: f64,
}

/// Unvalidated wire form of [`PhaseSignal`].
#[derive(Deserialize)]
struct RawPhaseSignal {
    signal: f64,
    #[serde(default = "default_confidence")]
    confidence: f64,
}

fn default_confidence() -> f64 {
    0.5
}

impl TryFrom<RawPhaseSignal> for PhaseSignal {
    type Error = FusionError;

    fn try_from(raw: RawPhaseSignal) -> Result<Self> {
        Self::checked(raw.signal, raw.confidence)
    }
}

impl PhaseSignal {
    pub fn new(signal: f64, confidence: f64) -> Result<Self> {
        if !signal.is_finite() || !confidence.is_finite() {
            return Err(FusionError::InvalidSignal(format!(
                "signal={signal}, confidence={confidence}"
            )));
        }
        let clamped = Self {
            signal: signal.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
        };
        if clamped.signal != signal || clamped.confidence != confidence {
            warn!(signal, confidence, "Phase signal out of range; clamped");
        }
        Ok(clamped)
    }

    /// Like [`PhaseSignal::new`] but out-of-range values are an error.
    pub fn checked(signal: f64, confidence: f64) -> Result<Self> {
        if !(-1.0..=1.0).contains(&signal) || !(0.0..=1.0).contains(&confidence) {
            return Err(FusionError::InvalidSignal(format!(
                "signal={signal} must be in [-1, 1] and confidence={confidence} in [0, 1]"
            )));
        }
        Self::new(signal, confidence)
    }

    /// Computed, neutral reading.
    pub fn neutral(confidence: f64) -> Self {
        Self {
            signal: 0.0,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn signal(&self) -> f64 {
        self.signal
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }
}

/// Whether a phase produced a reading or could not be computed at all.
///
/// "Not computable" is distinct from a computed neutral signal: the
/// aggregator excludes the former from weighting instead of averaging in a
/// zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseOutcome {
    Computed(PhaseSignal),
    NotComputable { reason: String },
}

impl PhaseOutcome {
    pub fn signal(&self) -> Option<PhaseSignal> {
        match self {
            Self::Computed(s) => Some(*s),
            Self::NotComputable { .. } => None,
        }
    }
}

/// Discrete trading action emitted by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Action {
    /// Promote a directional action to its strong variant.  `Hold` has no
    /// strong variant and is returned unchanged.
    pub fn strengthen(self) -> Self {
        match self {
            Self::Buy | Self::StrongBuy => Self::StrongBuy,
            Self::Sell | Self::StrongSell => Self::StrongSell,
            Self::Hold => Self::Hold,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StrongBuy => write!(f, "STRONG_BUY"),
            Self::Buy => write!(f, "BUY"),
            Self::Hold => write!(f, "HOLD"),
            Self::Sell => write!(f, "SELL"),
            Self::StrongSell => write!(f, "STRONG_SELL"),
        }
    }
}

/// Sign with an exact zero: `-1`, `0` or `1`.  Unlike `f64::signum`, `0.0`
/// maps to `0`.
pub fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}
