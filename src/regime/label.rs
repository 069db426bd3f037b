// =============================================================================
// Three-state regime label (HMM output)
// =============================================================================

use serde::{Deserialize, Serialize};

/// Latent HMM regime, ordered by expected mean return: `Bear < Sideways <
/// Bull`.  The discriminant is the index of the state after the fitted
/// states are sorted by ascending mean return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegimeLabel {
    Bear = 0,
    Sideways = 1,
    Bull = 2,
}

impl RegimeLabel {
    pub const ALL: [RegimeLabel; 3] = [Self::Bear, Self::Sideways, Self::Bull];

    /// Label for a state index in mean-return order.  Indices beyond the
    /// last state map to `Bull` (most bullish).
    pub fn from_index(index: usize) -> Self {
        match index {
            0 => Self::Bear,
            1 => Self::Sideways,
            _ => Self::Bull,
        }
    }

    /// Label of the state with mean-return rank `rank` out of `n_states`:
    /// the lowest rank is `Bear`, the highest `Bull`, everything between
    /// `Sideways`.
    pub fn for_rank(rank: usize, n_states: usize) -> Self {
        if rank == 0 {
            Self::Bear
        } else if rank + 1 >= n_states {
            Self::Bull
        } else {
            Self::Sideways
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Directional base signal.  `None` for `Sideways`, whose signal comes
    /// from the mean-reversion score instead of a fixed direction.
    pub fn base_signal(self) -> Option<f64> {
        match self {
            Self::Bear => Some(-1.0),
            Self::Sideways => None,
            Self::Bull => Some(1.0),
        }
    }
}

impl std::fmt::Display for RegimeLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bear => write!(f, "BEAR"),
            Self::Sideways => write!(f, "SIDEWAYS"),
            Self::Bull => write!(f, "BULL"),
        }
    }
}
