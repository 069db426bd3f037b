// =============================================================================
// Lead-Lag Detector — assets that move before the target
// =============================================================================
//
// For every other asset L and lag k in 1..=max_lag the detector measures
// corr(L[t-k], target[t]).  Each candidate keeps the lag with the largest
// |correlation|; candidates above `min_correlation` are leaders.
//
// Signal: each leader predicts the target's next return as
//
//   prediction = corr · z(L[n-k])
//
// with z the leader's latest relevant return standardised over its own
// history.  signal = tanh(mean prediction), confidence = min(2·mean|corr|, 1).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FusionError, Result};
use crate::indicators::lagged_correlation;
use crate::indicators::stats::{mean, std_sample, z_score};
use crate::market_data::ReturnsMatrix;
use crate::runtime_config::LeadLagParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadLagRelation {
    pub leader: String,
    /// Periods by which the leader moves first.
    pub lag: usize,
    pub correlation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadLagSignal {
    pub signal: f64,
    pub confidence: f64,
    pub leaders: Vec<LeadLagRelation>,
    /// Per-leader prediction, aligned with `leaders`.
    pub predictions: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct LeadLagDetector {
    params: LeadLagParams,
}

impl LeadLagDetector {
    pub fn new(params: LeadLagParams) -> Self {
        Self { params }
    }

    fn required_periods(&self) -> usize {
        self.params.max_lag + 3
    }

    /// Leaders of `target`, strongest |correlation| first.
    pub fn find_leaders(&self, returns: &ReturnsMatrix, target: &str) -> Result<Vec<LeadLagRelation>> {
        let t = returns.index_of(target)?;
        if returns.len() < self.required_periods() {
            return Err(FusionError::InsufficientHistory {
                context: "lead-lag",
                required: self.required_periods(),
                actual: returns.len(),
            });
        }

        let follower = returns.column(t);
        let mut leaders = Vec::new();
        for (j, asset) in returns.assets().iter().enumerate() {
            if j == t {
                continue;
            }
            let candidate = returns.column(j);
            let mut best: Option<(usize, f64)> = None;
            for lag in 1..=self.params.max_lag {
                let Some(c) = lagged_correlation(&candidate, &follower, lag) else {
                    continue;
                };
                if best.map_or(true, |(_, b)| c.abs() > b.abs()) {
                    best = Some((lag, c));
                }
            }
            if let Some((lag, correlation)) = best {
                if correlation.abs() >= self.params.min_correlation {
                    leaders.push(LeadLagRelation {
                        leader: asset.clone(),
                        lag,
                        correlation,
                    });
                }
            }
        }

        leaders.sort_by(|a, b| {
            b.correlation
                .abs()
                .partial_cmp(&a.correlation.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.leader.cmp(&b.leader))
        });
        leaders.truncate(self.params.max_leaders);
        Ok(leaders)
    }

    /// Directional signal for `target` from its leaders.  No leaders is a
    /// computed neutral reading (signal 0, confidence 0).
    pub fn generate_lag_signals(&self, returns: &ReturnsMatrix, target: &str) -> Result<LeadLagSignal> {
        let leaders = self.find_leaders(returns, target)?;
        if leaders.is_empty() {
            debug!(target = %target, "No significant leaders");
            return Ok(LeadLagSignal {
                signal: 0.0,
                confidence: 0.0,
                leaders,
                predictions: Vec::new(),
            });
        }

        let n = returns.len();
        let mut predictions = Vec::with_capacity(leaders.len());
        for rel in &leaders {
            let j = returns.index_of(&rel.leader)?;
            let column = returns.column(j);
            let z = z_score(column[n - rel.lag], mean(&column), std_sample(&column));
            predictions.push(rel.correlation * z);
        }

        let signal = mean(&predictions).tanh();
        let mean_abs_corr =
            leaders.iter().map(|l| l.correlation.abs()).sum::<f64>() / leaders.len() as f64;
        let confidence = (2.0 * mean_abs_corr).min(1.0);

        debug!(
            target = %target,
            leaders = leaders.len(),
            signal = format!("{:.4}", signal),
            confidence = format!("{:.2}", confidence),
            "Lead-lag signal"
        );

        Ok(LeadLagSignal {
            signal,
            confidence,
            leaders,
            predictions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// FOLLOW copies LEAD with a 2-period delay; NOISE is unrelated.
    fn returns(last_lead_kick: f64) -> ReturnsMatrix {
        let n = 120;
        let lead: Vec<f64> = (0..n)
            .map(|t| {
                if t == n - 2 {
                    last_lead_kick
                } else {
                    ((t as f64) * 1.1).sin() * 0.01
                }
            })
            .collect();
        let data = Array2::from_shape_fn((n, 3), |(t, j)| match j {
            0 => lead[t],
            1 => {
                if t >= 2 {
                    lead[t - 2]
                } else {
                    0.0
                }
            }
            _ => ((t as f64) * 2.9).cos() * 0.01,
        });
        ReturnsMatrix::new(vec!["LEAD".into(), "FOLLOW".into(), "NOISE".into()], data).unwrap()
    }

    #[test]
    fn finds_the_lagged_leader() {
        let r = returns(0.01);
        let leaders = LeadLagDetector::default().find_leaders(&r, "FOLLOW").unwrap();
        assert_eq!(leaders[0].leader, "LEAD");
        assert_eq!(leaders[0].lag, 2);
        assert!(leaders[0].correlation > 0.9);
    }

    #[test]
    fn leader_shock_propagates_to_signal() {
        let up = LeadLagDetector::default()
            .generate_lag_signals(&returns(0.05), "FOLLOW")
            .unwrap();
        let down = LeadLagDetector::default()
            .generate_lag_signals(&returns(-0.05), "FOLLOW")
            .unwrap();
        assert!(up.signal > 0.0);
        assert!(down.signal < 0.0);
        assert!(up.confidence > 0.0 && up.confidence <= 1.0);
        assert_eq!(up.predictions.len(), up.leaders.len());
    }

    #[test]
    fn no_leaders_is_neutral() {
        let data = Array2::from_shape_fn((60, 2), |(t, j)| {
            if j == 0 {
                ((t as f64) * 1.3).sin() * 0.01
            } else {
                0.0
            }
        });
        let r = ReturnsMatrix::new(vec!["A".into(), "B".into()], data).unwrap();
        let s = LeadLagDetector::default().generate_lag_signals(&r, "B").unwrap();
        assert_eq!(s.signal, 0.0);
        assert_eq!(s.confidence, 0.0);
        assert!(s.leaders.is_empty());
    }

    #[test]
    fn short_history_and_unknown_target() {
        let data = Array2::<f64>::zeros((5, 2));
        let r = ReturnsMatrix::new(vec!["A".into(), "B".into()], data).unwrap();
        assert!(LeadLagDetector::default()
            .find_leaders(&r, "A")
            .unwrap_err()
            .is_not_computable());
        assert_eq!(
            LeadLagDetector::default().find_leaders(&r, "Z").unwrap_err(),
            FusionError::UnknownAsset("Z".into())
        );
    }
}
