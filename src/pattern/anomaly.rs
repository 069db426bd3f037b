// =============================================================================
// Anomaly Detector — pair spreads, momentum, volatility, sector rotation
// =============================================================================
//
// Four independent detectors feed one composite:
//
//   Detector     Trigger                              Signal          Weight
//   ─────────    ───────────────────────────────────  ──────────────  ──────
//   pair         |z(spread s1/s2)| > threshold         ±0.5·min(|z|/3,1) 1.0
//   momentum     |cross-sectional z(Σ returns)| > thr  fade: ∓0.4      1.2
//   vol spike    recent σ / prior σ > 1.5              -0.3            1.5
//   vol squeeze  recent σ / prior σ < 0.5              +0.2            0.8
//   sector       sector vs market, target vs sector    ±0.2 / ±0.3     1.0
//
// composite  = Σ w·s / Σ w over triggered detectors
// confidence = min(0.15 · triggered + 0.4, 1)
// Nothing triggered is a computed neutral reading: signal 0, confidence 0.5.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{FusionError, Result};
use crate::indicators::stats::{cross_sectional_z, mean, std_sample, z_score, EPS};
use crate::market_data::{MarketFrame, ReturnsMatrix};
use crate::runtime_config::AnomalyParams;

const PAIR_WEIGHT: f64 = 1.0;
const MOMENTUM_WEIGHT: f64 = 1.2;
const VOL_SPIKE_WEIGHT: f64 = 1.5;
const VOL_COMPRESSION_WEIGHT: f64 = 0.8;
const SECTOR_WEIGHT: f64 = 1.0;

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairAction {
    /// Spread too high: sell the numerator, buy the denominator.
    #[serde(rename = "SHORT_S1_LONG_S2")]
    ShortS1LongS2,
    /// Spread too low.
    #[serde(rename = "LONG_S1_SHORT_S2")]
    LongS1ShortS2,
    #[serde(rename = "NO_ACTION")]
    NoAction,
}

impl std::fmt::Display for PairAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortS1LongS2 => write!(f, "SHORT_S1_LONG_S2"),
            Self::LongS1ShortS2 => write!(f, "LONG_S1_SHORT_S2"),
            Self::NoAction => write!(f, "NO_ACTION"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairAnomaly {
    pub is_anomaly: bool,
    pub z_score: f64,
    pub action: PairAction,
    pub spread: f64,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairScan {
    pub pair: (String, String),
    #[serde(flatten)]
    pub anomaly: PairAnomaly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MomentumKind {
    MomentumWinner,
    MomentumLoser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MomentumAnomaly {
    pub asset: String,
    pub z_score: f64,
    pub total_return: f64,
    pub kind: MomentumKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolatilityKind {
    /// Reduce position.
    VolSpike,
    /// Prepare for breakout.
    VolCompression,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityAnomaly {
    pub asset: String,
    pub vol_ratio: f64,
    pub kind: VolatilityKind,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SectorRotation {
    pub signal: f64,
    pub sector: Option<String>,
    /// Sector cumulative return minus market cumulative return.
    pub relative_strength: f64,
    /// Target cumulative return minus sector cumulative return.
    pub target_vs_sector: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySignal {
    pub signal: f64,
    pub confidence: f64,
    pub n_anomalies: usize,
    pub pair_anomalies: Vec<PairScan>,
    pub momentum_anomalies: Vec<MomentumAnomaly>,
    pub vol_anomalies: Vec<VolatilityAnomaly>,
    pub sector_rotation: SectorRotation,
}

// =============================================================================
// AnomalyDetector
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    params: AnomalyParams,
}

impl AnomalyDetector {
    pub fn new(params: AnomalyParams) -> Self {
        Self { params }
    }

    /// Same detector with a different z threshold.
    pub fn with_z_threshold(mut self, z_threshold: f64) -> Self {
        self.params.z_threshold = z_threshold;
        self
    }

    pub fn params(&self) -> &AnomalyParams {
        &self.params
    }

    /// z-score of the latest price ratio `s1 / s2` against its trailing
    /// `window` (latest point included).  Windows longer than the history
    /// shrink to half of it.
    pub fn detect_pair_anomaly(&self, s1: &[f64], s2: &[f64], window: usize) -> Result<PairAnomaly> {
        let n = s1.len().min(s2.len());
        if n < 3 {
            return Err(FusionError::InsufficientHistory {
                context: "pair spread",
                required: 3,
                actual: n,
            });
        }
        if let Some(bad) = s2[..n].iter().find(|p| !p.is_finite() || **p <= 0.0) {
            return Err(FusionError::InvalidInput(format!(
                "pair denominator must be positive, found {bad}"
            )));
        }

        let spread: Vec<f64> = s1[..n].iter().zip(&s2[..n]).map(|(a, b)| a / b).collect();
        let window = if n < window { (n / 2).max(2) } else { window };
        let recent = &spread[n - window..];
        let m = mean(recent);
        let sd = std_sample(recent);
        let latest = spread[n - 1];
        let z = z_score(latest, m, sd);

        let (is_anomaly, action) = if z.abs() > self.params.z_threshold {
            if z > 0.0 {
                (true, PairAction::ShortS1LongS2)
            } else {
                (true, PairAction::LongS1ShortS2)
            }
        } else {
            (false, PairAction::NoAction)
        };

        Ok(PairAnomaly {
            is_anomaly,
            z_score: z,
            action,
            spread: latest,
            mean: m,
            std: sd,
        })
    }

    /// Anomalous pairs across the frame, largest |z| first.
    pub fn scan_pair_anomalies(&self, frame: &MarketFrame) -> Vec<PairScan> {
        let assets = frame.assets();
        let prices = frame.prices();
        let mut out = Vec::new();
        for i in 0..assets.len() {
            for j in (i + 1)..assets.len() {
                let s1 = prices.column(i).to_vec();
                let s2 = prices.column(j).to_vec();
                match self.detect_pair_anomaly(&s1, &s2, self.params.pair_window) {
                    Ok(a) if a.is_anomaly => out.push(PairScan {
                        pair: (assets[i].clone(), assets[j].clone()),
                        anomaly: a,
                    }),
                    Ok(_) => {}
                    Err(e) => trace!(a = %assets[i], b = %assets[j], error = %e, "Pair skipped"),
                }
            }
        }
        out.sort_by(|a, b| {
            b.anomaly
                .z_score
                .abs()
                .partial_cmp(&a.anomaly.z_score.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.pair.cmp(&b.pair))
        });
        out
    }

    /// Assets whose cumulative return over `lookback` is extreme relative to
    /// the universe.
    pub fn detect_momentum_anomaly(&self, returns: &ReturnsMatrix, lookback: usize) -> Vec<MomentumAnomaly> {
        if returns.n_assets() < 2 || returns.is_empty() {
            return Vec::new();
        }
        let start = returns.len().saturating_sub(lookback);
        let window = returns.rows(start, returns.len());
        let totals: Vec<f64> = (0..returns.n_assets())
            .map(|j| window.column(j).sum())
            .collect();
        let z = cross_sectional_z(&totals);

        returns
            .assets()
            .iter()
            .enumerate()
            .filter(|(j, _)| z[*j].abs() > self.params.z_threshold)
            .map(|(j, asset)| MomentumAnomaly {
                asset: asset.clone(),
                z_score: z[j],
                total_return: totals[j],
                kind: if z[j] > 0.0 {
                    MomentumKind::MomentumWinner
                } else {
                    MomentumKind::MomentumLoser
                },
            })
            .collect()
    }

    /// Assets whose recent volatility departs from their own history.
    pub fn detect_volatility_anomaly(&self, returns: &ReturnsMatrix, window: usize) -> Vec<VolatilityAnomaly> {
        let n = returns.len();
        if n < window + 2 {
            return Vec::new();
        }
        let mut out = Vec::new();
        for (j, asset) in returns.assets().iter().enumerate() {
            let column = returns.column(j);
            let historical = std_sample(&column[..n - window]);
            if historical <= EPS {
                continue;
            }
            let ratio = std_sample(&column[n - window..]) / historical;
            let kind = if ratio > self.params.vol_spike_ratio {
                VolatilityKind::VolSpike
            } else if ratio < self.params.vol_compression_ratio {
                VolatilityKind::VolCompression
            } else {
                continue;
            };
            out.push(VolatilityAnomaly {
                asset: asset.clone(),
                vol_ratio: ratio,
                kind,
            });
        }
        out
    }

    /// Rotation signal from the target's sector strength and the target's
    /// position inside its sector.
    pub fn detect_sector_rotation(&self, returns: &ReturnsMatrix, target: &str) -> SectorRotation {
        let p = &self.params;
        let found = p
            .sectors
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == target));
        let Some((sector, members)) = found else {
            return SectorRotation::default();
        };
        let present: Vec<usize> = members
            .iter()
            .filter_map(|m| returns.index_of(m).ok())
            .collect();
        let Ok(t) = returns.index_of(target) else {
            return SectorRotation::default();
        };
        if present.len() < 2 || returns.is_empty() {
            return SectorRotation::default();
        }

        let start = returns.len().saturating_sub(p.sector_lookback);
        let window = returns.rows(start, returns.len());
        let mut sector_return = 0.0;
        let mut market_return = 0.0;
        let mut target_return = 0.0;
        for row in window.rows() {
            sector_return += present.iter().map(|&j| row[j]).sum::<f64>() / present.len() as f64;
            market_return += row.sum() / row.len() as f64;
            target_return += row[t];
        }
        let relative_strength = sector_return - market_return;
        let target_vs_sector = target_return - sector_return;

        let strength = p.sector_strength_cutoff;
        let lag = p.target_lag_cutoff;
        let lead = p.target_lead_cutoff;
        let signal = if relative_strength > strength {
            if target_vs_sector < -lag {
                0.3 // catch-up
            } else if target_vs_sector > lead {
                -0.2 // take profit
            } else {
                0.0
            }
        } else if relative_strength < -strength {
            if target_vs_sector > lag {
                -0.3 // mean reversion
            } else if target_vs_sector < -lead {
                0.2 // oversold bounce
            } else {
                0.0
            }
        } else {
            0.0
        };

        SectorRotation {
            signal,
            sector: Some(sector.clone()),
            relative_strength,
            target_vs_sector,
        }
    }

    /// Composite anomaly reading for `target`.
    pub fn get_anomaly_signal(
        &self,
        frame: &MarketFrame,
        returns: &ReturnsMatrix,
        target: &str,
    ) -> Result<AnomalySignal> {
        frame.index_of(target)?;
        returns.index_of(target)?;

        let mut parts: Vec<(f64, f64)> = Vec::new();

        let pair_anomalies: Vec<PairScan> = self
            .scan_pair_anomalies(frame)
            .into_iter()
            .filter(|a| a.pair.0 == target || a.pair.1 == target)
            .collect();
        for a in &pair_anomalies {
            let target_is_s1 = a.pair.0 == target;
            let sig = match (a.anomaly.action, target_is_s1) {
                (PairAction::LongS1ShortS2, true) | (PairAction::ShortS1LongS2, false) => 0.5,
                (PairAction::LongS1ShortS2, false) | (PairAction::ShortS1LongS2, true) => -0.5,
                (PairAction::NoAction, _) => continue,
            };
            parts.push((sig * (a.anomaly.z_score.abs() / 3.0).min(1.0), PAIR_WEIGHT));
        }

        let momentum_anomalies: Vec<MomentumAnomaly> = self
            .detect_momentum_anomaly(returns, self.params.momentum_lookback)
            .into_iter()
            .filter(|a| a.asset == target)
            .collect();
        for a in &momentum_anomalies {
            // Fade the extreme move.
            let sig = match a.kind {
                MomentumKind::MomentumWinner => -0.4,
                MomentumKind::MomentumLoser => 0.4,
            };
            parts.push((sig, MOMENTUM_WEIGHT));
        }

        let vol_anomalies: Vec<VolatilityAnomaly> = self
            .detect_volatility_anomaly(returns, self.params.vol_window)
            .into_iter()
            .filter(|a| a.asset == target)
            .collect();
        for a in &vol_anomalies {
            match a.kind {
                VolatilityKind::VolSpike => parts.push((-0.3, VOL_SPIKE_WEIGHT)),
                VolatilityKind::VolCompression => parts.push((0.2, VOL_COMPRESSION_WEIGHT)),
            }
        }

        let sector_rotation = self.detect_sector_rotation(returns, target);
        if sector_rotation.signal != 0.0 {
            parts.push((sector_rotation.signal, SECTOR_WEIGHT));
        }

        let (signal, confidence) = if parts.is_empty() {
            (0.0, 0.5)
        } else {
            let total: f64 = parts.iter().map(|(_, w)| w).sum();
            let composite = parts.iter().map(|(s, w)| s * w).sum::<f64>() / total;
            (composite, (parts.len() as f64 * 0.15 + 0.4).min(1.0))
        };

        debug!(
            target = %target,
            triggered = parts.len(),
            signal = format!("{:.4}", signal),
            confidence = format!("{:.2}", confidence),
            "Anomaly signal"
        );

        Ok(AnomalySignal {
            signal,
            confidence,
            n_anomalies: parts.len(),
            pair_anomalies,
            momentum_anomalies,
            vol_anomalies,
            sector_rotation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// s1 oscillates gently around 100 and jumps on the last period; s2 is
    /// flat, so the ratio spikes far above its rolling mean.
    fn spiking_pair() -> (Vec<f64>, Vec<f64>) {
        let mut s1: Vec<f64> = (0..120).map(|t| 100.0 + ((t as f64) * 0.8).sin()).collect();
        let last = s1.len() - 1;
        s1[last] = 106.0;
        (s1, vec![50.0; 120])
    }

    #[test]
    fn spread_spike_is_short_s1_long_s2() {
        let (s1, s2) = spiking_pair();
        let det = AnomalyDetector::default();
        let a = det.detect_pair_anomaly(&s1, &s2, 60).unwrap();
        assert!(a.is_anomaly);
        assert!(a.z_score.abs() > det.params().z_threshold);
        assert!(a.z_score > 3.0);
        assert_eq!(a.action, PairAction::ShortS1LongS2);
        assert_eq!(a.action.to_string(), "SHORT_S1_LONG_S2");
        assert_eq!(
            serde_json::to_string(&a.action).unwrap(),
            "\"SHORT_S1_LONG_S2\""
        );
    }

    #[test]
    fn spread_drop_is_long_s1_short_s2() {
        let (mut s1, s2) = spiking_pair();
        let last = s1.len() - 1;
        s1[last] = 94.0;
        let a = AnomalyDetector::default().detect_pair_anomaly(&s1, &s2, 60).unwrap();
        assert_eq!(a.action, PairAction::LongS1ShortS2);
    }

    #[test]
    fn flat_spread_is_neutral() {
        let a = AnomalyDetector::default()
            .detect_pair_anomaly(&[10.0; 80], &[5.0; 80], 60)
            .unwrap();
        assert_eq!(a.z_score, 0.0);
        assert!(!a.is_anomaly);
        assert_eq!(a.action, PairAction::NoAction);
    }

    #[test]
    fn short_pair_history_halves_window() {
        let (s1, s2) = spiking_pair();
        let a = AnomalyDetector::default()
            .detect_pair_anomaly(&s1[80..], &s2[80..], 60)
            .unwrap();
        assert!(a.z_score.is_finite());
        assert!(AnomalyDetector::default()
            .detect_pair_anomaly(&[1.0, 2.0], &[1.0, 1.0], 60)
            .unwrap_err()
            .is_not_computable());
    }

    fn universe(target_last: f64) -> (MarketFrame, ReturnsMatrix) {
        let names = ["VCB", "BID", "CTG", "FPT", "HPG", "GAS"];
        let columns: Vec<(String, Vec<f64>)> = names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let mut p: Vec<f64> = (0..100)
                    .map(|t| 100.0 + ((t as f64) * (0.5 + 0.3 * j as f64)).sin())
                    .collect();
                if j == 0 {
                    let last = p.len() - 1;
                    p[last] = target_last;
                }
                (name.to_string(), p)
            })
            .collect();
        let frame = MarketFrame::from_columns(columns).unwrap();
        let returns = frame.returns();
        (frame, returns)
    }

    #[test]
    fn momentum_winner_is_faded() {
        let names = vec!["A".to_string(), "B".into(), "C".into(), "D".into(), "E".into(), "F".into()];
        let data = Array2::from_shape_fn((30, 6), |(_, j)| if j == 0 { 0.02 } else { 0.0 });
        let r = ReturnsMatrix::new(names, data).unwrap();
        let m = AnomalyDetector::default().detect_momentum_anomaly(&r, 20);
        assert_eq!(m.len(), 1);
        assert_eq!(m[0].asset, "A");
        assert_eq!(m[0].kind, MomentumKind::MomentumWinner);
    }

    #[test]
    fn volatility_spike_and_compression() {
        let data = Array2::from_shape_fn((80, 2), |(t, j)| {
            let wave = ((t as f64) * 1.3).sin();
            match (j, t >= 60) {
                (0, false) => wave * 0.01,
                (0, true) => wave * 0.03,
                (_, false) => wave * 0.03,
                (_, true) => wave * 0.005,
            }
        });
        let r = ReturnsMatrix::new(vec!["SPIKE".into(), "CALM".into()], data).unwrap();
        let v = AnomalyDetector::default().detect_volatility_anomaly(&r, 20);
        assert_eq!(v.len(), 2);
        assert_eq!(v[0].kind, VolatilityKind::VolSpike);
        assert_eq!(v[1].kind, VolatilityKind::VolCompression);
    }

    #[test]
    fn sector_catch_up_trade() {
        // Banking rallies 0.5%/period; VCB lags its sector.
        let names = vec!["VCB".to_string(), "BID".into(), "CTG".into(), "FPT".into(), "HPG".into()];
        let data = Array2::from_shape_fn((30, 5), |(_, j)| match j {
            0 => 0.001,
            1 | 2 => 0.008,
            _ => -0.002,
        });
        let r = ReturnsMatrix::new(names, data).unwrap();
        let s = AnomalyDetector::default().detect_sector_rotation(&r, "VCB");
        assert_eq!(s.sector.as_deref(), Some("banking"));
        assert!(s.relative_strength > 0.05);
        assert!(s.target_vs_sector < -0.03);
        assert_eq!(s.signal, 0.3);
    }

    #[test]
    fn unknown_sector_is_silent() {
        let names = vec!["AAA".to_string(), "BBB".into()];
        let r = ReturnsMatrix::new(names, Array2::zeros((30, 2))).unwrap();
        let s = AnomalyDetector::default().detect_sector_rotation(&r, "AAA");
        assert_eq!(s, SectorRotation::default());
    }

    #[test]
    fn composite_includes_pair_anomaly() {
        let (frame, returns) = universe(108.0);
        let s = AnomalyDetector::default()
            .get_anomaly_signal(&frame, &returns, "VCB")
            .unwrap();
        assert!(!s.pair_anomalies.is_empty());
        assert!(s.n_anomalies >= 1);
        assert!(s.signal < 0.0);
        assert!((s.confidence - (0.15 * s.n_anomalies as f64 + 0.4).min(1.0)).abs() < 1e-12);
    }

    #[test]
    fn quiet_universe_is_neutral() {
        let names: Vec<String> = (0..4).map(|i| format!("Q{i}")).collect();
        let frame = MarketFrame::new(names, Array2::from_elem((50, 4), 10.0)).unwrap();
        let s = AnomalyDetector::default()
            .get_anomaly_signal(&frame, &frame.returns(), "Q1")
            .unwrap();
        assert_eq!(s.signal, 0.0);
        assert_eq!(s.confidence, 0.5);
        assert_eq!(s.n_anomalies, 0);
    }
}
