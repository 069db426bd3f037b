// =============================================================================
// Runtime Configuration — Fusion engine settings with atomic save
// =============================================================================
//
// Every tunable parameter of the fusion engine lives here: model sizes,
// windows, the empirical cutoffs (action thresholds, z thresholds, density
// cutoffs, sector relative-strength cutoffs) and the regime weight tables.
// None of the cutoffs has a derivation beyond calibration, so all of them are
// plain named fields that a deployment can override.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry serde defaults so that adding new fields never
// breaks loading an older config file.
//
// =============================================================================

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::FusionError;
use crate::network::graph::CorrelationMethod;
use crate::regime::detector::{MarketRegime, TrendBucket};
use crate::signals::weights::{WeightTable, WEIGHT_TOLERANCE};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_seed() -> u64 {
    42
}

fn default_feature_window() -> usize {
    20
}

fn default_smoothing_window() -> usize {
    5
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_min_regime_duration() -> usize {
    3
}

// =============================================================================
// RegimeParams — HMM regime detector
// =============================================================================

/// Hidden Markov regime model and its temporal smoothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeParams {
    /// Number of latent states.  The lowest-return state is BEAR, the
    /// highest BULL, every state between SIDEWAYS.
    #[serde(default = "default_n_states")]
    pub n_states: usize,

    /// Maximum Baum-Welch iterations.
    #[serde(default = "default_n_iter")]
    pub n_iter: usize,

    /// Log-likelihood improvement below which EM stops.
    #[serde(default = "default_tol")]
    pub tol: f64,

    /// Ridge added to every covariance diagonal.
    #[serde(default = "default_min_covar")]
    pub min_covar: f64,

    /// Seed of the initialisation jitter.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Trailing window of the volatility feature.
    #[serde(default = "default_feature_window")]
    pub feature_window: usize,

    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,

    /// Minimum mean probability for a smoothed regime to count as stable.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Minimum agreeing labels in the smoothing window.
    #[serde(default = "default_min_regime_duration")]
    pub min_regime_duration: usize,

    /// SMA window of the sideways mean-reversion score.
    #[serde(default = "default_feature_window")]
    pub mean_reversion_window: usize,

    /// Multiplier applied to the signal of an unstable regime.
    #[serde(default = "default_unstable_penalty")]
    pub unstable_penalty: f64,

    /// Fit on first use instead of failing with `ModelNotFitted`.
    #[serde(default = "default_true")]
    pub auto_fit: bool,

    /// Spread of the fitted state return means below which the states are
    /// indistinguishable and the phase reports a neutral SIDEWAYS reading.
    #[serde(default = "default_min_state_separation")]
    pub min_state_separation: f64,
}

fn default_n_states() -> usize {
    3
}

fn default_n_iter() -> usize {
    100
}

fn default_tol() -> f64 {
    1e-4
}

fn default_min_covar() -> f64 {
    1e-6
}

fn default_unstable_penalty() -> f64 {
    0.5
}

fn default_min_state_separation() -> f64 {
    1e-6
}

impl Default for RegimeParams {
    fn default() -> Self {
        Self {
            n_states: default_n_states(),
            n_iter: default_n_iter(),
            tol: default_tol(),
            min_covar: default_min_covar(),
            seed: default_seed(),
            feature_window: default_feature_window(),
            smoothing_window: default_smoothing_window(),
            confidence_threshold: default_confidence_threshold(),
            min_regime_duration: default_min_regime_duration(),
            mean_reversion_window: default_feature_window(),
            unstable_penalty: default_unstable_penalty(),
            auto_fit: true,
            min_state_separation: default_min_state_separation(),
        }
    }
}

// =============================================================================
// TrendVolParams — four-state classifier
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrendVolParams {
    /// Returns used for the trend t-statistic.
    pub trend_lookback: usize,
    /// |t| below this is SIDEWAYS.
    pub sideways_t_band: f64,
    /// Recent realized-volatility window.
    pub vol_window: usize,
    /// Long-run realized-volatility window (clipped to the history).
    pub long_vol_window: usize,
    /// recent / long-run volatility above this is HIGH_VOL.
    pub high_vol_ratio: f64,
    pub mean_reversion_window: usize,
    /// |signal| beyond this maps to BUY / SELL.
    pub action_threshold: f64,
}

impl Default for TrendVolParams {
    fn default() -> Self {
        Self {
            trend_lookback: 60,
            sideways_t_band: 1.5,
            vol_window: 20,
            long_vol_window: 120,
            high_vol_ratio: 1.0,
            mean_reversion_window: 20,
            action_threshold: 0.3,
        }
    }
}

// =============================================================================
// NetworkParams
// =============================================================================

/// Component weights of the network phase for one trend bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkWeights {
    pub regime: f64,
    pub lead_lag: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkParams {
    /// Edge threshold on |correlation|.
    pub threshold: f64,
    /// Method of the snapshot graph reported with the phase.
    pub method: CorrelationMethod,
    /// Method of the density windows.
    pub density_method: CorrelationMethod,
    /// Shrinkage of the off-diagonal correlations before inversion.
    pub partial_ridge: f64,
    pub density_window: usize,
    /// |density change| beyond this flips RISK_ON / RISK_OFF.
    pub density_change_cutoff: f64,
    pub risk_off_signal: f64,
    pub risk_on_signal: f64,
    /// Scale of the density-signal confidence, `min(scale * |Δ|, 1)`.
    pub density_confidence_scale: f64,
    pub shift_windows: Vec<usize>,
    /// Windows that must agree for a RISK_ON / RISK_OFF consensus.
    pub shift_consensus: usize,
    pub top_leaders: usize,
    pub weights: BTreeMap<TrendBucket, NetworkWeights>,
}

fn default_network_weights() -> BTreeMap<TrendBucket, NetworkWeights> {
    let w = |regime, lead_lag| NetworkWeights { regime, lead_lag };
    BTreeMap::from([
        (TrendBucket::Bull, w(0.25, 0.75)),
        (TrendBucket::Bear, w(0.50, 0.50)),
        (TrendBucket::Sideways, w(0.35, 0.65)),
        (TrendBucket::Unknown, w(0.30, 0.70)),
    ])
}

impl Default for NetworkParams {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            method: CorrelationMethod::Partial,
            density_method: CorrelationMethod::Pearson,
            partial_ridge: 0.05,
            density_window: 60,
            density_change_cutoff: 0.1,
            risk_off_signal: -0.5,
            risk_on_signal: 0.3,
            density_confidence_scale: 5.0,
            shift_windows: vec![30, 60, 90],
            shift_consensus: 2,
            top_leaders: 5,
            weights: default_network_weights(),
        }
    }
}

// =============================================================================
// LeadLagParams
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadLagParams {
    /// Largest lag (periods) tested; lags are `1..=max_lag`.
    pub max_lag: usize,
    /// Minimum |lagged correlation| for a leader to count.
    pub min_correlation: f64,
    /// Most leaders kept, strongest first.
    pub max_leaders: usize,
}

impl Default for LeadLagParams {
    fn default() -> Self {
        Self {
            max_lag: 5,
            min_correlation: 0.2,
            max_leaders: 5,
        }
    }
}

// =============================================================================
// AnomalyParams
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyParams {
    pub z_threshold: f64,
    pub pair_window: usize,
    pub momentum_lookback: usize,
    pub vol_window: usize,
    pub vol_spike_ratio: f64,
    pub vol_compression_ratio: f64,
    pub sector_lookback: usize,
    /// Sector strength vs market beyond which rotation is considered.
    pub sector_strength_cutoff: f64,
    /// Target vs sector lag that triggers a catch-up / mean-reversion trade.
    pub target_lag_cutoff: f64,
    /// Target vs sector lead that triggers take-profit / oversold bounce.
    pub target_lead_cutoff: f64,
    pub sectors: BTreeMap<String, Vec<String>>,
}

fn default_sectors() -> BTreeMap<String, Vec<String>> {
    let sector = |name: &str, members: &[&str]| {
        (
            name.to_string(),
            members.iter().map(|m| m.to_string()).collect::<Vec<_>>(),
        )
    };
    BTreeMap::from([
        sector(
            "banking",
            &["VCB", "BID", "CTG", "TCB", "MBB", "ACB", "VPB", "HDB", "TPB", "STB"],
        ),
        sector("real_estate", &["VIC", "VHM", "NVL", "KDH", "DXG", "PDR", "NLG"]),
        sector("retail", &["MWG", "FRT", "PNJ", "DGW"]),
        sector("tech", &["FPT", "CMG"]),
        sector("steel", &["HPG", "HSG", "NKG"]),
        sector("energy", &["GAS", "POW", "PVD", "PVS"]),
    ])
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self {
            z_threshold: 1.8,
            pair_window: 60,
            momentum_lookback: 20,
            vol_window: 20,
            vol_spike_ratio: 1.5,
            vol_compression_ratio: 0.5,
            sector_lookback: 20,
            sector_strength_cutoff: 0.05,
            target_lag_cutoff: 0.03,
            target_lead_cutoff: 0.05,
            sectors: default_sectors(),
        }
    }
}

// =============================================================================
// FactorParams
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorParams {
    pub momentum_lookback: usize,
    pub reversal_lookback: usize,
    pub volatility_lookback: usize,
    pub beta_lookback: usize,
    pub min_assets: usize,
}

impl Default for FactorParams {
    fn default() -> Self {
        Self {
            momentum_lookback: 60,
            reversal_lookback: 5,
            volatility_lookback: 60,
            beta_lookback: 60,
            min_assets: 3,
        }
    }
}

// =============================================================================
// PatternParams
// =============================================================================

/// Component weights of the pattern phase for one market regime.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternWeights {
    pub regime: f64,
    pub factor: f64,
    pub anomaly: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternParams {
    /// z threshold of the pattern phase's own anomaly detector.
    pub anomaly_z_threshold: f64,
    /// Composite ceiling in BEAR_HIGH_VOL.
    pub bear_cap: f64,
    /// Composite floor in BULL_LOW_VOL.
    pub bull_floor: f64,
    /// |composite| below this is amplified in SIDEWAYS.
    pub sideways_weak: f64,
    pub sideways_amplify: f64,
    /// |signal| beyond this makes an opportunity candidate.
    pub opportunity_threshold: f64,
    pub opportunity_top: usize,
    pub weights: BTreeMap<MarketRegime, PatternWeights>,
}

fn default_pattern_weights() -> BTreeMap<MarketRegime, PatternWeights> {
    let w = |regime, factor, anomaly| PatternWeights {
        regime,
        factor,
        anomaly,
    };
    BTreeMap::from([
        (MarketRegime::BullLowVol, w(0.40, 0.35, 0.25)),
        (MarketRegime::BullHighVol, w(0.50, 0.25, 0.25)),
        (MarketRegime::BearHighVol, w(0.55, 0.20, 0.25)),
        (MarketRegime::BearLowVol, w(0.45, 0.30, 0.25)),
        (MarketRegime::Sideways, w(0.35, 0.30, 0.35)),
        (MarketRegime::Unknown, w(0.45, 0.30, 0.25)),
    ])
}

impl Default for PatternParams {
    fn default() -> Self {
        Self {
            anomaly_z_threshold: 2.0,
            bear_cap: -0.2,
            bull_floor: 0.2,
            sideways_weak: 0.3,
            sideways_amplify: 1.5,
            opportunity_threshold: 0.3,
            opportunity_top: 5,
            weights: default_pattern_weights(),
        }
    }
}

// =============================================================================
// AggregatorParams
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorParams {
    /// Use the regime table; otherwise `default_weights` for every regime.
    pub adaptive: bool,
    pub weights: WeightTable,
    pub default_weights: BTreeMap<String, f64>,
    /// Buy threshold in bullish regimes.
    pub bullish_buy_threshold: f64,
    pub buy_threshold: f64,
    /// Sell threshold in bearish regimes.
    pub bearish_sell_threshold: f64,
    pub sell_threshold: f64,
    /// Confidence required for any directional action.
    pub min_action_confidence: f64,
    /// Agreeing phases needed for the confirmation bonus.
    pub confirmation_count: usize,
    pub confirmation_bonus: f64,
    pub strong_signal: f64,
    pub strong_confidence: f64,
}

impl Default for AggregatorParams {
    fn default() -> Self {
        Self {
            adaptive: true,
            weights: WeightTable::default(),
            default_weights: WeightTable::default_flat(),
            bullish_buy_threshold: 0.25,
            buy_threshold: 0.30,
            bearish_sell_threshold: -0.25,
            sell_threshold: -0.30,
            min_action_confidence: 0.5,
            confirmation_count: 3,
            confirmation_bonus: 1.2,
            strong_signal: 0.6,
            strong_confidence: 0.7,
        }
    }
}

// =============================================================================
// FusionConfig
// =============================================================================

/// Top-level configuration of the fusion engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionConfig {
    #[serde(default)]
    pub regime: RegimeParams,

    #[serde(default)]
    pub trend_vol: TrendVolParams,

    #[serde(default)]
    pub network: NetworkParams,

    #[serde(default)]
    pub lead_lag: LeadLagParams,

    #[serde(default)]
    pub anomaly: AnomalyParams,

    #[serde(default)]
    pub factor: FactorParams,

    #[serde(default)]
    pub pattern: PatternParams,

    #[serde(default)]
    pub aggregator: AggregatorParams,

    /// Run the three phases on the blocking pool concurrently.
    #[serde(default = "default_true")]
    pub concurrent: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            regime: RegimeParams::default(),
            trend_vol: TrendVolParams::default(),
            network: NetworkParams::default(),
            lead_lag: LeadLagParams::default(),
            anomaly: AnomalyParams::default(),
            factor: FactorParams::default(),
            pattern: PatternParams::default(),
            aggregator: AggregatorParams::default(),
            concurrent: true,
        }
    }
}

impl FusionConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fusion config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse fusion config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("invalid fusion config in {}", path.display()))?;

        info!(
            path = %path.display(),
            n_states = config.regime.n_states,
            adaptive = config.aggregator.adaptive,
            concurrent = config.concurrent,
            "fusion config loaded"
        );

        Ok(config)
    }

    /// Load `path` if it exists, otherwise warn and use the defaults.  A file
    /// that exists but cannot be read, parsed or validated is an error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(path = %path.display(), "fusion config not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise fusion config to JSON")?;

        // Atomic write: write to a temporary sibling file, then rename.
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "fusion config saved (atomic)");
        Ok(())
    }

    /// Check windows and every weight table.
    pub fn validate(&self) -> std::result::Result<(), FusionError> {
        let r = &self.regime;
        nonzero("regime.feature_window", r.feature_window)?;
        nonzero("regime.smoothing_window", r.smoothing_window)?;
        nonzero("regime.mean_reversion_window", r.mean_reversion_window)?;
        if r.n_states < 2 {
            return Err(FusionError::InvalidInput(format!(
                "regime.n_states must be at least 2, got {}",
                r.n_states
            )));
        }
        if r.min_regime_duration > r.smoothing_window {
            warn!(
                min_regime_duration = r.min_regime_duration,
                smoothing_window = r.smoothing_window,
                "min_regime_duration exceeds smoothing_window; no regime can be stable"
            );
        }

        let t = &self.trend_vol;
        nonzero("trend_vol.trend_lookback", t.trend_lookback)?;
        nonzero("trend_vol.vol_window", t.vol_window)?;

        let n = &self.network;
        nonzero("network.density_window", n.density_window)?;
        for w in &n.shift_windows {
            nonzero("network.shift_windows", *w)?;
        }
        for (bucket, w) in &n.weights {
            check_sum(&bucket.to_string(), w.regime + w.lead_lag)?;
        }
        nonzero("lead_lag.max_lag", self.lead_lag.max_lag)?;

        let a = &self.anomaly;
        nonzero("anomaly.pair_window", a.pair_window)?;
        nonzero("anomaly.momentum_lookback", a.momentum_lookback)?;
        nonzero("anomaly.vol_window", a.vol_window)?;
        nonzero("anomaly.sector_lookback", a.sector_lookback)?;

        let f = &self.factor;
        nonzero("factor.momentum_lookback", f.momentum_lookback)?;
        nonzero("factor.reversal_lookback", f.reversal_lookback)?;
        nonzero("factor.volatility_lookback", f.volatility_lookback)?;
        nonzero("factor.beta_lookback", f.beta_lookback)?;

        for (regime, w) in &self.pattern.weights {
            check_sum(&regime.to_string(), w.regime + w.factor + w.anomaly)?;
        }

        self.aggregator.weights.validate()?;
        check_sum(
            "default",
            self.aggregator.default_weights.values().sum::<f64>(),
        )?;
        Ok(())
    }
}

fn nonzero(name: &str, value: usize) -> std::result::Result<(), FusionError> {
    if value == 0 {
        return Err(FusionError::InvalidInput(format!("{name} must be non-zero")));
    }
    Ok(())
}

fn check_sum(regime: &str, sum: f64) -> std::result::Result<(), FusionError> {
    if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
        return Err(FusionError::InvalidWeights {
            regime: regime.to_string(),
            sum,
        });
    }
    Ok(())
}
