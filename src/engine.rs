// =============================================================================
// Fusion Engine — runs every phase for one asset and fuses the result
// =============================================================================
//
// Pipeline:
//   1. Validate the target and classify its trend × volatility regime
//   2. Foundation phase: HMM regime signal (fitted model from the cache)
//   3. Network phase: density regime + lead-lag, weighted by trend bucket
//   4. Pattern phase: regime classifier + factor alpha + anomalies
//   5. Merge caller-supplied external phase signals
//   6. Aggregate under the market regime and wrap in a FusionDecision
//
// Phases 2-4 read only immutable inputs and may run concurrently.  A phase
// that cannot be computed from the data is recorded as NOT_COMPUTABLE and
// excluded from weighting; caller errors (unknown asset, bad input) abort the
// evaluation.
//
// The aggregation regime is the trend × volatility regime of the target.  When
// the history is too short to classify it, the HMM label is used instead,
// which only carries SIDEWAYS over (UNKNOWN otherwise).
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::decision_envelope::{FusionDecision, PhaseDetails};
use crate::error::{FusionError, Result};
use crate::market_data::{MarketFrame, ReturnsMatrix};
use crate::network::{NetworkPhase, NetworkSignal};
use crate::pattern::{PatternPhase, PatternSignal};
use crate::regime::{
    HmmRegimeDetector, MarketRegime, ModelCache, ModelKey, RegimeSignal, RegimeState,
    TrendVolClassifier,
};
use crate::runtime_config::FusionConfig;
use crate::signals::SignalAggregator;
use crate::types::{PhaseOutcome, PhaseSignal, PHASE_FOUNDATION, PHASE_NETWORK, PHASE_PATTERN};

/// Raw results of the three built-in phases.
struct PhaseResults {
    foundation: Result<RegimeSignal>,
    network: Result<NetworkSignal>,
    pattern: Result<PatternSignal>,
}

// =============================================================================
// FusionEngine
// =============================================================================

pub struct FusionEngine {
    config: FusionConfig,
    cache: Arc<ModelCache>,
    classifier: TrendVolClassifier,
    network: NetworkPhase,
    pattern: PatternPhase,
    aggregator: SignalAggregator,
}

impl FusionEngine {
    /// Engine with its own model cache.  Fails if the configuration does not
    /// validate.
    pub fn new(config: FusionConfig) -> Result<Self> {
        Self::with_cache(config, ModelCache::new())
    }

    /// Engine sharing an existing model cache.
    pub fn with_cache(config: FusionConfig, cache: Arc<ModelCache>) -> Result<Self> {
        config.validate()?;
        let aggregator = SignalAggregator::new(config.aggregator.clone())?;
        Ok(Self {
            classifier: TrendVolClassifier::new(config.trend_vol.clone()),
            network: NetworkPhase::new(config.network.clone(), config.lead_lag.clone()),
            pattern: PatternPhase::new(
                config.pattern.clone(),
                config.trend_vol.clone(),
                config.factor.clone(),
                config.anomaly.clone(),
            ),
            aggregator,
            cache,
            config,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ModelCache> {
        &self.cache
    }

    /// Drop every cached regime model of `asset` so the next evaluation
    /// refits on the history it is given.
    pub fn invalidate(&self, asset: &str) -> usize {
        self.cache.invalidate_asset(asset)
    }

    /// Trend × volatility state of the target, `None` if the history is too
    /// short.
    fn trend_regime(&self, prices: &[f64], target: &str) -> Result<Option<RegimeState>> {
        match self.classifier.classify(prices) {
            Ok(state) => Ok(Some(state)),
            Err(e) if e.is_not_computable() => {
                debug!(target = %target, error = %e, "Market regime not classifiable; using UNKNOWN");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// HMM regime signal through the model cache.
    fn foundation(&self, prices: &[f64], target: &str) -> Result<RegimeSignal> {
        let params = &self.config.regime;
        let key = ModelKey::new(target, params);
        let model = self
            .cache
            .get_or_fit(&key, || HmmRegimeDetector::fit_model(prices, params))?;
        HmmRegimeDetector::with_model(params.clone(), model).get_signal(prices)
    }

    fn run_phases(
        &self,
        frame: &MarketFrame,
        returns: &ReturnsMatrix,
        prices: &[f64],
        target: &str,
        regime: MarketRegime,
    ) -> PhaseResults {
        PhaseResults {
            foundation: self.foundation(prices, target),
            network: self.network.generate(returns, target, regime),
            pattern: self.pattern.generate(frame, returns, target),
        }
    }

    /// Evaluate `target` on the calling thread.
    ///
    /// `external` carries readings of phases computed elsewhere (for example
    /// a forecast model under `multivariate`); they must not reuse the name
    /// of a built-in phase.
    pub fn evaluate(
        &self,
        frame: &MarketFrame,
        target: &str,
        external: &BTreeMap<String, PhaseSignal>,
    ) -> Result<FusionDecision> {
        check_external(external)?;
        let prices = frame.prices_of(target)?;
        let returns = frame.returns();
        let trend = self.trend_regime(&prices, target)?;
        let regime = trend.as_ref().map(|s| s.regime).unwrap_or(MarketRegime::Unknown);

        let results = self.run_phases(frame, &returns, &prices, target, regime);
        self.assemble(target, trend, results, external)
    }

    /// Evaluate `target` with the three phases on the blocking thread pool.
    /// Produces the same decision as [`FusionEngine::evaluate`].
    pub async fn evaluate_concurrent(
        self: Arc<Self>,
        frame: Arc<MarketFrame>,
        target: String,
        external: BTreeMap<String, PhaseSignal>,
    ) -> anyhow::Result<FusionDecision> {
        check_external(&external)?;
        let prices = Arc::new(frame.prices_of(&target)?);
        let returns = Arc::new(frame.returns());
        let trend = self.trend_regime(&prices, &target)?;
        let regime = trend.as_ref().map(|s| s.regime).unwrap_or(MarketRegime::Unknown);

        let foundation = {
            let engine = Arc::clone(&self);
            let prices = Arc::clone(&prices);
            let target = target.clone();
            tokio::task::spawn_blocking(move || engine.foundation(&prices, &target))
        };
        let network = {
            let engine = Arc::clone(&self);
            let returns = Arc::clone(&returns);
            let target = target.clone();
            tokio::task::spawn_blocking(move || engine.network.generate(&returns, &target, regime))
        };
        let pattern = {
            let engine = Arc::clone(&self);
            let frame = Arc::clone(&frame);
            let returns = Arc::clone(&returns);
            let target = target.clone();
            tokio::task::spawn_blocking(move || engine.pattern.generate(&frame, &returns, &target))
        };

        let (foundation, network, pattern) =
            tokio::try_join!(foundation, network, pattern).context("phase task failed")?;

        let results = PhaseResults {
            foundation,
            network,
            pattern,
        };
        Ok(self.assemble(&target, trend, results, &external)?)
    }

    /// Turn phase results into outcomes, aggregate and build the decision.
    fn assemble(
        &self,
        target: &str,
        trend: Option<RegimeState>,
        results: PhaseResults,
        external: &BTreeMap<String, PhaseSignal>,
    ) -> Result<FusionDecision> {
        let mut phases = BTreeMap::new();
        let details = PhaseDetails {
            foundation: record(
                results.foundation,
                PHASE_FOUNDATION,
                target,
                &mut phases,
                RegimeSignal::phase_signal,
            )?,
            network: record(
                results.network,
                PHASE_NETWORK,
                target,
                &mut phases,
                NetworkSignal::phase_signal,
            )?,
            pattern: record(
                results.pattern,
                PHASE_PATTERN,
                target,
                &mut phases,
                PatternSignal::phase_signal,
            )?,
        };
        for (name, reading) in external {
            phases.insert(name.clone(), PhaseOutcome::Computed(*reading));
        }

        let regime = match (&trend, &details.foundation) {
            (Some(state), _) => state.regime,
            (None, Some(f)) => MarketRegime::from_hmm_label(f.regime),
            (None, None) => MarketRegime::Unknown,
        };

        match self.aggregator.aggregate_outcomes(&phases, regime) {
            Ok(aggregation) => {
                info!(
                    target = %target,
                    regime = %regime,
                    action = %aggregation.action,
                    composite = format!("{:.4}", aggregation.composite_signal),
                    confidence = format!("{:.2}", aggregation.confidence),
                    agreement = aggregation.agreement_count,
                    "Fusion decision"
                );
                Ok(FusionDecision::decided(target, phases, details, aggregation))
            }
            Err(FusionError::NoValidSignals) => {
                warn!(target = %target, regime = %regime, "No valid signals; holding");
                Ok(FusionDecision::failed(
                    target,
                    regime,
                    phases,
                    details,
                    FusionError::NoValidSignals.to_string(),
                ))
            }
            Err(e) => Err(e),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Record the outcome of one phase.  Not-computable results become
/// `NOT_COMPUTABLE` entries; any other error aborts the evaluation.
fn record<T>(
    result: Result<T>,
    phase: &str,
    target: &str,
    phases: &mut BTreeMap<String, PhaseOutcome>,
    to_signal: impl FnOnce(&T) -> Result<PhaseSignal>,
) -> Result<Option<T>> {
    match result {
        Ok(value) => {
            phases.insert(phase.to_string(), PhaseOutcome::Computed(to_signal(&value)?));
            Ok(Some(value))
        }
        Err(e) if e.is_not_computable() => {
            warn!(target = %target, phase, error = %e, "Phase not computable; excluded from weighting");
            phases.insert(
                phase.to_string(),
                PhaseOutcome::NotComputable {
                    reason: e.to_string(),
                },
            );
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn check_external(external: &BTreeMap<String, PhaseSignal>) -> Result<()> {
    for name in external.keys() {
        if [PHASE_FOUNDATION, PHASE_NETWORK, PHASE_PATTERN].contains(&name.as_str()) {
            return Err(FusionError::InvalidInput(format!(
                "external signal {name} collides with a built-in phase"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PHASE_MULTIVARIATE;

    /// Six co-moving assets with an accelerating uptrend in S0.
    fn frame(n: usize) -> MarketFrame {
        let columns = (0..6)
            .map(|j| {
                let mut p = 100.0;
                let prices: Vec<f64> = (0..n)
                    .map(|t| {
                        let tf = t as f64;
                        let common = (tf * 0.37).sin() * 0.004;
                        let own = (tf * (1.1 + 0.45 * j as f64)).cos() * 0.006;
                        let drift = if j == 0 { 0.001 + 0.00002 * tf } else { 0.0 };
                        p *= 1.0 + common + own + drift;
                        p
                    })
                    .collect();
                (format!("S{j}"), prices)
            })
            .collect();
        MarketFrame::from_columns(columns).unwrap()
    }

    fn engine() -> FusionEngine {
        FusionEngine::new(FusionConfig::default()).unwrap()
    }

    #[test]
    fn full_history_computes_every_phase() {
        let e = engine();
        let d = e.evaluate(&frame(250), "S0", &BTreeMap::new()).unwrap();
        assert!(d.is_decided());
        assert!(d.skipped_phases().is_empty(), "skipped {:?}", d.skipped_phases());
        assert!(d.details.foundation.is_some());
        assert!(d.details.network.is_some());
        assert!(d.details.pattern.is_some());
        let agg = d.aggregation.as_ref().unwrap();
        assert!(agg.composite_signal.abs() <= 1.0);
        assert!((0.0..=1.0).contains(&agg.confidence));
        assert_eq!(d.regime, agg.regime);
        assert_eq!(e.cache().len(), 1);
    }

    #[test]
    fn repeated_evaluation_is_deterministic_and_reuses_model() {
        let e = engine();
        let f = frame(250);
        let a = e.evaluate(&f, "S0", &BTreeMap::new()).unwrap();
        let b = e.evaluate(&f, "S0", &BTreeMap::new()).unwrap();
        assert_eq!(a.aggregation, b.aggregation);
        assert_eq!(a.phases, b.phases);
        assert_eq!(e.cache().len(), 1);
        assert_eq!(e.invalidate("S0"), 1);
        assert!(e.cache().is_empty());
    }

    #[test]
    fn short_history_excludes_not_computable_phases() {
        // 30 prices: the HMM needs 41 and the classifier 61.
        let d = engine().evaluate(&frame(30), "S0", &BTreeMap::new()).unwrap();
        assert!(matches!(
            d.phases[PHASE_FOUNDATION],
            PhaseOutcome::NotComputable { .. }
        ));
        assert_eq!(d.regime, MarketRegime::Unknown);
        let agg = d.aggregation.as_ref().unwrap();
        assert!(!agg.phases_used.contains(&PHASE_FOUNDATION.to_string()));
    }

    #[test]
    fn external_signals_are_merged() {
        let external = BTreeMap::from([(
            PHASE_MULTIVARIATE.to_string(),
            PhaseSignal::new(0.9, 0.9).unwrap(),
        )]);
        let d = engine().evaluate(&frame(250), "S0", &external).unwrap();
        let agg = d.aggregation.as_ref().unwrap();
        assert!(agg.phases_used.contains(&PHASE_MULTIVARIATE.to_string()));
        assert!(matches!(d.phases[PHASE_MULTIVARIATE], PhaseOutcome::Computed(_)));
    }

    #[test]
    fn external_name_collision_is_rejected() {
        let external = BTreeMap::from([(
            PHASE_NETWORK.to_string(),
            PhaseSignal::new(0.1, 0.5).unwrap(),
        )]);
        assert!(matches!(
            engine().evaluate(&frame(100), "S0", &external).unwrap_err(),
            FusionError::InvalidInput(_)
        ));
    }

    #[test]
    fn unknown_target_is_an_error() {
        assert_eq!(
            engine().evaluate(&frame(100), "ZZZ", &BTreeMap::new()).unwrap_err(),
            FusionError::UnknownAsset("ZZZ".into())
        );
    }

    #[tokio::test]
    async fn concurrent_matches_sequential() {
        let f = frame(250);
        let sequential = engine().evaluate(&f, "S0", &BTreeMap::new()).unwrap();
        let concurrent = Arc::new(engine())
            .evaluate_concurrent(Arc::new(f), "S0".to_string(), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(sequential.aggregation, concurrent.aggregation);
        assert_eq!(sequential.phases, concurrent.phases);
        assert_eq!(sequential.action, concurrent.action);
    }

    #[tokio::test]
    async fn concurrent_engines_share_a_cache() {
        let cache = ModelCache::new();
        let a = Arc::new(FusionEngine::with_cache(FusionConfig::default(), Arc::clone(&cache)).unwrap());
        let b = Arc::new(FusionEngine::with_cache(FusionConfig::default(), Arc::clone(&cache)).unwrap());
        let f = Arc::new(frame(250));
        let (x, y) = tokio::join!(
            a.evaluate_concurrent(Arc::clone(&f), "S0".into(), BTreeMap::new()),
            b.evaluate_concurrent(Arc::clone(&f), "S1".into(), BTreeMap::new()),
        );
        assert!(x.unwrap().is_decided());
        assert!(y.unwrap().is_decided());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn engines_with_different_hmm_settings_do_not_share_models() {
        let cache = ModelCache::new();
        let mut other = FusionConfig::default();
        other.regime.seed = 7;
        other.regime.n_states = 2;
        let a = FusionEngine::with_cache(FusionConfig::default(), Arc::clone(&cache)).unwrap();
        let b = FusionEngine::with_cache(other, Arc::clone(&cache)).unwrap();
        let f = frame(250);
        a.evaluate(&f, "S0", &BTreeMap::new()).unwrap();
        b.evaluate(&f, "S0", &BTreeMap::new()).unwrap();
        assert_eq!(cache.len(), 2);
        let fitted: Vec<usize> = [a.config(), b.config()]
            .iter()
            .map(|c| cache.get(&ModelKey::new("S0", &c.regime)).unwrap().n_states())
            .collect();
        assert_eq!(fitted, vec![3, 2]);
    }
}
