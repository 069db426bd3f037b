// =============================================================================
// Regime Model Cache — fitted HMMs keyed by asset and model shape
// =============================================================================
//
// Fitting is the only expensive, stateful step of the regime phase.  The
// cache is an explicit object owned by the caller (usually the engine);
// nothing is cached implicitly.  Entries are immutable `Arc<GaussianHmm>`s,
// so readers never block each other and a concurrent refit simply replaces
// the entry.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::Result;
use crate::regime::hmm::GaussianHmm;
use crate::runtime_config::RegimeParams;

/// Immutable cache key.  Engines with different state counts, seeds or
/// feature windows never share a fitted model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub asset: String,
    pub feature_window: usize,
    pub n_states: usize,
    pub seed: u64,
}

impl ModelKey {
    pub fn new(asset: impl Into<String>, params: &RegimeParams) -> Self {
        Self {
            asset: asset.into(),
            feature_window: params.feature_window,
            n_states: params.n_states,
            seed: params.seed,
        }
    }
}

/// Thread-safe store of fitted regime models.
///
/// Designed to be wrapped in an `Arc` and shared across the async runtime.
#[derive(Debug, Default)]
pub struct ModelCache {
    models: RwLock<HashMap<ModelKey, Arc<GaussianHmm>>>,
}

impl ModelCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &ModelKey) -> Option<Arc<GaussianHmm>> {
        self.models.read().get(key).cloned()
    }

    /// Store `model` under `key`, returning the previous entry.
    pub fn put(&self, key: ModelKey, model: Arc<GaussianHmm>) -> Option<Arc<GaussianHmm>> {
        debug!(asset = %key.asset, window = key.feature_window, "Regime model cached");
        self.models.write().insert(key, model)
    }

    /// Cached model for `key`, fitting and storing it on a miss.
    ///
    /// The fit runs without holding the lock; if two callers miss at once
    /// both fit and the later insert wins.  Fitting is deterministic, so the
    /// two models are identical.
    pub fn get_or_fit<F>(&self, key: &ModelKey, fit: F) -> Result<Arc<GaussianHmm>>
    where
        F: FnOnce() -> Result<GaussianHmm>,
    {
        if let Some(model) = self.get(key) {
            return Ok(model);
        }
        info!(asset = %key.asset, window = key.feature_window, "Regime cache miss; fitting");
        let model = Arc::new(fit()?);
        self.put(key.clone(), Arc::clone(&model));
        Ok(model)
    }

    pub fn invalidate(&self, key: &ModelKey) -> bool {
        let removed = self.models.write().remove(key).is_some();
        if removed {
            info!(asset = %key.asset, window = key.feature_window, "Regime model invalidated");
        }
        removed
    }

    /// Drop every window of `asset`; returns how many entries went.
    pub fn invalidate_asset(&self, asset: &str) -> usize {
        let mut models = self.models.write();
        let before = models.len();
        models.retain(|k, _| k.asset != asset);
        let removed = before - models.len();
        if removed > 0 {
            info!(asset = %asset, removed, "Regime models invalidated for asset");
        }
        removed
    }

    pub fn clear(&self) {
        self.models.write().clear();
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}
