// =============================================================================
// Market Frame — aligned price history for a universe of assets
// =============================================================================
//
// The frame is the only input the engine reads.  It is produced by an
// upstream data pipeline and is immutable once built: phases borrow views of
// it and never write back.
//
// Layout: rows are periods (oldest first), columns are assets.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FusionError, Result};

/// Aligned prices for several assets.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketFrame {
    assets: Vec<String>,
    prices: Array2<f64>,
}

/// JSON wire form: `{"assets": [...], "prices": [[p_a, p_b, ...], ...]}`.
#[derive(Debug, Serialize, Deserialize)]
struct FrameFile {
    assets: Vec<String>,
    prices: Vec<Vec<f64>>,
}

impl MarketFrame {
    /// Build a frame, validating the shape and every price.
    pub fn new(assets: Vec<String>, prices: Array2<f64>) -> Result<Self> {
        if assets.is_empty() {
            return Err(FusionError::InvalidInput("no assets supplied".into()));
        }
        let mut seen = HashSet::new();
        for asset in &assets {
            if asset.trim().is_empty() {
                return Err(FusionError::InvalidInput("empty asset name".into()));
            }
            if !seen.insert(asset.as_str()) {
                return Err(FusionError::InvalidInput(format!("duplicate asset {asset}")));
            }
        }
        if prices.ncols() != assets.len() {
            return Err(FusionError::InvalidInput(format!(
                "{} price columns for {} assets",
                prices.ncols(),
                assets.len()
            )));
        }
        if prices.nrows() < 2 {
            return Err(FusionError::InsufficientHistory {
                context: "market frame",
                required: 2,
                actual: prices.nrows(),
            });
        }
        if let Some(bad) = prices.iter().find(|p| !p.is_finite() || **p <= 0.0) {
            return Err(FusionError::InvalidInput(format!(
                "prices must be finite and positive, found {bad}"
            )));
        }

        Ok(Self { assets, prices })
    }

    /// Build a frame from one price vector per asset (all equally long).
    pub fn from_columns(columns: Vec<(String, Vec<f64>)>) -> Result<Self> {
        let rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        if let Some((name, _)) = columns.iter().find(|(_, c)| c.len() != rows) {
            return Err(FusionError::InvalidInput(format!(
                "column {name} is not aligned to {rows} periods"
            )));
        }
        let mut prices = Array2::zeros((rows, columns.len()));
        for (j, (_, column)) in columns.iter().enumerate() {
            for (i, p) in column.iter().enumerate() {
                prices[[i, j]] = *p;
            }
        }
        let assets = columns.into_iter().map(|(name, _)| name).collect();
        Self::new(assets, prices)
    }

    /// Load a frame from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read market frame from {}", path.display()))?;
        let file: FrameFile = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse market frame from {}", path.display()))?;

        let rows = file.prices.len();
        let cols = file.assets.len();
        if let Some(row) = file.prices.iter().position(|r| r.len() != cols) {
            anyhow::bail!("row {row} of {} does not have {cols} prices", path.display());
        }
        let flat: Vec<f64> = file.prices.into_iter().flatten().collect();
        let prices = Array2::from_shape_vec((rows, cols), flat)?;
        let frame = Self::new(file.assets, prices)?;

        debug!(
            path = %path.display(),
            assets = frame.n_assets(),
            periods = frame.len(),
            "market frame loaded"
        );
        Ok(frame)
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    /// Number of periods.
    pub fn len(&self) -> usize {
        self.prices.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.nrows() == 0
    }

    pub fn prices(&self) -> ArrayView2<'_, f64> {
        self.prices.view()
    }

    pub fn index_of(&self, asset: &str) -> Result<usize> {
        self.assets
            .iter()
            .position(|a| a == asset)
            .ok_or_else(|| FusionError::UnknownAsset(asset.to_string()))
    }

    /// Price history of one asset.
    pub fn prices_of(&self, asset: &str) -> Result<Vec<f64>> {
        let j = self.index_of(asset)?;
        Ok(self.prices.column(j).to_vec())
    }

    /// Simple returns `p_t / p_{t-1} - 1`, shape `(len - 1) × n_assets`.
    pub fn returns(&self) -> ReturnsMatrix {
        let p = &self.prices;
        let numer = p.slice(s![1.., ..]);
        let denom = p.slice(s![..-1, ..]);
        let returns = &numer / &denom - 1.0;
        ReturnsMatrix {
            assets: self.assets.clone(),
            returns,
        }
    }

    /// The most recent `n` periods (all of them if `n >= len`).
    pub fn tail(&self, n: usize) -> MarketFrame {
        let start = self.len().saturating_sub(n);
        MarketFrame {
            assets: self.assets.clone(),
            prices: self.prices.slice(s![start.., ..]).to_owned(),
        }
    }
}

/// Period returns for a universe; rows are periods, columns are assets.
#[derive(Debug, Clone, PartialEq)]
pub struct ReturnsMatrix {
    assets: Vec<String>,
    returns: Array2<f64>,
}

impl ReturnsMatrix {
    /// Wrap an existing returns matrix.  Values must be finite.
    pub fn new(assets: Vec<String>, returns: Array2<f64>) -> Result<Self> {
        if returns.ncols() != assets.len() {
            return Err(FusionError::InvalidInput(format!(
                "{} return columns for {} assets",
                returns.ncols(),
                assets.len()
            )));
        }
        if returns.iter().any(|r| !r.is_finite()) {
            return Err(FusionError::InvalidInput("returns must be finite".into()));
        }
        Ok(Self { assets, returns })
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn n_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn len(&self) -> usize {
        self.returns.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.nrows() == 0
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.returns.view()
    }

    pub fn index_of(&self, asset: &str) -> Result<usize> {
        self.assets
            .iter()
            .position(|a| a == asset)
            .ok_or_else(|| FusionError::UnknownAsset(asset.to_string()))
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        self.returns.column(j).to_vec()
    }

    /// Rows `start..end` as a view.
    pub fn rows(&self, start: usize, end: usize) -> ArrayView2<'_, f64> {
        self.returns.slice(s![start..end, ..])
    }

    /// Equal-weight cross-sectional mean return of every period.
    pub fn market_returns(&self) -> Vec<f64> {
        self.returns
            .rows()
            .into_iter()
            .map(|row| row.sum() / row.len().max(1) as f64)
            .collect()
    }
}
