// =============================================================================
// Correlation Network — undirected graph over a universe of assets
// =============================================================================
//
// Nodes are assets; an edge joins two assets whose |correlation| over the
// supplied returns exceeds the threshold.  Edge weights keep the signed
// correlation.
//
//   Pearson  : plain pairwise correlation
//   Partial  : correlation conditional on every other asset, from the ridge
//              shrunk precision matrix; falls back to Pearson if the matrix
//              cannot be inverted

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::indicators::{correlation_matrix, partial_correlation_matrix};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    Pearson,
    Partial,
}

impl std::fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pearson => write!(f, "pearson"),
            Self::Partial => write!(f, "partial"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub weight: f64,
}

/// Thresholded correlation graph.  Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationNetwork {
    assets: Vec<String>,
    /// Symmetric; zero where there is no edge and on the diagonal.
    weights: Array2<f64>,
    /// Method actually used (Partial may have fallen back).
    method: CorrelationMethod,
}

impl CorrelationNetwork {
    /// Build the graph from a returns matrix (rows = periods, columns in the
    /// order of `assets`).
    pub fn build(
        returns: ArrayView2<f64>,
        assets: &[String],
        threshold: f64,
        method: CorrelationMethod,
        ridge: f64,
    ) -> Self {
        let (corr, used) = match method {
            CorrelationMethod::Pearson => (correlation_matrix(returns), CorrelationMethod::Pearson),
            CorrelationMethod::Partial => match partial_correlation_matrix(returns, ridge) {
                Some(p) => (p, CorrelationMethod::Partial),
                None => {
                    warn!(
                        assets = assets.len(),
                        periods = returns.nrows(),
                        "Correlation matrix singular; falling back to Pearson"
                    );
                    (correlation_matrix(returns), CorrelationMethod::Pearson)
                }
            },
        };

        let n = assets.len();
        let mut weights = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let c = corr[[i, j]];
                if c.is_finite() && c.abs() > threshold {
                    weights[[i, j]] = c;
                    weights[[j, i]] = c;
                }
            }
        }

        let net = Self {
            assets: assets.to_vec(),
            weights,
            method: used,
        };
        trace!(
            nodes = n,
            edges = net.n_edges(),
            method = %used,
            threshold = format!("{:.2}", threshold),
            "Correlation network built"
        );
        net
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn method(&self) -> CorrelationMethod {
        self.method
    }

    pub fn n_nodes(&self) -> usize {
        self.assets.len()
    }

    pub fn n_edges(&self) -> usize {
        let n = self.n_nodes();
        (0..n)
            .map(|i| ((i + 1)..n).filter(|&j| self.has_edge(i, j)).count())
            .sum()
    }

    pub fn has_edge(&self, i: usize, j: usize) -> bool {
        i != j && self.weights[[i, j]] != 0.0
    }

    pub fn weight(&self, i: usize, j: usize) -> f64 {
        self.weights[[i, j]]
    }

    pub fn neighbors(&self, i: usize) -> Vec<usize> {
        (0..self.n_nodes()).filter(|&j| self.has_edge(i, j)).collect()
    }

    pub fn degree(&self, i: usize) -> usize {
        (0..self.n_nodes()).filter(|&j| self.has_edge(i, j)).count()
    }

    pub fn index_of(&self, asset: &str) -> Option<usize> {
        self.assets.iter().position(|a| a == asset)
    }

    pub fn edges(&self) -> Vec<Edge> {
        let n = self.n_nodes();
        let mut out = Vec::new();
        for i in 0..n {
            for j in (i + 1)..n {
                if self.has_edge(i, j) {
                    out.push(Edge {
                        source: self.assets[i].clone(),
                        target: self.assets[j].clone(),
                        weight: self.weights[[i, j]],
                    });
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("A{i}")).collect()
    }

    /// Columns 0 and 1 move together, column 2 is unrelated.
    fn returns() -> Array2<f64> {
        Array2::from_shape_fn((80, 3), |(t, j)| {
            let base = (t as f64 * 0.9).sin() * 0.01;
            match j {
                0 => base,
                1 => base * 0.8 + (t as f64 * 3.7).cos() * 0.001,
                _ => (t as f64 * 2.3).cos() * 0.01,
            }
        })
    }

    #[test]
    fn pearson_links_co_moving_assets() {
        let net =
            CorrelationNetwork::build(returns().view(), &names(3), 0.4, CorrelationMethod::Pearson, 0.05);
        assert!(net.has_edge(0, 1));
        assert!(!net.has_edge(0, 2));
        assert_eq!(net.n_edges(), 1);
        assert_eq!(net.neighbors(0), vec![1]);
        assert!(net.weight(0, 1) > 0.9);
        assert_eq!(net.edges()[0].source, "A0");
    }

    #[test]
    fn partial_correlation_is_used_when_invertible() {
        let net =
            CorrelationNetwork::build(returns().view(), &names(3), 0.4, CorrelationMethod::Partial, 0.05);
        assert_eq!(net.method(), CorrelationMethod::Partial);
        assert!(net.has_edge(0, 1));
    }

    #[test]
    fn constant_returns_give_empty_graph() {
        let flat = Array2::<f64>::zeros((30, 4));
        let net = CorrelationNetwork::build(flat.view(), &names(4), 0.4, CorrelationMethod::Pearson, 0.05);
        assert_eq!(net.n_edges(), 0);
        assert_eq!(net.degree(2), 0);
    }

    #[test]
    fn method_serde_names() {
        assert_eq!(
            serde_json::to_string(&CorrelationMethod::Partial).unwrap(),
            "\"partial\""
        );
    }
}
