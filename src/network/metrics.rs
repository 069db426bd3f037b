// =============================================================================
// Network Metrics — density, centrality, clustering, components
// =============================================================================
//
// All metrics treat the graph as unweighted: an edge either exists or not.
//
//   density      2E / (n(n-1))
//   degree       deg / (n-1)
//   eigenvector  principal eigenvector of A (power iteration on A + I, which
//                has the same eigenvectors and does not oscillate on
//                bipartite graphs), L2-normalised
//   closeness    (r-1)/Σd · (r-1)/(n-1) over the r nodes reachable from the
//                node, so disconnected graphs stay comparable
//   clustering   closed triangles / possible triangles per node

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::network::graph::CorrelationNetwork;

const POWER_ITERATIONS: usize = 200;
const POWER_TOL: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    pub n_nodes: usize,
    pub n_edges: usize,
    pub density: f64,
    pub avg_clustering: f64,
    pub n_clusters: usize,
    pub largest_cluster: usize,
}

/// Centrality scores of one node.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeCentrality {
    pub degree: f64,
    pub eigenvector: f64,
    pub closeness: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leader {
    pub asset: String,
    pub score: f64,
}

/// Borrowing view that computes metrics over a [`CorrelationNetwork`].
pub struct NetworkMetrics<'a> {
    net: &'a CorrelationNetwork,
}

impl<'a> NetworkMetrics<'a> {
    pub fn new(net: &'a CorrelationNetwork) -> Self {
        Self { net }
    }

    pub fn density(&self) -> f64 {
        let n = self.net.n_nodes();
        if n < 2 {
            return 0.0;
        }
        2.0 * self.net.n_edges() as f64 / (n * (n - 1)) as f64
    }

    pub fn degree_centrality(&self) -> Vec<f64> {
        let n = self.net.n_nodes();
        if n < 2 {
            return vec![0.0; n];
        }
        (0..n)
            .map(|i| self.net.degree(i) as f64 / (n - 1) as f64)
            .collect()
    }

    pub fn eigenvector_centrality(&self) -> Vec<f64> {
        let n = self.net.n_nodes();
        if n == 0 || self.net.n_edges() == 0 {
            return vec![0.0; n];
        }

        let mut x = vec![1.0 / (n as f64).sqrt(); n];
        for iter in 0..POWER_ITERATIONS {
            let mut next: Vec<f64> = (0..n)
                .map(|i| x[i] + self.net.neighbors(i).iter().map(|&j| x[j]).sum::<f64>())
                .collect();
            let norm = next.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm <= 0.0 {
                return vec![0.0; n];
            }
            next.iter_mut().for_each(|v| *v /= norm);
            let delta: f64 = next.iter().zip(&x).map(|(a, b)| (a - b).abs()).sum();
            x = next;
            if delta < POWER_TOL * n as f64 {
                trace!(iterations = iter + 1, "Eigenvector centrality converged");
                break;
            }
        }
        x
    }

    /// Shortest-path distances (in hops) from `source`; `None` if
    /// unreachable.
    fn bfs(&self, source: usize) -> Vec<Option<usize>> {
        let mut dist = vec![None; self.net.n_nodes()];
        dist[source] = Some(0);
        let mut queue = VecDeque::from([source]);
        while let Some(u) = queue.pop_front() {
            let du = dist[u].unwrap_or(0);
            for v in self.net.neighbors(u) {
                if dist[v].is_none() {
                    dist[v] = Some(du + 1);
                    queue.push_back(v);
                }
            }
        }
        dist
    }

    pub fn closeness_centrality(&self) -> Vec<f64> {
        let n = self.net.n_nodes();
        (0..n)
            .map(|i| {
                let dist = self.bfs(i);
                let reachable: Vec<usize> = dist.iter().flatten().copied().collect();
                let r = reachable.len();
                let total: usize = reachable.iter().sum();
                if r <= 1 || total == 0 || n < 2 {
                    return 0.0;
                }
                let r1 = (r - 1) as f64;
                (r1 / total as f64) * (r1 / (n - 1) as f64)
            })
            .collect()
    }

    /// Local clustering coefficient of every node (0 for degree < 2).
    pub fn clustering(&self) -> Vec<f64> {
        (0..self.net.n_nodes())
            .map(|i| {
                let nb = self.net.neighbors(i);
                let k = nb.len();
                if k < 2 {
                    return 0.0;
                }
                let mut links = 0usize;
                for a in 0..k {
                    for b in (a + 1)..k {
                        if self.net.has_edge(nb[a], nb[b]) {
                            links += 1;
                        }
                    }
                }
                2.0 * links as f64 / (k * (k - 1)) as f64
            })
            .collect()
    }

    pub fn average_clustering(&self) -> f64 {
        let c = self.clustering();
        if c.is_empty() {
            return 0.0;
        }
        c.iter().sum::<f64>() / c.len() as f64
    }

    /// Connected components, largest first (ties by first asset name).
    /// Every asset appears in exactly one cluster.
    pub fn find_clusters(&self) -> Vec<Vec<String>> {
        let n = self.net.n_nodes();
        let mut seen = vec![false; n];
        let mut clusters: Vec<Vec<String>> = Vec::new();
        for start in 0..n {
            if seen[start] {
                continue;
            }
            let mut members: Vec<String> = self
                .bfs(start)
                .iter()
                .enumerate()
                .filter_map(|(j, d)| d.map(|_| j))
                .map(|j| {
                    seen[j] = true;
                    self.net.assets()[j].clone()
                })
                .collect();
            members.sort();
            clusters.push(members);
        }
        clusters.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        clusters
    }

    /// Top `top_n` assets by eigenvector centrality, degree as tie-break.
    pub fn find_leaders(&self, top_n: usize) -> Vec<Leader> {
        let eig = self.eigenvector_centrality();
        let deg = self.degree_centrality();
        let mut order: Vec<usize> = (0..self.net.n_nodes()).collect();
        order.sort_by(|&a, &b| {
            eig[b]
                .partial_cmp(&eig[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| deg[b].partial_cmp(&deg[a]).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| self.net.assets()[a].cmp(&self.net.assets()[b]))
        });
        order
            .into_iter()
            .filter(|&i| self.net.degree(i) > 0)
            .take(top_n)
            .map(|i| Leader {
                asset: self.net.assets()[i].clone(),
                score: eig[i],
            })
            .collect()
    }

    pub fn all_centralities(&self) -> BTreeMap<String, NodeCentrality> {
        let degree = self.degree_centrality();
        let eigenvector = self.eigenvector_centrality();
        let closeness = self.closeness_centrality();
        self.net
            .assets()
            .iter()
            .enumerate()
            .map(|(i, a)| {
                (
                    a.clone(),
                    NodeCentrality {
                        degree: degree[i],
                        eigenvector: eigenvector[i],
                        closeness: closeness[i],
                    },
                )
            })
            .collect()
    }

    pub fn get_network_stats(&self) -> NetworkStats {
        let clusters = self.find_clusters();
        NetworkStats {
            n_nodes: self.net.n_nodes(),
            n_edges: self.net.n_edges(),
            density: self.density(),
            avg_clustering: self.average_clustering(),
            n_clusters: clusters.len(),
            largest_cluster: clusters.first().map(|c| c.len()).unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::graph::CorrelationMethod;
    use ndarray::Array2;

    /// Graph: A-B-C triangle, C-D, E isolated.
    fn net() -> CorrelationNetwork {
        let names: Vec<String> = ["A", "B", "C", "D", "E"].iter().map(|s| s.to_string()).collect();
        // Build from synthetic factor returns: A, B, C share factor f1; C and
        // D share f2; E is independent.
        let data = Array2::from_shape_fn((200, 5), |(t, j)| {
            let t = t as f64;
            let f1 = (t * 0.7).sin();
            let f2 = (t * 1.9).cos();
            let own = (t * (3.1 + j as f64 * 1.37)).sin() * 0.05;
            match j {
                0 | 1 => f1 + own,
                2 => f1 + f2 + own,
                3 => f2 + own,
                _ => (t * 5.3).sin(),
            }
        });
        CorrelationNetwork::build(data.view(), &names, 0.4, CorrelationMethod::Pearson, 0.0)
    }

    #[test]
    fn topology_is_as_constructed() {
        let n = net();
        assert!(n.has_edge(0, 1) && n.has_edge(0, 2) && n.has_edge(1, 2));
        assert!(n.has_edge(2, 3));
        assert!(!n.has_edge(0, 3));
        assert_eq!(n.degree(4), 0);
    }

    #[test]
    fn density_and_degree() {
        let n = net();
        let m = NetworkMetrics::new(&n);
        assert!((m.density() - 4.0 / 10.0).abs() < 1e-12);
        let deg = m.degree_centrality();
        assert!((deg[2] - 0.75).abs() < 1e-12);
        assert_eq!(deg[4], 0.0);
    }

    #[test]
    fn clustering_coefficients() {
        let n = net();
        let m = NetworkMetrics::new(&n);
        let c = m.clustering();
        assert!((c[0] - 1.0).abs() < 1e-12);
        assert!((c[2] - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(c[3], 0.0);
        assert!((m.average_clustering() - (1.0 + 1.0 + 1.0 / 3.0) / 5.0).abs() < 1e-12);
    }

    #[test]
    fn hub_leads_centrality() {
        let n = net();
        let m = NetworkMetrics::new(&n);
        let eig = m.eigenvector_centrality();
        assert!(eig[2] > eig[0] && eig[2] > eig[3]);
        assert_eq!(eig[4], 0.0);
        let close = m.closeness_centrality();
        assert!(close[2] > close[3]);
        assert_eq!(close[4], 0.0);
        let leaders = m.find_leaders(2);
        assert_eq!(leaders[0].asset, "C");
        assert_eq!(leaders.len(), 2);
    }

    #[test]
    fn clusters_are_components() {
        let n = net();
        let clusters = NetworkMetrics::new(&n).find_clusters();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0], vec!["A", "B", "C", "D"]);
        assert_eq!(clusters[1], vec!["E"]);
        let stats = NetworkMetrics::new(&n).get_network_stats();
        assert_eq!(stats.n_edges, 4);
        assert_eq!(stats.largest_cluster, 4);
    }
}
