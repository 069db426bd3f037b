// =============================================================================
// Gaussian Hidden Markov Model — full covariance, Baum-Welch training
// =============================================================================
//
// Each latent state emits a multivariate Gaussian over the feature vector
// (period return, trailing volatility).  Training is expectation
// maximisation:
//
//   E-step: scaled forward-backward gives γ_t(j) = P(z_t = j | x) and the
//           expected transition counts ξ.
//   M-step: start = γ_0, A_ij ∝ Σ ξ_t(i,j), μ_j and Σ_j are γ-weighted
//           moments (+ min_covar on the diagonal).
//
// Emission densities are evaluated in log space and re-based on the per-step
// maximum before exponentiation, so tightly clustered features cannot
// underflow every state to zero at once.
//
// Initialisation is deterministic: k-means centres start at quantiles of the
// return feature, per-cluster covariances seed the emissions, and the
// transition matrix gets a diagonally dominant jitter drawn from a ChaCha8
// generator seeded with the configured seed.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::error::{FusionError, Result};
use crate::indicators::spd_inverse;

/// Floor applied to transition probabilities after every M-step.
const MIN_TRANSITION: f64 = 1e-10;

/// Lloyd iterations used to seed the emission means.
const KMEANS_ITERS: usize = 10;

/// Training hyper-parameters.
#[derive(Debug, Clone)]
pub struct HmmConfig {
    pub n_states: usize,
    pub n_iter: usize,
    pub tol: f64,
    pub min_covar: f64,
    pub seed: u64,
}

impl Default for HmmConfig {
    fn default() -> Self {
        Self {
            n_states: 3,
            n_iter: 100,
            tol: 1e-4,
            min_covar: 1e-6,
            seed: 42,
        }
    }
}

// =============================================================================
// Emission distribution
// =============================================================================

#[derive(Debug, Clone)]
struct Emission {
    mean: Array1<f64>,
    precision: Array2<f64>,
    /// -0.5 * (d ln 2π + ln |Σ|)
    log_norm: f64,
}

impl Emission {
    fn new(mean: Array1<f64>, mut covariance: Array2<f64>, min_covar: f64) -> Self {
        let d = mean.len();
        let floor = min_covar.max(1e-12);

        // Escalate the ridge until Σ is positive definite.
        let mut ridge = 0.0;
        let (precision, log_det) = loop {
            if let Some(inverse) = spd_inverse(&covariance) {
                break inverse;
            }
            ridge = if ridge == 0.0 { floor } else { ridge * 10.0 };
            for i in 0..d {
                covariance[[i, i]] += ridge;
            }
            if ridge > 1.0 {
                // Unreachable for finite input; fall back to a unit sphere.
                break (Array2::eye(d), 0.0);
            }
        };

        let log_norm = -0.5 * (d as f64 * (2.0 * std::f64::consts::PI).ln() + log_det);
        Self {
            mean,
            precision,
            log_norm,
        }
    }

    fn log_pdf(&self, x: ArrayView1<f64>) -> f64 {
        let diff = &x - &self.mean;
        let quad = diff.dot(&self.precision.dot(&diff));
        self.log_norm - 0.5 * quad
    }
}

// =============================================================================
// Model
// =============================================================================

/// A fitted Gaussian HMM.  Immutable after [`GaussianHmm::fit`]; share it
/// through an `Arc`.
#[derive(Debug, Clone)]
pub struct GaussianHmm {
    start: Array1<f64>,
    transition: Array2<f64>,
    emissions: Vec<Emission>,
    /// `rank[s]` = position of raw state `s` in ascending mean-return order.
    rank: Vec<usize>,
    log_likelihood: f64,
    iterations: usize,
}

struct ForwardBackward {
    gamma: Array2<f64>,
    xi_sum: Array2<f64>,
    log_likelihood: f64,
}

impl GaussianHmm {
    /// Fit the model to `observations` (rows = time steps).
    ///
    /// Deterministic for a given `config.seed`.
    pub fn fit(observations: ArrayView2<f64>, config: &HmmConfig) -> Result<Self> {
        let n_obs = observations.nrows();
        let k = config.n_states;
        if k < 2 {
            return Err(FusionError::InvalidInput(format!(
                "HMM needs at least 2 states, got {k}"
            )));
        }
        if n_obs < 2 * k {
            return Err(FusionError::InsufficientHistory {
                context: "HMM fit",
                required: 2 * k,
                actual: n_obs,
            });
        }
        if observations.iter().any(|x| !x.is_finite()) {
            return Err(FusionError::InvalidInput("non-finite HMM feature".into()));
        }

        let mut model = Self::initialise(observations, config);

        let mut prev_ll = f64::NEG_INFINITY;
        for iter in 0..config.n_iter.max(1) {
            let fb = model.forward_backward(observations);
            model.m_step(observations, &fb, config.min_covar);
            model.log_likelihood = fb.log_likelihood;
            model.iterations = iter + 1;

            trace!(
                iter = iter + 1,
                log_likelihood = format!("{:.4}", fb.log_likelihood),
                "HMM EM step"
            );

            if (fb.log_likelihood - prev_ll).abs() < config.tol {
                break;
            }
            prev_ll = fb.log_likelihood;
        }

        model.rank = rank_by_mean_return(&model.emissions);

        debug!(
            states = k,
            iterations = model.iterations,
            log_likelihood = format!("{:.4}", model.log_likelihood),
            "HMM fitted"
        );
        Ok(model)
    }

    pub fn n_states(&self) -> usize {
        self.emissions.len()
    }

    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Mean-return rank of every raw state.
    pub fn state_rank(&self) -> &[usize] {
        &self.rank
    }

    /// Emission means of the return feature, in ascending rank order.
    pub fn ordered_return_means(&self) -> Vec<f64> {
        let mut means = vec![0.0; self.n_states()];
        for (state, &r) in self.rank.iter().enumerate() {
            means[r] = self.emissions[state].mean[0];
        }
        means
    }

    /// Highest minus lowest state return mean.
    pub fn return_mean_spread(&self) -> f64 {
        let means = self.ordered_return_means();
        match (means.first(), means.last()) {
            (Some(lo), Some(hi)) => hi - lo,
            _ => 0.0,
        }
    }

    pub fn transition_matrix(&self) -> &Array2<f64> {
        &self.transition
    }

    /// Most likely raw state sequence (Viterbi).
    pub fn decode(&self, observations: ArrayView2<f64>) -> Vec<usize> {
        let t_len = observations.nrows();
        let k = self.n_states();
        if t_len == 0 {
            return Vec::new();
        }

        let log_start = self.start.mapv(|p| (p + 1e-300).ln());
        let log_trans = self.transition.mapv(|p| (p + 1e-300).ln());
        let log_b = self.log_emissions(observations);

        let mut delta = Array2::<f64>::zeros((t_len, k));
        let mut psi = Array2::<usize>::zeros((t_len, k));
        for j in 0..k {
            delta[[0, j]] = log_start[j] + log_b[[0, j]];
        }
        for t in 1..t_len {
            for j in 0..k {
                let mut best = f64::NEG_INFINITY;
                let mut arg = 0;
                for i in 0..k {
                    let v = delta[[t - 1, i]] + log_trans[[i, j]];
                    if v > best {
                        best = v;
                        arg = i;
                    }
                }
                delta[[t, j]] = best + log_b[[t, j]];
                psi[[t, j]] = arg;
            }
        }

        let mut path = vec![0usize; t_len];
        let mut best = f64::NEG_INFINITY;
        for j in 0..k {
            if delta[[t_len - 1, j]] > best {
                best = delta[[t_len - 1, j]];
                path[t_len - 1] = j;
            }
        }
        for t in (0..t_len - 1).rev() {
            path[t] = psi[[t + 1, path[t + 1]]];
        }
        path
    }

    /// Posterior state probabilities γ (rows = time steps, raw state order).
    pub fn posteriors(&self, observations: ArrayView2<f64>) -> Array2<f64> {
        self.forward_backward(observations).gamma
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn initialise(observations: ArrayView2<f64>, config: &HmmConfig) -> Self {
        let k = config.n_states;
        let d = observations.ncols();
        let assignments = kmeans_quantile(observations, k);

        let global_cov = weighted_covariance(observations, &Array1::ones(observations.nrows()));
        let mut emissions = Vec::with_capacity(k);
        for state in 0..k {
            let weights = Array1::from_iter(
                assignments
                    .iter()
                    .map(|&a| if a == state { 1.0 } else { 0.0 }),
            );
            let count = weights.sum();
            let (mean, cov) = if count >= 2.0 {
                weighted_covariance(observations, &weights)
            } else {
                (observations.row(state % observations.nrows()).to_owned(), global_cov.1.clone())
            };
            let mut cov = cov;
            for i in 0..d {
                cov[[i, i]] += config.min_covar;
            }
            emissions.push(Emission::new(mean, cov, config.min_covar));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let mut transition = Array2::<f64>::zeros((k, k));
        for i in 0..k {
            for j in 0..k {
                transition[[i, j]] = if i == j {
                    0.8 + rng.gen::<f64>() * 0.15
                } else {
                    0.01 + rng.gen::<f64>() * 0.1
                };
            }
            let row_sum = transition.row(i).sum();
            transition.row_mut(i).mapv_inplace(|p| p / row_sum);
        }

        Self {
            start: Array1::from_elem(k, 1.0 / k as f64),
            transition,
            emissions,
            rank: (0..k).collect(),
            log_likelihood: f64::NEG_INFINITY,
            iterations: 0,
        }
    }

    fn log_emissions(&self, observations: ArrayView2<f64>) -> Array2<f64> {
        let t_len = observations.nrows();
        let k = self.n_states();
        let mut log_b = Array2::<f64>::zeros((t_len, k));
        for t in 0..t_len {
            let x = observations.row(t);
            for j in 0..k {
                log_b[[t, j]] = self.emissions[j].log_pdf(x);
            }
        }
        log_b
    }

    fn forward_backward(&self, observations: ArrayView2<f64>) -> ForwardBackward {
        let t_len = observations.nrows();
        let k = self.n_states();
        let log_b = self.log_emissions(observations);

        // Re-based emissions: b[t][j] = exp(log_b[t][j] - max_j log_b[t][j]).
        let mut b = Array2::<f64>::zeros((t_len, k));
        let mut offsets = vec![0.0; t_len];
        for t in 0..t_len {
            let m = log_b
                .row(t)
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);
            offsets[t] = m;
            for j in 0..k {
                b[[t, j]] = (log_b[[t, j]] - m).exp();
            }
        }

        // Forward pass with per-step normalisation.
        let mut alpha = Array2::<f64>::zeros((t_len, k));
        let mut scale = vec![0.0; t_len];
        for t in 0..t_len {
            for j in 0..k {
                let prior = if t == 0 {
                    self.start[j]
                } else {
                    (0..k)
                        .map(|i| alpha[[t - 1, i]] * self.transition[[i, j]])
                        .sum()
                };
                alpha[[t, j]] = prior * b[[t, j]];
            }
            let c = alpha.row(t).sum();
            if c > 1e-300 {
                scale[t] = c;
                alpha.row_mut(t).mapv_inplace(|a| a / c);
            } else {
                // Every reachable state has vanishing density: restart the
                // recursion from the emissions alone.
                scale[t] = 1e-300;
                let bs = b.row(t).sum();
                for j in 0..k {
                    alpha[[t, j]] = b[[t, j]] / bs;
                }
            }
        }

        let log_likelihood = scale
            .iter()
            .zip(&offsets)
            .map(|(c, m)| c.ln() + m)
            .sum::<f64>();

        // Backward pass using the forward scale factors.
        let mut beta = Array2::<f64>::ones((t_len, k));
        for t in (0..t_len.saturating_sub(1)).rev() {
            for i in 0..k {
                let s: f64 = (0..k)
                    .map(|j| self.transition[[i, j]] * b[[t + 1, j]] * beta[[t + 1, j]])
                    .sum();
                beta[[t, i]] = s / scale[t + 1];
            }
        }

        let mut gamma = &alpha * &beta;
        for mut row in gamma.rows_mut() {
            let s = row.sum();
            if s > 1e-300 {
                row.mapv_inplace(|g| g / s);
            } else {
                row.fill(1.0 / k as f64);
            }
        }

        let mut xi_sum = Array2::<f64>::zeros((k, k));
        for t in 0..t_len.saturating_sub(1) {
            let mut xi = Array2::<f64>::zeros((k, k));
            for i in 0..k {
                for j in 0..k {
                    xi[[i, j]] =
                        alpha[[t, i]] * self.transition[[i, j]] * b[[t + 1, j]] * beta[[t + 1, j]];
                }
            }
            let s = xi.sum();
            if s > 1e-300 {
                xi_sum += &(xi / s);
            }
        }

        ForwardBackward {
            gamma,
            xi_sum,
            log_likelihood,
        }
    }

    fn m_step(&mut self, observations: ArrayView2<f64>, fb: &ForwardBackward, min_covar: f64) {
        let k = self.n_states();
        let d = observations.ncols();

        self.start = fb.gamma.row(0).to_owned();

        for i in 0..k {
            let row_sum = fb.xi_sum.row(i).sum();
            if row_sum > 1e-12 {
                for j in 0..k {
                    self.transition[[i, j]] = (fb.xi_sum[[i, j]] / row_sum).max(MIN_TRANSITION);
                }
                let renorm = self.transition.row(i).sum();
                self.transition.row_mut(i).mapv_inplace(|p| p / renorm);
            }
        }

        for j in 0..k {
            let weights = fb.gamma.column(j).to_owned();
            if weights.sum() < 1e-10 {
                continue;
            }
            let (mean, mut cov) = weighted_covariance(observations, &weights);
            for i in 0..d {
                cov[[i, i]] += min_covar;
            }
            self.emissions[j] = Emission::new(mean, cov, min_covar);
        }
    }
}

/// γ-weighted mean and (biased) covariance of the rows of `x`.
fn weighted_covariance(x: ArrayView2<f64>, weights: &Array1<f64>) -> (Array1<f64>, Array2<f64>) {
    let d = x.ncols();
    let total = weights.sum().max(1e-300);

    let mean = x.t().dot(weights) / total;
    let mut cov = Array2::<f64>::zeros((d, d));
    for (row, &w) in x.axis_iter(Axis(0)).zip(weights.iter()) {
        if w == 0.0 {
            continue;
        }
        let diff = &row - &mean;
        for a in 0..d {
            for c in 0..d {
                cov[[a, c]] += w * diff[a] * diff[c];
            }
        }
    }
    (mean, cov / total)
}

/// Deterministic k-means: centres start at evenly spaced quantiles of the
/// first feature, then a fixed number of Lloyd iterations.  Returns the
/// cluster of every row.
fn kmeans_quantile(x: ArrayView2<f64>, k: usize) -> Vec<usize> {
    let n = x.nrows();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        x[[a, 0]]
            .partial_cmp(&x[[b, 0]])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut centres: Vec<Array1<f64>> = (0..k)
        .map(|c| {
            let pos = (((c as f64 + 0.5) * n as f64) / k as f64) as usize;
            x.row(order[pos.min(n - 1)]).to_owned()
        })
        .collect();

    let mut assignments = vec![0usize; n];
    for _ in 0..KMEANS_ITERS {
        for (i, slot) in assignments.iter_mut().enumerate() {
            let row = x.row(i);
            let mut best = f64::INFINITY;
            for (c, centre) in centres.iter().enumerate() {
                let dist: f64 = row
                    .iter()
                    .zip(centre.iter())
                    .map(|(a, b)| (a - b).powi(2))
                    .sum();
                if dist < best {
                    best = dist;
                    *slot = c;
                }
            }
        }
        for (c, centre) in centres.iter_mut().enumerate() {
            let members: Vec<usize> = (0..n).filter(|&i| assignments[i] == c).collect();
            if members.is_empty() {
                continue;
            }
            let mut sum = Array1::<f64>::zeros(x.ncols());
            for &i in &members {
                sum += &x.row(i);
            }
            *centre = sum / members.len() as f64;
        }
    }
    assignments
}

/// Rank of every state when sorted by ascending mean of the first feature.
fn rank_by_mean_return(emissions: &[Emission]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..emissions.len()).collect();
    order.sort_by(|&a, &b| {
        emissions[a].mean[0]
            .partial_cmp(&emissions[b].mean[0])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    let mut rank = vec![0; emissions.len()];
    for (r, &state) in order.iter().enumerate() {
        rank[state] = r;
    }
    rank
}
