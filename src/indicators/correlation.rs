// =============================================================================
// Correlation, partial correlation and lagged cross-correlation
// =============================================================================
//
// Partial correlation between assets i and j controls for every other asset
// in the universe.  It is read off the precision matrix P = C⁻¹ of the
// correlation matrix C:
//
//   ρ_ij·rest = -P_ij / sqrt(P_ii * P_jj)
//
// C is shrunk towards the identity (C + λI, rescaled) before a Cholesky
// inversion so a near-collinear universe still yields a usable precision
// matrix.  If C is still not positive definite the caller receives `None`
// and decides the fallback.

use nalgebra::linalg::Cholesky;
use nalgebra::DMatrix;
use ndarray::{Array2, ArrayView2};
use tracing::trace;

use super::stats::mean;

/// Pivot magnitude (and correlation denominator) below which a matrix is
/// treated as singular.
const SINGULAR_EPS: f64 = 1e-12;

/// Pearson correlation of two equally long series.
///
/// Returns 0.0 when either series has zero variance or fewer than two points
/// (no co-movement can be measured).
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let mx = mean(xs);
    let my = mean(ys);

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let denom = (sxx * syy).sqrt();
    if denom <= SINGULAR_EPS || !denom.is_finite() {
        return 0.0;
    }
    (sxy / denom).clamp(-1.0, 1.0)
}

/// Correlation matrix of the columns of `data` (rows = periods).
pub fn correlation_matrix(data: ArrayView2<f64>) -> Array2<f64> {
    let n = data.ncols();
    let columns: Vec<Vec<f64>> = (0..n).map(|j| data.column(j).to_vec()).collect();

    let mut corr = Array2::eye(n);
    for i in 0..n {
        for j in (i + 1)..n {
            let c = pearson(&columns[i], &columns[j]);
            corr[[i, j]] = c;
            corr[[j, i]] = c;
        }
    }
    corr
}

fn to_dmatrix(m: &Array2<f64>) -> DMatrix<f64> {
    let values: Vec<f64> = m.iter().copied().collect();
    DMatrix::from_row_slice(m.nrows(), m.ncols(), &values)
}

fn to_array(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Inverse of a square matrix.  Returns `None` for non-square, non-finite or
/// singular input.
pub fn invert(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    if matrix.nrows() != matrix.ncols() || matrix.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let inv = to_dmatrix(matrix).try_inverse()?;
    if inv.iter().any(|v| !v.is_finite()) {
        trace!(n = matrix.nrows(), "Matrix inversion: non-finite inverse");
        return None;
    }
    Some(to_array(&inv))
}

/// Inverse and `ln |M|` of a symmetric positive-definite matrix through its
/// Cholesky factor.  `None` when `M` is not positive definite or a pivot
/// falls below the singularity tolerance.
pub fn spd_inverse(matrix: &Array2<f64>) -> Option<(Array2<f64>, f64)> {
    if matrix.nrows() != matrix.ncols() || matrix.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let chol = Cholesky::new(to_dmatrix(matrix))?;

    let mut log_det = 0.0;
    {
        let l = chol.l_dirty();
        for i in 0..l.nrows() {
            let pivot = l[(i, i)];
            if !pivot.is_finite() || pivot * pivot <= SINGULAR_EPS {
                trace!(row = i, pivot, "Cholesky: singular pivot");
                return None;
            }
            log_det += 2.0 * pivot.ln();
        }
    }

    let inv = chol.inverse();
    if inv.iter().any(|v| !v.is_finite()) {
        return None;
    }
    Some((to_array(&inv), log_det))
}

/// Partial-correlation matrix of the columns of `data`.
///
/// `ridge` shrinks the correlation matrix towards the identity before
/// inversion.  Returns `None` when the shrunk matrix is still singular.
pub fn partial_correlation_matrix(data: ArrayView2<f64>, ridge: f64) -> Option<Array2<f64>> {
    let n = data.ncols();
    let mut corr = correlation_matrix(data);
    if ridge > 0.0 {
        for i in 0..n {
            for j in 0..n {
                corr[[i, j]] /= 1.0 + ridge;
            }
            corr[[i, i]] = 1.0;
        }
    }

    let (precision, _) = spd_inverse(&corr)?;

    let mut partial = Array2::eye(n);
    for i in 0..n {
        for j in (i + 1)..n {
            let denom = (precision[[i, i]] * precision[[j, j]]).sqrt();
            let value = if denom > SINGULAR_EPS && denom.is_finite() {
                (-precision[[i, j]] / denom).clamp(-1.0, 1.0)
            } else {
                0.0
            };
            partial[[i, j]] = value;
            partial[[j, i]] = value;
        }
    }
    Some(partial)
}

/// Correlation of `leader[t - lag]` with `follower[t]`.
///
/// `lag == 0` is the contemporaneous correlation.  Returns `None` when the
/// overlap leaves fewer than three pairs.
pub fn lagged_correlation(leader: &[f64], follower: &[f64], lag: usize) -> Option<f64> {
    let n = leader.len().min(follower.len());
    if lag >= n || n - lag < 3 {
        return None;
    }
    Some(pearson(&leader[..n - lag], &follower[lag..n]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn pearson_perfect_and_inverse() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let y = [2.0, 4.0, 6.0, 8.0, 10.0];
        let z = [5.0, 4.0, 3.0, 2.0, 1.0];
        assert!((pearson(&x, &y) - 1.0).abs() < 1e-12);
        assert!((pearson(&x, &z) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn pearson_flat_series_is_zero() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn invert_recovers_identity() {
        let m = array![[4.0, 7.0], [2.0, 6.0]];
        let inv = invert(&m).unwrap();
        let product = m.dot(&inv);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((product[[i, j]] - expected).abs() < 1e-10);
            }
        }
    }

    #[test]
    fn invert_singular_is_none() {
        let m = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(invert(&m).is_none());
    }

    #[test]
    fn spd_inverse_matches_general_inverse() {
        let m = array![[4.0, 2.0], [2.0, 3.0]];
        let (inv, log_det) = spd_inverse(&m).unwrap();
        let general = invert(&m).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert!((inv[[i, j]] - general[[i, j]]).abs() < 1e-12);
            }
        }
        assert!((log_det - 8.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn spd_inverse_rejects_indefinite_and_singular() {
        assert!(spd_inverse(&array![[1.0, 2.0], [2.0, 1.0]]).is_none());
        assert!(spd_inverse(&array![[1.0, 1.0], [1.0, 1.0]]).is_none());
        assert!(spd_inverse(&array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]).is_none());
    }

    #[test]
    fn identical_columns_have_no_partial_correlation_without_ridge() {
        let col: Vec<f64> = (0..50).map(|t| ((t as f64) * 0.37).sin()).collect();
        let data = Array2::from_shape_fn((50, 3), |(t, j)| if j == 2 { ((t as f64) * 1.3).cos() } else { col[t] });
        assert!(partial_correlation_matrix(data.view(), 0.0).is_none());
        assert!(partial_correlation_matrix(data.view(), 0.05).is_some());
    }

    #[test]
    fn partial_correlation_removes_common_driver() {
        // b and c both follow a; conditioned on a they are unrelated.
        let mut rows = Vec::new();
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut noise = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state as f64 / u64::MAX as f64) - 0.5
        };
        for _ in 0..400 {
            let a = noise();
            let b = a + 0.3 * noise();
            let c = a + 0.3 * noise();
            rows.extend_from_slice(&[a, b, c]);
        }
        let data = Array2::from_shape_vec((400, 3), rows).unwrap();

        let corr = correlation_matrix(data.view());
        let partial = partial_correlation_matrix(data.view(), 0.0).unwrap();
        assert!(corr[[1, 2]] > 0.7);
        assert!(partial[[1, 2]].abs() < 0.2);
    }

    #[test]
    fn lagged_correlation_finds_shift() {
        let leader: Vec<f64> = (0..60).map(|i| ((i * 7) % 11) as f64).collect();
        let mut follower = vec![0.0; 2];
        follower.extend_from_slice(&leader[..58]);
        let at_two = lagged_correlation(&leader, &follower, 2).unwrap();
        assert!((at_two - 1.0).abs() < 1e-9);
        assert!(lagged_correlation(&leader, &follower, 59).is_none());
    }
}
