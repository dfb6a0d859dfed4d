//! All-pairs negative squared Euclidean distances.

use anyhow::bail;
use ndarray::{Array2, ArrayView2, Axis};

use super::SneError;
use crate::utils::FloatOps;

/// Computes `D[i][j] = -||m_i - m_j||²` for every pair of rows in `points`.
///
/// Uses the expansion `||a||² + ||b||² - 2·a·b` so the bulk of the work is a
/// single matrix product. Only the upper triangle is evaluated and mirrored,
/// which keeps the result exactly symmetric; the diagonal is exactly zero and
/// rounding noise that would yield a positive entry is clamped to zero.
///
/// # Errors
/// Returns [`SneError::Shape`] when `points` has no rows or no columns.
pub fn neg_squared_euclidean<T: FloatOps>(points: ArrayView2<T>) -> anyhow::Result<Array2<T>> {
    let (n_points, n_dims) = points.dim();
    if n_points == 0 || n_dims == 0 {
        bail!(SneError::Shape(format!(
            "cannot compute distances of an empty {} x {} matrix",
            n_points, n_dims
        )));
    }

    let sq_norms = points.map_axis(Axis(1), |row| row.dot(&row));
    let gram = points.dot(&points.t());
    let two = T::lit(2.0);

    let mut distances = Array2::zeros((n_points, n_points));
    for i in 0..n_points {
        for j in (i + 1)..n_points {
            let sq = sq_norms[i] + sq_norms[j] - two * gram[[i, j]];
            let d = if sq < T::zero() { T::zero() } else { -sq };
            distances[[i, j]] = d;
            distances[[j, i]] = d;
        }
    }

    Ok(distances)
}
