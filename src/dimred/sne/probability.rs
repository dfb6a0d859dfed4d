//! Pairwise probability matrices for both sides of the embedding.
//!
//! The high-dimensional side uses a Gaussian kernel with one calibrated
//! bandwidth per point and is symmetrised from conditional probabilities.
//! The low-dimensional side is recomputed every optimiser step from the
//! current embedding and is normalised over the whole matrix, which makes it
//! symmetric by construction.

use anyhow::bail;
use log::info;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use super::distance::neg_squared_euclidean;
use super::perplexity::{find_sigmas, BisectionConfig};
use super::SneError;
use crate::utils::{Direction, FloatOps, Normalize};

/// Added to every off-diagonal affinity so no probability is exactly zero.
pub const STABILITY_EPSILON: f64 = 1e-8;

/// Kernel used to turn embedding distances into similarities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LowDimKernel {
    /// `exp(-d²)`, the symmetric SNE kernel.
    #[default]
    Gaussian,
    /// `1 / (1 + d²)`, the heavy-tailed kernel of t-SNE.
    StudentT,
}

/// Joint probabilities of the current embedding.
#[derive(Debug, Clone)]
pub struct EmbeddingAffinities<T: FloatOps> {
    /// Normalised joint probabilities, zero diagonal.
    pub q: Array2<T>,
    /// Unnormalised `1 / (1 + d²)` weights; only present for
    /// [`LowDimKernel::StudentT`], where the gradient needs them.
    pub weights: Option<Array2<T>>,
}

/// Unnormalised Gaussian affinities of one row with the self entry excluded.
///
/// The largest off-diagonal logit is subtracted before exponentiating, so the
/// nearest neighbour always has weight one, and [`STABILITY_EPSILON`] is added
/// to every off-diagonal entry.
pub(crate) fn kernel_row<T: FloatOps>(
    distances: ArrayView1<T>,
    self_index: usize,
    sigma: T,
) -> Array1<T> {
    let two_sig_sq = T::lit(2.0) * sigma * sigma;
    let max = distances
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != self_index)
        .fold(T::neg_infinity(), |acc, (_, &d)| acc.max(d / two_sig_sq));
    let shift = if max.is_finite() { max } else { T::zero() };
    let eps = T::lit(STABILITY_EPSILON);

    let mut row = distances.mapv(|d| (d / two_sig_sq - shift).exp() + eps);
    row[self_index] = T::zero();
    row
}

pub(crate) fn require_square<T>(matrix: ArrayView2<T>, what: &str) -> anyhow::Result<usize> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        bail!(SneError::Shape(format!(
            "{} must be square, got {} x {}",
            what, rows, cols
        )));
    }
    if rows < 2 {
        bail!(SneError::Shape(format!(
            "{} needs at least two samples, got {}",
            what, rows
        )));
    }
    Ok(rows)
}

/// Row-stochastic matrix `p(j|i)` from a distance matrix and one bandwidth
/// per row. Every row sums to one and the diagonal is exactly zero.
///
/// # Errors
/// - [`SneError::Shape`] if `distances` is not square with at least two rows,
///   or `sigmas` has the wrong length.
/// - [`SneError::InvalidParameter`] for a non-positive or non-finite sigma.
/// - [`SneError::NumericDegeneracy`] when a row has no usable mass, which
///   happens only with non-finite distances.
pub fn conditional_probabilities<T: FloatOps>(
    distances: ArrayView2<T>,
    sigmas: ArrayView1<T>,
) -> anyhow::Result<Array2<T>> {
    let n = require_square(distances, "distance matrix")?;
    if sigmas.len() != n {
        bail!(SneError::Shape(format!(
            "expected {} bandwidths, got {}",
            n,
            sigmas.len()
        )));
    }
    if let Some((i, sigma)) = sigmas
        .iter()
        .enumerate()
        .find(|(_, s)| !s.is_finite() || **s <= T::zero())
    {
        bail!(SneError::InvalidParameter(format!(
            "bandwidth of row {} must be positive and finite, got {}",
            i, sigma
        )));
    }

    let mut conditional = Array2::zeros((n, n));
    for (i, mut row) in conditional.rows_mut().into_iter().enumerate() {
        row.assign(&kernel_row(distances.row(i), i, sigmas[i]));
    }

    conditional.normalize_to(T::one(), &Direction::ROW)?;

    Ok(conditional)
}

/// `P = (P_cond + P_condᵀ) / 2N`.
pub fn symmetrize<T: FloatOps>(conditional: ArrayView2<T>) -> anyhow::Result<Array2<T>> {
    let n = require_square(conditional, "conditional probability matrix")?;
    let joint = &conditional + &conditional.t();
    Ok(joint / T::lit(2.0 * n as f64))
}

/// Computes the joint probability matrix P of the input data.
///
/// Runs the full high-dimensional pipeline: pairwise distances, per-row
/// bandwidth calibration against `perplexity`, conditional probabilities and
/// symmetrisation. The result is symmetric, sums to one and has a zero
/// diagonal; its rows and columns follow the row order of `x`.
pub fn joint_probabilities<T: FloatOps>(
    x: ArrayView2<T>,
    perplexity: T,
    bisection: &BisectionConfig,
) -> anyhow::Result<Array2<T>> {
    let distances = neg_squared_euclidean(x)?;
    let calibrations = find_sigmas(distances.view(), perplexity, bisection)?;
    let sigmas: Array1<T> = calibrations.iter().map(|c| c.sigma).collect();

    let conditional = conditional_probabilities(distances.view(), sigmas.view())?;
    let p = symmetrize(conditional.view())?;

    info!(
        "Computed joint probabilities for {} samples at perplexity {}",
        p.nrows(),
        perplexity
    );
    Ok(p)
}

/// Computes the joint probabilities Q of an embedding under `kernel`.
///
/// The Gaussian kernel is shifted by the largest off-diagonal entry before
/// exponentiating; the shift cancels in the grand-total normalisation and keeps
/// well separated embeddings from underflowing to an all-zero matrix.
///
/// # Errors
/// - [`SneError::Shape`] for fewer than two points.
/// - [`SneError::NumericDegeneracy`] if the total affinity is zero or not
///   finite, e.g. after the embedding diverged.
pub fn embedding_affinities<T: FloatOps>(
    embedding: ArrayView2<T>,
    kernel: LowDimKernel,
) -> anyhow::Result<EmbeddingAffinities<T>> {
    let distances = neg_squared_euclidean(embedding)?;
    require_square(distances.view(), "embedding")?;

    let (q, weights) = match kernel {
        LowDimKernel::Gaussian => {
            let shift = distances
                .indexed_iter()
                .filter(|((i, j), _)| i != j)
                .fold(T::neg_infinity(), |acc, (_, &d)| acc.max(d));
            let mut q = distances.mapv(|d| (d - shift).exp());
            q.diag_mut().fill(T::zero());
            let total = checked_total(&q)?;
            q /= total;
            (q, None)
        }
        LowDimKernel::StudentT => {
            let mut weights = distances.mapv(|d| (T::one() - d).recip());
            weights.diag_mut().fill(T::zero());
            let total = checked_total(&weights)?;
            let q = &weights / total;
            (q, Some(weights))
        }
    };

    Ok(EmbeddingAffinities { q, weights })
}

fn checked_total<T: FloatOps>(affinities: &Array2<T>) -> anyhow::Result<T> {
    let total = affinities.sum();
    if !total.is_finite() || total <= T::zero() {
        bail!(SneError::NumericDegeneracy(format!(
            "embedding affinities sum to {}",
            total
        )));
    }
    Ok(total)
}
