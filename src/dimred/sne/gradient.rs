use anyhow::bail;
use ndarray::{Array2, ArrayView2, Zip};

use super::SneError;
use crate::utils::FloatOps;

/// Gradient of the symmetric SNE cost with respect to the embedding:
/// `grad_i = 4 Σ_j (P_ij − Q_ij)(y_i − y_j)`.
///
/// Exact O(N²) evaluation over all pairs.
pub fn sne_gradient<T: FloatOps>(
    p: ArrayView2<T>,
    q: ArrayView2<T>,
    embedding: ArrayView2<T>,
) -> anyhow::Result<Array2<T>> {
    pairwise_gradient(p, q, None, embedding)
}

/// Gradient for the Student-t kernel:
/// `grad_i = 4 Σ_j (P_ij − Q_ij)(y_i − y_j) / (1 + ||y_i − y_j||²)`.
///
/// `weights` are the unnormalised `1 / (1 + d²)` kernel values that were used
/// to build `q`.
pub fn tsne_gradient<T: FloatOps>(
    p: ArrayView2<T>,
    q: ArrayView2<T>,
    weights: ArrayView2<T>,
    embedding: ArrayView2<T>,
) -> anyhow::Result<Array2<T>> {
    pairwise_gradient(p, q, Some(weights), embedding)
}

fn pairwise_gradient<T: FloatOps>(
    p: ArrayView2<T>,
    q: ArrayView2<T>,
    weights: Option<ArrayView2<T>>,
    embedding: ArrayView2<T>,
) -> anyhow::Result<Array2<T>> {
    let (n, dims) = embedding.dim();
    for (name, dim) in [("P", p.dim()), ("Q", q.dim())]
        .into_iter()
        .chain(weights.as_ref().map(|w| ("kernel weights", w.dim())))
    {
        if dim != (n, n) {
            bail!(SneError::Shape(format!(
                "{} is {} x {} but the embedding has {} points",
                name, dim.0, dim.1, n
            )));
        }
    }

    let four = T::lit(4.0);
    let mut grad = Array2::zeros((n, dims));

    for (i, mut grad_i) in grad.rows_mut().into_iter().enumerate() {
        let y_i = embedding.row(i);
        for j in 0..n {
            if j == i {
                continue;
            }
            let mut coeff = p[[i, j]] - q[[i, j]];
            if let Some(w) = weights.as_ref() {
                coeff *= w[[i, j]];
            }
            Zip::from(&mut grad_i)
                .and(&y_i)
                .and(embedding.row(j))
                .for_each(|g, &a, &b| *g += coeff * (a - b));
        }
        grad_i *= four;
    }

    Ok(grad)
}

/// Kullback-Leibler divergence `Σ P_ij ln(P_ij / Q_ij)` over entries with
/// `P_ij > 0`. Entries of `q` are floored at the smallest positive value.
pub fn kl_divergence<T: FloatOps>(p: ArrayView2<T>, q: ArrayView2<T>) -> anyhow::Result<T> {
    if p.dim() != q.dim() {
        bail!(SneError::Shape(format!(
            "cannot compare a {:?} P with a {:?} Q",
            p.dim(),
            q.dim()
        )));
    }

    let floor = T::min_positive_value();
    Ok(Zip::from(&p).and(&q).fold(T::zero(), |acc, &p_ij, &q_ij| {
        if p_ij > T::zero() {
            acc + p_ij * (p_ij / q_ij.max(floor)).ln()
        } else {
            acc
        }
    }))
}
