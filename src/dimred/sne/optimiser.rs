//! Momentum gradient descent on the embedding.

use std::time::{Duration, Instant};

use log::{debug, warn};
use ndarray::{Array2, ArrayView2, Zip};

use super::gradient::{kl_divergence, sne_gradient, tsne_gradient};
use super::probability::{embedding_affinities, LowDimKernel};
use crate::utils::FloatOps;

/// The two most recent embeddings, kept only to form the momentum term
/// `Y_{t-1} - Y_{t-2}`.
#[derive(Debug, Clone)]
pub(crate) struct MomentumBuffer<T: FloatOps> {
    slots: [Array2<T>; 2],
    newest: usize,
}

impl<T: FloatOps> MomentumBuffer<T> {
    pub(crate) fn new(initial: &Array2<T>) -> Self {
        Self {
            slots: [initial.clone(), initial.clone()],
            newest: 0,
        }
    }

    /// Adds `momentum * (Y_{t-1} - Y_{t-2})` to `embedding`.
    pub(crate) fn apply(&self, embedding: &mut Array2<T>, momentum: T) {
        let last = &self.slots[self.newest];
        let before_last = &self.slots[1 - self.newest];
        Zip::from(embedding)
            .and(last)
            .and(before_last)
            .for_each(|y, &a, &b| *y += momentum * (a - b));
    }

    /// Overwrites the oldest slot with `embedding`.
    pub(crate) fn push(&mut self, embedding: &Array2<T>) {
        let oldest = 1 - self.newest;
        self.slots[oldest].assign(embedding);
        self.newest = oldest;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DescentSettings<T: FloatOps> {
    pub max_iters: usize,
    pub learning_rate: T,
    /// `None` disables momentum.
    pub momentum: Option<T>,
    pub kernel: LowDimKernel,
    pub time_budget: Option<Duration>,
    /// Log the divergence every this many iterations; 0 turns it off.
    pub log_every: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct DescentOutcome<T: FloatOps> {
    pub embedding: Array2<T>,
    pub iterations: usize,
    pub stopped_early: bool,
    /// `(steps taken, KL(P || Q))` at every logged iteration.
    pub kl_history: Vec<(usize, T)>,
}

/// Runs `settings.max_iters` steps of
/// `Y ← Y − lr·grad + momentum·(Y_{t-1} − Y_{t-2})`.
///
/// The iteration count is the only regular stopping rule. A time budget, when
/// set, is checked between iterations and ends the loop with the current
/// embedding.
pub(crate) fn descend<T: FloatOps>(
    p: ArrayView2<T>,
    mut embedding: Array2<T>,
    settings: &DescentSettings<T>,
) -> anyhow::Result<DescentOutcome<T>> {
    let started = Instant::now();
    let mut lagged = settings.momentum.map(|_| MomentumBuffer::new(&embedding));
    let mut iterations = 0;
    let mut stopped_early = false;
    let mut kl_history = Vec::new();

    while iterations < settings.max_iters {
        if let Some(budget) = settings.time_budget {
            if started.elapsed() >= budget {
                warn!(
                    "Time budget of {:?} used up after {} of {} iterations",
                    budget, iterations, settings.max_iters
                );
                stopped_early = true;
                break;
            }
        }

        let affinities = embedding_affinities(embedding.view(), settings.kernel)?;
        if settings.log_every > 0 && iterations % settings.log_every == 0 {
            let kl = kl_divergence(p, affinities.q.view())?;
            debug!(
                "iteration {}/{}: KL(P || Q) = {}",
                iterations, settings.max_iters, kl
            );
            kl_history.push((iterations, kl));
        }

        let grad = match &affinities.weights {
            Some(weights) => tsne_gradient(
                p,
                affinities.q.view(),
                weights.view(),
                embedding.view(),
            )?,
            None => sne_gradient(p, affinities.q.view(), embedding.view())?,
        };

        embedding.scaled_add(-settings.learning_rate, &grad);
        if let (Some(momentum), Some(buffer)) = (settings.momentum, lagged.as_mut()) {
            buffer.apply(&mut embedding, momentum);
            buffer.push(&embedding);
        }
        iterations += 1;
    }

    Ok(DescentOutcome {
        embedding,
        iterations,
        stopped_early,
        kl_history,
    })
}
