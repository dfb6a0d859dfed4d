//! Per-point bandwidth calibration.
//!
//! Every row of the distance matrix gets its own Gaussian bandwidth, found by
//! bisection so that the row's conditional distribution has the requested
//! perplexity. Rows are independent and are calibrated in parallel.

use anyhow::bail;
use log::{debug, warn};
use ndarray::{ArrayView1, ArrayView2};
use rayon::prelude::*;

use super::probability::{kernel_row, require_square};
use super::SneError;
use crate::utils::FloatOps;

/// Search settings for the bandwidth bisection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BisectionConfig {
    /// Lower end of the initial sigma interval.
    pub lower: f64,
    /// Upper end of the initial sigma interval.
    pub upper: f64,
    /// Absolute tolerance on the perplexity value.
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Default for BisectionConfig {
    fn default() -> Self {
        Self {
            lower: 1e-20,
            upper: 1000.0,
            tolerance: 1e-10,
            max_iter: 10_000,
        }
    }
}

impl BisectionConfig {
    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        if !(self.lower > 0.0 && self.lower.is_finite()) {
            bail!(SneError::InvalidParameter(format!(
                "bisection lower bound must be positive, got {}",
                self.lower
            )));
        }
        if !(self.upper > self.lower && self.upper.is_finite()) {
            bail!(SneError::InvalidParameter(format!(
                "bisection upper bound ({}) must exceed the lower bound ({})",
                self.upper, self.lower
            )));
        }
        if !(self.tolerance >= 0.0) {
            bail!(SneError::InvalidParameter(format!(
                "bisection tolerance must be non-negative, got {}",
                self.tolerance
            )));
        }
        if self.max_iter == 0 {
            bail!(SneError::InvalidParameter(
                "bisection needs at least one iteration".to_string()
            ));
        }
        Ok(())
    }
}

/// Outcome of calibrating a single row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration<T> {
    /// Best bandwidth found.
    pub sigma: T,
    /// Perplexity of the row at the last evaluated midpoint.
    pub perplexity: T,
    /// Number of perplexity evaluations.
    pub iterations: usize,
    /// Whether the perplexity came within tolerance of the target.
    pub converged: bool,
}

/// Perplexity `2^H` of a probability vector, `H` being the base-2 entropy.
pub fn perplexity_of<T: FloatOps>(probabilities: ArrayView1<T>) -> T {
    let entropy = probabilities
        .iter()
        .filter(|&&p| p > T::zero())
        .fold(T::zero(), |acc, &p| acc - p * p.log2());
    T::lit(2.0).powf(entropy)
}

/// Perplexity of row `self_index` of a distance matrix at bandwidth `sigma`.
pub fn row_perplexity<T: FloatOps>(distances: ArrayView1<T>, self_index: usize, sigma: T) -> T {
    let affinities = kernel_row(distances, self_index, sigma);
    let total = affinities.sum();
    perplexity_of((affinities / total).view())
}

/// Finds the bandwidth that gives one row the `target` perplexity.
///
/// Bisects `[config.lower, config.upper]`: the midpoint becomes the new upper
/// bound when its perplexity exceeds the target and the new lower bound
/// otherwise. Stops as soon as the perplexity is within `config.tolerance`.
/// Failing to converge is not an error; the last midpoint is returned with
/// `converged == false`. The search also ends early once the midpoint stops
/// moving at floating point resolution, since later iterations could not
/// change the result.
pub fn row_sigma<T: FloatOps>(
    distances: ArrayView1<T>,
    self_index: usize,
    target: T,
    config: &BisectionConfig,
) -> Calibration<T> {
    let two = T::lit(2.0);
    let tolerance = T::lit(config.tolerance);
    let mut lower = T::lit(config.lower);
    let mut upper = T::lit(config.upper);

    let mut sigma = (lower + upper) / two;
    let mut perplexity = T::nan();
    let mut previous: Option<T> = None;

    for iteration in 1..=config.max_iter {
        sigma = (lower + upper) / two;
        if previous == Some(sigma) {
            return Calibration {
                sigma,
                perplexity,
                iterations: iteration - 1,
                converged: false,
            };
        }

        perplexity = row_perplexity(distances, self_index, sigma);
        if perplexity > target {
            upper = sigma;
        } else {
            lower = sigma;
        }

        if (perplexity - target).abs() <= tolerance {
            return Calibration {
                sigma,
                perplexity,
                iterations: iteration,
                converged: true,
            };
        }
        previous = Some(sigma);
    }

    Calibration {
        sigma,
        perplexity,
        iterations: config.max_iter,
        converged: false,
    }
}

/// Calibrates every row of a square distance matrix.
///
/// Rows are dispatched over the rayon pool by index; the output is in row
/// order. Rows that fail to reach the tolerance are logged and kept.
pub fn find_sigmas<T: FloatOps>(
    distances: ArrayView2<T>,
    target: T,
    config: &BisectionConfig,
) -> anyhow::Result<Vec<Calibration<T>>> {
    let n = require_square(distances, "distance matrix")?;
    config.validate()?;
    if !(target > T::zero() && target.is_finite()) {
        bail!(SneError::InvalidParameter(format!(
            "perplexity must be positive and finite, got {}",
            target
        )));
    }

    let calibrations: Vec<Calibration<T>> = (0..n)
        .into_par_iter()
        .map(|i| row_sigma(distances.row(i), i, target, config))
        .collect();

    let unconverged: Vec<usize> = calibrations
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.converged)
        .map(|(i, _)| i)
        .collect();
    if !unconverged.is_empty() {
        warn!(
            "Perplexity calibration did not reach tolerance for {} of {} rows; using best estimates",
            unconverged.len(),
            n
        );
        for &i in unconverged.iter().take(10) {
            let c = &calibrations[i];
            debug!(
                "row {}: sigma {} gives perplexity {} (target {}) after {} steps",
                i, c.sigma, c.perplexity, target, c.iterations
            );
        }
    }

    Ok(calibrations)
}
