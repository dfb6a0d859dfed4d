//! # Symmetric Stochastic Neighbour Embedding
//!
//! Embeds a dense `samples × features` matrix into a low-dimensional space
//! (two dimensions by default) so that pairwise neighbourhood probabilities
//! are preserved.
//!
//! The pipeline is:
//! 1. negative squared Euclidean distances of the input ([`distance`])
//! 2. a per-point bandwidth matching the target perplexity ([`perplexity`])
//! 3. the symmetric joint probability matrix P ([`probability`])
//! 4. momentum gradient descent on the embedding, recomputing Q and the
//!    gradient every iteration ([`probability`], [`gradient`])
//!
//! P can be stored with [`persist`] and supplied again for later fits on the
//! same data.
//!
//! ```no_run
//! use ndarray::Array2;
//! use single_sne::dimred::sne::{JointProbabilitySource, SymmetricSneBuilder};
//!
//! let x = Array2::<f64>::zeros((100, 64));
//! let sne = SymmetricSneBuilder::new().perplexity(30.0).build()?;
//! let y = sne.fit_transform(x.view(), JointProbabilitySource::fresh())?;
//! assert_eq!(y.dim(), (100, 2));
//! # Ok::<(), anyhow::Error>(())
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::bail;
use log::info;
use ndarray::{Array2, ArrayView2, ArrayViewD, Ix2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;

use crate::utils::FloatOps;

pub mod distance;
pub mod gradient;
mod optimiser;
pub mod persist;
pub mod perplexity;
pub mod probability;

pub use distance::neg_squared_euclidean;
pub use gradient::{kl_divergence, sne_gradient, tsne_gradient};
pub use persist::{load_joint_probabilities, save_joint_probabilities};
pub use perplexity::{
    find_sigmas, perplexity_of, row_perplexity, row_sigma, BisectionConfig, Calibration,
};
pub use probability::{
    conditional_probabilities, embedding_affinities, joint_probabilities, symmetrize,
    EmbeddingAffinities, LowDimKernel,
};

use optimiser::{descend, DescentSettings};

/// Failure modes of the embedding pipeline.
///
/// Functions return `anyhow::Result`; the concrete variant can be recovered
/// with `err.downcast_ref::<SneError>()`.
#[derive(Debug, Error)]
pub enum SneError {
    /// Empty or non two-dimensional input, fewer than two samples, or matrices
    /// whose dimensions do not line up.
    #[error("shape error: {0}")]
    Shape(String),
    /// Non-finite input, or a probability normaliser that is zero or not finite.
    #[error("numeric degeneracy: {0}")]
    NumericDegeneracy(String),
    /// A stored P could not be read or written.
    #[error("storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Where the high-dimensional joint probabilities come from.
#[derive(Debug, Clone)]
pub enum JointProbabilitySource<T: FloatOps> {
    /// Compute P from the data with the configured perplexity, optionally
    /// writing it to `persist_to` before optimising.
    Fresh { persist_to: Option<PathBuf> },
    /// Use a P that is already in memory.
    Precomputed(Array2<T>),
    /// Load P from a file written by [`save_joint_probabilities`].
    Stored(PathBuf),
}

impl<T: FloatOps> JointProbabilitySource<T> {
    pub fn fresh() -> Self {
        Self::Fresh { persist_to: None }
    }

    pub fn fresh_persisted(path: impl Into<PathBuf>) -> Self {
        Self::Fresh {
            persist_to: Some(path.into()),
        }
    }
}

/// Result of [`SymmetricSne::fit`].
#[derive(Debug, Clone)]
pub struct SneEmbedding<T: FloatOps> {
    /// `samples × n_components` coordinates.
    pub embedding: Array2<T>,
    /// The joint probability matrix the embedding was fitted against.
    pub joint_probabilities: Array2<T>,
    /// Number of gradient steps taken.
    pub iterations: usize,
    /// `true` if the time budget ended the loop before `max_iters`.
    pub stopped_early: bool,
    /// KL(P || Q) of the final embedding.
    pub kl_divergence: T,
    /// `(steps taken, KL(P || Q))` every `log_every` iterations.
    pub kl_history: Vec<(usize, T)>,
}

/// Draws the starting embedding from `N(0, std²)` with a seeded ChaCha8 stream.
pub fn initial_embedding<T: FloatOps>(
    n_samples: usize,
    n_components: usize,
    std: T,
    seed: u64,
) -> anyhow::Result<Array2<T>> {
    let std = std.to_f64().unwrap_or(f64::NAN);
    let normal = Normal::new(0.0, std).map_err(|e| {
        SneError::InvalidParameter(format!(
            "initial standard deviation {} is not usable: {}",
            std, e
        ))
    })?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Ok(Array2::from_shape_fn((n_samples, n_components), |_| {
        T::lit(normal.sample(&mut rng))
    }))
}

pub struct SymmetricSneBuilder<T: FloatOps> {
    perplexity: T,
    max_iters: usize,
    learning_rate: T,
    momentum: T,
    seed: u64,
    n_components: usize,
    init_std: T,
    kernel: LowDimKernel,
    bisection: BisectionConfig,
    time_budget: Option<Duration>,
    log_every: usize,
}

impl<T: FloatOps> Default for SymmetricSneBuilder<T> {
    fn default() -> Self {
        Self {
            perplexity: T::lit(40.0),
            max_iters: 500,
            learning_rate: T::lit(10.0),
            momentum: T::lit(0.9),
            seed: 1,
            n_components: 2,
            init_std: T::lit(1e-4),
            kernel: LowDimKernel::Gaussian,
            bisection: BisectionConfig::default(),
            time_budget: None,
            log_every: 50,
        }
    }
}

impl<T: FloatOps> SymmetricSneBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn perplexity(mut self, perplexity: T) -> Self {
        self.perplexity = perplexity;
        self
    }

    pub fn max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn learning_rate(mut self, learning_rate: T) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Momentum coefficient; zero disables momentum.
    pub fn momentum(mut self, momentum: T) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn n_components(mut self, n_components: usize) -> Self {
        self.n_components = n_components;
        self
    }

    /// Standard deviation of the Gaussian the embedding is initialised from.
    pub fn init_std(mut self, init_std: T) -> Self {
        self.init_std = init_std;
        self
    }

    pub fn kernel(mut self, kernel: LowDimKernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn bisection(mut self, bisection: BisectionConfig) -> Self {
        self.bisection = bisection;
        self
    }

    /// Wall-clock limit checked between iterations.
    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// How often to log the divergence while optimising; 0 disables it.
    pub fn log_every(mut self, log_every: usize) -> Self {
        self.log_every = log_every;
        self
    }

    pub fn build(self) -> anyhow::Result<SymmetricSne<T>> {
        let positive = |v: T| v > T::zero() && v.is_finite();
        if !positive(self.perplexity) {
            bail!(SneError::InvalidParameter(format!(
                "perplexity must be positive, got {}",
                self.perplexity
            )));
        }
        if !positive(self.learning_rate) {
            bail!(SneError::InvalidParameter(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.momentum >= T::zero() && self.momentum < T::one()) {
            bail!(SneError::InvalidParameter(format!(
                "momentum must lie in [0, 1), got {}",
                self.momentum
            )));
        }
        if !positive(self.init_std) {
            bail!(SneError::InvalidParameter(format!(
                "initial standard deviation must be positive, got {}",
                self.init_std
            )));
        }
        if self.n_components == 0 {
            bail!(SneError::InvalidParameter(
                "the embedding needs at least one component".to_string()
            ));
        }
        self.bisection.validate()?;

        Ok(SymmetricSne {
            perplexity: self.perplexity,
            max_iters: self.max_iters,
            learning_rate: self.learning_rate,
            momentum: self.momentum,
            seed: self.seed,
            n_components: self.n_components,
            init_std: self.init_std,
            kernel: self.kernel,
            bisection: self.bisection,
            time_budget: self.time_budget,
            log_every: self.log_every,
        })
    }
}

/// A validated symmetric SNE configuration.
///
/// Fitting does not mutate the estimator, so one instance can embed several
/// data sets.
#[derive(Debug, Clone)]
pub struct SymmetricSne<T: FloatOps> {
    perplexity: T,
    max_iters: usize,
    learning_rate: T,
    momentum: T,
    seed: u64,
    n_components: usize,
    init_std: T,
    kernel: LowDimKernel,
    bisection: BisectionConfig,
    time_budget: Option<Duration>,
    log_every: usize,
}

impl<T: FloatOps> SymmetricSne<T> {
    pub fn builder() -> SymmetricSneBuilder<T> {
        SymmetricSneBuilder::new()
    }

    /// Embeds `x` and reports how the optimisation went.
    ///
    /// All validation happens before the first gradient step: the input
    /// must be non-empty, finite and have at least two samples, and a supplied
    /// P must be `n_samples × n_samples`.
    ///
    /// # Errors
    /// [`SneError::Shape`], [`SneError::NumericDegeneracy`] or
    /// [`SneError::Storage`] depending on what was wrong; see the variants.
    pub fn fit(
        &self,
        x: ArrayView2<T>,
        source: JointProbabilitySource<T>,
    ) -> anyhow::Result<SneEmbedding<T>> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            bail!(SneError::Shape(format!(
                "input matrix is empty ({} x {})",
                n_samples, n_features
            )));
        }
        if n_samples < 2 {
            bail!(SneError::Shape("need at least two samples to embed".to_string()));
        }
        if x.iter().any(|v| !v.is_finite()) {
            bail!(SneError::NumericDegeneracy(
                "input matrix contains NaN or infinite values".to_string()
            ));
        }

        let p = self.resolve_joint_probabilities(x, source)?;
        let initial = initial_embedding(n_samples, self.n_components, self.init_std, self.seed)?;

        info!(
            "Optimising a {}-dimensional embedding of {} samples for {} iterations",
            self.n_components, n_samples, self.max_iters
        );
        let settings = DescentSettings {
            max_iters: self.max_iters,
            learning_rate: self.learning_rate,
            momentum: (self.momentum > T::zero()).then_some(self.momentum),
            kernel: self.kernel,
            time_budget: self.time_budget,
            log_every: self.log_every,
        };
        let outcome = descend(p.view(), initial, &settings)?;

        let affinities = embedding_affinities(outcome.embedding.view(), self.kernel)?;
        let kl = kl_divergence(p.view(), affinities.q.view())?;
        info!(
            "Finished after {} iterations, KL(P || Q) = {}",
            outcome.iterations, kl
        );

        Ok(SneEmbedding {
            embedding: outcome.embedding,
            joint_probabilities: p,
            iterations: outcome.iterations,
            stopped_early: outcome.stopped_early,
            kl_divergence: kl,
            kl_history: outcome.kl_history,
        })
    }

    /// Embeds `x` and returns only the `samples × n_components` coordinates.
    pub fn fit_transform(
        &self,
        x: ArrayView2<T>,
        source: JointProbabilitySource<T>,
    ) -> anyhow::Result<Array2<T>> {
        Ok(self.fit(x, source)?.embedding)
    }

    /// Same as [`fit_transform`](Self::fit_transform) for dynamically shaped
    /// input, which must be two-dimensional.
    pub fn fit_transform_dyn(
        &self,
        x: ArrayViewD<T>,
        source: JointProbabilitySource<T>,
    ) -> anyhow::Result<Array2<T>> {
        if x.ndim() != 2 {
            bail!(SneError::Shape(format!(
                "input has to be two dimensional, got shape {:?}",
                x.shape()
            )));
        }
        let x = x
            .into_dimensionality::<Ix2>()
            .map_err(|e| SneError::Shape(e.to_string()))?;
        self.fit_transform(x, source)
    }

    fn resolve_joint_probabilities(
        &self,
        x: ArrayView2<T>,
        source: JointProbabilitySource<T>,
    ) -> anyhow::Result<Array2<T>> {
        let n_samples = x.nrows();
        match source {
            JointProbabilitySource::Fresh { persist_to } => {
                info!("Pre-computed probabilities not provided. Computing joint probabilities...");
                let p = joint_probabilities(x, self.perplexity, &self.bisection)?;
                if let Some(path) = persist_to {
                    save_joint_probabilities(&path, &p)?;
                }
                Ok(p)
            }
            JointProbabilitySource::Precomputed(p) => {
                check_supplied(&p, n_samples)?;
                Ok(p)
            }
            JointProbabilitySource::Stored(path) => {
                let p = load_joint_probabilities(&path)?;
                check_supplied(&p, n_samples)?;
                Ok(p)
            }
        }
    }

    pub fn perplexity(&self) -> T {
        self.perplexity
    }

    pub fn max_iters(&self) -> usize {
        self.max_iters
    }

    pub fn learning_rate(&self) -> T {
        self.learning_rate
    }

    pub fn momentum(&self) -> T {
        self.momentum
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn n_components(&self) -> usize {
        self.n_components
    }

    pub fn kernel(&self) -> LowDimKernel {
        self.kernel
    }
}

fn check_supplied<T: FloatOps>(p: &Array2<T>, n_samples: usize) -> anyhow::Result<()> {
    if p.dim() != (n_samples, n_samples) {
        bail!(SneError::Shape(format!(
            "joint probabilities are {} x {} but the input has {} samples",
            p.nrows(),
            p.ncols(),
            n_samples
        )));
    }
    if p.iter().any(|v| !v.is_finite() || *v < T::zero()) {
        bail!(SneError::NumericDegeneracy(
            "joint probabilities contain negative or non-finite entries".to_string()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3};
    use tempfile::TempDir;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    /// Two tight pairs far apart in five dimensions.
    fn four_point_clusters() -> Array2<f64> {
        array![
            [0.0, 0.0, 0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0, 0.0, 0.0],
            [100.0, 100.0, 100.0, 0.0, 0.0],
            [101.0, 100.0, 100.0, 0.0, 0.0],
        ]
    }

    fn distance(y: &Array2<f64>, i: usize, j: usize) -> f64 {
        let diff = &y.row(i) - &y.row(j);
        diff.dot(&diff).sqrt()
    }

    fn small_sne(momentum: f64, max_iters: usize) -> SymmetricSne<f64> {
        SymmetricSneBuilder::new()
            .perplexity(2.0)
            .momentum(momentum)
            .learning_rate(1.0)
            .max_iters(max_iters)
            .log_every(25)
            .build()
            .unwrap()
    }

    fn assert_clusters_separated(y: &Array2<f64>) {
        let within = distance(y, 0, 1).max(distance(y, 2, 3));
        let across = [(0, 2), (0, 3), (1, 2), (1, 3)]
            .iter()
            .map(|&(i, j)| distance(y, i, j))
            .fold(f64::INFINITY, f64::min);
        assert!(
            within < across,
            "within-cluster distance {} not below cross-cluster distance {}",
            within,
            across
        );
    }

    #[test]
    fn test_builder_defaults() {
        let sne = SymmetricSne::<f64>::builder().build().unwrap();
        assert_eq!(sne.perplexity(), 40.0);
        assert_eq!(sne.max_iters(), 500);
        assert_eq!(sne.learning_rate(), 10.0);
        assert_eq!(sne.momentum(), 0.9);
        assert_eq!(sne.seed(), 1);
        assert_eq!(sne.n_components(), 2);
        assert_eq!(sne.kernel(), LowDimKernel::Gaussian);
    }

    #[test]
    fn test_builder_rejects_invalid_parameters() {
        let cases = [
            SymmetricSneBuilder::<f64>::new().perplexity(0.0),
            SymmetricSneBuilder::new().learning_rate(-1.0),
            SymmetricSneBuilder::new().learning_rate(f64::NAN),
            SymmetricSneBuilder::new().momentum(1.0),
            SymmetricSneBuilder::new().momentum(-0.1),
            SymmetricSneBuilder::new().init_std(0.0),
            SymmetricSneBuilder::new().n_components(0),
            SymmetricSneBuilder::new().bisection(BisectionConfig {
                max_iter: 0,
                ..BisectionConfig::default()
            }),
        ];
        for builder in cases {
            let err = builder.build().unwrap_err();
            assert!(matches!(
                err.downcast_ref::<SneError>(),
                Some(SneError::InvalidParameter(_))
            ));
        }
    }

    #[test]
    fn test_initial_embedding_is_seeded_and_small() {
        let a: Array2<f64> = initial_embedding(50, 2, 1e-4, 1).unwrap();
        let b: Array2<f64> = initial_embedding(50, 2, 1e-4, 1).unwrap();
        let c: Array2<f64> = initial_embedding(50, 2, 1e-4, 2).unwrap();

        assert_eq!(a.dim(), (50, 2));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.iter().all(|v| v.abs() < 1e-2));
        assert!(a.iter().any(|v| *v != 0.0));
    }

    #[test]
    fn test_two_clusters_stay_separated() {
        init_logging();
        let x = four_point_clusters();
        let sne = small_sne(0.0, 200);

        let y = sne
            .fit_transform(x.view(), JointProbabilitySource::fresh())
            .unwrap();

        assert_eq!(y.dim(), (4, 2));
        assert_clusters_separated(&y);
    }

    #[test]
    fn test_same_seed_same_embedding() {
        let x = four_point_clusters();
        let sne = small_sne(0.9, 100);

        let first = sne
            .fit_transform(x.view(), JointProbabilitySource::fresh())
            .unwrap();
        let second = sne
            .fit_transform(x.view(), JointProbabilitySource::fresh())
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_divergence_drops_with_and_without_momentum() {
        init_logging();
        let x = four_point_clusters();

        for momentum in [0.0, 0.9] {
            let sne = small_sne(momentum, 500);
            let fit = sne.fit(x.view(), JointProbabilitySource::fresh()).unwrap();

            let start = initial_embedding(4, 2, 1e-4, 1).unwrap();
            let q0 = embedding_affinities(start.view(), LowDimKernel::Gaussian)
                .unwrap()
                .q;
            let kl_start = kl_divergence(fit.joint_probabilities.view(), q0.view()).unwrap();

            assert_eq!(fit.iterations, 500);
            assert!(!fit.stopped_early);
            assert!(
                fit.kl_divergence < kl_start,
                "momentum {}: KL went from {} to {}",
                momentum,
                kl_start,
                fit.kl_divergence
            );
            assert_clusters_separated(&fit.embedding);
        }
    }

    #[test]
    fn test_large_step_divergence_is_reported() {
        init_logging();
        let x = four_point_clusters();
        let sne = SymmetricSneBuilder::new()
            .perplexity(2.0)
            .momentum(0.0)
            .learning_rate(10.0)
            .max_iters(200)
            .build()
            .unwrap();

        // with four points a step of 10 overshoots the tight pairs every iteration
        let err = sne.fit(x.view(), JointProbabilitySource::fresh()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SneError>(),
            Some(SneError::NumericDegeneracy(_))
        ));
    }

    #[test]
    fn test_kl_history_follows_log_every() {
        let x = four_point_clusters();
        let fit = small_sne(0.9, 100)
            .fit(x.view(), JointProbabilitySource::fresh())
            .unwrap();

        let steps: Vec<usize> = fit.kl_history.iter().map(|&(k, _)| k).collect();
        assert_eq!(steps, vec![0, 25, 50, 75]);
        assert!(fit.kl_history.iter().all(|(_, kl)| kl.is_finite()));
        assert!(fit.kl_history[3].1 < fit.kl_history[0].1);
    }

    #[test]
    fn test_student_t_kernel_separates_clusters() {
        let x = four_point_clusters();
        let sne = SymmetricSneBuilder::new()
            .perplexity(2.0)
            .momentum(0.0)
            .learning_rate(10.0)
            .max_iters(200)
            .kernel(LowDimKernel::StudentT)
            .build()
            .unwrap();

        let y = sne
            .fit_transform(x.view(), JointProbabilitySource::fresh())
            .unwrap();

        assert_clusters_separated(&y);
    }

    #[test]
    fn test_three_components() {
        let x = four_point_clusters();
        let sne = SymmetricSneBuilder::new()
            .perplexity(2.0)
            .learning_rate(1.0)
            .max_iters(20)
            .n_components(3)
            .build()
            .unwrap();

        let y = sne
            .fit_transform(x.view(), JointProbabilitySource::fresh())
            .unwrap();
        assert_eq!(y.dim(), (4, 3));
    }

    #[test]
    fn test_single_sample_rejected() {
        let x = array![[1.0, 2.0, 3.0]];
        let sne = SymmetricSne::<f64>::builder().build().unwrap();

        let err = sne
            .fit_transform(x.view(), JointProbabilitySource::fresh())
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<SneError>(), Some(SneError::Shape(_))));
    }

    #[test]
    fn test_empty_input_rejected() {
        let x = Array2::<f64>::zeros((0, 4));
        let sne = SymmetricSne::<f64>::builder().build().unwrap();

        let err = sne.fit(x.view(), JointProbabilitySource::fresh()).unwrap_err();
        assert!(matches!(err.downcast_ref::<SneError>(), Some(SneError::Shape(_))));
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let mut x = four_point_clusters();
        x[[2, 1]] = f64::INFINITY;
        let sne = small_sne(0.0, 10);

        let err = sne.fit(x.view(), JointProbabilitySource::fresh()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SneError>(),
            Some(SneError::NumericDegeneracy(_))
        ));
    }

    #[test]
    fn test_dyn_input_must_be_two_dimensional() {
        let sne = small_sne(0.0, 10);

        let cube = Array3::<f64>::zeros((4, 2, 2));
        let err = sne
            .fit_transform_dyn(cube.view().into_dyn(), JointProbabilitySource::fresh())
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<SneError>(), Some(SneError::Shape(_))));

        let x = four_point_clusters();
        let y = sne
            .fit_transform_dyn(x.view().into_dyn(), JointProbabilitySource::fresh())
            .unwrap();
        assert_eq!(y.dim(), (4, 2));
    }

    #[test]
    fn test_precomputed_matches_fresh() {
        let x = four_point_clusters();
        let sne = small_sne(0.9, 50);

        let fresh = sne.fit(x.view(), JointProbabilitySource::fresh()).unwrap();
        let reused = sne
            .fit(
                x.view(),
                JointProbabilitySource::Precomputed(fresh.joint_probabilities.clone()),
            )
            .unwrap();

        assert_eq!(fresh.embedding, reused.embedding);
    }

    #[test]
    fn test_precomputed_shape_mismatch() {
        let x = four_point_clusters();
        let sne = small_sne(0.0, 10);
        let p = Array2::<f64>::from_elem((3, 3), 1.0 / 6.0);

        let err = sne
            .fit(x.view(), JointProbabilitySource::Precomputed(p))
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<SneError>(), Some(SneError::Shape(_))));
    }

    #[test]
    fn test_persisted_p_is_reused() {
        init_logging();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clusters_P.bin");
        let x = four_point_clusters();
        let sne = small_sne(0.9, 50);

        let fresh = sne
            .fit(x.view(), JointProbabilitySource::fresh_persisted(&path))
            .unwrap();
        assert!(path.exists());

        let stored: Array2<f64> = load_joint_probabilities(&path).unwrap();
        assert_eq!(stored, fresh.joint_probabilities);
        assert_abs_diff_eq!(stored.sum(), 1.0, epsilon = 1e-6);

        let reloaded = sne
            .fit(x.view(), JointProbabilitySource::Stored(path.clone()))
            .unwrap();
        assert_eq!(fresh.embedding, reloaded.embedding);
    }

    #[test]
    fn test_stored_p_for_other_data_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other_P.bin");
        let other = Array2::<f64>::from_elem((6, 6), 1.0 / 30.0);
        save_joint_probabilities(&path, &other).unwrap();

        let x = four_point_clusters();
        let err = small_sne(0.0, 10)
            .fit(x.view(), JointProbabilitySource::Stored(path))
            .unwrap_err();
        assert!(matches!(err.downcast_ref::<SneError>(), Some(SneError::Shape(_))));
    }

    #[test]
    fn test_missing_stored_p_is_not_recomputed() {
        let dir = TempDir::new().unwrap();
        let x = four_point_clusters();

        let err = small_sne(0.0, 10)
            .fit(
                x.view(),
                JointProbabilitySource::Stored(dir.path().join("nope.bin")),
            )
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SneError>(),
            Some(SneError::Storage { .. })
        ));
    }

    #[test]
    fn test_time_budget_ends_fit_early() {
        let x = four_point_clusters();
        let sne = SymmetricSneBuilder::new()
            .perplexity(2.0)
            .learning_rate(1.0)
            .max_iters(10_000)
            .time_budget(Duration::ZERO)
            .build()
            .unwrap();

        let fit = sne.fit(x.view(), JointProbabilitySource::fresh()).unwrap();

        assert!(fit.stopped_early);
        assert_eq!(fit.iterations, 0);
        assert_eq!(fit.embedding, initial_embedding(4, 2, 1e-4, 1).unwrap());
    }

    #[test]
    fn test_f32_fit() {
        let x = four_point_clusters().mapv(|v| v as f32);
        let sne = SymmetricSneBuilder::<f32>::new()
            .perplexity(2.0)
            .learning_rate(1.0)
            .momentum(0.0)
            .max_iters(200)
            .build()
            .unwrap();

        let y = sne
            .fit_transform(x.view(), JointProbabilitySource::fresh())
            .unwrap();
        assert_clusters_separated(&y.mapv(|v| v as f64));
    }
}
