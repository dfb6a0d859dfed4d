use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::{AddAssign, DivAssign, MulAssign, SubAssign};

use ndarray::{LinalgScalar, ScalarOperand};
use num_traits::{Float, FromPrimitive, ToPrimitive};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Scalar types the embedding code runs on.
///
/// Bundles the arithmetic, ndarray and serde bounds every stage of the pipeline
/// needs, so the public functions can stay generic over `f32` and `f64`
/// without repeating a dozen trait bounds each time.
pub trait FloatOps:
    Float
    + FromPrimitive
    + ToPrimitive
    + LinalgScalar
    + ScalarOperand
    + Sum
    + AddAssign
    + SubAssign
    + MulAssign
    + DivAssign
    + Debug
    + Display
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + 'static
{
    /// Casts an `f64` constant into this type, rounding where needed.
    fn lit(value: f64) -> Self;
}

impl FloatOps for f64 {
    #[inline]
    fn lit(value: f64) -> Self {
        value
    }
}

impl FloatOps for f32 {
    #[inline]
    fn lit(value: f64) -> Self {
        value as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ROW,
    COLUMN,
}

pub trait Normalize<T: FloatOps> {
    /// Sum of every row (or column).
    fn lane_sums(&self, direction: &Direction) -> Vec<T>;

    /// Scales every row (or column) so that it sums to `target`, given the
    /// current sums of each lane.
    fn normalize(&mut self, sums: &[T], target: T, direction: &Direction) -> anyhow::Result<()>;

    fn normalize_to(&mut self, target: T, direction: &Direction) -> anyhow::Result<()> {
        let sums = self.lane_sums(direction);
        self.normalize(&sums, target, direction)
    }
}
