use anyhow::bail;
use ndarray::{Array2, Axis};

use crate::dimred::sne::SneError;
use crate::utils::{Direction, FloatOps, Normalize};

fn lane_axis(direction: &Direction) -> Axis {
    match direction {
        Direction::ROW => Axis(1),
        Direction::COLUMN => Axis(0),
    }
}

fn lane_name(direction: &Direction) -> &'static str {
    match direction {
        Direction::ROW => "row",
        Direction::COLUMN => "column",
    }
}

impl<T: FloatOps> Normalize<T> for Array2<T> {
    fn lane_sums(&self, direction: &Direction) -> Vec<T> {
        self.sum_axis(lane_axis(direction)).to_vec()
    }

    /// A lane whose sum is zero, negative or not finite cannot be rescaled and
    /// is reported as [`SneError::NumericDegeneracy`] with its index.
    fn normalize(&mut self, sums: &[T], target: T, direction: &Direction) -> anyhow::Result<()> {
        let axis = lane_axis(direction);
        let lanes = self.len_of(Axis(1 - axis.index()));
        if sums.len() != lanes {
            bail!(SneError::Shape(format!(
                "got {} sums for {} {}s",
                sums.len(),
                lanes,
                lane_name(direction)
            )));
        }
        if let Some(i) = sums.iter().position(|s| !s.is_finite() || *s <= T::zero()) {
            bail!(SneError::NumericDegeneracy(format!(
                "{} {} sums to {}",
                lane_name(direction),
                i,
                sums[i]
            )));
        }

        for (mut lane, &sum) in self.lanes_mut(axis).into_iter().zip(sums) {
            lane *= target / sum;
        }
        Ok(())
    }
}
