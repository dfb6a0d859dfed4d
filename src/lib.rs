pub mod dense;
pub mod dimred;
mod utils;

pub use utils::Direction;
pub use utils::FloatOps;
pub use utils::Normalize;

pub use dimred::sne::{
    JointProbabilitySource, SneEmbedding, SneError, SymmetricSne, SymmetricSneBuilder,
};
