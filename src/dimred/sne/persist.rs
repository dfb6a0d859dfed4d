//! On-disk storage for the high-dimensional joint probability matrix.
//!
//! P is the only expensive, reusable artefact of a fit. The file holds a
//! single keyed field `P` encoded with bincode, which restores every float
//! bit for bit.

use std::error::Error;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::bail;
use log::info;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::SneError;
use crate::utils::FloatOps;

#[derive(Serialize)]
struct JointProbabilitiesRef<'a, T: FloatOps> {
    #[serde(rename = "P")]
    p: &'a Array2<T>,
}

#[derive(Deserialize)]
#[serde(bound = "T: FloatOps")]
struct JointProbabilitiesFile<T: FloatOps> {
    #[serde(rename = "P")]
    p: Array2<T>,
}

fn storage_error(
    path: &Path,
    source: impl Into<Box<dyn Error + Send + Sync>>,
) -> anyhow::Error {
    SneError::Storage {
        path: path.to_path_buf(),
        source: source.into(),
    }
    .into()
}

/// Writes `p` to `path`, replacing any existing file.
///
/// # Errors
/// [`SneError::Storage`] if the file cannot be created or written.
pub fn save_joint_probabilities<T: FloatOps>(
    path: impl AsRef<Path>,
    p: &Array2<T>,
) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|e| storage_error(path, e))?;
    let mut writer = BufWriter::new(file);

    bincode::serialize_into(&mut writer, &JointProbabilitiesRef { p })
        .map_err(|e| storage_error(path, e))?;
    writer.flush().map_err(|e| storage_error(path, e))?;

    info!(
        "Saved {} x {} joint probabilities to {}",
        p.nrows(),
        p.ncols(),
        path.display()
    );
    Ok(())
}

/// Reads a joint probability matrix written by [`save_joint_probabilities`].
///
/// Only checks that the stored matrix is square; matching it against a data
/// set is the caller's job.
///
/// # Errors
/// - [`SneError::Storage`] if the file is missing, unreadable or corrupt.
/// - [`SneError::Shape`] if the stored matrix is not square.
pub fn load_joint_probabilities<T: FloatOps>(path: impl AsRef<Path>) -> anyhow::Result<Array2<T>> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| storage_error(path, e))?;

    let stored: JointProbabilitiesFile<T> =
        bincode::deserialize_from(BufReader::new(file)).map_err(|e| storage_error(path, e))?;
    let p = stored.p;
    if p.nrows() != p.ncols() {
        bail!(SneError::Shape(format!(
            "stored joint probabilities in {} are {} x {}, expected a square matrix",
            path.display(),
            p.nrows(),
            p.ncols()
        )));
    }

    info!(
        "Loaded {} x {} joint probabilities from {}",
        p.nrows(),
        p.ncols(),
        path.display()
    );
    Ok(p)
}
