//! Subsampling of COLMAP reconstructions.
//!
//! A dataset is an `images/` directory plus a sparse model. Images are grouped into shots (all
//! lenses of a rig firing at once), every n-th shot is kept, and the model is restricted to the
//! kept images so the result is again a consistent dataset.
extern crate byteorder;
extern crate cgmath;
extern crate indicatif;
extern crate itertools;
extern crate log;
extern crate nom;
extern crate ply_rs;
extern crate rayon;
extern crate tempfile;
extern crate thiserror;

pub mod codec;
pub mod filter;
pub mod materialize;
pub mod ply;
pub mod reconstruction;
pub mod select;
pub mod shot;
pub mod subsample;

pub use codec::{DecodeError, EncodeError, Format};
pub use materialize::MaterializeError;
pub use reconstruction::*;
pub use select::SubsetPolicy;
pub use shot::{LensSuffix, Naming, ShotNaming, WholeStem};
pub use subsample::{run, SubsampleOptions, Summary};

use std::path::PathBuf;

/// Bad user input, detected before anything is written.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("keep-every must be positive, got {0}")]
    NonPositiveStride(i64),
    #[error("offset must not be negative, got {0}")]
    NegativeOffset(i64),
    #[error("source directory {0} does not exist")]
    SourceNotFound(PathBuf),
    #[error("source has no images directory at {0}")]
    MissingImagesDir(PathBuf),
    #[error("output {0} is the source directory")]
    OutputIsSource(PathBuf),
    #[error("output {0} already exists and is not an empty directory")]
    OutputNotEmpty(PathBuf),
    #[error("no images selected")]
    EmptySelection,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Input(#[from] InputError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    #[error("internal error, filtered reconstruction is inconsistent: {0}")]
    Internal(#[from] InvariantViolation),
}

impl Error {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Input(_) => 2,
            Error::Decode(_) | Error::Encode(_) | Error::Materialize(_) => 1,
            Error::Internal(_) => 70,
        }
    }
}

#[test]
fn test_exit_codes() {
    assert_eq!(Error::from(InputError::EmptySelection).exit_code(), 2);
    assert_eq!(
        Error::from(DecodeError::NotFound(PathBuf::from("x"))).exit_code(),
        1
    );
    let violation = InvariantViolation {
        entity: Entity::Point3d,
        id: 4,
        invariant: Invariant::EmptyTrack,
    };
    assert_eq!(Error::from(violation).exit_code(), 70);
}
