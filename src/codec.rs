//! Reading and writing COLMAP sparse models.
//!
//! A model is three files, `cameras`, `images` and `points3D`, stored either as `.txt` or `.bin`.
//! Both encodings implement [Codec] and share [Reconstruction::validate], so a decoded model is
//! always referentially consistent.
//!
//! ```no_run
//! use colmap_subsample::codec::*;
//! use std::path::Path;
//!
//! let (sparse, format) = locate(Path::new("dataset")).unwrap();
//! let reconstruction = read_reconstruction(&sparse, format).unwrap();
//! println!("{}", reconstruction);
//! write_reconstruction(&reconstruction, Path::new("out"), Format::Text).unwrap();
//! ```
extern crate log;
extern crate tempfile;
extern crate thiserror;

pub mod binary;
pub mod text;

use crate::reconstruction::*;

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::{debug, info};
use tempfile::NamedTempFile;

/// One of the three files making up a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Cameras,
    Images,
    Points3d,
}

impl FileKind {
    pub const ALL: [FileKind; 3] = [FileKind::Cameras, FileKind::Images, FileKind::Points3d];

    pub fn stem(self) -> &'static str {
        match self {
            FileKind::Cameras => "cameras",
            FileKind::Images => "images",
            FileKind::Points3d => "points3D",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}

/// Where in a file a decode error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Byte(usize),
    Line(usize),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Byte(b) => write!(f, "byte {}", b),
            Location::Line(l) => write!(f, "line {}", l),
        }
    }
}

fn describe_record(record: &Option<u64>) -> String {
    match record {
        Some(id) => format!(" record {}", id),
        None => String::new(),
    }
}

fn describe_location(location: &Option<Location>) -> String {
    match location {
        Some(l) => format!(" at {}", l),
        None => String::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("no complete COLMAP model (cameras, images, points3D) found in {0}")]
    NotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(
        "corrupt {file}{}{}: {reason}",
        describe_record(.record),
        describe_location(.location)
    )]
    Corrupt {
        file: FileKind,
        record: Option<u64>,
        location: Option<Location>,
        reason: String,
    },
    #[error("inconsistent reconstruction: {0}")]
    Inconsistent(#[from] InvariantViolation),
}

impl DecodeError {
    pub(crate) fn corrupt<S: Into<String>>(
        file: FileKind,
        record: Option<u64>,
        location: Location,
        reason: S,
    ) -> Self {
        DecodeError::Corrupt {
            file,
            record,
            location: Some(location),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl EncodeError {
    fn io(path: &Path, source: io::Error) -> Self {
        EncodeError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Insert a freshly decoded record, rejecting a repeated id.
pub(crate) fn insert_unique<K, V>(
    map: &mut BTreeMap<K, V>,
    id: K,
    value: V,
    file: FileKind,
    location: Location,
) -> Result<(), DecodeError>
where
    K: Ord + Copy + Into<u64>,
{
    match map.entry(id) {
        Entry::Occupied(_) => Err(DecodeError::corrupt(
            file,
            Some(id.into()),
            location,
            "duplicate id",
        )),
        Entry::Vacant(v) => {
            v.insert(value);
            Ok(())
        }
    }
}

/// An encoding of the three model files.
pub trait Codec {
    fn format(&self) -> Format;

    fn decode_cameras(&self, data: &[u8]) -> Result<BTreeMap<CameraId, Camera>, DecodeError>;
    fn decode_images(&self, data: &[u8]) -> Result<BTreeMap<ImageId, Image>, DecodeError>;
    fn decode_points3d(&self, data: &[u8]) -> Result<BTreeMap<Point3dId, Point3d>, DecodeError>;

    fn encode_cameras(&self, r: &Reconstruction, w: &mut dyn Write) -> io::Result<()>;
    fn encode_images(&self, r: &Reconstruction, w: &mut dyn Write) -> io::Result<()>;
    fn encode_points3d(&self, r: &Reconstruction, w: &mut dyn Write) -> io::Result<()>;

    fn encode(&self, kind: FileKind, r: &Reconstruction, w: &mut dyn Write) -> io::Result<()> {
        match kind {
            FileKind::Cameras => self.encode_cameras(r, w),
            FileKind::Images => self.encode_images(r, w),
            FileKind::Points3d => self.encode_points3d(r, w),
        }
    }
}

/// Wire format of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Binary,
}

impl Format {
    pub fn codec(self) -> &'static dyn Codec {
        match self {
            Format::Text => &text::TextCodec,
            Format::Binary => &binary::BinaryCodec,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Text => "txt",
            Format::Binary => "bin",
        }
    }

    pub fn file_name(self, kind: FileKind) -> String {
        format!("{}.{}", kind.stem(), self.extension())
    }

    /// Detect the format of the model stored directly in `dir`. Binary wins when both are
    /// present.
    pub fn detect(dir: &Path) -> Result<Format, DecodeError> {
        [Format::Binary, Format::Text]
            .iter()
            .copied()
            .find(|format| {
                FileKind::ALL
                    .iter()
                    .all(|kind| dir.join(format.file_name(*kind)).is_file())
            })
            .ok_or_else(|| DecodeError::NotFound(dir.to_path_buf()))
    }

    /// Decode an in-memory model and validate it.
    pub fn decode(self, files: &Encoded) -> Result<Reconstruction, DecodeError> {
        let codec = self.codec();
        let r = Reconstruction::new(
            codec.decode_cameras(&files.cameras)?,
            codec.decode_images(&files.images)?,
            codec.decode_points3d(&files.points3d)?,
        );
        r.validate()?;
        Ok(r)
    }

    /// Encode a model into memory.
    pub fn encode(self, r: &Reconstruction) -> Result<Encoded, EncodeError> {
        let codec = self.codec();
        let mut encoded = Encoded::default();
        for kind in FileKind::ALL.iter() {
            let buf = encoded.get_mut(*kind);
            codec
                .encode(*kind, r, buf)
                .map_err(|e| EncodeError::io(Path::new(&self.file_name(*kind)), e))?;
        }
        Ok(encoded)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Text => f.write_str("text"),
            Format::Binary => f.write_str("binary"),
        }
    }
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" | "txt" => Ok(Format::Text),
            "binary" | "bin" => Ok(Format::Binary),
            _ => Err(format!("unknown format {}, expected text or binary", s)),
        }
    }
}

/// Raw contents of the three model files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Encoded {
    pub cameras: Vec<u8>,
    pub images: Vec<u8>,
    pub points3d: Vec<u8>,
}

impl Encoded {
    pub fn get(&self, kind: FileKind) -> &[u8] {
        match kind {
            FileKind::Cameras => &self.cameras,
            FileKind::Images => &self.images,
            FileKind::Points3d => &self.points3d,
        }
    }

    fn get_mut(&mut self, kind: FileKind) -> &mut Vec<u8> {
        match kind {
            FileKind::Cameras => &mut self.cameras,
            FileKind::Images => &mut self.images,
            FileKind::Points3d => &mut self.points3d,
        }
    }
}

/// Find the sparse model of a dataset. Looks in `<root>/sparse/0`, then `<root>/sparse`, then
/// `<root>` itself.
pub fn locate(root: &Path) -> Result<(PathBuf, Format), DecodeError> {
    let candidates = [root.join("sparse").join("0"), root.join("sparse"), root.to_path_buf()];
    for dir in candidates.iter() {
        if let Ok(format) = Format::detect(dir) {
            debug!("found {} model in {}", format, dir.display());
            return Ok((dir.clone(), format));
        }
    }
    Err(DecodeError::NotFound(root.join("sparse").join("0")))
}

/// Read and validate the model stored in `dir`.
pub fn read_reconstruction(dir: &Path, format: Format) -> Result<Reconstruction, DecodeError> {
    let mut files = Encoded::default();
    for kind in FileKind::ALL.iter() {
        let path = dir.join(format.file_name(*kind));
        *files.get_mut(*kind) = fs::read(&path).map_err(|e| DecodeError::Io {
            path: path.clone(),
            source: e,
        })?;
    }
    let r = format.decode(&files)?;
    info!("Read {} from {}", r, dir.display());
    Ok(r)
}

/// Write a model into `dir`, which must exist.
///
/// Every file is first written to a temporary file next to its destination. The temporaries are
/// renamed into place only once all three encoded successfully, so an interrupted write never
/// leaves a truncated model file behind.
pub fn write_reconstruction(
    r: &Reconstruction,
    dir: &Path,
    format: Format,
) -> Result<(), EncodeError> {
    let codec = format.codec();
    let mut staged = Vec::new();
    for kind in FileKind::ALL.iter() {
        let path = dir.join(format.file_name(*kind));
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| EncodeError::io(dir, e))?;
        {
            let mut file = BufWriter::new(tmp.as_file_mut());
            codec
                .encode(*kind, r, &mut file)
                .and_then(|_| file.flush())
                .map_err(|e| EncodeError::io(&path, e))?;
        }
        staged.push((tmp, path));
    }
    for (tmp, path) in staged {
        tmp.persist(&path)
            .map_err(|e| EncodeError::io(&path, e.error))?;
    }
    info!("Wrote {} model to {}", format, dir.display());
    Ok(())
}
