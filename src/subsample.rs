//! The subsampling pipeline: locate, decode, group, select, filter, write.
extern crate itertools;
extern crate log;

use crate::codec::{locate, read_reconstruction, Format};
use crate::filter::filter;
use crate::materialize::{materialize, LinkMode, MaterializeOptions, MaterializeReport};
use crate::ply::PLY_FILE_NAME;
use crate::select::{select, SubsetPolicy};
use crate::shot::{expand, group, Naming, Shots};
use crate::{Error, InputError};

use itertools::Itertools;
use log::info;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct SubsampleOptions {
    pub keep_every: i64,
    pub offset: i64,
    pub naming: Naming,
    /// Output encoding. `None` keeps the source encoding.
    pub format: Option<Format>,
    pub link: LinkMode,
    pub jobs: Option<usize>,
    pub verbose: bool,
    /// Write `points3D.ply` even if the source has none.
    pub ply: bool,
}

impl Default for SubsampleOptions {
    fn default() -> Self {
        SubsampleOptions {
            keep_every: 4,
            offset: 0,
            naming: Naming::default(),
            format: None,
            link: LinkMode::HardLink,
            jobs: None,
            verbose: false,
            ply: false,
        }
    }
}

/// Shot statistics of a set of images.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotStats {
    pub images: usize,
    pub shots: usize,
    pub min_lenses: usize,
    pub max_lenses: usize,
}

impl ShotStats {
    pub fn new(shots: &Shots) -> Self {
        let (min_lenses, max_lenses) = shots
            .values()
            .map(|s| s.len())
            .minmax()
            .into_option()
            .unwrap_or((0, 0));
        ShotStats {
            images: shots.values().map(|s| s.len()).sum(),
            shots: shots.len(),
            min_lenses,
            max_lenses,
        }
    }

    pub fn images_per_shot(&self) -> f64 {
        if self.shots == 0 {
            0.
        } else {
            self.images as f64 / self.shots as f64
        }
    }
}

impl fmt::Display for ShotStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Total images: {}", self.images)?;
        writeln!(f, "  Total shots: {}", self.shots)?;
        if self.min_lenses == self.max_lenses {
            write!(f, "  Images per shot: {}", self.max_lenses)
        } else {
            write!(
                f,
                "  Images per shot: {:.2} ({} to {})",
                self.images_per_shot(),
                self.min_lenses,
                self.max_lenses
            )
        }
    }
}

/// What a subsampling run did.
#[derive(Debug, Clone)]
pub struct Summary {
    pub source: ShotStats,
    pub keep_every: usize,
    pub offset: usize,
    pub selected_shots: usize,
    pub selected_images: usize,
    pub points_before: usize,
    pub points_after: usize,
    pub format: Format,
    pub output: PathBuf,
    pub report: MaterializeReport,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dataset statistics:")?;
        writeln!(f, "{}", self.source)?;
        writeln!(
            f,
            "Subsampling (keep every {} shot, offset {}):",
            self.keep_every, self.offset
        )?;
        writeln!(f, "  Selected shots: {}", self.selected_shots)?;
        writeln!(f, "  Selected images: {}", self.selected_images)?;
        writeln!(
            f,
            "  Points: {} of {}",
            self.points_after, self.points_before
        )?;
        writeln!(f, "Output: {} ({} model)", self.output.display(), self.format)?;
        write!(
            f,
            "Images: {} ({:.0}% of original)",
            self.selected_images,
            100. * self.selected_images as f64 / self.source.images.max(1) as f64
        )
    }
}

/// Checks done before the source model is even read.
fn check_paths(source: &Path, dest: &Path) -> Result<(), InputError> {
    if !source.is_dir() {
        return Err(InputError::SourceNotFound(source.to_path_buf()));
    }
    let images = source.join("images");
    if !images.is_dir() {
        return Err(InputError::MissingImagesDir(images));
    }
    if let (Ok(s), Ok(d)) = (fs::canonicalize(source), fs::canonicalize(dest)) {
        if s == d {
            return Err(InputError::OutputIsSource(dest.to_path_buf()));
        }
    }
    // files from an earlier run would mix with this one
    if dest.symlink_metadata().is_ok() {
        let empty = fs::read_dir(dest)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !empty {
            return Err(InputError::OutputNotEmpty(dest.to_path_buf()));
        }
    }
    Ok(())
}

/// Subsample the dataset at `source` into `dest`.
///
/// Every `keep_every`-th shot is kept, all lenses of a kept shot together. Input problems are
/// reported before `dest` is touched.
pub fn run(source: &Path, dest: &Path, options: &SubsampleOptions) -> Result<Summary, Error> {
    let policy = SubsetPolicy::new(options.keep_every, options.offset)?;
    check_paths(source, dest)?;

    let (sparse, source_format) = locate(source)?;
    let r = read_reconstruction(&sparse, source_format)?;

    let shots = group(r.images.values(), &options.naming);
    let stats = ShotStats::new(&shots);
    let kept_shots = select(shots.keys(), &policy);
    let kept_images = expand(&shots, &kept_shots);
    if kept_images.is_empty() {
        return Err(InputError::EmptySelection.into());
    }
    info!(
        "Keeping {} of {} shots ({} of {} images)",
        kept_shots.len(),
        stats.shots,
        kept_images.len(),
        stats.images
    );

    let filtered = filter(&r, &kept_images)?;

    let format = options.format.unwrap_or(source_format);
    let materialize_options = MaterializeOptions {
        link: options.link,
        jobs: options.jobs,
        verbose: options.verbose,
        ply: options.ply || sparse.join(PLY_FILE_NAME).is_file(),
    };
    let report = materialize(&filtered, format, source, dest, &materialize_options)?;

    Ok(Summary {
        source: stats,
        keep_every: policy.keep_every(),
        offset: policy.offset(),
        selected_shots: kept_shots.len(),
        selected_images: filtered.num_images(),
        points_before: r.num_points(),
        points_after: filtered.num_points(),
        format,
        output: dest.to_path_buf(),
        report,
    })
}
