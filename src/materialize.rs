//! Writing a subsampled dataset to disk.
extern crate indicatif;
extern crate log;
extern crate rayon;
extern crate thiserror;

use crate::codec::{write_reconstruction, EncodeError, Format};
use crate::ply::{write_points_ply, PLY_FILE_NAME};
use crate::reconstruction::Reconstruction;

use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use rayon::prelude::*;

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Component, Path, PathBuf};

/// How image files get into the destination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkMode {
    /// Hard link, copying when the destination is on another filesystem.
    HardLink,
    Copy,
}

#[derive(Debug, Clone)]
pub struct MaterializeOptions {
    pub link: LinkMode,
    /// Worker threads for file transfer. `None` uses the global rayon pool.
    pub jobs: Option<usize>,
    /// Show a progress bar.
    pub verbose: bool,
    /// Also write `sparse/0/points3D.ply`.
    pub ply: bool,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        MaterializeOptions {
            link: LinkMode::HardLink,
            jobs: None,
            verbose: false,
            ply: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterializeReport {
    pub linked: usize,
    pub copied: usize,
    pub sparse_dir: PathBuf,
    pub ply: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("{} retained image(s) missing from the source: {}", .0.len(), .0.join(", "))]
    MissingAsset(Vec<String>),
    #[error("image name {0} leaves the images directory")]
    InvalidName(String),
    #[error("more than one retained image is named {0}")]
    DuplicateName(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("could not start worker threads: {0}")]
    ThreadPool(String),
}

fn io_error(path: &Path) -> impl Fn(io::Error) -> MaterializeError + '_ {
    move |source| MaterializeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub(crate) fn progress_bar(length: u64, message: &str, verbose: bool) -> ProgressBar {
    if !verbose {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(length);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40}] {pos}/{len} ({eta})")
            .progress_chars("#-"),
    );
    pb.set_message(message);
    pb
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Transfer {
    Linked,
    Copied,
}

/// Copy into a file that must not exist yet, so an existing hard link to the source is never
/// written through.
fn copy_new(from: &Path, to: &Path) -> io::Result<u64> {
    let mut source = File::open(from)?;
    let mut dest = OpenOptions::new().write(true).create_new(true).open(to)?;
    io::copy(&mut source, &mut dest)
}

fn transfer(from: &Path, to: &Path, mode: LinkMode) -> Result<Transfer, MaterializeError> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(io_error(parent))?;
    }
    if to.symlink_metadata().is_ok() {
        fs::remove_file(to).map_err(io_error(to))?;
    }
    if mode == LinkMode::HardLink {
        match fs::hard_link(from, to) {
            Ok(()) => return Ok(Transfer::Linked),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(io_error(to)(e)),
            Err(e) => debug!("hard link {} failed ({}), copying", to.display(), e),
        }
    }
    copy_new(from, to).map_err(io_error(to))?;
    Ok(Transfer::Copied)
}

/// Write `r` and the images it references into `dest_root`.
///
/// Images are read from `<source_root>/images/<name>`. All of them are checked before anything
/// is created, so a missing file leaves the destination untouched. The model goes to
/// `<dest_root>/sparse/0` in `format`.
pub fn materialize(
    r: &Reconstruction,
    format: Format,
    source_root: &Path,
    dest_root: &Path,
    options: &MaterializeOptions,
) -> Result<MaterializeReport, MaterializeError> {
    let source_images = source_root.join("images");
    let dest_images = dest_root.join("images");

    let mut missing = Vec::new();
    let mut names = BTreeSet::new();
    let mut files = Vec::with_capacity(r.num_images());
    for image in r.images.values() {
        let relative = Path::new(&image.name);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(MaterializeError::InvalidName(image.name.clone()));
        }
        // two transfers to one destination would race
        if !names.insert(relative.components().collect::<PathBuf>()) {
            return Err(MaterializeError::DuplicateName(image.name.clone()));
        }
        let from = source_images.join(&image.name);
        if from.is_file() {
            files.push((from, dest_images.join(&image.name)));
        } else {
            missing.push(image.name.clone());
        }
    }
    if !missing.is_empty() {
        missing.sort();
        return Err(MaterializeError::MissingAsset(missing));
    }

    let sparse_dir = dest_root.join("sparse").join("0");
    fs::create_dir_all(&dest_images).map_err(io_error(&dest_images))?;
    fs::create_dir_all(&sparse_dir).map_err(io_error(&sparse_dir))?;

    let pb = progress_bar(files.len() as u64, "Transferring images", options.verbose);
    let run = || -> Result<Vec<Transfer>, MaterializeError> {
        files
            .par_iter()
            .progress_with(pb.clone())
            .map(|(from, to)| transfer(from, to, options.link))
            .collect()
    };
    let transfers = match options.jobs {
        Some(jobs) => rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map_err(|e| MaterializeError::ThreadPool(e.to_string()))?
            .install(run),
        None => run(),
    }?;
    pb.finish_and_clear();

    let linked = transfers.iter().filter(|t| **t == Transfer::Linked).count();
    let copied = transfers.len() - linked;
    if options.link == LinkMode::HardLink && copied > 0 {
        warn!("{} images could not be hard linked and were copied", copied);
    }
    info!(
        "Transferred {} images to {} ({} linked, {} copied)",
        transfers.len(),
        dest_images.display(),
        linked,
        copied
    );

    write_reconstruction(r, &sparse_dir, format)?;
    let ply = if options.ply {
        let path = sparse_dir.join(PLY_FILE_NAME);
        write_points_ply(r, &path)?;
        Some(path)
    } else {
        None
    };

    Ok(MaterializeReport {
        linked,
        copied,
        sparse_dir,
        ply,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::read_reconstruction;
    use crate::reconstruction::sample;

    fn source_with(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            let path = dir.path().join("images").join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, name.as_bytes()).unwrap();
        }
        dir
    }

    #[test]
    fn missing_asset_writes_nothing() {
        let r = sample(&["41.png", "42.png", "43.png", "44.png"]);
        let source = source_with(&["41.png", "43.png"]);
        let dest = tempfile::tempdir().unwrap();
        let out = dest.path().join("out");

        match materialize(&r, Format::Binary, source.path(), &out, &Default::default()) {
            Err(MaterializeError::MissingAsset(names)) => {
                assert_eq!(names, vec!["42.png".to_string(), "44.png".to_string()])
            }
            other => panic!("expected missing asset, got {:?}", other),
        }
        assert!(!out.exists());
    }

    #[test]
    fn copies_images_and_model() {
        let names = ["000001_0.png", "000001_1.png", "left/000002.png"];
        let r = sample(&names);
        let source = source_with(&names);
        let dest = tempfile::tempdir().unwrap();
        let options = MaterializeOptions {
            link: LinkMode::Copy,
            jobs: Some(2),
            ply: true,
            ..Default::default()
        };

        let report = materialize(&r, Format::Text, source.path(), dest.path(), &options).unwrap();
        assert_eq!(report.copied, 3);
        assert_eq!(report.linked, 0);
        for name in names.iter() {
            let content = fs::read(dest.path().join("images").join(name)).unwrap();
            assert_eq!(content, name.as_bytes());
        }
        assert_eq!(read_reconstruction(&report.sparse_dir, Format::Text).unwrap(), r);
        assert!(report.sparse_dir.join(PLY_FILE_NAME).is_file());
    }

    #[test]
    fn hard_links_by_default() {
        let names = ["a.png", "b.png"];
        let r = sample(&names);
        let source = source_with(&names);
        let dest = source.path().join("out");

        let report =
            materialize(&r, Format::Binary, source.path(), &dest, &Default::default()).unwrap();
        assert_eq!(report.linked + report.copied, 2);
        assert_eq!(report.ply, None);
        assert!(dest.join("sparse/0/images.bin").is_file());
        assert!(!dest.join("sparse/0").join(PLY_FILE_NAME).exists());
    }

    #[test]
    fn rejects_escaping_names() {
        let r = sample(&["../a.png"]);
        let source = source_with(&["b.png"]);
        let out = source.path().join("out");
        match materialize(&r, Format::Binary, source.path(), &out, &Default::default()) {
            Err(MaterializeError::InvalidName(name)) => assert_eq!(name, "../a.png"),
            other => panic!("expected invalid name, got {:?}", other),
        }
        assert!(!out.exists());
    }

    #[test]
    fn duplicate_names_write_nothing() {
        let names = ["a.png"; 64];
        let r = sample(&names);
        let source = source_with(&["a.png"]);
        let out = source.path().join("out");
        let options = MaterializeOptions {
            jobs: Some(16),
            ..Default::default()
        };
        match materialize(&r, Format::Binary, source.path(), &out, &options) {
            Err(MaterializeError::DuplicateName(name)) => assert_eq!(name, "a.png"),
            other => panic!("expected duplicate name, got {:?}", other),
        }
        assert!(!out.exists());
        assert_eq!(fs::read(source.path().join("images/a.png")).unwrap(), b"a.png");

        // the same file spelled differently is still one destination
        let r = sample(&["x/a.png", "x//a.png"]);
        let source = source_with(&["x/a.png"]);
        match materialize(&r, Format::Binary, source.path(), &out, &options) {
            Err(MaterializeError::DuplicateName(name)) => assert_eq!(name, "x//a.png"),
            other => panic!("expected duplicate name, got {:?}", other),
        }
    }

    #[test]
    fn copy_refuses_existing_destination() {
        let source = source_with(&["a.png"]);
        let from = source.path().join("images/a.png");
        let to = source.path().join("linked.png");
        fs::hard_link(&from, &to).unwrap();
        let err = copy_new(&from, &to).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&from).unwrap(), b"a.png");
    }

    #[test]
    fn rerun_keeps_source_intact() {
        let names = ["a.png"];
        let r = sample(&names);
        let source = source_with(&names);
        let dest = source.path().join("out");
        for link in [LinkMode::HardLink, LinkMode::Copy].iter() {
            let options = MaterializeOptions {
                link: *link,
                ..Default::default()
            };
            materialize(&r, Format::Binary, source.path(), &dest, &options).unwrap();
        }
        assert_eq!(
            fs::read(source.path().join("images/a.png")).unwrap(),
            b"a.png"
        );
    }
}
