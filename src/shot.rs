//! Grouping of images into shots.
//!
//! A multi-lens rig fires all of its lenses at once and COLMAP registers each lens as its own
//! image. Nothing in the model records which images belong together, so the relationship is
//! recovered from file names through a [ShotNaming] strategy.
use crate::reconstruction::{Image, ImageId};

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;

/// Shot membership of a single image name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShotId {
    pub key: String,
    pub lens: u32,
}

/// Strategy mapping an image name to the shot it belongs to.
pub trait ShotNaming {
    fn parse(&self, name: &str) -> ShotId;
}

/// File name without directories and without its extension.
fn stem(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

/// `<shot><separator><lens>.<ext>`, e.g. `000921_1.png`.
///
/// The lens index is at most `max_digits` decimal digits. Names without such a suffix are
/// single-lens shots keyed by their whole stem. Directories are ignored, so `cam0/000921.jpg`
/// and `cam1/000921.jpg` are the same shot.
#[derive(Debug, Clone, PartialEq)]
pub struct LensSuffix {
    pub separator: char,
    pub max_digits: usize,
}

impl Default for LensSuffix {
    fn default() -> Self {
        LensSuffix {
            separator: '_',
            max_digits: 2,
        }
    }
}

impl ShotNaming for LensSuffix {
    fn parse(&self, name: &str) -> ShotId {
        let stem = stem(name);
        if let Some(at) = stem.rfind(self.separator) {
            let (key, suffix) = (&stem[..at], &stem[at + self.separator.len_utf8()..]);
            let is_lens = !key.is_empty()
                && !suffix.is_empty()
                && suffix.len() <= self.max_digits
                && suffix.bytes().all(|b| b.is_ascii_digit());
            if is_lens {
                if let Ok(lens) = suffix.parse() {
                    return ShotId {
                        key: key.to_string(),
                        lens,
                    };
                }
            }
        }
        ShotId {
            key: stem.to_string(),
            lens: 0,
        }
    }
}

/// Every image is its own shot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WholeStem;

impl ShotNaming for WholeStem {
    fn parse(&self, name: &str) -> ShotId {
        ShotId {
            key: stem(name).to_string(),
            lens: 0,
        }
    }
}

/// Naming strategy selected on the command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Naming {
    LensSuffix(LensSuffix),
    WholeStem,
}

impl Default for Naming {
    fn default() -> Self {
        Naming::LensSuffix(LensSuffix::default())
    }
}

impl ShotNaming for Naming {
    fn parse(&self, name: &str) -> ShotId {
        match self {
            Naming::LensSuffix(s) => s.parse(name),
            Naming::WholeStem => WholeStem.parse(name),
        }
    }
}

impl FromStr for Naming {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "suffix" => Ok(Naming::default()),
            "stem" => Ok(Naming::WholeStem),
            _ => Err(format!("unknown naming {}, expected suffix or stem", s)),
        }
    }
}

/// Shots in lexicographic key order.
pub type Shots = BTreeMap<String, BTreeSet<ImageId>>;

/// Group images into shots by the key `naming` derives from their names.
pub fn group<'a, I, N>(images: I, naming: &N) -> Shots
where
    I: IntoIterator<Item = &'a Image>,
    N: ShotNaming + ?Sized,
{
    let mut shots = Shots::new();
    for image in images {
        let id = naming.parse(&image.name);
        shots.entry(id.key).or_default().insert(image.id);
    }
    shots
}

/// All images of the given shots.
pub fn expand(shots: &Shots, keys: &BTreeSet<String>) -> BTreeSet<ImageId> {
    keys.iter()
        .filter_map(|k| shots.get(k))
        .flat_map(|ids| ids.iter().copied())
        .collect()
}
