extern crate colmap_subsample;
extern crate env_logger;
extern crate structopt;

use colmap_subsample::materialize::LinkMode;
use colmap_subsample::*;

use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(
    name = "subsample",
    about = "Keep every n-th shot of a COLMAP dataset, with all of its lenses."
)]
struct Opt {
    /// Source dataset containing images/ and sparse/0 (or sparse/).
    #[structopt(short = "s", long = "source", parse(from_os_str))]
    source: PathBuf,

    /// Output dataset directory. Created if it does not exist.
    #[structopt(short = "o", long = "output", parse(from_os_str))]
    output: PathBuf,

    /// Keep every n-th shot.
    #[structopt(
        short = "n",
        long = "keep-every",
        default_value = "4",
        allow_hyphen_values = true
    )]
    keep_every: i64,

    /// Position of the first kept shot.
    #[structopt(long = "offset", default_value = "0", allow_hyphen_values = true)]
    offset: i64,

    /// How image names map to shots. "suffix" treats <shot>_<lens>.<ext> as one lens of a shot,
    /// "stem" makes every image its own shot.
    #[structopt(long = "naming", default_value = "suffix")]
    naming: Naming,

    /// Separator before the lens index.
    #[structopt(long = "separator", default_value = "_")]
    separator: char,

    /// Maximum number of digits in a lens index. Longer numeric suffixes are frame numbers.
    #[structopt(long = "lens-digits", default_value = "2")]
    lens_digits: usize,

    /// Output model encoding, text or binary. Defaults to the source encoding.
    #[structopt(long = "format")]
    format: Option<Format>,

    /// Copy images instead of hard linking them.
    #[structopt(long = "copy")]
    copy: bool,

    /// Number of threads used to transfer images.
    #[structopt(short = "j", long = "jobs")]
    jobs: Option<usize>,

    /// Write sparse/0/points3D.ply even if the source has none.
    #[structopt(long = "ply")]
    ply: bool,

    /// Show progress and debug logging.
    #[structopt(short = "v", long = "verbose")]
    verbose: bool,
}

fn main() {
    let opt = Opt::from_args();
    let filter = if opt.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let naming = match opt.naming {
        Naming::LensSuffix(_) => Naming::LensSuffix(LensSuffix {
            separator: opt.separator,
            max_digits: opt.lens_digits,
        }),
        other => other,
    };
    let options = SubsampleOptions {
        keep_every: opt.keep_every,
        offset: opt.offset,
        naming,
        format: opt.format,
        link: if opt.copy {
            LinkMode::Copy
        } else {
            LinkMode::HardLink
        },
        jobs: opt.jobs,
        verbose: opt.verbose,
        ply: opt.ply,
    };

    match run(&opt.source, &opt.output, &options) {
        Ok(summary) => println!("{}", summary),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}
