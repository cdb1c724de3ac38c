extern crate colmap_subsample;
extern crate env_logger;
extern crate itertools;
extern crate structopt;

use colmap_subsample::codec::{locate, read_reconstruction, write_reconstruction};
use colmap_subsample::ply::write_points_ply;
use colmap_subsample::shot::group;
use colmap_subsample::subsample::ShotStats;
use colmap_subsample::*;

use itertools::Itertools;
use std::path::PathBuf;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
struct InfoOpt {
    /// Dataset root, sparse/ directory or model directory.
    #[structopt(name = "DIR", parse(from_os_str))]
    input: PathBuf,

    /// How image names map to shots, suffix or stem.
    #[structopt(long = "naming", default_value = "suffix")]
    naming: Naming,
}

#[derive(StructOpt, Debug)]
struct ConvertOpt {
    /// Dataset root, sparse/ directory or model directory.
    #[structopt(name = "IN", parse(from_os_str))]
    input: PathBuf,

    /// Directory to write cameras, images and points3D to. Created if needed.
    #[structopt(name = "OUT", parse(from_os_str))]
    output: PathBuf,

    /// Output encoding, text or binary. Defaults to the encoding the input does not use.
    #[structopt(long = "format")]
    format: Option<Format>,
}

#[derive(StructOpt, Debug)]
struct PlyOpt {
    /// Dataset root, sparse/ directory or model directory.
    #[structopt(name = "DIR", parse(from_os_str))]
    input: PathBuf,

    /// Output file in .ply format.
    #[structopt(name = "OUT", parse(from_os_str))]
    out: PathBuf,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "colmap", about = "Tools for inspecting and converting COLMAP models.")]
enum Opt {
    /// Validate a model and print its statistics.
    Info(InfoOpt),
    /// Re-encode a model as text or binary.
    Convert(ConvertOpt),
    /// Export the 3D points of a model to a .ply for visualization.
    Ply(PlyOpt),
}

fn run_info(opt: InfoOpt) -> Result<(), Error> {
    let (sparse, format) = locate(&opt.input)?;
    let r = read_reconstruction(&sparse, format)?;
    println!("{}", r);
    println!("Model: {} ({})", sparse.display(), format);
    println!("Mean track length: {:.3}", r.mean_track_length());
    println!(
        "Mean observations per image: {:.3}",
        r.mean_observations_per_image()
    );
    println!("Camera models:");
    for (model, cameras) in &r
        .cameras
        .values()
        .map(|c| c.model.name())
        .sorted()
        .group_by(|m| *m)
    {
        println!("  {}: {}", model, cameras.count());
    }
    println!("Shots:");
    println!("{}", ShotStats::new(&group(r.images.values(), &opt.naming)));
    Ok(())
}

fn run_convert(opt: ConvertOpt) -> Result<(), Error> {
    let (sparse, from) = locate(&opt.input)?;
    let r = read_reconstruction(&sparse, from)?;
    let to = opt.format.unwrap_or(match from {
        Format::Text => Format::Binary,
        Format::Binary => Format::Text,
    });
    std::fs::create_dir_all(&opt.output).map_err(|source| EncodeError::Io {
        path: opt.output.clone(),
        source,
    })?;
    write_reconstruction(&r, &opt.output, to)?;
    println!("Converted {} model to {} in {}", from, to, opt.output.display());
    Ok(())
}

fn run_ply(opt: PlyOpt) -> Result<(), Error> {
    let (sparse, format) = locate(&opt.input)?;
    let r = read_reconstruction(&sparse, format)?;
    write_points_ply(&r, &opt.out)?;
    println!("Wrote {} points to {}", r.num_points(), opt.out.display());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let result = match Opt::from_args() {
        Opt::Info(opt) => run_info(opt),
        Opt::Convert(opt) => run_convert(opt),
        Opt::Ply(opt) => run_ply(opt),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
