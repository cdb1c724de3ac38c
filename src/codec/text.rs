//! COLMAP text format (`cameras.txt`, `images.txt`, `points3D.txt`).
//!
//! ```txt
//! # cameras.txt
//! <CAMERA_ID> <MODEL> <WIDTH> <HEIGHT> <PARAMS[]>
//! # images.txt, two lines per image, the second may be empty
//! <IMAGE_ID> <QW> <QX> <QY> <QZ> <TX> <TY> <TZ> <CAMERA_ID> <NAME>
//! <X> <Y> <POINT3D_ID> ...
//! # points3D.txt
//! <POINT3D_ID> <X> <Y> <Z> <R> <G> <B> <ERROR> <IMAGE_ID> <POINT2D_IDX> ...
//! ```
//! Lines starting with `#` are comments. A keypoint without a 3D point has `POINT3D_ID` -1.
extern crate cgmath;
extern crate itertools;
extern crate nom;

use super::*;

use cgmath::{Point3, Quaternion, Vector3};
use itertools::Itertools;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::*;
use nom::combinator::{all_consuming, map, map_res};
use nom::multi::{many0, separated_list};
use nom::number::complete::double;
use nom::sequence::*;
use nom::IResult;

pub struct TextCodec;

fn unsigned<T: FromStr>(input: &str) -> IResult<&str, T> {
    map_res(digit1, |s: &str| s.parse::<T>())(input)
}

/// `-1` for a keypoint without a 3D point, otherwise the point id.
fn point3d_ref(input: &str) -> IResult<&str, Option<u64>> {
    alt((map(tag("-1"), |_| None), map(unsigned::<u64>, Some)))(input)
}

fn model_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

/// `CAMERA_ID MODEL WIDTH HEIGHT PARAMS[]`
fn camera_line(input: &str) -> IResult<&str, (u32, &str, u64, u64, Vec<f64>)> {
    all_consuming(terminated(
        tuple((
            preceded(space0, unsigned::<u32>),
            preceded(space1, model_name),
            preceded(space1, unsigned::<u64>),
            preceded(space1, unsigned::<u64>),
            many0(preceded(space1, double)),
        )),
        space0,
    ))(input)
}

/// `IMAGE_ID QW QX QY QZ TX TY TZ CAMERA_ID NAME`
fn image_line(
    input: &str,
) -> IResult<&str, (u32, [f64; 4], [f64; 3], u32, &str)> {
    let (input, id) = preceded(space0, unsigned::<u32>)(input)?;
    let (input, (qw, qx, qy, qz)) = tuple((
        preceded(space1, double),
        preceded(space1, double),
        preceded(space1, double),
        preceded(space1, double),
    ))(input)?;
    let (input, (tx, ty, tz)) = tuple((
        preceded(space1, double),
        preceded(space1, double),
        preceded(space1, double),
    ))(input)?;
    let (input, camera_id) = preceded(space1, unsigned::<u32>)(input)?;
    let (input, name) = preceded(space1, not_line_ending)(input)?;
    let name = name.trim_end_matches('\r');
    Ok((input, (id, [qw, qx, qy, qz], [tx, ty, tz], camera_id, name)))
}

/// `X Y POINT3D_ID ...`
fn points2d_line(input: &str) -> IResult<&str, Vec<(f64, f64, Option<u64>)>> {
    all_consuming(delimited(
        space0,
        separated_list(
            space1,
            tuple((double, preceded(space1, double), preceded(space1, point3d_ref))),
        ),
        space0,
    ))(input)
}

/// `POINT3D_ID X Y Z R G B ERROR TRACK[]`
fn point3d_line(
    input: &str,
) -> IResult<&str, (u64, [f64; 3], [u8; 3], f64, Vec<(u32, u32)>)> {
    let (input, id) = preceded(space0, unsigned::<u64>)(input)?;
    let (input, (x, y, z)) = tuple((
        preceded(space1, double),
        preceded(space1, double),
        preceded(space1, double),
    ))(input)?;
    let (input, (r, g, b)) = tuple((
        preceded(space1, unsigned::<u8>),
        preceded(space1, unsigned::<u8>),
        preceded(space1, unsigned::<u8>),
    ))(input)?;
    let (input, error) = preceded(space1, double)(input)?;
    let (input, track) = all_consuming(terminated(
        many0(preceded(
            space1,
            pair(unsigned::<u32>, preceded(space1, unsigned::<u32>)),
        )),
        space0,
    ))(input)?;
    Ok((input, (id, [x, y, z], [r, g, b], error, track)))
}

fn as_utf8(data: &[u8], file: FileKind) -> Result<&str, DecodeError> {
    std::str::from_utf8(data).map_err(|e| {
        DecodeError::corrupt(
            file,
            None,
            Location::Byte(e.valid_up_to()),
            "invalid UTF-8",
        )
    })
}

/// Numbered lines that are not comments. Line numbers start at 1.
fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| !l.trim_start().starts_with('#'))
}

/// Best-effort id of a malformed record, taken from its first field.
fn leading_id(line: &str) -> Option<u64> {
    line.split_whitespace().next().and_then(|t| t.parse().ok())
}

fn malformed(file: FileKind, line_no: usize, line: &str, what: &str) -> DecodeError {
    DecodeError::corrupt(
        file,
        leading_id(line),
        Location::Line(line_no),
        format!("malformed {} line", what),
    )
}

fn parse_camera(line_no: usize, line: &str) -> Result<Camera, DecodeError> {
    let file = FileKind::Cameras;
    let (_, (id, model, width, height, params)) =
        camera_line(line).map_err(|_| malformed(file, line_no, line, "camera"))?;
    let corrupt = |reason: String| {
        DecodeError::corrupt(file, Some(id as u64), Location::Line(line_no), reason)
    };
    // older writers store the numeric model id
    let model = CameraModel::from_name(model)
        .or_else(|| model.parse().ok().and_then(CameraModel::from_id))
        .ok_or_else(|| corrupt(format!("unknown camera model {}", model)))?;
    if params.len() != model.num_params() {
        return Err(corrupt(format!(
            "{} takes {} parameters, found {}",
            model,
            model.num_params(),
            params.len()
        )));
    }
    Ok(Camera {
        id,
        model,
        width,
        height,
        params,
    })
}

fn parse_image(
    header: (usize, &str),
    points: Option<(usize, &str)>,
) -> Result<Image, DecodeError> {
    let file = FileKind::Images;
    let (line_no, line) = header;
    let (_, (id, q, t, camera_id, name)) =
        image_line(line).map_err(|_| malformed(file, line_no, line, "image"))?;
    if name.is_empty() {
        return Err(DecodeError::corrupt(
            file,
            Some(id as u64),
            Location::Line(line_no),
            "missing image name",
        ));
    }

    let points2d = match points {
        None => Vec::new(),
        Some((points_no, points_line)) => {
            let (_, raw) = points2d_line(points_line).map_err(|_| {
                DecodeError::corrupt(
                    file,
                    Some(id as u64),
                    Location::Line(points_no),
                    "malformed keypoint line",
                )
            })?;
            raw.into_iter()
                .map(|(x, y, pid)| Keypoint::new(x, y, pid))
                .collect()
        }
    };

    Ok(Image {
        id,
        camera_id,
        name: name.to_string(),
        rotation: Quaternion::new(q[0], q[1], q[2], q[3]),
        translation: Vector3::new(t[0], t[1], t[2]),
        points2d,
    })
}

fn parse_point3d(line_no: usize, line: &str) -> Result<Point3d, DecodeError> {
    let (_, (id, xyz, rgb, error, track)) = point3d_line(line)
        .map_err(|_| malformed(FileKind::Points3d, line_no, line, "point3D"))?;
    Ok(Point3d {
        id,
        xyz: Point3::new(xyz[0], xyz[1], xyz[2]),
        rgb,
        error,
        track: track
            .into_iter()
            .map(|(image_id, point2d_idx)| TrackElement {
                image_id,
                point2d_idx,
            })
            .collect(),
    })
}

impl Codec for TextCodec {
    fn format(&self) -> Format {
        Format::Text
    }

    fn decode_cameras(&self, data: &[u8]) -> Result<BTreeMap<CameraId, Camera>, DecodeError> {
        let mut cameras = BTreeMap::new();
        for (line_no, line) in data_lines(as_utf8(data, FileKind::Cameras)?) {
            if line.trim().is_empty() {
                continue;
            }
            let camera = parse_camera(line_no, line)?;
            insert_unique(
                &mut cameras,
                camera.id,
                camera,
                FileKind::Cameras,
                Location::Line(line_no),
            )?;
        }
        Ok(cameras)
    }

    fn decode_images(&self, data: &[u8]) -> Result<BTreeMap<ImageId, Image>, DecodeError> {
        let mut images = BTreeMap::new();
        let mut lines = data_lines(as_utf8(data, FileKind::Images)?);
        while let Some(header) = lines.next() {
            // blank lines only separate records; the keypoint line after a header may be empty
            if header.1.trim().is_empty() {
                continue;
            }
            let image = parse_image(header, lines.next())?;
            insert_unique(
                &mut images,
                image.id,
                image,
                FileKind::Images,
                Location::Line(header.0),
            )?;
        }
        Ok(images)
    }

    fn decode_points3d(&self, data: &[u8]) -> Result<BTreeMap<Point3dId, Point3d>, DecodeError> {
        let mut points = BTreeMap::new();
        for (line_no, line) in data_lines(as_utf8(data, FileKind::Points3d)?) {
            if line.trim().is_empty() {
                continue;
            }
            let point = parse_point3d(line_no, line)?;
            insert_unique(
                &mut points,
                point.id,
                point,
                FileKind::Points3d,
                Location::Line(line_no),
            )?;
        }
        Ok(points)
    }

    fn encode_cameras(&self, r: &Reconstruction, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "# Camera list with one line of data per camera:")?;
        writeln!(w, "#   CAMERA_ID, MODEL, WIDTH, HEIGHT, PARAMS[]")?;
        writeln!(w, "# Number of cameras: {}", r.num_cameras())?;
        for camera in r.cameras.values() {
            writeln!(
                w,
                "{} {} {} {} {}",
                camera.id,
                camera.model,
                camera.width,
                camera.height,
                camera.params.iter().join(" ")
            )?;
        }
        Ok(())
    }

    fn encode_images(&self, r: &Reconstruction, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "# Image list with two lines of data per image:")?;
        writeln!(w, "#   IMAGE_ID, QW, QX, QY, QZ, TX, TY, TZ, CAMERA_ID, NAME")?;
        writeln!(w, "#   POINTS2D[] as (X, Y, POINT3D_ID)")?;
        writeln!(
            w,
            "# Number of images: {}, mean observations per image: {}",
            r.num_images(),
            r.mean_observations_per_image()
        )?;
        for image in r.images.values() {
            let q = image.rotation;
            let t = image.translation;
            writeln!(
                w,
                "{} {} {} {} {} {} {} {} {} {}",
                image.id, q.s, q.v.x, q.v.y, q.v.z, t.x, t.y, t.z, image.camera_id, image.name
            )?;
            writeln!(
                w,
                "{}",
                image
                    .points2d
                    .iter()
                    .map(|p| match p.point3d_id {
                        Some(pid) => format!("{} {} {}", p.xy.x, p.xy.y, pid),
                        None => format!("{} {} -1", p.xy.x, p.xy.y),
                    })
                    .join(" ")
            )?;
        }
        Ok(())
    }

    fn encode_points3d(&self, r: &Reconstruction, w: &mut dyn Write) -> io::Result<()> {
        writeln!(w, "# 3D point list with one line of data per point:")?;
        writeln!(
            w,
            "#   POINT3D_ID, X, Y, Z, R, G, B, ERROR, TRACK[] as (IMAGE_ID, POINT2D_IDX)"
        )?;
        writeln!(
            w,
            "# Number of points: {}, mean track length: {}",
            r.num_points(),
            r.mean_track_length()
        )?;
        for point in r.points3d.values() {
            writeln!(
                w,
                "{} {} {} {} {} {} {} {} {}",
                point.id,
                point.xyz.x,
                point.xyz.y,
                point.xyz.z,
                point.rgb[0],
                point.rgb[1],
                point.rgb[2],
                point.error,
                point
                    .track
                    .iter()
                    .map(|t| format!("{} {}", t.image_id, t.point2d_idx))
                    .join(" ")
            )?;
        }
        Ok(())
    }
}
