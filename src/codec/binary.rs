//! COLMAP binary format (`cameras.bin`, `images.bin`, `points3D.bin`).
//!
//! Every file starts with a little-endian `u64` record count. Variable-length sections are
//! preceded by their own `u64` length:
//! ```txt
//! camera:  u32 id, i32 model, u64 width, u64 height, f64 params[num_params(model)]
//! image:   u32 id, f64 qvec[4], f64 tvec[3], u32 camera_id, name bytes, 0u8,
//!          u64 num_points2d, (f64 x, f64 y, u64 point3d_id)[num_points2d]
//! point3D: u64 id, f64 xyz[3], u8 rgb[3], f64 error,
//!          u64 track_length, (u32 image_id, u32 point2d_idx)[track_length]
//! ```
//! A keypoint without a 3D point stores `u64::MAX` as its id.
extern crate byteorder;
extern crate cgmath;
extern crate nom;

use super::*;

use byteorder::{LittleEndian, WriteBytesExt};
use cgmath::{Point3, Quaternion, Vector3};
use nom::bytes::complete::{tag, take_till};
use nom::number::complete::*;
use nom::sequence::terminated;
use nom::IResult;

pub struct BinaryCodec;

const INVALID_POINT3D_ID: u64 = std::u64::MAX;

// smallest possible encoding of each record, used to reject impossible counts up front
const MIN_CAMERA_SIZE: usize = 4 + 4 + 8 + 8;
const MIN_IMAGE_SIZE: usize = 4 + 4 * 8 + 3 * 8 + 4 + 1 + 8;
const KEYPOINT_SIZE: usize = 8 + 8 + 8;
const MIN_POINT3D_SIZE: usize = 8 + 3 * 8 + 3 + 8 + 8;
const TRACK_ELEMENT_SIZE: usize = 4 + 4;

/// Cursor over one file. Remembers the record being decoded so errors can name it.
struct Reader<'a> {
    data: &'a [u8],
    rest: &'a [u8],
    file: FileKind,
    record: Option<u64>,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], file: FileKind) -> Self {
        Reader {
            data,
            rest: data,
            file,
            record: None,
        }
    }

    fn offset(&self) -> usize {
        self.data.len() - self.rest.len()
    }

    fn corrupt<S: Into<String>>(&self, reason: S) -> DecodeError {
        DecodeError::corrupt(self.file, self.record, Location::Byte(self.offset()), reason)
    }

    fn parse<T, F>(&mut self, what: &str, parser: F) -> Result<T, DecodeError>
    where
        F: Fn(&'a [u8]) -> IResult<&'a [u8], T>,
    {
        match parser(self.rest) {
            Ok((rest, value)) => {
                self.rest = rest;
                Ok(value)
            }
            Err(_) => Err(self.corrupt(format!("truncated {}", what))),
        }
    }

    fn u8(&mut self, what: &str) -> Result<u8, DecodeError> {
        self.parse(what, le_u8)
    }

    fn u32(&mut self, what: &str) -> Result<u32, DecodeError> {
        self.parse(what, le_u32)
    }

    fn i32(&mut self, what: &str) -> Result<i32, DecodeError> {
        self.parse(what, le_i32)
    }

    fn u64(&mut self, what: &str) -> Result<u64, DecodeError> {
        self.parse(what, le_u64)
    }

    fn f64(&mut self, what: &str) -> Result<f64, DecodeError> {
        self.parse(what, le_f64)
    }

    /// Read a `u64` element count and check that `element_size` bytes per element remain.
    fn count(&mut self, what: &str, element_size: usize) -> Result<usize, DecodeError> {
        let n = self.u64(what)?;
        let remaining = self.rest.len() as u64;
        match n.checked_mul(element_size as u64) {
            Some(bytes) if bytes <= remaining => Ok(n as usize),
            _ => Err(self.corrupt(format!(
                "{} {} exceeds the {} remaining bytes",
                what, n, remaining
            ))),
        }
    }

    /// Null terminated string.
    fn name(&mut self) -> Result<String, DecodeError> {
        let bytes = self.parse(
            "image name",
            terminated(take_till(|b: u8| b == 0), tag(&b"\0"[..])),
        )?;
        String::from_utf8(bytes.to_vec()).map_err(|_| self.corrupt("image name is not UTF-8"))
    }

    fn finish(&mut self) -> Result<(), DecodeError> {
        self.record = None;
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(self.corrupt(format!("{} trailing bytes", self.rest.len())))
        }
    }
}

fn decode_camera(reader: &mut Reader) -> Result<Camera, DecodeError> {
    let id = reader.u32("camera id")?;
    reader.record = Some(id as u64);
    let model_id = reader.i32("camera model")?;
    let model = CameraModel::from_id(model_id)
        .ok_or_else(|| reader.corrupt(format!("unknown camera model id {}", model_id)))?;
    let width = reader.u64("camera width")?;
    let height = reader.u64("camera height")?;
    let params = (0..model.num_params())
        .map(|_| reader.f64("camera parameters"))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Camera {
        id,
        model,
        width,
        height,
        params,
    })
}

fn decode_image(reader: &mut Reader) -> Result<Image, DecodeError> {
    let id = reader.u32("image id")?;
    reader.record = Some(id as u64);
    let mut q = [0.; 4];
    for x in q.iter_mut() {
        *x = reader.f64("image rotation")?;
    }
    let mut t = [0.; 3];
    for x in t.iter_mut() {
        *x = reader.f64("image translation")?;
    }
    let camera_id = reader.u32("image camera id")?;
    let name = reader.name()?;
    let num_points2d = reader.count("keypoint count", KEYPOINT_SIZE)?;
    let mut points2d = Vec::with_capacity(num_points2d);
    for _ in 0..num_points2d {
        let x = reader.f64("keypoint")?;
        let y = reader.f64("keypoint")?;
        let pid = reader.u64("keypoint")?;
        let pid = if pid == INVALID_POINT3D_ID {
            None
        } else {
            Some(pid)
        };
        points2d.push(Keypoint::new(x, y, pid));
    }
    Ok(Image {
        id,
        camera_id,
        name,
        rotation: Quaternion::new(q[0], q[1], q[2], q[3]),
        translation: Vector3::new(t[0], t[1], t[2]),
        points2d,
    })
}

fn decode_point3d(reader: &mut Reader) -> Result<Point3d, DecodeError> {
    let id = reader.u64("point3D id")?;
    reader.record = Some(id);
    let x = reader.f64("point3D position")?;
    let y = reader.f64("point3D position")?;
    let z = reader.f64("point3D position")?;
    let rgb = [
        reader.u8("point3D color")?,
        reader.u8("point3D color")?,
        reader.u8("point3D color")?,
    ];
    let error = reader.f64("point3D error")?;
    let track_length = reader.count("track length", TRACK_ELEMENT_SIZE)?;
    let mut track = Vec::with_capacity(track_length);
    for _ in 0..track_length {
        track.push(TrackElement {
            image_id: reader.u32("track")?,
            point2d_idx: reader.u32("track")?,
        });
    }
    Ok(Point3d {
        id,
        xyz: Point3::new(x, y, z),
        rgb,
        error,
        track,
    })
}

/// Decode `count`-prefixed records of one file into a map keyed by id.
fn decode_records<K, V, F, G>(
    data: &[u8],
    file: FileKind,
    min_size: usize,
    decode: F,
    id: G,
) -> Result<BTreeMap<K, V>, DecodeError>
where
    K: Ord + Copy + Into<u64>,
    F: Fn(&mut Reader) -> Result<V, DecodeError>,
    G: Fn(&V) -> K,
{
    let mut reader = Reader::new(data, file);
    let num_records = reader.count("record count", min_size)?;
    let mut records = BTreeMap::new();
    for _ in 0..num_records {
        let start = Location::Byte(reader.offset());
        reader.record = None;
        let record = decode(&mut reader)?;
        insert_unique(&mut records, id(&record), record, file, start)?;
    }
    reader.finish()?;
    Ok(records)
}

impl Codec for BinaryCodec {
    fn format(&self) -> Format {
        Format::Binary
    }

    fn decode_cameras(&self, data: &[u8]) -> Result<BTreeMap<CameraId, Camera>, DecodeError> {
        decode_records(data, FileKind::Cameras, MIN_CAMERA_SIZE, decode_camera, |c| c.id)
    }

    fn decode_images(&self, data: &[u8]) -> Result<BTreeMap<ImageId, Image>, DecodeError> {
        decode_records(data, FileKind::Images, MIN_IMAGE_SIZE, decode_image, |i| i.id)
    }

    fn decode_points3d(&self, data: &[u8]) -> Result<BTreeMap<Point3dId, Point3d>, DecodeError> {
        decode_records(
            data,
            FileKind::Points3d,
            MIN_POINT3D_SIZE,
            decode_point3d,
            |p| p.id,
        )
    }

    fn encode_cameras(&self, r: &Reconstruction, w: &mut dyn Write) -> io::Result<()> {
        w.write_u64::<LittleEndian>(r.num_cameras() as u64)?;
        for camera in r.cameras.values() {
            w.write_u32::<LittleEndian>(camera.id)?;
            w.write_i32::<LittleEndian>(camera.model.id())?;
            w.write_u64::<LittleEndian>(camera.width)?;
            w.write_u64::<LittleEndian>(camera.height)?;
            for p in &camera.params {
                w.write_f64::<LittleEndian>(*p)?;
            }
        }
        Ok(())
    }

    fn encode_images(&self, r: &Reconstruction, w: &mut dyn Write) -> io::Result<()> {
        w.write_u64::<LittleEndian>(r.num_images() as u64)?;
        for image in r.images.values() {
            if image.name.as_bytes().contains(&0) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("image {} has a NUL byte in its name", image.id),
                ));
            }
            w.write_u32::<LittleEndian>(image.id)?;
            let q = image.rotation;
            for x in [q.s, q.v.x, q.v.y, q.v.z].iter() {
                w.write_f64::<LittleEndian>(*x)?;
            }
            let t = image.translation;
            for x in [t.x, t.y, t.z].iter() {
                w.write_f64::<LittleEndian>(*x)?;
            }
            w.write_u32::<LittleEndian>(image.camera_id)?;
            w.write_all(image.name.as_bytes())?;
            w.write_u8(0)?;
            w.write_u64::<LittleEndian>(image.points2d.len() as u64)?;
            for p in &image.points2d {
                w.write_f64::<LittleEndian>(p.xy.x)?;
                w.write_f64::<LittleEndian>(p.xy.y)?;
                w.write_u64::<LittleEndian>(p.point3d_id.unwrap_or(INVALID_POINT3D_ID))?;
            }
        }
        Ok(())
    }

    fn encode_points3d(&self, r: &Reconstruction, w: &mut dyn Write) -> io::Result<()> {
        w.write_u64::<LittleEndian>(r.num_points() as u64)?;
        for point in r.points3d.values() {
            w.write_u64::<LittleEndian>(point.id)?;
            w.write_f64::<LittleEndian>(point.xyz.x)?;
            w.write_f64::<LittleEndian>(point.xyz.y)?;
            w.write_f64::<LittleEndian>(point.xyz.z)?;
            w.write_all(&point.rgb)?;
            w.write_f64::<LittleEndian>(point.error)?;
            w.write_u64::<LittleEndian>(point.track.len() as u64)?;
            for t in &point.track {
                w.write_u32::<LittleEndian>(t.image_id)?;
                w.write_u32::<LittleEndian>(t.point2d_idx)?;
            }
        }
        Ok(())
    }
}
