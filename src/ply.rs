//! Export of the sparse point cloud as a PLY file.
extern crate log;
extern crate ply_rs;
extern crate tempfile;

use crate::codec::EncodeError;
use crate::reconstruction::Reconstruction;

use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use ply_rs::writer::Writer;

use log::info;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// File name COLMAP and most splatting loaders expect next to the sparse model.
pub const PLY_FILE_NAME: &str = "points3D.ply";

const FLOATS: [&str; 6] = ["x", "y", "z", "nx", "ny", "nz"];
const COLORS: [&str; 3] = ["red", "green", "blue"];

fn point_cloud(r: &Reconstruction) -> Ply<DefaultElement> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::BinaryLittleEndian;
    let mut vertex = ElementDef::new("vertex".to_string());
    for name in FLOATS.iter() {
        vertex.properties.add(PropertyDef::new(
            name.to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
    }
    for name in COLORS.iter() {
        vertex.properties.add(PropertyDef::new(
            name.to_string(),
            PropertyType::Scalar(ScalarType::UChar),
        ));
    }
    ply.header.elements.add(vertex);

    // normals are unknown for a sparse model and written as zero
    let vertices = r
        .points3d
        .values()
        .map(|point| {
            let mut v = DefaultElement::new();
            let xyz = [point.xyz.x, point.xyz.y, point.xyz.z, 0., 0., 0.];
            for (name, value) in FLOATS.iter().zip(xyz.iter()) {
                v.insert(name.to_string(), Property::Float(*value as f32));
            }
            for (name, value) in COLORS.iter().zip(point.rgb.iter()) {
                v.insert(name.to_string(), Property::UChar(*value));
            }
            v
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);
    ply
}

/// Write the 3D points of `r` with their colors to `path`.
///
/// The file is staged next to `path` and renamed into place once complete.
pub fn write_points_ply(r: &Reconstruction, path: &Path) -> Result<(), EncodeError> {
    let io_error = |source: std::io::Error| EncodeError::Io {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut ply = point_cloud(r);
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_error)?;
    {
        let mut file = BufWriter::new(tmp.as_file_mut());
        Writer::new()
            .write_ply(&mut file, &mut ply)
            .and_then(|_| file.flush())
            .map_err(io_error)?;
    }
    tmp.persist(path).map_err(|e| io_error(e.error))?;
    info!("Wrote {} points to {}", r.num_points(), path.display());
    Ok(())
}
