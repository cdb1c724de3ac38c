//! In-memory COLMAP reconstruction: cameras, registered images and the sparse point cloud.
//!
//! Records refer to each other only through integer ids. An image names its camera by
//! `camera_id` and each of its keypoints may name the 3D point it observes, while each 3D point
//! carries a track of `(image_id, point2d_idx)` pairs pointing back at those keypoints. Both
//! directions must agree; [Reconstruction::validate] checks that they do.
extern crate cgmath;
extern crate thiserror;

use cgmath::{Point2, Point3, Quaternion, Vector3};

use std::collections::BTreeMap;
use std::fmt;

pub type CameraId = u32;
pub type ImageId = u32;
pub type Point3dId = u64;

/// Intrinsic camera models understood by COLMAP.
///
/// The discriminant is the model id stored in `cameras.bin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraModel {
    SimplePinhole = 0,
    Pinhole = 1,
    SimpleRadial = 2,
    Radial = 3,
    OpenCV = 4,
    OpenCVFisheye = 5,
    FullOpenCV = 6,
    FOV = 7,
    SimpleRadialFisheye = 8,
    RadialFisheye = 9,
    ThinPrismFisheye = 10,
    RadTanThinPrismFisheye = 11,
}

impl CameraModel {
    pub const ALL: [CameraModel; 12] = [
        CameraModel::SimplePinhole,
        CameraModel::Pinhole,
        CameraModel::SimpleRadial,
        CameraModel::Radial,
        CameraModel::OpenCV,
        CameraModel::OpenCVFisheye,
        CameraModel::FullOpenCV,
        CameraModel::FOV,
        CameraModel::SimpleRadialFisheye,
        CameraModel::RadialFisheye,
        CameraModel::ThinPrismFisheye,
        CameraModel::RadTanThinPrismFisheye,
    ];

    /// Number of intrinsic parameters the model carries.
    pub fn num_params(self) -> usize {
        match self {
            CameraModel::SimplePinhole => 3,
            CameraModel::Pinhole => 4,
            CameraModel::SimpleRadial => 4,
            CameraModel::Radial => 5,
            CameraModel::OpenCV => 8,
            CameraModel::OpenCVFisheye => 8,
            CameraModel::FullOpenCV => 12,
            CameraModel::FOV => 5,
            CameraModel::SimpleRadialFisheye => 4,
            CameraModel::RadialFisheye => 5,
            CameraModel::ThinPrismFisheye => 12,
            CameraModel::RadTanThinPrismFisheye => 16,
        }
    }

    pub fn id(self) -> i32 {
        self as i32
    }

    pub fn from_id(id: i32) -> Option<Self> {
        CameraModel::ALL.iter().copied().find(|m| m.id() == id)
    }

    /// Name used in `cameras.txt`.
    pub fn name(self) -> &'static str {
        match self {
            CameraModel::SimplePinhole => "SIMPLE_PINHOLE",
            CameraModel::Pinhole => "PINHOLE",
            CameraModel::SimpleRadial => "SIMPLE_RADIAL",
            CameraModel::Radial => "RADIAL",
            CameraModel::OpenCV => "OPENCV",
            CameraModel::OpenCVFisheye => "OPENCV_FISHEYE",
            CameraModel::FullOpenCV => "FULL_OPENCV",
            CameraModel::FOV => "FOV",
            CameraModel::SimpleRadialFisheye => "SIMPLE_RADIAL_FISHEYE",
            CameraModel::RadialFisheye => "RADIAL_FISHEYE",
            CameraModel::ThinPrismFisheye => "THIN_PRISM_FISHEYE",
            CameraModel::RadTanThinPrismFisheye => "RAD_TAN_THIN_PRISM_FISHEYE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        CameraModel::ALL.iter().copied().find(|m| m.name() == name)
    }
}

impl fmt::Display for CameraModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Camera intrinsics shared by one or more images.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub id: CameraId,
    pub model: CameraModel,
    pub width: u64,
    pub height: u64,
    /// Intrinsic parameters, `model.num_params()` of them.
    pub params: Vec<f64>,
}

/// A detected keypoint, optionally triangulated into a 3D point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub xy: Point2<f64>,
    pub point3d_id: Option<Point3dId>,
}

impl Keypoint {
    pub fn new(x: f64, y: f64, point3d_id: Option<Point3dId>) -> Self {
        Keypoint {
            xy: Point2::new(x, y),
            point3d_id: point3d_id,
        }
    }
}

/// A registered image and its pose.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub id: ImageId,
    pub camera_id: CameraId,
    /// File path relative to the dataset's `images/` directory.
    pub name: String,
    /// World-to-camera rotation `(qw, qx, qy, qz)`.
    pub rotation: Quaternion<f64>,
    /// World-to-camera translation.
    pub translation: Vector3<f64>,
    /// Keypoints; the position in this list is the index used by point tracks.
    pub points2d: Vec<Keypoint>,
}

impl Image {
    /// Number of keypoints linked to a 3D point.
    pub fn num_observations(&self) -> usize {
        self.points2d
            .iter()
            .filter(|p| p.point3d_id.is_some())
            .count()
    }
}

/// One observation of a 3D point: image `image_id` saw it at keypoint `point2d_idx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackElement {
    pub image_id: ImageId,
    pub point2d_idx: u32,
}

/// A triangulated point of the sparse cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct Point3d {
    pub id: Point3dId,
    pub xyz: Point3<f64>,
    pub rgb: [u8; 3],
    /// Mean reprojection error.
    pub error: f64,
    pub track: Vec<TrackElement>,
}

/// Kind of record an [InvariantViolation] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Camera,
    Image,
    Point3d,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Camera => f.write_str("camera"),
            Entity::Image => f.write_str("image"),
            Entity::Point3d => f.write_str("point3D"),
        }
    }
}

/// The referential integrity rule that failed.
#[derive(Debug, Clone, PartialEq)]
pub enum Invariant {
    /// Camera has the wrong number of intrinsic parameters for its model.
    ParamCount { expected: usize, found: usize },
    /// Image refers to a camera that does not exist.
    MissingCamera(CameraId),
    /// Image has the same file name as an image with a lower id.
    DuplicateName { name: String, first: ImageId },
    /// Keypoint refers to a 3D point that does not exist.
    MissingPoint { point2d_idx: usize, point3d_id: Point3dId },
    /// Keypoint refers to a 3D point whose track does not list it.
    NotInTrack { point2d_idx: usize, point3d_id: Point3dId },
    /// 3D point has no observations.
    EmptyTrack,
    /// Track entry refers to an image that does not exist.
    MissingImage(ImageId),
    /// Track entry refers past the end of the image's keypoints.
    KeypointOutOfRange { image_id: ImageId, point2d_idx: u32 },
    /// Track entry refers to a keypoint that does not link back to this point.
    BackReference { image_id: ImageId, point2d_idx: u32 },
    /// Camera is not used by any image.
    UnreferencedCamera,
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invariant::ParamCount { expected, found } => {
                write!(f, "expected {} intrinsic parameters, found {}", expected, found)
            }
            Invariant::MissingCamera(c) => write!(f, "references missing camera {}", c),
            Invariant::DuplicateName { name, first } => {
                write!(f, "has the same name {} as image {}", name, first)
            }
            Invariant::MissingPoint {
                point2d_idx,
                point3d_id,
            } => write!(
                f,
                "keypoint {} references missing point3D {}",
                point2d_idx, point3d_id
            ),
            Invariant::NotInTrack {
                point2d_idx,
                point3d_id,
            } => write!(
                f,
                "keypoint {} is not in the track of point3D {}",
                point2d_idx, point3d_id
            ),
            Invariant::EmptyTrack => f.write_str("has an empty track"),
            Invariant::MissingImage(i) => write!(f, "track references missing image {}", i),
            Invariant::KeypointOutOfRange {
                image_id,
                point2d_idx,
            } => write!(
                f,
                "track references keypoint {} past the end of image {}",
                point2d_idx, image_id
            ),
            Invariant::BackReference {
                image_id,
                point2d_idx,
            } => write!(
                f,
                "track entry ({}, {}) does not link back to this point",
                image_id, point2d_idx
            ),
            Invariant::UnreferencedCamera => f.write_str("is not used by any image"),
        }
    }
}

/// A broken link in a [Reconstruction].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{entity} {id} {invariant}")]
pub struct InvariantViolation {
    pub entity: Entity,
    pub id: u64,
    pub invariant: Invariant,
}

impl InvariantViolation {
    fn new(entity: Entity, id: u64, invariant: Invariant) -> Self {
        InvariantViolation {
            entity,
            id,
            invariant,
        }
    }
}

/// A COLMAP sparse model.
///
/// Maps are ordered by id so iteration, and therefore encoding, is deterministic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reconstruction {
    pub cameras: BTreeMap<CameraId, Camera>,
    pub images: BTreeMap<ImageId, Image>,
    pub points3d: BTreeMap<Point3dId, Point3d>,
}

impl Reconstruction {
    pub fn new(
        cameras: BTreeMap<CameraId, Camera>,
        images: BTreeMap<ImageId, Image>,
        points3d: BTreeMap<Point3dId, Point3d>,
    ) -> Self {
        Reconstruction {
            cameras,
            images,
            points3d,
        }
    }

    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    pub fn num_points(&self) -> usize {
        self.points3d.len()
    }

    /// Number of image-point observations.
    pub fn num_observations(&self) -> usize {
        self.points3d.values().map(|p| p.track.len()).sum()
    }

    /// Mean number of observations per 3D point.
    pub fn mean_track_length(&self) -> f64 {
        if self.points3d.is_empty() {
            0.
        } else {
            self.num_observations() as f64 / self.num_points() as f64
        }
    }

    /// Mean number of triangulated keypoints per image.
    pub fn mean_observations_per_image(&self) -> f64 {
        if self.images.is_empty() {
            0.
        } else {
            self.images
                .values()
                .map(|i| i.num_observations())
                .sum::<usize>() as f64
                / self.num_images() as f64
        }
    }

    /// Check that every id reference resolves and that image/point links agree in both
    /// directions. Returns the first violation found.
    pub fn validate(&self) -> Result<(), InvariantViolation> {
        for camera in self.cameras.values() {
            let expected = camera.model.num_params();
            if camera.params.len() != expected {
                return Err(InvariantViolation::new(
                    Entity::Camera,
                    camera.id as u64,
                    Invariant::ParamCount {
                        expected,
                        found: camera.params.len(),
                    },
                ));
            }
        }

        let mut names: BTreeMap<&str, ImageId> = BTreeMap::new();
        for image in self.images.values() {
            let violation =
                |invariant| InvariantViolation::new(Entity::Image, image.id as u64, invariant);
            if !self.cameras.contains_key(&image.camera_id) {
                return Err(violation(Invariant::MissingCamera(image.camera_id)));
            }
            if let Some(first) = names.insert(&image.name, image.id) {
                return Err(violation(Invariant::DuplicateName {
                    name: image.name.clone(),
                    first,
                }));
            }
            for (i, keypoint) in image.points2d.iter().enumerate() {
                if let Some(pid) = keypoint.point3d_id {
                    let point = self.points3d.get(&pid).ok_or_else(|| {
                        violation(Invariant::MissingPoint {
                            point2d_idx: i,
                            point3d_id: pid,
                        })
                    })?;
                    let listed = point
                        .track
                        .iter()
                        .any(|t| t.image_id == image.id && t.point2d_idx as usize == i);
                    if !listed {
                        return Err(violation(Invariant::NotInTrack {
                            point2d_idx: i,
                            point3d_id: pid,
                        }));
                    }
                }
            }
        }

        for point in self.points3d.values() {
            let violation =
                |invariant| InvariantViolation::new(Entity::Point3d, point.id, invariant);
            if point.track.is_empty() {
                return Err(violation(Invariant::EmptyTrack));
            }
            for t in &point.track {
                let image = self
                    .images
                    .get(&t.image_id)
                    .ok_or_else(|| violation(Invariant::MissingImage(t.image_id)))?;
                let keypoint = image.points2d.get(t.point2d_idx as usize).ok_or_else(|| {
                    violation(Invariant::KeypointOutOfRange {
                        image_id: t.image_id,
                        point2d_idx: t.point2d_idx,
                    })
                })?;
                if keypoint.point3d_id != Some(point.id) {
                    return Err(violation(Invariant::BackReference {
                        image_id: t.image_id,
                        point2d_idx: t.point2d_idx,
                    }));
                }
            }
        }

        Ok(())
    }

    /// Fail if some camera is not used by any image.
    pub fn validate_cameras_referenced(&self) -> Result<(), InvariantViolation> {
        for camera in self.cameras.values() {
            if !self.images.values().any(|i| i.camera_id == camera.id) {
                return Err(InvariantViolation::new(
                    Entity::Camera,
                    camera.id as u64,
                    Invariant::UnreferencedCamera,
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Reconstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "COLMAP reconstruction with {} cameras, {} images, {} points, and {} observations",
            self.num_cameras(),
            self.num_images(),
            self.num_points(),
            self.num_observations()
        )
    }
}

/// Small consistent reconstruction used across the crate's tests.
///
/// One PINHOLE camera, images 1..=`names.len()` named from `names`, each with two keypoints.
/// Point `10 + k` is seen by keypoint 0 of images `k+1` and `k+2`; keypoint 1 is never
/// triangulated.
#[cfg(test)]
pub(crate) fn sample(names: &[&str]) -> Reconstruction {
    let mut r = Reconstruction::default();
    r.cameras.insert(
        1,
        Camera {
            id: 1,
            model: CameraModel::Pinhole,
            width: 640,
            height: 480,
            params: vec![500., 500.5, 320., 240.],
        },
    );
    for (i, name) in names.iter().enumerate() {
        let id = i as u32 + 1;
        r.images.insert(
            id,
            Image {
                id,
                camera_id: 1,
                name: name.to_string(),
                rotation: Quaternion::new(1., 0., 0., 0.),
                translation: Vector3::new(i as f64, 0.25, -1.5),
                points2d: vec![Keypoint::new(10.5, 20.25, None), Keypoint::new(1., 2., None)],
            },
        );
    }
    for k in 0..names.len().saturating_sub(1) {
        let pid = 10 + k as u64;
        r.points3d.insert(
            pid,
            Point3d {
                id: pid,
                xyz: Point3::new(k as f64, 1.0 / 3.0, 2.5),
                rgb: [k as u8, 128, 255],
                error: 0.125,
                track: Vec::new(),
            },
        );
    }
    // keypoint 0 of the second image already belongs to the next point
    for k in 0..names.len().saturating_sub(1) {
        let pid = 10 + k as u64;
        let a = k as u32 + 1;
        let b = k as u32 + 2;
        r.images.get_mut(&a).unwrap().points2d[0].point3d_id = Some(pid);
        r.images.get_mut(&b).unwrap().points2d[1].point3d_id = Some(pid);
        let track = &mut r.points3d.get_mut(&pid).unwrap().track;
        track.push(TrackElement {
            image_id: a,
            point2d_idx: 0,
        });
        track.push(TrackElement {
            image_id: b,
            point2d_idx: 1,
        });
    }
    r
}

#[test]
fn test_camera_model_ids() {
    for m in CameraModel::ALL.iter() {
        assert_eq!(CameraModel::from_id(m.id()), Some(*m));
        assert_eq!(CameraModel::from_name(m.name()), Some(*m));
    }
    assert_eq!(CameraModel::from_id(12), None);
    assert_eq!(CameraModel::from_id(-1), None);
    assert_eq!(CameraModel::from_name("PINHOLE_ISH"), None);
}

#[test]
fn test_sample_is_valid() {
    let r = sample(&["a.png", "b.png", "c.png"]);
    assert_eq!(r.validate(), Ok(()));
    assert_eq!(r.num_points(), 2);
    assert_eq!(r.num_observations(), 4);
    assert_eq!(r.images[&2].num_observations(), 2);
}

#[test]
fn test_validate_missing_camera() {
    let mut r = sample(&["a.png", "b.png"]);
    r.images.get_mut(&2).unwrap().camera_id = 7;
    let err = r.validate().unwrap_err();
    assert_eq!(err.entity, Entity::Image);
    assert_eq!(err.id, 2);
    assert_eq!(err.invariant, Invariant::MissingCamera(7));
}

#[test]
fn test_validate_dangling_track() {
    let mut r = sample(&["a.png", "b.png"]);
    r.images.remove(&2);
    let err = r.validate().unwrap_err();
    assert_eq!(err.entity, Entity::Point3d);
    assert_eq!(err.invariant, Invariant::MissingImage(2));
}

#[test]
fn test_validate_duplicate_name() {
    let mut r = sample(&["a.png", "b.png", "a.png"]);
    let err = r.validate().unwrap_err();
    assert_eq!(err.entity, Entity::Image);
    assert_eq!(err.id, 3);
    assert_eq!(
        err.invariant,
        Invariant::DuplicateName {
            name: "a.png".to_string(),
            first: 1
        }
    );
    r.images.get_mut(&3).unwrap().name = "sub/a.png".to_string();
    assert_eq!(r.validate(), Ok(()));
}

#[test]
fn test_validate_back_reference() {
    let mut r = sample(&["a.png", "b.png"]);
    r.images.get_mut(&1).unwrap().points2d[0].point3d_id = None;
    let err = r.validate().unwrap_err();
    assert_eq!(
        err.invariant,
        Invariant::BackReference {
            image_id: 1,
            point2d_idx: 0
        }
    );
}

#[test]
fn test_validate_param_count() {
    let mut r = sample(&["a.png"]);
    r.cameras.get_mut(&1).unwrap().params.pop();
    let err = r.validate().unwrap_err();
    assert_eq!(err.to_string(), "camera 1 expected 4 intrinsic parameters, found 3");
}

#[test]
fn test_unreferenced_camera() {
    let mut r = sample(&["a.png"]);
    let mut extra = r.cameras[&1].clone();
    extra.id = 2;
    r.cameras.insert(2, extra);
    assert_eq!(r.validate(), Ok(()));
    assert_eq!(
        r.validate_cameras_referenced().unwrap_err().invariant,
        Invariant::UnreferencedCamera
    );
}
