//! Restricting a reconstruction to a subset of its images.
extern crate log;

use crate::reconstruction::*;

use log::debug;
use std::collections::{BTreeMap, BTreeSet};

/// Select the part of `r` seen by the images in `retained`.
///
/// Cameras no retained image uses are dropped. Tracks lose their entries for dropped images and
/// points left without observations are dropped. Keypoints of retained images are never removed;
/// a keypoint whose point was dropped keeps its position but loses its point link. Ids are
/// preserved.
///
/// The result is validated before it is returned. An error here means the filter itself is
/// broken, not that the input was bad.
pub fn filter(
    r: &Reconstruction,
    retained: &BTreeSet<ImageId>,
) -> Result<Reconstruction, InvariantViolation> {
    let mut images: BTreeMap<ImageId, Image> = r
        .images
        .iter()
        .filter(|(id, _)| retained.contains(id))
        .map(|(id, image)| (*id, image.clone()))
        .collect();

    let used_cameras: BTreeSet<CameraId> = images.values().map(|i| i.camera_id).collect();
    let cameras: BTreeMap<CameraId, Camera> = r
        .cameras
        .iter()
        .filter(|(id, _)| used_cameras.contains(id))
        .map(|(id, camera)| (*id, camera.clone()))
        .collect();

    let points3d: BTreeMap<Point3dId, Point3d> = r
        .points3d
        .values()
        .filter_map(|point| {
            let track: Vec<TrackElement> = point
                .track
                .iter()
                .filter(|t| images.contains_key(&t.image_id))
                .copied()
                .collect();
            if track.is_empty() {
                None
            } else {
                Some((
                    point.id,
                    Point3d {
                        track,
                        ..point.clone()
                    },
                ))
            }
        })
        .collect();

    let mut unlinked = 0;
    for image in images.values_mut() {
        for keypoint in image.points2d.iter_mut() {
            if let Some(pid) = keypoint.point3d_id {
                if !points3d.contains_key(&pid) {
                    keypoint.point3d_id = None;
                    unlinked += 1;
                }
            }
        }
    }

    debug!(
        "kept {}/{} images, {}/{} cameras, {}/{} points; unlinked {} keypoints",
        images.len(),
        r.num_images(),
        cameras.len(),
        r.num_cameras(),
        points3d.len(),
        r.num_points(),
        unlinked
    );

    let filtered = Reconstruction::new(cameras, images, points3d);
    filtered.validate()?;
    filtered.validate_cameras_referenced()?;
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[ImageId]) -> BTreeSet<ImageId> {
        v.iter().copied().collect()
    }

    /// Images 1..=8, one point seen only by images 3 and 7.
    fn two_view_point() -> Reconstruction {
        let mut r = sample(&["1.png", "2.png", "3.png", "4.png", "5.png", "6.png", "7.png", "8.png"]);
        r.points3d.clear();
        for image in r.images.values_mut() {
            for k in image.points2d.iter_mut() {
                k.point3d_id = None;
            }
        }
        r.images.get_mut(&3).unwrap().points2d[0].point3d_id = Some(99);
        r.images.get_mut(&7).unwrap().points2d[1].point3d_id = Some(99);
        r.points3d.insert(
            99,
            Point3d {
                id: 99,
                xyz: cgmath::Point3::new(1., 2., 3.),
                rgb: [1, 2, 3],
                error: 0.5,
                track: vec![
                    TrackElement {
                        image_id: 3,
                        point2d_idx: 0,
                    },
                    TrackElement {
                        image_id: 7,
                        point2d_idx: 1,
                    },
                ],
            },
        );
        r.validate().unwrap();
        r
    }

    #[test]
    fn identity() {
        let r = sample(&["a.png", "b.png", "c.png"]);
        assert_eq!(filter(&r, &ids(&[1, 2, 3])).unwrap(), r);
    }

    #[test]
    fn prunes_track() {
        let r = two_view_point();
        let f = filter(&r, &ids(&[1, 3, 5])).unwrap();
        assert_eq!(
            f.points3d[&99].track,
            vec![TrackElement {
                image_id: 3,
                point2d_idx: 0
            }]
        );
        assert_eq!(f.images[&3].points2d[0].point3d_id, Some(99));
    }

    #[test]
    fn drops_unobserved_point() {
        let r = two_view_point();
        let f = filter(&r, &ids(&[1, 5])).unwrap();
        assert!(f.points3d.is_empty());
        assert_eq!(f.num_images(), 2);
    }

    #[test]
    fn keeps_keypoints() {
        let r = sample(&["a.png", "b.png", "c.png", "d.png"]);
        let f = filter(&r, &ids(&[1, 4])).unwrap();
        // images 1 and 4 share no point, so every track shrinks to one entry
        assert_eq!(f.num_points(), 2);
        assert!(f.points3d.values().all(|p| p.track.len() == 1));
        for image in f.images.values() {
            assert_eq!(image.points2d.len(), 2);
            assert_eq!(image.points2d[0].xy, r.images[&image.id].points2d[0].xy);
        }
    }

    #[test]
    fn drops_unused_cameras() {
        let mut r = sample(&["a.png", "b.png", "c.png"]);
        let mut other = r.cameras[&1].clone();
        other.id = 2;
        r.cameras.insert(2, other);
        r.images.get_mut(&3).unwrap().camera_id = 2;

        let f = filter(&r, &ids(&[1, 2])).unwrap();
        assert_eq!(f.cameras.keys().copied().collect::<Vec<_>>(), vec![1]);
        let f = filter(&r, &ids(&[3])).unwrap();
        assert_eq!(f.cameras.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn unknown_ids_are_ignored() {
        let r = sample(&["a.png", "b.png"]);
        let f = filter(&r, &ids(&[2, 40])).unwrap();
        assert_eq!(f.images.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn empty_selection() {
        let r = sample(&["a.png", "b.png"]);
        assert_eq!(filter(&r, &BTreeSet::new()).unwrap(), Reconstruction::default());
    }

    #[test]
    fn integrity_holds_for_every_subset() {
        let r = sample(&["a.png", "b.png", "c.png", "d.png", "e.png"]);
        for mask in 0u32..32 {
            let keep: BTreeSet<ImageId> = (1..=5).filter(|i| mask & (1 << (i - 1)) != 0).collect();
            let f = filter(&r, &keep).unwrap();
            assert_eq!(f.images.keys().copied().collect::<BTreeSet<_>>(), keep);
            for p in f.points3d.values() {
                assert!(!p.track.is_empty());
                assert!(p.track.iter().all(|t| keep.contains(&t.image_id)));
            }
        }
    }
}
