use image::{GrayImage, Luma};
use nalgebra::{Isometry3, Point2, Point3, Vector3};
use pixvox_carve::{GridSpec, MaskOutcome, Occupancy, VoxelReconstructor};
use pixvox_core::{CameraId, CameraModel, Distortion, ImageSize, Intrinsics};
use std::collections::BTreeMap;

const RADIUS: f64 = 25.0;

fn camera_at(eye: Point3<f64>, up: Vector3<f64>) -> CameraModel {
    let camera_to_world = Isometry3::face_towards(&eye, &Point3::origin(), &up);
    CameraModel {
        intrinsics: Intrinsics {
            fx: 400.0,
            fy: 400.0,
            cx: 159.5,
            cy: 119.5,
            skew: 0.0,
        },
        distortion: Distortion::default(),
        world_to_camera: camera_to_world.inverse(),
        image_size: ImageSize::new(320, 240),
    }
}

/// Silhouette of a sphere of `RADIUS` at the world origin.
fn sphere_mask(model: &CameraModel) -> GrayImage {
    let centre = model.center();
    let rot_inv = model.rotation().inverse();
    GrayImage::from_fn(320, 240, |x, y| {
        let n = model
            .intrinsics
            .to_normalized(&Point2::new(x as f64, y as f64));
        let dir = (rot_inv * Vector3::new(n.x, n.y, 1.0)).normalize();
        let v = Point3::origin() - centre;
        let t = v.dot(&dir);
        let dist2 = v.norm_squared() - t * t;
        Luma([if dist2 < RADIUS * RADIUS { 255 } else { 0 }])
    })
}

#[test]
fn three_views_carve_a_sphere_hull() {
    let models: BTreeMap<CameraId, CameraModel> = BTreeMap::from([
        (CameraId(0), camera_at(Point3::new(300.0, 0.0, 0.0), Vector3::z())),
        (CameraId(1), camera_at(Point3::new(0.0, 300.0, 0.0), Vector3::z())),
        (CameraId(2), camera_at(Point3::new(0.0, 0.0, 300.0), Vector3::y())),
    ]);
    let masks: BTreeMap<CameraId, MaskOutcome> = models
        .iter()
        .map(|(&id, m)| (id, MaskOutcome::Known(sphere_mask(m))))
        .collect();

    let reconstructor = VoxelReconstructor::new(GridSpec {
        origin: [-50.0, -50.0, -50.0],
        voxel_size: 5.0,
        dims: [20, 20, 20],
    });
    let rec = reconstructor.reconstruct(&models, &masks);
    assert_eq!(rec.contributing.len(), 3);
    assert_eq!(rec.confidence(), 1.0);

    let occupied = rec.grid.count(Occupancy::Occupied);
    assert!((400..900).contains(&occupied), "occupied = {occupied}");
    assert_eq!(rec.grid.count(Occupancy::Unknown), 0);

    for idx in 0..rec.grid.len() {
        let d = rec.grid.center(idx).coords.norm();
        let state = rec.grid.states[idx];
        if d < 0.8 * RADIUS {
            assert_eq!(state, Occupancy::Occupied, "inner voxel at distance {d}");
        }
        if d > 1.5 * RADIUS {
            assert_eq!(state, Occupancy::Empty, "outer voxel at distance {d}");
        }
    }
}

#[test]
fn each_cycle_starts_from_an_occupied_grid() {
    let model = camera_at(Point3::new(300.0, 0.0, 0.0), Vector3::z());
    let models = BTreeMap::from([(CameraId(0), model.clone())]);
    let reconstructor = VoxelReconstructor::new(GridSpec {
        origin: [-10.0, -10.0, -10.0],
        voxel_size: 10.0,
        dims: [2, 2, 2],
    });

    let empty = BTreeMap::from([(CameraId(0), MaskOutcome::Known(GrayImage::new(320, 240)))]);
    assert_eq!(reconstructor.reconstruct(&models, &empty).grid.count(Occupancy::Empty), 8);

    let full = BTreeMap::from([(
        CameraId(0),
        MaskOutcome::Known(GrayImage::from_pixel(320, 240, Luma([255]))),
    )]);
    assert_eq!(reconstructor.reconstruct(&models, &full).grid.count(Occupancy::Occupied), 8);
}
