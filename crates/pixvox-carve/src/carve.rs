//! Shape from silhouette: carve every voxel that some camera sees as
//! background.

use crate::motion::MaskOutcome;
use crate::voxel::{GridSpec, Occupancy, VoxelGrid};
use pixvox_core::{CameraCalibration, CameraId, CameraModel, ImageSize};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Which coordinate frame the voxel grid lives in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WorldFrame {
    /// Board frame of the calibration photo taken as round `sequence`.
    BoardView { sequence: u32 },
    /// Earliest calibration round seen by every camera.
    #[default]
    FirstCommonView,
}

/// Camera models placed in one world frame.
#[derive(Clone, Debug, Default)]
pub struct RigModels {
    /// Calibration round that defines the world frame.
    pub sequence: Option<u32>,
    pub models: BTreeMap<CameraId, CameraModel>,
    /// Calibrated cameras without a pose for `sequence`.
    pub missing_view: BTreeSet<CameraId>,
}

fn reference_sequence(
    calibrations: &BTreeMap<CameraId, CameraCalibration>,
    world: WorldFrame,
) -> Option<u32> {
    match world {
        WorldFrame::BoardView { sequence } => Some(sequence),
        WorldFrame::FirstCommonView => {
            // Most cameras first, then the earliest round.
            let mut coverage: BTreeMap<u32, usize> = BTreeMap::new();
            for calib in calibrations.values() {
                let seen: BTreeSet<u32> = calib.view_sequences.iter().copied().collect();
                for s in seen {
                    *coverage.entry(s).or_default() += 1;
                }
            }
            coverage
                .into_iter()
                .max_by(|(sa, ca), (sb, cb)| ca.cmp(cb).then(sb.cmp(sa)))
                .map(|(s, _)| s)
        }
    }
}

/// Build world-frame camera models from per-camera calibrations.
///
/// With [`WorldFrame::FirstCommonView`] and no round shared by all cameras,
/// the round shared by the most cameras is used and the rest are reported
/// in [`RigModels::missing_view`].
pub fn camera_models(
    calibrations: &BTreeMap<CameraId, CameraCalibration>,
    world: WorldFrame,
) -> RigModels {
    let Some(sequence) = reference_sequence(calibrations, world) else {
        return RigModels::default();
    };

    let mut out = RigModels {
        sequence: Some(sequence),
        ..RigModels::default()
    };
    for (&camera, calib) in calibrations {
        match calib.pose_for_sequence(sequence) {
            Some(world_to_camera) => {
                out.models.insert(
                    camera,
                    CameraModel {
                        intrinsics: calib.intrinsics(),
                        distortion: calib.distortion(),
                        world_to_camera,
                        image_size: calib.image_size,
                    },
                );
            }
            None => {
                log::warn!("{camera}: no calibration view #{sequence}, left out of the rig");
                out.missing_view.insert(camera);
            }
        }
    }
    out
}

/// Why a camera did not take part in a reconstruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NoCameraModel,
    /// The camera has no stored calibration, so no mask could be made.
    CalibrationMissing,
    NoMask,
    /// The camera delivered no new frame this cycle.
    NoNewFrame,
    MaskUnknown,
}

#[derive(Clone, Debug)]
pub struct Reconstruction {
    pub grid: VoxelGrid,
    pub contributing: BTreeSet<CameraId>,
    pub skipped: BTreeMap<CameraId, SkipReason>,
}

impl Reconstruction {
    /// Share of known cameras that carved, 0 when there were none.
    pub fn confidence(&self) -> f64 {
        let total = self.contributing.len() + self.skipped.len();
        if total == 0 {
            return 0.0;
        }
        self.contributing.len() as f64 / total as f64
    }
}

#[derive(Clone, Debug, Default)]
pub struct VoxelReconstructor {
    spec: GridSpec,
}

impl VoxelReconstructor {
    pub fn new(spec: GridSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    /// Carve a fresh grid with the masks of this cycle.
    ///
    /// Masks are in undistorted geometry, so voxel centres are projected with
    /// the ideal pinhole model. A mask whose size differs from the camera's
    /// calibration resolution is addressed with rescaled intrinsics.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(cameras = cameras.len(), masks = masks.len()))
    )]
    pub fn reconstruct(
        &self,
        cameras: &BTreeMap<CameraId, CameraModel>,
        masks: &BTreeMap<CameraId, MaskOutcome>,
    ) -> Reconstruction {
        let mut grid = VoxelGrid::new(&self.spec);
        grid.fill(Occupancy::Occupied);

        let mut contributing = BTreeSet::new();
        let mut skipped = BTreeMap::new();
        let ids: BTreeSet<CameraId> = cameras.keys().chain(masks.keys()).copied().collect();

        for camera in ids {
            let model = match cameras.get(&camera) {
                Some(model) => model,
                None => {
                    skipped.insert(camera, SkipReason::NoCameraModel);
                    continue;
                }
            };
            let mask = match masks.get(&camera) {
                Some(MaskOutcome::Known(mask)) => mask,
                Some(MaskOutcome::Unknown) => {
                    skipped.insert(camera, SkipReason::MaskUnknown);
                    continue;
                }
                None => {
                    skipped.insert(camera, SkipReason::NoMask);
                    continue;
                }
            };

            let mask_size = ImageSize::new(mask.width(), mask.height());
            let model = CameraModel {
                intrinsics: model.intrinsics.rescaled(model.image_size, mask_size),
                image_size: mask_size,
                ..model.clone()
            };

            let mut carved = 0usize;
            for idx in 0..grid.len() {
                if grid.states[idx] != Occupancy::Occupied {
                    continue;
                }
                let foreground = model
                    .project(&grid.center(idx))
                    .filter(|p| mask_size.contains(p))
                    .is_some_and(|p| {
                        let x = p.x.round().clamp(0.0, (mask_size.width - 1) as f64) as u32;
                        let y = p.y.round().clamp(0.0, (mask_size.height - 1) as f64) as u32;
                        mask.get_pixel(x, y)[0] != 0
                    });
                if !foreground {
                    grid.states[idx] = Occupancy::Empty;
                    carved += 1;
                }
            }
            log::debug!("{camera}: carved {carved} voxels");
            contributing.insert(camera);
        }

        Reconstruction {
            grid,
            contributing,
            skipped,
        }
    }
}
