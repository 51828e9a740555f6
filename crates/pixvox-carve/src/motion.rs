//! Foreground masks by temporal frame differencing.

use crate::undistort::UndistortMap;
use image::{DynamicImage, GrayImage, Luma};
use pixvox_capture::{CaptureCycle, FrameSnapshot};
use pixvox_core::{CameraCalibration, CameraId, ImageSize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionParams {
    /// A pixel is foreground when its intensity changed by more than this.
    pub threshold: u8,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self { threshold: 25 }
    }
}

/// Mask of one camera for one cycle.
#[derive(Clone, Debug, PartialEq)]
pub enum MaskOutcome {
    /// 0 = background, 255 = foreground, undistorted frame geometry.
    Known(GrayImage),
    /// No previous frame to compare against yet.
    Unknown,
}

impl MaskOutcome {
    pub fn mask(&self) -> Option<&GrayImage> {
        match self {
            MaskOutcome::Known(mask) => Some(mask),
            MaskOutcome::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, MaskOutcome::Known(_))
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MaskError {
    #[error("{0} has no calibration")]
    CalibrationMissing(CameraId),
}

struct CameraState {
    calibration: CameraCalibration,
    map: UndistortMap,
    previous: Option<GrayImage>,
    /// Source sequence and outcome of the last snapshot seen.
    last: Option<(u64, MaskOutcome)>,
}

impl CameraState {
    fn new(calibration: &CameraCalibration, size: ImageSize) -> Self {
        log::debug!(
            "{}: building undistortion map for {}x{}",
            calibration.camera,
            size.width,
            size.height
        );
        Self {
            calibration: calibration.clone(),
            map: UndistortMap::for_frame(calibration, size),
            previous: None,
            last: None,
        }
    }
}

/// Keeps the undistortion map and the previous intensity frame of every
/// camera it has seen.
#[derive(Default)]
pub struct MotionMaskExtractor {
    params: MotionParams,
    cameras: BTreeMap<CameraId, CameraState>,
}

fn difference_mask(current: &GrayImage, previous: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(current.width(), current.height(), |x, y| {
        let a = current.get_pixel(x, y)[0];
        let b = previous.get_pixel(x, y)[0];
        Luma([if a.abs_diff(b) > threshold { 255 } else { 0 }])
    })
}

impl MotionMaskExtractor {
    pub fn new(params: MotionParams) -> Self {
        Self {
            params,
            cameras: BTreeMap::new(),
        }
    }

    pub fn params(&self) -> &MotionParams {
        &self.params
    }

    /// Mask of `camera` for `frame`, compared with the frame it saw last.
    ///
    /// The first frame of a camera, and the first one after its size or
    /// calibration changed, yields [`MaskOutcome::Unknown`].
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, frame, calibration))
    )]
    pub fn extract(
        &mut self,
        camera: CameraId,
        frame: &DynamicImage,
        calibration: Option<&CameraCalibration>,
    ) -> Result<MaskOutcome, MaskError> {
        let calibration = calibration.ok_or(MaskError::CalibrationMissing(camera))?;
        let size = ImageSize::new(frame.width(), frame.height());

        let state = self
            .cameras
            .entry(camera)
            .or_insert_with(|| CameraState::new(calibration, size));
        if state.map.size() != size || state.calibration != *calibration {
            *state = CameraState::new(calibration, size);
        }

        let luma = frame.to_luma8();
        let current = state.map.apply(&luma).unwrap_or(luma);
        let outcome = match &state.previous {
            Some(previous) => {
                MaskOutcome::Known(difference_mask(&current, previous, self.params.threshold))
            }
            None => MaskOutcome::Unknown,
        };
        state.previous = Some(current);
        Ok(outcome)
    }

    /// Mask of one captured snapshot.
    ///
    /// A snapshot whose sequence was already seen yields the outcome it had
    /// then, never a self-difference.
    pub fn extract_frame(
        &mut self,
        snapshot: &FrameSnapshot,
        calibration: Option<&CameraCalibration>,
    ) -> Result<MaskOutcome, MaskError> {
        let camera = snapshot.camera;
        let size = ImageSize::new(snapshot.image.width(), snapshot.image.height());
        if let (Some(state), Some(calibration)) = (self.cameras.get(&camera), calibration) {
            let current = state.map.size() == size && state.calibration == *calibration;
            if let Some((sequence, outcome)) = state.last.as_ref().filter(|_| current) {
                if *sequence == snapshot.sequence {
                    log::debug!("{camera}: frame #{sequence} seen before, mask reused");
                    return Ok(outcome.clone());
                }
            }
        }

        let outcome = self.extract(camera, &snapshot.image, calibration)?;
        if let Some(state) = self.cameras.get_mut(&camera) {
            state.last = Some((snapshot.sequence, outcome.clone()));
        }
        Ok(outcome)
    }

    /// Masks for every frame of `cycle`.
    ///
    /// Cameras without a frame in the cycle are absent from the result and
    /// keep their previous frame.
    pub fn extract_all(
        &mut self,
        cycle: &CaptureCycle,
        calibrations: &BTreeMap<CameraId, CameraCalibration>,
    ) -> BTreeMap<CameraId, Result<MaskOutcome, MaskError>> {
        cycle
            .frames
            .iter()
            .map(|(&camera, snapshot)| {
                let outcome = self.extract_frame(snapshot, calibrations.get(&camera));
                (camera, outcome)
            })
            .collect()
    }

    /// Drop the history of `camera`; its next frame is `Unknown` again.
    pub fn forget(&mut self, camera: CameraId) {
        self.cameras.remove(&camera);
    }

    pub fn has_history(&self, camera: CameraId) -> bool {
        self.cameras
            .get(&camera)
            .is_some_and(|s| s.previous.is_some())
    }
}
