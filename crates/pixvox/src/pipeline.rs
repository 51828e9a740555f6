use crate::config::RigConfig;
use pixvox_calib::CalibrationStore;
use pixvox_capture::{CameraProvider, CaptureOrchestrator};
use pixvox_carve::{
    camera_models, MaskError, MaskOutcome, MotionMaskExtractor, Reconstruction, RigModels,
    SkipReason, VoxelReconstructor,
};
use pixvox_core::{CameraCalibration, CameraId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Conditions that make the whole pipeline pointless.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("no cameras are running")]
    NoCameras,
    #[error("no running camera has a usable calibration")]
    NoCalibration,
}

/// Result of one capture -> mask -> carve cycle.
#[derive(Clone, Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub reconstruction: Reconstruction,
    pub mask_errors: BTreeMap<CameraId, MaskError>,
    /// Cameras whose latest frame was already used by an earlier cycle.
    pub unchanged: BTreeSet<CameraId>,
    pub stale: BTreeSet<CameraId>,
    pub pending: BTreeSet<CameraId>,
    pub skew: Duration,
}

pub struct Pipeline {
    orchestrator: CaptureOrchestrator,
    calibrations: BTreeMap<CameraId, CameraCalibration>,
    rig: RigModels,
    extractor: MotionMaskExtractor,
    reconstructor: VoxelReconstructor,
}

impl Pipeline {
    /// Wrap a running orchestrator.
    ///
    /// Calibrations of cameras that are not running are ignored; running
    /// cameras without one take part in capture but never carve.
    pub fn new(
        orchestrator: CaptureOrchestrator,
        mut calibrations: BTreeMap<CameraId, CameraCalibration>,
        config: &RigConfig,
    ) -> Result<Self, PipelineError> {
        let running = orchestrator.cameras();
        if running.is_empty() {
            return Err(PipelineError::NoCameras);
        }
        calibrations.retain(|id, _| running.contains(id));
        for camera in running.iter().filter(|id| !calibrations.contains_key(*id)) {
            log::warn!("{camera}: not calibrated, excluded from reconstruction");
        }

        let rig = camera_models(&calibrations, config.world);
        if rig.models.is_empty() {
            return Err(PipelineError::NoCalibration);
        }
        if let Some(sequence) = rig.sequence {
            log::info!(
                "world frame: calibration board #{sequence}, {} of {} cameras placed",
                rig.models.len(),
                running.len()
            );
        }

        Ok(Self {
            orchestrator,
            calibrations,
            rig,
            extractor: MotionMaskExtractor::new(config.motion),
            reconstructor: VoxelReconstructor::new(config.grid),
        })
    }

    /// Load calibrations from `store`, then start capturing `cameras`.
    pub fn start(
        cameras: &[CameraId],
        provider: Arc<dyn CameraProvider>,
        store: &CalibrationStore,
        config: &RigConfig,
    ) -> Result<Self, PipelineError> {
        if cameras.is_empty() {
            return Err(PipelineError::NoCameras);
        }
        let loaded = store.load_all(cameras.iter().copied());
        for (camera, err) in &loaded.failed {
            log::warn!("{camera}: {err}");
        }
        if loaded.found.is_empty() {
            return Err(PipelineError::NoCalibration);
        }
        let orchestrator =
            CaptureOrchestrator::start(cameras.iter().copied(), provider, config.capture.clone());
        Self::new(orchestrator, loaded.found, config)
    }

    pub fn rig(&self) -> &RigModels {
        &self.rig
    }

    pub fn cameras(&self) -> BTreeSet<CameraId> {
        self.orchestrator.cameras()
    }

    /// Running cameras that cannot carve.
    pub fn uncalibrated(&self) -> BTreeSet<CameraId> {
        self.orchestrator
            .cameras()
            .into_iter()
            .filter(|id| !self.rig.models.contains_key(id))
            .collect()
    }

    #[cfg_attr(feature = "tracing", instrument(level = "info", skip(self)))]
    pub fn cycle(&mut self) -> CycleReport {
        let capture = self.orchestrator.poll();

        let mut masks: BTreeMap<CameraId, MaskOutcome> = BTreeMap::new();
        let mut mask_errors = BTreeMap::new();
        for (camera, outcome) in self.extractor.extract_all(&capture, &self.calibrations) {
            match outcome {
                Ok(mask) => {
                    masks.insert(camera, mask);
                }
                Err(err) => {
                    mask_errors.insert(camera, err);
                }
            }
        }

        let mut reconstruction = self.reconstructor.reconstruct(&self.rig.models, &masks);
        for (&camera, err) in &mask_errors {
            let reason = match err {
                MaskError::CalibrationMissing(_) => SkipReason::CalibrationMissing,
            };
            reconstruction.skipped.insert(camera, reason);
        }
        for camera in capture.unchanged.iter().chain(&capture.stale) {
            if let Some(reason) = reconstruction.skipped.get_mut(camera) {
                if *reason == SkipReason::NoMask {
                    *reason = SkipReason::NoNewFrame;
                }
            }
        }

        CycleReport {
            cycle: capture.cycle,
            reconstruction,
            mask_errors,
            unchanged: capture.unchanged,
            stale: capture.stale,
            pending: capture.pending,
            skew: capture.skew,
        }
    }

    pub fn stop(&mut self) {
        self.orchestrator.stop();
    }
}
