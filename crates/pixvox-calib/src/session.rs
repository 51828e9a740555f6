//! Calibration photo session: discover cameras, capture chessboard photos
//! in lock-step, detect the board and solve every camera.
//!
//! The session never touches a terminal. Countdown and progress go through
//! [`SessionObserver`]; the caller decides how to show them.

use crate::detect::{detect_observation, ChessCornersFinder, ChessboardFinder, FinderParams};
use crate::naming::{image_file_name, parse_image_file_name};
use crate::pattern::PatternSize;
use crate::solver::{CalibrationError, CalibrationSolver, SolverParams};
use crate::store::{CalibrationStore, StoreError};
use crate::subpix::SubPixParams;
use image::DynamicImage;
use pixvox_capture::{discover, Camera, CameraProvider, CaptureError};
use pixvox_core::{CameraCalibration, CameraId, ImageSize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionParams {
    pub pattern: PatternSize,
    /// Capture rounds; each round takes one photo per camera.
    pub photo_count: u32,
    /// Delay between countdown ticks and between rounds.
    pub interval_ms: u64,
    /// Countdown ticks before the first round.
    pub countdown: u32,
    /// Device indices `0..max_probe_index` are probed.
    pub max_probe_index: u32,
    pub min_cameras: usize,
    pub images_dir: PathBuf,
    pub image_extension: String,
    /// Give up on a camera that delivers no frame for this long.
    pub frame_timeout_ms: u64,
    pub finder: FinderParams,
    pub subpix: SubPixParams,
    pub solver: SolverParams,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            pattern: PatternSize::default(),
            photo_count: 20,
            interval_ms: 1000,
            countdown: 5,
            max_probe_index: 10,
            min_cameras: 2,
            images_dir: PathBuf::from("calibration_images"),
            image_extension: "png".to_string(),
            frame_timeout_ms: 2000,
            finder: FinderParams::default(),
            subpix: SubPixParams::default(),
            solver: SolverParams::default(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("need at least {required} cameras, found {found}")]
    InsufficientCameras { required: usize, found: usize },
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Progress callbacks; every method defaults to doing nothing.
pub trait SessionObserver {
    fn countdown(&mut self, _remaining: u32) {}
    fn captured(&mut self, _round: u32, _total: u32) {}
    fn detection(&mut self, _camera: CameraId, _sequence: u32, _found: bool) {}
    fn calibrated(
        &mut self,
        _camera: CameraId,
        _result: &Result<CameraCalibration, CalibrationError>,
    ) {
    }
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// One photograph tagged with the camera and round it came from.
#[derive(Clone, Debug)]
pub struct CalibrationImage {
    pub camera: CameraId,
    pub sequence: u32,
    pub image: DynamicImage,
}

/// Outcome of [`CalibrationSession::calibrate_directory`].
#[derive(Debug, Default)]
pub struct SessionReport {
    /// Solved and saved.
    pub calibrated: BTreeMap<CameraId, CameraCalibration>,
    pub failed: BTreeMap<CameraId, CalibrationError>,
    /// Solved but could not be written to the store.
    pub unsaved: BTreeMap<CameraId, StoreError>,
    /// Files in the images directory whose names did not parse.
    pub skipped_files: Vec<PathBuf>,
    /// Cameras dropped during capture; photos from earlier rounds are kept.
    pub capture_failed: BTreeMap<CameraId, CaptureError>,
}

/// Outcome of [`CalibrationSession::capture_images`].
#[derive(Debug, Default)]
pub struct CaptureOutcome {
    pub saved: Vec<PathBuf>,
    /// Cameras that could not be opened or stopped delivering frames.
    pub failed: BTreeMap<CameraId, CaptureError>,
}

/// Open camera handles, released on drop.
struct OpenCameras(BTreeMap<CameraId, Box<dyn Camera>>);

impl Drop for OpenCameras {
    fn drop(&mut self) {
        for camera in self.0.values_mut() {
            camera.release();
        }
    }
}

pub struct CalibrationSession {
    params: SessionParams,
    finder: Box<dyn ChessboardFinder>,
    solver: CalibrationSolver,
    store: CalibrationStore,
}

impl CalibrationSession {
    pub fn new(params: SessionParams, store: CalibrationStore) -> Self {
        let finder = Box::new(ChessCornersFinder::new(params.finder));
        let solver = CalibrationSolver::new(params.solver);
        Self {
            params,
            finder,
            solver,
            store,
        }
    }

    /// Replace the chessboard finder.
    pub fn with_finder(mut self, finder: impl ChessboardFinder + 'static) -> Self {
        self.finder = Box::new(finder);
        self
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.params.interval_ms)
    }

    pub fn discover(&self, provider: &dyn CameraProvider) -> Vec<CameraId> {
        discover(provider, self.params.max_probe_index)
    }

    fn read_with_timeout(
        &self,
        camera: CameraId,
        handle: &mut dyn Camera,
    ) -> Result<DynamicImage, CaptureError> {
        let deadline = Instant::now() + Duration::from_millis(self.params.frame_timeout_ms);
        loop {
            match handle.read_frame() {
                Err(CaptureError::Timeout { .. }) if Instant::now() < deadline => continue,
                Err(CaptureError::Timeout { .. }) => return Err(CaptureError::Timeout { camera }),
                other => return other,
            }
        }
    }

    fn ensure_enough(&self, remaining: usize) -> Result<(), SessionError> {
        if remaining < self.params.min_cameras {
            return Err(SessionError::InsufficientCameras {
                required: self.params.min_cameras,
                found: remaining,
            });
        }
        Ok(())
    }

    /// Capture `photo_count` lock-step rounds from `cameras` into the images
    /// directory. Round `k` is saved as sequence `k` for every camera.
    ///
    /// A camera that fails to open or to deliver a frame is dropped from the
    /// remaining rounds and reported in [`CaptureOutcome::failed`]. Capture
    /// stops with [`SessionError::InsufficientCameras`] once fewer than
    /// `min_cameras` are left.
    pub fn capture_images(
        &self,
        provider: &dyn CameraProvider,
        cameras: &[CameraId],
        observer: &mut dyn SessionObserver,
    ) -> Result<CaptureOutcome, SessionError> {
        let dir = &self.params.images_dir;
        fs::create_dir_all(dir).map_err(|source| SessionError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut outcome = CaptureOutcome::default();
        let mut open = OpenCameras(BTreeMap::new());
        for &camera in cameras {
            match provider.open(camera) {
                Ok(handle) => {
                    open.0.insert(camera, handle);
                }
                Err(err) => {
                    log::warn!("{camera}: {err}, left out of the session");
                    outcome.failed.insert(camera, err);
                }
            }
        }
        self.ensure_enough(open.0.len())?;

        for remaining in (1..=self.params.countdown).rev() {
            observer.countdown(remaining);
            std::thread::sleep(self.interval());
        }

        let total = self.params.photo_count;
        outcome.saved.reserve(total as usize * open.0.len());
        for round in 0..total {
            let mut dropped = Vec::new();
            for (&camera, handle) in open.0.iter_mut() {
                let frame = match self.read_with_timeout(camera, handle.as_mut()) {
                    Ok(frame) => frame,
                    Err(err) => {
                        log::warn!("{camera}: {err}, dropped after round {round}");
                        dropped.push((camera, err));
                        continue;
                    }
                };
                let path = dir.join(image_file_name(
                    camera,
                    round,
                    &self.params.image_extension,
                ));
                frame.save(&path).map_err(|source| SessionError::Image {
                    path: path.clone(),
                    source,
                })?;
                outcome.saved.push(path);
            }
            for (camera, err) in dropped {
                if let Some(mut handle) = open.0.remove(&camera) {
                    handle.release();
                }
                outcome.failed.insert(camera, err);
            }
            self.ensure_enough(open.0.len())?;

            observer.captured(round + 1, total);
            log::info!("captured round {}/{total}", round + 1);
            if round + 1 < total {
                std::thread::sleep(self.interval());
            }
        }
        Ok(outcome)
    }

    /// Detect and solve every camera present in `images`.
    ///
    /// Images are grouped by the camera they are tagged with; nothing is
    /// written anywhere.
    pub fn calibrate_images(
        &self,
        images: &[CalibrationImage],
        observer: &mut dyn SessionObserver,
    ) -> BTreeMap<CameraId, Result<CameraCalibration, CalibrationError>> {
        let mut by_camera: BTreeMap<CameraId, Vec<&CalibrationImage>> = BTreeMap::new();
        for image in images {
            by_camera.entry(image.camera).or_default().push(image);
        }

        let pattern = &self.params.pattern;
        let mut results = BTreeMap::new();
        for (camera, mut shots) in by_camera {
            shots.sort_by_key(|s| s.sequence);
            let size = ImageSize::new(shots[0].image.width(), shots[0].image.height());

            let mut observations = Vec::new();
            for shot in &shots {
                if (shot.image.width(), shot.image.height()) != (size.width, size.height) {
                    log::warn!(
                        "{camera}: photo #{} has a different size, skipped",
                        shot.sequence
                    );
                    continue;
                }
                match detect_observation(
                    self.finder.as_ref(),
                    camera,
                    shot.sequence,
                    &shot.image,
                    pattern,
                    &self.params.subpix,
                ) {
                    Ok(observation) => {
                        observer.detection(camera, shot.sequence, true);
                        observations.push(observation);
                    }
                    Err(err) => {
                        observer.detection(camera, shot.sequence, false);
                        log::debug!("{camera}: photo #{}: {err}", shot.sequence);
                    }
                }
            }
            log::info!(
                "{camera}: chessboard found in {}/{} photos",
                observations.len(),
                shots.len()
            );

            let result = self.solver.solve(&observations, pattern, size);
            if let Err(err) = &result {
                log::warn!("{camera}: calibration failed: {err}");
            }
            observer.calibrated(camera, &result);
            results.insert(camera, result);
        }
        results
    }

    /// Read every parseable calibration image from `dir`.
    ///
    /// Returns the images and the files that were skipped because their
    /// names did not parse or they could not be decoded.
    pub fn load_images(dir: &Path) -> Result<(Vec<CalibrationImage>, Vec<PathBuf>), SessionError> {
        let entries = fs::read_dir(dir).map_err(|source| SessionError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut images = Vec::new();
        let mut skipped = Vec::new();
        for path in paths {
            let parsed = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_image_file_name);
            let Some((camera, sequence)) = parsed else {
                log::warn!("skipping {}: not a calibration image name", path.display());
                skipped.push(path);
                continue;
            };
            match image::open(&path) {
                Ok(image) => images.push(CalibrationImage {
                    camera,
                    sequence,
                    image,
                }),
                Err(err) => {
                    log::warn!("skipping {}: {err}", path.display());
                    skipped.push(path);
                }
            }
        }
        Ok((images, skipped))
    }

    /// Calibrate from the images directory and save every success.
    pub fn calibrate_directory(
        &self,
        observer: &mut dyn SessionObserver,
    ) -> Result<SessionReport, SessionError> {
        let (images, skipped_files) = Self::load_images(&self.params.images_dir)?;
        let mut report = SessionReport {
            skipped_files,
            ..SessionReport::default()
        };

        for (camera, result) in self.calibrate_images(&images, observer) {
            match result {
                Ok(calibration) => match self.store.save(camera, &calibration) {
                    Ok(()) => {
                        report.calibrated.insert(camera, calibration);
                    }
                    Err(err) => {
                        log::error!("{camera}: {err}");
                        report.unsaved.insert(camera, err);
                    }
                },
                Err(err) => {
                    report.failed.insert(camera, err);
                }
            }
        }
        Ok(report)
    }

    /// Discover, capture and calibrate.
    pub fn run(
        &self,
        provider: &dyn CameraProvider,
        observer: &mut dyn SessionObserver,
    ) -> Result<SessionReport, SessionError> {
        let cameras = self.discover(provider);
        if cameras.len() < self.params.min_cameras {
            return Err(SessionError::InsufficientCameras {
                required: self.params.min_cameras,
                found: cameras.len(),
            });
        }
        let capture = self.capture_images(provider, &cameras, observer)?;
        let mut report = self.calibrate_directory(observer)?;
        report.capture_failed = capture.failed;
        Ok(report)
    }

    /// Delete captured calibration images; returns how many were removed.
    pub fn clear_images(&self) -> Result<usize, SessionError> {
        let dir = &self.params.images_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(SessionError::Io {
                    path: dir.clone(),
                    source,
                })
            }
        };

        let mut removed = 0;
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            let is_image = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_image_file_name)
                .is_some();
            if is_image {
                fs::remove_file(&path).map_err(|source| SessionError::Io {
                    path: path.clone(),
                    source,
                })?;
                removed += 1;
            }
        }
        log::info!("removed {removed} calibration images from {}", dir.display());
        Ok(removed)
    }
}
