//! Per-camera calibration persistence.
//!
//! One pretty-printed JSON file per camera, `calibration_cam-<id>.json`.
//! Saves go through a temporary file in the same directory that is renamed
//! over the target.

use crate::naming::{calibration_file_name, parse_calibration_file_name};
use pixvox_core::{CalibrationFormatError, CameraCalibration, CameraId};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path}: invalid calibration json: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: CalibrationFormatError,
    },
    #[error("calibration of {found} cannot be stored as {expected}")]
    CameraMismatch { expected: CameraId, found: CameraId },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Result of [`CalibrationStore::load_all`].
#[derive(Debug, Default)]
pub struct LoadAll {
    pub found: BTreeMap<CameraId, CameraCalibration>,
    pub missing: BTreeSet<CameraId>,
    /// Cameras whose artifact exists but could not be read.
    pub failed: BTreeMap<CameraId, StoreError>,
}

#[derive(Clone, Debug)]
pub struct CalibrationStore {
    dir: PathBuf,
}

impl CalibrationStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, camera: CameraId) -> PathBuf {
        self.dir.join(calibration_file_name(camera))
    }

    /// Replace the stored calibration of `camera`.
    pub fn save(&self, camera: CameraId, calibration: &CameraCalibration) -> Result<(), StoreError> {
        if calibration.camera != camera {
            return Err(StoreError::CameraMismatch {
                expected: camera,
                found: calibration.camera,
            });
        }
        let path = self.path_for(camera);
        let json = serde_json::to_vec_pretty(calibration).map_err(|source| StoreError::Json {
            path: path.clone(),
            source,
        })?;

        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err(&self.dir))?;
        tmp.write_all(&json).map_err(io_err(tmp.path()))?;
        tmp.as_file().sync_all().map_err(io_err(&path))?;
        tmp.persist(&path).map_err(|e| StoreError::Io {
            path: path.clone(),
            source: e.error,
        })?;
        log::debug!("saved {camera} calibration to {}", path.display());
        Ok(())
    }

    /// Stored calibration of `camera`, `None` if it was never saved.
    pub fn load(&self, camera: CameraId) -> Result<Option<CameraCalibration>, StoreError> {
        let path = self.path_for(camera);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        let calibration: CameraCalibration =
            serde_json::from_slice(&raw).map_err(|source| StoreError::Json {
                path: path.clone(),
                source,
            })?;
        calibration
            .validate()
            .map_err(|source| StoreError::Format {
                path: path.clone(),
                source,
            })?;
        if calibration.camera != camera {
            return Err(StoreError::CameraMismatch {
                expected: camera,
                found: calibration.camera,
            });
        }
        Ok(Some(calibration))
    }

    /// Load every requested camera; missing or unreadable ones are reported,
    /// never fatal.
    pub fn load_all(&self, cameras: impl IntoIterator<Item = CameraId>) -> LoadAll {
        let mut out = LoadAll::default();
        for camera in cameras {
            match self.load(camera) {
                Ok(Some(calibration)) => {
                    out.found.insert(camera, calibration);
                }
                Ok(None) => {
                    out.missing.insert(camera);
                }
                Err(err) => {
                    log::warn!("{camera}: {err}");
                    out.failed.insert(camera, err);
                }
            }
        }
        out
    }

    pub fn contains(&self, camera: CameraId) -> bool {
        self.path_for(camera).is_file()
    }

    /// Cameras with a stored calibration file.
    pub fn list(&self) -> Result<BTreeSet<CameraId>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };
        let mut ids = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.dir))?;
            if let Some(id) = entry.file_name().to_str().and_then(parse_calibration_file_name) {
                ids.insert(id);
            }
        }
        Ok(ids)
    }

    /// Delete every stored calibration; returns how many were removed.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let ids = self.list()?;
        for id in &ids {
            let path = self.path_for(*id);
            fs::remove_file(&path).map_err(io_err(&path))?;
        }
        if !ids.is_empty() {
            log::info!("removed {} stored calibrations", ids.len());
        }
        Ok(ids.len())
    }
}
