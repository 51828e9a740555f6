//! Replay recorded frames from disk as if they were live cameras.
//!
//! Layout: `<root>/cam-<id>/` holds the frames of camera `<id>`, played in
//! file-name order.

use crate::camera::{Camera, CameraProvider};
use crate::error::CaptureError;
use image::DynamicImage;
use pixvox_core::CameraId;
use std::path::{Path, PathBuf};
use std::time::Duration;

const FRAME_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Clone, Debug)]
pub struct ReplayProvider {
    root: PathBuf,
    frame_interval: Duration,
    looping: bool,
}

impl ReplayProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            frame_interval: Duration::from_millis(33),
            looping: true,
        }
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Stop after the last frame instead of starting over.
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn camera_dir(&self, camera: CameraId) -> PathBuf {
        self.root.join(format!("cam-{}", camera.index()))
    }

    fn frames(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        frames.sort();
        Ok(frames)
    }
}

impl CameraProvider for ReplayProvider {
    fn open(&self, camera: CameraId) -> Result<Box<dyn Camera>, CaptureError> {
        let dir = self.camera_dir(camera);
        let unavailable = |reason: String| CaptureError::DeviceUnavailable { camera, reason };
        let frames =
            Self::frames(&dir).map_err(|e| unavailable(format!("{}: {e}", dir.display())))?;
        if frames.is_empty() {
            return Err(unavailable(format!("{}: no frames", dir.display())));
        }
        log::debug!("{camera}: replaying {} frames from {}", frames.len(), dir.display());
        Ok(Box::new(ReplayCamera {
            camera,
            frames,
            next: 0,
            frame_interval: self.frame_interval,
            looping: self.looping,
        }))
    }
}

struct ReplayCamera {
    camera: CameraId,
    frames: Vec<PathBuf>,
    next: usize,
    frame_interval: Duration,
    looping: bool,
}

impl Camera for ReplayCamera {
    fn read_frame(&mut self) -> Result<DynamicImage, CaptureError> {
        std::thread::sleep(self.frame_interval);
        if self.next >= self.frames.len() {
            if !self.looping {
                return Err(CaptureError::Timeout {
                    camera: self.camera,
                });
            }
            self.next = 0;
        }
        let path = &self.frames[self.next];
        self.next += 1;
        image::open(path).map_err(|e| CaptureError::Read {
            camera: self.camera,
            reason: format!("{}: {e}", path.display()),
        })
    }
}
