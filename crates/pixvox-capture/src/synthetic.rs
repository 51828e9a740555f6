//! Scripted in-memory cameras for tests and demos.

use crate::camera::{Camera, CameraProvider};
use crate::error::CaptureError;
use image::DynamicImage;
use parking_lot::Mutex;
use pixvox_core::CameraId;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// Produces frame `n` of a camera.
pub type FrameScript = Arc<dyn Fn(u64) -> DynamicImage + Send + Sync>;

#[derive(Default)]
struct State {
    stalled: BTreeSet<CameraId>,
    open: BTreeSet<CameraId>,
}

/// Provider whose cameras render frames from closures.
///
/// A camera can be stalled at runtime; a stalled camera keeps timing out
/// without delivering frames.
#[derive(Clone)]
pub struct SyntheticProvider {
    scripts: BTreeMap<CameraId, FrameScript>,
    frame_interval: Duration,
    state: Arc<Mutex<State>>,
}

impl SyntheticProvider {
    pub fn new(frame_interval: Duration) -> Self {
        Self {
            scripts: BTreeMap::new(),
            frame_interval,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn with_camera(
        mut self,
        camera: CameraId,
        script: impl Fn(u64) -> DynamicImage + Send + Sync + 'static,
    ) -> Self {
        self.scripts.insert(camera, Arc::new(script));
        self
    }

    /// Camera that returns the same image forever.
    pub fn with_static_camera(self, camera: CameraId, image: DynamicImage) -> Self {
        self.with_camera(camera, move |_| image.clone())
    }

    pub fn cameras(&self) -> impl Iterator<Item = CameraId> + '_ {
        self.scripts.keys().copied()
    }

    pub fn set_stalled(&self, camera: CameraId, stalled: bool) {
        let mut state = self.state.lock();
        if stalled {
            state.stalled.insert(camera);
        } else {
            state.stalled.remove(&camera);
        }
    }

    /// Whether a handle for `camera` is currently open.
    pub fn is_open(&self, camera: CameraId) -> bool {
        self.state.lock().open.contains(&camera)
    }
}

impl CameraProvider for SyntheticProvider {
    fn open(&self, camera: CameraId) -> Result<Box<dyn Camera>, CaptureError> {
        let script = self
            .scripts
            .get(&camera)
            .cloned()
            .ok_or_else(|| CaptureError::DeviceUnavailable {
                camera,
                reason: "no synthetic camera at this index".to_string(),
            })?;
        let mut state = self.state.lock();
        if !state.open.insert(camera) {
            return Err(CaptureError::DeviceUnavailable {
                camera,
                reason: "already open".to_string(),
            });
        }
        Ok(Box::new(SyntheticCamera {
            camera,
            script,
            next: 0,
            frame_interval: self.frame_interval,
            state: self.state.clone(),
            released: false,
        }))
    }
}

struct SyntheticCamera {
    camera: CameraId,
    script: FrameScript,
    next: u64,
    frame_interval: Duration,
    state: Arc<Mutex<State>>,
    released: bool,
}

impl Camera for SyntheticCamera {
    fn read_frame(&mut self) -> Result<DynamicImage, CaptureError> {
        std::thread::sleep(self.frame_interval.max(Duration::from_millis(1)));
        if self.state.lock().stalled.contains(&self.camera) {
            return Err(CaptureError::Timeout {
                camera: self.camera,
            });
        }
        let frame = (self.script)(self.next);
        self.next += 1;
        Ok(frame)
    }

    fn release(&mut self) {
        if !self.released {
            self.state.lock().open.remove(&self.camera);
            self.released = true;
        }
    }
}

impl Drop for SyntheticCamera {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn gray(value: u8) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([value])))
    }

    #[test]
    fn open_tracks_handles_and_rejects_unknown_cameras() {
        let provider = SyntheticProvider::new(Duration::ZERO).with_static_camera(CameraId(1), gray(9));
        assert!(provider.open(CameraId(0)).is_err());

        let mut cam = provider.open(CameraId(1)).unwrap();
        assert!(provider.is_open(CameraId(1)));
        assert!(provider.open(CameraId(1)).is_err());
        assert_eq!(cam.read_frame().unwrap().to_luma8().get_pixel(0, 0)[0], 9);
        cam.release();
        assert!(!provider.is_open(CameraId(1)));
        assert!(provider.probe(CameraId(1)));
    }

    #[test]
    fn stalled_camera_times_out() {
        let provider =
            SyntheticProvider::new(Duration::ZERO).with_camera(CameraId(0), |n| gray(n as u8));
        let mut cam = provider.open(CameraId(0)).unwrap();
        provider.set_stalled(CameraId(0), true);
        assert_eq!(
            cam.read_frame().unwrap_err(),
            CaptureError::Timeout {
                camera: CameraId(0)
            }
        );
        provider.set_stalled(CameraId(0), false);
        assert_eq!(cam.read_frame().unwrap().to_luma8().get_pixel(0, 0)[0], 0);
    }
}
