use crate::error::CaptureError;
use image::DynamicImage;
use pixvox_core::CameraId;

/// An opened capture device.
///
/// Handles are created and used on their acquisition thread only, so they
/// need not be `Send`.
pub trait Camera {
    /// Block until the next frame is available.
    ///
    /// [`CaptureError::Timeout`] means "no new frame yet" and is not counted
    /// as a failure.
    fn read_frame(&mut self) -> Result<DynamicImage, CaptureError>;

    /// Release the device. Called exactly once before the handle is dropped.
    fn release(&mut self) {}
}

/// Opens cameras by device index.
pub trait CameraProvider: Send + Sync {
    fn open(&self, camera: CameraId) -> Result<Box<dyn Camera>, CaptureError>;

    /// Whether `camera` can currently be opened.
    fn probe(&self, camera: CameraId) -> bool {
        match self.open(camera) {
            Ok(mut handle) => {
                handle.release();
                true
            }
            Err(_) => false,
        }
    }
}

/// Probe device indices `0..max_index`; unopenable ones are skipped.
pub fn discover(provider: &dyn CameraProvider, max_index: u32) -> Vec<CameraId> {
    let found: Vec<CameraId> = (0..max_index)
        .map(CameraId)
        .filter(|&id| provider.probe(id))
        .collect();
    log::info!(
        "found {} camera(s): {}",
        found.len(),
        found
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    found
}
