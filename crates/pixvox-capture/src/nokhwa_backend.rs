//! Native capture devices through `nokhwa`.

use crate::camera::{Camera, CameraProvider};
use crate::error::CaptureError;
use image::{DynamicImage, RgbImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use pixvox_core::CameraId;

#[derive(Clone, Copy, Debug, Default)]
pub struct NokhwaProvider;

impl NokhwaProvider {
    pub fn new() -> Self {
        Self
    }
}

impl CameraProvider for NokhwaProvider {
    fn open(&self, camera: CameraId) -> Result<Box<dyn Camera>, CaptureError> {
        let unavailable = |reason: String| CaptureError::DeviceUnavailable { camera, reason };
        let index = CameraIndex::Index(camera.index());
        let requested =
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);
        let mut inner = nokhwa::Camera::new(index, requested)
            .map_err(|e| unavailable(format!("{e:?}")))?;
        inner
            .open_stream()
            .map_err(|e| unavailable(format!("open stream: {e:?}")))?;
        log::info!(
            "{camera}: opened {} ({}x{})",
            inner.info().human_name(),
            inner.resolution().width(),
            inner.resolution().height()
        );
        Ok(Box::new(NokhwaCamera { camera, inner }))
    }
}

struct NokhwaCamera {
    camera: CameraId,
    inner: nokhwa::Camera,
}

impl Camera for NokhwaCamera {
    fn read_frame(&mut self) -> Result<DynamicImage, CaptureError> {
        let read_err = |reason: String| CaptureError::Read {
            camera: self.camera,
            reason,
        };
        let frame = self.inner.frame().map_err(|e| read_err(format!("{e:?}")))?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| read_err(format!("decode: {e:?}")))?;
        let (width, height) = (decoded.width(), decoded.height());
        RgbImage::from_raw(width, height, decoded.into_raw())
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| read_err("frame buffer size mismatch".to_string()))
    }

    fn release(&mut self) {
        if let Err(e) = self.inner.stop_stream() {
            log::warn!("{}: stop stream failed: {e:?}", self.camera);
        }
    }
}
