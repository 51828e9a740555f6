use image::GrayImage;
use nalgebra::Point2;
use pixvox_core::{gray_view, sample_bilinear_u8, CameraCalibration, Distortion, ImageSize, Intrinsics};

/// Precomputed inverse map from an ideal pinhole image back into the raw
/// (distorted) frame.
///
/// Output pixels whose source falls off the raw frame are black.
#[derive(Clone, Debug)]
pub struct UndistortMap {
    size: ImageSize,
    /// Raw-frame coordinate of every output pixel, row-major.
    sources: Vec<Option<Point2<f32>>>,
    identity: bool,
}

impl UndistortMap {
    pub fn new(intrinsics: &Intrinsics, distortion: &Distortion, size: ImageSize) -> Self {
        let identity = distortion.is_zero();
        let (w, h) = (size.width as usize, size.height as usize);
        let mut sources = Vec::with_capacity(if identity { 0 } else { w * h });
        if !identity {
            for y in 0..h {
                for x in 0..w {
                    let n = intrinsics.to_normalized(&Point2::new(x as f64, y as f64));
                    let p = intrinsics.to_pixel(&distortion.distort(&n));
                    let inside = p.x >= 0.0
                        && p.y >= 0.0
                        && p.x <= (w - 1) as f64
                        && p.y <= (h - 1) as f64;
                    sources.push(inside.then(|| Point2::new(p.x as f32, p.y as f32)));
                }
            }
        }
        Self {
            size,
            sources,
            identity,
        }
    }

    /// Map for frames of `size` taken by the calibrated camera.
    ///
    /// Intrinsics are rescaled when `size` differs from the calibration
    /// resolution.
    pub fn for_frame(calibration: &CameraCalibration, size: ImageSize) -> Self {
        let intrinsics = calibration.intrinsics().rescaled(calibration.image_size, size);
        Self::new(&intrinsics, &calibration.distortion(), size)
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// The camera has no distortion; [`UndistortMap::apply`] copies.
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Raw-frame coordinate sampled for output pixel `(x, y)`.
    pub fn source(&self, x: u32, y: u32) -> Option<Point2<f32>> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        if self.identity {
            return Some(Point2::new(x as f32, y as f32));
        }
        self.sources[y as usize * self.size.width as usize + x as usize]
    }

    /// Undistort a frame of [`UndistortMap::size`].
    ///
    /// Returns `None` on a size mismatch.
    pub fn apply(&self, frame: &GrayImage) -> Option<GrayImage> {
        if frame.width() != self.size.width || frame.height() != self.size.height {
            return None;
        }
        if self.identity {
            return Some(frame.clone());
        }
        let src = gray_view(frame);
        let w = self.size.width as usize;
        Some(GrayImage::from_fn(self.size.width, self.size.height, |x, y| {
            let v = self.sources[y as usize * w + x as usize]
                .and_then(|p| sample_bilinear_u8(&src, p.x, p.y))
                .unwrap_or(0);
            image::Luma([v])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Luma;

    fn intrinsics() -> Intrinsics {
        Intrinsics {
            fx: 100.0,
            fy: 100.0,
            cx: 31.5,
            cy: 23.5,
            skew: 0.0,
        }
    }

    #[test]
    fn zero_distortion_is_a_copy() {
        let size = ImageSize::new(64, 48);
        let map = UndistortMap::new(&intrinsics(), &Distortion::default(), size);
        assert!(map.is_identity());
        let img = GrayImage::from_fn(64, 48, |x, y| Luma([(x * 3 + y) as u8]));
        assert_eq!(map.apply(&img).unwrap(), img);
        assert!(map.apply(&GrayImage::new(10, 10)).is_none());
    }

    #[test]
    fn sources_follow_the_distortion_model() {
        let k = intrinsics();
        let d = Distortion {
            k1: -0.2,
            ..Default::default()
        };
        let map = UndistortMap::new(&k, &d, ImageSize::new(64, 48));
        assert!(!map.is_identity());

        let src = map.source(60, 40).unwrap();
        let n = k.to_normalized(&Point2::new(60.0, 40.0));
        let expected = k.to_pixel(&d.distort(&n));
        assert_relative_eq!(src.x as f64, expected.x, epsilon = 1e-4);
        assert_relative_eq!(src.y as f64, expected.y, epsilon = 1e-4);

        // Barrel distortion pulls edge pixels towards the centre.
        assert!(src.x < 60.0 && src.y < 40.0);
        let centre = map.source(31, 23).unwrap();
        assert_relative_eq!(centre.x, 31.0, epsilon = 1e-2);
    }

    #[test]
    fn uniform_frame_stays_uniform_where_covered() {
        let k = intrinsics();
        let d = Distortion {
            k1: -0.2,
            ..Default::default()
        };
        let map = UndistortMap::new(&k, &d, ImageSize::new(64, 48));
        let out = map.apply(&GrayImage::from_pixel(64, 48, Luma([90]))).unwrap();
        assert_eq!(out.get_pixel(31, 23)[0], 90);
        assert_eq!(out.get_pixel(63, 47)[0], 90);
    }
}
