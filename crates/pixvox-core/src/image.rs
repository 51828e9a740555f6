/// Borrowed row-major 8-bit grayscale image.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // row-major, len = w*h
}

impl GrayImageView<'_> {
    /// Pixel at `(x, y)`, `None` outside the image.
    #[inline]
    pub fn get(&self, x: i64, y: i64) -> Option<u8> {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        Some(self.data[y as usize * self.width + x as usize])
    }
}

/// Borrow an `image::GrayImage` as a lightweight view.
pub fn gray_view(img: &::image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: img.width() as usize,
        height: img.height() as usize,
        data: img.as_raw(),
    }
}

// Border pixels are replicated so samples near the edge stay unbiased.
#[inline]
fn get_clamped(src: &GrayImageView<'_>, x: i64, y: i64) -> f32 {
    let xc = x.clamp(0, src.width as i64 - 1) as usize;
    let yc = y.clamp(0, src.height as i64 - 1) as usize;
    src.data[yc * src.width + xc] as f32
}

/// Bilinear sample at sub-pixel `(x, y)`; `None` when the point is outside
/// the pixel-centre grid `[0, w-1] x [0, h-1]`.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f32, y: f32) -> Option<f32> {
    if src.width == 0 || src.height == 0 {
        return None;
    }
    if !(x >= 0.0 && y >= 0.0 && x <= (src.width - 1) as f32 && y <= (src.height - 1) as f32) {
        return None;
    }
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = get_clamped(src, x0, y0);
    let p10 = get_clamped(src, x0 + 1, y0);
    let p01 = get_clamped(src, x0, y0 + 1);
    let p11 = get_clamped(src, x0 + 1, y0 + 1);

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    Some(a + fy * (b - a))
}

#[inline]
pub fn sample_bilinear_u8(src: &GrayImageView<'_>, x: f32, y: f32) -> Option<u8> {
    sample_bilinear(src, x, y).map(|v| v.round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_interpolate_between_pixels() {
        let data = [0u8, 100, 200, 50];
        let view = GrayImageView {
            width: 2,
            height: 2,
            data: &data,
        };
        assert_eq!(Some(0.0), sample_bilinear(&view, 0.0, 0.0));
        assert_eq!(Some(50.0), sample_bilinear(&view, 0.5, 0.0));
        assert_eq!(Some(87.5), sample_bilinear(&view, 0.5, 0.5));
        assert_eq!(None, sample_bilinear(&view, -0.1, 0.0));
        assert_eq!(None, sample_bilinear(&view, 0.0, 1.01));
    }

    #[test]
    fn integer_coordinates_return_exact_pixels() {
        let data: Vec<u8> = (0..12).map(|v| v * 20).collect();
        let view = GrayImageView {
            width: 4,
            height: 3,
            data: &data,
        };
        for y in 0..3 {
            for x in 0..4 {
                assert_eq!(
                    view.get(x, y),
                    sample_bilinear_u8(&view, x as f32, y as f32)
                );
            }
        }
    }
}
