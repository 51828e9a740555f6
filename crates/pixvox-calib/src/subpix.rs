//! Iterative sub-pixel corner refinement.
//!
//! For a saddle point `q`, every image gradient `g(p)` inside a small window
//! is orthogonal to `p - q`. Solving the Gaussian-weighted least-squares
//! system `sum(g gᵀ) q = sum(g gᵀ p)` and iterating converges on the saddle.

use nalgebra::Point2;
use pixvox_core::{sample_bilinear, GrayImageView};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPixParams {
    /// Search window is `(2 * half_window + 1)^2` pixels.
    pub half_window: u32,
    pub max_iterations: u32,
    /// Stop once an update moves the corner less than this (pixels).
    pub epsilon: f64,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 11,
            max_iterations: 30,
            epsilon: 0.1,
        }
    }
}

fn gradient(img: &GrayImageView<'_>, x: f32, y: f32) -> Option<(f64, f64)> {
    let gx = (sample_bilinear(img, x + 1.0, y)? - sample_bilinear(img, x - 1.0, y)?) * 0.5;
    let gy = (sample_bilinear(img, x, y + 1.0)? - sample_bilinear(img, x, y - 1.0)?) * 0.5;
    Some((gx as f64, gy as f64))
}

/// Refine one corner. Returns the input unchanged if the window carries no
/// usable structure or the estimate runs off further than the window size.
pub fn refine_corner(
    img: &GrayImageView<'_>,
    corner: Point2<f32>,
    params: &SubPixParams,
) -> Point2<f32> {
    let hw = params.half_window.max(1) as i32;
    let inv_w2 = 1.0 / (hw * hw) as f64;
    let weights: Vec<f64> = (-hw..=hw)
        .map(|d| (-(d * d) as f64 * inv_w2).exp())
        .collect();

    let start = (corner.x as f64, corner.y as f64);
    let mut q = start;
    for _ in 0..params.max_iterations.max(1) {
        let (mut a, mut b, mut c) = (0.0f64, 0.0f64, 0.0f64);
        let (mut bb1, mut bb2) = (0.0f64, 0.0f64);

        for (iy, dy) in (-hw..=hw).enumerate() {
            for (ix, dx) in (-hw..=hw).enumerate() {
                let px = q.0 + dx as f64;
                let py = q.1 + dy as f64;
                let Some((gx, gy)) = gradient(img, px as f32, py as f32) else {
                    continue;
                };
                let w = weights[ix] * weights[iy];
                let gxx = gx * gx * w;
                let gxy = gx * gy * w;
                let gyy = gy * gy * w;
                a += gxx;
                b += gxy;
                c += gyy;
                bb1 += gxx * px + gxy * py;
                bb2 += gxy * px + gyy * py;
            }
        }

        let det = a * c - b * b;
        if det.abs() <= f64::EPSILON * (a * c).abs().max(1.0) {
            break;
        }
        let next = ((c * bb1 - b * bb2) / det, (a * bb2 - b * bb1) / det);
        let shift = (next.0 - q.0).hypot(next.1 - q.1);
        q = next;
        if shift < params.epsilon {
            break;
        }
    }

    let moved = (q.0 - start.0).hypot(q.1 - start.1);
    if !q.0.is_finite() || !q.1.is_finite() || moved > hw as f64 {
        return corner;
    }
    Point2::new(q.0 as f32, q.1 as f32)
}

pub fn refine_corners(
    img: &GrayImageView<'_>,
    corners: &[Point2<f32>],
    params: &SubPixParams,
) -> Vec<Point2<f32>> {
    corners
        .iter()
        .map(|&c| refine_corner(img, c, params))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Anti-aliased X-junction centred at (cx, cy).
    fn saddle(w: usize, h: usize, cx: f32, cy: f32) -> Vec<u8> {
        let mut data = vec![0u8; w * h];
        let ss = 4;
        for y in 0..h {
            for x in 0..w {
                let mut acc = 0u32;
                for sy in 0..ss {
                    for sx in 0..ss {
                        let px = x as f32 - 0.5 + (sx as f32 + 0.5) / ss as f32;
                        let py = y as f32 - 0.5 + (sy as f32 + 0.5) / ss as f32;
                        if (px - cx) * (py - cy) > 0.0 {
                            acc += 255;
                        }
                    }
                }
                data[y * w + x] = (acc / (ss * ss) as u32) as u8;
            }
        }
        data
    }

    #[test]
    fn converges_on_saddle_point() {
        let (w, h) = (48, 48);
        let data = saddle(w, h, 23.3, 24.6);
        let img = GrayImageView {
            width: w,
            height: h,
            data: &data,
        };
        let params = SubPixParams {
            half_window: 5,
            max_iterations: 30,
            epsilon: 0.001,
        };
        let refined = refine_corner(&img, Point2::new(24.0, 24.0), &params);
        assert!((refined.x - 23.3).abs() < 0.1, "x = {}", refined.x);
        assert!((refined.y - 24.6).abs() < 0.1, "y = {}", refined.y);
    }

    #[test]
    fn flat_window_leaves_corner_unchanged() {
        let data = vec![128u8; 32 * 32];
        let img = GrayImageView {
            width: 32,
            height: 32,
            data: &data,
        };
        let p = Point2::new(16.0, 16.0);
        assert_eq!(refine_corner(&img, p, &SubPixParams::default()), p);
    }
}
