//! Pinhole camera model with Brown–Conrady distortion.
//!
//! Conventions follow the usual computer-vision ones: a pose maps points from
//! a source frame (board or world) into the camera frame, the camera looks
//! along `+Z`, and pixel coordinates have their origin at the centre of the
//! top-left pixel.

use nalgebra::{Isometry3, Matrix3, Point2, Point3, Rotation3, Translation3, UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Rigid transform from a source frame into the camera frame.
pub type Pose = Isometry3<f64>;

/// Build a pose from a Rodrigues rotation vector and a translation.
pub fn pose_from_vectors(rvec: [f64; 3], tvec: [f64; 3]) -> Pose {
    let rotation = UnitQuaternion::from_scaled_axis(Vector3::from(rvec));
    Isometry3::from_parts(Translation3::from(Vector3::from(tvec)), rotation)
}

/// Split a pose into `(rvec, tvec)`.
pub fn pose_to_vectors(pose: &Pose) -> ([f64; 3], [f64; 3]) {
    let r = pose.rotation.scaled_axis();
    let t = pose.translation.vector;
    ([r.x, r.y, r.z], [t.x, t.y, t.z])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether a pixel coordinate lies on the image (pixel centres at integers).
    #[inline]
    pub fn contains(&self, p: &Point2<f64>) -> bool {
        p.x >= -0.5 && p.y >= -0.5 && p.x < self.width as f64 - 0.5 && p.y < self.height as f64 - 0.5
    }
}

/// Focal lengths, principal point and skew of a pinhole camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub skew: f64,
}

impl Intrinsics {
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, self.skew, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
            skew: k[(0, 1)],
        }
    }

    /// Normalized image plane -> pixel.
    #[inline]
    pub fn to_pixel(&self, n: &Vector2<f64>) -> Point2<f64> {
        Point2::new(
            self.fx * n.x + self.skew * n.y + self.cx,
            self.fy * n.y + self.cy,
        )
    }

    /// Same camera observed at another resolution.
    pub fn rescaled(&self, from: ImageSize, to: ImageSize) -> Self {
        if from == to || from.width == 0 || from.height == 0 {
            return *self;
        }
        let sx = to.width as f64 / from.width as f64;
        let sy = to.height as f64 / from.height as f64;
        // Pixel centres sit at integers, so the half-pixel offset scales too.
        Self {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: (self.cx + 0.5) * sx - 0.5,
            cy: (self.cy + 0.5) * sy - 0.5,
            skew: self.skew * sx,
        }
    }

    /// Pixel -> normalized image plane.
    #[inline]
    pub fn to_normalized(&self, p: &Point2<f64>) -> Vector2<f64> {
        let y = (p.y - self.cy) / self.fy;
        let x = (p.x - self.cx - self.skew * y) / self.fx;
        Vector2::new(x, y)
    }
}

/// Brown–Conrady lens distortion with the optional rational terms.
///
/// Coefficient order matches the conventional flat vector
/// `k1, k2, p1, p2, k3, k4, k5, k6`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
    pub k4: f64,
    pub k5: f64,
    pub k6: f64,
}

impl Distortion {
    /// Build from a flat coefficient vector; missing trailing terms are zero.
    pub fn from_coeffs(coeffs: &[f64]) -> Self {
        let c = |i: usize| coeffs.get(i).copied().unwrap_or(0.0);
        Self {
            k1: c(0),
            k2: c(1),
            p1: c(2),
            p2: c(3),
            k3: c(4),
            k4: c(5),
            k5: c(6),
            k6: c(7),
        }
    }

    /// Flat coefficients; 8 terms when any rational term is set, else 5.
    pub fn to_coeffs(&self) -> Vec<f64> {
        let mut out = vec![self.k1, self.k2, self.p1, self.p2, self.k3];
        if self.k4 != 0.0 || self.k5 != 0.0 || self.k6 != 0.0 {
            out.extend([self.k4, self.k5, self.k6]);
        }
        out
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Apply distortion to a point on the normalized image plane.
    pub fn distort(&self, n: &Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;

        let num = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let den = 1.0 + self.k4 * r2 + self.k5 * r4 + self.k6 * r6;
        let radial = num / den;

        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;

        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, n_dist: &Vector2<f64>, iters: u32) -> Vector2<f64> {
        let mut n = *n_dist;
        for _ in 0..iters.max(1) {
            let err = self.distort(&n) - n_dist;
            n -= err;
        }
        n
    }
}

/// Calibrated camera placed in a shared world frame.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraModel {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
    /// World -> camera.
    pub world_to_camera: Pose,
    pub image_size: ImageSize,
}

impl CameraModel {
    /// Ideal (undistorted) pinhole projection of a world point.
    ///
    /// Returns `None` for points on or behind the camera plane.
    #[inline]
    pub fn project(&self, p_world: &Point3<f64>) -> Option<Point2<f64>> {
        let pc = self.world_to_camera * p_world;
        if pc.z <= 1e-9 {
            return None;
        }
        let n = Vector2::new(pc.x / pc.z, pc.y / pc.z);
        Some(self.intrinsics.to_pixel(&n))
    }

    /// Projection including lens distortion, i.e. where the point appears in
    /// a raw frame.
    pub fn project_distorted(&self, p_world: &Point3<f64>) -> Option<Point2<f64>> {
        let pc = self.world_to_camera * p_world;
        if pc.z <= 1e-9 {
            return None;
        }
        let n = Vector2::new(pc.x / pc.z, pc.y / pc.z);
        Some(self.intrinsics.to_pixel(&self.distortion.distort(&n)))
    }

    /// Camera centre in world coordinates.
    pub fn center(&self) -> Point3<f64> {
        self.world_to_camera.inverse() * Point3::origin()
    }

    /// Rotation part as a matrix, convenient for ray construction.
    pub fn rotation(&self) -> Rotation3<f64> {
        self.world_to_camera.rotation.to_rotation_matrix()
    }
}
