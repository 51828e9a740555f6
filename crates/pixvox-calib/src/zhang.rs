//! Closed-form initialisation for planar calibration (Zhang 2000).
//!
//! Homographies are estimated per view, intrinsics come from the image of the
//! absolute conic (or, with fewer than three views, from the focal-only
//! variant with a fixed principal point), poses from homography
//! decomposition and distortion from a linear fit over the homography
//! residuals.

use nalgebra::{
    DMatrix, DVector, Isometry3, Matrix3, Point2, Rotation3, SVector, Translation3, UnitQuaternion,
    Vector3,
};
use pixvox_core::{Distortion, ImageSize, Intrinsics, Pose};

/// Build the 6-vector v_ij(H) of Zhang's method (0-based column indices).
fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);

    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Pixel conditioning `N` with `N * K` still upper-triangular.
fn conditioning(size: ImageSize) -> Matrix3<f64> {
    let sx = 2.0 / size.width.max(1) as f64;
    let sy = 2.0 / size.height.max(1) as f64;
    Matrix3::new(sx, 0.0, -1.0, 0.0, sy, -1.0, 0.0, 0.0, 1.0)
}

fn conditioned(hs: &[Matrix3<f64>], size: ImageSize) -> Vec<Matrix3<f64>> {
    let n = conditioning(size);
    hs.iter()
        .map(|h| {
            let m = n * h;
            m / m.norm()
        })
        .collect()
}

fn unconditioned(k_cond: Matrix3<f64>, size: ImageSize) -> Option<Intrinsics> {
    let k = conditioning(size).try_inverse()? * k_cond;
    let intr = Intrinsics::from_matrix(&k);
    let plausible = [intr.fx, intr.fy, intr.cx, intr.cy, intr.skew]
        .iter()
        .all(|v| v.is_finite())
        && intr.fx > 0.0
        && intr.fy > 0.0;
    plausible.then_some(intr)
}

/// Full Zhang solution; needs at least three homographies.
pub(crate) fn intrinsics_from_homographies(
    hs: &[Matrix3<f64>],
    size: ImageSize,
) -> Option<Intrinsics> {
    if hs.len() < 3 {
        return None;
    }
    let hs = conditioned(hs, size);

    let m = hs.len();
    let mut vmtx = DMatrix::<f64>::zeros((2 * m).max(6), 6);
    for (k, h) in hs.iter().enumerate() {
        let v11 = v_ij(h, 0, 0);
        let v22 = v_ij(h, 1, 1);
        let v12 = v_ij(h, 0, 1);
        vmtx.row_mut(2 * k).copy_from(&v12.transpose());
        vmtx.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    let svd = vmtx.svd(false, true);
    let v_t = svd.v_t?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let row = v_t.row(min_idx);
    // B is defined up to sign; B11 = 1/fx^2 must be positive.
    let sign = if row[0] < 0.0 { -1.0 } else { 1.0 };
    let b: Vec<f64> = row.iter().map(|v| v * sign).collect();
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if denom.abs() <= 1e-12 * (b11 * b11 + b22 * b22) {
        return None;
    }

    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda / b11 <= 0.0 || lambda * b11 / denom <= 0.0 {
        return None;
    }

    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    let k_cond = Matrix3::new(alpha, gamma, u0, 0.0, beta, v0, 0.0, 0.0, 1.0);
    unconditioned(k_cond, size)
}

/// Focal lengths only, with the principal point fixed at `(cx, cy)` and zero
/// skew. One tilted view is enough.
pub(crate) fn intrinsics_fixed_center(
    hs: &[Matrix3<f64>],
    size: ImageSize,
    cx: f64,
    cy: f64,
) -> Option<Intrinsics> {
    if hs.is_empty() {
        return None;
    }
    let n = conditioning(size);
    let c = n * Vector3::new(cx, cy, 1.0);
    // Move the principal point to the origin: K' = diag(fx', fy', 1).
    let shift = Matrix3::new(1.0, 0.0, -c.x, 0.0, 1.0, -c.y, 0.0, 0.0, 1.0);
    let hs: Vec<Matrix3<f64>> = conditioned(hs, size)
        .into_iter()
        .map(|h| {
            let m = shift * h;
            m / m.norm()
        })
        .collect();

    // Unknowns a = 1/fx'^2, b = 1/fy'^2 in B = diag(a, b, 1).
    let mut a = DMatrix::<f64>::zeros(2 * hs.len(), 2);
    let mut rhs = DVector::<f64>::zeros(2 * hs.len());
    for (k, h) in hs.iter().enumerate() {
        let h1 = h.column(0);
        let h2 = h.column(1);
        a[(2 * k, 0)] = h1[0] * h2[0];
        a[(2 * k, 1)] = h1[1] * h2[1];
        rhs[2 * k] = -h1[2] * h2[2];
        a[(2 * k + 1, 0)] = h1[0] * h1[0] - h2[0] * h2[0];
        a[(2 * k + 1, 1)] = h1[1] * h1[1] - h2[1] * h2[1];
        rhs[2 * k + 1] = -(h1[2] * h1[2] - h2[2] * h2[2]);
    }
    let sol = a.svd(true, true).solve(&rhs, 1e-12).ok()?;
    let (ia, ib) = (sol[0], sol[1]);
    if !(ia > 0.0 && ib > 0.0) {
        return None;
    }

    let k_shifted = Matrix3::new(1.0 / ia.sqrt(), 0.0, 0.0, 0.0, 1.0 / ib.sqrt(), 0.0, 0.0, 0.0, 1.0);
    let k_cond = shift.try_inverse()? * k_shifted;
    unconditioned(k_cond, size)
}

/// Decompose a board homography into the board -> camera pose.
///
/// The sign of the homography is chosen so the board lies in front of the
/// camera.
pub(crate) fn planar_pose(intr: &Intrinsics, h: &Matrix3<f64>) -> Option<Pose> {
    let k_inv = intr.matrix().try_inverse()?;
    let m = k_inv * h;

    let norm1 = m.column(0).norm();
    let norm2 = m.column(1).norm();
    if norm1 < 1e-12 || norm2 < 1e-12 {
        return None;
    }
    let mut lambda = 2.0 / (norm1 + norm2);
    if m[(2, 2)] * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1: Vector3<f64> = m.column(0) * lambda;
    let r2: Vector3<f64> = m.column(1) * lambda;
    let r3 = r1.cross(&r2);
    let mut r_mat = Matrix3::<f64>::zeros();
    r_mat.set_column(0, &r1);
    r_mat.set_column(1, &r2);
    r_mat.set_column(2, &r3);

    // Project onto SO(3).
    let svd = r_mat.svd(true, true);
    let mut u = svd.u?;
    let v_t = svd.v_t?;
    if (u * v_t).determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    let r_orth = u * v_t;

    let t: Vector3<f64> = m.column(2) * lambda;
    let rot = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r_orth));
    Some(Isometry3::from_parts(Translation3::from(t), rot))
}

/// One view's inputs to the linear distortion fit.
pub(crate) struct DistortionView<'a> {
    pub homography: Matrix3<f64>,
    pub board: &'a [Point2<f64>],
    pub pixels: &'a [Point2<f64>],
}

/// Linear least-squares estimate of `k1, k2, p1, p2` (and `k3` unless fixed)
/// from the residuals between homography predictions and observations.
pub(crate) fn fit_distortion(
    intr: &Intrinsics,
    views: &[DistortionView<'_>],
    fix_k3: bool,
    fix_tangential: bool,
) -> Option<Distortion> {
    let total: usize = views.iter().map(|v| v.board.len()).sum();
    let mut columns = vec![Term::K1, Term::K2];
    if !fix_tangential {
        columns.extend([Term::P1, Term::P2]);
    }
    if !fix_k3 {
        columns.push(Term::K3);
    }
    if 2 * total < columns.len() + 2 {
        return None;
    }

    let mut a = DMatrix::<f64>::zeros(2 * total, columns.len());
    let mut b = DVector::<f64>::zeros(2 * total);
    let mut row = 0;
    for view in views {
        for (board, pixel) in view.board.iter().zip(view.pixels) {
            let ideal = view.homography * Vector3::new(board.x, board.y, 1.0);
            let ideal = Point2::new(ideal.x / ideal.z, ideal.y / ideal.z);
            let n_ideal = intr.to_normalized(&ideal);
            let n_obs = intr.to_normalized(pixel);
            let residual = n_obs - n_ideal;

            let (x, y) = (n_ideal.x, n_ideal.y);
            let r2 = x * x + y * y;
            for (col, term) in columns.iter().enumerate() {
                let (dx, dy) = match term {
                    Term::K1 => (x * r2, y * r2),
                    Term::K2 => (x * r2 * r2, y * r2 * r2),
                    Term::K3 => (x * r2 * r2 * r2, y * r2 * r2 * r2),
                    Term::P1 => (2.0 * x * y, r2 + 2.0 * y * y),
                    Term::P2 => (r2 + 2.0 * x * x, 2.0 * x * y),
                };
                a[(row, col)] = dx;
                a[(row + 1, col)] = dy;
            }
            b[row] = residual.x;
            b[row + 1] = residual.y;
            row += 2;
        }
    }

    let sol = a.svd(true, true).solve(&b, 1e-12).ok()?;
    let mut d = Distortion::default();
    for (term, value) in columns.iter().zip(sol.iter()) {
        if !value.is_finite() {
            return None;
        }
        match term {
            Term::K1 => d.k1 = *value,
            Term::K2 => d.k2 = *value,
            Term::K3 => d.k3 = *value,
            Term::P1 => d.p1 = *value,
            Term::P2 => d.p2 = *value,
        }
    }
    Some(d)
}

#[derive(Clone, Copy)]
enum Term {
    K1,
    K2,
    K3,
    P1,
    P2,
}
