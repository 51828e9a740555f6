//! Levenberg-Marquardt refinement of intrinsics, distortion and view poses
//! by minimising reprojection error.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Point2, Point3, Vector2};
use pixvox_core::{pose_from_vectors, pose_to_vectors, Distortion, Intrinsics, Pose};

const INTRINSIC_PARAMS: usize = 9; // fx fy cx cy k1 k2 p1 p2 k3
const POSE_PARAMS: usize = 6;
const BEHIND_CAMERA_RESIDUAL: f64 = 1e3;

/// Which parameter groups stay at their initial value.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub(crate) struct FixedParams {
    pub principal_point: bool,
    pub tangential: bool,
    pub k3: bool,
}

pub(crate) struct RefineView<'a> {
    pub object: &'a [Point3<f64>],
    pub image: &'a [Point2<f64>],
}

#[derive(Clone, Debug)]
pub(crate) struct Estimate {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
    pub poses: Vec<Pose>,
}

#[derive(Clone, Debug)]
pub(crate) struct Refined {
    pub estimate: Estimate,
    /// `sqrt(sum |residual|^2 / point_count)`.
    pub rms: f64,
    /// Residual evaluations spent by the solver.
    pub evaluations: usize,
}

fn pack(est: &Estimate) -> DVector<f64> {
    let mut p = DVector::zeros(INTRINSIC_PARAMS + POSE_PARAMS * est.poses.len());
    let (k, d) = (&est.intrinsics, &est.distortion);
    for (i, v) in [k.fx, k.fy, k.cx, k.cy, d.k1, d.k2, d.p1, d.p2, d.k3]
        .into_iter()
        .enumerate()
    {
        p[i] = v;
    }
    for (v, pose) in est.poses.iter().enumerate() {
        let (r, t) = pose_to_vectors(pose);
        let base = INTRINSIC_PARAMS + POSE_PARAMS * v;
        for k in 0..3 {
            p[base + k] = r[k];
            p[base + 3 + k] = t[k];
        }
    }
    p
}

fn unpack_intrinsics(p: &DVector<f64>, skew: f64, rational: &Distortion) -> (Intrinsics, Distortion) {
    let intrinsics = Intrinsics {
        fx: p[0],
        fy: p[1],
        cx: p[2],
        cy: p[3],
        skew,
    };
    let distortion = Distortion {
        k1: p[4],
        k2: p[5],
        p1: p[6],
        p2: p[7],
        k3: p[8],
        ..*rational
    };
    (intrinsics, distortion)
}

fn view_pose(p: &DVector<f64>, v: usize) -> Pose {
    let base = INTRINSIC_PARAMS + POSE_PARAMS * v;
    pose_from_vectors(
        [p[base], p[base + 1], p[base + 2]],
        [p[base + 3], p[base + 4], p[base + 5]],
    )
}

struct Problem<'a> {
    views: &'a [RefineView<'a>],
    skew: f64,
    rational: Distortion,
    offsets: Vec<usize>,
    residual_count: usize,
}

impl<'a> Problem<'a> {
    fn new(views: &'a [RefineView<'a>], initial: &Estimate) -> Self {
        let mut offsets = Vec::with_capacity(views.len());
        let mut acc = 0;
        for view in views {
            offsets.push(acc);
            acc += 2 * view.object.len();
        }
        Self {
            views,
            skew: initial.intrinsics.skew,
            rational: initial.distortion,
            offsets,
            residual_count: acc,
        }
    }

    fn view_residuals(&self, p: &DVector<f64>, v: usize, out: &mut [f64]) {
        let (k, d) = unpack_intrinsics(p, self.skew, &self.rational);
        let pose = view_pose(p, v);
        let view = &self.views[v];
        for (i, (obj, img)) in view.object.iter().zip(view.image).enumerate() {
            let pc = pose * obj;
            let (rx, ry) = if pc.z <= 1e-9 {
                (BEHIND_CAMERA_RESIDUAL, BEHIND_CAMERA_RESIDUAL)
            } else {
                let n = d.distort(&Vector2::new(pc.x / pc.z, pc.y / pc.z));
                let px = k.to_pixel(&n);
                (px.x - img.x, px.y - img.y)
            };
            out[2 * i] = rx;
            out[2 * i + 1] = ry;
        }
    }

    fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
        let mut r = DVector::zeros(self.residual_count);
        for v in 0..self.views.len() {
            let start = self.offsets[v];
            let len = 2 * self.views[v].object.len();
            self.view_residuals(p, v, &mut r.as_mut_slice()[start..start + len]);
        }
        r
    }

    /// Central-difference Jacobian over the free parameters.
    ///
    /// Pose parameters only touch their own view's residuals.
    fn jacobian(&self, p: &DVector<f64>, free: &[usize]) -> DMatrix<f64> {
        let mut jac = DMatrix::zeros(self.residual_count, free.len());
        let mut plus = DVector::zeros(self.residual_count);
        let mut minus = DVector::zeros(self.residual_count);

        for (col, &idx) in free.iter().enumerate() {
            let h = 1e-6 * p[idx].abs().max(1.0);
            let mut pp = p.clone();
            let mut pm = p.clone();
            pp[idx] += h;
            pm[idx] -= h;

            if idx < INTRINSIC_PARAMS {
                plus = self.residuals(&pp);
                minus = self.residuals(&pm);
                for row in 0..self.residual_count {
                    jac[(row, col)] = (plus[row] - minus[row]) / (2.0 * h);
                }
            } else {
                let v = (idx - INTRINSIC_PARAMS) / POSE_PARAMS;
                let start = self.offsets[v];
                let len = 2 * self.views[v].object.len();
                self.view_residuals(&pp, v, &mut plus.as_mut_slice()[start..start + len]);
                self.view_residuals(&pm, v, &mut minus.as_mut_slice()[start..start + len]);
                for row in start..start + len {
                    jac[(row, col)] = (plus[row] - minus[row]) / (2.0 * h);
                }
            }
        }
        jac
    }
}

/// Free parameters of a [`Problem`] as seen by the solver.
struct LmWrapper<'a> {
    problem: &'a Problem<'a>,
    /// Full parameter vector; fixed entries keep their initial value.
    full: DVector<f64>,
    free: Vec<usize>,
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for LmWrapper<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        for (k, &idx) in self.free.iter().enumerate() {
            self.full[idx] = x[k];
        }
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_iterator(self.free.len(), self.free.iter().map(|&idx| self.full[idx]))
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.problem.residuals(&self.full);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(self.problem.jacobian(&self.full, &self.free))
    }
}

fn free_params(fixed: FixedParams, view_count: usize) -> Vec<usize> {
    let mut free: Vec<usize> = vec![0, 1];
    if !fixed.principal_point {
        free.extend([2, 3]);
    }
    free.extend([4, 5]);
    if !fixed.tangential {
        free.extend([6, 7]);
    }
    if !fixed.k3 {
        free.push(8);
    }
    free.extend(INTRINSIC_PARAMS..INTRINSIC_PARAMS + POSE_PARAMS * view_count);
    free
}

/// Levenberg-Marquardt from `initial`; `max_iterations` bounds the solver's
/// patience.
///
/// The initial estimate is returned unchanged when the solver ends with a
/// higher cost than it started from.
pub(crate) fn refine(
    views: &[RefineView<'_>],
    initial: &Estimate,
    fixed: FixedParams,
    max_iterations: usize,
) -> Refined {
    let problem = Problem::new(views, initial);
    let point_count = (problem.residual_count / 2).max(1);
    let start = pack(initial);
    let start_cost = problem.residuals(&start).norm_squared();

    let lm = LevenbergMarquardt::new().with_patience(max_iterations.max(1));
    let wrapper = LmWrapper {
        problem: &problem,
        full: start.clone(),
        free: free_params(fixed, views.len()),
    };
    let (wrapper, report) = lm.minimize(wrapper);
    if !report.termination.was_successful() {
        log::debug!("refinement stopped: {:?}", report.termination);
    }

    let mut params = wrapper.full;
    let mut cost = problem.residuals(&params).norm_squared();
    if !cost.is_finite() || cost > start_cost {
        params = start;
        cost = start_cost;
    }

    let (intrinsics, distortion) = unpack_intrinsics(&params, problem.skew, &problem.rational);
    let poses = (0..views.len()).map(|v| view_pose(&params, v)).collect();
    Refined {
        estimate: Estimate {
            intrinsics,
            distortion,
            poses,
        },
        rms: (cost / point_count as f64).sqrt(),
        evaluations: report.number_of_evaluations,
    }
}

/// RMS reprojection error of an estimate without refining it.
pub(crate) fn rms_error(views: &[RefineView<'_>], estimate: &Estimate) -> f64 {
    let problem = Problem::new(views, estimate);
    let point_count = (problem.residual_count / 2).max(1);
    let cost = problem.residuals(&pack(estimate)).norm_squared();
    (cost / point_count as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};

    fn board() -> Vec<Point3<f64>> {
        (0..5)
            .flat_map(|j| (0..6).map(move |i| Point3::new(i as f64 * 0.03, j as f64 * 0.03, 0.0)))
            .collect()
    }

    fn project(k: &Intrinsics, d: &Distortion, pose: &Pose, pts: &[Point3<f64>]) -> Vec<Point2<f64>> {
        pts.iter()
            .map(|p| {
                let pc = pose * p;
                k.to_pixel(&d.distort(&Vector2::new(pc.x / pc.z, pc.y / pc.z)))
            })
            .collect()
    }

    fn poses() -> Vec<Pose> {
        [(0.2, -0.1, 0.05), (-0.15, 0.2, -0.1), (0.1, 0.25, 0.2), (-0.25, -0.1, 0.0)]
            .into_iter()
            .enumerate()
            .map(|(i, (r, p, y))| {
                Isometry3::from_parts(
                    Translation3::new(-0.07 + 0.01 * i as f64, -0.06, 0.5 + 0.05 * i as f64),
                    UnitQuaternion::from_euler_angles(r, p, y),
                )
            })
            .collect()
    }

    #[test]
    fn recovers_intrinsics_and_distortion_from_perturbed_start() {
        let k = Intrinsics {
            fx: 800.0,
            fy: 790.0,
            cx: 320.0,
            cy: 240.0,
            skew: 0.0,
        };
        let d = Distortion {
            k1: -0.2,
            k2: 0.05,
            ..Default::default()
        };
        let obj = board();
        let poses = poses();
        let images: Vec<Vec<Point2<f64>>> = poses.iter().map(|p| project(&k, &d, p, &obj)).collect();
        let views: Vec<RefineView<'_>> = images
            .iter()
            .map(|img| RefineView {
                object: &obj,
                image: img,
            })
            .collect();

        let initial = Estimate {
            intrinsics: Intrinsics {
                fx: 780.0,
                fy: 800.0,
                cx: 325.0,
                cy: 236.0,
                skew: 0.0,
            },
            distortion: Distortion::default(),
            poses: poses
                .iter()
                .map(|p| {
                    let mut q = *p;
                    q.translation.vector += Vector3::new(0.002, -0.001, 0.01);
                    q
                })
                .collect(),
        };
        let before = rms_error(&views, &initial);
        let fixed = FixedParams {
            k3: true,
            ..Default::default()
        };
        let refined = refine(&views, &initial, fixed, 100);

        assert!(refined.rms < before);
        assert!(refined.rms < 1e-3, "rms = {}", refined.rms);
        assert!((refined.estimate.intrinsics.fx - 800.0).abs() < 0.5);
        assert!((refined.estimate.intrinsics.cy - 240.0).abs() < 0.5);
        assert!((refined.estimate.distortion.k1 + 0.2).abs() < 1e-2);
        assert_eq!(refined.estimate.distortion.k3, 0.0);
    }

    #[test]
    fn fixed_principal_point_is_untouched() {
        let k = Intrinsics {
            fx: 600.0,
            fy: 600.0,
            cx: 320.0,
            cy: 240.0,
            skew: 0.0,
        };
        let obj = board();
        let pose = poses()[0];
        let img = project(&k, &Distortion::default(), &pose, &obj);
        let views = [RefineView {
            object: &obj,
            image: &img,
        }];
        let initial = Estimate {
            intrinsics: Intrinsics { fx: 620.0, fy: 590.0, ..k },
            distortion: Distortion::default(),
            poses: vec![pose],
        };
        let fixed = FixedParams {
            principal_point: true,
            tangential: true,
            k3: true,
        };
        let refined = refine(&views, &initial, fixed, 50);
        assert_eq!(refined.estimate.intrinsics.cx, 320.0);
        assert_eq!(refined.estimate.intrinsics.cy, 240.0);
        assert!(refined.rms <= rms_error(&views, &initial));
    }

    #[test]
    fn exact_start_stays_put() {
        let k = Intrinsics {
            fx: 700.0,
            fy: 700.0,
            cx: 320.0,
            cy: 240.0,
            skew: 0.0,
        };
        let obj = board();
        let poses = poses();
        let images: Vec<Vec<Point2<f64>>> = poses
            .iter()
            .map(|p| project(&k, &Distortion::default(), p, &obj))
            .collect();
        let views: Vec<RefineView<'_>> = images
            .iter()
            .map(|img| RefineView {
                object: &obj,
                image: img,
            })
            .collect();
        let initial = Estimate {
            intrinsics: k,
            distortion: Distortion::default(),
            poses,
        };

        let refined = refine(&views, &initial, FixedParams::default(), 20);
        assert!(refined.rms < 1e-9, "rms = {}", refined.rms);
        assert!((refined.estimate.intrinsics.fx - 700.0).abs() < 1e-6);
    }
}
