use crate::pattern::{ChessboardObservation, PatternSize};
use crate::refine::{refine, rms_error, Estimate, FixedParams, RefineView};
use crate::zhang::{
    fit_distortion, intrinsics_fixed_center, intrinsics_from_homographies, planar_pose,
    DistortionView,
};
use nalgebra::{Matrix3, Point2};
use pixvox_core::{
    estimate_homography, pose_to_vectors, CameraCalibration, CameraId, Distortion, ImageSize,
    Intrinsics, Pose,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("need at least {required} chessboard observations, got {found}")]
    InsufficientObservations { required: usize, found: usize },
    #[error("observation {index} has {found} points, pattern has {expected}")]
    PointCountMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("observations mix cameras {first} and {other}")]
    MixedCameras { first: CameraId, other: CameraId },
    #[error("image size must be non-zero")]
    InvalidImageSize,
    #[error("degenerate calibration views: {0}")]
    Degenerate(&'static str),
}

/// Intrinsics, distortion and per-view poses for one camera.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendSolution {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
    /// Board -> camera, parallel to the input observations.
    pub poses: Vec<Pose>,
    pub rms_reprojection_error: f64,
}

/// Numerical planar-target calibration routine.
pub trait CalibrationBackend: Send + Sync {
    fn calibrate(
        &self,
        observations: &[ChessboardObservation],
        image_size: ImageSize,
    ) -> Result<BackendSolution, CalibrationError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZhangOptions {
    /// Estimate the principal point only with at least this many views.
    pub min_views_for_principal_point: usize,
    pub fix_k3: bool,
    pub fix_tangential: bool,
    /// Run the non-linear refinement after the closed-form initialisation.
    pub refine: bool,
    pub max_iterations: usize,
}

impl Default for ZhangOptions {
    fn default() -> Self {
        Self {
            min_views_for_principal_point: 3,
            fix_k3: true,
            fix_tangential: false,
            refine: true,
            max_iterations: 50,
        }
    }
}

/// Zhang initialisation followed by Levenberg-Marquardt refinement.
#[derive(Clone, Debug, Default)]
pub struct ZhangBackend {
    pub options: ZhangOptions,
}

impl ZhangBackend {
    pub fn new(options: ZhangOptions) -> Self {
        Self { options }
    }

    fn initial_intrinsics(
        &self,
        homographies: &[Matrix3<f64>],
        image_size: ImageSize,
    ) -> Result<(Intrinsics, bool), CalibrationError> {
        let cx = (image_size.width as f64 - 1.0) * 0.5;
        let cy = (image_size.height as f64 - 1.0) * 0.5;

        if homographies.len() >= self.options.min_views_for_principal_point {
            let plausible = |k: &Intrinsics| {
                (k.cx - cx).abs() < image_size.width as f64 * 0.5
                    && (k.cy - cy).abs() < image_size.height as f64 * 0.5
            };
            match intrinsics_from_homographies(homographies, image_size) {
                Some(mut k) if plausible(&k) => {
                    k.skew = 0.0;
                    return Ok((k, false));
                }
                _ => log::debug!("closed-form principal point rejected, fixing it at the centre"),
            }
        }

        intrinsics_fixed_center(homographies, image_size, cx, cy)
            .map(|k| (k, true))
            .ok_or(CalibrationError::Degenerate("focal length is not observable"))
    }
}

impl CalibrationBackend for ZhangBackend {
    fn calibrate(
        &self,
        observations: &[ChessboardObservation],
        image_size: ImageSize,
    ) -> Result<BackendSolution, CalibrationError> {
        let boards: Vec<Vec<Point2<f64>>> = observations
            .iter()
            .map(|o| o.object_points.iter().map(|p| Point2::new(p.x, p.y)).collect())
            .collect();

        let homographies = observations
            .iter()
            .zip(&boards)
            .map(|(o, board)| {
                estimate_homography(board, &o.image_points)
                    .map(|h| h.h)
                    .ok_or(CalibrationError::Degenerate("board homography"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (intrinsics, fixed_center) = self.initial_intrinsics(&homographies, image_size)?;
        let poses = homographies
            .iter()
            .map(|h| planar_pose(&intrinsics, h).ok_or(CalibrationError::Degenerate("board pose")))
            .collect::<Result<Vec<_>, _>>()?;

        let views: Vec<RefineView<'_>> = observations
            .iter()
            .map(|o| RefineView {
                object: &o.object_points,
                image: &o.image_points,
            })
            .collect();

        let mut estimate = Estimate {
            intrinsics,
            distortion: Distortion::default(),
            poses,
        };

        let distortion_views: Vec<DistortionView<'_>> = observations
            .iter()
            .zip(&boards)
            .zip(&homographies)
            .map(|((o, board), h)| DistortionView {
                homography: *h,
                board,
                pixels: &o.image_points,
            })
            .collect();
        if let Some(distortion) = fit_distortion(
            &intrinsics,
            &distortion_views,
            self.options.fix_k3,
            self.options.fix_tangential,
        ) {
            let candidate = Estimate {
                distortion,
                ..estimate.clone()
            };
            if rms_error(&views, &candidate) < rms_error(&views, &estimate) {
                estimate = candidate;
            }
        }

        let (estimate, rms) = if self.options.refine {
            let fixed = FixedParams {
                principal_point: fixed_center,
                tangential: self.options.fix_tangential,
                k3: self.options.fix_k3,
            };
            let refined = refine(&views, &estimate, fixed, self.options.max_iterations);
            log::debug!(
                "refinement finished after {} evaluations, rms {:.4}",
                refined.evaluations,
                refined.rms
            );
            (refined.estimate, refined.rms)
        } else {
            let rms = rms_error(&views, &estimate);
            (estimate, rms)
        };

        let k = &estimate.intrinsics;
        let finite = [k.fx, k.fy, k.cx, k.cy, rms].iter().all(|v| v.is_finite());
        if !finite || k.fx <= 0.0 || k.fy <= 0.0 {
            return Err(CalibrationError::Degenerate("refinement diverged"));
        }

        Ok(BackendSolution {
            intrinsics: estimate.intrinsics,
            distortion: estimate.distortion,
            poses: estimate.poses,
            rms_reprojection_error: rms,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    pub min_observations: usize,
    pub zhang: ZhangOptions,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            min_observations: 1,
            zhang: ZhangOptions::default(),
        }
    }
}

/// Turns a camera's accepted observations into a [`CameraCalibration`].
pub struct CalibrationSolver<B = ZhangBackend> {
    params: SolverParams,
    backend: B,
}

impl CalibrationSolver<ZhangBackend> {
    pub fn new(params: SolverParams) -> Self {
        Self {
            params,
            backend: ZhangBackend::new(params.zhang),
        }
    }
}

impl Default for CalibrationSolver<ZhangBackend> {
    fn default() -> Self {
        Self::new(SolverParams::default())
    }
}

impl<B: CalibrationBackend> CalibrationSolver<B> {
    pub fn with_backend(params: SolverParams, backend: B) -> Self {
        Self { params, backend }
    }

    pub fn params(&self) -> &SolverParams {
        &self.params
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "info",
            skip(self, observations, pattern),
            fields(views = observations.len())
        )
    )]
    pub fn solve(
        &self,
        observations: &[ChessboardObservation],
        pattern: &PatternSize,
        image_size: ImageSize,
    ) -> Result<CameraCalibration, CalibrationError> {
        let required = self.params.min_observations.max(1);
        if observations.len() < required {
            return Err(CalibrationError::InsufficientObservations {
                required,
                found: observations.len(),
            });
        }
        if image_size.width == 0 || image_size.height == 0 {
            return Err(CalibrationError::InvalidImageSize);
        }

        let camera = observations[0].camera;
        let expected = pattern.corner_count();
        for (index, obs) in observations.iter().enumerate() {
            if obs.camera != camera {
                return Err(CalibrationError::MixedCameras {
                    first: camera,
                    other: obs.camera,
                });
            }
            let found = obs.image_points.len();
            if found != expected || obs.object_points.len() != expected {
                return Err(CalibrationError::PointCountMismatch {
                    index,
                    expected,
                    found,
                });
            }
        }

        let solution = self.backend.calibrate(observations, image_size)?;
        if solution.poses.len() != observations.len() {
            return Err(CalibrationError::Degenerate("backend returned wrong pose count"));
        }

        let (rotation_vectors, translation_vectors) =
            solution.poses.iter().map(pose_to_vectors).unzip();
        let k = solution.intrinsics.matrix();
        let calibration = CameraCalibration {
            camera,
            camera_matrix: [
                [k[(0, 0)], k[(0, 1)], k[(0, 2)]],
                [k[(1, 0)], k[(1, 1)], k[(1, 2)]],
                [k[(2, 0)], k[(2, 1)], k[(2, 2)]],
            ],
            distortion: solution.distortion.to_coeffs(),
            rotation_vectors,
            translation_vectors,
            view_sequences: observations.iter().map(|o| o.sequence).collect(),
            image_size,
            rms_reprojection_error: solution.rms_reprojection_error,
        };
        log::info!(
            "{camera}: calibrated from {} views, rms {:.3} px",
            observations.len(),
            calibration.rms_reprojection_error
        );
        Ok(calibration)
    }
}
