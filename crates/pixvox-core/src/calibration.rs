use crate::camera_model::{pose_from_vectors, Distortion, ImageSize, Intrinsics, Pose};
use crate::CameraId;
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CalibrationFormatError {
    #[error("{rotations} rotation vectors but {translations} translation vectors")]
    PoseCountMismatch {
        rotations: usize,
        translations: usize,
    },
    #[error("{sequences} view sequence numbers for {views} views")]
    SequenceCountMismatch { sequences: usize, views: usize },
    #[error("distortion must have 4, 5 or 8 coefficients, got {0}")]
    DistortionLength(usize),
    #[error("camera matrix is not a finite upper-triangular intrinsics matrix")]
    InvalidCameraMatrix,
}

/// Solved calibration of one camera.
///
/// Written once by the solver and never partially updated: re-calibration
/// replaces the whole value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraCalibration {
    pub camera: CameraId,
    /// Row-major 3x3 intrinsic matrix.
    pub camera_matrix: [[f64; 3]; 3],
    /// `k1, k2, p1, p2, k3[, k4, k5, k6]`.
    pub distortion: Vec<f64>,
    /// One Rodrigues vector per calibration view (board -> camera).
    pub rotation_vectors: Vec<[f64; 3]>,
    pub translation_vectors: Vec<[f64; 3]>,
    /// Capture sequence number of each view, parallel to the pose vectors.
    pub view_sequences: Vec<u32>,
    pub image_size: ImageSize,
    pub rms_reprojection_error: f64,
}

impl CameraCalibration {
    pub fn intrinsics(&self) -> Intrinsics {
        let m = &self.camera_matrix;
        Intrinsics {
            fx: m[0][0],
            fy: m[1][1],
            cx: m[0][2],
            cy: m[1][2],
            skew: m[0][1],
        }
    }

    pub fn distortion(&self) -> Distortion {
        Distortion::from_coeffs(&self.distortion)
    }

    pub fn view_count(&self) -> usize {
        self.rotation_vectors.len()
    }

    /// Board -> camera pose of view `idx`.
    pub fn view_pose(&self, idx: usize) -> Option<Pose> {
        let r = self.rotation_vectors.get(idx)?;
        let t = self.translation_vectors.get(idx)?;
        Some(pose_from_vectors(*r, *t))
    }

    /// Board -> camera pose of the view captured as `sequence`.
    pub fn pose_for_sequence(&self, sequence: u32) -> Option<Pose> {
        let idx = self.view_sequences.iter().position(|&s| s == sequence)?;
        self.view_pose(idx)
    }

    /// Check internal consistency, e.g. after loading from disk.
    pub fn validate(&self) -> Result<(), CalibrationFormatError> {
        let views = self.rotation_vectors.len();
        if views != self.translation_vectors.len() {
            return Err(CalibrationFormatError::PoseCountMismatch {
                rotations: views,
                translations: self.translation_vectors.len(),
            });
        }
        if self.view_sequences.len() != views {
            return Err(CalibrationFormatError::SequenceCountMismatch {
                sequences: self.view_sequences.len(),
                views,
            });
        }
        if !matches!(self.distortion.len(), 4 | 5 | 8) {
            return Err(CalibrationFormatError::DistortionLength(
                self.distortion.len(),
            ));
        }
        let m = &self.camera_matrix;
        let finite = m.iter().flatten().all(|v| v.is_finite());
        let shape = m[1][0] == 0.0 && m[2][0] == 0.0 && m[2][1] == 0.0 && m[2][2] == 1.0;
        if !finite || !shape || m[0][0] <= 0.0 || m[1][1] <= 0.0 {
            return Err(CalibrationFormatError::InvalidCameraMatrix);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CameraCalibration {
        CameraCalibration {
            camera: CameraId(2),
            camera_matrix: [[800.0, 0.0, 320.0], [0.0, 790.0, 240.0], [0.0, 0.0, 1.0]],
            distortion: vec![-0.1, 0.01, 0.0, 0.0, 0.0],
            rotation_vectors: vec![[0.1, 0.2, 0.3], [0.0, 0.0, 0.0]],
            translation_vectors: vec![[0.0, 0.0, 1.0], [0.1, 0.0, 2.0]],
            view_sequences: vec![0, 3],
            image_size: ImageSize::new(640, 480),
            rms_reprojection_error: 0.2,
        }
    }

    #[test]
    fn poses_are_looked_up_by_sequence() {
        let calib = sample();
        assert!(calib.pose_for_sequence(1).is_none());
        let pose = calib.pose_for_sequence(3).unwrap();
        assert_eq!(pose.translation.vector.z, 2.0);
        assert_eq!(calib.intrinsics().fy, 790.0);
    }

    #[test]
    fn validation_catches_inconsistent_fields() {
        assert!(sample().validate().is_ok());

        let mut bad = sample();
        bad.translation_vectors.pop();
        assert!(matches!(
            bad.validate(),
            Err(CalibrationFormatError::PoseCountMismatch { .. })
        ));

        let mut bad = sample();
        bad.distortion = vec![0.0; 6];
        assert_eq!(
            bad.validate(),
            Err(CalibrationFormatError::DistortionLength(6))
        );

        let mut bad = sample();
        bad.camera_matrix[2][2] = 0.0;
        assert_eq!(
            bad.validate(),
            Err(CalibrationFormatError::InvalidCameraMatrix)
        );
    }
}
