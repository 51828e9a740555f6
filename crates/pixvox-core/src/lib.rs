//! Core types shared by the `pixvox-*` crates.
//!
//! This crate is intentionally small and purely geometric: camera
//! identifiers, grayscale views, planar homographies and the pinhole camera
//! model used by both calibration and carving. It does *not* talk to any
//! camera device or corner detector.

mod calibration;
mod camera_id;
mod camera_model;
mod homography;
mod image;
mod logger;

pub use calibration::{CalibrationFormatError, CameraCalibration};
pub use camera_id::{CameraId, ParseCameraIdError};
pub use camera_model::{
    pose_from_vectors, pose_to_vectors, CameraModel, Distortion, ImageSize, Intrinsics, Pose,
};
pub use homography::{estimate_homography, Homography};
pub use image::{gray_view, sample_bilinear, sample_bilinear_u8, GrayImageView};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
