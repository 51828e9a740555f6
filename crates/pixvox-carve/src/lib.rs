//! Silhouette extraction and voxel space carving.
//!
//! Per capture cycle every camera frame is undistorted with its stored
//! calibration and differenced against that camera's previous frame
//! ([`MotionMaskExtractor`]). The resulting binary masks are fused by
//! [`VoxelReconstructor`], which starts from a fully occupied
//! [`VoxelGrid`] and carves every voxel that projects onto background in at
//! least one contributing camera.
//!
//! Cameras are keyed by [`CameraId`](pixvox_core::CameraId) throughout; a
//! camera that is missing a model or mask in a cycle is skipped and reported,
//! never indexed past.

mod carve;
mod motion;
mod undistort;
mod voxel;

pub use carve::{camera_models, Reconstruction, RigModels, SkipReason, VoxelReconstructor, WorldFrame};
pub use motion::{MaskError, MaskOutcome, MotionMaskExtractor, MotionParams};
pub use undistort::UndistortMap;
pub use voxel::{GridSpec, Occupancy, VoxelGrid};
