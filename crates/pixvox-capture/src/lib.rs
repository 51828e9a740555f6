//! Synchronized multi-camera frame acquisition.
//!
//! Every camera runs on its own named acquisition thread that publishes the
//! latest frame into a guarded single slot ([`FrameSource`]). The
//! [`CaptureOrchestrator`] samples all slots in one pass per cycle and keys
//! the result by [`CameraId`](pixvox_core::CameraId).
//!
//! Devices are reached through the [`CameraProvider`] capability. Bundled
//! providers replay recorded frames ([`ReplayProvider`]), render scripted
//! frames ([`SyntheticProvider`]) or, with the `nokhwa` feature, open native
//! capture devices.

mod camera;
mod error;
#[cfg(feature = "nokhwa")]
mod nokhwa_backend;
mod orchestrator;
mod replay;
mod source;
mod synthetic;

pub use camera::{discover, Camera, CameraProvider};
pub use error::{CaptureError, FrameError};
#[cfg(feature = "nokhwa")]
pub use nokhwa_backend::NokhwaProvider;
pub use orchestrator::{CaptureCycle, CaptureOrchestrator, OrchestratorOptions};
pub use replay::ReplayProvider;
pub use source::{FrameSnapshot, FrameSource, SourceOptions};
pub use synthetic::{FrameScript, SyntheticProvider};
