use pixvox_core::CameraId;
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("{camera}: device unavailable: {reason}")]
    DeviceUnavailable { camera: CameraId, reason: String },
    #[error("{camera}: frame read failed: {reason}")]
    Read { camera: CameraId, reason: String },
    #[error("{camera}: no frame within the read timeout")]
    Timeout { camera: CameraId },
    #[error("{camera}: failed to spawn acquisition thread: {reason}")]
    Spawn { camera: CameraId, reason: String },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("{0}: no frame captured yet")]
    NotYetAvailable(CameraId),
    #[error("{0}: no new frame since the previous cycle")]
    Unchanged(CameraId),
    #[error("{camera}: latest frame is {age:?} old")]
    Stale { camera: CameraId, age: Duration },
}
