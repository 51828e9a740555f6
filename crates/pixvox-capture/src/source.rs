//! One camera's acquisition thread and its latest-frame slot.
//!
//! The thread owns the camera handle for its whole life. Each captured frame
//! is wrapped in an `Arc` and swapped into a single guarded slot; readers
//! clone the `Arc`, so a frame they hold is never written to again.

use crate::camera::{Camera, CameraProvider};
use crate::error::{CaptureError, FrameError};
use image::DynamicImage;
use parking_lot::Mutex;
use pixvox_core::CameraId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// One captured frame, shared read-only.
#[derive(Clone, Debug)]
pub struct FrameSnapshot {
    pub camera: CameraId,
    /// Per-source frame counter, starting at 0.
    pub sequence: u64,
    pub captured_at: Instant,
    pub image: DynamicImage,
}

impl FrameSnapshot {
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceOptions {
    /// Failures in a row before each retry is delayed by `error_backoff_ms`.
    pub max_consecutive_errors: u32,
    pub error_backoff_ms: u64,
    /// Pause between successful reads; 0 reads as fast as the device allows.
    pub frame_interval_ms: u64,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 5,
            error_backoff_ms: 200,
            frame_interval_ms: 0,
        }
    }
}

/// Pause after a read that timed out or failed, below the backoff threshold.
const TIMEOUT_RETRY: Duration = Duration::from_millis(10);

struct Shared {
    slot: Mutex<Option<Arc<FrameSnapshot>>>,
    running: AtomicBool,
    errors: AtomicU64,
    timeouts: AtomicU64,
}

pub struct FrameSource {
    camera: CameraId,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// Spawn the acquisition thread for `camera`.
    ///
    /// The camera is opened on the new thread; this call waits for the open
    /// to finish and returns its error, if any.
    pub fn start(
        camera: CameraId,
        provider: Arc<dyn CameraProvider>,
        options: SourceOptions,
    ) -> Result<Self, CaptureError> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(None),
            running: AtomicBool::new(true),
            errors: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        });
        let (opened_tx, opened_rx) = crossbeam_channel::bounded::<Result<(), CaptureError>>(1);

        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name(format!("capture-{camera}"))
            .spawn(move || {
                let mut device = match provider.open(camera) {
                    Ok(device) => {
                        let _ = opened_tx.send(Ok(()));
                        device
                    }
                    Err(err) => {
                        let _ = opened_tx.send(Err(err));
                        return;
                    }
                };
                acquisition_loop(camera, device.as_mut(), &thread_shared, &options);
                device.release();
                log::info!("{camera}: capture stopped, device released");
            })
            .map_err(|e| CaptureError::Spawn {
                camera,
                reason: e.to_string(),
            })?;

        let opened = opened_rx.recv().unwrap_or_else(|_| {
            Err(CaptureError::DeviceUnavailable {
                camera,
                reason: "acquisition thread exited while opening".to_string(),
            })
        });
        if let Err(err) = opened {
            let _ = handle.join();
            return Err(err);
        }

        log::info!("{camera}: capture started");
        Ok(Self {
            camera,
            shared,
            handle: Some(handle),
        })
    }

    pub fn camera(&self) -> CameraId {
        self.camera
    }

    /// Latest published frame.
    pub fn read(&self) -> Result<Arc<FrameSnapshot>, FrameError> {
        self.shared
            .slot
            .lock()
            .clone()
            .ok_or(FrameError::NotYetAvailable(self.camera))
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Total failed reads so far.
    pub fn error_count(&self) -> u64 {
        self.shared.errors.load(Ordering::Relaxed)
    }

    /// Reads that timed out so far.
    pub fn timeout_count(&self) -> u64 {
        self.shared.timeouts.load(Ordering::Relaxed)
    }

    /// Stop the thread and wait for it; the device is released on return.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("{}: acquisition thread panicked", self.camera);
            }
        }
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg_attr(
    feature = "tracing",
    tracing::instrument(level = "debug", skip(device, shared, options))
)]
fn acquisition_loop(
    camera: CameraId,
    device: &mut dyn Camera,
    shared: &Shared,
    options: &SourceOptions,
) {
    let mut sequence = 0u64;
    let mut consecutive_errors = 0u32;

    while shared.running.load(Ordering::Acquire) {
        match device.read_frame() {
            Ok(image) => {
                consecutive_errors = 0;
                let snapshot = Arc::new(FrameSnapshot {
                    camera,
                    sequence,
                    captured_at: Instant::now(),
                    image,
                });
                *shared.slot.lock() = Some(snapshot);
                sequence += 1;
                if options.frame_interval_ms > 0 {
                    std::thread::sleep(Duration::from_millis(options.frame_interval_ms));
                }
            }
            Err(CaptureError::Timeout { .. }) => {
                shared.timeouts.fetch_add(1, Ordering::Relaxed);
                std::thread::sleep(TIMEOUT_RETRY);
            }
            Err(err) => {
                shared.errors.fetch_add(1, Ordering::Relaxed);
                consecutive_errors = consecutive_errors.saturating_add(1);
                if consecutive_errors >= options.max_consecutive_errors {
                    if consecutive_errors == options.max_consecutive_errors {
                        log::warn!("{err}; backing off");
                    }
                    std::thread::sleep(Duration::from_millis(options.error_backoff_ms));
                } else {
                    log::debug!("{err}");
                    std::thread::sleep(TIMEOUT_RETRY);
                }
            }
        }
    }
}
