use crate::camera::CameraProvider;
use crate::error::{CaptureError, FrameError};
use crate::source::{FrameSnapshot, FrameSource, SourceOptions};
use pixvox_core::CameraId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorOptions {
    pub source: SourceOptions,
    /// A frame that did not advance since the previous poll is `unchanged`;
    /// once it is older than this it is `stale`.
    pub stale_after_ms: u64,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            source: SourceOptions::default(),
            stale_after_ms: 500,
        }
    }
}

impl OrchestratorOptions {
    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

/// Frames gathered by one [`CaptureOrchestrator::poll`] pass.
#[derive(Clone, Debug, Default)]
pub struct CaptureCycle {
    pub cycle: u64,
    /// Frames that advanced since the previous poll.
    pub frames: BTreeMap<CameraId, Arc<FrameSnapshot>>,
    /// Cameras whose latest frame was already handed out, still within
    /// `stale_after_ms`.
    pub unchanged: BTreeSet<CameraId>,
    pub stale: BTreeSet<CameraId>,
    /// Running cameras that have not delivered a first frame.
    pub pending: BTreeSet<CameraId>,
    /// Spread between the oldest and newest capture instant in `frames`.
    pub skew: Duration,
    stale_ages: BTreeMap<CameraId, Duration>,
}

impl CaptureCycle {
    pub fn frame(&self, camera: CameraId) -> Result<&Arc<FrameSnapshot>, FrameError> {
        if let Some(frame) = self.frames.get(&camera) {
            return Ok(frame);
        }
        if let Some(&age) = self.stale_ages.get(&camera) {
            return Err(FrameError::Stale { camera, age });
        }
        if self.unchanged.contains(&camera) {
            return Err(FrameError::Unchanged(camera));
        }
        Err(FrameError::NotYetAvailable(camera))
    }

    /// Every polled camera delivered a fresh frame.
    pub fn is_complete(&self) -> bool {
        self.unchanged.is_empty() && self.stale.is_empty() && self.pending.is_empty()
    }
}

/// Owns one [`FrameSource`] per camera and samples them together.
pub struct CaptureOrchestrator {
    sources: BTreeMap<CameraId, FrameSource>,
    unavailable: BTreeMap<CameraId, CaptureError>,
    last_sequence: BTreeMap<CameraId, u64>,
    cycle: u64,
    options: OrchestratorOptions,
}

impl CaptureOrchestrator {
    /// Start a source per camera. Cameras that fail to open are recorded in
    /// [`CaptureOrchestrator::unavailable`].
    pub fn start(
        cameras: impl IntoIterator<Item = CameraId>,
        provider: Arc<dyn CameraProvider>,
        options: OrchestratorOptions,
    ) -> Self {
        let mut sources = BTreeMap::new();
        let mut unavailable = BTreeMap::new();
        for camera in cameras {
            match FrameSource::start(camera, provider.clone(), options.source.clone()) {
                Ok(source) => {
                    sources.insert(camera, source);
                }
                Err(err) => {
                    log::warn!("{err}");
                    unavailable.insert(camera, err);
                }
            }
        }
        Self {
            sources,
            unavailable,
            last_sequence: BTreeMap::new(),
            cycle: 0,
            options,
        }
    }

    pub fn cameras(&self) -> BTreeSet<CameraId> {
        self.sources.keys().copied().collect()
    }

    pub fn unavailable(&self) -> &BTreeMap<CameraId, CaptureError> {
        &self.unavailable
    }

    /// Read every source once.
    ///
    /// A frame is handed out by at most one poll. Cameras are keyed by id
    /// throughout, so a stale or pending camera never shifts the others.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self), fields(cycle = self.cycle))
    )]
    pub fn poll(&mut self) -> CaptureCycle {
        let stale_after = self.options.stale_after();
        let mut out = CaptureCycle {
            cycle: self.cycle,
            ..CaptureCycle::default()
        };

        for (&camera, source) in &self.sources {
            let frame = match source.read() {
                Ok(frame) => frame,
                Err(_) => {
                    out.pending.insert(camera);
                    continue;
                }
            };
            let advanced = self
                .last_sequence
                .get(&camera)
                .is_none_or(|&last| frame.sequence != last);
            self.last_sequence.insert(camera, frame.sequence);

            if !advanced {
                let age = frame.age();
                if age > stale_after {
                    log::debug!("{camera}: stale frame #{}", frame.sequence);
                    out.stale.insert(camera);
                    out.stale_ages.insert(camera, age);
                } else {
                    out.unchanged.insert(camera);
                }
                continue;
            }
            out.frames.insert(camera, frame);
        }

        let instants = out.frames.values().map(|f| f.captured_at);
        if let (Some(min), Some(max)) = (instants.clone().min(), instants.max()) {
            out.skew = max - min;
        }

        self.cycle += 1;
        out
    }

    /// Stop every source; devices are released when this returns.
    pub fn stop(&mut self) {
        for source in self.sources.values_mut() {
            source.stop();
        }
    }
}

impl Drop for CaptureOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}
