mod builder;
mod recording;
mod source;
mod stats;
#[cfg(test)]
mod tests;

pub use builder::EngineBuilder;
pub use recording::{
    record_clip, save_snapshot, ClipOptions, ClipSummary, ClipWriter, JpegSequenceWriter,
    RecordingGuard,
};
pub use source::{DirectCaptureSource, EngineSource, FrameSource, FrameSourceChain};
pub use stats::EngineStats;

use crate::analyzer::{MotionMonitor, MotionState};
use crate::camera::{CaptureHealth, CaptureState, DeviceHandle};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};
use crate::frame::Frame;
use crate::frame_cache::FrameCache;
use crate::overlay::OverlayRenderer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Budget for both loops to wind down on stop
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// A running acquisition engine for one camera.
///
/// Cheap to clone; all clones drive the same engine. There is no global
/// instance: whoever starts an engine owns it and hands clones to
/// collaborators.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    cache: Arc<FrameCache>,
    health: Arc<CaptureHealth>,
    monitor: Arc<MotionMonitor>,
    overlay: OverlayRenderer,
    events: EventBus,
    cancel: CancellationToken,
    tasks: Mutex<Option<EngineTasks>>,
    running: AtomicBool,
    overlay_enabled: AtomicBool,
    recording: AtomicBool,
    started_at: Instant,
}

struct EngineTasks {
    capture: JoinHandle<Option<Box<dyn DeviceHandle>>>,
    detection: JoinHandle<()>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        // Loops exit on their own if the last clone goes away without stop()
        self.cancel.cancel();
    }
}

impl Engine {
    /// Start an engine with the configured backends
    pub async fn start(config: EngineConfig) -> Result<Engine> {
        EngineBuilder::new().config(config).start().await
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Latest frame, raw or with the status overlay.
    ///
    /// Returns `None` when stopped or before the first capture. With the
    /// overlay disabled, annotated requests get the raw frame.
    pub fn get_frame(&self, annotated: bool) -> Option<Frame> {
        if !self.is_running() {
            return None;
        }

        let cache = &self.inner.cache;
        if !annotated || !self.is_overlay_enabled() {
            return cache.get_raw();
        }

        if let Some(frame) = cache.get_annotated() {
            return Some(frame);
        }

        let raw = cache.get_raw()?;
        let rendered = self
            .inner
            .overlay
            .render(&raw, &self.get_stats(), &self.get_motion_state());
        if !cache.set_annotated(rendered.clone()) {
            debug!("Frame {} was replaced while rendering its overlay", raw.id);
        }
        Some(rendered)
    }

    pub fn get_stats(&self) -> EngineStats {
        EngineStats {
            running: self.is_running(),
            analyses: self.inner.monitor.analyses(),
            detection_enabled: self.inner.monitor.is_enabled(),
            overlay_enabled: self.is_overlay_enabled(),
            recording: self.is_recording(),
            uptime_secs: self.inner.started_at.elapsed().as_secs_f64(),
            ..EngineStats::from_health(self.inner.health.snapshot())
        }
    }

    pub fn get_motion_state(&self) -> MotionState {
        self.inner.monitor.state()
    }

    /// Set the background learning rate, in (0, 1]
    pub fn set_motion_sensitivity(&self, sensitivity: f32) -> Result<()> {
        self.inner.monitor.set_sensitivity(sensitivity)
    }

    /// Set the minimum total area that counts as motion
    pub fn set_motion_threshold(&self, min_area: f64) -> Result<()> {
        self.inner.monitor.set_threshold(min_area)
    }

    pub fn toggle_motion_detection(&self) -> bool {
        self.inner.monitor.toggle()
    }

    pub fn is_overlay_enabled(&self) -> bool {
        self.inner.overlay_enabled.load(Ordering::SeqCst)
    }

    /// Flip overlay rendering on or off and return the new value
    pub fn toggle_overlay(&self) -> bool {
        let enabled = !self.inner.overlay_enabled.fetch_xor(true, Ordering::SeqCst);
        info!("Overlay {}", if enabled { "enabled" } else { "disabled" });
        enabled
    }

    /// Forget the background model and the current motion verdict
    pub fn reset_motion(&self) {
        self.inner.monitor.reset();
    }

    pub fn is_recording(&self) -> bool {
        self.inner.recording.load(Ordering::SeqCst)
    }

    /// Light the recording indicator until the guard is dropped
    pub fn recording_guard(&self) -> RecordingGuard {
        RecordingGuard::new(self.clone())
    }

    pub(crate) fn set_recording(&self, recording: bool) {
        self.inner.recording.store(recording, Ordering::SeqCst);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.events
    }

    /// Stop both loops, release the device and clear the cache.
    ///
    /// Idempotent. Returns within the stop budget even if a loop hangs; shutdown
    /// problems are logged, not returned.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("Engine already stopped");
            return;
        }

        info!("Stopping engine");
        self.inner.cancel.cancel();

        let tasks = self.inner.tasks.lock().take();
        if let Some(EngineTasks { capture, detection }) = tasks {
            let deadline = tokio::time::Instant::now() + STOP_TIMEOUT;
            let handle = join_task("capture", capture, deadline).await.flatten();
            join_task("detection", detection, deadline).await;

            if let Some(mut handle) = handle {
                if let Err(e) = handle.release().await {
                    warn!("Failed to release camera on stop: {}", e);
                }
            }
        }

        self.inner.health.device_closed();
        self.inner.health.set_state(CaptureState::Stopped);
        self.inner.cache.clear();

        // An aborted detection loop may leave an analysis holding the analyzer lock
        let monitor = Arc::clone(&self.inner.monitor);
        if let Err(e) = tokio::task::spawn_blocking(move || monitor.reset()).await {
            warn!("Failed to reset motion analyzer on stop: {}", e);
        }

        self.inner.events.publish(EngineEvent::EngineStopped {
            timestamp: SystemTime::now(),
        });
        info!("Engine stopped");
    }
}

/// Wait for a loop until the shared deadline, aborting it past that
async fn join_task<T>(
    name: &str,
    mut task: JoinHandle<T>,
    deadline: tokio::time::Instant,
) -> Option<T> {
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(value)) => {
            debug!("{} loop finished", name);
            Some(value)
        }
        Ok(Err(e)) => {
            error!("{} loop failed: {}", name, e);
            None
        }
        Err(_) => {
            warn!("{} loop did not stop within {:?}, aborting", name, STOP_TIMEOUT);
            task.abort();
            None
        }
    }
}
