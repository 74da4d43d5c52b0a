use crate::camera::{CaptureHealthSnapshot, CaptureState};
use serde::Serialize;

/// Engine-wide statistics, assembled on demand
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineStats {
    pub running: bool,
    pub state: CaptureState,
    pub backend: Option<String>,
    pub device_open: bool,
    pub frames_captured: u64,
    /// Resets to 0 on every successful capture
    pub consecutive_errors: u64,
    pub total_errors: u64,
    pub reconnects: u64,
    /// Capture rate over the recent window
    pub fps: f64,
    pub analyses: u64,
    pub detection_enabled: bool,
    pub overlay_enabled: bool,
    pub recording: bool,
    pub uptime_secs: f64,
}

impl EngineStats {
    pub(crate) fn from_health(health: CaptureHealthSnapshot) -> Self {
        Self {
            state: health.state,
            backend: health.backend,
            device_open: health.device_open,
            frames_captured: health.frames_captured,
            consecutive_errors: health.consecutive_errors,
            total_errors: health.total_errors,
            reconnects: health.reconnects,
            fps: health.fps,
            ..Self::default()
        }
    }

    /// One-line summary for periodic logging
    pub fn summary(&self) -> String {
        format!(
            "state={} frames={} fps={:.1} errors={}/{} reconnects={} analyses={}",
            self.state,
            self.frames_captured,
            self.fps,
            self.consecutive_errors,
            self.total_errors,
            self.reconnects,
            self.analyses
        )
    }
}
