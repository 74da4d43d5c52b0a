use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

/// Capture timestamps kept for the fps estimate
pub const FPS_WINDOW: usize = 30;

/// Capture loop lifecycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureState {
    Starting,
    Running,
    Reconnecting,
    #[default]
    Stopped,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Starting => "starting",
            CaptureState::Running => "running",
            CaptureState::Reconnecting => "reconnecting",
            CaptureState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Sliding window of capture instants
#[derive(Debug)]
pub struct FpsWindow {
    stamps: VecDeque<Instant>,
    capacity: usize,
}

impl FpsWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            stamps: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    pub fn push(&mut self, at: Instant) {
        if self.stamps.len() == self.capacity {
            self.stamps.pop_front();
        }
        self.stamps.push_back(at);
    }

    /// Frames per second over the window, 0 until two captures were seen
    pub fn fps(&self) -> f64 {
        match (self.stamps.front(), self.stamps.back()) {
            (Some(first), Some(last)) if self.stamps.len() >= 2 => {
                let span = last.duration_since(*first).as_secs_f64();
                if span > 0.0 {
                    (self.stamps.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    pub fn clear(&mut self) {
        self.stamps.clear();
    }
}

/// Health counters written by the capture loop and read by anyone.
///
/// Counters only grow, except `consecutive_errors` which drops back to zero on
/// every successful capture.
#[derive(Debug)]
pub struct CaptureHealth {
    state: RwLock<CaptureState>,
    backend: RwLock<Option<String>>,
    frames_captured: AtomicU64,
    consecutive_errors: AtomicU64,
    total_errors: AtomicU64,
    reconnects: AtomicU64,
    device_open: AtomicBool,
    fps: Mutex<FpsWindow>,
}

/// Point-in-time copy of [`CaptureHealth`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaptureHealthSnapshot {
    pub state: CaptureState,
    pub backend: Option<String>,
    pub frames_captured: u64,
    pub consecutive_errors: u64,
    pub total_errors: u64,
    pub reconnects: u64,
    pub device_open: bool,
    pub fps: f64,
}

impl CaptureHealth {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CaptureState::Starting),
            backend: RwLock::new(None),
            frames_captured: AtomicU64::new(0),
            consecutive_errors: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            device_open: AtomicBool::new(false),
            fps: Mutex::new(FpsWindow::new(FPS_WINDOW)),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.read()
    }

    pub fn set_state(&self, state: CaptureState) {
        *self.state.write() = state;
    }

    pub fn backend(&self) -> Option<String> {
        self.backend.read().clone()
    }

    /// Mark the device open on the given backend
    pub fn device_opened(&self, backend: &str) {
        *self.backend.write() = Some(backend.to_string());
        self.device_open.store(true, Ordering::SeqCst);
    }

    pub fn device_closed(&self) {
        self.device_open.store(false, Ordering::SeqCst);
    }

    pub fn is_device_open(&self) -> bool {
        self.device_open.load(Ordering::SeqCst)
    }

    /// Count a successful capture and return its frame id (1-based)
    pub fn record_capture(&self, at: Instant) -> u64 {
        self.consecutive_errors.store(0, Ordering::SeqCst);
        self.fps.lock().push(at);
        self.frames_captured.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Count a failed read and return the consecutive error count
    pub fn record_error(&self) -> u64 {
        self.total_errors.fetch_add(1, Ordering::SeqCst);
        self.consecutive_errors.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_reconnect(&self) {
        self.consecutive_errors.store(0, Ordering::SeqCst);
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        // Old timestamps would drag the estimate down after an outage
        self.fps.lock().clear();
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured.load(Ordering::SeqCst)
    }

    pub fn consecutive_errors(&self) -> u64 {
        self.consecutive_errors.load(Ordering::SeqCst)
    }

    pub fn fps(&self) -> f64 {
        self.fps.lock().fps()
    }

    pub fn snapshot(&self) -> CaptureHealthSnapshot {
        CaptureHealthSnapshot {
            state: self.state(),
            backend: self.backend(),
            frames_captured: self.frames_captured.load(Ordering::SeqCst),
            consecutive_errors: self.consecutive_errors.load(Ordering::SeqCst),
            total_errors: self.total_errors.load(Ordering::SeqCst),
            reconnects: self.reconnects.load(Ordering::SeqCst),
            device_open: self.is_device_open(),
            fps: self.fps(),
        }
    }
}

impl Default for CaptureHealth {
    fn default() -> Self {
        Self::new()
    }
}
