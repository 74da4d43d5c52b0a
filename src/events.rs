use serde::Serialize;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Notifications published by the engine for collaborators that prefer push over polling
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EngineEvent {
    /// Motion state flipped to detected
    MotionStarted {
        total_area: f64,
        regions: usize,
        timestamp: SystemTime,
    },
    /// Motion state flipped back to idle after the cooldown
    MotionEnded { timestamp: SystemTime },
    /// Consecutive read errors crossed the reconnect threshold
    DeviceLost {
        consecutive_errors: u64,
        timestamp: SystemTime,
    },
    /// The capture loop reopened the device
    DeviceRecovered {
        backend: String,
        attempts: u32,
        timestamp: SystemTime,
    },
    /// Engine stopped and released the device
    EngineStopped { timestamp: SystemTime },
}

impl EngineEvent {
    pub fn timestamp(&self) -> SystemTime {
        match self {
            EngineEvent::MotionStarted { timestamp, .. } => *timestamp,
            EngineEvent::MotionEnded { timestamp } => *timestamp,
            EngineEvent::DeviceLost { timestamp, .. } => *timestamp,
            EngineEvent::DeviceRecovered { timestamp, .. } => *timestamp,
            EngineEvent::EngineStopped { timestamp } => *timestamp,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            EngineEvent::MotionStarted {
                total_area,
                regions,
                ..
            } => format!(
                "Motion detected: {} region(s), total area {:.0}",
                regions, total_area
            ),
            EngineEvent::MotionEnded { .. } => "Motion ended".to_string(),
            EngineEvent::DeviceLost {
                consecutive_errors, ..
            } => format!(
                "Camera lost after {} consecutive read errors",
                consecutive_errors
            ),
            EngineEvent::DeviceRecovered {
                backend, attempts, ..
            } => format!(
                "Camera recovered via {} after {} attempt(s)",
                backend, attempts
            ),
            EngineEvent::EngineStopped { .. } => "Engine stopped".to_string(),
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            EngineEvent::MotionStarted { .. } => "motion_started",
            EngineEvent::MotionEnded { .. } => "motion_ended",
            EngineEvent::DeviceLost { .. } => "device_lost",
            EngineEvent::DeviceRecovered { .. } => "device_recovered",
            EngineEvent::EngineStopped { .. } => "engine_stopped",
        }
    }
}

/// Broadcast event bus; publishing never blocks and never fails for lack of subscribers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers, returning how many received it
    pub fn publish(&self, event: EngineEvent) -> usize {
        match &event {
            EngineEvent::MotionStarted { .. } | EngineEvent::DeviceRecovered { .. } => {
                info!("{}", event.description());
            }
            EngineEvent::DeviceLost { .. } => {
                warn!("{}", event.description());
            }
            _ => {
                debug!("{}", event.description());
            }
        }

        // Err only means nobody is listening
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
