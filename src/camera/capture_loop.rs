use super::backend::{read_with_timeout, DeviceHandle, DeviceOpener, DeviceSettings, OpenedDevice};
use super::health::{CaptureHealth, CaptureState};
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventBus};
use crate::frame_cache::FrameCache;
use crate::recovery::CameraRecovery;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Drives the capture device at the configured rate and keeps the frame cache fresh.
///
/// The loop owns the device handle exclusively. When reads keep failing or the
/// device reports closed, the handle is released and reopened through the same
/// backend fallback used at start-up, with backoff, for as long as the loop is
/// not cancelled.
pub struct CaptureLoop {
    opener: Arc<DeviceOpener>,
    settings: DeviceSettings,
    frame_interval: Duration,
    read_timeout: Duration,
    max_errors: u64,
    recovery: CameraRecovery,
    cache: Arc<FrameCache>,
    health: Arc<CaptureHealth>,
    events: EventBus,
}

impl CaptureLoop {
    pub fn new(
        config: &EngineConfig,
        opener: Arc<DeviceOpener>,
        cache: Arc<FrameCache>,
        health: Arc<CaptureHealth>,
        events: EventBus,
    ) -> Self {
        Self {
            settings: DeviceSettings::from(&config.camera),
            frame_interval: config.camera.frame_interval(),
            read_timeout: opener.read_timeout(),
            max_errors: u64::from(config.camera.max_errors.max(1)),
            recovery: CameraRecovery::new(&config.recovery),
            opener,
            cache,
            health,
            events,
        }
    }

    /// Take over a freshly opened device: cache its verification frame and mark
    /// the loop running.
    pub fn accept(&self, opened: OpenedDevice) -> Box<dyn DeviceHandle> {
        let OpenedDevice {
            handle,
            verification_frame,
        } = opened;

        self.health.device_opened(handle.backend());
        let id = self.health.record_capture(std::time::Instant::now());
        self.cache.set_raw(verification_frame.with_id(id));
        self.health.set_state(CaptureState::Running);

        handle
    }

    /// Run until cancelled. Returns the device handle, if one is still held,
    /// so the caller can release it after joining.
    pub async fn run(
        mut self,
        handle: Box<dyn DeviceHandle>,
        cancel: CancellationToken,
    ) -> Option<Box<dyn DeviceHandle>> {
        info!(
            "Capture loop started on {} at {:?} per frame",
            handle.backend(),
            self.frame_interval
        );

        let mut handle = Some(handle);
        let mut next_due = Instant::now() + self.frame_interval;

        loop {
            let Some(device) = handle.as_mut() else {
                match self.reconnect(&cancel).await {
                    Some(reopened) => {
                        handle = Some(reopened);
                        next_due = Instant::now() + self.frame_interval;
                        continue;
                    }
                    None => break,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(next_due) => {}
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = read_with_timeout(device.as_mut(), self.read_timeout) => result,
            };

            let captured_at = Instant::now();
            next_due = captured_at + self.frame_interval;

            let lost = match result {
                Ok(frame) => {
                    let id = self.health.record_capture(captured_at.into_std());
                    trace!("Captured frame {} ({}x{})", id, frame.width, frame.height);
                    self.cache.set_raw(frame.with_id(id));
                    false
                }
                Err(e) => {
                    let consecutive = self.health.record_error();
                    if consecutive >= self.max_errors
                        || !e.is_recoverable()
                        || !device.is_open()
                    {
                        error!(
                            "Camera read failed ({} consecutive errors): {}",
                            consecutive, e
                        );
                        true
                    } else {
                        debug!(
                            "Camera read failed ({}/{}): {}",
                            consecutive, self.max_errors, e
                        );
                        false
                    }
                }
            };

            if lost {
                if let Some(device) = handle.take() {
                    self.device_lost(device).await;
                }
            }
        }

        info!("Capture loop stopped");
        handle
    }

    async fn device_lost(&self, mut device: Box<dyn DeviceHandle>) {
        let consecutive_errors = self.health.consecutive_errors();
        warn!(
            "Lost camera on backend {}, reconnecting",
            device.backend()
        );

        self.health.device_closed();
        self.health.set_state(CaptureState::Reconnecting);
        self.events.publish(EngineEvent::DeviceLost {
            consecutive_errors,
            timestamp: SystemTime::now(),
        });

        if let Err(e) = device.release().await {
            warn!("Failed to release camera: {}", e);
        }
    }

    /// Reopen the device until it works or the loop is cancelled
    async fn reconnect(&mut self, cancel: &CancellationToken) -> Option<Box<dyn DeviceHandle>> {
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return None,
                result = self.opener.open(&self.settings) => result,
            };

            match result {
                Ok(opened) => {
                    let attempts = self.recovery.attempts() + 1;
                    let backend = opened.handle.backend().to_string();

                    self.recovery.reset();
                    self.health.record_reconnect();
                    let handle = self.accept(opened);

                    self.events.publish(EngineEvent::DeviceRecovered {
                        backend,
                        attempts,
                        timestamp: SystemTime::now(),
                    });
                    return Some(handle);
                }
                Err(e) => {
                    let delay = self.recovery.handle_failure(&e);
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
