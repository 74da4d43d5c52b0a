use crate::config::CameraConfig;
use crate::error::DeviceError;
use crate::frame::Frame;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// What the engine asks of a capture device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    pub index: u32,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl From<&CameraConfig> for DeviceSettings {
    fn from(config: &CameraConfig) -> Self {
        Self {
            index: config.index,
            width: config.resolution.0,
            height: config.resolution.1,
            fps: config.fps,
        }
    }
}

/// Device property applied after a backend has opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceProperty {
    Resolution { width: u32, height: u32 },
    FrameRate(u32),
}

impl fmt::Display for DeviceProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProperty::Resolution { width, height } => {
                write!(f, "resolution {}x{}", width, height)
            }
            DeviceProperty::FrameRate(fps) => write!(f, "framerate {}fps", fps),
        }
    }
}

/// An open capture device. Owned by exactly one task at a time.
#[async_trait]
pub trait DeviceHandle: Send {
    /// Name of the backend that opened this handle
    fn backend(&self) -> &str;

    /// False once the device reported that it went away
    fn is_open(&self) -> bool;

    fn apply_property(&mut self, property: DeviceProperty) -> DeviceResult<()>;

    /// Read the next frame. May block; callers bound it with `read_with_timeout`.
    async fn read_frame(&mut self) -> DeviceResult<Frame>;

    async fn release(&mut self) -> DeviceResult<()>;
}

/// One strategy for opening a capture device
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, settings: &DeviceSettings) -> DeviceResult<Box<dyn DeviceHandle>>;
}

/// A handle that passed verification, together with the verification frame
pub struct OpenedDevice {
    pub handle: Box<dyn DeviceHandle>,
    pub verification_frame: Frame,
}

impl fmt::Debug for OpenedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedDevice")
            .field("backend", &self.handle.backend())
            .field("verification_frame", &self.verification_frame.id)
            .finish()
    }
}

/// Read a frame, giving up after `timeout`
pub async fn read_with_timeout(
    handle: &mut dyn DeviceHandle,
    timeout: Duration,
) -> DeviceResult<Frame> {
    match tokio::time::timeout(timeout, handle.read_frame()).await {
        Ok(result) => result,
        Err(_) => Err(DeviceError::Timeout { timeout }),
    }
}

/// Opens a device by trying each backend in priority order.
///
/// A backend counts as opened only once a verification read produced a frame.
/// Requested properties are applied best-effort in between.
pub struct DeviceOpener {
    backends: Vec<Arc<dyn CaptureBackend>>,
    verify_attempts: u32,
    verify_delay: Duration,
    read_timeout: Duration,
}

impl DeviceOpener {
    pub fn new(
        backends: Vec<Arc<dyn CaptureBackend>>,
        verify_attempts: u32,
        verify_delay: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            backends,
            verify_attempts: verify_attempts.max(1),
            verify_delay,
            read_timeout,
        }
    }

    pub fn from_config(backends: Vec<Arc<dyn CaptureBackend>>, config: &CameraConfig) -> Self {
        Self::new(
            backends,
            config.verify_attempts,
            config.verify_delay(),
            config.read_timeout(),
        )
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub async fn open(&self, settings: &DeviceSettings) -> DeviceResult<OpenedDevice> {
        if self.backends.is_empty() {
            return Err(DeviceError::Open {
                device: settings.index,
                details: "no capture backends available".to_string(),
            });
        }

        let mut failures = Vec::with_capacity(self.backends.len());

        for backend in &self.backends {
            debug!(
                "Opening camera {} with backend {}",
                settings.index,
                backend.name()
            );

            let mut handle = match backend.open(settings).await {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Backend {} failed to open camera: {}", backend.name(), e);
                    failures.push(format!("{}: {}", backend.name(), e));
                    continue;
                }
            };

            Self::apply_requested_properties(handle.as_mut(), settings);

            match self.verify(handle.as_mut()).await {
                Ok(frame) => {
                    info!(
                        "Camera {} opened with backend {} ({}x{})",
                        settings.index,
                        backend.name(),
                        frame.width,
                        frame.height
                    );
                    return Ok(OpenedDevice {
                        handle,
                        verification_frame: frame,
                    });
                }
                Err(e) => {
                    warn!(
                        "Backend {} opened camera but verification failed: {}",
                        backend.name(),
                        e
                    );
                    if let Err(release_err) = handle.release().await {
                        warn!("Failed to release unverified device: {}", release_err);
                    }
                    failures.push(format!("{}: {}", backend.name(), e));
                }
            }
        }

        Err(DeviceError::Open {
            device: settings.index,
            details: failures.join("; "),
        })
    }

    fn apply_requested_properties(handle: &mut dyn DeviceHandle, settings: &DeviceSettings) {
        let properties = [
            DeviceProperty::Resolution {
                width: settings.width,
                height: settings.height,
            },
            DeviceProperty::FrameRate(settings.fps),
        ];

        for property in properties {
            if let Err(e) = handle.apply_property(property) {
                warn!(
                    "Backend {} could not apply {}: {}",
                    handle.backend(),
                    property,
                    e
                );
            }
        }
    }

    async fn verify(&self, handle: &mut dyn DeviceHandle) -> DeviceResult<Frame> {
        let mut last_error = DeviceError::NotOpen;

        for attempt in 1..=self.verify_attempts {
            match read_with_timeout(handle, self.read_timeout).await {
                Ok(frame) => return Ok(frame),
                Err(e) => {
                    debug!(
                        "Verification read {}/{} failed: {}",
                        attempt, self.verify_attempts, e
                    );
                    last_error = e;
                }
            }

            if attempt < self.verify_attempts {
                tokio::time::sleep(self.verify_delay).await;
            }
        }

        Err(last_error)
    }
}
