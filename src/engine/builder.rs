use super::{Engine, EngineInner, EngineTasks};
use crate::analyzer::{DetectionLoop, MotionMonitor};
use crate::camera::{
    backends_from_names, CaptureBackend, CaptureHealth, CaptureLoop, DeviceOpener, DeviceSettings,
};
use crate::config::EngineConfig;
use crate::error::{Result, VisageError};
use crate::events::EventBus;
use crate::frame_cache::FrameCache;
use crate::overlay::OverlayRenderer;
use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Builder for [`Engine`]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    backends: Vec<Arc<dyn CaptureBackend>>,
    events: Option<EventBus>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            backends: Vec::new(),
            events: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Add a capture backend. When none are added, the configured backend
    /// names are used.
    pub fn backend(mut self, backend: Arc<dyn CaptureBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Open the device and spawn the capture and detection loops.
    ///
    /// Fails with [`VisageError::Init`] if the configuration is invalid or no
    /// backend yields a verified frame.
    pub async fn start(self) -> Result<Engine> {
        let config = self
            .config
            .ok_or_else(|| VisageError::init("Engine configuration must be specified"))?;
        config
            .validate()
            .map_err(|e| VisageError::init(format!("invalid configuration: {}", e)))?;

        let monitor = Arc::new(
            MotionMonitor::new(&config.motion)
                .map_err(|e| VisageError::init(format!("invalid motion settings: {}", e)))?,
        );

        let backends = if self.backends.is_empty() {
            backends_from_names(&config.camera.backends)
        } else {
            self.backends
        };

        let opener = Arc::new(DeviceOpener::from_config(backends, &config.camera));
        let settings = DeviceSettings::from(&config.camera);

        info!(
            "Starting engine for camera {} at {}x{}@{}fps (backends: {})",
            settings.index,
            settings.width,
            settings.height,
            settings.fps,
            opener.backend_names().join(", ")
        );

        let opened = opener
            .open(&settings)
            .await
            .map_err(|e| VisageError::init(e.to_string()))?;

        let events = self.events.unwrap_or_default();
        let cache = Arc::new(FrameCache::new());
        let health = Arc::new(CaptureHealth::new());
        let overlay = OverlayRenderer::new(&config.overlay, config.camera.index);
        let cancel = CancellationToken::new();

        let capture = CaptureLoop::new(
            &config,
            opener,
            Arc::clone(&cache),
            Arc::clone(&health),
            events.clone(),
        );
        let handle = capture.accept(opened);

        let detection = DetectionLoop::new(
            Arc::clone(&monitor),
            Arc::clone(&cache),
            events.clone(),
            config.motion.check_interval,
        );

        let tasks = EngineTasks {
            capture: tokio::spawn(capture.run(handle, cancel.child_token())),
            detection: tokio::spawn(detection.run(cancel.child_token())),
        };

        info!("Engine started");

        Ok(Engine {
            inner: Arc::new(EngineInner {
                overlay_enabled: AtomicBool::new(config.overlay.enabled),
                config,
                cache,
                health,
                monitor,
                overlay,
                events,
                cancel,
                tasks: Mutex::new(Some(tasks)),
                running: AtomicBool::new(true),
                recording: AtomicBool::new(false),
                started_at: Instant::now(),
            }),
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
