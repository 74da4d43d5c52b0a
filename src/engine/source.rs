use super::Engine;
use crate::camera::{backends_from_names, CaptureBackend, DeviceOpener, DeviceSettings};
use crate::config::EngineConfig;
use crate::frame::Frame;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Anything that can hand out a frame on request
#[async_trait]
pub trait FrameSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, annotated: bool) -> Option<Frame>;
}

/// Frames from a running engine's cache
pub struct EngineSource {
    engine: Engine,
}

impl EngineSource {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl FrameSource for EngineSource {
    fn name(&self) -> &str {
        "engine"
    }

    async fn fetch(&self, annotated: bool) -> Option<Frame> {
        self.engine.get_frame(annotated)
    }
}

/// Opens the device for a single frame and releases it again.
///
/// Used when no engine is running. Frames are always raw.
pub struct DirectCaptureSource {
    opener: DeviceOpener,
    settings: DeviceSettings,
}

impl DirectCaptureSource {
    pub fn new(backends: Vec<Arc<dyn CaptureBackend>>, config: &EngineConfig) -> Self {
        Self {
            opener: DeviceOpener::from_config(backends, &config.camera),
            settings: DeviceSettings::from(&config.camera),
        }
    }

    /// Use the backends named in the configuration
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(backends_from_names(&config.camera.backends), config)
    }
}

#[async_trait]
impl FrameSource for DirectCaptureSource {
    fn name(&self) -> &str {
        "direct-capture"
    }

    async fn fetch(&self, annotated: bool) -> Option<Frame> {
        if annotated {
            debug!("Direct capture has no overlay, returning a raw frame");
        }

        let mut opened = match self.opener.open(&self.settings).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Direct capture failed: {}", e);
                return None;
            }
        };

        if let Err(e) = opened.handle.release().await {
            warn!("Failed to release camera after direct capture: {}", e);
        }
        Some(opened.verification_frame)
    }
}

/// Ordered fallback list of sources; the first one with a frame wins
#[derive(Default)]
pub struct FrameSourceChain {
    sources: Vec<Box<dyn FrameSource>>,
}

impl FrameSourceChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl FrameSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl FrameSource for FrameSourceChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn fetch(&self, annotated: bool) -> Option<Frame> {
        for source in &self.sources {
            match source.fetch(annotated).await {
                Some(frame) => {
                    debug!("Frame {} from source {}", frame.id, source.name());
                    return Some(frame);
                }
                None => debug!("Source {} had no frame", source.name()),
            }
        }
        None
    }
}
