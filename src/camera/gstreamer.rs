use super::backend::{CaptureBackend, DeviceHandle, DeviceProperty, DeviceSettings};
use crate::error::DeviceError;
use crate::frame::{Frame, PixelFormat};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::{ClockTime, Element, Pipeline};
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

/// Upper bound for a single blocking pull from the appsink
const PULL_TIMEOUT_MS: u64 = 2000;
/// How long to wait for the pipeline to reach PLAYING
const STATE_CHANGE_TIMEOUT_SECS: u64 = 3;

/// GStreamer source strategies, tried in the order the configuration lists them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GstSource {
    /// V4L2 device negotiated as MJPEG and decoded in the pipeline
    V4l2Mjpeg,
    /// V4L2 device in whatever raw format it offers
    V4l2Raw,
    /// Let GStreamer pick a source
    Auto,
}

impl GstSource {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "v4l2-mjpeg" => Some(Self::V4l2Mjpeg),
            "v4l2-raw" => Some(Self::V4l2Raw),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::V4l2Mjpeg => "v4l2-mjpeg",
            Self::V4l2Raw => "v4l2-raw",
            Self::Auto => "auto",
        }
    }

    fn source_description(&self, index: u32) -> String {
        match self {
            Self::V4l2Mjpeg => format!(
                "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true ! image/jpeg ! jpegdec",
                index
            ),
            Self::V4l2Raw => format!(
                "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true",
                index
            ),
            Self::Auto => "autovideosrc".to_string(),
        }
    }
}

/// Capture backend built on a GStreamer pipeline ending in an RGB appsink
pub struct GstreamerBackend {
    source: GstSource,
}

impl GstreamerBackend {
    pub fn new(source: GstSource) -> Self {
        Self { source }
    }

    /// Requested size and rate are applied later through the `props` capsfilter,
    /// so the pipeline itself only pins the pixel format.
    fn build_pipeline_string(&self, settings: &DeviceSettings) -> String {
        format!(
            "{} ! queue max-size-buffers=4 leaky=downstream ! \
             videoconvert ! videoscale ! videorate ! \
             capsfilter name=props caps=video/x-raw,format=RGB ! \
             appsink name=sink sync=false max-buffers=2 drop=true enable-last-sample=false emit-signals=false",
            self.source.source_description(settings.index)
        )
    }
}

#[async_trait]
impl CaptureBackend for GstreamerBackend {
    fn name(&self) -> &str {
        self.source.name()
    }

    async fn open(&self, settings: &DeviceSettings) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        let description = self.build_pipeline_string(settings);
        let source = self.source;
        let device = settings.index;

        let handle = tokio::task::spawn_blocking(move || {
            GstreamerHandle::launch(source, &description, device)
        })
        .await
        .map_err(|e| DeviceError::Open {
            device,
            details: format!("pipeline launch task failed: {}", e),
        })??;

        Ok(Box::new(handle))
    }
}

struct GstreamerHandle {
    source: GstSource,
    pipeline: Pipeline,
    appsink: AppSink,
    capsfilter: Element,
    requested_size: Option<(u32, u32)>,
    requested_fps: Option<u32>,
    open: bool,
}

impl GstreamerHandle {
    fn launch(source: GstSource, description: &str, device: u32) -> Result<Self, DeviceError> {
        let open_error = |details: String| DeviceError::Open { device, details };

        gstreamer::init().map_err(|e| open_error(format!("Failed to initialize GStreamer: {}", e)))?;

        info!("Creating GStreamer pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(description)
            .map_err(|e| open_error(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| open_error("Failed to downcast to Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| open_error("Failed to get appsink element".to_string()))?
            .downcast::<AppSink>()
            .map_err(|_| open_error("Failed to downcast to AppSink".to_string()))?;

        let capsfilter = pipeline
            .by_name("props")
            .ok_or_else(|| open_error("Failed to get capsfilter element".to_string()))?;

        if let Err(e) = pipeline.set_state(gstreamer::State::Playing) {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(open_error(format!("Failed to start pipeline: {}", e)));
        }

        let (result, _, _) = pipeline.state(ClockTime::from_seconds(STATE_CHANGE_TIMEOUT_SECS));
        if let Err(e) = result {
            let _ = pipeline.set_state(gstreamer::State::Null);
            return Err(open_error(format!("Pipeline did not reach PLAYING: {}", e)));
        }

        debug!("GStreamer pipeline for {} is playing", source.name());

        Ok(Self {
            source,
            pipeline,
            appsink,
            capsfilter,
            requested_size: None,
            requested_fps: None,
            open: true,
        })
    }

    /// Pop a pending pipeline error, if any
    fn pending_error(&self) -> Option<String> {
        let bus = self.pipeline.bus()?;
        let message = bus.pop_filtered(&[gstreamer::MessageType::Error])?;
        match message.view() {
            gstreamer::MessageView::Error(err) => Some(format!(
                "{} ({})",
                err.error(),
                err.debug().map(|d| d.to_string()).unwrap_or_default()
            )),
            _ => None,
        }
    }

    fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame, DeviceError> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| DeviceError::read("No buffer in sample"))?;
        let caps = sample
            .caps()
            .ok_or_else(|| DeviceError::read("No caps in sample"))?;
        let video_info = VideoInfo::from_caps(caps)
            .map_err(|e| DeviceError::read(format!("Failed to get video info: {}", e)))?;

        let width = video_info.width();
        let height = video_info.height();
        let stride = video_info.stride()[0] as usize;
        let row_bytes = width as usize * 3;

        let map = buffer
            .map_readable()
            .map_err(|e| DeviceError::read(format!("Failed to map buffer: {}", e)))?;
        let bytes = map.as_slice();

        // Rows may be padded to the stride
        let mut data = Vec::with_capacity(row_bytes * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let line = bytes
                .get(start..start + row_bytes)
                .ok_or_else(|| DeviceError::read("Buffer shorter than its caps"))?;
            data.extend_from_slice(line);
        }

        Frame::new(width, height, PixelFormat::Rgb8, data, SystemTime::now())
            .map_err(|e| DeviceError::read(e.to_string()))
    }
}

#[async_trait]
impl DeviceHandle for GstreamerHandle {
    fn backend(&self) -> &str {
        self.source.name()
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn apply_property(&mut self, property: DeviceProperty) -> Result<(), DeviceError> {
        match property {
            DeviceProperty::Resolution { width, height } => {
                self.requested_size = Some((width, height))
            }
            DeviceProperty::FrameRate(fps) => self.requested_fps = Some(fps),
        }

        let mut builder = gstreamer::Caps::builder("video/x-raw").field("format", "RGB");
        if let Some((width, height)) = self.requested_size {
            builder = builder
                .field("width", width as i32)
                .field("height", height as i32);
        }
        if let Some(fps) = self.requested_fps {
            builder = builder.field("framerate", gstreamer::Fraction::new(fps as i32, 1));
        }
        let caps = builder.build();

        debug!("Applying caps {} to {}", caps, self.source.name());
        self.capsfilter.set_property("caps", &caps);

        match self.pending_error() {
            Some(details) => Err(DeviceError::Property {
                property: property.to_string(),
                details,
            }),
            None => Ok(()),
        }
    }

    async fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }

        let appsink = self.appsink.clone();
        let sample = tokio::task::spawn_blocking(move || {
            appsink.try_pull_sample(ClockTime::from_mseconds(PULL_TIMEOUT_MS))
        })
        .await
        .map_err(|e| DeviceError::read(format!("pull task failed: {}", e)))?;

        match sample {
            Some(sample) => {
                let frame = Self::sample_to_frame(&sample)?;
                trace!(
                    "Pulled {}x{} frame from {}",
                    frame.width,
                    frame.height,
                    self.source.name()
                );
                Ok(frame)
            }
            None if self.appsink.is_eos() => {
                warn!("GStreamer source {} reached end of stream", self.source.name());
                self.open = false;
                Err(DeviceError::Disconnected)
            }
            None => match self.pending_error() {
                Some(details) => {
                    warn!("GStreamer pipeline error: {}", details);
                    self.open = false;
                    Err(DeviceError::Disconnected)
                }
                None => Err(DeviceError::Timeout {
                    timeout: std::time::Duration::from_millis(PULL_TIMEOUT_MS),
                }),
            },
        }
    }

    async fn release(&mut self) -> Result<(), DeviceError> {
        self.open = false;
        self.pipeline
            .set_state(gstreamer::State::Null)
            .map(|_| ())
            .map_err(|e| DeviceError::read(format!("Failed to stop pipeline: {}", e)))
    }
}

impl Drop for GstreamerHandle {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gstreamer::State::Null);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_names_round_trip() {
        for source in [GstSource::V4l2Mjpeg, GstSource::V4l2Raw, GstSource::Auto] {
            assert_eq!(GstSource::from_name(source.name()), Some(source));
        }
        assert_eq!(GstSource::from_name("test-pattern"), None);
    }

    #[test]
    fn test_pipeline_string() {
        let backend = GstreamerBackend::new(GstSource::V4l2Mjpeg);
        let settings = DeviceSettings {
            index: 2,
            width: 640,
            height: 480,
            fps: 30,
        };
        let pipeline = backend.build_pipeline_string(&settings);
        assert!(pipeline.starts_with("v4l2src device=/dev/video2"));
        assert!(pipeline.contains("jpegdec"));
        assert!(pipeline.contains("capsfilter name=props"));
        assert!(pipeline.contains("appsink name=sink"));
    }
}
