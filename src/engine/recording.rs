use super::source::FrameSource;
use super::Engine;
use crate::config::RecordingConfig;
use crate::error::{Result, VisageError};
use crate::frame::Frame;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Name of the metadata file written next to a clip's frames
pub const CLIP_METADATA_FILE: &str = "clip.json";

/// How a clip is sampled from a frame source
#[derive(Debug, Clone, PartialEq)]
pub struct ClipOptions {
    pub duration: Duration,
    /// Delay between successive frame requests
    pub interval: Duration,
    pub annotated: bool,
}

impl ClipOptions {
    pub fn from_config(config: &RecordingConfig, duration: Duration) -> Self {
        Self {
            duration,
            interval: config.interval(),
            annotated: true,
        }
    }
}

/// What was recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipSummary {
    pub clip_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub frames: u64,
    /// Requests that got no frame or the same frame again
    pub skipped: u64,
    pub width: u32,
    pub height: u32,
    pub annotated: bool,
}

/// Destination for recorded frames
#[async_trait]
pub trait ClipWriter: Send {
    fn clip_id(&self) -> &str;

    async fn write_frame(&mut self, frame: &Frame) -> Result<()>;

    async fn finish(&mut self, summary: &ClipSummary) -> Result<()>;
}

/// Writes a clip as numbered JPEG files plus a JSON metadata file,
/// in a directory named after the clip id.
pub struct JpegSequenceWriter {
    clip_id: String,
    dir: PathBuf,
    quality: u8,
    written: u64,
}

impl JpegSequenceWriter {
    pub async fn create<P: AsRef<Path>>(root: P, quality: u8) -> Result<Self> {
        let clip_id = uuid::Uuid::new_v4().to_string();
        let dir = root.as_ref().join(&clip_id);

        fs::create_dir_all(&dir).await.map_err(|e| {
            VisageError::recording(format!(
                "Failed to create clip directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        debug!("Recording clip {} into {}", clip_id, dir.display());
        Ok(Self {
            clip_id,
            dir,
            quality,
            written: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ClipWriter for JpegSequenceWriter {
    fn clip_id(&self) -> &str {
        &self.clip_id
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let jpeg = frame.encode_jpeg(self.quality)?;
        let path = self.dir.join(format!("frame_{:05}.jpg", self.written + 1));

        fs::write(&path, jpeg).await.map_err(|e| {
            VisageError::recording(format!("Failed to write {}: {}", path.display(), e))
        })?;

        self.written += 1;
        Ok(())
    }

    async fn finish(&mut self, summary: &ClipSummary) -> Result<()> {
        let json = serde_json::to_string_pretty(summary)?;
        let path = self.dir.join(CLIP_METADATA_FILE);

        fs::write(&path, json).await.map_err(|e| {
            VisageError::recording(format!("Failed to write clip metadata: {}", e))
        })?;

        debug!("Saved clip metadata to {}", path.display());
        Ok(())
    }
}

/// Sample `source` for `options.duration` and hand the frames to `writer`.
///
/// A frame already written (same capture id) is not written twice. Fails if
/// the source produced nothing at all.
pub async fn record_clip(
    source: &dyn FrameSource,
    options: &ClipOptions,
    writer: &mut dyn ClipWriter,
) -> Result<ClipSummary> {
    let started_at = Utc::now();
    let start = tokio::time::Instant::now();
    let deadline = start.checked_add(options.duration).ok_or_else(|| {
        VisageError::recording(format!(
            "clip duration {:?} is out of range",
            options.duration
        ))
    })?;
    let mut ticker = tokio::time::interval(options.interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let mut frames = 0u64;
    let mut skipped = 0u64;
    let mut dimensions = (0, 0);
    let mut last_id = None;

    info!(
        "Recording clip {} from {} for {:?}",
        writer.clip_id(),
        source.name(),
        options.duration
    );

    loop {
        ticker.tick().await;
        if tokio::time::Instant::now() >= deadline {
            break;
        }

        match source.fetch(options.annotated).await {
            // Id 0 means the source does not number its frames
            Some(frame) if frame.id != 0 && last_id == Some(frame.id) => skipped += 1,
            Some(frame) => {
                writer.write_frame(&frame).await?;
                last_id = Some(frame.id);
                dimensions = frame.dimensions();
                frames += 1;
            }
            None => skipped += 1,
        }
    }

    if frames == 0 {
        return Err(VisageError::recording(format!(
            "source {} produced no frames",
            source.name()
        )));
    }

    let summary = ClipSummary {
        clip_id: writer.clip_id().to_string(),
        started_at,
        duration_ms: start.elapsed().as_millis() as u64,
        frames,
        skipped,
        width: dimensions.0,
        height: dimensions.1,
        annotated: options.annotated,
    };
    writer.finish(&summary).await?;

    info!(
        "Recorded clip {}: {} frame(s), {} skipped",
        summary.clip_id, summary.frames, summary.skipped
    );
    Ok(summary)
}

/// Write one frame as a JPEG file
pub async fn save_snapshot<P: AsRef<Path>>(frame: &Frame, path: P, quality: u8) -> Result<()> {
    let path = path.as_ref();
    let jpeg = frame.encode_jpeg(quality)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, jpeg).await?;

    info!("Saved snapshot of frame {} to {}", frame.id, path.display());
    Ok(())
}

/// Keeps the engine's recording flag set while alive
pub struct RecordingGuard {
    engine: Engine,
}

impl RecordingGuard {
    pub(crate) fn new(engine: Engine) -> Self {
        if engine.is_recording() {
            warn!("Recording indicator already on");
        }
        engine.set_recording(true);
        Self { engine }
    }
}

impl Drop for RecordingGuard {
    fn drop(&mut self) {
        self.engine.set_recording(false);
    }
}

impl Engine {
    /// Record a clip from this engine's frames with the recording indicator lit
    pub async fn record_clip(
        &self,
        options: &ClipOptions,
        writer: &mut dyn ClipWriter,
    ) -> Result<ClipSummary> {
        let _guard = self.recording_guard();
        let source = super::EngineSource::new(self.clone());
        record_clip(&source, options, writer).await
    }
}
