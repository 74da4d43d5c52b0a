use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Engine configuration. Immutable once the engine has been started; the motion
/// tunables exposed on the engine facade are copied out of it at start.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EngineConfig {
    pub camera: CameraConfig,
    pub motion: MotionConfig,
    pub overlay: OverlayConfig,
    pub recovery: RecoveryConfig,
    pub recording: RecordingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Requested resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Target capture rate
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Capture backends in priority order
    #[serde(default = "default_camera_backends")]
    pub backends: Vec<String>,

    /// Verification reads attempted after a backend opens
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,

    /// Upper bound for a single frame read
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Consecutive read errors before the device is reconnected
    #[serde(default = "default_max_errors")]
    pub max_errors: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MotionConfig {
    /// Start with motion detection enabled
    #[serde(default = "default_motion_enabled")]
    pub enabled: bool,

    /// Analyze one frame out of every `check_interval` captured frames
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,

    /// Background learning rate in (0, 1]
    #[serde(default = "default_sensitivity")]
    pub sensitivity: f32,

    /// Minimum per-pixel intensity delta counted as foreground
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: f32,

    /// Minimum region area, in full-resolution pixels
    #[serde(default = "default_min_area")]
    pub min_area: f64,

    /// Minimum dwell time between motion state flips
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: f64,

    /// Width of the downscaled analysis image
    #[serde(default = "default_analysis_width")]
    pub analysis_width: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct OverlayConfig {
    /// Render the status overlay on annotated frames
    #[serde(default = "default_overlay_enabled")]
    pub enabled: bool,

    /// Path to TrueType font file for overlay text
    #[serde(default = "default_font_path")]
    pub font_path: String,

    #[serde(default = "default_font_size")]
    pub font_size: f32,

    /// IANA timezone used for the timestamp line
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// Delay between reconnect attempts
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Cap for the delay when exponential backoff is enabled
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_exponential_backoff")]
    pub exponential_backoff: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecordingConfig {
    /// Base path for recorded clips and snapshots
    #[serde(default = "default_recording_path")]
    pub path: String,

    /// Interval between frames pulled into a clip
    #[serde(default = "default_recording_interval_ms")]
    pub interval_ms: u64,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl CameraConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }
}

impl MotionConfig {
    pub fn cooldown(&self) -> Result<Duration, ConfigError> {
        validate_cooldown(self.cooldown_seconds)
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: default_motion_enabled(),
            check_interval: default_check_interval(),
            sensitivity: default_sensitivity(),
            delta_threshold: default_delta_threshold(),
            min_area: default_min_area(),
            cooldown_seconds: default_cooldown_seconds(),
            analysis_width: default_analysis_width(),
        }
    }
}

impl RecordingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl EngineConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("visage.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.index", default_camera_index())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.backends", default_camera_backends())?
            .set_default("camera.verify_attempts", default_verify_attempts())?
            .set_default("camera.verify_delay_ms", default_verify_delay_ms())?
            .set_default("camera.read_timeout_ms", default_read_timeout_ms())?
            .set_default("camera.max_errors", default_max_errors())?
            .set_default("motion.enabled", default_motion_enabled())?
            .set_default("motion.check_interval", default_check_interval())?
            .set_default("motion.sensitivity", default_sensitivity() as f64)?
            .set_default("motion.delta_threshold", default_delta_threshold() as f64)?
            .set_default("motion.min_area", default_min_area())?
            .set_default("motion.cooldown_seconds", default_cooldown_seconds())?
            .set_default("motion.analysis_width", default_analysis_width())?
            .set_default("overlay.enabled", default_overlay_enabled())?
            .set_default("overlay.font_path", default_font_path())?
            .set_default("overlay.font_size", default_font_size() as f64)?
            .set_default("overlay.timezone", default_timezone())?
            .set_default("recovery.backoff_ms", default_backoff_ms())?
            .set_default("recovery.max_backoff_ms", default_max_backoff_ms())?
            .set_default("recovery.exponential_backoff", default_exponential_backoff())?
            .set_default("recording.path", default_recording_path())?
            .set_default("recording.interval_ms", default_recording_interval_ms())?
            .set_default("recording.jpeg_quality", default_jpeg_quality() as i64)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // VISAGE_CAMERA__INDEX=1 overrides camera.index
            .add_source(
                Environment::with_prefix("VISAGE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.camera.backends.is_empty() {
            return Err(ConfigError::Message(
                "At least one camera backend must be listed".to_string(),
            ));
        }

        if self.camera.verify_attempts == 0 {
            return Err(ConfigError::Message(
                "Camera verify_attempts must be greater than 0".to_string(),
            ));
        }

        if self.camera.read_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Camera read_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.camera.max_errors == 0 {
            return Err(ConfigError::Message(
                "Camera max_errors must be greater than 0".to_string(),
            ));
        }

        if self.motion.check_interval == 0 {
            return Err(ConfigError::Message(
                "Motion check_interval must be greater than 0".to_string(),
            ));
        }

        validate_sensitivity(self.motion.sensitivity)?;
        validate_min_area(self.motion.min_area)?;

        validate_cooldown(self.motion.cooldown_seconds)?;

        if self.motion.analysis_width == 0 {
            return Err(ConfigError::Message(
                "Motion analysis_width must be greater than 0".to_string(),
            ));
        }

        if self.recording.jpeg_quality == 0 || self.recording.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "Recording jpeg_quality must be within 1..=100".to_string(),
            ));
        }

        Ok(())
    }
}

pub(crate) fn validate_sensitivity(sensitivity: f32) -> Result<(), ConfigError> {
    if !(sensitivity > 0.0 && sensitivity <= 1.0) {
        return Err(ConfigError::Message(format!(
            "Motion sensitivity must be within (0, 1], got {}",
            sensitivity
        )));
    }
    Ok(())
}

pub(crate) fn validate_cooldown(seconds: f64) -> Result<Duration, ConfigError> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ConfigError::Message(format!(
            "Motion cooldown_seconds must be a non-negative number, got {}",
            seconds
        )));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| {
        ConfigError::Message(format!(
            "Motion cooldown_seconds {} is out of range: {}",
            seconds, e
        ))
    })
}

pub(crate) fn validate_min_area(min_area: f64) -> Result<(), ConfigError> {
    if !min_area.is_finite() || min_area < 0.0 {
        return Err(ConfigError::Message(format!(
            "Motion min_area must be a non-negative number, got {}",
            min_area
        )));
    }
    Ok(())
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                index: default_camera_index(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                backends: default_camera_backends(),
                verify_attempts: default_verify_attempts(),
                verify_delay_ms: default_verify_delay_ms(),
                read_timeout_ms: default_read_timeout_ms(),
                max_errors: default_max_errors(),
            },
            motion: MotionConfig::default(),
            overlay: OverlayConfig {
                enabled: default_overlay_enabled(),
                font_path: default_font_path(),
                font_size: default_font_size(),
                timezone: default_timezone(),
            },
            recovery: RecoveryConfig {
                backoff_ms: default_backoff_ms(),
                max_backoff_ms: default_max_backoff_ms(),
                exponential_backoff: default_exponential_backoff(),
            },
            recording: RecordingConfig {
                path: default_recording_path(),
                interval_ms: default_recording_interval_ms(),
                jpeg_quality: default_jpeg_quality(),
            },
        }
    }
}

// Default value functions
fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_camera_backends() -> Vec<String> {
    vec![
        "v4l2-mjpeg".to_string(),
        "v4l2-raw".to_string(),
        "auto".to_string(),
    ]
}
fn default_verify_attempts() -> u32 {
    5
}
fn default_verify_delay_ms() -> u64 {
    100
}
fn default_read_timeout_ms() -> u64 {
    1000
}
fn default_max_errors() -> u32 {
    5
}

fn default_motion_enabled() -> bool {
    true
}
fn default_check_interval() -> u64 {
    5
}
fn default_sensitivity() -> f32 {
    0.05
}
fn default_delta_threshold() -> f32 {
    25.0
}
fn default_min_area() -> f64 {
    500.0
}
fn default_cooldown_seconds() -> f64 {
    2.0
}
fn default_analysis_width() -> u32 {
    160
}

fn default_overlay_enabled() -> bool {
    true
}
fn default_font_path() -> String {
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf".to_string()
}
fn default_font_size() -> f32 {
    18.0
}
fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_backoff_ms() -> u64 {
    2000
}
fn default_max_backoff_ms() -> u64 {
    30_000
}
fn default_exponential_backoff() -> bool {
    false
}

fn default_recording_path() -> String {
    "./recordings".to_string()
}
fn default_recording_interval_ms() -> u64 {
    100
}
fn default_jpeg_quality() -> u8 {
    85
}
