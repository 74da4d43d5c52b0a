use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisageError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Motion analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Engine initialization failed: {details}")]
    Init { details: String },

    #[error("Invalid frame: {details}")]
    InvalidFrame { details: String },

    #[error("Recording error: {details}")]
    Recording { details: String },

    #[error("Overlay font '{path}' unusable: {details}")]
    Font { path: String, details: String },
}

/// Capture device failures. Everything except `Open` is recovered inside the capture loop.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Failed to open camera device {device}: {details}")]
    Open { device: u32, details: String },

    #[error("Frame read failed: {details}")]
    Read { details: String },

    #[error("Frame read timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Camera device disconnected")]
    Disconnected,

    #[error("Camera device is not open")]
    NotOpen,

    #[error("Failed to apply device property {property}: {details}")]
    Property { property: String, details: String },

    #[error("Reconnect attempt {attempt} failed: {details}")]
    ReconnectExhausted { attempt: u32, details: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalysisError {
    #[error("Frame conversion failed: {details}")]
    FrameConversion { details: String },

    #[error("Empty frame ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
}

impl VisageError {
    pub fn init<S: Into<String>>(details: S) -> Self {
        Self::Init {
            details: details.into(),
        }
    }

    pub fn recording<S: Into<String>>(details: S) -> Self {
        Self::Recording {
            details: details.into(),
        }
    }

}

impl DeviceError {
    pub fn read<S: Into<String>>(details: S) -> Self {
        Self::Read {
            details: details.into(),
        }
    }

    /// Whether reading again from the same handle can succeed. A dead
    /// stream has to be reopened instead.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DeviceError::Disconnected | DeviceError::NotOpen)
    }
}

pub type Result<T> = std::result::Result<T, VisageError>;
