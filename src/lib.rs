pub mod analyzer;
pub mod camera;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod frame_cache;
pub mod overlay;
pub mod recovery;

pub use analyzer::{MotionAnalyzer, MotionMonitor, MotionRegion, MotionState};
pub use camera::{CaptureBackend, CaptureState, DeviceHandle, DeviceOpener, TestPatternBackend};
pub use config::EngineConfig;
pub use engine::{
    record_clip, save_snapshot, ClipOptions, ClipSummary, ClipWriter, DirectCaptureSource, Engine,
    EngineBuilder, EngineSource, EngineStats, FrameSource, FrameSourceChain, JpegSequenceWriter,
};
pub use error::{AnalysisError, DeviceError, Result, VisageError};
pub use events::{EngineEvent, EventBus};
pub use frame::{Frame, PixelFormat};
pub use frame_cache::FrameCache;
pub use overlay::OverlayRenderer;
pub use recovery::CameraRecovery;
