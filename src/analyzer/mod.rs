mod background;
mod detection_loop;
mod monitor;
mod motion;
mod state;

pub use background::BackgroundModel;
pub use detection_loop::DetectionLoop;
pub use monitor::MotionMonitor;
pub use motion::{MotionAnalyzer, MotionParams};
pub use state::{MotionRegion, MotionState, MotionTransition};
