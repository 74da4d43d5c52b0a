mod backend;
mod capture_loop;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod gstreamer;
mod health;
pub mod mock;
mod test_pattern;

pub use backend::{
    read_with_timeout, CaptureBackend, DeviceHandle, DeviceOpener, DeviceProperty,
    DeviceSettings, OpenedDevice,
};
pub use capture_loop::CaptureLoop;
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use gstreamer::{GstSource, GstreamerBackend};
pub use health::{CaptureHealth, CaptureHealthSnapshot, CaptureState, FpsWindow};
pub use test_pattern::TestPatternBackend;

use std::sync::Arc;
use tracing::warn;

/// Resolve a configured backend priority list into backends, in order.
///
/// Unknown names, and GStreamer names in builds without the `camera`
/// feature, are skipped with a warning.
pub fn backends_from_names(names: &[String]) -> Vec<Arc<dyn CaptureBackend>> {
    let mut backends: Vec<Arc<dyn CaptureBackend>> = Vec::with_capacity(names.len());

    for name in names {
        match name.as_str() {
            "test-pattern" => backends.push(Arc::new(TestPatternBackend::new())),
            #[cfg(all(feature = "camera", target_os = "linux"))]
            other => match GstSource::from_name(other) {
                Some(source) => backends.push(Arc::new(GstreamerBackend::new(source))),
                None => warn!("Unknown capture backend '{}', skipping", other),
            },
            #[cfg(not(all(feature = "camera", target_os = "linux")))]
            other => warn!(
                "Capture backend '{}' is not available in this build, skipping",
                other
            ),
        }
    }

    backends
}
