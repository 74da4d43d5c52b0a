use super::motion::{MotionAnalyzer, MotionParams};
use super::state::{MotionState, MotionTransition};
use crate::config::{validate_min_area, validate_sensitivity, MotionConfig};
use crate::error::Result;
use crate::frame::Frame;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Shared front of the motion analyzer.
///
/// The detection loop runs analyses through it; everyone else reads the last
/// published [`MotionState`] and adjusts tunables without waiting on an
/// analysis in progress.
pub struct MotionMonitor {
    analyzer: Mutex<MotionAnalyzer>,
    state: RwLock<MotionState>,
    params: RwLock<MotionParams>,
    enabled: AtomicBool,
    analyses: AtomicU64,
}

impl MotionMonitor {
    pub fn new(config: &MotionConfig) -> Result<Self> {
        Ok(Self {
            analyzer: Mutex::new(MotionAnalyzer::new()),
            state: RwLock::new(MotionState::default()),
            params: RwLock::new(MotionParams::try_from(config)?),
            enabled: AtomicBool::new(config.enabled),
            analyses: AtomicU64::new(0),
        })
    }

    /// Analyze one frame. Blocking; run it off the async workers.
    pub fn process(&self, frame: &Frame) -> Option<MotionTransition> {
        let params = self.params.read().clone();
        let mut analyzer = self.analyzer.lock();

        let transition = analyzer.process(frame, &params, Instant::now());
        *self.state.write() = analyzer.state().clone();
        self.analyses.fetch_add(1, Ordering::Relaxed);

        transition
    }

    pub fn state(&self) -> MotionState {
        self.state.read().clone()
    }

    pub fn params(&self) -> MotionParams {
        self.params.read().clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip detection on or off and return the new value
    pub fn toggle(&self) -> bool {
        let enabled = !self.enabled.fetch_xor(true, Ordering::SeqCst);
        info!(
            "Motion detection {}",
            if enabled { "enabled" } else { "disabled" }
        );
        enabled
    }

    /// Evaluations run so far, including failed ones
    pub fn analyses(&self) -> u64 {
        self.analyses.load(Ordering::Relaxed)
    }

    /// Set the background learning rate
    pub fn set_sensitivity(&self, sensitivity: f32) -> Result<()> {
        validate_sensitivity(sensitivity)?;
        self.params.write().sensitivity = sensitivity;
        info!("Motion sensitivity set to {}", sensitivity);
        Ok(())
    }

    /// Set the minimum region area
    pub fn set_threshold(&self, min_area: f64) -> Result<()> {
        validate_min_area(min_area)?;
        self.params.write().min_area = min_area;
        info!("Motion area threshold set to {}", min_area);
        Ok(())
    }

    /// Drop the background model and the current verdict
    pub fn reset(&self) {
        self.analyzer.lock().reset();
        *self.state.write() = MotionState::default();
        info!("Motion analyzer reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_twice_restores() {
        let monitor = MotionMonitor::new(&MotionConfig::default()).unwrap();
        let original = monitor.is_enabled();

        assert_eq!(monitor.toggle(), !original);
        assert_eq!(monitor.toggle(), original);
        assert_eq!(monitor.is_enabled(), original);
    }

    #[test]
    fn test_unrepresentable_cooldown_is_rejected() {
        let config = MotionConfig {
            cooldown_seconds: f64::INFINITY,
            ..MotionConfig::default()
        };
        assert!(MotionMonitor::new(&config).is_err());
    }

    #[test]
    fn test_tunables_are_validated() {
        let monitor = MotionMonitor::new(&MotionConfig::default()).unwrap();

        monitor.set_sensitivity(0.2).unwrap();
        monitor.set_threshold(1200.0).unwrap();
        assert_eq!(monitor.params().sensitivity, 0.2);
        assert_eq!(monitor.params().min_area, 1200.0);

        assert!(monitor.set_sensitivity(0.0).is_err());
        assert!(monitor.set_sensitivity(1.5).is_err());
        assert!(monitor.set_threshold(-1.0).is_err());
        assert_eq!(monitor.params().sensitivity, 0.2);
    }

    #[test]
    fn test_process_publishes_state() {
        let monitor = MotionMonitor::new(&MotionConfig::default()).unwrap();
        let background = Frame::filled(320, 240, [128; 3]);
        let mut moving = background.clone();
        {
            let data = moving.data_mut();
            for y in 60..120u32 {
                for x in 60..120u32 {
                    let offset = ((y * 320 + x) * 3) as usize;
                    data[offset..offset + 3].copy_from_slice(&[255; 3]);
                }
            }
        }

        assert_eq!(monitor.process(&background), None);
        assert!(matches!(
            monitor.process(&moving),
            Some(MotionTransition::Started { regions: 1, .. })
        ));
        assert!(monitor.state().detected);
        assert_eq!(monitor.analyses(), 2);

        monitor.reset();
        assert!(!monitor.state().detected);
    }
}
