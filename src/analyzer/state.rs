use serde::Serialize;
use std::time::SystemTime;

/// Bounding box of one moving region, in full-frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MotionRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    /// Pixel area scaled back to full resolution
    pub area: f64,
}

/// Current motion verdict. `detected` implies at least one region.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MotionState {
    pub detected: bool,
    pub regions: Vec<MotionRegion>,
    pub last_detection_time: Option<SystemTime>,
}

impl MotionState {
    pub fn total_area(&self) -> f64 {
        self.regions.iter().map(|r| r.area).sum()
    }
}

/// A flip of the motion verdict
#[derive(Debug, Clone, PartialEq)]
pub enum MotionTransition {
    Started { total_area: f64, regions: usize },
    Ended,
}
