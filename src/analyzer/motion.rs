use super::background::BackgroundModel;
use super::state::{MotionRegion, MotionState, MotionTransition};
use crate::config::MotionConfig;
use config::ConfigError;
use crate::error::AnalysisError;
use crate::frame::Frame;

use image::{imageops, GrayImage, Luma};
use imageproc::{
    distance_transform::Norm,
    morphology::{close, open},
    region_labelling::{connected_components, Connectivity},
};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, trace, warn};

/// Radius of the opening/closing structuring element (3x3 square)
const MORPHOLOGY_RADIUS: u8 = 1;

/// Tunables read on every evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct MotionParams {
    /// Background learning rate, in (0, 1]
    pub sensitivity: f32,
    /// Minimum grey-level deviation for a foreground pixel
    pub delta_threshold: f32,
    /// Minimum full-resolution region area
    pub min_area: f64,
    pub cooldown: Duration,
    pub analysis_width: u32,
}

impl TryFrom<&MotionConfig> for MotionParams {
    type Error = ConfigError;

    fn try_from(config: &MotionConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            sensitivity: config.sensitivity,
            delta_threshold: config.delta_threshold,
            min_area: config.min_area,
            cooldown: config.cooldown()?,
            analysis_width: config.analysis_width,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    pixels: u64,
}

/// Background-subtraction motion detector with a cooldown-gated verdict
pub struct MotionAnalyzer {
    background: BackgroundModel,
    state: MotionState,
    last_flip: Option<Instant>,
    frames_analyzed: u64,
}

impl MotionAnalyzer {
    pub fn new() -> Self {
        Self {
            background: BackgroundModel::new(),
            state: MotionState::default(),
            last_flip: None,
            frames_analyzed: 0,
        }
    }

    pub fn state(&self) -> &MotionState {
        &self.state
    }

    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    #[cfg(test)]
    pub(crate) fn background_initialized(&self) -> bool {
        self.background.is_initialized()
    }

    /// Forget the background and the current verdict
    pub fn reset(&mut self) {
        self.background.reset();
        self.state = MotionState::default();
        self.last_flip = None;
        self.frames_analyzed = 0;
    }

    /// Evaluate one frame and update the verdict.
    ///
    /// Analysis failures are logged and leave the state untouched.
    pub fn process(
        &mut self,
        frame: &Frame,
        params: &MotionParams,
        now: Instant,
    ) -> Option<MotionTransition> {
        match self.detect(frame, params) {
            Ok(regions) => {
                self.frames_analyzed += 1;
                self.decide(regions, params, now)
            }
            Err(e) => {
                warn!("Motion analysis of frame {} failed: {}", frame.id, e);
                None
            }
        }
    }

    /// Find moving regions in `frame`, in full-frame coordinates
    pub fn detect(
        &mut self,
        frame: &Frame,
        params: &MotionParams,
    ) -> Result<Vec<MotionRegion>, AnalysisError> {
        if frame.width == 0 || frame.height == 0 || frame.data().is_empty() {
            return Err(AnalysisError::EmptyFrame {
                width: frame.width,
                height: frame.height,
            });
        }

        trace!(
            "Analyzing frame {} for motion ({}x{})",
            frame.id,
            frame.width,
            frame.height
        );

        let gray = Self::downscale(frame, params.analysis_width)?;
        let scale_x = frame.width as f64 / gray.width() as f64;
        let scale_y = frame.height as f64 / gray.height() as f64;

        let mask = self
            .background
            .apply(&gray, params.sensitivity, params.delta_threshold);

        let cleaned = close(
            &open(&mask, Norm::LInf, MORPHOLOGY_RADIUS),
            Norm::LInf,
            MORPHOLOGY_RADIUS,
        );

        let labels = connected_components(&cleaned, Connectivity::Eight, Luma([0u8]));

        let mut components: Vec<Option<Bounds>> = Vec::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label[0] as usize;
            if label == 0 {
                continue;
            }
            if components.len() <= label {
                components.resize(label + 1, None);
            }
            let bounds = components[label].get_or_insert(Bounds {
                min_x: x,
                min_y: y,
                max_x: x,
                max_y: y,
                pixels: 0,
            });
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
            bounds.pixels += 1;
        }

        let regions: Vec<MotionRegion> = components
            .into_iter()
            .flatten()
            .filter_map(|b| {
                let area = b.pixels as f64 * scale_x * scale_y;
                if area < params.min_area {
                    return None;
                }
                let x = (b.min_x as f64 * scale_x).round() as u32;
                let y = (b.min_y as f64 * scale_y).round() as u32;
                let right = (((b.max_x + 1) as f64 * scale_x).round() as u32).min(frame.width);
                let bottom = (((b.max_y + 1) as f64 * scale_y).round() as u32).min(frame.height);
                Some(MotionRegion {
                    x,
                    y,
                    w: right.saturating_sub(x),
                    h: bottom.saturating_sub(y),
                    area,
                })
            })
            .collect();

        debug!(
            "Motion analysis of frame {}: {} region(s), total area {:.1}",
            frame.id,
            regions.len(),
            regions.iter().map(|r| r.area).sum::<f64>()
        );

        Ok(regions)
    }

    /// Downscale to the analysis width, keeping the aspect ratio, and convert to grey
    fn downscale(frame: &Frame, analysis_width: u32) -> Result<GrayImage, AnalysisError> {
        let gray = frame.to_gray_image();
        if gray.width() == 0 || gray.height() == 0 {
            return Err(AnalysisError::FrameConversion {
                details: format!("{}x{} frame converted to an empty image", frame.width, frame.height),
            });
        }

        if analysis_width == 0 || frame.width <= analysis_width {
            return Ok(gray);
        }

        let height = ((frame.height as f64 * analysis_width as f64 / frame.width as f64).round()
            as u32)
            .max(1);
        Ok(imageops::resize(
            &gray,
            analysis_width,
            height,
            imageops::FilterType::Triangle,
        ))
    }

    fn decide(
        &mut self,
        regions: Vec<MotionRegion>,
        params: &MotionParams,
        now: Instant,
    ) -> Option<MotionTransition> {
        let total_area: f64 = regions.iter().map(|r| r.area).sum();
        let candidate = !regions.is_empty() && total_area > params.min_area;
        let flip_allowed = self
            .last_flip
            .map_or(true, |at| now.saturating_duration_since(at) >= params.cooldown);

        match (self.state.detected, candidate) {
            (false, true) if flip_allowed => {
                let count = regions.len();
                self.state = MotionState {
                    detected: true,
                    regions,
                    last_detection_time: Some(SystemTime::now()),
                };
                self.last_flip = Some(now);
                Some(MotionTransition::Started {
                    total_area,
                    regions: count,
                })
            }
            (true, true) => {
                self.state.regions = regions;
                self.state.last_detection_time = Some(SystemTime::now());
                None
            }
            (true, false) if flip_allowed => {
                self.state.detected = false;
                self.state.regions.clear();
                self.last_flip = Some(now);
                Some(MotionTransition::Ended)
            }
            (true, false) => {
                trace!("Motion ended inside cooldown, holding detection");
                None
            }
            _ => None,
        }
    }
}

impl Default for MotionAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> MotionParams {
        MotionParams {
            sensitivity: 0.05,
            delta_threshold: 25.0,
            min_area: 500.0,
            cooldown: Duration::from_secs(2),
            analysis_width: 160,
        }
    }

    fn frame_with_square(square: Option<(u32, u32, u32)>) -> Frame {
        let mut frame = Frame::filled(320, 240, [128; 3]);
        if let Some((x0, y0, size)) = square {
            let data = frame.data_mut();
            for y in y0..y0 + size {
                for x in x0..x0 + size {
                    let offset = ((y * 320 + x) * 3) as usize;
                    data[offset..offset + 3].copy_from_slice(&[255; 3]);
                }
            }
        }
        frame
    }

    #[test]
    fn test_static_scene_has_no_motion() {
        let mut analyzer = MotionAnalyzer::new();
        let now = Instant::now();
        for _ in 0..10 {
            assert_eq!(analyzer.process(&frame_with_square(None), &params(), now), None);
        }
        assert!(!analyzer.state().detected);
        assert!(analyzer.background_initialized());
        assert_eq!(analyzer.frames_analyzed(), 10);
    }

    #[test]
    fn test_bright_square_is_detected() {
        let mut analyzer = MotionAnalyzer::new();
        let now = Instant::now();
        for _ in 0..20 {
            analyzer.process(&frame_with_square(None), &params(), now);
        }

        let mut transitions = Vec::new();
        for _ in 0..5 {
            if let Some(t) = analyzer.process(&frame_with_square(Some((100, 80, 50))), &params(), now) {
                transitions.push(t);
            }
        }

        assert_eq!(transitions.len(), 1);
        let state = analyzer.state();
        assert!(state.detected);
        assert!(state.last_detection_time.is_some());
        assert_eq!(state.regions.len(), 1);

        let region = state.regions[0];
        assert!((region.area - 2500.0).abs() < 250.0, "area {}", region.area);
        assert_eq!((region.x, region.y, region.w, region.h), (100, 80, 50, 50));
    }

    #[test]
    fn test_small_regions_are_discarded() {
        let mut analyzer = MotionAnalyzer::new();
        let now = Instant::now();
        analyzer.process(&frame_with_square(None), &params(), now);

        // 10x10 at full resolution is 100 px, far below min_area
        let regions = analyzer
            .detect(&frame_with_square(Some((40, 40, 10))), &params())
            .unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn test_cooldown_holds_detection() {
        let mut analyzer = MotionAnalyzer::new();
        let start = Instant::now();
        let square = frame_with_square(Some((100, 80, 50)));
        let empty = frame_with_square(None);

        analyzer.process(&empty, &params(), start);
        assert!(matches!(
            analyzer.process(&square, &params(), start),
            Some(MotionTransition::Started { .. })
        ));

        // Scene is empty again, but the cooldown has not run out
        assert_eq!(analyzer.process(&empty, &params(), start), None);
        assert_eq!(
            analyzer.process(&empty, &params(), start + Duration::from_secs(1)),
            None
        );
        assert!(analyzer.state().detected);
        assert!(!analyzer.state().regions.is_empty());

        assert_eq!(
            analyzer.process(&empty, &params(), start + Duration::from_secs(2)),
            Some(MotionTransition::Ended)
        );
        assert!(!analyzer.state().detected);
        assert!(analyzer.state().regions.is_empty());
    }

    #[test]
    fn test_reset_clears_state() {
        let mut analyzer = MotionAnalyzer::new();
        let now = Instant::now();
        analyzer.process(&frame_with_square(None), &params(), now);
        analyzer.process(&frame_with_square(Some((0, 0, 60))), &params(), now);
        assert!(analyzer.state().detected);

        analyzer.reset();
        assert_eq!(analyzer.state(), &MotionState::default());
        assert!(!analyzer.background_initialized());
    }
}
