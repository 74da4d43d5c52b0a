use crate::analyzer::MotionState;
use crate::config::OverlayConfig;
use crate::engine::EngineStats;
use crate::error::{Result, VisageError};
use crate::frame::Frame;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::fs;
use tracing::{debug, error, warn};

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const RED: Rgb<u8> = Rgb([230, 40, 40]);
const GREEN: Rgb<u8> = Rgb([40, 200, 80]);
const GRAY: Rgb<u8> = Rgb([150, 150, 150]);
const MARGIN: i32 = 6;

/// Resolve configured timezone, falling back to UTC on parse errors
pub(crate) fn resolve_timestamp_timezone(tz_name: &str) -> Tz {
    match tz_name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!(
                "Invalid timestamp timezone '{}', falling back to UTC",
                tz_name
            );
            chrono_tz::UTC
        }
    }
}

pub(crate) fn load_font(path: &str) -> Result<Font<'static>> {
    let data = fs::read(path).map_err(|e| VisageError::Font {
        path: path.to_string(),
        details: e.to_string(),
    })?;

    Font::try_from_vec(data).ok_or_else(|| VisageError::Font {
        path: path.to_string(),
        details: "not a TrueType/OpenType font".to_string(),
    })
}

/// Draws the status overlay onto a copy of a frame.
///
/// Output depends only on the inputs: the same frame, stats and motion state
/// always produce the same pixels. Text needs a font; if the configured font
/// cannot be loaded an error is logged at start and only the shapes are drawn.
pub struct OverlayRenderer {
    device_index: u32,
    timezone: Tz,
    font: Option<Font<'static>>,
    scale: Scale,
}

impl OverlayRenderer {
    pub fn new(config: &OverlayConfig, device_index: u32) -> Self {
        Self {
            device_index,
            timezone: resolve_timestamp_timezone(&config.timezone),
            font: match load_font(&config.font_path) {
                Ok(font) => Some(font),
                Err(e) => {
                    error!("{}; overlay text is off, only shapes are drawn", e);
                    None
                }
            },
            scale: Scale::uniform(config.font_size.max(6.0)),
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    pub fn render(&self, frame: &Frame, stats: &EngineStats, motion: &MotionState) -> Frame {
        let mut image = frame.to_rgb_image();
        let line_height = self.scale.y.ceil() as i32 + MARGIN;

        self.draw_banner(&mut image, frame, line_height);
        self.draw_status(&mut image, stats, motion, line_height);
        if stats.recording {
            self.draw_recording(&mut image, line_height);
        }
        if stats.detection_enabled {
            for region in &motion.regions {
                self.draw_region(&mut image, region.x, region.y, region.w, region.h, region.area);
            }
        }
        self.draw_footer(&mut image, frame, stats, line_height);

        debug!(
            "Rendered overlay for frame {} ({} region(s))",
            frame.id,
            motion.regions.len()
        );

        let mut annotated = Frame::from_rgb_image(image, frame.timestamp);
        annotated.id = frame.id;
        annotated
    }

    fn text(&self, image: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, text: &str) {
        if let Some(font) = &self.font {
            draw_text_mut(image, color, x, y, self.scale, font, text);
        }
    }

    fn text_width(&self, text: &str) -> i32 {
        match &self.font {
            Some(font) => text_size(self.scale, font, text).0,
            None => 0,
        }
    }

    /// Darken a horizontal band so text stays readable on bright scenes
    fn shade_band(image: &mut RgbImage, top: i32, height: i32) {
        let top = top.max(0) as u32;
        let bottom = ((top as i32 + height).max(0) as u32).min(image.height());
        for y in top..bottom {
            for x in 0..image.width() {
                let pixel = image.get_pixel_mut(x, y);
                pixel.0 = [pixel[0] / 3, pixel[1] / 3, pixel[2] / 3];
            }
        }
    }

    fn draw_banner(&self, image: &mut RgbImage, frame: &Frame, line_height: i32) {
        Self::shade_band(image, 0, line_height);
        let label = format!(
            "CAM {}  {}x{}",
            self.device_index, frame.width, frame.height
        );
        self.text(image, WHITE, MARGIN + 16, MARGIN / 2, &label);
    }

    fn draw_status(
        &self,
        image: &mut RgbImage,
        stats: &EngineStats,
        motion: &MotionState,
        line_height: i32,
    ) {
        let (color, label) = if !stats.detection_enabled {
            (GRAY, "DETECTION OFF")
        } else if motion.detected {
            (RED, "MOTION DETECTED")
        } else {
            (GREEN, "NO MOTION")
        };

        // Status dot in the banner, visible even without a font
        let radius = (line_height / 4).max(3);
        draw_filled_circle_mut(image, (MARGIN + radius, line_height / 2), radius, color);

        self.text(image, color, MARGIN, line_height + MARGIN / 2, label);
    }

    fn draw_recording(&self, image: &mut RgbImage, line_height: i32) {
        let radius = (line_height / 4).max(3);
        let center_x = image.width() as i32 - MARGIN - radius;
        draw_filled_circle_mut(image, (center_x, line_height / 2), radius, RED);

        let width = self.text_width("REC");
        self.text(
            image,
            RED,
            center_x - radius - MARGIN - width,
            MARGIN / 2,
            "REC",
        );
    }

    fn draw_region(&self, image: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, area: f64) {
        if w == 0 || h == 0 {
            return;
        }

        let (x, y) = (x as i32, y as i32);
        draw_hollow_rect_mut(image, Rect::at(x, y).of_size(w, h), RED);
        if w > 2 && h > 2 {
            draw_hollow_rect_mut(image, Rect::at(x + 1, y + 1).of_size(w - 2, h - 2), RED);
        }

        let label = format!("{:.0}", area);
        let label_y = (y - self.scale.y.ceil() as i32 - 2).max(0);
        if self.font.is_some() {
            let width = self.text_width(&label).max(1) as u32;
            draw_filled_rect_mut(
                image,
                Rect::at(x, label_y).of_size(width + 4, self.scale.y.ceil() as u32 + 2),
                RED,
            );
        }
        self.text(image, WHITE, x + 2, label_y, &label);
    }

    fn draw_footer(&self, image: &mut RgbImage, frame: &Frame, stats: &EngineStats, line_height: i32) {
        let top = image.height() as i32 - line_height;
        Self::shade_band(image, top, line_height);

        let datetime = DateTime::<Utc>::from(frame.timestamp).with_timezone(&self.timezone);
        let timestamp = datetime.format("%Y-%m-%d %H:%M:%S %Z").to_string();
        self.text(image, WHITE, MARGIN, top + MARGIN / 2, &timestamp);

        let counter = format!("Frame {}", stats.frames_captured);
        let width = self.text_width(&counter);
        self.text(
            image,
            WHITE,
            image.width() as i32 - MARGIN - width,
            top + MARGIN / 2,
            &counter,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::MotionRegion;
    use std::time::{Duration, SystemTime};

    const SYSTEM_FONT: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

    fn renderer_with_font(font_path: &str) -> OverlayRenderer {
        let config = OverlayConfig {
            enabled: true,
            font_path: font_path.to_string(),
            font_size: 16.0,
            timezone: "Europe/Berlin".to_string(),
        };
        OverlayRenderer::new(&config, 0)
    }

    fn renderer() -> OverlayRenderer {
        renderer_with_font("/nonexistent/font.ttf")
    }

    /// Renderer with real text, or None when the system font is not installed
    fn text_renderer() -> Option<OverlayRenderer> {
        let renderer = renderer_with_font(SYSTEM_FONT);
        if !renderer.has_font() {
            eprintln!("skipping: {} not available", SYSTEM_FONT);
            return None;
        }
        Some(renderer)
    }

    fn count_pixels(
        image: &RgbImage,
        rows: std::ops::Range<u32>,
        columns: std::ops::Range<u32>,
        matches: impl Fn(&Rgb<u8>) -> bool,
    ) -> usize {
        rows.flat_map(|y| columns.clone().map(move |x| (x, y)))
            .filter(|&(x, y)| matches(image.get_pixel(x, y)))
            .count()
    }

    fn is_white(pixel: &Rgb<u8>) -> bool {
        pixel.0.iter().all(|&c| c > 200)
    }

    fn is_red(pixel: &Rgb<u8>) -> bool {
        pixel[0] > 150 && pixel[1] < 100 && pixel[2] < 100
    }

    fn frame() -> Frame {
        let mut frame = Frame::filled(320, 240, [120; 3]).with_id(7);
        frame.timestamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        frame
    }

    fn motion() -> MotionState {
        MotionState {
            detected: true,
            regions: vec![MotionRegion {
                x: 100,
                y: 80,
                w: 50,
                h: 50,
                area: 2500.0,
            }],
            last_detection_time: Some(SystemTime::UNIX_EPOCH),
        }
    }

    #[test]
    fn test_render_is_deterministic() {
        let renderer = renderer();
        let stats = EngineStats::default();
        let first = renderer.render(&frame(), &stats, &motion());
        let second = renderer.render(&frame(), &stats, &motion());
        assert_eq!(first.data(), second.data());
    }

    #[test]
    fn test_render_leaves_input_untouched() {
        let renderer = renderer();
        let input = frame();
        let output = renderer.render(&input, &EngineStats::default(), &motion());

        assert_eq!(input, frame());
        assert_eq!(output.id, 7);
        assert_eq!(output.dimensions(), (320, 240));
        assert_ne!(output.data(), input.data());
    }

    #[test]
    fn test_region_box_is_drawn() {
        let renderer = renderer();
        let stats = EngineStats {
            detection_enabled: true,
            ..EngineStats::default()
        };
        let output = renderer.render(&frame(), &stats, &motion()).to_rgb_image();

        assert_eq!(*output.get_pixel(100, 100), RED);
        assert_eq!(*output.get_pixel(101, 100), RED);
        // Interior stays as captured
        assert_eq!(*output.get_pixel(125, 105), Rgb([120, 120, 120]));
    }

    #[test]
    fn test_status_colour_follows_detection() {
        let renderer = renderer();
        let enabled = EngineStats {
            detection_enabled: true,
            ..EngineStats::default()
        };
        let dot = |stats: &EngineStats, motion: &MotionState| {
            let image = renderer.render(&frame(), stats, motion).to_rgb_image();
            *image.get_pixel(MARGIN as u32 + 3, 11)
        };

        assert_eq!(dot(&enabled, &motion()), RED);
        assert_eq!(dot(&enabled, &MotionState::default()), GREEN);
        assert_eq!(dot(&EngineStats::default(), &motion()), GRAY);
    }

    #[test]
    fn test_invalid_timezone_falls_back_to_utc() {
        assert_eq!(resolve_timestamp_timezone("Mars/Olympus"), chrono_tz::UTC);
        assert_eq!(
            resolve_timestamp_timezone("Europe/Berlin"),
            chrono_tz::Europe::Berlin
        );
    }

    #[test]
    fn test_missing_font_is_an_error() {
        assert!(matches!(
            load_font("/nonexistent/font.ttf"),
            Err(VisageError::Font { .. })
        ));
        assert!(!renderer().has_font());
    }

    #[test]
    fn test_text_is_drawn_in_banner_and_footer() {
        let Some(renderer) = text_renderer() else {
            return;
        };
        let stats = EngineStats {
            frames_captured: 42,
            ..EngineStats::default()
        };
        let output = renderer.render(&frame(), &stats, &MotionState::default()).to_rgb_image();
        let line_height = 16 + MARGIN as u32;

        // Device id and resolution, right of the status dot
        assert!(count_pixels(&output, 0..line_height, 30..320, is_white) > 20);
        // Timestamp on the left, frame counter on the right
        assert!(count_pixels(&output, 240 - line_height..240, 0..160, is_white) > 20);
        assert!(count_pixels(&output, 240 - line_height..240, 160..320, is_white) > 10);
        // Nothing white in the untouched middle of the frame
        assert_eq!(count_pixels(&output, 60..80, 0..320, is_white), 0);
    }

    #[test]
    fn test_recording_label_appears() {
        let Some(renderer) = text_renderer() else {
            return;
        };
        // Green status dot, so any red in the banner comes from the REC indicator
        let idle = EngineStats {
            detection_enabled: true,
            ..EngineStats::default()
        };
        let recording = EngineStats {
            recording: true,
            ..idle.clone()
        };
        let line_height = 16 + MARGIN as u32;
        // Left of the REC dot
        let label_columns = 200..300;

        let without = renderer.render(&frame(), &idle, &MotionState::default()).to_rgb_image();
        let with = renderer
            .render(&frame(), &recording, &MotionState::default())
            .to_rgb_image();

        assert_eq!(count_pixels(&without, 0..line_height, label_columns.clone(), is_red), 0);
        assert!(count_pixels(&with, 0..line_height, label_columns, is_red) > 10);
    }

    #[test]
    fn test_region_area_label_is_drawn() {
        let Some(renderer) = text_renderer() else {
            return;
        };
        let stats = EngineStats {
            detection_enabled: true,
            ..EngineStats::default()
        };
        let output = renderer.render(&frame(), &stats, &motion()).to_rgb_image();

        // Label box sits just above the region, white digits on red
        assert_eq!(*output.get_pixel(101, 63), RED);
        assert!(count_pixels(&output, 62..80, 100..150, is_white) > 10);
    }

    #[test]
    fn test_render_with_text_is_deterministic() {
        let Some(renderer) = text_renderer() else {
            return;
        };
        let stats = EngineStats {
            detection_enabled: true,
            recording: true,
            frames_captured: 7,
            ..EngineStats::default()
        };
        let first = renderer.render(&frame(), &stats, &motion());
        let second = renderer.render(&frame(), &stats, &motion());
        assert_eq!(first.data(), second.data());
        assert_ne!(first.data(), self::renderer().render(&frame(), &stats, &motion()).data());
    }
}
