use super::backend::{CaptureBackend, DeviceHandle, DeviceProperty, DeviceSettings};
use crate::error::DeviceError;
use crate::frame::Frame;
use async_trait::async_trait;
use std::time::SystemTime;
use tracing::info;

const BACKGROUND: u8 = 96;
const SQUARE: u8 = 230;

/// Synthetic camera: a flat gray scene with a bright square sweeping across it.
///
/// Always available, so a configuration can fall back to it when no real
/// device is attached.
#[derive(Debug, Clone, Default)]
pub struct TestPatternBackend;

impl TestPatternBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CaptureBackend for TestPatternBackend {
    fn name(&self) -> &str {
        "test-pattern"
    }

    async fn open(&self, settings: &DeviceSettings) -> Result<Box<dyn DeviceHandle>, DeviceError> {
        if settings.width == 0 || settings.height == 0 {
            return Err(DeviceError::Open {
                device: settings.index,
                details: "test pattern needs a non-zero resolution".to_string(),
            });
        }

        info!(
            "Opening synthetic test pattern {}x{}",
            settings.width, settings.height
        );

        Ok(Box::new(TestPatternHandle {
            width: settings.width,
            height: settings.height,
            tick: 0,
            open: true,
        }))
    }
}

struct TestPatternHandle {
    width: u32,
    height: u32,
    tick: u64,
    open: bool,
}

impl TestPatternHandle {
    fn render(&self) -> Frame {
        let mut frame = Frame::filled(self.width, self.height, [BACKGROUND; 3]);
        frame.timestamp = SystemTime::now();

        let size = (self.width.min(self.height) / 6).max(1);
        let travel = self.width.saturating_sub(size).max(1) as u64;
        let x0 = ((self.tick * 4) % travel) as u32;
        let y0 = (self.height - size) / 2;
        let width = self.width as usize;

        let data = frame.data_mut();
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                let offset = (y as usize * width + x as usize) * 3;
                data[offset..offset + 3].copy_from_slice(&[SQUARE; 3]);
            }
        }

        frame
    }
}

#[async_trait]
impl DeviceHandle for TestPatternHandle {
    fn backend(&self) -> &str {
        "test-pattern"
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn apply_property(&mut self, property: DeviceProperty) -> Result<(), DeviceError> {
        match property {
            DeviceProperty::Resolution { width, height } if width > 0 && height > 0 => {
                self.width = width;
                self.height = height;
                Ok(())
            }
            DeviceProperty::Resolution { .. } => Err(DeviceError::Property {
                property: property.to_string(),
                details: "zero dimension".to_string(),
            }),
            // Frames are produced on demand; pacing belongs to the capture loop
            DeviceProperty::FrameRate(_) => Ok(()),
        }
    }

    async fn read_frame(&mut self) -> Result<Frame, DeviceError> {
        if !self.open {
            return Err(DeviceError::NotOpen);
        }
        let frame = self.render();
        self.tick += 1;
        Ok(frame)
    }

    async fn release(&mut self) -> Result<(), DeviceError> {
        self.open = false;
        Ok(())
    }
}
