use crate::error::{Result, VisageError};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Pixel layout of a decoded frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit luminance
    Gray8,
    /// Packed 8-bit RGB
    Rgb8,
}

impl PixelFormat {
    /// Number of interleaved channels (and bytes) per pixel
    pub fn channels(&self) -> u8 {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// One decoded image sample from the capture device.
///
/// The pixel buffer is owned, so `clone()` is a deep copy: a frame handed out
/// by the cache can be modified freely without affecting anybody else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Capture sequence number, stamped by the capture loop
    pub id: u64,
    /// Wall-clock capture time
    pub timestamp: SystemTime,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    data: Vec<u8>,
}

impl Frame {
    /// Create a frame, validating that `data` matches the dimensions
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
        timestamp: SystemTime,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * format.channels() as usize;
        if width == 0 || height == 0 {
            return Err(VisageError::InvalidFrame {
                details: format!("zero-sized frame {}x{}", width, height),
            });
        }
        if data.len() != expected {
            return Err(VisageError::InvalidFrame {
                details: format!(
                    "{}x{} {:?} frame needs {} bytes, got {}",
                    width,
                    height,
                    format,
                    expected,
                    data.len()
                ),
            });
        }

        Ok(Self {
            id: 0,
            timestamp,
            width,
            height,
            format,
            data,
        })
    }

    /// Uniform RGB frame, mostly useful for synthetic sources and placeholders
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&rgb);
        }
        Self {
            id: 0,
            timestamp: SystemTime::now(),
            width,
            height,
            format: PixelFormat::Rgb8,
            data,
        }
    }

    pub fn from_rgb_image(image: RgbImage, timestamp: SystemTime) -> Self {
        let (width, height) = image.dimensions();
        Self {
            id: 0,
            timestamp,
            width,
            height,
            format: PixelFormat::Rgb8,
            data: image.into_raw(),
        }
    }

    /// Decode a JPEG (e.g. an MJPEG camera sample) into an RGB frame
    pub fn decode_jpeg(bytes: &[u8], timestamp: SystemTime) -> Result<Self> {
        let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)?;
        Ok(Self::from_rgb_image(image.to_rgb8(), timestamp))
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = id;
        self
    }

    pub fn channels(&self) -> u8 {
        self.format.channels()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Copy of the frame as an RGB image (gray frames are expanded)
    pub fn to_rgb_image(&self) -> RgbImage {
        match self.format {
            PixelFormat::Rgb8 => RgbImage::from_raw(self.width, self.height, self.data.clone())
                .unwrap_or_else(|| RgbImage::new(self.width, self.height)),
            PixelFormat::Gray8 => DynamicImage::ImageLuma8(self.to_gray_image()).to_rgb8(),
        }
    }

    /// Copy of the frame as a luminance image
    pub fn to_gray_image(&self) -> GrayImage {
        match self.format {
            PixelFormat::Gray8 => GrayImage::from_raw(self.width, self.height, self.data.clone())
                .unwrap_or_else(|| GrayImage::new(self.width, self.height)),
            PixelFormat::Rgb8 => DynamicImage::ImageRgb8(self.to_rgb_image()).to_luma8(),
        }
    }

    /// Encode the frame as JPEG
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let image = match self.format {
            PixelFormat::Rgb8 => DynamicImage::ImageRgb8(self.to_rgb_image()),
            PixelFormat::Gray8 => DynamicImage::ImageLuma8(self.to_gray_image()),
        };

        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
        encoder.encode_image(&image)?;
        Ok(buf)
    }

    /// Time elapsed since capture
    pub fn age(&self) -> Duration {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
    }

    pub fn is_older_than(&self, duration: Duration) -> bool {
        self.age() > duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_channels() {
        assert_eq!(PixelFormat::Gray8.channels(), 1);
        assert_eq!(PixelFormat::Rgb8.channels(), 3);
    }

    #[test]
    fn test_frame_size_validation() {
        let ok = Frame::new(4, 2, PixelFormat::Rgb8, vec![0u8; 24], SystemTime::now());
        assert!(ok.is_ok());

        let short = Frame::new(4, 2, PixelFormat::Rgb8, vec![0u8; 10], SystemTime::now());
        assert!(matches!(short, Err(VisageError::InvalidFrame { .. })));

        let empty = Frame::new(0, 2, PixelFormat::Gray8, vec![], SystemTime::now());
        assert!(empty.is_err());
    }

    #[test]
    fn test_clone_is_independent() {
        let original = Frame::filled(8, 8, [10, 20, 30]);
        let mut copy = original.clone();
        copy.data_mut()[0] = 255;

        assert_eq!(original.data()[0], 10);
        assert_eq!(copy.data()[0], 255);
    }

    #[test]
    fn test_gray_conversion() {
        let frame = Frame::filled(4, 4, [128, 128, 128]);
        let gray = frame.to_gray_image();
        assert_eq!(gray.dimensions(), (4, 4));
        assert!(gray.pixels().all(|p| p[0] == 128));
    }

    #[test]
    fn test_jpeg_encode_decode() {
        let frame = Frame::filled(32, 16, [200, 50, 50]);
        let jpeg = frame.encode_jpeg(90).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let decoded = Frame::decode_jpeg(&jpeg, frame.timestamp).unwrap();
        assert_eq!(decoded.dimensions(), (32, 16));
        assert_eq!(decoded.format, PixelFormat::Rgb8);
    }

    #[test]
    fn test_frame_age() {
        let mut frame = Frame::filled(2, 2, [0, 0, 0]);
        frame.timestamp = SystemTime::now() - Duration::from_millis(100);
        assert!(frame.is_older_than(Duration::from_millis(50)));
        assert!(!frame.is_older_than(Duration::from_secs(10)));
    }
}
