use image::{GrayImage, Luma};

/// Lowest variance a pixel may settle to; keeps a perfectly static scene from
/// turning every bit of sensor noise into foreground.
const VARIANCE_FLOOR: f32 = 16.0;
/// Deviation, in standard deviations, beyond which a pixel is foreground
const SIGMA_FACTOR: f32 = 2.5;

/// Per-pixel running mean and variance of the scene.
///
/// Background pixels update both statistics with the learning rate. Foreground
/// pixels only pull the mean, so a stationary object is absorbed gradually
/// instead of inflating the variance and hiding itself immediately.
#[derive(Debug, Default)]
pub struct BackgroundModel {
    width: u32,
    height: u32,
    mean: Vec<f32>,
    variance: Vec<f32>,
}

impl BackgroundModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        !self.mean.is_empty()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn initialize(&mut self, image: &GrayImage) {
        self.width = image.width();
        self.height = image.height();
        self.mean = image.pixels().map(|p| p[0] as f32).collect();
        self.variance = vec![VARIANCE_FLOOR; self.mean.len()];
    }

    /// Fold `image` into the model and return its foreground mask (255 = foreground).
    ///
    /// The first image, and any image whose size differs from the model, seeds
    /// the model and yields an empty mask.
    pub fn apply(&mut self, image: &GrayImage, learning_rate: f32, min_delta: f32) -> GrayImage {
        let mut mask = GrayImage::new(image.width(), image.height());

        if !self.is_initialized() || self.dimensions() != image.dimensions() {
            self.initialize(image);
            return mask;
        }

        let rate = learning_rate.clamp(0.0, 1.0);
        let cells = self.mean.iter_mut().zip(self.variance.iter_mut());

        for ((pixel, out), (mean, variance)) in image.pixels().zip(mask.pixels_mut()).zip(cells) {
            let delta = pixel[0] as f32 - *mean;
            let sigma = variance.max(VARIANCE_FLOOR).sqrt();
            let foreground = delta.abs() > (SIGMA_FACTOR * sigma).max(min_delta);

            *mean += rate * delta;
            if foreground {
                *out = Luma([255]);
            } else {
                *variance = ((1.0 - rate) * *variance + rate * delta * delta).max(VARIANCE_FLOOR);
            }
        }

        mask
    }
}
