use image::RgbImage;
use std::time::{SystemTime, UNIX_EPOCH};

/// One captured image. Lives for a single loop iteration.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbImage,
    /// Capture time, seconds since the UNIX epoch
    pub timestamp: f64,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp: f64) -> Self {
        Self { image, timestamp }
    }

    /// Stamp with the current wall-clock time
    pub fn now(image: RgbImage) -> Self {
        Self::new(image, unix_seconds())
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Flip left-right in place (selfie view)
    pub fn mirror(&mut self) {
        image::imageops::flip_horizontal_in_place(&mut self.image);
    }
}

pub fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
