//! Decoded video frames.
//!
//! Every source hands the pipeline an owned RGB8 `Frame`. A frame lives for
//! exactly one pipeline cycle: it is read, optionally downscaled, run through
//! detection, copied for annotation and dropped.

use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::RgbImage;

/// Frames wider than this are downscaled before detection.
pub const DEFAULT_MAX_FRAME_WIDTH: u32 = 800;

pub struct Frame {
    image: RgbImage,
    /// Position of this frame in its source (1-based, resets never).
    pub sequence: u64,
}

impl Frame {
    /// Build a frame from tightly packed RGB24 pixels.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("failed to wrap {}x{} RGB frame", width, height))?;
        Ok(Self::from_image(image, sequence))
    }

    pub fn from_image(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
        }
    }

    /// Solid-colour frame, used by synthetic sources and tests.
    pub fn blank(width: u32, height: u32, rgb: [u8; 3], sequence: u64) -> Self {
        Self::from_image(RgbImage::from_pixel(width, height, image::Rgb(rgb)), sequence)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Shrink the frame to `max_width` preserving aspect ratio.
    ///
    /// Frames at or below the limit are returned untouched.
    pub fn downscaled(self, max_width: u32) -> Self {
        let (width, height) = (self.width(), self.height());
        if max_width == 0 || width <= max_width {
            return self;
        }
        let scale = max_width as f64 / width as f64;
        let new_height = ((height as f64 * scale) as u32).max(1);
        let image = image::imageops::resize(&self.image, max_width, new_height, FilterType::Triangle);
        Self {
            image,
            sequence: self.sequence,
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("sequence", &self.sequence)
            .finish()
    }
}
