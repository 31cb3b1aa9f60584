use chrono::{DateTime, Local};
use image::RgbaImage;

/// A captured framebuffer image.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbaImage,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    /// Wraps `image`, timestamped now.
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            captured_at: Local::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
