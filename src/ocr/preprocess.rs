//! Image preprocessing for region OCR.
//!
//! A region crop is converted to grayscale and then run through the filter
//! chain configured for the region. All filters are pure functions on
//! `GrayImage`.

use image::{GrayImage, ImageBuffer, Luma, RgbaImage};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::automation::config::RegionRect;

/// Gain of the `contrast` filter.
const CONTRAST_GAIN: f32 = 3.0;

/// Adaptive threshold parameters of the `thresh` filter.
const THRESH_BLOCK_SIZE: u32 = 11;
const THRESH_C: i32 = 2;

/// Adaptive threshold parameters of the `denoise` filter.
const DENOISE_BLOCK_SIZE: u32 = 9;
const DENOISE_C: i32 = 41;

/// Structuring element radius for open/close (0 = 1x1 element).
const MORPH_RADIUS: u8 = 0;

/// Fixed binary threshold applied first by `smooth`.
const SMOOTH_BINARY_THRESHOLD: u8 = 88;

/// Sigma equivalent to a 5x5 Gaussian kernel with automatic sigma.
const SMOOTH_BLUR_SIGMA: f32 = 1.1;

/// One preprocessing filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterOp {
    /// Linear contrast boost
    Contrast,
    /// Bitwise inversion, for bright text on dark background
    Invert,
    /// Adaptive threshold + open/close, OR-combined with `Smooth`
    Denoise,
    /// Binary, Otsu, Gaussian blur, Otsu
    Smooth,
    /// Adaptive mean threshold
    Thresh,
}

impl FilterOp {
    /// Token used in configuration and debug file names.
    pub fn token(&self) -> &'static str {
        match self {
            FilterOp::Contrast => "contrast",
            FilterOp::Invert => "invert",
            FilterOp::Denoise => "denoise",
            FilterOp::Smooth => "smooth",
            FilterOp::Thresh => "thresh",
        }
    }

    /// Applies the filter.
    pub fn apply(&self, img: &GrayImage) -> GrayImage {
        match self {
            FilterOp::Contrast => enhance_contrast(img, CONTRAST_GAIN),
            FilterOp::Invert => invert(img),
            FilterOp::Denoise => remove_noise_and_smooth(img),
            FilterOp::Smooth => smoothen(img),
            FilterOp::Thresh => adaptive_threshold(img, THRESH_BLOCK_SIZE, THRESH_C),
        }
    }
}

impl FromStr for FilterOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "contrast" => Ok(FilterOp::Contrast),
            "invert" => Ok(FilterOp::Invert),
            "denoise" => Ok(FilterOp::Denoise),
            "smooth" => Ok(FilterOp::Smooth),
            "thresh" => Ok(FilterOp::Thresh),
            other => Err(format!("unknown filter '{}'", other)),
        }
    }
}

/// Ordered list of filters, parsed once when the configuration is loaded.
///
/// Accepts `"contrast+invert"` or `["contrast", "invert"]`. Unknown tokens are
/// dropped.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawFilterChain", into = "Vec<String>")]
pub struct FilterChain(Vec<FilterOp>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawFilterChain {
    Joined(String),
    List(Vec<String>),
}

impl From<RawFilterChain> for FilterChain {
    fn from(raw: RawFilterChain) -> Self {
        match raw {
            RawFilterChain::Joined(s) => FilterChain::parse(&s),
            RawFilterChain::List(tokens) => FilterChain::from_tokens(tokens.iter().map(String::as_str)),
        }
    }
}

impl From<FilterChain> for Vec<String> {
    fn from(chain: FilterChain) -> Self {
        chain.0.iter().map(|op| op.token().to_string()).collect()
    }
}

impl FilterChain {
    /// Parses a `+`-separated chain.
    pub fn parse(chain: &str) -> Self {
        Self::from_tokens(chain.split('+'))
    }

    fn from_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> Self {
        Self(
            tokens
                .filter(|t| !t.trim().is_empty())
                .filter_map(|t| match t.parse() {
                    Ok(op) => Some(op),
                    Err(e) => {
                        tracing::debug!("Ignoring preprocessing token: {}", e);
                        None
                    }
                })
                .collect(),
        )
    }

    pub fn ops(&self) -> &[FilterOp] {
        &self.0
    }
}

/// Crops a rectangle from a frame, clamped to the frame bounds.
pub fn crop_region(img: &RgbaImage, rect: &RegionRect) -> RgbaImage {
    let (w, h) = img.dimensions();

    let x0 = rect.x0.min(w);
    let y0 = rect.y0.min(h);
    let x1 = rect.x1.clamp(x0, w);
    let y1 = rect.y1.clamp(y0, h);

    image::imageops::crop_imm(img, x0, y0, x1 - x0, y1 - y0).to_image()
}

/// Converts to grayscale using the ITU-R BT.601 luma formula.
pub fn to_grayscale(img: &RgbaImage) -> GrayImage {
    let (width, height) = img.dimensions();
    ImageBuffer::from_fn(width, height, |x, y| {
        let pixel = img.get_pixel(x, y);
        let r = pixel[0] as f32;
        let g = pixel[1] as f32;
        let b = pixel[2] as f32;
        let luminance = 0.299 * r + 0.587 * g + 0.114 * b;
        Luma([luminance.round().clamp(0.0, 255.0) as u8])
    })
}

/// Runs a filter chain, reporting every intermediate image to `on_step`.
pub fn apply_chain<F>(img: GrayImage, chain: &FilterChain, mut on_step: F) -> GrayImage
where
    F: FnMut(FilterOp, &GrayImage),
{
    chain.ops().iter().fold(img, |current, op| {
        let next = op.apply(&current);
        on_step(*op, &next);
        next
    })
}

/// Multiplies every pixel by `gain`, saturating at white.
pub fn enhance_contrast(img: &GrayImage, gain: f32) -> GrayImage {
    map_pixels(img, |p| (p as f32 * gain).round().min(255.0) as u8)
}

/// Inverts every pixel.
pub fn invert(img: &GrayImage) -> GrayImage {
    map_pixels(img, |p| 255 - p)
}

/// Pixels above `threshold` become white, all others black.
pub fn binary_threshold(img: &GrayImage, threshold: u8) -> GrayImage {
    map_pixels(img, |p| if p > threshold { 255 } else { 0 })
}

/// Binary threshold at the Otsu level of the image.
pub fn otsu_threshold(img: &GrayImage) -> GrayImage {
    binary_threshold(img, otsu_level(img))
}

/// Adaptive mean thresholding.
///
/// A pixel becomes white if it is brighter than the mean of its
/// `block_size`×`block_size` neighbourhood minus `c`. Borders replicate the
/// edge pixels.
pub fn adaptive_threshold(img: &GrayImage, block_size: u32, c: i32) -> GrayImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    let radius = (block_size / 2) as i64;
    let area = (block_size * block_size) as f64;
    let at = |x: i64, y: i64| -> u32 {
        let cx = x.clamp(0, width as i64 - 1) as u32;
        let cy = y.clamp(0, height as i64 - 1) as u32;
        img.get_pixel(cx, cy)[0] as u32
    };

    // Horizontal box sums, then vertical ones over those
    let mut row_sums = vec![0u32; (width * height) as usize];
    for y in 0..height as i64 {
        for x in 0..width as i64 {
            let sum: u32 = (x - radius..=x + radius).map(|xx| at(xx, y)).sum();
            row_sums[(y as u32 * width + x as u32) as usize] = sum;
        }
    }

    let row_sum_at = |x: u32, y: i64| -> u32 {
        let cy = y.clamp(0, height as i64 - 1) as u32;
        row_sums[(cy * width + x) as usize]
    };

    ImageBuffer::from_fn(width, height, |x, y| {
        let sum: u32 = (y as i64 - radius..=y as i64 + radius)
            .map(|yy| row_sum_at(x, yy))
            .sum();
        let mean = (sum as f64 / area).round() as i32;
        let value = img.get_pixel(x, y)[0] as i32;
        Luma([if value > mean - c { 255 } else { 0 }])
    })
}

/// Binary threshold, Otsu, Gaussian blur, Otsu.
pub fn smoothen(img: &GrayImage) -> GrayImage {
    if img.width() == 0 || img.height() == 0 {
        return img.clone();
    }
    let binary = binary_threshold(img, SMOOTH_BINARY_THRESHOLD);
    let otsu = otsu_threshold(&binary);
    let blurred = gaussian_blur_f32(&otsu, SMOOTH_BLUR_SIGMA);
    otsu_threshold(&blurred)
}

/// Adaptive threshold followed by morphological open and close, combined
/// with the smoothed input via bitwise OR.
pub fn remove_noise_and_smooth(img: &GrayImage) -> GrayImage {
    if img.width() == 0 || img.height() == 0 {
        return img.clone();
    }
    let filtered = adaptive_threshold(img, DENOISE_BLOCK_SIZE, DENOISE_C);
    let opening = morphology::open(&filtered, Norm::LInf, MORPH_RADIUS);
    let closing = morphology::close(&opening, Norm::LInf, MORPH_RADIUS);

    let smoothed = smoothen(img);
    ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
        Luma([smoothed.get_pixel(x, y)[0] | closing.get_pixel(x, y)[0]])
    })
}

fn map_pixels<F>(img: &GrayImage, f: F) -> GrayImage
where
    F: Fn(u8) -> u8,
{
    let mut output = img.clone();
    for pixel in output.pixels_mut() {
        pixel[0] = f(pixel[0]);
    }
    output
}
