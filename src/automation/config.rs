//! Configuration types for the collector.
//!
//! Loads the page/region layout of the remote UI from a JSON file before the
//! run starts. Everything in here is read-only for the rest of the run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ocr::preprocess::FilterChain;
use crate::values::NumericLocale;

/// Dataset key reserved for the run timestamp.
pub const TIMESTAMP_KEY: &str = "timestamp";

/// Configuration defects detected before the run starts.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("no pages configured")]
    NoPages,
    #[error("host must not be empty")]
    EmptyHost,
    #[error("page name '{0}' is used more than once")]
    DuplicatePage(String),
    #[error("key '{key}' on page '{page}' is already produced by another region")]
    DuplicateKey { key: String, page: String },
    #[error("key '{0}' is reserved")]
    ReservedKey(String),
    #[error("region '{key}' has an empty crop rectangle {rect:?}")]
    EmptyRegion { key: String, rect: [u32; 4] },
    #[error("region '{key}' has max_value {value}, which must be positive")]
    InvalidMaxValue { key: String, value: f64 },
    #[error(
        "unknown locale '{0}'; set decimal_point/thousands_separator explicitly or use a known tag"
    )]
    UnknownLocale(String),
}

/// A crop rectangle in absolute frame pixels.
///
/// `x1`/`y1` are exclusive. Written in JSON as `[x0, y0, x1, y1]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u32; 4]", into = "[u32; 4]")]
pub struct RegionRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl From<[u32; 4]> for RegionRect {
    fn from(c: [u32; 4]) -> Self {
        Self {
            x0: c[0],
            y0: c[1],
            x1: c[2],
            y1: c[3],
        }
    }
}

impl From<RegionRect> for [u32; 4] {
    fn from(r: RegionRect) -> Self {
        [r.x0, r.y0, r.x1, r.y1]
    }
}

impl RegionRect {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// One step of a page's navigation script.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PointerAction {
    /// Pointer target in frame coordinates
    pub move_to: (u16, u16),
    /// Texts that must all appear in the frame captured after the click
    #[serde(default)]
    pub mandatory_text: Vec<String>,
}

/// A rectangular area of a page holding one value (plus optional bracketed
/// sub-values).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegionDefinition {
    /// Primary output key, unique over all pages
    pub key: String,
    /// Output keys for values following the primary one in brackets
    #[serde(default)]
    pub secondary_keys: Vec<String>,
    /// Crop rectangle `[x0, y0, x1, y1]`
    pub coordinates: RegionRect,
    /// Filters applied after grayscale conversion, `"contrast+invert"` or a list
    #[serde(default)]
    pub preprocessing: FilterChain,
    /// Tesseract engine arguments, e.g. `"--oem 3 --psm 6"`
    #[serde(default)]
    pub ocr_config: String,
    /// OCR language overriding the run-wide one
    #[serde(default)]
    pub language: Option<String>,
    /// Expected unit per output key; `"None"` means no unit
    #[serde(default)]
    pub units: HashMap<String, String>,
    /// Decimal point character as shown by the remote UI
    #[serde(default)]
    pub decimal_point: Option<char>,
    /// Parsed values above this are divided by 10 until they fit
    #[serde(default)]
    pub max_value: Option<f64>,
    /// Decimal places the UI always shows; restores a dropped decimal point
    #[serde(default)]
    pub mandatory_decimal_places: Option<u32>,
    /// Texts that must appear in the recognized text for the value to count
    #[serde(default)]
    pub mandatory_text: Vec<String>,
    /// Apply the OCR character-confusion table before matching
    #[serde(default = "default_true")]
    pub ocr_corrections: bool,
}

impl RegionDefinition {
    /// Returns all output keys of this region, primary first.
    pub fn output_keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.key.as_str()).chain(self.secondary_keys.iter().map(String::as_str))
    }

    /// Returns the unit hint for `key`, treating `"None"` as absent.
    pub fn unit_hint(&self, key: &str) -> Option<&str> {
        self.units
            .get(key)
            .map(String::as_str)
            .filter(|u| !u.is_empty() && *u != "None")
    }
}

/// A screen of the remote UI reached via a pointer-action script.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageDefinition {
    /// Unique page name
    pub name: String,
    /// Pointer actions executed in order to reach the page
    #[serde(default)]
    pub actions: Vec<PointerAction>,
    /// Texts that must appear on the final page frame
    #[serde(default)]
    pub mandatory_text: Vec<String>,
    /// Regions extracted once the page is reached
    #[serde(default)]
    pub regions: Vec<RegionDefinition>,
}

/// Settle delays for the remote UI.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Timing {
    /// Pause after the initial connection (milliseconds)
    #[serde(default = "default_connect_settle_ms")]
    pub connect_settle_ms: u64,
    /// Pause after the wake-up pointer move (milliseconds)
    #[serde(default = "default_wake_settle_ms")]
    pub wake_settle_ms: u64,
    /// Pause between pointer move and click (milliseconds)
    #[serde(default = "default_settle_after_move_ms")]
    pub settle_after_move_ms: u64,
    /// Pause between click and frame capture (milliseconds)
    #[serde(default = "default_settle_after_click_ms")]
    pub settle_after_click_ms: u64,
}

fn default_connect_settle_ms() -> u64 {
    1000
}

fn default_wake_settle_ms() -> u64 {
    500
}

fn default_settle_after_move_ms() -> u64 {
    200
}

fn default_settle_after_click_ms() -> u64 {
    2000
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            connect_settle_ms: default_connect_settle_ms(),
            wake_settle_ms: default_wake_settle_ms(),
            settle_after_move_ms: default_settle_after_move_ms(),
            settle_after_click_ms: default_settle_after_click_ms(),
        }
    }
}

impl Timing {
    /// Timing without any pauses.
    #[cfg(test)]
    pub fn immediate() -> Self {
        Self {
            connect_settle_ms: 0,
            wake_settle_ms: 0,
            settle_after_move_ms: 0,
            settle_after_click_ms: 0,
        }
    }
}

/// Debug artifact settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DebugConfig {
    /// Directory for debug images (defaults to `<exe_dir>/debug/`)
    #[serde(default)]
    pub image_dir: Option<PathBuf>,
    /// Write every preprocessing step of every region as PNG
    #[serde(default)]
    pub write_images: bool,
    /// Keep the captured page frames as PNG
    #[serde(default)]
    pub keep_screenshots: bool,
    /// Remove a region's step images once a value was read from it
    #[serde(default)]
    pub delete_images_after_success: bool,
}

/// Complete collector configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// VNC host of the device
    pub host: String,
    /// VNC port of the device
    #[serde(default = "default_port")]
    pub port: u16,
    /// Tesseract language matching the UI language
    #[serde(default = "default_ocr_language")]
    pub ocr_language: String,
    /// Locale tag describing number formatting, e.g. `de_DE.UTF-8`
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Explicit decimal point, overriding the locale tag
    #[serde(default)]
    pub decimal_point: Option<char>,
    /// Explicit thousands separator, overriding the locale tag
    #[serde(default)]
    pub thousands_separator: Option<char>,
    /// Path to the tesseract executable
    #[serde(default)]
    pub tesseract_path: Option<PathBuf>,
    /// Download missing traineddata for the OCR languages
    #[serde(default)]
    pub download_language_data: bool,
    /// Socket read/write timeout (milliseconds)
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Pointer position used to wake up the display before navigating
    #[serde(default = "default_wake_pointer")]
    pub wake_pointer: Option<(u16, u16)>,
    /// Add the run timestamp as first dataset entry
    #[serde(default = "default_true")]
    pub include_timestamp: bool,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub debug: DebugConfig,
    /// Pages in the order they are visited
    pub pages: Vec<PageDefinition>,
}

fn default_port() -> u16 {
    5900
}

fn default_ocr_language() -> String {
    "deu".to_string()
}

fn default_locale() -> String {
    "de_DE.UTF-8".to_string()
}

fn default_io_timeout_ms() -> u64 {
    30000
}

fn default_wake_pointer() -> Option<(u16, u16)> {
    Some((100, 100))
}

fn default_true() -> bool {
    true
}

impl CollectorConfig {
    /// Checks the configuration for defects that must stop the run before it
    /// touches the device.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.pages.is_empty() {
            return Err(ConfigError::NoPages);
        }

        let mut page_names = HashSet::new();
        let mut keys = HashSet::new();

        for page in &self.pages {
            if !page_names.insert(page.name.as_str()) {
                return Err(ConfigError::DuplicatePage(page.name.clone()));
            }

            for region in &page.regions {
                if region.coordinates.is_empty() {
                    return Err(ConfigError::EmptyRegion {
                        key: region.key.clone(),
                        rect: region.coordinates.into(),
                    });
                }
                if let Some(max) = region.max_value {
                    // NaN fails this check as well
                    if !(max > 0.0) {
                        return Err(ConfigError::InvalidMaxValue {
                            key: region.key.clone(),
                            value: max,
                        });
                    }
                }

                for key in region.output_keys() {
                    if key == TIMESTAMP_KEY {
                        return Err(ConfigError::ReservedKey(key.to_string()));
                    }
                    if !keys.insert(key) {
                        return Err(ConfigError::DuplicateKey {
                            key: key.to_string(),
                            page: page.name.clone(),
                        });
                    }
                }
            }
        }

        self.numeric_locale()?;
        Ok(())
    }

    /// Resolves the numeric conventions used for every value of the run.
    pub fn numeric_locale(&self) -> Result<NumericLocale, ConfigError> {
        let base = match NumericLocale::from_tag(&self.locale) {
            Some(locale) => locale,
            None if self.decimal_point.is_some() => NumericLocale::new('.', None),
            None => return Err(ConfigError::UnknownLocale(self.locale.clone())),
        };
        Ok(NumericLocale::new(
            self.decimal_point.unwrap_or(base.decimal_point()),
            self.thousands_separator.or(base.thousands_separator()),
        ))
    }

    /// Returns every dataset key the configuration can produce, in page and
    /// region order.
    pub fn output_keys(&self) -> impl Iterator<Item = (&PageDefinition, &RegionDefinition, &str)> {
        self.pages.iter().flat_map(|page| {
            page.regions
                .iter()
                .flat_map(move |region| region.output_keys().map(move |key| (page, region, key)))
        })
    }

    /// Returns the configured debug directory or the default one.
    pub fn debug_dir(&self) -> PathBuf {
        self.debug
            .image_dir
            .clone()
            .unwrap_or_else(crate::paths::get_debug_dir)
    }
}

/// Parses and validates a configuration from JSON text.
pub fn parse_config(contents: &str) -> Result<CollectorConfig> {
    let config: CollectorConfig =
        serde_json::from_str(contents).context("Failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}

/// Loads and validates the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<CollectorConfig> {
    tracing::info!("Loading config from {}", path.display());

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config = parse_config(&contents)
        .with_context(|| format!("Invalid config file {}", path.display()))?;

    tracing::info!(
        "Config loaded: {} pages, {} keys",
        config.pages.len(),
        config.output_keys().count()
    );
    Ok(config)
}
