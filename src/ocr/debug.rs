//! Debug artifacts: frames, per-step region images and raw OCR text.
//!
//! Artifacts never influence parsing. Failures to write them are logged and
//! otherwise ignored.

use chrono::Local;
use image::{GrayImage, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::automation::config::DebugConfig;

/// Receives intermediate results of a run.
pub trait DebugSink {
    /// A page frame was captured.
    fn frame(&self, _page: &str, _img: &RgbaImage) {}

    /// A preprocessing step of a region produced `img`.
    fn region_step(&self, _region: &str, _step: &str, _img: &GrayImage) {}

    /// OCR returned `text` for a region.
    fn raw_text(&self, region: &str, text: &str) {
        debug!("Detected text in region {}: '{}'", region, text);
    }

    /// A value was read from the region.
    fn region_succeeded(&self, _region: &str) {}
}

/// Sink that only logs raw text.
pub struct NoopSink;

impl DebugSink for NoopSink {}

/// Sink writing PNG files into a directory.
///
/// Files are named `<timestamp>-<name>-<step>.png` so a directory can hold
/// several runs.
pub struct FileDebugSink {
    dir: PathBuf,
    write_images: bool,
    keep_screenshots: bool,
    delete_after_success: bool,
    prefix: String,
    written: Mutex<Vec<(String, PathBuf)>>,
}

impl FileDebugSink {
    /// Creates the sink, creating `dir` if necessary.
    pub fn new(dir: PathBuf, config: &DebugConfig) -> Self {
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Failed to create debug directory {}: {}", dir.display(), e);
        }
        Self {
            dir,
            write_images: config.write_images,
            keep_screenshots: config.keep_screenshots,
            delete_after_success: config.delete_images_after_success,
            prefix: Local::now().format("%Y%m%d_%H%M%S").to_string(),
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str, step: &str) -> PathBuf {
        self.dir.join(format!("{}-{}-{}.png", self.prefix, name, step))
    }
}

impl DebugSink for FileDebugSink {
    fn frame(&self, page: &str, img: &RgbaImage) {
        if !self.keep_screenshots {
            return;
        }
        let path = self.path_for(page, "screenshot");
        match img.save(&path) {
            Ok(()) => debug!("Screenshot stored: {}", path.display()),
            Err(e) => warn!("Failed to write screenshot {}: {}", path.display(), e),
        }
    }

    fn region_step(&self, region: &str, step: &str, img: &GrayImage) {
        if !self.write_images {
            return;
        }
        let path = self.path_for(region, step);
        if let Err(e) = img.save(&path) {
            warn!("Failed to write debug image {}: {}", path.display(), e);
            return;
        }
        if let Ok(mut written) = self.written.lock() {
            written.push((region.to_string(), path));
        }
    }

    fn region_succeeded(&self, region: &str) {
        if !self.delete_after_success {
            return;
        }
        let Ok(mut written) = self.written.lock() else {
            return;
        };
        written.retain(|(owner, path)| {
            if owner != region {
                return true;
            }
            if let Err(e) = fs::remove_file(path) {
                warn!("File '{}' could not be deleted: {}", path.display(), e);
            }
            false
        });
    }
}
