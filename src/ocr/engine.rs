use anyhow::{Context, Result, anyhow};
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::debug;

use super::setup::{find_tessdata_dir, find_tesseract_executable};

/// Text recognition capability.
pub trait TextRecognizer {
    /// Recognizes the text in `img`.
    ///
    /// `engine_config` holds engine arguments such as `--oem 3 --psm 6`. An
    /// error means the engine itself is unusable.
    fn recognize(&self, img: &GrayImage, language: &str, engine_config: &str) -> Result<String>;
}

/// Runs the Tesseract command line tool.
pub struct TesseractRecognizer {
    executable: PathBuf,
}

impl TesseractRecognizer {
    /// Locates the executable; see [`find_tesseract_executable`].
    pub fn new(configured: Option<&Path>) -> Result<Self> {
        let executable = find_tesseract_executable(configured)?;
        debug!("Using tesseract at {}", executable.display());
        Ok(Self { executable })
    }

    fn command(&self, input: &Path, language: &str, engine_config: &str) -> Command {
        let mut command = Command::new(&self.executable);
        command.arg(input).arg("stdout");

        if let Some(dir) = find_tessdata_dir(language) {
            command.arg("--tessdata-dir").arg(dir);
        }
        if !language.is_empty() {
            command.arg("-l").arg(language);
        }
        command.args(engine_args(engine_config));
        command
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn recognize(&self, img: &GrayImage, language: &str, engine_config: &str) -> Result<String> {
        // Save image to temporary file
        let temp_input = NamedTempFile::with_suffix(".png")?;
        img.save(temp_input.path())
            .context("Failed to write OCR input image")?;

        let output = self
            .command(temp_input.path(), language, engine_config)
            .output()
            .with_context(|| format!("Failed to run {}", self.executable.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Splits an engine config string into command line arguments.
pub fn engine_args(engine_config: &str) -> Vec<String> {
    engine_config
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
