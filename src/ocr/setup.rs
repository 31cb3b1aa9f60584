use anyhow::{Context, Result, anyhow};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

use crate::paths::get_tessdata_dir;

const TESSDATA_REPO: &str = "https://github.com/tesseract-ocr/tessdata/raw/main";

/// Common install locations of the tesseract executable.
const COMMON_EXECUTABLES: &[&str] = &[
    "/usr/bin/tesseract",
    "/usr/local/bin/tesseract",
    "/opt/homebrew/bin/tesseract",
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
];

/// Common system tessdata directories.
const SYSTEM_TESSDATA: &[&str] = &[
    "/usr/share/tesseract-ocr/5/tessdata",
    "/usr/share/tesseract-ocr/4.00/tessdata",
    "/usr/share/tessdata",
    "/usr/local/share/tessdata",
    "/opt/homebrew/share/tessdata",
    r"C:\Program Files\Tesseract-OCR\tessdata",
];

/// Finds the Tesseract executable: the configured path first, then `PATH`,
/// then common install locations.
pub fn find_tesseract_executable(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        warn!(
            "Configured tesseract {} does not exist, searching elsewhere",
            path.display()
        );
    }

    if let Ok(output) = Command::new("tesseract").arg("--version").output() {
        if output.status.success() {
            return Ok(PathBuf::from("tesseract"));
        }
    }

    COMMON_EXECUTABLES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or_else(|| anyhow!("Tesseract not found. Please install Tesseract-OCR."))
}

/// Finds a tessdata directory containing traineddata for every part of a
/// `+`-joined language list.
///
/// Looks at the local data directory, `TESSDATA_PREFIX` and the common
/// system locations. Returns `None` if the languages are only known to the
/// tesseract installation itself.
pub fn find_tessdata_dir(language: &str) -> Option<PathBuf> {
    let mut candidates = vec![get_tessdata_dir()];
    if let Ok(prefix) = std::env::var("TESSDATA_PREFIX") {
        let prefix = PathBuf::from(prefix);
        candidates.push(prefix.join("tessdata"));
        candidates.push(prefix);
    }
    candidates.extend(SYSTEM_TESSDATA.iter().map(PathBuf::from));

    candidates
        .into_iter()
        .find(|dir| has_language_data(dir, language))
}

/// Whether `dir` holds `<lang>.traineddata` for every language in the list.
fn has_language_data(dir: &Path, language: &str) -> bool {
    let mut languages = language.split('+').filter(|l| !l.is_empty()).peekable();
    languages.peek().is_some()
        && languages.all(|lang| dir.join(format!("{}.traineddata", lang)).exists())
}

/// Makes sure traineddata for `language` is available.
///
/// Language lists like `deu+eng` are checked for every part. Missing
/// data is downloaded into the local data directory when `download` is set.
pub fn ensure_language_data(language: &str, download: bool) -> Result<()> {
    for lang in language.split('+').filter(|l| !l.is_empty()) {
        if let Some(dir) = find_tessdata_dir(lang) {
            info!("Tesseract language '{}' found in {}", lang, dir.display());
            continue;
        }
        if !download {
            warn!(
                "No {}.traineddata found in known locations; relying on the tesseract default",
                lang
            );
            continue;
        }
        download_tessdata(lang, &get_tessdata_dir())?;
    }
    Ok(())
}

/// Downloads `<language>.traineddata` from the tessdata repository.
fn download_tessdata(language: &str, tessdata_dir: &Path) -> Result<()> {
    fs::create_dir_all(tessdata_dir)
        .with_context(|| format!("Failed to create {}", tessdata_dir.display()))?;

    let url = format!("{}/{}.traineddata", TESSDATA_REPO, language);
    let path = tessdata_dir.join(format!("{}.traineddata", language));

    info!("Downloading {}.traineddata...", language);

    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let response = client
        .get(&url)
        .header("User-Agent", "mira-collector")
        .send()?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "Failed to download {}.traineddata: HTTP {}",
            language,
            response.status()
        ));
    }

    let bytes = response.bytes()?;
    let mut file = fs::File::create(&path)?;
    file.write_all(&bytes)?;

    info!(
        "Downloaded {}.traineddata ({} bytes)",
        language,
        bytes.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_data_requires_every_language() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("deu.traineddata"), b"").unwrap();

        assert!(has_language_data(dir.path(), "deu"));
        assert!(!has_language_data(dir.path(), "deu+eng"));
        assert!(!has_language_data(dir.path(), ""));

        fs::write(dir.path().join("eng.traineddata"), b"").unwrap();
        assert!(has_language_data(dir.path(), "deu+eng"));
    }

    #[test]
    fn test_configured_executable_wins() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let found = find_tesseract_executable(Some(file.path())).unwrap();
        assert_eq!(found, file.path());
    }

    #[test]
    fn test_unknown_language_has_no_tessdata() {
        assert!(find_tessdata_dir("zz_not_a_language").is_none());
    }

    #[test]
    fn test_ensure_language_data_without_download_is_lenient() {
        assert!(ensure_language_data("zz_not_a_language", false).is_ok());
    }
}
