//! Mira Collector
//!
//! Reads the touch UI of an Ovum heat pump over VNC, extracts the values it
//! shows with Tesseract OCR and publishes them as one flat JSON object.

mod automation;
mod capture;
mod ocr;
mod paths;
mod values;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use automation::config::CollectorConfig;
use automation::{JsonPublisher, describe, load_config, run_collection};
use ocr::{DebugSink, FileDebugSink, NoopSink, TesseractRecognizer, ensure_language_data};

#[derive(Parser)]
#[command(name = "mira-collector", version, about = "Collect heat pump values from the Mira UI over VNC")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Visit all configured pages once and publish the values
    Run {
        /// Configuration file (defaults to config.json next to the executable)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Write the dataset to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Keep frames and every preprocessing step as PNG
        #[arg(long)]
        debug_images: bool,
    },
    /// Validate the configuration and list pages and keys
    Check {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print auto-discovery metadata for all keys as JSON
    Discovery {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Topic prefix the dataset is published under
        #[arg(long, default_value = "ovum/")]
        prefix: String,
    },
}

fn main() -> Result<()> {
    init_logging();

    // Log panics through tracing as well
    std::panic::set_hook(Box::new(|panic_info| {
        let msg = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        error!("[PANIC]{} {}", location, msg);
    }));

    match Cli::parse().command {
        Command::Run {
            config,
            output,
            debug_images,
        } => run(config, output, debug_images),
        Command::Check { config } => check(config),
        Command::Discovery { config, prefix } => discovery(config, &prefix),
    }
}

/// Initializes stderr logging, filtered by `RUST_LOG` (default `info`).
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(config: Option<PathBuf>) -> Result<CollectorConfig> {
    let path = config.unwrap_or_else(paths::get_default_config_path);
    load_config(&path)
}

fn run(config: Option<PathBuf>, output: Option<PathBuf>, debug_images: bool) -> Result<()> {
    let mut config = load(config)?;
    if debug_images {
        config.debug.write_images = true;
        config.debug.keep_screenshots = true;
    }

    let languages: BTreeSet<&str> = std::iter::once(config.ocr_language.as_str())
        .chain(
            config
                .pages
                .iter()
                .flat_map(|p| p.regions.iter().filter_map(|r| r.language.as_deref())),
        )
        .collect();
    for language in languages {
        ensure_language_data(language, config.download_language_data)?;
    }

    let recognizer = TesseractRecognizer::new(config.tesseract_path.as_deref())?;
    let sink: Box<dyn DebugSink> = if config.debug.write_images || config.debug.keep_screenshots {
        let sink = FileDebugSink::new(config.debug_dir(), &config.debug);
        info!("Debug artifacts go to {}", sink.dir().display());
        Box::new(sink)
    } else {
        Box::new(NoopSink)
    };
    let mut publisher = JsonPublisher::from_output(output.as_deref());

    let start = Instant::now();
    let dataset = run_collection(&config, &recognizer, sink.as_ref(), &mut publisher)?;
    info!(
        "Run complete: {} values in {:.1}s",
        dataset.len(),
        start.elapsed().as_secs_f32()
    );
    Ok(())
}

fn check(config: Option<PathBuf>) -> Result<()> {
    let config = load(config)?;
    let locale = config.numeric_locale()?;

    println!("Device: {}:{}", config.host, config.port);
    println!(
        "OCR language: {}, decimal point '{}'",
        config.ocr_language,
        locale.decimal_point()
    );
    for page in &config.pages {
        println!("{} ({} actions)", page.name, page.actions.len());
        for region in &page.regions {
            let keys: Vec<&str> = region.output_keys().collect();
            println!("  {} -> {}", region.key, keys.join(", "));
        }
    }
    Ok(())
}

fn discovery(config: Option<PathBuf>, prefix: &str) -> Result<()> {
    let config = load(config)?;
    println!("{}", serde_json::to_string_pretty(&describe(&config, prefix))?);
    Ok(())
}
