//! Collection runner - main entry point for one collection pass.
//!
//! Connects to the device, visits every page, reads its regions and hands the
//! merged dataset to a publisher. Any fatal error stops the run before
//! anything is published.

use anyhow::{Context, Result};
use chrono::Local;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::automation::config::{CollectorConfig, PageDefinition, RegionDefinition, TIMESTAMP_KEY};
use crate::automation::dataset::{Dataset, Publisher};
use crate::automation::input::{settle, wake_display};
use crate::automation::state::{NavigationOutcome, PageNavigator};
use crate::capture::{Frame, RemoteDisplay, RfbSession};
use crate::ocr::preprocess::{apply_chain, crop_region, to_grayscale};
use crate::ocr::{DebugSink, TextRecognizer};
use crate::values::{ExtractedValue, NumericLocale, Value, ValueParser};

/// Format of the dataset timestamp.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Runs pages and regions of a configuration against a display.
pub struct Orchestrator<'a> {
    config: &'a CollectorConfig,
    recognizer: &'a dyn TextRecognizer,
    sink: &'a dyn DebugSink,
    parser: ValueParser,
    locale: NumericLocale,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a CollectorConfig,
        recognizer: &'a dyn TextRecognizer,
        sink: &'a dyn DebugSink,
    ) -> Result<Self> {
        let locale = config.numeric_locale()?;
        debug!(
            "Numeric locale: decimal point '{}', thousands separator {:?}",
            locale.decimal_point(),
            locale.thousands_separator()
        );
        Ok(Self {
            config,
            recognizer,
            sink,
            parser: ValueParser::new()?,
            locale,
        })
    }

    /// Visits all pages in order and returns the merged dataset.
    pub fn collect(&self, session: &mut dyn RemoteDisplay) -> Result<Dataset> {
        let mut dataset = Dataset::new();
        if self.config.include_timestamp {
            dataset.insert(ExtractedValue {
                key: TIMESTAMP_KEY.to_string(),
                value: Value::Text(Local::now().format(TIMESTAMP_FORMAT).to_string()),
                region: String::new(),
            })?;
        }

        if let Some(position) = self.config.wake_pointer {
            wake_display(session, position, &self.config.timing)?;
        }

        let mut visited = 0;
        for page in &self.config.pages {
            let outcome = PageNavigator::new(
                page,
                &mut *session,
                self.recognizer,
                self.sink,
                &self.config.ocr_language,
                &self.config.timing,
            )
            .run()?;

            match outcome {
                NavigationOutcome::Ready(frame) => {
                    for value in self.extract_page(page, &frame)? {
                        dataset.insert(value)?;
                    }
                    visited += 1;
                }
                NavigationOutcome::Skipped { .. } => {}
            }
        }

        info!(
            "Collected {} values from {}/{} pages",
            dataset.len(),
            visited,
            self.config.pages.len()
        );
        for (key, value) in dataset.to_flat() {
            info!("  {} = {}", key, value);
        }
        Ok(dataset)
    }

    /// Reads every region of a verified page, in configuration order.
    pub fn extract_page(&self, page: &PageDefinition, frame: &Frame) -> Result<Vec<ExtractedValue>> {
        let mut values = Vec::new();
        for region in &page.regions {
            let region_values = self.extract_region(region, frame).with_context(|| {
                format!("Failed to read region {} on page {}", region.key, page.name)
            })?;
            values.extend(region_values);
        }
        Ok(values)
    }

    fn extract_region(&self, region: &RegionDefinition, frame: &Frame) -> Result<Vec<ExtractedValue>> {
        let crop = crop_region(&frame.image, &region.coordinates);
        if crop.width() == 0 || crop.height() == 0 {
            warn!(
                "Region {} lies outside the {}x{} frame",
                region.key,
                frame.width(),
                frame.height()
            );
            return Ok(self.parser.parse("", region, &self.locale));
        }
        let gray = to_grayscale(&crop);
        self.sink.region_step(&region.key, "gray", &gray);

        let prepared = apply_chain(gray, &region.preprocessing, |op, img| {
            self.sink.region_step(&region.key, op.token(), img)
        });

        let language = region
            .language
            .as_deref()
            .unwrap_or(&self.config.ocr_language);
        let text = self
            .recognizer
            .recognize(&prepared, language, &region.ocr_config)?;
        self.sink.raw_text(&region.key, &text);

        let values = self.parser.parse(&text, region, &self.locale);
        if values.iter().any(|v| v.value != Value::empty()) {
            self.sink.region_succeeded(&region.key);
        }
        Ok(values)
    }
}

/// Connects to the configured device, collects all pages and publishes the
/// dataset.
pub fn run_collection(
    config: &CollectorConfig,
    recognizer: &dyn TextRecognizer,
    sink: &dyn DebugSink,
    publisher: &mut dyn Publisher,
) -> Result<Dataset> {
    let orchestrator = Orchestrator::new(config, recognizer, sink)?;

    let mut session = RfbSession::connect(
        &config.host,
        config.port,
        Duration::from_millis(config.io_timeout_ms),
    )?;
    settle(config.timing.connect_settle_ms);

    collect_and_publish(&orchestrator, &mut session, publisher)
}

/// Collects from an open session, closes it and publishes the dataset.
///
/// The session is closed whether or not collection succeeded. Nothing is
/// published after a fatal error.
pub fn collect_and_publish(
    orchestrator: &Orchestrator,
    session: &mut dyn RemoteDisplay,
    publisher: &mut dyn Publisher,
) -> Result<Dataset> {
    let collected = orchestrator.collect(session);
    let closed = session.disconnect();
    let dataset = collected?;
    closed?;

    if dataset.is_empty() {
        warn!("No values collected, publishing an empty dataset");
    }
    publisher
        .publish(&dataset)
        .context("Failed to publish dataset")?;
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::config::{Timing, parse_config};
    use crate::automation::testing::{DisplayEvent, FakeDisplay, FakeRecognizer};
    use crate::capture::rfb::loopback::{
        listen, serve_handshake, serve_truncated_frame, serve_white_frame,
    };
    use crate::ocr::NoopSink;
    use std::io::Read;
    use std::sync::mpsc::{self, Receiver};
    use std::thread;

    const TIMEOUT: Duration = Duration::from_secs(5);

    const CONFIG: &str = r#"{
        "host": "192.168.1.20",
        "include_timestamp": false,
        "pages": [
            {
                "name": "Home",
                "regions": [
                    {
                        "key": "OutdoorTemp",
                        "secondary_keys": ["OutdoorTempCurrent"],
                        "coordinates": [0, 0, 10, 5],
                        "preprocessing": "contrast+invert"
                    },
                    {
                        "key": "HeatPumpPower",
                        "coordinates": [10, 0, 20, 5],
                        "units": {"HeatPumpPower": "W"},
                        "language": "eng",
                        "ocr_config": "--psm 7"
                    }
                ]
            },
            {
                "name": "Statistics",
                "actions": [{"move_to": [700, 50], "mandatory_text": ["Statistik"]}],
                "regions": [
                    {"key": "HeatingEnergy", "coordinates": [0, 5, 20, 10]}
                ]
            }
        ]
    }"#;

    fn config() -> CollectorConfig {
        let mut config = parse_config(CONFIG).unwrap();
        config.timing = Timing::immediate();
        config
    }

    fn collect(config: &CollectorConfig, recognizer: &FakeRecognizer) -> Result<(Dataset, FakeDisplay)> {
        let mut display = FakeDisplay::new(20, 10);
        let dataset = Orchestrator::new(config, recognizer, &NoopSink)?.collect(&mut display)?;
        Ok((dataset, display))
    }

    #[test]
    fn test_collects_all_pages_in_order() {
        let config = config();
        let recognizer = FakeRecognizer::new(&[
            "21,3°C (18,9°C)",
            "1500 W",
            "Menü Statistik",
            "1234 kWh",
        ]);

        let (dataset, display) = collect(&config, &recognizer).unwrap();
        assert_eq!(
            dataset.to_flat(),
            vec![
                ("OutdoorTemp", "21.3".to_string()),
                ("OutdoorTempCurrent", "18.9".to_string()),
                ("HeatPumpPower", "1500.0".to_string()),
                ("HeatingEnergy", "1234.0".to_string()),
            ]
        );
        assert_eq!(display.events[0], DisplayEvent::Move(100, 100));
        assert_eq!(display.captures(), 2);
    }

    #[test]
    fn test_region_overrides_reach_recognizer() {
        let config = config();
        let recognizer = FakeRecognizer::new(&["5°C", "0WW", "Statistik", "1 kWh"]);
        let (dataset, _) = collect(&config, &recognizer).unwrap();
        assert_eq!(dataset.get("HeatPumpPower"), Some(&Value::Number(0.0)));

        let calls = recognizer.calls.borrow();
        assert_eq!(calls[0].size, (10, 5));
        assert_eq!(calls[0].language, "deu");
        assert_eq!(calls[1].language, "eng");
        assert_eq!(calls[1].engine_config, "--psm 7");
        // Full frame text check
        assert_eq!(calls[2].size, (20, 10));
    }

    #[test]
    fn test_skipped_page_contributes_nothing() {
        let config = config();
        let recognizer = FakeRecognizer::new(&["5°C", "12 W", "Hauptmenü"]);

        let (dataset, _) = collect(&config, &recognizer).unwrap();
        assert_eq!(dataset.get("HeatingEnergy"), None);
        assert_eq!(dataset.get("HeatPumpPower"), Some(&Value::Number(12.0)));
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn test_timestamp_comes_first() {
        let mut config = config();
        config.include_timestamp = true;
        config.pages.truncate(1);
        let recognizer = FakeRecognizer::new(&["5°C", "12 W"]);

        let (dataset, _) = collect(&config, &recognizer).unwrap();
        let flat = dataset.to_flat();
        assert_eq!(flat[0].0, TIMESTAMP_KEY);
        assert_eq!(flat[1].0, "OutdoorTemp");
    }

    #[test]
    fn test_without_wake_pointer_starts_on_page() {
        let mut config = config();
        config.wake_pointer = None;
        config.pages.truncate(1);
        let recognizer = FakeRecognizer::new(&[]);

        let (_, display) = collect(&config, &recognizer).unwrap();
        assert_eq!(display.events, vec![DisplayEvent::Capture]);
    }

    #[test]
    fn test_engine_failure_aborts_collection() {
        let config = config();
        let mut recognizer = FakeRecognizer::new(&[]);
        recognizer.fail = true;

        assert!(collect(&config, &recognizer).is_err());
    }

    #[test]
    fn test_region_outside_frame_skips_ocr() {
        let mut config = config();
        config.pages.truncate(1);
        config.pages[0].regions[1].coordinates = [40, 40, 50, 50].into();
        let recognizer = FakeRecognizer::new(&["5°C"]);

        let (dataset, _) = collect(&config, &recognizer).unwrap();
        assert_eq!(recognizer.call_count(), 1);
        assert_eq!(dataset.get("HeatPumpPower"), Some(&Value::empty()));
    }

    #[test]
    fn test_unparseable_power_is_empty() {
        let mut config = config();
        config.pages.truncate(1);
        let recognizer = FakeRecognizer::new(&["5°C", "--"]);

        let (dataset, _) = collect(&config, &recognizer).unwrap();
        assert_eq!(dataset.get("HeatPumpPower"), Some(&Value::empty()));
        assert_eq!(dataset.get("OutdoorTempCurrent"), None);
    }

    #[test]
    fn test_zero_watts_through_contrast_invert_region() {
        let mut config = config();
        config.pages.truncate(1);
        let recognizer = FakeRecognizer::new(&["0WW", "12 W"]);

        let (dataset, _) = collect(&config, &recognizer).unwrap();
        let temp = dataset.get("OutdoorTemp").unwrap();
        assert_eq!(temp, &Value::Number(0.0));
        assert_eq!(temp.to_string(), "0.0");
        assert_eq!(dataset.get("OutdoorTempCurrent"), None);
    }

    /// Records published datasets and whether the device connection was
    /// already closed at that point.
    struct RecordingPublisher {
        published: Vec<(Dataset, bool)>,
        server_eof: Receiver<Vec<u8>>,
    }

    impl RecordingPublisher {
        fn new(server_eof: Receiver<Vec<u8>>) -> Self {
            Self {
                published: Vec::new(),
                server_eof,
            }
        }
    }

    impl Publisher for RecordingPublisher {
        fn publish(&mut self, dataset: &Dataset) -> Result<()> {
            let closed = self.server_eof.recv_timeout(TIMEOUT).is_ok();
            self.published.push((dataset.clone(), closed));
            Ok(())
        }
    }

    /// Publisher that only counts calls.
    #[derive(Default)]
    struct CountingPublisher {
        calls: usize,
    }

    impl Publisher for CountingPublisher {
        fn publish(&mut self, _dataset: &Dataset) -> Result<()> {
            self.calls += 1;
            Ok(())
        }
    }

    fn loopback_config(port: u16) -> CollectorConfig {
        let mut config = config();
        config.host = "127.0.0.1".to_string();
        config.port = port;
        config.io_timeout_ms = TIMEOUT.as_millis() as u64;
        config.wake_pointer = None;
        config.pages.truncate(1);
        config
    }

    #[test]
    fn test_run_publishes_once_after_disconnect() {
        let (listener, port) = listen();
        let (eof_tx, eof_rx) = mpsc::channel();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(TIMEOUT)).unwrap();
            serve_handshake(&mut stream, 20, 10);
            serve_white_frame(&mut stream, 20, 10);

            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).unwrap();
            eof_tx.send(rest).unwrap();
        });

        let config = loopback_config(port);
        let recognizer = FakeRecognizer::new(&["21,3°C (18,9°C)", "1500 W"]);
        let mut publisher = RecordingPublisher::new(eof_rx);

        let dataset = run_collection(&config, &recognizer, &NoopSink, &mut publisher).unwrap();
        server.join().unwrap();

        assert_eq!(publisher.published.len(), 1);
        let (published, closed) = &publisher.published[0];
        assert!(*closed);
        assert_eq!(published, &dataset);
        assert_eq!(dataset.get("OutdoorTemp"), Some(&Value::Number(21.3)));
        assert_eq!(dataset.get("HeatPumpPower"), Some(&Value::Number(1500.0)));
    }

    #[test]
    fn test_capture_failure_publishes_nothing_and_closes_session() {
        let (listener, port) = listen();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(TIMEOUT)).unwrap();
            serve_handshake(&mut stream, 20, 10);
            serve_truncated_frame(&mut stream);

            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).unwrap();
            rest
        });

        let config = loopback_config(port);
        let recognizer = FakeRecognizer::new(&[]);
        let mut publisher = CountingPublisher::default();

        let result = run_collection(&config, &recognizer, &NoopSink, &mut publisher);
        assert!(result.is_err());
        assert_eq!(publisher.calls, 0);
        assert_eq!(recognizer.call_count(), 0);
        // The server reaches EOF only once the client has closed the session
        assert!(server.join().unwrap().is_empty());
    }

    #[test]
    fn test_collect_and_publish_disconnects_on_every_path() {
        let config = config();
        let recognizer = FakeRecognizer::new(&["5°C", "12 W", "Statistik", "1 kWh"]);
        let orchestrator = Orchestrator::new(&config, &recognizer, &NoopSink).unwrap();
        let mut display = FakeDisplay::new(20, 10);
        let mut publisher = CountingPublisher::default();

        collect_and_publish(&orchestrator, &mut display, &mut publisher).unwrap();
        assert_eq!(display.events.last(), Some(&DisplayEvent::Disconnect));
        assert_eq!(publisher.calls, 1);

        let mut display = FakeDisplay::new(20, 10);
        display.fail_capture = true;
        let mut publisher = CountingPublisher::default();

        assert!(collect_and_publish(&orchestrator, &mut display, &mut publisher).is_err());
        assert_eq!(display.events, vec![DisplayEvent::Move(100, 100), DisplayEvent::Disconnect]);
        assert_eq!(publisher.calls, 0);
    }
}
