//! Page navigation state machine.
//!
//! The state machine sequences through: Idle → Acting → Verifying → Verified
//! A failed text check ends in Skipped, which is an expected outcome. Transport
//! and OCR engine errors are returned as `Err` and end the run.

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, info};

use crate::automation::config::{PageDefinition, Timing};
use crate::automation::input::click_at;
use crate::capture::{Frame, RemoteDisplay};
use crate::ocr::preprocess::to_grayscale;
use crate::ocr::{DebugSink, TextRecognizer};

/// Navigation states for one page.
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationState {
    /// Nothing done yet
    Idle,
    /// Executing the action with this index
    Acting(usize),
    /// Checking the mandatory text of the action with this index
    Verifying(usize),
    /// Checking the page's own mandatory text on the final frame
    VerifyingPage,
    /// The working frame shows the page
    Verified,
    /// A mandatory text was missing
    Skipped(String),
}

impl std::fmt::Display for NavigationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NavigationState::Idle => write!(f, "Idle"),
            NavigationState::Acting(i) => write!(f, "Acting {}", i + 1),
            NavigationState::Verifying(i) => write!(f, "Verifying action {}", i + 1),
            NavigationState::VerifyingPage => write!(f, "Verifying page"),
            NavigationState::Verified => write!(f, "Verified"),
            NavigationState::Skipped(reason) => write!(f, "Skipped: {}", reason),
        }
    }
}

/// Result of navigating to a page.
#[derive(Debug)]
pub enum NavigationOutcome {
    /// The page is shown; regions can be read from the frame.
    Ready(Frame),
    Skipped { reason: String },
}

/// Drives one page's pointer-action script against the remote display.
pub struct PageNavigator<'a> {
    pub state: NavigationState,
    page: &'a PageDefinition,
    session: &'a mut dyn RemoteDisplay,
    recognizer: &'a dyn TextRecognizer,
    sink: &'a dyn DebugSink,
    /// Run-wide OCR language used for the text checks
    language: &'a str,
    timing: &'a Timing,
    frame: Option<Frame>,
}

impl<'a> PageNavigator<'a> {
    pub fn new(
        page: &'a PageDefinition,
        session: &'a mut dyn RemoteDisplay,
        recognizer: &'a dyn TextRecognizer,
        sink: &'a dyn DebugSink,
        language: &'a str,
        timing: &'a Timing,
    ) -> Self {
        Self {
            state: NavigationState::Idle,
            page,
            session,
            recognizer,
            sink,
            language,
            timing,
            frame: None,
        }
    }

    /// Advances the state machine by one step.
    ///
    /// Returns `Ok(true)` while navigation continues, `Ok(false)` once the page
    /// is verified or skipped.
    pub fn step(&mut self) -> Result<bool> {
        match self.state.clone() {
            NavigationState::Idle => {
                info!("Navigating to page {}", self.page.name);
                if self.page.actions.is_empty() {
                    // Nothing to click, read what is currently shown
                    self.capture()?;
                    self.state = self.after_actions();
                } else {
                    self.state = NavigationState::Acting(0);
                }
                Ok(true)
            }

            NavigationState::Acting(i) => {
                let page = self.page;
                let action = &page.actions[i];
                let (x, y) = action.move_to;
                debug!(
                    "Page {}: action {}/{} at ({}, {})",
                    page.name,
                    i + 1,
                    page.actions.len(),
                    x,
                    y
                );

                click_at(&mut *self.session, x, y, self.timing)?;
                self.capture()?;

                self.state = if action.mandatory_text.is_empty() {
                    self.next_after(i)
                } else {
                    NavigationState::Verifying(i)
                };
                Ok(true)
            }

            NavigationState::Verifying(i) => {
                let page = self.page;
                let required = &page.actions[i].mandatory_text;
                self.state = match self.find_missing_text(required)? {
                    Some(missing) => NavigationState::Skipped(format!(
                        "'{}' not found after action {}",
                        missing,
                        i + 1
                    )),
                    None => self.next_after(i),
                };
                Ok(true)
            }

            NavigationState::VerifyingPage => {
                let page = self.page;
                self.state = match self.find_missing_text(&page.mandatory_text)? {
                    Some(missing) => {
                        NavigationState::Skipped(format!("'{}' not found on page", missing))
                    }
                    None => NavigationState::Verified,
                };
                Ok(true)
            }

            NavigationState::Verified | NavigationState::Skipped(_) => Ok(false),
        }
    }

    /// Runs the state machine to completion.
    pub fn run(mut self) -> Result<NavigationOutcome> {
        while self.step()? {}

        match self.state {
            NavigationState::Verified => {
                info!("Page {} reached", self.page.name);
                self.frame
                    .take()
                    .map(NavigationOutcome::Ready)
                    .ok_or_else(|| anyhow!("Page {} verified without a frame", self.page.name))
            }
            NavigationState::Skipped(reason) => {
                info!("Skipping page {}: {}", self.page.name, reason);
                Ok(NavigationOutcome::Skipped { reason })
            }
            other => bail!("Navigation of page {} stopped in state {}", self.page.name, other),
        }
    }

    fn next_after(&self, i: usize) -> NavigationState {
        if i + 1 < self.page.actions.len() {
            NavigationState::Acting(i + 1)
        } else {
            self.after_actions()
        }
    }

    fn after_actions(&self) -> NavigationState {
        if self.page.mandatory_text.is_empty() {
            NavigationState::Verified
        } else {
            NavigationState::VerifyingPage
        }
    }

    fn capture(&mut self) -> Result<()> {
        let frame = self
            .session
            .capture_frame()
            .with_context(|| format!("Failed to capture frame for page {}", self.page.name))?;
        debug!(
            "Page {}: captured {}x{} frame at {}",
            self.page.name,
            frame.width(),
            frame.height(),
            frame.captured_at.format("%H:%M:%S%.3f")
        );
        self.sink.frame(&self.page.name, &frame.image);
        self.frame = Some(frame);
        Ok(())
    }

    /// Recognizes the whole working frame and returns the first required text
    /// that is not contained in it.
    fn find_missing_text(&self, required: &[String]) -> Result<Option<String>> {
        let frame = self
            .frame
            .as_ref()
            .ok_or_else(|| anyhow!("No frame captured for page {}", self.page.name))?;

        let text = self
            .recognizer
            .recognize(&to_grayscale(&frame.image), self.language, "")
            .with_context(|| format!("OCR failed on page {}", self.page.name))?;
        self.sink.raw_text(&self.page.name, &text);

        Ok(required
            .iter()
            .find(|t| !text.contains(t.as_str()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::config::PointerAction;
    use crate::automation::testing::{DisplayEvent, FakeDisplay, FakeRecognizer};
    use crate::capture::MouseButton;
    use crate::ocr::NoopSink;

    fn page(actions: Vec<PointerAction>, mandatory_text: &[&str]) -> PageDefinition {
        PageDefinition {
            name: "Statistics".to_string(),
            actions,
            mandatory_text: mandatory_text.iter().map(|s| s.to_string()).collect(),
            regions: Vec::new(),
        }
    }

    fn action(x: u16, y: u16, mandatory_text: &[&str]) -> PointerAction {
        PointerAction {
            move_to: (x, y),
            mandatory_text: mandatory_text.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn navigate(
        page: &PageDefinition,
        display: &mut FakeDisplay,
        recognizer: &FakeRecognizer,
    ) -> Result<NavigationOutcome> {
        let timing = Timing::immediate();
        PageNavigator::new(page, display, recognizer, &NoopSink, "deu", &timing).run()
    }

    #[test]
    fn test_state_display() {
        assert_eq!(format!("{}", NavigationState::Idle), "Idle");
        assert_eq!(format!("{}", NavigationState::Acting(0)), "Acting 1");
        assert_eq!(
            format!("{}", NavigationState::Skipped("x".to_string())),
            "Skipped: x"
        );
    }

    #[test]
    fn test_page_without_actions_captures_in_place() {
        let page = page(Vec::new(), &[]);
        let mut display = FakeDisplay::new(8, 8);
        let recognizer = FakeRecognizer::new(&[]);

        let outcome = navigate(&page, &mut display, &recognizer).unwrap();
        assert!(matches!(outcome, NavigationOutcome::Ready(_)));
        assert_eq!(display.events, vec![DisplayEvent::Capture]);
        assert_eq!(recognizer.call_count(), 0);
    }

    #[test]
    fn test_actions_run_in_order() {
        let page = page(vec![action(10, 20, &[]), action(30, 40, &[])], &[]);
        let mut display = FakeDisplay::new(8, 8);
        let recognizer = FakeRecognizer::new(&[]);

        let outcome = navigate(&page, &mut display, &recognizer).unwrap();
        assert!(matches!(outcome, NavigationOutcome::Ready(_)));
        assert_eq!(
            display.events,
            vec![
                DisplayEvent::Move(10, 20),
                DisplayEvent::Click(MouseButton::Left),
                DisplayEvent::Capture,
                DisplayEvent::Move(30, 40),
                DisplayEvent::Click(MouseButton::Left),
                DisplayEvent::Capture,
            ]
        );
    }

    #[test]
    fn test_missing_text_skips_page() {
        let page = page(vec![action(10, 20, &["A", "B"]), action(30, 40, &[])], &[]);
        let mut display = FakeDisplay::new(8, 8);
        let recognizer = FakeRecognizer::new(&["A"]);

        match navigate(&page, &mut display, &recognizer).unwrap() {
            NavigationOutcome::Skipped { reason } => assert!(reason.contains("'B'")),
            other => panic!("expected skip, got {:?}", other),
        }
        // The second action never runs
        assert!(!display.events.contains(&DisplayEvent::Move(30, 40)));
    }

    #[test]
    fn test_text_check_uses_whole_frame_and_run_language() {
        let page = page(vec![action(10, 20, &["Statistik"])], &[]);
        let mut display = FakeDisplay::new(16, 9);
        let recognizer = FakeRecognizer::new(&["Menü Statistik"]);

        let outcome = navigate(&page, &mut display, &recognizer).unwrap();
        assert!(matches!(outcome, NavigationOutcome::Ready(_)));

        let calls = recognizer.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].size, (16, 9));
        assert_eq!(calls[0].language, "deu");
        assert_eq!(calls[0].engine_config, "");
    }

    #[test]
    fn test_text_check_is_case_sensitive() {
        let page = page(vec![action(10, 20, &["Statistik"])], &[]);
        let mut display = FakeDisplay::new(8, 8);
        let recognizer = FakeRecognizer::new(&["STATISTIK"]);

        let outcome = navigate(&page, &mut display, &recognizer).unwrap();
        assert!(matches!(outcome, NavigationOutcome::Skipped { .. }));
    }

    #[test]
    fn test_state_sequence_with_page_check() {
        let page = page(vec![action(10, 20, &["Menü"])], &["Statistik"]);
        let mut display = FakeDisplay::new(8, 8);
        let recognizer = FakeRecognizer::new(&["Menü", "Statistik"]);
        let timing = Timing::immediate();

        let mut navigator =
            PageNavigator::new(&page, &mut display, &recognizer, &NoopSink, "deu", &timing);
        let mut states = vec![navigator.state.clone()];
        while navigator.step().unwrap() {
            states.push(navigator.state.clone());
        }

        assert_eq!(
            states,
            vec![
                NavigationState::Idle,
                NavigationState::Acting(0),
                NavigationState::Verifying(0),
                NavigationState::VerifyingPage,
                NavigationState::Verified,
            ]
        );
    }

    #[test]
    fn test_capture_failure_is_fatal() {
        let page = page(vec![action(10, 20, &[])], &[]);
        let mut display = FakeDisplay::new(8, 8);
        display.fail_capture = true;
        let recognizer = FakeRecognizer::new(&[]);

        assert!(navigate(&page, &mut display, &recognizer).is_err());
    }

    #[test]
    fn test_engine_failure_is_fatal() {
        let page = page(vec![action(10, 20, &["Menü"])], &[]);
        let mut display = FakeDisplay::new(8, 8);
        let mut recognizer = FakeRecognizer::new(&[]);
        recognizer.fail = true;

        assert!(navigate(&page, &mut display, &recognizer).is_err());
    }
}
