//! In-process fakes for the remote display and the OCR engine.

use anyhow::{Result, bail};
use image::{GrayImage, Rgba, RgbaImage};
use std::cell::RefCell;
use std::collections::VecDeque;

use crate::capture::{Frame, MouseButton, RemoteDisplay};
use crate::ocr::TextRecognizer;

#[derive(Clone, Debug, PartialEq)]
pub enum DisplayEvent {
    Move(u16, u16),
    Click(MouseButton),
    Capture,
    Disconnect,
}

/// Records every call and serves a fixed frame.
pub struct FakeDisplay {
    pub events: Vec<DisplayEvent>,
    pub frame: RgbaImage,
    pub fail_capture: bool,
}

impl FakeDisplay {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            events: Vec::new(),
            frame: RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])),
            fail_capture: false,
        }
    }

    pub fn captures(&self) -> usize {
        self.events
            .iter()
            .filter(|e| **e == DisplayEvent::Capture)
            .count()
    }
}

impl RemoteDisplay for FakeDisplay {
    fn move_pointer(&mut self, x: u16, y: u16) -> Result<()> {
        self.events.push(DisplayEvent::Move(x, y));
        Ok(())
    }

    fn click(&mut self, button: MouseButton) -> Result<()> {
        self.events.push(DisplayEvent::Click(button));
        Ok(())
    }

    fn refresh(&mut self) -> Result<()> {
        if self.fail_capture {
            bail!("connection reset");
        }
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<Frame> {
        self.refresh()?;
        self.events.push(DisplayEvent::Capture);
        Ok(Frame::new(self.frame.clone()))
    }

    fn disconnect(&mut self) -> Result<()> {
        self.events.push(DisplayEvent::Disconnect);
        Ok(())
    }
}

/// A recognizer call: image size, language and engine config.
#[derive(Clone, Debug, PartialEq)]
pub struct RecognizeCall {
    pub size: (u32, u32),
    pub language: String,
    pub engine_config: String,
}

/// Returns scripted texts in call order; empty text once exhausted.
#[derive(Default)]
pub struct FakeRecognizer {
    responses: RefCell<VecDeque<String>>,
    pub calls: RefCell<Vec<RecognizeCall>>,
    pub fail: bool,
}

impl FakeRecognizer {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: RefCell::new(responses.iter().map(|s| s.to_string()).collect()),
            calls: RefCell::new(Vec::new()),
            fail: false,
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl TextRecognizer for FakeRecognizer {
    fn recognize(&self, img: &GrayImage, language: &str, engine_config: &str) -> Result<String> {
        self.calls.borrow_mut().push(RecognizeCall {
            size: img.dimensions(),
            language: language.to_string(),
            engine_config: engine_config.to_string(),
        });
        if self.fail {
            bail!("engine crashed");
        }
        Ok(self.responses.borrow_mut().pop_front().unwrap_or_default())
    }
}
