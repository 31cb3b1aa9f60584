use anyhow::Result;

use super::frame::Frame;

/// Pointer buttons the Mira touch UI reacts to, with their RFB button-mask
/// bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    Left,
}

impl MouseButton {
    pub fn mask(self) -> u8 {
        match self {
            MouseButton::Left => 1,
        }
    }
}

/// A live connection to a remote framebuffer.
///
/// Every error is a transport error and ends the run.
pub trait RemoteDisplay {
    /// Moves the pointer to absolute framebuffer coordinates.
    fn move_pointer(&mut self, x: u16, y: u16) -> Result<()>;

    /// Presses and releases `button` at the current pointer position.
    fn click(&mut self, button: MouseButton) -> Result<()>;

    /// Brings the local framebuffer copy up to date.
    fn refresh(&mut self) -> Result<()>;

    /// Refreshes and returns a snapshot of the framebuffer.
    fn capture_frame(&mut self) -> Result<Frame>;

    fn disconnect(&mut self) -> Result<()>;
}
