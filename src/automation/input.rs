//! Pointer choreography on the remote display.
//!
//! The remote UI needs time to react to pointer events, so every move and
//! click is followed by a settle pause from [`Timing`].

use anyhow::{Context, Result};
use std::thread;
use std::time::Duration;
use tracing::debug;

use crate::automation::config::Timing;
use crate::capture::{MouseButton, RemoteDisplay};

/// Blocks for `ms` milliseconds.
pub fn settle(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Moves the pointer to `(x, y)` and clicks the left button there.
///
/// Sequence: move, settle after move, click, settle after click.
pub fn click_at(session: &mut dyn RemoteDisplay, x: u16, y: u16, timing: &Timing) -> Result<()> {
    session
        .move_pointer(x, y)
        .with_context(|| format!("Failed to move pointer to ({}, {})", x, y))?;
    settle(timing.settle_after_move_ms);

    session
        .click(MouseButton::Left)
        .with_context(|| format!("Failed to click at ({}, {})", x, y))?;
    debug!("Clicked at ({}, {})", x, y);
    settle(timing.settle_after_click_ms);
    Ok(())
}

/// Moves the pointer without clicking to switch on a dimmed display.
pub fn wake_display(session: &mut dyn RemoteDisplay, position: (u16, u16), timing: &Timing) -> Result<()> {
    let (x, y) = position;
    debug!("Waking display with pointer move to ({}, {})", x, y);
    session
        .move_pointer(x, y)
        .context("Failed to wake display")?;
    settle(timing.wake_settle_ms);
    Ok(())
}
