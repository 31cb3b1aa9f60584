//! Remote framebuffer access.
//!
//! This module provides:
//! - The `RemoteDisplay` capability used by navigation
//! - Captured `Frame`s
//! - A minimal RFB (VNC) client, `RfbSession`

pub mod frame;
pub mod rfb;
pub mod session;

pub use frame::Frame;
pub use rfb::RfbSession;
pub use session::{MouseButton, RemoteDisplay};
