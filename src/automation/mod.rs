//! Collection automation for the Mira UI.
//!
//! This module provides:
//! - Configuration loading and validation
//! - Pointer choreography on the remote display
//! - The page navigation state machine
//! - The collection runner and dataset publishing
//! - Auto-discovery metadata for the published keys

pub mod config;
pub mod dataset;
pub mod discovery;
pub mod input;
pub mod runner;
pub mod state;

#[cfg(test)]
pub mod testing;

pub use config::load_config;
pub use dataset::JsonPublisher;
pub use discovery::describe;
pub use runner::run_collection;
