//! Core utilities for the cadence workspace.
//!
//! This crate provides foundational types used across the scheduler:
//! - Error types and result aliases
//! - Logging initialization
//! - Timer utilities

mod error;
mod logging;
mod timer;

pub use error::{Error, Result};
pub use logging::init_logging;
pub use timer::Timer;
