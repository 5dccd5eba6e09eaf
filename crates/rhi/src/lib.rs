//! Vulkan abstraction layer for the cadence scheduler.
//!
//! This crate provides a thin, safe layer over Vulkan using the `ash` crate:
//! - Instance creation with optional validation layers
//! - Physical-device selection and queue-family enumeration
//! - Logical device with per-family queue arrays
//! - Command pool allocation
//! - Binary and timeline semaphores
//! - Swapchain management
//!
//! Command-buffer *state* (recording, executable, on-GPU) is deliberately not
//! modelled here; the scheduler crate owns that lifecycle.

mod error;

pub mod command;
pub mod device;
pub mod instance;
pub mod physical_device;
pub mod swapchain;
pub mod sync;

pub use error::{RhiError, RhiResult};

// Re-export ash types that users might need
pub use ash::vk;
