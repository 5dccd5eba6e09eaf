//! Platform abstraction layer for the cadence scheduler.
//!
//! This crate provides the passive window collaborator used by the frame
//! loop: window creation via winit, pump-style event polling, and Vulkan
//! surface creation.

mod window;

pub use window::{Surface, Window};

// Re-export the winit window type for existing-window embedding
pub use winit::window::Window as WinitWindow;
