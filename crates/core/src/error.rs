//! Error types shared across the workspace.

use thiserror::Error;

/// Top-level error type for platform and application code.
#[derive(Error, Debug)]
pub enum Error {
    /// Window creation or event-loop errors
    #[error("Window error: {0}")]
    Window(String),

    /// Vulkan-related errors reported outside the RHI layer
    #[error("Vulkan error: {0}")]
    Vulkan(String),

    /// Invalid construction parameters
    #[error("Config error: {0}")]
    Config(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using the workspace's [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
