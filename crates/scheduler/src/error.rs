//! Scheduler-specific error types.

use thiserror::Error;

use crate::engine::EngineType;

/// Scheduler-specific error type.
///
/// Every fallible operation in this crate surfaces one of these; nothing is
/// retried internally.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Invalid construction parameters or unsupported hardware topology
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Illegal command-list state transition
    #[error("Invalid command list transition: expected {expected}, buffer is {actual}")]
    ResourceState {
        expected: &'static str,
        actual: &'static str,
    },

    /// A manager facade cast asked for more engines than the slot supports
    #[error("Command list manager supports {supported:?} but the cast requires {required:?}")]
    CapabilityMismatch {
        required: EngineType,
        supported: EngineType,
    },

    /// A cross-frame async job lost its last user-held handle
    #[error("Abandoned async task ({0}); keep the returned task handles alive and flush them")]
    AbandonedAsyncTask(&'static str),

    /// Non-success status from the GPU API
    #[error("Vulkan error: {0}")]
    Backend(#[from] ash::vk::Result),

    /// Error bubbled up from the RHI layer
    #[error(transparent)]
    Rhi(#[from] cadence_rhi::RhiError),

    /// Error bubbled up from the platform layer
    #[error(transparent)]
    Platform(#[from] cadence_core::Error),
}

/// Result type alias for scheduler operations.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
