//! Frame scheduler and command-buffer lifecycle manager.
//!
//! This crate lets application code express per-frame rendering work as
//! *processes* — small units that record GPU commands into a command buffer —
//! and takes care of everything around them:
//!
//! - routing each process to a queue family that supports its engine
//!   requirements ([`EngineType`])
//! - populating command buffers inline, on frame-scoped workers, or on
//!   cross-frame async workers ([`DispatchMode`])
//! - batching populated buffers and submitting them to the right hardware
//!   queue at frame end
//! - synchronizing the CPU with population ([`CpuTask`]) and with device
//!   completion ([`GpuTask`], composable by union)
//! - driving the swapchain through [`Presenter::begin_frame`] /
//!   [`Presenter::end_frame`]
//!
//! The demo in `crates/app` shows the whole loop: create a [`Presenter`],
//! load a [`Technique`], dispatch it every frame.

mod engine_manager;
mod error;
mod queue_manager;

pub mod command_list;
pub mod device;
pub mod engine;
pub mod presenter;
pub mod process;
pub mod sync;
pub mod task;
pub mod technique;
pub mod work;

pub use device::Device;
pub use engine::EngineType;
pub use error::{SchedulerError, SchedulerResult};
pub use presenter::{
    ImageUsage, Presenter, PresenterDescription, PresenterMode, RenderTarget,
};
pub use process::{
    CommandListManager, ComputeExclusiveManager, ComputeManager, FnProcess, GraphicsManager,
    ManagerView, Process, RaytracingManager, TransferManager,
};
pub use task::{CpuTask, GpuTask};
pub use technique::Technique;
pub use work::DispatchMode;

// Re-export ash types that users might need
pub use cadence_rhi::vk;
