//! Command-list handles and their recording lifecycle.
//!
//! Every native command buffer owned by the scheduler is wrapped in a
//! [`CommandListHandle`] carrying an explicit state:
//!
//! ```text
//! Initial -> Recording -> Executable -> OnGpu -> Initial
//!   (open)      (close)      (submit)     (retire)
//! ```
//!
//! Any other transition is a programming error and fails with
//! [`SchedulerError::ResourceState`]. Retiring requires the caller to have
//! observed device completion first; the queue managers guarantee that by
//! waiting the submission's timeline semaphore before retiring.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use cadence_rhi::device::Device as RhiDevice;

use crate::error::{SchedulerError, SchedulerResult};

/// Recording lifecycle state of one command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandListState {
    /// Fresh or reset; ready to be opened.
    Initial,
    /// Open; commands are being recorded.
    Recording,
    /// Closed; ready for submission.
    Executable,
    /// Submitted; owned by the device until completion.
    OnGpu,
}

impl CommandListState {
    fn name(self) -> &'static str {
        match self {
            CommandListState::Initial => "Initial",
            CommandListState::Recording => "Recording",
            CommandListState::Executable => "Executable",
            CommandListState::OnGpu => "OnGpu",
        }
    }
}

/// One native command buffer plus its lifecycle state.
///
/// The buffer handle itself is owned by the allocating command pool; this
/// wrapper owns only the state machine around it.
pub struct CommandListHandle {
    device: Arc<RhiDevice>,
    buffer: vk::CommandBuffer,
    state: Mutex<CommandListState>,
}

impl CommandListHandle {
    pub(crate) fn new(device: Arc<RhiDevice>, buffer: vk::CommandBuffer) -> Self {
        Self {
            device,
            buffer,
            state: Mutex::new(CommandListState::Initial),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> CommandListState {
        *self.state.lock()
    }

    /// Raw command buffer handle.
    #[inline]
    pub(crate) fn buffer(&self) -> vk::CommandBuffer {
        self.buffer
    }

    /// Begins recording. Opening an already-recording buffer is a no-op;
    /// opening an executable or on-GPU buffer is an error.
    pub(crate) fn open(&self) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        match *state {
            CommandListState::Recording => return Ok(()),
            CommandListState::Initial => {}
            other => {
                return Err(SchedulerError::ResourceState {
                    expected: "Initial",
                    actual: other.name(),
                });
            }
        }

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            self.device
                .handle()
                .begin_command_buffer(self.buffer, &begin_info)?;
        }

        *state = CommandListState::Recording;
        Ok(())
    }

    /// Ends recording, making the buffer submittable.
    pub(crate) fn close(&self) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        if *state != CommandListState::Recording {
            return Err(SchedulerError::ResourceState {
                expected: "Recording",
                actual: state.name(),
            });
        }

        unsafe {
            self.device.handle().end_command_buffer(self.buffer)?;
        }

        *state = CommandListState::Executable;
        Ok(())
    }

    /// Marks the buffer as handed to a queue.
    pub(crate) fn mark_submitted(&self) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        if *state != CommandListState::Executable {
            return Err(SchedulerError::ResourceState {
                expected: "Executable",
                actual: state.name(),
            });
        }

        *state = CommandListState::OnGpu;
        Ok(())
    }

    /// Resets a completed buffer back to `Initial` for reuse.
    ///
    /// The caller must have observed device completion of the submission;
    /// the state check only catches retiring a buffer that was never
    /// submitted.
    pub(crate) fn retire(&self) -> SchedulerResult<()> {
        let mut state = self.state.lock();
        if *state != CommandListState::OnGpu {
            return Err(SchedulerError::ResourceState {
                expected: "OnGpu",
                actual: state.name(),
            });
        }

        unsafe {
            self.device.handle().reset_command_buffer(
                self.buffer,
                vk::CommandBufferResetFlags::RELEASE_RESOURCES,
            )?;
        }

        *state = CommandListState::Initial;
        Ok(())
    }

    /// Records a clear of `image` to `color`.
    ///
    /// Layout tracking is out of the scheduler's hands; the image is
    /// addressed in GENERAL layout.
    pub(crate) fn record_clear_color(
        &self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        color: [f32; 4],
    ) -> SchedulerResult<()> {
        let state = self.state.lock();
        if *state != CommandListState::Recording {
            return Err(SchedulerError::ResourceState {
                expected: "Recording",
                actual: state.name(),
            });
        }

        let clear_value = vk::ClearColorValue { float32: color };
        unsafe {
            self.device.handle().cmd_clear_color_image(
                self.buffer,
                image,
                vk::ImageLayout::GENERAL,
                &clear_value,
                &[range],
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(CommandListState::Initial.name(), "Initial");
        assert_eq!(CommandListState::OnGpu.name(), "OnGpu");
    }

    #[test]
    fn test_handle_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CommandListHandle>();
    }
}
