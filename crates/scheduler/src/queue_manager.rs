//! Per-slot command-queue managers.
//!
//! A [`CommandQueueManager`] owns one command pool on one queue family and
//! serves exactly one worker slot: it hands out the slot's current recording
//! buffer, accumulates the work pieces populating it, submits the batch, and
//! recycles buffers once the device is done with them.
//!
//! Several managers of one family share a small pool of hardware queues
//! round-robin; a [`SubmitQueue`] wraps each queue with the mutex that keeps
//! concurrent submissions from different slots apart.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use tracing::trace;

use cadence_rhi::command::CommandPool;
use cadence_rhi::device::Device as RhiDevice;
use cadence_rhi::sync::{self as rhi_sync, TimelineSemaphore};

use crate::command_list::CommandListHandle;
use crate::error::{SchedulerError, SchedulerResult};
use crate::task::{GpuTask, SUBMIT_SIGNAL_VALUE};
use crate::work::{DispatchMode, WorkPiece};

/// A hardware queue plus the lock that serializes submissions to it.
///
/// Native queues are externally synchronized; every submit and present to a
/// shared queue must hold its lock.
pub(crate) struct SubmitQueue {
    queue: vk::Queue,
    lock: Mutex<()>,
}

impl SubmitQueue {
    pub(crate) fn new(queue: vk::Queue) -> Self {
        Self {
            queue,
            lock: Mutex::new(()),
        }
    }

    /// Submits batches to the queue under its lock.
    pub(crate) fn submit(
        &self,
        device: &RhiDevice,
        submits: &[vk::SubmitInfo],
    ) -> Result<(), vk::Result> {
        let _guard = self.lock.lock();
        unsafe { device.handle().queue_submit(self.queue, submits, vk::Fence::null()) }
    }

    /// Runs `f` with the raw queue handle while holding the queue lock.
    ///
    /// Used for presentation, which goes through the swapchain loader rather
    /// than `vkQueueSubmit`.
    pub(crate) fn with_lock<R>(&self, f: impl FnOnce(vk::Queue) -> R) -> R {
        let _guard = self.lock.lock();
        f(self.queue)
    }
}

/// State a manager guards against concurrent population and submission.
#[derive(Default)]
struct ManagerInner {
    /// Reset buffers ready to be opened again.
    reusable: Vec<Arc<CommandListHandle>>,
    /// The slot's single open buffer, if any.
    recording: Option<Arc<CommandListHandle>>,
    /// Pieces whose population targets the current recording buffer.
    populated: Vec<Arc<WorkPiece>>,
    /// Buffers in flight on the device, paired with their tasks.
    submitted_buffers: Vec<Arc<CommandListHandle>>,
    submitted_tasks: Vec<GpuTask>,
}

/// Command-buffer lifecycle manager for one worker slot of one family.
pub(crate) struct CommandQueueManager {
    rhi: Arc<RhiDevice>,
    pool: CommandPool,
    queue: Arc<SubmitQueue>,
    /// Set on cross-frame async slots: losing the last user handle to a job
    /// here is a fatal programming error.
    detect_abandoned: bool,
    inner: Mutex<ManagerInner>,
}

impl CommandQueueManager {
    pub(crate) fn new(
        rhi: Arc<RhiDevice>,
        family_index: u32,
        queue: Arc<SubmitQueue>,
        detect_abandoned: bool,
    ) -> SchedulerResult<Self> {
        let pool = CommandPool::new(rhi.clone(), family_index)?;

        Ok(Self {
            rhi,
            pool,
            queue,
            detect_abandoned,
            inner: Mutex::new(ManagerInner::default()),
        })
    }

    /// Pops a reset buffer or allocates a fresh one, and opens it.
    fn fetch_new(&self, inner: &mut ManagerInner) -> SchedulerResult<Arc<CommandListHandle>> {
        let handle = match inner.reusable.pop() {
            Some(handle) => handle,
            None => Arc::new(CommandListHandle::new(
                self.rhi.clone(),
                self.pool.allocate_command_buffer()?,
            )),
        };
        handle.open()?;
        Ok(handle)
    }

    /// Returns the slot's recording buffer, creating one on demand.
    fn peek(&self, inner: &mut ManagerInner) -> SchedulerResult<Arc<CommandListHandle>> {
        if let Some(handle) = &inner.recording {
            return Ok(handle.clone());
        }

        let handle = self.fetch_new(inner)?;
        inner.recording = Some(handle.clone());
        Ok(handle)
    }

    /// Registers `piece` against the current recording buffer and returns
    /// that buffer for population.
    ///
    /// Append and peek happen under one lock acquisition so a concurrent
    /// submit can never split them.
    pub(crate) fn populating(
        &self,
        piece: Arc<WorkPiece>,
    ) -> SchedulerResult<Arc<CommandListHandle>> {
        let mut inner = self.inner.lock();
        inner.populated.push(piece);
        self.peek(&mut inner)
    }

    /// Blocks until every piece currently registered on this slot has
    /// finished recording.
    ///
    /// Works on a snapshot so populating workers are never blocked behind
    /// the waits.
    pub(crate) fn wait_for_population(&self) {
        let snapshot: Vec<Arc<WorkPiece>> = self.inner.lock().populated.clone();
        for piece in snapshot {
            piece.wait_for_population();
        }
    }

    /// Closes and submits the slot's recording buffer.
    ///
    /// The submission waits on every unfinished semaphore reachable from
    /// `wait_for` (at the all-commands stage) and signals a fresh timeline
    /// semaphore owned by the returned task. With no recording buffer, a
    /// trivially-finished task is returned.
    pub(crate) fn submit_current(&self, wait_for: &[GpuTask]) -> SchedulerResult<GpuTask> {
        let mut inner = self.inner.lock();

        let Some(recording) = inner.recording.take() else {
            return Ok(GpuTask::completed());
        };

        recording.close()?;

        let mut wait_semaphores = Vec::new();
        for task in wait_for {
            task.collect_wait_semaphores(&mut wait_semaphores);
        }
        let wait_values = vec![SUBMIT_SIGNAL_VALUE; wait_semaphores.len()];
        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];

        let semaphore = TimelineSemaphore::new(self.rhi.clone())?;
        let signal_semaphores = [semaphore.handle()];
        let signal_values = [SUBMIT_SIGNAL_VALUE];
        let task = GpuTask::from_semaphore(semaphore);

        let command_buffers = [recording.buffer()];

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        self.queue.submit(&self.rhi, &[submit])?;
        recording.mark_submitted()?;

        trace!(
            pieces = inner.populated.len(),
            waits = wait_semaphores.len(),
            "Submitted batch"
        );

        for piece in inner.populated.drain(..) {
            piece.mark_submitted();
        }

        inner.submitted_tasks.push(task.clone());
        inner.submitted_buffers.push(recording);

        Ok(task)
    }

    /// Blocks until every in-flight submission of this slot has completed,
    /// then resets its buffers and returns them to the free list.
    ///
    /// This is the per-frame "make the slot reusable" step; it runs before a
    /// frame slot is handed back to its workers.
    pub(crate) fn wait_for_pendings(&self) -> SchedulerResult<()> {
        let (buffers, tasks) = {
            let mut inner = self.inner.lock();
            (
                std::mem::take(&mut inner.submitted_buffers),
                std::mem::take(&mut inner.submitted_tasks),
            )
        };

        let semaphores: Vec<vk::Semaphore> = tasks
            .iter()
            .filter(|task| !task.finished())
            .filter_map(|task| task.semaphore_handle())
            .collect();
        rhi_sync::wait_all(&self.rhi, &semaphores, SUBMIT_SIGNAL_VALUE)?;

        let mut inner = self.inner.lock();
        for (buffer, task) in buffers.into_iter().zip(tasks) {
            task.mark_finished();
            buffer.retire()?;
            inner.reusable.push(buffer);
        }

        Ok(())
    }

    /// Reaps finished async submissions and detects abandoned jobs.
    ///
    /// A submitted task whose only live handle is this manager, or a
    /// populating cross-frame piece reachable only from this slot and its
    /// worker, means the user lost the handle they were required to flush.
    pub(crate) fn clean(&self) -> SchedulerResult<()> {
        let mut inner = self.inner.lock();

        let mut i = 0;
        while i < inner.submitted_tasks.len() {
            if inner.submitted_tasks[i].finished() {
                let buffer = inner.submitted_buffers.swap_remove(i);
                inner.submitted_tasks.swap_remove(i);
                buffer.retire()?;
                inner.reusable.push(buffer);
            } else {
                if self.detect_abandoned && inner.submitted_tasks[i].handle_count() == 1 {
                    return Err(SchedulerError::AbandonedAsyncTask(
                        "submitted batch with no live GPU task handle",
                    ));
                }
                i += 1;
            }
        }

        if self.detect_abandoned {
            for piece in &inner.populated {
                if piece.mode() == DispatchMode::Async && Arc::strong_count(piece) <= 2 {
                    return Err(SchedulerError::AbandonedAsyncTask(
                        "populating piece with no live CPU task handle",
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manager_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CommandQueueManager>();
        assert_send_sync::<SubmitQueue>();
    }
}
