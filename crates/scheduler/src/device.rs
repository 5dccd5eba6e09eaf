//! The scheduling device: engine managers, worker pool, dispatch and flush.
//!
//! [`Device`] is the application-facing half; [`DeviceShared`] is the state
//! the worker threads hold on to. One main thread drives frames while
//! `frame_threads` workers populate frame-scoped pieces and `async_threads`
//! workers populate cross-frame pieces, both fed through bounded queues.
//! Either worker count may be zero; dispatch then degrades the requested
//! mode (`Async -> AsyncFrame -> MainThread`) so callers never have to care.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{debug, error};

use cadence_rhi::device::Device as RhiDevice;
use cadence_rhi::instance::Instance;

use crate::engine::ENGINE_MASK_COUNT;
use crate::engine_manager::EngineManager;
use crate::error::{SchedulerError, SchedulerResult};
use crate::presenter::{PresentState, RenderTarget};
use crate::process::{FnProcess, ManagerView, Process};
use crate::sync::BoundedQueue;
use crate::task::{CpuTask, GpuTask};
use crate::work::{DispatchMode, WorkPiece, manager_slot};

/// Applies the worker-availability degradation chain to a requested mode.
///
/// `Async` falls back to `AsyncFrame` when there are no cross-frame workers,
/// and further to `MainThread` when there are no frame workers either. A
/// degraded dispatch keeps the exact semantics of the mode it lands on.
pub(crate) fn degrade_mode(
    mode: DispatchMode,
    frame_workers: usize,
    async_workers: usize,
) -> DispatchMode {
    match mode {
        DispatchMode::Async if async_workers == 0 => {
            if frame_workers == 0 {
                DispatchMode::MainThread
            } else {
                DispatchMode::AsyncFrame
            }
        }
        DispatchMode::AsyncFrame if frame_workers == 0 => DispatchMode::MainThread,
        other => other,
    }
}

/// Scheduler state shared between the main thread and the worker pool.
pub(crate) struct DeviceShared {
    pub(crate) rhi: Arc<RhiDevice>,
    /// One engine manager per queue family, indexed by family.
    pub(crate) engines: Vec<EngineManager>,
    /// Engine mask -> serving family index.
    pub(crate) engine_mapping: [Option<usize>; ENGINE_MASK_COUNT],
    pub(crate) frames: usize,
    pub(crate) frame_workers: usize,
    pub(crate) async_workers: usize,
    /// Family running the frame-gating submits and the presenter's no-op
    /// batches.
    pub(crate) main_engine: usize,
    /// Family the swapchain presents on.
    pub(crate) present_engine: usize,
    pub(crate) frame_index: AtomicUsize,
    /// Feeds the frame-scoped workers.
    pub(crate) frame_queue: BoundedQueue<Arc<WorkPiece>>,
    /// Feeds the cross-frame workers.
    pub(crate) async_queue: BoundedQueue<Arc<WorkPiece>>,
    pub(crate) disposed: AtomicBool,
}

impl DeviceShared {
    /// Builds a work piece for `process`, resolving its engine index.
    ///
    /// An empty engine mask yields a no-op piece that never reaches an
    /// engine; a non-empty mask no family supports is a configuration error.
    fn create_work_piece(
        &self,
        process: Arc<dyn Process>,
        mode: DispatchMode,
    ) -> SchedulerResult<Arc<WorkPiece>> {
        let required = process.required_engines();

        let engine_index = if required.is_empty() {
            None
        } else {
            match self.engine_mapping[required.bits() as usize] {
                Some(index) => Some(index),
                None => {
                    return Err(SchedulerError::Configuration(format!(
                        "no queue family supports the engine mask {required:?}"
                    )));
                }
            }
        };

        Ok(WorkPiece::new(process, mode, engine_index))
    }

    /// Populates `piece` on the calling thread.
    ///
    /// Resolves the manager slot from the piece's mode, the current frame
    /// and the thread index, then hands the piece to its engine. No-op
    /// pieces complete immediately.
    pub(crate) fn perform_population(
        &self,
        piece: &Arc<WorkPiece>,
        thread_index: usize,
    ) -> SchedulerResult<()> {
        let slot = manager_slot(
            piece.mode(),
            self.frame_index.load(Ordering::Acquire),
            self.frames,
            self.frame_workers,
            thread_index,
        );
        piece.assign_manager(slot);

        match piece.engine_index() {
            Some(engine) => self.engines[engine].dispatch(piece),
            None => {
                piece.population_completed();
                Ok(())
            }
        }
    }

    /// Body of one worker thread.
    ///
    /// Worker `t` consumes the frame queue iff `t <= frame_workers`,
    /// otherwise the async queue, and exits once the device is disposed.
    pub(crate) fn worker_loop(&self, thread_index: usize) {
        debug!(thread_index, "Worker started");

        while !self.disposed.load(Ordering::Acquire) {
            let piece = if thread_index <= self.frame_workers {
                self.frame_queue.consume()
            } else {
                self.async_queue.consume()
            };

            if let Err(err) = self.perform_population(&piece, thread_index) {
                error!(thread_index, error = %err, "Population failed");
            }
        }

        debug!(thread_index, "Worker stopped");
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        // Submissions may still be in flight; their semaphores and command
        // pools are destroyed with the engine managers right after this.
        if let Err(err) = self.rhi.wait_idle() {
            error!(error = %err, "Failed to drain the device before teardown");
        }
    }
}

/// The top-level scheduling device.
///
/// Owns the engine managers, the worker pool and the presentation state.
/// Techniques receive a `&Device` and talk to the scheduler exclusively
/// through it.
pub struct Device {
    pub(crate) shared: Arc<DeviceShared>,
    pub(crate) present: PresentState,
    /// Declared last: everything above holds resources created from it.
    pub(crate) instance: Instance,
}

impl Device {
    /// The current frame-in-flight index.
    #[inline]
    pub fn current_frame_index(&self) -> usize {
        self.shared.frame_index.load(Ordering::Acquire)
    }

    /// The number of frames in flight.
    #[inline]
    pub fn number_of_frames(&self) -> usize {
        self.shared.frames
    }

    /// Width of the presentation render targets, in pixels.
    #[inline]
    pub fn render_target_width(&self) -> u32 {
        self.present.resolution.width
    }

    /// Height of the presentation render targets, in pixels.
    #[inline]
    pub fn render_target_height(&self) -> u32 {
        self.present.resolution.height
    }

    /// The swapchain image acquired for the current frame.
    ///
    /// Only meaningful between `begin_frame` and `end_frame`.
    pub fn current_render_target(&self) -> RenderTarget {
        self.present.render_targets[self.present.image_index as usize].clone()
    }

    /// Returns the Vulkan instance wrapper.
    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Schedules `process` for population.
    ///
    /// Returns a [`CpuTask`] that resolves when the process has finished
    /// recording. `MainThread` populates inline before returning;
    /// `AsyncFrame` and `Async` enqueue onto the matching bounded queue and
    /// block while it is full.
    ///
    /// # Errors
    ///
    /// Fails if no queue family supports the process's engine mask, or if an
    /// inline population fails.
    pub fn dispatch(
        &self,
        process: Arc<dyn Process>,
        mode: DispatchMode,
    ) -> SchedulerResult<CpuTask> {
        let shared = &self.shared;
        let mode = degrade_mode(mode, shared.frame_workers, shared.async_workers);

        let piece = shared.create_work_piece(process, mode)?;
        let task = CpuTask::new(piece.clone());

        match mode {
            DispatchMode::MainThread => shared.perform_population(&piece, 0)?,
            DispatchMode::AsyncFrame => shared.frame_queue.produce(piece),
            DispatchMode::Async => shared.async_queue.produce(piece),
        }

        Ok(task)
    }

    /// Schedules a closure over a typed manager view.
    ///
    /// Convenience over [`dispatch`](Self::dispatch) for recorders that
    /// don't warrant a named [`Process`] type.
    pub fn dispatch_fn<T, F>(&self, record: F, mode: DispatchMode) -> SchedulerResult<CpuTask>
    where
        T: ManagerView + 'static,
        F: Fn(T) -> SchedulerResult<()> + Send + Sync + 'static,
    {
        self.dispatch(Arc::new(FnProcess::new(record)), mode)
    }

    /// Forces the given populations to complete and submits their batches.
    ///
    /// Waits every CPU task (population may still be running on a worker),
    /// marks each piece's manager slot, then submits exactly the marked
    /// slots across all engines. Each submission waits on `waiting_gpu`; the
    /// returned task is the union of all resulting submissions.
    ///
    /// # Errors
    ///
    /// Fails if any submission fails.
    pub fn flush(
        &self,
        cpu_tasks: &[CpuTask],
        waiting_gpu: &[GpuTask],
    ) -> SchedulerResult<GpuTask> {
        for task in cpu_tasks {
            task.wait();

            let piece = task.piece();
            if let (Some(engine), Some(slot)) = (piece.engine_index(), piece.manager_index()) {
                self.shared.engines[engine].mark_for_flush(slot);
            }
        }

        let mut children = Vec::new();
        for engine in &self.shared.engines {
            engine.flush_marked(waiting_gpu, &mut children)?;
        }

        Ok(GpuTask::combine(&children))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degrade_keeps_modes_with_workers_present() {
        assert_eq!(
            degrade_mode(DispatchMode::Async, 2, 1),
            DispatchMode::Async
        );
        assert_eq!(
            degrade_mode(DispatchMode::AsyncFrame, 2, 0),
            DispatchMode::AsyncFrame
        );
        assert_eq!(
            degrade_mode(DispatchMode::MainThread, 0, 0),
            DispatchMode::MainThread
        );
    }

    #[test]
    fn test_degrade_async_without_async_workers() {
        assert_eq!(
            degrade_mode(DispatchMode::Async, 2, 0),
            DispatchMode::AsyncFrame
        );
    }

    #[test]
    fn test_degrade_collapses_to_main_thread() {
        // With no workers at all, an async dispatch behaves exactly like a
        // main-thread dispatch.
        assert_eq!(
            degrade_mode(DispatchMode::Async, 0, 0),
            DispatchMode::MainThread
        );
        assert_eq!(
            degrade_mode(DispatchMode::AsyncFrame, 0, 0),
            DispatchMode::MainThread
        );
    }
}
