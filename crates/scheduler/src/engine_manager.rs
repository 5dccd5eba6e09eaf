//! Per-queue-family engine managers.
//!
//! An [`EngineManager`] owns every command-queue manager of one queue
//! family. The slot layout is fixed:
//!
//! ```text
//! [ frame 0: main, w1..wN | frame 1: main, w1..wN | ... | async a1..aM ]
//! ```
//!
//! Slot `frame * (frame_workers + 1) + w` serves worker `w` of frame `frame`
//! (`w = 0` is the main thread); the trailing `async_workers` slots belong to
//! the cross-frame workers and are stable across frames. The family's
//! hardware queues are shared round-robin over the slots.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use cadence_rhi::device::Device as RhiDevice;
use cadence_rhi::physical_device::QueueFamily;

use crate::engine::{EngineType, engines_from_queue_flags};
use crate::error::{SchedulerError, SchedulerResult};
use crate::process::CommandListManager;
use crate::queue_manager::{CommandQueueManager, SubmitQueue};
use crate::task::GpuTask;
use crate::work::WorkPiece;

pub(crate) struct EngineManager {
    supported_engines: EngineType,
    frames: usize,
    frame_workers: usize,
    /// The family's queues, shared round-robin among the slots.
    queues: Vec<Arc<SubmitQueue>>,
    managers: Vec<CommandQueueManager>,
    /// Per-slot "has work that a flush must submit" flags.
    marked: Vec<AtomicBool>,
}

impl EngineManager {
    pub(crate) fn new(
        rhi: Arc<RhiDevice>,
        family: &QueueFamily,
        frames: usize,
        frame_workers: usize,
        async_workers: usize,
    ) -> SchedulerResult<Self> {
        let supported_engines = engines_from_queue_flags(family.flags);

        let queue_count = rhi.queue_count(family.index).max(1) as usize;
        let queues: Vec<Arc<SubmitQueue>> = (0..queue_count)
            .map(|i| Arc::new(SubmitQueue::new(rhi.queue(family.index, i as u32))))
            .collect();

        let frame_slots = frames * (frame_workers + 1);
        let slot_count = frame_slots + async_workers;

        let mut managers = Vec::with_capacity(slot_count);
        for slot in 0..slot_count {
            let is_async_slot = slot >= frame_slots;
            managers.push(CommandQueueManager::new(
                rhi.clone(),
                family.index,
                queues[slot % queue_count].clone(),
                is_async_slot,
            )?);
        }

        let marked = (0..slot_count).map(|_| AtomicBool::new(false)).collect();

        debug!(
            "Engine manager for family {}: {:?}, {} slot(s) over {} queue(s)",
            family.index, supported_engines, slot_count, queue_count
        );

        Ok(Self {
            supported_engines,
            frames,
            frame_workers,
            queues,
            managers,
            marked,
        })
    }

    /// One of the family's shared queues.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds; every family has at least one.
    pub(crate) fn queue(&self, index: usize) -> &Arc<SubmitQueue> {
        &self.queues[index]
    }

    fn frame_slots(&self, frame: usize) -> Range<usize> {
        let width = self.frame_workers + 1;
        frame * width..(frame + 1) * width
    }

    fn async_slots(&self) -> Range<usize> {
        self.frames * (self.frame_workers + 1)..self.managers.len()
    }

    /// Populates `piece` into its manager slot on the calling thread.
    ///
    /// Fetches the slot's recording buffer, runs the process over a
    /// capability-checked facade, and fires the piece's population latch.
    /// The latch fires even when the process fails, so flushes never
    /// deadlock on a failed population.
    pub(crate) fn dispatch(&self, piece: &Arc<WorkPiece>) -> SchedulerResult<()> {
        let Some(slot) = piece.manager_index() else {
            return Err(SchedulerError::Configuration(
                "work piece reached an engine without an assigned manager slot".to_string(),
            ));
        };

        let handle = match self.managers[slot].populating(piece.clone()) {
            Ok(handle) => handle,
            Err(error) => {
                piece.population_completed();
                return Err(error);
            }
        };

        let manager = CommandListManager::new(handle, self.supported_engines);
        let result = piece.process().populate(manager);
        piece.population_completed();
        result
    }

    /// Frame-end flush of every slot belonging to `frame`: waits for all
    /// populations, then submits each slot's accumulated buffer.
    pub(crate) fn flush(&self, frame: usize) -> SchedulerResult<()> {
        for slot in self.frame_slots(frame) {
            self.managers[slot].wait_for_population();
        }
        for slot in self.frame_slots(frame) {
            self.managers[slot].submit_current(&[])?;
        }
        Ok(())
    }

    /// Frame-start retirement: waits out the previous use of `frame`'s slots
    /// and reaps the cross-frame async slots.
    pub(crate) fn wait_for_completion(&self, frame: usize) -> SchedulerResult<()> {
        for slot in self.frame_slots(frame) {
            self.managers[slot].wait_for_pendings()?;
        }
        for slot in self.async_slots() {
            self.managers[slot].clean()?;
        }
        Ok(())
    }

    /// Flags a slot as holding work an explicit flush must submit.
    pub(crate) fn mark_for_flush(&self, slot: usize) {
        self.marked[slot].store(true, Ordering::Release);
    }

    /// Submits every marked slot, waiting on `waiting_gpu`, and appends the
    /// resulting tasks to `tasks`.
    pub(crate) fn flush_marked(
        &self,
        waiting_gpu: &[GpuTask],
        tasks: &mut Vec<GpuTask>,
    ) -> SchedulerResult<()> {
        for (slot, marked) in self.marked.iter().enumerate() {
            if marked.swap(false, Ordering::AcqRel) {
                tasks.push(self.managers[slot].submit_current(waiting_gpu)?);
            }
        }
        Ok(())
    }
}
