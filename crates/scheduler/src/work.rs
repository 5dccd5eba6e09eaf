//! Work pieces: the scheduler's unit of command recording.
//!
//! A work piece is created by `dispatch`, carried through population on some
//! thread, and retired when the command buffer it recorded into is submitted.
//! Its state only ever advances:
//!
//! ```text
//! Dispatched -> PopulationCompleted -> Submitted
//! ```
//!
//! The piece's latch fires at `PopulationCompleted`; that latch is what a
//! [`CpuTask`](crate::CpuTask) waits on.

use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::process::Process;
use crate::sync::Latch;

/// How a dispatched process gets populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Populated inline on the calling thread; submitted automatically at
    /// frame end.
    #[default]
    MainThread,
    /// Populated by a frame-scoped worker; submitted automatically at frame
    /// end.
    AsyncFrame,
    /// Populated by a cross-frame worker; survives frames and must be flushed
    /// explicitly by the caller.
    Async,
}

/// Lifecycle state of a work piece. Advances monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkPieceState {
    /// Created, not yet recorded.
    Dispatched,
    /// The process has finished recording into a command buffer.
    PopulationCompleted,
    /// The command buffer holding the recording was handed to a queue.
    Submitted,
}

/// One unit of command recording, shared between the dispatching caller, the
/// populating worker, and the owning command-queue manager.
pub(crate) struct WorkPiece {
    /// The user-supplied recorder. Held until submission.
    process: Arc<dyn Process>,
    mode: DispatchMode,
    /// Engine-manager index serving this piece; `None` marks a no-op piece
    /// with an empty engine mask (only the shutdown path creates these).
    engine_index: Option<usize>,
    /// Command-queue-manager slot, assigned once by whichever thread picks
    /// the piece up.
    manager_index: OnceLock<usize>,
    state: Mutex<WorkPieceState>,
    after_populated: Latch,
}

impl WorkPiece {
    pub(crate) fn new(
        process: Arc<dyn Process>,
        mode: DispatchMode,
        engine_index: Option<usize>,
    ) -> Arc<Self> {
        Arc::new(Self {
            process,
            mode,
            engine_index,
            manager_index: OnceLock::new(),
            state: Mutex::new(WorkPieceState::Dispatched),
            after_populated: Latch::new(),
        })
    }

    #[inline]
    pub(crate) fn process(&self) -> &Arc<dyn Process> {
        &self.process
    }

    #[inline]
    pub(crate) fn mode(&self) -> DispatchMode {
        self.mode
    }

    #[inline]
    pub(crate) fn engine_index(&self) -> Option<usize> {
        self.engine_index
    }

    #[inline]
    pub(crate) fn manager_index(&self) -> Option<usize> {
        self.manager_index.get().copied()
    }

    /// Records which manager slot owns this piece. Assigned exactly once,
    /// before the slot's populating list is touched.
    pub(crate) fn assign_manager(&self, index: usize) {
        if self.manager_index.set(index).is_err() {
            debug_assert_eq!(self.manager_index(), Some(index));
        }
    }

    pub(crate) fn state(&self) -> WorkPieceState {
        *self.state.lock()
    }

    /// Marks recording finished and fires the population latch.
    pub(crate) fn population_completed(&self) {
        {
            let mut state = self.state.lock();
            if *state == WorkPieceState::Dispatched {
                *state = WorkPieceState::PopulationCompleted;
            }
        }
        self.after_populated.done();
    }

    /// Marks the piece's command buffer as handed to a queue.
    pub(crate) fn mark_submitted(&self) {
        *self.state.lock() = WorkPieceState::Submitted;
    }

    /// Blocks until population has completed.
    pub(crate) fn wait_for_population(&self) {
        self.after_populated.wait();
    }
}

/// Computes the command-queue-manager slot for a piece.
///
/// Slots `frame * (frame_workers + 1) + w` belong to frame `frame`: `w = 0`
/// is the main thread and `w in 1..=frame_workers` are the frame workers.
/// The `async` slots start at `frames * (frame_workers + 1)` and are stable
/// across frames, so a cross-frame worker always records into the same slot.
pub(crate) fn manager_slot(
    mode: DispatchMode,
    frame_index: usize,
    frames: usize,
    frame_workers: usize,
    thread_index: usize,
) -> usize {
    match mode {
        DispatchMode::MainThread => {
            debug_assert_eq!(thread_index, 0);
            frame_index * (frame_workers + 1)
        }
        DispatchMode::AsyncFrame => {
            debug_assert!(thread_index >= 1 && thread_index <= frame_workers);
            frame_index * (frame_workers + 1) + thread_index
        }
        DispatchMode::Async => {
            debug_assert!(thread_index > frame_workers);
            (frames - 1) * (frame_workers + 1) + thread_index
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineType;
    use crate::error::SchedulerResult;
    use crate::process::CommandListManager;

    struct RecorderStub;

    impl Process for RecorderStub {
        fn required_engines(&self) -> EngineType {
            EngineType::GRAPHICS
        }

        fn populate(&self, _manager: CommandListManager) -> SchedulerResult<()> {
            Ok(())
        }
    }

    fn piece() -> Arc<WorkPiece> {
        WorkPiece::new(Arc::new(RecorderStub), DispatchMode::MainThread, Some(0))
    }

    #[test]
    fn test_state_advances_monotonically() {
        let piece = piece();
        assert_eq!(piece.state(), WorkPieceState::Dispatched);

        piece.population_completed();
        assert_eq!(piece.state(), WorkPieceState::PopulationCompleted);

        piece.mark_submitted();
        assert_eq!(piece.state(), WorkPieceState::Submitted);

        // A late population signal must not roll the state back.
        piece.population_completed();
        assert_eq!(piece.state(), WorkPieceState::Submitted);
    }

    #[test]
    fn test_wait_for_population_after_completion_returns() {
        let piece = piece();
        piece.population_completed();
        piece.wait_for_population();
        piece.wait_for_population();
    }

    #[test]
    fn test_manager_index_is_assigned_once() {
        let piece = piece();
        assert_eq!(piece.manager_index(), None);
        piece.assign_manager(3);
        assert_eq!(piece.manager_index(), Some(3));
    }

    #[test]
    fn test_main_thread_slot_tracks_frame() {
        assert_eq!(manager_slot(DispatchMode::MainThread, 0, 3, 2, 0), 0);
        assert_eq!(manager_slot(DispatchMode::MainThread, 2, 3, 2, 0), 6);
    }

    #[test]
    fn test_frame_worker_slots_interleave() {
        assert_eq!(manager_slot(DispatchMode::AsyncFrame, 1, 3, 2, 1), 4);
        assert_eq!(manager_slot(DispatchMode::AsyncFrame, 1, 3, 2, 2), 5);
    }

    #[test]
    fn test_async_slot_is_stable_across_frames() {
        // frames = 3, frame_workers = 2, async worker thread index 3:
        // the slot comes right after the 9 per-frame slots, independent of
        // the frame index.
        let slot = manager_slot(DispatchMode::Async, 0, 3, 2, 3);
        assert_eq!(slot, 9);
        for frame in 0..3 {
            assert_eq!(manager_slot(DispatchMode::Async, frame, 3, 2, 3), slot);
        }
        assert_eq!(manager_slot(DispatchMode::Async, 1, 3, 2, 4), 10);
    }

    #[test]
    fn test_no_workers_collapses_to_single_slot() {
        // With zero workers every main-thread piece of frame f lands in
        // slot f.
        for frame in 0..4 {
            assert_eq!(manager_slot(DispatchMode::MainThread, frame, 4, 0, 0), frame);
        }
    }
}
