//! User-facing completion handles.
//!
//! - [`CpuTask`] resolves when a dispatched process has finished *recording*
//!   its commands (population), on whichever thread handled it.
//! - [`GpuTask`] resolves when a submitted batch has finished *executing* on
//!   the device. GPU tasks form trees: [`GpuTask::combine`] unions several
//!   tasks into one that resolves when all of them have.
//!
//! A GPU task backed by a submission owns the timeline semaphore that the
//! submission signals; union tasks own no semaphore of their own.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ash::vk;

use cadence_rhi::sync::TimelineSemaphore;

use crate::error::SchedulerResult;
use crate::work::{WorkPiece, WorkPieceState};

/// Timeline value a submission signals on completion.
pub(crate) const SUBMIT_SIGNAL_VALUE: u64 = 1;

/// Handle for "population finished".
///
/// Cheap to clone; all clones wait on the same work piece.
#[derive(Clone)]
pub struct CpuTask {
    piece: Arc<WorkPiece>,
}

impl CpuTask {
    pub(crate) fn new(piece: Arc<WorkPiece>) -> Self {
        Self { piece }
    }

    pub(crate) fn piece(&self) -> &Arc<WorkPiece> {
        &self.piece
    }

    /// Blocks until the dispatched process has finished recording.
    pub fn wait(&self) {
        self.piece.wait_for_population();
    }

    /// Whether population has already completed, without blocking.
    pub fn finished(&self) -> bool {
        self.piece.state() != WorkPieceState::Dispatched
    }
}

struct GpuTaskInner {
    /// Signalled by the submission this task tracks; `None` for unions and
    /// trivially-finished tasks.
    semaphore: Option<TimelineSemaphore>,
    /// Unfinished tasks this union is waiting on.
    children: Vec<GpuTask>,
    finished: AtomicBool,
}

/// Handle for "submission finished on the device".
///
/// Cheap to clone; all clones observe the same completion state.
#[derive(Clone)]
pub struct GpuTask {
    inner: Arc<GpuTaskInner>,
}

impl GpuTask {
    /// A task that is already finished.
    ///
    /// Returned wherever a submission turned out to be empty.
    pub fn completed() -> Self {
        Self {
            inner: Arc::new(GpuTaskInner {
                semaphore: None,
                children: Vec::new(),
                finished: AtomicBool::new(true),
            }),
        }
    }

    /// A task tracking one submission through its timeline semaphore.
    pub(crate) fn from_semaphore(semaphore: TimelineSemaphore) -> Self {
        Self {
            inner: Arc::new(GpuTaskInner {
                semaphore: Some(semaphore),
                children: Vec::new(),
                finished: AtomicBool::new(false),
            }),
        }
    }

    /// Unions several tasks into one.
    ///
    /// Already-finished inputs are dropped; the union is finished from the
    /// start iff every input was.
    pub fn combine(tasks: &[GpuTask]) -> GpuTask {
        let children: Vec<GpuTask> = tasks.iter().filter(|t| !t.finished()).cloned().collect();
        let finished = children.is_empty();

        Self {
            inner: Arc::new(GpuTaskInner {
                semaphore: None,
                children,
                finished: AtomicBool::new(finished),
            }),
        }
    }

    /// Whether the tracked work is known to have completed.
    #[inline]
    pub fn finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// Blocks until the tracked submission (and every child) has completed
    /// on the device, then latches `finished` so later waits are free.
    ///
    /// # Errors
    ///
    /// Returns an error if the semaphore wait fails.
    pub fn wait(&self) -> SchedulerResult<()> {
        if self.finished() {
            return Ok(());
        }

        if let Some(semaphore) = &self.inner.semaphore {
            semaphore.wait(SUBMIT_SIGNAL_VALUE)?;
        }

        for child in &self.inner.children {
            child.wait()?;
        }

        self.inner.finished.store(true, Ordering::Release);
        Ok(())
    }

    /// Marks the task finished without waiting.
    ///
    /// Called by the queue managers once they have host-waited the
    /// submission semaphore themselves.
    pub(crate) fn mark_finished(&self) {
        self.inner.finished.store(true, Ordering::Release);
    }

    /// The native semaphore backing this task, if any.
    pub(crate) fn semaphore_handle(&self) -> Option<vk::Semaphore> {
        self.inner.semaphore.as_ref().map(|s| s.handle())
    }

    /// Collects the native semaphores a submission must wait on, depth
    /// first, skipping finished subtrees. Duplicates are legal wait
    /// conditions and are not removed.
    pub(crate) fn collect_wait_semaphores(&self, out: &mut Vec<vk::Semaphore>) {
        if self.finished() {
            return;
        }

        if let Some(semaphore) = &self.inner.semaphore {
            out.push(semaphore.handle());
        }

        for child in &self.inner.children {
            if !child.finished() {
                child.collect_wait_semaphores(out);
            }
        }
    }

    /// Number of live handles to this task, the scheduler's own included.
    pub(crate) fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// A semaphore-less pending task, for exercising union logic off-device.
    #[cfg(test)]
    pub(crate) fn pending_for_test() -> Self {
        Self {
            inner: Arc::new(GpuTaskInner {
                semaphore: None,
                children: Vec::new(),
                finished: AtomicBool::new(false),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_task_is_finished() {
        let task = GpuTask::completed();
        assert!(task.finished());
        task.wait().unwrap();
    }

    #[test]
    fn test_union_of_finished_tasks_is_finished() {
        let union = GpuTask::combine(&[GpuTask::completed(), GpuTask::completed()]);
        assert!(union.finished());
    }

    #[test]
    fn test_union_with_pending_child_is_unfinished() {
        let pending = GpuTask::pending_for_test();
        let union = GpuTask::combine(&[GpuTask::completed(), pending.clone()]);
        assert!(!union.finished());

        // Once the pending child resolves, waiting the union latches it.
        pending.mark_finished();
        union.wait().unwrap();
        assert!(union.finished());
    }

    #[test]
    fn test_union_of_empty_list_is_finished() {
        assert!(GpuTask::combine(&[]).finished());
    }

    #[test]
    fn test_union_drops_finished_inputs() {
        let pending = GpuTask::pending_for_test();
        let union = GpuTask::combine(&[GpuTask::completed(), pending.clone()]);
        assert_eq!(union.inner.children.len(), 1);
    }

    #[test]
    fn test_nested_unions_propagate_finished() {
        let a = GpuTask::pending_for_test();
        let b = GpuTask::pending_for_test();
        let inner = GpuTask::combine(&[a.clone(), b.clone()]);
        let outer = GpuTask::combine(&[inner.clone(), GpuTask::completed()]);

        assert!(!outer.finished());
        a.mark_finished();
        b.mark_finished();
        outer.wait().unwrap();
        assert!(outer.finished());
    }

    #[test]
    fn test_collect_skips_finished_subtrees() {
        let pending = GpuTask::pending_for_test();
        let finished = GpuTask::completed();
        let union = GpuTask::combine(&[pending.clone(), finished]);

        let mut semaphores = Vec::new();
        union.collect_wait_semaphores(&mut semaphores);
        // The pending test task owns no native semaphore, but the traversal
        // must not early-out before visiting it.
        assert!(semaphores.is_empty());
    }

    #[test]
    fn test_handle_count_tracks_clones() {
        let task = GpuTask::completed();
        assert_eq!(task.handle_count(), 1);
        let clone = task.clone();
        assert_eq!(task.handle_count(), 2);
        drop(clone);
        assert_eq!(task.handle_count(), 1);
    }
}
