//! Processes and the capability-checked manager facades they record through.
//!
//! A [`Process`] is the user's recorder: it declares the engines it needs and
//! populates a command buffer when the scheduler hands it a
//! [`CommandListManager`]. The manager facade is a thin view over a shared
//! command-list handle plus the capability mask of the queue family serving
//! it; [`CommandListManager::cast`] up-casts to a more specific view
//! ([`GraphicsManager`], [`TransferManager`], ...) after checking that the
//! slot actually supports everything the view can record.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::command_list::CommandListHandle;
use crate::engine::EngineType;
use crate::error::{SchedulerError, SchedulerResult};
use crate::presenter::RenderTarget;

/// A unit of command recording.
///
/// Implementations are shared between the dispatching caller and the worker
/// pool, hence `Send + Sync`.
pub trait Process: Send + Sync {
    /// Engines the recorded commands require.
    fn required_engines(&self) -> EngineType;

    /// Records commands through the given manager facade.
    ///
    /// Runs on whichever thread the dispatch mode selected.
    fn populate(&self, manager: CommandListManager) -> SchedulerResult<()>;
}

/// Checks that a slot supporting `supported` can serve a view requiring
/// `required`.
pub(crate) fn ensure_supports(
    supported: EngineType,
    required: EngineType,
) -> SchedulerResult<()> {
    if supported.supports(required) {
        Ok(())
    } else {
        Err(SchedulerError::CapabilityMismatch {
            required,
            supported,
        })
    }
}

/// The polymorphic facade handed to [`Process::populate`].
///
/// Carries the open command-list handle of the serving slot and that slot's
/// capability mask.
pub struct CommandListManager {
    handle: Arc<CommandListHandle>,
    engines: EngineType,
}

impl CommandListManager {
    pub(crate) fn new(handle: Arc<CommandListHandle>, engines: EngineType) -> Self {
        Self { handle, engines }
    }

    /// Engines the serving queue family supports.
    #[inline]
    pub fn engines(&self) -> EngineType {
        self.engines
    }

    /// Up-casts to a more capable view.
    ///
    /// # Errors
    ///
    /// Fails with [`SchedulerError::CapabilityMismatch`] when the serving
    /// slot does not support every engine the view records through.
    pub fn cast<T: ManagerView>(&self) -> SchedulerResult<T> {
        ensure_supports(self.engines, T::REQUIRED)?;
        Ok(T::from_handle(self.handle.clone()))
    }
}

/// A typed view over a command-list handle.
///
/// Each view names the engine set it records through; casting checks that
/// set against the serving slot.
pub trait ManagerView: Sized {
    /// Engines this view's recording methods require.
    const REQUIRED: EngineType;

    /// Wraps the shared handle. Called only after the capability check.
    fn from_handle(handle: Arc<CommandListHandle>) -> Self;
}

/// Copy/upload recording view.
pub struct TransferManager {
    #[allow(dead_code)]
    handle: Arc<CommandListHandle>,
}

impl ManagerView for TransferManager {
    const REQUIRED: EngineType = EngineType::TRANSFER;

    fn from_handle(handle: Arc<CommandListHandle>) -> Self {
        Self { handle }
    }
}

/// Compute recording view on a family that also does transfers.
pub struct ComputeManager {
    #[allow(dead_code)]
    handle: Arc<CommandListHandle>,
}

impl ManagerView for ComputeManager {
    const REQUIRED: EngineType = EngineType::COMPUTE.union(EngineType::TRANSFER);

    fn from_handle(handle: Arc<CommandListHandle>) -> Self {
        Self { handle }
    }
}

/// Compute recording view for compute-only families.
pub struct ComputeExclusiveManager {
    #[allow(dead_code)]
    handle: Arc<CommandListHandle>,
}

impl ManagerView for ComputeExclusiveManager {
    const REQUIRED: EngineType = EngineType::COMPUTE;

    fn from_handle(handle: Arc<CommandListHandle>) -> Self {
        Self { handle }
    }
}

/// Graphics recording view.
pub struct GraphicsManager {
    handle: Arc<CommandListHandle>,
}

impl ManagerView for GraphicsManager {
    const REQUIRED: EngineType = EngineType::GRAPHICS
        .union(EngineType::COMPUTE)
        .union(EngineType::TRANSFER);

    fn from_handle(handle: Arc<CommandListHandle>) -> Self {
        Self { handle }
    }
}

impl GraphicsManager {
    /// Records a clear of `target` to the given RGBA color.
    ///
    /// # Errors
    ///
    /// Fails if the underlying buffer is not recording.
    pub fn clear(&self, target: &RenderTarget, color: [f32; 4]) -> SchedulerResult<()> {
        self.handle
            .record_clear_color(target.image(), target.subresource_range(), color)
    }
}

/// Ray-tracing recording view. Rides on graphics-capable families.
pub struct RaytracingManager {
    #[allow(dead_code)]
    handle: Arc<CommandListHandle>,
}

impl ManagerView for RaytracingManager {
    const REQUIRED: EngineType = EngineType::RAYTRACING
        .union(EngineType::GRAPHICS)
        .union(EngineType::COMPUTE)
        .union(EngineType::TRANSFER);

    fn from_handle(handle: Arc<CommandListHandle>) -> Self {
        Self { handle }
    }
}

/// A process defined by a closure over a typed manager view.
///
/// The required engine set is the view's; the closure runs with the facade
/// already cast.
pub struct FnProcess<T, F> {
    record: F,
    _view: PhantomData<fn() -> T>,
}

impl<T, F> FnProcess<T, F>
where
    T: ManagerView,
    F: Fn(T) -> SchedulerResult<()> + Send + Sync,
{
    /// Wraps `record` as a process requiring `T::REQUIRED`.
    pub fn new(record: F) -> Self {
        Self {
            record,
            _view: PhantomData,
        }
    }
}

impl<T, F> Process for FnProcess<T, F>
where
    T: ManagerView,
    F: Fn(T) -> SchedulerResult<()> + Send + Sync,
{
    fn required_engines(&self) -> EngineType {
        T::REQUIRED
    }

    fn populate(&self, manager: CommandListManager) -> SchedulerResult<()> {
        (self.record)(manager.cast::<T>()?)
    }
}

/// A process that records nothing and requires no engines.
///
/// Shutdown dispatches one of these per worker to drain the consume loops.
pub(crate) struct NoOpProcess;

impl Process for NoOpProcess {
    fn required_engines(&self) -> EngineType {
        EngineType::empty()
    }

    fn populate(&self, _manager: CommandListManager) -> SchedulerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_masks_match_their_engines() {
        assert_eq!(TransferManager::REQUIRED, EngineType::TRANSFER);
        assert_eq!(
            ComputeManager::REQUIRED,
            EngineType::COMPUTE | EngineType::TRANSFER
        );
        assert_eq!(ComputeExclusiveManager::REQUIRED, EngineType::COMPUTE);
        assert_eq!(
            GraphicsManager::REQUIRED,
            EngineType::GRAPHICS | EngineType::COMPUTE | EngineType::TRANSFER
        );
        assert!(RaytracingManager::REQUIRED.contains(EngineType::GRAPHICS));
    }

    #[test]
    fn test_cast_check_accepts_supersets() {
        let family = EngineType::GRAPHICS | EngineType::COMPUTE | EngineType::TRANSFER;
        assert!(ensure_supports(family, GraphicsManager::REQUIRED).is_ok());
        assert!(ensure_supports(family, TransferManager::REQUIRED).is_ok());
    }

    #[test]
    fn test_cast_check_rejects_missing_engines() {
        let transfer_family = EngineType::TRANSFER;
        let err = ensure_supports(transfer_family, GraphicsManager::REQUIRED).unwrap_err();
        match err {
            SchedulerError::CapabilityMismatch {
                required,
                supported,
            } => {
                assert_eq!(required, GraphicsManager::REQUIRED);
                assert_eq!(supported, transfer_family);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_fn_process_requires_view_engines() {
        let process = FnProcess::new(|_manager: GraphicsManager| Ok(()));
        assert_eq!(process.required_engines(), GraphicsManager::REQUIRED);
    }

    #[test]
    fn test_noop_process_requires_nothing() {
        assert_eq!(NoOpProcess.required_engines(), EngineType::empty());
    }
}
