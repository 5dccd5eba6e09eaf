//! Techniques: user-level groupings of load-time setup and per-frame
//! dispatch.
//!
//! A technique pairs an `on_load` initializer with an `on_dispatch` recorder
//! and talks to the scheduler through the `&Device` it receives. Techniques
//! typically dispatch one or more processes from `on_dispatch` and let the
//! frame loop flush them.

use crate::device::Device;
use crate::error::SchedulerResult;

/// A user-level rendering technique bound to a device.
pub trait Technique {
    /// Called once when the technique is loaded onto a device.
    fn on_load(&mut self, device: &Device) -> SchedulerResult<()>;

    /// Called every time the technique is dispatched, normally once per
    /// frame between `begin_frame` and `end_frame`.
    fn on_dispatch(&mut self, device: &Device) -> SchedulerResult<()>;
}

impl Device {
    /// Loads a technique, constructing it first if the slot is empty.
    ///
    /// Fires the technique's `on_load`. Re-loading an already-constructed
    /// technique fires `on_load` again without reconstructing it.
    ///
    /// # Errors
    ///
    /// Propagates errors from `on_load`.
    pub fn load_technique<T, F>(&self, slot: &mut Option<T>, create: F) -> SchedulerResult<()>
    where
        T: Technique,
        F: FnOnce() -> T,
    {
        slot.get_or_insert_with(create).on_load(self)
    }

    /// Fires a technique's `on_dispatch`.
    ///
    /// # Errors
    ///
    /// Propagates errors from `on_dispatch`.
    pub fn dispatch_technique<T: Technique>(&self, technique: &mut T) -> SchedulerResult<()> {
        technique.on_dispatch(self)
    }
}
