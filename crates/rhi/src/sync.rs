//! Synchronization primitives for Vulkan.
//!
//! Two semaphore flavours are wrapped here:
//!
//! - [`Semaphore`] - a binary semaphore for queue-to-queue ordering, used for
//!   swapchain acquire/present gating.
//! - [`TimelineSemaphore`] - a host-waitable counter semaphore. Every
//!   scheduler submission signals one to value 1, which is what lets the CPU
//!   block on "this batch finished on the device" without fences.
//!
//! [`wait_all`] batches host waits over many timeline semaphores in a single
//! `vkWaitSemaphores` call, which the per-frame retirement step relies on.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Binary semaphore wrapper for GPU-to-GPU synchronization.
///
/// Immutable after creation and safe to share between threads.
pub struct Semaphore {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan semaphore handle.
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates a new binary semaphore in the unsignaled state.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created semaphore");

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed semaphore");
    }
}

/// Timeline semaphore wrapper.
///
/// Created at value 0; a queue submission signals it to a target value and
/// the host can wait for that value directly, making it the CPU-visible
/// completion marker for a submitted batch.
pub struct TimelineSemaphore {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan semaphore handle.
    semaphore: vk::Semaphore,
}

impl TimelineSemaphore {
    /// Creates a new timeline semaphore with initial value 0.
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);

        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };

        debug!("Created timeline semaphore");

        Ok(Self { device, semaphore })
    }

    /// Returns the Vulkan semaphore handle.
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Blocks until the semaphore reaches `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait(&self, value: u64) -> RhiResult<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);

        unsafe {
            self.device
                .handle()
                .wait_semaphores(&wait_info, u64::MAX)?;
        }
        Ok(())
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
        debug!("Destroyed timeline semaphore");
    }
}

/// Blocks until every listed timeline semaphore reaches `value`.
///
/// An empty list returns immediately.
///
/// # Errors
///
/// Returns an error if the wait fails.
pub fn wait_all(device: &Device, semaphores: &[vk::Semaphore], value: u64) -> RhiResult<()> {
    if semaphores.is_empty() {
        return Ok(());
    }

    let values = vec![value; semaphores.len()];
    let wait_info = vk::SemaphoreWaitInfo::default()
        .semaphores(semaphores)
        .values(&values);

    unsafe {
        device.handle().wait_semaphores(&wait_info, u64::MAX)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semaphores_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<TimelineSemaphore>();
    }
}
