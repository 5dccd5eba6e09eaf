//! Vulkan logical device and queue retrieval.
//!
//! The logical device is created with queues for *every* family the GPU
//! exposes, up to a caller-supplied cap per family. The scheduler spreads its
//! command-queue managers across those queues, so unlike a classic renderer
//! there is no single "graphics queue" — callers address queues as
//! `(family index, queue index)` pairs.
//!
//! Timeline semaphores back the scheduler's GPU-completion handles, so the
//! `timelineSemaphore` feature is always enabled.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::error::RhiError;
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamily};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
///
/// Shared across threads via `Arc`; every Vulkan object wrapper in the
/// workspace holds one of these so destruction order falls out of `Drop`.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// Queue-family table of the physical device.
    families: Vec<QueueFamily>,
    /// Number of queues actually created per family.
    created_queue_counts: Vec<u32>,
}

impl Device {
    /// Creates a new logical device.
    ///
    /// For each queue family, `min(family.queue_count, max_queues_per_family)`
    /// queues are created at equal priority.
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `physical_device_info` - The selected physical device
    /// * `max_queues_per_family` - Upper bound of queues per family, normally
    ///   `1 + frame_threads + async_threads`
    ///
    /// # Errors
    ///
    /// Returns an error if device creation fails.
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
        max_queues_per_family: u32,
    ) -> Result<Arc<Self>, RhiError> {
        let families = physical_device_info.families.clone();

        let created_queue_counts: Vec<u32> = families
            .iter()
            .map(|family| family.queue_count.min(max_queues_per_family).max(1))
            .collect();

        let priorities = vec![1.0f32; max_queues_per_family.max(1) as usize];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .iter()
            .zip(&created_queue_counts)
            .map(|(family, &count)| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family.index)
                    .queue_priorities(&priorities[..count as usize])
            })
            .collect();

        debug!(
            "Creating queues per family: {:?}",
            created_queue_counts
        );

        // Host-waitable submission semaphores need the timeline feature.
        let mut features_1_2 =
            vk::PhysicalDeviceVulkan12Features::default().timeline_semaphore(true);

        let features = vk::PhysicalDeviceFeatures::default();

        let extension_names: Vec<*const i8> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_2);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created ({} families, {} extension(s))",
            families.len(),
            DEVICE_EXTENSIONS.len()
        );

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            families,
            created_queue_counts,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the queue-family table.
    #[inline]
    pub fn families(&self) -> &[QueueFamily] {
        &self.families
    }

    /// Returns the number of queues created for `family_index`.
    #[inline]
    pub fn queue_count(&self, family_index: u32) -> u32 {
        self.created_queue_counts
            .get(family_index as usize)
            .copied()
            .unwrap_or(0)
    }

    /// Retrieves a device queue.
    ///
    /// `queue_index` must be below [`queue_count`](Self::queue_count) for the
    /// family; the driver does not validate this.
    #[inline]
    pub fn queue(&self, family_index: u32, queue_index: u32) -> vk::Queue {
        unsafe { self.device.get_device_queue(family_index, queue_index) }
    }

    /// Waits for the device to become idle.
    ///
    /// Blocks until all outstanding operations on all queues have completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                tracing::error!("Failed to wait for device idle during drop: {:?}", e);
            }
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
