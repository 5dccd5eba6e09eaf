//! Physical device (GPU) selection and queue-family enumeration.
//!
//! The scheduler maps engine capability masks onto arbitrary queue families,
//! so selection captures the *full* family table of the chosen GPU rather
//! than a handful of pre-picked indices: for each family its flags, its queue
//! count, and whether it can present to the target surface.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::RhiError;

/// One queue family of the selected physical device.
#[derive(Clone, Copy, Debug)]
pub struct QueueFamily {
    /// Family index as reported by the driver.
    pub index: u32,
    /// Operations the family supports.
    pub flags: vk::QueueFlags,
    /// Number of queues the family exposes.
    pub queue_count: u32,
    /// Whether queues of this family can present to the selected surface.
    pub present_support: bool,
}

/// Information about the selected physical device (GPU).
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle.
    pub device: vk::PhysicalDevice,
    /// Device properties (name, limits, API version, etc.).
    pub properties: vk::PhysicalDeviceProperties,
    /// The complete queue-family table of the device.
    pub families: Vec<QueueFamily>,
}

impl PhysicalDeviceInfo {
    /// Returns the device name as a string.
    pub fn device_name(&self) -> &str {
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    /// Returns a human-readable string for the device type.
    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    /// Returns the Vulkan API version supported by the device.
    pub fn api_version(&self) -> (u32, u32, u32) {
        let version = self.properties.api_version;
        (
            vk::api_version_major(version),
            vk::api_version_minor(version),
            vk::api_version_patch(version),
        )
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, minor, patch) = self.api_version();
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field("api_version", &format!("{}.{}.{}", major, minor, patch))
            .field("families", &self.families)
            .finish()
    }
}

/// Selects a discrete GPU and enumerates its queue families.
///
/// The scheduler targets dedicated hardware; if no discrete GPU is present
/// selection fails with [`RhiError::NoDiscreteGpu`].
///
/// # Arguments
///
/// * `instance` - The Vulkan instance
/// * `surface` - The window surface used for present-support queries
/// * `surface_loader` - The surface extension loader
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Result<PhysicalDeviceInfo, RhiError> {
    let devices = unsafe { instance.enumerate_physical_devices()? };

    if devices.is_empty() {
        warn!("No Vulkan-capable GPUs found");
        return Err(RhiError::NoDiscreteGpu);
    }

    info!("Found {} GPU(s)", devices.len());

    for device in devices {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe {
            CStr::from_ptr(properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown")
        };

        if properties.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
            debug!("GPU '{}' skipped: not a discrete GPU", name);
            continue;
        }

        let families = enumerate_queue_families(instance, device, surface, surface_loader);
        let info = PhysicalDeviceInfo {
            device,
            properties,
            families,
        };

        let (major, minor, patch) = info.api_version();
        info!(
            "Selected GPU: '{}' ({}) - Vulkan {}.{}.{}, {} queue families",
            info.device_name(),
            info.device_type_name(),
            major,
            minor,
            patch,
            info.families.len()
        );

        return Ok(info);
    }

    warn!("No discrete GPU found");
    Err(RhiError::NoDiscreteGpu)
}

/// Builds the queue-family table for a device.
fn enumerate_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Vec<QueueFamily> {
    let properties = unsafe { instance.get_physical_device_queue_family_properties(device) };

    properties
        .iter()
        .enumerate()
        .map(|(i, family)| {
            let index = i as u32;
            let present_support = surface != vk::SurfaceKHR::null()
                && unsafe {
                    surface_loader
                        .get_physical_device_surface_support(device, index, surface)
                        .unwrap_or(false)
                };

            debug!(
                "Queue family {}: {:?}, {} queue(s), present: {}",
                index, family.queue_flags, family.queue_count, present_support
            );

            QueueFamily {
                index,
                flags: family.queue_flags,
                queue_count: family.queue_count,
                present_support,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with_type(device_type: vk::PhysicalDeviceType) -> PhysicalDeviceInfo {
        PhysicalDeviceInfo {
            device: vk::PhysicalDevice::null(),
            properties: vk::PhysicalDeviceProperties {
                device_type,
                ..Default::default()
            },
            families: vec![],
        }
    }

    #[test]
    fn test_device_type_names() {
        assert_eq!(
            info_with_type(vk::PhysicalDeviceType::DISCRETE_GPU).device_type_name(),
            "Discrete GPU"
        );
        assert_eq!(
            info_with_type(vk::PhysicalDeviceType::CPU).device_type_name(),
            "CPU"
        );
    }

    #[test]
    fn test_api_version_unpacking() {
        let mut info = info_with_type(vk::PhysicalDeviceType::DISCRETE_GPU);
        info.properties.api_version = vk::make_api_version(0, 1, 3, 250);
        assert_eq!(info.api_version(), (1, 3, 250));
    }
}
