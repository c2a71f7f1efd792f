//! GPU capability detection.

use ash::vk;
use hashbrown::HashSet;
use std::ffi::CStr;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    /// Vulkan API version
    pub api_version: u32,
    pub driver_version: u32,

    /// Buffer device address support
    pub supports_buffer_device_address: bool,
    /// `VK_KHR_swapchain` is available
    pub supports_swapchain: bool,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    /// Maximum memory allocation count
    pub max_memory_allocation_count: u32,
    /// Alignment for flushes of non-coherent memory
    pub non_coherent_atom_size: u64,

    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();
        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let mut features_12 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features = vk::PhysicalDeviceFeatures2::default().push_next(&mut features_12);
        if vk::api_version_minor(properties.api_version) >= 2 {
            instance.get_physical_device_features2(physical_device, &mut features);
        }
        let supports_buffer_device_address = features_12.buffer_device_address == vk::TRUE;

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        let supports_swapchain = extensions.iter().any(|ext| {
            ext.extension_name_as_c_str()
                .is_ok_and(|name| name == ash::khr::swapchain::NAME)
        });

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name: properties
                .device_name_as_c_str()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            supports_buffer_device_address,
            supports_swapchain,
            device_local_memory_mb,
            max_memory_allocation_count: properties.limits.max_memory_allocation_count,
            non_coherent_atom_size: properties.limits.non_coherent_atom_size,
            available_extensions,
        }
    }

    /// Check if the GPU meets minimum requirements for the renderer.
    pub fn meets_requirements(&self) -> bool {
        let api_major = vk::api_version_major(self.api_version);
        let api_minor = vk::api_version_minor(self.api_version);

        // Vulkan 1.2 for core buffer device address
        if api_major < 1 || (api_major == 1 && api_minor < 2) {
            return false;
        }

        self.supports_buffer_device_address
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::score_device;

    fn capabilities(api_version: u32, device_type: vk::PhysicalDeviceType) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Other(0),
            device_name: "test".to_string(),
            device_type,
            api_version,
            driver_version: 0,
            supports_buffer_device_address: true,
            supports_swapchain: true,
            device_local_memory_mb: 4096,
            max_memory_allocation_count: 4096,
            non_coherent_atom_size: 64,
            available_extensions: HashSet::new(),
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn requires_vulkan_1_2_and_device_address() {
        let integrated = vk::PhysicalDeviceType::INTEGRATED_GPU;
        assert!(capabilities(vk::API_VERSION_1_2, integrated).meets_requirements());
        assert!(capabilities(vk::API_VERSION_1_3, integrated).meets_requirements());
        assert!(!capabilities(vk::API_VERSION_1_1, integrated).meets_requirements());

        let mut caps = capabilities(vk::API_VERSION_1_3, integrated);
        caps.supports_buffer_device_address = false;
        assert!(!caps.meets_requirements());
    }

    #[test]
    fn discrete_gpus_score_highest() {
        let discrete = capabilities(vk::API_VERSION_1_2, vk::PhysicalDeviceType::DISCRETE_GPU);
        let mut integrated =
            capabilities(vk::API_VERSION_1_2, vk::PhysicalDeviceType::INTEGRATED_GPU);
        integrated.device_local_memory_mb = 64 * 1024;
        assert!(score_device(&discrete) > score_device(&integrated));
    }
}
