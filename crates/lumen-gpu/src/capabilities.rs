//! What the selected physical device can do.

use std::ffi::CStr;

use ash::vk;
use hashbrown::HashSet;

/// PCI vendor of a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Device properties and optional features the renderer looks at.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub api_version: u32,

    /// Wireframe polygon mode.
    pub fill_mode_non_solid: bool,
    /// Line widths other than 1.0.
    pub wide_lines: bool,
    pub sampler_anisotropy: bool,
    pub max_sampler_anisotropy: f32,
    pub max_push_constants_size: u32,

    pub device_local_memory_mb: u64,
    pub extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let (properties, features, memory, extensions) = unsafe {
            (
                instance.get_physical_device_properties(physical_device),
                instance.get_physical_device_features(physical_device),
                instance.get_physical_device_memory_properties(physical_device),
                instance
                    .enumerate_device_extension_properties(physical_device)
                    .unwrap_or_default(),
            )
        };

        let device_name = properties
            .device_name_as_c_str()
            .map_or_else(|_| "<unknown>".to_string(), |name: &CStr| name.to_string_lossy().into_owned());

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            api_version: properties.api_version,
            fill_mode_non_solid: features.fill_mode_non_solid == vk::TRUE,
            wide_lines: features.wide_lines == vk::TRUE,
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
            max_sampler_anisotropy: properties.limits.max_sampler_anisotropy,
            max_push_constants_size: properties.limits.max_push_constants_size,
            device_local_memory_mb: device_local_bytes(&memory) / (1024 * 1024),
            extensions: extensions
                .iter()
                .filter_map(|ext| ext.extension_name_as_c_str().ok())
                .filter_map(|name| name.to_str().ok())
                .map(String::from)
                .collect(),
        }
    }

    /// True if the device reports at least Vulkan 1.3, needed for dynamic rendering.
    pub const fn has_vulkan_1_3(&self) -> bool {
        let major = vk::api_version_major(self.api_version);
        major > 1 || (major == 1 && vk::api_version_minor(self.api_version) >= 3)
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        name.to_str().is_ok_and(|name| self.extensions.contains(name))
    }

    /// Requirements the renderer has that this device misses. Empty when usable.
    pub fn missing_requirements(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.has_vulkan_1_3() {
            missing.push("Vulkan 1.3");
        }
        if !self.supports_extension(ash::khr::swapchain::NAME) {
            missing.push("VK_KHR_swapchain");
        }
        missing
    }

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

/// Total size of the device-local heaps.
pub fn device_local_bytes(memory: &vk::PhysicalDeviceMemoryProperties) -> u64 {
    memory
        .memory_heaps
        .iter()
        .take(memory.memory_heap_count as usize)
        .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
        .map(|heap| heap.size)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(api_version: u32, extensions: &[&str]) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Other(0),
            device_name: "test device".to_string(),
            api_version,
            fill_mode_non_solid: false,
            wide_lines: false,
            sampler_anisotropy: false,
            max_sampler_anisotropy: 1.0,
            max_push_constants_size: 128,
            device_local_memory_mb: 4096,
            extensions: extensions.iter().map(|e| (*e).to_string()).collect(),
        }
    }

    #[test]
    fn vendor_ids() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x106B), GpuVendor::Apple);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn requirements() {
        let v13 = vk::make_api_version(0, 1, 3, 250);
        assert!(device(v13, &["VK_KHR_swapchain"]).missing_requirements().is_empty());
        assert_eq!(device(v13, &[]).missing_requirements(), ["VK_KHR_swapchain"]);

        let v12 = vk::make_api_version(0, 1, 2, 0);
        assert_eq!(
            device(v12, &["VK_KHR_swapchain"]).missing_requirements(),
            ["Vulkan 1.3"]
        );
    }

    #[test]
    fn only_device_local_heaps_count() {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_heap_count: 2,
            ..Default::default()
        };
        memory.memory_heaps[0] = vk::MemoryHeap {
            size: 8 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        memory.memory_heaps[1] = vk::MemoryHeap {
            size: 16 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };
        // Heaps past the count are ignored.
        memory.memory_heaps[2] = memory.memory_heaps[0];
        assert_eq!(device_local_bytes(&memory), 8 << 30);
    }

    #[test]
    fn summary_mentions_version_and_memory() {
        let summary = device(vk::make_api_version(0, 1, 3, 250), &[]).summary();
        assert!(summary.contains("Vulkan 1.3.250"));
        assert!(summary.contains("4096 MB"));
    }
}
