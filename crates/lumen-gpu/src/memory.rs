//! Device memory allocation.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// Where a buffer or image lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryUsage {
    /// Host visible, coherent and persistently mapped. Written by the CPU every frame.
    HostVisibleMapped,
    /// Device local, not accessible by the CPU.
    DeviceLocal,
}

impl MemoryUsage {
    /// The gpu-allocator location backing this usage.
    pub const fn location(self) -> MemoryLocation {
        match self {
            Self::HostVisibleMapped => MemoryLocation::CpuToGpu,
            Self::DeviceLocal => MemoryLocation::GpuOnly,
        }
    }
}

/// gpu-allocator behind a device handle. Empty after [`GpuAllocator::shutdown`].
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
}

impl GpuAllocator {
    /// Create an allocator for `device`.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                ..Default::default()
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
        })
    }

    /// Allocate memory for `requirements` and bind it with `bind`, freeing it again if binding fails.
    fn allocate_bound(
        &mut self,
        requirements: vk::MemoryRequirements,
        memory: MemoryUsage,
        linear: bool,
        name: &str,
        bind: impl FnOnce(&ash::Device, &Allocation) -> std::result::Result<(), vk::Result>,
    ) -> Result<Allocation> {
        let allocator = self
            .allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator already shut down".to_string()))?;
        let allocation = allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: memory.location(),
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GpuError::AllocationFailed(format!("{name}: {e}")))?;

        match bind(&self.device, &allocation) {
            Ok(()) => Ok(allocation),
            Err(e) => {
                self.free(allocation);
                Err(GpuError::call("binding memory failed", e, name))
            }
        }
    }

    /// Create a buffer backed by freshly allocated memory.
    pub fn allocate_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory: MemoryUsage,
        name: &str,
    ) -> Result<(vk::Buffer, Allocation)> {
        let info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { self.device.create_buffer(&info, None) }
            .map_err(|e| GpuError::call("vkCreateBuffer failed", e, name))?;
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        self.allocate_bound(requirements, memory, true, name, |device, allocation| unsafe {
            device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        })
        .map(|allocation| (buffer, allocation))
        .inspect_err(|_| unsafe { self.device.destroy_buffer(buffer, None) })
    }

    /// Create an image backed by freshly allocated memory.
    pub fn allocate_image(
        &mut self,
        info: &vk::ImageCreateInfo,
        memory: MemoryUsage,
        name: &str,
    ) -> Result<(vk::Image, Allocation)> {
        let image = unsafe { self.device.create_image(info, None) }
            .map_err(|e| GpuError::call("vkCreateImage failed", e, name))?;
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let linear = info.tiling == vk::ImageTiling::LINEAR;

        self.allocate_bound(requirements, memory, linear, name, |device, allocation| unsafe {
            device.bind_image_memory(image, allocation.memory(), allocation.offset())
        })
        .map(|allocation| (image, allocation))
        .inspect_err(|_| unsafe { self.device.destroy_image(image, None) })
    }

    /// Return an allocation to the allocator. Failures are logged.
    pub fn free(&mut self, allocation: Allocation) {
        match self.allocator.as_mut() {
            Some(allocator) => {
                if let Err(e) = allocator.free(allocation) {
                    tracing::error!("Failed to free GPU allocation: {e}");
                }
            }
            None => tracing::warn!("Allocation freed after allocator shutdown"),
        }
    }

    /// Release all GPU memory. Call before the device is destroyed; live allocations are reported as leaks.
    pub fn shutdown(&mut self) {
        self.allocator = None;
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
