//! Instance, device and queue setup.

use crate::capabilities::GpuCapabilities;
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use ash::vk;
use parking_lot::Mutex;
use std::ffi::CString;
use std::sync::Arc;

/// Queue a command buffer is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueType {
    Graphics,
    Compute,
    Transfer,
}

/// Queue family index for every [`QueueType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilies {
    /// Pick families from `families`, preferring dedicated compute and transfer families.
    ///
    /// Compute falls back to the graphics family and transfer to the compute family.
    pub fn select(families: &[vk::QueueFamilyProperties]) -> Result<Self> {
        let first = |wanted: vk::QueueFlags, excluded: vk::QueueFlags| {
            (0u32..)
                .zip(families)
                .find(|(_, family)| {
                    family.queue_count > 0
                        && family.queue_flags.contains(wanted)
                        && !family.queue_flags.intersects(excluded)
                })
                .map(|(index, _)| index)
        };

        let graphics = first(vk::QueueFlags::GRAPHICS, vk::QueueFlags::empty())
            .ok_or(GpuError::NoSuitableDevice)?;
        let compute = first(vk::QueueFlags::COMPUTE, vk::QueueFlags::GRAPHICS).unwrap_or(graphics);
        let transfer = first(
            vk::QueueFlags::TRANSFER,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )
        .unwrap_or(compute);

        Ok(Self {
            graphics,
            compute,
            transfer,
        })
    }

    pub const fn get(&self, queue_type: QueueType) -> u32 {
        match queue_type {
            QueueType::Graphics => self.graphics,
            QueueType::Compute => self.compute,
            QueueType::Transfer => self.transfer,
        }
    }

    /// Distinct family indices, each created with one queue.
    fn unique(&self) -> Vec<u32> {
        let mut unique = vec![self.graphics];
        for family in [self.compute, self.transfer] {
            if !unique.contains(&family) {
                unique.push(family);
            }
        }
        unique
    }
}

/// Instance, device, allocator and queues. Destroys the device and instance on drop.
pub struct GpuContext {
    // Keeps the Vulkan library loaded
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: Arc<Mutex<GpuAllocator>>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    families: QueueFamilies,
    // Indexed by `QueueType as usize`
    queues: [vk::Queue; 3],
}

impl GpuContext {
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the device, held by wrappers that destroy themselves on drop.
    pub fn shared_device(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub const fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    pub const fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub const fn allocator(&self) -> &Arc<Mutex<GpuAllocator>> {
        &self.allocator
    }

    /// Debug utils device loader, present when validation was requested and available.
    pub const fn debug_utils(&self) -> Option<&ash::ext::debug_utils::Device> {
        self.debug_utils.as_ref()
    }

    pub const fn queue(&self, queue_type: QueueType) -> vk::Queue {
        self.queues[queue_type as usize]
    }

    pub const fn queue_family(&self, queue_type: QueueType) -> u32 {
        self.families.get(queue_type)
    }

    pub const fn queue_families(&self) -> &QueueFamilies {
        &self.families
    }

    /// Queue frames are submitted and presented on.
    pub const fn graphics_queue(&self) -> vk::Queue {
        self.queue(QueueType::Graphics)
    }

    /// Attach a debug name to a Vulkan object.
    ///
    /// Does nothing when debug utils are unavailable. Naming failures are logged, not returned.
    pub fn set_debug_name<H: vk::Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            tracing::warn!("Debug name {name:?} contains a NUL byte");
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::default()
            .object_handle(handle)
            .object_name(&name);
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
            tracing::warn!("Failed to name object {name:?}: {e}");
        }
    }

    /// Block until every queue is idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| GpuError::call("vkDeviceWaitIdle failed", e, ""))
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            // Allocations must be released while the device still exists.
            self.allocator.lock().shutdown();
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for a [`GpuContext`].
pub struct GpuContextBuilder {
    app_name: String,
    validation: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Lumen".to_string(),
            validation: cfg!(debug_assertions),
        }
    }
}

impl GpuContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Request the Khronos validation layer and debug utils (object names, labels).
    #[must_use]
    pub const fn validation(mut self, enable: bool) -> Self {
        self.validation = enable;
        self
    }

    /// Load Vulkan, pick the best device and create it with one queue per distinct family.
    pub fn build(self) -> Result<GpuContext> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;
        let (instance, debug_utils_enabled) =
            unsafe { create_instance(&entry, &self.app_name, self.validation) }?;
        let physical_device = unsafe { select_physical_device(&instance) }?;

        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };
        let missing = capabilities.missing_requirements();
        if !missing.is_empty() {
            tracing::error!("{} lacks {}", capabilities.device_name, missing.join(", "));
            unsafe { instance.destroy_instance(None) };
            return Err(GpuError::NoSuitableDevice);
        }
        tracing::info!("Selected GPU: {}", capabilities.summary());

        let family_properties =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let families = QueueFamilies::select(&family_properties)?;
        tracing::debug!("Queue families: {families:?}");

        let device = unsafe { create_device(&instance, physical_device, &capabilities, &families) }?;
        let queues = [QueueType::Graphics, QueueType::Compute, QueueType::Transfer]
            .map(|queue_type| unsafe { device.get_device_queue(families.get(queue_type), 0) });
        let device = Arc::new(device);

        let allocator = unsafe { GpuAllocator::new(&instance, Arc::clone(&device), physical_device) }?;
        let debug_utils =
            debug_utils_enabled.then(|| ash::ext::debug_utils::Device::new(&instance, &device));

        Ok(GpuContext {
            entry,
            instance,
            physical_device,
            device,
            capabilities,
            allocator: Arc::new(Mutex::new(allocator)),
            debug_utils,
            families,
            queues,
        })
    }
}

/// Create the logical device with the swapchain extension, dynamic rendering
/// and whichever optional features the device has.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    capabilities: &GpuCapabilities,
    families: &QueueFamilies,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(&priorities)
        })
        .collect();

    let extensions = [ash::khr::swapchain::NAME.as_ptr()];

    let features = vk::PhysicalDeviceFeatures::default()
        .fill_mode_non_solid(capabilities.fill_mode_non_solid)
        .wide_lines(capabilities.wide_lines)
        .sampler_anisotropy(capabilities.sampler_anisotropy);
    let mut vulkan_1_3 = vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_3);

    let info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extensions)
        .push_next(&mut features2);

    unsafe { instance.create_device(physical_device, &info, None) }
        .map_err(|e| GpuError::call("vkCreateDevice failed", e, ""))
}
