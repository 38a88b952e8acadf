//! Vulkan instance creation and physical device selection.

use std::ffi::{c_char, CStr, CString};

use ash::vk;

use crate::capabilities::device_local_bytes;
use crate::error::{GpuError, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Instance extensions needed to present to a window on this platform.
pub fn required_instance_extensions() -> Vec<&'static CStr> {
    vec![
        ash::khr::surface::NAME,
        #[cfg(target_os = "windows")]
        ash::khr::win32_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::xlib_surface::NAME,
        #[cfg(target_os = "linux")]
        ash::khr::wayland_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::ext::metal_surface::NAME,
        #[cfg(target_os = "macos")]
        ash::khr::portability_enumeration::NAME,
    ]
}

/// Create a Vulkan 1.3 instance.
///
/// With `validation` the Khronos validation layer and `VK_EXT_debug_utils` are
/// enabled when present; anything missing is logged and skipped. Returns the
/// instance and whether debug utils ended up enabled.
///
/// # Safety
/// The entry must be a valid Vulkan entry point.
pub unsafe fn create_instance(
    entry: &ash::Entry,
    app_name: &str,
    validation: bool,
) -> Result<(ash::Instance, bool)> {
    let app_name = CString::new(app_name)
        .map_err(|_| GpuError::InvalidArgument("application name contains a NUL byte".into()))?;
    let version = vk::make_api_version(0, 0, 1, 0);
    let app_info = vk::ApplicationInfo::default()
        .application_name(&app_name)
        .application_version(version)
        .engine_name(c"Lumen")
        .engine_version(version)
        .api_version(vk::API_VERSION_1_3);

    let mut extensions: Vec<*const c_char> = required_instance_extensions()
        .into_iter()
        .map(CStr::as_ptr)
        .collect();
    let mut layers: Vec<*const c_char> = Vec::new();
    let mut debug_utils = false;

    if validation {
        let available = unsafe { entry.enumerate_instance_extension_properties(None) }
            .map_err(|e| GpuError::call("vkEnumerateInstanceExtensionProperties failed", e, ""))?;
        debug_utils = available
            .iter()
            .any(|props| props.extension_name_as_c_str().ok() == Some(ash::ext::debug_utils::NAME));
        if debug_utils {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        } else {
            tracing::warn!("VK_EXT_debug_utils not available, object names and labels are disabled");
        }

        let available = unsafe { entry.enumerate_instance_layer_properties() }
            .map_err(|e| GpuError::call("vkEnumerateInstanceLayerProperties failed", e, ""))?;
        if available
            .iter()
            .any(|props| props.layer_name_as_c_str().ok() == Some(VALIDATION_LAYER))
        {
            layers.push(VALIDATION_LAYER.as_ptr());
        } else {
            tracing::warn!("Validation layer {VALIDATION_LAYER:?} not available");
        }
    }

    // MoltenVK is a portability implementation
    let flags = if cfg!(target_os = "macos") {
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    };

    let info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers)
        .flags(flags);

    let instance = unsafe { entry.create_instance(&info, None) }
        .map_err(|e| GpuError::call("vkCreateInstance failed", e, ""))?;
    Ok((instance, debug_utils))
}

/// Pick the highest scoring physical device.
///
/// # Safety
/// The instance must be valid.
pub unsafe fn select_physical_device(instance: &ash::Instance) -> Result<vk::PhysicalDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(|e| GpuError::call("vkEnumeratePhysicalDevices failed", e, ""))?;

    devices
        .into_iter()
        .filter_map(|device| {
            let (properties, families, memory) = unsafe {
                (
                    instance.get_physical_device_properties(device),
                    instance.get_physical_device_queue_family_properties(device),
                    instance.get_physical_device_memory_properties(device),
                )
            };
            let has_graphics = families
                .iter()
                .any(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS));
            let score = score_device(
                properties.device_type,
                properties.api_version,
                has_graphics,
                device_local_bytes(&memory),
            )?;
            Some((score, device))
        })
        .max_by_key(|&(score, _)| score)
        .map(|(_, device)| device)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Rank a device: discrete over integrated over virtual, then by VRAM in GiB.
///
/// `None` for devices below Vulkan 1.3 or without a graphics queue.
pub fn score_device(
    device_type: vk::PhysicalDeviceType,
    api_version: u32,
    has_graphics: bool,
    device_local_bytes: u64,
) -> Option<u64> {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    if !has_graphics || major < 1 || (major == 1 && minor < 3) {
        return None;
    }

    let type_score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 50,
        _ => 1,
    };
    Some(type_score + device_local_bytes / (1 << 30))
}

#[cfg(test)]
mod tests {
    use super::*;

    const V13: u32 = vk::API_VERSION_1_3;
    const GIB: u64 = 1 << 30;

    #[test]
    fn discrete_beats_integrated_regardless_of_memory() {
        let discrete = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, V13, true, 2 * GIB);
        let integrated = score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, V13, true, 64 * GIB);
        assert!(discrete > integrated);
    }

    #[test]
    fn memory_breaks_ties() {
        let small = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, V13, true, 4 * GIB);
        let large = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, V13, true, 16 * GIB);
        assert_eq!(large, Some(1016));
        assert!(large > small);
    }

    #[test]
    fn unusable_devices_are_rejected() {
        let v12 = vk::API_VERSION_1_2;
        assert_eq!(score_device(vk::PhysicalDeviceType::DISCRETE_GPU, v12, true, GIB), None);
        assert_eq!(score_device(vk::PhysicalDeviceType::DISCRETE_GPU, V13, false, GIB), None);
        assert_eq!(score_device(vk::PhysicalDeviceType::CPU, V13, true, 0), Some(1));
    }

    #[test]
    fn surface_extension_is_always_required() {
        assert!(required_instance_extensions().contains(&ash::khr::surface::NAME));
    }
}
