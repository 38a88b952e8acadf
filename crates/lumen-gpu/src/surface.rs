//! Window surface and the swapchains built on it.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use crate::context::{GpuContext, QueueType};
use crate::error::{GpuError, Result};
use crate::swapchain::{
    calculate_extent, desired_image_count, select_present_mode, select_surface_format, Swapchain,
    SwapchainDesc,
};

/// A presentable window surface. Destroyed on drop; drop every swapchain first.
pub struct SurfaceContext {
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
}

impl SurfaceContext {
    /// Create a surface for `window` and check the graphics queue can present to it.
    ///
    /// # Safety
    /// The window must outlive the surface.
    pub unsafe fn from_window<W>(gpu: &GpuContext, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("no display handle: {e}")))?;
        let handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("no window handle: {e}")))?;

        let surface = unsafe {
            ash_window::create_surface(gpu.entry(), gpu.instance(), display.as_raw(), handle.as_raw(), None)
        }
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let context = Self {
            surface,
            surface_loader: ash::khr::surface::Instance::new(gpu.entry(), gpu.instance()),
            swapchain_loader: ash::khr::swapchain::Device::new(gpu.instance(), gpu.device()),
        };

        let family = gpu.queue_family(QueueType::Graphics);
        let presentable = unsafe {
            context
                .surface_loader
                .get_physical_device_surface_support(gpu.physical_device(), family, surface)
        }
        .map_err(|e| GpuError::call("vkGetPhysicalDeviceSurfaceSupportKHR failed", e, "Surface"))?;
        if !presentable {
            return Err(GpuError::SurfaceCreation(format!(
                "queue family {family} cannot present to this surface"
            )));
        }

        Ok(context)
    }

    pub const fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Query what the surface currently supports.
    pub fn capabilities(&self, gpu: &GpuContext) -> Result<SurfaceCapabilities> {
        let device = gpu.physical_device();
        let query = |what: &str, e: vk::Result| GpuError::call(format!("{what} failed"), e, "Surface");
        unsafe {
            Ok(SurfaceCapabilities {
                capabilities: self
                    .surface_loader
                    .get_physical_device_surface_capabilities(device, self.surface)
                    .map_err(|e| query("vkGetPhysicalDeviceSurfaceCapabilitiesKHR", e))?,
                formats: self
                    .surface_loader
                    .get_physical_device_surface_formats(device, self.surface)
                    .map_err(|e| query("vkGetPhysicalDeviceSurfaceFormatsKHR", e))?,
                present_modes: self
                    .surface_loader
                    .get_physical_device_surface_present_modes(device, self.surface)
                    .map_err(|e| query("vkGetPhysicalDeviceSurfacePresentModesKHR", e))?,
            })
        }
    }

    /// Build a swapchain of roughly `width` x `height`, retiring `previous` if given.
    ///
    /// The caller drops `previous` afterwards, once the device no longer uses it.
    pub fn create_swapchain(
        &self,
        gpu: &GpuContext,
        width: u32,
        height: u32,
        vsync: bool,
        previous: Option<&Swapchain>,
    ) -> Result<Swapchain> {
        let desc = self.capabilities(gpu)?.swapchain_desc(self.surface, width, height, vsync)?;
        let swapchain = Swapchain::new(gpu, &self.swapchain_loader, &desc, previous)?;

        tracing::info!(
            "Swapchain {}x{} {:?}, {} images, {:?}",
            desc.extent.width,
            desc.extent.height,
            desc.format.format,
            swapchain.image_count(),
            desc.present_mode
        );
        Ok(swapchain)
    }
}

impl Drop for SurfaceContext {
    fn drop(&mut self) {
        unsafe { self.surface_loader.destroy_surface(self.surface, None) };
    }
}

/// Surface capabilities query result.
#[derive(Debug, Clone, Default)]
pub struct SurfaceCapabilities {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceCapabilities {
    /// Swapchain settings for a window of `width` x `height`.
    pub fn swapchain_desc(
        &self,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<SwapchainDesc> {
        Ok(SwapchainDesc {
            surface,
            format: select_surface_format(&self.formats)?,
            present_mode: select_present_mode(&self.present_modes, vsync),
            extent: calculate_extent(&self.capabilities, width.max(1), height.max(1)),
            min_image_count: desired_image_count(&self.capabilities),
            transform: self.capabilities.current_transform,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> SurfaceCapabilities {
        SurfaceCapabilities {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D { width: 1, height: 1 },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn desc_combines_every_selection() {
        let desc = caps()
            .swapchain_desc(vk::SurfaceKHR::null(), 1280, 720, false)
            .expect("desc");
        assert_eq!(desc.format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(desc.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(desc.extent, vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(desc.min_image_count, 3);
        assert_eq!(desc.transform, vk::SurfaceTransformFlagsKHR::IDENTITY);
    }

    #[test]
    fn zero_sized_window_gets_a_valid_extent() {
        let desc = caps()
            .swapchain_desc(vk::SurfaceKHR::null(), 0, 0, true)
            .expect("desc");
        assert_eq!(desc.extent, vk::Extent2D { width: 1, height: 1 });
        assert_eq!(desc.present_mode, vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn desc_fails_without_formats() {
        let mut caps = caps();
        caps.formats.clear();
        assert!(caps.swapchain_desc(vk::SurfaceKHR::null(), 64, 64, false).is_err());
    }
}
