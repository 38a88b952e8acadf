//! Swapchain and the image views the render graph's framebuffers attach.

use std::sync::Arc;

use ash::vk;

use crate::context::GpuContext;
use crate::error::{GpuError, Result};

/// Everything needed to (re)build a swapchain for a surface.
#[derive(Debug, Clone, Copy)]
pub struct SwapchainDesc {
    pub surface: vk::SurfaceKHR,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub transform: vk::SurfaceTransformFlagsKHR,
}

/// A swapchain with one color view per image. Destroyed on drop.
pub struct Swapchain {
    device: Arc<ash::Device>,
    loader: ash::khr::swapchain::Device,
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Build a swapchain from `desc`, retiring `previous` if given.
    ///
    /// `previous` stays valid and owned by the caller; drop it once it is idle.
    pub fn new(
        ctx: &GpuContext,
        loader: &ash::khr::swapchain::Device,
        desc: &SwapchainDesc,
        previous: Option<&Self>,
    ) -> Result<Self> {
        let info = vk::SwapchainCreateInfoKHR::default()
            .surface(desc.surface)
            .min_image_count(desc.min_image_count)
            .image_format(desc.format.format)
            .image_color_space(desc.format.color_space)
            .image_extent(desc.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(desc.transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(desc.present_mode)
            .clipped(true)
            .old_swapchain(previous.map_or(vk::SwapchainKHR::null(), |old| old.handle));

        let handle = unsafe { loader.create_swapchain(&info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;

        // From here on, drop cleans up whatever was created.
        let mut swapchain = Self {
            device: ctx.shared_device(),
            loader: loader.clone(),
            handle,
            images: Vec::new(),
            views: Vec::new(),
            format: desc.format.format,
            extent: desc.extent,
        };
        ctx.set_debug_name(handle, "Swapchain");

        swapchain.images = unsafe { loader.get_swapchain_images(handle) }
            .map_err(|e| GpuError::call("vkGetSwapchainImagesKHR failed", e, "Swapchain"))?;

        for (index, &image) in swapchain.images.iter().enumerate() {
            let name = format!("Swapchain image {index}");
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(swapchain.format)
                .subresource_range(color_range());
            let view = unsafe { swapchain.device.create_image_view(&view_info, None) }
                .map_err(|e| GpuError::call("vkCreateImageView failed", e, &name))?;
            ctx.set_debug_name(view, &name);
            swapchain.views.push(view);
        }

        Ok(swapchain)
    }

    pub const fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    /// Number of swapchain images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub const fn image_format(&self) -> vk::Format {
        self.format
    }

    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Views of every swapchain image, indexed by image index.
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.views
    }

    /// Acquire the next image, signaling `semaphore` once it is available.
    ///
    /// Returns the image index and whether the swapchain is suboptimal.
    /// `ERROR_OUT_OF_DATE_KHR` comes back as an error and no image is acquired.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore, timeout_ns: u64) -> Result<(u32, bool)> {
        unsafe {
            self.loader
                .acquire_next_image(self.handle, timeout_ns, semaphore, vk::Fence::null())
        }
        .map_err(GpuError::from)
    }

    /// Present `image_index` once `wait_semaphores` signal.
    ///
    /// Returns `true` when the swapchain is suboptimal or out of date.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<bool> {
        let swapchains = [self.handle];
        let indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { self.loader.queue_present(queue, &info) } {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(GpuError::call("vkQueuePresentKHR failed", e, "Swapchain")),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

const fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// One image above the surface minimum, capped by its maximum (0 means unbounded).
pub const fn desired_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    match capabilities.max_image_count {
        0 => wanted,
        max if wanted > max => max,
        _ => wanted,
    }
}

/// `B8G8R8A8_SRGB` with a nonlinear sRGB color space, else whatever the surface lists first.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    let preferred = vk::SurfaceFormatKHR {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
    };
    let has_preferred = available
        .iter()
        .any(|f| f.format == preferred.format && f.color_space == preferred.color_space);
    if has_preferred {
        return Ok(preferred);
    }
    available
        .first()
        .copied()
        .ok_or_else(|| GpuError::SwapchainCreation("surface reports no formats".to_string()))
}

/// FIFO under vsync. Otherwise mailbox, then immediate, then FIFO.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    let uncapped = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE];
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    uncapped
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's current extent, or the requested size clamped to its limits
/// when the surface leaves the choice to the swapchain.
pub fn calculate_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: width.clamp(min.width, max.width),
        height: height.clamp(min.height, max.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srgb(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn srgb_bgra_wins_over_listing_order() {
        let formats = [srgb(vk::Format::R8G8B8A8_UNORM), srgb(vk::Format::B8G8R8A8_SRGB)];
        let chosen = select_surface_format(&formats).map(|f| f.format);
        assert_eq!(chosen.ok(), Some(vk::Format::B8G8R8A8_SRGB));
    }

    #[test]
    fn srgb_format_in_wrong_color_space_is_not_preferred() {
        let formats = [
            srgb(vk::Format::R8G8B8A8_UNORM),
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];
        let chosen = select_surface_format(&formats).map(|f| f.format);
        assert_eq!(chosen.ok(), Some(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn surface_without_formats_is_an_error() {
        assert!(matches!(
            select_surface_format(&[]),
            Err(GpuError::SwapchainCreation(_))
        ));
    }

    #[test]
    fn vsync_forces_fifo() {
        let all = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn uncapped_falls_back_to_immediate_then_fifo() {
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(select_present_mode(&[], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn fixed_surface_extent_is_kept() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(800, 600),
            ..Default::default()
        };
        assert_eq!(calculate_extent(&caps, 1280, 720), extent(800, 600));
    }

    #[test]
    fn free_extent_is_clamped_per_axis() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(16, 16),
            max_image_extent: extent(1920, 1080),
            ..Default::default()
        };
        assert_eq!(calculate_extent(&caps, 4000, 720), extent(1920, 720));
        assert_eq!(calculate_extent(&caps, 1, 1), extent(16, 16));
    }

    #[test]
    fn image_count_is_one_above_minimum_within_maximum() {
        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(desired_image_count(&unbounded), 3);

        let capped = vk::SurfaceCapabilitiesKHR {
            max_image_count: 2,
            ..unbounded
        };
        assert_eq!(desired_image_count(&capped), 2);
    }
}
