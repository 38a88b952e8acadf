//! GPU images and their views.

use crate::context::GpuContext;
use crate::error::{require_name, GpuError, Result};
use crate::memory::{GpuAllocator, MemoryUsage};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use parking_lot::Mutex;
use std::sync::Arc;

/// Everything needed to create a single-mip 2D image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub samples: vk::SampleCountFlags,
}

impl ImageDesc {
    /// Color attachment of the given format and extent.
    pub const fn color(format: vk::Format, extent: vk::Extent2D) -> Self {
        Self {
            format,
            extent,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            aspect: vk::ImageAspectFlags::COLOR,
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    /// Depth-stencil attachment of the given format and extent.
    pub const fn depth_stencil(format: vk::Format, extent: vk::Extent2D) -> Self {
        Self {
            format,
            extent,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            aspect: vk::ImageAspectFlags::from_raw(
                vk::ImageAspectFlags::DEPTH.as_raw() | vk::ImageAspectFlags::STENCIL.as_raw(),
            ),
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    /// Image create info: 2D, one mip, one layer, optimal tiling, undefined layout.
    pub fn create_info(&self) -> vk::ImageCreateInfo<'static> {
        vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(self.format)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(self.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(self.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
    }

    /// Subresource range covering the single mip and layer.
    pub const fn subresource_range(&self) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        }
    }
}

/// A device-local image with a matching 2D view, destroyed on drop.
pub struct Image {
    device: Arc<ash::Device>,
    allocator: Arc<Mutex<GpuAllocator>>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    desc: ImageDesc,
    name: String,
}

impl Image {
    /// Create the image and its view.
    pub fn new(ctx: &GpuContext, desc: ImageDesc, name: &str) -> Result<Self> {
        require_name(name, "Image")?;
        if desc.extent.width == 0 || desc.extent.height == 0 {
            return Err(GpuError::InvalidArgument(format!(
                "Image {name} has a zero extent"
            )));
        }

        let (image, allocation) = ctx.allocator().lock().allocate_image(
            &desc.create_info(),
            MemoryUsage::DeviceLocal,
            name,
        )?;
        ctx.set_debug_name(image, name);

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(desc.subresource_range());

        let view = match unsafe { ctx.device().create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { ctx.device().destroy_image(image, None) };
                ctx.allocator().lock().free(allocation);
                return Err(GpuError::call("vkCreateImageView failed", e, name));
            }
        };
        ctx.set_debug_name(view, name);

        Ok(Self {
            device: ctx.shared_device(),
            allocator: Arc::clone(ctx.allocator()),
            image,
            view,
            allocation: Some(allocation),
            desc,
            name: name.to_string(),
        })
    }

    /// Raw image handle.
    pub const fn handle(&self) -> vk::Image {
        self.image
    }

    /// View over the whole image.
    pub const fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Creation parameters.
    pub const fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub const fn format(&self) -> vk::Format {
        self.desc.format
    }

    pub const fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.allocator.lock().free(allocation);
        }
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("name", &self.name)
            .field("format", &self.desc.format)
            .field("extent", &self.desc.extent)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENT: vk::Extent2D = vk::Extent2D {
        width: 640,
        height: 480,
    };

    #[test]
    fn color_desc() {
        let desc = ImageDesc::color(vk::Format::R8G8B8A8_UNORM, EXTENT);
        let info = desc.create_info();
        assert_eq!(info.usage, vk::ImageUsageFlags::COLOR_ATTACHMENT);
        assert_eq!(info.extent.width, 640);
        assert_eq!(info.extent.depth, 1);
        assert_eq!(info.mip_levels, 1);
        assert_eq!(info.tiling, vk::ImageTiling::OPTIMAL);
        assert_eq!(desc.subresource_range().aspect_mask, vk::ImageAspectFlags::COLOR);
    }

    #[test]
    fn depth_desc_covers_both_aspects() {
        let desc = ImageDesc::depth_stencil(vk::Format::D32_SFLOAT_S8_UINT, EXTENT);
        assert_eq!(desc.usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        assert_eq!(
            desc.aspect,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }
}
