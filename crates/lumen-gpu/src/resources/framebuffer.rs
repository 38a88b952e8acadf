//! Framebuffers and offscreen render targets.

use crate::context::GpuContext;
use crate::error::{require_name, GpuError, Result};
use crate::resources::image::{Image, ImageDesc};
use ash::vk;
use std::sync::Arc;

/// A named framebuffer, destroyed on drop.
pub struct Framebuffer {
    device: Arc<ash::Device>,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    name: String,
}

impl Framebuffer {
    /// Create a framebuffer for `render_pass` from `attachments`, in attachment order.
    pub fn new(
        ctx: &GpuContext,
        render_pass: vk::RenderPass,
        attachments: &[vk::ImageView],
        extent: vk::Extent2D,
        name: &str,
    ) -> Result<Self> {
        require_name(name, "Framebuffer")?;
        if render_pass == vk::RenderPass::null() {
            return Err(GpuError::InvalidArgument(format!(
                "Framebuffer {name} needs a render pass"
            )));
        }

        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        let framebuffer = unsafe { ctx.device().create_framebuffer(&create_info, None) }
            .map_err(|e| GpuError::call("vkCreateFramebuffer failed", e, name))?;
        ctx.set_debug_name(framebuffer, name);

        Ok(Self {
            device: ctx.shared_device(),
            framebuffer,
            extent,
            name: name.to_string(),
        })
    }

    pub const fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_framebuffer(self.framebuffer, None) };
    }
}

/// An image paired with a single-attachment framebuffer.
pub struct OffscreenFramebuffer {
    // Field order: the framebuffer references the image view and goes first.
    framebuffer: Framebuffer,
    image: Image,
}

impl OffscreenFramebuffer {
    /// Create an image from `desc` and a framebuffer rendering into it.
    pub fn new(
        ctx: &GpuContext,
        render_pass: vk::RenderPass,
        desc: ImageDesc,
        name: &str,
    ) -> Result<Self> {
        let image = Image::new(ctx, desc, name)?;
        let framebuffer = Framebuffer::new(ctx, render_pass, &[image.view()], desc.extent, name)?;
        Ok(Self { framebuffer, image })
    }

    pub const fn image(&self) -> &Image {
        &self.image
    }

    pub const fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }
}
