//! Single-subpass render passes.

use crate::context::GpuContext;
use crate::error::{require_name, GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// A named render pass with exactly one graphics subpass, destroyed on drop.
pub struct RenderPass {
    device: Arc<ash::Device>,
    render_pass: vk::RenderPass,
    name: String,
}

impl RenderPass {
    /// Create a render pass whose only subpass uses `color_refs` and `depth_ref`.
    pub fn new(
        ctx: &GpuContext,
        attachments: &[vk::AttachmentDescription],
        color_refs: &[vk::AttachmentReference],
        depth_ref: Option<&vk::AttachmentReference>,
        dependencies: &[vk::SubpassDependency],
        name: &str,
    ) -> Result<Self> {
        require_name(name, "RenderPass")?;

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(color_refs);
        if let Some(depth_ref) = depth_ref {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }

        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(dependencies);

        let render_pass = unsafe { ctx.device().create_render_pass(&create_info, None) }
            .map_err(|e| GpuError::call("vkCreateRenderPass failed", e, name))?;
        ctx.set_debug_name(render_pass, name);

        Ok(Self {
            device: ctx.shared_device(),
            render_pass,
            name: name.to_string(),
        })
    }

    pub const fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.render_pass, None) };
    }
}

/// Dependency making the previous color output visible to subpass 0.
pub fn external_color_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_dependency_targets_first_subpass() {
        let dependency = external_color_dependency();
        assert_eq!(dependency.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dependency.dst_subpass, 0);
        assert_eq!(
            dependency.dst_stage_mask,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        );
        assert_eq!(dependency.dst_access_mask, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }
}
