//! Pipeline layouts.

use crate::context::GpuContext;
use crate::error::{require_name, GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// A named pipeline layout, destroyed on drop.
pub struct PipelineLayout {
    device: Arc<ash::Device>,
    layout: vk::PipelineLayout,
    name: String,
}

impl PipelineLayout {
    pub fn new(
        ctx: &GpuContext,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
        name: &str,
    ) -> Result<Self> {
        require_name(name, "PipelineLayout")?;

        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { ctx.device().create_pipeline_layout(&create_info, None) }
            .map_err(|e| GpuError::call("vkCreatePipelineLayout failed", e, name))?;
        ctx.set_debug_name(layout, name);

        Ok(Self {
            device: ctx.shared_device(),
            layout,
            name: name.to_string(),
        })
    }

    pub const fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline_layout(self.layout, None) };
    }
}
