//! Graphics pipelines.

use crate::context::GpuContext;
use crate::error::{require_name, GpuError, Result};
use crate::pipelines::cache::PipelineCache;
use crate::pipelines::layout::PipelineLayout;
use ash::vk;
use std::sync::Arc;

/// A named graphics pipeline together with the layout it was created with.
pub struct GraphicsPipeline {
    device: Arc<ash::Device>,
    pipeline: vk::Pipeline,
    layout: PipelineLayout,
    name: String,
}

impl GraphicsPipeline {
    /// Create the pipeline layout, then the pipeline from `create_info` with that layout.
    pub fn new(
        ctx: &GpuContext,
        cache: &PipelineCache,
        create_info: vk::GraphicsPipelineCreateInfo<'_>,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
        name: &str,
    ) -> Result<Self> {
        require_name(name, "GraphicsPipeline")?;

        let layout = PipelineLayout::new(ctx, set_layouts, push_constant_ranges, name)?;
        let create_info = create_info.layout(layout.handle());

        let pipelines = unsafe {
            ctx.device()
                .create_graphics_pipelines(cache.handle(), &[create_info], None)
        }
        .map_err(|(_, e)| GpuError::call("vkCreateGraphicsPipelines failed", e, name))?;
        let pipeline = pipelines
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::PipelineCreation(format!("{name}: driver returned no pipeline")))?;
        ctx.set_debug_name(pipeline, name);

        tracing::trace!("Created graphics pipeline {name}");

        Ok(Self {
            device: ctx.shared_device(),
            pipeline,
            layout,
            name: name.to_string(),
        })
    }

    pub const fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub const fn layout(&self) -> vk::PipelineLayout {
        self.layout.handle()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe { self.device.destroy_pipeline(self.pipeline, None) };
    }
}
