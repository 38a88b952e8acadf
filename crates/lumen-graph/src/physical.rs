//! GPU objects a compiled render graph owns.

use crate::error::{GraphError, Result};
use crate::plan::{texture_image_desc, AttachmentPlan};
use crate::resource::{BufferResource, TextureResource};
use ash::vk;
use lumen_gpu::{Buffer, Framebuffer, GpuContext, GraphicsPipeline, Image, RenderPass};

/// GPU side of a buffer resource. Empty until data is first announced.
#[derive(Debug, Default)]
pub struct PhysicalBuffer {
    buffer: Option<Buffer>,
}

impl PhysicalBuffer {
    pub const fn buffer(&self) -> Option<&Buffer> {
        self.buffer.as_ref()
    }

    pub fn handle(&self) -> Option<vk::Buffer> {
        self.buffer.as_ref().map(Buffer::handle)
    }

    pub fn descriptor_info(&self) -> Option<vk::DescriptorBufferInfo> {
        self.buffer.as_ref().map(Buffer::descriptor_info)
    }

    /// Replace the GPU buffer with a host-visible one holding the resource's current data.
    pub(crate) fn rebuild(&mut self, ctx: &GpuContext, resource: &BufferResource) -> Result<()> {
        self.buffer = None;
        if resource.size() == 0 {
            tracing::warn!(buffer = resource.name(), "Announced an empty update, buffer left unbound");
            return Ok(());
        }
        self.buffer = Some(Buffer::with_data(
            ctx,
            resource.data(),
            resource.usage().vk_usage(),
            resource.name(),
        )?);
        Ok(())
    }
}

/// GPU side of a texture resource.
#[derive(Debug)]
pub enum PhysicalTexture {
    /// Resolved to the current swapchain image when recording.
    BackBuffer,
    Image(Image),
}

impl PhysicalTexture {
    /// Allocate the image for `resource` at `extent`.
    pub(crate) fn new(ctx: &GpuContext, resource: &TextureResource, extent: vk::Extent2D) -> Result<Self> {
        match texture_image_desc(resource.usage(), resource.format(), extent) {
            None => Ok(Self::BackBuffer),
            Some(desc) => Ok(Self::Image(Image::new(ctx, desc, resource.name())?)),
        }
    }

    pub const fn image(&self) -> Option<&Image> {
        match self {
            Self::BackBuffer => None,
            Self::Image(image) => Some(image),
        }
    }
}

/// Render pass, framebuffers and pipeline of a compiled graphics stage.
pub struct PhysicalGraphicsStage {
    // Field order is drop order: framebuffers and pipeline go before the pass they use.
    framebuffers: Vec<Framebuffer>,
    pipeline: GraphicsPipeline,
    render_pass: Option<RenderPass>,
    render_pass_handle: vk::RenderPass,
    attachments: AttachmentPlan,
    descriptor_set: Option<vk::DescriptorSet>,
    extent: vk::Extent2D,
    name: String,
}

impl PhysicalGraphicsStage {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: &str,
        render_pass: Option<RenderPass>,
        render_pass_handle: vk::RenderPass,
        attachments: AttachmentPlan,
        pipeline: GraphicsPipeline,
        framebuffers: Vec<Framebuffer>,
        descriptor_set: Option<vk::DescriptorSet>,
        extent: vk::Extent2D,
    ) -> Self {
        Self {
            framebuffers,
            pipeline,
            render_pass,
            render_pass_handle,
            attachments,
            descriptor_set,
            extent,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn pipeline(&self) -> vk::Pipeline {
        self.pipeline.handle()
    }

    /// Layout to bind descriptor sets and push constants against.
    pub const fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline.layout()
    }

    pub const fn render_pass(&self) -> vk::RenderPass {
        self.render_pass_handle
    }

    /// Whether the render pass was built by the graph rather than supplied by the stage.
    pub const fn owns_render_pass(&self) -> bool {
        self.render_pass.is_some()
    }

    /// The set holding the stage's uniform buffers and external textures, bound at set 0.
    pub const fn descriptor_set(&self) -> Option<vk::DescriptorSet> {
        self.descriptor_set
    }

    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub const fn attachments(&self) -> &AttachmentPlan {
        &self.attachments
    }

    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .map(Framebuffer::handle)
            .ok_or_else(|| {
                GraphError::InvalidArgument(format!(
                    "Stage '{}' has no framebuffer for swapchain image {image_index}",
                    self.name
                ))
            })
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }
}

impl std::fmt::Debug for PhysicalGraphicsStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalGraphicsStage")
            .field("name", &self.name)
            .field("framebuffers", &self.framebuffers.len())
            .field("extent", &self.extent)
            .finish_non_exhaustive()
    }
}
