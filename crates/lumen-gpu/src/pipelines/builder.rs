//! Graphics pipeline builder.
//!
//! Accumulates every piece of a graphics pipeline create info through chained
//! setters. Validation of the accumulated state is left to the validation layers.

use crate::context::GpuContext;
use crate::error::Result;
use crate::pipelines::cache::PipelineCache;
use crate::pipelines::graphics::GraphicsPipeline;
use crate::resources::Shader;
use ash::vk;

/// Attachment formats for pipelines used with dynamic rendering.
#[derive(Debug, Clone, Default)]
struct RenderingFormats {
    color: Vec<vk::Format>,
    depth: vk::Format,
    stencil: vk::Format,
}

/// Blend state writing all four channels without blending.
pub fn default_color_blend_attachment() -> vk::PipelineColorBlendAttachmentState {
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(false)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
}

/// Viewport covering `extent` with the full depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`.
pub const fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Builder for [`GraphicsPipeline`].
///
/// Defaults: triangle list, fill mode, back-face culling with clockwise front
/// faces, line width 1, one sample, depth test and write off with
/// `LESS_OR_EQUAL` compare.
pub struct GraphicsPipelineBuilder<'a> {
    pub(crate) shader_stages: Vec<vk::PipelineShaderStageCreateInfo<'a>>,
    pub(crate) vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub(crate) vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub(crate) topology: vk::PrimitiveTopology,
    pub(crate) primitive_restart: bool,
    pub(crate) patch_control_points: u32,
    pub(crate) viewports: Vec<vk::Viewport>,
    pub(crate) scissors: Vec<vk::Rect2D>,
    pub(crate) polygon_mode: vk::PolygonMode,
    pub(crate) cull_mode: vk::CullModeFlags,
    pub(crate) front_face: vk::FrontFace,
    pub(crate) line_width: f32,
    pub(crate) samples: vk::SampleCountFlags,
    pub(crate) min_sample_shading: Option<f32>,
    pub(crate) depth_test: bool,
    pub(crate) depth_write: bool,
    pub(crate) depth_compare_op: vk::CompareOp,
    pub(crate) color_blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub(crate) dynamic_states: Vec<vk::DynamicState>,
    pub(crate) render_pass: vk::RenderPass,
    pub(crate) descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
    pub(crate) push_constant_ranges: Vec<vk::PushConstantRange>,
    rendering: Option<RenderingFormats>,
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self {
            shader_stages: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
            patch_control_points: 0,
            viewports: Vec::new(),
            scissors: Vec::new(),
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: None,
            depth_test: false,
            depth_write: false,
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            color_blend_attachments: Vec::new(),
            dynamic_states: Vec::new(),
            render_pass: vk::RenderPass::null(),
            descriptor_set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            rendering: None,
        }
    }
}

impl<'a> GraphicsPipelineBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn add_shader(mut self, shader: &'a Shader) -> Self {
        self.shader_stages.push(shader.stage_info());
        self
    }

    #[must_use]
    pub fn add_vertex_input_binding(mut self, binding: vk::VertexInputBindingDescription) -> Self {
        self.vertex_bindings.push(binding);
        self
    }

    #[must_use]
    pub fn add_vertex_input_attribute(
        mut self,
        attribute: vk::VertexInputAttributeDescription,
    ) -> Self {
        self.vertex_attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn set_vertex_input_bindings(mut self, bindings: Vec<vk::VertexInputBindingDescription>) -> Self {
        self.vertex_bindings = bindings;
        self
    }

    #[must_use]
    pub fn set_vertex_input_attributes(
        mut self,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        self.vertex_attributes = attributes;
        self
    }

    #[must_use]
    pub const fn set_primitive_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    #[must_use]
    pub const fn set_primitive_restart(mut self, enable: bool) -> Self {
        self.primitive_restart = enable;
        self
    }

    /// Control points per patch. Zero disables the tessellation state.
    #[must_use]
    pub const fn set_tesselation_control_point_count(mut self, count: u32) -> Self {
        self.patch_control_points = count;
        self
    }

    /// Replace all viewports with `viewport`.
    #[must_use]
    pub fn set_viewport(mut self, viewport: vk::Viewport) -> Self {
        self.viewports = vec![viewport];
        self
    }

    #[must_use]
    pub fn add_viewport(mut self, viewport: vk::Viewport) -> Self {
        self.viewports.push(viewport);
        self
    }

    /// Replace all scissors with `scissor`.
    #[must_use]
    pub fn set_scissor(mut self, scissor: vk::Rect2D) -> Self {
        self.scissors = vec![scissor];
        self
    }

    #[must_use]
    pub fn add_scissor(mut self, scissor: vk::Rect2D) -> Self {
        self.scissors.push(scissor);
        self
    }

    /// One viewport and one scissor covering `extent`.
    #[must_use]
    pub fn set_viewport_and_scissor(self, extent: vk::Extent2D) -> Self {
        self.set_viewport(full_viewport(extent))
            .set_scissor(full_scissor(extent))
    }

    #[must_use]
    pub const fn set_polygon_mode(mut self, mode: vk::PolygonMode) -> Self {
        self.polygon_mode = mode;
        self
    }

    /// Switch between line and fill rasterization.
    #[must_use]
    pub const fn set_wireframe(mut self, wireframe: bool) -> Self {
        self.polygon_mode = if wireframe {
            vk::PolygonMode::LINE
        } else {
            vk::PolygonMode::FILL
        };
        self
    }

    #[must_use]
    pub const fn set_culling_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    #[must_use]
    pub const fn set_front_face(mut self, front_face: vk::FrontFace) -> Self {
        self.front_face = front_face;
        self
    }

    #[must_use]
    pub const fn set_line_width(mut self, width: f32) -> Self {
        self.line_width = width;
        self
    }

    /// Sample count, and optionally enable sample shading with a minimum fraction.
    #[must_use]
    pub const fn set_multisampling(
        mut self,
        samples: vk::SampleCountFlags,
        min_sample_shading: Option<f32>,
    ) -> Self {
        self.samples = samples;
        self.min_sample_shading = min_sample_shading;
        self
    }

    #[must_use]
    pub const fn set_depth_test(mut self, enable: bool) -> Self {
        self.depth_test = enable;
        self
    }

    #[must_use]
    pub const fn set_depth_write(mut self, enable: bool) -> Self {
        self.depth_write = enable;
        self
    }

    #[must_use]
    pub const fn set_depth_compare_op(mut self, op: vk::CompareOp) -> Self {
        self.depth_compare_op = op;
        self
    }

    #[must_use]
    pub fn add_color_blend_attachment(
        mut self,
        attachment: vk::PipelineColorBlendAttachmentState,
    ) -> Self {
        self.color_blend_attachments.push(attachment);
        self
    }

    #[must_use]
    pub fn set_color_blend_attachments(
        mut self,
        attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    ) -> Self {
        self.color_blend_attachments = attachments;
        self
    }

    #[must_use]
    pub fn set_dynamic_states(mut self, states: Vec<vk::DynamicState>) -> Self {
        self.dynamic_states = states;
        self
    }

    #[must_use]
    pub const fn set_render_pass(mut self, render_pass: vk::RenderPass) -> Self {
        self.render_pass = render_pass;
        self
    }

    /// Target dynamic rendering with these attachment formats instead of a render pass.
    #[must_use]
    pub fn set_dynamic_rendering(
        mut self,
        color_formats: Vec<vk::Format>,
        depth_format: vk::Format,
        stencil_format: vk::Format,
    ) -> Self {
        self.rendering = Some(RenderingFormats {
            color: color_formats,
            depth: depth_format,
            stencil: stencil_format,
        });
        self
    }

    #[must_use]
    pub fn set_descriptor_set_layouts(mut self, layouts: Vec<vk::DescriptorSetLayout>) -> Self {
        self.descriptor_set_layouts = layouts;
        self
    }

    #[must_use]
    pub fn add_descriptor_set_layout(mut self, layout: vk::DescriptorSetLayout) -> Self {
        self.descriptor_set_layouts.push(layout);
        self
    }

    #[must_use]
    pub fn add_push_constant_range(mut self, range: vk::PushConstantRange) -> Self {
        self.push_constant_ranges.push(range);
        self
    }

    fn has_dynamic_state(&self, state: vk::DynamicState) -> bool {
        self.dynamic_states.contains(&state)
    }

    /// Assemble the create info and create the pipeline.
    pub fn build(
        self,
        ctx: &GpuContext,
        cache: &PipelineCache,
        name: &str,
    ) -> Result<GraphicsPipeline> {
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_bindings)
            .vertex_attribute_descriptions(&self.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(self.topology)
            .primitive_restart_enable(self.primitive_restart);

        let tessellation = vk::PipelineTessellationStateCreateInfo::default()
            .patch_control_points(self.patch_control_points);

        let mut viewport_state = vk::PipelineViewportStateCreateInfo::default();
        viewport_state = if self.viewports.is_empty() && self.has_dynamic_state(vk::DynamicState::VIEWPORT) {
            viewport_state.viewport_count(1)
        } else {
            viewport_state.viewports(&self.viewports)
        };
        viewport_state = if self.scissors.is_empty() && self.has_dynamic_state(vk::DynamicState::SCISSOR) {
            viewport_state.scissor_count(1)
        } else {
            viewport_state.scissors(&self.scissors)
        };

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false)
            .line_width(self.line_width);

        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(self.samples)
            .sample_shading_enable(self.min_sample_shading.is_some())
            .min_sample_shading(self.min_sample_shading.unwrap_or(1.0));

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test)
            .depth_write_enable(self.depth_write)
            .depth_compare_op(self.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&self.color_blend_attachments);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&self.dynamic_states);

        let mut rendering = self.rendering.as_ref().map(|formats| {
            vk::PipelineRenderingCreateInfo::default()
                .color_attachment_formats(&formats.color)
                .depth_attachment_format(formats.depth)
                .stencil_attachment_format(formats.stencil)
        });

        let mut create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&self.shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .render_pass(self.render_pass)
            .subpass(0);
        if self.patch_control_points > 0 {
            create_info = create_info.tessellation_state(&tessellation);
        }
        if let Some(rendering) = rendering.as_mut() {
            create_info = create_info.push_next(rendering);
        }

        GraphicsPipeline::new(
            ctx,
            cache,
            create_info,
            &self.descriptor_set_layouts,
            &self.push_constant_ranges,
            name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn defaults() {
        let builder = GraphicsPipelineBuilder::new();
        assert_eq!(builder.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(builder.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(builder.front_face, vk::FrontFace::CLOCKWISE);
        assert_eq!(builder.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(builder.depth_compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::FILL);
        assert!((builder.line_width - 1.0).abs() < f32::EPSILON);
        assert!(builder.render_pass.is_null());
    }

    #[test]
    fn wireframe_toggles_polygon_mode() {
        let builder = GraphicsPipelineBuilder::new().set_wireframe(true);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::LINE);
        let builder = builder.set_wireframe(false);
        assert_eq!(builder.polygon_mode, vk::PolygonMode::FILL);
    }

    #[test]
    fn viewport_and_scissor_cover_extent() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let builder = GraphicsPipelineBuilder::new()
            .set_viewport_and_scissor(extent)
            .set_viewport_and_scissor(extent);
        assert_eq!(builder.viewports.len(), 1);
        assert!((builder.viewports[0].width - 1280.0).abs() < f32::EPSILON);
        assert!((builder.viewports[0].max_depth - 1.0).abs() < f32::EPSILON);
        assert_eq!(builder.scissors[0].extent.height, 720);
    }

    #[test]
    fn accumulates_layout_inputs() {
        let builder = GraphicsPipelineBuilder::new()
            .add_descriptor_set_layout(vk::DescriptorSetLayout::from_raw(1))
            .add_descriptor_set_layout(vk::DescriptorSetLayout::from_raw(2))
            .add_push_constant_range(vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: 64,
            })
            .add_color_blend_attachment(default_color_blend_attachment());
        assert_eq!(builder.descriptor_set_layouts.len(), 2);
        assert_eq!(builder.push_constant_ranges[0].size, 64);
        assert_eq!(
            builder.color_blend_attachments[0].color_write_mask,
            vk::ColorComponentFlags::RGBA
        );
    }
}
