//! Graphics stages: the units of per-frame work in a render graph.

use crate::physical::PhysicalGraphicsStage;
use crate::resource::{BufferHandle, ResourceHandle};
use ash::vk;
use bytemuck::Pod;
use hashbrown::HashMap;
use lumen_gpu::pipelines::default_color_blend_attachment;
use lumen_gpu::{CommandBuffer, DebugLabelColor, Shader};
use std::sync::Arc;

/// Callback that records a stage's draw commands.
pub type RecordFn = Box<dyn FnMut(&PhysicalGraphicsStage, &CommandBuffer)>;

/// One resource a stage reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRead {
    pub resource: ResourceHandle,
    /// Shader stages that access the resource through a descriptor.
    pub shader_stages: Option<vk::ShaderStageFlags>,
}

/// A push constant range together with its current value.
pub struct PushConstant {
    range: vk::PushConstantRange,
    data: Vec<u8>,
    on_update: Box<dyn FnMut(&mut [u8])>,
}

impl PushConstant {
    fn new<T: Pod>(
        initial: T,
        mut on_update: impl FnMut(&mut T) + 'static,
        stage_flags: vk::ShaderStageFlags,
        offset: u32,
    ) -> Self {
        Self {
            range: vk::PushConstantRange {
                stage_flags,
                offset,
                size: std::mem::size_of::<T>() as u32,
            },
            data: bytemuck::bytes_of(&initial).to_vec(),
            on_update: Box::new(move |bytes: &mut [u8]| {
                let mut value: T = bytemuck::pod_read_unaligned(bytes);
                on_update(&mut value);
                bytes.copy_from_slice(bytemuck::bytes_of(&value));
            }),
        }
    }

    pub const fn range(&self) -> vk::PushConstantRange {
        self.range
    }

    /// Bytes pushed on the next recording.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn update(&mut self) {
        (self.on_update)(&mut self.data);
    }
}

/// A graphics stage: one render pass, one pipeline and a recording callback.
///
/// Setters return `&mut Self` so a stage is configured with a chain of calls.
pub struct GraphicsStage {
    name: String,
    pub(crate) writes: Vec<ResourceHandle>,
    pub(crate) reads: Vec<StageRead>,
    pub(crate) push_constants: Vec<PushConstant>,
    pub(crate) on_update: Option<Box<dyn FnMut()>>,
    pub(crate) on_record: Option<RecordFn>,
    pub(crate) descriptor_layouts: Vec<vk::DescriptorSetLayout>,
    pub(crate) buffer_bindings: HashMap<BufferHandle, u32>,
    pub(crate) shaders: Vec<Arc<Shader>>,
    pub(crate) vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub(crate) vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub(crate) clears_screen: bool,
    pub(crate) clear_color: [f32; 4],
    pub(crate) depth_test: bool,
    pub(crate) depth_write: bool,
    pub(crate) blend_attachment: vk::PipelineColorBlendAttachmentState,
    pub(crate) cull_mode: vk::CullModeFlags,
    pub(crate) topology: vk::PrimitiveTopology,
    pub(crate) wireframe: bool,
    pub(crate) line_width: f32,
    pub(crate) samples: vk::SampleCountFlags,
    pub(crate) min_sample_shading: Option<f32>,
    pub(crate) patch_control_points: u32,
    pub(crate) viewport: Option<vk::Viewport>,
    pub(crate) scissor: Option<vk::Rect2D>,
    pub(crate) dynamic_states: Vec<vk::DynamicState>,
    pub(crate) render_pass: Option<vk::RenderPass>,
    pub(crate) label_color: DebugLabelColor,
}

impl GraphicsStage {
    pub(crate) fn new(name: &str, label_color: DebugLabelColor) -> Self {
        Self {
            name: name.to_string(),
            writes: Vec::new(),
            reads: Vec::new(),
            push_constants: Vec::new(),
            on_update: None,
            on_record: None,
            descriptor_layouts: Vec::new(),
            buffer_bindings: HashMap::new(),
            shaders: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            clears_screen: false,
            clear_color: [0.0; 4],
            depth_test: false,
            depth_write: false,
            blend_attachment: default_color_blend_attachment(),
            cull_mode: vk::CullModeFlags::BACK,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            wireframe: false,
            line_width: 1.0,
            samples: vk::SampleCountFlags::TYPE_1,
            min_sample_shading: None,
            patch_control_points: 0,
            viewport: None,
            scissor: None,
            dynamic_states: Vec::new(),
            render_pass: None,
            label_color,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn writes(&self) -> &[ResourceHandle] {
        &self.writes
    }

    pub fn reads(&self) -> &[StageRead] {
        &self.reads
    }

    pub fn push_constants(&self) -> &[PushConstant] {
        &self.push_constants
    }

    pub const fn clears_screen(&self) -> bool {
        self.clears_screen
    }

    pub const fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub const fn label_color(&self) -> DebugLabelColor {
        self.label_color
    }

    /// Declare that this stage renders into `resource`.
    pub fn writes_to(&mut self, resource: impl Into<ResourceHandle>) -> &mut Self {
        self.writes.push(resource.into());
        self
    }

    /// Declare a read of a vertex buffer, index buffer or texture.
    pub fn reads_from(&mut self, resource: impl Into<ResourceHandle>) -> &mut Self {
        self.reads.push(StageRead {
            resource: resource.into(),
            shader_stages: None,
        });
        self
    }

    /// Declare a read through a descriptor, visible to `shader_stages`.
    ///
    /// Uniform buffers and external textures must be read this way.
    pub fn reads_from_in(
        &mut self,
        resource: impl Into<ResourceHandle>,
        shader_stages: vk::ShaderStageFlags,
    ) -> &mut Self {
        self.reads.push(StageRead {
            resource: resource.into(),
            shader_stages: Some(shader_stages),
        });
        self
    }

    /// Push `initial` every frame after passing it through `on_update`.
    pub fn add_push_constant_range<T: Pod>(
        &mut self,
        initial: T,
        on_update: impl FnMut(&mut T) + 'static,
        stage_flags: vk::ShaderStageFlags,
        offset: u32,
    ) -> &mut Self {
        self.push_constants
            .push(PushConstant::new(initial, on_update, stage_flags, offset));
        self
    }

    /// Run `on_update` once per frame before buffers are uploaded.
    pub fn set_on_update(&mut self, on_update: impl FnMut() + 'static) -> &mut Self {
        self.on_update = Some(Box::new(on_update));
        self
    }

    /// Record draw commands. Called inside the stage's render pass with its pipeline bound.
    pub fn set_on_record(
        &mut self,
        on_record: impl FnMut(&PhysicalGraphicsStage, &CommandBuffer) + 'static,
    ) -> &mut Self {
        self.on_record = Some(Box::new(on_record));
        self
    }

    pub fn add_shader(&mut self, shader: Arc<Shader>) -> &mut Self {
        self.shaders.push(shader);
        self
    }

    /// Extra vertex binding on top of the ones derived from vertex buffer reads.
    pub fn add_vertex_input_binding(&mut self, binding: vk::VertexInputBindingDescription) -> &mut Self {
        self.vertex_bindings.push(binding);
        self
    }

    /// Extra vertex attribute on top of the ones derived from vertex buffer reads.
    pub fn add_vertex_input_attribute(
        &mut self,
        attribute: vk::VertexInputAttributeDescription,
    ) -> &mut Self {
        self.vertex_attributes.push(attribute);
        self
    }

    /// Bind a vertex buffer at an explicit binding index.
    pub fn bind_buffer(&mut self, buffer: BufferHandle, binding: u32) -> &mut Self {
        self.buffer_bindings.insert(buffer, binding);
        self
    }

    /// Descriptor set layout appended after the one the graph builds.
    pub fn add_descriptor_layout(&mut self, layout: vk::DescriptorSetLayout) -> &mut Self {
        self.descriptor_layouts.push(layout);
        self
    }

    /// Clear every attachment to zero color and far depth before drawing.
    pub fn set_clears_screen(&mut self, clears_screen: bool) -> &mut Self {
        self.clears_screen = clears_screen;
        self
    }

    /// Clear the color attachments to `color` before drawing.
    pub fn set_clears_screen_color(&mut self, color: [f32; 4]) -> &mut Self {
        self.clears_screen = true;
        self.clear_color = color;
        self
    }

    pub fn set_depth_options(&mut self, depth_test: bool, depth_write: bool) -> &mut Self {
        self.depth_test = depth_test;
        self.depth_write = depth_write;
        self
    }

    pub fn set_blend_attachment(
        &mut self,
        attachment: vk::PipelineColorBlendAttachmentState,
    ) -> &mut Self {
        self.blend_attachment = attachment;
        self
    }

    /// Toggle back-face culling.
    pub fn set_culling_mode(&mut self, culling_enabled: bool) -> &mut Self {
        if !culling_enabled {
            tracing::warn!(stage = %self.name, "Culling is disabled, which could have negative effects on the performance");
        }
        self.cull_mode = if culling_enabled {
            vk::CullModeFlags::BACK
        } else {
            vk::CullModeFlags::NONE
        };
        self
    }

    pub fn set_primitive_topology(&mut self, topology: vk::PrimitiveTopology) -> &mut Self {
        self.topology = topology;
        self
    }

    pub fn set_wireframe(&mut self, wireframe: bool) -> &mut Self {
        self.wireframe = wireframe;
        self
    }

    pub fn set_line_width(&mut self, width: f32) -> &mut Self {
        self.line_width = width;
        self
    }

    pub fn set_multisampling(
        &mut self,
        samples: vk::SampleCountFlags,
        min_sample_shading: Option<f32>,
    ) -> &mut Self {
        self.samples = samples;
        self.min_sample_shading = min_sample_shading;
        self
    }

    pub fn set_tesselation_control_point_count(&mut self, count: u32) -> &mut Self {
        self.patch_control_points = count;
        self
    }

    /// Fixed viewport. Defaults to the full swapchain extent.
    pub fn set_viewport(&mut self, viewport: vk::Viewport) -> &mut Self {
        self.viewport = Some(viewport);
        self
    }

    /// Fixed scissor. Defaults to the full swapchain extent.
    pub fn set_scissor(&mut self, scissor: vk::Rect2D) -> &mut Self {
        self.scissor = Some(scissor);
        self
    }

    pub fn set_dynamic_states(&mut self, states: Vec<vk::DynamicState>) -> &mut Self {
        self.dynamic_states = states;
        self
    }

    /// Use an externally built render pass instead of the one planned from the writes.
    ///
    /// The pass must be compatible with the stage's attachments and outlive the compiled graph.
    pub fn set_render_pass(&mut self, render_pass: vk::RenderPass) -> &mut Self {
        self.render_pass = Some(render_pass);
        self
    }

    pub fn set_debug_label_color(&mut self, color: DebugLabelColor) -> &mut Self {
        self.label_color = color;
        self
    }

    pub(crate) fn run_updates(&mut self) {
        if let Some(on_update) = &mut self.on_update {
            on_update();
        }
        for push_constant in &mut self.push_constants {
            push_constant.update();
        }
    }
}

impl std::fmt::Debug for GraphicsStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsStage")
            .field("name", &self.name)
            .field("writes", &self.writes)
            .field("reads", &self.reads)
            .field("push_constants", &self.push_constants.len())
            .field("clears_screen", &self.clears_screen)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::TextureHandle;

    #[test]
    fn chained_setters_record_edges() {
        let mut stage = GraphicsStage::new("triangle", DebugLabelColor::Red);
        stage
            .writes_to(TextureHandle(0))
            .writes_to(TextureHandle(1))
            .reads_from(BufferHandle(0))
            .reads_from_in(BufferHandle(1), vk::ShaderStageFlags::VERTEX)
            .set_clears_screen(true)
            .set_depth_options(true, true);

        assert_eq!(stage.writes().len(), 2);
        assert_eq!(stage.reads()[0].shader_stages, None);
        assert_eq!(stage.reads()[1].shader_stages, Some(vk::ShaderStageFlags::VERTEX));
        assert!(stage.clears_screen());
        assert!(stage.depth_test && stage.depth_write);
    }

    #[test]
    fn defaults_match_a_plain_triangle_pipeline() {
        let stage = GraphicsStage::new("defaults", DebugLabelColor::Blue);
        assert_eq!(stage.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(stage.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(stage.samples, vk::SampleCountFlags::TYPE_1);
        assert!(!stage.clears_screen());
        assert_eq!(stage.clear_color(), [0.0; 4]);
    }

    #[test]
    fn push_constants_update_through_typed_callback() {
        let mut stage = GraphicsStage::new("animated", DebugLabelColor::Green);
        stage.add_push_constant_range(
            1.5f32,
            |time: &mut f32| *time += 1.0,
            vk::ShaderStageFlags::VERTEX,
            0,
        );

        let range = stage.push_constants()[0].range();
        assert_eq!(range.size, 4);
        assert_eq!(range.offset, 0);

        stage.run_updates();
        stage.run_updates();
        let value: f32 = bytemuck::pod_read_unaligned(stage.push_constants()[0].data());
        assert!((value - 3.5).abs() < f32::EPSILON);
    }

    #[test]
    fn stage_update_runs_before_push_constants() {
        use std::cell::Cell;
        use std::rc::Rc;

        let order = Rc::new(Cell::new(0u32));
        let mut stage = GraphicsStage::new("ordered", DebugLabelColor::Yellow);
        let seen = Rc::clone(&order);
        stage.set_on_update(move || seen.set(seen.get() * 10 + 1));
        let seen = Rc::clone(&order);
        stage.add_push_constant_range(
            0u32,
            move |_: &mut u32| seen.set(seen.get() * 10 + 2),
            vk::ShaderStageFlags::FRAGMENT,
            0,
        );

        stage.run_updates();
        assert_eq!(order.get(), 12);
    }
}
