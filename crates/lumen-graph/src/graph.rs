//! The render graph: declared resources and stages, compiled to GPU objects
//! and recorded once per frame.

use crate::error::{GraphError, Result};
use crate::frame::{collect_buffer_updates, descriptor_rewires, frame_ops, RecordOp, StageRecording};
use crate::order::{check_reads_are_produced, stage_order, StageEdges};
use crate::physical::{PhysicalBuffer, PhysicalGraphicsStage, PhysicalTexture};
use crate::plan::{
    check_element_sizes, plan_attachments, plan_descriptor_slots, plan_vertex_input, uniform_readers, AttachmentTarget,
    DescriptorSlot, DescriptorSource, UniformReaders,
};
use crate::resource::{
    BufferHandle, BufferResource, BufferUsage, ExternalTextureHandle, ExternalTextureResource,
    ResourceHandle, StageHandle, TextureHandle, TextureResource, TextureUsage,
};
use crate::stage::GraphicsStage;
use ash::vk;
use hashbrown::HashMap;
use lumen_core::{DescriptorPoolConfig, RendererConfig};
use lumen_gpu::pipelines::{full_scissor, full_viewport};
use lumen_gpu::render_pass::external_color_dependency;
use lumen_gpu::{
    CommandBuffer, DebugLabelColor, DescriptorBuilder, DescriptorSetAllocator,
    DescriptorSetLayoutCache, DescriptorUpdateBuilder, Framebuffer, GpuContext,
    GraphicsPipelineBuilder, PipelineCache, RenderPass, Semaphore, Swapchain,
};

/// Everything `compile` produced. Dropped as a unit on recompile or with the graph.
struct Compiled {
    // Stages drop before the textures their framebuffers reference.
    stages: HashMap<usize, PhysicalGraphicsStage>,
    textures: Vec<PhysicalTexture>,
    order: Vec<usize>,
    uniform_readers: UniformReaders,
}

/// GPU objects owned by the graph itself, created on first compile.
struct GraphDevice {
    // One semaphore for every frame. Only sound while the frame loop drains every
    // submission before the next acquire; overlapping frames need one per frame.
    render_finished: Semaphore,
    // Sets come from pools that must outlive the layouts they were allocated against,
    // so the allocator is declared (and dropped) before the layout cache.
    descriptor_allocator: DescriptorSetAllocator,
    layout_cache: DescriptorSetLayoutCache,
}

impl GraphDevice {
    fn new(ctx: &GpuContext, pools: DescriptorPoolConfig) -> Result<Self> {
        Ok(Self {
            render_finished: Semaphore::new(ctx, "Render graph finished")?,
            descriptor_allocator: DescriptorSetAllocator::new(ctx, pools)?,
            layout_cache: DescriptorSetLayoutCache::new(ctx),
        })
    }
}

/// Declarative render graph.
///
/// Resources and stages are added during setup, then [`compile`](Self::compile)
/// orders the stages and creates their GPU objects. [`render`](Self::render)
/// uploads changed buffers and records every stage into one command buffer.
pub struct RenderGraph {
    buffers: Vec<BufferResource>,
    textures: Vec<TextureResource>,
    external_textures: Vec<ExternalTextureResource>,
    stages: Vec<GraphicsStage>,
    compiled: Option<Compiled>,
    physical_buffers: Vec<PhysicalBuffer>,
    descriptor_pool: DescriptorPoolConfig,
    device: Option<GraphDevice>,
}

impl RenderGraph {
    /// Create an empty graph. Its descriptor pools, layout cache and semaphore
    /// are created by the first [`compile`](Self::compile).
    pub fn new(config: &RendererConfig) -> Self {
        Self {
            buffers: Vec::new(),
            textures: Vec::new(),
            external_textures: Vec::new(),
            stages: Vec::new(),
            compiled: None,
            physical_buffers: Vec::new(),
            descriptor_pool: config.descriptor_pool,
            device: None,
        }
    }

    fn device_mut(&mut self, ctx: &GpuContext) -> Result<&mut GraphDevice> {
        let device = match self.device.take() {
            Some(device) => device,
            None => GraphDevice::new(ctx, self.descriptor_pool)?,
        };
        Ok(self.device.insert(device))
    }

    /// Drop the compiled objects and hand their descriptor sets back to the pools.
    fn release_compiled(&mut self) -> Result<()> {
        self.compiled = None;
        if let Some(device) = self.device.as_mut() {
            device.descriptor_allocator.reset()?;
        }
        Ok(())
    }

    fn check_can_add(&self, name: &str, what: &str) -> Result<()> {
        if self.compiled.is_some() {
            return Err(GraphError::AlreadyCompiled);
        }
        if name.is_empty() {
            return Err(GraphError::InvalidArgument(format!("{what} name must not be empty")));
        }
        Ok(())
    }

    /// Declare a buffer. Its GPU buffer is created when data is first announced.
    pub fn add_buffer(&mut self, name: &str, usage: BufferUsage) -> Result<BufferHandle> {
        self.check_can_add(name, "Buffer resource")?;
        self.buffers.push(BufferResource::new(name, usage));
        Ok(BufferHandle(self.buffers.len() - 1))
    }

    /// Declare a texture. Back buffers alias the swapchain; others get their own image.
    pub fn add_texture(
        &mut self,
        name: &str,
        usage: TextureUsage,
        format: vk::Format,
    ) -> Result<TextureHandle> {
        self.check_can_add(name, "Texture resource")?;
        self.textures.push(TextureResource::new(name, usage, format));
        Ok(TextureHandle(self.textures.len() - 1))
    }

    /// Register a texture owned elsewhere so stages can sample it.
    pub fn add_external_texture(
        &mut self,
        name: &str,
        image_view: vk::ImageView,
        sampler: vk::Sampler,
    ) -> Result<ExternalTextureHandle> {
        self.check_can_add(name, "External texture")?;
        if image_view == vk::ImageView::null() || sampler == vk::Sampler::null() {
            return Err(GraphError::InvalidArgument(format!(
                "External texture '{name}' needs an image view and a sampler"
            )));
        }
        self.external_textures
            .push(ExternalTextureResource::new(name, image_view, sampler));
        Ok(ExternalTextureHandle(self.external_textures.len() - 1))
    }

    /// Declare a graphics stage. Its debug label color cycles through the palette.
    pub fn add_graphics_stage(&mut self, name: &str) -> Result<StageHandle> {
        self.check_can_add(name, "Graphics stage")?;
        let color = DebugLabelColor::cycle(self.stages.len());
        self.stages.push(GraphicsStage::new(name, color));
        Ok(StageHandle(self.stages.len() - 1))
    }

    pub fn buffer(&self, handle: BufferHandle) -> Result<&BufferResource> {
        self.buffers
            .get(handle.0)
            .ok_or_else(|| GraphError::UnknownHandle(format!("{handle:?}")))
    }

    /// Buffers stay mutable after compile so data can be announced every frame.
    pub fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut BufferResource> {
        self.buffers
            .get_mut(handle.0)
            .ok_or_else(|| GraphError::UnknownHandle(format!("{handle:?}")))
    }

    pub fn texture(&self, handle: TextureHandle) -> Result<&TextureResource> {
        self.textures
            .get(handle.0)
            .ok_or_else(|| GraphError::UnknownHandle(format!("{handle:?}")))
    }

    pub fn external_texture(&self, handle: ExternalTextureHandle) -> Result<&ExternalTextureResource> {
        self.external_textures
            .get(handle.0)
            .ok_or_else(|| GraphError::UnknownHandle(format!("{handle:?}")))
    }

    pub fn stage(&self, handle: StageHandle) -> Result<&GraphicsStage> {
        self.stages
            .get(handle.0)
            .ok_or_else(|| GraphError::UnknownHandle(format!("{handle:?}")))
    }

    /// Configure a stage. Stages are frozen once the graph is compiled.
    pub fn stage_mut(&mut self, handle: StageHandle) -> Result<&mut GraphicsStage> {
        if self.compiled.is_some() {
            return Err(GraphError::AlreadyCompiled);
        }
        self.stages
            .get_mut(handle.0)
            .ok_or_else(|| GraphError::UnknownHandle(format!("{handle:?}")))
    }

    pub const fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Stages in recording order. Empty before compile.
    pub fn stage_order(&self) -> Vec<StageHandle> {
        self.compiled
            .as_ref()
            .map(|c| c.order.iter().copied().map(StageHandle).collect())
            .unwrap_or_default()
    }

    pub fn physical_stage(&self, handle: StageHandle) -> Option<&PhysicalGraphicsStage> {
        self.compiled.as_ref()?.stages.get(&handle.0)
    }

    pub fn physical_texture(&self, handle: TextureHandle) -> Option<&PhysicalTexture> {
        self.compiled.as_ref()?.textures.get(handle.0)
    }

    pub fn physical_buffer(&self, handle: BufferHandle) -> Option<&PhysicalBuffer> {
        self.physical_buffers.get(handle.0)
    }

    /// Drop every compiled GPU object and allow the graph to be edited again.
    ///
    /// The device must be done with the last frame recorded from this graph.
    pub fn invalidate(&mut self) -> Result<()> {
        if self.compiled.is_some() {
            tracing::debug!("Render graph invalidated");
        }
        self.release_compiled()
    }

    fn resource_name(&self, resource: ResourceHandle) -> String {
        match resource {
            ResourceHandle::Buffer(h) => self.buffers.get(h.0).map(|b| b.name().to_string()),
            ResourceHandle::Texture(h) => self.textures.get(h.0).map(|t| t.name().to_string()),
            ResourceHandle::ExternalTexture(h) => {
                self.external_textures.get(h.0).map(|t| t.name().to_string())
            }
        }
        .unwrap_or_else(|| format!("{resource:?}"))
    }

    fn check_handles(&self) -> Result<()> {
        let known = |resource: ResourceHandle| match resource {
            ResourceHandle::Buffer(h) => h.0 < self.buffers.len(),
            ResourceHandle::Texture(h) => h.0 < self.textures.len(),
            ResourceHandle::ExternalTexture(h) => h.0 < self.external_textures.len(),
        };
        for stage in &self.stages {
            for &resource in stage.writes.iter().chain(stage.reads.iter().map(|r| &r.resource)) {
                if !known(resource) {
                    return Err(GraphError::UnknownHandle(format!(
                        "{resource:?} used by stage '{}'",
                        stage.name()
                    )));
                }
            }
            if let Some(&resource) = stage
                .writes
                .iter()
                .find(|r| !matches!(r, ResourceHandle::Texture(_)))
            {
                return Err(GraphError::InvalidArgument(format!(
                    "Stage '{}' writes to '{}', but stages can only write textures",
                    stage.name(),
                    self.resource_name(resource)
                )));
            }
        }
        Ok(())
    }

    /// Stages needed to produce `target`, in recording order. Touches no GPU state.
    fn plan_order(&self, target: TextureHandle) -> Result<Vec<usize>> {
        let target_name = self.texture(target)?.name().to_string();
        self.check_handles()?;

        let edges: Vec<StageEdges<'_>> = self
            .stages
            .iter()
            .map(|stage| StageEdges {
                name: stage.name(),
                reads: stage.reads.iter().map(|r| r.resource).collect(),
                writes: stage.writes.clone(),
            })
            .collect();
        let order = stage_order(&edges, target.into(), &target_name)?;
        check_reads_are_produced(
            &edges,
            &order,
            |r| matches!(r, ResourceHandle::Texture(_)),
            |r| self.resource_name(r),
        )?;
        Ok(order)
    }

    /// Check every vertex and index buffer read by `order` can be bound.
    fn check_buffer_reads(&self, order: &[usize]) -> Result<()> {
        for &index in order {
            let stage = &self.stages[index];
            let buffers = stage.reads.iter().filter_map(|read| match read.resource {
                ResourceHandle::Buffer(buffer) => Some(&self.buffers[buffer.0]),
                _ => None,
            });
            check_element_sizes(stage.name(), buffers)?;
        }
        Ok(())
    }

    /// Order the stages writing towards `target` and create every GPU object they need.
    ///
    /// Compiling an already compiled graph rebuilds it from scratch; the device must
    /// be done with the last frame recorded from it.
    pub fn compile(
        &mut self,
        ctx: &GpuContext,
        swapchain: &Swapchain,
        pipeline_cache: &PipelineCache,
        target: TextureHandle,
    ) -> Result<()> {
        self.release_compiled()?;
        let order = self.plan_order(target)?;
        self.device_mut(ctx)?;

        tracing::trace!("Final order of {} stages:", order.len());
        for &index in &order {
            let stage = &self.stages[index];
            tracing::trace!(
                "   - {} [reads: {}, writes: {}, push constant ranges: {}]",
                stage.name(),
                stage.reads.len(),
                stage.writes.len(),
                stage.push_constants.len()
            );
        }

        self.create_buffer_resources(ctx)?;
        self.check_buffer_reads(&order)?;
        let extent = swapchain.extent();
        let textures = self.create_texture_resources(ctx, extent)?;

        let mut descriptor_slots = HashMap::new();
        let mut stages = HashMap::new();
        for &index in &order {
            let slots = plan_descriptor_slots(self.stages[index].name(), &self.stages[index].reads, |b| {
                self.buffers[b.0].usage()
            })?;
            let descriptor = self.build_descriptor_set(ctx, index, &slots)?;
            let physical = self.build_stage(ctx, swapchain, pipeline_cache, &textures, index, descriptor)?;
            stages.insert(index, physical);
            descriptor_slots.insert(index, slots);
        }

        let readers = uniform_readers(&order, &descriptor_slots);
        for (buffer, stage_readers) in &readers {
            for reader in stage_readers {
                tracing::trace!(
                    "   - Stage '{}' is reading from uniform buffer '{}'",
                    self.stages[reader.stage].name(),
                    self.buffers[buffer.0].name()
                );
            }
        }

        tracing::info!(
            stages = order.len(),
            buffers = self.buffers.len(),
            textures = self.textures.len(),
            "Render graph compiled"
        );

        self.compiled = Some(Compiled {
            stages,
            textures,
            order,
            uniform_readers: readers,
        });
        Ok(())
    }

    /// Run buffer update callbacks and upload everything announced so far.
    fn create_buffer_resources(&mut self, ctx: &GpuContext) -> Result<()> {
        tracing::trace!("Allocating {} physical buffers:", self.buffers.len());
        self.physical_buffers
            .resize_with(self.buffers.len(), PhysicalBuffer::default);
        for buffer in &mut self.buffers {
            buffer.run_on_update();
            tracing::trace!(
                "   - {} [type: {}, size: {} bytes]",
                buffer.name(),
                buffer.usage().as_str(),
                buffer.size()
            );
        }
        self.upload_dirty_buffers(ctx)?;
        Ok(())
    }

    fn create_texture_resources(&self, ctx: &GpuContext, extent: vk::Extent2D) -> Result<Vec<PhysicalTexture>> {
        tracing::trace!("Allocating {} physical textures:", self.textures.len());
        self.textures
            .iter()
            .map(|texture| {
                tracing::trace!(
                    "   - {} [format: {:?}, usage: {}]",
                    texture.name(),
                    texture.format(),
                    texture.usage().as_str()
                );
                PhysicalTexture::new(ctx, texture, extent)
            })
            .collect()
    }

    /// Rebuild every dirty buffer. Returns the rebuilt handles.
    fn upload_dirty_buffers(&mut self, ctx: &GpuContext) -> Result<Vec<BufferHandle>> {
        let dirty = collect_buffer_updates(&self.buffers);
        for &handle in &dirty {
            let buffer = &mut self.buffers[handle.0];
            self.physical_buffers[handle.0].rebuild(ctx, buffer)?;
            buffer.clear_dirty();
        }
        Ok(dirty)
    }

    /// Layout and set holding a stage's uniform buffers and external textures.
    fn build_descriptor_set(
        &mut self,
        ctx: &GpuContext,
        index: usize,
        slots: &[DescriptorSlot],
    ) -> Result<Option<(vk::DescriptorSet, vk::DescriptorSetLayout)>> {
        if slots.is_empty() {
            return Ok(None);
        }
        let name = format!("Descriptor set {}", self.stages[index].name());

        let mut buffer_infos = Vec::with_capacity(slots.len());
        let mut image_infos = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot.source {
                DescriptorSource::Uniform(buffer) => {
                    let info = self.physical_buffers[buffer.0].descriptor_info().ok_or_else(|| {
                        GraphError::InvalidArgument(format!(
                            "Uniform buffer '{}' read by stage '{}' has no data at compile time",
                            self.buffers[buffer.0].name(),
                            self.stages[index].name()
                        ))
                    })?;
                    buffer_infos.push(Some(info));
                    image_infos.push(None);
                }
                DescriptorSource::Sampler(texture) => {
                    buffer_infos.push(None);
                    image_infos.push(Some(self.external_textures[texture.0].descriptor_info()));
                }
            }
        }

        let mut builder = DescriptorBuilder::new();
        for ((slot, buffer_info), image_info) in slots.iter().zip(&buffer_infos).zip(&image_infos) {
            builder = match (buffer_info, image_info) {
                (Some(info), _) => builder.bind_uniform_buffer(info, slot.stages),
                (None, Some(info)) => builder.bind_image(info, slot.stages),
                (None, None) => builder,
            };
        }

        let device = self.device_mut(ctx)?;
        let (set, layout) = builder.build(
            ctx,
            &mut device.layout_cache,
            &mut device.descriptor_allocator,
            &name,
        )?;
        Ok(Some((set, layout)))
    }

    fn build_stage(
        &self,
        ctx: &GpuContext,
        swapchain: &Swapchain,
        pipeline_cache: &PipelineCache,
        textures: &[PhysicalTexture],
        index: usize,
        descriptor: Option<(vk::DescriptorSet, vk::DescriptorSetLayout)>,
    ) -> Result<PhysicalGraphicsStage> {
        let stage = &self.stages[index];
        let name = stage.name();
        let (descriptor_set, descriptor_layout) = descriptor.unzip();

        // Render pass from the written textures.
        let targets: Vec<AttachmentTarget> = stage
            .writes
            .iter()
            .filter_map(|resource| match *resource {
                ResourceHandle::Texture(texture) => Some(AttachmentTarget {
                    texture,
                    usage: self.textures[texture.0].usage(),
                    format: self.textures[texture.0].format(),
                }),
                _ => None,
            })
            .collect();
        let attachments = plan_attachments(name, &targets, stage.clears_screen, swapchain.image_format())?;

        let owned_render_pass = match stage.render_pass {
            Some(_) => None,
            None => Some(RenderPass::new(
                ctx,
                &attachments.attachments,
                &attachments.color_refs,
                attachments.depth_ref.as_ref(),
                &[external_color_dependency()],
                &format!("Render pass {name}"),
            )?),
        };
        let render_pass = stage
            .render_pass
            .or_else(|| owned_render_pass.as_ref().map(RenderPass::handle))
            .unwrap_or_default();

        // Vertex input from vertex buffer reads.
        let vertex_reads: Vec<(BufferHandle, &BufferResource)> = stage
            .reads
            .iter()
            .filter_map(|read| match read.resource {
                ResourceHandle::Buffer(buffer)
                    if self.buffers[buffer.0].usage() == BufferUsage::Vertex =>
                {
                    Some((buffer, &self.buffers[buffer.0]))
                }
                _ => None,
            })
            .collect();
        let vertex_input = plan_vertex_input(&vertex_reads, &stage.buffer_bindings);

        let extent = swapchain.extent();
        let mut layouts: Vec<vk::DescriptorSetLayout> = descriptor_layout.into_iter().collect();
        layouts.extend_from_slice(&stage.descriptor_layouts);

        let mut builder = GraphicsPipelineBuilder::new()
            .set_vertex_input_bindings(
                vertex_input
                    .bindings
                    .iter()
                    .copied()
                    .chain(stage.vertex_bindings.iter().copied())
                    .collect(),
            )
            .set_vertex_input_attributes(
                vertex_input
                    .attributes
                    .iter()
                    .copied()
                    .chain(stage.vertex_attributes.iter().copied())
                    .collect(),
            )
            .set_primitive_topology(stage.topology)
            .set_tesselation_control_point_count(stage.patch_control_points)
            .set_viewport(stage.viewport.unwrap_or_else(|| full_viewport(extent)))
            .set_scissor(stage.scissor.unwrap_or_else(|| full_scissor(extent)))
            .set_wireframe(stage.wireframe)
            .set_culling_mode(stage.cull_mode)
            .set_front_face(vk::FrontFace::CLOCKWISE)
            .set_line_width(stage.line_width)
            .set_multisampling(stage.samples, stage.min_sample_shading)
            .set_depth_test(stage.depth_test)
            .set_depth_write(stage.depth_write)
            .set_depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .set_color_blend_attachments(vec![stage.blend_attachment; attachments.blend_attachment_count()])
            .set_dynamic_states(stage.dynamic_states.clone())
            .set_render_pass(render_pass)
            .set_descriptor_set_layouts(layouts);
        for shader in &stage.shaders {
            builder = builder.add_shader(shader);
        }
        for push_constant in &stage.push_constants {
            builder = builder.add_push_constant_range(push_constant.range());
        }
        let pipeline = builder.build(ctx, pipeline_cache, &format!("Graphics pipeline {name}"))?;

        // One framebuffer per swapchain image.
        let framebuffers = swapchain
            .image_views()
            .iter()
            .enumerate()
            .map(|(image_index, &swapchain_view)| {
                let views: Vec<vk::ImageView> = attachments
                    .textures
                    .iter()
                    .map(|texture| match textures.get(texture.0) {
                        Some(PhysicalTexture::Image(image)) => image.view(),
                        _ => swapchain_view,
                    })
                    .collect();
                Framebuffer::new(
                    ctx,
                    render_pass,
                    &views,
                    extent,
                    &format!("Framebuffer {name} #{image_index}"),
                )
            })
            .collect::<lumen_gpu::Result<Vec<_>>>()?;

        Ok(PhysicalGraphicsStage::new(
            name,
            owned_render_pass,
            render_pass,
            attachments,
            pipeline,
            framebuffers,
            descriptor_set,
            extent,
        ))
    }

    /// Record and submit one frame into `cmd`, rendering to swapchain image `image_index`.
    ///
    /// Runs stage and push constant update callbacks, rebuilds buffers with newly
    /// announced data, rewires the descriptor sets reading rebuilt uniform buffers,
    /// then records every stage in compiled order. The submission waits on
    /// `image_available`; present must wait on the returned semaphore.
    pub fn render(
        &mut self,
        ctx: &GpuContext,
        cmd: &CommandBuffer,
        image_index: u32,
        image_available: vk::Semaphore,
    ) -> Result<vk::Semaphore> {
        let order = self.compiled_order()?;

        for &index in &order {
            self.stages[index].run_updates();
        }
        for buffer in &mut self.buffers {
            buffer.run_on_update();
        }
        let rebuilt = self.upload_dirty_buffers(ctx)?;

        let Some(compiled) = &self.compiled else {
            return Err(GraphError::NotCompiled);
        };
        let buffers = &self.buffers;
        let physical_buffers = &self.physical_buffers;

        let rewires = descriptor_rewires(&rebuilt, |b| buffers[b.0].usage(), &compiled.uniform_readers);
        if !rewires.is_empty() {
            let infos: Vec<Option<vk::DescriptorBufferInfo>> = rewires
                .iter()
                .map(|rewire| physical_buffers[rewire.buffer.0].descriptor_info())
                .collect();
            let mut updates = DescriptorUpdateBuilder::new();
            for (rewire, info) in rewires.iter().zip(&infos) {
                let set = compiled
                    .stages
                    .get(&rewire.stage)
                    .and_then(PhysicalGraphicsStage::descriptor_set);
                if let (Some(set), Some(info)) = (set, info) {
                    updates = updates.write_uniform_buffer(set, rewire.binding, info);
                }
            }
            tracing::trace!(writes = updates.len(), "Rewiring rebuilt uniform buffers");
            updates.update(ctx.device());
        }

        let recordings: Vec<StageRecording> = order
            .iter()
            .map(|&index| {
                let stage = &self.stages[index];
                let buffer_reads = stage.reads.iter().filter_map(|read| match read.resource {
                    ResourceHandle::Buffer(buffer) => Some(buffer),
                    _ => None,
                });
                let index_buffers = buffer_reads
                    .clone()
                    .filter(|b| buffers[b.0].usage() == BufferUsage::Index)
                    .collect();
                let vertex_reads: Vec<(BufferHandle, &BufferResource)> = buffer_reads
                    .filter(|b| buffers[b.0].usage() == BufferUsage::Vertex)
                    .map(|b| (b, &buffers[b.0]))
                    .collect();
                StageRecording {
                    stage: index,
                    label_color: stage.label_color(),
                    clears_screen: stage.clears_screen(),
                    index_buffers,
                    vertex_buffers: plan_vertex_input(&vertex_reads, &stage.buffer_bindings).buffers,
                    push_constant_count: stage.push_constants.len(),
                    has_descriptor_set: compiled
                        .stages
                        .get(&index)
                        .is_some_and(|p| p.descriptor_set().is_some()),
                }
            })
            .collect();
        let ops = frame_ops(&recordings, |b| physical_buffers[b.0].handle().is_some());

        let Self {
            stages,
            compiled,
            buffers,
            physical_buffers,
            device,
            ..
        } = self;
        let (Some(compiled), Some(device)) = (compiled.as_ref(), device.as_ref()) else {
            return Err(GraphError::NotCompiled);
        };
        let render_finished = &device.render_finished;
        let frame = FrameTarget {
            buffers,
            physical_buffers,
            compiled,
            image_index,
        };
        for op in &ops {
            frame.record(op, stages, cmd)?;
        }

        cmd.submit_with_semaphores(&[image_available], &[render_finished.handle()])?;
        Ok(render_finished.handle())
    }

    fn compiled_order(&self) -> Result<Vec<usize>> {
        self.compiled
            .as_ref()
            .map(|compiled| compiled.order.clone())
            .ok_or(GraphError::NotCompiled)
    }
}

/// Borrowed view of a compiled graph while its commands are recorded.
struct FrameTarget<'a> {
    buffers: &'a [BufferResource],
    physical_buffers: &'a [PhysicalBuffer],
    compiled: &'a Compiled,
    image_index: u32,
}

impl FrameTarget<'_> {
    fn physical(&self, stage: usize) -> Result<&PhysicalGraphicsStage> {
        self.compiled
            .stages
            .get(&stage)
            .ok_or_else(|| GraphError::UnknownHandle(format!("{:?}", StageHandle(stage))))
    }

    fn record(&self, op: &RecordOp, stages: &mut [GraphicsStage], cmd: &CommandBuffer) -> Result<()> {
        match *op {
            RecordOp::BeginDebugRegion { stage, color } => {
                cmd.begin_debug_label_region(stages[stage].name(), color);
            }
            RecordOp::BeginRenderPass { stage, clear } => {
                let physical = self.physical(stage)?;
                let clear_values = if clear {
                    physical.attachments().clear_values(stages[stage].clear_color())
                } else {
                    Vec::new()
                };
                let begin_info = vk::RenderPassBeginInfo::default()
                    .render_pass(physical.render_pass())
                    .framebuffer(physical.framebuffer(self.image_index)?)
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D { x: 0, y: 0 },
                        extent: physical.extent(),
                    })
                    .clear_values(&clear_values);
                cmd.begin_render_pass(&begin_info, vk::SubpassContents::INLINE);
            }
            RecordOp::BindIndexBuffer(buffer) => {
                if let Some(handle) = self.physical_buffers[buffer.0].handle() {
                    let index_type = if self.buffers[buffer.0].element_size() == 2 {
                        vk::IndexType::UINT16
                    } else {
                        vk::IndexType::UINT32
                    };
                    cmd.bind_index_buffer(handle, 0, index_type);
                }
            }
            RecordOp::BindVertexBuffers {
                first_binding,
                ref buffers,
            } => {
                let handles: Vec<vk::Buffer> = buffers
                    .iter()
                    .filter_map(|b| self.physical_buffers[b.0].handle())
                    .collect();
                cmd.bind_vertex_buffers(first_binding, &handles);
            }
            RecordOp::BindPipeline(stage) => {
                cmd.bind_pipeline(vk::PipelineBindPoint::GRAPHICS, self.physical(stage)?.pipeline());
            }
            RecordOp::PushConstants { stage, index } => {
                let layout = self.physical(stage)?.pipeline_layout();
                if let Some(push_constant) = stages[stage].push_constants.get(index) {
                    let range = push_constant.range();
                    cmd.push_constants(layout, range.stage_flags, range.offset, push_constant.data());
                }
            }
            RecordOp::BindDescriptorSet(stage) => {
                let physical = self.physical(stage)?;
                if let Some(set) = physical.descriptor_set() {
                    cmd.bind_descriptor_sets(
                        vk::PipelineBindPoint::GRAPHICS,
                        physical.pipeline_layout(),
                        0,
                        &[set],
                    );
                }
            }
            RecordOp::Record(stage) => {
                let physical = self.physical(stage)?;
                if let Some(on_record) = stages[stage].on_record.as_mut() {
                    on_record(physical, cmd);
                }
            }
            RecordOp::EndRenderPass => {
                cmd.end_render_pass();
            }
            RecordOp::FullBarrier => {
                cmd.full_barrier();
            }
            RecordOp::EndDebugRegion => {
                cmd.end_debug_label_region();
            }
        }
        Ok(())
    }
}
