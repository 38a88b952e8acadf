//! Recording façade over a primary command buffer.

use crate::commands::barrier::{full_memory_barrier, layout_transition_barrier};
use crate::commands::debug_label::DebugLabelColor;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::resources::Buffer;
use crate::sync::Fence;
use ash::vk;
use bytemuck::Pod;
use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::sync::Arc;

/// Stage every wait semaphore of a frame submission waits at.
pub fn wait_stages(wait_semaphore_count: usize) -> Vec<vk::PipelineStageFlags> {
    vec![vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT; wait_semaphore_count]
}

/// A buffer is idle when nothing was submitted since it was handed out, or when
/// its last submission signaled the fence. The fence is only polled in the latter case.
pub fn is_idle(submitted: bool, fence_signaled: impl FnOnce() -> Result<bool>) -> Result<bool> {
    if submitted {
        fence_signaled()
    } else {
        Ok(true)
    }
}

/// A primary command buffer with the fence its submissions signal.
///
/// Obtained from [`CommandPool::request_command_buffer`](super::CommandPool::request_command_buffer)
/// already in the recording state. Recording methods return `&Self` so calls chain.
pub struct CommandBuffer {
    device: Arc<ash::Device>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    cmd: vk::CommandBuffer,
    queue: vk::Queue,
    fence: Fence,
    submitted: Cell<bool>,
    // Upload sources that must live until the GPU has consumed them.
    staging: RefCell<Vec<Buffer>>,
    name: String,
}

impl CommandBuffer {
    pub(crate) fn new(
        ctx: &GpuContext,
        pool: vk::CommandPool,
        queue: vk::Queue,
        name: &str,
    ) -> Result<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe { ctx.device().allocate_command_buffers(&alloc_info) }
            .map_err(|e| GpuError::call("vkAllocateCommandBuffers failed", e, name))?
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::InvalidState(format!("No command buffer allocated for {name}")))?;
        ctx.set_debug_name(cmd, name);

        let fence = Fence::new(ctx, &format!("{name} fence"), false)?;

        Ok(Self {
            device: ctx.shared_device(),
            debug_utils: ctx.debug_utils().cloned(),
            cmd,
            queue,
            fence,
            submitted: Cell::new(false),
            staging: RefCell::new(Vec::new()),
            name: name.to_string(),
        })
    }

    /// Raw command buffer handle.
    pub const fn handle(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// Fence signaled when the last submission of this buffer finished.
    pub const fn fence(&self) -> &Fence {
        &self.fence
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the last submission finished. Returns at once if nothing was submitted
    /// since the buffer was last handed out.
    pub fn wait(&self, timeout_ns: u64) -> Result<()> {
        if self.submitted.get() {
            self.fence.wait(timeout_ns)?;
        }
        Ok(())
    }

    /// Never submitted since handed out, or the last submission completed.
    pub(crate) fn is_idle(&self) -> Result<bool> {
        is_idle(self.submitted.get(), || self.fence.status())
    }

    /// Make an idle buffer recordable again: reset its fence and commands,
    /// drop old staging buffers, begin.
    pub(crate) fn recycle(&mut self, ctx: &GpuContext, name: &str) -> Result<()> {
        self.fence.reset()?;
        self.submitted.set(false);
        // Moves a buffer abandoned mid-recording back to the initial state.
        unsafe {
            self.device
                .reset_command_buffer(self.cmd, vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| GpuError::call("vkResetCommandBuffer failed", e, &self.name))?;
        self.staging.get_mut().clear();
        if self.name != name {
            ctx.set_debug_name(self.cmd, name);
            self.name = name.to_string();
        }
        self.begin()
    }

    /// Begin recording for a single submission.
    pub fn begin(&self) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(self.cmd, &begin_info) }
            .map_err(|e| GpuError::call("vkBeginCommandBuffer failed", e, &self.name))
    }

    /// End recording.
    pub fn end(&self) -> Result<()> {
        unsafe { self.device.end_command_buffer(self.cmd) }
            .map_err(|e| GpuError::call("vkEndCommandBuffer failed", e, &self.name))
    }

    // Debug labels

    fn label(name: &str, color: [f32; 4]) -> (CString, [f32; 4]) {
        let name = CString::new(name.replace('\0', " ")).unwrap_or_default();
        (name, color)
    }

    /// Open a colored debug region. No-op without debug utils.
    pub fn begin_debug_label_region(&self, name: &str, color: DebugLabelColor) -> &Self {
        if let Some(debug_utils) = &self.debug_utils {
            let (name, color) = Self::label(name, color.rgba());
            let label = vk::DebugUtilsLabelEXT::default().label_name(&name).color(color);
            unsafe { debug_utils.cmd_begin_debug_utils_label(self.cmd, &label) };
        }
        self
    }

    /// Close the innermost debug region.
    pub fn end_debug_label_region(&self) -> &Self {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe { debug_utils.cmd_end_debug_utils_label(self.cmd) };
        }
        self
    }

    /// Insert a single debug marker.
    pub fn insert_debug_label(&self, name: &str, color: DebugLabelColor) -> &Self {
        if let Some(debug_utils) = &self.debug_utils {
            let (name, color) = Self::label(name, color.rgba());
            let label = vk::DebugUtilsLabelEXT::default().label_name(&name).color(color);
            unsafe { debug_utils.cmd_insert_debug_utils_label(self.cmd, &label) };
        }
        self
    }

    // Render passes

    pub fn begin_render_pass(
        &self,
        begin_info: &vk::RenderPassBeginInfo<'_>,
        contents: vk::SubpassContents,
    ) -> &Self {
        unsafe { self.device.cmd_begin_render_pass(self.cmd, begin_info, contents) };
        self
    }

    pub fn end_render_pass(&self) -> &Self {
        unsafe { self.device.cmd_end_render_pass(self.cmd) };
        self
    }

    pub fn begin_rendering(&self, rendering_info: &vk::RenderingInfo<'_>) -> &Self {
        unsafe { self.device.cmd_begin_rendering(self.cmd, rendering_info) };
        self
    }

    pub fn end_rendering(&self) -> &Self {
        unsafe { self.device.cmd_end_rendering(self.cmd) };
        self
    }

    // Binding

    pub fn bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) -> &Self {
        unsafe { self.device.cmd_bind_pipeline(self.cmd, bind_point, pipeline) };
        self
    }

    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &[vk::DescriptorSet],
    ) -> &Self {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(self.cmd, bind_point, layout, first_set, sets, &[]);
        }
        self
    }

    /// Bind `buffers` to consecutive bindings starting at `first_binding`, all at offset zero.
    pub fn bind_vertex_buffers(&self, first_binding: u32, buffers: &[vk::Buffer]) -> &Self {
        let offsets = vec![0; buffers.len()];
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.cmd, first_binding, buffers, &offsets);
        }
        self
    }

    pub fn bind_index_buffer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) -> &Self {
        unsafe {
            self.device
                .cmd_bind_index_buffer(self.cmd, buffer, offset, index_type);
        }
        self
    }

    pub fn push_constants(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) -> &Self {
        unsafe {
            self.device
                .cmd_push_constants(self.cmd, layout, stages, offset, data);
        }
        self
    }

    /// Push a plain value as constants.
    pub fn push_constant<T: Pod>(
        &self,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        offset: u32,
        value: &T,
    ) -> &Self {
        self.push_constants(layout, stages, offset, bytemuck::bytes_of(value))
    }

    pub fn set_viewport(&self, viewport: vk::Viewport) -> &Self {
        unsafe { self.device.cmd_set_viewport(self.cmd, 0, &[viewport]) };
        self
    }

    pub fn set_scissor(&self, scissor: vk::Rect2D) -> &Self {
        unsafe { self.device.cmd_set_scissor(self.cmd, 0, &[scissor]) };
        self
    }

    // Drawing

    pub fn draw(
        &self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> &Self {
        unsafe {
            self.device.cmd_draw(
                self.cmd,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
        self
    }

    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) -> &Self {
        unsafe {
            self.device.cmd_draw_indexed(
                self.cmd,
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
        self
    }

    // Copies

    pub fn copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) -> &Self {
        unsafe { self.device.cmd_copy_buffer(self.cmd, src, dst, regions) };
        self
    }

    /// Copy `data` into `dst` through a staging buffer owned by this command buffer.
    pub fn copy_data_to_buffer(
        &self,
        ctx: &GpuContext,
        data: &[u8],
        dst: vk::Buffer,
        dst_offset: vk::DeviceSize,
    ) -> Result<&Self> {
        let src = self.stage(ctx, data)?;
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset,
            size: data.len() as vk::DeviceSize,
        };
        Ok(self.copy_buffer(src, dst, &[region]))
    }

    pub fn copy_buffer_to_image(
        &self,
        src: vk::Buffer,
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        regions: &[vk::BufferImageCopy],
    ) -> &Self {
        unsafe {
            self.device
                .cmd_copy_buffer_to_image(self.cmd, src, dst, dst_layout, regions);
        }
        self
    }

    /// Copy `data` into `dst` through a staging buffer owned by this command buffer.
    pub fn copy_data_to_image(
        &self,
        ctx: &GpuContext,
        data: &[u8],
        dst: vk::Image,
        dst_layout: vk::ImageLayout,
        region: vk::BufferImageCopy,
    ) -> Result<&Self> {
        let src = self.stage(ctx, data)?;
        Ok(self.copy_buffer_to_image(src, dst, dst_layout, &[region]))
    }

    fn stage(&self, ctx: &GpuContext, data: &[u8]) -> Result<vk::Buffer> {
        let index = self.staging.borrow().len();
        let staging = Buffer::with_data(
            ctx,
            data,
            vk::BufferUsageFlags::TRANSFER_SRC,
            &format!("{} staging {index}", self.name),
        )?;
        let handle = staging.handle();
        self.staging.borrow_mut().push(staging);
        Ok(handle)
    }

    // Barriers

    pub fn pipeline_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        memory_barriers: &[vk::MemoryBarrier<'_>],
        buffer_barriers: &[vk::BufferMemoryBarrier<'_>],
        image_barriers: &[vk::ImageMemoryBarrier<'_>],
    ) -> &Self {
        unsafe {
            self.device.cmd_pipeline_barrier(
                self.cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                memory_barriers,
                buffer_barriers,
                image_barriers,
            );
        }
        self
    }

    pub fn insert_image_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::ImageMemoryBarrier<'_>,
    ) -> &Self {
        self.insert_image_barriers(src_stage, dst_stage, std::slice::from_ref(barrier))
    }

    pub fn insert_image_barriers(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::ImageMemoryBarrier<'_>],
    ) -> &Self {
        self.pipeline_barrier(src_stage, dst_stage, &[], &[], barriers)
    }

    pub fn insert_buffer_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::BufferMemoryBarrier<'_>,
    ) -> &Self {
        self.insert_buffer_barriers(src_stage, dst_stage, std::slice::from_ref(barrier))
    }

    pub fn insert_buffer_barriers(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::BufferMemoryBarrier<'_>],
    ) -> &Self {
        self.pipeline_barrier(src_stage, dst_stage, &[], barriers, &[])
    }

    pub fn insert_memory_barrier(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barrier: &vk::MemoryBarrier<'_>,
    ) -> &Self {
        self.insert_memory_barriers(src_stage, dst_stage, std::slice::from_ref(barrier))
    }

    pub fn insert_memory_barriers(
        &self,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        barriers: &[vk::MemoryBarrier<'_>],
    ) -> &Self {
        self.pipeline_barrier(src_stage, dst_stage, barriers, &[], &[])
    }

    /// Wait for all prior commands and make their writes visible to all later reads.
    pub fn full_barrier(&self) -> &Self {
        self.insert_memory_barrier(
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            &full_memory_barrier(),
        )
    }

    /// Transition `image` between layouts, access masks derived from the layouts.
    pub fn change_image_layout(
        &self,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        subresource_range: vk::ImageSubresourceRange,
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
    ) -> &Self {
        let barrier = layout_transition_barrier(image, old_layout, new_layout, subresource_range);
        self.insert_image_barrier(src_stage, dst_stage, &barrier)
    }

    // Submission

    /// End recording and submit, signaling this buffer's fence on completion.
    pub fn submit(&self) -> Result<()> {
        self.submit_with_semaphores(&[], &[])
    }

    /// Submit and block until the GPU finished.
    pub fn submit_and_wait(&self) -> Result<()> {
        self.submit()?;
        self.fence.wait(u64::MAX)
    }

    /// End recording and submit, waiting on `wait_semaphores` at color attachment
    /// output and signaling `signal_semaphores` and this buffer's fence.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn submit_with_semaphores(
        &self,
        wait_semaphores: &[vk::Semaphore],
        signal_semaphores: &[vk::Semaphore],
    ) -> Result<()> {
        self.end()?;

        let stages = wait_stages(wait_semaphores.len());
        let command_buffers = [self.cmd];
        let submit_info = vk::SubmitInfo::default()
            .command_buffers(&command_buffers)
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(&stages)
            .signal_semaphores(signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.queue, &[submit_info], self.fence.handle())
        }
        .map_err(|e| GpuError::call("vkQueueSubmit failed", e, &self.name))?;
        self.submitted.set(true);
        Ok(())
    }

    /// [`submit_with_semaphores`](Self::submit_with_semaphores), then block until done.
    pub fn submit_and_wait_with_semaphores(
        &self,
        wait_semaphores: &[vk::Semaphore],
        signal_semaphores: &[vk::Semaphore],
    ) -> Result<()> {
        self.submit_with_semaphores(wait_semaphores, signal_semaphores)?;
        self.fence.wait(u64::MAX)
    }
}
