//! Per-thread command pool that recycles finished command buffers.

use crate::commands::buffer::CommandBuffer;
use crate::context::{GpuContext, QueueType};
use crate::error::{require_name, GpuError, Result};
use ash::vk;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::ThreadId;

/// Debug name of a pool created on the thread `thread_id`.
pub fn thread_pool_name(name: &str, thread_id: ThreadId) -> String {
    let mut hasher = DefaultHasher::new();
    thread_id.hash(&mut hasher);
    format!("{name} (thread {:016x})", hasher.finish())
}

/// Command pool bound to one queue and the thread that created it.
///
/// Buffers handed out by [`request_command_buffer`](Self::request_command_buffer)
/// are reused once idle: their submission completed, or they were never submitted.
/// The buffer list only grows.
pub struct CommandPool {
    // Declared first so buffers (and their fences) drop before the pool is destroyed.
    buffers: Vec<CommandBuffer>,
    device: Arc<ash::Device>,
    pool: vk::CommandPool,
    queue_type: QueueType,
    queue: vk::Queue,
    name: String,
    // Vulkan command pools are externally synchronized; keep this one on its thread.
    _not_send: PhantomData<*const ()>,
}

impl CommandPool {
    /// Create a pool on the family of `queue_type` whose buffers can be reset individually.
    pub fn new(ctx: &GpuContext, queue_type: QueueType, name: &str) -> Result<Self> {
        require_name(name, "Command pool")?;
        let name = thread_pool_name(name, std::thread::current().id());

        let create_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(ctx.queue_family(queue_type));

        let pool = unsafe { ctx.device().create_command_pool(&create_info, None) }
            .map_err(|e| GpuError::call("vkCreateCommandPool failed", e, &name))?;
        ctx.set_debug_name(pool, &name);

        tracing::debug!(pool = %name, ?queue_type, "Created command pool");

        Ok(Self {
            buffers: Vec::new(),
            device: ctx.shared_device(),
            pool,
            queue_type,
            queue: ctx.queue(queue_type),
            name,
            _not_send: PhantomData,
        })
    }

    pub const fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub const fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of command buffers allocated so far.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Block until every submitted buffer of this pool has finished executing.
    pub fn wait_for_submissions(&self, timeout_ns: u64) -> Result<()> {
        for buffer in &self.buffers {
            buffer.wait(timeout_ns)?;
        }
        Ok(())
    }

    /// Hand out a command buffer in the recording state.
    ///
    /// The first idle buffer is reset and reused.
    /// When every buffer is still in flight a new one is allocated.
    pub fn request_command_buffer(&mut self, ctx: &GpuContext, name: &str) -> Result<&CommandBuffer> {
        require_name(name, "Command buffer")?;

        let mut idle = None;
        for (index, buffer) in self.buffers.iter().enumerate() {
            if buffer.is_idle()? {
                idle = Some(index);
                break;
            }
        }

        let index = if let Some(index) = idle {
            self.buffers[index].recycle(ctx, name)?;
            index
        } else {
            let buffer = CommandBuffer::new(ctx, self.pool, self.queue, name)?;
            buffer.begin()?;
            self.buffers.push(buffer);
            tracing::trace!(pool = %self.name, count = self.buffers.len(), "Allocated command buffer");
            self.buffers.len() - 1
        };

        Ok(&self.buffers[index])
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.buffers.clear();
        unsafe { self.device.destroy_command_pool(self.pool, None) };
    }
}
