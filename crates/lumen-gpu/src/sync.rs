//! Synchronization primitives.

use crate::context::GpuContext;
use crate::error::{require_name, GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// A named fence, destroyed on drop.
pub struct Fence {
    device: Arc<ash::Device>,
    fence: vk::Fence,
    name: String,
}

impl Fence {
    /// Create a fence, optionally in the signaled state.
    pub fn new(ctx: &GpuContext, name: &str, signaled: bool) -> Result<Self> {
        require_name(name, "Fence")?;

        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { ctx.device().create_fence(&create_info, None) }
            .map_err(|e| GpuError::call("vkCreateFence failed", e, name))?;
        ctx.set_debug_name(fence, name);

        Ok(Self {
            device: ctx.shared_device(),
            fence,
            name: name.to_string(),
        })
    }

    /// Raw fence handle.
    pub const fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the fence is signaled or the timeout expires.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn wait(&self, timeout_ns: u64) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[self.fence], true, timeout_ns) }
            .map_err(|e| GpuError::call("vkWaitForFences failed", e, &self.name))
    }

    /// Reset the fence to the unsignaled state.
    pub fn reset(&self) -> Result<()> {
        unsafe { self.device.reset_fences(&[self.fence]) }
            .map_err(|e| GpuError::call("vkResetFences failed", e, &self.name))
    }

    /// Poll the fence. `true` means signaled.
    pub fn status(&self) -> Result<bool> {
        unsafe { self.device.get_fence_status(self.fence) }
            .map_err(|e| GpuError::call("vkGetFenceStatus failed", e, &self.name))
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe { self.device.destroy_fence(self.fence, None) };
    }
}

/// A named binary semaphore, destroyed on drop.
pub struct Semaphore {
    device: Arc<ash::Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a semaphore.
    pub fn new(ctx: &GpuContext, name: &str) -> Result<Self> {
        require_name(name, "Semaphore")?;

        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { ctx.device().create_semaphore(&create_info, None) }
            .map_err(|e| GpuError::call("vkCreateSemaphore failed", e, name))?;
        ctx.set_debug_name(semaphore, name);

        Ok(Self {
            device: ctx.shared_device(),
            semaphore,
        })
    }

    /// Raw semaphore handle.
    pub const fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe { self.device.destroy_semaphore(self.semaphore, None) };
    }
}
