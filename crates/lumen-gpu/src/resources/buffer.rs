//! GPU buffers.

use crate::context::GpuContext;
use crate::error::{require_name, GpuError, Result};
use crate::memory::{GpuAllocator, MemoryUsage};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::Allocation;
use parking_lot::Mutex;
use std::sync::Arc;

/// A named buffer with its own allocation, destroyed on drop.
///
/// Buffers created with [`MemoryUsage::HostVisibleMapped`] stay mapped for
/// their whole lifetime and can be written with [`Buffer::write`].
pub struct Buffer {
    device: Arc<ash::Device>,
    allocator: Arc<Mutex<GpuAllocator>>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    memory: MemoryUsage,
    name: String,
}

impl Buffer {
    /// Create an uninitialized buffer.
    pub fn new(
        ctx: &GpuContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory: MemoryUsage,
        name: &str,
    ) -> Result<Self> {
        require_name(name, "Buffer")?;
        if size == 0 {
            return Err(GpuError::InvalidArgument(format!(
                "Buffer {name} must not be empty"
            )));
        }

        let (buffer, allocation) = ctx
            .allocator()
            .lock()
            .allocate_buffer(size, usage, memory, name)?;
        ctx.set_debug_name(buffer, name);

        Ok(Self {
            device: ctx.shared_device(),
            allocator: Arc::clone(ctx.allocator()),
            buffer,
            allocation: Some(allocation),
            size,
            memory,
            name: name.to_string(),
        })
    }

    /// Create a mapped buffer sized to `data` and copy `data` into it.
    pub fn with_data(
        ctx: &GpuContext,
        data: &[u8],
        usage: vk::BufferUsageFlags,
        name: &str,
    ) -> Result<Self> {
        let buffer = Self::new(
            ctx,
            data.len() as vk::DeviceSize,
            usage,
            MemoryUsage::HostVisibleMapped,
            name,
        )?;
        buffer.write(0, data)?;
        Ok(buffer)
    }

    /// Raw buffer handle.
    pub const fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes.
    pub const fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Memory the buffer lives in.
    pub const fn memory(&self) -> MemoryUsage {
        self.memory
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Host pointer to the mapped memory, if the buffer is mapped.
    pub fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|p| p.as_ptr().cast::<u8>())
    }

    /// Copy `data` into the mapped memory at `offset`.
    pub fn write(&self, offset: vk::DeviceSize, data: &[u8]) -> Result<()> {
        let ptr = self.mapped_ptr().ok_or_else(|| {
            GpuError::InvalidState(format!("Buffer {} is not host visible", self.name))
        })?;
        check_write_range(offset, data.len(), self.size, &self.name)?;

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset as usize), data.len());
        }
        Ok(())
    }

    /// Copy a slice of plain values into the mapped memory at offset zero.
    pub fn write_pod<T: Pod>(&self, data: &[T]) -> Result<()> {
        self.write(0, bytemuck::cast_slice(data))
    }

    /// Descriptor info covering the whole buffer.
    pub const fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            self.allocator.lock().free(allocation);
        }
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

/// Reject writes that run past the end of a buffer.
fn check_write_range(
    offset: vk::DeviceSize,
    len: usize,
    size: vk::DeviceSize,
    name: &str,
) -> Result<()> {
    let end = offset
        .checked_add(len as vk::DeviceSize)
        .ok_or_else(|| GpuError::InvalidArgument(format!("Write offset overflow in {name}")))?;
    if end > size {
        return Err(GpuError::InvalidArgument(format!(
            "Write of {len} bytes at {offset} exceeds {name} ({size} bytes)"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_range_checks() {
        assert!(check_write_range(0, 64, 64, "ubo").is_ok());
        assert!(check_write_range(32, 32, 64, "ubo").is_ok());
        assert!(check_write_range(33, 32, 64, "ubo").is_err());
        assert!(check_write_range(u64::MAX, 1, 64, "ubo").is_err());
    }
}
