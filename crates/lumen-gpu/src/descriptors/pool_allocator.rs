//! Descriptor pool allocator.

use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use ash::prelude::VkResult;
use ash::vk;
use lumen_core::DescriptorPoolConfig;
use std::sync::Arc;

/// Pool sizes every new pool is created with.
pub fn pool_sizes(config: &DescriptorPoolConfig) -> Vec<vk::DescriptorPoolSize> {
    [
        (vk::DescriptorType::UNIFORM_BUFFER, config.uniform_buffers),
        (
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            config.combined_image_samplers,
        ),
    ]
    .into_iter()
    .filter(|&(_, count)| count > 0)
    .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
        ty,
        descriptor_count,
    })
    .collect()
}

/// Reset every pool in `pools`, then destroy all but the first. Returns the kept pool.
///
/// Sets allocated from any of the pools are invalid afterwards.
pub fn reset_pools(
    pools: &mut Vec<vk::DescriptorPool>,
    mut reset: impl FnMut(vk::DescriptorPool) -> VkResult<()>,
    mut destroy: impl FnMut(vk::DescriptorPool),
) -> Result<Option<vk::DescriptorPool>> {
    for (index, &pool) in pools.iter().enumerate() {
        reset(pool).map_err(|e| {
            GpuError::call("vkResetDescriptorPool failed", e, &format!("descriptor pool {index}"))
        })?;
    }
    let keep = pools.len().min(1);
    for pool in pools.drain(keep..) {
        destroy(pool);
    }
    Ok(pools.first().copied())
}

/// Creates descriptor pools on demand and destroys them all on drop.
pub struct DescriptorPoolAllocator {
    device: Arc<ash::Device>,
    config: DescriptorPoolConfig,
    pools: Vec<vk::DescriptorPool>,
}

impl DescriptorPoolAllocator {
    pub fn new(ctx: &GpuContext, config: DescriptorPoolConfig) -> Self {
        Self {
            device: ctx.shared_device(),
            config,
            pools: Vec::new(),
        }
    }

    /// Create one more pool with the configured capacities.
    pub fn request_new_pool(&mut self, ctx: &GpuContext) -> Result<vk::DescriptorPool> {
        let sizes = pool_sizes(&self.config);
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(self.config.max_sets)
            .pool_sizes(&sizes);

        let name = format!("descriptor pool {}", self.pools.len());
        let pool = unsafe { self.device.create_descriptor_pool(&create_info, None) }
            .map_err(|e| GpuError::call("vkCreateDescriptorPool failed", e, &name))?;
        ctx.set_debug_name(pool, &name);

        self.pools.push(pool);
        tracing::debug!("Created {name}");
        Ok(pool)
    }

    /// Return every set to its pool and shrink back to the first pool.
    ///
    /// The caller guarantees no set from these pools is still in use by the device.
    pub fn reset(&mut self) -> Result<Option<vk::DescriptorPool>> {
        let device = &self.device;
        let released = self.pools.len().saturating_sub(1);
        let kept = reset_pools(
            &mut self.pools,
            |pool| unsafe { device.reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty()) },
            |pool| unsafe { device.destroy_descriptor_pool(pool, None) },
        )?;
        tracing::debug!(released, "Reset descriptor pools");
        Ok(kept)
    }

    /// Number of pools currently alive.
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub const fn config(&self) -> &DescriptorPoolConfig {
        &self.config
    }
}

impl Drop for DescriptorPoolAllocator {
    fn drop(&mut self) {
        for pool in self.pools.drain(..) {
            unsafe { self.device.destroy_descriptor_pool(pool, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sizes() {
        let sizes = pool_sizes(&DescriptorPoolConfig::default());
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 1024);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(sizes[1].descriptor_count, 1024);
    }

    #[test]
    fn empty_pool_sizes_are_skipped() {
        let sizes = pool_sizes(&DescriptorPoolConfig {
            uniform_buffers: 16,
            combined_image_samplers: 0,
            max_sets: 16,
        });
        assert_eq!(sizes.len(), 1);
    }

    #[test]
    fn reset_keeps_only_the_first_pool() {
        use ash::vk::Handle;

        let mut pools: Vec<vk::DescriptorPool> =
            (1..=3).map(vk::DescriptorPool::from_raw).collect();
        let mut reset = Vec::new();
        let mut destroyed = Vec::new();
        let kept = reset_pools(
            &mut pools,
            |pool| {
                reset.push(pool.as_raw());
                Ok(())
            },
            |pool| destroyed.push(pool.as_raw()),
        )
        .unwrap();

        assert_eq!(kept, Some(vk::DescriptorPool::from_raw(1)));
        assert_eq!(pools.len(), 1);
        assert_eq!(reset, [1, 2, 3]);
        assert_eq!(destroyed, [2, 3]);
    }

    #[test]
    fn failed_reset_keeps_every_pool() {
        use ash::vk::Handle;

        let mut pools = vec![vk::DescriptorPool::from_raw(1), vk::DescriptorPool::from_raw(2)];
        let result = reset_pools(
            &mut pools,
            |_| Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY),
            |_| panic!("nothing is destroyed after a failed reset"),
        );
        assert!(result.is_err());
        assert_eq!(pools.len(), 2);
    }

    #[test]
    fn resetting_no_pools_keeps_none() {
        let mut pools = Vec::new();
        let kept = reset_pools(&mut pools, |_| Ok(()), |_| {}).unwrap();
        assert_eq!(kept, None);
    }
}
