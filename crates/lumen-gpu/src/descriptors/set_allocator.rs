//! Descriptor set allocation with pool growth.
//!
//! Not thread safe. The render thread owns the allocator.

use crate::context::GpuContext;
use crate::descriptors::pool_allocator::DescriptorPoolAllocator;
use crate::error::{require_name, GpuError, Result};
use ash::prelude::VkResult;
use ash::vk;
use lumen_core::DescriptorPoolConfig;

/// True for the results that mean "this pool is full, try another".
const fn is_pool_exhausted(result: vk::Result) -> bool {
    matches!(
        result,
        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL
    )
}

/// Run `attempt` against `current`; on pool exhaustion switch to a fresh pool and retry once.
pub fn allocate_with_retry<T>(
    current: &mut vk::DescriptorPool,
    mut attempt: impl FnMut(vk::DescriptorPool) -> VkResult<T>,
    new_pool: impl FnOnce() -> Result<vk::DescriptorPool>,
    name: &str,
) -> Result<T> {
    match attempt(*current) {
        Ok(value) => Ok(value),
        Err(result) if is_pool_exhausted(result) => {
            *current = new_pool()?;
            attempt(*current).map_err(|e| {
                GpuError::call("vkAllocateDescriptorSets failed after pool growth", e, name)
            })
        }
        Err(result) => Err(GpuError::call("vkAllocateDescriptorSets failed", result, name)),
    }
}

/// Try one batched allocation; if the current pool is too full, allocate
/// each set on its own so that every request gets the retry path.
pub fn allocate_batch_with_retry(
    current: &mut vk::DescriptorPool,
    count: usize,
    mut batch: impl FnMut(vk::DescriptorPool) -> VkResult<Vec<vk::DescriptorSet>>,
    mut single: impl FnMut(&mut vk::DescriptorPool, usize) -> Result<vk::DescriptorSet>,
    name: &str,
) -> Result<Vec<vk::DescriptorSet>> {
    match batch(*current) {
        Ok(sets) => Ok(sets),
        Err(result) if is_pool_exhausted(result) => {
            tracing::debug!(
                "Batched allocation of {count} descriptor sets for {name} did not fit, allocating one by one"
            );
            (0..count).map(|index| single(current, index)).collect()
        }
        Err(result) => Err(GpuError::call(
            "Batched vkAllocateDescriptorSets failed",
            result,
            name,
        )),
    }
}

/// Allocates descriptor sets, opening a new pool when the current one runs out.
pub struct DescriptorSetAllocator {
    pools: DescriptorPoolAllocator,
    current: vk::DescriptorPool,
}

impl DescriptorSetAllocator {
    /// Create the allocator together with its first pool.
    pub fn new(ctx: &GpuContext, config: DescriptorPoolConfig) -> Result<Self> {
        let mut pools = DescriptorPoolAllocator::new(ctx, config);
        let current = pools.request_new_pool(ctx)?;
        Ok(Self { pools, current })
    }

    /// Allocate one named descriptor set for `layout`.
    pub fn allocate(
        &mut self,
        ctx: &GpuContext,
        layout: vk::DescriptorSetLayout,
        name: &str,
    ) -> Result<vk::DescriptorSet> {
        require_name(name, "DescriptorSet")?;
        if layout == vk::DescriptorSetLayout::null() {
            return Err(GpuError::InvalidArgument(format!(
                "Descriptor set {name} needs a layout"
            )));
        }

        let Self { pools, current } = self;
        let set = allocate_with_retry(
            current,
            |pool| allocate_sets(ctx.device(), pool, &[layout]).map(|sets| sets[0]),
            || pools.request_new_pool(ctx),
            name,
        )?;
        ctx.set_debug_name(set, name);
        Ok(set)
    }

    /// Allocate one set per layout, batching the call where the pool allows it.
    pub fn allocate_batch(
        &mut self,
        ctx: &GpuContext,
        layouts: &[vk::DescriptorSetLayout],
        name: &str,
    ) -> Result<Vec<vk::DescriptorSet>> {
        require_name(name, "DescriptorSet")?;
        if layouts.is_empty() {
            return Err(GpuError::InvalidArgument(format!(
                "Descriptor set batch {name} has no layouts"
            )));
        }

        let Self { pools, current } = self;
        let sets = allocate_batch_with_retry(
            current,
            layouts.len(),
            |pool| allocate_sets(ctx.device(), pool, layouts),
            |current, index| {
                allocate_with_retry(
                    current,
                    |pool| allocate_sets(ctx.device(), pool, &layouts[index..=index]).map(|s| s[0]),
                    || pools.request_new_pool(ctx),
                    name,
                )
            },
            name,
        )?;
        for (index, &set) in sets.iter().enumerate() {
            ctx.set_debug_name(set, &format!("{name} #{index}"));
        }
        Ok(sets)
    }

    /// Free every set allocated so far and go back to a single pool.
    ///
    /// Sets handed out before the reset must no longer be bound or in flight.
    pub fn reset(&mut self) -> Result<()> {
        self.current = self.pools.reset()?.ok_or_else(|| {
            GpuError::InvalidState("Descriptor set allocator has no pool to keep".to_string())
        })?;
        Ok(())
    }

    /// Number of pools backing this allocator.
    pub fn pool_count(&self) -> usize {
        self.pools.pool_count()
    }
}

fn allocate_sets(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layouts: &[vk::DescriptorSetLayout],
) -> VkResult<Vec<vk::DescriptorSet>> {
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(layouts);
    unsafe { device.allocate_descriptor_sets(&alloc_info) }
}
