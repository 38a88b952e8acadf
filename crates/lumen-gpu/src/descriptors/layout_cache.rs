//! Content-addressed descriptor set layout cache.

use crate::context::GpuContext;
use crate::error::{require_name, GpuError, Result};
use ash::vk;
use hashbrown::HashMap;
use std::sync::Arc;

/// One binding as far as layout equality is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
}

/// Bindings sorted by binding index. Two layouts are interchangeable iff their keys are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutKey(Vec<BindingKey>);

impl LayoutKey {
    pub fn from_bindings(bindings: &[vk::DescriptorSetLayoutBinding<'_>]) -> Self {
        let mut keys: Vec<BindingKey> = bindings
            .iter()
            .map(|b| BindingKey {
                binding: b.binding,
                descriptor_type: b.descriptor_type,
                count: b.descriptor_count,
                stages: b.stage_flags,
            })
            .collect();
        keys.sort_by_key(|k| k.binding);
        Self(keys)
    }

    pub fn bindings(&self) -> &[BindingKey] {
        &self.0
    }
}

/// Map from layout key to layout handle. Owns nothing by itself.
#[derive(Debug, Default)]
pub struct LayoutTable {
    layouts: HashMap<LayoutKey, vk::DescriptorSetLayout>,
}

impl LayoutTable {
    /// Return the cached layout for `key`, calling `create` only on a miss.
    pub fn get_or_insert_with(
        &mut self,
        key: LayoutKey,
        create: impl FnOnce() -> Result<vk::DescriptorSetLayout>,
    ) -> Result<vk::DescriptorSetLayout> {
        if let Some(&layout) = self.layouts.get(&key) {
            return Ok(layout);
        }
        let layout = create()?;
        self.layouts.insert(key, layout);
        Ok(layout)
    }

    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    fn drain(&mut self) -> impl Iterator<Item = vk::DescriptorSetLayout> + '_ {
        self.layouts.drain().map(|(_, layout)| layout)
    }
}

/// Descriptor set layout cache. Every layout it hands out stays owned by the cache.
pub struct DescriptorSetLayoutCache {
    device: Arc<ash::Device>,
    table: LayoutTable,
}

impl DescriptorSetLayoutCache {
    pub fn new(ctx: &GpuContext) -> Self {
        Self {
            device: ctx.shared_device(),
            table: LayoutTable::default(),
        }
    }

    /// Look up or create the layout for `bindings`.
    pub fn get_or_create(
        &mut self,
        ctx: &GpuContext,
        bindings: &[vk::DescriptorSetLayoutBinding<'_>],
        name: &str,
    ) -> Result<vk::DescriptorSetLayout> {
        require_name(name, "DescriptorSetLayout")?;

        let key = LayoutKey::from_bindings(bindings);
        self.table.get_or_insert_with(key, || {
            let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
            let layout = unsafe { ctx.device().create_descriptor_set_layout(&create_info, None) }
                .map_err(|e| GpuError::call("vkCreateDescriptorSetLayout failed", e, name))?;
            ctx.set_debug_name(layout, name);
            tracing::trace!("Created descriptor set layout {name} ({} bindings)", bindings.len());
            Ok(layout)
        })
    }

    /// Number of distinct layouts.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl Drop for DescriptorSetLayoutCache {
    fn drop(&mut self) {
        for layout in self.table.drain() {
            unsafe { self.device.destroy_descriptor_set_layout(layout, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn binding(
        index: u32,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
    ) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(index)
            .descriptor_type(descriptor_type)
            .descriptor_count(1)
            .stage_flags(stages)
    }

    #[test]
    fn key_ignores_declaration_order() {
        let a = [
            binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX),
            binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, vk::ShaderStageFlags::FRAGMENT),
        ];
        let b = [a[1], a[0]];
        assert_eq!(LayoutKey::from_bindings(&a), LayoutKey::from_bindings(&b));
        assert_eq!(LayoutKey::from_bindings(&b).bindings()[0].binding, 0);
    }

    #[test]
    fn key_distinguishes_stage_masks() {
        let vertex = [binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)];
        let fragment =
            [binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::FRAGMENT)];
        assert_ne!(LayoutKey::from_bindings(&vertex), LayoutKey::from_bindings(&fragment));
    }

    #[test]
    fn identical_requests_share_a_layout() {
        let mut table = LayoutTable::default();
        let mut created = 0_u64;
        let mut create = || {
            created += 1;
            Ok(vk::DescriptorSetLayout::from_raw(created))
        };

        let ubo = [binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX)];
        let sampler = [binding(
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        )];

        let first = table.get_or_insert_with(LayoutKey::from_bindings(&ubo), &mut create);
        let second = table.get_or_insert_with(LayoutKey::from_bindings(&ubo), &mut create);
        let third = table.get_or_insert_with(LayoutKey::from_bindings(&sampler), &mut create);

        assert_eq!(first.as_ref().ok(), second.as_ref().ok());
        assert_ne!(first.as_ref().ok(), third.as_ref().ok());
        assert_eq!(table.len(), 2);
        assert_eq!(created, 2);
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let mut table = LayoutTable::default();
        let key = LayoutKey::from_bindings(&[binding(
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
        )]);
        let failed = table.get_or_insert_with(key.clone(), || {
            Err(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_HOST_MEMORY))
        });
        assert!(failed.is_err());
        assert!(table.is_empty());

        let layout = table.get_or_insert_with(key, || Ok(vk::DescriptorSetLayout::from_raw(7)));
        assert_eq!(layout.ok(), Some(vk::DescriptorSetLayout::from_raw(7)));
    }
}
