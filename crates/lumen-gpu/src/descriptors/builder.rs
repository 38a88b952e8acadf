//! Descriptor set builder.

use crate::context::GpuContext;
use crate::descriptors::layout_cache::DescriptorSetLayoutCache;
use crate::descriptors::set_allocator::DescriptorSetAllocator;
use crate::error::Result;
use ash::vk;

/// Resource info behind one binding. Borrowed until the set is built.
#[derive(Debug, Clone, Copy)]
pub enum DescriptorInfo<'a> {
    Buffer(&'a vk::DescriptorBufferInfo),
    Image(&'a vk::DescriptorImageInfo),
}

impl<'a> DescriptorInfo<'a> {
    /// Write for `binding` of `set`, referencing the borrowed info.
    pub fn write(
        self,
        set: vk::DescriptorSet,
        binding: u32,
        descriptor_type: vk::DescriptorType,
    ) -> vk::WriteDescriptorSet<'a> {
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(binding)
            .descriptor_type(descriptor_type);
        match self {
            Self::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
            Self::Image(info) => write.image_info(std::slice::from_ref(info)),
        }
    }
}

/// Builds a descriptor set and its layout in one go.
///
/// Binding indices are assigned in call order starting at zero. The layout
/// comes from the layout cache and the set from the set allocator.
#[derive(Default)]
pub struct DescriptorBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'static>>,
    infos: Vec<DescriptorInfo<'a>>,
}

impl<'a> DescriptorBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        mut self,
        descriptor_type: vk::DescriptorType,
        stages: vk::ShaderStageFlags,
        info: DescriptorInfo<'a>,
    ) -> Self {
        let binding = self.bindings.len() as u32;
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(1)
                .stage_flags(stages),
        );
        self.infos.push(info);
        self
    }

    /// Bind a uniform buffer at the next binding index.
    #[must_use]
    pub fn bind_uniform_buffer(
        self,
        info: &'a vk::DescriptorBufferInfo,
        stages: vk::ShaderStageFlags,
    ) -> Self {
        self.push(
            vk::DescriptorType::UNIFORM_BUFFER,
            stages,
            DescriptorInfo::Buffer(info),
        )
    }

    /// Bind a combined image sampler at the next binding index.
    #[must_use]
    pub fn bind_image(self, info: &'a vk::DescriptorImageInfo, stages: vk::ShaderStageFlags) -> Self {
        self.push(
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            stages,
            DescriptorInfo::Image(info),
        )
    }

    /// Layout bindings accumulated so far.
    pub fn bindings(&self) -> &[vk::DescriptorSetLayoutBinding<'static>] {
        &self.bindings
    }

    /// Writes for `set`, one per binding.
    pub fn writes(&self, set: vk::DescriptorSet) -> Vec<vk::WriteDescriptorSet<'a>> {
        self.bindings
            .iter()
            .zip(&self.infos)
            .map(|(binding, info)| info.write(set, binding.binding, binding.descriptor_type))
            .collect()
    }

    /// Get the layout, allocate a set and write every binding into it.
    pub fn build(
        self,
        ctx: &GpuContext,
        layout_cache: &mut DescriptorSetLayoutCache,
        allocator: &mut DescriptorSetAllocator,
        name: &str,
    ) -> Result<(vk::DescriptorSet, vk::DescriptorSetLayout)> {
        let layout = layout_cache.get_or_create(ctx, &self.bindings, name)?;
        let set = allocator.allocate(ctx, layout, name)?;

        let writes = self.writes(set);
        if !writes.is_empty() {
            unsafe { ctx.device().update_descriptor_sets(&writes, &[]) };
        }
        Ok((set, layout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn bindings_count_up_from_zero() {
        let ubo = vk::DescriptorBufferInfo::default().range(64);
        let texture = vk::DescriptorImageInfo::default()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

        let builder = DescriptorBuilder::new()
            .bind_uniform_buffer(&ubo, vk::ShaderStageFlags::VERTEX)
            .bind_image(&texture, vk::ShaderStageFlags::FRAGMENT)
            .bind_uniform_buffer(&ubo, vk::ShaderStageFlags::FRAGMENT);

        let bindings = builder.bindings();
        assert_eq!(bindings.len(), 3);
        assert_eq!(bindings[0].binding, 0);
        assert_eq!(bindings[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(bindings[1].binding, 1);
        assert_eq!(
            bindings[1].descriptor_type,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER
        );
        assert_eq!(bindings[1].stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(bindings[2].binding, 2);
    }

    #[test]
    fn writes_target_the_built_set() {
        let ubo = vk::DescriptorBufferInfo::default().range(64);
        let builder = DescriptorBuilder::new().bind_uniform_buffer(&ubo, vk::ShaderStageFlags::VERTEX);

        let set = vk::DescriptorSet::from_raw(42);
        let writes = builder.writes(set);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].dst_set, set);
        assert_eq!(writes[0].dst_binding, 0);
        assert_eq!(writes[0].descriptor_count, 1);
        assert!(!writes[0].p_buffer_info.is_null());
    }
}
