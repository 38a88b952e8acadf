//! Batched descriptor writes for sets that already exist.

use crate::descriptors::builder::DescriptorInfo;
use ash::vk;

struct PendingWrite<'a> {
    set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    info: DescriptorInfo<'a>,
}

/// Collects descriptor writes and issues them in a single update call.
#[derive(Default)]
pub struct DescriptorUpdateBuilder<'a> {
    writes: Vec<PendingWrite<'a>>,
}

impl<'a> DescriptorUpdateBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `binding` of `set` at a uniform buffer.
    #[must_use]
    pub fn write_uniform_buffer(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        info: &'a vk::DescriptorBufferInfo,
    ) -> Self {
        self.writes.push(PendingWrite {
            set,
            binding,
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            info: DescriptorInfo::Buffer(info),
        });
        self
    }

    /// Point `binding` of `set` at a combined image sampler.
    #[must_use]
    pub fn write_combined_image_sampler(
        mut self,
        set: vk::DescriptorSet,
        binding: u32,
        info: &'a vk::DescriptorImageInfo,
    ) -> Self {
        self.writes.push(PendingWrite {
            set,
            binding,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            info: DescriptorInfo::Image(info),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// The writes in the order they were added.
    pub fn writes(&self) -> Vec<vk::WriteDescriptorSet<'a>> {
        self.writes
            .iter()
            .map(|w| w.info.write(w.set, w.binding, w.descriptor_type))
            .collect()
    }

    /// Issue every pending write. Does nothing when there are none.
    pub fn update(self, device: &ash::Device) {
        if self.writes.is_empty() {
            return;
        }
        let writes = self.writes();
        unsafe { device.update_descriptor_sets(&writes, &[]) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn collects_writes_in_order() {
        let ubo = vk::DescriptorBufferInfo::default().range(64);
        let texture = vk::DescriptorImageInfo::default();
        let first = vk::DescriptorSet::from_raw(1);
        let second = vk::DescriptorSet::from_raw(2);

        let builder = DescriptorUpdateBuilder::new()
            .write_uniform_buffer(first, 0, &ubo)
            .write_combined_image_sampler(second, 3, &texture);

        assert_eq!(builder.len(), 2);
        let writes = builder.writes();
        assert_eq!(writes[0].dst_set, first);
        assert_eq!(writes[0].descriptor_type, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(writes[1].dst_set, second);
        assert_eq!(writes[1].dst_binding, 3);
        assert!(!writes[1].p_image_info.is_null());
    }
}
