//! Device-independent planning of the physical graph: attachments, images,
//! vertex input and descriptor slots.

use crate::error::{GraphError, Result};
use crate::resource::{
    BufferHandle, BufferResource, BufferUsage, ExternalTextureHandle, ResourceHandle,
    TextureHandle, TextureUsage,
};
use crate::stage::StageRead;
use ash::vk;
use hashbrown::HashMap;
use lumen_gpu::ImageDesc;

/// A texture a stage renders into.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentTarget {
    pub texture: TextureHandle,
    pub usage: TextureUsage,
    pub format: vk::Format,
}

/// Attachments, references and slot bookkeeping for a single-subpass render pass.
#[derive(Debug, Clone)]
pub struct AttachmentPlan {
    pub attachments: Vec<vk::AttachmentDescription>,
    /// Texture behind each attachment, in attachment order.
    pub textures: Vec<TextureHandle>,
    pub color_refs: Vec<vk::AttachmentReference>,
    pub depth_ref: Option<vk::AttachmentReference>,
    /// Attachment slot the swapchain image view goes into.
    pub back_buffer_slot: Option<usize>,
}

impl AttachmentPlan {
    /// Blend states the pipeline needs: one per color attachment, none for depth-only passes.
    pub fn blend_attachment_count(&self) -> usize {
        self.color_refs.len()
    }

    /// One clear value per attachment: `color` for color attachments, far depth otherwise.
    pub fn clear_values(&self, color: [f32; 4]) -> Vec<vk::ClearValue> {
        let depth_slot = self.depth_ref.map(|r| r.attachment as usize);
        (0..self.attachments.len())
            .map(|slot| {
                if Some(slot) == depth_slot {
                    vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: 1.0,
                            stencil: 0,
                        },
                    }
                } else {
                    vk::ClearValue {
                        color: vk::ClearColorValue { float32: color },
                    }
                }
            })
            .collect()
    }
}

/// Plan the render pass attachments of a stage writing `targets`.
///
/// At most one depth-stencil texture and one back buffer may be written.
pub fn plan_attachments(
    stage: &str,
    targets: &[AttachmentTarget],
    clears_screen: bool,
    swapchain_format: vk::Format,
) -> Result<AttachmentPlan> {
    let mut plan = AttachmentPlan {
        attachments: Vec::with_capacity(targets.len()),
        textures: Vec::with_capacity(targets.len()),
        color_refs: Vec::new(),
        depth_ref: None,
        back_buffer_slot: None,
    };

    for target in targets {
        let slot = plan.attachments.len();
        let (format, final_layout) = match target.usage {
            TextureUsage::BackBuffer => {
                if plan.back_buffer_slot.replace(slot).is_some() {
                    return Err(GraphError::InvalidArgument(format!(
                        "Stage '{stage}' writes to more than one back buffer"
                    )));
                }
                (swapchain_format, vk::ImageLayout::PRESENT_SRC_KHR)
            }
            TextureUsage::DepthStencil => {
                if plan.depth_ref.is_some() {
                    return Err(GraphError::InvalidArgument(format!(
                        "Stage '{stage}' writes to more than one depth buffer"
                    )));
                }
                (target.format, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            }
            TextureUsage::Normal => (target.format, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL),
        };

        let initial_layout = if clears_screen {
            vk::ImageLayout::UNDEFINED
        } else {
            final_layout
        };

        plan.attachments.push(vk::AttachmentDescription {
            format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: if clears_screen {
                vk::AttachmentLoadOp::CLEAR
            } else {
                vk::AttachmentLoadOp::LOAD
            },
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout,
            final_layout,
            ..Default::default()
        });
        plan.textures.push(target.texture);

        let attachment = slot as u32;
        match target.usage {
            TextureUsage::DepthStencil => {
                plan.depth_ref = Some(vk::AttachmentReference {
                    attachment,
                    layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                });
            }
            TextureUsage::BackBuffer | TextureUsage::Normal => {
                plan.color_refs.push(vk::AttachmentReference {
                    attachment,
                    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                });
            }
        }
    }

    Ok(plan)
}

/// Image the graph allocates for a texture resource. Back buffers borrow the swapchain image.
pub const fn texture_image_desc(
    usage: TextureUsage,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Option<ImageDesc> {
    match usage {
        TextureUsage::BackBuffer => None,
        TextureUsage::DepthStencil => Some(ImageDesc::depth_stencil(format, extent)),
        TextureUsage::Normal => Some(ImageDesc::color(format, extent)),
    }
}

/// Vertex input state derived from a stage's vertex buffer reads.
#[derive(Debug, Clone, Default)]
pub struct VertexInputPlan {
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Vertex buffers by binding index, ascending.
    pub buffers: Vec<(u32, BufferHandle)>,
}

/// Give each vertex buffer read a binding (explicit, or its position among the
/// vertex reads) with its element size as stride and its attributes moved onto it.
pub fn plan_vertex_input(
    vertex_reads: &[(BufferHandle, &BufferResource)],
    explicit_bindings: &HashMap<BufferHandle, u32>,
) -> VertexInputPlan {
    let mut plan = VertexInputPlan::default();
    for (position, &(handle, buffer)) in vertex_reads.iter().enumerate() {
        let binding = explicit_bindings
            .get(&handle)
            .copied()
            .unwrap_or(position as u32);

        plan.bindings.push(vk::VertexInputBindingDescription {
            binding,
            stride: buffer.element_size() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        });
        plan.attributes.extend(
            buffer
                .vertex_attributes()
                .iter()
                .map(|attribute| vk::VertexInputAttributeDescription {
                    binding,
                    ..*attribute
                }),
        );
        plan.buffers.push((binding, handle));
    }
    plan.buffers.sort_by_key(|&(binding, _)| binding);
    plan
}

/// Reject vertex and index buffers a stage reads without a usable element size.
///
/// Vertex strides come from the element size; index buffers must hold `u16` or `u32`.
pub fn check_element_sizes<'a>(
    stage: &str,
    buffer_reads: impl IntoIterator<Item = &'a BufferResource>,
) -> Result<()> {
    for buffer in buffer_reads {
        let size = buffer.element_size();
        let problem = match buffer.usage() {
            BufferUsage::Vertex if size == 0 => "has no element size",
            BufferUsage::Index if size != 2 && size != 4 => "needs 2 or 4 byte indices",
            _ => continue,
        };
        return Err(GraphError::InvalidArgument(format!(
            "{} buffer '{}' read by stage '{stage}' {problem}; announce typed data or set an element size",
            buffer.usage().as_str(),
            buffer.name()
        )));
    }
    Ok(())
}

/// Where a descriptor binding gets its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorSource {
    Uniform(BufferHandle),
    Sampler(ExternalTextureHandle),
}

/// One binding of a stage's descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorSlot {
    pub binding: u32,
    pub source: DescriptorSource,
    pub stages: vk::ShaderStageFlags,
}

/// Assign descriptor bindings, in read order, to uniform buffer and external texture reads.
pub fn plan_descriptor_slots(
    stage: &str,
    reads: &[StageRead],
    buffer_usage: impl Fn(BufferHandle) -> BufferUsage,
) -> Result<Vec<DescriptorSlot>> {
    let mut slots = Vec::new();
    for read in reads {
        let source = match read.resource {
            ResourceHandle::Buffer(buffer) if buffer_usage(buffer) == BufferUsage::Uniform => {
                DescriptorSource::Uniform(buffer)
            }
            ResourceHandle::ExternalTexture(texture) => DescriptorSource::Sampler(texture),
            ResourceHandle::Buffer(_) | ResourceHandle::Texture(_) => continue,
        };
        let Some(stages) = read.shader_stages else {
            return Err(GraphError::InvalidArgument(format!(
                "Stage '{stage}' reads a uniform buffer or external texture without naming the shader stages"
            )));
        };
        slots.push(DescriptorSlot {
            binding: slots.len() as u32,
            source,
            stages,
        });
    }
    Ok(slots)
}

/// A stage binding that must be rewired when a uniform buffer is rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformReader {
    pub stage: usize,
    pub binding: u32,
}

/// Stages reading each uniform buffer.
pub type UniformReaders = HashMap<BufferHandle, Vec<UniformReader>>;

/// Record which stages in `order` read which uniform buffers, given each stage's slots.
pub fn uniform_readers(order: &[usize], slots: &HashMap<usize, Vec<DescriptorSlot>>) -> UniformReaders {
    let mut readers = UniformReaders::new();
    for &stage in order {
        for slot in slots.get(&stage).into_iter().flatten() {
            if let DescriptorSource::Uniform(buffer) = slot.source {
                readers.entry(buffer).or_default().push(UniformReader {
                    stage,
                    binding: slot.binding,
                });
            }
        }
    }
    readers
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWAPCHAIN: vk::Format = vk::Format::B8G8R8A8_SRGB;

    fn target(index: usize, usage: TextureUsage, format: vk::Format) -> AttachmentTarget {
        AttachmentTarget {
            texture: TextureHandle(index),
            usage,
            format,
        }
    }

    #[test]
    fn clearing_back_buffer_and_depth() {
        let targets = [
            target(0, TextureUsage::BackBuffer, vk::Format::UNDEFINED),
            target(1, TextureUsage::DepthStencil, vk::Format::D32_SFLOAT_S8_UINT),
        ];
        let plan = plan_attachments("main", &targets, true, SWAPCHAIN).unwrap();

        assert_eq!(plan.attachments.len(), 2);
        assert_eq!(plan.back_buffer_slot, Some(0));

        let back = plan.attachments[0];
        assert_eq!(back.format, SWAPCHAIN);
        assert_eq!(back.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(back.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(back.stencil_load_op, vk::AttachmentLoadOp::DONT_CARE);
        assert_eq!(back.initial_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(back.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);

        let depth = plan.attachments[1];
        assert_eq!(depth.final_layout, vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);
        assert_eq!(plan.depth_ref.map(|r| r.attachment), Some(1));
        assert_eq!(plan.color_refs.len(), 1);
        assert_eq!(plan.color_refs[0].attachment, 0);
    }

    #[test]
    fn loading_keeps_previous_contents() {
        let targets = [
            target(3, TextureUsage::Normal, vk::Format::R8G8B8A8_UNORM),
            target(0, TextureUsage::BackBuffer, vk::Format::UNDEFINED),
        ];
        let plan = plan_attachments("overlay", &targets, false, SWAPCHAIN).unwrap();

        let color = plan.attachments[0];
        assert_eq!(color.load_op, vk::AttachmentLoadOp::LOAD);
        assert_eq!(color.initial_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(color.final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let back = plan.attachments[1];
        assert_eq!(back.initial_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(plan.back_buffer_slot, Some(1));
        assert_eq!(plan.textures, [TextureHandle(3), TextureHandle(0)]);
        assert!(plan.depth_ref.is_none());
    }

    #[test]
    fn depth_only_writers_get_no_blend_attachments() {
        let targets = [target(1, TextureUsage::DepthStencil, vk::Format::D32_SFLOAT)];
        let plan = plan_attachments("shadow", &targets, true, SWAPCHAIN).unwrap();
        assert_eq!(plan.attachments.len(), 1);
        assert_eq!(plan.blend_attachment_count(), 0);

        let targets = [
            target(0, TextureUsage::BackBuffer, vk::Format::UNDEFINED),
            target(2, TextureUsage::Normal, vk::Format::R8G8B8A8_UNORM),
            target(1, TextureUsage::DepthStencil, vk::Format::D32_SFLOAT),
        ];
        let plan = plan_attachments("gbuffer", &targets, true, SWAPCHAIN).unwrap();
        assert_eq!(plan.blend_attachment_count(), 2);
    }

    #[test]
    fn second_depth_buffer_is_rejected() {
        let targets = [
            target(1, TextureUsage::DepthStencil, vk::Format::D32_SFLOAT),
            target(2, TextureUsage::DepthStencil, vk::Format::D32_SFLOAT),
        ];
        let err = plan_attachments("broken", &targets, true, SWAPCHAIN).unwrap_err();
        assert!(matches!(err, GraphError::InvalidArgument(message) if message.contains("depth")));
    }

    #[test]
    fn second_back_buffer_is_rejected() {
        let targets = [
            target(0, TextureUsage::BackBuffer, vk::Format::UNDEFINED),
            target(0, TextureUsage::BackBuffer, vk::Format::UNDEFINED),
        ];
        assert!(plan_attachments("broken", &targets, true, SWAPCHAIN).is_err());
    }

    #[test]
    fn clear_values_follow_attachment_kinds() {
        let targets = [
            target(0, TextureUsage::BackBuffer, vk::Format::UNDEFINED),
            target(1, TextureUsage::DepthStencil, vk::Format::D32_SFLOAT_S8_UINT),
        ];
        let plan = plan_attachments("main", &targets, true, SWAPCHAIN).unwrap();
        let values = plan.clear_values([0.0; 4]);
        assert_eq!(values.len(), 2);
        let (color, depth) = unsafe { (values[0].color.float32, values[1].depth_stencil) };
        assert_eq!(color, [0.0; 4]);
        assert!((depth.depth - 1.0).abs() < f32::EPSILON);
        assert_eq!(depth.stencil, 0);
    }

    #[test]
    fn intermediate_textures_match_the_swapchain_extent() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let color = texture_image_desc(TextureUsage::Normal, vk::Format::R8G8B8A8_UNORM, extent)
            .unwrap();
        assert_eq!(color.usage, vk::ImageUsageFlags::COLOR_ATTACHMENT);
        assert_eq!(color.aspect, vk::ImageAspectFlags::COLOR);
        assert_eq!(color.extent, extent);

        let depth =
            texture_image_desc(TextureUsage::DepthStencil, vk::Format::D32_SFLOAT_S8_UINT, extent)
                .unwrap();
        assert_eq!(depth.usage, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT);
        assert_eq!(
            depth.aspect,
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );

        assert!(texture_image_desc(TextureUsage::BackBuffer, vk::Format::UNDEFINED, extent).is_none());
    }

    #[test]
    fn resize_changes_every_planned_extent() {
        let usages = [TextureUsage::Normal, TextureUsage::DepthStencil];
        for (width, height) in [(800, 600), (1920, 1080)] {
            let extent = vk::Extent2D { width, height };
            for usage in usages {
                let desc = texture_image_desc(usage, vk::Format::D32_SFLOAT, extent).unwrap();
                assert_eq!(desc.extent, extent);
            }
        }
    }

    #[test]
    fn vertex_bindings_follow_read_order() {
        let mut positions = BufferResource::new("positions", BufferUsage::Vertex);
        positions
            .announce_update_pod(&[[0.0f32; 3]; 3])
            .add_vertex_attribute(vk::Format::R32G32B32_SFLOAT, 0);
        let mut colors = BufferResource::new("colors", BufferUsage::Vertex);
        colors
            .announce_update_pod(&[[0.0f32; 4]; 3])
            .add_vertex_attribute(vk::Format::R32G32B32A32_SFLOAT, 0);

        let reads = [(BufferHandle(0), &positions), (BufferHandle(1), &colors)];
        let plan = plan_vertex_input(&reads, &HashMap::new());

        assert_eq!(plan.bindings.len(), 2);
        assert_eq!((plan.bindings[0].binding, plan.bindings[0].stride), (0, 12));
        assert_eq!((plan.bindings[1].binding, plan.bindings[1].stride), (1, 16));
        assert_eq!(plan.attributes[1].binding, 1);
        assert_eq!(plan.buffers, [(0, BufferHandle(0)), (1, BufferHandle(1))]);
    }

    #[test]
    fn explicit_vertex_bindings_win() {
        let mut vertices = BufferResource::new("vertices", BufferUsage::Vertex);
        vertices
            .announce_update_pod(&[[0.0f32; 6]; 3])
            .add_vertex_attribute(vk::Format::R32G32B32_SFLOAT, 0)
            .add_vertex_attribute(vk::Format::R32G32B32_SFLOAT, 12);

        let mut explicit = HashMap::new();
        explicit.insert(BufferHandle(4), 2);
        let plan = plan_vertex_input(&[(BufferHandle(4), &vertices)], &explicit);

        assert_eq!(plan.bindings[0].binding, 2);
        assert_eq!(plan.bindings[0].stride, 24);
        assert!(plan.attributes.iter().all(|a| a.binding == 2));
        assert_eq!(
            plan.attributes.iter().map(|a| a.location).collect::<Vec<_>>(),
            [0, 1]
        );
    }

    #[test]
    fn raw_vertex_data_needs_an_element_size() {
        let mut vertices = BufferResource::new("vertices", BufferUsage::Vertex);
        vertices.announce_update(&[0u8; 36]);
        let err = check_element_sizes("main", [&vertices]).unwrap_err();
        assert!(matches!(err, GraphError::InvalidArgument(message) if message.contains("vertices")));

        vertices.set_element_size(12);
        assert!(check_element_sizes("main", [&vertices]).is_ok());
    }

    #[test]
    fn index_buffers_hold_u16_or_u32() {
        let mut indices = BufferResource::new("indices", BufferUsage::Index);
        indices.announce_update(&[0u8; 12]);
        assert!(check_element_sizes("main", [&indices]).is_err());

        indices.announce_update_pod(&[0u16, 1, 2]);
        assert!(check_element_sizes("main", [&indices]).is_ok());
        indices.announce_update_pod(&[0u32, 1, 2]);
        assert!(check_element_sizes("main", [&indices]).is_ok());
        indices.announce_update_pod(&[0u8, 1, 2]);
        assert!(check_element_sizes("main", [&indices]).is_err());
    }

    #[test]
    fn uniform_buffers_skip_the_element_size_check() {
        let mut uniforms = BufferResource::new("camera", BufferUsage::Uniform);
        uniforms.announce_update(&[0u8; 64]);
        assert!(check_element_sizes("main", [&uniforms]).is_ok());
    }

    fn usage_of(handle: BufferHandle) -> BufferUsage {
        if handle.0 == 0 {
            BufferUsage::Vertex
        } else {
            BufferUsage::Uniform
        }
    }

    #[test]
    fn descriptor_slots_skip_vertex_data_and_textures() {
        let reads = [
            StageRead {
                resource: BufferHandle(0).into(),
                shader_stages: None,
            },
            StageRead {
                resource: BufferHandle(1).into(),
                shader_stages: Some(vk::ShaderStageFlags::VERTEX),
            },
            StageRead {
                resource: TextureHandle(0).into(),
                shader_stages: None,
            },
            StageRead {
                resource: ExternalTextureHandle(0).into(),
                shader_stages: Some(vk::ShaderStageFlags::FRAGMENT),
            },
        ];
        let slots = plan_descriptor_slots("main", &reads, usage_of).unwrap();

        assert_eq!(
            slots,
            [
                DescriptorSlot {
                    binding: 0,
                    source: DescriptorSource::Uniform(BufferHandle(1)),
                    stages: vk::ShaderStageFlags::VERTEX,
                },
                DescriptorSlot {
                    binding: 1,
                    source: DescriptorSource::Sampler(ExternalTextureHandle(0)),
                    stages: vk::ShaderStageFlags::FRAGMENT,
                },
            ]
        );
    }

    #[test]
    fn descriptor_reads_need_shader_stages() {
        let reads = [StageRead {
            resource: BufferHandle(1).into(),
            shader_stages: None,
        }];
        assert!(matches!(
            plan_descriptor_slots("main", &reads, usage_of),
            Err(GraphError::InvalidArgument(_))
        ));
    }

    #[test]
    fn uniform_readers_are_tracked_per_buffer() {
        let slot = |binding, buffer| DescriptorSlot {
            binding,
            source: DescriptorSource::Uniform(BufferHandle(buffer)),
            stages: vk::ShaderStageFlags::VERTEX,
        };
        let mut slots = HashMap::new();
        slots.insert(0, vec![slot(0, 1)]);
        slots.insert(1, vec![slot(0, 2), slot(1, 1)]);
        slots.insert(2, Vec::new());

        let readers = uniform_readers(&[0, 1, 2], &slots);
        assert_eq!(
            readers[&BufferHandle(1)],
            [
                UniformReader { stage: 0, binding: 0 },
                UniformReader { stage: 1, binding: 1 },
            ]
        );
        assert_eq!(readers[&BufferHandle(2)], [UniformReader { stage: 1, binding: 0 }]);
        assert_eq!(readers.len(), 2);
    }
}
