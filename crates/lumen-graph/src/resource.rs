//! Logical resources declared to the render graph.

use ash::vk;
use bytemuck::Pod;

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) usize);

        impl $name {
            /// Position of the object in its graph.
            pub const fn index(self) -> usize {
                self.0
            }
        }
    };
}

handle!(
    /// Buffer resource owned by a [`RenderGraph`](crate::RenderGraph).
    BufferHandle
);
handle!(
    /// Texture resource owned by a [`RenderGraph`](crate::RenderGraph).
    TextureHandle
);
handle!(
    /// Externally owned texture registered with a [`RenderGraph`](crate::RenderGraph).
    ExternalTextureHandle
);
handle!(
    /// Stage owned by a [`RenderGraph`](crate::RenderGraph).
    StageHandle
);

/// Any resource a stage can read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceHandle {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    ExternalTexture(ExternalTextureHandle),
}

impl From<BufferHandle> for ResourceHandle {
    fn from(handle: BufferHandle) -> Self {
        Self::Buffer(handle)
    }
}

impl From<TextureHandle> for ResourceHandle {
    fn from(handle: TextureHandle) -> Self {
        Self::Texture(handle)
    }
}

impl From<ExternalTextureHandle> for ResourceHandle {
    fn from(handle: ExternalTextureHandle) -> Self {
        Self::ExternalTexture(handle)
    }
}

/// What a buffer resource is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Vertex,
    Index,
    Uniform,
}

impl BufferUsage {
    pub const fn vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            Self::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
            Self::Index => vk::BufferUsageFlags::INDEX_BUFFER,
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vertex => "VERTEX_BUFFER",
            Self::Index => "INDEX_BUFFER",
            Self::Uniform => "UNIFORM_BUFFER",
        }
    }
}

/// Host-side contents of a buffer resource waiting to be uploaded.
#[derive(Debug, Default)]
pub struct BufferData {
    bytes: Vec<u8>,
    element_size: usize,
    dirty: bool,
}

impl BufferData {
    /// Replace the contents. The GPU buffer is rebuilt before the next frame records.
    pub fn announce_update(&mut self, data: &[u8]) {
        self.bytes.clear();
        self.bytes.extend_from_slice(data);
        self.dirty = true;
    }

    /// Replace the contents with a slice of plain values, remembering their size as the element size.
    pub fn announce_update_pod<T: Pod>(&mut self, data: &[T]) {
        self.element_size = std::mem::size_of::<T>();
        self.announce_update(bytemuck::cast_slice(data));
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub const fn element_size(&self) -> usize {
        self.element_size
    }

    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

/// Callback run once per frame before dirty buffers are uploaded.
pub type BufferUpdateFn = Box<dyn FnMut(&mut BufferData)>;

/// A vertex, index or uniform buffer.
///
/// The GPU buffer is created lazily the first time data is announced and rebuilt
/// whenever it is announced again.
pub struct BufferResource {
    name: String,
    usage: BufferUsage,
    vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    data: BufferData,
    on_update: Option<BufferUpdateFn>,
}

impl BufferResource {
    pub(crate) fn new(name: &str, usage: BufferUsage) -> Self {
        Self {
            name: name.to_string(),
            usage,
            vertex_attributes: Vec::new(),
            data: BufferData::default(),
            on_update: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Stride of one element, used as the vertex binding stride.
    pub const fn element_size(&self) -> usize {
        self.data.element_size
    }

    pub fn vertex_attributes(&self) -> &[vk::VertexInputAttributeDescription] {
        &self.vertex_attributes
    }

    pub fn data(&self) -> &[u8] {
        self.data.bytes()
    }

    pub fn size(&self) -> usize {
        self.data.bytes.len()
    }

    pub const fn is_dirty(&self) -> bool {
        self.data.dirty
    }

    /// Describe the next vertex attribute; its location is the number of attributes before it.
    pub fn add_vertex_attribute(&mut self, format: vk::Format, offset: u32) -> &mut Self {
        let location = self.vertex_attributes.len() as u32;
        self.vertex_attributes.push(vk::VertexInputAttributeDescription {
            location,
            binding: 0,
            format,
            offset,
        });
        self
    }

    /// Override the element stride for data announced as raw bytes.
    pub fn set_element_size(&mut self, element_size: usize) -> &mut Self {
        self.data.element_size = element_size;
        self
    }

    /// Replace the contents with raw bytes. Vertex and index buffers fed this way
    /// need [`set_element_size`](Self::set_element_size) or compile rejects them.
    pub fn announce_update(&mut self, data: &[u8]) -> &mut Self {
        self.data.announce_update(data);
        self
    }

    pub fn announce_update_pod<T: Pod>(&mut self, data: &[T]) -> &mut Self {
        self.data.announce_update_pod(data);
        self
    }

    /// Run `on_update` once per frame before dirty buffers are uploaded.
    pub fn set_on_update(&mut self, on_update: impl FnMut(&mut BufferData) + 'static) -> &mut Self {
        self.on_update = Some(Box::new(on_update));
        self
    }

    pub(crate) fn run_on_update(&mut self) {
        if let Some(on_update) = &mut self.on_update {
            on_update(&mut self.data);
        }
    }

    pub(crate) fn clear_dirty(&mut self) {
        self.data.clear_dirty();
    }
}

impl std::fmt::Debug for BufferResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferResource")
            .field("name", &self.name)
            .field("usage", &self.usage)
            .field("size", &self.size())
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

/// What a texture resource is attached as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// Aliases the current swapchain image.
    BackBuffer,
    DepthStencil,
    /// Color attachment owned by the graph.
    Normal,
}

impl TextureUsage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BackBuffer => "BACK_BUFFER",
            Self::DepthStencil => "DEPTH_STENCIL_BUFFER",
            Self::Normal => "NORMAL",
        }
    }
}

/// A texture the graph allocates (or, for the back buffer, borrows from the swapchain).
#[derive(Debug, Clone)]
pub struct TextureResource {
    name: String,
    usage: TextureUsage,
    format: vk::Format,
}

impl TextureResource {
    pub(crate) fn new(name: &str, usage: TextureUsage, format: vk::Format) -> Self {
        Self {
            name: name.to_string(),
            usage,
            format,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn usage(&self) -> TextureUsage {
        self.usage
    }

    /// Format requested at creation. Back buffers use the swapchain format instead.
    pub const fn format(&self) -> vk::Format {
        self.format
    }
}

/// A sampled texture whose image and sampler are owned outside the graph.
///
/// The view and sampler must stay alive for as long as the compiled graph is used.
#[derive(Debug, Clone)]
pub struct ExternalTextureResource {
    name: String,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
}

impl ExternalTextureResource {
    pub(crate) fn new(name: &str, image_view: vk::ImageView, sampler: vk::Sampler) -> Self {
        Self {
            name: name.to_string(),
            image_view,
            sampler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub const fn image_view(&self) -> vk::ImageView {
        self.image_view
    }

    pub const fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    /// Combined image sampler info, with the image expected in shader-read layout.
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(self.sampler)
            .image_view(self.image_view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Vertex {
        position: Vec3,
        color: Vec3,
    }

    #[test]
    fn announcing_marks_dirty_and_copies() {
        let mut buffer = BufferResource::new("uniforms", BufferUsage::Uniform);
        assert!(!buffer.is_dirty());

        let pattern: Vec<u8> = (0..64).collect();
        buffer.announce_update(&pattern);
        assert!(buffer.is_dirty());
        assert_eq!(buffer.data(), pattern.as_slice());

        buffer.clear_dirty();
        assert!(!buffer.is_dirty());
        assert_eq!(buffer.size(), 64);
    }

    #[test]
    fn pod_updates_set_element_size() {
        let vertices = [Vertex {
            position: Vec3::ZERO,
            color: Vec3::ONE,
        }; 3];
        let mut buffer = BufferResource::new("triangle", BufferUsage::Vertex);
        buffer.announce_update_pod(&vertices);
        assert_eq!(buffer.element_size(), 24);
        assert_eq!(buffer.size(), 72);
    }

    #[test]
    fn vertex_attribute_locations_count_up() {
        let mut buffer = BufferResource::new("triangle", BufferUsage::Vertex);
        buffer
            .add_vertex_attribute(vk::Format::R32G32B32_SFLOAT, 0)
            .add_vertex_attribute(vk::Format::R32G32B32_SFLOAT, 12);
        let locations: Vec<u32> = buffer.vertex_attributes().iter().map(|a| a.location).collect();
        assert_eq!(locations, [0, 1]);
        assert_eq!(buffer.vertex_attributes()[1].offset, 12);
    }

    #[test]
    fn update_callback_sees_the_data() {
        let mut buffer = BufferResource::new("uniforms", BufferUsage::Uniform);
        let mut frame = 0u32;
        buffer.set_on_update(move |data| {
            frame += 1;
            data.announce_update_pod(&[frame]);
        });

        buffer.run_on_update();
        buffer.run_on_update();
        assert!(buffer.is_dirty());
        assert_eq!(buffer.data(), bytemuck::bytes_of(&2u32));
    }

    #[test]
    fn external_textures_are_sampled_in_shader_read_layout() {
        let texture =
            ExternalTextureResource::new("albedo", vk::ImageView::null(), vk::Sampler::null());
        assert_eq!(
            texture.descriptor_info().image_layout,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
        );
    }
}
