//! Owned GPU resources: buffers, images, samplers, framebuffers and shaders.

pub mod buffer;
pub mod framebuffer;
pub mod image;
pub mod sampler;
pub mod shader;

pub use buffer::Buffer;
pub use framebuffer::{Framebuffer, OffscreenFramebuffer};
pub use image::{Image, ImageDesc};
pub use sampler::{Sampler, SamplerConfig};
pub use shader::Shader;
