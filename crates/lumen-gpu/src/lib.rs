//! Vulkan abstraction layer for the Lumen renderer.
//!
//! This crate provides:
//! - Vulkan instance and device management
//! - Memory allocation via gpu-allocator
//! - Owned resources: buffers, images, samplers, framebuffers, shaders
//! - Descriptor layout caching and growing descriptor pools
//! - Pipeline layouts, an on-disk pipeline cache and a graphics pipeline builder
//! - Command pools and buffers
//! - Surface and swapchain handling

pub mod capabilities;
pub mod commands;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod memory;
pub mod pipelines;
pub mod render_pass;
pub mod resources;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use commands::{CommandBuffer, CommandPool, DebugLabelColor};
pub use context::{GpuContext, GpuContextBuilder, QueueFamilies, QueueType};
pub use descriptors::{
    DescriptorBuilder, DescriptorInfo, DescriptorPoolAllocator, DescriptorSetAllocator,
    DescriptorSetLayoutCache, DescriptorUpdateBuilder,
};
pub use error::{GpuError, Result};
pub use memory::{GpuAllocator, MemoryUsage};
pub use pipelines::{GraphicsPipeline, GraphicsPipelineBuilder, PipelineCache, PipelineLayout};
pub use render_pass::RenderPass;
pub use resources::{
    Buffer, Framebuffer, Image, ImageDesc, OffscreenFramebuffer, Sampler, SamplerConfig, Shader,
};
pub use surface::{SurfaceCapabilities, SurfaceContext};
pub use swapchain::{Swapchain, SwapchainDesc};
pub use sync::{Fence, Semaphore};
