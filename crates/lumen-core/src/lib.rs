//! Core configuration types for the Lumen renderer.
//!
//! This crate provides the pieces shared by every other crate:
//! - Renderer configuration (pipeline cache location, descriptor pool sizes, timeouts)
//! - Configuration validation errors

pub mod config;
pub mod error;

pub use config::{DescriptorPoolConfig, RendererConfig};
pub use error::{ConfigError, Result};

/// Engine-wide constants
pub mod constants {
    /// File the pipeline cache is persisted to unless configured otherwise.
    pub const DEFAULT_PIPELINE_CACHE_PATH: &str = "vk_pipeline_cache.bin";
    /// Uniform buffer descriptors per descriptor pool.
    pub const DEFAULT_POOL_UNIFORM_BUFFERS: u32 = 1024;
    /// Combined image sampler descriptors per descriptor pool.
    pub const DEFAULT_POOL_COMBINED_IMAGE_SAMPLERS: u32 = 1024;
    /// Descriptor sets per descriptor pool.
    pub const DEFAULT_POOL_MAX_SETS: u32 = 1024;
}
