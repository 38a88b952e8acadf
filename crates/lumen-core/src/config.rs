//! Renderer configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_PIPELINE_CACHE_PATH, DEFAULT_POOL_COMBINED_IMAGE_SAMPLERS, DEFAULT_POOL_MAX_SETS,
    DEFAULT_POOL_UNIFORM_BUFFERS,
};
use crate::error::{ConfigError, Result};

/// Capacities of every descriptor pool the allocator creates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorPoolConfig {
    /// Uniform buffer descriptors per pool.
    pub uniform_buffers: u32,
    /// Combined image sampler descriptors per pool.
    pub combined_image_samplers: u32,
    /// Maximum number of descriptor sets per pool.
    pub max_sets: u32,
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        Self {
            uniform_buffers: DEFAULT_POOL_UNIFORM_BUFFERS,
            combined_image_samplers: DEFAULT_POOL_COMBINED_IMAGE_SAMPLERS,
            max_sets: DEFAULT_POOL_MAX_SETS,
        }
    }
}

/// Renderer configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Where the pipeline cache is loaded from and written back to.
    pub pipeline_cache_path: PathBuf,
    /// Descriptor pool capacities.
    pub descriptor_pool: DescriptorPoolConfig,
    /// Timeout used for frame fence waits, in nanoseconds.
    pub fence_timeout_ns: u64,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// Enable vsync.
    pub vsync: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            pipeline_cache_path: PathBuf::from(DEFAULT_PIPELINE_CACHE_PATH),
            descriptor_pool: DescriptorPoolConfig::default(),
            fence_timeout_ns: u64::MAX,
            validation: cfg!(debug_assertions),
            vsync: false,
        }
    }
}

impl RendererConfig {
    /// Set the pipeline cache file path.
    #[must_use]
    pub fn with_pipeline_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.pipeline_cache_path = path.into();
        self
    }

    /// Set the descriptor pool capacities.
    #[must_use]
    pub const fn with_descriptor_pool(mut self, pool: DescriptorPoolConfig) -> Self {
        self.descriptor_pool = pool;
        self
    }

    /// Set the fence wait timeout.
    #[must_use]
    pub const fn with_fence_timeout_ns(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout_ns = timeout_ns;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub const fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Check that every field holds a usable value.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline_cache_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "pipeline_cache_path",
                reason: "path must not be empty".to_string(),
            });
        }

        let pool = &self.descriptor_pool;
        if pool.max_sets == 0 {
            return Err(ConfigError::InvalidValue {
                field: "descriptor_pool.max_sets",
                reason: "a pool must hold at least one set".to_string(),
            });
        }
        if pool.uniform_buffers == 0 && pool.combined_image_samplers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "descriptor_pool",
                reason: "a pool must hold at least one descriptor".to_string(),
            });
        }

        if self.fence_timeout_ns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "fence_timeout_ns",
                reason: "a zero timeout turns every frame wait into a poll".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_constants() {
        let config = RendererConfig::default();
        assert_eq!(config.pipeline_cache_path, PathBuf::from("vk_pipeline_cache.bin"));
        assert_eq!(config.descriptor_pool.uniform_buffers, 1024);
        assert_eq!(config.descriptor_pool.combined_image_samplers, 1024);
        assert_eq!(config.descriptor_pool.max_sets, 1024);
        assert_eq!(config.fence_timeout_ns, u64::MAX);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builders_override_fields() {
        let config = RendererConfig::default()
            .with_pipeline_cache_path("cache/pipelines.bin")
            .with_fence_timeout_ns(1_000)
            .with_vsync(true);

        assert_eq!(config.pipeline_cache_path, PathBuf::from("cache/pipelines.bin"));
        assert_eq!(config.fence_timeout_ns, 1_000);
        assert!(config.vsync);
    }

    #[test]
    fn rejects_unusable_values() {
        let empty_path = RendererConfig::default().with_pipeline_cache_path("");
        assert!(matches!(
            empty_path.validate(),
            Err(ConfigError::InvalidValue { field: "pipeline_cache_path", .. })
        ));

        let no_sets = RendererConfig::default().with_descriptor_pool(DescriptorPoolConfig {
            max_sets: 0,
            ..DescriptorPoolConfig::default()
        });
        assert!(no_sets.validate().is_err());

        let no_timeout = RendererConfig::default().with_fence_timeout_ns(0);
        assert!(no_timeout.validate().is_err());
    }
}
