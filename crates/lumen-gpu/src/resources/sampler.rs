//! Texture samplers.

use crate::context::GpuContext;
use crate::error::{require_name, GpuError, Result};
use ash::vk;
use std::sync::Arc;

/// Every sampler parameter callers may override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerConfig {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    pub min_lod: f32,
    pub max_lod: f32,
    pub mip_lod_bias: f32,
    pub anisotropy_enable: bool,
    pub max_anisotropy: f32,
    pub compare_enable: bool,
    pub compare_op: vk::CompareOp,
    pub border_color: vk::BorderColor,
    pub unnormalized_coordinates: bool,
}

impl Default for SamplerConfig {
    /// Linear filtering, repeat addressing, no anisotropy.
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            min_lod: 0.0,
            max_lod: 0.0,
            mip_lod_bias: 0.0,
            anisotropy_enable: false,
            max_anisotropy: 1.0,
            compare_enable: false,
            compare_op: vk::CompareOp::ALWAYS,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            unnormalized_coordinates: false,
        }
    }
}

impl SamplerConfig {
    /// Use the same address mode on all three axes.
    #[must_use]
    pub const fn address_mode(mut self, mode: vk::SamplerAddressMode) -> Self {
        self.address_mode_u = mode;
        self.address_mode_v = mode;
        self.address_mode_w = mode;
        self
    }

    /// Enable anisotropic filtering.
    #[must_use]
    pub const fn anisotropy(mut self, max_anisotropy: f32) -> Self {
        self.anisotropy_enable = true;
        self.max_anisotropy = max_anisotropy;
        self
    }

    pub fn create_info(&self) -> vk::SamplerCreateInfo<'static> {
        vk::SamplerCreateInfo::default()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(self.address_mode_u)
            .address_mode_v(self.address_mode_v)
            .address_mode_w(self.address_mode_w)
            .mip_lod_bias(self.mip_lod_bias)
            .anisotropy_enable(self.anisotropy_enable)
            .max_anisotropy(self.max_anisotropy)
            .compare_enable(self.compare_enable)
            .compare_op(self.compare_op)
            .min_lod(self.min_lod)
            .max_lod(self.max_lod)
            .border_color(self.border_color)
            .unnormalized_coordinates(self.unnormalized_coordinates)
    }
}

/// A named sampler, destroyed on drop.
pub struct Sampler {
    device: Arc<ash::Device>,
    sampler: vk::Sampler,
    name: String,
}

impl Sampler {
    /// Create a sampler with default settings.
    pub fn new(ctx: &GpuContext, name: &str) -> Result<Self> {
        Self::with_config(ctx, &SamplerConfig::default(), name)
    }

    /// Create a sampler with explicit settings.
    pub fn with_config(ctx: &GpuContext, config: &SamplerConfig, name: &str) -> Result<Self> {
        require_name(name, "Sampler")?;

        let mut config = *config;
        let caps = ctx.capabilities();
        if config.anisotropy_enable {
            if caps.sampler_anisotropy {
                config.max_anisotropy = config.max_anisotropy.min(caps.max_sampler_anisotropy);
            } else {
                tracing::warn!("Sampler {name}: anisotropy unsupported, disabling");
                config.anisotropy_enable = false;
                config.max_anisotropy = 1.0;
            }
        }

        let sampler = unsafe { ctx.device().create_sampler(&config.create_info(), None) }
            .map_err(|e| GpuError::call("vkCreateSampler failed", e, name))?;
        ctx.set_debug_name(sampler, name);

        Ok(Self {
            device: ctx.shared_device(),
            sampler,
            name: name.to_string(),
        })
    }

    pub const fn handle(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.destroy_sampler(self.sampler, None) };
    }
}
