//! Shader modules.

use crate::context::GpuContext;
use crate::error::{require_name, GpuError, Result};
use ash::vk;
use std::ffi::{CStr, CString};
use std::path::Path;
use std::sync::Arc;

/// A SPIR-V shader module bound to one pipeline stage.
pub struct Shader {
    device: Arc<ash::Device>,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
    entry_point: CString,
    name: String,
}

impl Shader {
    /// Create a shader from SPIR-V words.
    pub fn from_spirv(
        ctx: &GpuContext,
        stage: vk::ShaderStageFlags,
        spirv: &[u32],
        entry_point: &str,
        name: &str,
    ) -> Result<Self> {
        require_name(name, "Shader")?;
        if spirv.is_empty() {
            return Err(GpuError::InvalidArgument(format!(
                "Shader {name} has no SPIR-V code"
            )));
        }
        let entry_point = CString::new(entry_point).map_err(|_| {
            GpuError::InvalidArgument(format!("Shader {name} entry point contains a NUL byte"))
        })?;

        let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let module = unsafe { ctx.device().create_shader_module(&create_info, None) }
            .map_err(|e| GpuError::call("vkCreateShaderModule failed", e, name))?;
        ctx.set_debug_name(module, name);

        Ok(Self {
            device: ctx.shared_device(),
            module,
            stage,
            entry_point,
            name: name.to_string(),
        })
    }

    /// Load a compiled `.spv` file.
    pub fn from_file(
        ctx: &GpuContext,
        stage: vk::ShaderStageFlags,
        path: impl AsRef<Path>,
        entry_point: &str,
        name: &str,
    ) -> Result<Self> {
        let path = path.as_ref();
        let mut file = std::fs::File::open(path)
            .map_err(|e| GpuError::ShaderModule(format!("{}: {e}", path.display())))?;
        let code = ash::util::read_spv(&mut file)
            .map_err(|e| GpuError::ShaderModule(format!("{}: {e}", path.display())))?;

        tracing::debug!("Loaded shader {name} from {}", path.display());
        Self::from_spirv(ctx, stage, &code, entry_point, name)
    }

    pub const fn module(&self) -> vk::ShaderModule {
        self.module
    }

    pub const fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage info for a pipeline create call.
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo<'_> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage)
            .module(self.module)
            .name(&self.entry_point)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}
