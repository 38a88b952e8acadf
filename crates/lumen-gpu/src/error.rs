//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// A Vulkan call failed while creating or using a named object.
    #[error("{message} ({result}) [object: {}]", .name.as_deref().unwrap_or("<unnamed>"))]
    VulkanCall {
        /// What was being attempted.
        message: String,
        /// Result code returned by the driver.
        result: vk::Result,
        /// Debug name of the object involved, if any.
        name: Option<String>,
    },

    /// Caller broke an API contract (empty name, missing handle, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module could not be loaded or created.
    #[error("Shader module creation failed: {0}")]
    ShaderModule(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// Wrap a failed Vulkan call together with the name of the object involved.
    pub fn call(message: impl Into<String>, result: vk::Result, name: &str) -> Self {
        Self::VulkanCall {
            message: message.into(),
            result,
            name: (!name.is_empty()).then(|| name.to_string()),
        }
    }

    /// The Vulkan result code behind this error, if there is one.
    pub const fn vk_result(&self) -> Option<vk::Result> {
        match self {
            Self::Vulkan(result) | Self::VulkanCall { result, .. } => Some(*result),
            _ => None,
        }
    }

    /// True if the error means the swapchain no longer matches the surface.
    pub fn is_swapchain_stale(&self) -> bool {
        matches!(
            self.vk_result(),
            Some(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR)
        )
    }
}

/// Reject empty debug names, which every named wrapper requires.
pub fn require_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GpuError::InvalidArgument(format!("{what} name must not be empty")));
    }
    Ok(())
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_error_carries_result_and_name() {
        let err = GpuError::call(
            "vkCreateRenderPass failed",
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
            "main pass",
        );
        assert_eq!(err.vk_result(), Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        let message = err.to_string();
        assert!(message.contains("vkCreateRenderPass failed"));
        assert!(message.contains("main pass"));
    }

    #[test]
    fn unnamed_call_error() {
        let err = GpuError::call("vkCreateFence failed", vk::Result::ERROR_UNKNOWN, "");
        assert!(err.to_string().contains("<unnamed>"));
    }

    #[test]
    fn swapchain_staleness() {
        assert!(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR).is_swapchain_stale());
        assert!(GpuError::call("present", vk::Result::SUBOPTIMAL_KHR, "").is_swapchain_stale());
        assert!(!GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_swapchain_stale());
        assert!(!GpuError::NoSuitableDevice.is_swapchain_stale());
    }

    #[test]
    fn empty_names_are_rejected() {
        assert!(require_name("", "Buffer").is_err());
        assert!(require_name("vertices", "Buffer").is_ok());
    }
}
