//! Render graph error types.

use ash::vk;
use lumen_gpu::GpuError;
use thiserror::Error;

/// Errors raised while building, compiling or rendering a graph.
#[derive(Error, Debug)]
pub enum GraphError {
    /// A GPU object could not be created or used.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// Raw Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// Following reads from the target leads back to a stage already on the path.
    #[error("Dependency cycle through stage '{stage}'")]
    DependencyCycle { stage: String },

    /// A stage reads a texture that no stage writes.
    #[error("Stage '{stage}' reads '{resource}', which no stage writes")]
    UnproducedRead { stage: String, resource: String },

    /// No stage writes the compile target.
    #[error("No stage writes the target '{target}'")]
    NoWriters { target: String },

    /// Caller broke an API contract.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Resources and stages cannot be added once the graph is compiled.
    #[error("The render graph is already compiled")]
    AlreadyCompiled,

    /// Rendering requires a compiled graph.
    #[error("The render graph has not been compiled")]
    NotCompiled,

    /// A handle that does not belong to this graph.
    #[error("Unknown handle: {0}")]
    UnknownHandle(String),
}

/// Result type for render graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

impl GraphError {
    /// True if the underlying failure means the swapchain must be recreated.
    pub fn is_swapchain_stale(&self) -> bool {
        match self {
            Self::Gpu(e) => e.is_swapchain_stale(),
            Self::Vulkan(result) => matches!(
                *result,
                vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_swapchain_is_detected_through_gpu_errors() {
        let err = GraphError::from(GpuError::call(
            "vkQueuePresentKHR failed",
            vk::Result::ERROR_OUT_OF_DATE_KHR,
            "swapchain",
        ));
        assert!(err.is_swapchain_stale());
        assert!(GraphError::Vulkan(vk::Result::SUBOPTIMAL_KHR).is_swapchain_stale());
        assert!(!GraphError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_swapchain_stale());
        assert!(!GraphError::AlreadyCompiled.is_swapchain_stale());
    }

    #[test]
    fn messages_name_the_offenders() {
        let err = GraphError::UnproducedRead {
            stage: "lighting".into(),
            resource: "gbuffer".into(),
        };
        assert_eq!(
            err.to_string(),
            "Stage 'lighting' reads 'gbuffer', which no stage writes"
        );
    }
}
