//! Declarative render graph for the Lumen renderer.
//!
//! Applications declare buffers, textures and graphics stages together with the
//! resources each stage reads and writes. Compiling the graph orders the stages
//! backwards from a target texture and creates render passes, framebuffers,
//! pipelines and descriptor sets. Rendering re-uploads announced buffer data and
//! records every stage into a single command buffer.

pub mod error;
pub mod frame;
pub mod graph;
pub mod order;
pub mod physical;
pub mod plan;
pub mod resource;
pub mod stage;

pub use error::{GraphError, Result};
pub use graph::RenderGraph;
pub use physical::{PhysicalBuffer, PhysicalGraphicsStage, PhysicalTexture};
pub use resource::{
    BufferData, BufferHandle, BufferResource, BufferUpdateFn, BufferUsage, ExternalTextureHandle,
    ExternalTextureResource, ResourceHandle, StageHandle, TextureHandle, TextureResource,
    TextureUsage,
};
pub use stage::{GraphicsStage, PushConstant, RecordFn, StageRead};
