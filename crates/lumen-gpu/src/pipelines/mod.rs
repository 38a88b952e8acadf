//! Pipeline layouts, the pipeline cache and graphics pipelines.

pub mod builder;
pub mod cache;
pub mod graphics;
pub mod layout;

pub use builder::{
    default_color_blend_attachment, full_scissor, full_viewport, GraphicsPipelineBuilder,
};
pub use cache::PipelineCache;
pub use graphics::GraphicsPipeline;
pub use layout::PipelineLayout;
