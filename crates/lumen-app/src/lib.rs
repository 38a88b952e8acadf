//! Application framework for the Lumen renderer.
//!
//! This crate handles the boilerplate around a render graph:
//! - Window creation and management
//! - GPU context initialization
//! - Swapchain creation and recreation, with the graph rebuilt each time
//! - Frame synchronization and FPS reporting
//! - Event loop handling
//!
//! # Example
//!
//! ```no_run
//! use lumen_app::{run_app, AppConfig, AppContext, GraphApp};
//! use lumen_graph::{RenderGraph, TextureHandle};
//!
//! struct MyApp;
//!
//! impl GraphApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn setup_graph(
//!         &mut self,
//!         _ctx: &AppContext,
//!         graph: &mut RenderGraph,
//!         back_buffer: TextureHandle,
//!         depth: TextureHandle,
//!     ) -> anyhow::Result<()> {
//!         let stage = graph.add_graphics_stage("Clear")?;
//!         graph
//!             .stage_mut(stage)?
//!             .writes_to(back_buffer)
//!             .writes_to(depth)
//!             .set_clears_screen(true);
//!         Ok(())
//!     }
//!
//!     fn update(&mut self, _graph: &mut RenderGraph, _dt: f32) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppConfig::new("Clear"))
//! }
//! ```

mod app;
mod context;
mod frame;
mod runner;

pub use app::GraphApp;
pub use context::{AppContext, DEPTH_FORMAT};
pub use frame::{is_swapchain_stale, FpsCounter, FrameBackend, FrameLoop, FrameOutcome};
pub use runner::{run_app, AppConfig};

// Re-export commonly used types for convenience
pub use lumen_gpu::{GpuContext, GpuContextBuilder};
pub use lumen_graph::RenderGraph;
pub use winit::event::WindowEvent;
