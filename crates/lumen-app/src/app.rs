//! `GraphApp` trait definition.

use crate::context::AppContext;
use lumen_graph::{RenderGraph, TextureHandle};
use winit::event::WindowEvent;

/// Trait for applications that render through a [`RenderGraph`].
///
/// The runner owns the window, device, swapchain and graph. The application
/// declares its resources and stages in [`setup_graph`](Self::setup_graph) and
/// feeds them new data in [`update`](Self::update).
pub trait GraphApp: Sized {
    /// Initialize the application.
    ///
    /// Called once after the GPU context and window have been created, before
    /// the first graph is set up.
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self>;

    /// Declare resources and stages on a fresh graph.
    ///
    /// `back_buffer` and `depth` are already declared; the runner compiles the
    /// graph towards `back_buffer` afterwards. Called on start and again after
    /// every swapchain recreation, so handles from an earlier graph must not be
    /// reused.
    fn setup_graph(
        &mut self,
        ctx: &AppContext,
        graph: &mut RenderGraph,
        back_buffer: TextureHandle,
        depth: TextureHandle,
    ) -> anyhow::Result<()>;

    /// Update application state.
    ///
    /// Called every frame before the graph is rendered. Announce new buffer
    /// data here.
    ///
    /// # Arguments
    /// * `graph` - The compiled graph
    /// * `dt` - Delta time in seconds since last frame
    fn update(&mut self, graph: &mut RenderGraph, dt: f32) -> anyhow::Result<()>;

    /// Handle window events.
    ///
    /// Return `true` if the event was handled and should not be processed further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Cleanup before shutdown. The GPU is idle when this is called.
    #[allow(unused_variables)]
    fn cleanup(&mut self, ctx: &mut AppContext) {}
}
