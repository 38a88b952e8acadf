//! Application context.

use std::sync::Arc;

use ash::vk;
use lumen_core::RendererConfig;
use lumen_gpu::{
    CommandPool, GpuContext, PipelineCache, QueueType, Semaphore, SurfaceContext, Swapchain,
};
use lumen_graph::{RenderGraph, TextureHandle, TextureUsage};
use winit::window::Window;

/// Depth format of the shared depth buffer every graph gets.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT_S8_UINT;

/// Application context shared across all app methods.
///
/// Owns the device and everything created against it. Fields drop top to
/// bottom: the swapchain before its surface, the device before the window.
pub struct AppContext {
    /// Renderer settings the context was created with.
    pub config: RendererConfig,
    pub(crate) command_pool: CommandPool,
    pub(crate) image_available: Semaphore,
    /// Pipeline cache shared by every graph. Written to disk when dropped.
    pub pipeline_cache: PipelineCache,
    /// Current swapchain.
    pub swapchain: Swapchain,
    /// Surface context for windowed rendering.
    pub surface: SurfaceContext,
    /// GPU context with device and queues.
    pub gpu: GpuContext,
    /// Outlives the surface presenting to it.
    pub window: Arc<Window>,
}

impl AppContext {
    /// Create the surface, swapchain and per-frame objects for `window`.
    pub(crate) fn new(
        window: Arc<Window>,
        gpu: GpuContext,
        config: RendererConfig,
    ) -> anyhow::Result<Self> {
        // SAFETY: The context owns the window and drops it after the surface
        let surface = unsafe { SurfaceContext::from_window(&gpu, window.as_ref())? };

        let size = window.inner_size();
        let swapchain = surface.create_swapchain(&gpu, size.width, size.height, config.vsync, None)?;

        let pipeline_cache = PipelineCache::new(&gpu, config.pipeline_cache_path.clone())?;
        let command_pool = CommandPool::new(&gpu, QueueType::Graphics, "Frame commands")?;
        let image_available = Semaphore::new(&gpu, "Image available")?;

        Ok(Self {
            config,
            command_pool,
            image_available,
            pipeline_cache,
            swapchain,
            surface,
            gpu,
            window,
        })
    }

    /// Get the current swapchain extent.
    pub const fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    pub const fn width(&self) -> u32 {
        self.swapchain.extent().width
    }

    pub const fn height(&self) -> u32 {
        self.swapchain.extent().height
    }

    /// Get the aspect ratio (width / height).
    pub fn aspect_ratio(&self) -> f32 {
        self.width() as f32 / self.height().max(1) as f32
    }

    /// A fresh graph with the back buffer and depth buffer already declared.
    pub fn new_graph(&self) -> anyhow::Result<(RenderGraph, TextureHandle, TextureHandle)> {
        let mut graph = RenderGraph::new(&self.config);
        let back_buffer =
            graph.add_texture("Back buffer", TextureUsage::BackBuffer, self.swapchain.image_format())?;
        let depth = graph.add_texture("Depth buffer", TextureUsage::DepthStencil, DEPTH_FORMAT)?;
        Ok((graph, back_buffer, depth))
    }

    /// Compile `graph` towards `target` against the current swapchain.
    pub fn compile_graph(&self, graph: &mut RenderGraph, target: TextureHandle) -> anyhow::Result<()> {
        graph.compile(&self.gpu, &self.swapchain, &self.pipeline_cache, target)?;
        Ok(())
    }

    /// Block until the last frame submitted from this context finished.
    pub fn wait_for_frame(&self) -> anyhow::Result<()> {
        self.command_pool
            .wait_for_submissions(self.config.fence_timeout_ns)?;
        Ok(())
    }

    /// Replace the image-available semaphore, which a dropped frame may leave signaled.
    pub(crate) fn reset_image_available(&mut self) -> anyhow::Result<()> {
        self.image_available = Semaphore::new(&self.gpu, "Image available")?;
        Ok(())
    }

    /// Replace the swapchain with one sized to the window, retiring the old one.
    ///
    /// Every framebuffer built on the old image views must already be gone.
    pub(crate) fn recreate_swapchain(&mut self) -> anyhow::Result<()> {
        let size = self.window.inner_size();
        let swapchain = self.surface.create_swapchain(
            &self.gpu,
            size.width,
            size.height,
            self.config.vsync,
            Some(&self.swapchain),
        )?;
        // Dropping the old swapchain destroys it; the caller waited for the device.
        self.swapchain = swapchain;
        Ok(())
    }
}
