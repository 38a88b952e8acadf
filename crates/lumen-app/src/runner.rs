//! Window, event loop and frame pacing around a [`GraphApp`].

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ash::vk;
use lumen_core::RendererConfig;
use lumen_gpu::GpuContextBuilder;
use lumen_graph::{GraphError, RenderGraph};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::GraphApp;
use crate::context::AppContext;
use crate::frame::{FpsCounter, FrameBackend, FrameLoop, FrameOutcome};

/// Window and pacing settings for [`run_app`].
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title. The measured FPS is appended once a second.
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Frames are paced to this rate when set; `None` or `Some(0)` runs uncapped.
    pub target_fps: Option<u32>,
    /// Device, pipeline cache and descriptor pool settings.
    pub renderer: RendererConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Lumen".to_string(),
            width: 1280,
            height: 720,
            target_fps: None,
            renderer: RendererConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub const fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    #[must_use]
    pub fn with_renderer(mut self, renderer: RendererConfig) -> Self {
        self.renderer = renderer;
        self
    }

    /// Frame pacing interval for `target_fps`.
    pub fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Run a [`GraphApp`] with the given configuration.
///
/// Initializes logging, creates the window and GPU context, and runs the
/// event loop until the window is closed.
pub fn run_app<A: GraphApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    config.renderer.validate()?;
    info!(title = %config.title, "Starting");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
    };
    event_loop.run_app(&mut runner)?;
    Ok(())
}

/// winit handler; the state exists between `resumed` and shutdown.
struct AppRunner<A: GraphApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
}

/// Everything a frame touches. Implements [`FrameBackend`] for the frame loop.
struct GraphBackend<A: GraphApp> {
    // Dropped before the context whose device it was created on.
    graph: Option<RenderGraph>,
    app: A,
    ctx: AppContext,
}

struct AppState<A: GraphApp> {
    backend: GraphBackend<A>,
    frames: FrameLoop,
    fps: FpsCounter,
    title: String,
    last_frame_time: Instant,
    target_frame_time: Option<Duration>,
    minimized: bool,
}

impl<A: GraphApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => self.state = Some(state),
            Err(e) => {
                error!("Initialization failed: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        if state.backend.app.on_event(&event) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => self.shutdown(event_loop),
            WindowEvent::RedrawRequested => {
                if let Err(e) = state.render_frame() {
                    error!("Frame failed: {e:#}");
                    self.shutdown(event_loop);
                }
            }
            WindowEvent::Resized(size) => {
                state.minimized = size.width == 0 || size.height == 0;
                if !state.minimized {
                    state.frames.request_resize();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.backend.ctx.window.request_redraw();
        }
    }
}

impl<A: GraphApp + 'static> AppRunner<A> {
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        event_loop.exit();
    }

    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let config = &self.config;
        let window = event_loop.create_window(
            Window::default_attributes()
                .with_title(&config.title)
                .with_inner_size(PhysicalSize::new(config.width, config.height)),
        )?;
        let gpu = GpuContextBuilder::new()
            .app_name(&config.title)
            .validation(config.renderer.validation)
            .build()?;

        let mut ctx = AppContext::new(Arc::new(window), gpu, config.renderer.clone())?;
        let app = A::init(&mut ctx)?;

        let mut backend = GraphBackend {
            graph: None,
            app,
            ctx,
        };
        backend.rebuild_graph()?;

        let now = Instant::now();
        Ok(AppState {
            backend,
            frames: FrameLoop::new(),
            fps: FpsCounter::new(now),
            title: config.title.clone(),
            last_frame_time: now,
            target_frame_time: config.target_frame_time(),
            minimized: false,
        })
    }
}

impl<A: GraphApp> GraphBackend<A> {
    /// Let the app declare a fresh graph and compile it towards the back buffer.
    fn rebuild_graph(&mut self) -> anyhow::Result<()> {
        self.graph = None;
        let (mut graph, back_buffer, depth) = self.ctx.new_graph()?;
        self.app.setup_graph(&self.ctx, &mut graph, back_buffer, depth)?;
        self.ctx.compile_graph(&mut graph, back_buffer)?;
        self.graph = Some(graph);
        Ok(())
    }
}

impl<A: GraphApp> FrameBackend for GraphBackend<A> {
    fn wait_idle(&mut self) -> anyhow::Result<()> {
        self.ctx.gpu.wait_idle()?;
        Ok(())
    }

    fn recreate(&mut self) -> anyhow::Result<()> {
        // Framebuffers reference the old swapchain views.
        self.graph = None;
        self.ctx.recreate_swapchain()?;
        self.rebuild_graph()?;
        info!("Resized to {}x{}", self.ctx.width(), self.ctx.height());
        Ok(())
    }

    fn reset_sync(&mut self) -> anyhow::Result<()> {
        self.ctx.wait_for_frame()?;
        self.ctx.reset_image_available()
    }

    fn wait_for_frame(&mut self) -> anyhow::Result<()> {
        self.ctx.wait_for_frame()
    }

    fn acquire(&mut self) -> anyhow::Result<(u32, bool)> {
        let ctx = &self.ctx;
        Ok(ctx
            .swapchain
            .acquire_next_image(ctx.image_available.handle(), ctx.config.fence_timeout_ns)?)
    }

    fn render(&mut self, image_index: u32) -> anyhow::Result<vk::Semaphore> {
        let graph = self.graph.as_mut().ok_or(GraphError::NotCompiled)?;
        let ctx = &mut self.ctx;
        let image_available = ctx.image_available.handle();
        let cmd = ctx.command_pool.request_command_buffer(&ctx.gpu, "Frame")?;
        Ok(graph.render(&ctx.gpu, cmd, image_index, image_available)?)
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> anyhow::Result<bool> {
        let ctx = &self.ctx;
        Ok(ctx.swapchain.present(ctx.gpu.graphics_queue(), image_index, &[wait])?)
    }
}

impl<A: GraphApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        if self.minimized {
            return Ok(());
        }
        let frame_start = Instant::now();
        let dt = frame_start.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = frame_start;

        if !self.frames.resize_requested() {
            let backend = &mut self.backend;
            let graph = backend.graph.as_mut().ok_or(GraphError::NotCompiled)?;
            backend.app.update(graph, dt)?;
        }

        let outcome = self.frames.frame(&mut self.backend)?;
        if matches!(outcome, FrameOutcome::Presented { .. }) {
            if let Some(fps) = self.fps.tick(Instant::now()) {
                self.backend
                    .ctx
                    .window
                    .set_title(&format!("{} - {fps:.0} FPS", self.title));
            }
        }

        if let Some(remaining) = self
            .target_frame_time
            .and_then(|target| target.checked_sub(frame_start.elapsed()))
        {
            thread::sleep(remaining);
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        let frames = self.frames.frames_presented();
        match self.fps.stats() {
            Some((min, max, avg)) => info!(frames, "FPS min {min:.1}, max {max:.1}, avg {avg:.1}"),
            None => info!(frames, "Shutting down"),
        }

        let backend = &mut self.backend;
        if let Err(e) = backend.ctx.gpu.wait_idle() {
            error!("Device did not go idle: {e}");
        }

        backend.app.cleanup(&mut backend.ctx);
        // Framebuffers go before the swapchain views they reference.
        backend.graph = None;
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_frame_time_from_fps() {
        let config = AppConfig::new("test").with_target_fps(50);
        assert_eq!(config.target_frame_time(), Some(Duration::from_millis(20)));
        assert_eq!(AppConfig::default().target_frame_time(), None);
        assert_eq!(AppConfig::default().with_target_fps(0).target_frame_time(), None);
    }

    #[test]
    fn config_builders() {
        let renderer = RendererConfig::default().with_vsync(true);
        let config = AppConfig::new("Viewer")
            .with_size(800, 600)
            .with_renderer(renderer);
        assert_eq!(config.title, "Viewer");
        assert_eq!((config.width, config.height), (800, 600));
        assert!(config.renderer.vsync);
    }
}
