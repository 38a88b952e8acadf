//! Viewer application: one triangle, one uniform buffer, one push constant.

use std::cell::Cell;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use tracing::info;

use lumen_app::{AppContext, GraphApp, RenderGraph};
use lumen_gpu::Shader;
use lumen_graph::{BufferHandle, BufferUsage, TextureHandle};

/// Triangle rotation speed in radians per second.
const SPIN_SPEED: f32 = 0.8;

/// Tint pulse frequency in cycles per second.
const PULSE_HZ: f32 = 0.25;

/// Command line parameters.
#[derive(Debug, Clone)]
pub struct ViewerParams {
    pub shader_dir: PathBuf,
    pub vsync: bool,
}

impl Default for ViewerParams {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/shaders")),
            vsync: false,
        }
    }
}

impl ViewerParams {
    /// Parse viewer parameters from command line arguments.
    pub fn from_args() -> Self {
        Self::parse(std::env::args().skip(1))
    }

    fn parse(args: impl IntoIterator<Item = String>) -> Self {
        let mut params = Self::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--shaders" => {
                    if let Some(dir) = args.next() {
                        params.shader_dir = PathBuf::from(dir);
                    }
                }
                "--vsync" => params.vsync = true,
                _ => {}
            }
        }
        params
    }
}

/// Vertex layout of the triangle buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

/// Clockwise in framebuffer space, matching the graph's front face.
pub const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, -0.5, 0.0],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [0.5, 0.5, 0.0],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [-0.5, 0.5, 0.0],
        color: [0.0, 0.0, 1.0],
    },
];

/// Per-frame uniform block, `set = 0, binding = 0` in the vertex shader.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct FrameUniforms {
    pub transform: Mat4,
}

impl FrameUniforms {
    /// Rotation by `time * SPIN_SPEED` about Z, squeezed horizontally for `aspect`.
    pub fn at(time: f32, aspect: f32) -> Self {
        let correction = Mat4::from_scale(Vec3::new(1.0 / aspect.max(f32::EPSILON), 1.0, 1.0));
        Self {
            transform: correction * Mat4::from_rotation_z(time * SPIN_SPEED),
        }
    }
}

/// Fragment tint for `time`, pulsing between half and full brightness.
pub fn tint_at(time: f32) -> Vec4 {
    let pulse = 0.75 + 0.25 * (time * PULSE_HZ * std::f32::consts::TAU).sin();
    Vec4::new(pulse, pulse, pulse, 1.0)
}

/// Viewer application state.
pub struct Viewer {
    vertex_shader: Arc<Shader>,
    fragment_shader: Arc<Shader>,
    uniforms: Option<BufferHandle>,
    // Shared with the push constant callback of the current graph.
    time: Rc<Cell<f32>>,
    aspect: f32,
}

impl GraphApp for Viewer {
    fn init(ctx: &mut AppContext) -> anyhow::Result<Self> {
        let params = ViewerParams::from_args();
        info!("Loading shaders from {}", params.shader_dir.display());

        let vertex_shader = Shader::from_file(
            &ctx.gpu,
            vk::ShaderStageFlags::VERTEX,
            params.shader_dir.join("triangle.vert.spv"),
            "main",
            "Triangle vertex shader",
        )?;
        let fragment_shader = Shader::from_file(
            &ctx.gpu,
            vk::ShaderStageFlags::FRAGMENT,
            params.shader_dir.join("triangle.frag.spv"),
            "main",
            "Triangle fragment shader",
        )?;

        Ok(Self {
            vertex_shader: Arc::new(vertex_shader),
            fragment_shader: Arc::new(fragment_shader),
            uniforms: None,
            time: Rc::new(Cell::new(0.0)),
            aspect: ctx.aspect_ratio(),
        })
    }

    fn setup_graph(
        &mut self,
        ctx: &AppContext,
        graph: &mut RenderGraph,
        back_buffer: TextureHandle,
        depth: TextureHandle,
    ) -> anyhow::Result<()> {
        self.aspect = ctx.aspect_ratio();

        let vertices = graph.add_buffer("Triangle vertices", BufferUsage::Vertex)?;
        graph
            .buffer_mut(vertices)?
            .add_vertex_attribute(
                vk::Format::R32G32B32_SFLOAT,
                std::mem::offset_of!(Vertex, position) as u32,
            )
            .add_vertex_attribute(
                vk::Format::R32G32B32_SFLOAT,
                std::mem::offset_of!(Vertex, color) as u32,
            )
            .announce_update_pod(&TRIANGLE);

        let uniforms = graph.add_buffer("Frame uniforms", BufferUsage::Uniform)?;
        graph
            .buffer_mut(uniforms)?
            .announce_update_pod(&[FrameUniforms::at(self.time.get(), self.aspect)]);
        self.uniforms = Some(uniforms);

        let time = Rc::clone(&self.time);
        let stage = graph.add_graphics_stage("Triangle")?;
        graph
            .stage_mut(stage)?
            .add_shader(Arc::clone(&self.vertex_shader))
            .add_shader(Arc::clone(&self.fragment_shader))
            .reads_from(vertices)
            .reads_from_in(uniforms, vk::ShaderStageFlags::VERTEX)
            .writes_to(back_buffer)
            .writes_to(depth)
            .set_clears_screen(true)
            .set_depth_options(true, true)
            .add_push_constant_range(
                tint_at(0.0),
                move |tint| *tint = tint_at(time.get()),
                vk::ShaderStageFlags::FRAGMENT,
                0,
            )
            .set_on_record(|_, cmd| {
                cmd.draw(3, 1, 0, 0);
            });

        Ok(())
    }

    fn update(&mut self, graph: &mut RenderGraph, dt: f32) -> anyhow::Result<()> {
        self.time.set(self.time.get() + dt);
        if let Some(uniforms) = self.uniforms {
            graph
                .buffer_mut(uniforms)?
                .announce_update_pod(&[FrameUniforms::at(self.time.get(), self.aspect)]);
        }
        Ok(())
    }

    fn cleanup(&mut self, _ctx: &mut AppContext) {
        info!("Viewer ran for {:.1}s", self.time.get());
    }
}
