//! Lumen Demo Viewer
//!
//! Draws a spinning triangle through the render graph. The triangle's
//! transform lives in a uniform buffer re-announced every frame and its tint
//! is a push constant updated by the stage.
//!
//! ## Usage
//!
//! ```bash
//! glslc apps/lumen-viewer/shaders/triangle.vert -o apps/lumen-viewer/shaders/triangle.vert.spv
//! glslc apps/lumen-viewer/shaders/triangle.frag -o apps/lumen-viewer/shaders/triangle.frag.spv
//! cargo run -p lumen-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `--shaders <DIR>`: Directory holding `triangle.vert.spv` and `triangle.frag.spv`
//! - `--vsync`: Enable vsync
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use lumen_app::{run_app, AppConfig};
use lumen_core::RendererConfig;

use crate::app::{ViewerParams, Viewer};

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;
const TARGET_FPS: u32 = 240;

fn main() -> anyhow::Result<()> {
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let params = ViewerParams::from_args();
    let renderer = RendererConfig::default().with_vsync(params.vsync);

    run_app::<Viewer>(
        AppConfig::new("Lumen - Triangle")
            .with_size(WIDTH, HEIGHT)
            .with_target_fps(TARGET_FPS)
            .with_renderer(renderer),
    )
}

fn print_help() {
    eprintln!(
        "Lumen Demo Viewer

USAGE:
    cargo run -p lumen-viewer -- [OPTIONS]

OPTIONS:
    --shaders <DIR>         Directory with triangle.vert.spv and triangle.frag.spv
                            Default: apps/lumen-viewer/shaders
    --vsync                 Enable vsync
    -h, --help              Print this help message

SHADERS:
    glslc shaders/triangle.vert -o shaders/triangle.vert.spv
    glslc shaders/triangle.frag -o shaders/triangle.frag.spv

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
