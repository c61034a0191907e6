use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use prism_assets::SceneManifest;
use prism_render::{BAYER_MATRIX, Counters, Dimensions, FrameStats, RecordingBackend, Renderer};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prism-cli", about = "Headless tools for the Prism renderer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print engine version and crate info
    Info,
    /// Print the 8x8 ordered-dither threshold table
    Dither {
        /// Print thresholds normalized to [0, 1)
        #[arg(long)]
        normalized: bool,
    },
    /// Render a scene manifest without a GPU and report what was submitted
    Render {
        /// Scene manifest (YAML). The demo scene when omitted.
        manifest: Option<PathBuf>,
        /// Number of frames to render
        #[arg(short, long, default_value = "1")]
        frames: u32,
        #[arg(long, default_value = "1280")]
        width: u32,
        #[arg(long, default_value = "720")]
        height: u32,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the demo scene as a manifest
    Demo,
}

#[derive(Serialize)]
struct RenderReport {
    frames: u32,
    last_frame: FrameStats,
    calls: Counters,
}

fn render(
    manifest: &SceneManifest,
    frames: u32,
    dimensions: Dimensions,
) -> anyhow::Result<RenderReport> {
    let mut backend = RecordingBackend::new();
    let scene = manifest.build_scene(&mut backend).context("build scene")?;
    let mut renderer = Renderer::new(backend, dimensions, manifest.renderer)?;
    manifest.configure(&mut renderer);

    let mut last_frame = FrameStats::default();
    for frame in 0..frames {
        last_frame = renderer.render(&scene)?;
        tracing::debug!(frame, draw_calls = last_frame.draw_calls, "frame rendered");
    }

    let calls = renderer.backend().counters();
    scene.release(renderer.backend_mut());
    let backend = renderer.release();
    if backend.live_resources() != 0 {
        tracing::warn!(
            live = backend.live_resources(),
            "resources left after release"
        );
    }

    Ok(RenderReport {
        frames,
        last_frame,
        calls,
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("prism-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("render: {}", prism_render::crate_info());
            println!("assets: {}", prism_assets::crate_info());
            println!("max lights: {}", prism_render::MAX_LIGHTS);
        }
        Commands::Dither { normalized } => {
            for row in BAYER_MATRIX.chunks(8) {
                let cells: Vec<String> = row
                    .iter()
                    .map(|&t| {
                        if normalized {
                            format!("{:.4}", (t as f32 + 0.5) / 64.0)
                        } else {
                            format!("{t:2}")
                        }
                    })
                    .collect();
                println!("{}", cells.join(" "));
            }
        }
        Commands::Render {
            manifest,
            frames,
            width,
            height,
            json,
        } => {
            let manifest = match &manifest {
                Some(path) => SceneManifest::load(path)
                    .with_context(|| format!("load manifest {}", path.display()))?,
                None => SceneManifest::demo(),
            };
            let report = render(&manifest, frames, Dimensions::new(width, height))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                let stats = report.last_frame;
                println!("Rendered {} frame(s) at {width}x{height}", report.frames);
                println!(
                    "Last frame: groups={}, meshes={}, entities={}, draw_calls={}",
                    stats.groups, stats.meshes, stats.entities, stats.draw_calls
                );
                let calls = report.calls;
                println!(
                    "Binds: programs={}, meshes={}, textures={}",
                    calls.program_binds, calls.mesh_binds, calls.texture_binds
                );
                println!(
                    "Uniform writes: {}, draws: {}, fullscreen: {}, presents: {}",
                    calls.uniform_writes, calls.draws, calls.fullscreen_draws, calls.presents
                );
            }
        }
        Commands::Demo => {
            print!("{}", SceneManifest::demo().to_yaml()?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_report_counts_every_frame() {
        let report = render(&SceneManifest::demo(), 3, Dimensions::new(320, 240)).unwrap();
        assert_eq!(report.last_frame.draw_calls, 1);
        assert_eq!(report.calls.draws, 3);
        assert_eq!(report.calls.fullscreen_draws, 3);
        assert_eq!(report.calls.presents, 3);
    }

    #[test]
    fn empty_manifest_only_tone_maps() {
        let report = render(&SceneManifest::default(), 1, Dimensions::new(64, 64)).unwrap();
        assert_eq!(report.last_frame.draw_calls, 0);
        assert_eq!(report.calls.fullscreen_draws, 1);
    }
}
