use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::Vec3;
use landscape_render::{DebugTextRenderer, MeshRegistry, RenderView, Renderer};
use landscape_stream::{ChunkStreamer, LandscapeConfig};
use landscape_terrain::TerrainField;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "landscape-cli", about = "Procedural terrain streaming tools")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version, crate info and the default configuration
    Info,
    /// Sample the terrain field at one point
    Sample {
        #[arg(short, long, default_value = "demo")]
        seed: String,
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        x: f64,
        #[arg(short, long, default_value = "0", allow_hyphen_values = true)]
        z: f64,
    },
    /// Walk the focus along +X and stream chunks around it
    Stream {
        /// Overrides the seed from the config file
        #[arg(short, long)]
        seed: Option<String>,
        /// Number of frames to simulate
        #[arg(short, long, default_value = "60")]
        frames: usize,
        /// Focus movement per frame in world units
        #[arg(long, default_value = "12")]
        step: f32,
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Overrides the worker count from the config file
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Print an ASCII biome map centred on the origin
    Preview {
        #[arg(short, long, default_value = "demo")]
        seed: String,
        /// Map width and height in characters
        #[arg(long, default_value = "64")]
        size: usize,
        /// World units per character
        #[arg(long, default_value = "48")]
        scale: f64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("landscape-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("stream: {}", landscape_stream::crate_info());
            println!("render: {}", landscape_render::crate_info());
            println!("default config:");
            println!("{}", serde_json::to_string_pretty(&LandscapeConfig::default())?);
        }
        Commands::Sample { seed, x, z } => {
            let field = TerrainField::new(&seed);
            let sample = field.sample(x, z);
            println!("seed={seed} x={x} z={z}");
            println!("  height:      {:.3}", sample.height);
            println!("  humidity:    {:.3}", sample.humidity);
            println!("  temperature: {:.3}", sample.temperature);
            println!("  biome:       {}", sample.biome());
        }
        Commands::Stream {
            seed,
            frames,
            step,
            config,
            workers,
        } => run_stream(seed, frames, step, config, workers)?,
        Commands::Preview { seed, size, scale } => {
            let field = TerrainField::new(&seed);
            let half = size as f64 / 2.0;
            for row in 0..size {
                let z = (row as f64 - half) * scale;
                let line: String = (0..size)
                    .map(|col| field.biome_at((col as f64 - half) * scale, z).glyph())
                    .collect();
                println!("{line}");
            }
        }
    }

    Ok(())
}

fn run_stream(
    seed: Option<String>,
    frames: usize,
    step: f32,
    config: Option<PathBuf>,
    workers: Option<usize>,
) -> anyhow::Result<()> {
    let mut config = match config {
        Some(path) => LandscapeConfig::load(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => LandscapeConfig::default(),
    };
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Some(workers) = workers {
        config.stream.workers = workers;
    }

    let mut streamer = ChunkStreamer::from_config(&config).context("creating streamer")?;
    let mut meshes = MeshRegistry::new();

    let stats = streamer.sync(Vec3::ZERO, true);
    meshes.sync_with(&mut streamer)?;
    println!("initial: {stats}");

    let mut focus = Vec3::ZERO;
    for frame in 0..frames {
        focus.x += step;
        let stats = streamer.update(focus);
        let applied = meshes.sync_with(&mut streamer)?;
        tracing::debug!(frame, uploaded = applied.uploaded, released = applied.released, "frame applied");
        if stats.built > 0 || stats.evicted > 0 {
            println!("frame {frame:>4}: {stats}");
        }
    }

    let stats = streamer.finish_pending();
    meshes.sync_with(&mut streamer)?;
    println!("drained: {stats}");

    let timer = streamer.build_timer();
    println!(
        "builds: {} total, avg {:?}, min {:?}, max {:?}",
        timer.total_builds(),
        timer.average(),
        timer.min(),
        timer.max()
    );

    let view = RenderView {
        focus,
        chunk_size: streamer.config().chunk_size,
    };
    print!("{}", DebugTextRenderer::summary().render(&meshes, streamer.field(), &view));
    Ok(())
}
