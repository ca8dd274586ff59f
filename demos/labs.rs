//! Render labs demo
//!
//! Run with:
//!   cargo run --example labs
//!   cargo run --example labs -- --variant post-fx
//!   cargo run --example labs -- --variant shadow-map --shadow-map-resolution 2048
//!   cargo run --example labs -- --backend software --headless --frames 3
//!
//! Controls:
//!   Left drag    - Orbit the camera
//!   Middle drag  - Zoom
//!   1-5          - Post effect (post-fx variant)
//!   P            - Pause animation
//!   Escape       - Exit

use clap::Parser;
use render_labs::{window, BackendType, DemoVariant, Engine, EngineConfig, EngineError, FrameClock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// GPU rendering through wgpu
    #[default]
    Wgpu,
    /// CPU rasterizer; requires --headless
    Software,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Wgpu => BackendType::Wgpu,
            CliBackend::Software => BackendType::Software,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliVariant {
    /// Orbit camera around shaded boxes
    #[default]
    Camera,
    /// Offscreen scene, security feed, bloom and post effects
    PostFx,
    /// Shadow mapping with an orbiting light
    ShadowMap,
}

impl From<CliVariant> for DemoVariant {
    fn from(cli: CliVariant) -> Self {
        match cli {
            CliVariant::Camera => DemoVariant::Camera,
            CliVariant::PostFx => DemoVariant::PostFx,
            CliVariant::ShadowMap => DemoVariant::ShadowMap,
        }
    }
}

/// Multi-pass rendering demonstrations
#[derive(Parser, Debug)]
#[command(name = "labs", version, about)]
struct Args {
    #[arg(long, value_enum, default_value_t)]
    variant: CliVariant,

    #[arg(long, value_enum, default_value_t)]
    backend: CliBackend,

    #[arg(long, default_value_t = 1280)]
    width: u32,

    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Disable vsync
    #[arg(long)]
    no_vsync: bool,

    #[arg(long, default_value_t = 1024)]
    shadow_map_resolution: u32,

    #[arg(long, default_value_t = 1.0)]
    bloom_threshold: f32,

    #[arg(long, default_value_t = 1.0)]
    bloom_intensity: f32,

    #[arg(long, default_value_t = 2)]
    bloom_downscale: u32,

    /// Render without a window
    #[arg(long)]
    headless: bool,

    /// Exit after this many frames
    #[arg(long)]
    frames: Option<u64>,
}

impl Args {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            title: format!("Render Labs - {:?}", self.variant),
            width: self.width,
            height: self.height,
            backend: self.backend.into(),
            vsync: !self.no_vsync,
            variant: self.variant.into(),
            shadow_map_resolution: self.shadow_map_resolution,
            bloom_threshold: self.bloom_threshold,
            bloom_intensity: self.bloom_intensity,
            bloom_downscale: self.bloom_downscale,
        }
    }
}

fn run_headless(config: EngineConfig, frames: u64) -> Result<(), EngineError> {
    let mut engine = Engine::headless(config)?;
    let clock = FrameClock::new();
    for _ in 0..frames {
        engine.render_frame(clock.sample())?;
    }
    log::info!("Rendered {} headless frames", frames);
    engine.shutdown();
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.config();

    let result = if args.headless {
        run_headless(config, args.frames.unwrap_or(1))
    } else {
        window::run(config, args.frames)
    };

    if let Err(e) = result {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
