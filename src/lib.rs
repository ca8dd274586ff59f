//! Render Labs - multi-pass rendering demonstrations
//!
//! A small real-time renderer hosting a series of pipeline demonstrations:
//! an orbit camera, render-to-texture post-processing with bloom and a live
//! security feed, and shadow mapping.
//!
//! Two backends implement [`backend::GraphicsBackend`]:
//! - **wgpu**: presents to a winit window, or renders headless
//! - **Software**: a deterministic CPU rasterizer used by tests
//!
//! # Features
//! - Render targets with color and/or depth images, bound one at a time
//! - A fixed, validated pass sequence re-executed every frame
//! - Named shader parameters set atomically before each draw

pub mod backend;
pub mod clock;
pub mod engine;
pub mod pipeline;
pub mod render_graph;
pub mod resources;
pub mod scene;
pub mod window;

pub use clock::FrameClock;
pub use engine::{Engine, EngineError};

// Re-export the backends for direct access
pub use backend::software::SoftwareBackend;
pub use backend::wgpu_backend::WgpuBackend;

/// Backend selection for the graphics engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// wgpu backend - presents to a window or renders headless
    #[default]
    Wgpu,
    /// CPU rasterizer - headless only
    Software,
}

/// Which demonstration to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DemoVariant {
    /// Orbit camera around shaded boxes, drawn straight to the window
    #[default]
    Camera,
    /// Offscreen scene with security feed, bloom and post effects
    PostFx,
    /// Shadow capture from an orbiting light
    ShadowMap,
}

/// Configuration for initializing the graphics engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Window title
    pub title: String,
    /// Initial window width
    pub width: u32,
    /// Initial window height
    pub height: u32,
    /// Which backend to use
    pub backend: BackendType,
    /// Enable vsync
    pub vsync: bool,
    pub variant: DemoVariant,
    /// Side of the square shadow map, in texels
    pub shadow_map_resolution: u32,
    /// Brightest channel must exceed this to bloom
    pub bloom_threshold: f32,
    pub bloom_intensity: f32,
    /// Bloom targets are this many times smaller than the window
    pub bloom_downscale: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            title: "Render Labs".to_string(),
            width: 1280,
            height: 720,
            backend: BackendType::Wgpu,
            vsync: true,
            variant: DemoVariant::Camera,
            shadow_map_resolution: 1024,
            bloom_threshold: 1.0,
            bloom_intensity: 1.0,
            bloom_downscale: 2,
        }
    }
}
