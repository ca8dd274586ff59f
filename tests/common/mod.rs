//! Common utilities for pipeline integration tests.
//!
//! Every test runs against each backend listed in [`Backend`]. The software
//! backend is always available; the wgpu backend needs an adapter and is only
//! tried when `RENDER_LABS_WGPU_TESTS` is set.

#![allow(dead_code)]

use glam::{Vec3, Vec4};
use render_labs::backend::{GraphicsBackend, TextureHandle};
use render_labs::pipeline::PostEffect;
use render_labs::scene::{FrameState, OrbitCamera, Scene, SceneLight};
use render_labs::{SoftwareBackend, WgpuBackend};
use std::f32::consts::FRAC_PI_2;

/// Backends the tests run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// CPU rasterizer.
    Software,
    /// wgpu, rendering into an offscreen surface.
    Wgpu,
}

impl Backend {
    /// Check if this backend should be exercised.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Software => true,
            Backend::Wgpu => std::env::var_os("RENDER_LABS_WGPU_TESTS").is_some(),
        }
    }

    /// Create a headless backend with a `width`×`height` surface.
    ///
    /// Returns `None` (and says so) when the backend is unavailable.
    pub fn create(self, width: u32, height: u32) -> Option<Box<dyn GraphicsBackend>> {
        if !self.is_available() {
            eprintln!("Backend {:?} not available, skipping", self);
            return None;
        }
        match self {
            Backend::Software => Some(Box::new(SoftwareBackend::new(width, height))),
            Backend::Wgpu => match WgpuBackend::headless(width, height) {
                Ok(backend) => Some(Box::new(backend)),
                Err(e) => {
                    eprintln!("Backend {:?} failed to initialize ({}), skipping", self, e);
                    None
                }
            },
        }
    }
}

/// Encode linear RGBA texels as `Rgba16Float` bytes.
pub fn rgba16f_bytes(texels: &[Vec4]) -> Vec<u8> {
    texels
        .iter()
        .flat_map(|t| t.to_array())
        .flat_map(|v| half::f16::from_f32(v).to_bits().to_le_bytes())
        .collect()
}

/// Fill `texture` with a single color.
pub fn fill(backend: &mut dyn GraphicsBackend, texture: TextureHandle, width: u32, height: u32, color: Vec4) {
    let texels = vec![color; (width * height) as usize];
    backend.write_texture(texture, &rgba16f_bytes(&texels), width, height);
}

/// Camera on the +Z axis looking at the origin.
pub fn front_camera(radius: f32) -> OrbitCamera {
    OrbitCamera::new(0.0, FRAC_PI_2, radius)
}

pub fn frame_state(width: u32, height: u32, camera: OrbitCamera) -> FrameState {
    FrameState {
        time: 0.0,
        camera,
        viewport: (width, height),
        effect: PostEffect::Passthrough,
    }
}

/// Scene without objects, lit from the camera side.
pub fn empty_scene() -> Scene {
    Scene::new(SceneLight::fixed(Vec3::new(0.0, 0.0, 20.0)))
}

/// Assert two colors agree within `tolerance` on every channel.
#[track_caller]
pub fn assert_color_close(actual: Vec4, expected: Vec4, tolerance: f32) {
    assert!(
        (actual - expected).abs().max_element() <= tolerance,
        "expected {:?}, got {:?} (tolerance {})",
        expected,
        actual,
        tolerance
    );
}
