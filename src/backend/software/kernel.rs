//! CPU program kernels
//!
//! The software backend cannot run WGSL, so every program carries a kernel that
//! mirrors its vertex and fragment stages. Kernels read the same packed
//! parameter block the GPU receives.

use super::texture::TextureUnits;
use crate::backend::parameters::ParameterBlock;
use glam::{Vec2, Vec3, Vec4};

pub const MAX_VERTEX_ATTRIBUTES: usize = 8;
pub const MAX_VARYINGS: usize = 16;

/// Attributes fetched for one vertex, indexed by location
#[derive(Debug, Clone, Copy)]
pub struct VertexInput {
    attributes: [Vec4; MAX_VERTEX_ATTRIBUTES],
}

impl Default for VertexInput {
    fn default() -> Self {
        Self {
            attributes: [Vec4::W; MAX_VERTEX_ATTRIBUTES],
        }
    }
}

impl VertexInput {
    pub fn attribute(&self, location: u32) -> Vec4 {
        self.attributes
            .get(location as usize)
            .copied()
            .unwrap_or(Vec4::W)
    }

    pub fn vec3(&self, location: u32) -> Vec3 {
        self.attribute(location).truncate()
    }

    pub fn vec2(&self, location: u32) -> Vec2 {
        let v = self.attribute(location);
        Vec2::new(v.x, v.y)
    }

    pub(crate) fn set(&mut self, location: u32, value: Vec4) {
        if let Some(slot) = self.attributes.get_mut(location as usize) {
            *slot = value;
        }
    }
}

/// Interpolated values passed from the vertex to the fragment stage
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Varyings([f32; MAX_VARYINGS]);

impl Varyings {
    pub fn set_vec2(&mut self, at: usize, v: Vec2) {
        self.0[at..at + 2].copy_from_slice(&v.to_array());
    }

    pub fn set_vec3(&mut self, at: usize, v: Vec3) {
        self.0[at..at + 3].copy_from_slice(&v.to_array());
    }

    pub fn vec2(&self, at: usize) -> Vec2 {
        Vec2::new(self.0[at], self.0[at + 1])
    }

    pub fn vec3(&self, at: usize) -> Vec3 {
        Vec3::new(self.0[at], self.0[at + 1], self.0[at + 2])
    }

    pub(crate) fn scaled(&self, factor: f32) -> Self {
        let mut out = *self;
        out.0.iter_mut().for_each(|v| *v *= factor);
        out
    }

    pub(crate) fn lerp(&self, other: &Self, t: f32) -> Self {
        let mut out = *self;
        for (o, b) in out.0.iter_mut().zip(other.0.iter()) {
            *o += (b - *o) * t;
        }
        out
    }

    /// Barycentric combination of three vertices
    pub(crate) fn blend(v: [&Self; 3], weights: [f32; 3]) -> Self {
        let mut out = Self::default();
        for (i, o) in out.0.iter_mut().enumerate() {
            *o = v[0].0[i] * weights[0] + v[1].0[i] * weights[1] + v[2].0[i] * weights[2];
        }
        out
    }
}

/// Result of the vertex stage
#[derive(Debug, Clone, Copy, Default)]
pub struct VertexOutput {
    /// Clip-space position
    pub position: Vec4,
    pub varyings: Varyings,
}

/// Input of the fragment stage
#[derive(Debug, Clone, Copy)]
pub struct FragmentInput {
    /// Pixel center in framebuffer coordinates, depth in `z`, `1/w` in `w`
    pub frag_coord: Vec4,
    pub varyings: Varyings,
}

/// CPU implementation of a program's stages
pub trait ProgramKernel: Send + Sync {
    fn vertex(&self, input: &VertexInput, params: &ParameterBlock) -> VertexOutput;

    /// Depth-only programs keep the default
    fn fragment(
        &self,
        _input: &FragmentInput,
        _params: &ParameterBlock,
        _textures: &TextureUnits<'_>,
    ) -> Vec4 {
        Vec4::ZERO
    }
}
