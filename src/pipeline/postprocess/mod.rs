//! Post-processing: brightness cutoff, separable blur and the final composite

mod bloom;
mod composite;

pub use bloom::*;
pub use composite::*;

use crate::backend::software::{VertexInput, VertexOutput};
use crate::backend::types::POSITION_LOCATION;
use glam::Vec2;

/// Effect applied by the composite pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PostEffect {
    #[default]
    Passthrough,
    Grayscale,
    Sepia,
    Mosaic,
    /// Animated wave distortion
    Wobble,
}

impl PostEffect {
    pub const ALL: [PostEffect; 5] = [
        PostEffect::Passthrough,
        PostEffect::Grayscale,
        PostEffect::Sepia,
        PostEffect::Mosaic,
        PostEffect::Wobble,
    ];

    /// Value of the composite program's `effect` uniform
    pub fn index(&self) -> u32 {
        match self {
            PostEffect::Passthrough => 0,
            PostEffect::Grayscale => 1,
            PostEffect::Sepia => 2,
            PostEffect::Mosaic => 3,
            PostEffect::Wobble => 4,
        }
    }

    /// Effect bound to the number keys `1`–`5`
    pub fn from_number(number: u32) -> Option<Self> {
        Self::ALL.get(number.checked_sub(1)? as usize).copied()
    }
}

/// Vertex stage shared by the full-screen programs; `uv` has `v = 0` on the top row
pub const FULLSCREEN_VERTEX_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>) -> VertexOutput {
    var output: VertexOutput;
    output.position = vec4<f32>(position, 0.0, 1.0);
    output.uv = vec2<f32>(position.x * 0.5 + 0.5, 0.5 - position.y * 0.5);
    return output;
}
"#;

/// Join the shared vertex stage with a fragment stage
pub(crate) fn fullscreen_program_source(fragment: &str) -> String {
    format!("{FULLSCREEN_VERTEX_SHADER}{fragment}")
}

pub(crate) fn fullscreen_vertex(input: &VertexInput) -> VertexOutput {
    let position = input.vec2(POSITION_LOCATION);
    let mut output = VertexOutput {
        position: position.extend(0.0).extend(1.0),
        ..Default::default()
    };
    output
        .varyings
        .set_vec2(0, Vec2::new(position.x * 0.5 + 0.5, 0.5 - position.y * 0.5));
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_keys_select_effects() {
        assert_eq!(PostEffect::from_number(1), Some(PostEffect::Passthrough));
        assert_eq!(PostEffect::from_number(5), Some(PostEffect::Wobble));
        assert_eq!(PostEffect::from_number(0), None);
        assert_eq!(PostEffect::from_number(6), None);
        assert!(PostEffect::ALL.iter().enumerate().all(|(i, e)| e.index() == i as u32));
    }
}
