//! Final composite: post effect over the scene, plus bloom

use super::{fullscreen_program_source, fullscreen_vertex, PostEffect};
use crate::backend::parameters::{ParameterBlock, ParameterType, TextureKind};
use crate::backend::software::*;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::*;
use crate::resources::{Drawable, ShaderProgram};
use crate::scene::Scene;
use glam::{Vec2, Vec3, Vec4};
use std::sync::Arc;

/// Mosaic cell edge in scene texels
const MOSAIC_BLOCK: f32 = 8.0;

pub const COMPOSITE_SHADER: &str = r#"
struct Params {
    effect: u32,
    time: f32,
    bloom_intensity: f32,
    use_bloom: u32,
}

const MOSAIC_BLOCK: f32 = 8.0;

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var scene_texture: texture_2d<f32>;
@group(0) @binding(2) var scene_sampler: sampler;
@group(0) @binding(3) var bloom_texture: texture_2d<f32>;
@group(0) @binding(4) var bloom_sampler: sampler;

fn grayscale(color: vec3<f32>) -> vec3<f32> {
    return vec3<f32>(dot(color, vec3<f32>(0.299, 0.587, 0.114)));
}

fn sepia(color: vec3<f32>) -> vec3<f32> {
    return vec3<f32>(
        dot(color, vec3<f32>(0.393, 0.769, 0.189)),
        dot(color, vec3<f32>(0.349, 0.686, 0.168)),
        dot(color, vec3<f32>(0.272, 0.534, 0.131)),
    );
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let size = vec2<f32>(textureDimensions(scene_texture));
    let mosaic_uv = (floor(input.uv * size / MOSAIC_BLOCK) + 0.5) * MOSAIC_BLOCK / size;
    let wobble_uv = input.uv + vec2<f32>(
        sin(input.uv.y * 20.0 + params.time * 2.0),
        cos(input.uv.x * 20.0 + params.time * 2.0),
    ) * 0.01;

    var uv = select(input.uv, mosaic_uv, params.effect == 3u);
    uv = select(uv, wobble_uv, params.effect == 4u);

    var color = textureSample(scene_texture, scene_sampler, uv).rgb;
    let bloom = textureSample(bloom_texture, bloom_sampler, input.uv).rgb;

    if params.effect == 1u {
        color = grayscale(color);
    } else if params.effect == 2u {
        color = sepia(color);
    }
    if params.use_bloom != 0u {
        color = color + bloom * params.bloom_intensity;
    }
    return vec4<f32>(color, 1.0);
}
"#;

fn grayscale(color: Vec3) -> Vec3 {
    Vec3::splat(color.dot(Vec3::new(0.299, 0.587, 0.114)))
}

fn sepia(color: Vec3) -> Vec3 {
    Vec3::new(
        color.dot(Vec3::new(0.393, 0.769, 0.189)),
        color.dot(Vec3::new(0.349, 0.686, 0.168)),
        color.dot(Vec3::new(0.272, 0.534, 0.131)),
    )
}

struct CompositeKernel;

impl ProgramKernel for CompositeKernel {
    fn vertex(&self, input: &VertexInput, _params: &ParameterBlock) -> VertexOutput {
        fullscreen_vertex(input)
    }

    fn fragment(&self, input: &FragmentInput, params: &ParameterBlock, textures: &TextureUnits<'_>) -> Vec4 {
        let effect = params.uint("effect");
        let time = params.float("time");
        let uv = input.varyings.vec2(0);

        let size = textures.dimensions(0).as_vec2();
        let sample_uv = match effect {
            3 => ((uv * size / MOSAIC_BLOCK).floor() + 0.5) * MOSAIC_BLOCK / size,
            4 => uv + Vec2::new((uv.y * 20.0 + time * 2.0).sin(), (uv.x * 20.0 + time * 2.0).cos()) * 0.01,
            _ => uv,
        };

        let mut color = textures.sample(0, sample_uv).truncate();
        color = match effect {
            1 => grayscale(color),
            2 => sepia(color),
            _ => color,
        };
        if params.flag("use_bloom") {
            color += textures.sample(1, uv).truncate() * params.float("bloom_intensity");
        }
        color.extend(1.0)
    }
}

/// Draws the scene texture to the visible target through the selected effect
pub struct CompositePass {
    program: ShaderProgram,
    quad: Drawable,
    scene: TargetId,
    bloom: Option<TargetId>,
    output: TargetId,
    pub bloom_intensity: f32,
}

impl CompositePass {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        quad: Drawable,
        scene: TargetId,
        bloom: Option<TargetId>,
        bloom_intensity: f32,
    ) -> BackendResult<Self> {
        let desc = ProgramDescriptor::new("composite", &fullscreen_program_source(COMPOSITE_SHADER))
            .bind_attribute(POSITION_LOCATION, "position")
            .uniform("effect", ParameterType::UInt)
            .uniform("time", ParameterType::Float)
            .uniform("bloom_intensity", ParameterType::Float)
            .uniform("use_bloom", ParameterType::Bool)
            .texture("scene_texture", TextureKind::Color, SamplerDescriptor::default())
            .texture("bloom_texture", TextureKind::Color, SamplerDescriptor::default())
            .depth(DepthMode::DISABLED)
            .kernel(Arc::new(CompositeKernel));
        Ok(Self {
            program: ShaderProgram::new(backend, &desc)?,
            quad,
            scene,
            bloom,
            output: TargetId::VISIBLE,
            bloom_intensity,
        })
    }
}

impl RenderPass for CompositePass {
    fn name(&self) -> &str {
        "composite"
    }

    fn kind(&self) -> PassKind {
        PassKind::Composite
    }

    fn inputs(&self) -> Vec<TextureRef> {
        let mut inputs = vec![TextureRef::Color(self.scene)];
        inputs.extend(self.bloom.map(TextureRef::Color));
        inputs
    }

    fn output(&self) -> TargetId {
        self.output
    }

    fn load(&self, _scene: &Scene) -> TargetLoad {
        TargetLoad::clear([0.0, 0.0, 0.0, 1.0])
    }

    fn execute(&self, ctx: &mut PassContext) {
        let effect: PostEffect = ctx.frame.effect;
        let time = ctx.frame.time;
        let scene = ctx.input(0);
        let bloom = self.bloom.and(ctx.input(1));

        let backend = ctx.backend();
        let mut program = self.program.activate(backend);
        program
            .set_parameter("effect", effect.index())
            .set_parameter("time", time)
            .set_parameter("bloom_intensity", self.bloom_intensity)
            .set_parameter("use_bloom", bloom.is_some());
        if let Some(scene) = scene {
            program.set_parameter("scene_texture", scene);
        }
        if let Some(bloom) = bloom {
            program.set_parameter("bloom_texture", bloom);
        }
        program.draw(backend, &self.quad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grayscale_preserves_white() {
        assert!((grayscale(Vec3::ONE) - Vec3::ONE).length() < 1e-5);
        assert_eq!(grayscale(Vec3::ZERO), Vec3::ZERO);
    }

    #[test]
    fn test_sepia_warms_gray() {
        let toned = sepia(Vec3::splat(0.5));
        assert!(toned.x > toned.y && toned.y > toned.z);
    }
}
