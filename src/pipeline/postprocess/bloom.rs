//! Bloom: brightness cutoff followed by a separable 9-tap blur

use super::{fullscreen_program_source, fullscreen_vertex};
use crate::backend::parameters::{ParameterBlock, ParameterType, TextureKind};
use crate::backend::software::*;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::*;
use crate::resources::{Drawable, ShaderProgram};
use crate::scene::Scene;
use glam::{IVec2, Vec4};
use std::sync::Arc;

/// Binomial blur kernel, `[1, 8, 28, 56, 70, 56, 28, 8, 1] / 256`
pub const BLUR_WEIGHTS: [f32; 9] = [
    1.0 / 256.0,
    8.0 / 256.0,
    28.0 / 256.0,
    56.0 / 256.0,
    70.0 / 256.0,
    56.0 / 256.0,
    28.0 / 256.0,
    8.0 / 256.0,
    1.0 / 256.0,
];

pub const BRIGHTNESS_CUTOFF_SHADER: &str = r#"
struct Params {
    threshold: f32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var source_texture: texture_2d<f32>;
@group(0) @binding(2) var source_sampler: sampler;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let color = textureSample(source_texture, source_sampler, input.uv);
    if max(color.r, max(color.g, color.b)) > params.threshold {
        return vec4<f32>(color.rgb, 1.0);
    }
    return vec4<f32>(0.0);
}
"#;

/// 9-tap blur along a constant texel step
macro_rules! blur_shader {
    ($direction:literal) => {
        concat!(
            "\nconst DIRECTION: vec2<i32> = ",
            $direction,
            ";\n",
            r#"
@group(0) @binding(1) var source_texture: texture_2d<f32>;

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    var weights = array<f32, 9>(1.0, 8.0, 28.0, 56.0, 70.0, 56.0, 28.0, 8.0, 1.0);
    let last = vec2<i32>(textureDimensions(source_texture)) - vec2<i32>(1);
    let center = vec2<i32>(floor(input.position.xy));
    var sum = vec4<f32>(0.0);
    for (var i = -4; i <= 4; i = i + 1) {
        let coord = clamp(center + DIRECTION * i, vec2<i32>(0), last);
        sum = sum + textureLoad(source_texture, coord, 0) * weights[i + 4];
    }
    return sum / 256.0;
}
"#
        )
    };
}

pub const HORIZONTAL_BLUR_SHADER: &str = blur_shader!("vec2<i32>(1, 0)");
pub const VERTICAL_BLUR_SHADER: &str = blur_shader!("vec2<i32>(0, 1)");

/// Axis of one blur pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurAxis {
    Horizontal,
    Vertical,
}

impl BlurAxis {
    pub fn direction(&self) -> IVec2 {
        match self {
            BlurAxis::Horizontal => IVec2::X,
            BlurAxis::Vertical => IVec2::Y,
        }
    }

    pub fn pass_kind(&self) -> PassKind {
        match self {
            BlurAxis::Horizontal => PassKind::HorizontalBlur,
            BlurAxis::Vertical => PassKind::VerticalBlur,
        }
    }

    fn source(&self) -> String {
        fullscreen_program_source(match self {
            BlurAxis::Horizontal => HORIZONTAL_BLUR_SHADER,
            BlurAxis::Vertical => VERTICAL_BLUR_SHADER,
        })
    }
}

struct CutoffKernel;

impl ProgramKernel for CutoffKernel {
    fn vertex(&self, input: &VertexInput, _params: &ParameterBlock) -> VertexOutput {
        fullscreen_vertex(input)
    }

    fn fragment(&self, input: &FragmentInput, params: &ParameterBlock, textures: &TextureUnits<'_>) -> Vec4 {
        let color = textures.sample(0, input.varyings.vec2(0));
        if color.truncate().max_element() > params.float("threshold") {
            color.truncate().extend(1.0)
        } else {
            Vec4::ZERO
        }
    }
}

struct BlurKernel {
    direction: IVec2,
}

impl ProgramKernel for BlurKernel {
    fn vertex(&self, input: &VertexInput, _params: &ParameterBlock) -> VertexOutput {
        fullscreen_vertex(input)
    }

    fn fragment(&self, input: &FragmentInput, _params: &ParameterBlock, textures: &TextureUnits<'_>) -> Vec4 {
        let center = input.frag_coord.truncate().truncate().floor().as_ivec2();
        BLUR_WEIGHTS
            .iter()
            .enumerate()
            .map(|(i, weight)| textures.load(0, center + self.direction * (i as i32 - 4)) * *weight)
            .sum()
    }
}

/// Writes the over-threshold parts of the scene into a smaller target
pub struct BrightnessCutoffPass {
    program: ShaderProgram,
    quad: Drawable,
    source: TargetId,
    output: TargetId,
    pub threshold: f32,
}

impl BrightnessCutoffPass {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        quad: Drawable,
        source: TargetId,
        output: TargetId,
        threshold: f32,
    ) -> BackendResult<Self> {
        let desc = ProgramDescriptor::new("brightness cutoff", &fullscreen_program_source(BRIGHTNESS_CUTOFF_SHADER))
            .bind_attribute(POSITION_LOCATION, "position")
            .uniform("threshold", ParameterType::Float)
            .texture("source_texture", TextureKind::Color, SamplerDescriptor::default())
            .depth(DepthMode::DISABLED)
            .kernel(Arc::new(CutoffKernel));
        Ok(Self {
            program: ShaderProgram::new(backend, &desc)?,
            quad,
            source,
            output,
            threshold,
        })
    }
}

impl RenderPass for BrightnessCutoffPass {
    fn name(&self) -> &str {
        "brightness cutoff"
    }

    fn kind(&self) -> PassKind {
        PassKind::BrightnessCutoff
    }

    fn inputs(&self) -> Vec<TextureRef> {
        vec![TextureRef::Color(self.source)]
    }

    fn output(&self) -> TargetId {
        self.output
    }

    fn load(&self, _scene: &Scene) -> TargetLoad {
        TargetLoad::clear([0.0; 4])
    }

    fn execute(&self, ctx: &mut PassContext) {
        let source = ctx.input(0);
        let backend = ctx.backend();
        let mut program = self.program.activate(backend);
        program.set_parameter("threshold", self.threshold);
        if let Some(source) = source {
            program.set_parameter("source_texture", source);
        }
        program.draw(backend, &self.quad);
    }
}

/// One axis of the separable blur; reads `source` texel by texel
pub struct BlurPass {
    axis: BlurAxis,
    program: ShaderProgram,
    quad: Drawable,
    source: TargetId,
    output: TargetId,
}

impl BlurPass {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        axis: BlurAxis,
        quad: Drawable,
        source: TargetId,
        output: TargetId,
    ) -> BackendResult<Self> {
        let label = match axis {
            BlurAxis::Horizontal => "horizontal blur",
            BlurAxis::Vertical => "vertical blur",
        };
        let desc = ProgramDescriptor::new(label, &axis.source())
            .bind_attribute(POSITION_LOCATION, "position")
            .texture("source_texture", TextureKind::Color, SamplerDescriptor::nearest())
            .depth(DepthMode::DISABLED)
            .kernel(Arc::new(BlurKernel {
                direction: axis.direction(),
            }));
        Ok(Self {
            axis,
            program: ShaderProgram::new(backend, &desc)?,
            quad,
            source,
            output,
        })
    }
}

impl RenderPass for BlurPass {
    fn name(&self) -> &str {
        self.program.label()
    }

    fn kind(&self) -> PassKind {
        self.axis.pass_kind()
    }

    fn inputs(&self) -> Vec<TextureRef> {
        vec![TextureRef::Color(self.source)]
    }

    fn output(&self) -> TargetId {
        self.output
    }

    fn load(&self, _scene: &Scene) -> TargetLoad {
        TargetLoad::clear([0.0; 4])
    }

    fn execute(&self, ctx: &mut PassContext) {
        let source = ctx.input(0);
        let backend = ctx.backend();
        let mut program = self.program.activate(backend);
        if let Some(source) = source {
            program.set_parameter("source_texture", source);
        }
        program.draw(backend, &self.quad);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blur_weights_sum_to_one() {
        let sum: f32 = BLUR_WEIGHTS.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert_eq!(BLUR_WEIGHTS[4], 70.0 / 256.0);
    }

    #[test]
    fn test_each_axis_declares_its_own_direction() {
        for axis in [BlurAxis::Horizontal, BlurAxis::Vertical] {
            let direction = axis.direction();
            let declaration = format!(
                "const DIRECTION: vec2<i32> = vec2<i32>({}, {});",
                direction.x, direction.y
            );
            let source = axis.source();
            assert_eq!(source.matches("const DIRECTION").count(), 1);
            assert!(source.contains(&declaration), "{:?} source lacks {}", axis, declaration);
        }
    }
}
