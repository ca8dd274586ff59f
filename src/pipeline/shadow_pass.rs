//! Shadow capture: scene depth as seen from the light

use crate::backend::parameters::{ParameterBlock, ParameterType};
use crate::backend::software::*;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::*;
use crate::resources::ShaderProgram;
use crate::scene::Scene;
use std::sync::Arc;

/// Position-only program without a fragment stage
pub const SHADOW_SHADER: &str = r#"
struct Params {
    model_view_projection: mat4x4<f32>,
}

@group(0) @binding(0) var<uniform> params: Params;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return params.model_view_projection * vec4<f32>(position, 1.0);
}
"#;

struct ShadowKernel;

impl ProgramKernel for ShadowKernel {
    fn vertex(&self, input: &VertexInput, params: &ParameterBlock) -> VertexOutput {
        VertexOutput {
            position: params.mat4("model_view_projection") * input.vec3(POSITION_LOCATION).extend(1.0),
            ..Default::default()
        }
    }
}

/// Draws every shadow caster into a depth-only target
pub struct ShadowPass {
    program: ShaderProgram,
    output: TargetId,
}

impl ShadowPass {
    pub fn new(backend: &mut dyn GraphicsBackend, output: TargetId) -> BackendResult<Self> {
        let desc = ProgramDescriptor::new("shadow", SHADOW_SHADER)
            .without_fragment_stage()
            .bind_attribute(POSITION_LOCATION, "position")
            .uniform("model_view_projection", ParameterType::Mat4)
            .kernel(Arc::new(ShadowKernel));
        Ok(Self {
            program: ShaderProgram::new(backend, &desc)?,
            output,
        })
    }
}

impl RenderPass for ShadowPass {
    fn name(&self) -> &str {
        "shadow capture"
    }

    fn kind(&self) -> PassKind {
        PassKind::ShadowCapture
    }

    fn inputs(&self) -> Vec<TextureRef> {
        Vec::new()
    }

    fn output(&self) -> TargetId {
        self.output
    }

    fn load(&self, _scene: &Scene) -> TargetLoad {
        TargetLoad {
            color: LoadOp::Load,
            depth: LoadOp::Clear(1.0),
        }
    }

    fn execute(&self, ctx: &mut PassContext) {
        let transforms = ctx.transforms;
        let scene = ctx.scene;
        let time = ctx.frame.time;

        let backend = ctx.backend();
        let mut program = self.program.activate(backend);
        for object in scene.objects.iter().filter(|o| o.casts_shadow) {
            program.set_parameter(
                "model_view_projection",
                transforms.light_model_view_projection(object.model_matrix(time)),
            );
            program.draw(backend, &object.model.drawable);
        }
    }
}
