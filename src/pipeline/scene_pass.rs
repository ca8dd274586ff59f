//! Scene shading: diffuse lighting with optional shadow lookup

use crate::backend::parameters::{ParameterBlock, ParameterType, TextureKind};
use crate::backend::software::*;
use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::*;
use crate::resources::{apply_material, Material, ShaderProgram};
use crate::scene::Scene;
use glam::{Vec2, Vec3, Vec4};
use std::sync::Arc;

/// Depth offset applied before comparing against the shadow map
pub const SHADOW_BIAS: f32 = 0.001;

pub const SHADING_SHADER: &str = r#"
struct Params {
    model_view_projection: mat4x4<f32>,
    model_view: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    light_matrix: mat4x4<f32>,
    view_space_light_position: vec3<f32>,
    has_diffuse_texture: u32,
    material_diffuse_color: vec3<f32>,
    use_shadow_map: u32,
    material_emissive_color: vec3<f32>,
    ambient: f32,
}

const SHADOW_BIAS: f32 = 0.001;

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var diffuse_texture: texture_2d<f32>;
@group(0) @binding(2) var diffuse_sampler: sampler;
@group(0) @binding(3) var shadow_map: texture_depth_2d;
@group(0) @binding(4) var shadow_sampler: sampler_comparison;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) view_position: vec3<f32>,
    @location(1) view_normal: vec3<f32>,
    @location(2) texcoord: vec2<f32>,
}

@vertex
fn vs_main(
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) texcoord: vec2<f32>,
) -> VertexOutput {
    var output: VertexOutput;
    output.clip_position = params.model_view_projection * vec4<f32>(position, 1.0);
    output.view_position = (params.model_view * vec4<f32>(position, 1.0)).xyz;
    output.view_normal = (params.normal_matrix * vec4<f32>(normal, 0.0)).xyz;
    output.texcoord = texcoord;
    return output;
}

fn visibility(view_position: vec3<f32>) -> f32 {
    let clip = params.light_matrix * vec4<f32>(view_position, 1.0);
    let ndc = clip.xyz / clip.w;
    let uv = vec2<f32>(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
    if clip.w <= 0.0 || any(uv < vec2<f32>(0.0)) || any(uv > vec2<f32>(1.0)) || ndc.z > 1.0 {
        return 1.0;
    }
    return textureSampleCompareLevel(shadow_map, shadow_sampler, uv, ndc.z - SHADOW_BIAS);
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let texel = textureSample(diffuse_texture, diffuse_sampler, input.texcoord);
    let base = select(vec3<f32>(1.0), texel.rgb, params.has_diffuse_texture != 0u);

    let normal = normalize(input.view_normal);
    let to_light = normalize(params.view_space_light_position - input.view_position);
    var lambert = max(dot(normal, to_light), 0.0);
    if params.use_shadow_map != 0u {
        lambert = lambert * visibility(input.view_position);
    }

    let lighting = params.ambient + (1.0 - params.ambient) * lambert;
    let color = base * (params.material_diffuse_color * lighting + params.material_emissive_color);
    return vec4<f32>(color, 1.0);
}
"#;

// varying offsets
const VIEW_POSITION: usize = 0;
const VIEW_NORMAL: usize = 3;
const TEXCOORD: usize = 6;

struct ShadingKernel;

impl ShadingKernel {
    fn visibility(params: &ParameterBlock, textures: &TextureUnits<'_>, view_position: Vec3) -> f32 {
        let clip = params.mat4("light_matrix") * view_position.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
        let outside = uv.cmplt(Vec2::ZERO).any() || uv.cmpgt(Vec2::ONE).any();
        if clip.w <= 0.0 || outside || ndc.z > 1.0 {
            return 1.0;
        }
        textures.sample_compare(1, uv, ndc.z - SHADOW_BIAS)
    }
}

impl ProgramKernel for ShadingKernel {
    fn vertex(&self, input: &VertexInput, params: &ParameterBlock) -> VertexOutput {
        let position = input.vec3(POSITION_LOCATION).extend(1.0);
        let mut output = VertexOutput {
            position: params.mat4("model_view_projection") * position,
            ..Default::default()
        };
        output
            .varyings
            .set_vec3(VIEW_POSITION, (params.mat4("model_view") * position).truncate());
        output.varyings.set_vec3(
            VIEW_NORMAL,
            (params.mat4("normal_matrix") * input.vec3(NORMAL_LOCATION).extend(0.0)).truncate(),
        );
        output.varyings.set_vec2(TEXCOORD, input.vec2(TEXCOORD_LOCATION));
        output
    }

    fn fragment(&self, input: &FragmentInput, params: &ParameterBlock, textures: &TextureUnits<'_>) -> Vec4 {
        let view_position = input.varyings.vec3(VIEW_POSITION);
        let base = if params.flag("has_diffuse_texture") {
            textures.sample(0, input.varyings.vec2(TEXCOORD)).truncate()
        } else {
            Vec3::ONE
        };

        let normal = input.varyings.vec3(VIEW_NORMAL).normalize_or_zero();
        let to_light = (params.vec3("view_space_light_position") - view_position).normalize_or_zero();
        let mut lambert = normal.dot(to_light).max(0.0);
        if params.flag("use_shadow_map") {
            lambert *= Self::visibility(params, textures, view_position);
        }

        let ambient = params.float("ambient");
        let lighting = ambient + (1.0 - ambient) * lambert;
        let color = base * (params.vec3("material_diffuse_color") * lighting + params.vec3("material_emissive_color"));
        color.extend(1.0)
    }
}

/// Draws every scene object, and the security screens when a feed is wired in
pub struct ScenePass {
    program: ShaderProgram,
    output: TargetId,
    shadow_map: Option<TargetId>,
    feed: Option<TargetId>,
}

impl ScenePass {
    pub fn new(
        backend: &mut dyn GraphicsBackend,
        output: TargetId,
        shadow_map: Option<TargetId>,
        feed: Option<TargetId>,
    ) -> BackendResult<Self> {
        let desc = ProgramDescriptor::new("shading", SHADING_SHADER)
            .bind_attribute(POSITION_LOCATION, "position")
            .bind_attribute(NORMAL_LOCATION, "normal")
            .bind_attribute(TEXCOORD_LOCATION, "texcoord")
            .uniform("model_view_projection", ParameterType::Mat4)
            .uniform("model_view", ParameterType::Mat4)
            .uniform("normal_matrix", ParameterType::Mat4)
            .uniform("light_matrix", ParameterType::Mat4)
            .uniform("view_space_light_position", ParameterType::Vec3)
            .uniform("has_diffuse_texture", ParameterType::Bool)
            .uniform("material_diffuse_color", ParameterType::Vec3)
            .uniform("use_shadow_map", ParameterType::Bool)
            .uniform("material_emissive_color", ParameterType::Vec3)
            .uniform("ambient", ParameterType::Float)
            .texture("diffuse_texture", TextureKind::Color, SamplerDescriptor::repeat())
            .texture("shadow_map", TextureKind::Depth, SamplerDescriptor::shadow())
            .cull(CullMode::Back)
            .kernel(Arc::new(ShadingKernel));
        Ok(Self {
            program: ShaderProgram::new(backend, &desc)?,
            output,
            shadow_map,
            feed,
        })
    }

    fn feed_input(&self) -> usize {
        usize::from(self.shadow_map.is_some())
    }
}

impl RenderPass for ScenePass {
    fn name(&self) -> &str {
        "scene"
    }

    fn kind(&self) -> PassKind {
        PassKind::SceneRender
    }

    fn inputs(&self) -> Vec<TextureRef> {
        let mut inputs = Vec::new();
        inputs.extend(self.shadow_map.map(TextureRef::Depth));
        inputs.extend(self.feed.map(TextureRef::Color));
        inputs
    }

    fn output(&self) -> TargetId {
        self.output
    }

    fn load(&self, scene: &Scene) -> TargetLoad {
        TargetLoad::clear(scene.clear_color.to_array())
    }

    fn execute(&self, ctx: &mut PassContext) {
        let transforms = ctx.transforms;
        let scene = ctx.scene;
        let time = ctx.frame.time;
        let shadow_map = self.shadow_map.and(ctx.input(0));
        let feed = self.feed.and(ctx.input(self.feed_input()));

        let backend = ctx.backend();
        let mut program = self.program.activate(backend);
        program
            .set_parameter("view_space_light_position", transforms.view_space_light_position)
            .set_parameter("ambient", scene.ambient)
            .set_parameter("use_shadow_map", shadow_map.is_some())
            .set_parameter("light_matrix", transforms.light_matrix);
        if let Some(shadow_map) = shadow_map {
            program.set_parameter("shadow_map", shadow_map);
        }

        for object in &scene.objects {
            let matrices = transforms.object(object.model_matrix(time));
            program
                .set_parameter("model_view_projection", matrices.model_view_projection)
                .set_parameter("model_view", matrices.model_view)
                .set_parameter("normal_matrix", matrices.normal);
            object.model.render(backend, &mut program);

            if let (Some(screen), Some(feed)) = (&object.screen, feed) {
                apply_material(&mut program, &Material::screen().with_texture(feed));
                program.draw(backend, screen);
            }
        }
    }
}
