//! Pipeline integration tests.
//!
//! These tests run whole pass sequences and verify the results by reading
//! textures back. Each test is parameterized with `rstest` over the backends
//! in [`common::Backend`].
//!
//! # Running Tests
//!
//! ```bash
//! # Software backend only
//! cargo test --test pipeline_tests
//!
//! # Also run on the GPU through wgpu
//! RENDER_LABS_WGPU_TESTS=1 cargo test --test pipeline_tests
//! ```

mod common;

use common::*;
use glam::{Mat4, Vec2, Vec4};
use render_labs::backend::software::{FragmentInput, ProgramKernel, TextureUnits, VertexInput, VertexOutput};
use render_labs::backend::*;
use render_labs::pipeline::postprocess::BLUR_WEIGHTS;
use render_labs::pipeline::*;
use render_labs::render_graph::*;
use render_labs::resources::*;
use render_labs::scene::{SceneObject, Transform};
use render_labs::{DemoVariant, Engine, EngineConfig, SoftwareBackend};
use rstest::rstest;
use std::sync::Arc;

// ============================================================================
// Helpers
// ============================================================================

const SOLID_COLOR_SHADER: &str = r#"
struct Params {
    color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> params: Params;

@vertex
fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return params.color;
}
"#;

const NORMAL_TINT_SHADER: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) normal: vec3<f32>,
}

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) normal: vec3<f32>) -> VertexOutput {
    var output: VertexOutput;
    output.position = vec4<f32>(position, 0.0, 1.0);
    output.normal = normal;
    return output;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(abs(input.normal), 1.0);
}
"#;

/// Fills the covered pixels with the `color` parameter
struct SolidKernel;

impl ProgramKernel for SolidKernel {
    fn vertex(&self, input: &VertexInput, _params: &ParameterBlock) -> VertexOutput {
        VertexOutput {
            position: input.vec2(POSITION_LOCATION).extend(0.0).extend(1.0),
            ..Default::default()
        }
    }

    fn fragment(&self, _input: &FragmentInput, params: &ParameterBlock, _textures: &TextureUnits<'_>) -> Vec4 {
        params.vec4("color")
    }
}

/// Colors pixels by the absolute normal
struct NormalTintKernel;

impl ProgramKernel for NormalTintKernel {
    fn vertex(&self, input: &VertexInput, _params: &ParameterBlock) -> VertexOutput {
        let mut output = VertexOutput {
            position: input.vec2(POSITION_LOCATION).extend(0.0).extend(1.0),
            ..Default::default()
        };
        output.varyings.set_vec3(0, input.vec3(NORMAL_LOCATION));
        output
    }

    fn fragment(&self, input: &FragmentInput, _params: &ParameterBlock, _textures: &TextureUnits<'_>) -> Vec4 {
        input.varyings.vec3(0).abs().extend(1.0)
    }
}

fn solid_color_program() -> ProgramDescriptor {
    ProgramDescriptor::new("solid color", SOLID_COLOR_SHADER)
        .bind_attribute(POSITION_LOCATION, "position")
        .uniform("color", ParameterType::Vec4)
        .depth(DepthMode::DISABLED)
        .kernel(Arc::new(SolidKernel))
}

/// Draws a full-screen quad with one program, setting `parameters` in order
struct QuadPass {
    program: ShaderProgram,
    quad: Drawable,
    output: TargetId,
    parameters: Vec<(&'static str, ParameterValue)>,
}

impl RenderPass for QuadPass {
    fn name(&self) -> &str {
        "quad"
    }

    fn kind(&self) -> PassKind {
        PassKind::SceneRender
    }

    fn inputs(&self) -> Vec<TextureRef> {
        Vec::new()
    }

    fn output(&self) -> TargetId {
        self.output
    }

    fn load(&self, _scene: &render_labs::scene::Scene) -> TargetLoad {
        TargetLoad::clear([0.0, 0.0, 0.0, 1.0])
    }

    fn execute(&self, ctx: &mut PassContext) {
        let backend = ctx.backend();
        let mut program = self.program.activate(backend);
        for (name, value) in &self.parameters {
            program.set_parameter(name, *value);
        }
        program.draw(backend, &self.quad);
    }
}

/// Run one frame of `sequencer` over an empty scene
fn run_frame(backend: &mut dyn GraphicsBackend, sequencer: &PassSequencer, width: u32, height: u32) {
    let frame = backend.begin_frame().unwrap();
    let state = frame_state(width, height, front_camera(6.0));
    sequencer
        .execute_frame(backend, &state, &empty_scene(), frame.surface)
        .unwrap();
    backend.end_frame().unwrap();
}

fn color_texture(sequencer: &PassSequencer, target: TargetId) -> TextureHandle {
    sequencer
        .targets()
        .get(target)
        .and_then(|t| t.resolve_color_as_texture())
        .unwrap()
}

fn offscreen(label: &str, width: u32, height: u32) -> TargetDesc {
    TargetDesc::new(label, TargetSize::Absolute { width, height }).color(OFFSCREEN_COLOR_FORMAT)
}

// ============================================================================
// Bloom Tests
// ============================================================================

/// Horizontal then vertical blur of a single bright texel is the 2-D kernel.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_separable_blur_matches_2d_kernel(#[case] backend: Backend) {
    const SIZE: u32 = 16;
    let Some(mut backend) = backend.create(SIZE, SIZE) else {
        return;
    };
    let backend = backend.as_mut();

    let mut fixed = FixedDrawables::new();
    let quad = fixed.fullscreen_quad(backend).unwrap();
    let mut registry = TargetRegistry::new(backend, SIZE, SIZE).unwrap();
    let source = registry.add(backend, offscreen("source", SIZE, SIZE).persistent()).unwrap();
    let horizontal = registry.add(backend, offscreen("horizontal", SIZE, SIZE)).unwrap();
    let vertical = registry.add(backend, offscreen("vertical", SIZE, SIZE)).unwrap();

    let mut sequencer = PassSequencer::new(registry);
    sequencer
        .add_pass(BlurPass::new(backend, BlurAxis::Horizontal, quad.clone(), source, horizontal).unwrap())
        .unwrap();
    sequencer
        .add_pass(BlurPass::new(backend, BlurAxis::Vertical, quad, horizontal, vertical).unwrap())
        .unwrap();

    let mut texels = vec![Vec4::ZERO; (SIZE * SIZE) as usize];
    texels[(8 * SIZE + 8) as usize] = Vec4::ONE;
    backend.write_texture(color_texture(&sequencer, source), &rgba16f_bytes(&texels), SIZE, SIZE);

    run_frame(backend, &sequencer, SIZE, SIZE);

    let readback = backend.read_texture(color_texture(&sequencer, vertical)).unwrap();
    for y in 0..SIZE {
        for x in 0..SIZE {
            let (dx, dy) = (x as i32 - 8, y as i32 - 8);
            let expected = if dx.abs() <= 4 && dy.abs() <= 4 {
                BLUR_WEIGHTS[(dx + 4) as usize] * BLUR_WEIGHTS[(dy + 4) as usize]
            } else {
                0.0
            };
            let red = readback.texel(x, y).x;
            assert!(
                (red - expected).abs() < 1e-3,
                "texel ({}, {}): expected {}, got {}",
                x,
                y,
                expected,
                red
            );
        }
    }
}

/// Only texels whose brightest channel exceeds the threshold survive the cutoff.
#[rstest]
#[case::software_dim(Backend::Software, Vec4::new(0.5, 0.5, 0.5, 1.0), Vec4::ZERO)]
#[case::software_bright(Backend::Software, Vec4::new(2.0, 2.0, 2.0, 1.0), Vec4::new(2.0, 2.0, 2.0, 1.0))]
#[case::wgpu_dim(Backend::Wgpu, Vec4::new(0.5, 0.5, 0.5, 1.0), Vec4::ZERO)]
#[case::wgpu_bright(Backend::Wgpu, Vec4::new(2.0, 2.0, 2.0, 1.0), Vec4::new(2.0, 2.0, 2.0, 1.0))]
fn test_brightness_cutoff(#[case] backend: Backend, #[case] input: Vec4, #[case] expected: Vec4) {
    const SIZE: u32 = 8;
    let Some(mut backend) = backend.create(SIZE, SIZE) else {
        return;
    };
    let backend = backend.as_mut();

    let mut fixed = FixedDrawables::new();
    let quad = fixed.fullscreen_quad(backend).unwrap();
    let mut registry = TargetRegistry::new(backend, SIZE, SIZE).unwrap();
    let source = registry.add(backend, offscreen("source", SIZE, SIZE).persistent()).unwrap();
    let output = registry.add(backend, offscreen("cutoff", SIZE, SIZE)).unwrap();

    let mut sequencer = PassSequencer::new(registry);
    sequencer
        .add_pass(BrightnessCutoffPass::new(backend, quad, source, output, 1.0).unwrap())
        .unwrap();

    fill(backend, color_texture(&sequencer, source), SIZE, SIZE, input);
    run_frame(backend, &sequencer, SIZE, SIZE);

    let readback = backend.read_texture(color_texture(&sequencer, output)).unwrap();
    for texel in &readback.texels {
        assert_color_close(*texel, expected, 1e-3);
    }
}

// ============================================================================
// Scene Tests
// ============================================================================

/// A unit cube at the origin, seen from 20 units along +Z, is centered in the visible target.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_cube_silhouette_is_centered(#[case] backend: Backend) {
    const SIZE: u32 = 64;
    let Some(mut backend) = backend.create(SIZE, SIZE) else {
        return;
    };
    let backend = backend.as_mut();

    let registry = TargetRegistry::new(backend, SIZE, SIZE).unwrap();
    let mut sequencer = PassSequencer::new(registry);
    sequencer
        .add_pass(ScenePass::new(backend, TargetId::VISIBLE, None, None).unwrap())
        .unwrap();
    sequencer.validate().unwrap();

    let cube = Model::build(backend, "cube", &[(Mesh::cube(), Mat4::IDENTITY, Material::red())]).unwrap();
    let mut scene = empty_scene();
    scene.add(SceneObject::new("cube", cube, Transform::default()));

    let frame = backend.begin_frame().unwrap();
    let state = frame_state(SIZE, SIZE, front_camera(20.0));
    sequencer.execute_frame(backend, &state, &scene, frame.surface).unwrap();
    backend.end_frame().unwrap();

    let readback = backend.read_texture(frame.surface).unwrap();
    let covered = readback.coverage(scene.clear_color, 0.02);
    assert!(!covered.is_empty(), "cube is not visible");

    let min = covered.iter().fold(Vec2::splat(f32::MAX), |m, &(x, y)| m.min(Vec2::new(x as f32, y as f32)));
    let max = covered.iter().fold(Vec2::splat(f32::MIN), |m, &(x, y)| m.max(Vec2::new(x as f32, y as f32)));
    let center = (min + max) * 0.5;
    assert!((center.x - 31.5).abs() <= 1.0, "silhouette center {:?}", center);
    assert!((center.y - 31.5).abs() <= 1.0, "silhouette center {:?}", center);

    // Far smaller than the viewport at this distance
    assert!(max.x - min.x < SIZE as f32 * 0.5);
}

/// Requesting a fixed quad twice uploads it once.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_fixed_drawables_are_uploaded_once(#[case] backend: Backend) {
    let Some(mut backend) = backend.create(8, 8) else {
        return;
    };
    let backend = backend.as_mut();

    let mut fixed = FixedDrawables::new();
    let first = fixed.fullscreen_quad(backend).unwrap();
    let screen = fixed.security_screen_quad(backend).unwrap();
    assert_eq!(first.buffers(), fixed.fullscreen_quad(backend).unwrap().buffers());
    assert_eq!(screen.buffers(), fixed.security_screen_quad(backend).unwrap().buffers());
    assert_ne!(first.buffers(), screen.buffers());
}

#[test]
fn test_fixed_drawables_do_not_allocate_again() {
    let mut backend = SoftwareBackend::new(8, 8);
    let mut fixed = FixedDrawables::new();
    fixed.fullscreen_quad(&mut backend).unwrap();
    fixed.security_screen_quad(&mut backend).unwrap();
    let created = backend.stats().buffers_created;

    for _ in 0..3 {
        fixed.fullscreen_quad(&mut backend).unwrap();
        fixed.security_screen_quad(&mut backend).unwrap();
    }
    assert_eq!(backend.stats().buffers_created, created);
}

// ============================================================================
// Engine Tests
// ============================================================================

fn engine(backend: Box<dyn GraphicsBackend>, variant: DemoVariant) -> Engine {
    let (width, height) = backend.surface_size();
    Engine::from_backend(
        backend,
        EngineConfig {
            width,
            height,
            variant,
            shadow_map_resolution: 64,
            ..Default::default()
        },
    )
    .unwrap()
}

/// After a frame the security feed holds exactly that frame's scene image.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_feed_snapshot_matches_scene(#[case] backend: Backend) {
    let Some(backend) = backend.create(48, 32) else {
        return;
    };
    let mut engine = engine(backend, DemoVariant::PostFx);
    engine.render_frame(0.25).unwrap();

    let scene_target = engine.targets().scene.unwrap();
    let feed_target = engine.targets().feed.unwrap();
    let scene = color_texture(engine.sequencer(), scene_target);
    let feed = color_texture(engine.sequencer(), feed_target);

    let scene = engine.backend_mut().read_texture(scene).unwrap();
    let feed = engine.backend_mut().read_texture(feed).unwrap();
    assert_eq!((scene.width, scene.height), (feed.width, feed.height));
    for (s, f) in scene.texels.iter().zip(&feed.texels) {
        assert_color_close(*f, *s, 1e-6);
    }
    assert!(scene.texels.iter().any(|t| t.truncate() != glam::Vec3::ZERO));
}

/// The shadow capture writes depths nearer than the far plane.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_shadow_map_captures_depth(#[case] backend: Backend) {
    let Some(backend) = backend.create(48, 32) else {
        return;
    };
    let mut engine = engine(backend, DemoVariant::ShadowMap);
    engine.render_frame(0.0).unwrap();

    let shadow_map = engine.targets().shadow_map.unwrap();
    let depth = engine
        .sequencer()
        .targets()
        .get(shadow_map)
        .and_then(|t| t.depth_texture())
        .unwrap();
    let readback = engine.backend_mut().read_texture(depth).unwrap();
    assert_eq!((readback.width, readback.height), (64, 64));

    let depths: Vec<f32> = readback.texels.iter().map(|t| t.x).collect();
    assert!(depths.iter().all(|d| *d <= 1.0));
    assert!(depths.iter().any(|d| *d < 1.0), "nothing was captured");
}

// ============================================================================
// Program Tests
// ============================================================================

/// Unknown names and mismatched types leave the parameter block untouched.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_invalid_parameters_are_ignored(#[case] backend: Backend) {
    const SIZE: u32 = 8;
    let Some(mut backend) = backend.create(SIZE, SIZE) else {
        return;
    };
    let backend = backend.as_mut();

    let mut fixed = FixedDrawables::new();
    let quad = fixed.fullscreen_quad(backend).unwrap();
    let mut registry = TargetRegistry::new(backend, SIZE, SIZE).unwrap();
    let output = registry.add(backend, offscreen("solid", SIZE, SIZE)).unwrap();

    let green = Vec4::new(0.0, 1.0, 0.0, 1.0);
    let mut sequencer = PassSequencer::new(registry);
    sequencer
        .add_pass(QuadPass {
            program: ShaderProgram::new(backend, &solid_color_program()).unwrap(),
            quad,
            output,
            parameters: vec![
                ("color", green.into()),
                ("colour", Vec4::ONE.into()),
                ("color", 0.25f32.into()),
            ],
        })
        .unwrap();

    run_frame(backend, &sequencer, SIZE, SIZE);

    let readback = backend.read_texture(color_texture(&sequencer, output)).unwrap();
    for texel in &readback.texels {
        assert_color_close(*texel, green, 1e-3);
    }
}

/// A drawable lacking an attribute the program reads is not drawn.
#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_missing_attribute_skips_draw(#[case] backend: Backend) {
    const SIZE: u32 = 8;
    let Some(mut backend) = backend.create(SIZE, SIZE) else {
        return;
    };
    let backend = backend.as_mut();

    let mut fixed = FixedDrawables::new();
    let quad = fixed.fullscreen_quad(backend).unwrap();
    let mut registry = TargetRegistry::new(backend, SIZE, SIZE).unwrap();
    let output = registry.add(backend, offscreen("normals", SIZE, SIZE)).unwrap();

    let desc = ProgramDescriptor::new("normal tint", NORMAL_TINT_SHADER)
        .bind_attribute(POSITION_LOCATION, "position")
        .bind_attribute(NORMAL_LOCATION, "normal")
        .depth(DepthMode::DISABLED)
        .kernel(Arc::new(NormalTintKernel));
    let mut sequencer = PassSequencer::new(registry);
    sequencer
        .add_pass(QuadPass {
            program: ShaderProgram::new(backend, &desc).unwrap(),
            quad,
            output,
            parameters: Vec::new(),
        })
        .unwrap();

    run_frame(backend, &sequencer, SIZE, SIZE);

    let readback = backend.read_texture(color_texture(&sequencer, output)).unwrap();
    for texel in &readback.texels {
        assert_color_close(*texel, Vec4::new(0.0, 0.0, 0.0, 1.0), 1e-6);
    }
}

#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_malformed_source_fails_to_compile(#[case] backend: Backend) {
    let Some(mut backend) = backend.create(8, 8) else {
        return;
    };
    let mut desc = solid_color_program();
    desc.source = "@vertex fn vs_main( -> {".to_string();

    match ShaderProgram::new(backend.as_mut(), &desc) {
        Err(BackendError::ShaderCompilationFailed { label, diagnostic }) => {
            assert_eq!(label, "solid color");
            assert!(!diagnostic.is_empty());
        }
        other => panic!("expected a compilation failure, got {:?}", other.map(|p| p.label().to_string())),
    }
}

#[rstest]
#[case::software(Backend::Software)]
#[case::wgpu(Backend::Wgpu)]
fn test_unknown_attribute_fails_to_link(#[case] backend: Backend) {
    let Some(mut backend) = backend.create(8, 8) else {
        return;
    };
    let desc = ProgramDescriptor::new("solid color", SOLID_COLOR_SHADER)
        .bind_attribute(POSITION_LOCATION, "vertex_position")
        .uniform("color", ParameterType::Vec4)
        .kernel(Arc::new(SolidKernel));

    assert!(matches!(
        ShaderProgram::new(backend.as_mut(), &desc),
        Err(BackendError::ProgramLinkFailed { .. })
    ));
}
