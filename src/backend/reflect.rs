//! WGSL compilation and link checks shared by all backends
//!
//! A program "compiles" when naga parses and validates its source, and "links"
//! when the shader interface agrees with the descriptor: attribute names and
//! locations, the packed uniform block and the texture bindings.

use crate::backend::parameters::{ParameterLayout, ParameterType, TextureKind, UNIFORM_BINDING};
use crate::backend::traits::{BackendError, BackendResult, ProgramDescriptor};
use naga::{AddressSpace, Binding, ImageClass, Module, ScalarKind, TypeInner, VectorSize};

/// Parse and validate the program source, then check it against the descriptor
pub fn compile_and_link(desc: &ProgramDescriptor, layout: &ParameterLayout) -> BackendResult<()> {
    let module = compile(desc)?;
    link(desc, layout, &module).map_err(|reason| BackendError::ProgramLinkFailed {
        label: desc.label.clone(),
        reason,
    })
}

fn compile(desc: &ProgramDescriptor) -> BackendResult<Module> {
    let module = naga::front::wgsl::parse_str(&desc.source).map_err(|e| {
        BackendError::ShaderCompilationFailed {
            label: desc.label.clone(),
            diagnostic: e.emit_to_string(&desc.source),
        }
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|e| BackendError::ShaderCompilationFailed {
        label: desc.label.clone(),
        diagnostic: e.as_inner().to_string(),
    })?;

    Ok(module)
}

fn link(desc: &ProgramDescriptor, layout: &ParameterLayout, module: &Module) -> Result<(), String> {
    let vertex = module
        .entry_points
        .iter()
        .find(|ep| ep.name == desc.vertex_entry && ep.stage == naga::ShaderStage::Vertex)
        .ok_or_else(|| format!("missing vertex entry point '{}'", desc.vertex_entry))?;

    if let Some(fragment) = &desc.fragment_entry {
        module
            .entry_points
            .iter()
            .find(|ep| &ep.name == fragment && ep.stage == naga::ShaderStage::Fragment)
            .ok_or_else(|| format!("missing fragment entry point '{fragment}'"))?;
    }

    link_attributes(desc, module, &vertex.function)?;
    link_uniforms(layout, module)?;
    link_textures(layout, module)
}

fn vertex_inputs(module: &Module, function: &naga::Function) -> Vec<(String, u32)> {
    let mut inputs = Vec::new();
    for arg in &function.arguments {
        match &arg.binding {
            Some(Binding::Location { location, .. }) => {
                inputs.push((arg.name.clone().unwrap_or_default(), *location));
            }
            Some(Binding::BuiltIn(_)) => {}
            None => {
                if let TypeInner::Struct { members, .. } = &module.types[arg.ty].inner {
                    for member in members {
                        if let Some(Binding::Location { location, .. }) = &member.binding {
                            inputs.push((member.name.clone().unwrap_or_default(), *location));
                        }
                    }
                }
            }
        }
    }
    inputs
}

fn link_attributes(
    desc: &ProgramDescriptor,
    module: &Module,
    function: &naga::Function,
) -> Result<(), String> {
    let inputs = vertex_inputs(module, function);

    for binding in &desc.attributes {
        match inputs.iter().find(|(name, _)| *name == binding.name) {
            None => return Err(format!("attribute '{}' is not a vertex input", binding.name)),
            Some((_, location)) if *location != binding.location => {
                return Err(format!(
                    "attribute '{}' is read from location {} but bound to {}",
                    binding.name, location, binding.location
                ));
            }
            Some(_) => {}
        }
    }

    for (name, location) in &inputs {
        if !desc.attributes.iter().any(|b| &b.name == name) {
            return Err(format!("vertex input '{name}' at location {location} has no bound attribute"));
        }
    }

    Ok(())
}

fn matches_type(inner: &TypeInner, ty: ParameterType) -> bool {
    let is_f32 = |scalar: &naga::Scalar| scalar.kind == ScalarKind::Float && scalar.width == 4;
    match (inner, ty) {
        (TypeInner::Matrix { columns, rows, scalar }, ParameterType::Mat4) => {
            *columns == VectorSize::Quad && *rows == VectorSize::Quad && is_f32(scalar)
        }
        (TypeInner::Vector { size, scalar }, ParameterType::Vec4) => {
            *size == VectorSize::Quad && is_f32(scalar)
        }
        (TypeInner::Vector { size, scalar }, ParameterType::Vec3) => {
            *size == VectorSize::Tri && is_f32(scalar)
        }
        (TypeInner::Vector { size, scalar }, ParameterType::Vec2) => {
            *size == VectorSize::Bi && is_f32(scalar)
        }
        (TypeInner::Scalar(scalar), ParameterType::Float) => is_f32(scalar),
        (TypeInner::Scalar(scalar), ParameterType::Int) => scalar.kind == ScalarKind::Sint,
        (TypeInner::Scalar(scalar), ParameterType::UInt | ParameterType::Bool) => {
            scalar.kind == ScalarKind::Uint
        }
        _ => false,
    }
}

fn link_uniforms(layout: &ParameterLayout, module: &Module) -> Result<(), String> {
    let global = module.global_variables.iter().find(|(_, var)| {
        var.space == AddressSpace::Uniform
            && var
                .binding
                .as_ref()
                .is_some_and(|b| b.group == 0 && b.binding == UNIFORM_BINDING)
    });

    let Some((_, global)) = global else {
        return if layout.uniforms().is_empty() {
            Ok(())
        } else {
            Err("no uniform block at @group(0) @binding(0)".to_string())
        };
    };

    let TypeInner::Struct { members, span } = &module.types[global.ty].inner else {
        return Err("uniform block is not a struct".to_string());
    };

    if members.len() != layout.uniforms().len() {
        return Err(format!(
            "uniform block has {} members, {} declared",
            members.len(),
            layout.uniforms().len()
        ));
    }

    for (member, slot) in members.iter().zip(layout.uniforms()) {
        let name = member.name.as_deref().unwrap_or_default();
        if name != slot.name {
            return Err(format!("uniform member '{name}' does not match declared '{}'", slot.name));
        }
        if member.offset != slot.offset {
            return Err(format!(
                "uniform '{name}' sits at offset {} but is packed at {}",
                member.offset, slot.offset
            ));
        }
        if !matches_type(&module.types[member.ty].inner, slot.ty) {
            return Err(format!("uniform '{name}' is not a {:?}", slot.ty));
        }
    }

    if *span > layout.size() {
        return Err(format!("uniform block spans {span} bytes, {} packed", layout.size()));
    }

    Ok(())
}

fn link_textures(layout: &ParameterLayout, module: &Module) -> Result<(), String> {
    for (_, var) in module.global_variables.iter() {
        if var.space != AddressSpace::Handle {
            continue;
        }
        let Some(binding) = &var.binding else {
            continue;
        };
        let name = var.name.as_deref().unwrap_or_default();
        let declared = layout.textures().iter().find(|slot| {
            binding.group == 0
                && (binding.binding == slot.texture_binding()
                    || binding.binding == slot.sampler_binding())
        });
        let Some(slot) = declared else {
            return Err(format!(
                "'{name}' at @group({}) @binding({}) is not a declared texture slot",
                binding.group, binding.binding
            ));
        };

        match &module.types[var.ty].inner {
            TypeInner::Image { class, .. } => {
                if binding.binding != slot.texture_binding() || name != slot.name {
                    return Err(format!("texture '{name}' does not match slot '{}'", slot.name));
                }
                let kind_ok = match (class, slot.kind) {
                    (ImageClass::Sampled { kind, .. }, TextureKind::Color) => *kind == ScalarKind::Float,
                    (ImageClass::Depth { .. }, TextureKind::Depth) => true,
                    _ => false,
                };
                if !kind_ok {
                    return Err(format!("texture '{name}' is not a {:?} texture", slot.kind));
                }
            }
            TypeInner::Sampler { comparison } => {
                if binding.binding != slot.sampler_binding() {
                    return Err(format!("sampler '{name}' is bound where texture '{}' is expected", slot.name));
                }
                if *comparison != (slot.kind == TextureKind::Depth) {
                    return Err(format!("sampler '{name}' has the wrong comparison mode"));
                }
            }
            _ => return Err(format!("'{name}' is neither a texture nor a sampler")),
        }
    }

    for slot in layout.textures() {
        let bound = module.global_variables.iter().any(|(_, var)| {
            var.binding
                .as_ref()
                .is_some_and(|b| b.group == 0 && b.binding == slot.texture_binding())
        });
        if !bound {
            return Err(format!("texture slot '{}' is not used by the shader", slot.name));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::types::SamplerDescriptor;
    use std::sync::Arc;

    const SOURCE: &str = r#"
struct Params {
    model_view_projection: mat4x4<f32>,
    tint: vec3<f32>,
    enabled: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var albedo: texture_2d<f32>;
@group(0) @binding(2) var albedo_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_main(@location(0) position: vec3<f32>, @location(2) uv: vec2<f32>) -> VertexOutput {
    var out: VertexOutput;
    out.position = params.model_view_projection * vec4<f32>(position, 1.0);
    out.uv = uv;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let texel = textureSample(albedo, albedo_sampler, input.uv);
    return vec4<f32>(texel.rgb * params.tint, 1.0);
}
"#;

    fn descriptor() -> ProgramDescriptor {
        ProgramDescriptor::new("test", SOURCE)
            .bind_attribute(0, "position")
            .bind_attribute(2, "uv")
            .uniform("model_view_projection", ParameterType::Mat4)
            .uniform("tint", ParameterType::Vec3)
            .uniform("enabled", ParameterType::Bool)
            .texture("albedo", TextureKind::Color, SamplerDescriptor::default())
    }

    fn check(desc: &ProgramDescriptor) -> BackendResult<()> {
        let layout = Arc::new(ParameterLayout::new(&desc.uniforms, &desc.textures));
        compile_and_link(desc, &layout)
    }

    #[test]
    fn test_valid_program_links() {
        check(&descriptor()).unwrap();
    }

    #[test]
    fn test_malformed_source_fails_to_compile() {
        let mut desc = descriptor();
        desc.source = "fn vs_main( {".to_string();
        assert!(matches!(
            check(&desc),
            Err(BackendError::ShaderCompilationFailed { .. })
        ));
    }

    #[test]
    fn test_attribute_location_mismatch_fails_to_link() {
        let mut desc = descriptor();
        desc.attributes[1].location = 1;
        assert!(matches!(check(&desc), Err(BackendError::ProgramLinkFailed { .. })));
    }

    #[test]
    fn test_unbound_vertex_input_fails_to_link() {
        let mut desc = descriptor();
        desc.attributes.pop();
        assert!(matches!(check(&desc), Err(BackendError::ProgramLinkFailed { .. })));
    }

    #[test]
    fn test_uniform_order_mismatch_fails_to_link() {
        let mut desc = descriptor();
        desc.uniforms.swap(1, 2);
        assert!(matches!(check(&desc), Err(BackendError::ProgramLinkFailed { .. })));
    }

    #[test]
    fn test_texture_kind_mismatch_fails_to_link() {
        let mut desc = descriptor();
        desc.textures[0].1 = TextureKind::Depth;
        assert!(matches!(check(&desc), Err(BackendError::ProgramLinkFailed { .. })));
    }

    #[test]
    fn test_missing_fragment_entry_fails_to_link() {
        let mut desc = descriptor();
        desc.fragment_entry = Some("fs_other".to_string());
        assert!(matches!(check(&desc), Err(BackendError::ProgramLinkFailed { .. })));
    }
}
