//! Named program parameters packed into a single uniform block
//!
//! A program declares its uniforms by name and type. The layout assigns each
//! one an offset following WGSL uniform layout rules, so the packed bytes can
//! be uploaded as-is and the same block can be read back by CPU kernels.

use crate::backend::traits::TextureHandle;
use crate::backend::types::SamplerDescriptor;
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Type of a named uniform parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    Mat4,
    Vec4,
    Vec3,
    Vec2,
    Float,
    Int,
    UInt,
    /// Stored as `u32` on the GPU
    Bool,
}

impl ParameterType {
    pub fn size(&self) -> u32 {
        match self {
            ParameterType::Mat4 => 64,
            ParameterType::Vec4 => 16,
            ParameterType::Vec3 => 12,
            ParameterType::Vec2 => 8,
            ParameterType::Float | ParameterType::Int | ParameterType::UInt | ParameterType::Bool => 4,
        }
    }

    pub fn align(&self) -> u32 {
        match self {
            ParameterType::Mat4 | ParameterType::Vec4 | ParameterType::Vec3 => 16,
            ParameterType::Vec2 => 8,
            ParameterType::Float | ParameterType::Int | ParameterType::UInt | ParameterType::Bool => 4,
        }
    }
}

/// Kind of texture bound to a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    /// Filterable float color texture
    Color,
    /// Depth texture sampled through a comparison sampler
    Depth,
}

/// A value assigned to a named slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterValue {
    Mat4(Mat4),
    Vec4(Vec4),
    Vec3(Vec3),
    Vec2(Vec2),
    Float(f32),
    Int(i32),
    UInt(u32),
    Bool(bool),
    Texture(TextureHandle),
}

impl ParameterValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::Mat4(_) => "mat4",
            ParameterValue::Vec4(_) => "vec4",
            ParameterValue::Vec3(_) => "vec3",
            ParameterValue::Vec2(_) => "vec2",
            ParameterValue::Float(_) => "f32",
            ParameterValue::Int(_) => "i32",
            ParameterValue::UInt(_) => "u32",
            ParameterValue::Bool(_) => "bool",
            ParameterValue::Texture(_) => "texture",
        }
    }
}

impl From<Mat4> for ParameterValue {
    fn from(v: Mat4) -> Self {
        ParameterValue::Mat4(v)
    }
}

impl From<Vec4> for ParameterValue {
    fn from(v: Vec4) -> Self {
        ParameterValue::Vec4(v)
    }
}

impl From<Vec3> for ParameterValue {
    fn from(v: Vec3) -> Self {
        ParameterValue::Vec3(v)
    }
}

impl From<Vec2> for ParameterValue {
    fn from(v: Vec2) -> Self {
        ParameterValue::Vec2(v)
    }
}

impl From<f32> for ParameterValue {
    fn from(v: f32) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<i32> for ParameterValue {
    fn from(v: i32) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<u32> for ParameterValue {
    fn from(v: u32) -> Self {
        ParameterValue::UInt(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

impl From<TextureHandle> for ParameterValue {
    fn from(v: TextureHandle) -> Self {
        ParameterValue::Texture(v)
    }
}

/// Errors raised when writing a parameter block
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Unknown parameter '{0}'")]
    UnknownName(String),
    #[error("Parameter '{name}' expects {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: &'static str,
    },
}

/// A uniform slot with its packed offset
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSlot {
    pub name: String,
    pub ty: ParameterType,
    pub offset: u32,
}

/// A texture slot; unit `k` binds the texture at `1 + 2k` and its sampler at `2 + 2k`
#[derive(Debug, Clone, PartialEq)]
pub struct TextureSlot {
    pub name: String,
    pub unit: u32,
    pub kind: TextureKind,
    pub sampler: SamplerDescriptor,
}

impl TextureSlot {
    pub fn texture_binding(&self) -> u32 {
        1 + 2 * self.unit
    }

    pub fn sampler_binding(&self) -> u32 {
        2 + 2 * self.unit
    }
}

#[derive(Debug, Clone, Copy)]
enum SlotRef {
    Uniform(usize),
    Texture(usize),
}

/// Binding of the uniform block
pub const UNIFORM_BINDING: u32 = 0;

/// Smallest uniform block size; empty programs still bind a block
const MIN_BLOCK_SIZE: u32 = 16;

/// Packed layout of every named parameter of a program
#[derive(Debug)]
pub struct ParameterLayout {
    uniforms: Vec<ParameterSlot>,
    textures: Vec<TextureSlot>,
    by_name: HashMap<String, SlotRef>,
    size: u32,
}

fn align_to(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

impl ParameterLayout {
    pub fn new(
        uniforms: &[(String, ParameterType)],
        textures: &[(String, TextureKind, SamplerDescriptor)],
    ) -> Self {
        let mut by_name = HashMap::new();
        let mut slots = Vec::with_capacity(uniforms.len());
        let mut offset = 0;

        for (name, ty) in uniforms {
            offset = align_to(offset, ty.align());
            by_name.insert(name.clone(), SlotRef::Uniform(slots.len()));
            slots.push(ParameterSlot {
                name: name.clone(),
                ty: *ty,
                offset,
            });
            offset += ty.size();
        }

        let texture_slots: Vec<TextureSlot> = textures
            .iter()
            .enumerate()
            .map(|(unit, (name, kind, sampler))| {
                by_name.insert(name.clone(), SlotRef::Texture(unit));
                TextureSlot {
                    name: name.clone(),
                    unit: unit as u32,
                    kind: *kind,
                    sampler: sampler.clone(),
                }
            })
            .collect();

        Self {
            uniforms: slots,
            textures: texture_slots,
            by_name,
            size: align_to(offset, 16).max(MIN_BLOCK_SIZE),
        }
    }

    /// Size of the uniform block in bytes
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn uniforms(&self) -> &[ParameterSlot] {
        &self.uniforms
    }

    pub fn textures(&self) -> &[TextureSlot] {
        &self.textures
    }

    pub fn uniform(&self, name: &str) -> Option<&ParameterSlot> {
        match self.by_name.get(name)? {
            SlotRef::Uniform(i) => self.uniforms.get(*i),
            SlotRef::Texture(_) => None,
        }
    }

    pub fn texture(&self, name: &str) -> Option<&TextureSlot> {
        match self.by_name.get(name)? {
            SlotRef::Texture(i) => self.textures.get(*i),
            SlotRef::Uniform(_) => None,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Create an empty block for this layout
    pub fn block(self: &Arc<Self>) -> ParameterBlock {
        ParameterBlock {
            data: vec![0; self.size as usize],
            textures: vec![None; self.textures.len()],
            layout: Arc::clone(self),
        }
    }
}

/// Values for every slot of one draw
#[derive(Debug, Clone)]
pub struct ParameterBlock {
    layout: Arc<ParameterLayout>,
    data: Vec<u8>,
    textures: Vec<Option<TextureHandle>>,
}

impl ParameterBlock {
    pub fn layout(&self) -> &Arc<ParameterLayout> {
        &self.layout
    }

    /// Packed uniform bytes
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Texture bound to each unit, `None` when unset
    pub fn textures(&self) -> &[Option<TextureHandle>] {
        &self.textures
    }

    pub fn texture(&self, unit: u32) -> Option<TextureHandle> {
        self.textures.get(unit as usize).copied().flatten()
    }

    pub fn set(&mut self, name: &str, value: impl Into<ParameterValue>) -> Result<(), ParameterError> {
        let value = value.into();
        match self.layout.by_name.get(name).copied() {
            None => Err(ParameterError::UnknownName(name.to_string())),
            Some(SlotRef::Texture(unit)) => match value {
                ParameterValue::Texture(handle) => {
                    self.textures[unit] = Some(handle);
                    Ok(())
                }
                other => Err(ParameterError::TypeMismatch {
                    name: name.to_string(),
                    expected: "texture".to_string(),
                    actual: other.type_name(),
                }),
            },
            Some(SlotRef::Uniform(index)) => {
                let slot = &self.layout.uniforms[index];
                let offset = slot.offset as usize;
                let mismatch = |v: &ParameterValue| ParameterError::TypeMismatch {
                    name: name.to_string(),
                    expected: format!("{:?}", slot.ty),
                    actual: v.type_name(),
                };
                match (slot.ty, value) {
                    (ParameterType::Mat4, ParameterValue::Mat4(m)) => {
                        self.write(offset, bytemuck::cast_slice(&m.to_cols_array()))
                    }
                    (ParameterType::Vec4, ParameterValue::Vec4(v)) => {
                        self.write(offset, bytemuck::cast_slice(&v.to_array()))
                    }
                    (ParameterType::Vec3, ParameterValue::Vec3(v)) => {
                        self.write(offset, bytemuck::cast_slice(&v.to_array()))
                    }
                    (ParameterType::Vec2, ParameterValue::Vec2(v)) => {
                        self.write(offset, bytemuck::cast_slice(&v.to_array()))
                    }
                    (ParameterType::Float, ParameterValue::Float(v)) => {
                        self.write(offset, bytemuck::bytes_of(&v))
                    }
                    (ParameterType::Int, ParameterValue::Int(v)) => {
                        self.write(offset, bytemuck::bytes_of(&v))
                    }
                    (ParameterType::UInt, ParameterValue::UInt(v)) => {
                        self.write(offset, bytemuck::bytes_of(&v))
                    }
                    (ParameterType::Bool, ParameterValue::Bool(v)) => {
                        self.write(offset, bytemuck::bytes_of(&(v as u32)))
                    }
                    (_, other) => return Err(mismatch(&other)),
                }
                Ok(())
            }
        }
    }

    fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn read_f32s<const N: usize>(&self, name: &str, ty: ParameterType) -> [f32; N] {
        let mut out = [0.0; N];
        if let Some(slot) = self.layout.uniform(name).filter(|s| s.ty == ty) {
            let offset = slot.offset as usize;
            for (i, v) in out.iter_mut().enumerate() {
                let start = offset + i * 4;
                *v = bytemuck::pod_read_unaligned(&self.data[start..start + 4]);
            }
        }
        out
    }

    fn read_u32(&self, name: &str, ty: ParameterType) -> u32 {
        match self.layout.uniform(name).filter(|s| s.ty == ty) {
            Some(slot) => {
                let offset = slot.offset as usize;
                bytemuck::pod_read_unaligned(&self.data[offset..offset + 4])
            }
            None => 0,
        }
    }

    // Readers return zero for names the layout does not contain.

    pub fn mat4(&self, name: &str) -> Mat4 {
        Mat4::from_cols_array(&self.read_f32s::<16>(name, ParameterType::Mat4))
    }

    pub fn vec4(&self, name: &str) -> Vec4 {
        Vec4::from_array(self.read_f32s::<4>(name, ParameterType::Vec4))
    }

    pub fn vec3(&self, name: &str) -> Vec3 {
        Vec3::from_array(self.read_f32s::<3>(name, ParameterType::Vec3))
    }

    pub fn vec2(&self, name: &str) -> Vec2 {
        Vec2::from_array(self.read_f32s::<2>(name, ParameterType::Vec2))
    }

    pub fn float(&self, name: &str) -> f32 {
        self.read_f32s::<1>(name, ParameterType::Float)[0]
    }

    pub fn int(&self, name: &str) -> i32 {
        self.read_u32(name, ParameterType::Int) as i32
    }

    pub fn uint(&self, name: &str) -> u32 {
        self.read_u32(name, ParameterType::UInt)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.read_u32(name, ParameterType::Bool) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shading_layout() -> Arc<ParameterLayout> {
        Arc::new(ParameterLayout::new(
            &[
                ("model_view".to_string(), ParameterType::Mat4),
                ("light_position".to_string(), ParameterType::Vec3),
                ("has_texture".to_string(), ParameterType::Bool),
                ("color".to_string(), ParameterType::Vec3),
                ("uv_scale".to_string(), ParameterType::Vec2),
                ("time".to_string(), ParameterType::Float),
            ],
            &[("diffuse".to_string(), TextureKind::Color, SamplerDescriptor::default())],
        ))
    }

    #[test]
    fn test_offsets_follow_wgsl_rules() {
        let layout = shading_layout();
        let offsets: Vec<u32> = layout.uniforms().iter().map(|s| s.offset).collect();
        // vec3 leaves room for a trailing scalar, vec2 aligns to 8
        assert_eq!(offsets, vec![0, 64, 76, 80, 96, 104]);
        assert_eq!(layout.size(), 112);
    }

    #[test]
    fn test_set_and_read_back() {
        let layout = shading_layout();
        let mut block = layout.block();
        let m = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        block.set("model_view", m).unwrap();
        block.set("light_position", Vec3::new(4.0, 5.0, 6.0)).unwrap();
        block.set("has_texture", true).unwrap();
        block.set("time", 2.5f32).unwrap();

        assert_eq!(block.mat4("model_view"), m);
        assert_eq!(block.vec3("light_position"), Vec3::new(4.0, 5.0, 6.0));
        assert!(block.flag("has_texture"));
        assert_eq!(block.float("time"), 2.5);
        assert_eq!(block.vec3("color"), Vec3::ZERO);
    }

    #[test]
    fn test_unknown_name_is_rejected() {
        let mut block = shading_layout().block();
        assert_eq!(
            block.set("nope", 1.0f32),
            Err(ParameterError::UnknownName("nope".to_string()))
        );
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let mut block = shading_layout().block();
        let err = block.set("time", Vec3::ONE).unwrap_err();
        assert!(matches!(err, ParameterError::TypeMismatch { .. }));
        assert!(block.set("diffuse", 1.0f32).is_err());
    }

    #[test]
    fn test_texture_slots_bind_by_unit() {
        let layout = shading_layout();
        let mut block = layout.block();
        assert_eq!(block.texture(0), None);
        block.set("diffuse", TextureHandle(7)).unwrap();
        assert_eq!(block.texture(0), Some(TextureHandle(7)));
        let slot = layout.texture("diffuse").unwrap();
        assert_eq!((slot.texture_binding(), slot.sampler_binding()), (1, 2));
    }
}
