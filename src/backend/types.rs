//! Common types shared between backends

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3, Vec4};

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    Rgba16Float,
    Rgba32Float,
    R32Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn is_srgb(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8UnormSrgb | TextureFormat::Bgra8UnormSrgb
        )
    }

    /// Unorm formats clamp written values to `[0, 1]`
    pub fn is_normalized(&self) -> bool {
        matches!(
            self,
            TextureFormat::Rgba8Unorm
                | TextureFormat::Rgba8UnormSrgb
                | TextureFormat::Bgra8Unorm
                | TextureFormat::Bgra8UnormSrgb
        )
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Depth32Float
            | TextureFormat::R32Float => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float => 16,
        }
    }

    /// Decode one tightly packed texel to linear RGBA; depth and `R32Float` fill `x` only
    pub fn decode_texel(&self, bytes: &[u8]) -> Vec4 {
        let unorm = |b: u8| b as f32 / 255.0;
        let float = |at: usize| -> f32 { bytemuck::pod_read_unaligned(&bytes[at..at + 4]) };
        let half_float = |at: usize| half::f16::from_bits(bytemuck::pod_read_unaligned(&bytes[at..at + 2])).to_f32();

        let texel = match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb => {
                Vec4::new(unorm(bytes[0]), unorm(bytes[1]), unorm(bytes[2]), unorm(bytes[3]))
            }
            TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb => {
                Vec4::new(unorm(bytes[2]), unorm(bytes[1]), unorm(bytes[0]), unorm(bytes[3]))
            }
            TextureFormat::Rgba16Float => Vec4::new(half_float(0), half_float(2), half_float(4), half_float(6)),
            TextureFormat::Rgba32Float => Vec4::new(float(0), float(4), float(8), float(12)),
            TextureFormat::R32Float | TextureFormat::Depth32Float => Vec4::new(float(0), 0.0, 0.0, 1.0),
        };

        if self.is_srgb() {
            Vec4::new(
                srgb_to_linear(texel.x),
                srgb_to_linear(texel.y),
                srgb_to_linear(texel.z),
                texel.w,
            )
        } else {
            texel
        }
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const COPY_DST: Self = Self(1 << 3);
    pub const INDEX: Self = Self(1 << 4);
    pub const VERTEX: Self = Self(1 << 5);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Texture descriptor
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        }
    }
}

/// What a backend knows about a live texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn size(&self) -> u64 {
        match self {
            VertexFormat::Float32 => 4,
            VertexFormat::Float32x2 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 => 16,
        }
    }

    pub fn components(&self) -> usize {
        match self {
            VertexFormat::Float32 => 1,
            VertexFormat::Float32x2 => 2,
            VertexFormat::Float32x3 => 3,
            VertexFormat::Float32x4 => 4,
        }
    }
}

/// Vertex attribute description
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u64,
}

/// Vertex buffer layout
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub array_stride: u64,
    pub attributes: Vec<VertexAttribute>,
}

impl VertexBufferLayout {
    pub fn has_location(&self, location: u32) -> bool {
        self.attributes.iter().any(|a| a.location == location)
    }
}

/// Attribute locations shared by every mesh program
pub const POSITION_LOCATION: u32 = 0;
pub const NORMAL_LOCATION: u32 = 1;
pub const TEXCOORD_LOCATION: u32 = 2;

/// Standard vertex with position, normal and UV
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self {
            position,
            normal,
            uv,
        }
    }

    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            attributes: vec![
                VertexAttribute {
                    location: POSITION_LOCATION,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: NORMAL_LOCATION,
                    format: VertexFormat::Float32x3,
                    offset: 12,
                },
                VertexAttribute {
                    location: TEXCOORD_LOCATION,
                    format: VertexFormat::Float32x2,
                    offset: 24,
                },
            ],
        }
    }
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(&self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

/// Compare function for depth tests and comparison samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    LessEqual,
    Greater,
    Always,
}

impl CompareFunction {
    pub fn passes(&self, reference: f32, stored: f32) -> bool {
        match self {
            CompareFunction::Never => false,
            CompareFunction::Less => reference < stored,
            CompareFunction::LessEqual => reference <= stored,
            CompareFunction::Greater => reference > stored,
            CompareFunction::Always => true,
        }
    }
}

/// Depth state of a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthMode {
    pub test: bool,
    pub write: bool,
}

impl DepthMode {
    pub const TEST_AND_WRITE: Self = Self {
        test: true,
        write: true,
    };
    pub const DISABLED: Self = Self {
        test: false,
        write: false,
    };
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
}

/// Sampler descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SamplerDescriptor {
    pub filter: FilterMode,
    pub address_mode: AddressMode,
    pub compare: Option<CompareFunction>,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
            compare: None,
        }
    }
}

impl SamplerDescriptor {
    pub fn nearest() -> Self {
        Self {
            filter: FilterMode::Nearest,
            ..Default::default()
        }
    }

    pub fn repeat() -> Self {
        Self {
            address_mode: AddressMode::Repeat,
            ..Default::default()
        }
    }

    /// Comparison sampler for depth textures
    pub fn shadow() -> Self {
        Self {
            filter: FilterMode::Linear,
            address_mode: AddressMode::ClampToEdge,
            compare: Some(CompareFunction::LessEqual),
        }
    }
}

/// Texels read back from a texture, always expanded to linear RGBA floats
#[derive(Debug, Clone)]
pub struct TextureReadback {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub texels: Vec<Vec4>,
}

impl TextureReadback {
    pub fn texel(&self, x: u32, y: u32) -> Vec4 {
        self.texels[(y * self.width + x) as usize]
    }

    /// Pixels whose color differs from `background` by more than `epsilon`
    pub fn coverage(&self, background: Vec4, epsilon: f32) -> Vec<(u32, u32)> {
        let mut covered = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                if (self.texel(x, y) - background).abs().max_element() > epsilon {
                    covered.push((x, y));
                }
            }
        }
        covered
    }
}

/// sRGB transfer function, encoded to linear
pub fn srgb_to_linear(value: f32) -> f32 {
    if value <= 0.04045 {
        value / 12.92
    } else {
        ((value + 0.055) / 1.055).powf(2.4)
    }
}

/// sRGB transfer function, linear to encoded
pub fn linear_to_srgb(value: f32) -> f32 {
    if value <= 0.0031308 {
        value * 12.92
    } else {
        1.055 * value.powf(1.0 / 2.4) - 0.055
    }
}
