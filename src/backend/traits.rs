//! Core backend abstraction traits
//!
//! These traits define the interface that both the wgpu and software backends implement.
//! Everything above the backend (render targets, programs, drawables, passes) talks to
//! a `&mut dyn GraphicsBackend`.

use crate::backend::parameters::{ParameterBlock, ParameterType, TextureKind};
use crate::backend::software::ProgramKernel;
use crate::backend::types::*;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create surface: {0}")]
    SurfaceCreationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to acquire next image: {0}")]
    AcquireImageFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Shader '{label}' failed to compile:\n{diagnostic}")]
    ShaderCompilationFailed { label: String, diagnostic: String },
    #[error("Program '{label}' failed to link: {reason}")]
    ProgramLinkFailed { label: String, reason: String },
    #[error("Texture readback failed: {0}")]
    ReadbackFailed(String),
    #[error("Surface lost")]
    SurfaceLost,
    #[error("Out of memory")]
    OutOfMemory,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a linked program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

/// Vertex input of a program, fixed before linking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeBinding {
    pub location: u32,
    pub name: String,
}

/// Everything needed to compile and link a program
#[derive(Clone)]
pub struct ProgramDescriptor {
    pub label: String,
    /// WGSL source
    pub source: String,
    pub vertex_entry: String,
    /// `None` for depth-only programs
    pub fragment_entry: Option<String>,
    pub attributes: Vec<AttributeBinding>,
    pub uniforms: Vec<(String, ParameterType)>,
    pub textures: Vec<(String, TextureKind, SamplerDescriptor)>,
    pub depth: DepthMode,
    pub cull_mode: CullMode,
    /// CPU implementation of both stages, used by the software backend
    pub kernel: Option<Arc<dyn ProgramKernel>>,
}

impl ProgramDescriptor {
    pub fn new(label: &str, source: &str) -> Self {
        Self {
            label: label.to_string(),
            source: source.to_string(),
            vertex_entry: "vs_main".to_string(),
            fragment_entry: Some("fs_main".to_string()),
            attributes: Vec::new(),
            uniforms: Vec::new(),
            textures: Vec::new(),
            depth: DepthMode::TEST_AND_WRITE,
            cull_mode: CullMode::None,
            kernel: None,
        }
    }

    /// Fix the vertex attribute location that the shader input `name` reads
    pub fn bind_attribute(mut self, location: u32, name: &str) -> Self {
        self.attributes.push(AttributeBinding {
            location,
            name: name.to_string(),
        });
        self
    }

    pub fn uniform(mut self, name: &str, ty: ParameterType) -> Self {
        self.uniforms.push((name.to_string(), ty));
        self
    }

    /// Declare the next texture unit
    pub fn texture(mut self, name: &str, kind: TextureKind, sampler: SamplerDescriptor) -> Self {
        self.textures.push((name.to_string(), kind, sampler));
        self
    }

    pub fn depth(mut self, depth: DepthMode) -> Self {
        self.depth = depth;
        self
    }

    pub fn cull(mut self, cull_mode: CullMode) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    pub fn without_fragment_stage(mut self) -> Self {
        self.fragment_entry = None;
        self
    }

    pub fn kernel(mut self, kernel: Arc<dyn ProgramKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }
}

impl std::fmt::Debug for ProgramDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgramDescriptor")
            .field("label", &self.label)
            .field("attributes", &self.attributes)
            .field("uniforms", &self.uniforms)
            .field("textures", &self.textures)
            .field("has_kernel", &self.kernel.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp<T> {
    Clear(T),
    Load,
}

/// Color attachment for render pass
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub texture: TextureHandle,
    pub load_op: LoadOp<[f32; 4]>,
}

/// Depth attachment for render pass
#[derive(Debug, Clone)]
pub struct DepthAttachment {
    pub texture: TextureHandle,
    pub load_op: LoadOp<f32>,
}

/// Render pass descriptor
#[derive(Debug, Clone)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachment: Option<ColorAttachment>,
    pub depth_attachment: Option<DepthAttachment>,
}

/// Frame context returned when beginning a frame
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    /// Texture presented at the end of the frame
    pub surface: TextureHandle,
    pub width: u32,
    pub height: u32,
}

/// Main graphics backend trait
pub trait GraphicsBackend {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Resize the swapchain
    fn resize(&mut self, width: u32, height: u32);

    /// Get the actual surface size (may be clamped by device limits)
    fn surface_size(&self) -> (u32, u32);

    /// Get the swapchain format
    fn surface_format(&self) -> TextureFormat;

    /// Begin a new frame
    fn begin_frame(&mut self) -> BackendResult<FrameContext>;

    /// Submit the frame and present it; blocks on vsync when enabled
    fn end_frame(&mut self) -> BackendResult<()>;

    // Resource creation

    /// Create a buffer with initial data
    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Write tightly packed texel data to a texture
    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32);

    /// Describe a live texture, including the current frame's surface
    fn texture_info(&self, texture: TextureHandle) -> Option<TextureInfo>;

    /// Compile and link a program
    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle>;

    // Command recording and execution

    /// Begin a render pass
    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor);

    /// End the current render pass
    fn end_render_pass(&mut self);

    /// Set the program for following draws
    fn set_program(&mut self, program: ProgramHandle);

    /// Set every uniform and texture slot of the current program at once
    fn set_parameters(&mut self, parameters: &ParameterBlock);

    /// Set vertex buffer
    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, layout: &VertexBufferLayout);

    /// Set index buffer
    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat);

    /// Set viewport
    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32);

    /// Draw primitives
    fn draw(&mut self, vertices: Range<u32>);

    /// Draw indexed primitives
    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32);

    /// Copy one texture into another of equal size and format
    fn copy_texture(&mut self, source: TextureHandle, destination: TextureHandle);

    /// Read a texture back to the CPU, flushing pending work first
    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<TextureReadback>;

    // Resource cleanup

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);
}
