//! Software backend for headless rendering and tests
//!
//! Executes every command immediately on the CPU. Programs are still compiled
//! and linked through naga so that source and interface errors surface exactly
//! as they do on the GPU, but their stages run through a [`ProgramKernel`].

mod kernel;
mod raster;
mod texture;

pub use kernel::{
    FragmentInput, ProgramKernel, Varyings, VertexInput, VertexOutput, MAX_VARYINGS,
    MAX_VERTEX_ATTRIBUTES,
};
pub use texture::TextureUnits;

use crate::backend::parameters::{ParameterBlock, ParameterLayout};
use crate::backend::reflect;
use crate::backend::traits::*;
use crate::backend::types::*;
use glam::Vec4;
use raster::{DrawState, DrawTarget, Viewport};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use texture::CpuTexture;

/// Counters exposed for tests and diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareStats {
    pub buffers_created: u32,
    pub textures_created: u32,
    pub programs_created: u32,
    pub draw_calls: u32,
    pub triangles: u32,
    pub frames_presented: u32,
}

#[derive(Clone)]
struct CpuProgram {
    label: String,
    kernel: Arc<dyn ProgramKernel>,
    layout: Arc<ParameterLayout>,
    depth: DepthMode,
    cull: CullMode,
    has_fragment: bool,
}

#[derive(Debug, Clone)]
struct VertexStream {
    buffer: BufferHandle,
    layout: VertexBufferLayout,
}

struct ActivePass {
    label: Option<String>,
    color: Option<TextureHandle>,
    depth: Option<TextureHandle>,
    viewport: Viewport,
    program: Option<ProgramHandle>,
    parameters: Option<ParameterBlock>,
    vertex_streams: Vec<Option<VertexStream>>,
    index: Option<(BufferHandle, IndexFormat)>,
}

/// CPU rasterizer implementing [`GraphicsBackend`]
pub struct SoftwareBackend {
    width: u32,
    height: u32,
    surface: TextureHandle,
    buffers: HashMap<u64, Vec<u8>>,
    textures: HashMap<u64, CpuTexture>,
    programs: HashMap<u64, CpuProgram>,
    next_id: u64,
    pass: Option<ActivePass>,
    stats: SoftwareStats,
    /// Live textures allowed besides the surface
    texture_limit: Option<usize>,
}

const SURFACE_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;

fn surface_descriptor(width: u32, height: u32) -> TextureDescriptor {
    TextureDescriptor {
        label: Some("surface".to_string()),
        width,
        height,
        format: SURFACE_FORMAT,
        usage: TextureUsage::RENDER_ATTACHMENT
            | TextureUsage::COPY_SRC
            | TextureUsage::TEXTURE_BINDING,
    }
}

impl SoftwareBackend {
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        let mut textures = HashMap::new();
        textures.insert(0, CpuTexture::new(&surface_descriptor(width, height)));
        log::info!("Software backend initialized ({}x{})", width, height);
        Self {
            width,
            height,
            surface: TextureHandle(0),
            buffers: HashMap::new(),
            textures,
            programs: HashMap::new(),
            next_id: 1,
            pass: None,
            stats: SoftwareStats::default(),
            texture_limit: None,
        }
    }

    pub fn stats(&self) -> SoftwareStats {
        self.stats
    }

    /// Fail texture creation with `OutOfMemory` once `limit` textures besides the surface are alive
    pub fn set_texture_limit(&mut self, limit: Option<usize>) {
        self.texture_limit = limit;
    }

    /// Textures currently alive, not counting the surface
    pub fn live_textures(&self) -> usize {
        self.textures.keys().filter(|id| **id != self.surface.0).count()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn fetch_vertex(&self, streams: &[Option<VertexStream>], index: u32) -> VertexInput {
        let mut input = VertexInput::default();
        for stream in streams.iter().flatten() {
            let Some(bytes) = self.buffers.get(&stream.buffer.0) else {
                continue;
            };
            let base = index as u64 * stream.layout.array_stride;
            for attribute in &stream.layout.attributes {
                let mut value = Vec4::W;
                let start = (base + attribute.offset) as usize;
                for c in 0..attribute.format.components() {
                    let at = start + c * 4;
                    if let Some(raw) = bytes.get(at..at + 4) {
                        value[c] = bytemuck::pod_read_unaligned(raw);
                    }
                }
                input.set(attribute.location, value);
            }
        }
        input
    }

    fn read_indices(&self, buffer: BufferHandle, format: IndexFormat, range: Range<u32>) -> Option<Vec<u32>> {
        let bytes = self.buffers.get(&buffer.0)?;
        let size = format.size() as usize;
        range
            .map(|i| {
                let at = i as usize * size;
                let raw = bytes.get(at..at + size)?;
                Some(match format {
                    IndexFormat::Uint16 => bytemuck::pod_read_unaligned::<u16>(raw) as u32,
                    IndexFormat::Uint32 => bytemuck::pod_read_unaligned::<u32>(raw),
                })
            })
            .collect()
    }

    fn submit(&mut self, indices: Vec<u32>) {
        let Some(pass) = &self.pass else {
            log::warn!("draw issued outside of a render pass");
            return;
        };
        let Some(program) = pass.program.and_then(|p| self.programs.get(&p.0)).cloned() else {
            log::warn!("draw issued without a program in pass {:?}", pass.label);
            return;
        };
        let params = pass
            .parameters
            .clone()
            .unwrap_or_else(|| program.layout.block());
        let (color_handle, depth_handle, viewport) = (pass.color, pass.depth, pass.viewport);

        let vertices: Vec<VertexOutput> = indices
            .iter()
            .map(|&i| {
                let input = self.fetch_vertex(&pass.vertex_streams, i);
                program.kernel.vertex(&input, &params)
            })
            .collect();

        let mut color = color_handle.and_then(|h| self.textures.remove(&h.0));
        let mut depth = depth_handle.and_then(|h| self.textures.remove(&h.0));

        let rasterized = {
            let units = TextureUnits::new(
                params
                    .layout()
                    .textures()
                    .iter()
                    .map(|slot| {
                        params
                            .texture(slot.unit)
                            .and_then(|h| self.textures.get(&h.0))
                            .map(|t| (t, &slot.sampler))
                    })
                    .collect(),
            );
            let state = DrawState {
                kernel: program.kernel.as_ref(),
                params: &params,
                textures: &units,
                cull: program.cull,
                depth: program.depth,
                shade_fragments: program.has_fragment,
            };
            let mut target = DrawTarget {
                color: color.as_mut(),
                depth: depth.as_mut(),
                viewport,
            };
            raster::draw_triangles(&state, &mut target, &vertices)
        };

        if let (Some(h), Some(t)) = (color_handle, color) {
            self.textures.insert(h.0, t);
        }
        if let (Some(h), Some(t)) = (depth_handle, depth) {
            self.textures.insert(h.0, t);
        }

        log::trace!(
            "SoftwareBackend: '{}' drew {} vertices, {} triangles",
            program.label,
            vertices.len(),
            rasterized
        );
        self.stats.draw_calls += 1;
        self.stats.triangles += rasterized;
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "Software"
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.width = width;
        self.height = height;
        self.textures
            .insert(self.surface.0, CpuTexture::new(&surface_descriptor(width, height)));
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn surface_format(&self) -> TextureFormat {
        SURFACE_FORMAT
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        Ok(FrameContext {
            surface: self.surface,
            width: self.width,
            height: self.height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        if self.pass.take().is_some() {
            log::warn!("frame ended with an open render pass");
        }
        self.stats.frames_presented += 1;
        Ok(())
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        log::trace!(
            "SoftwareBackend: creating buffer {:?} (size: {})",
            desc.label,
            data.len()
        );
        let id = self.allocate_id();
        self.buffers.insert(id, data.to_vec());
        self.stats.buffers_created += 1;
        Ok(BufferHandle(id))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero size",
                desc.label
            )));
        }
        log::trace!(
            "SoftwareBackend: creating texture {:?} ({}x{} {:?})",
            desc.label,
            desc.width,
            desc.height,
            desc.format
        );
        if self.texture_limit.is_some_and(|limit| self.live_textures() >= limit) {
            log::error!("SoftwareBackend: texture limit reached creating {:?}", desc.label);
            return Err(BackendError::OutOfMemory);
        }
        let id = self.allocate_id();
        self.textures.insert(id, CpuTexture::new(desc));
        self.stats.textures_created += 1;
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        match self.textures.get_mut(&texture.0) {
            Some(target) => {
                if let Err(e) = target.write_bytes(data, width, height) {
                    log::error!("write_texture: {}", e);
                }
            }
            None => log::error!("write_texture: unknown texture {:?}", texture),
        }
    }

    fn texture_info(&self, texture: TextureHandle) -> Option<TextureInfo> {
        self.textures.get(&texture.0).map(|t| t.info)
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let layout = Arc::new(ParameterLayout::new(&desc.uniforms, &desc.textures));
        reflect::compile_and_link(desc, &layout)?;
        let kernel = desc
            .kernel
            .clone()
            .ok_or_else(|| BackendError::ProgramLinkFailed {
                label: desc.label.clone(),
                reason: "no CPU kernel for the software backend".to_string(),
            })?;

        let id = self.allocate_id();
        self.programs.insert(
            id,
            CpuProgram {
                label: desc.label.clone(),
                kernel,
                layout,
                depth: desc.depth,
                cull: desc.cull_mode,
                has_fragment: desc.fragment_entry.is_some(),
            },
        );
        self.stats.programs_created += 1;
        log::debug!("SoftwareBackend: linked program '{}'", desc.label);
        Ok(ProgramHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if self.pass.is_some() {
            log::warn!("render pass {:?} begun inside another pass", desc.label);
        }

        let mut size = None;
        if let Some(attachment) = &desc.color_attachment {
            if let Some(texture) = self.textures.get_mut(&attachment.texture.0) {
                if let LoadOp::Clear(c) = attachment.load_op {
                    texture.fill(Vec4::from_array(c));
                }
                size = Some((texture.info.width, texture.info.height));
            }
        }
        if let Some(attachment) = &desc.depth_attachment {
            if let Some(texture) = self.textures.get_mut(&attachment.texture.0) {
                if let LoadOp::Clear(d) = attachment.load_op {
                    texture.fill(Vec4::new(d, 0.0, 0.0, 1.0));
                }
                size = size.or(Some((texture.info.width, texture.info.height)));
            }
        }
        let (width, height) = size.unwrap_or((self.width, self.height));

        self.pass = Some(ActivePass {
            label: desc.label.clone(),
            color: desc.color_attachment.as_ref().map(|a| a.texture),
            depth: desc.depth_attachment.as_ref().map(|a| a.texture),
            viewport: Viewport::full(width, height),
            program: None,
            parameters: None,
            vertex_streams: Vec::new(),
            index: None,
        });
    }

    fn end_render_pass(&mut self) {
        if self.pass.take().is_none() {
            log::warn!("end_render_pass without an open pass");
        }
    }

    fn set_program(&mut self, program: ProgramHandle) {
        if let Some(pass) = &mut self.pass {
            pass.program = Some(program);
            pass.parameters = None;
        }
    }

    fn set_parameters(&mut self, parameters: &ParameterBlock) {
        if let Some(pass) = &mut self.pass {
            pass.parameters = Some(parameters.clone());
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, layout: &VertexBufferLayout) {
        if let Some(pass) = &mut self.pass {
            let slot = slot as usize;
            if pass.vertex_streams.len() <= slot {
                pass.vertex_streams.resize(slot + 1, None);
            }
            pass.vertex_streams[slot] = Some(VertexStream {
                buffer,
                layout: layout.clone(),
            });
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat) {
        if let Some(pass) = &mut self.pass {
            pass.index = Some((buffer, format));
        }
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        if let Some(pass) = &mut self.pass {
            pass.viewport = Viewport {
                x,
                y,
                width,
                height,
            };
        }
    }

    fn draw(&mut self, vertices: Range<u32>) {
        self.submit(vertices.collect());
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32) {
        let Some((buffer, format)) = self.pass.as_ref().and_then(|p| p.index) else {
            log::warn!("draw_indexed without an index buffer");
            return;
        };
        let Some(resolved) = self.read_indices(buffer, format, indices) else {
            log::error!("draw_indexed reads past the end of the index buffer");
            return;
        };
        let resolved = resolved
            .into_iter()
            .map(|i| (i as i64 + base_vertex as i64).max(0) as u32)
            .collect();
        self.submit(resolved);
    }

    fn copy_texture(&mut self, source: TextureHandle, destination: TextureHandle) {
        let Some(src) = self.textures.get(&source.0).cloned() else {
            log::error!("copy_texture: unknown source {:?}", source);
            return;
        };
        match self.textures.get_mut(&destination.0) {
            Some(dst)
                if dst.info.width == src.info.width
                    && dst.info.height == src.info.height
                    && dst.info.format == src.info.format =>
            {
                dst.copy_from(&src);
            }
            Some(dst) => log::error!(
                "copy_texture: {:?} {}x{} {:?} does not match {:?} {}x{} {:?}",
                source,
                src.info.width,
                src.info.height,
                src.info.format,
                destination,
                dst.info.width,
                dst.info.height,
                dst.info.format
            ),
            None => log::error!("copy_texture: unknown destination {:?}", destination),
        }
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<TextureReadback> {
        self.textures
            .get(&texture.0)
            .map(CpuTexture::readback)
            .ok_or_else(|| BackendError::ReadbackFailed(format!("unknown texture {:?}", texture)))
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if texture == self.surface {
            log::warn!("the surface texture cannot be destroyed");
            return;
        }
        self.textures.remove(&texture.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::parameters::ParameterType;

    const SOURCE: &str = r#"
struct Params {
    color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> params: Params;

@vertex
fn vs_main(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return vec4<f32>(position, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return params.color;
}
"#;

    struct Solid;

    impl ProgramKernel for Solid {
        fn vertex(&self, input: &VertexInput, _params: &ParameterBlock) -> VertexOutput {
            VertexOutput {
                position: input.vec3(POSITION_LOCATION).extend(1.0),
                varyings: Varyings::default(),
            }
        }

        fn fragment(&self, _: &FragmentInput, params: &ParameterBlock, _: &TextureUnits<'_>) -> Vec4 {
            params.vec4("color")
        }
    }

    fn program(backend: &mut SoftwareBackend) -> (ProgramHandle, Arc<ParameterLayout>) {
        let desc = ProgramDescriptor::new("solid", SOURCE)
            .bind_attribute(POSITION_LOCATION, "position")
            .uniform("color", ParameterType::Vec4)
            .depth(DepthMode::DISABLED)
            .kernel(Arc::new(Solid));
        let layout = Arc::new(ParameterLayout::new(&desc.uniforms, &desc.textures));
        (backend.create_program(&desc).unwrap(), layout)
    }

    fn fullscreen_triangle(backend: &mut SoftwareBackend) -> BufferHandle {
        let positions: [f32; 9] = [-1.0, -1.0, 0.0, 3.0, -1.0, 0.0, -1.0, 3.0, 0.0];
        backend
            .create_buffer_init(
                &BufferDescriptor {
                    label: None,
                    size: 36,
                    usage: BufferUsage::VERTEX,
                },
                bytemuck::cast_slice(&positions),
            )
            .unwrap()
    }

    fn position_layout() -> VertexBufferLayout {
        VertexBufferLayout {
            array_stride: 12,
            attributes: vec![VertexAttribute {
                location: POSITION_LOCATION,
                format: VertexFormat::Float32x3,
                offset: 0,
            }],
        }
    }

    #[test]
    fn test_clear_and_draw_fill_the_surface() {
        let mut backend = SoftwareBackend::new(4, 4);
        let (program, layout) = program(&mut backend);
        let buffer = fullscreen_triangle(&mut backend);
        let frame = backend.begin_frame().unwrap();

        let mut params = layout.block();
        params.set("color", Vec4::new(0.0, 1.0, 0.0, 1.0)).unwrap();

        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some("test".to_string()),
            color_attachment: Some(ColorAttachment {
                texture: frame.surface,
                load_op: LoadOp::Clear([1.0, 0.0, 0.0, 1.0]),
            }),
            depth_attachment: None,
        });
        backend.set_program(program);
        backend.set_parameters(&params);
        backend.set_vertex_buffer(0, buffer, &position_layout());
        backend.draw(0..3);
        backend.end_render_pass();
        backend.end_frame().unwrap();

        let pixels = backend.read_texture(frame.surface).unwrap();
        assert!(pixels.texels.iter().all(|t| *t == Vec4::new(0.0, 1.0, 0.0, 1.0)));
        assert_eq!(backend.stats().draw_calls, 1);
        assert_eq!(backend.stats().frames_presented, 1);
    }

    #[test]
    fn test_program_without_kernel_fails_to_link() {
        let mut backend = SoftwareBackend::new(4, 4);
        let desc = ProgramDescriptor::new("no-kernel", SOURCE)
            .bind_attribute(POSITION_LOCATION, "position")
            .uniform("color", ParameterType::Vec4);
        assert!(matches!(
            backend.create_program(&desc),
            Err(BackendError::ProgramLinkFailed { .. })
        ));
    }

    #[test]
    fn test_copy_requires_matching_textures() {
        let mut backend = SoftwareBackend::new(2, 2);
        let desc = TextureDescriptor {
            width: 2,
            height: 2,
            format: TextureFormat::Rgba8UnormSrgb,
            ..Default::default()
        };
        let copy = backend.create_texture(&desc).unwrap();
        let small = backend
            .create_texture(&TextureDescriptor {
                width: 1,
                ..desc.clone()
            })
            .unwrap();

        backend.begin_render_pass(&RenderPassDescriptor {
            label: None,
            color_attachment: Some(ColorAttachment {
                texture: TextureHandle(0),
                load_op: LoadOp::Clear([1.0, 1.0, 1.0, 1.0]),
            }),
            depth_attachment: None,
        });
        backend.end_render_pass();

        backend.copy_texture(TextureHandle(0), copy);
        backend.copy_texture(TextureHandle(0), small);
        assert_eq!(backend.read_texture(copy).unwrap().texel(1, 1), Vec4::ONE);
        assert_eq!(backend.read_texture(small).unwrap().texel(0, 0), Vec4::ZERO);
    }
}
