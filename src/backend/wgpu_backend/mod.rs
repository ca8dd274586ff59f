//! wgpu backend implementation
//!
//! Commands are buffered per render pass and encoded when the pass ends, so
//! every draw carries its own program, parameter block and vertex streams.
//! Uniform blocks are sub-allocated from a frame-wide buffer and bound with
//! dynamic offsets. Pipelines are created on first use for each combination
//! of program, vertex layouts and attachment formats.

mod convert;
mod uniforms;

use crate::backend::parameters::{ParameterBlock, ParameterLayout, TextureKind, UNIFORM_BINDING};
use crate::backend::reflect;
use crate::backend::traits::*;
use crate::backend::types::*;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::ops::Range;
use std::sync::Arc;
use uniforms::UniformArena;
use wgpu::util::DeviceExt;

/// Handle of the texture presented at the end of each frame
const SURFACE: TextureHandle = TextureHandle(0);

/// Headless surfaces use this format
const HEADLESS_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    info: TextureInfo,
}

struct GpuProgram {
    label: String,
    module: wgpu::ShaderModule,
    layout: Arc<ParameterLayout>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    vertex_entry: String,
    fragment_entry: Option<String>,
    depth: DepthMode,
    cull: CullMode,
}

/// Everything a render pipeline depends on besides the program's fixed state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u64,
    vertex_layouts: Vec<Option<VertexBufferLayout>>,
    color: Option<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
}

#[derive(Clone)]
enum DrawCall {
    Vertices(Range<u32>),
    Indexed { indices: Range<u32>, base_vertex: i32 },
}

/// A draw with all of its state resolved at record time
struct RecordedDraw {
    pipeline: PipelineKey,
    uniform_buffer: usize,
    uniform_offset: u32,
    textures: Vec<Option<TextureHandle>>,
    vertex_buffers: Vec<Option<BufferHandle>>,
    index: Option<(BufferHandle, IndexFormat)>,
    viewport: Option<[f32; 4]>,
    call: DrawCall,
}

/// Pending render pass with buffered draws
struct PendingRenderPass {
    descriptor: RenderPassDescriptor,
    color_format: Option<wgpu::TextureFormat>,
    depth_format: Option<wgpu::TextureFormat>,
    program: Option<ProgramHandle>,
    parameters: Option<ParameterBlock>,
    vertex_streams: Vec<Option<(BufferHandle, VertexBufferLayout)>>,
    index: Option<(BufferHandle, IndexFormat)>,
    viewport: Option<[f32; 4]>,
    draws: Vec<RecordedDraw>,
}

/// Where frames go
enum Presentation {
    Window {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
        frame: Option<(wgpu::SurfaceTexture, wgpu::TextureView)>,
    },
    Headless {
        target: GpuTexture,
    },
}

/// wgpu backend implementation
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    #[allow(dead_code)]
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    presentation: Presentation,

    // Resource storage
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, GpuTexture>,
    programs: HashMap<u64, GpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    samplers: HashMap<SamplerDescriptor, wgpu::Sampler>,
    next_id: u64,

    /// Bound in place of unset color slots
    white_texture: GpuTexture,
    /// Bound in place of unset depth slots; cleared to 1.0
    far_depth_texture: GpuTexture,

    uniforms: UniformArena,
    encoder: Option<wgpu::CommandEncoder>,
    pending_render_pass: Option<PendingRenderPass>,
}

impl WgpuBackend {
    /// Create a backend presenting to `window`
    pub fn new(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        pollster::block_on(Self::new_async(window, vsync))
    }

    /// Create a backend that renders into an offscreen surface texture
    pub fn headless(width: u32, height: u32) -> BackendResult<Self> {
        pollster::block_on(Self::headless_async(width, height))
    }

    pub async fn new_async(window: Arc<winit::window::Window>, vsync: bool) -> BackendResult<Self> {
        let instance = Self::create_instance();
        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| BackendError::SurfaceCreationFailed(e.to_string()))?;
        let (adapter, device, queue) = Self::request_device(&instance, Some(&surface)).await?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .filter(|f| convert::texture_format_back(*f).is_some())
            .find(|f| f.is_srgb())
            .or_else(|| {
                caps.formats
                    .iter()
                    .copied()
                    .find(|f| convert::texture_format_back(*f).is_some())
            })
            .ok_or_else(|| BackendError::SurfaceCreationFailed("no supported surface format".into()))?;
        let alpha_mode = caps
            .alpha_modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto);

        let size = window.inner_size();
        let (width, height) = Self::clamp_size(&device, size.width, size.height);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::info!("Surface configured: {}x{} {:?}", width, height, format);

        Ok(Self::assemble(
            instance,
            adapter,
            device,
            queue,
            Presentation::Window {
                surface,
                config,
                frame: None,
            },
        ))
    }

    pub async fn headless_async(width: u32, height: u32) -> BackendResult<Self> {
        let instance = Self::create_instance();
        let (adapter, device, queue) = Self::request_device(&instance, None).await?;
        let (width, height) = Self::clamp_size(&device, width, height);
        let target = Self::allocate_texture(&device, &headless_descriptor(width, height));
        log::info!("Headless surface: {}x{}", width, height);
        Ok(Self::assemble(
            instance,
            adapter,
            device,
            queue,
            Presentation::Headless { target },
        ))
    }

    fn create_instance() -> wgpu::Instance {
        wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all()),
            ..Default::default()
        })
    }

    async fn request_device(
        instance: &wgpu::Instance,
        surface: Option<&wgpu::Surface<'static>>,
    ) -> BackendResult<(wgpu::Adapter, wgpu::Device, wgpu::Queue)> {
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: surface,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let info = adapter.get_info();
        log::info!("Selected GPU: {} ({:?} backend)", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("render-labs device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("wgpu validation error: {}", error);
        }));

        Ok((adapter, device, queue))
    }

    fn assemble(
        instance: wgpu::Instance,
        adapter: wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        presentation: Presentation,
    ) -> Self {
        let white_texture = Self::allocate_texture(
            &device,
            &TextureDescriptor {
                label: Some("default white".to_string()),
                ..Default::default()
            },
        );
        queue.write_texture(
            white_texture.texture.as_image_copy(),
            &[255; 4],
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d::default(),
        );

        let far_depth_texture = Self::allocate_texture(
            &device,
            &TextureDescriptor {
                label: Some("default depth".to_string()),
                format: TextureFormat::Depth32Float,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                ..Default::default()
            },
        );
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("clear default depth"),
        });
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("clear default depth"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &far_depth_texture.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        queue.submit(std::iter::once(encoder.finish()));

        let uniforms = UniformArena::new(&device);

        Self {
            instance,
            adapter,
            device,
            queue,
            presentation,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            samplers: HashMap::new(),
            next_id: 1,
            white_texture,
            far_depth_texture,
            uniforms,
            encoder: None,
            pending_render_pass: None,
        }
    }

    /// Clamp to device limits while maintaining aspect ratio
    fn clamp_size(device: &wgpu::Device, width: u32, height: u32) -> (u32, u32) {
        let max_size = device.limits().max_texture_dimension_2d;
        let (width, height) = (width.max(1), height.max(1));
        if width > max_size || height > max_size {
            let scale = (max_size as f32 / width as f32).min(max_size as f32 / height as f32);
            (
                ((width as f32 * scale) as u32).max(1),
                ((height as f32 * scale) as u32).max(1),
            )
        } else {
            (width, height)
        }
    }

    fn allocate_texture(device: &wgpu::Device, desc: &TextureDescriptor) -> GpuTexture {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: convert::texture_format(desc.format),
            usage: convert::texture_usage(desc.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture {
            texture,
            view,
            info: TextureInfo {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                usage: desc.usage,
            },
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn gpu_texture(&self, handle: TextureHandle) -> Option<&GpuTexture> {
        if handle == SURFACE {
            return match &self.presentation {
                Presentation::Headless { target } => Some(target),
                Presentation::Window { .. } => None,
            };
        }
        self.textures.get(&handle.0)
    }

    fn view(&self, handle: TextureHandle) -> Option<&wgpu::TextureView> {
        match (&self.presentation, handle == SURFACE) {
            (Presentation::Window { frame, .. }, true) => frame.as_ref().map(|(_, view)| view),
            _ => self.gpu_texture(handle).map(|t| &t.view),
        }
    }

    fn sampler(&mut self, desc: &SamplerDescriptor) -> &wgpu::Sampler {
        let device = &self.device;
        self.samplers
            .entry(desc.clone())
            .or_insert_with(|| device.create_sampler(&convert::sampler(desc)))
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        let device = &self.device;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            })
        })
    }

    /// Submit everything recorded so far
    fn submit(&mut self) -> Option<wgpu::SubmissionIndex> {
        if self.pending_render_pass.is_some() {
            log::warn!("submitting with an open render pass; ending it");
            self.end_render_pass();
        }
        let encoder = self.encoder.take()?;
        let index = self.queue.submit(std::iter::once(encoder.finish()));
        self.uniforms.reset();
        Some(index)
    }

    fn create_pipeline(&self, key: &PipelineKey) -> Option<wgpu::RenderPipeline> {
        let program = self.programs.get(&key.program)?;

        let attributes: Vec<Vec<wgpu::VertexAttribute>> = key
            .vertex_layouts
            .iter()
            .map(|layout| {
                layout
                    .iter()
                    .flat_map(|l| &l.attributes)
                    .map(|a| wgpu::VertexAttribute {
                        format: convert::vertex_format(a.format),
                        offset: a.offset,
                        shader_location: a.location,
                    })
                    .collect()
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = key
            .vertex_layouts
            .iter()
            .zip(&attributes)
            .map(|(layout, attributes)| wgpu::VertexBufferLayout {
                array_stride: layout.as_ref().map_or(0, |l| l.array_stride),
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes,
            })
            .collect();

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color
            .map(|format| {
                vec![Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })]
            })
            .unwrap_or_default();

        let depth_stencil = key.depth.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: program.depth.write,
            depth_compare: if program.depth.test {
                wgpu::CompareFunction::Less
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        log::debug!(
            "Creating pipeline for '{}' (color {:?}, depth {:?})",
            program.label,
            key.color,
            key.depth
        );

        Some(self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&program.label),
            layout: Some(&program.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &program.module,
                entry_point: &program.vertex_entry,
                buffers: &vertex_buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: program.fragment_entry.as_deref().map(|entry_point| wgpu::FragmentState {
                module: &program.module,
                entry_point,
                targets: &color_targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: convert::cull_mode(program.cull),
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        }))
    }

    /// Resolve the current state of the open pass into a recorded draw
    fn record(&mut self, call: DrawCall) {
        let Some(pass) = &self.pending_render_pass else {
            log::warn!("draw issued outside of a render pass");
            return;
        };
        let Some(program_handle) = pass.program else {
            log::warn!("draw issued without a program in pass {:?}", pass.descriptor.label);
            return;
        };
        let Some(program) = self.programs.get(&program_handle.0) else {
            log::warn!("draw issued with unknown program {:?}", program_handle);
            return;
        };

        let parameters = pass
            .parameters
            .clone()
            .unwrap_or_else(|| program.layout.block());
        let key = PipelineKey {
            program: program_handle.0,
            vertex_layouts: pass
                .vertex_streams
                .iter()
                .map(|s| s.as_ref().map(|(_, layout)| layout.clone()))
                .collect(),
            color: pass.color_format,
            depth: pass.depth_format,
        };
        let vertex_buffers = pass
            .vertex_streams
            .iter()
            .map(|s| s.as_ref().map(|(buffer, _)| *buffer))
            .collect();
        let (index, viewport) = (pass.index, pass.viewport);

        if !self.pipelines.contains_key(&key) {
            let Some(pipeline) = self.create_pipeline(&key) else {
                return;
            };
            self.pipelines.insert(key.clone(), pipeline);
        }

        let (uniform_buffer, uniform_offset) = self.uniforms.push(&self.device, &self.queue, parameters.bytes());
        let draw = RecordedDraw {
            pipeline: key,
            uniform_buffer,
            uniform_offset,
            textures: parameters.textures().to_vec(),
            vertex_buffers,
            index,
            viewport,
            call,
        };
        if let Some(pass) = &mut self.pending_render_pass {
            pass.draws.push(draw);
        }
    }

    fn create_bind_group(&self, draw: &RecordedDraw) -> Option<wgpu::BindGroup> {
        let program = self.programs.get(&draw.pipeline.program)?;
        let uniform_buffer = self.uniforms.buffer(draw.uniform_buffer)?;

        let mut entries = vec![wgpu::BindGroupEntry {
            binding: UNIFORM_BINDING,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: uniform_buffer,
                offset: 0,
                size: NonZeroU64::new(program.layout.size() as u64),
            }),
        }];

        for slot in program.layout.textures() {
            let bound = draw
                .textures
                .get(slot.unit as usize)
                .copied()
                .flatten()
                .and_then(|handle| self.view(handle));
            let view = bound.unwrap_or(match slot.kind {
                TextureKind::Color => &self.white_texture.view,
                TextureKind::Depth => &self.far_depth_texture.view,
            });
            entries.push(wgpu::BindGroupEntry {
                binding: slot.texture_binding(),
                resource: wgpu::BindingResource::TextureView(view),
            });
            entries.push(wgpu::BindGroupEntry {
                binding: slot.sampler_binding(),
                resource: wgpu::BindingResource::Sampler(self.samplers.get(&slot.sampler)?),
            });
        }

        Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&program.label),
            layout: &program.bind_group_layout,
            entries: &entries,
        }))
    }
}

fn headless_descriptor(width: u32, height: u32) -> TextureDescriptor {
    TextureDescriptor {
        label: Some("headless surface".to_string()),
        width,
        height,
        format: HEADLESS_FORMAT,
        usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::COPY_SRC | TextureUsage::TEXTURE_BINDING,
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        let (width, height) = Self::clamp_size(&self.device, width, height);
        match &mut self.presentation {
            Presentation::Window { surface, config, .. } => {
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            Presentation::Headless { target } => {
                *target = Self::allocate_texture(&self.device, &headless_descriptor(width, height));
            }
        }
    }

    fn surface_size(&self) -> (u32, u32) {
        match &self.presentation {
            Presentation::Window { config, .. } => (config.width, config.height),
            Presentation::Headless { target } => (target.info.width, target.info.height),
        }
    }

    fn surface_format(&self) -> TextureFormat {
        match &self.presentation {
            Presentation::Window { config, .. } => {
                convert::texture_format_back(config.format).unwrap_or(TextureFormat::Bgra8UnormSrgb)
            }
            Presentation::Headless { target } => target.info.format,
        }
    }

    fn begin_frame(&mut self) -> BackendResult<FrameContext> {
        if let Presentation::Window { surface, config, frame } = &mut self.presentation {
            let output = match surface.get_current_texture() {
                Ok(output) => output,
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    log::warn!("Surface lost; reconfiguring");
                    surface.configure(&self.device, config);
                    return Err(BackendError::SurfaceLost);
                }
                Err(wgpu::SurfaceError::OutOfMemory) => return Err(BackendError::OutOfMemory),
                Err(e) => return Err(BackendError::AcquireImageFailed(e.to_string())),
            };
            let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());
            *frame = Some((output, view));
        }

        let (width, height) = self.surface_size();
        self.encoder();
        Ok(FrameContext {
            surface: SURFACE,
            width,
            height,
        })
    }

    fn end_frame(&mut self) -> BackendResult<()> {
        self.submit();
        if let Presentation::Window { frame, .. } = &mut self.presentation {
            if let Some((output, view)) = frame.take() {
                drop(view);
                output.present();
            }
        }
        Ok(())
    }

    fn create_buffer_init(&mut self, desc: &BufferDescriptor, data: &[u8]) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: convert::buffer_usage(desc.usage),
        });
        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let max_size = self.device.limits().max_texture_dimension_2d;
        if desc.width == 0 || desc.height == 0 || desc.width > max_size || desc.height > max_size {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?}: size {}x{} outside 1..={}",
                desc.label, desc.width, desc.height, max_size
            )));
        }
        let texture = Self::allocate_texture(&self.device, desc);
        let id = self.allocate_id();
        self.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32) {
        let Some(target) = self.gpu_texture(texture) else {
            log::error!("write_texture: unknown texture {:?}", texture);
            return;
        };
        self.queue.write_texture(
            target.texture.as_image_copy(),
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * target.info.format.bytes_per_pixel()),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn texture_info(&self, texture: TextureHandle) -> Option<TextureInfo> {
        match (&self.presentation, texture == SURFACE) {
            (Presentation::Window { config, .. }, true) => Some(TextureInfo {
                width: config.width,
                height: config.height,
                format: self.surface_format(),
                usage: TextureUsage::RENDER_ATTACHMENT,
            }),
            _ => self.gpu_texture(texture).map(|t| t.info),
        }
    }

    fn create_program(&mut self, desc: &ProgramDescriptor) -> BackendResult<ProgramHandle> {
        let layout = Arc::new(ParameterLayout::new(&desc.uniforms, &desc.textures));
        reflect::compile_and_link(desc, &layout)?;

        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.as_str().into()),
        });

        let visibility = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let mut entries = vec![wgpu::BindGroupLayoutEntry {
            binding: UNIFORM_BINDING,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(layout.size() as u64),
            },
            count: None,
        }];
        for slot in layout.textures() {
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot.texture_binding(),
                visibility,
                ty: convert::texture_binding(slot.kind),
                count: None,
            });
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: slot.sampler_binding(),
                visibility,
                ty: convert::sampler_binding(slot.kind),
                count: None,
            });
            self.sampler(&slot.sampler);
        }

        let bind_group_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&desc.label),
                entries: &entries,
            });
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&desc.label),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });

        let id = self.allocate_id();
        self.programs.insert(
            id,
            GpuProgram {
                label: desc.label.clone(),
                module,
                layout,
                bind_group_layout,
                pipeline_layout,
                vertex_entry: desc.vertex_entry.clone(),
                fragment_entry: desc.fragment_entry.clone(),
                depth: desc.depth,
                cull: desc.cull_mode,
            },
        );
        log::debug!("wgpu: linked program '{}'", desc.label);
        Ok(ProgramHandle(id))
    }

    fn begin_render_pass(&mut self, desc: &RenderPassDescriptor) {
        if self.pending_render_pass.is_some() {
            log::warn!("render pass {:?} begun inside another pass", desc.label);
            self.end_render_pass();
        }
        let format_of = |texture: TextureHandle| {
            self.texture_info(texture)
                .map(|info| convert::texture_format(info.format))
        };
        self.pending_render_pass = Some(PendingRenderPass {
            descriptor: desc.clone(),
            color_format: desc.color_attachment.as_ref().and_then(|a| format_of(a.texture)),
            depth_format: desc.depth_attachment.as_ref().and_then(|a| format_of(a.texture)),
            program: None,
            parameters: None,
            vertex_streams: Vec::new(),
            index: None,
            viewport: None,
            draws: Vec::new(),
        });
    }

    fn end_render_pass(&mut self) {
        let Some(pending) = self.pending_render_pass.take() else {
            log::warn!("end_render_pass without an open pass");
            return;
        };

        let bind_groups: Vec<Option<wgpu::BindGroup>> =
            pending.draws.iter().map(|d| self.create_bind_group(d)).collect();

        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            })
        });

        {
            let color_view = pending
                .descriptor
                .color_attachment
                .as_ref()
                .and_then(|a| self.view(a.texture).map(|view| (view, a.load_op)));
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = color_view
                .map(|(view, load_op)| {
                    Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: convert::color_load(load_op),
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .into_iter()
                .collect();

            let depth_attachment = pending.descriptor.depth_attachment.as_ref().and_then(|a| {
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view: self.view(a.texture)?,
                    depth_ops: Some(wgpu::Operations {
                        load: convert::depth_load(a.load_op),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                })
            });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: pending.descriptor.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for (draw, bind_group) in pending.draws.iter().zip(&bind_groups) {
                let (Some(pipeline), Some(bind_group)) = (self.pipelines.get(&draw.pipeline), bind_group) else {
                    continue;
                };
                render_pass.set_pipeline(pipeline);
                render_pass.set_bind_group(0, bind_group, &[draw.uniform_offset]);
                for (slot, buffer) in draw.vertex_buffers.iter().enumerate() {
                    if let Some(buffer) = buffer.and_then(|b| self.buffers.get(&b.0)) {
                        render_pass.set_vertex_buffer(slot as u32, buffer.slice(..));
                    }
                }
                if let Some([x, y, width, height]) = draw.viewport {
                    render_pass.set_viewport(x, y, width, height, 0.0, 1.0);
                }
                match &draw.call {
                    DrawCall::Vertices(vertices) => render_pass.draw(vertices.clone(), 0..1),
                    DrawCall::Indexed { indices, base_vertex } => {
                        let Some((buffer, format)) = draw.index else {
                            continue;
                        };
                        let Some(buffer) = self.buffers.get(&buffer.0) else {
                            continue;
                        };
                        render_pass.set_index_buffer(buffer.slice(..), convert::index_format(format));
                        render_pass.draw_indexed(indices.clone(), *base_vertex, 0..1);
                    }
                }
            }
        }

        log::trace!(
            "wgpu: encoded pass {:?} with {} draws",
            pending.descriptor.label,
            pending.draws.len()
        );
        self.encoder = Some(encoder);
    }

    fn set_program(&mut self, program: ProgramHandle) {
        if let Some(pass) = &mut self.pending_render_pass {
            if pass.program != Some(program) {
                pass.parameters = None;
            }
            pass.program = Some(program);
        }
    }

    fn set_parameters(&mut self, parameters: &ParameterBlock) {
        if let Some(pass) = &mut self.pending_render_pass {
            pass.parameters = Some(parameters.clone());
        }
    }

    fn set_vertex_buffer(&mut self, slot: u32, buffer: BufferHandle, layout: &VertexBufferLayout) {
        if let Some(pass) = &mut self.pending_render_pass {
            let slot = slot as usize;
            if pass.vertex_streams.len() <= slot {
                pass.vertex_streams.resize(slot + 1, None);
            }
            pass.vertex_streams[slot] = Some((buffer, layout.clone()));
        }
    }

    fn set_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat) {
        if let Some(pass) = &mut self.pending_render_pass {
            pass.index = Some((buffer, format));
        }
    }

    fn set_viewport(&mut self, x: f32, y: f32, width: f32, height: f32) {
        if let Some(pass) = &mut self.pending_render_pass {
            pass.viewport = Some([x, y, width, height]);
        }
    }

    fn draw(&mut self, vertices: Range<u32>) {
        self.record(DrawCall::Vertices(vertices));
    }

    fn draw_indexed(&mut self, indices: Range<u32>, base_vertex: i32) {
        if self.pending_render_pass.as_ref().is_some_and(|p| p.index.is_none()) {
            log::warn!("draw_indexed without an index buffer");
            return;
        }
        self.record(DrawCall::Indexed { indices, base_vertex });
    }

    fn copy_texture(&mut self, source: TextureHandle, destination: TextureHandle) {
        let (Some(src), Some(dst)) = (self.texture_info(source), self.texture_info(destination)) else {
            log::error!("copy_texture: unknown texture {:?} or {:?}", source, destination);
            return;
        };
        if (src.width, src.height, src.format) != (dst.width, dst.height, dst.format)
            || !src.usage.contains(TextureUsage::COPY_SRC)
            || !dst.usage.contains(TextureUsage::COPY_DST)
        {
            log::error!("copy_texture: {:?} {:?} cannot be copied into {:?} {:?}", source, src, destination, dst);
            return;
        }
        if self.pending_render_pass.is_some() {
            log::warn!("copy_texture inside a render pass; ending the pass");
            self.end_render_pass();
        }

        // Held outside `self` so the texture lookups can borrow it
        let mut encoder = self.encoder.take().unwrap_or_else(|| {
            self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame encoder"),
            })
        });
        match (self.gpu_texture(source), self.gpu_texture(destination)) {
            (Some(src_texture), Some(dst_texture)) => encoder.copy_texture_to_texture(
                src_texture.texture.as_image_copy(),
                dst_texture.texture.as_image_copy(),
                wgpu::Extent3d {
                    width: src.width,
                    height: src.height,
                    depth_or_array_layers: 1,
                },
            ),
            _ => log::error!("copy_texture: {:?} or {:?} has no GPU texture", source, destination),
        }
        self.encoder = Some(encoder);
    }

    fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<TextureReadback> {
        self.submit();

        let target = self
            .gpu_texture(texture)
            .ok_or_else(|| BackendError::ReadbackFailed(format!("{:?} cannot be read back", texture)))?;
        let info = target.info;
        if !info.usage.contains(TextureUsage::COPY_SRC) {
            return Err(BackendError::ReadbackFailed(format!("{:?} lacks COPY_SRC usage", texture)));
        }

        let bytes_per_pixel = info.format.bytes_per_pixel();
        let unpadded = info.width * bytes_per_pixel;
        let padded = unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback staging"),
            size: (padded * info.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: if info.format.is_depth() {
                    wgpu::TextureAspect::DepthOnly
                } else {
                    wgpu::TextureAspect::All
                },
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(info.height),
                },
            },
            wgpu::Extent3d {
                width: info.width,
                height: info.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(BackendError::ReadbackFailed(e.to_string())),
            Err(e) => return Err(BackendError::ReadbackFailed(e.to_string())),
        }

        let texels = {
            let mapped = slice.get_mapped_range();
            mapped
                .chunks_exact(padded as usize)
                .flat_map(|row| {
                    row[..unpadded as usize]
                        .chunks_exact(bytes_per_pixel as usize)
                        .map(|bytes| info.format.decode_texel(bytes))
                })
                .collect()
        };
        staging.unmap();

        Ok(TextureReadback {
            width: info.width,
            height: info.height,
            format: info.format,
            texels,
        })
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buffer) = self.buffers.remove(&buffer.0) {
            buffer.destroy();
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if texture == SURFACE {
            log::warn!("the surface texture cannot be destroyed");
            return;
        }
        if let Some(texture) = self.textures.remove(&texture.0) {
            texture.texture.destroy();
        }
    }
}
