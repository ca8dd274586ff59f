//! GPU-resident geometry and the fixed quads used by post-processing

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::material::Material;
use crate::resources::mesh::Mesh;
use crate::resources::program::ActiveProgram;
use glam::{Mat4, Vec2, Vec3};
use std::ops::Range;

/// One vertex buffer and the attributes it feeds
#[derive(Debug, Clone)]
pub struct VertexStream {
    pub slot: u32,
    pub layout: VertexBufferLayout,
    pub buffer: BufferHandle,
}

#[derive(Debug, Clone)]
pub struct IndexStream {
    pub buffer: BufferHandle,
    pub format: IndexFormat,
    pub count: u32,
}

/// Vertex and index buffers of a mesh, uploaded once
#[derive(Debug, Clone)]
pub struct Drawable {
    label: String,
    streams: Vec<VertexStream>,
    index: Option<IndexStream>,
    vertex_count: u32,
}

impl Drawable {
    /// Upload vertex streams (bound at slots 0, 1, ...) and optional indices
    pub fn upload(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        streams: &[(VertexBufferLayout, &[u8])],
        indices: Option<&[u32]>,
    ) -> BackendResult<Self> {
        let mut uploaded = Vec::with_capacity(streams.len());
        let mut vertex_count = u32::MAX;

        for (slot, (layout, bytes)) in streams.iter().enumerate() {
            let buffer = backend.create_buffer_init(
                &BufferDescriptor {
                    label: Some(format!("{label} vertices {slot}")),
                    size: bytes.len() as u64,
                    usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
                },
                bytes,
            )?;
            if layout.array_stride > 0 {
                vertex_count = vertex_count.min((bytes.len() as u64 / layout.array_stride) as u32);
            }
            uploaded.push(VertexStream {
                slot: slot as u32,
                layout: layout.clone(),
                buffer,
            });
        }

        let index = match indices {
            Some(indices) => Some(IndexStream {
                buffer: backend.create_buffer_init(
                    &BufferDescriptor {
                        label: Some(format!("{label} indices")),
                        size: (indices.len() * 4) as u64,
                        usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
                    },
                    bytemuck::cast_slice(indices),
                )?,
                format: IndexFormat::Uint32,
                count: indices.len() as u32,
            }),
            None => None,
        };

        Ok(Self {
            label: label.to_string(),
            streams: uploaded,
            index,
            vertex_count: if vertex_count == u32::MAX { 0 } else { vertex_count },
        })
    }

    /// Upload a mesh as one interleaved stream of position, normal and uv
    pub fn from_mesh(backend: &mut dyn GraphicsBackend, mesh: &Mesh) -> BackendResult<Self> {
        Self::upload(
            backend,
            &mesh.name,
            &[(Vertex::layout(), mesh.vertex_bytes())],
            Some(&mesh.indices),
        )
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn streams(&self) -> &[VertexStream] {
        &self.streams
    }

    pub fn index(&self) -> Option<&IndexStream> {
        self.index.as_ref()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Every buffer owned by this drawable
    pub fn buffers(&self) -> Vec<BufferHandle> {
        self.streams
            .iter()
            .map(|s| s.buffer)
            .chain(self.index.as_ref().map(|i| i.buffer))
            .collect()
    }

    /// Draw the whole drawable with the program's current parameters
    pub fn draw(&self, backend: &mut dyn GraphicsBackend, program: &ActiveProgram) {
        program.draw(backend, self);
    }

    /// Draw a submesh
    pub fn draw_range(&self, backend: &mut dyn GraphicsBackend, program: &ActiveProgram, indices: Range<u32>) {
        program.draw_range(backend, self, indices);
    }

    pub(crate) fn missing_attribute<'b>(&self, attributes: &'b [AttributeBinding]) -> Option<&'b AttributeBinding> {
        attributes
            .iter()
            .find(|a| !self.streams.iter().any(|s| s.layout.has_location(a.location)))
    }

    pub(crate) fn issue(&self, backend: &mut dyn GraphicsBackend, range: Option<Range<u32>>) {
        for stream in &self.streams {
            backend.set_vertex_buffer(stream.slot, stream.buffer, &stream.layout);
        }
        match &self.index {
            Some(index) => {
                backend.set_index_buffer(index.buffer, index.format);
                backend.draw_indexed(range.unwrap_or(0..index.count), 0);
            }
            None => backend.draw(range.unwrap_or(0..self.vertex_count)),
        }
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        for buffer in self.buffers() {
            backend.destroy_buffer(buffer);
        }
    }
}

/// Index range of a model drawn with one material
#[derive(Debug, Clone)]
pub struct Submesh {
    pub first_index: u32,
    pub index_count: u32,
    pub material: Material,
}

impl Submesh {
    pub fn range(&self) -> Range<u32> {
        self.first_index..self.first_index + self.index_count
    }
}

/// A drawable split into material groups
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub drawable: Drawable,
    pub submeshes: Vec<Submesh>,
}

impl Model {
    /// Merge transformed parts into one drawable with a submesh per part
    pub fn build(
        backend: &mut dyn GraphicsBackend,
        name: &str,
        parts: &[(Mesh, Mat4, Material)],
    ) -> BackendResult<Self> {
        let mut mesh = Mesh::new(name);
        let submeshes = parts
            .iter()
            .map(|(part, transform, material)| {
                let range = mesh.append(part, *transform);
                Submesh {
                    first_index: range.start,
                    index_count: range.end - range.start,
                    material: material.clone(),
                }
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            drawable: Drawable::from_mesh(backend, &mesh)?,
            submeshes,
        })
    }

    /// Apply each submesh's material, then draw its range
    pub fn render(&self, backend: &mut dyn GraphicsBackend, program: &mut ActiveProgram) {
        for submesh in &self.submeshes {
            apply_material(program, &submesh.material);
            program.draw_range(backend, &self.drawable, submesh.range());
        }
    }
}

/// Set the material parameters of the shading program
pub fn apply_material(program: &mut ActiveProgram, material: &Material) {
    program
        .set_parameter("has_diffuse_texture", material.has_diffuse_texture())
        .set_parameter("material_diffuse_color", material.diffuse_color)
        .set_parameter("material_emissive_color", material.emissive_color);
    if let Some(texture) = material.diffuse_texture {
        program.set_parameter("diffuse_texture", texture);
    }
}

fn float_layout(location: u32, format: VertexFormat) -> VertexBufferLayout {
    VertexBufferLayout {
        array_stride: format.size(),
        attributes: vec![VertexAttribute {
            location,
            format,
            offset: 0,
        }],
    }
}

/// Quads shared by every pass, uploaded on first use
#[derive(Debug, Default)]
pub struct FixedDrawables {
    fullscreen_quad: Option<Drawable>,
    security_screen_quad: Option<Drawable>,
}

impl FixedDrawables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clip-space quad covering the viewport, positions only
    pub fn fullscreen_quad(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<Drawable> {
        if let Some(quad) = &self.fullscreen_quad {
            return Ok(quad.clone());
        }
        let corners = [
            Vec2::new(-1.0, -1.0),
            Vec2::new(1.0, -1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(-1.0, 1.0),
        ];
        let quad = Drawable::upload(
            backend,
            "fullscreen quad",
            &[(
                float_layout(POSITION_LOCATION, VertexFormat::Float32x2),
                bytemuck::cast_slice(&corners),
            )],
            Some(&[0, 1, 2, 0, 2, 3]),
        )?;
        self.fullscreen_quad = Some(quad.clone());
        Ok(quad)
    }

    /// Screen face of the security console, in console model space
    pub fn security_screen_quad(&mut self, backend: &mut dyn GraphicsBackend) -> BackendResult<Drawable> {
        if let Some(quad) = &self.security_screen_quad {
            return Ok(quad.clone());
        }
        let positions = [
            Vec3::new(-0.318522, 1.920508, 0.357336),
            Vec3::new(0.102965, 1.589634, 0.357336),
            Vec3::new(0.102965, 1.589634, -0.357336),
            Vec3::new(-0.318522, 1.920508, 0.357336),
            Vec3::new(0.102965, 1.589634, -0.357336),
            Vec3::new(-0.318522, 1.920508, -0.357336),
        ];
        let upper = Vec3::new(0.779114, 0.626882, 0.0);
        let lower = Vec3::new(0.556536, 0.830824, 0.0);
        let normals = [upper, lower, lower, upper, lower, upper];
        // texture rows run top to bottom, so the upper edge samples v = 0
        let texcoords = [
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
        ];
        let quad = Drawable::upload(
            backend,
            "security screen",
            &[
                (
                    float_layout(POSITION_LOCATION, VertexFormat::Float32x3),
                    bytemuck::cast_slice(&positions),
                ),
                (
                    float_layout(NORMAL_LOCATION, VertexFormat::Float32x3),
                    bytemuck::cast_slice(&normals),
                ),
                (
                    float_layout(TEXCOORD_LOCATION, VertexFormat::Float32x2),
                    bytemuck::cast_slice(&texcoords),
                ),
            ],
            None,
        )?;
        self.security_screen_quad = Some(quad.clone());
        Ok(quad)
    }
}
