//! Mesh data structures and generation

use crate::backend::types::Vertex;
use glam::{Mat3, Mat4, Vec2, Vec3};
use std::f32::consts::PI;
use std::ops::Range;

/// A mesh with vertex and index data
#[derive(Debug, Clone)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub name: String,
}

impl Mesh {
    pub fn new(name: &str) -> Self {
        Self {
            vertices: Vec::new(),
            indices: Vec::new(),
            name: name.to_string(),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Get vertex data as bytes
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.vertices)
    }

    /// Axis-aligned bounds of the vertex positions
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = self.vertices.first()?.position;
        Some(self.vertices.iter().fold((first, first), |(lo, hi), v| {
            (lo.min(v.position), hi.max(v.position))
        }))
    }

    /// Append another mesh transformed by `transform`; returns the appended index range
    pub fn append(&mut self, other: &Mesh, transform: Mat4) -> Range<u32> {
        let normal_matrix = Mat3::from_mat4(transform).inverse().transpose();
        let base = self.vertices.len() as u32;
        let first = self.indices.len() as u32;

        self.vertices.extend(other.vertices.iter().map(|v| Vertex {
            position: transform.transform_point3(v.position),
            normal: (normal_matrix * v.normal).normalize_or_zero(),
            uv: v.uv,
        }));
        self.indices.extend(other.indices.iter().map(|i| i + base));

        first..self.indices.len() as u32
    }

    /// Create a unit cube centered at origin
    pub fn cube() -> Self {
        let mut mesh = Self::cuboid(Vec3::ONE);
        mesh.name = "cube".to_string();
        mesh
    }

    /// Box with the given edge lengths, centered at origin
    pub fn cuboid(size: Vec3) -> Self {
        let mut mesh = Mesh::new("cuboid");
        let h = size * 0.5;

        // (normal, u axis, v axis) per face; corners wind counter-clockwise seen from outside
        let faces = [
            (Vec3::Z, Vec3::X, Vec3::Y),
            (-Vec3::Z, -Vec3::X, Vec3::Y),
            (Vec3::X, -Vec3::Z, Vec3::Y),
            (-Vec3::X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, -Vec3::Z),
            (-Vec3::Y, Vec3::X, Vec3::Z),
        ];

        for (normal, u, v) in faces {
            let base = mesh.vertices.len() as u32;
            let corners = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];
            for (cu, cv) in corners {
                let position = (normal + u * cu + v * cv) * h;
                let uv = Vec2::new((cu + 1.0) * 0.5, 1.0 - (cv + 1.0) * 0.5);
                mesh.vertices.push(Vertex::new(position, normal, uv));
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        mesh
    }

    /// Create a UV sphere of radius 0.5
    pub fn sphere(segments: u32, rings: u32) -> Self {
        let mut mesh = Mesh::new("sphere");

        let segment_angle = 2.0 * PI / segments as f32;
        let ring_angle = PI / rings as f32;

        for ring in 0..=rings {
            let phi = ring as f32 * ring_angle;
            let y = phi.cos();
            let ring_radius = phi.sin();

            for segment in 0..=segments {
                let theta = segment as f32 * segment_angle;
                let x = ring_radius * theta.cos();
                let z = ring_radius * theta.sin();

                mesh.vertices.push(Vertex::new(
                    Vec3::new(x, y, z) * 0.5,
                    Vec3::new(x, y, z).normalize_or_zero(),
                    Vec2::new(segment as f32 / segments as f32, ring as f32 / rings as f32),
                ));
            }
        }

        for ring in 0..rings {
            for segment in 0..segments {
                let current = ring * (segments + 1) + segment;
                let next = current + segments + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    current + 1,
                    next,
                    current + 1,
                    next + 1,
                    next,
                ]);
            }
        }

        mesh
    }

    /// Create a plane on the XZ axis facing +Y
    pub fn plane(width: f32, depth: f32, subdivisions: u32) -> Self {
        let mut mesh = Mesh::new("plane");
        let subdivisions = subdivisions.max(1);

        let step_x = width / subdivisions as f32;
        let step_z = depth / subdivisions as f32;

        for z in 0..=subdivisions {
            for x in 0..=subdivisions {
                mesh.vertices.push(Vertex::new(
                    Vec3::new(
                        -width / 2.0 + x as f32 * step_x,
                        0.0,
                        -depth / 2.0 + z as f32 * step_z,
                    ),
                    Vec3::Y,
                    Vec2::new(x as f32 / subdivisions as f32, z as f32 / subdivisions as f32),
                ));
            }
        }

        for z in 0..subdivisions {
            for x in 0..subdivisions {
                let current = z * (subdivisions + 1) + x;
                let next = current + subdivisions + 1;
                mesh.indices.extend_from_slice(&[
                    current,
                    next,
                    current + 1,
                    current + 1,
                    next,
                    next + 1,
                ]);
            }
        }

        mesh
    }

    /// Create a capped cylinder along Y
    pub fn cylinder(radius: f32, height: f32, segments: u32) -> Self {
        let mut mesh = Mesh::new("cylinder");

        let half_height = height / 2.0;
        let angle_step = 2.0 * PI / segments as f32;

        for i in 0..=segments {
            let angle = i as f32 * angle_step;
            let normal = Vec3::new(angle.cos(), 0.0, angle.sin());
            let u = i as f32 / segments as f32;
            let x = normal.x * radius;
            let z = normal.z * radius;

            mesh.vertices
                .push(Vertex::new(Vec3::new(x, -half_height, z), normal, Vec2::new(u, 1.0)));
            mesh.vertices
                .push(Vertex::new(Vec3::new(x, half_height, z), normal, Vec2::new(u, 0.0)));
        }

        for i in 0..segments {
            let base = i * 2;
            mesh.indices.extend_from_slice(&[
                base,
                base + 1,
                base + 2,
                base + 1,
                base + 3,
                base + 2,
            ]);
        }

        for (y, normal) in [(half_height, Vec3::Y), (-half_height, -Vec3::Y)] {
            let center = mesh.vertices.len() as u32;
            mesh.vertices
                .push(Vertex::new(Vec3::new(0.0, y, 0.0), normal, Vec2::splat(0.5)));
            for i in 0..=segments {
                let angle = i as f32 * angle_step;
                let (s, c) = angle.sin_cos();
                mesh.vertices.push(Vertex::new(
                    Vec3::new(c * radius, y, s * radius),
                    normal,
                    Vec2::new(0.5 + c * 0.5, 0.5 + s * 0.5),
                ));
            }
            for i in 0..segments {
                let rim = center + 1 + i;
                if normal.y > 0.0 {
                    mesh.indices.extend_from_slice(&[center, rim + 1, rim]);
                } else {
                    mesh.indices.extend_from_slice(&[center, rim, rim + 1]);
                }
            }
        }

        mesh
    }
}
