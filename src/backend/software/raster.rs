//! Triangle rasterization for the software backend
//!
//! Follows the wgpu conventions: clip-space depth in `[0, 1]`, framebuffer
//! origin at the top-left, counter-clockwise front faces and pixel centers at
//! half-integer coordinates.

use super::kernel::{FragmentInput, ProgramKernel, Varyings, VertexOutput};
use super::texture::{CpuTexture, TextureUnits};
use crate::backend::parameters::ParameterBlock;
use crate::backend::types::{CompareFunction, CullMode, DepthMode};
use glam::{Vec3, Vec4};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }
}

/// Attachments written by a draw
pub struct DrawTarget<'a> {
    pub color: Option<&'a mut CpuTexture>,
    pub depth: Option<&'a mut CpuTexture>,
    pub viewport: Viewport,
}

impl DrawTarget<'_> {
    fn size(&self) -> Option<(u32, u32)> {
        self.color
            .as_ref()
            .or(self.depth.as_ref())
            .map(|t| (t.info.width, t.info.height))
    }
}

/// Fixed state of a draw
pub struct DrawState<'a> {
    pub kernel: &'a dyn ProgramKernel,
    pub params: &'a ParameterBlock,
    pub textures: &'a TextureUnits<'a>,
    pub cull: CullMode,
    pub depth: DepthMode,
    pub shade_fragments: bool,
}

struct ScreenVertex {
    position: Vec3,
    inv_w: f32,
    /// Varyings divided by `w`
    varyings: Varyings,
}

fn to_screen(v: &VertexOutput, viewport: &Viewport) -> Option<ScreenVertex> {
    if v.position.w <= f32::EPSILON {
        return None;
    }
    let inv_w = 1.0 / v.position.w;
    let ndc = v.position.truncate() * inv_w;
    Some(ScreenVertex {
        position: Vec3::new(
            viewport.x + (ndc.x * 0.5 + 0.5) * viewport.width,
            viewport.y + (0.5 - ndc.y * 0.5) * viewport.height,
            ndc.z,
        ),
        inv_w,
        varyings: v.varyings.scaled(inv_w),
    })
}

/// Clip a triangle against the near plane `z = 0`
fn clip_near(triangle: &[VertexOutput]) -> Vec<VertexOutput> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let a = &triangle[i];
        let b = &triangle[(i + 1) % 3];
        let (da, db) = (a.position.z, b.position.z);
        if da >= 0.0 {
            out.push(*a);
        }
        if (da >= 0.0) != (db >= 0.0) {
            let t = da / (da - db);
            out.push(VertexOutput {
                position: a.position.lerp(b.position, t),
                varyings: a.varyings.lerp(&b.varyings, t),
            });
        }
    }
    out
}

fn edge(a: Vec3, b: Vec3, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// Rasterize a triangle list; returns the number of triangles that reached the rasterizer
pub fn draw_triangles(state: &DrawState, target: &mut DrawTarget, vertices: &[VertexOutput]) -> u32 {
    let mut rasterized = 0;
    for triangle in vertices.chunks_exact(3) {
        let polygon = clip_near(triangle);
        if polygon.len() < 3 {
            continue;
        }
        let screen: Option<Vec<ScreenVertex>> = polygon
            .iter()
            .map(|v| to_screen(v, &target.viewport))
            .collect();
        let Some(screen) = screen else {
            continue;
        };
        for i in 1..screen.len() - 1 {
            if rasterize(state, target, [&screen[0], &screen[i], &screen[i + 1]]) {
                rasterized += 1;
            }
        }
    }
    rasterized
}

fn rasterize(state: &DrawState, target: &mut DrawTarget, v: [&ScreenVertex; 3]) -> bool {
    let Some((width, height)) = target.size() else {
        return false;
    };
    let (p0, p1, p2) = (v[0].position, v[1].position, v[2].position);
    let area = edge(p0, p1, p2.x, p2.y);
    if area.abs() <= f32::EPSILON {
        return false;
    }

    // y points down in framebuffer space, so counter-clockwise faces have negative area
    let front_facing = area < 0.0;
    match state.cull {
        CullMode::Back if !front_facing => return false,
        CullMode::Front if front_facing => return false,
        _ => {}
    }

    let viewport = target.viewport;
    let min_x = p0.x.min(p1.x).min(p2.x).max(viewport.x).max(0.0).floor() as i64;
    let min_y = p0.y.min(p1.y).min(p2.y).max(viewport.y).max(0.0).floor() as i64;
    let max_x = p0
        .x
        .max(p1.x)
        .max(p2.x)
        .min(viewport.x + viewport.width)
        .min(width as f32)
        .ceil() as i64;
    let max_y = p0
        .y
        .max(p1.y)
        .max(p2.y)
        .min(viewport.y + viewport.height)
        .min(height as f32)
        .ceil() as i64;

    for py in min_y.max(0)..max_y.min(height as i64) {
        for px in min_x.max(0)..max_x.min(width as i64) {
            let (cx, cy) = (px as f32 + 0.5, py as f32 + 0.5);
            let b0 = edge(p1, p2, cx, cy) / area;
            let b1 = edge(p2, p0, cx, cy) / area;
            let b2 = edge(p0, p1, cx, cy) / area;
            if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                continue;
            }

            let z = b0 * p0.z + b1 * p1.z + b2 * p2.z;
            if !(0.0..=1.0).contains(&z) {
                continue;
            }
            let (x, y) = (px as u32, py as u32);

            if let Some(depth) = target.depth.as_deref_mut() {
                if state.depth.test && !CompareFunction::Less.passes(z, depth.texel(x, y).x) {
                    continue;
                }
                if state.depth.write {
                    depth.store(x, y, Vec4::new(z, 0.0, 0.0, 1.0));
                }
            }

            if !state.shade_fragments {
                continue;
            }
            let Some(color) = target.color.as_deref_mut() else {
                continue;
            };

            let inv_w = b0 * v[0].inv_w + b1 * v[1].inv_w + b2 * v[2].inv_w;
            let varyings = Varyings::blend(
                [&v[0].varyings, &v[1].varyings, &v[2].varyings],
                [b0, b1, b2],
            )
            .scaled(1.0 / inv_w);
            let input = FragmentInput {
                frag_coord: Vec4::new(cx, cy, z, inv_w),
                varyings,
            };
            let value = state.kernel.fragment(&input, state.params, state.textures);
            color.store(x, y, value);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::parameters::ParameterLayout;
    use crate::backend::software::kernel::VertexInput;
    use crate::backend::types::{TextureDescriptor, TextureFormat};
    use std::sync::Arc;

    struct Flat;

    impl ProgramKernel for Flat {
        fn vertex(&self, _input: &VertexInput, _params: &ParameterBlock) -> VertexOutput {
            VertexOutput::default()
        }

        fn fragment(&self, _: &FragmentInput, _: &ParameterBlock, _: &TextureUnits<'_>) -> Vec4 {
            Vec4::ONE
        }
    }

    fn vertex(x: f32, y: f32, z: f32) -> VertexOutput {
        VertexOutput {
            position: Vec4::new(x, y, z, 1.0),
            varyings: Varyings::default(),
        }
    }

    fn run(cull: CullMode, triangle: [VertexOutput; 3]) -> CpuTexture {
        let mut color = CpuTexture::new(&TextureDescriptor {
            width: 8,
            height: 8,
            format: TextureFormat::Rgba32Float,
            ..Default::default()
        });
        let params = Arc::new(ParameterLayout::new(&[], &[])).block();
        let units = TextureUnits::new(Vec::new());
        let state = DrawState {
            kernel: &Flat,
            params: &params,
            textures: &units,
            cull,
            depth: DepthMode::DISABLED,
            shade_fragments: true,
        };
        let mut target = DrawTarget {
            color: Some(&mut color),
            depth: None,
            viewport: Viewport::full(8, 8),
        };
        draw_triangles(&state, &mut target, &triangle);
        color
    }

    #[test]
    fn test_counter_clockwise_triangle_is_front_facing() {
        let ccw = [vertex(-1.0, -1.0, 0.5), vertex(1.0, -1.0, 0.5), vertex(-1.0, 1.0, 0.5)];
        let texture = run(CullMode::Back, ccw);
        assert_eq!(texture.texel(0, 7), Vec4::ONE);
        assert_eq!(texture.texel(7, 0), Vec4::ZERO);

        let cw = [vertex(-1.0, -1.0, 0.5), vertex(-1.0, 1.0, 0.5), vertex(1.0, -1.0, 0.5)];
        let texture = run(CullMode::Back, cw);
        assert!(texture.texels().iter().all(|t| *t == Vec4::ZERO));
    }

    #[test]
    fn test_triangle_behind_near_plane_is_clipped() {
        let behind = [vertex(-1.0, -1.0, -0.5), vertex(1.0, -1.0, -0.5), vertex(-1.0, 1.0, -0.5)];
        let texture = run(CullMode::None, behind);
        assert!(texture.texels().iter().all(|t| *t == Vec4::ZERO));
    }
}
