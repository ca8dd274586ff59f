//! Render targets owned by a pass sequence

use super::target::{RenderTarget, RenderTargetError};
use crate::backend::traits::{GraphicsBackend, TextureHandle};
use crate::backend::types::*;

/// Identifier of a target in a [`TargetRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId(pub(crate) u32);

impl TargetId {
    /// The window framebuffer
    pub const VISIBLE: TargetId = TargetId(0);
}

/// Describes target dimensions that can be relative to the surface size
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetSize {
    /// Absolute size in pixels
    Absolute { width: u32, height: u32 },
    /// Relative to the surface (1.0 = full surface)
    Relative { scale: f32 },
}

impl Default for TargetSize {
    fn default() -> Self {
        TargetSize::Relative { scale: 1.0 }
    }
}

impl TargetSize {
    /// Pixel size against a surface; never smaller than 1×1
    pub fn resolve(&self, surface_width: u32, surface_height: u32) -> (u32, u32) {
        let (width, height) = match self {
            TargetSize::Absolute { width, height } => (*width, *height),
            TargetSize::Relative { scale } => (
                ((surface_width as f32) * scale) as u32,
                ((surface_height as f32) * scale) as u32,
            ),
        };
        (width.max(1), height.max(1))
    }
}

/// Lifetime of a target's contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Written and consumed within one frame
    Transient,
    /// Keeps its contents across frames; may be read before it is written
    Persistent,
}

/// A texture of a target that a pass samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureRef {
    Color(TargetId),
    Depth(TargetId),
}

impl TextureRef {
    pub fn target(&self) -> TargetId {
        match self {
            TextureRef::Color(id) | TextureRef::Depth(id) => *id,
        }
    }
}

/// Description of an offscreen target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetDesc {
    pub label: String,
    pub size: TargetSize,
    pub color: Option<TextureFormat>,
    pub depth: Option<TextureFormat>,
    pub kind: TargetKind,
}

impl TargetDesc {
    pub fn new(label: &str, size: TargetSize) -> Self {
        Self {
            label: label.to_string(),
            size,
            color: None,
            depth: None,
            kind: TargetKind::Transient,
        }
    }

    pub fn color(mut self, format: TextureFormat) -> Self {
        self.color = Some(format);
        self
    }

    pub fn depth(mut self, format: TextureFormat) -> Self {
        self.depth = Some(format);
        self
    }

    pub fn persistent(mut self) -> Self {
        self.kind = TargetKind::Persistent;
        self
    }
}

#[derive(Debug)]
struct Entry {
    desc: TargetDesc,
    target: RenderTarget,
}

/// Owns every target of a pass sequence, including the visible one at [`TargetId::VISIBLE`]
#[derive(Debug)]
pub struct TargetRegistry {
    entries: Vec<Entry>,
    surface_size: (u32, u32),
}

impl TargetRegistry {
    pub fn new(backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> Result<Self, RenderTargetError> {
        let visible = RenderTarget::visible(backend, width, height)?;
        Ok(Self {
            entries: vec![Entry {
                desc: TargetDesc::new("visible", TargetSize::default())
                    .depth(TextureFormat::Depth32Float)
                    .persistent(),
                target: visible,
            }],
            surface_size: (width, height),
        })
    }

    pub fn add(&mut self, backend: &mut dyn GraphicsBackend, desc: TargetDesc) -> Result<TargetId, RenderTargetError> {
        let target = Self::allocate(backend, &desc, self.surface_size)?;
        let id = TargetId(self.entries.len() as u32);
        self.entries.push(Entry { desc, target });
        Ok(id)
    }

    fn allocate(
        backend: &mut dyn GraphicsBackend,
        desc: &TargetDesc,
        (width, height): (u32, u32),
    ) -> Result<RenderTarget, RenderTargetError> {
        let (w, h) = desc.size.resolve(width, height);
        RenderTarget::create(backend, &desc.label, w, h, desc.color, desc.depth)
    }

    pub fn get(&self, id: TargetId) -> Option<&RenderTarget> {
        self.entries.get(id.0 as usize).map(|e| &e.target)
    }

    pub fn kind(&self, id: TargetId) -> Option<TargetKind> {
        self.entries.get(id.0 as usize).map(|e| e.desc.kind)
    }

    pub fn contains(&self, id: TargetId) -> bool {
        (id.0 as usize) < self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.surface_size
    }

    /// Texture behind a reference; the visible color image is the frame's surface
    pub fn resolve(&self, texture: TextureRef, surface: TextureHandle) -> Option<TextureHandle> {
        let target = self.get(texture.target())?;
        match texture {
            TextureRef::Color(_) if target.is_visible() => Some(surface),
            TextureRef::Color(_) => target.resolve_color_as_texture(),
            TextureRef::Depth(_) => target.depth_texture(),
        }
    }

    /// Recreate the visible target and every surface-relative target
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> Result<(), RenderTargetError> {
        if self.surface_size == (width, height) {
            return Ok(());
        }

        // Nothing is swapped in until every replacement exists
        let mut replacements = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            let replacement = if index == TargetId::VISIBLE.0 as usize {
                RenderTarget::visible(backend, width, height)
            } else if matches!(entry.desc.size, TargetSize::Relative { .. }) {
                Self::allocate(backend, &entry.desc, (width, height))
            } else {
                continue;
            };
            match replacement {
                Ok(target) => replacements.push((index, target)),
                Err(e) => {
                    log::error!("Failed to resize render targets to {}x{}: {}", width, height, e);
                    for (_, target) in replacements {
                        target.destroy(backend);
                    }
                    return Err(e);
                }
            }
        }

        for (index, replacement) in replacements {
            std::mem::replace(&mut self.entries[index].target, replacement).destroy(backend);
        }
        self.surface_size = (width, height);
        log::debug!("Resized render targets to {}x{}", width, height);
        Ok(())
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        for entry in self.entries {
            entry.target.destroy(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;

    #[test]
    fn test_target_size_resolve() {
        assert_eq!(TargetSize::Relative { scale: 0.5 }.resolve(800, 600), (400, 300));
        assert_eq!(
            TargetSize::Absolute { width: 1024, height: 1024 }.resolve(800, 600),
            (1024, 1024)
        );
        assert_eq!(TargetSize::Relative { scale: 0.5 }.resolve(1, 1), (1, 1));
    }

    #[test]
    fn test_visible_color_resolves_to_surface() {
        let mut backend = SoftwareBackend::new(8, 8);
        let mut registry = TargetRegistry::new(&mut backend, 8, 8).unwrap();
        let offscreen = registry
            .add(
                &mut backend,
                TargetDesc::new("offscreen", TargetSize::default()).color(TextureFormat::Rgba16Float),
            )
            .unwrap();
        let surface = backend.begin_frame().unwrap().surface;

        assert_eq!(registry.resolve(TextureRef::Color(TargetId::VISIBLE), surface), Some(surface));
        assert!(registry.resolve(TextureRef::Color(offscreen), surface).is_some());
        assert_eq!(registry.resolve(TextureRef::Depth(offscreen), surface), None);
        assert_eq!(registry.kind(offscreen), Some(TargetKind::Transient));
    }

    #[test]
    fn test_resize_recreates_relative_targets_only() {
        let mut backend = SoftwareBackend::new(8, 8);
        let mut registry = TargetRegistry::new(&mut backend, 8, 8).unwrap();
        let half = registry
            .add(
                &mut backend,
                TargetDesc::new("half", TargetSize::Relative { scale: 0.5 }).color(TextureFormat::Rgba8Unorm),
            )
            .unwrap();
        let fixed = registry
            .add(
                &mut backend,
                TargetDesc::new("shadow", TargetSize::Absolute { width: 16, height: 16 })
                    .depth(TextureFormat::Depth32Float),
            )
            .unwrap();
        let fixed_depth = registry.get(fixed).unwrap().depth_texture();

        registry.resize(&mut backend, 20, 10).unwrap();
        assert_eq!(registry.get(half).unwrap().size(), (10, 5));
        assert_eq!(registry.get(TargetId::VISIBLE).unwrap().size(), (20, 10));
        assert_eq!(registry.get(fixed).unwrap().depth_texture(), fixed_depth);
    }

    #[test]
    fn test_failed_resize_keeps_previous_targets() {
        let mut backend = SoftwareBackend::new(8, 8);
        let mut registry = TargetRegistry::new(&mut backend, 8, 8).unwrap();
        let full = registry
            .add(
                &mut backend,
                TargetDesc::new("full", TargetSize::default()).color(TextureFormat::Rgba16Float),
            )
            .unwrap();
        let full_color = registry.get(full).unwrap().resolve_color_as_texture();
        assert_eq!(backend.live_textures(), 2);

        // Room for the new visible depth but not the relative color
        backend.set_texture_limit(Some(3));
        assert!(registry.resize(&mut backend, 20, 10).is_err());
        assert_eq!(registry.surface_size(), (8, 8));
        assert_eq!(registry.get(TargetId::VISIBLE).unwrap().size(), (8, 8));
        assert_eq!(registry.get(full).unwrap().size(), (8, 8));
        assert_eq!(registry.get(full).unwrap().resolve_color_as_texture(), full_color);
        assert_eq!(backend.live_textures(), 2);

        backend.set_texture_limit(None);
        registry.resize(&mut backend, 20, 10).unwrap();
        assert_eq!(registry.surface_size(), (20, 10));
        assert_eq!(registry.get(full).unwrap().size(), (20, 10));
        assert_eq!(backend.live_textures(), 2);
    }
}
