//! Render targets: fixed-size color and/or depth destinations

use crate::backend::traits::*;
use crate::backend::types::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderTargetError {
    #[error("Render target '{0}' has no attachments")]
    NoAttachments(String),
    #[error("Render target '{label}' is incomplete: {reason}")]
    Incomplete { label: String, reason: String },
    #[error("Cannot copy '{source_label}' ({source_size:?}) into '{destination_label}' ({destination_size:?})")]
    SizeMismatch {
        source_label: String,
        source_size: (u32, u32),
        destination_label: String,
        destination_size: (u32, u32),
    },
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// How attachments are initialized when a target is bound
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetLoad {
    pub color: LoadOp<[f32; 4]>,
    pub depth: LoadOp<f32>,
}

impl TargetLoad {
    pub fn clear(color: [f32; 4]) -> Self {
        Self {
            color: LoadOp::Clear(color),
            depth: LoadOp::Clear(1.0),
        }
    }

    pub fn load() -> Self {
        Self {
            color: LoadOp::Load,
            depth: LoadOp::Load,
        }
    }
}

/// An offscreen or visible destination for drawing
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTarget {
    label: String,
    width: u32,
    height: u32,
    color: Option<TextureHandle>,
    depth: Option<TextureHandle>,
    visible: bool,
}

const RENDERABLE: TextureUsage = TextureUsage::RENDER_ATTACHMENT;

impl RenderTarget {
    /// Allocate attachments of exactly `width × height`
    pub fn create(
        backend: &mut dyn GraphicsBackend,
        label: &str,
        width: u32,
        height: u32,
        color_format: Option<TextureFormat>,
        depth_format: Option<TextureFormat>,
    ) -> Result<Self, RenderTargetError> {
        if color_format.is_none() && depth_format.is_none() {
            return Err(RenderTargetError::NoAttachments(label.to_string()));
        }

        let color = match color_format {
            Some(format) => Some(backend.create_texture(&TextureDescriptor {
                label: Some(format!("{label} color")),
                width,
                height,
                format,
                usage: TextureUsage::RENDER_ATTACHMENT
                    | TextureUsage::TEXTURE_BINDING
                    | TextureUsage::COPY_SRC
                    | TextureUsage::COPY_DST,
            })?),
            None => None,
        };
        let depth = match depth_format {
            Some(format) => {
                let created = backend.create_texture(&TextureDescriptor {
                    label: Some(format!("{label} depth")),
                    width,
                    height,
                    format,
                    usage: TextureUsage::RENDER_ATTACHMENT
                        | TextureUsage::TEXTURE_BINDING
                        | TextureUsage::COPY_SRC,
                });
                match created {
                    Ok(depth) => Some(depth),
                    Err(e) => {
                        if let Some(color) = color {
                            backend.destroy_texture(color);
                        }
                        return Err(e.into());
                    }
                }
            }
            None => None,
        };

        let target = Self {
            label: label.to_string(),
            width,
            height,
            color,
            depth,
            visible: false,
        };
        if let Err(e) = target.check_complete(backend) {
            target.destroy(backend);
            return Err(e);
        }
        log::debug!(
            "Created render target '{}' {}x{} (color: {:?}, depth: {:?})",
            label,
            width,
            height,
            color_format,
            depth_format
        );
        Ok(target)
    }

    /// Wrap existing textures after checking they form a complete target
    pub fn from_attachments(
        backend: &dyn GraphicsBackend,
        label: &str,
        width: u32,
        height: u32,
        color: Option<TextureHandle>,
        depth: Option<TextureHandle>,
    ) -> Result<Self, RenderTargetError> {
        if color.is_none() && depth.is_none() {
            return Err(RenderTargetError::NoAttachments(label.to_string()));
        }
        let target = Self {
            label: label.to_string(),
            width,
            height,
            color,
            depth,
            visible: false,
        };
        target.check_complete(backend)?;
        Ok(target)
    }

    /// The window framebuffer; its color image is the surface of the current frame
    pub fn visible(backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> Result<Self, RenderTargetError> {
        let depth = backend.create_texture(&TextureDescriptor {
            label: Some("visible depth".to_string()),
            width,
            height,
            format: TextureFormat::Depth32Float,
            usage: TextureUsage::RENDER_ATTACHMENT,
        })?;
        Ok(Self {
            label: "visible".to_string(),
            width,
            height,
            color: None,
            depth: Some(depth),
            visible: true,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Color image for sampling by later passes, without copying
    pub fn resolve_color_as_texture(&self) -> Option<TextureHandle> {
        self.color
    }

    pub fn depth_texture(&self) -> Option<TextureHandle> {
        self.depth
    }

    /// Verify every attachment exists with the target's size, kind and usage
    pub fn check_complete(&self, backend: &dyn GraphicsBackend) -> Result<(), RenderTargetError> {
        let incomplete = |reason: String| RenderTargetError::Incomplete {
            label: self.label.clone(),
            reason,
        };

        for (texture, want_depth) in [(self.color, false), (self.depth, true)] {
            let Some(texture) = texture else {
                continue;
            };
            let info = backend
                .texture_info(texture)
                .ok_or_else(|| incomplete(format!("{:?} does not exist", texture)))?;
            if (info.width, info.height) != (self.width, self.height) {
                return Err(incomplete(format!(
                    "attachment is {}x{}, target is {}x{}",
                    info.width, info.height, self.width, self.height
                )));
            }
            if info.format.is_depth() != want_depth {
                return Err(incomplete(format!(
                    "{:?} cannot be the {} attachment",
                    info.format,
                    if want_depth { "depth" } else { "color" }
                )));
            }
            if !info.usage.contains(RENDERABLE) {
                return Err(incomplete(format!("{:?} is not renderable", texture)));
            }
        }
        Ok(())
    }

    /// Begin drawing into this target; the pass ends when the guard drops
    pub fn bind<'a>(
        &self,
        backend: &'a mut dyn GraphicsBackend,
        surface: TextureHandle,
        load: TargetLoad,
    ) -> BoundTarget<'a> {
        let color = if self.visible { Some(surface) } else { self.color };
        backend.begin_render_pass(&RenderPassDescriptor {
            label: Some(self.label.clone()),
            color_attachment: color.map(|texture| ColorAttachment {
                texture,
                load_op: load.color,
            }),
            depth_attachment: self.depth.map(|texture| DepthAttachment {
                texture,
                load_op: load.depth,
            }),
        });
        BoundTarget { backend }
    }

    /// Copy the color image into `destination`, which must have the same size
    pub fn snapshot_color_into(
        &self,
        backend: &mut dyn GraphicsBackend,
        surface: TextureHandle,
        destination: &RenderTarget,
    ) -> Result<(), RenderTargetError> {
        if self.size() != destination.size() {
            return Err(RenderTargetError::SizeMismatch {
                source_label: self.label.clone(),
                source_size: self.size(),
                destination_label: destination.label.clone(),
                destination_size: destination.size(),
            });
        }
        let source = if self.visible { Some(surface) } else { self.color };
        match (source, destination.color) {
            (Some(source), Some(destination)) => {
                backend.copy_texture(source, destination);
                Ok(())
            }
            _ => Err(RenderTargetError::Incomplete {
                label: destination.label.clone(),
                reason: "snapshot needs color images on both targets".to_string(),
            }),
        }
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        for texture in [self.color, self.depth].into_iter().flatten() {
            backend.destroy_texture(texture);
        }
    }
}

/// A bound render target; draws go through [`BoundTarget::backend`]
pub struct BoundTarget<'a> {
    backend: &'a mut dyn GraphicsBackend,
}

impl<'a> BoundTarget<'a> {
    pub fn backend(&mut self) -> &mut (dyn GraphicsBackend + 'a) {
        self.backend
    }

    /// End the pass now
    pub fn unbind(self) {}
}

impl Drop for BoundTarget<'_> {
    fn drop(&mut self) {
        self.backend.end_render_pass();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;

    #[test]
    fn test_created_attachments_match_target_size() {
        let mut backend = SoftwareBackend::new(8, 8);
        let target = RenderTarget::create(
            &mut backend,
            "offscreen",
            96,
            54,
            Some(TextureFormat::Rgba16Float),
            Some(TextureFormat::Depth32Float),
        )
        .unwrap();
        for texture in [target.resolve_color_as_texture(), target.depth_texture()] {
            let info = backend.texture_info(texture.unwrap()).unwrap();
            assert_eq!((info.width, info.height), (96, 54));
        }
    }

    #[test]
    fn test_failed_depth_allocation_releases_color() {
        let mut backend = SoftwareBackend::new(8, 8);
        backend.set_texture_limit(Some(1));
        let result = RenderTarget::create(
            &mut backend,
            "offscreen",
            8,
            8,
            Some(TextureFormat::Rgba16Float),
            Some(TextureFormat::Depth32Float),
        );
        assert!(matches!(result, Err(RenderTargetError::Backend(BackendError::OutOfMemory))));
        assert_eq!(backend.live_textures(), 0);

        backend.set_texture_limit(None);
        let target = RenderTarget::create(&mut backend, "offscreen", 8, 8, Some(TextureFormat::Rgba16Float), None).unwrap();
        assert_eq!(backend.live_textures(), 1);
        target.destroy(&mut backend);
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn test_mismatched_attachments_are_rejected() {
        let mut backend = SoftwareBackend::new(8, 8);
        let color = backend
            .create_texture(&TextureDescriptor {
                width: 32,
                height: 32,
                usage: TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                ..Default::default()
            })
            .unwrap();
        let depth = backend
            .create_texture(&TextureDescriptor {
                width: 16,
                height: 16,
                format: TextureFormat::Depth32Float,
                usage: TextureUsage::RENDER_ATTACHMENT,
                ..Default::default()
            })
            .unwrap();

        assert!(RenderTarget::from_attachments(&backend, "ok", 32, 32, Some(color), None).is_ok());
        assert!(matches!(
            RenderTarget::from_attachments(&backend, "bad", 32, 32, Some(color), Some(depth)),
            Err(RenderTargetError::Incomplete { .. })
        ));
        assert!(matches!(
            RenderTarget::from_attachments(&backend, "swapped", 16, 16, Some(depth), None),
            Err(RenderTargetError::Incomplete { .. })
        ));
        assert!(matches!(
            RenderTarget::from_attachments(&backend, "empty", 16, 16, None, None),
            Err(RenderTargetError::NoAttachments(_))
        ));
    }

    #[test]
    fn test_unrenderable_texture_is_rejected() {
        let mut backend = SoftwareBackend::new(8, 8);
        let sampled_only = backend.create_texture(&TextureDescriptor::default()).unwrap();
        assert!(RenderTarget::from_attachments(&backend, "sampled", 1, 1, Some(sampled_only), None).is_err());
    }

    #[test]
    fn test_bind_clears_and_guard_ends_pass() {
        let mut backend = SoftwareBackend::new(4, 4);
        let target = RenderTarget::create(&mut backend, "t", 4, 4, Some(TextureFormat::Rgba8Unorm), None).unwrap();
        let surface = backend.begin_frame().unwrap().surface;
        {
            let _bound = target.bind(&mut backend, surface, TargetLoad::clear([0.0, 0.0, 1.0, 1.0]));
        }
        let texels = backend.read_texture(target.resolve_color_as_texture().unwrap()).unwrap();
        assert_eq!(texels.texel(3, 3), glam::Vec4::new(0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_snapshot_requires_equal_size() {
        let mut backend = SoftwareBackend::new(4, 4);
        let a = RenderTarget::create(&mut backend, "a", 4, 4, Some(TextureFormat::Rgba8Unorm), None).unwrap();
        let b = RenderTarget::create(&mut backend, "b", 2, 2, Some(TextureFormat::Rgba8Unorm), None).unwrap();
        let surface = backend.begin_frame().unwrap().surface;
        assert!(matches!(
            a.snapshot_color_into(&mut backend, surface, &b),
            Err(RenderTargetError::SizeMismatch { .. })
        ));
    }
}
