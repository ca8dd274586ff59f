//! Texture loading and upload

use crate::backend::traits::*;
use crate::backend::types::*;
use image::{DynamicImage, GenericImageView};
use std::path::Path;

/// Decoded RGBA8 texture data
#[derive(Debug, Clone)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Load texture from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let img = image::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        Ok(Self::from_image(img, &name))
    }

    /// Decode an encoded image held in memory
    pub fn from_bytes(bytes: &[u8], name: &str) -> Result<Self, String> {
        let img = image::load_from_memory(bytes).map_err(|e| e.to_string())?;
        Ok(Self::from_image(img, name))
    }

    fn from_image(img: DynamicImage, name: &str) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            format: TextureFormat::Rgba8UnormSrgb,
            data: img.to_rgba8().into_raw(),
            name: name.to_string(),
        }
    }

    /// Create a solid color texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8UnormSrgb,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Checkerboard with 8-texel cells
    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / 8) + (y / 8)) % 2 == 0;
                data.extend_from_slice(if is_even { &color1 } else { &color2 });
            }
        }

        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8UnormSrgb,
            data,
            name: "checkerboard".to_string(),
        }
    }

    /// Create the GPU texture and upload the texels
    pub fn upload(&self, backend: &mut dyn GraphicsBackend) -> BackendResult<TextureHandle> {
        let handle = backend.create_texture(&TextureDescriptor {
            label: Some(self.name.clone()),
            width: self.width,
            height: self.height,
            format: self.format,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
        })?;
        backend.write_texture(handle, &self.data, self.width, self.height);
        log::debug!("Uploaded texture '{}' ({}x{})", self.name, self.width, self.height);
        Ok(handle)
    }
}
