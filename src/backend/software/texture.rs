//! Texel storage and sampling for the software backend

use crate::backend::types::*;
use glam::{IVec2, UVec2, Vec2, Vec4};

/// A texture held as linear RGBA floats; depth and single-channel formats use `x`
#[derive(Debug, Clone)]
pub struct CpuTexture {
    pub info: TextureInfo,
    texels: Vec<Vec4>,
}

impl CpuTexture {
    pub fn new(desc: &TextureDescriptor) -> Self {
        Self {
            info: TextureInfo {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                usage: desc.usage,
            },
            texels: vec![Vec4::ZERO; (desc.width * desc.height) as usize],
        }
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.info.width, self.info.height)
    }

    pub fn texels(&self) -> &[Vec4] {
        &self.texels
    }

    pub fn texel(&self, x: u32, y: u32) -> Vec4 {
        self.texels[(y * self.info.width + x) as usize]
    }

    pub fn store(&mut self, x: u32, y: u32, value: Vec4) {
        let value = if self.info.format.is_normalized() {
            value.clamp(Vec4::ZERO, Vec4::ONE)
        } else {
            value
        };
        let index = (y * self.info.width + x) as usize;
        self.texels[index] = value;
    }

    pub fn fill(&mut self, value: Vec4) {
        self.texels.iter_mut().for_each(|t| *t = value);
    }

    pub fn copy_from(&mut self, other: &CpuTexture) {
        self.texels.copy_from_slice(&other.texels);
    }

    /// Decode tightly packed bytes in this texture's format
    pub fn write_bytes(&mut self, data: &[u8], width: u32, height: u32) -> Result<(), String> {
        if width != self.info.width || height != self.info.height {
            return Err(format!(
                "write of {}x{} into a {}x{} texture",
                width, height, self.info.width, self.info.height
            ));
        }
        let expected = (width * height * self.info.format.bytes_per_pixel()) as usize;
        if data.len() < expected {
            return Err(format!("expected {} bytes, got {}", expected, data.len()));
        }

        let format = self.info.format;
        let stride = format.bytes_per_pixel() as usize;
        for (texel, bytes) in self.texels.iter_mut().zip(data.chunks_exact(stride)) {
            *texel = format.decode_texel(bytes);
        }
        Ok(())
    }

    fn address(coord: i32, size: u32, mode: AddressMode) -> u32 {
        let size = size as i32;
        match mode {
            AddressMode::ClampToEdge => coord.clamp(0, size - 1) as u32,
            AddressMode::Repeat => coord.rem_euclid(size) as u32,
        }
    }

    fn fetch(&self, x: i32, y: i32, mode: AddressMode) -> Vec4 {
        self.texel(
            Self::address(x, self.info.width, mode),
            Self::address(y, self.info.height, mode),
        )
    }

    /// Bilinear footprint: the top-left texel and the fractional weights
    fn footprint(&self, uv: Vec2) -> (IVec2, Vec2) {
        let x = uv.x * self.info.width as f32 - 0.5;
        let y = uv.y * self.info.height as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        (IVec2::new(x0 as i32, y0 as i32), Vec2::new(x - x0, y - y0))
    }

    pub fn sample(&self, uv: Vec2, sampler: &SamplerDescriptor) -> Vec4 {
        let mode = sampler.address_mode;
        match sampler.filter {
            FilterMode::Nearest => {
                let x = (uv.x * self.info.width as f32).floor() as i32;
                let y = (uv.y * self.info.height as f32).floor() as i32;
                self.fetch(x, y, mode)
            }
            FilterMode::Linear => {
                let (base, f) = self.footprint(uv);
                let top = self
                    .fetch(base.x, base.y, mode)
                    .lerp(self.fetch(base.x + 1, base.y, mode), f.x);
                let bottom = self
                    .fetch(base.x, base.y + 1, mode)
                    .lerp(self.fetch(base.x + 1, base.y + 1, mode), f.x);
                top.lerp(bottom, f.y)
            }
        }
    }

    /// Depth comparison; a linear filter averages four comparisons
    pub fn sample_compare(&self, uv: Vec2, reference: f32, sampler: &SamplerDescriptor) -> f32 {
        let compare = sampler.compare.unwrap_or(CompareFunction::LessEqual);
        let mode = sampler.address_mode;
        let test = |x: i32, y: i32| -> f32 {
            if compare.passes(reference, self.fetch(x, y, mode).x) {
                1.0
            } else {
                0.0
            }
        };
        match sampler.filter {
            FilterMode::Nearest => {
                let x = (uv.x * self.info.width as f32).floor() as i32;
                let y = (uv.y * self.info.height as f32).floor() as i32;
                test(x, y)
            }
            FilterMode::Linear => {
                let (base, f) = self.footprint(uv);
                let top = test(base.x, base.y) * (1.0 - f.x) + test(base.x + 1, base.y) * f.x;
                let bottom =
                    test(base.x, base.y + 1) * (1.0 - f.x) + test(base.x + 1, base.y + 1) * f.x;
                top * (1.0 - f.y) + bottom * f.y
            }
        }
    }

    pub fn readback(&self) -> TextureReadback {
        TextureReadback {
            width: self.info.width,
            height: self.info.height,
            format: self.info.format,
            texels: self.texels.clone(),
        }
    }
}

/// Textures and samplers bound to a draw, by unit
pub struct TextureUnits<'a> {
    units: Vec<Option<(&'a CpuTexture, &'a SamplerDescriptor)>>,
}

impl<'a> TextureUnits<'a> {
    pub(crate) fn new(units: Vec<Option<(&'a CpuTexture, &'a SamplerDescriptor)>>) -> Self {
        Self { units }
    }

    fn unit(&self, unit: u32) -> Option<(&'a CpuTexture, &'a SamplerDescriptor)> {
        self.units.get(unit as usize).copied().flatten()
    }

    // Unset units behave like the wgpu backend's defaults: white color, depth 1.0.

    pub fn sample(&self, unit: u32, uv: Vec2) -> Vec4 {
        match self.unit(unit) {
            Some((texture, sampler)) => texture.sample(uv, sampler),
            None => Vec4::ONE,
        }
    }

    pub fn sample_compare(&self, unit: u32, uv: Vec2, reference: f32) -> f32 {
        match self.unit(unit) {
            Some((texture, sampler)) => texture.sample_compare(uv, reference, sampler),
            None => {
                if reference <= 1.0 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Unfiltered texel fetch; coordinates are clamped to the texture
    pub fn load(&self, unit: u32, coord: IVec2) -> Vec4 {
        match self.unit(unit) {
            Some((texture, _)) => texture.fetch(coord.x, coord.y, AddressMode::ClampToEdge),
            None => Vec4::ONE,
        }
    }

    pub fn dimensions(&self, unit: u32) -> UVec2 {
        self.unit(unit).map(|(t, _)| t.size()).unwrap_or(UVec2::ONE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient() -> CpuTexture {
        let mut texture = CpuTexture::new(&TextureDescriptor {
            width: 2,
            height: 1,
            format: TextureFormat::Rgba32Float,
            ..Default::default()
        });
        texture.store(0, 0, Vec4::ZERO);
        texture.store(1, 0, Vec4::ONE);
        texture
    }

    #[test]
    fn test_linear_sampling_interpolates_between_centers() {
        let texture = gradient();
        let mid = texture.sample(Vec2::new(0.5, 0.5), &SamplerDescriptor::default());
        assert!((mid.x - 0.5).abs() < 1e-6);
        let left = texture.sample(Vec2::new(0.25, 0.5), &SamplerDescriptor::default());
        assert_eq!(left, Vec4::ZERO);
    }

    #[test]
    fn test_nearest_sampling_picks_texel() {
        let texture = gradient();
        let s = texture.sample(Vec2::new(0.7, 0.5), &SamplerDescriptor::nearest());
        assert_eq!(s, Vec4::ONE);
    }

    #[test]
    fn test_unorm_store_clamps() {
        let mut texture = CpuTexture::new(&TextureDescriptor::default());
        texture.store(0, 0, Vec4::splat(3.0));
        assert_eq!(texture.texel(0, 0), Vec4::ONE);
    }

    #[test]
    fn test_compare_against_depth() {
        let mut texture = CpuTexture::new(&TextureDescriptor {
            format: TextureFormat::Depth32Float,
            ..Default::default()
        });
        texture.fill(Vec4::new(0.5, 0.0, 0.0, 1.0));
        let sampler = SamplerDescriptor::shadow();
        assert_eq!(texture.sample_compare(Vec2::splat(0.5), 0.4, &sampler), 1.0);
        assert_eq!(texture.sample_compare(Vec2::splat(0.5), 0.6, &sampler), 0.0);
    }

    #[test]
    fn test_write_rgba8_bytes() {
        let mut texture = CpuTexture::new(&TextureDescriptor::default());
        texture.write_bytes(&[255, 0, 51, 255], 1, 1).unwrap();
        assert!((texture.texel(0, 0) - Vec4::new(1.0, 0.0, 0.2, 1.0)).abs().max_element() < 1e-6);
        assert!(texture.write_bytes(&[0; 4], 2, 2).is_err());
    }
}
