//! Surface materials for the shading program

use crate::backend::traits::TextureHandle;
use glam::Vec3;

/// Diffuse/emissive material applied per submesh
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    pub diffuse_color: Vec3,
    pub emissive_color: Vec3,
    pub diffuse_texture: Option<TextureHandle>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            diffuse_color: Vec3::ONE,
            emissive_color: Vec3::ZERO,
            diffuse_texture: None,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_diffuse(mut self, color: Vec3) -> Self {
        self.diffuse_color = color;
        self
    }

    pub fn with_emissive(mut self, color: Vec3) -> Self {
        self.emissive_color = color;
        self
    }

    pub fn with_texture(mut self, texture: TextureHandle) -> Self {
        self.diffuse_texture = Some(texture);
        self
    }

    pub fn has_diffuse_texture(&self) -> bool {
        self.diffuse_texture.is_some()
    }

    /// Material of the security screens: black, lit only by the feed
    pub fn screen() -> Self {
        Self::new("screen")
            .with_diffuse(Vec3::ZERO)
            .with_emissive(Vec3::splat(1.5))
    }

    pub fn gray() -> Self {
        Self::new("gray").with_diffuse(Vec3::splat(0.6))
    }

    pub fn red() -> Self {
        Self::new("red").with_diffuse(Vec3::new(0.8, 0.1, 0.1))
    }

    pub fn metal() -> Self {
        Self::new("metal").with_diffuse(Vec3::new(0.55, 0.57, 0.6))
    }

    pub fn glass() -> Self {
        Self::new("glass")
            .with_diffuse(Vec3::new(0.1, 0.2, 0.3))
            .with_emissive(Vec3::new(0.05, 0.1, 0.2))
    }

    pub fn lamp() -> Self {
        Self::new("lamp")
            .with_diffuse(Vec3::ONE)
            .with_emissive(Vec3::new(2.0, 1.8, 1.2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_flag_follows_texture() {
        let material = Material::gray();
        assert!(!material.has_diffuse_texture());
        assert!(material.with_texture(TextureHandle(3)).has_diffuse_texture());
    }

    #[test]
    fn test_screen_material() {
        let screen = Material::screen();
        assert_eq!(screen.diffuse_color, Vec3::ZERO);
        assert_eq!(screen.emissive_color, Vec3::splat(1.5));
    }
}
