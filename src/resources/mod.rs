//! Resource management
//!
//! Meshes, drawables, materials, textures and linked shader programs.

mod drawable;
mod material;
mod mesh;
mod program;
mod texture;

pub use drawable::*;
pub use material::*;
pub use mesh::*;
pub use program::*;
pub use texture::*;
