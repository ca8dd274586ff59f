//! Backend abstraction layer
//!
//! Provides common traits and types that both the wgpu and software backends implement.

pub mod parameters;
pub mod reflect;
pub mod software;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use parameters::*;
pub use traits::*;
pub use types::*;
