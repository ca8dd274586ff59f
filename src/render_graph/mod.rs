//! Render targets and the pass sequencer
//!
//! A frame is a fixed linear chain of passes. Each pass binds one target,
//! samples textures of earlier targets and draws. The sequencer rejects
//! chains that run out of order or read what they write.

pub mod executor;
pub mod graph;
pub mod pass;
pub mod resource;
pub mod target;

pub use graph::*;
pub use pass::*;
pub use resource::*;
pub use target::*;
