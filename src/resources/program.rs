//! Linked shader programs and per-draw parameter binding

use crate::backend::parameters::{ParameterBlock, ParameterLayout, ParameterValue};
use crate::backend::traits::*;
use crate::resources::drawable::Drawable;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

/// A compiled and linked program with its named parameter slots
#[derive(Debug)]
pub struct ShaderProgram {
    handle: ProgramHandle,
    label: String,
    layout: Arc<ParameterLayout>,
    attributes: Vec<AttributeBinding>,
    /// Names already reported as unknown or mistyped
    warned: Mutex<HashSet<String>>,
}

impl ShaderProgram {
    /// Compile and link; failures are fatal
    pub fn new(backend: &mut dyn GraphicsBackend, desc: &ProgramDescriptor) -> BackendResult<Self> {
        let handle = backend.create_program(desc)?;
        log::debug!(
            "Linked program '{}' ({} uniforms, {} textures)",
            desc.label,
            desc.uniforms.len(),
            desc.textures.len()
        );
        Ok(Self {
            handle,
            label: desc.label.clone(),
            layout: Arc::new(ParameterLayout::new(&desc.uniforms, &desc.textures)),
            attributes: desc.attributes.clone(),
            warned: Mutex::new(HashSet::new()),
        })
    }

    pub fn handle(&self) -> ProgramHandle {
        self.handle
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn layout(&self) -> &Arc<ParameterLayout> {
        &self.layout
    }

    pub fn attributes(&self) -> &[AttributeBinding] {
        &self.attributes
    }

    /// Make the program current and start a fresh parameter block
    pub fn activate(&self, backend: &mut dyn GraphicsBackend) -> ActiveProgram<'_> {
        backend.set_program(self.handle);
        ActiveProgram {
            program: self,
            block: self.layout.block(),
        }
    }

    fn warn_once(&self, name: &str, message: impl FnOnce() -> String) {
        if self.warned.lock().insert(name.to_string()) {
            log::warn!("Program '{}': {}", self.label, message());
        }
    }
}

/// A program made current, collecting the parameters of the next draws
pub struct ActiveProgram<'a> {
    program: &'a ShaderProgram,
    block: ParameterBlock,
}

impl<'a> ActiveProgram<'a> {
    pub fn program(&self) -> &'a ShaderProgram {
        self.program
    }

    pub fn parameters(&self) -> &ParameterBlock {
        &self.block
    }

    /// Set a named parameter; unknown names and mismatched types are ignored
    pub fn set_parameter(&mut self, name: &str, value: impl Into<ParameterValue>) -> &mut Self {
        if let Err(e) = self.block.set(name, value) {
            self.program.warn_once(name, || e.to_string());
        }
        self
    }

    /// Set every parameter at once, then draw the whole drawable
    pub fn draw(&self, backend: &mut dyn GraphicsBackend, drawable: &Drawable) {
        self.submit(backend, drawable, None);
    }

    /// Draw an index range of the drawable
    pub fn draw_range(&self, backend: &mut dyn GraphicsBackend, drawable: &Drawable, indices: Range<u32>) {
        self.submit(backend, drawable, Some(indices));
    }

    fn submit(&self, backend: &mut dyn GraphicsBackend, drawable: &Drawable, indices: Option<Range<u32>>) {
        if let Some(missing) = drawable.missing_attribute(self.program.attributes()) {
            self.program.warn_once(&format!("attribute:{}", missing.name), || {
                format!(
                    "drawable '{}' has no attribute at location {} ('{}'), draw skipped",
                    drawable.label(),
                    missing.location,
                    missing.name
                )
            });
            return;
        }
        backend.set_program(self.program.handle);
        backend.set_parameters(&self.block);
        drawable.issue(backend, indices);
    }
}
