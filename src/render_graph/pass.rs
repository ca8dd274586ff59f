//! Render pass definitions for the pass sequencer

use crate::backend::traits::*;
use crate::render_graph::resource::*;
use crate::render_graph::target::TargetLoad;
use crate::scene::{FrameState, FrameTransforms, Scene};

/// Unique identifier for a render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PassId(pub(crate) u32);

/// Stage of the frame; passes run in strictly increasing rank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PassKind {
    ShadowCapture,
    SceneRender,
    BrightnessCutoff,
    HorizontalBlur,
    VerticalBlur,
    Composite,
}

impl PassKind {
    pub fn rank(&self) -> u32 {
        match self {
            PassKind::ShadowCapture => 0,
            PassKind::SceneRender => 1,
            PassKind::BrightnessCutoff => 2,
            PassKind::HorizontalBlur => 3,
            PassKind::VerticalBlur => 4,
            PassKind::Composite => 5,
        }
    }

    pub fn is_bloom(&self) -> bool {
        matches!(
            self,
            PassKind::BrightnessCutoff | PassKind::HorizontalBlur | PassKind::VerticalBlur
        )
    }
}

/// Everything a pass sees while its target is bound
pub struct PassContext<'a> {
    backend: &'a mut dyn GraphicsBackend,
    pub frame: &'a FrameState,
    pub transforms: &'a FrameTransforms,
    pub scene: &'a Scene,
    inputs: &'a [Option<TextureHandle>],
}

impl<'a> PassContext<'a> {
    pub(crate) fn new(
        backend: &'a mut dyn GraphicsBackend,
        frame: &'a FrameState,
        transforms: &'a FrameTransforms,
        scene: &'a Scene,
        inputs: &'a [Option<TextureHandle>],
    ) -> Self {
        Self {
            backend,
            frame,
            transforms,
            scene,
            inputs,
        }
    }

    pub fn backend(&mut self) -> &mut dyn GraphicsBackend {
        self.backend
    }

    /// Texture of the declared input at `index`, in declaration order
    pub fn input(&self, index: usize) -> Option<TextureHandle> {
        self.inputs.get(index).copied().flatten()
    }
}

/// Trait for render passes
pub trait RenderPass {
    /// Get the pass name for debugging
    fn name(&self) -> &str;

    fn kind(&self) -> PassKind;

    /// Textures of earlier targets this pass samples
    fn inputs(&self) -> Vec<TextureRef>;

    /// Target bound while the pass executes
    fn output(&self) -> TargetId;

    /// How the output is initialized when bound
    fn load(&self, scene: &Scene) -> TargetLoad;

    /// Issue the pass's draws
    fn execute(&self, ctx: &mut PassContext);
}

/// Metadata about a pass in the sequence
#[derive(Debug, Clone, PartialEq)]
pub struct PassNode {
    pub id: PassId,
    pub name: String,
    pub kind: PassKind,
    pub inputs: Vec<TextureRef>,
    pub output: TargetId,
}
