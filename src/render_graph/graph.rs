//! Pass sequence definition and validation

use crate::backend::traits::{BackendError, GraphicsBackend};
use crate::render_graph::pass::*;
use crate::render_graph::resource::*;
use crate::render_graph::target::RenderTargetError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SequencerError {
    #[error("Pass '{pass}' ({kind:?}) cannot run after {previous:?}")]
    OutOfOrder {
        pass: String,
        kind: PassKind,
        previous: PassKind,
    },
    #[error("Pass '{pass}' reads from {target:?}, which it also writes")]
    ReadWriteHazard { pass: String, target: TargetId },
    #[error("Pass '{pass}' reads {input:?}, which no earlier pass writes")]
    UnresolvedInput { pass: String, input: TextureRef },
    #[error("Pass '{pass}' writes to unknown target {target:?}")]
    UnknownTarget { pass: String, target: TargetId },
    #[error("Invalid snapshot from {source_target:?} into {destination:?}: {reason}")]
    InvalidSnapshot {
        source_target: TargetId,
        destination: TargetId,
        reason: String,
    },
    #[error("Pass sequence is incomplete: {0}")]
    Incomplete(String),
    #[error(transparent)]
    Target(#[from] RenderTargetError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// A copy of one target's color into a persistent target, made after the source is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub source: TargetId,
    pub destination: TargetId,
}

/// Fixed, linear sequence of passes re-executed every frame
pub struct PassSequencer {
    pub(crate) passes: Vec<Box<dyn RenderPass>>,
    pub(crate) nodes: Vec<PassNode>,
    pub(crate) snapshots: Vec<Snapshot>,
    pub(crate) targets: TargetRegistry,
}

impl PassSequencer {
    pub fn new(targets: TargetRegistry) -> Self {
        Self {
            passes: Vec::new(),
            nodes: Vec::new(),
            snapshots: Vec::new(),
            targets,
        }
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.targets
    }

    /// Append a pass, rejecting anything that breaks the frame order or aliases its output
    pub fn add_pass<P: RenderPass + 'static>(&mut self, pass: P) -> Result<PassId, SequencerError> {
        let name = pass.name().to_string();
        let kind = pass.kind();
        let output = pass.output();
        let inputs = pass.inputs();

        if let Some(previous) = self.nodes.last() {
            if kind.rank() <= previous.kind.rank() {
                return Err(SequencerError::OutOfOrder {
                    pass: name,
                    kind,
                    previous: previous.kind,
                });
            }
        }

        if !self.targets.contains(output) {
            return Err(SequencerError::UnknownTarget { pass: name, target: output });
        }

        for input in &inputs {
            let target = input.target();
            if target == output {
                return Err(SequencerError::ReadWriteHazard { pass: name, target });
            }
            let written_earlier = self.nodes.iter().any(|n| n.output == target);
            let persistent = self.targets.kind(target) == Some(TargetKind::Persistent);
            let has_texture = self.targets.get(target).is_some_and(|t| match input {
                TextureRef::Color(_) => t.is_visible() || t.resolve_color_as_texture().is_some(),
                TextureRef::Depth(_) => t.depth_texture().is_some(),
            });
            if !(written_earlier || persistent) || !has_texture {
                return Err(SequencerError::UnresolvedInput {
                    pass: name,
                    input: *input,
                });
            }
        }

        let id = PassId(self.nodes.len() as u32);
        log::debug!("Added pass '{}' ({:?}) writing {:?}", name, kind, output);
        self.nodes.push(PassNode {
            id,
            name,
            kind,
            inputs,
            output,
        });
        self.passes.push(Box::new(pass));
        Ok(id)
    }

    /// Copy `source`'s color into the persistent `destination` right after `source` is written
    pub fn add_snapshot(&mut self, source: TargetId, destination: TargetId) -> Result<(), SequencerError> {
        let invalid = |reason: &str| SequencerError::InvalidSnapshot {
            source_target: source,
            destination,
            reason: reason.to_string(),
        };

        if !self.nodes.iter().any(|n| n.output == source) {
            return Err(invalid("no pass writes the source"));
        }
        if source == destination {
            return Err(invalid("source and destination are the same target"));
        }
        if self.targets.kind(destination) != Some(TargetKind::Persistent) {
            return Err(invalid("destination is not a persistent target"));
        }
        match (self.targets.get(source), self.targets.get(destination)) {
            (Some(s), Some(d)) if s.size() == d.size() => {}
            _ => return Err(invalid("targets differ in size")),
        }

        self.snapshots.push(Snapshot { source, destination });
        Ok(())
    }

    /// Check that the sequence forms a complete frame
    pub fn validate(&self) -> Result<(), SequencerError> {
        let has = |kind: PassKind| self.nodes.iter().any(|n| n.kind == kind);

        let Some(scene) = self.nodes.iter().find(|n| n.kind == PassKind::SceneRender) else {
            return Err(SequencerError::Incomplete("no scene pass".to_string()));
        };

        let bloom_passes = self.nodes.iter().filter(|n| n.kind.is_bloom()).count();
        if bloom_passes != 0 && bloom_passes != 3 {
            return Err(SequencerError::Incomplete(
                "bloom needs cutoff, horizontal and vertical blur".to_string(),
            ));
        }

        let offscreen = scene.output != TargetId::VISIBLE;
        if (offscreen || bloom_passes > 0) && !has(PassKind::Composite) {
            return Err(SequencerError::Incomplete(
                "offscreen scene or bloom without a composite pass".to_string(),
            ));
        }

        match self.nodes.last() {
            Some(last) if last.output == TargetId::VISIBLE => Ok(()),
            _ => Err(SequencerError::Incomplete(
                "final pass does not write the visible target".to_string(),
            )),
        }
    }

    /// Get pass nodes (metadata)
    pub fn nodes(&self) -> &[PassNode] {
        &self.nodes
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Follow a surface resize
    pub fn resize(&mut self, backend: &mut dyn GraphicsBackend, width: u32, height: u32) -> Result<(), SequencerError> {
        Ok(self.targets.resize(backend, width, height)?)
    }

    pub fn destroy(self, backend: &mut dyn GraphicsBackend) {
        self.targets.destroy(backend);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;
    use crate::backend::types::TextureFormat;
    use crate::render_graph::target::TargetLoad;
    use crate::scene::Scene;

    /// Pass that draws nothing
    pub(crate) struct NullPass {
        pub kind: PassKind,
        pub inputs: Vec<TextureRef>,
        pub output: TargetId,
    }

    impl NullPass {
        pub fn new(kind: PassKind, inputs: Vec<TextureRef>, output: TargetId) -> Self {
            Self { kind, inputs, output }
        }
    }

    impl RenderPass for NullPass {
        fn name(&self) -> &str {
            "null"
        }

        fn kind(&self) -> PassKind {
            self.kind
        }

        fn inputs(&self) -> Vec<TextureRef> {
            self.inputs.clone()
        }

        fn output(&self) -> TargetId {
            self.output
        }

        fn load(&self, _scene: &Scene) -> TargetLoad {
            TargetLoad::load()
        }

        fn execute(&self, _ctx: &mut PassContext) {}
    }

    struct Fixture {
        backend: SoftwareBackend,
        sequencer: PassSequencer,
        scene: TargetId,
        half: TargetId,
        feed: TargetId,
    }

    fn fixture() -> Fixture {
        let mut backend = SoftwareBackend::new(16, 16);
        let mut targets = TargetRegistry::new(&mut backend, 16, 16).unwrap();
        let scene = targets
            .add(
                &mut backend,
                TargetDesc::new("scene", TargetSize::default())
                    .color(TextureFormat::Rgba16Float)
                    .depth(TextureFormat::Depth32Float),
            )
            .unwrap();
        let half = targets
            .add(
                &mut backend,
                TargetDesc::new("half", TargetSize::Relative { scale: 0.5 }).color(TextureFormat::Rgba16Float),
            )
            .unwrap();
        let feed = targets
            .add(
                &mut backend,
                TargetDesc::new("feed", TargetSize::default())
                    .color(TextureFormat::Rgba16Float)
                    .persistent(),
            )
            .unwrap();
        Fixture {
            backend,
            sequencer: PassSequencer::new(targets),
            scene,
            half,
            feed,
        }
    }

    #[test]
    fn test_out_of_order_pass_is_rejected() {
        let mut f = fixture();
        f.sequencer
            .add_pass(NullPass::new(PassKind::SceneRender, vec![], TargetId::VISIBLE))
            .unwrap();
        let result = f
            .sequencer
            .add_pass(NullPass::new(PassKind::ShadowCapture, vec![], f.half));
        assert!(matches!(result, Err(SequencerError::OutOfOrder { .. })));
        let result = f
            .sequencer
            .add_pass(NullPass::new(PassKind::SceneRender, vec![], f.half));
        assert!(matches!(result, Err(SequencerError::OutOfOrder { .. })));
    }

    #[test]
    fn test_reading_own_output_is_a_hazard() {
        let mut f = fixture();
        let result = f.sequencer.add_pass(NullPass::new(
            PassKind::SceneRender,
            vec![TextureRef::Color(f.scene)],
            f.scene,
        ));
        assert!(matches!(result, Err(SequencerError::ReadWriteHazard { .. })));
    }

    #[test]
    fn test_inputs_must_be_written_earlier_or_persistent() {
        let mut f = fixture();
        let result = f.sequencer.add_pass(NullPass::new(
            PassKind::SceneRender,
            vec![TextureRef::Color(f.half)],
            f.scene,
        ));
        assert!(matches!(result, Err(SequencerError::UnresolvedInput { .. })));

        f.sequencer
            .add_pass(NullPass::new(
                PassKind::SceneRender,
                vec![TextureRef::Color(f.feed)],
                f.scene,
            ))
            .unwrap();
        let result = f.sequencer.add_pass(NullPass::new(
            PassKind::BrightnessCutoff,
            vec![TextureRef::Depth(f.half)],
            TargetId::VISIBLE,
        ));
        assert!(matches!(result, Err(SequencerError::UnresolvedInput { .. })));
    }

    #[test]
    fn test_validate_requires_composite_for_offscreen_scene() {
        let mut f = fixture();
        f.sequencer
            .add_pass(NullPass::new(PassKind::SceneRender, vec![], f.scene))
            .unwrap();
        assert!(matches!(f.sequencer.validate(), Err(SequencerError::Incomplete(_))));

        f.sequencer
            .add_pass(NullPass::new(
                PassKind::Composite,
                vec![TextureRef::Color(f.scene)],
                TargetId::VISIBLE,
            ))
            .unwrap();
        f.sequencer.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_partial_bloom() {
        let mut f = fixture();
        f.sequencer
            .add_pass(NullPass::new(PassKind::SceneRender, vec![], f.scene))
            .unwrap();
        f.sequencer
            .add_pass(NullPass::new(
                PassKind::BrightnessCutoff,
                vec![TextureRef::Color(f.scene)],
                f.half,
            ))
            .unwrap();
        f.sequencer
            .add_pass(NullPass::new(
                PassKind::Composite,
                vec![TextureRef::Color(f.scene), TextureRef::Color(f.half)],
                TargetId::VISIBLE,
            ))
            .unwrap();
        assert!(matches!(f.sequencer.validate(), Err(SequencerError::Incomplete(_))));
    }

    #[test]
    fn test_validate_requires_scene_pass() {
        let f = fixture();
        assert!(f.sequencer.validate().is_err());
    }

    #[test]
    fn test_snapshot_needs_persistent_destination() {
        let mut f = fixture();
        f.sequencer
            .add_pass(NullPass::new(PassKind::SceneRender, vec![], f.scene))
            .unwrap();
        assert!(matches!(
            f.sequencer.add_snapshot(f.scene, f.half),
            Err(SequencerError::InvalidSnapshot { .. })
        ));
        f.sequencer.add_snapshot(f.scene, f.feed).unwrap();
        assert_eq!(f.sequencer.snapshots().len(), 1);
        f.sequencer.destroy(&mut f.backend);
    }
}
