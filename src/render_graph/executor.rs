//! Per-frame execution of a pass sequence

use crate::backend::traits::*;
use crate::render_graph::graph::*;
use crate::render_graph::pass::*;
use crate::scene::{FrameState, FrameTransforms, Scene};

impl PassSequencer {
    /// Run every pass once, in order, drawing into `surface` for the visible target
    ///
    /// Transforms are computed once from `frame`; each pass binds its target,
    /// sets its parameters and draws. Snapshots are copied as soon as their
    /// source pass has ended.
    pub fn execute_frame(
        &self,
        backend: &mut dyn GraphicsBackend,
        frame: &FrameState,
        scene: &Scene,
        surface: TextureHandle,
    ) -> Result<(), SequencerError> {
        let transforms = FrameTransforms::new(frame, scene);

        for (pass, node) in self.passes.iter().zip(&self.nodes) {
            let Some(target) = self.targets.get(node.output) else {
                return Err(SequencerError::UnknownTarget {
                    pass: node.name.clone(),
                    target: node.output,
                });
            };

            let inputs = self.resolve_inputs(node, surface);
            log::trace!("Executing pass '{}' into '{}'", node.name, target.label());

            {
                let mut bound = target.bind(backend, surface, pass.load(scene));
                let mut ctx = PassContext::new(bound.backend(), frame, &transforms, scene, &inputs);
                pass.execute(&mut ctx);
            }

            for snapshot in self.snapshots.iter().filter(|s| s.source == node.output) {
                if let Some(destination) = self.targets.get(snapshot.destination) {
                    target.snapshot_color_into(backend, surface, destination)?;
                }
            }
        }
        Ok(())
    }

    fn resolve_inputs(&self, node: &PassNode, surface: TextureHandle) -> Vec<Option<TextureHandle>> {
        node.inputs
            .iter()
            .map(|input| {
                let texture = self.targets.resolve(*input, surface);
                if texture.is_none() {
                    log::warn!("Pass '{}' input {:?} has no texture", node.name, input);
                }
                texture
            })
            .collect()
    }
}
