//! Multi-pass rendering pipeline
//!
//! Every demonstration runs a subset of one fixed chain:
//! 1. Shadow capture - scene depth from the light
//! 2. Scene render - shaded objects, optionally shadowed, optionally offscreen
//! 3. Bloom - brightness cutoff, then a horizontal and a vertical blur
//! 4. Composite - post effect and bloom over the offscreen scene, into the window

pub mod postprocess;
pub mod scene_pass;
pub mod shadow_pass;

pub use postprocess::{BlurAxis, BlurPass, BrightnessCutoffPass, CompositePass, PostEffect};
pub use scene_pass::ScenePass;
pub use shadow_pass::ShadowPass;

use crate::backend::traits::GraphicsBackend;
use crate::backend::types::TextureFormat;
use crate::render_graph::*;
use crate::resources::FixedDrawables;
use crate::{DemoVariant, EngineConfig};

/// Format of offscreen color targets
pub const OFFSCREEN_COLOR_FORMAT: TextureFormat = TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Bloom settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomSettings {
    /// Brightest channel must exceed this to bloom
    pub threshold: f32,
    /// Scale of the blurred image added back over the scene
    pub intensity: f32,
    /// Bloom targets are this many times smaller than the surface
    pub downscale: u32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            intensity: 1.0,
            downscale: 2,
        }
    }
}

/// Which passes exist and how their targets are sized
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PipelineConfig {
    /// Render the scene into an offscreen target and composite it
    pub offscreen: bool,
    /// Side of the square shadow map; `None` disables shadow capture
    pub shadow_map_resolution: Option<u32>,
    pub bloom: Option<BloomSettings>,
    /// Show the previous frame on the security screens
    pub security_feed: bool,
}

impl PipelineConfig {
    pub fn for_variant(config: &EngineConfig) -> Self {
        match config.variant {
            DemoVariant::Camera => Self::default(),
            DemoVariant::PostFx => Self {
                offscreen: true,
                bloom: Some(BloomSettings {
                    threshold: config.bloom_threshold,
                    intensity: config.bloom_intensity,
                    downscale: config.bloom_downscale.max(1),
                }),
                security_feed: true,
                ..Self::default()
            },
            DemoVariant::ShadowMap => Self {
                shadow_map_resolution: Some(config.shadow_map_resolution.max(1)),
                ..Self::default()
            },
        }
    }
}

/// Targets created by [`build_sequencer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineTargets {
    pub shadow_map: Option<TargetId>,
    /// Offscreen scene color and depth
    pub scene: Option<TargetId>,
    /// Persistent copy of the scene shown on the security screens
    pub feed: Option<TargetId>,
    pub bloom_cutoff: Option<TargetId>,
    pub bloom_horizontal: Option<TargetId>,
    pub bloom_vertical: Option<TargetId>,
}

/// Create the targets and passes of a pipeline and validate the sequence
pub fn build_sequencer(
    backend: &mut dyn GraphicsBackend,
    config: &PipelineConfig,
    width: u32,
    height: u32,
    fixed: &mut FixedDrawables,
) -> Result<(PassSequencer, PipelineTargets), SequencerError> {
    let mut registry = TargetRegistry::new(backend, width, height)?;
    let mut targets = PipelineTargets::default();

    if let Some(resolution) = config.shadow_map_resolution {
        targets.shadow_map = Some(registry.add(
            backend,
            TargetDesc::new(
                "shadow map",
                TargetSize::Absolute {
                    width: resolution,
                    height: resolution,
                },
            )
            .depth(DEPTH_FORMAT),
        )?);
    }

    let offscreen = config.offscreen || config.bloom.is_some();
    if offscreen {
        targets.scene = Some(registry.add(
            backend,
            TargetDesc::new("scene", TargetSize::default())
                .color(OFFSCREEN_COLOR_FORMAT)
                .depth(DEPTH_FORMAT),
        )?);
    }

    // The feed copies the scene color, so it only exists offscreen
    if config.security_feed && offscreen {
        targets.feed = Some(registry.add(
            backend,
            TargetDesc::new("security feed", TargetSize::default())
                .color(OFFSCREEN_COLOR_FORMAT)
                .persistent(),
        )?);
    }

    if let Some(bloom) = &config.bloom {
        let size = TargetSize::Relative {
            scale: 1.0 / bloom.downscale.max(1) as f32,
        };
        let mut bloom_target = |label: &str| {
            registry.add(backend, TargetDesc::new(label, size).color(OFFSCREEN_COLOR_FORMAT))
        };
        targets.bloom_cutoff = Some(bloom_target("bloom cutoff")?);
        targets.bloom_horizontal = Some(bloom_target("bloom horizontal")?);
        targets.bloom_vertical = Some(bloom_target("bloom vertical")?);
    }

    let mut sequencer = PassSequencer::new(registry);

    if let Some(shadow_map) = targets.shadow_map {
        sequencer.add_pass(ShadowPass::new(backend, shadow_map)?)?;
    }

    let scene_output = targets.scene.unwrap_or(TargetId::VISIBLE);
    sequencer.add_pass(ScenePass::new(backend, scene_output, targets.shadow_map, targets.feed)?)?;
    if let Some(feed) = targets.feed {
        sequencer.add_snapshot(scene_output, feed)?;
    }

    if let Some(scene) = targets.scene {
        let quad = fixed.fullscreen_quad(backend)?;
        let mut bloom_output = None;

        if let (Some(bloom), Some(cutoff), Some(horizontal), Some(vertical)) = (
            &config.bloom,
            targets.bloom_cutoff,
            targets.bloom_horizontal,
            targets.bloom_vertical,
        ) {
            sequencer.add_pass(BrightnessCutoffPass::new(
                backend,
                quad.clone(),
                scene,
                cutoff,
                bloom.threshold,
            )?)?;
            sequencer.add_pass(BlurPass::new(backend, BlurAxis::Horizontal, quad.clone(), cutoff, horizontal)?)?;
            sequencer.add_pass(BlurPass::new(backend, BlurAxis::Vertical, quad.clone(), horizontal, vertical)?)?;
            bloom_output = Some(vertical);
        }

        let intensity = config.bloom.map(|b| b.intensity).unwrap_or(0.0);
        sequencer.add_pass(CompositePass::new(backend, quad, scene, bloom_output, intensity)?)?;
    }

    sequencer.validate()?;

    let names: Vec<&str> = sequencer.nodes().iter().map(|n| n.name.as_str()).collect();
    log::info!("Pipeline built: {}", names.join(" -> "));

    Ok((sequencer, targets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::SoftwareBackend;

    fn build(config: &PipelineConfig) -> (PassSequencer, PipelineTargets) {
        let mut backend = SoftwareBackend::new(32, 16);
        build_sequencer(&mut backend, config, 32, 16, &mut FixedDrawables::new()).unwrap()
    }

    fn kinds(sequencer: &PassSequencer) -> Vec<PassKind> {
        sequencer.nodes().iter().map(|n| n.kind).collect()
    }

    #[test]
    fn test_camera_pipeline_draws_straight_to_the_window() {
        let config = PipelineConfig::for_variant(&EngineConfig {
            variant: DemoVariant::Camera,
            ..Default::default()
        });
        let (sequencer, targets) = build(&config);
        assert_eq!(kinds(&sequencer), vec![PassKind::SceneRender]);
        assert_eq!(sequencer.nodes()[0].output, TargetId::VISIBLE);
        assert_eq!(targets, PipelineTargets::default());
    }

    #[test]
    fn test_postfx_pipeline_runs_the_full_chain() {
        let config = PipelineConfig::for_variant(&EngineConfig {
            variant: DemoVariant::PostFx,
            ..Default::default()
        });
        let (sequencer, targets) = build(&config);
        assert_eq!(
            kinds(&sequencer),
            vec![
                PassKind::SceneRender,
                PassKind::BrightnessCutoff,
                PassKind::HorizontalBlur,
                PassKind::VerticalBlur,
                PassKind::Composite,
            ]
        );

        let scene = targets.scene.unwrap();
        let feed = targets.feed.unwrap();
        assert_eq!(sequencer.snapshots(), &[Snapshot { source: scene, destination: feed }]);

        let cutoff = sequencer.targets().get(targets.bloom_cutoff.unwrap()).unwrap();
        assert_eq!(cutoff.size(), (16, 8));
    }

    #[test]
    fn test_shadow_pipeline_captures_depth_first() {
        let config = PipelineConfig::for_variant(&EngineConfig {
            variant: DemoVariant::ShadowMap,
            shadow_map_resolution: 64,
            ..Default::default()
        });
        let (sequencer, targets) = build(&config);
        assert_eq!(kinds(&sequencer), vec![PassKind::ShadowCapture, PassKind::SceneRender]);

        let shadow_map = sequencer.targets().get(targets.shadow_map.unwrap()).unwrap();
        assert_eq!(shadow_map.size(), (64, 64));
        assert!(shadow_map.resolve_color_as_texture().is_none());
        assert_eq!(
            sequencer.nodes()[1].inputs,
            vec![TextureRef::Depth(targets.shadow_map.unwrap())]
        );
    }

    #[test]
    fn test_offscreen_without_bloom_still_composites() {
        let config = PipelineConfig {
            offscreen: true,
            ..Default::default()
        };
        let (sequencer, targets) = build(&config);
        assert_eq!(kinds(&sequencer), vec![PassKind::SceneRender, PassKind::Composite]);
        assert!(targets.feed.is_none());
    }
}
