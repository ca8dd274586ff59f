//! Main engine orchestrator
//!
//! Owns the backend, the scene of the selected demonstration and the pass
//! sequence that draws it. The runner feeds it one [`FrameState`] per frame.

use crate::backend::software::SoftwareBackend;
use crate::backend::traits::*;
use crate::backend::wgpu_backend::WgpuBackend;
use crate::pipeline::{build_sequencer, PipelineConfig, PipelineTargets, PostEffect};
use crate::render_graph::{PassSequencer, RenderTargetError, SequencerError};
use crate::resources::FixedDrawables;
use crate::scene::{presets, FrameState, OrbitCamera, Scene};
use crate::{BackendType, EngineConfig};
use std::sync::Arc;
use thiserror::Error;
use winit::window::Window as WinitWindow;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
    #[error(transparent)]
    RenderTarget(#[from] RenderTargetError),
    #[error("Event loop failed: {0}")]
    EventLoop(#[from] winit::error::EventLoopError),
    #[error("Failed to create window: {0}")]
    Window(#[from] winit::error::OsError),
}

/// The main graphics engine
pub struct Engine {
    backend: Box<dyn GraphicsBackend>,
    config: EngineConfig,
    pipeline: PipelineConfig,
    scene: Scene,
    fixed: FixedDrawables,
    sequencer: PassSequencer,
    targets: PipelineTargets,
    camera: OrbitCamera,
    effect: PostEffect,
    width: u32,
    height: u32,
}

impl Engine {
    /// Create an engine presenting to `window`
    pub fn new(window: Arc<WinitWindow>, config: EngineConfig) -> Result<Self, EngineError> {
        let backend: Box<dyn GraphicsBackend> = match config.backend {
            BackendType::Wgpu => Box::new(WgpuBackend::new(window, config.vsync)?),
            BackendType::Software => {
                return Err(BackendError::InitializationFailed(
                    "the software backend cannot present to a window".into(),
                )
                .into())
            }
        };
        Self::from_backend(backend, config)
    }

    /// Create an engine drawing into an offscreen surface of the configured size
    pub fn headless(config: EngineConfig) -> Result<Self, EngineError> {
        let backend: Box<dyn GraphicsBackend> = match config.backend {
            BackendType::Wgpu => Box::new(WgpuBackend::headless(config.width, config.height)?),
            BackendType::Software => Box::new(SoftwareBackend::new(config.width, config.height)),
        };
        Self::from_backend(backend, config)
    }

    /// Build the scene and pass sequence of `config.variant` on an initialized backend
    pub fn from_backend(mut backend: Box<dyn GraphicsBackend>, config: EngineConfig) -> Result<Self, EngineError> {
        let (width, height) = backend.surface_size();
        log::info!(
            "Starting {:?} demonstration on the {} backend at {}x{}",
            config.variant,
            backend.name(),
            width,
            height
        );

        let mut fixed = FixedDrawables::new();
        fixed.fullscreen_quad(backend.as_mut())?;
        fixed.security_screen_quad(backend.as_mut())?;

        let scene = presets::build(backend.as_mut(), config.variant, &mut fixed)?;
        let pipeline = PipelineConfig::for_variant(&config);
        let (sequencer, targets) = build_sequencer(backend.as_mut(), &pipeline, width, height, &mut fixed)?;

        Ok(Self {
            camera: presets::default_camera(config.variant),
            effect: PostEffect::Passthrough,
            backend,
            config,
            pipeline,
            scene,
            fixed,
            sequencer,
            targets,
            width,
            height,
        })
    }

    /// Draw and present one frame at animation time `time`
    ///
    /// A lost surface skips the frame; the backend has already reconfigured it.
    pub fn render_frame(&mut self, time: f32) -> Result<(), EngineError> {
        let frame = match self.backend.begin_frame() {
            Ok(frame) => frame,
            Err(BackendError::SurfaceLost) => {
                log::warn!("Surface lost, skipping frame");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let state = self.frame_state(time);
        self.sequencer
            .execute_frame(self.backend.as_mut(), &state, &self.scene, frame.surface)?;
        self.backend.end_frame()?;
        Ok(())
    }

    /// The state every pass of a frame at `time` observes
    pub fn frame_state(&self, time: f32) -> FrameState {
        FrameState {
            time,
            camera: self.camera,
            viewport: (self.width, self.height),
            effect: self.effect,
        }
    }

    /// Handle window resize
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), EngineError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.backend.resize(width, height);

        // The backend may clamp to device limits
        let (actual_width, actual_height) = self.backend.surface_size();
        if (actual_width, actual_height) == (self.width, self.height) {
            return Ok(());
        }

        self.sequencer
            .resize(self.backend.as_mut(), actual_width, actual_height)?;
        self.width = actual_width;
        self.height = actual_height;
        log::debug!("Resized to {}x{}", actual_width, actual_height);
        Ok(())
    }

    /// Release every render target
    pub fn shutdown(self) {
        let Engine {
            mut backend, sequencer, ..
        } = self;
        sequencer.destroy(backend.as_mut());
        log::info!("Engine shut down");
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut OrbitCamera {
        &mut self.camera
    }

    pub fn effect(&self) -> PostEffect {
        self.effect
    }

    pub fn set_effect(&mut self, effect: PostEffect) {
        if self.effect != effect {
            log::info!("Post effect: {:?}", effect);
        }
        self.effect = effect;
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn sequencer(&self) -> &PassSequencer {
        &self.sequencer
    }

    pub fn targets(&self) -> &PipelineTargets {
        &self.targets
    }

    pub fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    pub fn fixed_drawables(&self) -> &FixedDrawables {
        &self.fixed
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get current dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Get mutable access to the backend, e.g. for readback
    pub fn backend_mut(&mut self) -> &mut dyn GraphicsBackend {
        self.backend.as_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DemoVariant;
    use glam::Vec4;

    fn software(variant: DemoVariant) -> Engine {
        Engine::headless(EngineConfig {
            backend: BackendType::Software,
            width: 48,
            height: 32,
            variant,
            shadow_map_resolution: 64,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_camera_variant_renders_into_surface() {
        let mut engine = software(DemoVariant::Camera);
        engine.render_frame(0.0).unwrap();

        let readback = engine.backend_mut().read_texture(TextureHandle(0)).unwrap();
        let background = engine.scene().clear_color;
        assert!(!readback.coverage(background, 0.02).is_empty());
    }

    #[test]
    fn test_postfx_variant_fills_the_security_feed() {
        let mut engine = software(DemoVariant::PostFx);
        engine.render_frame(0.5).unwrap();

        let feed = engine.targets().feed.unwrap();
        let texture = engine
            .sequencer()
            .targets()
            .get(feed)
            .and_then(|t| t.resolve_color_as_texture())
            .unwrap();
        let readback = engine.backend_mut().read_texture(texture).unwrap();
        assert!(readback.texels.iter().any(|t| *t != Vec4::ZERO));
    }

    #[test]
    fn test_resize_recreates_relative_targets() {
        let mut engine = software(DemoVariant::PostFx);
        engine.resize(64, 40).unwrap();
        assert_eq!(engine.dimensions(), (64, 40));

        let scene = engine.sequencer().targets().get(engine.targets().scene.unwrap()).unwrap();
        assert_eq!(scene.size(), (64, 40));
        engine.render_frame(0.0).unwrap();
    }

    #[test]
    fn test_zero_size_resize_is_ignored() {
        let mut engine = software(DemoVariant::Camera);
        engine.resize(0, 10).unwrap();
        assert_eq!(engine.dimensions(), (48, 32));
    }

    #[test]
    fn test_fixed_quads_are_built_up_front() {
        let mut engine = software(DemoVariant::PostFx);
        let Engine { backend, fixed, .. } = &mut engine;
        let first = fixed.fullscreen_quad(backend.as_mut()).unwrap();
        let again = fixed.fullscreen_quad(backend.as_mut()).unwrap();
        assert_eq!(first.buffers(), again.buffers());

        let screen = fixed.security_screen_quad(backend.as_mut()).unwrap();
        let scene_screen = engine.scene().objects.iter().find_map(|o| o.screen.clone()).unwrap();
        assert_eq!(screen.buffers(), scene_screen.buffers());
    }
}
