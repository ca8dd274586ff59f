//! Windowed runner using winit
//!
//! Controls:
//! - Left drag: orbit the camera
//! - Middle drag: move closer or further away
//! - `1`-`5`: select the post effect
//! - `P`: pause animation
//! - Escape: exit

use crate::clock::FrameClock;
use crate::engine::{Engine, EngineError};
use crate::pipeline::PostEffect;
use crate::scene::{DragButton, OrbitController};
use crate::EngineConfig;
use glam::Vec2;
use std::sync::Arc;
use winit::{
    dpi::PhysicalSize,
    event::{ElementState, Event, KeyEvent, MouseButton, WindowEvent},
    event_loop::{ControlFlow, EventLoop, EventLoopWindowTarget},
    keyboard::{KeyCode, PhysicalKey},
    window::WindowBuilder,
};

/// What a key press does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Exit,
    SelectEffect(PostEffect),
    TogglePause,
}

pub fn key_action(code: KeyCode) -> Option<KeyAction> {
    let number = match code {
        KeyCode::Escape => return Some(KeyAction::Exit),
        KeyCode::KeyP => return Some(KeyAction::TogglePause),
        KeyCode::Digit1 => 1,
        KeyCode::Digit2 => 2,
        KeyCode::Digit3 => 3,
        KeyCode::Digit4 => 4,
        KeyCode::Digit5 => 5,
        _ => return None,
    };
    PostEffect::from_number(number).map(KeyAction::SelectEffect)
}

fn drag_button(button: MouseButton) -> Option<DragButton> {
    match button {
        MouseButton::Left => Some(DragButton::Left),
        MouseButton::Middle => Some(DragButton::Middle),
        _ => None,
    }
}

/// Per-window input and timing state
struct Runner {
    engine: Engine,
    controller: OrbitController,
    clock: FrameClock,
    frames: u64,
    max_frames: Option<u64>,
    error: Option<EngineError>,
}

impl Runner {
    fn fail(&mut self, error: EngineError, elwt: &EventLoopWindowTarget<()>) {
        self.error = Some(error);
        elwt.exit();
    }

    fn handle_window_event(&mut self, event: WindowEvent, elwt: &EventLoopWindowTarget<()>) {
        match event {
            WindowEvent::CloseRequested => elwt.exit(),
            WindowEvent::Resized(size) => {
                if let Err(e) = self.engine.resize(size.width, size.height) {
                    self.fail(e, elwt);
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => match key_action(code) {
                Some(KeyAction::Exit) => elwt.exit(),
                Some(KeyAction::SelectEffect(effect)) => self.engine.set_effect(effect),
                Some(KeyAction::TogglePause) => {
                    self.clock.toggle_pause();
                    log::info!("Animation {}", if self.clock.is_paused() { "paused" } else { "resumed" });
                }
                None => {}
            },
            WindowEvent::MouseInput { state, button, .. } => {
                if let Some(button) = drag_button(button) {
                    self.controller.set_button(button, state == ElementState::Pressed);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                let position = Vec2::new(position.x as f32, position.y as f32);
                self.controller.cursor_moved(self.engine.camera_mut(), position);
            }
            WindowEvent::CursorLeft { .. } => self.controller.cursor_left(),
            WindowEvent::RedrawRequested => {
                if let Err(e) = self.engine.render_frame(self.clock.sample()) {
                    self.fail(e, elwt);
                    return;
                }
                self.frames += 1;
                if self.max_frames.is_some_and(|max| self.frames >= max) {
                    log::info!("Rendered {} frames, exiting", self.frames);
                    elwt.exit();
                }
            }
            _ => {}
        }
    }
}

/// Open a window and run the configured demonstration until it is closed
///
/// `max_frames` exits after that many presented frames.
pub fn run(config: EngineConfig, max_frames: Option<u64>) -> Result<(), EngineError> {
    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(config.title.as_str())
            .with_inner_size(PhysicalSize::new(config.width, config.height))
            .build(&event_loop)?,
    );

    let mut runner = Runner {
        engine: Engine::new(Arc::clone(&window), config)?,
        controller: OrbitController::new(),
        clock: FrameClock::new(),
        frames: 0,
        max_frames,
        error: None,
    };

    event_loop.run(|event, elwt: &EventLoopWindowTarget<()>| {
        elwt.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event, .. } => runner.handle_window_event(event, elwt),
            Event::AboutToWait => window.request_redraw(),
            _ => {}
        }
    })?;

    let Runner { engine, error, .. } = runner;
    engine.shutdown();
    error.map_or(Ok(()), Err)
}
