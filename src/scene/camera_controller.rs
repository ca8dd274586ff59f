//! Mouse-driven orbit camera control
//!
//! - Left drag: rotate (vertical motion changes the polar angle, horizontal the azimuth)
//! - Middle drag: move closer or further away

use super::camera::OrbitCamera;
use glam::Vec2;

/// Mouse buttons that drive the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragButton {
    Left,
    Middle,
}

/// Tracks drag state between cursor events
#[derive(Debug, Clone)]
pub struct OrbitController {
    /// Degrees of rotation per pixel of drag
    pub rotate_degrees_per_pixel: f32,
    /// Radius change per pixel of drag
    pub zoom_per_pixel: f32,
    left_down: bool,
    middle_down: bool,
    last_cursor: Option<Vec2>,
}

impl Default for OrbitController {
    fn default() -> Self {
        Self {
            rotate_degrees_per_pixel: 0.3,
            zoom_per_pixel: 0.3,
            left_down: false,
            middle_down: false,
            last_cursor: None,
        }
    }
}

impl OrbitController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_button(&mut self, button: DragButton, pressed: bool) {
        match button {
            DragButton::Left => self.left_down = pressed,
            DragButton::Middle => self.middle_down = pressed,
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.left_down || self.middle_down
    }

    /// Feed a cursor position; applies the motion since the previous one
    pub fn cursor_moved(&mut self, camera: &mut OrbitCamera, position: Vec2) {
        if let Some(last) = self.last_cursor {
            self.apply_drag(camera, position - last);
        }
        self.last_cursor = Some(position);
    }

    pub fn cursor_left(&mut self) {
        self.last_cursor = None;
    }

    pub fn apply_drag(&self, camera: &mut OrbitCamera, delta: Vec2) {
        if self.left_down {
            let step = self.rotate_degrees_per_pixel.to_radians();
            camera.rotate(-delta.x * step, -delta.y * step);
        }
        if self.middle_down {
            camera.zoom(-delta.y * self.zoom_per_pixel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::camera::MIN_RADIUS;

    #[test]
    fn test_left_drag_rotates() {
        let mut camera = OrbitCamera::new(0.0, 1.0, 10.0);
        let mut controller = OrbitController::new();
        controller.set_button(DragButton::Left, true);
        controller.cursor_moved(&mut camera, Vec2::new(100.0, 100.0));
        controller.cursor_moved(&mut camera, Vec2::new(110.0, 90.0));

        let step = 0.3f32.to_radians();
        assert!((camera.theta + 10.0 * step).abs() < 1e-6);
        assert!((camera.phi - (1.0 + 10.0 * step)).abs() < 1e-6);
        assert_eq!(camera.radius, 10.0);
    }

    #[test]
    fn test_middle_drag_zooms_with_floor() {
        let mut camera = OrbitCamera::new(0.0, 1.0, 10.0);
        let mut controller = OrbitController::new();
        controller.set_button(DragButton::Middle, true);
        controller.apply_drag(&mut camera, Vec2::new(0.0, 10.0));
        assert!((camera.radius - 7.0).abs() < 1e-5);
        controller.apply_drag(&mut camera, Vec2::new(0.0, 1000.0));
        assert_eq!(camera.radius, MIN_RADIUS);
    }

    #[test]
    fn test_no_motion_without_buttons() {
        let mut camera = OrbitCamera::new(0.5, 1.0, 10.0);
        let before = camera;
        let mut controller = OrbitController::new();
        controller.cursor_moved(&mut camera, Vec2::ZERO);
        controller.cursor_moved(&mut camera, Vec2::new(50.0, 50.0));
        assert_eq!(camera, before);
        assert!(!controller.is_dragging());
    }
}
