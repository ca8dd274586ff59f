//! Point light with an optional orbit around the Y axis

use super::camera::Projection;
use super::transform::look_at;
use glam::{Mat3, Mat4, Vec3};

/// The single light of a scene; shadows are cast from its position towards `target`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneLight {
    /// Position at time zero
    pub position: Vec3,
    /// Radians per second around +Y
    pub orbit_speed: f32,
    pub target: Vec3,
    pub projection: Projection,
}

impl SceneLight {
    pub fn fixed(position: Vec3) -> Self {
        Self {
            position,
            orbit_speed: 0.0,
            target: Vec3::ZERO,
            projection: Projection::perspective(45.0, 1.0, 5.0, 100.0),
        }
    }

    pub fn orbiting(position: Vec3, orbit_speed: f32) -> Self {
        Self {
            orbit_speed,
            ..Self::fixed(position)
        }
    }

    pub fn position_at(&self, time: f32) -> Vec3 {
        Mat3::from_rotation_y(self.orbit_speed * time) * self.position
    }

    /// Looks from the light towards `target`, with +Y up unless the light sits straight above or below it
    pub fn view_matrix(&self, time: f32) -> Mat4 {
        let eye = self.position_at(time);
        let forward = (self.target - eye).normalize_or_zero();
        let up = if forward.cross(Vec3::Y).length_squared() < 1e-6 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        look_at(eye, self.target, up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }
}
