//! Orbit camera and projections

use super::transform::{clamp_polar, look_at, spherical_to_cartesian};
use glam::{Mat4, Vec3};

/// Perspective projection using the wgpu depth range `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    /// Vertical field of view in radians
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    /// Projection of the scene camera for a viewport
    pub fn for_viewport(width: u32, height: u32) -> Self {
        Self::perspective(45.0, width as f32 / height.max(1) as f32, 0.01, 300.0)
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }
}

/// Camera on a sphere around a target point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrbitCamera {
    /// Azimuth in radians
    pub theta: f32,
    /// Polar angle in radians, measured from +Y
    pub phi: f32,
    pub radius: f32,
    pub target: Vec3,
    pub up: Vec3,
}

/// Smallest allowed orbit radius
pub const MIN_RADIUS: f32 = 0.1;

impl OrbitCamera {
    pub fn new(theta: f32, phi: f32, radius: f32) -> Self {
        Self {
            theta,
            phi: clamp_polar(phi),
            radius: radius.max(MIN_RADIUS),
            target: Vec3::ZERO,
            up: Vec3::Y,
        }
    }

    pub fn position(&self) -> Vec3 {
        self.target + spherical_to_cartesian(self.theta, self.phi, self.radius)
    }

    pub fn view_matrix(&self) -> Mat4 {
        look_at(self.position(), self.target, self.up)
    }

    /// Rotate by angle deltas, keeping the polar angle clamped
    pub fn rotate(&mut self, d_theta: f32, d_phi: f32) {
        self.theta += d_theta;
        self.phi = clamp_polar(self.phi + d_phi);
    }

    pub fn zoom(&mut self, d_radius: f32) {
        self.radius = (self.radius + d_radius).max(MIN_RADIUS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_position_on_sphere() {
        let camera = OrbitCamera::new(0.0, FRAC_PI_2, 20.0);
        assert!((camera.position() - Vec3::new(0.0, 0.0, 20.0)).length() < 1e-4);
    }

    #[test]
    fn test_rotation_clamps_polar_angle() {
        let mut camera = OrbitCamera::new(0.0, 0.5, 10.0);
        camera.rotate(0.0, -5.0);
        assert_eq!(camera.phi, 0.01);
        camera.rotate(0.0, 10.0);
        assert_eq!(camera.phi, PI - 0.01);
    }

    #[test]
    fn test_zoom_keeps_minimum_radius() {
        let mut camera = OrbitCamera::new(0.0, 1.0, 1.0);
        camera.zoom(-5.0);
        assert_eq!(camera.radius, MIN_RADIUS);
    }

    #[test]
    fn test_projection_maps_near_and_far_to_unit_depth() {
        let projection = Projection::for_viewport(200, 100);
        let m = projection.matrix();
        let near = m.project_point3(Vec3::new(0.0, 0.0, -0.01));
        let far = m.project_point3(Vec3::new(0.0, 0.0, -300.0));
        assert!(near.z.abs() < 1e-4);
        assert!((far.z - 1.0).abs() < 1e-4);
        assert_eq!(projection.aspect, 2.0);
    }
}
