//! Placement math: spherical coordinates, model matrices and derived transforms

use glam::{Mat3, Mat4, Quat, Vec3};
use std::f32::consts::PI;

/// Smallest distance of the polar angle from either pole
pub const POLAR_MARGIN: f32 = 0.01;

/// `(r·sinθ·sinφ, r·cosφ, r·cosθ·sinφ)`
pub fn spherical_to_cartesian(theta: f32, phi: f32, r: f32) -> Vec3 {
    Vec3::new(
        r * theta.sin() * phi.sin(),
        r * phi.cos(),
        r * theta.cos() * phi.sin(),
    )
}

/// Keep the polar angle away from the poles so `look_at` stays defined
pub fn clamp_polar(phi: f32) -> f32 {
    phi.clamp(POLAR_MARGIN, PI - POLAR_MARGIN)
}

/// Right-handed view matrix
pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
    Mat4::look_at_rh(eye, target, up)
}

/// Maps camera view space into the light's clip space
pub fn light_space_matrix(light_projection: Mat4, light_view: Mat4, camera_view: Mat4) -> Mat4 {
    light_projection * light_view * camera_view.inverse()
}

/// Object placement composed as `T · R · S`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    /// Orientation whose local +Z points along `z_axis`
    pub fn from_z_axis(position: Vec3, z_axis: Vec3, up: Vec3) -> Self {
        let z = z_axis.normalize();
        let x = up.cross(z).normalize();
        let y = z.cross(x);
        Self {
            translation: position,
            rotation: Quat::from_mat3(&Mat3::from_cols(x, y, z)),
            scale: Vec3::ONE,
        }
    }

    pub fn with_rotation_y(mut self, angle: f32) -> Self {
        self.rotation = Quat::from_rotation_y(angle) * self.rotation;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn with_scale_xyz(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// Transforms of one object for one camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectMatrices {
    pub model_view: Mat4,
    pub model_view_projection: Mat4,
    /// Inverse transpose of `model_view`
    pub normal: Mat4,
}

impl ObjectMatrices {
    pub fn new(view: Mat4, projection: Mat4, model: Mat4) -> Self {
        let model_view = view * model;
        Self {
            model_view,
            model_view_projection: projection * model_view,
            normal: model_view.inverse().transpose(),
        }
    }
}
