//! Scene description and per-frame state

mod camera;
mod camera_controller;
mod light;
pub mod presets;
mod transform;

pub use camera::*;
pub use camera_controller::*;
pub use light::*;
pub use transform::*;

use crate::pipeline::postprocess::PostEffect;
use crate::resources::{Drawable, Model};
use glam::{Mat4, Vec3, Vec4};

/// A model placed in the scene
#[derive(Debug, Clone)]
pub struct SceneObject {
    pub name: String,
    pub model: Model,
    pub transform: Transform,
    /// Radians per second around the object's own Y axis
    pub spin_speed: f32,
    pub casts_shadow: bool,
    /// Screen quad showing the security feed, in model space
    pub screen: Option<Drawable>,
}

impl SceneObject {
    pub fn new(name: &str, model: Model, transform: Transform) -> Self {
        Self {
            name: name.to_string(),
            model,
            transform,
            spin_speed: 0.0,
            casts_shadow: true,
            screen: None,
        }
    }

    pub fn spinning(mut self, spin_speed: f32) -> Self {
        self.spin_speed = spin_speed;
        self
    }

    pub fn without_shadow(mut self) -> Self {
        self.casts_shadow = false;
        self
    }

    pub fn with_screen(mut self, screen: Drawable) -> Self {
        self.screen = Some(screen);
        self
    }

    /// `T · R_y(spin · time) · R · S`
    pub fn model_matrix(&self, time: f32) -> Mat4 {
        Transform {
            rotation: glam::Quat::from_rotation_y(self.spin_speed * time) * self.transform.rotation,
            ..self.transform
        }
        .matrix()
    }
}

/// Everything drawn by the passes
#[derive(Debug, Clone)]
pub struct Scene {
    pub objects: Vec<SceneObject>,
    pub light: SceneLight,
    pub ambient: f32,
    pub clear_color: Vec4,
}

impl Scene {
    pub fn new(light: SceneLight) -> Self {
        Self {
            objects: Vec::new(),
            light,
            ambient: 0.1,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
        }
    }

    pub fn with_clear_color(mut self, color: Vec4) -> Self {
        self.clear_color = color;
        self
    }

    pub fn add(&mut self, object: SceneObject) {
        self.objects.push(object);
    }
}

/// Explicit state of one frame, sampled once and shared by every pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    /// Seconds since start, excluding paused time
    pub time: f32,
    pub camera: OrbitCamera,
    pub viewport: (u32, u32),
    pub effect: PostEffect,
}

/// Camera and light transforms computed once per frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTransforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub light_position: Vec3,
    pub view_space_light_position: Vec3,
    pub light_view: Mat4,
    pub light_projection: Mat4,
    /// Camera view space to light clip space
    pub light_matrix: Mat4,
}

impl FrameTransforms {
    pub fn new(frame: &FrameState, scene: &Scene) -> Self {
        let (width, height) = frame.viewport;
        let view = frame.camera.view_matrix();
        let projection = Projection::for_viewport(width, height).matrix();
        let light_position = scene.light.position_at(frame.time);
        let light_view = scene.light.view_matrix(frame.time);
        let light_projection = scene.light.projection_matrix();

        Self {
            view,
            projection,
            light_position,
            view_space_light_position: view.transform_point3(light_position),
            light_view,
            light_projection,
            light_matrix: light_space_matrix(light_projection, light_view, view),
        }
    }

    pub fn object(&self, model: Mat4) -> ObjectMatrices {
        ObjectMatrices::new(self.view, self.projection, model)
    }

    /// Light clip-space transform of an object
    pub fn light_model_view_projection(&self, model: Mat4) -> Mat4 {
        self.light_projection * self.light_view * model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn frame(time: f32) -> FrameState {
        FrameState {
            time,
            camera: OrbitCamera::new(0.0, FRAC_PI_2, 20.0),
            viewport: (200, 100),
            effect: PostEffect::Passthrough,
        }
    }

    #[test]
    fn test_frame_transforms_follow_light() {
        let scene = Scene::new(SceneLight::orbiting(Vec3::new(10.0, 10.0, 0.0), 0.5));
        let t = FrameTransforms::new(&frame(1.0), &scene);
        assert_eq!(t.light_position, scene.light.position_at(1.0));
        let expected = t.view.transform_point3(t.light_position);
        assert!((t.view_space_light_position - expected).length() < 1e-5);
        assert!(t
            .light_matrix
            .abs_diff_eq(t.light_projection * t.light_view * t.view.inverse(), 1e-5));
    }

    #[test]
    fn test_view_space_point_maps_into_light_clip_volume() {
        let scene = Scene::new(SceneLight::fixed(Vec3::new(10.0, 10.0, 0.0)));
        let t = FrameTransforms::new(&frame(0.0), &scene);
        let view_space = t.view * Vec4::new(0.5, 0.0, -0.5, 1.0);
        let clip = t.light_matrix * view_space;
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }
}
