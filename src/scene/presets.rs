//! Scenes of the three pipeline demonstrations
//!
//! Procedural stand-ins replace the models the labs load from disk: a floor
//! with crates for the room, a small fighter, the security consoles and the
//! security camera body.

use super::{OrbitCamera, Scene, SceneLight, SceneObject, Transform};
use crate::backend::traits::{BackendResult, GraphicsBackend};
use crate::resources::{FixedDrawables, Material, Mesh, Model, TextureData};
use crate::DemoVariant;
use glam::{Mat4, Quat, Vec3, Vec4};
use std::f32::consts::{FRAC_PI_2, FRAC_PI_3, FRAC_PI_4, FRAC_PI_6, PI};

/// Starting camera of each demonstration
pub fn default_camera(variant: DemoVariant) -> OrbitCamera {
    match variant {
        DemoVariant::Camera => OrbitCamera::new(0.0, FRAC_PI_2, 20.0),
        DemoVariant::PostFx => OrbitCamera::new(FRAC_PI_4, FRAC_PI_4, 17.0),
        DemoVariant::ShadowMap => OrbitCamera::new(FRAC_PI_4, FRAC_PI_6, 30.0),
    }
}

/// Build the scene of a demonstration, uploading its models
pub fn build(
    backend: &mut dyn GraphicsBackend,
    variant: DemoVariant,
    fixed: &mut FixedDrawables,
) -> BackendResult<Scene> {
    let scene = match variant {
        DemoVariant::Camera => camera_scene(backend)?,
        DemoVariant::PostFx => postfx_scene(backend, fixed)?,
        DemoVariant::ShadowMap => shadow_scene(backend)?,
    };
    log::info!(
        "Built {:?} scene with {} objects",
        variant,
        scene.objects.len()
    );
    Ok(scene)
}

fn camera_scene(backend: &mut dyn GraphicsBackend) -> BackendResult<Scene> {
    let mut scene = Scene::new(SceneLight::fixed(Vec3::new(10.0, 10.0, 10.0)))
        .with_clear_color(Vec4::new(0.2, 0.2, 0.2, 1.0));
    scene.ambient = 0.3;

    let boxes = Model::build(
        backend,
        "box",
        &[(Mesh::cube(), Mat4::from_scale(Vec3::splat(2.0)), Material::red())],
    )?;
    scene.add(SceneObject::new("box", boxes.clone(), Transform::default()).without_shadow());
    scene.add(
        SceneObject::new("spinning box", boxes, Transform::from_translation(Vec3::new(8.0, 1.0, 0.0)))
            .spinning(FRAC_PI_2)
            .without_shadow(),
    );
    Ok(scene)
}

fn postfx_scene(backend: &mut dyn GraphicsBackend, fixed: &mut FixedDrawables) -> BackendResult<Scene> {
    let mut scene = Scene::new(SceneLight::fixed(Vec3::new(-2.8, 6.0, 0.2)));

    scene.add(SceneObject::new("room", room(backend, 20.0)?, Transform::default()));
    scene.add(
        SceneObject::new("fighter", fighter(backend)?, Transform::from_translation(Vec3::new(0.0, 1.5, 0.0)))
            .spinning(-FRAC_PI_4),
    );

    let console = security_console(backend)?;
    let screen = fixed.security_screen_quad(backend)?;
    for (i, (position, orientation)) in [
        (Vec3::new(4.0, 0.5, 4.0), -FRAC_PI_4),
        (Vec3::new(2.0, 0.5, 4.0), -FRAC_PI_3),
        (Vec3::new(4.0, 0.5, 1.5), -PI / 5.0),
    ]
    .into_iter()
    .enumerate()
    {
        scene.add(
            SceneObject::new(
                &format!("console {i}"),
                console.clone(),
                Transform::from_translation(position).with_rotation_y(orientation),
            )
            .with_screen(screen.clone()),
        );
    }

    let camera_position = Vec3::new(7.0, 7.0, 2.0);
    scene.add(SceneObject::new(
        "security camera",
        security_camera(backend)?,
        Transform::from_z_axis(camera_position, Vec3::new(0.0, 1.0, 0.0) - camera_position, Vec3::Y),
    ));
    Ok(scene)
}

fn shadow_scene(backend: &mut dyn GraphicsBackend) -> BackendResult<Scene> {
    let mut scene = Scene::new(SceneLight::orbiting(Vec3::new(10.0, 10.0, 0.0), 0.5))
        .with_clear_color(Vec4::new(0.2, 0.2, 0.8, 1.0));

    scene.add(SceneObject::new(
        "room",
        room(backend, 10.0)?,
        Transform::default().with_scale_xyz(Vec3::new(3.5, 1.0, 3.5)),
    ));
    scene.add(
        SceneObject::new("fighter", fighter(backend)?, Transform::from_translation(Vec3::new(0.0, 3.5, 0.0)))
            .spinning(-FRAC_PI_4),
    );
    Ok(scene)
}

/// Textured floor with a few crates and pillars
fn room(backend: &mut dyn GraphicsBackend, size: f32) -> BackendResult<Model> {
    let floor_texture = TextureData::checkerboard(64, [180, 180, 180, 255], [90, 90, 90, 255]).upload(backend)?;
    let floor = Material::new("floor").with_texture(floor_texture);
    let crate_material = Material::new("crate").with_diffuse(Vec3::new(0.6, 0.45, 0.25));

    let half = size * 0.4;
    let mut parts = vec![(Mesh::plane(size, size, 4), Mat4::IDENTITY, floor)];
    for corner in [Vec3::new(-half, 0.0, -half), Vec3::new(half, 0.0, -half), Vec3::new(-half, 0.0, half)] {
        parts.push((
            Mesh::cylinder(0.4, 4.0, 16),
            Mat4::from_translation(corner + Vec3::Y * 2.0),
            Material::gray(),
        ));
    }
    parts.push((
        Mesh::cube(),
        Mat4::from_translation(Vec3::new(-2.5, 0.5, -1.5)),
        crate_material.clone(),
    ));
    parts.push((
        Mesh::cuboid(Vec3::new(1.5, 1.0, 1.0)),
        Mat4::from_rotation_translation(Quat::from_rotation_y(0.4), Vec3::new(-1.0, 0.5, -3.0)),
        crate_material,
    ));
    Model::build(backend, "room", &parts)
}

/// Small fighter: fuselage, wings, cockpit and two engines; nose along +Z
fn fighter(backend: &mut dyn GraphicsBackend) -> BackendResult<Model> {
    let engine = |x: f32| {
        (
            Mesh::cylinder(0.15, 0.8, 12),
            Mat4::from_rotation_translation(Quat::from_rotation_x(FRAC_PI_2), Vec3::new(x, 0.0, -1.1)),
            Material::lamp(),
        )
    };
    Model::build(
        backend,
        "fighter",
        &[
            (Mesh::cuboid(Vec3::new(0.5, 0.35, 2.6)), Mat4::IDENTITY, Material::metal()),
            (
                Mesh::cuboid(Vec3::new(2.8, 0.06, 0.8)),
                Mat4::from_translation(Vec3::new(0.0, 0.0, -0.4)),
                Material::gray(),
            ),
            (
                Mesh::sphere(16, 8),
                Mat4::from_scale_rotation_translation(
                    Vec3::new(0.35, 0.3, 0.7),
                    Quat::IDENTITY,
                    Vec3::new(0.0, 0.2, 0.5),
                ),
                Material::glass(),
            ),
            engine(-0.35),
            engine(0.35),
        ],
    )
}

/// Console desk; the screen quad sits on its slanted top
fn security_console(backend: &mut dyn GraphicsBackend) -> BackendResult<Model> {
    // slope and center of the screen quad
    let slope = (1.589634f32 - 1.920508).atan2(0.102965 + 0.318522);
    let panel_center = Vec3::new(-0.126, 1.731, 0.0);
    Model::build(
        backend,
        "security console",
        &[
            (
                Mesh::cuboid(Vec3::new(0.7, 1.6, 0.9)),
                Mat4::from_translation(Vec3::new(-0.15, 0.8, 0.0)),
                Material::gray(),
            ),
            (
                Mesh::cuboid(Vec3::new(0.58, 0.04, 0.8)),
                Mat4::from_rotation_translation(Quat::from_rotation_z(slope), panel_center),
                Material::new("bezel").with_diffuse(Vec3::splat(0.15)),
            ),
        ],
    )
}

/// Camera body looking down its local +Z
fn security_camera(backend: &mut dyn GraphicsBackend) -> BackendResult<Model> {
    Model::build(
        backend,
        "security camera",
        &[
            (Mesh::cuboid(Vec3::new(0.4, 0.4, 0.8)), Mat4::IDENTITY, Material::gray()),
            (
                Mesh::cylinder(0.12, 0.2, 12),
                Mat4::from_rotation_translation(Quat::from_rotation_x(FRAC_PI_2), Vec3::new(0.0, 0.0, 0.5)),
                Material::glass(),
            ),
        ],
    )
}
