//! Background resolution and the lazily allocated sky meshes.
//!
//! The scene background resolves to a clear, a cube draw, or a plane draw.
//! Draws go through the regular innermost draw path with internal custom-
//! shader materials, so the background participates in program caching like
//! any other mesh. The mesh's model matrix is overridden every frame to the
//! camera position so the background stays centred on the viewer.

use glam::{Mat3, Quat, Vec4};

use crate::resources::material::{Material, Side};
use crate::resources::version::IdAllocator;
use crate::resources::{
    BufferAttribute, Geometry, SharedGeometry, SharedMaterial, SharedTexture,
};
use crate::scene::scene::{Background, Scene};

use std::cell::RefCell;
use std::rc::Rc;

const CUBE_VERTEX_SHADER: &str = "\
#version 300 es
precision highp float;
in vec3 position;
uniform mat4 projectionMatrix;
uniform mat4 modelViewMatrix;
out vec3 vWorldDirection;
void main() {
    vWorldDirection = position;
    gl_Position = (projectionMatrix * modelViewMatrix * vec4(position, 1.0)).xyww;
}
";

const CUBE_FRAGMENT_SHADER: &str = "\
#version 300 es
precision highp float;
uniform samplerCube envMap;
uniform float backgroundIntensity;
uniform mat3 backgroundRotation;
in vec3 vWorldDirection;
layout(location = 0) out vec4 fragColor;
void main() {
    vec3 direction = backgroundRotation * vWorldDirection;
    fragColor = texture(envMap, direction) * backgroundIntensity;
}
";

const PLANE_VERTEX_SHADER: &str = "\
#version 300 es
precision highp float;
in vec3 position;
in vec2 uv;
uniform mat3 uvTransform;
out vec2 vUv;
void main() {
    vUv = (uvTransform * vec3(uv, 1.0)).xy;
    gl_Position = vec4(position.xy, 1.0, 1.0);
}
";

const PLANE_FRAGMENT_SHADER: &str = "\
#version 300 es
precision highp float;
uniform sampler2D t2D;
uniform float backgroundIntensity;
in vec2 vUv;
layout(location = 0) out vec4 fragColor;
void main() {
    fragColor = texture(t2D, vUv) * backgroundIntensity;
}
";

/// What the background pass should do this frame.
pub enum BackgroundAction {
    /// No background: clear with the renderer's clear color.
    ClearDefault,
    /// Constant color background.
    ClearColor(Vec4),
    /// Unit-box draw sampling a cube texture.
    DrawCube(SharedTexture),
    /// Screen plane draw sampling a 2D texture.
    DrawPlane(SharedTexture),
}

/// Lazily allocated background meshes, reused across frames.
#[derive(Default)]
pub struct BackgroundPass {
    box_mesh: Option<(SharedGeometry, SharedMaterial)>,
    plane_mesh: Option<(SharedGeometry, SharedMaterial)>,
}

impl BackgroundPass {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves the scene background.
    #[must_use]
    pub fn resolve(scene: &Scene) -> BackgroundAction {
        match &scene.background {
            Background::None => BackgroundAction::ClearDefault,
            Background::Color(color) => BackgroundAction::ClearColor(*color),
            Background::Cube(texture) => BackgroundAction::DrawCube(Rc::clone(texture)),
            Background::Texture(texture) => BackgroundAction::DrawPlane(Rc::clone(texture)),
        }
    }

    /// Cube rotation uniform: the scene's background rotation run through
    /// the left-handed correction. Render-target cube textures skip the
    /// second y/z flip (they were rendered in our own convention).
    #[must_use]
    pub fn cube_rotation(rotation: Quat, from_render_target: bool) -> Mat3 {
        let rotation = Mat3::from_quat(rotation);
        let flip = if from_render_target {
            Mat3::IDENTITY
        } else {
            Mat3::from_diagonal(glam::Vec3::new(-1.0, 1.0, 1.0))
        };
        flip * rotation
    }

    /// Unit box with back-side material, depth test and write off.
    pub fn box_mesh(&mut self, ids: &IdAllocator) -> (SharedGeometry, SharedMaterial) {
        if let Some((geometry, material)) = &self.box_mesh {
            return (Rc::clone(geometry), Rc::clone(material));
        }
        let mut geometry = Geometry::new(ids);
        geometry.set_attribute("position", BufferAttribute::from_f32(ids, box_positions(), 3));
        geometry.set_index(BufferAttribute::from_u16(ids, box_indices(), 1));

        let mut material = Material::custom(ids, CUBE_VERTEX_SHADER, CUBE_FRAGMENT_SHADER);
        material.side = Side::Back;
        material.depth_test = false;
        material.depth_write = false;
        material.fog = false;

        let pair = (
            Rc::new(RefCell::new(geometry)),
            Rc::new(RefCell::new(material)),
        );
        self.box_mesh = Some((Rc::clone(&pair.0), Rc::clone(&pair.1)));
        pair
    }

    /// Fullscreen plane with front-side material, depth test and write off.
    pub fn plane_mesh(&mut self, ids: &IdAllocator) -> (SharedGeometry, SharedMaterial) {
        if let Some((geometry, material)) = &self.plane_mesh {
            return (Rc::clone(geometry), Rc::clone(material));
        }
        let mut geometry = Geometry::new(ids);
        geometry.set_attribute(
            "position",
            BufferAttribute::from_f32(
                ids,
                vec![-1.0, -1.0, 0.0, 3.0, -1.0, 0.0, -1.0, 3.0, 0.0],
                3,
            ),
        );
        geometry.set_attribute(
            "uv",
            BufferAttribute::from_f32(ids, vec![0.0, 0.0, 2.0, 0.0, 0.0, 2.0], 2),
        );

        let mut material = Material::custom(ids, PLANE_VERTEX_SHADER, PLANE_FRAGMENT_SHADER);
        material.side = Side::Front;
        material.depth_test = false;
        material.depth_write = false;
        material.fog = false;

        let pair = (
            Rc::new(RefCell::new(geometry)),
            Rc::new(RefCell::new(material)),
        );
        self.plane_mesh = Some((Rc::clone(&pair.0), Rc::clone(&pair.1)));
        pair
    }
}

fn box_positions() -> Vec<f32> {
    vec![
        -1.0, -1.0, -1.0, //
        1.0, -1.0, -1.0, //
        1.0, 1.0, -1.0, //
        -1.0, 1.0, -1.0, //
        -1.0, -1.0, 1.0, //
        1.0, -1.0, 1.0, //
        1.0, 1.0, 1.0, //
        -1.0, 1.0, 1.0,
    ]
}

fn box_indices() -> Vec<u16> {
    vec![
        0, 1, 2, 2, 3, 0, // -z
        4, 6, 5, 6, 4, 7, // +z
        0, 3, 7, 7, 4, 0, // -x
        1, 5, 6, 6, 2, 1, // +x
        3, 2, 6, 6, 7, 3, // +y
        0, 4, 5, 5, 1, 0, // -y
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meshes_are_allocated_once() {
        let ids = IdAllocator::new();
        let mut pass = BackgroundPass::new();
        let (geometry_a, _) = pass.box_mesh(&ids);
        let (geometry_b, _) = pass.box_mesh(&ids);
        assert_eq!(geometry_a.borrow().id(), geometry_b.borrow().id());
    }

    #[test]
    fn cube_rotation_flips_x_for_external_textures() {
        let rotation = BackgroundPass::cube_rotation(Quat::IDENTITY, false);
        assert!((rotation.x_axis.x + 1.0).abs() < 1e-6);
        let rotation = BackgroundPass::cube_rotation(Quat::IDENTITY, true);
        assert!((rotation.x_axis.x - 1.0).abs() < 1e-6);
    }
}
