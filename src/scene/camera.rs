//! Cameras and frustum culling.

use glam::{Affine3A, Mat4, Vec3, Vec4};

use crate::resources::render_target::Rect;
use crate::resources::version::IdAllocator;
use crate::scene::node::Layers;

/// Projection parameters.
#[derive(Debug, Clone, Copy)]
pub enum Projection {
    Perspective {
        /// Vertical field of view in radians.
        fov: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    },
}

/// A camera: projection matrix, world transform, layer mask.
///
/// `sub_cameras` turns this into an array camera (multi-viewport rendering,
/// e.g. stereoscopic): when non-empty, per-object draws iterate the
/// sub-cameras and apply each one's `viewport`.
#[derive(Debug, Clone)]
pub struct Camera {
    id: u64,
    pub projection: Projection,
    pub matrix_world: Affine3A,
    pub layers: Layers,
    pub viewport: Option<Rect>,
    pub sub_cameras: Vec<Camera>,
    projection_matrix: Mat4,
}

impl Camera {
    #[must_use]
    pub fn perspective(ids: &IdAllocator, fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        let projection = Projection::Perspective {
            fov: fov_degrees.to_radians(),
            aspect,
            near,
            far,
        };
        Self {
            id: ids.allocate(),
            projection,
            matrix_world: Affine3A::IDENTITY,
            layers: Layers::default(),
            viewport: None,
            sub_cameras: Vec::new(),
            projection_matrix: Self::compute_projection(projection),
        }
    }

    #[must_use]
    pub fn orthographic(
        ids: &IdAllocator,
        left: f32,
        right: f32,
        top: f32,
        bottom: f32,
        near: f32,
        far: f32,
    ) -> Self {
        let projection = Projection::Orthographic {
            left,
            right,
            top,
            bottom,
            near,
            far,
        };
        Self {
            id: ids.allocate(),
            projection,
            matrix_world: Affine3A::IDENTITY,
            layers: Layers::default(),
            viewport: None,
            sub_cameras: Vec::new(),
            projection_matrix: Self::compute_projection(projection),
        }
    }

    fn compute_projection(projection: Projection) -> Mat4 {
        match projection {
            Projection::Perspective { fov, aspect, near, far } => {
                Mat4::perspective_rh_gl(fov, aspect, near, far)
            }
            Projection::Orthographic { left, right, top, bottom, near, far } => {
                Mat4::orthographic_rh_gl(left, right, bottom, top, near, far)
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Re-derives the projection matrix after mutating `projection`.
    pub fn update_projection_matrix(&mut self) {
        self.projection_matrix = Self::compute_projection(self.projection);
    }

    #[must_use]
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection_matrix
    }

    #[must_use]
    pub fn is_orthographic(&self) -> bool {
        matches!(self.projection, Projection::Orthographic { .. })
    }

    /// Inverse world matrix.
    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from(self.matrix_world).inverse()
    }

    /// World-space position.
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.matrix_world.translation.into()
    }

    /// Positions the camera and orients it toward `target` (+y up).
    pub fn look_at(&mut self, eye: Vec3, target: Vec3) {
        self.matrix_world = Affine3A::look_at_rh(eye, target, Vec3::Y).inverse();
    }
}

/// Six view-frustum planes in world space, extracted from a
/// projection×view matrix (Gribb–Hartmann).
#[derive(Debug, Clone, Copy, Default)]
pub struct Frustum {
    /// (normal, constant) with `dot(n, p) + constant >= 0` inside.
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Extracts planes from `m = projection * view`.
    ///
    /// With `reversed_depth` the near and far rows swap roles: near clips at
    /// NDC `z = 1` and far (possibly infinite) at `z = 0`.
    #[must_use]
    pub fn from_projection(m: Mat4, reversed_depth: bool) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];

        let mut planes = [
            rows[3] + rows[0], // left
            rows[3] - rows[0], // right
            rows[3] + rows[1], // bottom
            rows[3] - rows[1], // top
            rows[3] + rows[2], // near
            rows[3] - rows[2], // far
        ];
        if reversed_depth {
            planes.swap(4, 5);
        }

        for plane in &mut planes {
            let length = Vec3::new(plane.x, plane.y, plane.z).length();
            if length > 1e-6 {
                *plane /= length;
            } else {
                // degenerate plane never culls
                *plane = Vec4::ZERO;
            }
        }
        Self { planes }
    }

    /// Sphere-in-frustum test used for per-object culling.
    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        for plane in &self.planes {
            if plane.x == 0.0 && plane.y == 0.0 && plane.z == 0.0 {
                continue;
            }
            let distance = plane.x * center.x + plane.y * center.y + plane.z * center.z + plane.w;
            if distance < -radius {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin_frustum() -> Frustum {
        let ids = IdAllocator::new();
        let cam = Camera::perspective(&ids, 60.0, 1.0, 0.1, 100.0);
        Frustum::from_projection(cam.projection_matrix() * cam.view_matrix(), false)
    }

    #[test]
    fn sphere_in_front_is_inside() {
        assert!(origin_frustum().intersects_sphere(Vec3::new(0.0, 0.0, -5.0), 1.0));
    }

    #[test]
    fn sphere_behind_camera_is_outside() {
        assert!(!origin_frustum().intersects_sphere(Vec3::new(0.0, 0.0, 5.0), 1.0));
    }

    #[test]
    fn sphere_straddling_plane_is_inside() {
        assert!(origin_frustum().intersects_sphere(Vec3::new(0.0, 0.0, -0.05), 1.0));
    }

    #[test]
    fn look_at_points_minus_z_at_target() {
        let ids = IdAllocator::new();
        let mut cam = Camera::perspective(&ids, 60.0, 1.0, 0.1, 100.0);
        cam.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        assert!((cam.position() - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-6);
        let frustum =
            Frustum::from_projection(cam.projection_matrix() * cam.view_matrix(), false);
        assert!(frustum.intersects_sphere(Vec3::ZERO, 0.5));
        assert!(!frustum.intersects_sphere(Vec3::new(0.0, 0.0, 20.0), 0.5));
    }
}
