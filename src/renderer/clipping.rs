//! Clipping-plane projection and uniform packing.
//!
//! Planes are `(normal, constant)` half-spaces in world space. Once per
//! camera they are projected into view space; per draw, material-local
//! planes are appended behind the globals so the shader sees one array.

use glam::{Mat4, Vec4};
use smallvec::SmallVec;

/// Transforms world-space planes into the space of `matrix` (typically the
/// view matrix): `p' = (M⁻¹)ᵀ · p`.
#[must_use]
pub fn project_planes(planes: &[Vec4], matrix: &Mat4) -> Vec<Vec4> {
    let normal_matrix = matrix.inverse().transpose();
    planes.iter().map(|plane| normal_matrix * *plane).collect()
}

/// Packed clipping state for the current frame.
#[derive(Default)]
pub struct Clipping {
    global_view_planes: Vec<Vec4>,
    /// Flattened vec4 array uploaded as the `clippingPlanes` uniform.
    pub uniform: Vec<f32>,
    pub num_planes: usize,
    pub num_intersection: usize,
    pub local_enabled: bool,
}

impl Clipping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a frame: projects global planes into view space. Returns
    /// whether any clipping can be active this frame.
    pub fn init(&mut self, global_planes: &[Vec4], local_enabled: bool, view: &Mat4) -> bool {
        self.local_enabled = local_enabled;
        self.global_view_planes = project_planes(global_planes, view);
        self.num_planes = self.global_view_planes.len();
        self.num_intersection = 0;
        self.pack(&[]);
        !self.global_view_planes.is_empty() || local_enabled
    }

    /// Per-draw state: appends the material's local planes (when local
    /// clipping is enabled) behind the globals.
    pub fn set_state(&mut self, material_planes: &[Vec4], clip_intersection: bool, view: &Mat4) {
        if !self.local_enabled || material_planes.is_empty() {
            self.num_planes = self.global_view_planes.len();
            self.num_intersection = 0;
            self.pack(&[]);
            return;
        }
        let local: Vec<Vec4> = project_planes(material_planes, view);
        self.num_planes = self.global_view_planes.len() + local.len();
        self.num_intersection = if clip_intersection { local.len() } else { 0 };
        self.pack(&local);
    }

    fn pack(&mut self, local: &[Vec4]) {
        self.uniform.clear();
        let all: SmallVec<[&Vec4; 8]> =
            self.global_view_planes.iter().chain(local.iter()).collect();
        for plane in all {
            self.uniform
                .extend_from_slice(&[plane.x, plane.y, plane.z, plane.w]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn projecting_then_unprojecting_roundtrips() {
        let planes = vec![
            Vec4::new(0.0, 1.0, 0.0, 2.0),
            Vec4::new(1.0, 0.0, 0.0, -0.5).normalize(),
        ];
        let view = Mat4::from_rotation_translation(
            Quat::from_rotation_y(0.7),
            Vec3::new(1.0, -2.0, 3.0),
        )
        .inverse();

        let projected = project_planes(&planes, &view);
        let restored = project_planes(&projected, &view.inverse());
        for (a, b) in planes.iter().zip(&restored) {
            assert!((*a - *b).length() < 1e-5, "{a:?} vs {b:?}");
        }
    }

    #[test]
    fn local_planes_append_behind_globals() {
        let mut clipping = Clipping::new();
        let globals = [Vec4::new(0.0, 1.0, 0.0, 0.0)];
        clipping.init(&globals, true, &Mat4::IDENTITY);
        assert_eq!(clipping.num_planes, 1);

        clipping.set_state(&[Vec4::new(1.0, 0.0, 0.0, 0.0)], true, &Mat4::IDENTITY);
        assert_eq!(clipping.num_planes, 2);
        assert_eq!(clipping.num_intersection, 1);
        assert_eq!(clipping.uniform.len(), 8);
    }
}
