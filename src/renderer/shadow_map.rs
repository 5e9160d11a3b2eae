//! Shadow map state and shadow camera math.
//!
//! The render loop for shadow maps lives on the renderer (it reuses the
//! innermost draw path); this module owns everything else: the facade
//! settings, lazily allocated per-light depth targets, depth/distance
//! override materials, and the projection/view/shadow matrices per light
//! variant. Targets are keyed by light id in a renderer-owned side table,
//! so dropping a light cannot leak its GPU target.

use glam::{Affine3A, Mat4, Vec3};
use rustc_hash::FxHashMap;

use crate::renderer::programs::ShadowMapType;
use crate::resources::material::{DepthPacking, Material, ShadingModel, Side};
use crate::resources::render_target::RenderTarget;
use crate::resources::texture::{Filter, Texture, TextureCompare};
use crate::resources::version::IdAllocator;
use crate::resources::{SharedRenderTarget, SharedTexture};
use crate::scene::light::{LightKind, LightShadow};

/// The six cube-face view directions for point-light shadow passes.
pub const CUBE_DIRECTIONS: [Vec3; 6] = [
    Vec3::X,
    Vec3::NEG_X,
    Vec3::Y,
    Vec3::NEG_Y,
    Vec3::Z,
    Vec3::NEG_Z,
];

const CUBE_UPS: [Vec3; 6] = [
    Vec3::NEG_Y,
    Vec3::NEG_Y,
    Vec3::Z,
    Vec3::NEG_Z,
    Vec3::NEG_Y,
    Vec3::NEG_Y,
];

/// `shadowMap` facade on the renderer.
pub struct ShadowMapState {
    pub enabled: bool,
    pub auto_update: bool,
    /// One-shot update request when `auto_update` is off.
    pub needs_update: bool,
    pub shadow_type: ShadowMapType,

    targets: FxHashMap<u64, SharedRenderTarget>,
    depth_material: Material,
    distance_material: Material,
}

impl ShadowMapState {
    #[must_use]
    pub fn new(ids: &IdAllocator) -> Self {
        let mut depth_material = Material::new(ids, ShadingModel::Depth);
        depth_material.depth_packing = DepthPacking::Rgba;
        let distance_material = Material::new(ids, ShadingModel::Distance);
        Self {
            enabled: false,
            auto_update: true,
            needs_update: false,
            shadow_type: ShadowMapType::Pcf,
            targets: FxHashMap::default(),
            depth_material,
            distance_material,
        }
    }

    /// Override material for the shadow pass of one light variant.
    #[must_use]
    pub fn override_material(&self, kind: &LightKind) -> Material {
        let mut material = match kind {
            LightKind::Point { .. } => self.distance_material.clone(),
            _ => self.depth_material.clone(),
        };
        material.side = Side::Front;
        material
    }

    /// Lazily allocated depth target for one shadow-casting light. Point
    /// lights get a 4×2 face grid in one 2D map, addressed per face through
    /// [`point_face_viewport`].
    pub fn target_for(
        &mut self,
        ids: &IdAllocator,
        light_id: u64,
        shadow: &LightShadow,
        is_point: bool,
    ) -> SharedRenderTarget {
        use std::cell::RefCell;
        use std::rc::Rc;

        let (width, height) = if is_point {
            (shadow.map_size * 4, shadow.map_size * 2)
        } else {
            (shadow.map_size, shadow.map_size)
        };

        if let Some(target) = self.targets.get(&light_id) {
            if target.borrow().width == width {
                return Rc::clone(target);
            }
            // map size changed: drop and re-create on next use
            self.targets.remove(&light_id);
        }

        let mut target = RenderTarget::new(ids, width, height);
        {
            let mut color = target.texture().borrow_mut();
            color.generate_mipmaps = false;
            color.min_filter = Filter::Nearest;
            color.mag_filter = Filter::Nearest;
        }
        let mut depth = Texture::depth_texture(ids, width, height, false);
        if self.shadow_type != ShadowMapType::Vsm {
            depth.compare = Some(TextureCompare::LessEqual);
        }
        target.depth_texture = Some(Rc::new(RefCell::new(depth)));

        let target = Rc::new(RefCell::new(target));
        self.targets.insert(light_id, Rc::clone(&target));
        target
    }

    /// Existing target for a light, if any.
    #[must_use]
    pub fn existing_target(&self, light_id: u64) -> Option<&SharedRenderTarget> {
        self.targets.get(&light_id)
    }

    /// Depth texture that main-pass shaders sample for this light.
    #[must_use]
    pub fn map_texture(&self, light_id: u64) -> Option<SharedTexture> {
        self.targets
            .get(&light_id)
            .and_then(|t| t.borrow().depth_texture.clone())
    }

    /// Disposal hook: forget the target for a removed light and return it so
    /// the caller can release its GPU objects.
    pub fn forget_light(&mut self, light_id: u64) -> Option<SharedRenderTarget> {
        self.targets.remove(&light_id)
    }

    /// All live targets (renderer disposal).
    pub fn drain_targets(&mut self) -> Vec<SharedRenderTarget> {
        self.targets.drain().map(|(_, t)| t).collect()
    }
}

/// Viewport tile for one face of a point-light shadow grid, in the 4×2
/// layout `[+x -x +y | -y +z -z]`.
#[must_use]
pub fn point_face_viewport(face: usize, map_size: u32) -> [i32; 4] {
    const TILES: [(i32, i32); 6] = [(2, 1), (0, 1), (3, 1), (1, 1), (3, 0), (1, 0)];
    let size = map_size as i32;
    let (x, y) = TILES[face];
    [x * size, y * size, size, size]
}

/// Projection matrix of a light's shadow camera.
#[must_use]
pub fn shadow_projection(kind: &LightKind, shadow: &LightShadow) -> Mat4 {
    match kind {
        LightKind::Directional { .. } => {
            let extent = shadow.camera.extent;
            Mat4::orthographic_rh_gl(
                -extent,
                extent,
                -extent,
                extent,
                shadow.camera.near,
                shadow.camera.far,
            )
        }
        LightKind::Spot { angle, .. } => Mat4::perspective_rh_gl(
            2.0 * *angle,
            1.0,
            shadow.camera.near,
            shadow.camera.far,
        ),
        // point lights render six 90° faces
        _ => Mat4::perspective_rh_gl(
            std::f32::consts::FRAC_PI_2,
            1.0,
            shadow.camera.near,
            shadow.camera.far,
        ),
    }
}

/// View matrix of a light's shadow camera. `face` selects the cube face for
/// point lights and is ignored otherwise.
#[must_use]
pub fn shadow_view(kind: &LightKind, world: &Affine3A, face: usize) -> Mat4 {
    let position = Vec3::from(world.translation);
    match kind {
        LightKind::Directional { target, .. } | LightKind::Spot { target, .. } => {
            Mat4::look_at_rh(position, *target, up_for(position, *target))
        }
        _ => Mat4::look_at_rh(
            position,
            position + CUBE_DIRECTIONS[face],
            CUBE_UPS[face],
        ),
    }
}

fn up_for(position: Vec3, target: Vec3) -> Vec3 {
    let direction = (target - position).normalize_or_zero();
    if direction.abs_diff_eq(Vec3::Y, 1e-4) || direction.abs_diff_eq(Vec3::NEG_Y, 1e-4) {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// Shadow matrix consumed by receiver shaders: NDC → [0,1] bias applied to
/// the shadow camera's projection×view.
#[must_use]
pub fn shadow_matrix(projection: Mat4, view: Mat4) -> Mat4 {
    let bias = Mat4::from_cols_array(&[
        0.5, 0.0, 0.0, 0.0, //
        0.0, 0.5, 0.0, 0.0, //
        0.0, 0.0, 0.5, 0.0, //
        0.5, 0.5, 0.5, 1.0,
    ]);
    bias * projection * view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::light::Light;

    #[test]
    fn targets_are_cached_per_light() {
        let ids = IdAllocator::new();
        let mut state = ShadowMapState::new(&ids);
        let light = Light::directional(&ids, Vec3::ONE, 1.0);
        let shadow = light.shadow().unwrap().clone();
        let a = state.target_for(&ids, light.id(), &shadow, false);
        let b = state.target_for(&ids, light.id(), &shadow, false);
        assert_eq!(a.borrow().id(), b.borrow().id());
    }

    #[test]
    fn map_size_change_recreates_target() {
        let ids = IdAllocator::new();
        let mut state = ShadowMapState::new(&ids);
        let light = Light::directional(&ids, Vec3::ONE, 1.0);
        let mut shadow = light.shadow().unwrap().clone();
        let a = state.target_for(&ids, light.id(), &shadow, false);
        shadow.map_size = 2048;
        let b = state.target_for(&ids, light.id(), &shadow, false);
        assert_ne!(a.borrow().id(), b.borrow().id());
        assert_eq!(b.borrow().width, 2048);
    }

    #[test]
    fn point_light_target_is_a_face_grid() {
        let ids = IdAllocator::new();
        let mut state = ShadowMapState::new(&ids);
        let light = Light::point(&ids, Vec3::ONE, 1.0, 10.0);
        let shadow = light.shadow().unwrap().clone();
        let target = state.target_for(&ids, light.id(), &shadow, true);
        assert_eq!(target.borrow().width, shadow.map_size * 4);
        assert_eq!(target.borrow().height, shadow.map_size * 2);

        let tile = point_face_viewport(0, shadow.map_size);
        assert_eq!(tile, [2 * shadow.map_size as i32, shadow.map_size as i32, 512, 512]);
    }

    #[test]
    fn point_lights_use_the_distance_material() {
        let ids = IdAllocator::new();
        let state = ShadowMapState::new(&ids);
        let point = Light::point(&ids, Vec3::ONE, 1.0, 10.0);
        let directional = Light::directional(&ids, Vec3::ONE, 1.0);
        assert_eq!(
            state.override_material(&point.kind).shading,
            ShadingModel::Distance
        );
        assert_eq!(
            state.override_material(&directional.kind).shading,
            ShadingModel::Depth
        );
    }
}
