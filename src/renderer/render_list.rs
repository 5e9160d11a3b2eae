//! Per-frame draw scheduling.
//!
//! Traversal pushes one [`RenderItem`] per submesh into one of three
//! buckets. Opaque sorts front-to-back on the projected depth key,
//! transparent back-to-front; both sorts are stable so items with equal
//! keys keep insertion order. The transmissive bucket is never re-sorted.
//!
//! Lists and per-scene render state are kept per `(scene, depth)` pair so a
//! reentrant `render` call from a hook gets its own instances while the
//! parent's survive untouched.

use glam::Affine3A;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::renderer::lights::{LightRecord, LightsState};
use crate::resources::geometry::GeometryGroup;
use crate::resources::{SharedGeometry, SharedMaterial, SharedTexture};
use crate::scene::node::DrawMode;

/// Immutable copy of the object fields one draw needs.
#[derive(Debug, Clone)]
pub struct ObjectSnapshot {
    pub id: u64,
    pub world: Affine3A,
    pub draw_mode: DrawMode,
    pub instance_count: Option<u32>,
    pub receive_shadow: bool,
    pub cast_shadow: bool,
    pub skinned: bool,
    pub bone_texture: Option<SharedTexture>,
    pub morph_influences: SmallVec<[f32; 8]>,
}

/// One scheduled draw.
pub struct RenderItem {
    pub object: ObjectSnapshot,
    pub geometry: SharedGeometry,
    pub material: SharedMaterial,
    /// Copied out of the material for sorting without borrowing.
    pub material_id: u64,
    pub group: Option<GeometryGroup>,
    pub group_order: i32,
    /// Projected view depth of the bounding-sphere center.
    pub z: f32,
}

/// The three per-pass buckets.
#[derive(Default)]
pub struct RenderList {
    pub opaque: Vec<RenderItem>,
    pub transmissive: Vec<RenderItem>,
    pub transparent: Vec<RenderItem>,
}

impl RenderList {
    pub fn init(&mut self) {
        self.opaque.clear();
        self.transmissive.clear();
        self.transparent.clear();
    }

    /// Buckets an item: transmissive when `transmission > 0`, transparent
    /// when the material is transparent, opaque otherwise.
    pub fn push(&mut self, item: RenderItem) {
        let material = item.material.borrow();
        let bucket = if material.is_transmissive() {
            &mut self.transmissive
        } else if material.transparent {
            &mut self.transparent
        } else {
            &mut self.opaque
        };
        drop(material);
        bucket.push(item);
    }

    /// Painter / reverse-painter ordering. Stable.
    pub fn sort(&mut self) {
        self.opaque.sort_by(|a, b| {
            a.group_order
                .cmp(&b.group_order)
                .then(a.z.total_cmp(&b.z))
                .then(a.material_id.cmp(&b.material_id))
                .then(a.object.id.cmp(&b.object.id))
        });
        self.transparent.sort_by(|a, b| {
            a.group_order
                .cmp(&b.group_order)
                .then(b.z.total_cmp(&a.z))
                .then(a.material_id.cmp(&b.material_id))
                .then(a.object.id.cmp(&b.object.id))
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty() && self.transmissive.is_empty() && self.transparent.is_empty()
    }
}

/// Per-scene per-frame state: collected lights and their uniform state.
#[derive(Default)]
pub struct RenderState {
    pub lights: LightsState,
    pub lights_array: Vec<LightRecord>,
    pub shadow_casters: Vec<LightRecord>,
}

impl RenderState {
    pub fn init(&mut self) {
        self.lights_array.clear();
        self.shadow_casters.clear();
    }

    pub fn push_light(&mut self, record: LightRecord) {
        if record.cast_shadow {
            self.shadow_casters.push(record.clone());
        }
        self.lights_array.push(record);
    }

    /// Finalises the lights state from the collected records.
    pub fn setup_lights(&mut self) {
        self.lights.setup(self.lights_array.clone());
    }
}

/// Pool of render lists keyed by `(scene id, nesting depth)`.
#[derive(Default)]
pub struct RenderLists {
    lists: FxHashMap<(u64, usize), RenderList>,
}

impl RenderLists {
    /// Takes the list for a `(scene, depth)` slot, creating it on first use.
    /// Ownership moves to the caller for the duration of the frame so the
    /// renderer can iterate it while mutating its own state.
    pub fn take(&mut self, scene_id: u64, depth: usize) -> RenderList {
        self.lists.remove(&(scene_id, depth)).unwrap_or_default()
    }

    pub fn put_back(&mut self, scene_id: u64, depth: usize, list: RenderList) {
        self.lists.insert((scene_id, depth), list);
    }

    pub fn clear(&mut self) {
        self.lists.clear();
    }
}

/// Pool of render states keyed like [`RenderLists`].
#[derive(Default)]
pub struct RenderStates {
    states: FxHashMap<(u64, usize), RenderState>,
}

impl RenderStates {
    pub fn take(&mut self, scene_id: u64, depth: usize) -> RenderState {
        self.states.remove(&(scene_id, depth)).unwrap_or_default()
    }

    pub fn put_back(&mut self, scene_id: u64, depth: usize, state: RenderState) {
        self.states.insert((scene_id, depth), state);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Geometry, IdAllocator, Material, ShadingModel};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn item(z: f32, transparent: bool, object_id: u64) -> RenderItem {
        let ids = IdAllocator::new();
        let mut material = Material::new(&ids, ShadingModel::Basic);
        material.transparent = transparent;
        RenderItem {
            object: ObjectSnapshot {
                id: object_id,
                world: Affine3A::IDENTITY,
                draw_mode: DrawMode::Triangles,
                instance_count: None,
                receive_shadow: false,
                cast_shadow: false,
                skinned: false,
                bone_texture: None,
                morph_influences: SmallVec::new(),
            },
            geometry: Rc::new(RefCell::new(Geometry::new(&ids))),
            material_id: material.id(),
            material: Rc::new(RefCell::new(material)),
            group: None,
            group_order: 0,
            z,
        }
    }

    #[test]
    fn opaque_sorts_front_to_back() {
        let mut list = RenderList::default();
        list.push(item(5.0, false, 1));
        list.push(item(1.0, false, 2));
        list.push(item(3.0, false, 3));
        list.sort();
        let depths: Vec<f32> = list.opaque.iter().map(|i| i.z).collect();
        assert_eq!(depths, vec![1.0, 3.0, 5.0]);
    }

    #[test]
    fn transparent_sorts_back_to_front() {
        let mut list = RenderList::default();
        list.push(item(5.0, true, 1));
        list.push(item(1.0, true, 2));
        list.push(item(3.0, true, 3));
        list.sort();
        let depths: Vec<f32> = list.transparent.iter().map(|i| i.z).collect();
        assert_eq!(depths, vec![5.0, 3.0, 1.0]);
    }

    #[test]
    fn equal_keys_keep_insertion_order() {
        let mut list = RenderList::default();
        let shared = item(2.0, false, 7);
        let material = Rc::clone(&shared.material);
        let geometry = Rc::clone(&shared.geometry);
        list.push(shared);
        let mut second = item(2.0, false, 7);
        second.material = material;
        second.material_id = list.opaque[0].material_id;
        second.geometry = geometry;
        second.group = Some(GeometryGroup {
            start: 3,
            count: 3,
            material_index: 0,
        });
        list.push(second);
        list.sort();
        assert!(list.opaque[0].group.is_none());
        assert!(list.opaque[1].group.is_some());
    }
}
