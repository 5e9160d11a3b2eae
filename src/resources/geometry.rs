//! Geometry: named attribute arrays plus draw metadata.

use glam::Vec3;
use rustc_hash::FxHashMap;

use crate::resources::buffer::BufferAttribute;
use crate::resources::version::IdAllocator;

/// Sub-range of the index (or vertex) stream drawn with one material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeometryGroup {
    pub start: usize,
    pub count: usize,
    pub material_index: usize,
}

/// Restriction of the drawn element range.
#[derive(Debug, Clone, Copy)]
pub struct DrawRange {
    pub start: usize,
    /// `usize::MAX` means "to the end".
    pub count: usize,
}

impl Default for DrawRange {
    fn default() -> Self {
        Self {
            start: 0,
            count: usize::MAX,
        }
    }
}

/// A named map of vertex attributes, an optional index, and draw metadata.
///
/// Conventional attribute names the renderer understands: `position`,
/// `normal`, `uv`, `uv1`, `uv2`, `uv3`, `color`, `tangent`, `instanceMatrix`,
/// `instanceColor`, `skinIndex`, `skinWeight`.
#[derive(Debug)]
pub struct Geometry {
    id: u64,
    pub attributes: FxHashMap<String, BufferAttribute>,
    pub index: Option<BufferAttribute>,
    pub draw_range: DrawRange,
    pub groups: Vec<GeometryGroup>,
    /// Morph target attribute sets, keyed by base attribute name.
    pub morph_attributes: FxHashMap<String, Vec<BufferAttribute>>,
    pub morph_targets_relative: bool,
    bounding_sphere: Option<(Vec3, f32)>,
}

impl Geometry {
    #[must_use]
    pub fn new(ids: &IdAllocator) -> Self {
        Self {
            id: ids.allocate(),
            attributes: FxHashMap::default(),
            index: None,
            draw_range: DrawRange::default(),
            groups: Vec::new(),
            morph_attributes: FxHashMap::default(),
            morph_targets_relative: false,
            bounding_sphere: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set_attribute(&mut self, name: impl Into<String>, attribute: BufferAttribute) {
        self.attributes.insert(name.into(), attribute);
        self.bounding_sphere = None;
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&BufferAttribute> {
        self.attributes.get(name)
    }

    pub fn set_index(&mut self, index: BufferAttribute) {
        debug_assert_eq!(index.item_size, 1);
        self.index = Some(index);
    }

    pub fn add_group(&mut self, start: usize, count: usize, material_index: usize) {
        self.groups.push(GeometryGroup {
            start,
            count,
            material_index,
        });
    }

    /// Number of vertices in the `position` attribute.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.attributes.get("position").map_or(0, BufferAttribute::count)
    }

    /// Number of elements a non-grouped draw covers, before `draw_range`.
    #[must_use]
    pub fn element_count(&self) -> usize {
        match &self.index {
            Some(index) => index.count(),
            None => self.vertex_count(),
        }
    }

    /// World-agnostic bounding sphere over `position`, cached until the
    /// attribute map changes.
    pub fn bounding_sphere(&mut self) -> (Vec3, f32) {
        if let Some(cached) = self.bounding_sphere {
            return cached;
        }
        let computed = self.compute_bounding_sphere();
        self.bounding_sphere = Some(computed);
        computed
    }

    fn compute_bounding_sphere(&self) -> (Vec3, f32) {
        let Some(position) = self.attributes.get("position") else {
            return (Vec3::ZERO, 0.0);
        };
        let count = position.count();
        if count == 0 {
            return (Vec3::ZERO, 0.0);
        }

        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for i in 0..count {
            let p = Vec3::new(
                position.data.get_f32(i * position.item_size),
                position.data.get_f32(i * position.item_size + 1),
                position.data.get_f32(i * position.item_size + 2),
            );
            min = min.min(p);
            max = max.max(p);
        }
        let center = (min + max) * 0.5;

        let mut radius_sq: f32 = 0.0;
        for i in 0..count {
            let p = Vec3::new(
                position.data.get_f32(i * position.item_size),
                position.data.get_f32(i * position.item_size + 1),
                position.data.get_f32(i * position.item_size + 2),
            );
            radius_sq = radius_sq.max(center.distance_squared(p));
        }
        (center, radius_sq.sqrt())
    }

    /// Validates the §3 invariants that are cheap to check on the CPU:
    /// every index value must address a valid vertex, and morph attributes
    /// must match the base attribute's item size.
    #[must_use]
    pub fn validate(&self) -> bool {
        if let Some(index) = &self.index {
            let vertex_count = self.vertex_count() as u32;
            for i in 0..index.count() {
                if index.data.get_index(i) >= vertex_count {
                    return false;
                }
            }
        }
        for (name, targets) in &self.morph_attributes {
            if let Some(base) = self.attributes.get(name) {
                if targets.iter().any(|t| t.item_size != base.item_size) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(ids: &IdAllocator) -> Geometry {
        let mut g = Geometry::new(ids);
        g.set_attribute(
            "position",
            BufferAttribute::from_f32(ids, vec![-1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 3),
        );
        g
    }

    #[test]
    fn bounding_sphere_encloses_vertices() {
        let ids = IdAllocator::new();
        let mut g = triangle(&ids);
        let (center, radius) = g.bounding_sphere();
        assert!((center - Vec3::new(0.0, 0.5, 0.0)).length() < 1e-6);
        assert!(radius >= 1.0);
    }

    #[test]
    fn validate_rejects_out_of_range_index() {
        let ids = IdAllocator::new();
        let mut g = triangle(&ids);
        g.set_index(BufferAttribute::from_u16(&ids, vec![0, 1, 3], 1));
        assert!(!g.validate());
        g.set_index(BufferAttribute::from_u16(&ids, vec![0, 1, 2], 1));
        assert!(g.validate());
    }

    #[test]
    fn validate_rejects_morph_item_size_mismatch() {
        let ids = IdAllocator::new();
        let mut g = triangle(&ids);
        g.morph_attributes.insert(
            "position".to_string(),
            vec![BufferAttribute::from_f32(&ids, vec![0.0; 6], 2)],
        );
        assert!(!g.validate());
    }
}
