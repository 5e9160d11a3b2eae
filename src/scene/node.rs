//! Scene-graph nodes and renderable meshes.

use glam::Affine3A;
use smallvec::SmallVec;

use crate::resources::version::IdAllocator;
use crate::resources::{SharedGeometry, SharedMaterial, SharedTexture};
use crate::scene::light::Light;

/// 32-bit visibility layer mask. An object is rendered when its mask shares
/// at least one bit with the camera's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layers(pub u32);

impl Default for Layers {
    fn default() -> Self {
        Self(1)
    }
}

impl Layers {
    #[must_use]
    pub fn test(self, other: Layers) -> bool {
        self.0 & other.0 != 0
    }

    pub fn set(&mut self, layer: u32) {
        self.0 = 1 << layer;
    }

    pub fn enable(&mut self, layer: u32) {
        self.0 |= 1 << layer;
    }

    pub fn disable(&mut self, layer: u32) {
        self.0 &= !(1 << layer);
    }
}

/// GL primitive selection for a mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawMode {
    #[default]
    Triangles,
    Lines,
    LineStrip,
    LineLoop,
    Points,
}

/// Skinning data attached to a mesh: bone matrices are sampled from a
/// float texture by the vertex shader.
#[derive(Debug, Clone)]
pub struct SkinBinding {
    pub bone_texture: SharedTexture,
    pub bone_count: usize,
}

/// A renderable: geometry + one material per geometry group.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub geometry: SharedGeometry,
    pub materials: SmallVec<[SharedMaterial; 1]>,
    pub draw_mode: DrawMode,
    pub cast_shadow: bool,
    pub receive_shadow: bool,
    pub frustum_culled: bool,
    pub render_order: i32,
    /// `Some(n)` draws with the instanced entry points.
    pub instance_count: Option<u32>,
    pub morph_influences: SmallVec<[f32; 8]>,
    pub skin: Option<SkinBinding>,
}

impl Mesh {
    #[must_use]
    pub fn new(geometry: SharedGeometry, material: SharedMaterial) -> Self {
        Self {
            geometry,
            materials: SmallVec::from_elem(material, 1),
            draw_mode: DrawMode::Triangles,
            cast_shadow: false,
            receive_shadow: false,
            frustum_culled: true,
            render_order: 0,
            instance_count: None,
            morph_influences: SmallVec::new(),
            skin: None,
        }
    }

    /// Material for a geometry group index, falling back to the first.
    #[must_use]
    pub fn material_for_group(&self, material_index: usize) -> &SharedMaterial {
        self.materials
            .get(material_index)
            .unwrap_or(&self.materials[0])
    }
}

/// Attachment carried by a node.
#[derive(Debug, Default)]
pub enum NodeKind {
    #[default]
    Group,
    Mesh(Mesh),
    Light(Light),
}

/// One element of the scene hierarchy.
#[derive(Debug)]
pub struct Node {
    id: u64,
    pub name: String,
    pub visible: bool,
    pub layers: Layers,
    /// Local transform relative to the parent.
    pub matrix: Affine3A,
    /// World transform, refreshed by [`Node::update_world_matrix`].
    pub matrix_world: Affine3A,
    pub kind: NodeKind,
    pub children: Vec<Node>,
}

impl Node {
    #[must_use]
    pub fn new(ids: &IdAllocator, kind: NodeKind) -> Self {
        Self {
            id: ids.allocate(),
            name: String::new(),
            visible: true,
            layers: Layers::default(),
            matrix: Affine3A::IDENTITY,
            matrix_world: Affine3A::IDENTITY,
            kind,
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn group(ids: &IdAllocator) -> Self {
        Self::new(ids, NodeKind::Group)
    }

    #[must_use]
    pub fn mesh(ids: &IdAllocator, mesh: Mesh) -> Self {
        Self::new(ids, NodeKind::Mesh(mesh))
    }

    #[must_use]
    pub fn light(ids: &IdAllocator, light: Light) -> Self {
        Self::new(ids, NodeKind::Light(light))
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn add(&mut self, child: Node) -> &mut Node {
        self.children.push(child);
        self.children.last_mut().unwrap()
    }

    /// Recomputes `matrix_world` for this node and its subtree.
    pub fn update_world_matrix(&mut self, parent_world: &Affine3A) {
        self.matrix_world = *parent_world * self.matrix;
        let world = self.matrix_world;
        for child in &mut self.children {
            child.update_world_matrix(&world);
        }
    }

    /// Depth-first traversal over the subtree, self included.
    pub fn traverse(&self, visitor: &mut impl FnMut(&Node)) {
        visitor(self);
        for child in &self.children {
            child.traverse(visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn layer_test_requires_shared_bit() {
        let mut a = Layers::default();
        let mut b = Layers::default();
        assert!(a.test(b));
        a.set(2);
        assert!(!a.test(b));
        b.enable(2);
        assert!(a.test(b));
    }

    #[test]
    fn world_matrices_compose_down_the_tree() {
        let ids = IdAllocator::new();
        let mut root = Node::group(&ids);
        root.matrix = Affine3A::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let mut child = Node::group(&ids);
        child.matrix = Affine3A::from_translation(Vec3::new(0.0, 2.0, 0.0));
        root.add(child);

        root.update_world_matrix(&Affine3A::IDENTITY);
        let world = root.children[0].matrix_world;
        assert_eq!(world.translation, glam::Vec3A::new(1.0, 2.0, 0.0));
    }
}
