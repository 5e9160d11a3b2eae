//! Scene: root node plus environment settings the renderer consumes.

use glam::{Quat, Vec4};

use crate::resources::version::IdAllocator;
use crate::resources::SharedTexture;
use crate::scene::node::Node;

/// Background resolution, in priority order checked by the background pass.
#[derive(Debug, Clone, Default)]
pub enum Background {
    /// Clear to the renderer's clear color.
    #[default]
    None,
    /// Clear to this color.
    Color(Vec4),
    /// Draw a view-centred unit box sampling a cube texture.
    Cube(SharedTexture),
    /// Draw a screen-aligned plane sampling a 2D texture.
    Texture(SharedTexture),
}

/// Distance fog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fog {
    Linear { color: Vec4, near: f32, far: f32 },
    Exp2 { color: Vec4, density: f32 },
}

/// Root of a renderable hierarchy.
#[derive(Debug)]
pub struct Scene {
    id: u64,
    pub root: Node,
    pub background: Background,
    /// Applied to background cube texture lookups.
    pub background_rotation: Quat,
    pub background_intensity: f32,
    pub fog: Option<Fog>,
    /// When `false`, the caller updates world matrices itself.
    pub matrix_world_auto_update: bool,
}

impl Scene {
    #[must_use]
    pub fn new(ids: &IdAllocator) -> Self {
        Self {
            id: ids.allocate(),
            root: Node::group(ids),
            background: Background::None,
            background_rotation: Quat::IDENTITY,
            background_intensity: 1.0,
            fog: None,
            matrix_world_auto_update: true,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn add(&mut self, node: Node) -> &mut Node {
        self.root.add(node)
    }
}
