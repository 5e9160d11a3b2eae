//! Minimal scene graph consumed by the renderer.
//!
//! The traversal primitive itself is deliberately thin: a [`Node`] tree with
//! local transforms, a layer mask, and an attachment (mesh or light). The
//! renderer only reads world matrices, so richer scene tooling can sit on
//! top without the renderer caring.

pub mod camera;
pub mod light;
pub mod node;
pub mod scene;

pub use camera::{Camera, Frustum, Projection};
pub use light::{Light, LightKind, LightShadow, ShadowCameraDesc};
pub use node::{DrawMode, Layers, Mesh, Node, NodeKind, SkinBinding};
pub use scene::{Background, Fog, Scene};
