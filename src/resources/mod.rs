//! Caller-owned resource descriptions.
//!
//! Everything in this module is plain data: geometry attribute arrays,
//! texture descriptors, material feature flags. The renderer never owns any
//! of it — it keeps side tables keyed by each resource's `id()` and uploads
//! lazily when a resource's `version()` advances past the uploaded one.

pub mod buffer;
pub mod geometry;
pub mod material;
pub mod render_target;
pub mod texture;
pub mod version;

use std::cell::RefCell;
use std::rc::Rc;

pub use buffer::{merge_update_ranges, AttributeData, BufferAttribute, BufferUsage, UpdateRange};
pub use geometry::{DrawRange, Geometry, GeometryGroup};
pub use material::{
    Blending, Combine, CompareFunction, DepthPacking, Material, NormalMapSpace, ShadingModel,
    Side, StencilState,
};
pub use render_target::{Rect, RenderTarget, RenderTargetKind};
pub use texture::{
    ColorSpace, CompressedFormat, Filter, PixelData, Texture, TextureCompare, TextureDimension,
    TextureFormat, TextureSource, TextureType, Wrap,
};
pub use version::{ChangeTracker, IdAllocator};

/// Shared handle to a caller-owned geometry.
pub type SharedGeometry = Rc<RefCell<Geometry>>;
/// Shared handle to a caller-owned material.
pub type SharedMaterial = Rc<RefCell<Material>>;
/// Shared handle to a caller-owned texture.
pub type SharedTexture = Rc<RefCell<Texture>>;
/// Shared handle to a caller-owned render target.
pub type SharedRenderTarget = Rc<RefCell<RenderTarget>>;
