#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::struct_excessive_bools)]

pub mod error;
pub mod gl;
pub mod renderer;
pub mod resources;
pub mod scene;

pub use error::{RenderError, Result};
pub use gl::recording::RecordingContext;
pub use gl::GlContext;
pub use renderer::{Renderer, RendererOptions};
pub use resources::{
    BufferAttribute, Geometry, IdAllocator, Material, RenderTarget, ShadingModel, Side, Texture,
};
pub use scene::{Camera, Layers, Light, Mesh, Node, Scene};
