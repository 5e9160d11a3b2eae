//! Device limits and extension probing.
//!
//! Queried once at renderer construction. Optional features degrade with a
//! one-time warning instead of failing (§7): a missing extension clears the
//! matching capability flag and the dependent code path is skipped.

use crate::gl::consts as gl;
use crate::gl::GlContext;

/// Immutable snapshot of device limits and optional features.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub max_texture_size: u32,
    pub max_cube_map_size: u32,
    pub max_3d_texture_size: u32,
    pub max_array_texture_layers: u32,
    pub max_textures: u32,
    pub max_vertex_textures: u32,
    pub max_combined_textures: u32,
    pub max_attributes: u32,
    pub max_color_attachments: u32,
    pub max_draw_buffers: u32,
    pub max_samples: u32,
    pub max_anisotropy: f32,

    pub supports_vertex_textures: bool,
    /// `EXT_color_buffer_float`: float color attachments.
    pub color_buffer_float: bool,
    /// `EXT_color_buffer_half_float` (or the float superset).
    pub color_buffer_half_float: bool,
    /// `OES_texture_float_linear`: linear filtering of 32-bit float textures.
    pub texture_float_linear: bool,
    /// `EXT_texture_filter_anisotropic`.
    pub anisotropy: bool,
    /// `KHR_parallel_shader_compile`: non-blocking link status polling.
    pub parallel_shader_compile: bool,
    /// `WEBGL_multisampled_render_to_texture`: implicit MSAA resolve.
    pub multisampled_render_to_texture: bool,
    /// `OES_draw_buffers_indexed`.
    pub draw_buffers_indexed: bool,
    pub compressed_s3tc: bool,
    pub compressed_etc2: bool,
    pub compressed_astc: bool,
    pub compressed_bptc: bool,
}

impl Capabilities {
    pub fn query(context: &impl GlContext) -> Self {
        let max_vertex_textures = context.get_parameter_i32(gl::MAX_VERTEX_TEXTURE_IMAGE_UNITS) as u32;
        let anisotropy = context.supports_extension("EXT_texture_filter_anisotropic");
        let color_buffer_float = context.supports_extension("EXT_color_buffer_float");
        Self {
            max_texture_size: context.get_parameter_i32(gl::MAX_TEXTURE_SIZE) as u32,
            max_cube_map_size: context.get_parameter_i32(gl::MAX_CUBE_MAP_TEXTURE_SIZE) as u32,
            max_3d_texture_size: context.get_parameter_i32(gl::MAX_3D_TEXTURE_SIZE) as u32,
            max_array_texture_layers: context.get_parameter_i32(gl::MAX_ARRAY_TEXTURE_LAYERS) as u32,
            max_textures: context.get_parameter_i32(gl::MAX_TEXTURE_IMAGE_UNITS) as u32,
            max_vertex_textures,
            max_combined_textures: context.get_parameter_i32(gl::MAX_COMBINED_TEXTURE_IMAGE_UNITS)
                as u32,
            max_attributes: context.get_parameter_i32(gl::MAX_VERTEX_ATTRIBS) as u32,
            max_color_attachments: context.get_parameter_i32(gl::MAX_COLOR_ATTACHMENTS) as u32,
            max_draw_buffers: context.get_parameter_i32(gl::MAX_DRAW_BUFFERS) as u32,
            max_samples: context.get_parameter_i32(gl::MAX_SAMPLES) as u32,
            max_anisotropy: if anisotropy { 16.0 } else { 1.0 },
            supports_vertex_textures: max_vertex_textures > 0,
            color_buffer_float,
            color_buffer_half_float: color_buffer_float
                || context.supports_extension("EXT_color_buffer_half_float"),
            texture_float_linear: context.supports_extension("OES_texture_float_linear"),
            anisotropy,
            parallel_shader_compile: context.supports_extension("KHR_parallel_shader_compile"),
            multisampled_render_to_texture: context
                .supports_extension("WEBGL_multisampled_render_to_texture"),
            draw_buffers_indexed: context.supports_extension("OES_draw_buffers_indexed"),
            compressed_s3tc: context.supports_extension("WEBGL_compressed_texture_s3tc"),
            compressed_etc2: context.supports_extension("WEBGL_compressed_texture_etc"),
            compressed_astc: context.supports_extension("WEBGL_compressed_texture_astc"),
            compressed_bptc: context.supports_extension("EXT_texture_compression_bptc"),
        }
    }
}
