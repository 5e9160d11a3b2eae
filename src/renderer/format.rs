//! Texture format translation table.
//!
//! Maps the public `(format, type, color space)` triple to the GL external
//! format, component type, and sized internal format. A miss is a hard
//! [`RenderError::UnsupportedFormat`]; callers decide whether that fails the
//! operation or just the draw.

use crate::error::{RenderError, Result};
use crate::gl::consts as gl;
use crate::resources::texture::{ColorSpace, CompressedFormat, TextureFormat, TextureType};

/// External (upload) format.
#[must_use]
pub fn gl_format(format: TextureFormat) -> u32 {
    match format {
        TextureFormat::Rgba => gl::RGBA,
        TextureFormat::Rgb => gl::RGB,
        TextureFormat::Rg => gl::RG,
        TextureFormat::Red => gl::RED,
        TextureFormat::RgbaInteger => gl::RGBA_INTEGER,
        TextureFormat::RgbInteger => gl::RGB_INTEGER,
        TextureFormat::RgInteger => gl::RG_INTEGER,
        TextureFormat::RedInteger => gl::RED_INTEGER,
        TextureFormat::Depth => gl::DEPTH_COMPONENT,
        TextureFormat::DepthStencil => gl::DEPTH_STENCIL,
        // compressed uploads carry the internal format themselves
        TextureFormat::Compressed(_) => gl::RGBA,
    }
}

/// GL component type.
#[must_use]
pub fn gl_type(ty: TextureType) -> u32 {
    match ty {
        TextureType::UnsignedByte => gl::UNSIGNED_BYTE,
        TextureType::Byte => gl::BYTE,
        TextureType::UnsignedShort => gl::UNSIGNED_SHORT,
        TextureType::Short => gl::SHORT,
        TextureType::UnsignedInt => gl::UNSIGNED_INT,
        TextureType::Int => gl::INT,
        TextureType::HalfFloat => gl::HALF_FLOAT,
        TextureType::Float => gl::FLOAT,
        TextureType::UnsignedInt248 => gl::UNSIGNED_INT_24_8,
        TextureType::UnsignedInt5999Rev => gl::UNSIGNED_INT_5_9_9_9_REV,
        TextureType::UnsignedInt10f11f11fRev => gl::UNSIGNED_INT_10F_11F_11F_REV,
    }
}

/// Bytes per texel for uncompressed formats (upload size bookkeeping).
#[must_use]
pub fn bytes_per_texel(format: TextureFormat, ty: TextureType) -> usize {
    let components = match format {
        TextureFormat::Rgba | TextureFormat::RgbaInteger => 4,
        TextureFormat::Rgb | TextureFormat::RgbInteger => 3,
        TextureFormat::Rg | TextureFormat::RgInteger => 2,
        _ => 1,
    };
    let component_size = match ty {
        TextureType::UnsignedByte | TextureType::Byte => 1,
        TextureType::UnsignedShort | TextureType::Short | TextureType::HalfFloat => 2,
        _ => 4,
    };
    // packed types occupy one component slot
    match ty {
        TextureType::UnsignedInt248
        | TextureType::UnsignedInt5999Rev
        | TextureType::UnsignedInt10f11f11fRev => 4,
        _ => components * component_size,
    }
}

/// Number of scalar components per texel addressed by partial update ranges.
#[must_use]
pub fn components_per_texel(format: TextureFormat) -> usize {
    match format {
        TextureFormat::Rgba | TextureFormat::RgbaInteger => 4,
        TextureFormat::Rgb | TextureFormat::RgbInteger => 3,
        TextureFormat::Rg | TextureFormat::RgInteger => 2,
        _ => 1,
    }
}

/// Sized internal format for allocation.
///
/// `force_linear` ignores an sRGB color space (used after the sRGB-needs-
/// RGBA8 downgrade warning).
pub fn internal_format(
    format: TextureFormat,
    ty: TextureType,
    color_space: ColorSpace,
    force_linear: bool,
) -> Result<u32> {
    use TextureFormat as F;
    use TextureType as T;

    let srgb = color_space == ColorSpace::Srgb && !force_linear;

    let internal = match (format, ty) {
        (F::Rgba, T::UnsignedByte) => {
            if srgb {
                gl::SRGB8_ALPHA8
            } else {
                gl::RGBA8
            }
        }
        (F::Rgba, T::Float) => gl::RGBA32F,
        (F::Rgba, T::HalfFloat) => gl::RGBA16F,
        (F::Rgba, T::UnsignedShort) => gl::RGBA4,

        (F::Rgb, T::UnsignedByte) => {
            if srgb {
                gl::SRGB8
            } else {
                gl::RGB8
            }
        }
        (F::Rgb, T::Float) => gl::RGB32F,
        (F::Rgb, T::HalfFloat) => gl::RGB16F,
        (F::Rgb, T::UnsignedInt5999Rev) => gl::RGB9_E5,
        (F::Rgb, T::UnsignedInt10f11f11fRev) => gl::R11F_G11F_B10F,

        (F::Rg, T::UnsignedByte) => gl::RG8,
        (F::Rg, T::Float) => gl::RG32F,
        (F::Rg, T::HalfFloat) => gl::RG16F,

        (F::Red, T::UnsignedByte) => gl::R8,
        (F::Red, T::Float) => gl::R32F,
        (F::Red, T::HalfFloat) => gl::R16F,

        (F::RgbaInteger, T::UnsignedByte) => gl::RGBA8UI,
        (F::RgbaInteger, T::Byte) => gl::RGBA8I,
        (F::RgbaInteger, T::UnsignedShort) => gl::RGBA16UI,
        (F::RgbaInteger, T::Short) => gl::RGBA16I,
        (F::RgbaInteger, T::UnsignedInt) => gl::RGBA32UI,
        (F::RgbaInteger, T::Int) => gl::RGBA32I,

        (F::RgbInteger, T::UnsignedByte) => gl::RGB8UI,
        (F::RgbInteger, T::Byte) => gl::RGB8I,
        (F::RgbInteger, T::UnsignedShort) => gl::RGB16UI,
        (F::RgbInteger, T::Short) => gl::RGB16I,
        (F::RgbInteger, T::UnsignedInt) => gl::RGB32UI,
        (F::RgbInteger, T::Int) => gl::RGB32I,

        (F::RgInteger, T::UnsignedByte) => gl::RG8UI,
        (F::RgInteger, T::Byte) => gl::RG8I,
        (F::RgInteger, T::UnsignedShort) => gl::RG16UI,
        (F::RgInteger, T::Short) => gl::RG16I,
        (F::RgInteger, T::UnsignedInt) => gl::RG32UI,
        (F::RgInteger, T::Int) => gl::RG32I,

        (F::RedInteger, T::UnsignedByte) => gl::R8UI,
        (F::RedInteger, T::Byte) => gl::R8I,
        (F::RedInteger, T::UnsignedShort) => gl::R16UI,
        (F::RedInteger, T::Short) => gl::R16I,
        (F::RedInteger, T::UnsignedInt) => gl::R32UI,
        (F::RedInteger, T::Int) => gl::R32I,

        (F::Depth, T::UnsignedShort) => gl::DEPTH_COMPONENT16,
        (F::Depth, T::UnsignedInt) => gl::DEPTH_COMPONENT24,
        (F::Depth, T::Float) => gl::DEPTH_COMPONENT32F,

        (F::DepthStencil, T::UnsignedInt248) => gl::DEPTH24_STENCIL8,
        (F::DepthStencil, T::Float) => gl::DEPTH32F_STENCIL8,
        // 16-bit depth with stencil has no GL storage; callers warn and fall
        // back to the 24-bit combined format
        (F::DepthStencil, T::UnsignedShort) => gl::DEPTH24_STENCIL8,

        (F::Compressed(compressed), _) => match compressed {
            CompressedFormat::RgbS3tcDxt1 => gl::COMPRESSED_RGB_S3TC_DXT1,
            CompressedFormat::RgbaS3tcDxt5 => gl::COMPRESSED_RGBA_S3TC_DXT5,
            CompressedFormat::RgbaEtc2Eac => gl::COMPRESSED_RGBA8_ETC2_EAC,
            CompressedFormat::RgbaAstc4x4 => gl::COMPRESSED_RGBA_ASTC_4X4,
            CompressedFormat::RgbaBptc => gl::COMPRESSED_RGBA_BPTC_UNORM,
        },

        (format, ty) => {
            return Err(RenderError::UnsupportedFormat(format!("{format:?}/{ty:?}")));
        }
    };
    Ok(internal)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_only_applies_to_rgba8() {
        assert_eq!(
            internal_format(TextureFormat::Rgba, TextureType::UnsignedByte, ColorSpace::Srgb, false)
                .unwrap(),
            gl::SRGB8_ALPHA8
        );
        assert_eq!(
            internal_format(TextureFormat::Rgba, TextureType::UnsignedByte, ColorSpace::Srgb, true)
                .unwrap(),
            gl::RGBA8
        );
        assert_eq!(
            internal_format(TextureFormat::Rgba, TextureType::Float, ColorSpace::Linear, false)
                .unwrap(),
            gl::RGBA32F
        );
    }

    #[test]
    fn depth_formats() {
        assert_eq!(
            internal_format(TextureFormat::Depth, TextureType::UnsignedInt, ColorSpace::None, false)
                .unwrap(),
            gl::DEPTH_COMPONENT24
        );
        assert_eq!(
            internal_format(TextureFormat::Depth, TextureType::Float, ColorSpace::None, false)
                .unwrap(),
            gl::DEPTH_COMPONENT32F
        );
        // 16-bit + stencil falls back to 24-bit combined storage
        assert_eq!(
            internal_format(
                TextureFormat::DepthStencil,
                TextureType::UnsignedShort,
                ColorSpace::None,
                false
            )
            .unwrap(),
            gl::DEPTH24_STENCIL8
        );
    }

    #[test]
    fn unsupported_combination_is_an_error() {
        assert!(matches!(
            internal_format(TextureFormat::Rgba, TextureType::Int, ColorSpace::Linear, false),
            Err(RenderError::UnsupportedFormat(_))
        ));
    }
}
