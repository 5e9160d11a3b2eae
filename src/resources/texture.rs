//! Texture descriptors.
//!
//! A [`Texture`] pairs a pixel [`TextureSource`] with sampling parameters.
//! Several textures may reference the same source; the texture manager
//! de-duplicates GPU storage by `(source id, parameter key)`. Bumping
//! `version` via [`Texture::needs_update`] forces a re-upload on next use.

use rustc_hash::FxHashSet;

use crate::resources::buffer::UpdateRange;
use crate::resources::version::{ChangeTracker, IdAllocator};

/// Texel component layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFormat {
    #[default]
    Rgba,
    Rgb,
    Rg,
    Red,
    RgbaInteger,
    RgbInteger,
    RgInteger,
    RedInteger,
    Depth,
    DepthStencil,
    Compressed(CompressedFormat),
}

/// Block-compressed formats requiring the matching device extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressedFormat {
    RgbS3tcDxt1,
    RgbaS3tcDxt5,
    RgbaEtc2Eac,
    RgbaAstc4x4,
    RgbaBptc,
}

/// Texel component type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureType {
    #[default]
    UnsignedByte,
    Byte,
    UnsignedShort,
    Short,
    UnsignedInt,
    Int,
    HalfFloat,
    Float,
    UnsignedInt248,
    UnsignedInt5999Rev,
    UnsignedInt10f11f11fRev,
}

/// Transfer function of the stored texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorSpace {
    #[default]
    Linear,
    Srgb,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wrap {
    #[default]
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

impl Filter {
    /// Whether this minification filter samples mip levels.
    #[must_use]
    pub fn uses_mipmaps(self) -> bool {
        !matches!(self, Self::Nearest | Self::Linear)
    }
}

/// Depth-texture comparison function for shadow sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureCompare {
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

/// One linear block of texels.
#[derive(Debug, Clone, Default)]
pub struct PixelData {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl PixelData {
    #[must_use]
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            data,
            width,
            height,
            depth: 1,
        }
    }
}

/// Raw pixel storage underlying one or more textures.
///
/// The `id` is the de-duplication key: textures created from the same source
/// (via [`Texture::with_source_of`]) share GPU storage when their sampling
/// parameters also agree.
#[derive(Debug, Clone)]
pub enum TextureSource {
    /// GPU-only storage (render target attachments).
    Uninitialized { width: u32, height: u32, depth: u32 },
    /// A single linear buffer, optionally with an explicit mip chain.
    Data {
        level0: PixelData,
        mipmaps: Vec<PixelData>,
    },
    /// Six cube faces, +x -x +y -y +z -z.
    CubeFaces(Box<[PixelData; 6]>),
}

impl TextureSource {
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Self::Uninitialized { width, .. } => *width,
            Self::Data { level0, .. } => level0.width,
            Self::CubeFaces(faces) => faces[0].width,
        }
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        match self {
            Self::Uninitialized { height, .. } => *height,
            Self::Data { level0, .. } => level0.height,
            Self::CubeFaces(faces) => faces[0].height,
        }
    }

    #[must_use]
    pub fn depth(&self) -> u32 {
        match self {
            Self::Uninitialized { depth, .. } => *depth,
            Self::Data { level0, .. } => level0.depth,
            Self::CubeFaces(_) => 6,
        }
    }
}

/// Texture binding dimensionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    #[default]
    D2,
    D2Array,
    D3,
    Cube,
}

/// An image source plus sampling parameters.
#[derive(Debug, Clone)]
pub struct Texture {
    id: u64,
    source_id: u64,
    pub source: TextureSource,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub texel_type: TextureType,
    pub color_space: ColorSpace,
    pub wrap_s: Wrap,
    pub wrap_t: Wrap,
    pub wrap_r: Wrap,
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub anisotropy: f32,
    pub flip_y: bool,
    pub premultiply_alpha: bool,
    pub unpack_alignment: i32,
    pub generate_mipmaps: bool,
    pub compare: Option<TextureCompare>,
    /// UV channel this texture samples (`uv`, `uv1`, `uv2`, `uv3`).
    pub channel: u32,
    /// Video textures bypass immutable storage and re-upload every frame.
    pub is_video: bool,
    /// Dirty texel regions for partial data-texture updates, in texel units.
    pub update_ranges: Vec<UpdateRange>,
    /// Restricts array-texture uploads to specific layers when non-empty.
    pub layer_updates: FxHashSet<u32>,
    tracker: ChangeTracker,
}

impl Texture {
    #[must_use]
    pub fn new(ids: &IdAllocator, source: TextureSource, dimension: TextureDimension) -> Self {
        let mut tracker = ChangeTracker::new();
        tracker.changed();
        Self {
            id: ids.allocate(),
            source_id: ids.allocate(),
            source,
            dimension,
            format: TextureFormat::Rgba,
            texel_type: TextureType::UnsignedByte,
            color_space: ColorSpace::Linear,
            wrap_s: Wrap::ClampToEdge,
            wrap_t: Wrap::ClampToEdge,
            wrap_r: Wrap::ClampToEdge,
            mag_filter: Filter::Linear,
            min_filter: Filter::LinearMipmapLinear,
            anisotropy: 1.0,
            flip_y: true,
            premultiply_alpha: false,
            unpack_alignment: 4,
            generate_mipmaps: true,
            compare: None,
            channel: 0,
            is_video: false,
            update_ranges: Vec::new(),
            layer_updates: FxHashSet::default(),
            tracker,
        }
    }

    /// 2D texture from raw RGBA8 data.
    #[must_use]
    pub fn from_data(ids: &IdAllocator, data: Vec<u8>, width: u32, height: u32) -> Self {
        let mut tex = Self::new(
            ids,
            TextureSource::Data {
                level0: PixelData::new(data, width, height),
                mipmaps: Vec::new(),
            },
            TextureDimension::D2,
        );
        // data textures address texels directly
        tex.flip_y = false;
        tex.generate_mipmaps = false;
        tex.min_filter = Filter::Linear;
        tex
    }

    /// Cube texture from six equally sized faces.
    #[must_use]
    pub fn from_cube_faces(ids: &IdAllocator, faces: [PixelData; 6]) -> Self {
        Self::new(
            ids,
            TextureSource::CubeFaces(Box::new(faces)),
            TextureDimension::Cube,
        )
    }

    /// Half-float RGBA texture from `f32` texels (HDR data sources).
    #[must_use]
    pub fn from_rgba_f32(ids: &IdAllocator, data: &[f32], width: u32, height: u32) -> Self {
        let halves: Vec<u8> = data
            .iter()
            .flat_map(|&v| half::f16::from_f32(v).to_le_bytes())
            .collect();
        let mut tex = Self::from_data(ids, halves, width, height);
        tex.texel_type = TextureType::HalfFloat;
        tex
    }

    /// GPU-only texture for render target attachments.
    #[must_use]
    pub fn render_target_texture(ids: &IdAllocator, width: u32, height: u32) -> Self {
        let mut tex = Self::new(
            ids,
            TextureSource::Uninitialized { width, height, depth: 1 },
            TextureDimension::D2,
        );
        tex.flip_y = false;
        tex.generate_mipmaps = false;
        tex.min_filter = Filter::Linear;
        tex
    }

    /// Depth attachment texture.
    #[must_use]
    pub fn depth_texture(ids: &IdAllocator, width: u32, height: u32, stencil: bool) -> Self {
        let mut tex = Self::render_target_texture(ids, width, height);
        tex.format = if stencil {
            TextureFormat::DepthStencil
        } else {
            TextureFormat::Depth
        };
        tex.texel_type = if stencil {
            TextureType::UnsignedInt248
        } else {
            TextureType::UnsignedInt
        };
        tex.mag_filter = Filter::Nearest;
        tex.min_filter = Filter::Nearest;
        tex
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// De-duplication key of the underlying pixel storage.
    #[must_use]
    pub fn source_id(&self) -> u64 {
        self.source_id
    }

    /// Shares pixel storage identity with `other`; the texture manager will
    /// allocate a single GPU object when the sampling parameters also match.
    pub fn share_source_of(&mut self, other: &Texture) {
        self.source_id = other.source_id;
        self.source = other.source.clone();
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    /// Forces a re-upload on next use.
    pub fn needs_update(&mut self) {
        self.tracker.changed();
    }

    /// Marks a texel region dirty for a partial data-texture update.
    pub fn add_update_range(&mut self, start: usize, count: usize) {
        self.update_ranges.push(UpdateRange { start, count });
        self.tracker.changed();
    }

    #[must_use]
    pub fn is_depth(&self) -> bool {
        matches!(self.format, TextureFormat::Depth | TextureFormat::DepthStencil)
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        matches!(self.format, TextureFormat::Compressed(_))
    }

    /// §3 invariants that do not need a device: sRGB-encoded textures must be
    /// 8-bit RGBA, depth textures must use the depth formats, and compressed
    /// textures must not request mipmap auto-generation.
    #[must_use]
    pub fn validate(&self) -> bool {
        if self.color_space == ColorSpace::Srgb
            && !(self.format == TextureFormat::Rgba && self.texel_type == TextureType::UnsignedByte)
        {
            return false;
        }
        if self.compare.is_some() && !self.is_depth() {
            return false;
        }
        if self.is_compressed() && self.generate_mipmaps {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_source_has_one_source_id() {
        let ids = IdAllocator::new();
        let a = Texture::from_data(&ids, vec![0; 16], 2, 2);
        let mut b = Texture::from_data(&ids, vec![0; 4], 1, 1);
        assert_ne!(a.source_id(), b.source_id());
        b.share_source_of(&a);
        assert_eq!(a.source_id(), b.source_id());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn srgb_requires_rgba8() {
        let ids = IdAllocator::new();
        let mut tex = Texture::from_data(&ids, vec![0; 16], 2, 2);
        tex.color_space = ColorSpace::Srgb;
        assert!(tex.validate());
        tex.texel_type = TextureType::Float;
        assert!(!tex.validate());
    }

    #[test]
    fn compressed_rejects_mipmap_generation() {
        let ids = IdAllocator::new();
        let mut tex = Texture::from_data(&ids, vec![0; 16], 2, 2);
        tex.format = TextureFormat::Compressed(CompressedFormat::RgbaS3tcDxt5);
        tex.generate_mipmaps = true;
        assert!(!tex.validate());
        tex.generate_mipmaps = false;
        assert!(tex.validate());
    }
}
