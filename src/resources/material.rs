//! Material descriptors.
//!
//! A material is a shading-model tag plus feature flags and uniform values.
//! There is no behaviour here: the program cache derives its parameter
//! record from these fields, and the state tracker applies the fixed-function
//! half (blending, depth, stencil, culling) per draw.
//!
//! Each map slot is an optional texture handle; presence of the slot is what
//! flips the corresponding shader feature. The per-map UV channel lives on
//! the texture (`Texture::channel`).

use glam::{Vec2, Vec3, Vec4};

use crate::resources::version::{ChangeTracker, IdAllocator};
use crate::resources::SharedTexture;

/// Surface shading model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadingModel {
    #[default]
    Basic,
    Lambert,
    Phong,
    Toon,
    Standard,
    Physical,
    Matcap,
    Depth,
    Distance,
    Normal,
    Shadow,
    Points,
    Line,
    Sprite,
}

impl ShadingModel {
    /// Stable tag used in the program cache key.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Lambert => "lambert",
            Self::Phong => "phong",
            Self::Toon => "toon",
            Self::Standard => "standard",
            Self::Physical => "physical",
            Self::Matcap => "matcap",
            Self::Depth => "depth",
            Self::Distance => "distance",
            Self::Normal => "normal",
            Self::Shadow => "shadow",
            Self::Points => "points",
            Self::Line => "line",
            Self::Sprite => "sprite",
        }
    }

    /// Whether programs of this family consume the lights state.
    #[must_use]
    pub fn is_lit(self) -> bool {
        matches!(
            self,
            Self::Lambert | Self::Phong | Self::Toon | Self::Standard | Self::Physical | Self::Shadow
        )
    }
}

/// Face culling selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

/// Framebuffer blending mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Blending {
    None,
    #[default]
    Normal,
    Additive,
    Subtractive,
    Multiply,
    Custom {
        equation: u32,
        src: u32,
        dst: u32,
        equation_alpha: u32,
        src_alpha: u32,
        dst_alpha: u32,
    },
}

/// Depth / stencil comparison function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    #[default]
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Environment-map combine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Combine {
    #[default]
    Multiply,
    Mix,
    Add,
}

/// Normal map coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalMapSpace {
    #[default]
    Tangent,
    Object,
}

/// Depth value packing for depth materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthPacking {
    #[default]
    None,
    Basic,
    Rgba,
}

/// Fixed-function stencil configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StencilState {
    pub write: bool,
    pub func: CompareFunction,
    pub reference: i32,
    pub func_mask: u32,
    pub write_mask: u32,
    pub fail: u32,
    pub z_fail: u32,
    pub z_pass: u32,
}

impl Default for StencilState {
    fn default() -> Self {
        Self {
            write: false,
            func: CompareFunction::Always,
            reference: 0,
            func_mask: 0xff,
            write_mask: 0xff,
            fail: crate::gl::consts::KEEP,
            z_fail: crate::gl::consts::KEEP,
            z_pass: crate::gl::consts::KEEP,
        }
    }
}

/// Raw shader sources for a custom program.
#[derive(Debug, Clone)]
pub struct CustomShader {
    pub vertex: String,
    pub fragment: String,
}

/// Shading-model tag + feature flags + uniform values.
#[derive(Debug, Clone)]
pub struct Material {
    id: u64,
    pub name: String,
    pub shading: ShadingModel,
    tracker: ChangeTracker,

    // ── Base uniforms ────────────────────────────────────────────────────────
    pub color: Vec3,
    pub opacity: f32,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub shininess: f32,

    // ── Map slots ────────────────────────────────────────────────────────────
    pub map: Option<SharedTexture>,
    pub alpha_map: Option<SharedTexture>,
    pub normal_map: Option<SharedTexture>,
    pub normal_map_space: NormalMapSpace,
    pub normal_scale: Vec2,
    pub bump_map: Option<SharedTexture>,
    pub bump_scale: f32,
    pub displacement_map: Option<SharedTexture>,
    pub roughness_map: Option<SharedTexture>,
    pub metalness_map: Option<SharedTexture>,
    pub emissive_map: Option<SharedTexture>,
    pub ao_map: Option<SharedTexture>,
    pub light_map: Option<SharedTexture>,
    pub env_map: Option<SharedTexture>,
    pub matcap: Option<SharedTexture>,
    pub gradient_map: Option<SharedTexture>,
    pub specular_map: Option<SharedTexture>,
    pub specular_color_map: Option<SharedTexture>,
    pub specular_intensity_map: Option<SharedTexture>,

    // ── Physical extension groups ────────────────────────────────────────────
    pub clearcoat: f32,
    pub clearcoat_map: Option<SharedTexture>,
    pub clearcoat_roughness_map: Option<SharedTexture>,
    pub clearcoat_normal_map: Option<SharedTexture>,
    pub sheen: f32,
    pub sheen_color_map: Option<SharedTexture>,
    pub sheen_roughness_map: Option<SharedTexture>,
    pub iridescence: f32,
    pub iridescence_map: Option<SharedTexture>,
    pub iridescence_thickness_map: Option<SharedTexture>,
    pub anisotropy: f32,
    pub anisotropy_rotation: f32,
    pub anisotropy_map: Option<SharedTexture>,
    pub transmission: f32,
    pub transmission_map: Option<SharedTexture>,
    pub thickness: f32,
    pub thickness_map: Option<SharedTexture>,
    pub ior: f32,
    pub dispersion: f32,

    // ── Blending / transparency ──────────────────────────────────────────────
    pub blending: Blending,
    pub premultiplied_alpha: bool,
    pub transparent: bool,
    pub alpha_test: f32,
    pub alpha_hash: bool,
    pub alpha_to_coverage: bool,

    // ── Fixed function state ─────────────────────────────────────────────────
    pub side: Side,
    pub shadow_side: Option<Side>,
    pub force_single_pass: bool,
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_func: CompareFunction,
    pub color_write: bool,
    pub stencil: StencilState,
    pub polygon_offset: bool,
    pub polygon_offset_factor: f32,
    pub polygon_offset_units: f32,

    // ── Vertex data usage ────────────────────────────────────────────────────
    pub vertex_colors: bool,
    pub flat_shading: bool,
    pub wireframe: bool,
    pub wireframe_linewidth: f32,

    // ── Misc feature flags ───────────────────────────────────────────────────
    pub fog: bool,
    pub dithering: bool,
    pub tone_mapped: bool,
    pub combine: Combine,
    pub size_attenuation: bool,
    pub depth_packing: DepthPacking,
    pub receive_shadow_bias_hint: f32,

    // ── Clipping ─────────────────────────────────────────────────────────────
    /// Additional local clipping planes in world space (xyz normal, w constant).
    pub clipping_planes: Vec<Vec4>,
    pub clip_intersection: bool,
    pub clip_shadows: bool,

    // ── Custom programs ──────────────────────────────────────────────────────
    pub custom_shader: Option<CustomShader>,
    pub custom_program_cache_key: String,
    /// Extra `#define` entries injected into generated shaders.
    pub defines: std::collections::BTreeMap<String, String>,
}

impl Material {
    #[must_use]
    pub fn new(ids: &IdAllocator, shading: ShadingModel) -> Self {
        let mut tracker = ChangeTracker::new();
        tracker.changed();
        Self {
            id: ids.allocate(),
            name: String::new(),
            shading,
            tracker,
            color: Vec3::ONE,
            opacity: 1.0,
            emissive: Vec3::ZERO,
            emissive_intensity: 1.0,
            roughness: 1.0,
            metalness: 0.0,
            shininess: 30.0,
            map: None,
            alpha_map: None,
            normal_map: None,
            normal_map_space: NormalMapSpace::Tangent,
            normal_scale: Vec2::ONE,
            bump_map: None,
            bump_scale: 1.0,
            displacement_map: None,
            roughness_map: None,
            metalness_map: None,
            emissive_map: None,
            ao_map: None,
            light_map: None,
            env_map: None,
            matcap: None,
            gradient_map: None,
            specular_map: None,
            specular_color_map: None,
            specular_intensity_map: None,
            clearcoat: 0.0,
            clearcoat_map: None,
            clearcoat_roughness_map: None,
            clearcoat_normal_map: None,
            sheen: 0.0,
            sheen_color_map: None,
            sheen_roughness_map: None,
            iridescence: 0.0,
            iridescence_map: None,
            iridescence_thickness_map: None,
            anisotropy: 0.0,
            anisotropy_rotation: 0.0,
            anisotropy_map: None,
            transmission: 0.0,
            transmission_map: None,
            thickness: 0.0,
            thickness_map: None,
            ior: 1.5,
            dispersion: 0.0,
            blending: Blending::Normal,
            premultiplied_alpha: false,
            transparent: false,
            alpha_test: 0.0,
            alpha_hash: false,
            alpha_to_coverage: false,
            side: Side::Front,
            shadow_side: None,
            force_single_pass: false,
            depth_test: true,
            depth_write: true,
            depth_func: CompareFunction::LessEqual,
            color_write: true,
            stencil: StencilState::default(),
            polygon_offset: false,
            polygon_offset_factor: 0.0,
            polygon_offset_units: 0.0,
            vertex_colors: false,
            flat_shading: false,
            wireframe: false,
            wireframe_linewidth: 1.0,
            fog: true,
            dithering: false,
            tone_mapped: true,
            combine: Combine::Multiply,
            size_attenuation: true,
            depth_packing: DepthPacking::None,
            receive_shadow_bias_hint: 0.0,
            clipping_planes: Vec::new(),
            clip_intersection: false,
            clip_shadows: false,
            custom_shader: None,
            custom_program_cache_key: String::new(),
            defines: std::collections::BTreeMap::new(),
        }
    }

    /// Material with raw shader sources; `shading` only picks the defaults.
    #[must_use]
    pub fn custom(
        ids: &IdAllocator,
        vertex: impl Into<String>,
        fragment: impl Into<String>,
    ) -> Self {
        let mut material = Self::new(ids, ShadingModel::Basic);
        material.custom_shader = Some(CustomShader {
            vertex: vertex.into(),
            fragment: fragment.into(),
        });
        material
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.tracker.version()
    }

    /// Forces program re-derivation and uniform refresh on next draw.
    pub fn needs_update(&mut self) {
        self.tracker.changed();
    }

    /// `alphaTest > 0` is exclusive with `alphaHash`.
    #[must_use]
    pub fn validate(&self) -> bool {
        !(self.alpha_test > 0.0 && self.alpha_hash)
    }

    /// Effective side used when rendering into shadow maps.
    #[must_use]
    pub fn effective_shadow_side(&self) -> Side {
        self.shadow_side.unwrap_or(match self.side {
            Side::Front => Side::Back,
            Side::Back => Side::Front,
            Side::Double => Side::Double,
        })
    }

    /// A transmissive material is sorted into the `transmissive` bucket and
    /// triggers the transmission pre-pass.
    #[must_use]
    pub fn is_transmissive(&self) -> bool {
        self.transmission > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpha_test_excludes_alpha_hash() {
        let ids = IdAllocator::new();
        let mut m = Material::new(&ids, ShadingModel::Standard);
        m.alpha_test = 0.5;
        assert!(m.validate());
        m.alpha_hash = true;
        assert!(!m.validate());
    }

    #[test]
    fn shadow_side_defaults_to_opposite() {
        let ids = IdAllocator::new();
        let mut m = Material::new(&ids, ShadingModel::Standard);
        assert_eq!(m.effective_shadow_side(), Side::Back);
        m.side = Side::Double;
        assert_eq!(m.effective_shadow_side(), Side::Double);
        m.shadow_side = Some(Side::Front);
        assert_eq!(m.effective_shadow_side(), Side::Front);
    }
}
