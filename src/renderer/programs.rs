//! Program derivation, caching, and linking.
//!
//! Every feature that affects shader source is extracted into a fixed-shape
//! [`Parameters`] record; [`ProgramCache::cache_key`] serialises it into a
//! deterministic string. Feature booleans are packed into two bitmasks with
//! fixed positions — removed features must never re-use a slot, additions
//! append. Programs are reference-counted: `acquire` bumps `used_times`,
//! `release` destroys the GL program when the count reaches zero.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use bitflags::bitflags;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::gl::consts as gl;
use crate::gl::{GlContext, ProgramHandle, UniformLocation};
use crate::renderer::lights::LightCounts;
use crate::renderer::shader_gen;
use crate::resources::material::{Combine, DepthPacking, Material, NormalMapSpace, ShadingModel, Side};
use crate::resources::texture::ColorSpace;
use crate::resources::{Geometry, SharedTexture};
use crate::scene::scene::Fog;

/// Shadow map filtering algorithm, renderer-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowMapType {
    Basic,
    #[default]
    Pcf,
    PcfSoft,
    Vsm,
}

/// Output tone mapping operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToneMapping {
    #[default]
    None,
    Linear,
    Reinhard,
    Cineon,
    Aces,
    Agx,
    Neutral,
}

bitflags! {
    /// Feature bitmask 1. Bit positions are frozen.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProgramFlags1: u32 {
        const SUPPORTS_VERTEX_TEXTURES = 1 << 0;
        const INSTANCING = 1 << 1;
        const INSTANCING_COLOR = 1 << 2;
        const INSTANCING_MORPH = 1 << 3;
        const MATCAP = 1 << 4;
        const ENV_MAP = 1 << 5;
        const NORMAL_MAP_OBJECT_SPACE = 1 << 6;
        const NORMAL_MAP_TANGENT_SPACE = 1 << 7;
        const CLEARCOAT = 1 << 8;
        const IRIDESCENCE = 1 << 9;
        const ALPHA_TEST = 1 << 10;
        const VERTEX_COLORS = 1 << 11;
        const VERTEX_ALPHAS = 1 << 12;
        const VERTEX_UV1S = 1 << 13;
        const VERTEX_UV2S = 1 << 14;
        const VERTEX_UV3S = 1 << 15;
        const VERTEX_TANGENTS = 1 << 16;
        const ANISOTROPY = 1 << 17;
        const ALPHA_HASH = 1 << 18;
        const BATCHING = 1 << 19;
        const DISPERSION = 1 << 20;
        const BATCHING_COLOR = 1 << 21;
        const GRADIENT_MAP = 1 << 22;
    }
}

bitflags! {
    /// Feature bitmask 2. Bit positions are frozen.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ProgramFlags2: u32 {
        const FOG = 1 << 0;
        const USE_FOG = 1 << 1;
        const FLAT_SHADING = 1 << 2;
        const LOGARITHMIC_DEPTH = 1 << 3;
        const REVERSED_DEPTH = 1 << 4;
        const SKINNING = 1 << 5;
        const MORPH_TARGETS = 1 << 6;
        const MORPH_NORMALS = 1 << 7;
        const MORPH_COLORS = 1 << 8;
        const PREMULTIPLIED_ALPHA = 1 << 9;
        const SHADOW_MAP_ENABLED = 1 << 10;
        const DOUBLE_SIDED = 1 << 11;
        const FLIP_SIDED = 1 << 12;
        const USE_DEPTH_PACKING = 1 << 13;
        const DITHERING = 1 << 14;
        const TRANSMISSION = 1 << 15;
        const SHEEN = 1 << 16;
        const OPAQUE = 1 << 17;
        const POINTS_UVS = 1 << 18;
        const DECODE_VIDEO_TEXTURE = 1 << 19;
        const DECODE_VIDEO_TEXTURE_EMISSIVE = 1 << 20;
        const ALPHA_TO_COVERAGE = 1 << 21;
    }
}

/// Fixed order of map slots in the cache key. A slot's entry is its UV
/// channel when the map is present.
pub const MAP_SLOTS: [&str; 26] = [
    "map",
    "alphaMap",
    "normalMap",
    "bumpMap",
    "displacementMap",
    "roughnessMap",
    "metalnessMap",
    "emissiveMap",
    "aoMap",
    "lightMap",
    "envMap",
    "matcap",
    "gradientMap",
    "specularMap",
    "specularColorMap",
    "specularIntensityMap",
    "clearcoatMap",
    "clearcoatRoughnessMap",
    "clearcoatNormalMap",
    "sheenColorMap",
    "sheenRoughnessMap",
    "iridescenceMap",
    "iridescenceThicknessMap",
    "transmissionMap",
    "thicknessMap",
    "anisotropyMap",
];

/// Fixed-shape description of every feature affecting shader source.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub shader_tag: String,
    pub custom_vertex_id: Option<u32>,
    pub custom_fragment_id: Option<u32>,
    pub defines: BTreeMap<String, String>,
    pub precision: &'static str,
    pub output_color_space: ColorSpace,

    // map presence (samplers compiled in)
    pub map: bool,
    pub alpha_map: bool,
    pub normal_map: bool,
    pub bump_map: bool,
    pub displacement_map: bool,
    pub roughness_map: bool,
    pub metalness_map: bool,
    pub emissive_map: bool,
    pub ao_map: bool,
    pub light_map: bool,
    pub specular_map: bool,

    /// UV channel per map slot, `MAP_SLOTS` order; `None` = map absent.
    pub uv_channels: [Option<u32>; MAP_SLOTS.len()],

    // misc scalars
    pub combine: Combine,
    pub fog_exp2: bool,
    pub size_attenuation: bool,
    pub morph_targets_count: usize,
    pub num_dir_lights: usize,
    pub num_point_lights: usize,
    pub num_spot_lights: usize,
    pub num_spot_maps: usize,
    pub num_rect_area_lights: usize,
    pub num_hemi_lights: usize,
    pub num_dir_shadows: usize,
    pub num_point_shadows: usize,
    pub num_spot_shadows: usize,
    pub shadow_map_type: ShadowMapType,
    pub tone_mapping: ToneMapping,
    pub num_clipping_planes: usize,
    pub num_clip_intersection: usize,
    pub depth_packing: DepthPacking,

    pub flags1: ProgramFlags1,
    pub flags2: ProgramFlags2,
    pub custom_cache_key: String,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            shader_tag: "basic".to_string(),
            custom_vertex_id: None,
            custom_fragment_id: None,
            defines: BTreeMap::new(),
            precision: "highp",
            output_color_space: ColorSpace::Srgb,
            map: false,
            alpha_map: false,
            normal_map: false,
            bump_map: false,
            displacement_map: false,
            roughness_map: false,
            metalness_map: false,
            emissive_map: false,
            ao_map: false,
            light_map: false,
            specular_map: false,
            uv_channels: [None; MAP_SLOTS.len()],
            combine: Combine::Multiply,
            fog_exp2: false,
            size_attenuation: false,
            morph_targets_count: 0,
            num_dir_lights: 0,
            num_point_lights: 0,
            num_spot_lights: 0,
            num_spot_maps: 0,
            num_rect_area_lights: 0,
            num_hemi_lights: 0,
            num_dir_shadows: 0,
            num_point_shadows: 0,
            num_spot_shadows: 0,
            shadow_map_type: ShadowMapType::Pcf,
            tone_mapping: ToneMapping::None,
            num_clipping_planes: 0,
            num_clip_intersection: 0,
            depth_packing: DepthPacking::None,
            flags1: ProgramFlags1::empty(),
            flags2: ProgramFlags2::empty(),
            custom_cache_key: String::new(),
        }
    }
}

macro_rules! flag_accessors {
    ($field:ident, $mask:ident: $($name:ident => $flag:ident),* $(,)?) => {
        $(
            #[inline]
            #[must_use]
            pub fn $name(&self) -> bool {
                self.$field.contains($mask::$flag)
            }
        )*
    };
}

impl Parameters {
    flag_accessors! {
        flags1, ProgramFlags1:
        supports_vertex_textures => SUPPORTS_VERTEX_TEXTURES,
        instancing => INSTANCING,
        instancing_color => INSTANCING_COLOR,
        instancing_morph => INSTANCING_MORPH,
        matcap => MATCAP,
        env_map => ENV_MAP,
        normal_map_object_space => NORMAL_MAP_OBJECT_SPACE,
        normal_map_tangent_space => NORMAL_MAP_TANGENT_SPACE,
        clearcoat => CLEARCOAT,
        iridescence => IRIDESCENCE,
        alpha_test => ALPHA_TEST,
        vertex_colors => VERTEX_COLORS,
        vertex_alphas => VERTEX_ALPHAS,
        vertex_uv1s => VERTEX_UV1S,
        vertex_uv2s => VERTEX_UV2S,
        vertex_uv3s => VERTEX_UV3S,
        vertex_tangents => VERTEX_TANGENTS,
        anisotropy_enabled => ANISOTROPY,
        alpha_hash => ALPHA_HASH,
        dispersion => DISPERSION,
        gradient_map => GRADIENT_MAP,
    }

    flag_accessors! {
        flags2, ProgramFlags2:
        fog => FOG,
        use_fog => USE_FOG,
        flat_shading => FLAT_SHADING,
        logarithmic_depth => LOGARITHMIC_DEPTH,
        reversed_depth => REVERSED_DEPTH,
        skinning => SKINNING,
        morph_normals => MORPH_NORMALS,
        morph_colors => MORPH_COLORS,
        premultiplied_alpha => PREMULTIPLIED_ALPHA,
        shadow_map_enabled => SHADOW_MAP_ENABLED,
        double_sided => DOUBLE_SIDED,
        flip_sided => FLIP_SIDED,
        use_depth_packing => USE_DEPTH_PACKING,
        dithering => DITHERING,
        transmission => TRANSMISSION,
        sheen => SHEEN,
        points_uvs => POINTS_UVS,
        decode_video_texture => DECODE_VIDEO_TEXTURE,
    }
}

/// Non-material inputs to parameter derivation.
pub struct DerivationInputs<'a> {
    pub lights: &'a LightCounts,
    pub shadow_map_enabled: bool,
    pub shadow_map_type: ShadowMapType,
    pub fog: Option<&'a Fog>,
    pub output_color_space: ColorSpace,
    pub tone_mapping: ToneMapping,
    pub num_clipping_planes: usize,
    pub num_clip_intersection: usize,
    pub reversed_depth: bool,
    pub logarithmic_depth: bool,
    pub supports_vertex_textures: bool,
    pub instancing: bool,
    pub instancing_color: bool,
    /// Instanced mesh that also carries morph influences.
    pub instancing_morph: bool,
    pub skinning: bool,
    pub opaque_pass: bool,
}

/// One linked GPU program plus its introspected interface.
#[derive(Debug)]
pub struct GlProgram {
    pub id: u64,
    pub cache_key: String,
    pub handle: ProgramHandle,
    pub used_times: Cell<usize>,
    pub link_ok: bool,
    pub attributes: FxHashMap<String, u32>,
    pub uniforms: FxHashMap<String, UniformLocation>,
}

impl GlProgram {
    #[must_use]
    pub fn uniform(&self, name: &str) -> Option<UniformLocation> {
        self.uniforms.get(name).copied()
    }
}

/// One unique custom shader source: its monotonic id plus the number of
/// material stage sets referencing it.
struct ShaderSourceEntry {
    id: u32,
    used: usize,
}

/// Program list + custom-shader-source id cache.
pub struct ProgramCache {
    programs: Vec<Rc<GlProgram>>,
    next_program_id: u64,
    shader_source_ids: FxHashMap<String, ShaderSourceEntry>,
    next_shader_id: u32,
    /// Material id → (vertex source id, fragment source id).
    material_shaders: FxHashMap<u64, (u32, u32)>,
    /// Called with the GPU log when a program fails to link.
    pub on_shader_error: Option<Box<dyn Fn(&str)>>,
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            programs: Vec::new(),
            next_program_id: 1,
            shader_source_ids: FxHashMap::default(),
            next_shader_id: 1,
            material_shaders: FxHashMap::default(),
            on_shader_error: None,
        }
    }

    /// Number of live programs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Monotonic id for one unique shader source text. Entries start
    /// unreferenced; [`register_material_shaders`](Self::register_material_shaders)
    /// attaches them to a material's stage set.
    fn shader_source_id(&mut self, source: &str) -> u32 {
        if let Some(entry) = self.shader_source_ids.get(source) {
            return entry.id;
        }
        let id = self.next_shader_id;
        self.next_shader_id += 1;
        self.shader_source_ids
            .insert(source.to_string(), ShaderSourceEntry { id, used: 0 });
        id
    }

    fn retain_shader_source(&mut self, id: u32) {
        if let Some(entry) = self.shader_source_ids.values_mut().find(|e| e.id == id) {
            entry.used += 1;
        }
    }

    fn release_shader_source(&mut self, id: u32) {
        if let Some(entry) = self.shader_source_ids.values_mut().find(|e| e.id == id) {
            entry.used = entry.used.saturating_sub(1);
        }
        self.shader_source_ids
            .retain(|_, entry| !(entry.id == id && entry.used == 0));
    }

    /// Records the material's (vertex, fragment) source id pair, adjusting
    /// the per-source reference counts when the set changes. No-op while
    /// the material keeps using the same sources.
    fn register_material_shaders(&mut self, material_id: u64, vertex_id: u32, fragment_id: u32) {
        match self.material_shaders.get(&material_id).copied() {
            Some(existing) if existing == (vertex_id, fragment_id) => {}
            Some((old_vertex, old_fragment)) => {
                // retain before release so a kept source never hits zero
                self.retain_shader_source(vertex_id);
                self.retain_shader_source(fragment_id);
                self.release_shader_source(old_vertex);
                self.release_shader_source(old_fragment);
                self.material_shaders
                    .insert(material_id, (vertex_id, fragment_id));
            }
            None => {
                self.retain_shader_source(vertex_id);
                self.retain_shader_source(fragment_id);
                self.material_shaders
                    .insert(material_id, (vertex_id, fragment_id));
            }
        }
    }

    /// Drops a disposed material's stage set; source ids are reclaimed
    /// once the last material using them lets go.
    pub fn release_material_shaders(&mut self, material_id: u64) {
        if let Some((vertex_id, fragment_id)) = self.material_shaders.remove(&material_id) {
            self.release_shader_source(vertex_id);
            self.release_shader_source(fragment_id);
        }
    }

    /// Number of live unique shader sources.
    #[must_use]
    pub fn shader_source_count(&self) -> usize {
        self.shader_source_ids.len()
    }

    // ── Parameter derivation ─────────────────────────────────────────────────

    /// Pure derivation of the parameter record for one draw.
    pub fn get_parameters(
        &mut self,
        material: &Material,
        geometry: &Geometry,
        inputs: &DerivationInputs<'_>,
    ) -> Parameters {
        let mut parameters = Parameters {
            shader_tag: material.shading.tag().to_string(),
            precision: "highp",
            output_color_space: inputs.output_color_space,
            defines: material.defines.clone(),
            combine: material.combine,
            size_attenuation: material.size_attenuation
                && material.shading == ShadingModel::Points,
            shadow_map_type: inputs.shadow_map_type,
            tone_mapping: if material.tone_mapped {
                inputs.tone_mapping
            } else {
                ToneMapping::None
            },
            num_dir_lights: inputs.lights.directional,
            num_point_lights: inputs.lights.point,
            num_spot_lights: inputs.lights.spot,
            num_spot_maps: inputs.lights.spot_maps,
            num_rect_area_lights: inputs.lights.rect_area,
            num_hemi_lights: inputs.lights.hemi,
            num_dir_shadows: inputs.lights.directional_shadows,
            num_point_shadows: inputs.lights.point_shadows,
            num_spot_shadows: inputs.lights.spot_shadows,
            num_clipping_planes: inputs.num_clipping_planes,
            num_clip_intersection: inputs.num_clip_intersection,
            depth_packing: material.depth_packing,
            custom_cache_key: material.custom_program_cache_key.clone(),
            ..Parameters::default()
        };

        if let Some(custom) = &material.custom_shader {
            parameters.shader_tag = "custom".to_string();
            let vertex_id = self.shader_source_id(&custom.vertex);
            let fragment_id = self.shader_source_id(&custom.fragment);
            self.register_material_shaders(material.id(), vertex_id, fragment_id);
            parameters.custom_vertex_id = Some(vertex_id);
            parameters.custom_fragment_id = Some(fragment_id);
        }

        // map presence + per-map UV channel accounting; the active-channel
        // set is rebuilt from scratch on every derivation
        let mut active_channels: FxHashSet<u32> = FxHashSet::default();
        let mut uv_channels: [Option<u32>; MAP_SLOTS.len()] = [None; MAP_SLOTS.len()];
        let mut record = |slot: usize, map: &Option<SharedTexture>| -> bool {
            if let Some(texture) = map {
                let channel = texture.borrow().channel;
                uv_channels[slot] = Some(channel);
                active_channels.insert(channel);
                true
            } else {
                false
            }
        };

        parameters.map = record(0, &material.map);
        parameters.alpha_map = record(1, &material.alpha_map);
        parameters.normal_map = record(2, &material.normal_map);
        parameters.bump_map = record(3, &material.bump_map);
        parameters.displacement_map = record(4, &material.displacement_map);
        parameters.roughness_map = record(5, &material.roughness_map);
        parameters.metalness_map = record(6, &material.metalness_map);
        parameters.emissive_map = record(7, &material.emissive_map);
        parameters.ao_map = record(8, &material.ao_map);
        parameters.light_map = record(9, &material.light_map);
        let env_map = record(10, &material.env_map);
        let matcap = record(11, &material.matcap);
        let gradient_map = record(12, &material.gradient_map);
        parameters.specular_map = record(13, &material.specular_map);
        record(14, &material.specular_color_map);
        record(15, &material.specular_intensity_map);
        let clearcoat_maps = record(16, &material.clearcoat_map)
            | record(17, &material.clearcoat_roughness_map)
            | record(18, &material.clearcoat_normal_map);
        let sheen_maps =
            record(19, &material.sheen_color_map) | record(20, &material.sheen_roughness_map);
        let iridescence_maps = record(21, &material.iridescence_map)
            | record(22, &material.iridescence_thickness_map);
        record(23, &material.transmission_map);
        record(24, &material.thickness_map);
        let anisotropy_map = record(25, &material.anisotropy_map);
        drop(record);
        parameters.uv_channels = uv_channels;

        // geometry-driven vertex data
        let vertex_colors = material.vertex_colors && geometry.attributes.contains_key("color");
        let vertex_alphas = vertex_colors
            && geometry
                .attribute("color")
                .is_some_and(|color| color.item_size == 4);
        let vertex_tangents =
            parameters.normal_map && geometry.attributes.contains_key("tangent");
        let morph_position_targets = geometry
            .morph_attributes
            .get("position")
            .map_or(0, Vec::len);
        parameters.morph_targets_count = morph_position_targets;

        let mut flags1 = ProgramFlags1::empty();
        flags1.set(
            ProgramFlags1::SUPPORTS_VERTEX_TEXTURES,
            inputs.supports_vertex_textures,
        );
        flags1.set(ProgramFlags1::INSTANCING, inputs.instancing);
        flags1.set(ProgramFlags1::INSTANCING_COLOR, inputs.instancing_color);
        flags1.set(
            ProgramFlags1::INSTANCING_MORPH,
            inputs.instancing_morph && morph_position_targets > 0,
        );
        flags1.set(ProgramFlags1::MATCAP, matcap);
        flags1.set(ProgramFlags1::ENV_MAP, env_map);
        flags1.set(
            ProgramFlags1::NORMAL_MAP_OBJECT_SPACE,
            parameters.normal_map && material.normal_map_space == NormalMapSpace::Object,
        );
        flags1.set(
            ProgramFlags1::NORMAL_MAP_TANGENT_SPACE,
            parameters.normal_map && material.normal_map_space == NormalMapSpace::Tangent,
        );
        flags1.set(
            ProgramFlags1::CLEARCOAT,
            material.clearcoat > 0.0 || clearcoat_maps,
        );
        flags1.set(
            ProgramFlags1::IRIDESCENCE,
            material.iridescence > 0.0 || iridescence_maps,
        );
        flags1.set(ProgramFlags1::ALPHA_TEST, material.alpha_test > 0.0);
        flags1.set(ProgramFlags1::VERTEX_COLORS, vertex_colors);
        flags1.set(ProgramFlags1::VERTEX_ALPHAS, vertex_alphas);
        flags1.set(ProgramFlags1::VERTEX_UV1S, active_channels.contains(&1));
        flags1.set(ProgramFlags1::VERTEX_UV2S, active_channels.contains(&2));
        flags1.set(ProgramFlags1::VERTEX_UV3S, active_channels.contains(&3));
        flags1.set(ProgramFlags1::VERTEX_TANGENTS, vertex_tangents);
        flags1.set(
            ProgramFlags1::ANISOTROPY,
            material.anisotropy.abs() > 0.0 || anisotropy_map,
        );
        flags1.set(ProgramFlags1::ALPHA_HASH, material.alpha_hash);
        flags1.set(ProgramFlags1::GRADIENT_MAP, gradient_map);
        flags1.set(ProgramFlags1::DISPERSION, material.dispersion > 0.0);

        let mut flags2 = ProgramFlags2::empty();
        flags2.set(ProgramFlags2::FOG, inputs.fog.is_some());
        flags2.set(ProgramFlags2::USE_FOG, material.fog && inputs.fog.is_some());
        flags2.set(ProgramFlags2::FLAT_SHADING, material.flat_shading);
        flags2.set(ProgramFlags2::LOGARITHMIC_DEPTH, inputs.logarithmic_depth);
        flags2.set(ProgramFlags2::REVERSED_DEPTH, inputs.reversed_depth);
        flags2.set(ProgramFlags2::SKINNING, inputs.skinning);
        flags2.set(ProgramFlags2::MORPH_TARGETS, morph_position_targets > 0);
        flags2.set(
            ProgramFlags2::MORPH_NORMALS,
            geometry.morph_attributes.contains_key("normal"),
        );
        flags2.set(
            ProgramFlags2::MORPH_COLORS,
            geometry.morph_attributes.contains_key("color"),
        );
        flags2.set(
            ProgramFlags2::PREMULTIPLIED_ALPHA,
            material.premultiplied_alpha,
        );
        flags2.set(ProgramFlags2::SHADOW_MAP_ENABLED, inputs.shadow_map_enabled);
        flags2.set(ProgramFlags2::DOUBLE_SIDED, material.side == Side::Double);
        flags2.set(ProgramFlags2::FLIP_SIDED, material.side == Side::Back);
        flags2.set(
            ProgramFlags2::USE_DEPTH_PACKING,
            material.depth_packing != DepthPacking::None,
        );
        flags2.set(ProgramFlags2::DITHERING, material.dithering);
        flags2.set(ProgramFlags2::TRANSMISSION, material.is_transmissive());
        flags2.set(ProgramFlags2::SHEEN, material.sheen > 0.0 || sheen_maps);
        flags2.set(ProgramFlags2::OPAQUE, inputs.opaque_pass);
        flags2.set(
            ProgramFlags2::POINTS_UVS,
            material.shading == ShadingModel::Points && parameters.map,
        );
        flags2.set(
            ProgramFlags2::DECODE_VIDEO_TEXTURE,
            material.map.as_ref().is_some_and(|m| m.borrow().is_video),
        );
        flags2.set(
            ProgramFlags2::DECODE_VIDEO_TEXTURE_EMISSIVE,
            material
                .emissive_map
                .as_ref()
                .is_some_and(|m| m.borrow().is_video),
        );
        flags2.set(ProgramFlags2::ALPHA_TO_COVERAGE, material.alpha_to_coverage);

        if let Some(fog) = inputs.fog {
            parameters.fog_exp2 = matches!(fog, Fog::Exp2 { .. });
        }

        parameters.flags1 = flags1;
        parameters.flags2 = flags2;
        parameters
    }

    // ── Cache key ────────────────────────────────────────────────────────────

    /// Serialises `parameters` into the deterministic program cache key.
    /// Field order is part of the ABI; changing it is a breaking change.
    #[must_use]
    pub fn cache_key(parameters: &Parameters) -> String {
        let mut fields: Vec<String> = Vec::with_capacity(48);

        match (parameters.custom_vertex_id, parameters.custom_fragment_id) {
            (Some(vertex), Some(fragment)) => fields.push(format!("custom{vertex}:{fragment}")),
            _ => fields.push(parameters.shader_tag.clone()),
        }
        for (name, value) in &parameters.defines {
            fields.push(format!("{name}={value}"));
        }
        fields.push(parameters.precision.to_string());
        fields.push(format!("{:?}", parameters.output_color_space));
        for (slot, channel) in parameters.uv_channels.iter().enumerate() {
            match channel {
                Some(channel) => fields.push(format!("{}:{channel}", MAP_SLOTS[slot])),
                None => fields.push("-".to_string()),
            }
        }
        fields.push(format!("{:?}", parameters.combine));
        fields.push(format!("{}", u8::from(parameters.fog_exp2)));
        fields.push(format!("{}", u8::from(parameters.size_attenuation)));
        fields.push(format!("{}", parameters.morph_targets_count));
        fields.push(format!(
            "{}:{}:{}:{}:{}:{}",
            parameters.num_dir_lights,
            parameters.num_point_lights,
            parameters.num_spot_lights,
            parameters.num_spot_maps,
            parameters.num_rect_area_lights,
            parameters.num_hemi_lights
        ));
        fields.push(format!(
            "{}:{}:{}",
            parameters.num_dir_shadows, parameters.num_point_shadows, parameters.num_spot_shadows
        ));
        fields.push(format!("{:?}", parameters.shadow_map_type));
        fields.push(format!("{:?}", parameters.tone_mapping));
        fields.push(format!(
            "{}:{}",
            parameters.num_clipping_planes, parameters.num_clip_intersection
        ));
        fields.push(format!("{:?}", parameters.depth_packing));
        fields.push(parameters.flags1.bits().to_string());
        fields.push(parameters.flags2.bits().to_string());
        fields.push(parameters.custom_cache_key.clone());

        fields.join(",")
    }

    // ── Acquire / release ────────────────────────────────────────────────────

    /// Returns the program for `key`, linking a new one on miss.
    pub fn acquire(
        &mut self,
        context: &impl GlContext,
        material: &Material,
        parameters: &Parameters,
        key: &str,
    ) -> Rc<GlProgram> {
        if let Some(program) = self.programs.iter().find(|p| p.cache_key == key) {
            program.used_times.set(program.used_times.get() + 1);
            return Rc::clone(program);
        }

        let program = Rc::new(self.link(context, material, parameters, key));
        self.programs.push(Rc::clone(&program));
        program
    }

    /// Drops one reference; destroys the GL program when unreferenced.
    pub fn release(&mut self, context: &impl GlContext, program: &Rc<GlProgram>) {
        let uses = program.used_times.get();
        debug_assert!(uses > 0);
        program.used_times.set(uses - 1);
        if uses == 1 {
            if let Some(index) = self.programs.iter().position(|p| p.id == program.id) {
                let removed = self.programs.swap_remove(index);
                context.delete_program(removed.handle);
            }
        }
    }

    fn link(
        &mut self,
        context: &impl GlContext,
        material: &Material,
        parameters: &Parameters,
        key: &str,
    ) -> GlProgram {
        let (vertex_source, fragment_source) = match &material.custom_shader {
            Some(custom) => (custom.vertex.clone(), custom.fragment.clone()),
            None => (
                shader_gen::vertex_shader(parameters),
                shader_gen::fragment_shader(parameters),
            ),
        };

        let vertex = context.create_shader(gl::VERTEX_SHADER);
        context.shader_source(vertex, &vertex_source);
        context.compile_shader(vertex);
        let fragment = context.create_shader(gl::FRAGMENT_SHADER);
        context.shader_source(fragment, &fragment_source);
        context.compile_shader(fragment);

        let handle = context.create_program();
        context.attach_shader(handle, vertex);
        context.attach_shader(handle, fragment);
        context.link_program(handle);

        let link_ok = context.program_link_status(handle);
        if !link_ok {
            let log = format!(
                "program link failed: {}\nvertex: {}\nfragment: {}",
                context.program_info_log(handle),
                context.shader_info_log(vertex),
                context.shader_info_log(fragment),
            );
            log::error!("{log}");
            if let Some(hook) = &self.on_shader_error {
                hook(&log);
            }
            // the broken program stays cached so it is not re-linked per frame
        }

        context.delete_shader(vertex);
        context.delete_shader(fragment);

        let mut attributes = FxHashMap::default();
        for info in context.active_attributes(handle) {
            if let Some(location) = context.get_attrib_location(handle, &info.name) {
                attributes.insert(info.name, location);
            }
        }
        let mut uniforms = FxHashMap::default();
        for info in context.active_uniforms(handle) {
            if let Some(location) = context.get_uniform_location(handle, &info.name) {
                uniforms.insert(info.name, location);
            }
        }

        let id = self.next_program_id;
        self.next_program_id += 1;
        GlProgram {
            id,
            cache_key: key.to_string(),
            handle,
            used_times: Cell::new(1),
            link_ok,
            attributes,
            uniforms,
        }
    }

    /// Destroys every program (context loss / renderer disposal).
    pub fn dispose_all(&mut self, context: &impl GlContext) {
        for program in self.programs.drain(..) {
            context.delete_program(program.handle);
        }
        self.shader_source_ids.clear();
        self.material_shaders.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_deterministic() {
        let parameters = Parameters::default();
        assert_eq!(
            ProgramCache::cache_key(&parameters),
            ProgramCache::cache_key(&parameters)
        );
    }

    #[test]
    fn flag_bits_change_the_key() {
        let a = Parameters::default();
        let mut b = Parameters::default();
        b.flags2 |= ProgramFlags2::SKINNING;
        assert_ne!(ProgramCache::cache_key(&a), ProgramCache::cache_key(&b));
    }

    #[test]
    fn shader_source_ids_are_stable_per_source() {
        let mut cache = ProgramCache::new();
        let a = cache.shader_source_id("void main() {}");
        let b = cache.shader_source_id("void main() { discard; }");
        let a_again = cache.shader_source_id("void main() {}");
        assert_eq!(a, a_again);
        assert_ne!(a, b);
    }

    #[test]
    fn shader_source_ids_are_reclaimed_with_their_materials() {
        let mut cache = ProgramCache::new();
        let vertex = cache.shader_source_id("vs");
        let fragment = cache.shader_source_id("fs");
        cache.register_material_shaders(7, vertex, fragment);
        cache.register_material_shaders(8, vertex, fragment);
        assert_eq!(cache.shader_source_count(), 2);

        cache.release_material_shaders(7);
        assert_eq!(cache.shader_source_count(), 2, "still used by material 8");
        cache.release_material_shaders(8);
        assert_eq!(cache.shader_source_count(), 0);

        // a re-registered source gets a fresh id
        let vertex_again = cache.shader_source_id("vs");
        assert_ne!(vertex, vertex_again);
    }

    #[test]
    fn swapping_one_stage_releases_only_the_old_source() {
        let mut cache = ProgramCache::new();
        let vertex = cache.shader_source_id("vs");
        let fragment = cache.shader_source_id("fs");
        cache.register_material_shaders(1, vertex, fragment);

        let fragment2 = cache.shader_source_id("fs2");
        cache.register_material_shaders(1, vertex, fragment2);
        assert_eq!(cache.shader_source_count(), 2);

        // the shared vertex source kept its id across the swap
        assert_eq!(cache.shader_source_id("vs"), vertex);
    }
}
