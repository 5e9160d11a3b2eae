//! Per-frame light uniform state.
//!
//! `setup` runs once per frame with the collected lights: it sorts them so
//! shadow-casting map-textured lights come first (fixed uniform array
//! layout), folds ambient terms, accumulates light-probe SH coefficients,
//! and compares a shape hash of per-type counts — `version` only advances
//! when the shape changes, which is what the program fast path keys on.
//!
//! `setup_view` runs once per camera and rewrites positions/directions into
//! view space without touching `version`.

use glam::{Affine3A, Mat4, Vec3};
use rustc_hash::FxHashMap;

use crate::gl::TextureHandle;
use crate::scene::light::{LightKind, LightShadow};

/// Per-type light population; doubles as the shape hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LightCounts {
    pub directional: usize,
    pub point: usize,
    pub spot: usize,
    pub spot_maps: usize,
    pub rect_area: usize,
    pub hemi: usize,
    pub directional_shadows: usize,
    pub point_shadows: usize,
    pub spot_shadows: usize,
    pub probes: usize,
}

/// One light as collected during scene traversal.
#[derive(Debug, Clone)]
pub struct LightRecord {
    pub id: u64,
    pub color: Vec3,
    pub intensity: f32,
    pub kind: LightKind,
    pub world: Affine3A,
    pub cast_shadow: bool,
}

impl LightRecord {
    fn has_map(&self) -> bool {
        matches!(&self.kind, LightKind::Spot { map: Some(_), .. })
    }

    fn casts_shadow(&self) -> bool {
        self.cast_shadow
            && matches!(
                self.kind,
                LightKind::Directional { .. } | LightKind::Spot { .. } | LightKind::Point { .. }
            )
    }

    /// Sort bucket: shadow+map < map < shadow < plain.
    fn order(&self) -> u8 {
        match (self.casts_shadow(), self.has_map()) {
            (true, true) => 0,
            (false, true) => 1,
            (true, false) => 2,
            (false, false) => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DirectionalUniforms {
    pub direction: Vec3,
    pub color: Vec3,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PointUniforms {
    pub position: Vec3,
    pub color: Vec3,
    pub distance: f32,
    pub decay: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SpotUniforms {
    pub position: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
    pub distance: f32,
    pub cone_cos: f32,
    pub penumbra_cos: f32,
    pub decay: f32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HemisphereUniforms {
    pub direction: Vec3,
    pub sky_color: Vec3,
    pub ground_color: Vec3,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RectAreaUniforms {
    pub position: Vec3,
    pub color: Vec3,
    pub half_width: Vec3,
    pub half_height: Vec3,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShadowUniforms {
    pub bias: f32,
    pub normal_bias: f32,
    pub radius: f32,
    pub map_size: u32,
}

impl ShadowUniforms {
    fn from_config(shadow: &LightShadow) -> Self {
        Self {
            bias: shadow.bias,
            normal_bias: shadow.normal_bias,
            radius: shadow.radius,
            map_size: shadow.map_size,
        }
    }
}

/// Aggregated uniform state for every light in the frame.
#[derive(Default)]
pub struct LightsState {
    version: u64,
    counts: LightCounts,
    records: Vec<LightRecord>,

    pub ambient: Vec3,
    /// Nine spherical-harmonic RGB coefficients.
    pub probe: [Vec3; 9],

    pub directional: Vec<DirectionalUniforms>,
    pub directional_shadow: Vec<ShadowUniforms>,
    pub directional_shadow_map: Vec<Option<TextureHandle>>,
    pub directional_shadow_matrix: Vec<Mat4>,

    pub point: Vec<PointUniforms>,
    pub point_shadow: Vec<ShadowUniforms>,
    pub point_shadow_map: Vec<Option<TextureHandle>>,

    pub spot: Vec<SpotUniforms>,
    pub spot_shadow: Vec<ShadowUniforms>,
    pub spot_shadow_map: Vec<Option<TextureHandle>>,
    pub spot_shadow_matrix: Vec<Mat4>,

    pub hemi: Vec<HemisphereUniforms>,
    pub rect_area: Vec<RectAreaUniforms>,

    /// Per-light color cache keyed by light id, reused across frames.
    color_cache: FxHashMap<u64, Vec3>,
}

impl LightsState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shape version; bumps only when per-type counts change.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn counts(&self) -> &LightCounts {
        &self.counts
    }

    /// Accumulates view-independent state from the frame's lights.
    pub fn setup(&mut self, mut lights: Vec<LightRecord>) {
        lights.sort_by_key(LightRecord::order);

        self.ambient = Vec3::ZERO;
        self.probe = [Vec3::ZERO; 9];

        let mut counts = LightCounts::default();
        for light in &lights {
            let scaled = *self
                .color_cache
                .entry(light.id)
                .and_modify(|c| *c = light.color * light.intensity)
                .or_insert(light.color * light.intensity);

            match &light.kind {
                LightKind::Ambient => self.ambient += scaled,
                LightKind::Probe { coefficients } => {
                    for (slot, coefficient) in coefficients.iter().enumerate() {
                        self.probe[slot] += *coefficient * light.intensity;
                    }
                    counts.probes += 1;
                }
                LightKind::Directional { .. } => {
                    counts.directional += 1;
                    if light.casts_shadow() {
                        counts.directional_shadows += 1;
                    }
                }
                LightKind::Point { .. } => {
                    counts.point += 1;
                    if light.casts_shadow() {
                        counts.point_shadows += 1;
                    }
                }
                LightKind::Spot { map, .. } => {
                    counts.spot += 1;
                    if map.is_some() {
                        counts.spot_maps += 1;
                    }
                    if light.casts_shadow() {
                        counts.spot_shadows += 1;
                    }
                }
                LightKind::Hemisphere { .. } => counts.hemi += 1,
                LightKind::RectArea { .. } => counts.rect_area += 1,
            }
        }

        if counts != self.counts {
            self.directional
                .resize(counts.directional, DirectionalUniforms::default());
            self.directional_shadow
                .resize(counts.directional_shadows, ShadowUniforms::default());
            self.directional_shadow_map
                .resize(counts.directional_shadows, None);
            self.directional_shadow_matrix
                .resize(counts.directional_shadows, Mat4::IDENTITY);
            self.point.resize(counts.point, PointUniforms::default());
            self.point_shadow
                .resize(counts.point_shadows, ShadowUniforms::default());
            self.point_shadow_map.resize(counts.point_shadows, None);
            self.spot.resize(counts.spot, SpotUniforms::default());
            self.spot_shadow
                .resize(counts.spot_shadows, ShadowUniforms::default());
            self.spot_shadow_map.resize(counts.spot_shadows, None);
            self.spot_shadow_matrix
                .resize(counts.spot_shadows, Mat4::IDENTITY);
            self.hemi.resize(counts.hemi, HemisphereUniforms::default());
            self.rect_area
                .resize(counts.rect_area, RectAreaUniforms::default());

            self.counts = counts;
            self.version = self.version.wrapping_add(1);
        }

        // shadow parameters are view-independent
        let mut dir_shadow = 0;
        let mut point_shadow = 0;
        let mut spot_shadow = 0;
        for light in &lights {
            if !light.casts_shadow() {
                continue;
            }
            match &light.kind {
                LightKind::Directional { shadow, .. } => {
                    self.directional_shadow[dir_shadow] = ShadowUniforms::from_config(shadow);
                    dir_shadow += 1;
                }
                LightKind::Point { shadow, .. } => {
                    self.point_shadow[point_shadow] = ShadowUniforms::from_config(shadow);
                    point_shadow += 1;
                }
                LightKind::Spot { shadow, .. } => {
                    self.spot_shadow[spot_shadow] = ShadowUniforms::from_config(shadow);
                    spot_shadow += 1;
                }
                _ => {}
            }
        }

        self.records = lights;
    }

    /// Rewrites positions and directions into the view space of `view`
    /// (the camera's inverse world matrix). Called once per camera.
    pub fn setup_view(&mut self, view: &Mat4) {
        let mut directional = 0;
        let mut point = 0;
        let mut spot = 0;
        let mut hemi = 0;
        let mut rect_area = 0;

        for light in &self.records {
            let world_position = Vec3::from(light.world.translation);
            let view_position = view.transform_point3(world_position);
            let color = self
                .color_cache
                .get(&light.id)
                .copied()
                .unwrap_or(light.color * light.intensity);

            match &light.kind {
                LightKind::Directional { target, .. } => {
                    let direction = (world_position - *target).normalize_or_zero();
                    self.directional[directional] = DirectionalUniforms {
                        direction: view.transform_vector3(direction).normalize_or_zero(),
                        color,
                    };
                    directional += 1;
                }
                LightKind::Point { distance, decay, .. } => {
                    self.point[point] = PointUniforms {
                        position: view_position,
                        color,
                        distance: *distance,
                        decay: *decay,
                    };
                    point += 1;
                }
                LightKind::Spot {
                    target,
                    distance,
                    angle,
                    penumbra,
                    decay,
                    ..
                } => {
                    let direction = (world_position - *target).normalize_or_zero();
                    self.spot[spot] = SpotUniforms {
                        position: view_position,
                        direction: view.transform_vector3(direction).normalize_or_zero(),
                        color,
                        distance: *distance,
                        cone_cos: angle.cos(),
                        penumbra_cos: (angle * (1.0 - penumbra)).cos(),
                        decay: *decay,
                    };
                    spot += 1;
                }
                LightKind::Hemisphere { ground_color } => {
                    let up = light.world.transform_vector3(Vec3::Y).normalize_or_zero();
                    self.hemi[hemi] = HemisphereUniforms {
                        direction: view.transform_vector3(up).normalize_or_zero(),
                        sky_color: color,
                        ground_color: *ground_color * light.intensity,
                    };
                    hemi += 1;
                }
                LightKind::RectArea { width, height } => {
                    let half_width = light.world.transform_vector3(Vec3::X * (*width * 0.5));
                    let half_height = light.world.transform_vector3(Vec3::Y * (*height * 0.5));
                    self.rect_area[rect_area] = RectAreaUniforms {
                        position: view_position,
                        color,
                        half_width: view.transform_vector3(half_width),
                        half_height: view.transform_vector3(half_height),
                    };
                    rect_area += 1;
                }
                LightKind::Ambient | LightKind::Probe { .. } => {}
            }
        }
    }

    /// Shadow-casting lights of this frame, in uniform array order.
    #[must_use]
    pub fn shadow_casters(&self) -> Vec<LightRecord> {
        self.records
            .iter()
            .filter(|l| l.casts_shadow())
            .cloned()
            .collect()
    }

    /// Drops cached per-light state for a disposed light.
    pub fn forget(&mut self, light_id: u64) {
        self.color_cache.remove(&light_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::version::IdAllocator;
    use crate::scene::light::Light;

    fn record(light: &Light) -> LightRecord {
        LightRecord {
            id: light.id(),
            color: light.color,
            intensity: light.intensity,
            kind: light.kind.clone(),
            world: Affine3A::IDENTITY,
            cast_shadow: light.cast_shadow,
        }
    }

    #[test]
    fn ambient_lights_fold_into_one_term() {
        let ids = IdAllocator::new();
        let mut state = LightsState::new();
        let a = Light::ambient(&ids, Vec3::new(0.5, 0.0, 0.0), 1.0);
        let b = Light::ambient(&ids, Vec3::new(0.0, 0.25, 0.0), 2.0);
        state.setup(vec![record(&a), record(&b)]);
        assert!((state.ambient - Vec3::new(0.5, 0.5, 0.0)).length() < 1e-6);
    }

    #[test]
    fn version_bumps_only_on_shape_change() {
        let ids = IdAllocator::new();
        let mut state = LightsState::new();
        let light = Light::directional(&ids, Vec3::ONE, 1.0);
        state.setup(vec![record(&light)]);
        let v1 = state.version();
        state.setup(vec![record(&light)]);
        assert_eq!(state.version(), v1);
        state.setup(vec![
            record(&light),
            record(&Light::point(&ids, Vec3::ONE, 1.0, 10.0)),
        ]);
        assert!(state.version() > v1);
    }

    #[test]
    fn shadow_casting_lights_sort_first() {
        let ids = IdAllocator::new();
        let mut state = LightsState::new();
        let plain = Light::directional(&ids, Vec3::ONE, 1.0);
        let mut caster = Light::directional(&ids, Vec3::ONE, 1.0);
        caster.cast_shadow = true;
        state.setup(vec![record(&plain), record(&caster)]);
        let casters = state.shadow_casters();
        assert_eq!(casters.len(), 1);
        assert_eq!(casters[0].id, caster.id());
        assert_eq!(state.counts().directional, 2);
        assert_eq!(state.counts().directional_shadows, 1);
    }

    #[test]
    fn view_transform_moves_point_light_position() {
        let ids = IdAllocator::new();
        let mut state = LightsState::new();
        let light = Light::point(&ids, Vec3::ONE, 1.0, 0.0);
        let mut rec = record(&light);
        rec.world = Affine3A::from_translation(Vec3::new(0.0, 0.0, -5.0));
        state.setup(vec![rec]);

        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0));
        state.setup_view(&view);
        assert!((state.point[0].position - Vec3::ZERO).length() < 1e-6);
    }
}
