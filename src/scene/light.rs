//! Light variants and shadow configuration.

use glam::Vec3;

use crate::resources::version::IdAllocator;

/// Shadow camera parameters. Directional lights use the orthographic
/// extents; spot and point lights build a perspective projection.
#[derive(Debug, Clone, Copy)]
pub struct ShadowCameraDesc {
    pub near: f32,
    pub far: f32,
    /// Half-extent of the orthographic shadow box (directional only).
    pub extent: f32,
}

impl Default for ShadowCameraDesc {
    fn default() -> Self {
        Self {
            near: 0.5,
            far: 500.0,
            extent: 5.0,
        }
    }
}

/// Per-light shadow configuration. The rendered depth map itself is owned
/// by the renderer's shadow side table, keyed by light id, so dropping a
/// light cannot leak a GPU target the caller never sees.
#[derive(Debug, Clone)]
pub struct LightShadow {
    pub bias: f32,
    pub normal_bias: f32,
    /// Blur radius for PCF / VSM filtering.
    pub radius: f32,
    pub map_size: u32,
    pub camera: ShadowCameraDesc,
}

impl Default for LightShadow {
    fn default() -> Self {
        Self {
            bias: 0.0,
            normal_bias: 0.0,
            radius: 1.0,
            map_size: 512,
            camera: ShadowCameraDesc::default(),
        }
    }
}

/// Variant data per light type.
#[derive(Debug, Clone)]
pub enum LightKind {
    Ambient,
    Directional {
        /// World-space point the light looks at.
        target: Vec3,
        shadow: LightShadow,
    },
    Spot {
        target: Vec3,
        distance: f32,
        /// Cone half-angle in radians.
        angle: f32,
        penumbra: f32,
        decay: f32,
        /// Projected gobo texture.
        map: Option<crate::resources::SharedTexture>,
        shadow: LightShadow,
    },
    Point {
        distance: f32,
        decay: f32,
        shadow: LightShadow,
    },
    Hemisphere {
        ground_color: Vec3,
    },
    RectArea {
        width: f32,
        height: f32,
    },
    /// Spherical-harmonic light probe (nine RGB coefficients).
    Probe {
        coefficients: [Vec3; 9],
    },
}

/// Color + intensity + variant; spatial placement comes from the owning node.
#[derive(Debug, Clone)]
pub struct Light {
    id: u64,
    pub color: Vec3,
    pub intensity: f32,
    pub kind: LightKind,
    pub cast_shadow: bool,
}

impl Light {
    #[must_use]
    pub fn new(ids: &IdAllocator, color: Vec3, intensity: f32, kind: LightKind) -> Self {
        Self {
            id: ids.allocate(),
            color,
            intensity,
            kind,
            cast_shadow: false,
        }
    }

    #[must_use]
    pub fn ambient(ids: &IdAllocator, color: Vec3, intensity: f32) -> Self {
        Self::new(ids, color, intensity, LightKind::Ambient)
    }

    #[must_use]
    pub fn directional(ids: &IdAllocator, color: Vec3, intensity: f32) -> Self {
        Self::new(
            ids,
            color,
            intensity,
            LightKind::Directional {
                target: Vec3::ZERO,
                shadow: LightShadow::default(),
            },
        )
    }

    #[must_use]
    pub fn point(ids: &IdAllocator, color: Vec3, intensity: f32, distance: f32) -> Self {
        Self::new(
            ids,
            color,
            intensity,
            LightKind::Point {
                distance,
                decay: 2.0,
                shadow: LightShadow::default(),
            },
        )
    }

    #[must_use]
    pub fn spot(
        ids: &IdAllocator,
        color: Vec3,
        intensity: f32,
        distance: f32,
        angle: f32,
        penumbra: f32,
    ) -> Self {
        Self::new(
            ids,
            color,
            intensity,
            LightKind::Spot {
                target: Vec3::ZERO,
                distance,
                angle,
                penumbra,
                decay: 2.0,
                map: None,
                shadow: LightShadow::default(),
            },
        )
    }

    #[must_use]
    pub fn hemisphere(ids: &IdAllocator, sky: Vec3, ground: Vec3, intensity: f32) -> Self {
        Self::new(ids, sky, intensity, LightKind::Hemisphere { ground_color: ground })
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Shadow configuration, when the variant carries one.
    #[must_use]
    pub fn shadow(&self) -> Option<&LightShadow> {
        match &self.kind {
            LightKind::Directional { shadow, .. }
            | LightKind::Spot { shadow, .. }
            | LightKind::Point { shadow, .. } => Some(shadow),
            _ => None,
        }
    }

    /// Whether this light contributes a shadow map this frame.
    #[must_use]
    pub fn casts_shadow(&self) -> bool {
        self.cast_shadow && self.shadow().is_some()
    }
}
