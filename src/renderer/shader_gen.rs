//! GLSL assembly.
//!
//! Programs are assembled from a defines prologue derived from the parameter
//! record plus shared vertex/fragment templates specialised per shader
//! family. The output is deterministic: identical parameters produce byte-
//! identical sources, which the program cache key relies on.

use std::fmt::Write;

use crate::renderer::programs::Parameters;

fn define_flag(out: &mut String, enabled: bool, name: &str) {
    if enabled {
        let _ = writeln!(out, "#define {name}");
    }
}

/// Shared `#version` + precision + defines prologue.
fn prologue(parameters: &Parameters, stage_defines: &str) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str("#version 300 es\n");
    let _ = writeln!(out, "precision {} float;", parameters.precision);
    let _ = writeln!(out, "precision {} int;", parameters.precision);
    let _ = writeln!(out, "#define SHADER_FAMILY_{}", parameters.shader_tag.to_uppercase());

    for (name, value) in &parameters.defines {
        let _ = writeln!(out, "#define {name} {value}");
    }

    define_flag(&mut out, parameters.map, "USE_MAP");
    define_flag(&mut out, parameters.alpha_map, "USE_ALPHAMAP");
    define_flag(&mut out, parameters.normal_map, "USE_NORMALMAP");
    define_flag(&mut out, parameters.normal_map_object_space(), "OBJECTSPACE_NORMALMAP");
    define_flag(&mut out, parameters.normal_map_tangent_space(), "TANGENTSPACE_NORMALMAP");
    define_flag(&mut out, parameters.bump_map, "USE_BUMPMAP");
    define_flag(&mut out, parameters.displacement_map, "USE_DISPLACEMENTMAP");
    define_flag(&mut out, parameters.roughness_map, "USE_ROUGHNESSMAP");
    define_flag(&mut out, parameters.metalness_map, "USE_METALNESSMAP");
    define_flag(&mut out, parameters.emissive_map, "USE_EMISSIVEMAP");
    define_flag(&mut out, parameters.ao_map, "USE_AOMAP");
    define_flag(&mut out, parameters.light_map, "USE_LIGHTMAP");
    define_flag(&mut out, parameters.env_map(), "USE_ENVMAP");
    define_flag(&mut out, parameters.matcap(), "USE_MATCAP");
    define_flag(&mut out, parameters.gradient_map(), "USE_GRADIENTMAP");
    define_flag(&mut out, parameters.specular_map, "USE_SPECULARMAP");
    define_flag(&mut out, parameters.clearcoat(), "USE_CLEARCOAT");
    define_flag(&mut out, parameters.sheen(), "USE_SHEEN");
    define_flag(&mut out, parameters.iridescence(), "USE_IRIDESCENCE");
    define_flag(&mut out, parameters.anisotropy_enabled(), "USE_ANISOTROPY");
    define_flag(&mut out, parameters.transmission(), "USE_TRANSMISSION");
    define_flag(&mut out, parameters.dispersion(), "USE_DISPERSION");
    define_flag(&mut out, parameters.vertex_colors(), "USE_COLOR");
    define_flag(&mut out, parameters.vertex_alphas(), "USE_COLOR_ALPHA");
    define_flag(&mut out, parameters.vertex_uv1s(), "USE_UV1");
    define_flag(&mut out, parameters.vertex_uv2s(), "USE_UV2");
    define_flag(&mut out, parameters.vertex_uv3s(), "USE_UV3");
    define_flag(&mut out, parameters.vertex_tangents(), "USE_TANGENT");
    define_flag(&mut out, parameters.instancing(), "USE_INSTANCING");
    define_flag(&mut out, parameters.instancing_color(), "USE_INSTANCING_COLOR");
    define_flag(&mut out, parameters.instancing_morph(), "USE_INSTANCING_MORPH");
    define_flag(&mut out, parameters.skinning(), "USE_SKINNING");
    define_flag(&mut out, parameters.morph_targets_count > 0, "USE_MORPHTARGETS");
    define_flag(&mut out, parameters.morph_normals(), "USE_MORPHNORMALS");
    define_flag(&mut out, parameters.morph_colors(), "USE_MORPHCOLORS");
    define_flag(&mut out, parameters.flat_shading(), "FLAT_SHADED");
    define_flag(&mut out, parameters.double_sided(), "DOUBLE_SIDED");
    define_flag(&mut out, parameters.flip_sided(), "FLIP_SIDED");
    define_flag(&mut out, parameters.use_fog(), "USE_FOG");
    define_flag(&mut out, parameters.fog_exp2, "FOG_EXP2");
    define_flag(&mut out, parameters.alpha_test(), "USE_ALPHATEST");
    define_flag(&mut out, parameters.alpha_hash(), "USE_ALPHAHASH");
    define_flag(&mut out, parameters.premultiplied_alpha(), "PREMULTIPLIED_ALPHA");
    define_flag(&mut out, parameters.dithering(), "DITHERING");
    define_flag(&mut out, parameters.shadow_map_enabled(), "USE_SHADOWMAP");
    define_flag(&mut out, parameters.use_depth_packing(), "DEPTH_PACKING");
    define_flag(&mut out, parameters.logarithmic_depth(), "USE_LOGDEPTHBUF");
    define_flag(&mut out, parameters.reversed_depth(), "USE_REVERSEDDEPTHBUF");
    define_flag(&mut out, parameters.size_attenuation, "USE_SIZEATTENUATION");
    define_flag(&mut out, parameters.points_uvs(), "USE_POINTS_UV");
    define_flag(&mut out, parameters.decode_video_texture(), "DECODE_VIDEO_TEXTURE");

    let _ = writeln!(out, "#define NUM_DIR_LIGHTS {}", parameters.num_dir_lights);
    let _ = writeln!(out, "#define NUM_POINT_LIGHTS {}", parameters.num_point_lights);
    let _ = writeln!(out, "#define NUM_SPOT_LIGHTS {}", parameters.num_spot_lights);
    let _ = writeln!(out, "#define NUM_SPOT_LIGHT_MAPS {}", parameters.num_spot_maps);
    let _ = writeln!(out, "#define NUM_RECT_AREA_LIGHTS {}", parameters.num_rect_area_lights);
    let _ = writeln!(out, "#define NUM_HEMI_LIGHTS {}", parameters.num_hemi_lights);
    let _ = writeln!(out, "#define NUM_DIR_LIGHT_SHADOWS {}", parameters.num_dir_shadows);
    let _ = writeln!(out, "#define NUM_POINT_LIGHT_SHADOWS {}", parameters.num_point_shadows);
    let _ = writeln!(out, "#define NUM_SPOT_LIGHT_SHADOWS {}", parameters.num_spot_shadows);
    let _ = writeln!(out, "#define NUM_CLIPPING_PLANES {}", parameters.num_clipping_planes);
    let _ = writeln!(out, "#define UNION_CLIPPING_PLANES {}",
        parameters.num_clipping_planes - parameters.num_clip_intersection);
    let _ = writeln!(out, "#define MORPHTARGETS_COUNT {}", parameters.morph_targets_count);

    out.push_str(stage_defines);
    out
}

/// Vertex shader for `parameters`.
#[must_use]
pub fn vertex_shader(parameters: &Parameters) -> String {
    let mut out = prologue(parameters, "#define VERTEX_STAGE\n");

    out.push_str(
        "\
in vec3 position;
in vec3 normal;
in vec2 uv;
#ifdef USE_UV1
in vec2 uv1;
#endif
#ifdef USE_UV2
in vec2 uv2;
#endif
#ifdef USE_UV3
in vec2 uv3;
#endif
#ifdef USE_COLOR
in vec4 color;
#endif
#ifdef USE_TANGENT
in vec4 tangent;
#endif
#ifdef USE_INSTANCING
in mat4 instanceMatrix;
#endif
#ifdef USE_INSTANCING_COLOR
in vec3 instanceColor;
#endif
#ifdef USE_SKINNING
in vec4 skinIndex;
in vec4 skinWeight;
#endif
#ifdef USE_MORPHTARGETS
in vec3 morphTarget0;
in vec3 morphTarget1;
in vec3 morphTarget2;
in vec3 morphTarget3;
#endif
uniform mat4 projectionMatrix;
uniform mat4 viewMatrix;
uniform mat4 modelMatrix;
uniform mat4 modelViewMatrix;
uniform mat3 normalMatrix;
uniform vec3 cameraPosition;
uniform bool isOrthographic;
#ifdef USE_SKINNING
uniform sampler2D boneTexture;
#endif
#ifdef USE_MORPHTARGETS
uniform float morphTargetInfluences[MORPHTARGETS_COUNT];
#endif
#ifdef USE_DISPLACEMENTMAP
uniform sampler2D displacementMap;
uniform float displacementScale;
uniform float displacementBias;
#endif
out vec3 vViewPosition;
out vec3 vNormal;
out vec2 vUv;
#ifdef USE_COLOR
out vec4 vColor;
#endif
#if NUM_CLIPPING_PLANES > 0
out vec3 vClipPosition;
#endif
#if NUM_DIR_LIGHT_SHADOWS > 0
uniform mat4 directionalShadowMatrix[NUM_DIR_LIGHT_SHADOWS];
out vec4 vDirectionalShadowCoord[NUM_DIR_LIGHT_SHADOWS];
#endif
",
    );

    out.push_str(
        "\
void main() {
    vec3 transformed = position;
    vec3 objectNormal = normal;
#ifdef USE_MORPHTARGETS
    transformed += morphTarget0 * morphTargetInfluences[0];
#endif
#ifdef USE_DISPLACEMENTMAP
    transformed += normalize(objectNormal) * (texture(displacementMap, uv).x * displacementScale + displacementBias);
#endif
    mat4 instancedModelView = modelViewMatrix;
#ifdef USE_INSTANCING
    instancedModelView = modelViewMatrix * instanceMatrix;
#endif
    vec4 mvPosition = instancedModelView * vec4(transformed, 1.0);
    vViewPosition = -mvPosition.xyz;
    vNormal = normalMatrix * objectNormal;
    vUv = uv;
#ifdef USE_COLOR
    vColor = color;
#endif
#if NUM_CLIPPING_PLANES > 0
    vClipPosition = -mvPosition.xyz;
#endif
#if NUM_DIR_LIGHT_SHADOWS > 0
    for (int i = 0; i < NUM_DIR_LIGHT_SHADOWS; i++) {
        vDirectionalShadowCoord[i] = directionalShadowMatrix[i] * modelMatrix * vec4(transformed, 1.0);
    }
#endif
    gl_Position = projectionMatrix * mvPosition;
#ifdef SHADER_FAMILY_POINTS
    gl_PointSize = 1.0;
#ifdef USE_SIZEATTENUATION
    gl_PointSize *= 100.0 / -mvPosition.z;
#endif
#endif
}
",
    );
    out
}

/// Fragment shader for `parameters`.
#[must_use]
pub fn fragment_shader(parameters: &Parameters) -> String {
    let mut out = prologue(parameters, "#define FRAGMENT_STAGE\n");

    out.push_str(
        "\
uniform vec3 diffuse;
uniform float opacity;
uniform vec3 emissive;
uniform float roughness;
uniform float metalness;
uniform float toneMappingExposure;
uniform bool receiveShadow;
#ifdef USE_MAP
uniform sampler2D map;
#endif
#ifdef USE_ALPHAMAP
uniform sampler2D alphaMap;
#endif
#ifdef USE_NORMALMAP
uniform sampler2D normalMap;
uniform vec2 normalScale;
#endif
#ifdef USE_ROUGHNESSMAP
uniform sampler2D roughnessMap;
#endif
#ifdef USE_METALNESSMAP
uniform sampler2D metalnessMap;
#endif
#ifdef USE_EMISSIVEMAP
uniform sampler2D emissiveMap;
#endif
#ifdef USE_AOMAP
uniform sampler2D aoMap;
uniform float aoMapIntensity;
#endif
#ifdef USE_LIGHTMAP
uniform sampler2D lightMap;
uniform float lightMapIntensity;
#endif
#ifdef USE_ENVMAP
uniform samplerCube envMap;
uniform float envMapIntensity;
#endif
#ifdef USE_MATCAP
uniform sampler2D matcap;
#endif
#ifdef USE_GRADIENTMAP
uniform sampler2D gradientMap;
#endif
#ifdef USE_ALPHATEST
uniform float alphaTest;
#endif
#ifdef USE_TRANSMISSION
uniform float transmission;
uniform float thickness;
uniform float ior;
uniform sampler2D transmissionSamplerMap;
uniform vec2 transmissionSamplerSize;
#endif
#ifdef USE_FOG
uniform vec3 fogColor;
#ifdef FOG_EXP2
uniform float fogDensity;
#else
uniform float fogNear;
uniform float fogFar;
#endif
#endif
#if NUM_CLIPPING_PLANES > 0
uniform vec4 clippingPlanes[NUM_CLIPPING_PLANES];
in vec3 vClipPosition;
#endif
uniform vec3 ambientLightColor;
uniform vec3 lightProbe[9];
#if NUM_DIR_LIGHTS > 0
struct DirectionalLight { vec3 direction; vec3 color; };
uniform DirectionalLight directionalLights[NUM_DIR_LIGHTS];
#endif
#if NUM_POINT_LIGHTS > 0
struct PointLight { vec3 position; vec3 color; float distance; float decay; };
uniform PointLight pointLights[NUM_POINT_LIGHTS];
#endif
#if NUM_SPOT_LIGHTS > 0
struct SpotLight { vec3 position; vec3 direction; vec3 color; float distance; float coneCos; float penumbraCos; float decay; };
uniform SpotLight spotLights[NUM_SPOT_LIGHTS];
#endif
#if NUM_HEMI_LIGHTS > 0
struct HemisphereLight { vec3 direction; vec3 skyColor; vec3 groundColor; };
uniform HemisphereLight hemisphereLights[NUM_HEMI_LIGHTS];
#endif
#if NUM_DIR_LIGHT_SHADOWS > 0
uniform sampler2D directionalShadowMap[NUM_DIR_LIGHT_SHADOWS];
in vec4 vDirectionalShadowCoord[NUM_DIR_LIGHT_SHADOWS];
#endif
in vec3 vViewPosition;
in vec3 vNormal;
in vec2 vUv;
#ifdef USE_COLOR
in vec4 vColor;
#endif
layout(location = 0) out vec4 fragColor;
",
    );

    out.push_str(
        "\
void main() {
#if NUM_CLIPPING_PLANES > 0
    for (int i = 0; i < UNION_CLIPPING_PLANES; i++) {
        vec4 plane = clippingPlanes[i];
        if (dot(vClipPosition, plane.xyz) > plane.w) discard;
    }
#endif
    vec4 diffuseColor = vec4(diffuse, opacity);
#ifdef USE_MAP
    diffuseColor *= texture(map, vUv);
#endif
#ifdef USE_COLOR
    diffuseColor *= vColor;
#endif
#ifdef USE_ALPHAMAP
    diffuseColor.a *= texture(alphaMap, vUv).x;
#endif
#ifdef USE_ALPHATEST
    if (diffuseColor.a < alphaTest) discard;
#endif
    vec3 outgoingLight = diffuseColor.rgb;
#if NUM_DIR_LIGHTS > 0
    vec3 normal = normalize(vNormal);
    vec3 accumulated = ambientLightColor;
    for (int i = 0; i < NUM_DIR_LIGHTS; i++) {
        accumulated += directionalLights[i].color * max(dot(normal, directionalLights[i].direction), 0.0);
    }
    outgoingLight = diffuseColor.rgb * accumulated;
#endif
#ifdef USE_EMISSIVEMAP
    outgoingLight += texture(emissiveMap, vUv).rgb * emissive;
#else
    outgoingLight += emissive;
#endif
#ifdef USE_FOG
    float fogDepth = length(vViewPosition);
#ifdef FOG_EXP2
    float fogFactor = 1.0 - exp(-fogDensity * fogDensity * fogDepth * fogDepth);
#else
    float fogFactor = smoothstep(fogNear, fogFar, fogDepth);
#endif
    outgoingLight = mix(outgoingLight, fogColor, fogFactor);
#endif
    fragColor = vec4(outgoingLight * toneMappingExposure, diffuseColor.a);
#ifdef PREMULTIPLIED_ALPHA
    fragColor.rgb *= fragColor.a;
#endif
#ifdef DEPTH_PACKING
    fragColor = vec4(vec3(gl_FragCoord.z), 1.0);
#endif
}
",
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::programs::Parameters;

    #[test]
    fn generation_is_deterministic() {
        let parameters = Parameters::default();
        assert_eq!(vertex_shader(&parameters), vertex_shader(&parameters));
        assert_eq!(fragment_shader(&parameters), fragment_shader(&parameters));
    }

    #[test]
    fn map_define_toggles_sampler() {
        let mut parameters = Parameters::default();
        assert!(!fragment_shader(&parameters).contains("#define USE_MAP\n"));
        parameters.map = true;
        assert!(fragment_shader(&parameters).contains("#define USE_MAP\n"));
    }
}
