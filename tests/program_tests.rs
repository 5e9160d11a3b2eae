//! Program Cache Tests
//!
//! Tests for:
//! - Cache key determinism over repeated derivations
//! - Feature flags changing the key
//! - Reference counting through acquire/release
//! - Custom shader source id assignment

use glint::renderer::lights::LightCounts;
use glint::renderer::programs::{DerivationInputs, ProgramCache, ShadowMapType, ToneMapping};
use glint::resources::material::{Material, ShadingModel};
use glint::resources::texture::ColorSpace;
use glint::resources::{BufferAttribute, Geometry, IdAllocator, Texture};
use glint::RecordingContext;

use std::cell::RefCell;
use std::rc::Rc;

fn simple_geometry(ids: &IdAllocator) -> Geometry {
    let mut geometry = Geometry::new(ids);
    geometry.set_attribute(
        "position",
        BufferAttribute::from_f32(ids, vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0], 3),
    );
    geometry
}

fn inputs(counts: &LightCounts) -> DerivationInputs<'_> {
    DerivationInputs {
        lights: counts,
        shadow_map_enabled: false,
        shadow_map_type: ShadowMapType::Pcf,
        fog: None,
        output_color_space: ColorSpace::Srgb,
        tone_mapping: ToneMapping::None,
        num_clipping_planes: 0,
        num_clip_intersection: 0,
        reversed_depth: false,
        logarithmic_depth: false,
        supports_vertex_textures: true,
        instancing: false,
        instancing_color: false,
        instancing_morph: false,
        skinning: false,
        opaque_pass: true,
    }
}

#[test]
fn identical_inputs_produce_identical_keys() {
    let mut cache = ProgramCache::new();
    let ids = IdAllocator::new();
    let material = Material::new(&ids, ShadingModel::Standard);
    let geometry = simple_geometry(&ids);
    let counts = LightCounts {
        directional: 2,
        point: 1,
        ..LightCounts::default()
    };

    let a = cache.get_parameters(&material, &geometry, &inputs(&counts));
    let b = cache.get_parameters(&material, &geometry, &inputs(&counts));
    assert_eq!(ProgramCache::cache_key(&a), ProgramCache::cache_key(&b));
}

#[test]
fn light_counts_change_the_key() {
    let mut cache = ProgramCache::new();
    let ids = IdAllocator::new();
    let material = Material::new(&ids, ShadingModel::Standard);
    let geometry = simple_geometry(&ids);

    let few = LightCounts {
        directional: 1,
        ..LightCounts::default()
    };
    let many = LightCounts {
        directional: 3,
        ..LightCounts::default()
    };
    let a = cache.get_parameters(&material, &geometry, &inputs(&few));
    let b = cache.get_parameters(&material, &geometry, &inputs(&many));
    assert_ne!(ProgramCache::cache_key(&a), ProgramCache::cache_key(&b));
}

#[test]
fn map_uv_channel_enters_the_key() {
    let ids = IdAllocator::new();
    let mut cache = ProgramCache::new();
    let geometry = simple_geometry(&ids);
    let counts = LightCounts::default();

    let mut with_map = Material::new(&ids, ShadingModel::Standard);
    let texture = Texture::from_data(&ids, vec![0; 4], 1, 1);
    with_map.map = Some(Rc::new(RefCell::new(texture)));

    let plain_key = {
        let material = Material::new(&ids, ShadingModel::Standard);
        let p = cache.get_parameters(&material, &geometry, &inputs(&counts));
        ProgramCache::cache_key(&p)
    };
    let mapped = cache.get_parameters(&with_map, &geometry, &inputs(&counts));
    let mapped_key = ProgramCache::cache_key(&mapped);
    assert_ne!(plain_key, mapped_key);

    // moving the same map to UV channel 2 changes the key again and flags
    // the uv2 attribute requirement
    with_map.map.as_ref().unwrap().borrow_mut().channel = 2;
    let channel2 = cache.get_parameters(&with_map, &geometry, &inputs(&counts));
    assert_ne!(mapped_key, ProgramCache::cache_key(&channel2));
    assert!(channel2.vertex_uv2s());
    assert!(!mapped.vertex_uv2s());
}

#[test]
fn acquire_release_reference_counting() {
    let ctx = RecordingContext::new();
    let mut cache = ProgramCache::new();
    let ids = IdAllocator::new();
    let material = Material::new(&ids, ShadingModel::Standard);
    let geometry = simple_geometry(&ids);
    let counts = LightCounts::default();

    let parameters = cache.get_parameters(&material, &geometry, &inputs(&counts));
    let key = ProgramCache::cache_key(&parameters);

    let first = cache.acquire(&ctx, &material, &parameters, &key);
    let second = cache.acquire(&ctx, &material, &parameters, &key);
    // same key: one linked program, shared
    assert_eq!(first.id, second.id);
    assert_eq!(cache.len(), 1);
    assert_eq!(ctx.count_calls("linkProgram"), 1);

    cache.release(&ctx, &first);
    assert_eq!(cache.len(), 1, "still referenced once");
    assert_eq!(ctx.count_calls("deleteProgram"), 0);

    cache.release(&ctx, &second);
    assert_eq!(cache.len(), 0);
    assert_eq!(ctx.count_calls("deleteProgram"), 1);
}

#[test]
fn different_keys_link_different_programs() {
    let ctx = RecordingContext::new();
    let ids = IdAllocator::new();
    let mut cache = ProgramCache::new();
    let geometry = simple_geometry(&ids);
    let counts = LightCounts::default();

    let standard = Material::new(&ids, ShadingModel::Standard);
    let basic = Material::new(&ids, ShadingModel::Basic);

    let p1 = cache.get_parameters(&standard, &geometry, &inputs(&counts));
    let k1 = ProgramCache::cache_key(&p1);
    let p2 = cache.get_parameters(&basic, &geometry, &inputs(&counts));
    let k2 = ProgramCache::cache_key(&p2);
    assert_ne!(k1, k2);

    let a = cache.acquire(&ctx, &standard, &p1, &k1);
    let b = cache.acquire(&ctx, &basic, &p2, &k2);
    assert_ne!(a.id, b.id);
    assert_eq!(cache.len(), 2);
}

#[test]
fn linked_programs_expose_standard_attributes() {
    let ctx = RecordingContext::new();
    let mut cache = ProgramCache::new();
    let ids = IdAllocator::new();
    let material = Material::new(&ids, ShadingModel::Standard);
    let geometry = simple_geometry(&ids);
    let counts = LightCounts::default();

    let parameters = cache.get_parameters(&material, &geometry, &inputs(&counts));
    let key = ProgramCache::cache_key(&parameters);
    let program = cache.acquire(&ctx, &material, &parameters, &key);

    assert!(program.link_ok);
    assert!(program.attributes.contains_key("position"));
    assert!(program.attributes.contains_key("normal"));
    assert!(program.uniforms.contains_key("projectionMatrix"));
    assert!(program.uniforms.contains_key("modelViewMatrix"));
}

#[test]
fn failed_links_stay_cached() {
    let ctx = RecordingContext::new();
    ctx.fail_compile.set(true);
    let mut cache = ProgramCache::new();
    let ids = IdAllocator::new();
    let material = Material::new(&ids, ShadingModel::Basic);
    let geometry = simple_geometry(&ids);
    let counts = LightCounts::default();

    let parameters = cache.get_parameters(&material, &geometry, &inputs(&counts));
    let key = ProgramCache::cache_key(&parameters);
    let program = cache.acquire(&ctx, &material, &parameters, &key);
    assert!(!program.link_ok);

    // the broken program is cached, not re-linked every acquire
    let again = cache.acquire(&ctx, &material, &parameters, &key);
    assert_eq!(program.id, again.id);
    assert_eq!(ctx.count_calls("linkProgram"), 1);
}

#[test]
fn custom_shaders_get_stable_source_ids() {
    let ids = IdAllocator::new();
    let mut cache = ProgramCache::new();
    let geometry = simple_geometry(&ids);
    let counts = LightCounts::default();

    let a = Material::custom(&ids, "void main() {}", "void main() {}");
    let b = Material::custom(&ids, "void main() {}", "void main() { discard; }");

    let pa = cache.get_parameters(&a, &geometry, &inputs(&counts));
    let pb = cache.get_parameters(&b, &geometry, &inputs(&counts));
    let pa_again = cache.get_parameters(&a, &geometry, &inputs(&counts));

    assert_eq!(pa.custom_vertex_id, pa_again.custom_vertex_id);
    assert_eq!(pa.custom_vertex_id, pb.custom_vertex_id, "same vertex source");
    assert_ne!(pa.custom_fragment_id, pb.custom_fragment_id);
    assert_ne!(
        ProgramCache::cache_key(&pa),
        ProgramCache::cache_key(&pb)
    );
}
