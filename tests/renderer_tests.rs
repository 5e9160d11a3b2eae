//! End-to-End Renderer Tests
//!
//! Drives full frames over the recording backend and asserts the issued GL
//! call stream:
//! - S1: clear color + opaque front-to-back ordering
//! - S2: transparent back-to-front ordering with normal blending
//! - S3: version-bumped texture re-upload, ranged second upload
//! - S4: program reuse across materials with identical feature flags
//! - S5: shadow pass framebuffer ordering + map version bump
//! - S6: MSAA renderbuffer creation, end-of-frame blit, mipmap regeneration
//! - reentrant render restoring the parent's bindings
//! - frustum culling on/off

use glam::{Affine3A, Vec3, Vec4};
use glint::renderer::{Renderer, RendererOptions};
use glint::resources::material::{Material, ShadingModel};
use glint::resources::render_target::RenderTarget;
use glint::resources::texture::Filter;
use glint::resources::{BufferAttribute, Geometry, IdAllocator, Texture};
use glint::scene::light::Light;
use glint::scene::node::{Mesh, Node};
use glint::scene::{Camera, Scene};
use glint::RecordingContext;

use std::cell::RefCell;
use std::rc::Rc;

type TestRenderer = Renderer<RecordingContext>;

fn new_renderer() -> (TestRenderer, IdAllocator) {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = RecordingContext::new();
    let options = RendererOptions::default();
    let ids = options.ids.clone();
    let renderer = Renderer::new(ctx, options);
    renderer.context().take_calls();
    (renderer, ids)
}

/// Indexed plane-ish geometry with `triangles` triangles, so draws can be
/// told apart by their element count.
fn geometry_with_triangles(ids: &IdAllocator, triangles: usize) -> Rc<RefCell<Geometry>> {
    let mut geometry = Geometry::new(ids);
    let mut positions = Vec::new();
    let mut indices = Vec::new();
    for t in 0..triangles {
        let base = t as f32;
        positions.extend_from_slice(&[
            base, 0.0, 0.0, //
            base + 1.0, 0.0, 0.0, //
            base, 1.0, 0.0,
        ]);
        let i = (t * 3) as u16;
        indices.extend_from_slice(&[i, i + 1, i + 2]);
    }
    geometry.set_attribute("position", BufferAttribute::from_f32(ids, positions, 3));
    geometry.set_index(BufferAttribute::from_u16(ids, indices, 1));
    Rc::new(RefCell::new(geometry))
}

fn mesh_node(
    ids: &IdAllocator,
    triangles: usize,
    material: &Rc<RefCell<Material>>,
    position: Vec3,
) -> Node {
    let mesh = Mesh::new(geometry_with_triangles(ids, triangles), Rc::clone(material));
    let mut node = Node::mesh(ids, mesh);
    node.matrix = Affine3A::from_translation(position);
    node
}

fn looking_camera(ids: &IdAllocator) -> Camera {
    let mut camera = Camera::perspective(ids, 60.0, 1.0, 0.1, 100.0);
    camera.look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
    camera
}

fn draw_counts(calls: &[String]) -> Vec<String> {
    calls
        .iter()
        .filter(|c| c.starts_with("drawElements") || c.starts_with("drawArrays"))
        .cloned()
        .collect()
}

// ============================================================================
// S1 — clear color + opaque sort
// ============================================================================

#[test]
fn s1_clear_color_and_opaque_front_to_back() {
    let (mut renderer, ids) = new_renderer();
    renderer.set_clear_color(Vec4::new(0.1, 0.2, 0.3, 1.0));

    let material = Rc::new(RefCell::new(Material::new(&ids, ShadingModel::Basic)));
    let mut scene = Scene::new(&ids);
    // back mesh first in the scene, front mesh second: the sort must flip them
    scene.add(mesh_node(&ids, 2, &material, Vec3::new(0.0, 0.0, -1.0)));
    scene.add(mesh_node(&ids, 1, &material, Vec3::new(0.0, 0.0, 0.0)));

    let camera = looking_camera(&ids);
    renderer.render(&mut scene, &camera).unwrap();

    let calls = renderer.context().calls();
    assert!(calls.iter().any(|c| c == "clearColor(0.1, 0.2, 0.3, 1)"));
    let clear_index = calls.iter().position(|c| c.starts_with("clear(")).unwrap();

    let draws = draw_counts(&calls);
    assert_eq!(draws.len(), 2);
    // front mesh (1 triangle = 3 elements) draws before the back mesh (6)
    assert!(draws[0].starts_with("drawElements(0x0004, 3"));
    assert!(draws[1].starts_with("drawElements(0x0004, 6"));

    let first_draw = calls.iter().position(|c| c.starts_with("drawElements")).unwrap();
    assert!(clear_index < first_draw, "clear precedes all draws");
}

// ============================================================================
// S2 — transparent back-to-front with normal blending
// ============================================================================

#[test]
fn s2_transparent_back_to_front_blend_order() {
    let (mut renderer, ids) = new_renderer();
    renderer.set_clear_color(Vec4::new(0.0, 0.0, 0.0, 1.0));

    let mut scene = Scene::new(&ids);
    // camera sits at +5; z = +1 is nearest, z = -1 farthest
    for (triangles, z) in [(3usize, 1.0f32), (1, -1.0), (2, 0.0)] {
        let mut material = Material::new(&ids, ShadingModel::Basic);
        material.transparent = true;
        material.depth_write = false;
        let material = Rc::new(RefCell::new(material));
        scene.add(mesh_node(&ids, triangles, &material, Vec3::new(0.0, 0.0, z)));
    }

    let camera = looking_camera(&ids);
    renderer.render(&mut scene, &camera).unwrap();

    let calls = renderer.context().calls();
    // blending enabled with the non-premultiplied normal factors
    assert!(calls.iter().any(|c| c == "enable(0x0be2)"));
    assert!(calls
        .iter()
        .any(|c| c == "blendFuncSeparate(0x0302, 0x0303, 0x0001, 0x0303)"));

    let draws = draw_counts(&calls);
    assert_eq!(draws.len(), 3);
    // farthest (1 triangle) first, then middle (2), then nearest (3)
    assert!(draws[0].starts_with("drawElements(0x0004, 3,"));
    assert!(draws[1].starts_with("drawElements(0x0004, 6,"));
    assert!(draws[2].starts_with("drawElements(0x0004, 9,"));
}

// ============================================================================
// S3 — version-bumped texture re-upload
// ============================================================================

#[test]
fn s3_texture_version_bump_reuploads_ranged() {
    let (mut renderer, ids) = new_renderer();

    let texture = Rc::new(RefCell::new(Texture::from_data(&ids, vec![255; 16], 2, 2)));
    let mut material = Material::new(&ids, ShadingModel::Basic);
    material.map = Some(Rc::clone(&texture));
    let material = Rc::new(RefCell::new(material));

    let mut scene = Scene::new(&ids);
    scene.add(mesh_node(&ids, 1, &material, Vec3::ZERO));
    let camera = looking_camera(&ids);

    renderer.render(&mut scene, &camera).unwrap();
    let uploads: Vec<String> = renderer
        .context()
        .take_calls()
        .into_iter()
        .filter(|c| c.starts_with("texSubImage2D"))
        .collect();
    assert_eq!(uploads.len(), 1, "first render uploads the full image once");

    // second render with no changes: no further texel uploads
    renderer.render(&mut scene, &camera).unwrap();
    assert_eq!(renderer.context().count_calls("texSubImage2D"), 0);
    renderer.context().take_calls();

    // mutate one texel and mark the range dirty (second texel of row 0)
    texture.borrow_mut().add_update_range(4, 4);
    renderer.render(&mut scene, &camera).unwrap();
    let uploads: Vec<String> = renderer
        .context()
        .calls_matching("texSubImage2D");
    assert_eq!(uploads.len(), 1, "one ranged upload");
    // x=1, y=0, 1x1 texel
    assert!(uploads[0].contains(", 1, 0, 1, 1,"), "{}", uploads[0]);
}

// ============================================================================
// S4 — program reuse and release
// ============================================================================

#[test]
fn s4_identical_materials_share_a_program() {
    let (mut renderer, ids) = new_renderer();

    let material_a = Rc::new(RefCell::new(Material::new(&ids, ShadingModel::Standard)));
    let material_b = Rc::new(RefCell::new(Material::new(&ids, ShadingModel::Standard)));

    let mut scene = Scene::new(&ids);
    scene.add(mesh_node(&ids, 1, &material_a, Vec3::new(-1.0, 0.0, 0.0)));
    scene.add(mesh_node(&ids, 1, &material_b, Vec3::new(1.0, 0.0, 0.0)));
    let camera = looking_camera(&ids);

    renderer.render(&mut scene, &camera).unwrap();
    assert_eq!(renderer.context().count_calls("linkProgram"), 1);
    assert_eq!(renderer.info.programs, 1);

    renderer.dispose_material(&material_a);
    assert_eq!(renderer.info.programs, 1, "still used by the second material");
    assert_eq!(renderer.context().count_calls("deleteProgram"), 0);

    renderer.dispose_material(&material_b);
    assert_eq!(renderer.info.programs, 0);
    assert_eq!(renderer.context().count_calls("deleteProgram"), 1);
}

// ============================================================================
// S5 — shadow pass ordering
// ============================================================================

#[test]
fn s5_shadow_pass_renders_before_main_pass() {
    let (mut renderer, ids) = new_renderer();
    renderer.shadow_map.enabled = true;

    let material = Rc::new(RefCell::new(Material::new(&ids, ShadingModel::Standard)));
    let mut scene = Scene::new(&ids);

    let mut caster = mesh_node(&ids, 1, &material, Vec3::new(0.0, 1.0, 0.0));
    if let glint::scene::node::NodeKind::Mesh(mesh) = &mut caster.kind {
        mesh.cast_shadow = true;
        mesh.receive_shadow = true;
    }
    scene.add(caster);

    let mut light = Light::directional(&ids, Vec3::ONE, 1.0);
    light.cast_shadow = true;
    let light_id = light.id();
    let mut light_node = Node::light(&ids, light);
    light_node.matrix = Affine3A::from_translation(Vec3::new(0.0, 10.0, 0.0));
    scene.add(light_node);

    let camera = looking_camera(&ids);
    renderer.render(&mut scene, &camera).unwrap();

    let calls = renderer.context().calls();
    let binds: Vec<&String> = calls
        .iter()
        .filter(|c| c.starts_with("bindFramebuffer(0x8d40"))
        .collect();
    assert!(binds.len() >= 2);
    // shadow map FBO first, then back to the default framebuffer
    assert!(binds[0].contains("Some"));
    assert!(binds.iter().any(|b| b.contains("None")));
    let shadow_bind = calls
        .iter()
        .position(|c| c.starts_with("bindFramebuffer(0x8d40, Some"))
        .unwrap();
    let default_bind = calls
        .iter()
        .position(|c| c == "bindFramebuffer(0x8d40, None)")
        .unwrap();
    assert!(shadow_bind < default_bind);

    // the shadow map's depth texture version advanced exactly once
    let target = renderer.shadow_map.existing_target(light_id).unwrap();
    let depth = target.borrow().depth_texture.clone().unwrap();
    let version_after_first = depth.borrow().version();
    renderer.render(&mut scene, &camera).unwrap();
    assert_eq!(depth.borrow().version(), version_after_first + 1);
}

// ============================================================================
// S6 — MSAA resolve on a render target
// ============================================================================

#[test]
fn s6_msaa_target_resolves_and_regenerates_mipmaps() {
    let (mut renderer, ids) = new_renderer();

    let target = RenderTarget::new(&ids, 64, 64).with_samples(4);
    {
        let mut texture = target.texture().borrow_mut();
        texture.generate_mipmaps = true;
        texture.min_filter = Filter::LinearMipmapLinear;
    }
    let target = Rc::new(RefCell::new(target));
    renderer.set_render_target(Some(Rc::clone(&target)), 0, 0).unwrap();

    let material = Rc::new(RefCell::new(Material::new(&ids, ShadingModel::Basic)));
    let mut scene = Scene::new(&ids);
    scene.add(mesh_node(&ids, 1, &material, Vec3::ZERO));
    let camera = looking_camera(&ids);

    renderer.render(&mut scene, &camera).unwrap();
    let calls = renderer.context().calls();

    // a multisample framebuffer with multisample storage was created
    assert!(calls
        .iter()
        .any(|c| c.starts_with("renderbufferStorageMultisample(4")));
    // resolve blit happened at frame end, after the draw
    let draw = calls.iter().position(|c| c.starts_with("drawElements")).unwrap();
    let blit = calls.iter().position(|c| c.starts_with("blitFramebuffer")).unwrap();
    assert!(draw < blit);
    // mip-filtered attachment regenerates its chain after the resolve
    let mipmap = calls
        .iter()
        .rposition(|c| c.starts_with("generateMipmap"))
        .unwrap();
    assert!(blit < mipmap);
}

// ============================================================================
// Reentrant render
// ============================================================================

#[test]
fn nested_render_restores_parent_bindings() {
    let (mut renderer, ids) = new_renderer();

    let material = Rc::new(RefCell::new(Material::new(&ids, ShadingModel::Basic)));
    let mut scene = Scene::new(&ids);
    let hooked = mesh_node(&ids, 1, &material, Vec3::ZERO);
    let hooked_id = hooked.id();
    scene.add(hooked);
    scene.add(mesh_node(&ids, 2, &material, Vec3::new(0.5, 0.0, 0.0)));

    // inner scene rendered into a texture from the hook
    let inner_scene = Rc::new(RefCell::new(Scene::new(&ids)));
    inner_scene
        .borrow_mut()
        .add(mesh_node(&ids, 3, &material, Vec3::ZERO));
    let inner_camera = looking_camera(&ids);
    let inner_target = Rc::new(RefCell::new(RenderTarget::new(&ids, 32, 32)));

    let scene_for_hook = Rc::clone(&inner_scene);
    let target_for_hook = Rc::clone(&inner_target);
    renderer.set_before_render_hook(
        hooked_id,
        Rc::new(move |renderer: &mut TestRenderer| {
            let previous = renderer.render_target();
            renderer
                .set_render_target(Some(Rc::clone(&target_for_hook)), 0, 0)
                .unwrap();
            renderer
                .render(&mut scene_for_hook.borrow_mut(), &inner_camera)
                .unwrap();
            renderer.set_render_target(previous, 0, 0).unwrap();
        }),
    );

    let camera = looking_camera(&ids);
    renderer.render(&mut scene, &camera).unwrap();

    // outer target restored after the frame
    assert!(renderer.render_target().is_none());

    // all three meshes drew: inner (9 elements) plus both outer meshes
    let calls = renderer.context().calls();
    let draws = draw_counts(&calls);
    assert_eq!(draws.len(), 3);
    assert!(draws.iter().any(|d| d.starts_with("drawElements(0x0004, 9")));
    assert!(draws.iter().any(|d| d.starts_with("drawElements(0x0004, 3,")));
    assert!(draws.iter().any(|d| d.starts_with("drawElements(0x0004, 6,")));
}

// ============================================================================
// Frustum culling
// ============================================================================

#[test]
fn frustum_culling_skips_objects_behind_the_camera() {
    let (mut renderer, ids) = new_renderer();

    let material = Rc::new(RefCell::new(Material::new(&ids, ShadingModel::Basic)));
    let mut scene = Scene::new(&ids);
    scene.add(mesh_node(&ids, 1, &material, Vec3::new(0.0, 0.0, 50.0)));
    let camera = looking_camera(&ids);

    renderer.render(&mut scene, &camera).unwrap();
    assert_eq!(draw_counts(&renderer.context().take_calls()).len(), 0);

    // frustum_culled = false forces the draw
    let mut unculled = mesh_node(&ids, 1, &material, Vec3::new(0.0, 0.0, 50.0));
    if let glint::scene::node::NodeKind::Mesh(mesh) = &mut unculled.kind {
        mesh.frustum_culled = false;
    }
    scene.add(unculled);
    renderer.render(&mut scene, &camera).unwrap();
    assert_eq!(draw_counts(&renderer.context().take_calls()).len(), 1);
}

// ============================================================================
// Context loss
// ============================================================================

#[test]
fn lost_context_makes_render_a_no_op() {
    let (mut renderer, ids) = new_renderer();
    let material = Rc::new(RefCell::new(Material::new(&ids, ShadingModel::Basic)));
    let mut scene = Scene::new(&ids);
    scene.add(mesh_node(&ids, 1, &material, Vec3::ZERO));
    let camera = looking_camera(&ids);

    renderer.force_context_loss();
    renderer.context().take_calls();
    renderer.render(&mut scene, &camera).unwrap();
    assert!(renderer.context().calls().is_empty());

    renderer.force_context_restore();
    renderer.context().take_calls();
    renderer.render(&mut scene, &camera).unwrap();
    assert_eq!(draw_counts(&renderer.context().calls()).len(), 1);
}
