//! Texture Manager Tests
//!
//! Tests for:
//! - Source+parameter de-duplication and reference counting
//! - Upload fast path on unchanged versions
//! - Format table failures
//! - sRGB downgrade for non-RGBA8 textures
//! - Max-size auto-resize

use glint::renderer::capabilities::Capabilities;
use glint::renderer::state::StateTracker;
use glint::renderer::textures::TextureManager;
use glint::resources::texture::{ColorSpace, Texture, TextureType};
use glint::resources::IdAllocator;
use glint::RenderError;
use glint::RecordingContext;

fn setup(ctx: &RecordingContext) -> (StateTracker, TextureManager) {
    let capabilities = Capabilities::query(ctx);
    let state = StateTracker::new(ctx, capabilities.max_textures);
    let manager = TextureManager::new(capabilities);
    ctx.take_calls();
    (state, manager)
}

#[test]
fn same_source_and_parameters_share_one_gpu_texture() {
    let ctx = RecordingContext::new();
    let (mut state, mut manager) = setup(&ctx);
    let ids = IdAllocator::new();

    let mut a = Texture::from_data(&ids, vec![0; 16], 2, 2);
    let mut b = Texture::from_data(&ids, vec![0; 16], 2, 2);
    b.share_source_of(&a);

    let handle_a = manager.upload(&ctx, &mut state, &mut a, 0).unwrap();
    let handle_b = manager.upload(&ctx, &mut state, &mut b, 1).unwrap();
    assert_eq!(handle_a, handle_b);
    assert_eq!(ctx.count_calls("createTexture"), 1);

    // releasing one keeps the shared storage alive
    manager.dispose_texture(&ctx, &mut state, a.id());
    assert_eq!(ctx.count_calls("deleteTexture"), 0);
    manager.dispose_texture(&ctx, &mut state, b.id());
    assert_eq!(ctx.count_calls("deleteTexture"), 1);
}

#[test]
fn differing_parameters_split_the_storage() {
    let ctx = RecordingContext::new();
    let (mut state, mut manager) = setup(&ctx);
    let ids = IdAllocator::new();

    let mut a = Texture::from_data(&ids, vec![0; 16], 2, 2);
    let mut b = Texture::from_data(&ids, vec![0; 16], 2, 2);
    b.share_source_of(&a);
    b.flip_y = !a.flip_y;

    let handle_a = manager.upload(&ctx, &mut state, &mut a, 0).unwrap();
    let handle_b = manager.upload(&ctx, &mut state, &mut b, 1).unwrap();
    assert_ne!(handle_a, handle_b);
    assert_eq!(ctx.count_calls("createTexture"), 2);
}

#[test]
fn unchanged_version_skips_the_upload_pipeline() {
    let ctx = RecordingContext::new();
    let (mut state, mut manager) = setup(&ctx);
    let ids = IdAllocator::new();

    let mut texture = Texture::from_data(&ids, vec![0; 16], 2, 2);
    manager.upload(&ctx, &mut state, &mut texture, 0).unwrap();
    ctx.take_calls();

    manager.upload(&ctx, &mut state, &mut texture, 0).unwrap();
    assert_eq!(ctx.count_calls("texSubImage2D"), 0);
    assert_eq!(ctx.count_calls("texStorage2D"), 0);
}

#[test]
fn unsupported_format_combination_fails_the_upload() {
    let ctx = RecordingContext::new();
    let (mut state, mut manager) = setup(&ctx);
    let ids = IdAllocator::new();

    let mut texture = Texture::from_data(&ids, vec![0; 16], 2, 2);
    texture.texel_type = TextureType::Int;
    let result = manager.upload(&ctx, &mut state, &mut texture, 0);
    assert!(matches!(result, Err(RenderError::UnsupportedFormat(_))));
}

#[test]
fn srgb_non_rgba8_downgrades_to_linear() {
    let ctx = RecordingContext::new();
    let (mut state, mut manager) = setup(&ctx);
    let ids = IdAllocator::new();

    let mut texture = Texture::from_data(&ids, vec![0; 32], 2, 2);
    texture.texel_type = TextureType::HalfFloat;
    texture.color_space = ColorSpace::Srgb;

    manager.upload(&ctx, &mut state, &mut texture, 0).unwrap();
    // RGBA16F storage, not an sRGB internal format
    assert!(ctx
        .calls_matching("texStorage2D")
        .iter()
        .any(|c| c.contains("0x881a")));
}

#[test]
fn oversized_data_texture_is_downscaled_with_storage_to_match() {
    let ctx = RecordingContext::new().with_max_texture_size(4);
    let (mut state, mut manager) = setup(&ctx);
    let ids = IdAllocator::new();

    let mut texture = Texture::from_data(&ids, vec![128; 8 * 8 * 4], 8, 8);
    manager.upload(&ctx, &mut state, &mut texture, 0).unwrap();

    let storage = ctx.calls_matching("texStorage2D");
    assert!(storage[0].ends_with("4, 4)"), "{}", storage[0]);
    assert_eq!(texture.source.width(), 4);
}

#[test]
fn cube_textures_upload_six_faces() {
    let ctx = RecordingContext::new();
    let (mut state, mut manager) = setup(&ctx);
    let ids = IdAllocator::new();

    let face = || glint::resources::texture::PixelData::new(vec![0; 16], 2, 2);
    let mut texture =
        Texture::from_cube_faces(&ids, [face(), face(), face(), face(), face(), face()]);
    texture.generate_mipmaps = false;
    texture.min_filter = glint::resources::texture::Filter::Linear;

    manager.upload(&ctx, &mut state, &mut texture, 0).unwrap();
    assert_eq!(ctx.count_calls("texStorage2D"), 1);
    assert_eq!(ctx.count_calls("texSubImage2D"), 6);
}

#[test]
fn layer_updates_restrict_array_uploads() {
    let ctx = RecordingContext::new();
    let (mut state, mut manager) = setup(&ctx);
    let ids = IdAllocator::new();

    let mut texture = Texture::from_data(&ids, vec![0; 4 * 4], 2, 2);
    // reshape into a 4-layer array texture
    texture.dimension = glint::resources::texture::TextureDimension::D2Array;
    texture.source = glint::resources::texture::TextureSource::Data {
        level0: glint::resources::texture::PixelData {
            data: vec![0; 2 * 2 * 4 * 4],
            width: 2,
            height: 2,
            depth: 4,
        },
        mipmaps: Vec::new(),
    };
    texture.layer_updates.insert(1);
    texture.layer_updates.insert(3);

    manager.upload(&ctx, &mut state, &mut texture, 0).unwrap();
    let uploads = ctx.calls_matching("texSubImage3D");
    assert_eq!(uploads.len(), 2);
    assert!(uploads[0].contains(", 0, 0, 1, 2, 2, 1,"));
    assert!(uploads[1].contains(", 0, 0, 3, 2, 2, 1,"));
}
