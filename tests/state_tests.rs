//! State Tracker Tests
//!
//! Tests for:
//! - Redundant call elision across every mirrored setting
//! - The fixed blending table, including the premultiplied-alpha rejections
//! - Reversed-depth function remapping and clear-depth reflection
//! - Texture slot fidelity and the empty-texture fallback
//! - Framebuffer binding aliasing

use glint::gl::consts as gl;
use glint::gl::GlContext;
use glint::renderer::state::StateTracker;
use glint::resources::material::{Blending, CompareFunction, Material, ShadingModel, Side};
use glint::resources::IdAllocator;
use glint::RecordingContext;

fn tracker(ctx: &RecordingContext) -> StateTracker {
    let state = StateTracker::new(ctx, 16);
    ctx.take_calls();
    state
}

#[test]
fn identical_setter_calls_issue_one_gl_call() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);

    for _ in 0..5 {
        state.enable_cap(&ctx, gl::DEPTH_TEST);
        state.depth_buffer.set_mask(&ctx, false);
        state.set_flip_sided(&ctx, true);
        state.set_viewport(&ctx, [0, 0, 256, 256]);
        state.set_line_width(&ctx, 2.0);
    }

    assert_eq!(ctx.count_calls("enable"), 1);
    assert_eq!(ctx.count_calls("depthMask"), 1);
    assert_eq!(ctx.count_calls("frontFace"), 1);
    assert_eq!(ctx.count_calls("viewport"), 1);
    assert_eq!(ctx.count_calls("lineWidth"), 1);
}

#[test]
fn value_changes_issue_new_calls() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);

    state.depth_buffer.set_func(&ctx, CompareFunction::LessEqual);
    state.depth_buffer.set_func(&ctx, CompareFunction::Always);
    state.depth_buffer.set_func(&ctx, CompareFunction::Always);
    assert_eq!(ctx.count_calls("depthFunc"), 2);
}

#[test]
fn reset_forgets_mirrored_state() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);

    state.enable_cap(&ctx, gl::BLEND);
    state.reset();
    state.enable_cap(&ctx, gl::BLEND);
    assert_eq!(ctx.count_calls("enable"), 2);
}

#[test]
fn normal_blending_factors_match_the_table() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);

    state.set_blending(&ctx, Blending::Normal, false).unwrap();
    let funcs = ctx.calls_matching("blendFuncSeparate");
    // src (SRC_ALPHA, ONE), dst (1-SRC_ALPHA, 1-SRC_ALPHA)
    assert_eq!(funcs[0], "blendFuncSeparate(0x0302, 0x0303, 0x0001, 0x0303)");

    ctx.take_calls();
    state.set_blending(&ctx, Blending::Normal, true).unwrap();
    let funcs = ctx.calls_matching("blendFuncSeparate");
    assert_eq!(funcs[0], "blendFuncSeparate(0x0001, 0x0303, 0x0001, 0x0303)");
}

#[test]
fn additive_blending_factors_match_the_table() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);

    state.set_blending(&ctx, Blending::Additive, false).unwrap();
    let funcs = ctx.calls_matching("blendFuncSeparate");
    assert_eq!(funcs[0], "blendFuncSeparate(0x0302, 0x0001, 0x0001, 0x0001)");
}

#[test]
fn non_premultiplied_subtractive_and_multiply_are_rejected() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);

    assert!(state.set_blending(&ctx, Blending::Subtractive, false).is_err());
    assert!(state.set_blending(&ctx, Blending::Multiply, false).is_err());
    assert!(state.set_blending(&ctx, Blending::Subtractive, true).is_ok());
    assert!(state.set_blending(&ctx, Blending::Multiply, true).is_ok());
}

#[test]
fn no_blending_disables_and_elides() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);

    state.set_blending(&ctx, Blending::None, false).unwrap();
    state.set_blending(&ctx, Blending::None, false).unwrap();
    assert_eq!(ctx.count_calls("disable"), 1);
    assert_eq!(ctx.count_calls("blendFuncSeparate"), 0);
}

#[test]
fn reversed_depth_remaps_comparison_functions() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);

    state.depth_buffer.set_reversed(&ctx, true);
    state.depth_buffer.set_func(&ctx, CompareFunction::Less);
    let funcs = ctx.calls_matching("depthFunc");
    // LESS remaps to GREATER under reversed depth
    assert_eq!(funcs[0], "depthFunc(0x0204)");
}

#[test]
fn toggling_reversed_reflects_cached_clear_depth() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);

    state.depth_buffer.set_clear(&ctx, 1.0);
    ctx.take_calls();
    state.depth_buffer.set_reversed(&ctx, true);
    let clears = ctx.calls_matching("clearDepth");
    assert_eq!(clears, vec!["clearDepth(0)".to_string()]);
}

#[test]
fn texture_slot_binding_round_trips() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);
    let texture = ctx.create_texture();

    state.bind_texture(&ctx, gl::TEXTURE_2D, Some(texture), Some(3));
    state.active_texture(&ctx, 3);
    assert_eq!(state.bound_texture(gl::TEXTURE_2D), Some(texture));

    // a different slot does not report the binding
    state.active_texture(&ctx, 0);
    assert_eq!(state.bound_texture(gl::TEXTURE_2D), None);
}

#[test]
fn binding_none_substitutes_the_empty_texture() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);

    state.bind_texture(&ctx, gl::TEXTURE_2D, None, Some(0));
    let empty = state.empty_texture(gl::TEXTURE_2D);
    assert_eq!(state.bound_texture(gl::TEXTURE_2D), Some(empty));
}

#[test]
fn redundant_texture_bindings_are_elided() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);
    let texture = ctx.create_texture();
    ctx.take_calls();

    state.bind_texture(&ctx, gl::TEXTURE_2D, Some(texture), Some(0));
    state.bind_texture(&ctx, gl::TEXTURE_2D, Some(texture), Some(0));
    assert_eq!(ctx.count_calls("bindTexture"), 1);
}

#[test]
fn framebuffer_target_aliasing() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);
    let framebuffer = ctx.create_framebuffer();
    ctx.take_calls();

    assert!(state.bind_framebuffer(&ctx, gl::FRAMEBUFFER, Some(framebuffer)));
    // FRAMEBUFFER aliased DRAW_FRAMEBUFFER: rebinding is redundant
    assert!(!state.bind_framebuffer(&ctx, gl::DRAW_FRAMEBUFFER, Some(framebuffer)));
    assert_eq!(ctx.count_calls("bindFramebuffer"), 1);
}

#[test]
fn set_material_applies_the_full_fixed_function_block() {
    let ctx = RecordingContext::new();
    let mut state = tracker(&ctx);

    let ids = IdAllocator::new();
    let mut material = Material::new(&ids, ShadingModel::Standard);
    material.transparent = true;
    material.side = Side::Double;
    state.set_material(&ctx, &material, false).unwrap();

    // double-sided: culling disabled; transparent: blending enabled
    assert!(ctx.calls().iter().any(|c| c == "disable(0x0b44)"));
    assert!(ctx.calls().iter().any(|c| c == "enable(0x0be2)"));

    // applying the same material again is almost free
    ctx.take_calls();
    state.set_material(&ctx, &material, false).unwrap();
    assert_eq!(ctx.calls().len(), 0);
}
