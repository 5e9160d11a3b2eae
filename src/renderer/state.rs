//! GPU pipeline state mirror.
//!
//! Every toggle the renderer ever sets is shadowed here; each setter compares
//! against the cached value and issues the underlying call only on change.
//! `reset` forgets everything (context restore, or an external library having
//! touched the context behind our back).
//!
//! Framebuffer bindings are tracked per target with `FRAMEBUFFER` and
//! `DRAW_FRAMEBUFFER` aliased, matching the GL semantics of the combined
//! binding point.

use rustc_hash::FxHashMap;

use crate::error::{RenderError, Result};
use crate::gl::consts as gl;
use crate::gl::{FramebufferHandle, GlContext, ProgramHandle, TextureHandle};
use crate::resources::material::{Blending, CompareFunction, Material, Side, StencilState};

fn compare_to_gl(func: CompareFunction) -> u32 {
    match func {
        CompareFunction::Never => gl::NEVER,
        CompareFunction::Less => gl::LESS,
        CompareFunction::Equal => gl::EQUAL,
        CompareFunction::LessEqual => gl::LEQUAL,
        CompareFunction::Greater => gl::GREATER,
        CompareFunction::NotEqual => gl::NOTEQUAL,
        CompareFunction::GreaterEqual => gl::GEQUAL,
        CompareFunction::Always => gl::ALWAYS,
    }
}

/// Fixed remap table for reversed-depth mode.
fn reverse_depth_func(func: u32) -> u32 {
    match func {
        gl::LESS => gl::GREATER,
        gl::GREATER => gl::LESS,
        gl::LEQUAL => gl::GEQUAL,
        gl::GEQUAL => gl::LEQUAL,
        gl::EQUAL => gl::NOTEQUAL,
        gl::NOTEQUAL => gl::EQUAL,
        gl::NEVER => gl::ALWAYS,
        gl::ALWAYS => gl::NEVER,
        other => other,
    }
}

// ─── Sub-trackers ─────────────────────────────────────────────────────────────

/// Color write mask and clear value.
#[derive(Debug, Default)]
pub struct ColorBuffer {
    pub locked: bool,
    mask: Option<bool>,
    clear_value: Option<[f32; 4]>,
}

impl ColorBuffer {
    pub fn set_mask(&mut self, context: &impl GlContext, mask: bool) {
        if self.mask != Some(mask) && !self.locked {
            context.color_mask(mask, mask, mask, mask);
            self.mask = Some(mask);
        }
    }

    pub fn set_clear(&mut self, context: &impl GlContext, r: f32, g: f32, b: f32, a: f32) {
        let value = [r, g, b, a];
        if self.clear_value != Some(value) {
            context.clear_color(r, g, b, a);
            self.clear_value = Some(value);
        }
    }

    fn reset(&mut self) {
        self.locked = false;
        self.mask = None;
        self.clear_value = None;
    }
}

/// Depth test/write/func/clear, with reversed-depth remapping.
#[derive(Debug, Default)]
pub struct DepthBuffer {
    pub locked: bool,
    reversed: bool,
    test: Option<bool>,
    mask: Option<bool>,
    func: Option<u32>,
    clear_value: Option<f32>,
}

impl DepthBuffer {
    #[must_use]
    pub fn reversed(&self) -> bool {
        self.reversed
    }

    /// Toggling reversed mode reflects the cached clear depth (`1 - d`) and
    /// remaps the cached comparison through the fixed table, so subsequent
    /// setters keep eliding correctly.
    pub fn set_reversed(&mut self, context: &impl GlContext, reversed: bool) {
        if self.reversed == reversed {
            return;
        }
        self.reversed = reversed;
        if let Some(clear) = self.clear_value {
            let reflected = 1.0 - clear;
            context.clear_depth(reflected);
            self.clear_value = Some(reflected);
        }
        if let Some(func) = self.func {
            let remapped = reverse_depth_func(func);
            context.depth_func(remapped);
            self.func = Some(remapped);
        }
    }

    pub fn set_test(&mut self, context: &impl GlContext, test: bool) {
        if self.test != Some(test) {
            if test {
                context.enable(gl::DEPTH_TEST);
            } else {
                context.disable(gl::DEPTH_TEST);
            }
            self.test = Some(test);
        }
    }

    pub fn set_mask(&mut self, context: &impl GlContext, mask: bool) {
        if self.mask != Some(mask) && !self.locked {
            context.depth_mask(mask);
            self.mask = Some(mask);
        }
    }

    pub fn set_func(&mut self, context: &impl GlContext, func: CompareFunction) {
        let mut gl_func = compare_to_gl(func);
        if self.reversed {
            gl_func = reverse_depth_func(gl_func);
        }
        if self.func != Some(gl_func) {
            context.depth_func(gl_func);
            self.func = Some(gl_func);
        }
    }

    pub fn set_clear(&mut self, context: &impl GlContext, depth: f32) {
        let depth = if self.reversed { 1.0 - depth } else { depth };
        if self.clear_value != Some(depth) {
            context.clear_depth(depth);
            self.clear_value = Some(depth);
        }
    }

    fn reset(&mut self) {
        self.locked = false;
        self.test = None;
        self.mask = None;
        self.func = None;
        self.clear_value = None;
        // reversed mode is a renderer property, not device state
    }
}

/// Stencil test configuration and clear value.
#[derive(Debug, Default)]
pub struct StencilBuffer {
    pub locked: bool,
    test: Option<bool>,
    mask: Option<u32>,
    func: Option<(u32, i32, u32)>,
    op: Option<(u32, u32, u32)>,
    clear_value: Option<i32>,
}

impl StencilBuffer {
    pub fn set_test(&mut self, context: &impl GlContext, test: bool) {
        if self.test != Some(test) {
            if test {
                context.enable(gl::STENCIL_TEST);
            } else {
                context.disable(gl::STENCIL_TEST);
            }
            self.test = Some(test);
        }
    }

    pub fn set_mask(&mut self, context: &impl GlContext, mask: u32) {
        if self.mask != Some(mask) && !self.locked {
            context.stencil_mask(mask);
            self.mask = Some(mask);
        }
    }

    pub fn set_func(&mut self, context: &impl GlContext, func: u32, reference: i32, mask: u32) {
        if self.func != Some((func, reference, mask)) {
            context.stencil_func(func, reference, mask);
            self.func = Some((func, reference, mask));
        }
    }

    pub fn set_op(&mut self, context: &impl GlContext, fail: u32, zfail: u32, zpass: u32) {
        if self.op != Some((fail, zfail, zpass)) {
            context.stencil_op(fail, zfail, zpass);
            self.op = Some((fail, zfail, zpass));
        }
    }

    pub fn set_clear(&mut self, context: &impl GlContext, value: i32) {
        if self.clear_value != Some(value) {
            context.clear_stencil(value);
            self.clear_value = Some(value);
        }
    }

    fn reset(&mut self) {
        self.locked = false;
        self.test = None;
        self.mask = None;
        self.func = None;
        self.op = None;
        self.clear_value = None;
    }
}

// ─── Blend state key ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
struct BlendFactors {
    eq_rgb: u32,
    eq_alpha: u32,
    src_rgb: u32,
    dst_rgb: u32,
    src_alpha: u32,
    dst_alpha: u32,
}

// ─── StateTracker ─────────────────────────────────────────────────────────────

/// CPU mirror of the GL pipeline state.
pub struct StateTracker {
    enabled_caps: FxHashMap<u32, bool>,
    current_program: Option<ProgramHandle>,

    blending_enabled: Option<bool>,
    blend_factors: Option<BlendFactors>,
    blend_color: Option<[f32; 4]>,

    pub color_buffer: ColorBuffer,
    pub depth_buffer: DepthBuffer,
    pub stencil_buffer: StencilBuffer,

    flip_sided: Option<bool>,
    cull_side: Option<u32>,
    line_width: Option<f32>,
    polygon_offset: Option<(f32, f32)>,

    bound_framebuffers: FxHashMap<u32, Option<FramebufferHandle>>,
    current_slot: Option<u32>,
    bound_textures: FxHashMap<u32, (u32, TextureHandle)>,
    empty_textures: FxHashMap<u32, TextureHandle>,

    scissor: Option<[i32; 4]>,
    viewport: Option<[i32; 4]>,
    draw_buffers: FxHashMap<u64, Vec<u32>>,

    max_textures: u32,
}

impl StateTracker {
    /// Builds the mirror and allocates one all-zero texture per binding
    /// target so `bind_texture(ty, None)` never leaves a unit undefined.
    pub fn new(context: &impl GlContext, max_textures: u32) -> Self {
        let mut empty_textures = FxHashMap::default();
        let zeros = [0u8; 4];
        for target in [gl::TEXTURE_2D, gl::TEXTURE_CUBE_MAP, gl::TEXTURE_2D_ARRAY, gl::TEXTURE_3D] {
            let handle = context.create_texture();
            context.bind_texture(target, Some(handle));
            match target {
                gl::TEXTURE_2D => context.tex_image_2d(
                    target,
                    0,
                    gl::RGBA8,
                    1,
                    1,
                    gl::RGBA,
                    gl::UNSIGNED_BYTE,
                    Some(&zeros),
                ),
                gl::TEXTURE_CUBE_MAP => {
                    for face in 0..6u32 {
                        context.tex_image_2d(
                            gl::TEXTURE_CUBE_MAP_POSITIVE_X + face,
                            0,
                            gl::RGBA8,
                            1,
                            1,
                            gl::RGBA,
                            gl::UNSIGNED_BYTE,
                            Some(&zeros),
                        );
                    }
                }
                _ => context.tex_image_3d(
                    target,
                    0,
                    gl::RGBA8,
                    1,
                    1,
                    1,
                    gl::RGBA,
                    gl::UNSIGNED_BYTE,
                    Some(&zeros),
                ),
            }
            context.bind_texture(target, None);
            empty_textures.insert(target, handle);
        }

        Self {
            enabled_caps: FxHashMap::default(),
            current_program: None,
            blending_enabled: None,
            blend_factors: None,
            blend_color: None,
            color_buffer: ColorBuffer::default(),
            depth_buffer: DepthBuffer::default(),
            stencil_buffer: StencilBuffer::default(),
            flip_sided: None,
            cull_side: None,
            line_width: None,
            polygon_offset: None,
            bound_framebuffers: FxHashMap::default(),
            current_slot: None,
            bound_textures: FxHashMap::default(),
            empty_textures,
            scissor: None,
            viewport: None,
            draw_buffers: FxHashMap::default(),
            max_textures,
        }
    }

    // ── Capabilities ─────────────────────────────────────────────────────────

    pub fn enable_cap(&mut self, context: &impl GlContext, cap: u32) {
        if self.enabled_caps.get(&cap) != Some(&true) {
            context.enable(cap);
            self.enabled_caps.insert(cap, true);
        }
    }

    pub fn disable_cap(&mut self, context: &impl GlContext, cap: u32) {
        if self.enabled_caps.get(&cap) != Some(&false) {
            context.disable(cap);
            self.enabled_caps.insert(cap, false);
        }
    }

    // ── Program ──────────────────────────────────────────────────────────────

    /// Returns `true` when the program binding actually changed.
    pub fn use_program(&mut self, context: &impl GlContext, program: ProgramHandle) -> bool {
        if self.current_program == Some(program) {
            return false;
        }
        context.use_program(Some(program));
        self.current_program = Some(program);
        true
    }

    // ── Framebuffers ─────────────────────────────────────────────────────────

    /// Returns `true` when the binding changed for `target`.
    pub fn bind_framebuffer(
        &mut self,
        context: &impl GlContext,
        target: u32,
        framebuffer: Option<FramebufferHandle>,
    ) -> bool {
        if self.bound_framebuffers.get(&target) == Some(&framebuffer) {
            return false;
        }
        context.bind_framebuffer(target, framebuffer);
        self.bound_framebuffers.insert(target, framebuffer);
        // FRAMEBUFFER sets both read and draw bindings
        match target {
            gl::FRAMEBUFFER => {
                self.bound_framebuffers.insert(gl::DRAW_FRAMEBUFFER, framebuffer);
                self.bound_framebuffers.insert(gl::READ_FRAMEBUFFER, framebuffer);
            }
            gl::DRAW_FRAMEBUFFER => {
                self.bound_framebuffers.insert(gl::FRAMEBUFFER, framebuffer);
            }
            _ => {}
        }
        true
    }

    #[must_use]
    pub fn bound_framebuffer(&self, target: u32) -> Option<FramebufferHandle> {
        self.bound_framebuffers.get(&target).copied().flatten()
    }

    /// Issues `drawBuffers` only when the attachment layout changed for this
    /// target (`0` keys the default framebuffer).
    pub fn set_draw_buffers(&mut self, context: &impl GlContext, key: u64, buffers: &[u32]) {
        let changed = self.draw_buffers.get(&key).map_or(true, |b| b != buffers);
        if changed {
            context.draw_buffers(buffers);
            self.draw_buffers.insert(key, buffers.to_vec());
        }
    }

    // ── Blending ─────────────────────────────────────────────────────────────

    pub fn set_blending(
        &mut self,
        context: &impl GlContext,
        blending: Blending,
        premultiplied_alpha: bool,
    ) -> Result<()> {
        if blending == Blending::None {
            if self.blending_enabled != Some(false) {
                context.disable(gl::BLEND);
                self.blending_enabled = Some(false);
            }
            return Ok(());
        }

        if self.blending_enabled != Some(true) {
            context.enable(gl::BLEND);
            self.blending_enabled = Some(true);
        }

        let factors = match (blending, premultiplied_alpha) {
            (Blending::Normal, false) => BlendFactors {
                eq_rgb: gl::FUNC_ADD,
                eq_alpha: gl::FUNC_ADD,
                src_rgb: gl::SRC_ALPHA,
                dst_rgb: gl::ONE_MINUS_SRC_ALPHA,
                src_alpha: gl::ONE,
                dst_alpha: gl::ONE_MINUS_SRC_ALPHA,
            },
            (Blending::Normal, true) => BlendFactors {
                eq_rgb: gl::FUNC_ADD,
                eq_alpha: gl::FUNC_ADD,
                src_rgb: gl::ONE,
                dst_rgb: gl::ONE_MINUS_SRC_ALPHA,
                src_alpha: gl::ONE,
                dst_alpha: gl::ONE_MINUS_SRC_ALPHA,
            },
            (Blending::Additive, false) => BlendFactors {
                eq_rgb: gl::FUNC_ADD,
                eq_alpha: gl::FUNC_ADD,
                src_rgb: gl::SRC_ALPHA,
                dst_rgb: gl::ONE,
                src_alpha: gl::ONE,
                dst_alpha: gl::ONE,
            },
            (Blending::Additive, true) => BlendFactors {
                eq_rgb: gl::FUNC_ADD,
                eq_alpha: gl::FUNC_ADD,
                src_rgb: gl::ONE,
                dst_rgb: gl::ONE,
                src_alpha: gl::ONE,
                dst_alpha: gl::ONE,
            },
            (Blending::Subtractive, true) => BlendFactors {
                eq_rgb: gl::FUNC_ADD,
                eq_alpha: gl::FUNC_ADD,
                src_rgb: gl::ZERO,
                dst_rgb: gl::ONE_MINUS_SRC_COLOR,
                src_alpha: gl::ZERO,
                dst_alpha: gl::ONE,
            },
            (Blending::Multiply, true) => BlendFactors {
                eq_rgb: gl::FUNC_ADD,
                eq_alpha: gl::FUNC_ADD,
                src_rgb: gl::DST_COLOR,
                dst_rgb: gl::ONE_MINUS_SRC_ALPHA,
                src_alpha: gl::ZERO,
                dst_alpha: gl::ONE,
            },
            (Blending::Subtractive | Blending::Multiply, false) => {
                return Err(RenderError::InvalidBlending(
                    "Subtractive and Multiply blending require premultiplied alpha".to_string(),
                ));
            }
            (
                Blending::Custom {
                    equation,
                    src,
                    dst,
                    equation_alpha,
                    src_alpha,
                    dst_alpha,
                },
                _,
            ) => BlendFactors {
                eq_rgb: equation,
                eq_alpha: equation_alpha,
                src_rgb: src,
                dst_rgb: dst,
                src_alpha,
                dst_alpha,
            },
            (Blending::None, _) => unreachable!(),
        };

        if self.blend_factors != Some(factors) {
            context.blend_equation_separate(factors.eq_rgb, factors.eq_alpha);
            context.blend_func_separate(
                factors.src_rgb,
                factors.dst_rgb,
                factors.src_alpha,
                factors.dst_alpha,
            );
            self.blend_factors = Some(factors);
        }
        Ok(())
    }

    pub fn set_blend_color(&mut self, context: &impl GlContext, r: f32, g: f32, b: f32, a: f32) {
        let value = [r, g, b, a];
        if self.blend_color != Some(value) {
            context.blend_color(r, g, b, a);
            self.blend_color = Some(value);
        }
    }

    // ── Rasterizer ───────────────────────────────────────────────────────────

    pub fn set_flip_sided(&mut self, context: &impl GlContext, flip_sided: bool) {
        if self.flip_sided != Some(flip_sided) {
            context.front_face(if flip_sided { gl::CW } else { gl::CCW });
            self.flip_sided = Some(flip_sided);
        }
    }

    pub fn set_cull_side(&mut self, context: &impl GlContext, side: Side) {
        match side {
            Side::Double => self.disable_cap(context, gl::CULL_FACE),
            Side::Front | Side::Back => {
                self.enable_cap(context, gl::CULL_FACE);
                // culling removes the *other* face
                let mode = gl::BACK;
                if self.cull_side != Some(mode) {
                    context.cull_face(mode);
                    self.cull_side = Some(mode);
                }
            }
        }
    }

    pub fn set_line_width(&mut self, context: &impl GlContext, width: f32) {
        if self.line_width != Some(width) {
            context.line_width(width);
            self.line_width = Some(width);
        }
    }

    pub fn set_polygon_offset(
        &mut self,
        context: &impl GlContext,
        enabled: bool,
        factor: f32,
        units: f32,
    ) {
        if enabled {
            self.enable_cap(context, gl::POLYGON_OFFSET_FILL);
            if self.polygon_offset != Some((factor, units)) {
                context.polygon_offset(factor, units);
                self.polygon_offset = Some((factor, units));
            }
        } else {
            self.disable_cap(context, gl::POLYGON_OFFSET_FILL);
        }
    }

    // ── Composite material entry point ───────────────────────────────────────

    /// Applies every fixed-function setting a material controls.
    pub fn set_material(
        &mut self,
        context: &impl GlContext,
        material: &Material,
        front_face_cw: bool,
    ) -> Result<()> {
        self.set_cull_side(context, material.side);

        let flip_sided = (material.side == Side::Back) != front_face_cw;
        self.set_flip_sided(context, flip_sided);

        let blending = if material.blending == Blending::Normal && !material.transparent {
            Blending::None
        } else {
            material.blending
        };
        self.set_blending(context, blending, material.premultiplied_alpha)?;

        self.depth_buffer.set_func(context, material.depth_func);
        self.depth_buffer.set_test(context, material.depth_test);
        self.depth_buffer.set_mask(context, material.depth_write);
        self.color_buffer.set_mask(context, material.color_write);

        self.set_stencil(context, &material.stencil);
        self.set_polygon_offset(
            context,
            material.polygon_offset,
            material.polygon_offset_factor,
            material.polygon_offset_units,
        );

        if material.alpha_to_coverage {
            self.enable_cap(context, gl::SAMPLE_ALPHA_TO_COVERAGE);
        } else {
            self.disable_cap(context, gl::SAMPLE_ALPHA_TO_COVERAGE);
        }
        Ok(())
    }

    fn set_stencil(&mut self, context: &impl GlContext, stencil: &StencilState) {
        self.stencil_buffer.set_test(context, stencil.write);
        if stencil.write {
            self.stencil_buffer.set_mask(context, stencil.write_mask);
            self.stencil_buffer.set_func(
                context,
                compare_to_gl(stencil.func),
                stencil.reference,
                stencil.func_mask,
            );
            self.stencil_buffer
                .set_op(context, stencil.fail, stencil.z_fail, stencil.z_pass);
        }
    }

    // ── Texture units ────────────────────────────────────────────────────────

    pub fn active_texture(&mut self, context: &impl GlContext, slot: u32) {
        debug_assert!(slot < self.max_textures);
        if self.current_slot != Some(slot) {
            context.active_texture(gl::TEXTURE0 + slot);
            self.current_slot = Some(slot);
        }
    }

    /// Binds `texture` (or the empty texture of `target`'s type for `None`)
    /// to `slot`, defaulting to the current active slot.
    pub fn bind_texture(
        &mut self,
        context: &impl GlContext,
        target: u32,
        texture: Option<TextureHandle>,
        slot: Option<u32>,
    ) {
        let slot = match slot {
            Some(slot) => {
                self.active_texture(context, slot);
                slot
            }
            None => {
                let current = self.current_slot.unwrap_or(0);
                if self.current_slot.is_none() {
                    self.active_texture(context, current);
                }
                current
            }
        };

        let effective = texture.unwrap_or_else(|| self.empty_textures[&target]);
        if self.bound_textures.get(&slot) != Some(&(target, effective)) {
            context.bind_texture(target, Some(effective));
            self.bound_textures.insert(slot, (target, effective));
        }
    }

    /// Currently bound texture of `target` type on the active slot.
    #[must_use]
    pub fn bound_texture(&self, target: u32) -> Option<TextureHandle> {
        let slot = self.current_slot?;
        match self.bound_textures.get(&slot) {
            Some(&(bound_target, handle)) if bound_target == target => Some(handle),
            _ => None,
        }
    }

    /// The placeholder texture bound in place of `None`.
    #[must_use]
    pub fn empty_texture(&self, target: u32) -> TextureHandle {
        self.empty_textures[&target]
    }

    /// Forgets a texture binding after the underlying object was deleted.
    pub fn forget_texture(&mut self, handle: TextureHandle) {
        self.bound_textures.retain(|_, &mut (_, bound)| bound != handle);
    }

    // ── Viewport / scissor ───────────────────────────────────────────────────

    pub fn set_viewport(&mut self, context: &impl GlContext, rect: [i32; 4]) {
        if self.viewport != Some(rect) {
            context.viewport(rect[0], rect[1], rect[2], rect[3]);
            self.viewport = Some(rect);
        }
    }

    pub fn set_scissor(&mut self, context: &impl GlContext, rect: [i32; 4]) {
        if self.scissor != Some(rect) {
            context.scissor(rect[0], rect[1], rect[2], rect[3]);
            self.scissor = Some(rect);
        }
    }

    pub fn set_scissor_test(&mut self, context: &impl GlContext, enabled: bool) {
        if enabled {
            self.enable_cap(context, gl::SCISSOR_TEST);
        } else {
            self.disable_cap(context, gl::SCISSOR_TEST);
        }
    }

    // ── Reset ────────────────────────────────────────────────────────────────

    /// Drops every cached value so the next setters re-issue unconditionally.
    pub fn reset(&mut self) {
        self.enabled_caps.clear();
        self.current_program = None;
        self.blending_enabled = None;
        self.blend_factors = None;
        self.blend_color = None;
        self.color_buffer.reset();
        self.depth_buffer.reset();
        self.stencil_buffer.reset();
        self.flip_sided = None;
        self.cull_side = None;
        self.line_width = None;
        self.polygon_offset = None;
        self.bound_framebuffers.clear();
        self.current_slot = None;
        self.bound_textures.clear();
        self.scissor = None;
        self.viewport = None;
        self.draw_buffers.clear();
    }
}
