//! The renderer core.
//!
//! [`Renderer`] owns the GL context, the state mirror, and every cache, and
//! sequences the per-frame pipeline: world matrices → frustum → render
//! lists → shadow maps → background → transmission pre-pass → opaque /
//! transmissive / transparent buckets → MSAA resolve → mipmaps.
//!
//! `render` is reentrant through per-`(scene, depth)` list and state pools:
//! a before-render hook may call `render` again with another scene and
//! camera, and the parent frame resumes with its own lists and its render
//! target restored.

pub mod attributes;
pub mod background;
pub mod binding_states;
pub mod capabilities;
pub mod clipping;
pub mod format;
pub mod info;
pub mod lights;
pub mod programs;
pub mod render_list;
pub mod shader_gen;
pub mod shadow_map;
pub mod state;
pub mod tasks;
pub mod textures;
pub mod transmission;
pub mod warnings;

use glam::{Affine3A, Mat3, Mat4, Vec3, Vec4};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::error::{RenderError, Result};
use crate::gl::consts as gl;
use crate::gl::GlContext;
use crate::resources::material::{Material, ShadingModel, Side};
use crate::resources::render_target::Rect;
use crate::resources::texture::{ColorSpace, TextureFormat, TextureType};
use crate::resources::version::IdAllocator;
use crate::resources::{SharedRenderTarget, SharedTexture};
use crate::scene::camera::{Camera, Frustum};
use crate::scene::node::{DrawMode, Layers, Node, NodeKind};
use crate::scene::scene::{Fog, Scene};

use self::attributes::AttributeManager;
use self::background::{BackgroundAction, BackgroundPass};
use self::binding_states::BindingStates;
use self::capabilities::Capabilities;
use self::clipping::Clipping;
use self::info::RenderInfo;
use self::lights::{LightRecord, LightsState};
use self::programs::{DerivationInputs, GlProgram, ProgramCache, ToneMapping};
use self::render_list::{
    ObjectSnapshot, RenderItem, RenderList, RenderLists, RenderState, RenderStates,
};
use self::shadow_map::ShadowMapState;
use self::state::StateTracker;
use self::tasks::{CompileTask, ReadPixelsTask};
use self::textures::TextureManager;
use self::transmission::TransmissionPass;
use self::warnings::OnceLog;

use std::rc::Rc;

pub use self::programs::{ShadowMapType as ShadowType, ToneMapping as ToneMappingMode};

/// Hook invoked for an object right before its draw; may reentrantly call
/// [`Renderer::render`].
pub type RenderHook<C> = Rc<dyn Fn(&mut Renderer<C>)>;

/// Animation loop callback driven by [`Renderer::run_animation_frame`].
pub type AnimationLoop<C> = Box<dyn FnMut(&mut Renderer<C>, f64)>;

/// Construction options.
///
/// `ids` is the allocator the renderer and its internal resources draw
/// from. Build caller-owned resources (geometries, materials, textures,
/// scenes, cameras) from a clone of the same allocator so everything
/// shares one id space.
#[derive(Debug, Clone)]
pub struct RendererOptions {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f32,
    pub logarithmic_depth_buffer: bool,
    pub reversed_depth_buffer: bool,
    pub ids: IdAllocator,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            pixel_ratio: 1.0,
            logarithmic_depth_buffer: false,
            reversed_depth_buffer: false,
            ids: IdAllocator::new(),
        }
    }
}

/// Camera data the draw path needs; built from a [`Camera`] or a shadow
/// camera's raw matrices.
#[derive(Debug, Clone)]
struct CameraState {
    id: u64,
    projection: Mat4,
    view: Mat4,
    position: Vec3,
    orthographic: bool,
}

impl CameraState {
    fn of(camera: &Camera) -> Self {
        Self {
            id: camera.id(),
            projection: camera.projection_matrix(),
            view: camera.view_matrix(),
            position: camera.position(),
            orthographic: camera.is_orthographic(),
        }
    }
}

/// Immutable scene fields used during the frame.
struct SceneData {
    id: u64,
    fog: Option<Fog>,
    background_intensity: f32,
    background_rotation: glam::Quat,
}

/// Per-object feature booleans compared individually by the program fast
/// path; any difference forces re-derivation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct FastFlags {
    instancing: bool,
    instancing_color: bool,
    instancing_morph: bool,
    skinning: bool,
    morph_targets: usize,
    fog: bool,
    output_color_space: ColorSpace,
    num_clipping_planes: usize,
    num_clip_intersection: usize,
    shadow_map_enabled: bool,
    tone_mapping: ToneMapping,
    opaque_pass: bool,
    reversed_depth: bool,
    double_sided: bool,
    flip_sided: bool,
}

#[derive(Default)]
struct MaterialProps {
    program: Option<Rc<GlProgram>>,
    lights_version: u64,
    material_version: u64,
    fast: FastFlags,
}

/// Retained-mode renderer over a WebGL2-class context.
pub struct Renderer<C: GlContext> {
    context: C,
    pub capabilities: Capabilities,
    pub info: RenderInfo,
    pub shadow_map: ShadowMapState,

    state: StateTracker,
    textures: TextureManager,
    attributes: AttributeManager,
    binding_states: BindingStates,
    programs: ProgramCache,
    render_lists: RenderLists,
    render_states: RenderStates,
    background: BackgroundPass,
    transmission: TransmissionPass,
    clipping: Clipping,
    warnings: OnceLog,

    // ── Public properties (§6) ───────────────────────────────────────────────
    pub auto_clear: bool,
    pub auto_clear_color: bool,
    pub auto_clear_depth: bool,
    pub auto_clear_stencil: bool,
    pub sort_objects: bool,
    pub clipping_planes: Vec<Vec4>,
    pub local_clipping_enabled: bool,
    pub tone_mapping: ToneMapping,
    pub tone_mapping_exposure: f32,
    pub transmission_resolution_scale: f32,
    pub output_color_space: ColorSpace,

    // ── Size / viewport ──────────────────────────────────────────────────────
    width: u32,
    height: u32,
    pixel_ratio: f32,
    viewport: Rect,
    scissor: Rect,
    scissor_test: bool,
    clear_color: Vec4,

    // ── Frame state ──────────────────────────────────────────────────────────
    is_context_lost: bool,
    render_depth: usize,
    current_render_target: Option<SharedRenderTarget>,
    current_cube_face: u32,
    current_mip_level: i32,
    current_camera_id: Option<u64>,
    rendering_shadows: bool,
    transmission_texture: Option<SharedTexture>,
    logarithmic_depth_buffer: bool,
    reversed_depth_buffer: bool,

    ids: IdAllocator,
    material_props: FxHashMap<u64, MaterialProps>,
    known_geometries: FxHashSet<u64>,
    before_render_hooks: FxHashMap<u64, RenderHook<C>>,
    animation_loop: Option<AnimationLoop<C>>,
}

impl<C: GlContext> Renderer<C> {
    pub fn new(context: C, options: RendererOptions) -> Self {
        let capabilities = Capabilities::query(&context);
        let state = StateTracker::new(&context, capabilities.max_textures);
        let textures = TextureManager::new(capabilities.clone());
        let ids = options.ids.clone();

        let mut renderer = Self {
            state,
            textures,
            capabilities,
            info: RenderInfo::new(),
            shadow_map: ShadowMapState::new(&ids),
            attributes: AttributeManager::new(),
            binding_states: BindingStates::new(),
            programs: ProgramCache::new(),
            render_lists: RenderLists::default(),
            render_states: RenderStates::default(),
            background: BackgroundPass::new(),
            transmission: TransmissionPass::new(),
            clipping: Clipping::new(),
            warnings: OnceLog::new(),
            auto_clear: true,
            auto_clear_color: true,
            auto_clear_depth: true,
            auto_clear_stencil: true,
            sort_objects: true,
            clipping_planes: Vec::new(),
            local_clipping_enabled: false,
            tone_mapping: ToneMapping::None,
            tone_mapping_exposure: 1.0,
            transmission_resolution_scale: 1.0,
            output_color_space: ColorSpace::Srgb,
            width: options.width,
            height: options.height,
            pixel_ratio: options.pixel_ratio,
            viewport: Rect::new(0, 0, options.width as i32, options.height as i32),
            scissor: Rect::new(0, 0, options.width as i32, options.height as i32),
            scissor_test: false,
            clear_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            is_context_lost: false,
            render_depth: 0,
            current_render_target: None,
            current_cube_face: 0,
            current_mip_level: 0,
            current_camera_id: None,
            rendering_shadows: false,
            transmission_texture: None,
            logarithmic_depth_buffer: options.logarithmic_depth_buffer,
            reversed_depth_buffer: options.reversed_depth_buffer,
            ids,
            material_props: FxHashMap::default(),
            known_geometries: FxHashSet::default(),
            before_render_hooks: FxHashMap::default(),
            animation_loop: None,
            context,
        };
        renderer
            .state
            .depth_buffer
            .set_reversed(&renderer.context, options.reversed_depth_buffer);
        renderer.apply_default_viewport();
        renderer
    }

    /// The underlying context (inspection, recording backends).
    pub fn context(&self) -> &C {
        &self.context
    }

    /// The renderer's id allocator; clone it to build caller-owned
    /// resources in the same id space.
    #[must_use]
    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    // ── Size, viewport, scissor ──────────────────────────────────────────────

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.viewport = Rect::new(0, 0, width as i32, height as i32);
        self.scissor = Rect::new(0, 0, width as i32, height as i32);
        if self.current_render_target.is_none() {
            self.apply_default_viewport();
        }
    }

    pub fn set_pixel_ratio(&mut self, ratio: f32) {
        self.pixel_ratio = ratio;
        let (width, height) = (self.width, self.height);
        self.set_size(width, height);
    }

    #[must_use]
    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    /// Physical framebuffer size (`size × pixel ratio`).
    #[must_use]
    pub fn drawing_buffer_size(&self) -> (u32, u32) {
        (
            (self.width as f32 * self.pixel_ratio) as u32,
            (self.height as f32 * self.pixel_ratio) as u32,
        )
    }

    pub fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.viewport = Rect::new(x, y, width, height);
        if self.current_render_target.is_none() {
            self.apply_default_viewport();
        }
    }

    pub fn set_scissor(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.scissor = Rect::new(x, y, width, height);
        if self.current_render_target.is_none() {
            self.apply_default_viewport();
        }
    }

    pub fn set_scissor_test(&mut self, enabled: bool) {
        self.scissor_test = enabled;
        self.state.set_scissor_test(&self.context, enabled);
    }

    fn apply_default_viewport(&mut self) {
        let r = self.pixel_ratio;
        let vp = self.viewport;
        self.state.set_viewport(
            &self.context,
            [
                (vp.x as f32 * r) as i32,
                (vp.y as f32 * r) as i32,
                (vp.width as f32 * r) as i32,
                (vp.height as f32 * r) as i32,
            ],
        );
        let sc = self.scissor;
        self.state.set_scissor(
            &self.context,
            [
                (sc.x as f32 * r) as i32,
                (sc.y as f32 * r) as i32,
                (sc.width as f32 * r) as i32,
                (sc.height as f32 * r) as i32,
            ],
        );
    }

    // ── Clear ────────────────────────────────────────────────────────────────

    pub fn set_clear_color(&mut self, color: Vec4) {
        self.clear_color = color;
    }

    #[must_use]
    pub fn clear_color(&self) -> Vec4 {
        self.clear_color
    }

    pub fn set_clear_alpha(&mut self, alpha: f32) {
        self.clear_color.w = alpha;
    }

    #[must_use]
    pub fn clear_alpha(&self) -> f32 {
        self.clear_color.w
    }

    /// Clears the bound target. Integer color targets dispatch to the
    /// integer clear entry points with the matching packing.
    pub fn clear(&mut self, color: bool, depth: bool, stencil: bool) {
        let mut mask = 0u32;
        if color {
            let integer_format = self.current_render_target.as_ref().map(|t| {
                let tex = t.borrow().textures[0].clone();
                let tex = tex.borrow();
                (tex.format, tex.texel_type)
            });
            match integer_format {
                Some((
                    TextureFormat::RgbaInteger
                    | TextureFormat::RgbInteger
                    | TextureFormat::RgInteger
                    | TextureFormat::RedInteger,
                    ty,
                )) => {
                    let c = self.clear_color;
                    if matches!(ty, TextureType::UnsignedByte | TextureType::UnsignedShort | TextureType::UnsignedInt) {
                        self.context.clear_buffer_uiv(
                            gl::COLOR,
                            0,
                            &[c.x as u32, c.y as u32, c.z as u32, c.w as u32],
                        );
                    } else {
                        self.context.clear_buffer_iv(
                            gl::COLOR,
                            0,
                            &[c.x as i32, c.y as i32, c.z as i32, c.w as i32],
                        );
                    }
                }
                _ => {
                    let c = self.clear_color;
                    self.state
                        .color_buffer
                        .set_clear(&self.context, c.x, c.y, c.z, c.w);
                    mask |= gl::COLOR_BUFFER_BIT;
                }
            }
        }
        if depth {
            self.state.depth_buffer.set_clear(&self.context, 1.0);
            mask |= gl::DEPTH_BUFFER_BIT;
        }
        if stencil {
            self.state.stencil_buffer.set_clear(&self.context, 0);
            mask |= gl::STENCIL_BUFFER_BIT;
        }
        if mask != 0 {
            self.context.clear(mask);
        }
    }

    pub fn clear_color_buffer(&mut self) {
        self.clear(true, false, false);
    }

    pub fn clear_depth_buffer(&mut self) {
        self.clear(false, true, false);
    }

    pub fn clear_stencil_buffer(&mut self) {
        self.clear(false, false, true);
    }

    // ── Render target management ─────────────────────────────────────────────

    /// Binds `target` (or the default framebuffer for `None`) and applies
    /// its viewport/scissor.
    pub fn set_render_target(
        &mut self,
        target: Option<SharedRenderTarget>,
        active_cube_face: u32,
        active_mip_level: i32,
    ) -> Result<()> {
        self.current_render_target = target.clone();
        self.current_cube_face = active_cube_face;
        self.current_mip_level = active_mip_level;

        match target {
            Some(target) => {
                let target_ref = target.borrow();
                self.textures
                    .setup_render_target(&self.context, &mut self.state, &target_ref)?;
                let framebuffer = self.textures.framebuffer_for(
                    &self.context,
                    &mut self.state,
                    &target_ref,
                    active_cube_face,
                    active_mip_level,
                );
                self.state
                    .bind_framebuffer(&self.context, gl::FRAMEBUFFER, framebuffer);

                let buffers: SmallVec<[u32; 4]> = (0..target_ref.textures.len() as u32)
                    .map(|i| gl::COLOR_ATTACHMENT0 + i)
                    .collect();
                self.state
                    .set_draw_buffers(&self.context, target_ref.id(), &buffers);

                let vp = target_ref.viewport;
                self.state
                    .set_viewport(&self.context, [vp.x, vp.y, vp.width, vp.height]);
                let sc = target_ref.scissor;
                self.state
                    .set_scissor(&self.context, [sc.x, sc.y, sc.width, sc.height]);
            }
            None => {
                self.state
                    .bind_framebuffer(&self.context, gl::FRAMEBUFFER, None);
                self.state.set_draw_buffers(&self.context, 0, &[gl::BACK]);
                self.apply_default_viewport();
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn render_target(&self) -> Option<SharedRenderTarget> {
        self.current_render_target.clone()
    }

    /// Allocates a target's GPU objects without binding it for rendering.
    pub fn init_render_target(&mut self, target: &SharedRenderTarget) -> Result<()> {
        self.textures
            .setup_render_target(&self.context, &mut self.state, &target.borrow())
    }

    // ── Pixel transfer ───────────────────────────────────────────────────────

    /// Synchronous readback from a render target.
    pub fn read_render_target_pixels(
        &mut self,
        target: &SharedRenderTarget,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        out: &mut [u8],
        cube_face: u32,
    ) -> Result<()> {
        let target_ref = target.borrow();
        if x < 0
            || y < 0
            || x as u32 + width.max(0) as u32 > target_ref.width
            || y as u32 + height.max(0) as u32 > target_ref.height
        {
            log::error!("readRenderTargetPixels: read region out of bounds");
            return Err(RenderError::InvalidReadBounds {
                x,
                y,
                width,
                height,
            });
        }
        self.textures
            .setup_render_target(&self.context, &mut self.state, &target_ref)?;
        let framebuffer =
            self.textures
                .framebuffer_for(&self.context, &mut self.state, &target_ref, cube_face, 0);
        let previous = self.state.bound_framebuffer(gl::FRAMEBUFFER);
        self.state
            .bind_framebuffer(&self.context, gl::READ_FRAMEBUFFER, framebuffer);

        let texture = target_ref.textures[0].borrow();
        self.context.read_pixels(
            x,
            y,
            width,
            height,
            format::gl_format(texture.format),
            format::gl_type(texture.texel_type),
            out,
        );
        self.state
            .bind_framebuffer(&self.context, gl::READ_FRAMEBUFFER, previous);
        Ok(())
    }

    /// Asynchronous readback: `readPixels` into a pixel-pack buffer fenced
    /// by a sync object; poll the returned task.
    pub fn read_render_target_pixels_async(
        &mut self,
        target: &SharedRenderTarget,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        byte_len: usize,
        cube_face: u32,
    ) -> Result<ReadPixelsTask> {
        let target_ref = target.borrow();
        if x < 0
            || y < 0
            || x as u32 + width.max(0) as u32 > target_ref.width
            || y as u32 + height.max(0) as u32 > target_ref.height
        {
            log::error!("readRenderTargetPixelsAsync: read region out of bounds");
            return Err(RenderError::InvalidReadBounds {
                x,
                y,
                width,
                height,
            });
        }
        self.textures
            .setup_render_target(&self.context, &mut self.state, &target_ref)?;
        let framebuffer =
            self.textures
                .framebuffer_for(&self.context, &mut self.state, &target_ref, cube_face, 0);
        self.state
            .bind_framebuffer(&self.context, gl::READ_FRAMEBUFFER, framebuffer);

        let buffer = self.context.create_buffer();
        self.context.bind_buffer(gl::PIXEL_PACK_BUFFER, Some(buffer));
        self.context
            .buffer_data_size(gl::PIXEL_PACK_BUFFER, byte_len, gl::STREAM_READ);
        let texture = target_ref.textures[0].borrow();
        self.context.read_pixels_to_buffer(
            x,
            y,
            width,
            height,
            format::gl_format(texture.format),
            format::gl_type(texture.texel_type),
            0,
        );
        self.context.bind_buffer(gl::PIXEL_PACK_BUFFER, None);
        let sync = self.context.fence_sync();
        self.context.flush();
        Ok(ReadPixelsTask::new(buffer, sync, byte_len))
    }

    /// Copies the bound framebuffer into `texture` at `level`.
    pub fn copy_framebuffer_to_texture(
        &mut self,
        texture: &SharedTexture,
        position: (i32, i32),
        level: i32,
    ) -> Result<()> {
        let mut tex = texture.borrow_mut();
        let handle = self
            .textures
            .upload(&self.context, &mut self.state, &mut tex, 0)?;
        self.state
            .bind_texture(&self.context, gl::TEXTURE_2D, Some(handle), None);
        self.context.copy_tex_sub_image_2d(
            gl::TEXTURE_2D,
            level,
            0,
            0,
            position.0,
            position.1,
            tex.source.width() as i32,
            tex.source.height() as i32,
        );
        Ok(())
    }

    /// Copies between two textures through a scratch framebuffer.
    pub fn copy_texture_to_texture(
        &mut self,
        src: &SharedTexture,
        dst: &SharedTexture,
        dst_position: (i32, i32),
        src_level: i32,
        dst_level: i32,
    ) -> Result<()> {
        let src_handle = {
            let mut tex = src.borrow_mut();
            self.textures
                .upload(&self.context, &mut self.state, &mut tex, 0)?
        };
        let (dst_handle, width, height) = {
            let mut tex = dst.borrow_mut();
            let handle = self
                .textures
                .upload(&self.context, &mut self.state, &mut tex, 0)?;
            (handle, tex.source.width() as i32, tex.source.height() as i32)
        };

        let scratch = self.context.create_framebuffer();
        let previous = self.state.bound_framebuffer(gl::READ_FRAMEBUFFER);
        self.state
            .bind_framebuffer(&self.context, gl::READ_FRAMEBUFFER, Some(scratch));
        self.context.framebuffer_texture_2d(
            gl::READ_FRAMEBUFFER,
            gl::COLOR_ATTACHMENT0,
            gl::TEXTURE_2D,
            src_handle,
            src_level,
        );
        self.state
            .bind_texture(&self.context, gl::TEXTURE_2D, Some(dst_handle), None);
        self.context.copy_tex_sub_image_2d(
            gl::TEXTURE_2D,
            dst_level,
            dst_position.0,
            dst_position.1,
            0,
            0,
            width,
            height,
        );
        self.state
            .bind_framebuffer(&self.context, gl::READ_FRAMEBUFFER, previous);
        self.context.delete_framebuffer(scratch);
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    pub fn set_animation_loop(&mut self, callback: Option<AnimationLoop<C>>) {
        self.animation_loop = callback;
    }

    /// Drives the animation loop callback once. The host event loop calls
    /// this per display refresh.
    pub fn run_animation_frame(&mut self, time: f64) {
        if let Some(mut callback) = self.animation_loop.take() {
            callback(self, time);
            if self.animation_loop.is_none() {
                self.animation_loop = Some(callback);
            }
        }
    }

    /// Simulates context loss: `render` becomes a no-op.
    pub fn force_context_loss(&mut self) {
        self.is_context_lost = true;
        log::warn!("context lost");
    }

    /// Restores the context: device-side state is rebuilt; caller resources
    /// re-upload lazily through their version counters.
    pub fn force_context_restore(&mut self) {
        self.is_context_lost = false;
        self.reset_state();
        self.textures.dispose_all(&self.context);
        self.attributes.dispose_all(&self.context);
        self.binding_states.dispose_all(&self.context);
        self.programs.dispose_all(&self.context);
        self.material_props.clear();
        self.known_geometries.clear();
        self.info.memory.geometries = 0;
        self.info.memory.textures = 0;
        log::info!("context restored");
    }

    #[must_use]
    pub fn is_context_lost(&self) -> bool {
        self.is_context_lost
    }

    /// Forgets all mirrored device state (external GL interop).
    pub fn reset_state(&mut self) {
        self.state.reset();
        self.binding_states.reset(&self.context);
        self.current_render_target = None;
        self.current_camera_id = None;
    }

    /// Releases every GPU object owned by the renderer.
    pub fn dispose(&mut self) {
        for target in self.transmission.drain_targets() {
            self.textures
                .dispose_render_target(&self.context, &mut self.state, &target.borrow());
        }
        for target in self.shadow_map.drain_targets() {
            self.textures
                .dispose_render_target(&self.context, &mut self.state, &target.borrow());
        }
        self.textures.dispose_all(&self.context);
        self.attributes.dispose_all(&self.context);
        self.binding_states.dispose_all(&self.context);
        self.programs.dispose_all(&self.context);
        self.render_lists.clear();
        self.render_states.clear();
        self.material_props.clear();
        self.known_geometries.clear();
    }

    // ── Resource disposal hooks ──────────────────────────────────────────────

    pub fn dispose_texture(&mut self, texture: &SharedTexture) {
        let id = texture.borrow().id();
        self.textures
            .dispose_texture(&self.context, &mut self.state, id);
        self.info.memory.textures = self.textures.texture_count();
    }

    pub fn dispose_render_target_resource(&mut self, target: &SharedRenderTarget) {
        self.textures
            .dispose_render_target(&self.context, &mut self.state, &target.borrow());
        self.info.memory.textures = self.textures.texture_count();
    }

    pub fn dispose_geometry(&mut self, geometry: &crate::resources::SharedGeometry) {
        let geometry_ref = geometry.borrow();
        self.binding_states
            .dispose_geometry(&self.context, &mut self.attributes, geometry_ref.id());
        for attribute in geometry_ref.attributes.values() {
            self.attributes.dispose(&self.context, attribute.id());
        }
        if let Some(index) = &geometry_ref.index {
            self.attributes.dispose(&self.context, index.id());
        }
        if self.known_geometries.remove(&geometry_ref.id()) {
            self.info.memory.geometries = self.known_geometries.len();
        }
    }

    pub fn dispose_material(&mut self, material: &crate::resources::SharedMaterial) {
        let id = material.borrow().id();
        if let Some(props) = self.material_props.remove(&id) {
            if let Some(program) = props.program {
                self.programs.release(&self.context, &program);
                self.binding_states.dispose_program(&self.context, program.id);
            }
        }
        self.programs.release_material_shaders(id);
        self.info.programs = self.programs.len();
    }

    /// Disposal hook for a light: reclaims its shadow map target.
    pub fn dispose_light(&mut self, light_id: u64) {
        if let Some(target) = self.shadow_map.forget_light(light_id) {
            self.textures
                .dispose_render_target(&self.context, &mut self.state, &target.borrow());
        }
    }

    /// Disposal hook for a camera: reclaims its transmission target.
    pub fn dispose_camera(&mut self, camera_id: u64) {
        if let Some(target) = self.transmission.forget_camera(camera_id) {
            self.textures
                .dispose_render_target(&self.context, &mut self.state, &target.borrow());
        }
    }

    // ── Hooks ────────────────────────────────────────────────────────────────

    /// Registers a hook run right before `object_id` draws. The hook may
    /// reentrantly call [`Renderer::render`].
    pub fn set_before_render_hook(&mut self, object_id: u64, hook: RenderHook<C>) {
        self.before_render_hooks.insert(object_id, hook);
    }

    pub fn clear_before_render_hook(&mut self, object_id: u64) {
        self.before_render_hooks.remove(&object_id);
    }

    // ── Compilation ──────────────────────────────────────────────────────────

    /// Synchronously links every program the scene/camera pair needs.
    pub fn compile(&mut self, scene: &mut Scene, camera: &Camera) -> Vec<Rc<GlProgram>> {
        let collected = self.collect_programs(scene, camera);
        self.info.programs = self.programs.len();
        collected
    }

    /// Starts an asynchronous compile; poll the returned task until ready.
    pub fn compile_async(&mut self, scene: &mut Scene, camera: &Camera) -> CompileTask {
        let programs = self.collect_programs(scene, camera);
        CompileTask::new(programs, self.capabilities.parallel_shader_compile)
    }

    fn collect_programs(&mut self, scene: &mut Scene, camera: &Camera) -> Vec<Rc<GlProgram>> {
        if scene.matrix_world_auto_update {
            scene.root.update_world_matrix(&Affine3A::IDENTITY);
        }
        let scene_id = scene.id();
        let mut render_state = self.render_states.take(scene_id, self.render_depth);
        render_state.init();

        let mut lights: Vec<LightRecord> = Vec::new();
        scene.root.traverse(&mut |node| {
            if let NodeKind::Light(light) = &node.kind {
                lights.push(LightRecord {
                    id: light.id(),
                    color: light.color,
                    intensity: light.intensity,
                    kind: light.kind.clone(),
                    world: node.matrix_world,
                    cast_shadow: light.casts_shadow(),
                });
            }
        });
        render_state.lights.setup(lights);

        let scene_data = SceneData {
            id: scene_id,
            fog: scene.fog,
            background_intensity: scene.background_intensity,
            background_rotation: scene.background_rotation,
        };

        let mut programs = Vec::new();
        let mut meshes: Vec<(crate::resources::SharedMaterial, crate::resources::SharedGeometry)> =
            Vec::new();
        scene.root.traverse(&mut |node| {
            if let NodeKind::Mesh(mesh) = &node.kind {
                for material in &mesh.materials {
                    meshes.push((Rc::clone(material), Rc::clone(&mesh.geometry)));
                }
            }
        });
        let _ = camera;
        for (material, geometry) in meshes {
            let material_ref = material.borrow();
            let geometry_ref = geometry.borrow();
            let opaque = !material_ref.transparent && !material_ref.is_transmissive();
            let inputs = self.derivation_inputs(&scene_data, &render_state.lights, false, false, false, 0, opaque);
            let parameters = self
                .programs
                .get_parameters(&material_ref, &geometry_ref, &inputs);
            let key = ProgramCache::cache_key(&parameters);
            let program = self
                .programs
                .acquire(&self.context, &material_ref, &parameters, &key);
            programs.push(program);
        }

        self.render_states.put_back(scene_id, self.render_depth, render_state);
        programs
    }

    fn derivation_inputs<'a>(
        &self,
        scene_data: &'a SceneData,
        lights: &'a LightsState,
        instancing: bool,
        instancing_color: bool,
        skinning: bool,
        morphs: usize,
        opaque_pass: bool,
    ) -> DerivationInputs<'a> {
        DerivationInputs {
            lights: lights.counts(),
            shadow_map_enabled: self.shadow_map.enabled && !self.rendering_shadows,
            shadow_map_type: self.shadow_map.shadow_type,
            fog: scene_data.fog.as_ref(),
            output_color_space: if self.current_render_target.is_some() {
                ColorSpace::Linear
            } else {
                self.output_color_space
            },
            tone_mapping: self.tone_mapping,
            num_clipping_planes: self.clipping.num_planes,
            num_clip_intersection: self.clipping.num_intersection,
            reversed_depth: self.reversed_depth_buffer,
            logarithmic_depth: self.logarithmic_depth_buffer,
            supports_vertex_textures: self.capabilities.supports_vertex_textures,
            instancing,
            instancing_color,
            instancing_morph: instancing && morphs > 0,
            skinning,
            opaque_pass,
        }
    }

    // ── Frame rendering ──────────────────────────────────────────────────────

    /// Renders one frame of `scene` through `camera` into the current
    /// render target.
    pub fn render(&mut self, scene: &mut Scene, camera: &Camera) -> Result<()> {
        // 1. lost context short-circuits the frame
        if self.is_context_lost {
            return Ok(());
        }

        // 2-3. world matrices and camera derivations
        if scene.matrix_world_auto_update {
            scene.root.update_world_matrix(&Affine3A::IDENTITY);
        }
        let camera_state = CameraState::of(camera);
        let proj_view = camera_state.projection * camera_state.view;

        let scene_data = SceneData {
            id: scene.id(),
            fog: scene.fog,
            background_intensity: scene.background_intensity,
            background_rotation: scene.background_rotation,
        };
        let background_action = BackgroundPass::resolve(scene);

        // 4. per-(scene, depth) list and state
        let depth = self.render_depth;
        self.render_depth += 1;
        let previous_target = self.current_render_target.clone();
        let previous_cube_face = self.current_cube_face;
        let previous_mip = self.current_mip_level;
        let previous_transmission = self.transmission_texture.take();

        let mut list = self.render_lists.take(scene_data.id, depth);
        let mut render_state = self.render_states.take(scene_data.id, depth);
        list.init();
        render_state.init();

        if depth == 0 {
            if self.info.auto_reset {
                self.info.reset();
            }
            self.info.render.frame += 1;
        }

        // 5. frustum honoring reversed depth
        let frustum = Frustum::from_projection(proj_view, self.reversed_depth_buffer);

        // 6. clipping
        self.clipping.init(
            &self.clipping_planes,
            self.local_clipping_enabled,
            &camera_state.view,
        );

        // 7. traverse: cull, bucket, collect lights
        Self::project_object(
            &scene.root,
            camera.layers,
            &proj_view,
            &frustum,
            &mut list,
            &mut render_state,
        );

        // 8. sort
        if self.sort_objects {
            list.sort();
        }

        // 9. shadow maps
        render_state.setup_lights();
        let casters = render_state.lights.shadow_casters();
        if self.shadow_map.enabled && (self.shadow_map.auto_update || self.shadow_map.needs_update)
        {
            self.render_shadow_maps(&casters, &scene_data, &list, &mut render_state.lights)?;
            self.shadow_map.needs_update = false;
        }

        // 10. light uniforms for this view
        render_state.lights.setup_view(&camera_state.view);

        // 11. background (clear + optional sky draw)
        self.render_background(&background_action, &scene_data, &camera_state)?;

        // 12. transmission pre-pass
        if !list.transmissive.is_empty() {
            self.render_transmission_pass(&list, &scene_data, camera, &camera_state, &render_state)?;
        }

        // 13. buckets in fixed order
        self.render_objects(&list.opaque, &scene_data, camera, &camera_state, &render_state, true)?;
        self.render_objects(
            &list.transmissive,
            &scene_data,
            camera,
            &camera_state,
            &render_state,
            false,
        )?;
        self.render_objects(
            &list.transparent,
            &scene_data,
            camera,
            &camera_state,
            &render_state,
            false,
        )?;

        // 14. resolve + mipmaps on the bound target
        if let Some(target) = self.current_render_target.clone() {
            if self.current_mip_level == 0 {
                let target_ref = target.borrow();
                self.textures
                    .resolve_multisample(&self.context, &mut self.state, &target_ref);
                self.textures
                    .update_render_target_mipmaps(&self.context, &mut self.state, &target_ref);
            }
        }

        // 15. pop: return pooled structures, restore bindings
        self.render_lists.put_back(scene_data.id, depth, list);
        self.render_states.put_back(scene_data.id, depth, render_state);
        self.render_depth -= 1;
        self.transmission_texture = previous_transmission;
        self.set_render_target(previous_target, previous_cube_face, previous_mip)?;

        // generic buffers stay writable for the next frame's clears
        self.state.depth_buffer.set_mask(&self.context, true);
        self.state.color_buffer.set_mask(&self.context, true);
        self.info.programs = self.programs.len();
        self.info.memory.textures = self.textures.texture_count();
        Ok(())
    }

    /// Traversal step: frustum-cull and bucket one node, recursing into
    /// children. Lights are collected into the render state.
    fn project_object(
        node: &Node,
        camera_layers: Layers,
        proj_view: &Mat4,
        frustum: &Frustum,
        list: &mut RenderList,
        render_state: &mut RenderState,
    ) {
        if !node.visible {
            return;
        }

        if node.layers.test(camera_layers) {
            match &node.kind {
                NodeKind::Light(light) => {
                    render_state.push_light(LightRecord {
                        id: light.id(),
                        color: light.color,
                        intensity: light.intensity,
                        kind: light.kind.clone(),
                        world: node.matrix_world,
                        cast_shadow: light.casts_shadow(),
                    });
                }
                NodeKind::Mesh(mesh) => {
                    let (center, radius) = mesh.geometry.borrow_mut().bounding_sphere();
                    let world = node.matrix_world;
                    let center_world = world.transform_point3(center);
                    let scale = world.matrix3.x_axis.length().max(
                        world
                            .matrix3
                            .y_axis
                            .length()
                            .max(world.matrix3.z_axis.length()),
                    );
                    let visible = !mesh.frustum_culled
                        || frustum.intersects_sphere(center_world, radius * scale);

                    if visible {
                        let projected = *proj_view * center_world.extend(1.0);
                        let z = if projected.w.abs() > 1e-9 {
                            projected.z / projected.w
                        } else {
                            projected.z
                        };

                        let snapshot = ObjectSnapshot {
                            id: node.id(),
                            world,
                            draw_mode: mesh.draw_mode,
                            instance_count: mesh.instance_count,
                            receive_shadow: mesh.receive_shadow,
                            cast_shadow: mesh.cast_shadow,
                            skinned: mesh.skin.is_some(),
                            bone_texture: mesh.skin.as_ref().map(|s| Rc::clone(&s.bone_texture)),
                            morph_influences: mesh.morph_influences.clone(),
                        };

                        let groups = mesh.geometry.borrow().groups.clone();
                        if mesh.materials.len() > 1 && !groups.is_empty() {
                            for group in groups {
                                let material = mesh.material_for_group(group.material_index);
                                list.push(RenderItem {
                                    object: snapshot.clone(),
                                    geometry: Rc::clone(&mesh.geometry),
                                    material_id: material.borrow().id(),
                                    material: Rc::clone(material),
                                    group: Some(group),
                                    group_order: mesh.render_order,
                                    z,
                                });
                            }
                        } else {
                            list.push(RenderItem {
                                object: snapshot,
                                geometry: Rc::clone(&mesh.geometry),
                                material_id: mesh.materials[0].borrow().id(),
                                material: Rc::clone(&mesh.materials[0]),
                                group: None,
                                group_order: mesh.render_order,
                                z,
                            });
                        }
                    }
                }
                NodeKind::Group => {}
            }
        }

        for child in &node.children {
            Self::project_object(child, camera_layers, proj_view, frustum, list, render_state);
        }
    }

    // ── Passes ───────────────────────────────────────────────────────────────

    fn render_background(
        &mut self,
        action: &BackgroundAction,
        scene_data: &SceneData,
        camera_state: &CameraState,
    ) -> Result<()> {
        match action {
            BackgroundAction::ClearDefault => {
                if self.auto_clear {
                    self.clear(
                        self.auto_clear_color,
                        self.auto_clear_depth,
                        self.auto_clear_stencil,
                    );
                }
            }
            BackgroundAction::ClearColor(color) => {
                let saved = self.clear_color;
                self.clear_color = *color;
                if self.auto_clear {
                    self.clear(
                        self.auto_clear_color,
                        self.auto_clear_depth,
                        self.auto_clear_stencil,
                    );
                }
                self.clear_color = saved;
            }
            BackgroundAction::DrawCube(texture) => {
                if self.auto_clear {
                    self.clear(
                        self.auto_clear_color,
                        self.auto_clear_depth,
                        self.auto_clear_stencil,
                    );
                }
                let (geometry, material) = self.background.box_mesh(&self.ids);
                material.borrow_mut().env_map = Some(Rc::clone(texture));
                let snapshot = Self::background_snapshot(camera_state);
                let material_id = material.borrow().id();
                let item = RenderItem {
                    object: snapshot,
                    material_id,
                    geometry,
                    material,
                    group: None,
                    group_order: 0,
                    z: 0.0,
                };
                let empty_lights = LightsState::new();
                if let Err(error) =
                    self.render_buffer_direct(&item, scene_data, camera_state, &empty_lights, false)
                {
                    self.warnings.warn(&format!("background draw skipped: {error}"));
                }
            }
            BackgroundAction::DrawPlane(texture) => {
                if self.auto_clear {
                    self.clear(
                        self.auto_clear_color,
                        self.auto_clear_depth,
                        self.auto_clear_stencil,
                    );
                }
                let (geometry, material) = self.background.plane_mesh(&self.ids);
                material.borrow_mut().map = Some(Rc::clone(texture));
                let snapshot = Self::background_snapshot(camera_state);
                let material_id = material.borrow().id();
                let item = RenderItem {
                    object: snapshot,
                    material_id,
                    geometry,
                    material,
                    group: None,
                    group_order: 0,
                    z: 0.0,
                };
                let empty_lights = LightsState::new();
                if let Err(error) =
                    self.render_buffer_direct(&item, scene_data, camera_state, &empty_lights, false)
                {
                    self.warnings.warn(&format!("background draw skipped: {error}"));
                }
            }
        }
        Ok(())
    }

    /// Background meshes follow the viewer: model matrix is the camera's
    /// world position.
    fn background_snapshot(camera_state: &CameraState) -> ObjectSnapshot {
        ObjectSnapshot {
            id: 0,
            world: Affine3A::from_translation(camera_state.position),
            draw_mode: DrawMode::Triangles,
            instance_count: None,
            receive_shadow: false,
            cast_shadow: false,
            skinned: false,
            bone_texture: None,
            morph_influences: SmallVec::new(),
        }
    }

    fn render_shadow_maps(
        &mut self,
        casters: &[LightRecord],
        scene_data: &SceneData,
        list: &RenderList,
        lights: &mut LightsState,
    ) -> Result<()> {
        if casters.is_empty() {
            return Ok(());
        }
        self.rendering_shadows = true;
        let previous_target = self.current_render_target.clone();
        let previous_cube_face = self.current_cube_face;
        let previous_mip = self.current_mip_level;

        let mut dir_index = 0;
        let mut spot_index = 0;
        let mut point_index = 0;

        for light in casters {
            let shadow = match &light.kind {
                crate::scene::light::LightKind::Directional { shadow, .. }
                | crate::scene::light::LightKind::Spot { shadow, .. }
                | crate::scene::light::LightKind::Point { shadow, .. } => shadow.clone(),
                _ => continue,
            };

            let is_point = matches!(light.kind, crate::scene::light::LightKind::Point { .. });
            let target = self
                .shadow_map
                .target_for(&self.ids, light.id, &shadow, is_point);
            let faces = if is_point { 6 } else { 1 };

            for face in 0..faces {
                self.set_render_target(Some(Rc::clone(&target)), face as u32, 0)?;
                if face == 0 {
                    self.clear(true, true, false);
                }
                if is_point {
                    // one face tile of the 4×2 grid
                    let viewport = shadow_map::point_face_viewport(face, shadow.map_size);
                    self.state.set_viewport(&self.context, viewport);
                }

                let projection = shadow_map::shadow_projection(&light.kind, &shadow);
                let view = shadow_map::shadow_view(&light.kind, &light.world, face);
                let shadow_camera = CameraState {
                    id: light.id.wrapping_mul(8).wrapping_add(face as u64 + 1),
                    projection,
                    view,
                    position: Vec3::from(light.world.translation),
                    orthographic: matches!(
                        light.kind,
                        crate::scene::light::LightKind::Directional { .. }
                    ),
                };
                let shadow_frustum =
                    Frustum::from_projection(projection * view, false);
                let override_material = self.shadow_map.override_material(&light.kind);

                for bucket in [&list.opaque, &list.transmissive, &list.transparent] {
                    for item in bucket.iter().filter(|i| i.object.cast_shadow) {
                        let (center, radius) = item.geometry.borrow_mut().bounding_sphere();
                        let center_world = item.object.world.transform_point3(center);
                        if !shadow_frustum.intersects_sphere(center_world, radius) {
                            continue;
                        }
                        // clipping is disabled for shadow draws unless the
                        // material opts in
                        let clip_shadows = item.material.borrow().clip_shadows;
                        let mut shadow_material = override_material.clone();
                        shadow_material.clip_shadows = clip_shadows;
                        shadow_material.side = item.material.borrow().effective_shadow_side();

                        let shadow_item = RenderItem {
                            object: item.object.clone(),
                            geometry: Rc::clone(&item.geometry),
                            material_id: shadow_material.id(),
                            material: Rc::new(std::cell::RefCell::new(shadow_material)),
                            group: item.group,
                            group_order: item.group_order,
                            z: item.z,
                        };
                        let empty_lights = LightsState::new();
                        if let Err(error) = self.render_buffer_direct(
                            &shadow_item,
                            scene_data,
                            &shadow_camera,
                            &empty_lights,
                            false,
                        ) {
                            self.warnings.warn(&format!("shadow draw skipped: {error}"));
                        }
                    }
                }

                // wire the rendered map into the lights state
                if face + 1 == faces {
                    let depth_texture = target.borrow().depth_texture.clone();
                    if let Some(depth_texture) = depth_texture {
                        depth_texture.borrow_mut().needs_update();
                        let mut tex = depth_texture.borrow_mut();
                        let handle = self
                            .textures
                            .upload(&self.context, &mut self.state, &mut tex, 0)
                            .ok();
                        let matrix = shadow_map::shadow_matrix(projection, view);
                        match &light.kind {
                            crate::scene::light::LightKind::Directional { .. } => {
                                if dir_index < lights.directional_shadow_map.len() {
                                    lights.directional_shadow_map[dir_index] = handle;
                                    lights.directional_shadow_matrix[dir_index] = matrix;
                                }
                                dir_index += 1;
                            }
                            crate::scene::light::LightKind::Spot { .. } => {
                                if spot_index < lights.spot_shadow_map.len() {
                                    lights.spot_shadow_map[spot_index] = handle;
                                    lights.spot_shadow_matrix[spot_index] = matrix;
                                }
                                spot_index += 1;
                            }
                            crate::scene::light::LightKind::Point { .. } => {
                                if point_index < lights.point_shadow_map.len() {
                                    lights.point_shadow_map[point_index] = handle;
                                }
                                point_index += 1;
                            }
                            _ => {}
                        }
                    }
                }
            }
        }

        self.rendering_shadows = false;
        self.set_render_target(previous_target, previous_cube_face, previous_mip)?;
        Ok(())
    }

    fn render_transmission_pass(
        &mut self,
        list: &RenderList,
        scene_data: &SceneData,
        camera: &Camera,
        camera_state: &CameraState,
        render_state: &RenderState,
    ) -> Result<()> {
        let (buffer_width, buffer_height) = self.drawing_buffer_size();
        let target = self.transmission.target_for(
            &self.ids,
            camera.id(),
            (buffer_width, buffer_height),
            self.transmission_resolution_scale,
            &self.capabilities,
        );

        let previous_target = self.current_render_target.clone();
        let previous_cube_face = self.current_cube_face;
        let previous_mip = self.current_mip_level;
        let saved_clear = self.clear_color;
        let saved_tone_mapping = self.tone_mapping;

        self.set_render_target(Some(Rc::clone(&target)), 0, 0)?;
        self.clear_color = Vec4::ZERO;
        self.clear(true, true, true);
        // tone mapping is applied by the final pass, not the capture
        self.tone_mapping = ToneMapping::None;

        self.render_objects(&list.opaque, scene_data, camera, camera_state, render_state, true)?;

        // double-sided opaque objects contribute their back faces too
        for item in list
            .opaque
            .iter()
            .filter(|i| i.material.borrow().side == Side::Double)
        {
            {
                let mut material = item.material.borrow_mut();
                material.side = Side::Back;
                material.needs_update();
            }
            if let Err(error) =
                self.render_buffer_direct(item, scene_data, camera_state, &render_state.lights, true)
            {
                self.warnings.warn(&format!("transmission back-face draw skipped: {error}"));
            }
            let mut material = item.material.borrow_mut();
            material.side = Side::Double;
            material.needs_update();
        }

        {
            let target_ref = target.borrow();
            self.textures
                .resolve_multisample(&self.context, &mut self.state, &target_ref);
            self.textures
                .update_render_target_mipmaps(&self.context, &mut self.state, &target_ref);
        }

        self.tone_mapping = saved_tone_mapping;
        self.clear_color = saved_clear;
        self.set_render_target(previous_target, previous_cube_face, previous_mip)?;

        self.transmission_texture = Some(Rc::clone(target.borrow().texture()));
        Ok(())
    }

    fn render_objects(
        &mut self,
        items: &[RenderItem],
        scene_data: &SceneData,
        camera: &Camera,
        camera_state: &CameraState,
        render_state: &RenderState,
        opaque_pass: bool,
    ) -> Result<()> {
        for item in items {
            // before-render hooks may reentrantly call `render`
            if let Some(hook) = self.before_render_hooks.remove(&item.object.id) {
                hook(self);
                self.before_render_hooks.insert(item.object.id, hook);
            }

            if camera.sub_cameras.is_empty() {
                self.render_item(item, scene_data, camera_state, render_state, opaque_pass);
            } else {
                // array camera: draw per sub-camera viewport
                for sub_camera in &camera.sub_cameras {
                    if let Some(vp) = sub_camera.viewport {
                        self.state
                            .set_viewport(&self.context, [vp.x, vp.y, vp.width, vp.height]);
                    }
                    let sub_state = CameraState::of(sub_camera);
                    self.render_item(item, scene_data, &sub_state, render_state, opaque_pass);
                }
            }
        }
        Ok(())
    }

    fn render_item(
        &mut self,
        item: &RenderItem,
        scene_data: &SceneData,
        camera_state: &CameraState,
        render_state: &RenderState,
        opaque_pass: bool,
    ) {
        let (double_sided, transparent, force_single) = {
            let material = item.material.borrow();
            (
                material.side == Side::Double,
                material.transparent,
                material.force_single_pass,
            )
        };

        if double_sided && transparent && !force_single {
            // two-submission draw: back faces first, uniforms refreshed in
            // between via the version bump
            {
                let mut material = item.material.borrow_mut();
                material.side = Side::Back;
                material.needs_update();
            }
            if let Err(error) = self.render_buffer_direct(
                item,
                scene_data,
                camera_state,
                &render_state.lights,
                opaque_pass,
            ) {
                self.warnings.warn(&format!("draw skipped: {error}"));
            }
            {
                let mut material = item.material.borrow_mut();
                material.side = Side::Front;
                material.needs_update();
            }
            if let Err(error) = self.render_buffer_direct(
                item,
                scene_data,
                camera_state,
                &render_state.lights,
                opaque_pass,
            ) {
                self.warnings.warn(&format!("draw skipped: {error}"));
            }
            let mut material = item.material.borrow_mut();
            material.side = Side::Double;
            material.needs_update();
        } else if let Err(error) = self.render_buffer_direct(
            item,
            scene_data,
            camera_state,
            &render_state.lights,
            opaque_pass,
        ) {
            // a failed draw logs and skips; the frame continues
            self.warnings.warn(&format!("draw skipped: {error}"));
        }
    }

    // ── Innermost draw ───────────────────────────────────────────────────────

    fn render_buffer_direct(
        &mut self,
        item: &RenderItem,
        scene_data: &SceneData,
        camera_state: &CameraState,
        lights: &LightsState,
        opaque_pass: bool,
    ) -> Result<()> {
        let mut material = item.material.borrow_mut();
        if !material.validate() {
            return Err(RenderError::InvalidResource(
                "alphaTest > 0 is exclusive with alphaHash".to_string(),
            ));
        }
        let mut geometry = item.geometry.borrow_mut();

        if self.known_geometries.insert(geometry.id()) {
            self.info.memory.geometries = self.known_geometries.len();
        }

        // program + per-draw uniforms
        let program = self.set_program(
            &mut material,
            &geometry,
            item,
            scene_data,
            camera_state,
            lights,
            opaque_pass,
        )?;
        if !program.link_ok {
            return Err(RenderError::ProgramLinkFailed(
                "program in error state".to_string(),
            ));
        }

        // fixed-function material state; negative-determinant worlds flip
        // the winding
        let front_face_cw = item.object.world.matrix3.determinant() < 0.0;
        self.state
            .set_material(&self.context, &material, front_face_cw)?;

        let wireframe = material.wireframe && item.object.draw_mode == DrawMode::Triangles;
        if wireframe {
            self.state
                .set_line_width(&self.context, material.wireframe_linewidth);
        }

        // attribute bindings
        let index_binding = self.binding_states.setup(
            &self.context,
            &self.ids,
            &mut self.attributes,
            &mut geometry,
            &program,
            wireframe,
        );

        // draw range: drawRange ∩ group, wireframe doubled
        let (range_factor, primitive_count) = if wireframe {
            (2, index_binding.as_ref().map_or(0, |b| b.count))
        } else {
            match &index_binding {
                Some(binding) => (1, binding.count),
                None => (1, geometry.vertex_count()),
            }
        };

        let draw_range = geometry.draw_range;
        let mut draw_start = draw_range.start * range_factor;
        let mut draw_end = if draw_range.count == usize::MAX {
            primitive_count
        } else {
            (draw_range.start + draw_range.count) * range_factor
        };
        if let Some(group) = item.group {
            draw_start = draw_start.max(group.start * range_factor);
            draw_end = draw_end.min((group.start + group.count) * range_factor);
        }
        draw_end = draw_end.min(primitive_count);
        if draw_end <= draw_start {
            return Ok(());
        }
        let draw_count = draw_end - draw_start;

        let mode = if wireframe {
            gl::LINES
        } else {
            match item.object.draw_mode {
                DrawMode::Triangles => gl::TRIANGLES,
                DrawMode::Lines => gl::LINES,
                DrawMode::LineStrip => gl::LINE_STRIP,
                DrawMode::LineLoop => gl::LINE_LOOP,
                DrawMode::Points => gl::POINTS,
            }
        };

        // draw call selection: indexed / array × instanced
        match (&index_binding, item.object.instance_count) {
            (Some(binding), None) => {
                let offset = draw_start * binding.buffer.bytes_per_element;
                self.context
                    .draw_elements(mode, draw_count as i32, binding.buffer.gl_type, offset);
            }
            (Some(binding), Some(instances)) => {
                let offset = draw_start * binding.buffer.bytes_per_element;
                self.context.draw_elements_instanced(
                    mode,
                    draw_count as i32,
                    binding.buffer.gl_type,
                    offset,
                    instances as i32,
                );
            }
            (None, None) => {
                self.context
                    .draw_arrays(mode, draw_start as i32, draw_count as i32);
            }
            (None, Some(instances)) => {
                self.context.draw_arrays_instanced(
                    mode,
                    draw_start as i32,
                    draw_count as i32,
                    instances as i32,
                );
            }
        }
        self.info.update(
            draw_count as u64,
            mode,
            u64::from(item.object.instance_count.unwrap_or(1)),
        );
        Ok(())
    }

    /// Resolves the effective program for a draw, re-deriving parameters
    /// only when an invalidation condition fires, and uploads uniforms.
    fn set_program(
        &mut self,
        material: &mut Material,
        geometry: &crate::resources::Geometry,
        item: &RenderItem,
        scene_data: &SceneData,
        camera_state: &CameraState,
        lights: &LightsState,
        opaque_pass: bool,
    ) -> Result<Rc<GlProgram>> {
        // clipping state for this draw (disabled in shadow passes unless the
        // material opts in)
        let use_clipping = !self.rendering_shadows || material.clip_shadows;
        if use_clipping {
            self.clipping.set_state(
                &material.clipping_planes,
                material.clip_intersection,
                &camera_state.view,
            );
        } else {
            self.clipping.set_state(&[], false, &camera_state.view);
        }

        let instancing = item.object.instance_count.is_some();
        let instancing_color = instancing && geometry.attributes.contains_key("instanceColor");
        let morph_targets = geometry.morph_attributes.get("position").map_or(0, Vec::len);
        let instancing_morph = instancing && morph_targets > 0;
        let fast = FastFlags {
            instancing,
            instancing_color,
            instancing_morph,
            skinning: item.object.skinned,
            morph_targets,
            fog: scene_data.fog.is_some() && material.fog,
            output_color_space: if self.current_render_target.is_some() {
                ColorSpace::Linear
            } else {
                self.output_color_space
            },
            num_clipping_planes: self.clipping.num_planes,
            num_clip_intersection: self.clipping.num_intersection,
            shadow_map_enabled: self.shadow_map.enabled && !self.rendering_shadows,
            tone_mapping: if material.tone_mapped {
                self.tone_mapping
            } else {
                ToneMapping::None
            },
            opaque_pass,
            reversed_depth: self.reversed_depth_buffer,
            double_sided: material.side == Side::Double,
            flip_sided: material.side == Side::Back,
        };

        let props = self.material_props.entry(material.id()).or_default();
        let needs_derive = props.program.is_none()
            || props.material_version != material.version()
            || props.lights_version != lights.version()
            || props.fast != fast;

        if needs_derive {
            let inputs = DerivationInputs {
                lights: lights.counts(),
                shadow_map_enabled: fast.shadow_map_enabled,
                shadow_map_type: self.shadow_map.shadow_type,
                fog: scene_data.fog.as_ref(),
                output_color_space: fast.output_color_space,
                tone_mapping: fast.tone_mapping,
                num_clipping_planes: fast.num_clipping_planes,
                num_clip_intersection: fast.num_clip_intersection,
                reversed_depth: self.reversed_depth_buffer,
                logarithmic_depth: self.logarithmic_depth_buffer,
                supports_vertex_textures: self.capabilities.supports_vertex_textures,
                instancing,
                instancing_color,
                instancing_morph,
                skinning: item.object.skinned,
                opaque_pass,
            };
            let parameters = self.programs.get_parameters(material, geometry, &inputs);
            let key = ProgramCache::cache_key(&parameters);

            let props = self.material_props.get_mut(&material.id()).unwrap();
            let key_changed = props
                .program
                .as_ref()
                .map_or(true, |p| p.cache_key != key);
            if key_changed {
                let acquired = self
                    .programs
                    .acquire(&self.context, material, &parameters, &key);
                let props = self.material_props.get_mut(&material.id()).unwrap();
                if let Some(old) = props.program.replace(acquired) {
                    self.programs.release(&self.context, &old);
                }
            }
            let props = self.material_props.get_mut(&material.id()).unwrap();
            props.material_version = material.version();
            props.lights_version = lights.version();
            props.fast = fast;
        }

        let program = self
            .material_props
            .get(&material.id())
            .and_then(|p| p.program.clone())
            .expect("program resolved above");

        let program_switched = self.state.use_program(&self.context, program.handle);
        let camera_changed = self.current_camera_id != Some(camera_state.id);
        if program_switched || camera_changed {
            self.upload_camera_uniforms(&program, camera_state);
            self.current_camera_id = Some(camera_state.id);
        }

        self.upload_object_uniforms(&program, item, camera_state);

        // material uniforms and texture bindings refresh every draw; the
        // state tracker elides the redundant binds underneath
        self.upload_material_uniforms(&program, material, scene_data, item, lights)?;
        Ok(program)
    }

    // ── Uniform upload ───────────────────────────────────────────────────────

    fn upload_camera_uniforms(&mut self, program: &GlProgram, camera_state: &CameraState) {
        if let Some(location) = program.uniform("projectionMatrix") {
            self.context
                .uniform_matrix_4fv(location, &camera_state.projection.to_cols_array());
        }
        if let Some(location) = program.uniform("viewMatrix") {
            self.context
                .uniform_matrix_4fv(location, &camera_state.view.to_cols_array());
        }
        if let Some(location) = program.uniform("cameraPosition") {
            let p = camera_state.position;
            self.context.uniform_3f(location, p.x, p.y, p.z);
        }
        if let Some(location) = program.uniform("isOrthographic") {
            self.context
                .uniform_1i(location, i32::from(camera_state.orthographic));
        }
    }

    fn upload_object_uniforms(
        &mut self,
        program: &GlProgram,
        item: &RenderItem,
        camera_state: &CameraState,
    ) {
        let model = Mat4::from(item.object.world);
        let model_view = camera_state.view * model;
        if let Some(location) = program.uniform("modelMatrix") {
            self.context
                .uniform_matrix_4fv(location, &model.to_cols_array());
        }
        if let Some(location) = program.uniform("modelViewMatrix") {
            self.context
                .uniform_matrix_4fv(location, &model_view.to_cols_array());
        }
        if let Some(location) = program.uniform("normalMatrix") {
            let normal_matrix = Mat3::from_mat4(model_view).inverse().transpose();
            self.context
                .uniform_matrix_3fv(location, &normal_matrix.to_cols_array());
        }
        if !item.object.morph_influences.is_empty() {
            if let Some(location) = program.uniform("morphTargetInfluences") {
                self.context
                    .uniform_1fv(location, &item.object.morph_influences);
            }
        }
    }

    fn upload_material_uniforms(
        &mut self,
        program: &GlProgram,
        material: &Material,
        scene_data: &SceneData,
        item: &RenderItem,
        lights: &LightsState,
    ) -> Result<()> {
        let mut slot: u32 = 0;
        let mut bind =
            |renderer: &mut Self, texture: &SharedTexture, name: &str| -> Result<()> {
                if let Some(location) = program.uniform(name) {
                    let unit = slot;
                    slot += 1;
                    let mut tex = texture.borrow_mut();
                    renderer
                        .textures
                        .upload(&renderer.context, &mut renderer.state, &mut tex, unit)?;
                    renderer.context.uniform_1i(location, unit as i32);
                }
                Ok(())
            };

        if let Some(location) = program.uniform("diffuse") {
            let c = material.color;
            self.context.uniform_3f(location, c.x, c.y, c.z);
        }
        if let Some(location) = program.uniform("opacity") {
            self.context.uniform_1f(location, material.opacity);
        }
        if let Some(location) = program.uniform("emissive") {
            let e = material.emissive * material.emissive_intensity;
            self.context.uniform_3f(location, e.x, e.y, e.z);
        }
        if let Some(location) = program.uniform("roughness") {
            self.context.uniform_1f(location, material.roughness);
        }
        if let Some(location) = program.uniform("metalness") {
            self.context.uniform_1f(location, material.metalness);
        }
        if let Some(location) = program.uniform("toneMappingExposure") {
            self.context
                .uniform_1f(location, self.tone_mapping_exposure);
        }
        if let Some(location) = program.uniform("alphaTest") {
            self.context.uniform_1f(location, material.alpha_test);
        }
        if let Some(location) = program.uniform("receiveShadow") {
            self.context
                .uniform_1i(location, i32::from(item.object.receive_shadow));
        }
        if let Some(location) = program.uniform("backgroundIntensity") {
            self.context
                .uniform_1f(location, scene_data.background_intensity);
        }
        if let Some(location) = program.uniform("backgroundRotation") {
            let rotation =
                BackgroundPass::cube_rotation(scene_data.background_rotation, false);
            self.context
                .uniform_matrix_3fv(location, &rotation.to_cols_array());
        }
        if let Some(location) = program.uniform("uvTransform") {
            self.context
                .uniform_matrix_3fv(location, &Mat3::IDENTITY.to_cols_array());
        }
        if let Some(location) = program.uniform("normalScale") {
            let s = material.normal_scale;
            self.context.uniform_2f(location, s.x, s.y);
        }

        // fog
        if let Some(fog) = &scene_data.fog {
            match fog {
                Fog::Linear { color, near, far } => {
                    if let Some(location) = program.uniform("fogColor") {
                        self.context.uniform_3f(location, color.x, color.y, color.z);
                    }
                    if let Some(location) = program.uniform("fogNear") {
                        self.context.uniform_1f(location, *near);
                    }
                    if let Some(location) = program.uniform("fogFar") {
                        self.context.uniform_1f(location, *far);
                    }
                }
                Fog::Exp2 { color, density } => {
                    if let Some(location) = program.uniform("fogColor") {
                        self.context.uniform_3f(location, color.x, color.y, color.z);
                    }
                    if let Some(location) = program.uniform("fogDensity") {
                        self.context.uniform_1f(location, *density);
                    }
                }
            }
        }

        // clipping planes
        if self.clipping.num_planes > 0 {
            if let Some(location) = program.uniform("clippingPlanes") {
                let uniform = self.clipping.uniform.clone();
                self.context.uniform_4fv(location, &uniform);
            }
        }

        // texture maps
        let maps: [(&Option<SharedTexture>, &str); 12] = [
            (&material.map, "map"),
            (&material.map, "t2D"),
            (&material.alpha_map, "alphaMap"),
            (&material.normal_map, "normalMap"),
            (&material.roughness_map, "roughnessMap"),
            (&material.metalness_map, "metalnessMap"),
            (&material.emissive_map, "emissiveMap"),
            (&material.ao_map, "aoMap"),
            (&material.light_map, "lightMap"),
            (&material.env_map, "envMap"),
            (&material.matcap, "matcap"),
            (&material.gradient_map, "gradientMap"),
        ];
        for (texture, name) in maps {
            if let Some(texture) = texture {
                bind(self, texture, name)?;
            }
        }
        if item.object.skinned {
            if let Some(texture) = &item.object.bone_texture {
                bind(self, texture, "boneTexture")?;
            }
        }
        if material.is_transmissive() {
            if let Some(texture) = self.transmission_texture.clone() {
                bind(self, &texture, "transmissionSamplerMap")?;
                if let Some(location) = program.uniform("transmissionSamplerSize") {
                    let t = texture.borrow();
                    self.context.uniform_2f(
                        location,
                        t.source.width() as f32,
                        t.source.height() as f32,
                    );
                }
                if let Some(location) = program.uniform("transmission") {
                    self.context.uniform_1f(location, material.transmission);
                }
                if let Some(location) = program.uniform("thickness") {
                    self.context.uniform_1f(location, material.thickness);
                }
                if let Some(location) = program.uniform("ior") {
                    self.context.uniform_1f(location, material.ior);
                }
            }
        }

        // lights (only for lit shading families)
        if material.shading.is_lit() || material.shading == ShadingModel::Basic {
            if let Some(location) = program.uniform("ambientLightColor") {
                let a = lights.ambient;
                self.context.uniform_3f(location, a.x, a.y, a.z);
            }
            if let Some(location) = program.uniform("lightProbe") {
                let mut flat = Vec::with_capacity(27);
                for coefficient in &lights.probe {
                    flat.extend_from_slice(&[coefficient.x, coefficient.y, coefficient.z]);
                }
                self.context.uniform_3fv(location, &flat);
            }
            if !lights.directional.is_empty() {
                if let Some(location) = program.uniform("directionalLights") {
                    let mut flat = Vec::with_capacity(lights.directional.len() * 6);
                    for light in &lights.directional {
                        flat.extend_from_slice(&[
                            light.direction.x,
                            light.direction.y,
                            light.direction.z,
                            light.color.x,
                            light.color.y,
                            light.color.z,
                        ]);
                    }
                    self.context.uniform_3fv(location, &flat);
                }
            }
            if !lights.point.is_empty() {
                if let Some(location) = program.uniform("pointLights") {
                    let mut flat = Vec::with_capacity(lights.point.len() * 8);
                    for light in &lights.point {
                        flat.extend_from_slice(&[
                            light.position.x,
                            light.position.y,
                            light.position.z,
                            light.color.x,
                            light.color.y,
                            light.color.z,
                            light.distance,
                            light.decay,
                        ]);
                    }
                    self.context.uniform_4fv(location, &flat);
                }
            }
            if !lights.spot.is_empty() {
                if let Some(location) = program.uniform("spotLights") {
                    let mut flat = Vec::with_capacity(lights.spot.len() * 13);
                    for light in &lights.spot {
                        flat.extend_from_slice(&[
                            light.position.x,
                            light.position.y,
                            light.position.z,
                            light.direction.x,
                            light.direction.y,
                            light.direction.z,
                            light.color.x,
                            light.color.y,
                            light.color.z,
                            light.distance,
                            light.cone_cos,
                            light.penumbra_cos,
                            light.decay,
                        ]);
                    }
                    self.context.uniform_4fv(location, &flat);
                }
            }
            if !lights.hemi.is_empty() {
                if let Some(location) = program.uniform("hemisphereLights") {
                    let mut flat = Vec::with_capacity(lights.hemi.len() * 9);
                    for light in &lights.hemi {
                        flat.extend_from_slice(&[
                            light.direction.x,
                            light.direction.y,
                            light.direction.z,
                            light.sky_color.x,
                            light.sky_color.y,
                            light.sky_color.z,
                            light.ground_color.x,
                            light.ground_color.y,
                            light.ground_color.z,
                        ]);
                    }
                    self.context.uniform_3fv(location, &flat);
                }
            }

            // shadow maps + matrices
            if !lights.directional_shadow_map.is_empty() {
                if let Some(location) = program.uniform("directionalShadowMap") {
                    let mut units: SmallVec<[i32; 4]> = SmallVec::new();
                    for handle in &lights.directional_shadow_map {
                        let unit = slot;
                        slot += 1;
                        self.state.bind_texture(
                            &self.context,
                            gl::TEXTURE_2D,
                            *handle,
                            Some(unit),
                        );
                        units.push(unit as i32);
                    }
                    self.context.uniform_1iv(location, &units);
                }
                if let Some(location) = program.uniform("directionalShadowMatrix") {
                    let mut flat = Vec::with_capacity(lights.directional_shadow_matrix.len() * 16);
                    for matrix in &lights.directional_shadow_matrix {
                        flat.extend_from_slice(&matrix.to_cols_array());
                    }
                    self.context.uniform_matrix_4fv_array(location, &flat);
                }
            }
        }
        Ok(())
    }
}
