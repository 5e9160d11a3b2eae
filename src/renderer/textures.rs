//! Texture and render-target lifecycle.
//!
//! GPU texture storage is de-duplicated by `(source id, parameter key)`:
//! two textures sampling the same pixels with the same parameters share one
//! GL object, reference-counted by `used_times`. Uploads are versioned —
//! step 1 of the pipeline below exits early when the stored version matches.
//!
//! Upload pipeline: version check → handle/source-cache init → max-size
//! check → format table → sampler parameters → storage + texel upload →
//! mipmap generation.

use rustc_hash::FxHashMap;

use crate::error::{RenderError, Result};
use crate::gl::consts as gl;
use crate::gl::{FramebufferHandle, GlContext, RenderbufferHandle, TextureHandle};
use crate::renderer::capabilities::Capabilities;
use crate::renderer::format::{
    bytes_per_texel, components_per_texel, gl_format, gl_type, internal_format,
};
use crate::renderer::state::StateTracker;
use crate::renderer::warnings::OnceLog;
use crate::resources::buffer::UpdateRange;
use crate::resources::render_target::{RenderTarget, RenderTargetKind};
use crate::resources::texture::{
    ColorSpace, Filter, PixelData, Texture, TextureCompare, TextureDimension, TextureFormat,
    TextureSource, TextureType, Wrap,
};

fn wrap_to_gl(wrap: Wrap) -> i32 {
    (match wrap {
        Wrap::Repeat => gl::REPEAT,
        Wrap::ClampToEdge => gl::CLAMP_TO_EDGE,
        Wrap::MirroredRepeat => gl::MIRRORED_REPEAT,
    }) as i32
}

fn filter_to_gl(filter: Filter) -> i32 {
    (match filter {
        Filter::Nearest => gl::NEAREST,
        Filter::Linear => gl::LINEAR,
        Filter::NearestMipmapNearest => gl::NEAREST_MIPMAP_NEAREST,
        Filter::LinearMipmapNearest => gl::LINEAR_MIPMAP_NEAREST,
        Filter::NearestMipmapLinear => gl::NEAREST_MIPMAP_LINEAR,
        Filter::LinearMipmapLinear => gl::LINEAR_MIPMAP_LINEAR,
    }) as i32
}

fn compare_to_gl(compare: TextureCompare) -> i32 {
    (match compare {
        TextureCompare::Less => gl::LESS,
        TextureCompare::LessEqual => gl::LEQUAL,
        TextureCompare::Greater => gl::GREATER,
        TextureCompare::GreaterEqual => gl::GEQUAL,
    }) as i32
}

fn gl_target(dimension: TextureDimension) -> u32 {
    match dimension {
        TextureDimension::D2 => gl::TEXTURE_2D,
        TextureDimension::D2Array => gl::TEXTURE_2D_ARRAY,
        TextureDimension::D3 => gl::TEXTURE_3D,
        TextureDimension::Cube => gl::TEXTURE_CUBE_MAP,
    }
}

fn mip_level_count(texture: &Texture) -> i32 {
    match &texture.source {
        TextureSource::Data { mipmaps, .. } if !mipmaps.is_empty() => mipmaps.len() as i32 + 1,
        source if texture.generate_mipmaps => {
            let max_dim = source.width().max(source.height()).max(1);
            (max_dim as f32).log2().floor() as i32 + 1
        }
        _ => 1,
    }
}

/// Merges texel-space update ranges in place: sorted by start, coalesced
/// when `end + 1` reaches the next start, and never across row boundaries
/// (`row = (index / components) / row_length`).
pub fn merge_texture_update_ranges(
    ranges: &mut Vec<UpdateRange>,
    components: usize,
    row_length: usize,
) {
    if ranges.len() < 2 {
        return;
    }
    ranges.sort_by_key(|r| r.start);
    let row_of = |index: usize| (index / components) / row_length.max(1);

    let mut merged: Vec<UpdateRange> = Vec::with_capacity(ranges.len());
    for range in ranges.drain(..) {
        match merged.last_mut() {
            Some(prev)
                if range.start <= prev.start + prev.count
                    && row_of(prev.start) == row_of(range.start) =>
            {
                let end = (range.start + range.count).max(prev.start + prev.count);
                prev.count = end - prev.start;
            }
            _ => merged.push(range),
        }
    }
    *ranges = merged;
}

#[derive(Debug)]
struct TextureProps {
    handle: TextureHandle,
    uploaded_version: Option<u64>,
    cache_key: String,
    source_id: u64,
    allocated: bool,
    force_linear: bool,
}

struct SourceEntry {
    handle: TextureHandle,
    used_times: usize,
}

#[derive(Default)]
struct TargetProps {
    /// One per cube face, or a single entry for 2D/array/3D targets.
    framebuffers: Vec<FramebufferHandle>,
    /// Mip level currently attached to each framebuffer.
    attached_level: i32,
    msaa_framebuffer: Option<FramebufferHandle>,
    msaa_renderbuffers: Vec<RenderbufferHandle>,
    depth_renderbuffer: Option<RenderbufferHandle>,
}

pub struct TextureManager {
    capabilities: Capabilities,
    properties: FxHashMap<u64, TextureProps>,
    sources: FxHashMap<u64, FxHashMap<String, SourceEntry>>,
    targets: FxHashMap<u64, TargetProps>,
    warnings: OnceLog,
}

impl TextureManager {
    #[must_use]
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            properties: FxHashMap::default(),
            sources: FxHashMap::default(),
            targets: FxHashMap::default(),
            warnings: OnceLog::new(),
        }
    }

    /// Number of textures with live GPU storage.
    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.properties.len()
    }

    /// GPU handle for an uploaded texture.
    #[must_use]
    pub fn handle(&self, texture_id: u64) -> Option<TextureHandle> {
        self.properties.get(&texture_id).map(|p| p.handle)
    }

    fn parameter_cache_key(texture: &Texture, force_linear: bool) -> String {
        let internal = internal_format(
            texture.format,
            texture.texel_type,
            texture.color_space,
            force_linear,
        )
        .unwrap_or(0);
        format!(
            "{:?}:{:?}:{:?}:{}:{:?}:{}:{:?}:{:?}:{}:{}:{}:{}:{:?}",
            texture.wrap_s,
            texture.wrap_t,
            texture.wrap_r,
            texture.anisotropy,
            texture.mag_filter,
            internal,
            texture.min_filter,
            texture.format,
            texture.generate_mipmaps,
            texture.premultiply_alpha,
            texture.flip_y,
            texture.unpack_alignment,
            texture.color_space,
        )
    }

    /// Uploads (if stale) and binds `texture` to `slot`.
    pub fn upload(
        &mut self,
        context: &impl GlContext,
        state: &mut StateTracker,
        texture: &mut Texture,
        slot: u32,
    ) -> Result<TextureHandle> {
        let id = texture.id();
        let target = gl_target(texture.dimension);

        // 1. fast path: nothing changed since last upload
        if let Some(props) = self.properties.get(&id) {
            if props.uploaded_version == Some(texture.version()) {
                let handle = props.handle;
                state.bind_texture(context, target, Some(handle), Some(slot));
                return Ok(handle);
            }
        }

        // sRGB transfer only exists for 8-bit RGBA storage
        let mut force_linear = false;
        if texture.color_space == ColorSpace::Srgb
            && !(texture.format == TextureFormat::Rgba
                && texture.texel_type == TextureType::UnsignedByte)
        {
            self.warnings.warn(
                "sRGB encoded textures must be 8-bit RGBA; uploading without sRGB conversion",
            );
            force_linear = true;
        }

        // 2. initialise: GPU handle + source-cache membership
        let cache_key = Self::parameter_cache_key(texture, force_linear);
        self.join_source_cache(context, state, texture, &cache_key, force_linear);

        // 3. size clamp
        self.enforce_max_size(texture)?;

        // 4. format table
        let internal = internal_format(
            texture.format,
            texture.texel_type,
            texture.color_space,
            force_linear,
        )?;
        let format = gl_format(texture.format);
        let ty = gl_type(texture.texel_type);

        let props = self.properties.get_mut(&id).expect("joined above");
        let handle = props.handle;
        state.bind_texture(context, target, Some(handle), Some(slot));

        // 5. unpack + sampler parameters
        context.pixel_store_i(gl::UNPACK_FLIP_Y, i32::from(texture.flip_y));
        context.pixel_store_i(gl::UNPACK_PREMULTIPLY_ALPHA, i32::from(texture.premultiply_alpha));
        context.pixel_store_i(gl::UNPACK_ALIGNMENT, texture.unpack_alignment);

        context.tex_parameter_i(target, gl::TEXTURE_WRAP_S, wrap_to_gl(texture.wrap_s));
        context.tex_parameter_i(target, gl::TEXTURE_WRAP_T, wrap_to_gl(texture.wrap_t));
        if matches!(texture.dimension, TextureDimension::D3 | TextureDimension::D2Array) {
            context.tex_parameter_i(target, gl::TEXTURE_WRAP_R, wrap_to_gl(texture.wrap_r));
        }
        context.tex_parameter_i(target, gl::TEXTURE_MAG_FILTER, filter_to_gl(texture.mag_filter));
        context.tex_parameter_i(target, gl::TEXTURE_MIN_FILTER, filter_to_gl(texture.min_filter));
        if self.capabilities.anisotropy && texture.anisotropy > 1.0 {
            context.tex_parameter_f(
                target,
                gl::TEXTURE_MAX_ANISOTROPY,
                texture.anisotropy.min(self.capabilities.max_anisotropy),
            );
        }
        if let Some(compare) = texture.compare {
            context.tex_parameter_i(
                target,
                gl::TEXTURE_COMPARE_MODE,
                gl::COMPARE_REF_TO_TEXTURE as i32,
            );
            context.tex_parameter_i(target, gl::TEXTURE_COMPARE_FUNC, compare_to_gl(compare));
        }

        // 6. texel upload
        let was_allocated = props.allocated;
        props.allocated = true;
        props.uploaded_version = Some(texture.version());
        let partial_possible = was_allocated
            && !texture.update_ranges.is_empty()
            && !texture.is_compressed()
            && matches!(texture.dimension, TextureDimension::D2)
            && matches!(texture.source, TextureSource::Data { .. });

        if partial_possible {
            Self::upload_partial(context, texture, format, ty);
        } else {
            Self::upload_full(context, texture, target, internal, format, ty, was_allocated);
            texture.update_ranges.clear();
        }

        // 7. mipmaps
        if texture.generate_mipmaps && !texture.is_compressed() {
            context.generate_mipmap(target);
        }

        Ok(handle)
    }

    fn join_source_cache(
        &mut self,
        context: &impl GlContext,
        state: &mut StateTracker,
        texture: &Texture,
        cache_key: &str,
        force_linear: bool,
    ) {
        let id = texture.id();
        let source_id = texture.source_id();

        if let Some(props) = self.properties.get(&id) {
            if props.cache_key == cache_key {
                return;
            }
            // parameter change: leave the old cache slot, maybe freeing it
            let old_key = props.cache_key.clone();
            let old_source = props.source_id;
            self.leave_source_cache(context, state, old_source, &old_key);
            self.properties.remove(&id);
        }

        let entries = self.sources.entry(source_id).or_default();
        let (handle, allocated) = match entries.get_mut(cache_key) {
            Some(entry) => {
                entry.used_times += 1;
                (entry.handle, true)
            }
            None => {
                let handle = context.create_texture();
                entries.insert(
                    cache_key.to_string(),
                    SourceEntry {
                        handle,
                        used_times: 1,
                    },
                );
                (handle, false)
            }
        };

        self.properties.insert(
            id,
            TextureProps {
                handle,
                uploaded_version: None,
                cache_key: cache_key.to_string(),
                source_id,
                allocated,
                force_linear,
            },
        );
    }

    fn leave_source_cache(
        &mut self,
        context: &impl GlContext,
        state: &mut StateTracker,
        source_id: u64,
        cache_key: &str,
    ) {
        let Some(entries) = self.sources.get_mut(&source_id) else {
            return;
        };
        let Some(entry) = entries.get_mut(cache_key) else {
            return;
        };
        entry.used_times -= 1;
        if entry.used_times == 0 {
            state.forget_texture(entry.handle);
            context.delete_texture(entry.handle);
            entries.remove(cache_key);
        }
        if entries.is_empty() {
            self.sources.remove(&source_id);
        }
    }

    fn enforce_max_size(&mut self, texture: &mut Texture) -> Result<()> {
        let max = self.capabilities.max_texture_size;
        let (width, height) = (texture.source.width(), texture.source.height());
        if width <= max && height <= max {
            return Ok(());
        }

        self.warnings.warn(&format!(
            "texture exceeds max size {max}; resizing from {width}x{height}"
        ));

        let resizable = texture.format == TextureFormat::Rgba
            && texture.texel_type == TextureType::UnsignedByte
            && matches!(texture.source, TextureSource::Data { .. });
        if !resizable {
            return Err(RenderError::SizeExceeded {
                requested: width.max(height),
                max,
            });
        }

        let scale = max as f32 / width.max(height) as f32;
        if let TextureSource::Data { level0, .. } = &mut texture.source {
            let new_width = ((level0.width as f32 * scale).floor() as u32).max(1);
            let new_height = ((level0.height as f32 * scale).floor() as u32).max(1);
            let mut resized = vec![0u8; (new_width * new_height * 4) as usize];
            for y in 0..new_height {
                for x in 0..new_width {
                    let src_x = (x as f32 / scale) as u32;
                    let src_y = (y as f32 / scale) as u32;
                    let src = ((src_y * level0.width + src_x) * 4) as usize;
                    let dst = ((y * new_width + x) * 4) as usize;
                    resized[dst..dst + 4].copy_from_slice(&level0.data[src..src + 4]);
                }
            }
            *level0 = PixelData::new(resized, new_width, new_height);
        }
        Ok(())
    }

    fn upload_partial(context: &impl GlContext, texture: &mut Texture, format: u32, ty: u32) {
        let TextureSource::Data { level0, .. } = &texture.source else {
            return;
        };
        let components = components_per_texel(texture.format);
        let row_length = level0.width as usize;
        let texel_bytes = bytes_per_texel(texture.format, texture.texel_type);

        let mut ranges = std::mem::take(&mut texture.update_ranges);
        merge_texture_update_ranges(&mut ranges, components, row_length);

        context.pixel_store_i(gl::UNPACK_ROW_LENGTH, level0.width as i32);
        for range in &ranges {
            let texel_start = range.start / components;
            let texel_count = range.count / components;
            let x = (texel_start % row_length) as i32;
            let y = (texel_start / row_length) as i32;
            context.pixel_store_i(gl::UNPACK_SKIP_PIXELS, x);
            context.pixel_store_i(gl::UNPACK_SKIP_ROWS, y);
            let byte_start = texel_start * texel_bytes;
            let byte_end = byte_start + texel_count * texel_bytes;
            context.tex_sub_image_2d(
                gl::TEXTURE_2D,
                0,
                x,
                y,
                texel_count as i32,
                1,
                format,
                ty,
                &level0.data[byte_start..byte_end],
            );
        }
        context.pixel_store_i(gl::UNPACK_ROW_LENGTH, 0);
        context.pixel_store_i(gl::UNPACK_SKIP_PIXELS, 0);
        context.pixel_store_i(gl::UNPACK_SKIP_ROWS, 0);
    }

    fn upload_full(
        context: &impl GlContext,
        texture: &Texture,
        target: u32,
        internal: u32,
        format: u32,
        ty: u32,
        was_allocated: bool,
    ) {
        let width = texture.source.width() as i32;
        let height = texture.source.height() as i32;
        let levels = mip_level_count(texture);

        match (&texture.source, texture.dimension) {
            (TextureSource::Data { level0, mipmaps }, TextureDimension::D2) => {
                if texture.is_compressed() {
                    context.compressed_tex_image_2d(target, 0, internal, width, height, &level0.data);
                    let mut w = width;
                    let mut h = height;
                    for (i, mip) in mipmaps.iter().enumerate() {
                        w = (w / 2).max(1);
                        h = (h / 2).max(1);
                        context.compressed_tex_image_2d(
                            target,
                            i as i32 + 1,
                            internal,
                            w,
                            h,
                            &mip.data,
                        );
                    }
                } else if texture.is_video {
                    // mutable storage: video frames change size and content
                    context.tex_image_2d(
                        target,
                        0,
                        internal,
                        width,
                        height,
                        format,
                        ty,
                        Some(&level0.data),
                    );
                } else {
                    if !was_allocated {
                        context.tex_storage_2d(target, levels, internal, width, height);
                    }
                    context.tex_sub_image_2d(target, 0, 0, 0, width, height, format, ty, &level0.data);
                    let mut w = width;
                    let mut h = height;
                    for (i, mip) in mipmaps.iter().enumerate() {
                        w = (w / 2).max(1);
                        h = (h / 2).max(1);
                        context.tex_sub_image_2d(
                            target,
                            i as i32 + 1,
                            0,
                            0,
                            w,
                            h,
                            format,
                            ty,
                            &mip.data,
                        );
                    }
                }
            }
            (TextureSource::CubeFaces(faces), _) => {
                if !was_allocated {
                    context.tex_storage_2d(gl::TEXTURE_CUBE_MAP, levels, internal, width, height);
                }
                for (face, data) in faces.iter().enumerate() {
                    context.tex_sub_image_2d(
                        gl::TEXTURE_CUBE_MAP_POSITIVE_X + face as u32,
                        0,
                        0,
                        0,
                        width,
                        height,
                        format,
                        ty,
                        &data.data,
                    );
                }
            }
            (TextureSource::Data { level0, .. }, TextureDimension::D2Array | TextureDimension::D3) => {
                let depth = texture.source.depth() as i32;
                if !was_allocated {
                    context.tex_storage_3d(target, levels, internal, width, height, depth);
                }
                let layer_bytes = level0.data.len() / depth.max(1) as usize;
                if texture.layer_updates.is_empty() {
                    context.tex_sub_image_3d(
                        target,
                        0,
                        0,
                        0,
                        0,
                        width,
                        height,
                        depth,
                        format,
                        ty,
                        &level0.data,
                    );
                } else {
                    let mut layers: Vec<u32> = texture.layer_updates.iter().copied().collect();
                    layers.sort_unstable();
                    for layer in layers {
                        let begin = layer as usize * layer_bytes;
                        context.tex_sub_image_3d(
                            target,
                            0,
                            0,
                            0,
                            layer as i32,
                            width,
                            height,
                            1,
                            format,
                            ty,
                            &level0.data[begin..begin + layer_bytes],
                        );
                    }
                }
            }
            (TextureSource::Data { .. }, TextureDimension::Cube) => unreachable!(
                "cube textures are uploaded via TextureSource::CubeFaces, not Data"
            ),
            (TextureSource::Uninitialized { .. }, TextureDimension::Cube) => {
                if !was_allocated {
                    context.tex_storage_2d(gl::TEXTURE_CUBE_MAP, levels, internal, width, height);
                }
            }
            (TextureSource::Uninitialized { depth, .. }, dimension) => {
                if !was_allocated {
                    match dimension {
                        TextureDimension::D2 => {
                            context.tex_storage_2d(target, levels, internal, width, height);
                        }
                        _ => context.tex_storage_3d(
                            target,
                            levels,
                            internal,
                            width,
                            height,
                            *depth as i32,
                        ),
                    }
                }
            }
        }
    }

    // ── Render targets ───────────────────────────────────────────────────────

    /// Lazily creates framebuffers, renderbuffers and attachment storage.
    pub fn setup_render_target(
        &mut self,
        context: &impl GlContext,
        state: &mut StateTracker,
        target: &RenderTarget,
    ) -> Result<()> {
        if self.targets.contains_key(&target.id()) {
            return Ok(());
        }
        if !target.validate() {
            return Err(RenderError::InvalidResource(
                "depth texture dimensions must equal the render target's".to_string(),
            ));
        }

        let mut props = TargetProps::default();

        // allocate color attachment storage
        for texture in &target.textures {
            self.upload(context, state, &mut texture.borrow_mut(), 0)?;
        }

        let is_cube = target.kind == RenderTargetKind::Cube;
        let framebuffer_count = if is_cube { 6 } else { 1 };
        for face in 0..framebuffer_count {
            let framebuffer = context.create_framebuffer();
            state.bind_framebuffer(context, gl::FRAMEBUFFER, Some(framebuffer));

            for (i, texture) in target.textures.iter().enumerate() {
                let tex = texture.borrow();
                let handle = self.handle(tex.id()).expect("uploaded above");
                let attachment = gl::COLOR_ATTACHMENT0 + i as u32;
                match target.kind {
                    RenderTargetKind::Cube => context.framebuffer_texture_2d(
                        gl::FRAMEBUFFER,
                        attachment,
                        gl::TEXTURE_CUBE_MAP_POSITIVE_X + face,
                        handle,
                        0,
                    ),
                    RenderTargetKind::D2 => context.framebuffer_texture_2d(
                        gl::FRAMEBUFFER,
                        attachment,
                        gl::TEXTURE_2D,
                        handle,
                        0,
                    ),
                    RenderTargetKind::D2Array | RenderTargetKind::D3 => {
                        context.framebuffer_texture_layer(gl::FRAMEBUFFER, attachment, handle, 0, 0);
                    }
                }
            }
            props.framebuffers.push(framebuffer);
        }

        // depth attachment: texture when supplied, renderbuffer otherwise
        let use_msaa_buffers =
            target.samples > 0 && !self.capabilities.multisampled_render_to_texture;

        if let Some(depth_texture) = &target.depth_texture {
            let mut tex = depth_texture.borrow_mut();
            self.upload(context, state, &mut tex, 0)?;
            let handle = self.handle(tex.id()).expect("uploaded above");
            let attachment = if tex.format == TextureFormat::DepthStencil {
                gl::DEPTH_STENCIL_ATTACHMENT
            } else {
                gl::DEPTH_ATTACHMENT
            };
            state.bind_framebuffer(context, gl::FRAMEBUFFER, Some(props.framebuffers[0]));
            context.framebuffer_texture_2d(gl::FRAMEBUFFER, attachment, gl::TEXTURE_2D, handle, 0);
        } else if target.depth_buffer && !use_msaa_buffers {
            props.depth_renderbuffer =
                Some(self.create_depth_renderbuffer(context, state, target, props.framebuffers[0], 0));
        }

        // explicit multisample framebuffer + renderbuffers, resolved by blit
        if use_msaa_buffers {
            let samples = target.samples.min(self.capabilities.max_samples) as i32;
            let msaa_framebuffer = context.create_framebuffer();
            state.bind_framebuffer(context, gl::FRAMEBUFFER, Some(msaa_framebuffer));

            for (i, texture) in target.textures.iter().enumerate() {
                let tex = texture.borrow();
                let internal = internal_format(
                    tex.format,
                    tex.texel_type,
                    tex.color_space,
                    self.properties
                        .get(&tex.id())
                        .is_some_and(|p| p.force_linear),
                )?;
                let renderbuffer = context.create_renderbuffer();
                context.bind_renderbuffer(Some(renderbuffer));
                context.renderbuffer_storage_multisample(
                    samples,
                    internal,
                    target.width as i32,
                    target.height as i32,
                );
                context.framebuffer_renderbuffer(
                    gl::FRAMEBUFFER,
                    gl::COLOR_ATTACHMENT0 + i as u32,
                    renderbuffer,
                );
                props.msaa_renderbuffers.push(renderbuffer);
            }
            if target.depth_buffer && target.depth_texture.is_none() {
                props.depth_renderbuffer = Some(self.create_depth_renderbuffer(
                    context,
                    state,
                    target,
                    msaa_framebuffer,
                    samples,
                ));
            }
            props.msaa_framebuffer = Some(msaa_framebuffer);
        }

        let status = context.check_framebuffer_status(gl::FRAMEBUFFER);
        if status != gl::FRAMEBUFFER_COMPLETE {
            self.warnings
                .warn(&format!("framebuffer incomplete: {status:#06x}"));
        }
        state.bind_framebuffer(context, gl::FRAMEBUFFER, None);

        self.targets.insert(target.id(), props);
        Ok(())
    }

    fn create_depth_renderbuffer(
        &mut self,
        context: &impl GlContext,
        state: &mut StateTracker,
        target: &RenderTarget,
        framebuffer: FramebufferHandle,
        samples: i32,
    ) -> RenderbufferHandle {
        let renderbuffer = context.create_renderbuffer();
        context.bind_renderbuffer(Some(renderbuffer));
        let (storage, attachment) = if target.stencil_buffer {
            (gl::DEPTH24_STENCIL8, gl::DEPTH_STENCIL_ATTACHMENT)
        } else {
            (gl::DEPTH_COMPONENT24, gl::DEPTH_ATTACHMENT)
        };
        if samples > 0 {
            context.renderbuffer_storage_multisample(
                samples,
                storage,
                target.width as i32,
                target.height as i32,
            );
        } else {
            context.renderbuffer_storage(storage, target.width as i32, target.height as i32);
        }
        state.bind_framebuffer(context, gl::FRAMEBUFFER, Some(framebuffer));
        context.framebuffer_renderbuffer(gl::FRAMEBUFFER, attachment, renderbuffer);
        context.bind_renderbuffer(None);
        renderbuffer
    }

    /// Framebuffer that draws into `target` land on, honoring the active
    /// cube face and mipmap level.
    pub fn framebuffer_for(
        &mut self,
        context: &impl GlContext,
        state: &mut StateTracker,
        target: &RenderTarget,
        face: u32,
        level: i32,
    ) -> Option<FramebufferHandle> {
        let (framebuffer, attached_level) = {
            let props = self.targets.get(&target.id())?;
            if let Some(msaa) = props.msaa_framebuffer {
                return Some(msaa);
            }
            let index = if target.kind == RenderTargetKind::Cube {
                face as usize
            } else {
                0
            };
            (*props.framebuffers.get(index)?, props.attached_level)
        };

        if attached_level != level {
            // re-attach the first color attachment at the requested mip
            state.bind_framebuffer(context, gl::FRAMEBUFFER, Some(framebuffer));
            let tex = target.textures[0].borrow();
            if let Some(handle) = self.properties.get(&tex.id()).map(|p| p.handle) {
                let tex_target = if target.kind == RenderTargetKind::Cube {
                    gl::TEXTURE_CUBE_MAP_POSITIVE_X + face
                } else {
                    gl::TEXTURE_2D
                };
                context.framebuffer_texture_2d(
                    gl::FRAMEBUFFER,
                    gl::COLOR_ATTACHMENT0,
                    tex_target,
                    handle,
                    level,
                );
            }
            self.targets.get_mut(&target.id()).unwrap().attached_level = level;
        }
        Some(framebuffer)
    }

    /// Whether `target` renders into explicit multisample buffers.
    #[must_use]
    pub fn uses_msaa_buffers(&self, target: &RenderTarget) -> bool {
        self.targets
            .get(&target.id())
            .is_some_and(|p| p.msaa_framebuffer.is_some())
    }

    /// Blits the multisample buffers into the sampleable textures, then
    /// invalidates the multisample attachments.
    pub fn resolve_multisample(
        &mut self,
        context: &impl GlContext,
        state: &mut StateTracker,
        target: &RenderTarget,
    ) {
        let Some(props) = self.targets.get(&target.id()) else {
            return;
        };
        let Some(msaa_framebuffer) = props.msaa_framebuffer else {
            return;
        };
        let resolve_framebuffer = props.framebuffers[0];

        let mut mask = gl::COLOR_BUFFER_BIT;
        if target.resolve_depth_buffer && target.depth_buffer {
            mask |= gl::DEPTH_BUFFER_BIT;
        }
        if target.stencil_buffer && target.resolve_stencil_buffer {
            mask |= gl::STENCIL_BUFFER_BIT;
        }

        state.bind_framebuffer(context, gl::READ_FRAMEBUFFER, Some(msaa_framebuffer));
        state.bind_framebuffer(context, gl::DRAW_FRAMEBUFFER, Some(resolve_framebuffer));

        let rect = [0, 0, target.width as i32, target.height as i32];
        let attachment_count = target.textures.len();

        if attachment_count > 1 {
            // rebind COLOR_ATTACHMENT0 per attachment for the blit
            for i in 0..attachment_count {
                let renderbuffer = props.msaa_renderbuffers[i];
                context.framebuffer_renderbuffer(
                    gl::READ_FRAMEBUFFER,
                    gl::COLOR_ATTACHMENT0,
                    renderbuffer,
                );
                let tex = target.textures[i].borrow();
                if let Some(handle) = self.properties.get(&tex.id()).map(|p| p.handle) {
                    context.framebuffer_texture_2d(
                        gl::DRAW_FRAMEBUFFER,
                        gl::COLOR_ATTACHMENT0,
                        gl::TEXTURE_2D,
                        handle,
                        0,
                    );
                }
                context.blit_framebuffer(rect, rect, mask, gl::NEAREST);
            }
            // restore canonical attachment layout
            for i in 0..attachment_count {
                let renderbuffer = props.msaa_renderbuffers[i];
                context.framebuffer_renderbuffer(
                    gl::READ_FRAMEBUFFER,
                    gl::COLOR_ATTACHMENT0 + i as u32,
                    renderbuffer,
                );
                let tex = target.textures[i].borrow();
                if let Some(handle) = self.properties.get(&tex.id()).map(|p| p.handle) {
                    context.framebuffer_texture_2d(
                        gl::DRAW_FRAMEBUFFER,
                        gl::COLOR_ATTACHMENT0 + i as u32,
                        gl::TEXTURE_2D,
                        handle,
                        0,
                    );
                }
            }
        } else {
            context.blit_framebuffer(rect, rect, mask, gl::NEAREST);
        }

        // free tiled-GPU memory for the multisample attachments
        let mut invalidate: Vec<u32> = (0..attachment_count)
            .map(|i| gl::COLOR_ATTACHMENT0 + i as u32)
            .collect();
        if target.resolve_depth_buffer && target.depth_buffer {
            invalidate.push(if target.stencil_buffer {
                gl::DEPTH_STENCIL_ATTACHMENT
            } else {
                gl::DEPTH_ATTACHMENT
            });
        }
        context.invalidate_framebuffer(gl::READ_FRAMEBUFFER, &invalidate);
    }

    /// Regenerates mipmaps on color attachments whose filter samples them.
    pub fn update_render_target_mipmaps(
        &mut self,
        context: &impl GlContext,
        state: &mut StateTracker,
        target: &RenderTarget,
    ) {
        for texture in &target.textures {
            let tex = texture.borrow();
            if tex.generate_mipmaps && tex.min_filter.uses_mipmaps() {
                if let Some(handle) = self.handle(tex.id()) {
                    let gl_tex_target = gl_target(tex.dimension);
                    state.bind_texture(context, gl_tex_target, Some(handle), None);
                    context.generate_mipmap(gl_tex_target);
                }
            }
        }
    }

    // ── Disposal ─────────────────────────────────────────────────────────────

    /// Reclaims GPU storage for a texture. Fails silently when the texture
    /// was never uploaded.
    pub fn dispose_texture(
        &mut self,
        context: &impl GlContext,
        state: &mut StateTracker,
        texture_id: u64,
    ) {
        let Some(props) = self.properties.remove(&texture_id) else {
            return;
        };
        self.leave_source_cache(context, state, props.source_id, &props.cache_key);
    }

    /// Reclaims every GL object owned by a render target, including its
    /// attachment textures.
    pub fn dispose_render_target(
        &mut self,
        context: &impl GlContext,
        state: &mut StateTracker,
        target: &RenderTarget,
    ) {
        let Some(props) = self.targets.remove(&target.id()) else {
            return;
        };
        for framebuffer in props.framebuffers {
            context.delete_framebuffer(framebuffer);
        }
        if let Some(msaa) = props.msaa_framebuffer {
            context.delete_framebuffer(msaa);
        }
        for renderbuffer in props.msaa_renderbuffers {
            context.delete_renderbuffer(renderbuffer);
        }
        if let Some(depth) = props.depth_renderbuffer {
            context.delete_renderbuffer(depth);
        }
        for texture in &target.textures {
            self.dispose_texture(context, state, texture.borrow().id());
        }
        if let Some(depth_texture) = &target.depth_texture {
            self.dispose_texture(context, state, depth_texture.borrow().id());
        }
    }

    /// Drops every GPU object (context loss / renderer disposal).
    pub fn dispose_all(&mut self, context: &impl GlContext) {
        for entries in self.sources.values() {
            for entry in entries.values() {
                context.delete_texture(entry.handle);
            }
        }
        self.sources.clear();
        self.properties.clear();
        for props in self.targets.values() {
            for framebuffer in &props.framebuffers {
                context.delete_framebuffer(*framebuffer);
            }
            if let Some(msaa) = props.msaa_framebuffer {
                context.delete_framebuffer(msaa);
            }
            for renderbuffer in &props.msaa_renderbuffers {
                context.delete_renderbuffer(*renderbuffer);
            }
            if let Some(depth) = props.depth_renderbuffer {
                context.delete_renderbuffer(depth);
            }
        }
        self.targets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_range_merge_stays_within_rows() {
        // 4x4 RGBA texture: one row is 16 components
        let mut ranges = vec![
            UpdateRange { start: 0, count: 8 },
            UpdateRange { start: 8, count: 8 },
            // next row, adjacent in the flat stream but not mergeable
            UpdateRange { start: 16, count: 4 },
        ];
        merge_texture_update_ranges(&mut ranges, 4, 4);
        assert_eq!(
            ranges,
            vec![
                UpdateRange { start: 0, count: 16 },
                UpdateRange { start: 16, count: 4 },
            ]
        );
    }

    #[test]
    fn texture_range_merge_is_idempotent() {
        let mut ranges = vec![
            UpdateRange { start: 4, count: 4 },
            UpdateRange { start: 0, count: 4 },
        ];
        merge_texture_update_ranges(&mut ranges, 4, 8);
        let once = ranges.clone();
        merge_texture_update_ranges(&mut ranges, 4, 8);
        assert_eq!(ranges, once);
    }
}
