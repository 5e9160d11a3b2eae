//! WebGL2-class device boundary.
//!
//! The renderer core never talks to a platform GL binding directly. Every GPU
//! entry point it needs is mirrored on the [`GlContext`] trait, with handles
//! as opaque newtypes allocated by the context. A platform backend (browser
//! WebGL2, EGL/GLES3, desktop GL core) implements the trait once; the
//! [`recording`] backend implements it headlessly for tests and call tracing.
//!
//! Numeric enum values are passed as plain `u32` from [`consts`] so that the
//! trait stays a thin transcription of the underlying API instead of a second
//! type system layered on top of it.

pub mod consts;
pub mod recording;

/// Opaque GL texture object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// Opaque GL buffer object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

/// Opaque GL framebuffer object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub u32);

/// Opaque GL renderbuffer object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderbufferHandle(pub u32);

/// Opaque GL vertex-array object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexArrayHandle(pub u32);

/// Opaque GL shader object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u32);

/// Opaque GL program object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u32);

/// Opaque GL fence-sync object handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncHandle(pub u32);

/// Opaque uniform location within a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Name/type/size record for one active attribute or uniform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveInfo {
    pub name: String,
    pub size: i32,
    pub ty: u32,
}

/// Safe mirror of the WebGL2 entry points used by the renderer core.
///
/// All methods take `&self`: GL contexts are interior-mutable by nature and
/// the renderer is single-threaded, so exclusive borrows would only get in
/// the way of passing the context alongside `&mut` component state.
pub trait GlContext {
    // ── Queries ──────────────────────────────────────────────────────────────

    fn get_parameter_i32(&self, pname: u32) -> i32;
    fn supports_extension(&self, name: &str) -> bool;
    fn get_error(&self) -> u32;

    // ── Global state ─────────────────────────────────────────────────────────

    fn enable(&self, cap: u32);
    fn disable(&self, cap: u32);
    fn viewport(&self, x: i32, y: i32, width: i32, height: i32);
    fn scissor(&self, x: i32, y: i32, width: i32, height: i32);
    fn clear(&self, mask: u32);
    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32);
    fn clear_depth(&self, depth: f32);
    fn clear_stencil(&self, stencil: i32);
    fn clear_buffer_iv(&self, buffer: u32, draw_buffer: i32, values: &[i32; 4]);
    fn clear_buffer_uiv(&self, buffer: u32, draw_buffer: i32, values: &[u32; 4]);
    fn color_mask(&self, r: bool, g: bool, b: bool, a: bool);
    fn depth_mask(&self, flag: bool);
    fn depth_func(&self, func: u32);
    fn stencil_mask(&self, mask: u32);
    fn stencil_func(&self, func: u32, reference: i32, mask: u32);
    fn stencil_op(&self, fail: u32, zfail: u32, zpass: u32);
    fn blend_equation_separate(&self, mode_rgb: u32, mode_alpha: u32);
    fn blend_func_separate(&self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32);
    fn blend_color(&self, r: f32, g: f32, b: f32, a: f32);
    fn cull_face(&self, mode: u32);
    fn front_face(&self, mode: u32);
    fn polygon_offset(&self, factor: f32, units: f32);
    fn line_width(&self, width: f32);
    fn pixel_store_i(&self, pname: u32, param: i32);

    // ── Buffer objects ───────────────────────────────────────────────────────

    fn create_buffer(&self) -> BufferHandle;
    fn delete_buffer(&self, buffer: BufferHandle);
    fn bind_buffer(&self, target: u32, buffer: Option<BufferHandle>);
    fn buffer_data(&self, target: u32, data: &[u8], usage: u32);
    fn buffer_data_size(&self, target: u32, size: usize, usage: u32);
    fn buffer_sub_data(&self, target: u32, offset: usize, data: &[u8]);
    fn get_buffer_sub_data(&self, target: u32, offset: usize, out: &mut [u8]);

    // ── Vertex arrays ────────────────────────────────────────────────────────

    fn create_vertex_array(&self) -> VertexArrayHandle;
    fn delete_vertex_array(&self, vao: VertexArrayHandle);
    fn bind_vertex_array(&self, vao: Option<VertexArrayHandle>);
    fn enable_vertex_attrib(&self, index: u32);
    fn disable_vertex_attrib(&self, index: u32);
    fn vertex_attrib_pointer(
        &self,
        index: u32,
        size: i32,
        ty: u32,
        normalized: bool,
        stride: i32,
        offset: usize,
    );
    fn vertex_attrib_i_pointer(&self, index: u32, size: i32, ty: u32, stride: i32, offset: usize);
    fn vertex_attrib_divisor(&self, index: u32, divisor: u32);

    // ── Textures ─────────────────────────────────────────────────────────────

    fn create_texture(&self) -> TextureHandle;
    fn delete_texture(&self, texture: TextureHandle);
    fn active_texture(&self, unit: u32);
    fn bind_texture(&self, target: u32, texture: Option<TextureHandle>);
    fn tex_parameter_i(&self, target: u32, pname: u32, param: i32);
    fn tex_parameter_f(&self, target: u32, pname: u32, param: f32);
    fn tex_storage_2d(&self, target: u32, levels: i32, internal_format: u32, width: i32, height: i32);
    fn tex_storage_3d(
        &self,
        target: u32,
        levels: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        depth: i32,
    );
    fn tex_image_2d(
        &self,
        target: u32,
        level: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        data: Option<&[u8]>,
    );
    fn tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        data: &[u8],
    );
    fn tex_image_3d(
        &self,
        target: u32,
        level: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        depth: i32,
        format: u32,
        ty: u32,
        data: Option<&[u8]>,
    );
    fn tex_sub_image_3d(
        &self,
        target: u32,
        level: i32,
        x: i32,
        y: i32,
        z: i32,
        width: i32,
        height: i32,
        depth: i32,
        format: u32,
        ty: u32,
        data: &[u8],
    );
    fn compressed_tex_image_2d(
        &self,
        target: u32,
        level: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        data: &[u8],
    );
    fn compressed_tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        data: &[u8],
    );
    fn generate_mipmap(&self, target: u32);
    fn copy_tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        xoffset: i32,
        yoffset: i32,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    );

    // ── Framebuffers / renderbuffers ─────────────────────────────────────────

    fn create_framebuffer(&self) -> FramebufferHandle;
    fn delete_framebuffer(&self, framebuffer: FramebufferHandle);
    fn bind_framebuffer(&self, target: u32, framebuffer: Option<FramebufferHandle>);
    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        tex_target: u32,
        texture: TextureHandle,
        level: i32,
    );
    fn framebuffer_texture_layer(
        &self,
        target: u32,
        attachment: u32,
        texture: TextureHandle,
        level: i32,
        layer: i32,
    );
    fn framebuffer_renderbuffer(&self, target: u32, attachment: u32, renderbuffer: RenderbufferHandle);
    fn create_renderbuffer(&self) -> RenderbufferHandle;
    fn delete_renderbuffer(&self, renderbuffer: RenderbufferHandle);
    fn bind_renderbuffer(&self, renderbuffer: Option<RenderbufferHandle>);
    fn renderbuffer_storage(&self, internal_format: u32, width: i32, height: i32);
    fn renderbuffer_storage_multisample(
        &self,
        samples: i32,
        internal_format: u32,
        width: i32,
        height: i32,
    );
    fn blit_framebuffer(&self, src: [i32; 4], dst: [i32; 4], mask: u32, filter: u32);
    fn invalidate_framebuffer(&self, target: u32, attachments: &[u32]);
    fn draw_buffers(&self, buffers: &[u32]);
    fn read_buffer(&self, src: u32);
    fn check_framebuffer_status(&self, target: u32) -> u32;

    // ── Shaders / programs ───────────────────────────────────────────────────

    fn create_shader(&self, ty: u32) -> ShaderHandle;
    fn shader_source(&self, shader: ShaderHandle, source: &str);
    fn compile_shader(&self, shader: ShaderHandle);
    fn shader_compile_status(&self, shader: ShaderHandle) -> bool;
    fn shader_info_log(&self, shader: ShaderHandle) -> String;
    fn delete_shader(&self, shader: ShaderHandle);
    fn create_program(&self) -> ProgramHandle;
    fn attach_shader(&self, program: ProgramHandle, shader: ShaderHandle);
    fn link_program(&self, program: ProgramHandle);
    fn program_link_status(&self, program: ProgramHandle) -> bool;
    /// `KHR_parallel_shader_compile` completion poll; `true` when linking is done.
    fn program_completion_status(&self, program: ProgramHandle) -> bool;
    fn program_info_log(&self, program: ProgramHandle) -> String;
    fn delete_program(&self, program: ProgramHandle);
    fn use_program(&self, program: Option<ProgramHandle>);
    fn active_attributes(&self, program: ProgramHandle) -> Vec<ActiveInfo>;
    fn active_uniforms(&self, program: ProgramHandle) -> Vec<ActiveInfo>;
    fn get_attrib_location(&self, program: ProgramHandle, name: &str) -> Option<u32>;
    fn get_uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;
    fn uniform_1i(&self, location: UniformLocation, v: i32);
    fn uniform_1f(&self, location: UniformLocation, v: f32);
    fn uniform_2f(&self, location: UniformLocation, x: f32, y: f32);
    fn uniform_3f(&self, location: UniformLocation, x: f32, y: f32, z: f32);
    fn uniform_4f(&self, location: UniformLocation, x: f32, y: f32, z: f32, w: f32);
    fn uniform_1fv(&self, location: UniformLocation, v: &[f32]);
    fn uniform_3fv(&self, location: UniformLocation, v: &[f32]);
    fn uniform_4fv(&self, location: UniformLocation, v: &[f32]);
    fn uniform_1iv(&self, location: UniformLocation, v: &[i32]);
    fn uniform_matrix_3fv(&self, location: UniformLocation, v: &[f32; 9]);
    fn uniform_matrix_4fv(&self, location: UniformLocation, v: &[f32; 16]);
    /// Array-of-mat4 upload; `v.len()` is a multiple of 16.
    fn uniform_matrix_4fv_array(&self, location: UniformLocation, v: &[f32]);

    // ── Draws ────────────────────────────────────────────────────────────────

    fn draw_arrays(&self, mode: u32, first: i32, count: i32);
    fn draw_elements(&self, mode: u32, count: i32, ty: u32, offset: usize);
    fn draw_arrays_instanced(&self, mode: u32, first: i32, count: i32, instances: i32);
    fn draw_elements_instanced(&self, mode: u32, count: i32, ty: u32, offset: usize, instances: i32);

    // ── Reads and synchronisation ────────────────────────────────────────────

    fn read_pixels(&self, x: i32, y: i32, width: i32, height: i32, format: u32, ty: u32, out: &mut [u8]);
    /// `readPixels` into the bound `PIXEL_PACK_BUFFER` at `buffer_offset`.
    fn read_pixels_to_buffer(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        buffer_offset: usize,
    );
    fn fence_sync(&self) -> SyncHandle;
    fn client_wait_sync(&self, sync: SyncHandle, flags: u32, timeout_ns: u64) -> u32;
    fn delete_sync(&self, sync: SyncHandle);
    fn flush(&self);
    fn finish(&self);
}
