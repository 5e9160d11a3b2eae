//! Headless recording backend.
//!
//! Implements [`GlContext`] without a GPU: every call is appended to an
//! in-memory log in WebGL-style spelling, handles come from a monotonic
//! counter, and device limits are configurable. Program introspection is
//! derived from the attached shader sources, so attribute and uniform
//! queries behave like a real driver for generated shaders.
//!
//! The renderer's own tests are the primary consumer (count calls, assert
//! ordering), but the backend is also handy for tracing a frame from client
//! code without touching a window system.

use std::cell::{Cell, RefCell};

use rustc_hash::{FxHashMap, FxHashSet};

use super::{
    consts as gl, ActiveInfo, BufferHandle, FramebufferHandle, GlContext, ProgramHandle,
    RenderbufferHandle, ShaderHandle, SyncHandle, TextureHandle, UniformLocation,
    VertexArrayHandle,
};

#[derive(Default)]
struct ProgramRecord {
    shaders: Vec<ShaderHandle>,
    attributes: Vec<ActiveInfo>,
    uniforms: Vec<ActiveInfo>,
    uniform_locations: FxHashMap<String, u32>,
    link_polls_left: u32,
}

/// A [`GlContext`] that records instead of drawing.
pub struct RecordingContext {
    calls: RefCell<Vec<String>>,
    next_handle: Cell<u32>,
    extensions: FxHashSet<String>,
    max_texture_size: i32,
    max_samples: i32,
    shader_sources: RefCell<FxHashMap<ShaderHandle, String>>,
    programs: RefCell<FxHashMap<ProgramHandle, ProgramRecord>>,
    /// Number of `clientWaitSync` polls that report `TIMEOUT_EXPIRED`
    /// before a sync object signals.
    pub sync_polls_until_signaled: Cell<u32>,
    /// Number of `programCompletionStatus` polls that report `false`
    /// before a link reports ready.
    pub link_polls_until_ready: u32,
    /// When `true`, every shader compile and program link reports failure.
    pub fail_compile: Cell<bool>,
}

impl Default for RecordingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingContext {
    #[must_use]
    pub fn new() -> Self {
        let mut extensions = FxHashSet::default();
        for ext in [
            "EXT_color_buffer_float",
            "EXT_color_buffer_half_float",
            "OES_texture_float_linear",
            "EXT_texture_filter_anisotropic",
        ] {
            extensions.insert(ext.to_string());
        }
        Self {
            calls: RefCell::new(Vec::new()),
            next_handle: Cell::new(1),
            extensions,
            max_texture_size: 8192,
            max_samples: 4,
            shader_sources: RefCell::new(FxHashMap::default()),
            programs: RefCell::new(FxHashMap::default()),
            sync_polls_until_signaled: Cell::new(0),
            link_polls_until_ready: 0,
            fail_compile: Cell::new(false),
        }
    }

    /// Adds an extension to the advertised set.
    #[must_use]
    pub fn with_extension(mut self, name: &str) -> Self {
        self.extensions.insert(name.to_string());
        self
    }

    /// Removes an extension from the advertised set.
    #[must_use]
    pub fn without_extension(mut self, name: &str) -> Self {
        self.extensions.remove(name);
        self
    }

    /// Overrides the reported `MAX_TEXTURE_SIZE`.
    #[must_use]
    pub fn with_max_texture_size(mut self, size: i32) -> Self {
        self.max_texture_size = size;
        self
    }

    // ── Log access ───────────────────────────────────────────────────────────

    /// Returns a copy of the call log.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Drains the call log and returns it.
    pub fn take_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    /// Number of logged calls whose name starts with `prefix`.
    #[must_use]
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// All logged calls whose name starts with `prefix`, in order.
    #[must_use]
    pub fn calls_matching(&self, prefix: &str) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn alloc(&self) -> u32 {
        let id = self.next_handle.get();
        self.next_handle.set(id + 1);
        id
    }

    /// Parses `in`/`uniform` declarations out of attached shader sources.
    /// Good enough for generated GLSL: one declaration per line, `;`-terminated.
    fn introspect(source: &str, keyword: &str) -> Vec<ActiveInfo> {
        let mut seen = FxHashSet::default();
        let mut out = Vec::new();
        for line in source.lines() {
            let line = line.trim();
            let Some(rest) = line.strip_prefix(keyword) else {
                continue;
            };
            let Some(decl) = rest.trim().strip_suffix(';') else {
                continue;
            };
            let mut tokens = decl.split_whitespace().rev();
            let Some(raw_name) = tokens.next() else {
                continue;
            };
            let (name, size) = match raw_name.split_once('[') {
                Some((n, count)) => {
                    let count = count.trim_end_matches(']').parse().unwrap_or(1);
                    (n, count)
                }
                None => (raw_name, 1),
            };
            if seen.insert(name.to_string()) {
                out.push(ActiveInfo {
                    name: name.to_string(),
                    size,
                    ty: 0,
                });
            }
        }
        out
    }
}

impl GlContext for RecordingContext {
    fn get_parameter_i32(&self, pname: u32) -> i32 {
        match pname {
            gl::MAX_TEXTURE_SIZE | gl::MAX_CUBE_MAP_TEXTURE_SIZE => self.max_texture_size,
            gl::MAX_SAMPLES => self.max_samples,
            gl::MAX_TEXTURE_IMAGE_UNITS | gl::MAX_VERTEX_TEXTURE_IMAGE_UNITS => 16,
            gl::MAX_COMBINED_TEXTURE_IMAGE_UNITS => 32,
            gl::MAX_VERTEX_ATTRIBS => 16,
            gl::MAX_COLOR_ATTACHMENTS | gl::MAX_DRAW_BUFFERS => 8,
            gl::MAX_ARRAY_TEXTURE_LAYERS => 256,
            gl::MAX_3D_TEXTURE_SIZE => 2048,
            _ => 0,
        }
    }

    fn supports_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    fn get_error(&self) -> u32 {
        gl::NO_ERROR
    }

    fn enable(&self, cap: u32) {
        self.record(format!("enable({cap:#06x})"));
    }

    fn disable(&self, cap: u32) {
        self.record(format!("disable({cap:#06x})"));
    }

    fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        self.record(format!("viewport({x}, {y}, {width}, {height})"));
    }

    fn scissor(&self, x: i32, y: i32, width: i32, height: i32) {
        self.record(format!("scissor({x}, {y}, {width}, {height})"));
    }

    fn clear(&self, mask: u32) {
        self.record(format!("clear({mask:#06x})"));
    }

    fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        self.record(format!("clearColor({r}, {g}, {b}, {a})"));
    }

    fn clear_depth(&self, depth: f32) {
        self.record(format!("clearDepth({depth})"));
    }

    fn clear_stencil(&self, stencil: i32) {
        self.record(format!("clearStencil({stencil})"));
    }

    fn clear_buffer_iv(&self, buffer: u32, draw_buffer: i32, values: &[i32; 4]) {
        self.record(format!("clearBufferiv({buffer:#06x}, {draw_buffer}, {values:?})"));
    }

    fn clear_buffer_uiv(&self, buffer: u32, draw_buffer: i32, values: &[u32; 4]) {
        self.record(format!("clearBufferuiv({buffer:#06x}, {draw_buffer}, {values:?})"));
    }

    fn color_mask(&self, r: bool, g: bool, b: bool, a: bool) {
        self.record(format!("colorMask({r}, {g}, {b}, {a})"));
    }

    fn depth_mask(&self, flag: bool) {
        self.record(format!("depthMask({flag})"));
    }

    fn depth_func(&self, func: u32) {
        self.record(format!("depthFunc({func:#06x})"));
    }

    fn stencil_mask(&self, mask: u32) {
        self.record(format!("stencilMask({mask:#010x})"));
    }

    fn stencil_func(&self, func: u32, reference: i32, mask: u32) {
        self.record(format!("stencilFunc({func:#06x}, {reference}, {mask:#010x})"));
    }

    fn stencil_op(&self, fail: u32, zfail: u32, zpass: u32) {
        self.record(format!("stencilOp({fail:#06x}, {zfail:#06x}, {zpass:#06x})"));
    }

    fn blend_equation_separate(&self, mode_rgb: u32, mode_alpha: u32) {
        self.record(format!("blendEquationSeparate({mode_rgb:#06x}, {mode_alpha:#06x})"));
    }

    fn blend_func_separate(&self, src_rgb: u32, dst_rgb: u32, src_alpha: u32, dst_alpha: u32) {
        self.record(format!(
            "blendFuncSeparate({src_rgb:#06x}, {dst_rgb:#06x}, {src_alpha:#06x}, {dst_alpha:#06x})"
        ));
    }

    fn blend_color(&self, r: f32, g: f32, b: f32, a: f32) {
        self.record(format!("blendColor({r}, {g}, {b}, {a})"));
    }

    fn cull_face(&self, mode: u32) {
        self.record(format!("cullFace({mode:#06x})"));
    }

    fn front_face(&self, mode: u32) {
        self.record(format!("frontFace({mode:#06x})"));
    }

    fn polygon_offset(&self, factor: f32, units: f32) {
        self.record(format!("polygonOffset({factor}, {units})"));
    }

    fn line_width(&self, width: f32) {
        self.record(format!("lineWidth({width})"));
    }

    fn pixel_store_i(&self, pname: u32, param: i32) {
        self.record(format!("pixelStorei({pname:#06x}, {param})"));
    }

    fn create_buffer(&self) -> BufferHandle {
        let h = BufferHandle(self.alloc());
        self.record(format!("createBuffer() -> {}", h.0));
        h
    }

    fn delete_buffer(&self, buffer: BufferHandle) {
        self.record(format!("deleteBuffer({})", buffer.0));
    }

    fn bind_buffer(&self, target: u32, buffer: Option<BufferHandle>) {
        self.record(format!("bindBuffer({target:#06x}, {:?})", buffer.map(|b| b.0)));
    }

    fn buffer_data(&self, target: u32, data: &[u8], usage: u32) {
        self.record(format!("bufferData({target:#06x}, len={}, {usage:#06x})", data.len()));
    }

    fn buffer_data_size(&self, target: u32, size: usize, usage: u32) {
        self.record(format!("bufferData({target:#06x}, size={size}, {usage:#06x})"));
    }

    fn buffer_sub_data(&self, target: u32, offset: usize, data: &[u8]) {
        self.record(format!("bufferSubData({target:#06x}, {offset}, len={})", data.len()));
    }

    fn get_buffer_sub_data(&self, target: u32, offset: usize, out: &mut [u8]) {
        self.record(format!("getBufferSubData({target:#06x}, {offset}, len={})", out.len()));
        out.fill(0);
    }

    fn create_vertex_array(&self) -> VertexArrayHandle {
        let h = VertexArrayHandle(self.alloc());
        self.record(format!("createVertexArray() -> {}", h.0));
        h
    }

    fn delete_vertex_array(&self, vao: VertexArrayHandle) {
        self.record(format!("deleteVertexArray({})", vao.0));
    }

    fn bind_vertex_array(&self, vao: Option<VertexArrayHandle>) {
        self.record(format!("bindVertexArray({:?})", vao.map(|v| v.0)));
    }

    fn enable_vertex_attrib(&self, index: u32) {
        self.record(format!("enableVertexAttribArray({index})"));
    }

    fn disable_vertex_attrib(&self, index: u32) {
        self.record(format!("disableVertexAttribArray({index})"));
    }

    fn vertex_attrib_pointer(
        &self,
        index: u32,
        size: i32,
        ty: u32,
        normalized: bool,
        stride: i32,
        offset: usize,
    ) {
        self.record(format!(
            "vertexAttribPointer({index}, {size}, {ty:#06x}, {normalized}, {stride}, {offset})"
        ));
    }

    fn vertex_attrib_i_pointer(&self, index: u32, size: i32, ty: u32, stride: i32, offset: usize) {
        self.record(format!(
            "vertexAttribIPointer({index}, {size}, {ty:#06x}, {stride}, {offset})"
        ));
    }

    fn vertex_attrib_divisor(&self, index: u32, divisor: u32) {
        self.record(format!("vertexAttribDivisor({index}, {divisor})"));
    }

    fn create_texture(&self) -> TextureHandle {
        let h = TextureHandle(self.alloc());
        self.record(format!("createTexture() -> {}", h.0));
        h
    }

    fn delete_texture(&self, texture: TextureHandle) {
        self.record(format!("deleteTexture({})", texture.0));
    }

    fn active_texture(&self, unit: u32) {
        self.record(format!("activeTexture({})", unit - gl::TEXTURE0));
    }

    fn bind_texture(&self, target: u32, texture: Option<TextureHandle>) {
        self.record(format!("bindTexture({target:#06x}, {:?})", texture.map(|t| t.0)));
    }

    fn tex_parameter_i(&self, target: u32, pname: u32, param: i32) {
        self.record(format!("texParameteri({target:#06x}, {pname:#06x}, {param})"));
    }

    fn tex_parameter_f(&self, target: u32, pname: u32, param: f32) {
        self.record(format!("texParameterf({target:#06x}, {pname:#06x}, {param})"));
    }

    fn tex_storage_2d(&self, target: u32, levels: i32, internal_format: u32, width: i32, height: i32) {
        self.record(format!(
            "texStorage2D({target:#06x}, {levels}, {internal_format:#06x}, {width}, {height})"
        ));
    }

    fn tex_storage_3d(
        &self,
        target: u32,
        levels: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        depth: i32,
    ) {
        self.record(format!(
            "texStorage3D({target:#06x}, {levels}, {internal_format:#06x}, {width}, {height}, {depth})"
        ));
    }

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
    ) {
        self.record(format!(
            "texImage2D({target:#06x}, {level}, {internal_format:#06x}, {width}, {height}, {format:#06x}, {ty:#06x}, len={:?})",
            data.map(<[u8]>::len)
        ));
    }

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
    ) {
        self.record(format!(
            "texSubImage2D({target:#06x}, {level}, {x}, {y}, {width}, {height}, {format:#06x}, {ty:#06x}, len={})",
            data.len()
        ));
    }

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
    ) {
        self.record(format!(
            "texImage3D({target:#06x}, {level}, {internal_format:#06x}, {width}, {height}, {depth}, {format:#06x}, {ty:#06x}, len={:?})",
            data.map(<[u8]>::len)
        ));
    }

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
    ) {
        self.record(format!(
            "texSubImage3D({target:#06x}, {level}, {x}, {y}, {z}, {width}, {height}, {depth}, {format:#06x}, {ty:#06x}, len={})",
            data.len()
        ));
    }

    fn compressed_tex_image_2d(
        &self,
        target: u32,
        level: i32,
        internal_format: u32,
        width: i32,
        height: i32,
        data: &[u8],
    ) {
        self.record(format!(
            "compressedTexImage2D({target:#06x}, {level}, {internal_format:#06x}, {width}, {height}, len={})",
            data.len()
        ));
    }

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
    ) {
        self.record(format!(
            "compressedTexSubImage2D({target:#06x}, {level}, {x}, {y}, {width}, {height}, {format:#06x}, len={})",
            data.len()
        ));
    }

    fn generate_mipmap(&self, target: u32) {
        self.record(format!("generateMipmap({target:#06x})"));
    }

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
    ) {
        self.record(format!(
            "copyTexSubImage2D({target:#06x}, {level}, {xoffset}, {yoffset}, {x}, {y}, {width}, {height})"
        ));
    }

    fn create_framebuffer(&self) -> FramebufferHandle {
        let h = FramebufferHandle(self.alloc());
        self.record(format!("createFramebuffer() -> {}", h.0));
        h
    }

    fn delete_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.record(format!("deleteFramebuffer({})", framebuffer.0));
    }

    fn bind_framebuffer(&self, target: u32, framebuffer: Option<FramebufferHandle>) {
        self.record(format!(
            "bindFramebuffer({target:#06x}, {:?})",
            framebuffer.map(|f| f.0)
        ));
    }

    fn framebuffer_texture_2d(
        &self,
        target: u32,
        attachment: u32,
        tex_target: u32,
        texture: TextureHandle,
        level: i32,
    ) {
        self.record(format!(
            "framebufferTexture2D({target:#06x}, {attachment:#06x}, {tex_target:#06x}, {}, {level})",
            texture.0
        ));
    }

    fn framebuffer_texture_layer(
        &self,
        target: u32,
        attachment: u32,
        texture: TextureHandle,
        level: i32,
        layer: i32,
    ) {
        self.record(format!(
            "framebufferTextureLayer({target:#06x}, {attachment:#06x}, {}, {level}, {layer})",
            texture.0
        ));
    }

    fn framebuffer_renderbuffer(&self, target: u32, attachment: u32, renderbuffer: RenderbufferHandle) {
        self.record(format!(
            "framebufferRenderbuffer({target:#06x}, {attachment:#06x}, {})",
            renderbuffer.0
        ));
    }

    fn create_renderbuffer(&self) -> RenderbufferHandle {
        let h = RenderbufferHandle(self.alloc());
        self.record(format!("createRenderbuffer() -> {}", h.0));
        h
    }

    fn delete_renderbuffer(&self, renderbuffer: RenderbufferHandle) {
        self.record(format!("deleteRenderbuffer({})", renderbuffer.0));
    }

    fn bind_renderbuffer(&self, renderbuffer: Option<RenderbufferHandle>) {
        self.record(format!("bindRenderbuffer({:?})", renderbuffer.map(|r| r.0)));
    }

    fn renderbuffer_storage(&self, internal_format: u32, width: i32, height: i32) {
        self.record(format!("renderbufferStorage({internal_format:#06x}, {width}, {height})"));
    }

    fn renderbuffer_storage_multisample(
        &self,
        samples: i32,
        internal_format: u32,
        width: i32,
        height: i32,
    ) {
        self.record(format!(
            "renderbufferStorageMultisample({samples}, {internal_format:#06x}, {width}, {height})"
        ));
    }

    fn blit_framebuffer(&self, src: [i32; 4], dst: [i32; 4], mask: u32, filter: u32) {
        self.record(format!("blitFramebuffer({src:?}, {dst:?}, {mask:#06x}, {filter:#06x})"));
    }

    fn invalidate_framebuffer(&self, target: u32, attachments: &[u32]) {
        self.record(format!("invalidateFramebuffer({target:#06x}, {attachments:?})"));
    }

    fn draw_buffers(&self, buffers: &[u32]) {
        self.record(format!("drawBuffers({buffers:?})"));
    }

    fn read_buffer(&self, src: u32) {
        self.record(format!("readBuffer({src:#06x})"));
    }

    fn check_framebuffer_status(&self, _target: u32) -> u32 {
        gl::FRAMEBUFFER_COMPLETE
    }

    fn create_shader(&self, ty: u32) -> ShaderHandle {
        let h = ShaderHandle(self.alloc());
        self.record(format!("createShader({ty:#06x}) -> {}", h.0));
        h
    }

    fn shader_source(&self, shader: ShaderHandle, source: &str) {
        self.record(format!("shaderSource({}, len={})", shader.0, source.len()));
        self.shader_sources.borrow_mut().insert(shader, source.to_string());
    }

    fn compile_shader(&self, shader: ShaderHandle) {
        self.record(format!("compileShader({})", shader.0));
    }

    fn shader_compile_status(&self, _shader: ShaderHandle) -> bool {
        !self.fail_compile.get()
    }

    fn shader_info_log(&self, _shader: ShaderHandle) -> String {
        if self.fail_compile.get() {
            "ERROR: simulated compile failure".to_string()
        } else {
            String::new()
        }
    }

    fn delete_shader(&self, shader: ShaderHandle) {
        self.record(format!("deleteShader({})", shader.0));
    }

    fn create_program(&self) -> ProgramHandle {
        let h = ProgramHandle(self.alloc());
        self.record(format!("createProgram() -> {}", h.0));
        self.programs.borrow_mut().insert(h, ProgramRecord::default());
        h
    }

    fn attach_shader(&self, program: ProgramHandle, shader: ShaderHandle) {
        self.record(format!("attachShader({}, {})", program.0, shader.0));
        if let Some(rec) = self.programs.borrow_mut().get_mut(&program) {
            rec.shaders.push(shader);
        }
    }

    fn link_program(&self, program: ProgramHandle) {
        self.record(format!("linkProgram({})", program.0));
        let sources = self.shader_sources.borrow();
        let mut programs = self.programs.borrow_mut();
        if let Some(rec) = programs.get_mut(&program) {
            rec.attributes.clear();
            rec.uniforms.clear();
            for shader in &rec.shaders {
                if let Some(src) = sources.get(shader) {
                    if src.contains("gl_Position") {
                        rec.attributes = RecordingContext::introspect(src, "in ");
                    }
                    for info in RecordingContext::introspect(src, "uniform ") {
                        if !rec.uniforms.iter().any(|u| u.name == info.name) {
                            rec.uniforms.push(info);
                        }
                    }
                }
            }
            rec.link_polls_left = self.link_polls_until_ready;
        }
    }

    fn program_link_status(&self, _program: ProgramHandle) -> bool {
        !self.fail_compile.get()
    }

    fn program_completion_status(&self, program: ProgramHandle) -> bool {
        let mut programs = self.programs.borrow_mut();
        match programs.get_mut(&program) {
            Some(rec) if rec.link_polls_left > 0 => {
                rec.link_polls_left -= 1;
                false
            }
            _ => true,
        }
    }

    fn program_info_log(&self, _program: ProgramHandle) -> String {
        if self.fail_compile.get() {
            "ERROR: simulated link failure".to_string()
        } else {
            String::new()
        }
    }

    fn delete_program(&self, program: ProgramHandle) {
        self.record(format!("deleteProgram({})", program.0));
        self.programs.borrow_mut().remove(&program);
    }

    fn use_program(&self, program: Option<ProgramHandle>) {
        self.record(format!("useProgram({:?})", program.map(|p| p.0)));
    }

    fn active_attributes(&self, program: ProgramHandle) -> Vec<ActiveInfo> {
        self.programs
            .borrow()
            .get(&program)
            .map(|rec| rec.attributes.clone())
            .unwrap_or_default()
    }

    fn active_uniforms(&self, program: ProgramHandle) -> Vec<ActiveInfo> {
        self.programs
            .borrow()
            .get(&program)
            .map(|rec| rec.uniforms.clone())
            .unwrap_or_default()
    }

    fn get_attrib_location(&self, program: ProgramHandle, name: &str) -> Option<u32> {
        self.programs.borrow().get(&program).and_then(|rec| {
            rec.attributes
                .iter()
                .position(|a| a.name == name)
                .map(|i| i as u32)
        })
    }

    fn get_uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        let mut programs = self.programs.borrow_mut();
        let rec = programs.get_mut(&program)?;
        if !rec.uniforms.iter().any(|u| u.name == name || u.name == name.trim_end_matches("[0]")) {
            return None;
        }
        let next = rec.uniform_locations.len() as u32;
        let loc = *rec.uniform_locations.entry(name.to_string()).or_insert(next);
        Some(UniformLocation(loc))
    }

    fn uniform_1i(&self, location: UniformLocation, v: i32) {
        self.record(format!("uniform1i({}, {v})", location.0));
    }

    fn uniform_1f(&self, location: UniformLocation, v: f32) {
        self.record(format!("uniform1f({}, {v})", location.0));
    }

    fn uniform_2f(&self, location: UniformLocation, x: f32, y: f32) {
        self.record(format!("uniform2f({}, {x}, {y})", location.0));
    }

    fn uniform_3f(&self, location: UniformLocation, x: f32, y: f32, z: f32) {
        self.record(format!("uniform3f({}, {x}, {y}, {z})", location.0));
    }

    fn uniform_4f(&self, location: UniformLocation, x: f32, y: f32, z: f32, w: f32) {
        self.record(format!("uniform4f({}, {x}, {y}, {z}, {w})", location.0));
    }

    fn uniform_1fv(&self, location: UniformLocation, v: &[f32]) {
        self.record(format!("uniform1fv({}, len={})", location.0, v.len()));
    }

    fn uniform_3fv(&self, location: UniformLocation, v: &[f32]) {
        self.record(format!("uniform3fv({}, len={})", location.0, v.len()));
    }

    fn uniform_4fv(&self, location: UniformLocation, v: &[f32]) {
        self.record(format!("uniform4fv({}, len={})", location.0, v.len()));
    }

    fn uniform_1iv(&self, location: UniformLocation, v: &[i32]) {
        self.record(format!("uniform1iv({}, len={})", location.0, v.len()));
    }

    fn uniform_matrix_3fv(&self, location: UniformLocation, _v: &[f32; 9]) {
        self.record(format!("uniformMatrix3fv({})", location.0));
    }

    fn uniform_matrix_4fv(&self, location: UniformLocation, _v: &[f32; 16]) {
        self.record(format!("uniformMatrix4fv({})", location.0));
    }

    fn uniform_matrix_4fv_array(&self, location: UniformLocation, v: &[f32]) {
        self.record(format!("uniformMatrix4fv({}, count={})", location.0, v.len() / 16));
    }

    fn draw_arrays(&self, mode: u32, first: i32, count: i32) {
        self.record(format!("drawArrays({mode:#06x}, {first}, {count})"));
    }

    fn draw_elements(&self, mode: u32, count: i32, ty: u32, offset: usize) {
        self.record(format!("drawElements({mode:#06x}, {count}, {ty:#06x}, {offset})"));
    }

    fn draw_arrays_instanced(&self, mode: u32, first: i32, count: i32, instances: i32) {
        self.record(format!("drawArraysInstanced({mode:#06x}, {first}, {count}, {instances})"));
    }

    fn draw_elements_instanced(&self, mode: u32, count: i32, ty: u32, offset: usize, instances: i32) {
        self.record(format!(
            "drawElementsInstanced({mode:#06x}, {count}, {ty:#06x}, {offset}, {instances})"
        ));
    }

    fn read_pixels(&self, x: i32, y: i32, width: i32, height: i32, format: u32, ty: u32, out: &mut [u8]) {
        self.record(format!(
            "readPixels({x}, {y}, {width}, {height}, {format:#06x}, {ty:#06x}, len={})",
            out.len()
        ));
        out.fill(0);
    }

    fn read_pixels_to_buffer(
        &self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        buffer_offset: usize,
    ) {
        self.record(format!(
            "readPixels({x}, {y}, {width}, {height}, {format:#06x}, {ty:#06x}, offset={buffer_offset})"
        ));
    }

    fn fence_sync(&self) -> SyncHandle {
        let h = SyncHandle(self.alloc());
        self.record(format!("fenceSync() -> {}", h.0));
        h
    }

    fn client_wait_sync(&self, sync: SyncHandle, _flags: u32, _timeout_ns: u64) -> u32 {
        self.record(format!("clientWaitSync({})", sync.0));
        let left = self.sync_polls_until_signaled.get();
        if left > 0 {
            self.sync_polls_until_signaled.set(left - 1);
            gl::TIMEOUT_EXPIRED
        } else {
            gl::ALREADY_SIGNALED
        }
    }

    fn delete_sync(&self, sync: SyncHandle) {
        self.record(format!("deleteSync({})", sync.0));
    }

    fn flush(&self) {
        self.record("flush()".to_string());
    }

    fn finish(&self) {
        self.record("finish()".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique() {
        let ctx = RecordingContext::new();
        let a = ctx.create_buffer();
        let b = ctx.create_buffer();
        let t = ctx.create_texture();
        assert_ne!(a.0, b.0);
        assert_ne!(b.0, t.0);
    }

    #[test]
    fn introspection_finds_attributes_and_uniforms() {
        let ctx = RecordingContext::new();
        let vs = ctx.create_shader(gl::VERTEX_SHADER);
        ctx.shader_source(
            vs,
            "#version 300 es\nin vec3 position;\nin vec2 uv;\nuniform mat4 projectionMatrix;\nvoid main() { gl_Position = vec4(position, 1.0); }\n",
        );
        let program = ctx.create_program();
        ctx.attach_shader(program, vs);
        ctx.link_program(program);

        assert_eq!(ctx.get_attrib_location(program, "position"), Some(0));
        assert_eq!(ctx.get_attrib_location(program, "uv"), Some(1));
        assert_eq!(ctx.get_attrib_location(program, "normal"), None);
        assert!(ctx.get_uniform_location(program, "projectionMatrix").is_some());
    }

    #[test]
    fn call_log_is_ordered() {
        let ctx = RecordingContext::new();
        ctx.enable(gl::BLEND);
        ctx.disable(gl::BLEND);
        let calls = ctx.take_calls();
        assert_eq!(calls[0], "enable(0x0be2)");
        assert_eq!(calls[1], "disable(0x0be2)");
        assert!(ctx.calls().is_empty());
    }
}
