//! Native OpenGL backend over `glow`.
//!
//! Handles cross this seam as raw GL ids; glow's typed wrappers are
//! reconstructed on the way in. Uniform locations are opaque driver values,
//! so they are parked in a table and addressed by index instead.

use crate::backend::{GlBackend, MAX_TEXTURE_MAX_ANISOTROPY, Rect2};
use crate::format::TextureFormat;
use glow::{HasContext, PixelUnpackData};
use log::warn;
use std::num::NonZeroU32;

pub struct NativeBackend {
    gl: glow::Context,
    use_gles: bool,
    context_version: u16,
    locations: Vec<glow::UniformLocation>,
}

impl NativeBackend {
    /// Wrap an already-current `glow::Context`. The caller states the
    /// context flavor it created; shader preambles and capability defaults
    /// derive from it.
    pub fn new(gl: glow::Context, use_gles: bool, context_version: u16) -> Self {
        debug_assert!(
            context_version >= 30
                || (use_gles && context_version == 20)
                || (!use_gles && context_version == 21),
            "unsupported context version"
        );
        Self {
            gl,
            use_gles,
            context_version,
            locations: Vec::new(),
        }
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }
}

fn nz(id: u32) -> NonZeroU32 {
    debug_assert!(id != 0, "null handle where an object is required");
    NonZeroU32::new(id).expect("null gl handle")
}

#[inline(always)]
fn buf(id: u32) -> glow::NativeBuffer {
    glow::NativeBuffer(nz(id))
}

#[inline(always)]
fn tex(id: u32) -> glow::NativeTexture {
    glow::NativeTexture(nz(id))
}

#[inline(always)]
fn fbo(id: u32) -> glow::NativeFramebuffer {
    glow::NativeFramebuffer(nz(id))
}

#[inline(always)]
fn rbo(id: u32) -> glow::NativeRenderbuffer {
    glow::NativeRenderbuffer(nz(id))
}

#[inline(always)]
fn shd(id: u32) -> glow::NativeShader {
    glow::NativeShader(nz(id))
}

#[inline(always)]
fn prg(id: u32) -> glow::NativeProgram {
    glow::NativeProgram(nz(id))
}

#[inline(always)]
fn vao(id: u32) -> glow::NativeVertexArray {
    glow::NativeVertexArray(nz(id))
}

#[inline(always)]
fn qry(id: u32) -> glow::NativeQuery {
    glow::NativeQuery(nz(id))
}

struct Texel {
    internal: i32,
    format: u32,
    ty: u32,
}

fn texel(format: TextureFormat) -> Texel {
    use TextureFormat as F;
    let (internal, format, ty) = match format {
        F::Rgb565 => (glow::RGB, glow::RGB, glow::UNSIGNED_SHORT_5_6_5),
        F::Srgb8 => (glow::SRGB8, glow::RGB, glow::UNSIGNED_BYTE),
        F::Srgb8A8 => (glow::SRGB8_ALPHA8, glow::RGBA, glow::UNSIGNED_BYTE),
        F::Rgba8 => (glow::RGBA, glow::RGBA, glow::UNSIGNED_BYTE),
        F::Rgb10A2 => (glow::RGB10_A2, glow::RGBA, glow::UNSIGNED_INT_2_10_10_10_REV),
        F::R32Ui => (glow::R32UI, glow::RED_INTEGER, glow::UNSIGNED_INT),
        F::Rg11B10F => (glow::R11F_G11F_B10F, glow::RGB, glow::FLOAT),
        F::Rgba16F => (glow::RGBA16F, glow::RGBA, glow::FLOAT),
        F::R32F => (glow::R32F, glow::RED, glow::FLOAT),
        F::Rg16F => (glow::RG16F, glow::RG, glow::FLOAT),
        F::Rg32F => (glow::RG32F, glow::RG, glow::FLOAT),
        F::D16 => (
            glow::DEPTH_COMPONENT16,
            glow::DEPTH_COMPONENT,
            glow::UNSIGNED_BYTE,
        ),
        F::D24 => (
            glow::DEPTH_COMPONENT24,
            glow::DEPTH_COMPONENT,
            glow::UNSIGNED_BYTE,
        ),
        F::D32 => (
            glow::DEPTH_COMPONENT32,
            glow::DEPTH_COMPONENT,
            glow::UNSIGNED_INT,
        ),
        F::D32F => (glow::DEPTH_COMPONENT32F, glow::DEPTH_COMPONENT, glow::FLOAT),
        // combined formats are split by canvas construction before they
        // reach a texture
        F::Rgb565D16 | F::Rgba8D16 | F::Rgba8D24 => {
            debug_assert!(false, "combined format on a single texture");
            (glow::RGBA, glow::RGBA, glow::UNSIGNED_BYTE)
        }
    };
    Texel {
        internal: internal as i32,
        format,
        ty,
    }
}

// Image units cannot bind depth formats; compute passes see them as float.
fn image_format(format: TextureFormat) -> u32 {
    use TextureFormat as F;
    match format {
        F::D16 => glow::R16F,
        F::D32 | F::D32F => glow::R32F,
        F::D24 => {
            debug_assert!(false, "D24 cannot be bound as an image");
            glow::R32F
        }
        other => texel(other).internal as u32,
    }
}

impl GlBackend for NativeBackend {
    fn is_gles(&self) -> bool {
        self.use_gles
    }

    fn context_version(&self) -> u16 {
        self.context_version
    }

    fn extensions(&self) -> Vec<String> {
        self.gl.supported_extensions().iter().cloned().collect()
    }

    fn vendor(&self) -> String {
        unsafe { self.gl.get_parameter_string(glow::VENDOR) }
    }

    fn renderer(&self) -> String {
        unsafe { self.gl.get_parameter_string(glow::RENDERER) }
    }

    fn version_string(&self) -> String {
        unsafe { self.gl.get_parameter_string(glow::VERSION) }
    }

    fn shader_compiler_present(&mut self) -> bool {
        // The docs say this can report 0; it never does on desktop, but the
        // query is cheap enough to just ask.
        unsafe { self.gl.get_parameter_i32(glow::SHADER_COMPILER) != 0 }
    }

    fn max_anisotropy(&mut self) -> f32 {
        unsafe { self.gl.get_parameter_f32(MAX_TEXTURE_MAX_ANISOTROPY) }
    }

    fn has_timer_queries(&self) -> bool {
        !self.use_gles && self.context_version >= 33
    }

    fn has_indexed_viewports(&self) -> bool {
        // glViewportIndexed is not reachable through glow; replay falls back
        // to viewport 0, the same path the engine takes on GL < 4.1.
        false
    }

    fn has_image_copy(&self) -> bool {
        // glCopyImageSubData is likewise unavailable; blits use the
        // bind + glBlitFramebuffer fallback.
        false
    }

    fn has_debug_groups(&self) -> bool {
        self.context_version >= 43 || self.gl.supported_extensions().contains("GL_KHR_debug")
    }

    fn has_invalidate(&self) -> bool {
        self.context_version >= 43 || (self.use_gles && self.context_version >= 30)
    }

    fn create_buffer(&mut self) -> u32 {
        match unsafe { self.gl.create_buffer() } {
            Ok(b) => b.0.get(),
            Err(e) => {
                warn!("buffer allocation failed: {e}");
                0
            }
        }
    }

    fn bind_buffer(&mut self, target: u32, buffer: u32) {
        unsafe {
            self.gl
                .bind_buffer(target, (buffer != 0).then(|| buf(buffer)));
        }
    }

    fn buffer_data_size(&mut self, target: u32, size: usize, usage: u32) {
        unsafe { self.gl.buffer_data_size(target, size as i32, usage) }
    }

    fn buffer_data(&mut self, target: u32, data: &[u8], usage: u32) {
        unsafe { self.gl.buffer_data_u8_slice(target, data, usage) }
    }

    fn buffer_update(&mut self, target: u32, offset: usize, data: &[u8]) {
        unsafe {
            let ptr = self
                .gl
                .map_buffer_range(target, offset as i32, data.len() as i32, glow::MAP_WRITE_BIT);
            if !ptr.is_null() {
                std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
                self.gl.unmap_buffer(target);
            } else {
                self.gl.buffer_sub_data_u8_slice(target, offset as i32, data);
            }
        }
    }

    fn delete_buffer(&mut self, buffer: u32) {
        unsafe { self.gl.delete_buffer(buf(buffer)) }
    }

    fn bind_buffer_base(&mut self, target: u32, index: u32, buffer: u32) {
        unsafe {
            self.gl
                .bind_buffer_base(target, index, (buffer != 0).then(|| buf(buffer)));
        }
    }

    fn create_texture(&mut self) -> u32 {
        match unsafe { self.gl.create_texture() } {
            Ok(t) => t.0.get(),
            Err(e) => {
                warn!("texture allocation failed: {e}");
                0
            }
        }
    }

    fn bind_texture(&mut self, target: u32, texture: u32) {
        unsafe {
            self.gl
                .bind_texture(target, (texture != 0).then(|| tex(texture)));
        }
    }

    fn active_texture(&mut self, unit: u32) {
        unsafe { self.gl.active_texture(glow::TEXTURE0 + unit) }
    }

    fn tex_parameter_i32(&mut self, target: u32, param: u32, value: i32) {
        unsafe { self.gl.tex_parameter_i32(target, param, value) }
    }

    fn tex_parameter_f32(&mut self, target: u32, param: u32, value: f32) {
        unsafe { self.gl.tex_parameter_f32(target, param, value) }
    }

    fn tex_parameter_i32_slice(&mut self, target: u32, param: u32, values: &[i32]) {
        unsafe { self.gl.tex_parameter_i32_slice(target, param, values) }
    }

    fn pixel_store_i32(&mut self, param: u32, value: i32) {
        unsafe { self.gl.pixel_store_i32(param, value) }
    }

    fn tex_image_2d(
        &mut self,
        target: u32,
        level: i32,
        format: TextureFormat,
        w: i32,
        h: i32,
        data: Option<&[u8]>,
    ) {
        let t = texel(format);
        unsafe {
            self.gl.tex_image_2d(
                target,
                level,
                t.internal,
                w,
                h,
                0,
                t.format,
                t.ty,
                PixelUnpackData::Slice(data),
            );
        }
    }

    fn tex_image_3d(
        &mut self,
        target: u32,
        level: i32,
        format: TextureFormat,
        w: i32,
        h: i32,
        depth: i32,
        data: Option<&[u8]>,
    ) {
        let t = texel(format);
        unsafe {
            self.gl.tex_image_3d(
                target,
                level,
                t.internal,
                w,
                h,
                depth,
                0,
                t.format,
                t.ty,
                PixelUnpackData::Slice(data),
            );
        }
    }

    fn tex_sub_image_2d(
        &mut self,
        target: u32,
        level: i32,
        w: i32,
        h: i32,
        format: TextureFormat,
        data: &[u8],
    ) {
        let t = texel(format);
        unsafe {
            self.gl.tex_sub_image_2d(
                target,
                level,
                0,
                0,
                w,
                h,
                t.format,
                t.ty,
                PixelUnpackData::Slice(Some(data)),
            );
        }
    }

    fn generate_mipmap(&mut self, target: u32) {
        unsafe { self.gl.generate_mipmap(target) }
    }

    fn delete_texture(&mut self, texture: u32) {
        unsafe { self.gl.delete_texture(tex(texture)) }
    }

    fn bind_image_texture(
        &mut self,
        unit: u32,
        texture: u32,
        level: i32,
        write: bool,
        format: TextureFormat,
    ) {
        let access = if write { glow::WRITE_ONLY } else { glow::READ_ONLY };
        unsafe {
            self.gl
                .bind_image_texture(unit, Some(tex(texture)), level, false, 0, access, image_format(format));
        }
    }

    fn create_framebuffer(&mut self) -> u32 {
        match unsafe { self.gl.create_framebuffer() } {
            Ok(f) => f.0.get(),
            Err(e) => {
                warn!("framebuffer allocation failed: {e}");
                0
            }
        }
    }

    fn bind_framebuffer(&mut self, target: u32, framebuffer: u32) {
        unsafe {
            self.gl
                .bind_framebuffer(target, (framebuffer != 0).then(|| fbo(framebuffer)));
        }
    }

    fn framebuffer_texture_2d(
        &mut self,
        attachment: u32,
        tex_target: u32,
        texture: u32,
        level: i32,
    ) {
        unsafe {
            self.gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                attachment,
                tex_target,
                (texture != 0).then(|| tex(texture)),
                level,
            );
        }
    }

    fn framebuffer_texture(&mut self, attachment: u32, texture: u32, level: i32) {
        unsafe {
            self.gl.framebuffer_texture(
                glow::FRAMEBUFFER,
                attachment,
                (texture != 0).then(|| tex(texture)),
                level,
            );
        }
    }

    fn framebuffer_renderbuffer(&mut self, attachment: u32, renderbuffer: u32) {
        unsafe {
            self.gl.framebuffer_renderbuffer(
                glow::FRAMEBUFFER,
                attachment,
                glow::RENDERBUFFER,
                (renderbuffer != 0).then(|| rbo(renderbuffer)),
            );
        }
    }

    fn draw_buffers(&mut self, buffers: &[u32]) {
        unsafe { self.gl.draw_buffers(buffers) }
    }

    fn read_buffer(&mut self, src: u32) {
        unsafe { self.gl.read_buffer(src) }
    }

    fn check_framebuffer_complete(&mut self) -> bool {
        unsafe { self.gl.check_framebuffer_status(glow::FRAMEBUFFER) == glow::FRAMEBUFFER_COMPLETE }
    }

    fn invalidate_framebuffer(&mut self, attachments: &[u32]) {
        unsafe { self.gl.invalidate_framebuffer(glow::FRAMEBUFFER, attachments) }
    }

    fn blit_framebuffer(&mut self, src: Rect2, dst: Rect2, mask: u32, filter: u32) {
        unsafe {
            self.gl.blit_framebuffer(
                src.x0, src.y0, src.x1, src.y1, dst.x0, dst.y0, dst.x1, dst.y1, mask, filter,
            );
        }
    }

    fn delete_framebuffer(&mut self, framebuffer: u32) {
        unsafe { self.gl.delete_framebuffer(fbo(framebuffer)) }
    }

    fn copy_image(
        &mut self,
        _src_texture: u32,
        _src_mip: i32,
        _dst_texture: u32,
        _dst_mip: i32,
        _x: i32,
        _y: i32,
        _w: i32,
        _h: i32,
    ) {
        // Unreachable: `has_image_copy` reports false for this backend, so
        // replay routes every blit through `blit_framebuffer`.
        debug_assert!(false, "image copy on a backend without support");
    }

    fn create_renderbuffer(&mut self) -> u32 {
        match unsafe { self.gl.create_renderbuffer() } {
            Ok(r) => r.0.get(),
            Err(e) => {
                warn!("renderbuffer allocation failed: {e}");
                0
            }
        }
    }

    fn bind_renderbuffer(&mut self, renderbuffer: u32) {
        unsafe {
            self.gl
                .bind_renderbuffer(glow::RENDERBUFFER, (renderbuffer != 0).then(|| rbo(renderbuffer)));
        }
    }

    fn renderbuffer_storage_multisample(
        &mut self,
        samples: i32,
        format: TextureFormat,
        w: i32,
        h: i32,
    ) {
        unsafe {
            self.gl.renderbuffer_storage_multisample(
                glow::RENDERBUFFER,
                samples,
                texel(format).internal as u32,
                w,
                h,
            );
        }
    }

    fn delete_renderbuffer(&mut self, renderbuffer: u32) {
        unsafe { self.gl.delete_renderbuffer(rbo(renderbuffer)) }
    }

    fn create_shader(&mut self, stage: u32, source: &str) -> Result<u32, String> {
        unsafe {
            let shader = self.gl.create_shader(stage)?;
            self.gl.shader_source(shader, source);
            self.gl.compile_shader(shader);
            if !self.gl.get_shader_compile_status(shader) {
                let info = self.gl.get_shader_info_log(shader);
                self.gl.delete_shader(shader);
                return Err(info);
            }
            Ok(shader.0.get())
        }
    }

    fn delete_shader(&mut self, shader: u32) {
        unsafe { self.gl.delete_shader(shd(shader)) }
    }

    fn create_program(&mut self, shaders: &[u32], attribs: &[&str]) -> Result<u32, String> {
        unsafe {
            let program = self.gl.create_program()?;
            for &shader in shaders {
                self.gl.attach_shader(program, shd(shader));
            }
            for (i, name) in attribs.iter().enumerate() {
                self.gl.bind_attrib_location(program, i as u32, name);
            }
            self.gl.link_program(program);
            if !self.gl.get_program_link_status(program) {
                let info = self.gl.get_program_info_log(program);
                for &shader in shaders {
                    self.gl.detach_shader(program, shd(shader));
                }
                self.gl.delete_program(program);
                return Err(info);
            }
            for &shader in shaders {
                self.gl.detach_shader(program, shd(shader));
            }
            Ok(program.0.get())
        }
    }

    fn delete_program(&mut self, program: u32) {
        unsafe { self.gl.delete_program(prg(program)) }
    }

    fn use_program(&mut self, program: u32) {
        unsafe {
            self.gl
                .use_program((program != 0).then(|| prg(program)));
        }
    }

    fn release_shader_compiler(&mut self) {
        // glReleaseShaderCompiler is not surfaced by the binding; the hint
        // is best-effort everywhere, so there is nothing to do here.
    }

    fn uniform_location(&mut self, program: u32, name: &str) -> Option<i32> {
        let location = unsafe { self.gl.get_uniform_location(prg(program), name) }?;
        self.locations.push(location);
        Some(self.locations.len() as i32 - 1)
    }

    fn uniform_i32(&mut self, location: i32, values: &[i32]) {
        let loc = &self.locations[location as usize];
        unsafe { self.gl.uniform_1_i32_slice(Some(loc), values) }
    }

    fn uniform_f32(&mut self, location: i32, values: &[f32]) {
        let loc = &self.locations[location as usize];
        unsafe { self.gl.uniform_1_f32_slice(Some(loc), values) }
    }

    fn uniform_vec2(&mut self, location: i32, values: &[f32]) {
        let loc = &self.locations[location as usize];
        unsafe { self.gl.uniform_2_f32_slice(Some(loc), values) }
    }

    fn uniform_vec3(&mut self, location: i32, values: &[f32]) {
        let loc = &self.locations[location as usize];
        unsafe { self.gl.uniform_3_f32_slice(Some(loc), values) }
    }

    fn uniform_vec4(&mut self, location: i32, values: &[f32]) {
        let loc = &self.locations[location as usize];
        unsafe { self.gl.uniform_4_f32_slice(Some(loc), values) }
    }

    fn uniform_mat2(&mut self, location: i32, values: &[f32]) {
        let loc = &self.locations[location as usize];
        unsafe { self.gl.uniform_matrix_2_f32_slice(Some(loc), false, values) }
    }

    fn uniform_mat3(&mut self, location: i32, values: &[f32]) {
        let loc = &self.locations[location as usize];
        unsafe { self.gl.uniform_matrix_3_f32_slice(Some(loc), false, values) }
    }

    fn uniform_mat4(&mut self, location: i32, values: &[f32]) {
        let loc = &self.locations[location as usize];
        unsafe { self.gl.uniform_matrix_4_f32_slice(Some(loc), false, values) }
    }

    fn enable(&mut self, cap: u32) {
        unsafe { self.gl.enable(cap) }
    }

    fn disable(&mut self, cap: u32) {
        unsafe { self.gl.disable(cap) }
    }

    fn depth_func(&mut self, func: u32) {
        unsafe { self.gl.depth_func(func) }
    }

    fn depth_mask(&mut self, on: bool) {
        unsafe { self.gl.depth_mask(on) }
    }

    fn front_face(&mut self, mode: u32) {
        unsafe { self.gl.front_face(mode) }
    }

    fn blend_func(&mut self, src: u32, dst: u32) {
        unsafe { self.gl.blend_func(src, dst) }
    }

    fn color_mask(&mut self, r: bool, g: bool, b: bool, a: bool) {
        unsafe { self.gl.color_mask(r, g, b, a) }
    }

    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        unsafe { self.gl.clear_color(r, g, b, a) }
    }

    fn clear_depth(&mut self, depth: f32) {
        unsafe { self.gl.clear_depth_f32(depth) }
    }

    fn clear(&mut self, mask: u32) {
        unsafe { self.gl.clear(mask) }
    }

    fn viewport(&mut self, x: i32, y: i32, w: i32, h: i32) {
        unsafe { self.gl.viewport(x, y, w, h) }
    }

    fn viewport_indexed(&mut self, _index: u32, x: f32, y: f32, w: f32, h: f32) {
        // Indexed viewports are not reachable through the binding; apply
        // viewport 0 so single-viewport views still render correctly.
        unsafe { self.gl.viewport(x as i32, y as i32, w as i32, h as i32) }
    }

    fn scissor(&mut self, x: i32, y: i32, w: i32, h: i32) {
        unsafe { self.gl.scissor(x, y, w, h) }
    }

    fn enable_vertex_attrib_array(&mut self, index: u32) {
        unsafe { self.gl.enable_vertex_attrib_array(index) }
    }

    fn disable_vertex_attrib_array(&mut self, index: u32) {
        unsafe { self.gl.disable_vertex_attrib_array(index) }
    }

    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: i32,
        ty: u32,
        normalized: bool,
        stride: i32,
        offset: i32,
    ) {
        unsafe {
            self.gl
                .vertex_attrib_pointer_f32(index, size, ty, normalized, stride, offset);
        }
    }

    fn create_vertex_array(&mut self) -> u32 {
        match unsafe { self.gl.create_vertex_array() } {
            Ok(v) => v.0.get(),
            Err(e) => {
                warn!("vertex array allocation failed: {e}");
                0
            }
        }
    }

    fn bind_vertex_array(&mut self, vertex_array: u32) {
        unsafe {
            self.gl
                .bind_vertex_array((vertex_array != 0).then(|| vao(vertex_array)));
        }
    }

    fn delete_vertex_array(&mut self, vertex_array: u32) {
        unsafe { self.gl.delete_vertex_array(vao(vertex_array)) }
    }

    fn draw_arrays_instanced(&mut self, mode: u32, first: i32, count: i32, instances: i32) {
        unsafe { self.gl.draw_arrays_instanced(mode, first, count, instances) }
    }

    fn draw_elements_instanced(
        &mut self,
        mode: u32,
        count: i32,
        index_type: u32,
        offset: i32,
        instances: i32,
    ) {
        unsafe {
            self.gl
                .draw_elements_instanced(mode, count, index_type, offset, instances);
        }
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        unsafe { self.gl.dispatch_compute(x, y, z) }
    }

    fn memory_barrier(&mut self, mask: u32) {
        unsafe { self.gl.memory_barrier(mask) }
    }

    fn create_queries(&mut self, count: usize) -> Vec<u32> {
        (0..count)
            .map(|_| match unsafe { self.gl.create_query() } {
                Ok(q) => q.0.get(),
                Err(e) => {
                    warn!("query allocation failed: {e}");
                    0
                }
            })
            .collect()
    }

    fn delete_queries(&mut self, queries: &[u32]) {
        for &q in queries {
            if q != 0 {
                unsafe { self.gl.delete_query(qry(q)) }
            }
        }
    }

    fn query_timestamp(&mut self, query: u32) {
        unsafe { self.gl.query_counter(qry(query), glow::TIMESTAMP) }
    }

    fn query_result_available(&mut self, query: u32) -> bool {
        unsafe {
            self.gl
                .get_query_parameter_u32(qry(query), glow::QUERY_RESULT_AVAILABLE)
                != 0
        }
    }

    fn query_result(&mut self, query: u32) -> u64 {
        // Timestamps wrap at 32 bits this way; per-view deltas stay correct
        // under wrapping subtraction for any frame shorter than ~4s.
        unsafe {
            u64::from(
                self.gl
                    .get_query_parameter_u32(qry(query), glow::QUERY_RESULT),
            )
        }
    }

    fn push_debug_group(&mut self, id: u32, label: &str) {
        unsafe {
            self.gl
                .push_debug_group(glow::DEBUG_SOURCE_APPLICATION, id, label);
        }
    }

    fn pop_debug_group(&mut self) {
        unsafe { self.gl.pop_debug_group() }
    }
}
