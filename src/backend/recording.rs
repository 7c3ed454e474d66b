//! A backend that records every native call as a value instead of touching
//! a driver.
//!
//! Stands in for the GL backend in tests and headless runs: handles are
//! minted sequentially, probes report a fully featured context, and the
//! call stream is available for inspection after `frame()`.

use crate::backend::{GlBackend, Rect2};
use crate::format::TextureFormat;
use std::cell::RefCell;
use std::rc::Rc;

/// One recorded native call. Mirrors [`GlBackend`] method for method.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    BindBuffer { target: u32, buffer: u32 },
    BufferDataSize { target: u32, size: usize, usage: u32 },
    BufferData { target: u32, len: usize, usage: u32 },
    BufferUpdate { target: u32, offset: usize, data: Vec<u8> },
    DeleteBuffer { buffer: u32 },
    BindBufferBase { target: u32, index: u32, buffer: u32 },

    BindTexture { target: u32, texture: u32 },
    ActiveTexture { unit: u32 },
    TexParameterI32 { target: u32, param: u32, value: i32 },
    TexParameterF32 { target: u32, param: u32, value: f32 },
    TexParameterI32Slice { target: u32, param: u32, values: Vec<i32> },
    PixelStore { param: u32, value: i32 },
    TexImage2d { target: u32, level: i32, format: TextureFormat, w: i32, h: i32, with_data: bool },
    TexImage3d { target: u32, level: i32, format: TextureFormat, w: i32, h: i32, depth: i32, with_data: bool },
    TexSubImage2d { target: u32, level: i32, w: i32, h: i32, format: TextureFormat, len: usize },
    GenerateMipmap { target: u32 },
    DeleteTexture { texture: u32 },
    BindImageTexture { unit: u32, texture: u32, level: i32, write: bool, format: TextureFormat },

    BindFramebuffer { target: u32, framebuffer: u32 },
    FramebufferTexture2d { attachment: u32, tex_target: u32, texture: u32, level: i32 },
    FramebufferTexture { attachment: u32, texture: u32, level: i32 },
    FramebufferRenderbuffer { attachment: u32, renderbuffer: u32 },
    DrawBuffers { buffers: Vec<u32> },
    ReadBuffer { src: u32 },
    InvalidateFramebuffer { attachments: Vec<u32> },
    BlitFramebuffer { src: Rect2, dst: Rect2, mask: u32, filter: u32 },
    DeleteFramebuffer { framebuffer: u32 },
    CopyImage { src_texture: u32, src_mip: i32, dst_texture: u32, dst_mip: i32, x: i32, y: i32, w: i32, h: i32 },

    BindRenderbuffer { renderbuffer: u32 },
    RenderbufferStorageMultisample { samples: i32, format: TextureFormat, w: i32, h: i32 },
    DeleteRenderbuffer { renderbuffer: u32 },

    CreateShader { shader: u32, stage: u32 },
    DeleteShader { shader: u32 },
    CreateProgram { program: u32, attribs: Vec<String> },
    DeleteProgram { program: u32 },
    UseProgram { program: u32 },
    ReleaseShaderCompiler,

    UniformI32 { location: i32, values: Vec<i32> },
    UniformF32 { location: i32, values: Vec<f32> },
    UniformVec2 { location: i32, values: Vec<f32> },
    UniformVec3 { location: i32, values: Vec<f32> },
    UniformVec4 { location: i32, values: Vec<f32> },
    UniformMat2 { location: i32, values: Vec<f32> },
    UniformMat3 { location: i32, values: Vec<f32> },
    UniformMat4 { location: i32, values: Vec<f32> },

    Enable { cap: u32 },
    Disable { cap: u32 },
    DepthFunc { func: u32 },
    DepthMask { on: bool },
    FrontFace { mode: u32 },
    BlendFunc { src: u32, dst: u32 },
    ColorMask { r: bool, g: bool, b: bool, a: bool },
    ClearColor { r: f32, g: f32, b: f32, a: f32 },
    ClearDepth { depth: f32 },
    Clear { mask: u32 },
    Viewport { x: i32, y: i32, w: i32, h: i32 },
    ViewportIndexed { index: u32, x: f32, y: f32, w: f32, h: f32 },
    Scissor { x: i32, y: i32, w: i32, h: i32 },

    EnableVertexAttribArray { index: u32 },
    DisableVertexAttribArray { index: u32 },
    VertexAttribPointer { index: u32, size: i32, ty: u32, normalized: bool, stride: i32, offset: i32 },
    BindVertexArray { vertex_array: u32 },
    DeleteVertexArray { vertex_array: u32 },

    DrawArraysInstanced { mode: u32, first: i32, count: i32, instances: i32 },
    DrawElementsInstanced { mode: u32, count: i32, index_type: u32, offset: i32, instances: i32 },
    DispatchCompute { x: u32, y: u32, z: u32 },
    MemoryBarrier { mask: u32 },

    QueryTimestamp { query: u32 },
    PushDebugGroup { id: u32, label: String },
    PopDebugGroup,
}

/// A handle onto a [`RecordingBackend`]'s call stream. Stays readable after
/// the backend itself has been moved into a `Context`.
#[derive(Clone, Default)]
pub struct CallLog(Rc<RefCell<Vec<Call>>>);

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.borrow().iter().filter(|c| pred(c)).count()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

pub struct RecordingBackend {
    calls: CallLog,
    next_id: u32,
    next_location: i32,
    /// Returned by `query_result`, bumped per read so successive timestamps
    /// are monotonic.
    timestamp: u64,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            calls: CallLog::default(),
            next_id: 0,
            next_location: 0,
            timestamp: 0,
        }
    }

    /// The backend plus a log handle for inspecting calls after the backend
    /// has been handed to a `Context`.
    pub fn with_log() -> (Self, CallLog) {
        let backend = Self::new();
        let log = backend.calls.clone();
        (backend, log)
    }

    fn id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn push(&mut self, call: Call) {
        self.calls.0.borrow_mut().push(call);
    }
}

impl GlBackend for RecordingBackend {
    fn is_gles(&self) -> bool {
        false
    }

    fn context_version(&self) -> u16 {
        46
    }

    fn extensions(&self) -> Vec<String> {
        vec!["GL_KHR_debug".into()]
    }

    fn vendor(&self) -> String {
        "strobe".into()
    }

    fn renderer(&self) -> String {
        "recording".into()
    }

    fn version_string(&self) -> String {
        "4.6 (recorded)".into()
    }

    fn shader_compiler_present(&mut self) -> bool {
        true
    }

    fn max_anisotropy(&mut self) -> f32 {
        16.0
    }

    fn has_timer_queries(&self) -> bool {
        true
    }

    fn has_indexed_viewports(&self) -> bool {
        true
    }

    fn has_image_copy(&self) -> bool {
        true
    }

    fn has_debug_groups(&self) -> bool {
        true
    }

    fn has_invalidate(&self) -> bool {
        true
    }

    fn create_buffer(&mut self) -> u32 {
        self.id()
    }

    fn bind_buffer(&mut self, target: u32, buffer: u32) {
        self.push(Call::BindBuffer { target, buffer });
    }

    fn buffer_data_size(&mut self, target: u32, size: usize, usage: u32) {
        self.push(Call::BufferDataSize { target, size, usage });
    }

    fn buffer_data(&mut self, target: u32, data: &[u8], usage: u32) {
        self.push(Call::BufferData {
            target,
            len: data.len(),
            usage,
        });
    }

    fn buffer_update(&mut self, target: u32, offset: usize, data: &[u8]) {
        self.push(Call::BufferUpdate {
            target,
            offset,
            data: data.to_vec(),
        });
    }

    fn delete_buffer(&mut self, buffer: u32) {
        self.push(Call::DeleteBuffer { buffer });
    }

    fn bind_buffer_base(&mut self, target: u32, index: u32, buffer: u32) {
        self.push(Call::BindBufferBase {
            target,
            index,
            buffer,
        });
    }

    fn create_texture(&mut self) -> u32 {
        self.id()
    }

    fn bind_texture(&mut self, target: u32, texture: u32) {
        self.push(Call::BindTexture { target, texture });
    }

    fn active_texture(&mut self, unit: u32) {
        self.push(Call::ActiveTexture { unit });
    }

    fn tex_parameter_i32(&mut self, target: u32, param: u32, value: i32) {
        self.push(Call::TexParameterI32 {
            target,
            param,
            value,
        });
    }

    fn tex_parameter_f32(&mut self, target: u32, param: u32, value: f32) {
        self.push(Call::TexParameterF32 {
            target,
            param,
            value,
        });
    }

    fn tex_parameter_i32_slice(&mut self, target: u32, param: u32, values: &[i32]) {
        self.push(Call::TexParameterI32Slice {
            target,
            param,
            values: values.to_vec(),
        });
    }

    fn pixel_store_i32(&mut self, param: u32, value: i32) {
        self.push(Call::PixelStore { param, value });
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
        self.push(Call::TexImage2d {
            target,
            level,
            format,
            w,
            h,
            with_data: data.is_some(),
        });
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
        self.push(Call::TexImage3d {
            target,
            level,
            format,
            w,
            h,
            depth,
            with_data: data.is_some(),
        });
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
        self.push(Call::TexSubImage2d {
            target,
            level,
            w,
            h,
            format,
            len: data.len(),
        });
    }

    fn generate_mipmap(&mut self, target: u32) {
        self.push(Call::GenerateMipmap { target });
    }

    fn delete_texture(&mut self, texture: u32) {
        self.push(Call::DeleteTexture { texture });
    }

    fn bind_image_texture(
        &mut self,
        unit: u32,
        texture: u32,
        level: i32,
        write: bool,
        format: TextureFormat,
    ) {
        self.push(Call::BindImageTexture {
            unit,
            texture,
            level,
            write,
            format,
        });
    }

    fn create_framebuffer(&mut self) -> u32 {
        self.id()
    }

    fn bind_framebuffer(&mut self, target: u32, framebuffer: u32) {
        self.push(Call::BindFramebuffer {
            target,
            framebuffer,
        });
    }

    fn framebuffer_texture_2d(
        &mut self,
        attachment: u32,
        tex_target: u32,
        texture: u32,
        level: i32,
    ) {
        self.push(Call::FramebufferTexture2d {
            attachment,
            tex_target,
            texture,
            level,
        });
    }

    fn framebuffer_texture(&mut self, attachment: u32, texture: u32, level: i32) {
        self.push(Call::FramebufferTexture {
            attachment,
            texture,
            level,
        });
    }

    fn framebuffer_renderbuffer(&mut self, attachment: u32, renderbuffer: u32) {
        self.push(Call::FramebufferRenderbuffer {
            attachment,
            renderbuffer,
        });
    }

    fn draw_buffers(&mut self, buffers: &[u32]) {
        self.push(Call::DrawBuffers {
            buffers: buffers.to_vec(),
        });
    }

    fn read_buffer(&mut self, src: u32) {
        self.push(Call::ReadBuffer { src });
    }

    fn check_framebuffer_complete(&mut self) -> bool {
        true
    }

    fn invalidate_framebuffer(&mut self, attachments: &[u32]) {
        self.push(Call::InvalidateFramebuffer {
            attachments: attachments.to_vec(),
        });
    }

    fn blit_framebuffer(&mut self, src: Rect2, dst: Rect2, mask: u32, filter: u32) {
        self.push(Call::BlitFramebuffer {
            src,
            dst,
            mask,
            filter,
        });
    }

    fn delete_framebuffer(&mut self, framebuffer: u32) {
        self.push(Call::DeleteFramebuffer { framebuffer });
    }

    fn copy_image(
        &mut self,
        src_texture: u32,
        src_mip: i32,
        dst_texture: u32,
        dst_mip: i32,
        x: i32,
        y: i32,
        w: i32,
        h: i32,
    ) {
        self.push(Call::CopyImage {
            src_texture,
            src_mip,
            dst_texture,
            dst_mip,
            x,
            y,
            w,
            h,
        });
    }

    fn create_renderbuffer(&mut self) -> u32 {
        self.id()
    }

    fn bind_renderbuffer(&mut self, renderbuffer: u32) {
        self.push(Call::BindRenderbuffer { renderbuffer });
    }

    fn renderbuffer_storage_multisample(
        &mut self,
        samples: i32,
        format: TextureFormat,
        w: i32,
        h: i32,
    ) {
        self.push(Call::RenderbufferStorageMultisample {
            samples,
            format,
            w,
            h,
        });
    }

    fn delete_renderbuffer(&mut self, renderbuffer: u32) {
        self.push(Call::DeleteRenderbuffer { renderbuffer });
    }

    fn create_shader(&mut self, stage: u32, _source: &str) -> Result<u32, String> {
        let shader = self.id();
        self.push(Call::CreateShader { shader, stage });
        Ok(shader)
    }

    fn delete_shader(&mut self, shader: u32) {
        self.push(Call::DeleteShader { shader });
    }

    fn create_program(&mut self, _shaders: &[u32], attribs: &[&str]) -> Result<u32, String> {
        let program = self.id();
        self.push(Call::CreateProgram {
            program,
            attribs: attribs.iter().map(|a| a.to_string()).collect(),
        });
        Ok(program)
    }

    fn delete_program(&mut self, program: u32) {
        self.push(Call::DeleteProgram { program });
    }

    fn use_program(&mut self, program: u32) {
        self.push(Call::UseProgram { program });
    }

    fn release_shader_compiler(&mut self) {
        self.push(Call::ReleaseShaderCompiler);
    }

    fn uniform_location(&mut self, _program: u32, _name: &str) -> Option<i32> {
        let location = self.next_location;
        self.next_location += 1;
        Some(location)
    }

    fn uniform_i32(&mut self, location: i32, values: &[i32]) {
        self.push(Call::UniformI32 {
            location,
            values: values.to_vec(),
        });
    }

    fn uniform_f32(&mut self, location: i32, values: &[f32]) {
        self.push(Call::UniformF32 {
            location,
            values: values.to_vec(),
        });
    }

    fn uniform_vec2(&mut self, location: i32, values: &[f32]) {
        self.push(Call::UniformVec2 {
            location,
            values: values.to_vec(),
        });
    }

    fn uniform_vec3(&mut self, location: i32, values: &[f32]) {
        self.push(Call::UniformVec3 {
            location,
            values: values.to_vec(),
        });
    }

    fn uniform_vec4(&mut self, location: i32, values: &[f32]) {
        self.push(Call::UniformVec4 {
            location,
            values: values.to_vec(),
        });
    }

    fn uniform_mat2(&mut self, location: i32, values: &[f32]) {
        self.push(Call::UniformMat2 {
            location,
            values: values.to_vec(),
        });
    }

    fn uniform_mat3(&mut self, location: i32, values: &[f32]) {
        self.push(Call::UniformMat3 {
            location,
            values: values.to_vec(),
        });
    }

    fn uniform_mat4(&mut self, location: i32, values: &[f32]) {
        self.push(Call::UniformMat4 {
            location,
            values: values.to_vec(),
        });
    }

    fn enable(&mut self, cap: u32) {
        self.push(Call::Enable { cap });
    }

    fn disable(&mut self, cap: u32) {
        self.push(Call::Disable { cap });
    }

    fn depth_func(&mut self, func: u32) {
        self.push(Call::DepthFunc { func });
    }

    fn depth_mask(&mut self, on: bool) {
        self.push(Call::DepthMask { on });
    }

    fn front_face(&mut self, mode: u32) {
        self.push(Call::FrontFace { mode });
    }

    fn blend_func(&mut self, src: u32, dst: u32) {
        self.push(Call::BlendFunc { src, dst });
    }

    fn color_mask(&mut self, r: bool, g: bool, b: bool, a: bool) {
        self.push(Call::ColorMask { r, g, b, a });
    }

    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.push(Call::ClearColor { r, g, b, a });
    }

    fn clear_depth(&mut self, depth: f32) {
        self.push(Call::ClearDepth { depth });
    }

    fn clear(&mut self, mask: u32) {
        self.push(Call::Clear { mask });
    }

    fn viewport(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.push(Call::Viewport { x, y, w, h });
    }

    fn viewport_indexed(&mut self, index: u32, x: f32, y: f32, w: f32, h: f32) {
        self.push(Call::ViewportIndexed { index, x, y, w, h });
    }

    fn scissor(&mut self, x: i32, y: i32, w: i32, h: i32) {
        self.push(Call::Scissor { x, y, w, h });
    }

    fn enable_vertex_attrib_array(&mut self, index: u32) {
        self.push(Call::EnableVertexAttribArray { index });
    }

    fn disable_vertex_attrib_array(&mut self, index: u32) {
        self.push(Call::DisableVertexAttribArray { index });
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
        self.push(Call::VertexAttribPointer {
            index,
            size,
            ty,
            normalized,
            stride,
            offset,
        });
    }

    fn create_vertex_array(&mut self) -> u32 {
        self.id()
    }

    fn bind_vertex_array(&mut self, vertex_array: u32) {
        self.push(Call::BindVertexArray { vertex_array });
    }

    fn delete_vertex_array(&mut self, vertex_array: u32) {
        self.push(Call::DeleteVertexArray { vertex_array });
    }

    fn draw_arrays_instanced(&mut self, mode: u32, first: i32, count: i32, instances: i32) {
        self.push(Call::DrawArraysInstanced {
            mode,
            first,
            count,
            instances,
        });
    }

    fn draw_elements_instanced(
        &mut self,
        mode: u32,
        count: i32,
        index_type: u32,
        offset: i32,
        instances: i32,
    ) {
        self.push(Call::DrawElementsInstanced {
            mode,
            count,
            index_type,
            offset,
            instances,
        });
    }

    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        self.push(Call::DispatchCompute { x, y, z });
    }

    fn memory_barrier(&mut self, mask: u32) {
        self.push(Call::MemoryBarrier { mask });
    }

    fn create_queries(&mut self, count: usize) -> Vec<u32> {
        (0..count).map(|_| self.id()).collect()
    }

    fn delete_queries(&mut self, _queries: &[u32]) {}

    fn query_timestamp(&mut self, query: u32) {
        self.push(Call::QueryTimestamp { query });
    }

    fn query_result_available(&mut self, _query: u32) -> bool {
        true
    }

    fn query_result(&mut self, _query: u32) -> u64 {
        self.timestamp += 1;
        self.timestamp
    }

    fn push_debug_group(&mut self, id: u32, label: &str) {
        self.push(Call::PushDebugGroup {
            id,
            label: label.to_string(),
        });
    }

    fn pop_debug_group(&mut self) {
        self.push(Call::PopDebugGroup);
    }
}
