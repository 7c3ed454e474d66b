//! Backend seam: the fixed set of native entry points the engine drives.
//!
//! Everything above this module records and replays against [`GlBackend`];
//! only the implementations know about a real driver. Targets, formats and
//! modes travel as plain GL enum values (the `glow` constants), handles as
//! raw `u32` ids with `0` meaning "none", matching how GL itself names
//! objects.

pub mod opengl;
pub mod recording;

pub use opengl::NativeBackend;
pub use recording::{Call, CallLog, RecordingBackend};

use crate::format::TextureFormat;

// Anisotropy enums live in an extension and are absent from the glow
// constant set.
pub const TEXTURE_MAX_ANISOTROPY: u32 = 0x84FE;
pub(crate) const MAX_TEXTURE_MAX_ANISOTROPY: u32 = 0x84FF;

/// The native entry points used by the replay engine, resolved once when a
/// backend is constructed and fixed for its lifetime.
///
/// Probe methods describe what the context can do; everything else issues
/// exactly one native call (or one logical upload, for
/// [`buffer_update`](GlBackend::buffer_update), which prefers a mapped write
/// and falls back to a sub-data upload).
pub trait GlBackend {
    // --- probes ---
    fn is_gles(&self) -> bool;
    fn context_version(&self) -> u16;
    fn extensions(&self) -> Vec<String>;
    fn vendor(&self) -> String;
    fn renderer(&self) -> String;
    fn version_string(&self) -> String;
    fn shader_compiler_present(&mut self) -> bool;
    fn max_anisotropy(&mut self) -> f32;
    fn has_timer_queries(&self) -> bool;
    fn has_indexed_viewports(&self) -> bool;
    fn has_image_copy(&self) -> bool;
    fn has_debug_groups(&self) -> bool;
    fn has_invalidate(&self) -> bool;

    // --- buffers ---
    fn create_buffer(&mut self) -> u32;
    fn bind_buffer(&mut self, target: u32, buffer: u32);
    fn buffer_data_size(&mut self, target: u32, size: usize, usage: u32);
    fn buffer_data(&mut self, target: u32, data: &[u8], usage: u32);
    fn buffer_update(&mut self, target: u32, offset: usize, data: &[u8]);
    fn delete_buffer(&mut self, buffer: u32);
    fn bind_buffer_base(&mut self, target: u32, index: u32, buffer: u32);

    // --- textures ---
    fn create_texture(&mut self) -> u32;
    fn bind_texture(&mut self, target: u32, texture: u32);
    fn active_texture(&mut self, unit: u32);
    fn tex_parameter_i32(&mut self, target: u32, param: u32, value: i32);
    fn tex_parameter_f32(&mut self, target: u32, param: u32, value: f32);
    fn tex_parameter_i32_slice(&mut self, target: u32, param: u32, values: &[i32]);
    fn pixel_store_i32(&mut self, param: u32, value: i32);
    fn tex_image_2d(
        &mut self,
        target: u32,
        level: i32,
        format: TextureFormat,
        w: i32,
        h: i32,
        data: Option<&[u8]>,
    );
    fn tex_image_3d(
        &mut self,
        target: u32,
        level: i32,
        format: TextureFormat,
        w: i32,
        h: i32,
        depth: i32,
        data: Option<&[u8]>,
    );
    fn tex_sub_image_2d(
        &mut self,
        target: u32,
        level: i32,
        w: i32,
        h: i32,
        format: TextureFormat,
        data: &[u8],
    );
    fn generate_mipmap(&mut self, target: u32);
    fn delete_texture(&mut self, texture: u32);
    fn bind_image_texture(
        &mut self,
        unit: u32,
        texture: u32,
        level: i32,
        write: bool,
        format: TextureFormat,
    );

    // --- framebuffers / renderbuffers ---
    fn create_framebuffer(&mut self) -> u32;
    fn bind_framebuffer(&mut self, target: u32, framebuffer: u32);
    fn framebuffer_texture_2d(
        &mut self,
        attachment: u32,
        tex_target: u32,
        texture: u32,
        level: i32,
    );
    fn framebuffer_texture(&mut self, attachment: u32, texture: u32, level: i32);
    fn framebuffer_renderbuffer(&mut self, attachment: u32, renderbuffer: u32);
    fn draw_buffers(&mut self, buffers: &[u32]);
    fn read_buffer(&mut self, src: u32);
    fn check_framebuffer_complete(&mut self) -> bool;
    fn invalidate_framebuffer(&mut self, attachments: &[u32]);
    fn blit_framebuffer(&mut self, src: Rect2, dst: Rect2, mask: u32, filter: u32);
    fn delete_framebuffer(&mut self, framebuffer: u32);
    #[allow(clippy::too_many_arguments)]
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
    );

    fn create_renderbuffer(&mut self) -> u32;
    fn bind_renderbuffer(&mut self, renderbuffer: u32);
    fn renderbuffer_storage_multisample(
        &mut self,
        samples: i32,
        format: TextureFormat,
        w: i32,
        h: i32,
    );
    fn delete_renderbuffer(&mut self, renderbuffer: u32);

    // --- shaders / programs ---
    fn create_shader(&mut self, stage: u32, source: &str) -> Result<u32, String>;
    fn delete_shader(&mut self, shader: u32);
    fn create_program(&mut self, shaders: &[u32], attribs: &[&str]) -> Result<u32, String>;
    fn delete_program(&mut self, program: u32);
    fn use_program(&mut self, program: u32);
    fn release_shader_compiler(&mut self);
    fn uniform_location(&mut self, program: u32, name: &str) -> Option<i32>;

    // --- uniforms ---
    fn uniform_i32(&mut self, location: i32, values: &[i32]);
    fn uniform_f32(&mut self, location: i32, values: &[f32]);
    fn uniform_vec2(&mut self, location: i32, values: &[f32]);
    fn uniform_vec3(&mut self, location: i32, values: &[f32]);
    fn uniform_vec4(&mut self, location: i32, values: &[f32]);
    fn uniform_mat2(&mut self, location: i32, values: &[f32]);
    fn uniform_mat3(&mut self, location: i32, values: &[f32]);
    fn uniform_mat4(&mut self, location: i32, values: &[f32]);

    // --- fixed-function state ---
    fn enable(&mut self, cap: u32);
    fn disable(&mut self, cap: u32);
    fn depth_func(&mut self, func: u32);
    fn depth_mask(&mut self, on: bool);
    fn front_face(&mut self, mode: u32);
    fn blend_func(&mut self, src: u32, dst: u32);
    fn color_mask(&mut self, r: bool, g: bool, b: bool, a: bool);
    fn clear_color(&mut self, r: f32, g: f32, b: f32, a: f32);
    fn clear_depth(&mut self, depth: f32);
    fn clear(&mut self, mask: u32);
    fn viewport(&mut self, x: i32, y: i32, w: i32, h: i32);
    fn viewport_indexed(&mut self, index: u32, x: f32, y: f32, w: f32, h: f32);
    fn scissor(&mut self, x: i32, y: i32, w: i32, h: i32);

    // --- vertex attributes ---
    fn enable_vertex_attrib_array(&mut self, index: u32);
    fn disable_vertex_attrib_array(&mut self, index: u32);
    fn vertex_attrib_pointer(
        &mut self,
        index: u32,
        size: i32,
        ty: u32,
        normalized: bool,
        stride: i32,
        offset: i32,
    );
    fn create_vertex_array(&mut self) -> u32;
    fn bind_vertex_array(&mut self, vertex_array: u32);
    fn delete_vertex_array(&mut self, vertex_array: u32);

    // --- draws, compute, sync ---
    fn draw_arrays_instanced(&mut self, mode: u32, first: i32, count: i32, instances: i32);
    fn draw_elements_instanced(
        &mut self,
        mode: u32,
        count: i32,
        index_type: u32,
        offset: i32,
        instances: i32,
    );
    fn dispatch_compute(&mut self, x: u32, y: u32, z: u32);
    fn memory_barrier(&mut self, mask: u32);

    // --- timer queries ---
    fn create_queries(&mut self, count: usize) -> Vec<u32>;
    fn delete_queries(&mut self, queries: &[u32]);
    fn query_timestamp(&mut self, query: u32);
    fn query_result_available(&mut self, query: u32) -> bool;
    fn query_result(&mut self, query: u32) -> u64;

    // --- debug markers ---
    fn push_debug_group(&mut self, id: u32, label: &str);
    fn pop_debug_group(&mut self);
}

/// A blit rectangle in framebuffer coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect2 {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl Rect2 {
    pub fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }
}
