//! The context: owns the backend, every registry and arena, the view table
//! and the scratch draw. All recording happens through methods here; replay
//! lives in `frame.rs`.

use crate::backend::{GlBackend, TEXTURE_MAX_ANISOTROPY};
use crate::buffer::{Buffer, BufferEntry, BufferFlags, BufferUpdate, TransientBuffer};
use crate::canvas::{self, Canvas, MAX_ATTACHMENTS};
use crate::caps::{self, Caps};
use crate::draw::{BlitOp, Draw, DrawCallback, MAX_SLOTS};
use crate::format::{TextureFormat, VertexFormat};
use crate::frame::timer_count;
use crate::program::{self, Program};
use crate::state::{DepthTest, DrawFlags, Rect, ResetFlags, ViewFlags, ViewState};
use crate::texture::{Texture, TextureEntry, TextureFlags};
use crate::uniform::{PendingUniform, Uniform, UniformType};
use crate::view::{MAX_VIEWPORTS, VIEW_MAX, View};
use log::{error, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::rc::Rc;
use std::sync::Arc;

/// Arena sizing. The defaults allow 4 MiB of uniform updates and 4 MiB of
/// transient geometry per frame; size them to your worst frame.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub uniform_buffer_size: usize,
    pub transient_buffer_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            uniform_buffer_size: 4 * 1024 * 1024,
            transient_buffer_size: 4 * 1024 * 1024,
        }
    }
}

#[derive(Default)]
pub(crate) struct TransientArena {
    pub data: Vec<u8>,
    pub offset: u32,
    pub gl_id: u32,
}

/// One recording/replay engine bound to one native context.
///
/// Construct it around a backend, call [`reset`](Context::reset) once the
/// context is current, record with the `set_*`/`submit`/`dispatch` family
/// from anywhere in the frame, and drain everything with
/// [`frame`](Context::frame) on the context-owning thread.
pub struct Context {
    pub(crate) backend: Box<dyn GlBackend>,
    pub(crate) caps: Caps,
    pub(crate) flags: ResetFlags,
    pub(crate) max_aniso: f32,
    pub(crate) settings: Settings,

    pub(crate) backbuffer: Canvas,
    pub(crate) views: Vec<View>,

    // uniform staging
    pub(crate) uniform_arena: Vec<u8>,
    pub(crate) pending_uniforms: Vec<PendingUniform>,
    /// program id -> uniform name -> native location
    pub(crate) uniform_map: FxHashMap<u32, FxHashMap<Arc<str>, i32>>,

    pub(crate) transient: TransientArena,

    // registries
    pub(crate) buffers: Vec<BufferEntry>,
    pub(crate) textures: Vec<TextureEntry>,
    pub(crate) programs: Vec<u32>,

    // write-then-read hazard tracking, by native id
    pub(crate) dirty_buffers: FxHashSet<u32>,
    pub(crate) dirty_textures: FxHashSet<u32>,
    /// Current generation of each CPU-writable texture, keyed by its first
    /// native id; rotated when a pending upload lands.
    pub(crate) texture_generation: FxHashMap<u32, u8>,

    pub(crate) tmp_draw: Draw,

    // gpu timers
    pub(crate) timers: Vec<u32>,
    pub(crate) timer_offset: usize,
    pub(crate) use_timers: bool,

    pub(crate) shaderc_allocated: bool,
}

impl Context {
    pub fn new(backend: impl GlBackend + 'static) -> Self {
        Self::with_settings(backend, Settings::default())
    }

    pub fn with_settings(backend: impl GlBackend + 'static, settings: Settings) -> Self {
        let mut views = Vec::with_capacity(VIEW_MAX);
        views.resize_with(VIEW_MAX, View::default);
        Self {
            backend: Box::new(backend),
            caps: Caps::default(),
            flags: ResetFlags::empty(),
            max_aniso: 0.0,
            settings,
            backbuffer: Canvas::default(),
            views,
            uniform_arena: Vec::new(),
            pending_uniforms: Vec::new(),
            uniform_map: FxHashMap::default(),
            transient: TransientArena::default(),
            buffers: Vec::new(),
            textures: Vec::new(),
            programs: Vec::new(),
            dirty_buffers: FxHashSet::default(),
            dirty_textures: FxHashSet::default(),
            texture_generation: FxHashMap::default(),
            tmp_draw: Draw::default(),
            timers: Vec::new(),
            timer_offset: 0,
            use_timers: false,
            shaderc_allocated: false,
        }
    }

    /// (Re)probe capabilities, size the backbuffer, and allocate the
    /// per-frame arenas. Arena allocation happens once; later resets keep
    /// the existing storage.
    pub fn reset(&mut self, width: u16, height: u16, flags: ResetFlags) {
        self.caps = caps::probe(self.backend.as_ref());

        self.flags = ResetFlags::empty();
        if self.caps.anisotropic_filtering && flags.contains(ResetFlags::MAX_ANISOTROPY) {
            self.flags |= ResetFlags::MAX_ANISOTROPY;
        }
        if flags.contains(ResetFlags::DEBUG_OVERLAY) {
            self.flags |= ResetFlags::DEBUG_OVERLAY;
        }

        self.use_timers = false;
        if self.backend.has_timer_queries() && flags.contains(ResetFlags::REPORT_GPU_TIMINGS) {
            self.flags |= ResetFlags::REPORT_GPU_TIMINGS;
            self.use_timers = true;
        }

        let mut backbuffer = Canvas {
            allocated: 1,
            width,
            height,
            current_width: width,
            current_height: height,
            ..Canvas::default()
        };
        backbuffer.attachments[0].width = width;
        backbuffer.attachments[0].height = height;
        backbuffer.attachments[0].layers = 1;
        self.backbuffer = backbuffer;

        if self.uniform_arena.capacity() == 0 {
            self.uniform_arena = Vec::with_capacity(self.settings.uniform_buffer_size);
        }
        if self.transient.data.is_empty() {
            self.transient.data = vec![0xfc; self.settings.transient_buffer_size];
            self.reset_transient_arena();
        }

        // retroactively apply the anisotropy ceiling to every live texture
        if self.caps.anisotropic_filtering {
            self.max_aniso = 0.0;
            if self.flags.contains(ResetFlags::MAX_ANISOTROPY) {
                self.max_aniso = self.backend.max_anisotropy();
            }
            for i in 0..self.textures.len() {
                let texture = self.textures[i].texture;
                let target = texture.target();
                for j in 0..texture.gl_count as usize {
                    self.backend.bind_texture(target, texture.gl_ids[j]);
                    self.backend
                        .tex_parameter_f32(target, TEXTURE_MAX_ANISOTROPY, self.max_aniso);
                }
            }
        }

        for view in &mut self.views {
            *view = View::default();
        }

        if !self.timers.is_empty() {
            let timers = std::mem::take(&mut self.timers);
            self.backend.delete_queries(&timers);
        }
        if self.use_timers {
            self.timers = self.backend.create_queries(timer_count());
            // dummy queries so the first readback has results to poll
            for i in 0..self.timers.len() {
                let q = self.timers[i];
                self.backend.query_timestamp(q);
            }
            self.timer_offset = 0;
        }
    }

    /// Flush pending work with one final [`frame`](Context::frame), then
    /// release every registered GPU object and the arenas. Must be the last
    /// call before the native context goes away.
    pub fn shutdown(mut self) {
        self.frame();

        if !self.timers.is_empty() {
            let timers = std::mem::take(&mut self.timers);
            self.backend.delete_queries(&timers);
        }

        if self.transient.gl_id != 0 {
            self.backend.delete_buffer(self.transient.gl_id);
            self.transient.gl_id = 0;
        }

        while let Some(entry) = self.textures.last() {
            let texture = entry.texture;
            self.texture_free(texture);
        }
        while let Some(entry) = self.buffers.last() {
            let buffer = entry.buffer;
            self.buffer_free(buffer);
        }

        self.backend.use_program(0);
        for program in std::mem::take(&mut self.programs) {
            self.backend.delete_program(program);
        }
    }

    pub fn caps(&self) -> Caps {
        self.caps
    }

    /// Log the context identity, extensions and probed feature set.
    pub fn dump_caps(&mut self) {
        caps::dump(self.backend.as_mut(), &self.caps);
    }

    pub(crate) fn reset_transient_arena(&mut self) {
        self.transient.offset = 0;
        if self.transient.gl_id == 0 {
            let id = self.backend.create_buffer();
            self.backend.bind_buffer(glow::ARRAY_BUFFER, id);
            self.backend.buffer_data_size(
                glow::ARRAY_BUFFER,
                self.settings.transient_buffer_size,
                glow::DYNAMIC_DRAW,
            );
            self.transient.gl_id = id;
        }
    }

    // --- buffers ---

    /// Create a buffer, optionally with initial contents. `size` is only
    /// consulted when `data` is `None` (a mutable buffer filled later).
    pub fn buffer_new(
        &mut self,
        data: Option<&[u8]>,
        size: usize,
        format: Option<&VertexFormat>,
        flags: BufferFlags,
    ) -> Buffer {
        if let Some(format) = format {
            debug_assert!(format.stride > 0, "format must be finalized with end()");
        }
        let usage = if flags.contains(BufferFlags::MUTABLE) {
            glow::DYNAMIC_DRAW
        } else {
            glow::STATIC_DRAW
        };

        let buffer = Buffer {
            gl_id: self.backend.create_buffer(),
            format: format.copied(),
            flags,
        };
        if !buffer.is_valid() {
            return buffer;
        }

        self.backend.bind_buffer(glow::ARRAY_BUFFER, buffer.gl_id);
        let size = data.map_or(size, <[u8]>::len);
        if size != 0 {
            match data {
                Some(data) => self.backend.buffer_data(glow::ARRAY_BUFFER, data, usage),
                None => self.backend.buffer_data_size(glow::ARRAY_BUFFER, size, usage),
            }
        }

        self.buffers.push(BufferEntry {
            buffer,
            pending: None,
        });
        buffer
    }

    /// Record a deferred update; the bytes upload at the start of the next
    /// [`frame`](Context::frame). Only one update per buffer may be in
    /// flight.
    pub fn buffer_update(&mut self, buffer: &Buffer, data: Vec<u8>, offset: usize) {
        debug_assert!(buffer.flags.contains(BufferFlags::MUTABLE));
        debug_assert!(!data.is_empty());
        let Some(entry) = self
            .buffers
            .iter_mut()
            .find(|e| e.buffer.gl_id == buffer.gl_id)
        else {
            debug_assert!(false, "update on an unregistered buffer");
            return;
        };
        entry.pending = Some(BufferUpdate { offset, data });
    }

    pub fn buffer_free(&mut self, buffer: Buffer) {
        self.backend.delete_buffer(buffer.gl_id);
        self.dirty_buffers.remove(&buffer.gl_id);
        if let Some(i) = self
            .buffers
            .iter()
            .position(|e| e.buffer.gl_id == buffer.gl_id)
        {
            self.buffers.swap_remove(i);
        }
    }

    // --- transient geometry ---

    /// Reserve `num` elements from the per-frame arena. A `None` format
    /// reserves 16-bit index storage. Write the data through
    /// [`transient_data`](Context::transient_data) before `frame()`.
    pub fn transient_buffer(&mut self, format: Option<&VertexFormat>, num: u16) -> TransientBuffer {
        let stride = format.map_or(2, |f| {
            debug_assert!(f.stride > 0);
            f.stride
        });
        let tb = TransientBuffer {
            offset: self.transient.offset,
            num,
            format: format.copied(),
        };
        self.transient.offset += (num as usize * stride) as u32;
        // align, in case the stride is weird
        self.transient.offset += self.transient.offset % 4;
        debug_assert!(
            (self.transient.offset as usize) <= self.settings.transient_buffer_size,
            "transient arena exhausted"
        );
        tb
    }

    /// The reserved bytes, for the caller to fill. Contents must be written
    /// before the `frame()` that consumes them.
    pub fn transient_data(&mut self, tb: &TransientBuffer) -> &mut [u8] {
        let stride = tb.format.as_ref().map_or(2, |f| f.stride);
        let start = tb.offset as usize;
        &mut self.transient.data[start..start + tb.num as usize * stride]
    }

    /// Remaining arena capacity, in elements of `format` (or 16-bit indices
    /// for `None`).
    pub fn transient_available(&self, format: Option<&VertexFormat>) -> u32 {
        let stride = format.map_or(2, |f| f.stride);
        ((self.settings.transient_buffer_size - self.transient.offset as usize) / stride) as u32
    }

    // --- textures ---

    pub fn texture_new(
        &mut self,
        width: u16,
        height: u16,
        layers: u16,
        data: Option<&[u8]>,
        format: TextureFormat,
        flags: TextureFlags,
    ) -> Texture {
        let mut texture = Texture {
            width,
            height,
            layers,
            format,
            flags,
            gl_count: 1,
            is_depth: format.is_depth(),
            ..Texture::default()
        };

        // double buffer CPU-writable textures to reduce stalling
        if flags.contains(TextureFlags::CPU_WRITABLE) {
            texture.gl_count = 2;
        }

        let mut samples = 1;
        if flags.contains(TextureFlags::MSAA_X2) {
            debug_assert!(texture.gl_count == 1);
            samples = 2;
        }
        if flags.contains(TextureFlags::MSAA_X4) {
            debug_assert!(texture.gl_count == 1);
            samples = 4;
        }

        if samples > 1 {
            let id = self.backend.create_renderbuffer();
            self.backend.bind_renderbuffer(id);
            self.backend.renderbuffer_storage_multisample(
                samples,
                format,
                width as i32,
                height as i32,
            );
            texture.gl_msaa_id = id;
        }

        let cube = flags.contains(TextureFlags::CUBE);
        debug_assert!(!(cube && layers > 1), "cube arrays are not supported");
        let target = texture.target();

        let gen_mips = flags.contains(TextureFlags::GEN_MIPS);
        let reserve_mips = flags.contains(TextureFlags::RESERVE_MIPS);
        let mip_filter = gen_mips || reserve_mips;
        if mip_filter {
            texture.mip_count = 1 + (f32::from(width.max(height))).log2().floor() as u16;
        }

        let aniso = self.flags.contains(ResetFlags::MAX_ANISOTROPY);
        for i in 0..texture.gl_count as usize {
            texture.gl_ids[i] = self.backend.create_texture();
            debug_assert!(texture.gl_ids[i] != 0);
            self.backend.bind_texture(target, texture.gl_ids[i]);

            let (min, mag) = if flags.contains(TextureFlags::FILTER_POINT) {
                (
                    if mip_filter {
                        glow::NEAREST_MIPMAP_NEAREST
                    } else {
                        glow::NEAREST
                    },
                    glow::NEAREST,
                )
            } else {
                (
                    if mip_filter {
                        glow::LINEAR_MIPMAP_LINEAR
                    } else {
                        glow::LINEAR
                    },
                    glow::LINEAR,
                )
            };
            self.backend
                .tex_parameter_i32(target, glow::TEXTURE_MIN_FILTER, min as i32);
            self.backend
                .tex_parameter_i32(target, glow::TEXTURE_MAG_FILTER, mag as i32);

            if cube {
                self.backend.tex_parameter_i32(
                    target,
                    glow::TEXTURE_WRAP_R,
                    glow::CLAMP_TO_EDGE as i32,
                );
            }
            self.backend
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_S, glow::CLAMP_TO_EDGE as i32);
            self.backend
                .tex_parameter_i32(target, glow::TEXTURE_WRAP_T, glow::CLAMP_TO_EDGE as i32);

            if aniso {
                self.backend
                    .tex_parameter_f32(target, TEXTURE_MAX_ANISOTROPY, self.max_aniso);
            }

            // reserved mips mean hi-z style targets, not shadow maps; those
            // cannot use reference comparison
            if texture.is_depth && !reserve_mips {
                self.backend.tex_parameter_i32(
                    target,
                    glow::TEXTURE_COMPARE_MODE,
                    glow::COMPARE_REF_TO_TEXTURE as i32,
                );
                self.backend.tex_parameter_i32_slice(
                    target,
                    glow::TEXTURE_SWIZZLE_RGBA,
                    &[
                        glow::RED as i32,
                        glow::RED as i32,
                        glow::RED as i32,
                        glow::ONE as i32,
                    ],
                );
            }
            self.backend.pixel_store_i32(glow::UNPACK_ALIGNMENT, 1);

            if layers > 1 {
                self.backend.tex_image_3d(
                    target,
                    0,
                    format,
                    width as i32,
                    height as i32,
                    layers as i32,
                    data,
                );
            } else if cube {
                let size = i32::from(width.max(height));
                for face in 0..6 {
                    self.backend.tex_image_2d(
                        glow::TEXTURE_CUBE_MAP_POSITIVE_X + face,
                        0,
                        format,
                        size,
                        size,
                        None,
                    );
                }
            } else {
                self.backend
                    .tex_image_2d(target, 0, format, width as i32, height as i32, data);
                if reserve_mips {
                    let mut w = width;
                    let mut h = height;
                    for mip in 1..texture.mip_count {
                        w = (w / 2).max(1);
                        h = (h / 2).max(1);
                        self.backend.tex_image_2d(
                            target,
                            mip as i32,
                            format,
                            w as i32,
                            h as i32,
                            None,
                        );
                    }
                }
            }
            if gen_mips {
                self.backend.generate_mipmap(target);
            }
        }

        if texture.gl_count > 1 {
            self.texture_generation.insert(texture.gl_ids[0], 0);
        }
        self.textures.push(TextureEntry {
            texture,
            pending: None,
        });
        texture
    }

    /// Record a full-surface upload for a CPU-writable texture; it lands at
    /// the start of the next [`frame`](Context::frame), rotating the
    /// texture's double buffer.
    pub fn texture_update(&mut self, texture: &Texture, data: Vec<u8>) {
        debug_assert!(texture.flags.contains(TextureFlags::CPU_WRITABLE));
        debug_assert!(!texture.is_cube());
        let Some(entry) = self
            .textures
            .iter_mut()
            .find(|e| e.texture.gl_ids[0] == texture.gl_ids[0])
        else {
            debug_assert!(false, "update on an unregistered texture");
            return;
        };
        entry.pending = Some(data);
    }

    pub fn texture_free(&mut self, texture: Texture) {
        if let Some(i) = self
            .textures
            .iter()
            .position(|e| e.texture.gl_ids[0] == texture.gl_ids[0])
        {
            let entry = self.textures.swap_remove(i);
            for j in 0..entry.texture.gl_count as usize {
                self.backend.delete_texture(entry.texture.gl_ids[j]);
                self.dirty_textures.remove(&entry.texture.gl_ids[j]);
            }
            if entry.texture.gl_msaa_id != 0 {
                self.backend.delete_renderbuffer(entry.texture.gl_msaa_id);
            }
            self.texture_generation.remove(&entry.texture.gl_ids[0]);
        }
    }

    // --- canvases ---

    /// Build a canvas over existing attachments. With `claim_attachments`,
    /// freeing the canvas also frees the textures.
    pub fn canvas_attachments_new(
        &mut self,
        claim_attachments: bool,
        attachments: &[Texture],
    ) -> Result<Canvas, String> {
        debug_assert!(!attachments.is_empty() && attachments.len() <= MAX_ATTACHMENTS);

        let first = &attachments[0];
        let mut canvas = Canvas {
            allocated: attachments.len() as u8,
            width: first.width,
            height: first.height,
            current_width: first.width,
            current_height: first.height,
            own_attachments: claim_attachments,
            cube: first.is_cube(),
            msaa: first.flags.contains(TextureFlags::MSAA_X2)
                || first.flags.contains(TextureFlags::MSAA_X4),
            ..Canvas::default()
        };
        debug_assert!(!(canvas.msaa && canvas.cube));
        debug_assert!(!(canvas.msaa && first.layers > 1));

        for (i, attachment) in attachments.iter().enumerate() {
            debug_assert!(attachment.gl_count == 1);
            debug_assert!(attachment.layers == first.layers);
            debug_assert!(!attachment.flags.contains(TextureFlags::CPU_WRITABLE));
            canvas.attachments[i] = *attachment;
        }

        canvas.gl_fbos[0] = self.backend.create_framebuffer();
        if canvas.msaa {
            canvas.gl_fbos[1] = self.backend.create_framebuffer();
        }
        self.backend
            .bind_framebuffer(glow::FRAMEBUFFER, canvas.gl_fbos[0]);

        if !canvas::reconfigure(self.backend.as_mut(), &canvas) {
            error!("canvas framebuffer is incomplete");
            self.canvas_free(canvas);
            return Err("framebuffer incomplete".to_string());
        }

        if canvas.gl_fbos[1] != 0 {
            self.backend
                .bind_framebuffer(glow::FRAMEBUFFER, canvas.gl_fbos[1]);
            let mut offset = 0;
            for attachment in canvas.attachments() {
                let attach = if attachment.is_depth {
                    glow::DEPTH_ATTACHMENT
                } else {
                    let a = glow::COLOR_ATTACHMENT0 + offset;
                    offset += 1;
                    a
                };
                self.backend
                    .framebuffer_renderbuffer(attach, attachment.gl_msaa_id);
            }
        }

        Ok(canvas)
    }

    /// Build a canvas and its attachments from a combined format: color
    /// and/or depth per the format table.
    pub fn canvas_new(
        &mut self,
        width: u16,
        height: u16,
        format: TextureFormat,
        flags: TextureFlags,
    ) -> Result<Canvas, String> {
        use TextureFormat as F;
        let (color, depth) = match format {
            F::R32F | F::Rg16F | F::Rg32F | F::Rgb565 | F::Rgba8 | F::Rgb10A2 | F::Rg11B10F
            | F::Rgba16F | F::Srgb8 | F::Srgb8A8 | F::R32Ui => (Some(format), None),
            F::Rgb565D16 => (Some(F::Rgb565), Some(F::D16)),
            F::Rgba8D16 => (Some(F::Rgba8), Some(F::D16)),
            F::Rgba8D24 => (Some(F::Rgba8), Some(F::D24)),
            F::D16 | F::D24 | F::D32 | F::D32F => (None, Some(format)),
        };

        let mut attachments = Vec::with_capacity(2);
        if let Some(color) = color {
            attachments.push(self.texture_new(width, height, 1, None, color, flags));
        }
        if let Some(depth) = depth {
            attachments.push(self.texture_new(width, height, 1, None, depth, flags));
        }

        self.canvas_attachments_new(true, &attachments)
    }

    pub fn canvas_free(&mut self, canvas: Canvas) {
        if !canvas.is_valid() {
            return;
        }
        for fbo in canvas.gl_fbos {
            if fbo != 0 {
                self.backend.delete_framebuffer(fbo);
            }
        }
        if canvas.own_attachments {
            for i in 0..canvas.allocated as usize {
                self.texture_free(canvas.attachments[i]);
            }
        }
    }

    /// A sampling view of one canvas attachment. CPU writability is
    /// stripped; rendering into a texture and updating it from the CPU do
    /// not mix.
    pub fn canvas_texture(&self, canvas: &Canvas, index: u8) -> Texture {
        debug_assert!(index < canvas.allocated);
        let mut texture = canvas.attachments[index as usize];
        texture.gl_ids[0] = texture.gl_id();
        texture.gl_count = 1;
        texture.gl_idx = 0;
        texture.flags.remove(TextureFlags::CPU_WRITABLE);
        texture
    }

    // --- programs ---

    pub fn program_new(
        &mut self,
        vss: &str,
        fss: &str,
        attribs: &[&str],
    ) -> Result<Program, String> {
        self.program_gs_new(None, vss, fss, attribs)
    }

    /// Link a program with an optional geometry stage.
    pub fn program_gs_new(
        &mut self,
        gss: Option<&str>,
        vss: &str,
        fss: &str,
        attribs: &[&str],
    ) -> Result<Program, String> {
        let mut shaders = Vec::with_capacity(3);
        let stages = [
            (glow::GEOMETRY_SHADER, gss),
            (glow::VERTEX_SHADER, Some(vss)),
            (glow::FRAGMENT_SHADER, Some(fss)),
        ];
        for (stage, source) in stages {
            let Some(source) = source else { continue };
            match self.compile_stage(stage, source) {
                Ok(shader) => shaders.push(shader),
                Err(e) => {
                    for shader in shaders {
                        self.backend.delete_shader(shader);
                    }
                    return Err(e);
                }
            }
        }
        self.link(&shaders, attribs)
    }

    /// Link a compute program. Fails when the context has no compute
    /// support.
    pub fn program_cs_new(&mut self, css: &str) -> Result<Program, String> {
        if !self.caps.compute {
            warn!("compute programs need a compute-capable context");
            return Err("compute unsupported".to_string());
        }
        let shader = self.compile_stage(glow::COMPUTE_SHADER, css)?;
        self.link(&[shader], &[])
    }

    fn compile_stage(&mut self, stage: u32, source: &str) -> Result<u32, String> {
        self.shaderc_allocated = true;
        debug_assert!(stage != glow::COMPUTE_SHADER || self.caps.compute);
        let full = program::stage_source(
            source,
            stage,
            self.backend.is_gles(),
            self.backend.context_version(),
        );
        self.backend.create_shader(stage, &full).map_err(|e| {
            error!("Error compiling shader:\n{e}");
            e
        })
    }

    fn link(&mut self, shaders: &[u32], attribs: &[&str]) -> Result<Program, String> {
        let result = self.backend.create_program(shaders, attribs);
        for &shader in shaders {
            self.backend.delete_shader(shader);
        }
        match result {
            Ok(gl_id) => {
                self.programs.push(gl_id);
                Ok(Program { gl_id })
            }
            Err(e) => {
                error!("Error linking program:\n{e}");
                Err(e)
            }
        }
    }

    // --- uniforms ---

    /// Stage a float-family uniform value. The bytes are copied into the
    /// frame arena immediately; `data` is free after the call. `count`
    /// overrides the declared element count when `Some`.
    pub fn set_uniform(&mut self, uniform: &Uniform, data: &[f32], count: Option<u16>) {
        debug_assert!(uniform.ty != UniformType::Int);
        let count = count.unwrap_or(uniform.count);
        let size = count as usize * uniform.ty.element_size();
        debug_assert!(data.len() * 4 >= size);
        let range = self.stage_bytes(&bytemuck::cast_slice(data)[..size]);
        self.pending_uniforms.push(PendingUniform {
            name: uniform.name.clone(),
            ty: uniform.ty,
            count,
            range,
        });
    }

    /// Stage an int uniform value.
    pub fn set_uniform_int(&mut self, uniform: &Uniform, data: &[i32], count: Option<u16>) {
        debug_assert!(uniform.ty == UniformType::Int);
        let count = count.unwrap_or(uniform.count);
        let size = count as usize * uniform.ty.element_size();
        debug_assert!(data.len() * 4 >= size);
        let range = self.stage_bytes(&bytemuck::cast_slice(data)[..size]);
        self.pending_uniforms.push(PendingUniform {
            name: uniform.name.clone(),
            ty: uniform.ty,
            count,
            range,
        });
    }

    fn stage_bytes(&mut self, bytes: &[u8]) -> std::ops::Range<usize> {
        let start = self.uniform_arena.len();
        debug_assert!(
            start + bytes.len() <= self.uniform_arena.capacity(),
            "uniform arena exhausted; raise Settings::uniform_buffer_size"
        );
        self.uniform_arena.extend_from_slice(bytes);
        start..start + bytes.len()
    }

    // --- the scratch draw ---

    /// Bind a texture to a sampler slot for the next submit. Stages the
    /// sampler uniform with the slot index as its value.
    pub fn set_texture(&mut self, sampler: &Uniform, texture: &Texture, slot: u8) {
        debug_assert!((slot as usize) < MAX_SLOTS);
        debug_assert!(sampler.count == 1);
        debug_assert!(texture.is_valid());
        let value = [i32::from(slot)];
        let range = self.stage_bytes(bytemuck::cast_slice(&value));
        self.pending_uniforms.push(PendingUniform {
            name: sampler.name.clone(),
            ty: UniformType::Int,
            count: 1,
            range,
        });
        self.tmp_draw.textures[slot as usize] = Some(*texture);
    }

    /// Bind a texture mip as a compute image, flagging write intent for
    /// barrier tracking.
    pub fn set_image(
        &mut self,
        sampler: &Uniform,
        texture: &Texture,
        slot: u8,
        mip: u8,
        write: bool,
    ) {
        debug_assert!((slot as usize) < MAX_SLOTS);
        self.set_texture(sampler, texture, slot);
        self.tmp_draw.textures_mip[slot as usize] = mip;
        self.tmp_draw.textures_write[slot as usize] = write;
    }

    /// Bind a shader-storage buffer, flagging write intent for barrier
    /// tracking.
    pub fn set_buffer(&mut self, buffer: &Buffer, slot: u8, write: bool) {
        debug_assert!((slot as usize) < MAX_SLOTS);
        debug_assert!(buffer.is_valid());
        self.tmp_draw.ssbos[slot as usize] = Some(*buffer);
        self.tmp_draw.ssbo_write[slot as usize] = write;
    }

    pub fn set_state(&mut self, flags: DrawFlags) {
        self.tmp_draw.flags = flags;
    }

    pub fn set_scissor(&mut self, x: u16, y: u16, w: u16, h: u16) {
        self.tmp_draw.scissor = Some(Rect::new(x, y, w, h));
    }

    /// Run `callback` mid-replay, between this draw's uniform upload and its
    /// draw call.
    pub fn set_callback(&mut self, callback: impl Fn(&mut dyn GlBackend) + 'static) {
        self.tmp_draw.callback = Some(Rc::new(callback) as DrawCallback);
    }

    pub fn set_vertices(&mut self, vbo: &Buffer, count: u32) {
        debug_assert!(vbo.is_valid());
        debug_assert!(vbo.format.is_some(), "vertex buffers need a format");
        self.tmp_draw.vbo = Some(*vbo);
        if self.tmp_draw.ibo.is_none() {
            self.tmp_draw.indices = count;
        }
    }

    pub fn set_indices(&mut self, ibo: &Buffer, count: u32, offset: usize) {
        debug_assert!(ibo.is_valid());
        self.tmp_draw.ibo = Some(*ibo);
        self.tmp_draw.offset = offset;
        self.tmp_draw.indices = count;
    }

    pub fn set_transient_buffer(&mut self, tb: TransientBuffer) {
        debug_assert!(tb.format.is_some(), "transient vertex data needs a format");
        self.tmp_draw.vbo = Some(Buffer {
            gl_id: self.transient.gl_id,
            format: None,
            flags: BufferFlags::empty(),
        });
        self.tmp_draw.tvb_format = tb.format;
        self.tmp_draw.offset = tb.offset as usize;
        self.tmp_draw.indices = u32::from(tb.num);
    }

    /// Snapshot the scratch draw into view `id`'s draw queue. Pending
    /// uniforms relevant to `program` are resolved and captured now,
    /// last-write-wins per name. `retain` keeps the scratch for the next
    /// submit instead of zeroing it.
    pub fn submit(&mut self, id: u8, program: Program, retain: bool) {
        debug_assert!(program.is_valid(), "submit with an invalid program");
        let mut draw = self.tmp_draw.clone();
        draw.program = program.gl_id;
        draw.uniforms = self.snapshot_uniforms(program.gl_id);
        self.views[id as usize].draws.push(draw);
        if !retain {
            self.tmp_draw = Draw::default();
        }
    }

    /// Queue an empty draw so the view's clear and flush still run with
    /// nothing to render.
    pub fn touch(&mut self, id: u8) {
        self.tmp_draw = Draw::default();
        self.views[id as usize].draws.push(Draw::default());
    }

    /// Snapshot the scratch into view `id`'s compute queue.
    pub fn dispatch(&mut self, id: u8, program: Program, x: u32, y: u32, z: u32) {
        debug_assert!(program.is_valid(), "dispatch with an invalid program");
        debug_assert!(x * y * z > 0);
        if !self.caps.compute {
            warn!("compute is not supported; dispatch ignored");
            self.tmp_draw = Draw::default();
            return;
        }
        let mut job = self.tmp_draw.clone();
        job.program = program.gl_id;
        job.threads_x = x;
        job.threads_y = y;
        job.threads_z = z;
        job.uniforms = self.snapshot_uniforms(program.gl_id);
        self.views[id as usize].jobs.push(job);
        self.tmp_draw = Draw::default();
    }

    /// Queue a copy from view `src`'s canvas into view `dst`'s canvas,
    /// executed at `dst`'s slot in the frame.
    pub fn blit(&mut self, dst: u8, src: u8, x: u16, y: u16, w: u16, h: u16, mip: u16) {
        let source = self.view_canvas(src);
        let target = self.view_canvas(dst);
        // blit to self doesn't make sense, and msaa resolve is automatic
        debug_assert!(!source.same_target(&target));

        let blit = BlitOp {
            source,
            source_mip: mip,
            rect: Rect::new(x, y, w, h),
            mask: target.clear_mask(),
        };
        self.views[dst as usize].blits.push(blit);
    }

    fn snapshot_uniforms(&mut self, program: u32) -> Vec<PendingUniform> {
        let mut seen: FxHashSet<Arc<str>> = FxHashSet::default();
        let mut snapshot = Vec::new();

        // scan backward so the most recent value for a name wins
        for i in (0..self.pending_uniforms.len()).rev() {
            let (name, ty, count, range) = {
                let u = &self.pending_uniforms[i];
                (u.name.clone(), u.ty, u.count, u.range.clone())
            };

            let cached = self
                .uniform_map
                .get(&program)
                .and_then(|m| m.get(name.as_ref()))
                .copied();
            let location = match cached {
                Some(location) => Some(location),
                None => {
                    let found = self.backend.uniform_location(program, &name);
                    if let Some(location) = found {
                        self.uniform_map
                            .entry(program)
                            .or_default()
                            .insert(name.clone(), location);
                    }
                    found
                }
            };
            if location.is_none() {
                // not part of this program; leave it for other submits
                continue;
            }

            if !seen.insert(name.clone()) {
                continue;
            }

            let start = self.uniform_arena.len();
            debug_assert!(
                start + range.len() <= self.uniform_arena.capacity(),
                "uniform arena exhausted; raise Settings::uniform_buffer_size"
            );
            self.uniform_arena.extend_from_within(range.clone());
            snapshot.push(PendingUniform {
                name,
                ty,
                count,
                range: start..start + range.len(),
            });
        }

        snapshot
    }

    // --- views ---

    pub fn view_set_flags(&mut self, id: u8, flags: ViewFlags) {
        let view = &mut self.views[id as usize];
        if flags.contains(ViewFlags::INVALIDATE) {
            view.flags |= ViewState::INVALIDATE;
        }
    }

    pub fn view_set_name(&mut self, id: u8, name: &str) {
        self.views[id as usize].name = Some(name.to_string());
    }

    /// Target the view at a canvas. `layer` selects a mip level (non-cube),
    /// a cube face, or -1 for layered rendering into every layer at once.
    pub fn view_set_canvas(&mut self, id: u8, canvas: &Canvas, layer: i32) {
        let view = &mut self.views[id as usize];
        view.canvas = Some(*canvas);
        view.canvas_layer = layer;
    }

    /// Target the backbuffer again.
    pub fn view_set_backbuffer(&mut self, id: u8) {
        let view = &mut self.views[id as usize];
        view.canvas = None;
        view.canvas_layer = 0;
    }

    /// Clear color as packed 0xRRGGBBAA.
    pub fn view_set_clear_color(&mut self, id: u8, color: u32) {
        let view = &mut self.views[id as usize];
        view.flags |= ViewState::CLEAR_COLOR;
        view.clear_color = color;
    }

    pub fn view_set_clear_depth(&mut self, id: u8, depth: f32) {
        let view = &mut self.views[id as usize];
        view.flags |= ViewState::CLEAR_DEPTH;
        view.clear_depth = depth;
    }

    pub fn view_set_depth_test(&mut self, id: u8, mode: DepthTest) {
        let view = &mut self.views[id as usize];
        view.flags &= !ViewState::DEPTH_TEST_MASK;
        view.flags |= match mode {
            DepthTest::None => ViewState::empty(),
            DepthTest::Less => ViewState::DEPTH_TEST_LT,
            DepthTest::Greater => ViewState::DEPTH_TEST_GT,
            DepthTest::Equal => ViewState::DEPTH_TEST_EQ,
        };
    }

    pub fn view_set_scissor(&mut self, id: u8, x: u16, y: u16, w: u16, h: u16) {
        let view = &mut self.views[id as usize];
        view.flags |= ViewState::SCISSOR;
        view.scissor = Rect::new(x, y, w, h);
    }

    pub fn view_set_viewports(&mut self, id: u8, viewports: &[Rect]) {
        debug_assert!(viewports.len() <= MAX_VIEWPORTS);
        if viewports.len() > 1 {
            debug_assert!(self.backend.has_indexed_viewports());
        }
        let view = &mut self.views[id as usize];
        view.viewports.clear();
        view.viewports.extend_from_slice(viewports);
    }

    /// Instance multiplier for every draw in the view; 0 derives it from the
    /// viewport count and target layers.
    pub fn view_set_instance_mul(&mut self, id: u8, factor: u32) {
        if !self.caps.instancing {
            warn!("instancing is not supported, instance mul will be ignored");
        }
        self.views[id as usize].instance_mul = factor;
    }

    pub fn view_width(&self, id: u8) -> u16 {
        self.view_canvas(id).width
    }

    pub fn view_height(&self, id: u8) -> u16 {
        self.view_canvas(id).height
    }

    pub fn view_dimensions(&self, id: u8) -> (u16, u16) {
        let canvas = self.view_canvas(id);
        (canvas.width, canvas.height)
    }

    /// The view's render target: its canvas, or the backbuffer.
    pub(crate) fn view_canvas(&self, id: u8) -> Canvas {
        self.views[id as usize]
            .canvas
            .unwrap_or(self.backbuffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;
    use crate::format::ComponentType;

    fn test_context() -> Context {
        let mut ctx = Context::new(RecordingBackend::new());
        ctx.reset(640, 480, ResetFlags::empty());
        ctx
    }

    fn position_color_format() -> VertexFormat {
        let mut fmt = VertexFormat::start();
        fmt.add(0, 3, false, ComponentType::Float);
        fmt.add(1, 4, true, ComponentType::Float);
        fmt.end();
        fmt
    }

    #[test]
    fn depth_test_modes_are_mutually_exclusive() {
        let mut ctx = test_context();
        ctx.view_set_depth_test(1, DepthTest::Less);
        ctx.view_set_depth_test(1, DepthTest::Greater);
        let flags = ctx.views[1].flags;
        assert!(flags.contains(ViewState::DEPTH_TEST_GT));
        assert!(!flags.contains(ViewState::DEPTH_TEST_LT));
        assert!(!flags.contains(ViewState::DEPTH_TEST_EQ));

        ctx.view_set_depth_test(1, DepthTest::None);
        assert!(!ctx.views[1].flags.intersects(ViewState::DEPTH_TEST_MASK));
    }

    #[test]
    fn submit_without_retain_zeroes_the_scratch() {
        let mut ctx = test_context();
        let fmt = position_color_format();
        let vbo = ctx.buffer_new(Some(&[0u8; 84]), 0, Some(&fmt), BufferFlags::empty());
        let program = ctx.program_new("", "", &["a_position"]).unwrap();

        ctx.set_vertices(&vbo, 3);
        ctx.set_state(DrawFlags::RGB_WRITE);
        ctx.set_scissor(0, 0, 10, 10);
        ctx.submit(1, program, false);

        // no further set_* calls: the second draw must be all-default
        ctx.submit(1, program, false);

        let second = &ctx.views[1].draws[1];
        assert!(second.vbo.is_none());
        assert!(second.ibo.is_none());
        assert!(second.scissor.is_none());
        assert!(second.flags.is_empty());
        assert!(second.textures.iter().all(Option::is_none));
        assert!(second.ssbos.iter().all(Option::is_none));
    }

    #[test]
    fn submit_with_retain_keeps_the_scratch() {
        let mut ctx = test_context();
        let fmt = position_color_format();
        let vbo = ctx.buffer_new(Some(&[0u8; 84]), 0, Some(&fmt), BufferFlags::empty());
        let program = ctx.program_new("", "", &["a_position"]).unwrap();

        ctx.set_vertices(&vbo, 3);
        ctx.submit(1, program, true);
        ctx.submit(1, program, false);

        assert!(ctx.views[1].draws[1].vbo.is_some());
        assert_eq!(ctx.views[1].draws[1].indices, 3);
    }

    #[test]
    fn index_count_wins_over_vertex_count() {
        let mut ctx = test_context();
        let fmt = position_color_format();
        let vbo = ctx.buffer_new(Some(&[0u8; 84]), 0, Some(&fmt), BufferFlags::empty());
        let ibo = ctx.buffer_new(Some(&[0u8; 12]), 0, None, BufferFlags::empty());

        ctx.set_indices(&ibo, 6, 0);
        ctx.set_vertices(&vbo, 3);
        assert_eq!(ctx.tmp_draw.indices, 6);

        ctx.tmp_draw = Draw::default();
        ctx.set_vertices(&vbo, 3);
        ctx.set_indices(&ibo, 6, 0);
        assert_eq!(ctx.tmp_draw.indices, 6);
    }

    #[test]
    fn transient_arena_reclaims_fully_across_frames() {
        let mut ctx = test_context();
        let fmt = position_color_format();
        let baseline = ctx.transient_available(Some(&fmt));

        let tb = ctx.transient_buffer(Some(&fmt), 100);
        assert_eq!(tb.count(), 100);
        assert!(ctx.transient_available(Some(&fmt)) < baseline);

        ctx.frame();
        assert_eq!(ctx.transient_available(Some(&fmt)), baseline);
    }

    #[test]
    fn transient_reservations_stack_with_alignment() {
        let mut ctx = test_context();
        let mut fmt = VertexFormat::start();
        fmt.add(0, 3, false, ComponentType::Short); // stride 6, unaligned
        fmt.end();

        let a = ctx.transient_buffer(Some(&fmt), 1);
        let b = ctx.transient_buffer(Some(&fmt), 1);
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset % 4, 0);
        assert!(b.offset >= 6);
    }

    #[test]
    fn null_transient_format_sizes_as_16_bit_indices() {
        let ctx = test_context();
        let available = ctx.transient_available(None);
        assert_eq!(
            available as usize,
            ctx.settings.transient_buffer_size / 2
        );
    }

    #[test]
    fn set_uniform_copies_out_of_the_caller_slice() {
        let mut ctx = test_context();
        let color = Uniform::new("u_color", UniformType::Vec4, 1);

        let mut value = [1.0f32, 0.0, 0.0, 1.0];
        ctx.set_uniform(&color, &value, None);
        // caller reuses its buffer immediately; the staged bytes must not move
        value = [9.0, 9.0, 9.0, 9.0];
        let _ = value;

        let staged = &ctx.uniform_arena[ctx.pending_uniforms[0].range.clone()];
        let staged: &[f32] = bytemuck::cast_slice(staged);
        assert_eq!(staged, &[1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn touch_queues_one_empty_draw() {
        let mut ctx = test_context();
        ctx.touch(7);
        assert_eq!(ctx.views[7].draws.len(), 1);
        assert!(ctx.views[7].draws[0].is_empty());
        assert_eq!(ctx.views[7].draws[0].program, 0);
    }

    #[test]
    fn view_dimensions_resolve_through_canvas_or_backbuffer() {
        let mut ctx = test_context();
        assert_eq!(ctx.view_dimensions(0), (640, 480));

        let canvas = ctx
            .canvas_new(128, 64, TextureFormat::Rgba8D16, TextureFlags::empty())
            .unwrap();
        ctx.view_set_canvas(0, &canvas, 0);
        assert_eq!(ctx.view_dimensions(0), (128, 64));

        ctx.view_set_backbuffer(0);
        assert_eq!(ctx.view_dimensions(0), (640, 480));
    }

    #[test]
    fn canvas_new_splits_combined_formats() {
        let mut ctx = test_context();
        let canvas = ctx
            .canvas_new(32, 32, TextureFormat::Rgba8D16, TextureFlags::empty())
            .unwrap();
        assert_eq!(canvas.allocated, 2);
        assert!(!canvas.attachments[0].is_depth);
        assert!(canvas.attachments[1].is_depth);
        assert_eq!(canvas.attachments[1].format(), TextureFormat::D16);
    }

    #[test]
    fn canvas_texture_strips_cpu_writability() {
        let mut ctx = test_context();
        let canvas = ctx
            .canvas_new(32, 32, TextureFormat::Rgba8, TextureFlags::empty())
            .unwrap();
        let tex = ctx.canvas_texture(&canvas, 0);
        assert!(!tex.flags().contains(TextureFlags::CPU_WRITABLE));
        assert!(tex.is_valid());
    }

    #[test]
    fn registry_uses_swap_remove() {
        let mut ctx = test_context();
        let a = ctx.buffer_new(Some(&[0u8; 4]), 0, None, BufferFlags::empty());
        let b = ctx.buffer_new(Some(&[0u8; 4]), 0, None, BufferFlags::empty());
        let c = ctx.buffer_new(Some(&[0u8; 4]), 0, None, BufferFlags::empty());
        ctx.buffer_free(a);
        // iteration order changed, but both survivors are present
        let ids: Vec<u32> = ctx.buffers.iter().map(|e| e.buffer.gl_id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&b.gl_id));
        assert!(ids.contains(&c.gl_id));
    }

    #[test]
    fn cpu_writable_textures_double_buffer() {
        let mut ctx = test_context();
        let tex = ctx.texture_new(
            4,
            4,
            1,
            None,
            TextureFormat::Rgba8,
            TextureFlags::CPU_WRITABLE,
        );
        assert_eq!(tex.gl_count, 2);
        assert_ne!(tex.gl_ids[0], tex.gl_ids[1]);
        assert_eq!(ctx.texture_generation.get(&tex.gl_ids[0]), Some(&0));
    }
}
