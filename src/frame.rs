//! Frame replay: drain every view's queues into native calls, in ascending
//! view order, diffing state between adjacent draws.

use crate::backend::{GlBackend, Rect2};
use crate::canvas::{self, Canvas};
use crate::context::Context;
use crate::draw::{Draw, MAX_SLOTS};
use crate::format::ComponentType;
use crate::state::{DrawFlags, Rect, ResetFlags, ViewState};
use crate::texture::{Texture, TextureFlags};
use crate::uniform::UniformType;
use crate::view::VIEW_MAX;
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use std::sync::Arc;

const TIMER_LATENCY: usize = 3;

pub(crate) fn timer_count() -> usize {
    (VIEW_MAX + 1) * TIMER_LATENCY
}

/// What one [`Context::frame`] call replayed.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub draws: u32,
    pub blits: u32,
    /// Per-active-view GPU time deltas in nanoseconds, when timing was
    /// requested and results were ready. Best effort: a result that is not
    /// yet available is skipped for this cycle.
    pub timings: Vec<u64>,
}

/// The id a texture is tracked under for hazard and registry purposes.
#[inline(always)]
fn track_id(texture: &Texture) -> u32 {
    texture.gl_ids[0]
}

/// The native id a bind should use: CPU-writable textures resolve through
/// their current registry generation.
fn live_id(generations: &FxHashMap<u32, u8>, texture: &Texture) -> u32 {
    if texture.gl_count > 1
        && let Some(&generation) = generations.get(&track_id(texture))
    {
        return texture.gl_ids[generation as usize];
    }
    texture.gl_id()
}

fn flush_uniforms(
    backend: &mut dyn GlBackend,
    uniform_map: &FxHashMap<u32, FxHashMap<Arc<str>, i32>>,
    arena: &[u8],
    draw: &Draw,
) {
    let locations = uniform_map.get(&draw.program);
    for uniform in &draw.uniforms {
        let location = locations
            .and_then(|m| m.get(uniform.name.as_ref()))
            .copied();
        let Some(location) = location else {
            // submission cached this location; its absence is a logic error
            debug_assert!(false, "uniform location lost between submit and replay");
            continue;
        };
        let bytes = &arena[uniform.range.clone()];
        match uniform.ty {
            UniformType::Int => backend.uniform_i32(location, bytemuck::cast_slice(bytes)),
            UniformType::Float => backend.uniform_f32(location, bytemuck::cast_slice(bytes)),
            UniformType::Vec2 => backend.uniform_vec2(location, bytemuck::cast_slice(bytes)),
            UniformType::Vec3 => backend.uniform_vec3(location, bytemuck::cast_slice(bytes)),
            UniformType::Vec4 => backend.uniform_vec4(location, bytemuck::cast_slice(bytes)),
            UniformType::Mat2 => backend.uniform_mat2(location, bytemuck::cast_slice(bytes)),
            UniformType::Mat3 => backend.uniform_mat3(location, bytemuck::cast_slice(bytes)),
            UniformType::Mat4 => backend.uniform_mat4(location, bytemuck::cast_slice(bytes)),
        }
    }
}

/// Bind a job's images and SSBOs, inserting a barrier exactly when a slot's
/// resource has a pending GPU write, and marking new writes.
fn bind_job_resources(
    backend: &mut dyn GlBackend,
    generations: &FxHashMap<u32, u8>,
    dirty_textures: &mut FxHashSet<u32>,
    dirty_buffers: &mut FxHashSet<u32>,
    job: &Draw,
) {
    for slot in 0..MAX_SLOTS {
        if let Some(texture) = &job.textures[slot] {
            if dirty_textures.remove(&track_id(texture)) {
                backend.memory_barrier(glow::SHADER_IMAGE_ACCESS_BARRIER_BIT);
            }
            let write = job.textures_write[slot];
            if write {
                dirty_textures.insert(track_id(texture));
            }
            backend.bind_image_texture(
                slot as u32,
                live_id(generations, texture),
                i32::from(job.textures_mip[slot]),
                write,
                texture.format,
            );
        }
        if let Some(ssbo) = &job.ssbos[slot] {
            if dirty_buffers.remove(&ssbo.gl_id) {
                backend.memory_barrier(glow::SHADER_STORAGE_BARRIER_BIT);
            }
            if job.ssbo_write[slot] {
                dirty_buffers.insert(ssbo.gl_id);
            }
            backend.bind_buffer_base(glow::SHADER_STORAGE_BUFFER, slot as u32, ssbo.gl_id);
        }
    }
}

impl Context {
    /// Replay everything queued since the previous call, in ascending view
    /// order, then reset all per-frame state. The sole submission point;
    /// must run on the thread owning the native context.
    pub fn frame(&mut self) -> Stats {
        // Shader compiles should be done for a good while once frames are
        // running; let mobile drivers drop the compiler's memory.
        self.release_compiler();

        if self.caps.debug_output {
            self.backend.enable(glow::DEBUG_OUTPUT);
        }
        // not aware of any situation where this is available but undesirable
        if self.caps.seamless_cubemap {
            self.backend.enable(glow::TEXTURE_CUBE_MAP_SEAMLESS);
        }

        let vao = self.backend.create_vertex_array();
        self.backend.bind_vertex_array(vao);

        let debug_groups = self.backend.has_debug_groups();
        let mut debug_id: u32 = 0;

        if debug_groups {
            self.backend.push_debug_group(debug_id, "Update Resources");
            debug_id += 1;
        }
        self.upload_pending_resources();
        if debug_groups {
            self.backend.pop_debug_group();
        }

        let mut stats = Stats::default();

        // render-target state threaded through the view loop: the previous
        // view's canvas, with the view id that owns the copy
        let mut last_canvas: Option<(u8, Canvas)> = None;
        let mut last_attrib_count: u32 = 0;
        let mut last_program: u32 = 0;
        let mut last_result: u64 = 0;

        // timers flip between ring generations; results read back this frame
        // are the ones issued two frames ago
        let next_offset = (self.timer_offset + VIEW_MAX + 1) % timer_count();

        for id in 0..VIEW_MAX {
            if self.views[id].is_idle() {
                continue;
            }

            let draws = std::mem::take(&mut self.views[id].draws);
            let jobs = std::mem::take(&mut self.views[id].jobs);
            let blits = std::mem::take(&mut self.views[id].blits);

            let view_flags = self.views[id].flags;
            let view_scissor = self.views[id].scissor;
            let view_instance_mul = self.views[id].instance_mul;
            let canvas_layer = self.views[id].canvas_layer;
            let mut viewports: SmallVec<[Rect; 4]> = self.views[id].viewports.clone();

            if debug_groups {
                let label = match &self.views[id].name {
                    Some(name) => format!("{name} ({id})"),
                    None => format!("View {id}"),
                };
                self.backend.push_debug_group(debug_id, &label);
                debug_id += 1;
            }

            if self.use_timers {
                let idx = id + next_offset;
                if self.backend.query_result_available(self.timers[idx]) {
                    let result = self.backend.query_result(self.timers[idx]);
                    let now = result.wrapping_sub(last_result);
                    last_result = result;
                    if let Some(previous) = stats.timings.last_mut() {
                        *previous = now;
                    }
                    stats.timings.push(0);
                }
                let q = self.timers[id + self.timer_offset];
                self.backend.query_timestamp(q);
            }

            stats.draws += draws.len() as u32;

            let mut current = self.view_canvas(id as u8);

            let canvas_changed = last_canvas
                .as_ref()
                .is_some_and(|(_, last)| !last.same_target(&current));
            let last_mip = last_canvas
                .as_ref()
                .map_or(0, |(_, last)| last.current_mip);
            let reset_mip = canvas_changed && last_mip != 0;
            let mip_changed = reset_mip || i32::from(last_mip) != canvas_layer;

            // restore the previous target's mip range once we stop rendering
            // into a level, so sampling works again
            if reset_mip && let Some((owner, last)) = &mut last_canvas {
                for i in 0..last.allocated as usize {
                    let attachment = last.attachments[i];
                    self.backend.bind_texture(glow::TEXTURE_2D, attachment.gl_ids[0]);
                    self.backend
                        .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_BASE_LEVEL, 0);
                    self.backend.tex_parameter_i32(
                        glow::TEXTURE_2D,
                        glow::TEXTURE_MAX_LEVEL,
                        i32::from(attachment.mip_count.max(1)) - 1,
                    );
                }
                let mut offset = 0;
                for i in 0..last.allocated as usize {
                    let attachment = last.attachments[i];
                    let attach = if attachment.is_depth {
                        glow::DEPTH_ATTACHMENT
                    } else {
                        let a = glow::COLOR_ATTACHMENT0 + offset;
                        offset += 1;
                        a
                    };
                    self.backend
                        .framebuffer_texture_2d(attach, glow::TEXTURE_2D, attachment.gl_ids[0], 0);
                }
                last.current_width = last.width;
                last.current_height = last.height;
                last.current_mip = 0;
                let (owner, last) = (*owner, *last);
                self.store_canvas(owner, last);
            }

            // resolve msaa before anything reads the previous target
            if let Some((_, last)) = &last_canvas
                && last.msaa
                && last_mip == 0
                && (canvas_changed || mip_changed)
            {
                let mask = last.clear_mask();
                self.backend
                    .bind_framebuffer(glow::DRAW_FRAMEBUFFER, last.gl_fbos[0]);
                self.backend
                    .bind_framebuffer(glow::READ_FRAMEBUFFER, last.gl_fbos[1]);
                let full = Rect2::new(0, 0, i32::from(last.width), i32::from(last.height));
                self.backend
                    .blit_framebuffer(full, full, mask, glow::NEAREST);
            }

            stats.blits += blits.len() as u32;
            if !blits.is_empty() {
                if debug_groups {
                    self.backend.push_debug_group(debug_id, "Blit");
                    debug_id += 1;
                }
                self.run_blits(&blits, &current);
                if debug_groups {
                    self.backend.pop_debug_group();
                }
            }

            // compute runs after blits so jobs can rely on resolved sources
            if self.caps.compute && !jobs.is_empty() {
                if debug_groups {
                    self.backend.push_debug_group(debug_id, "Compute");
                    debug_id += 1;
                }
                for job in &jobs {
                    if job.program != last_program {
                        self.backend.use_program(job.program);
                        last_program = job.program;
                    }
                    bind_job_resources(
                        self.backend.as_mut(),
                        &self.texture_generation,
                        &mut self.dirty_textures,
                        &mut self.dirty_buffers,
                        job,
                    );
                    flush_uniforms(
                        self.backend.as_mut(),
                        &self.uniform_map,
                        &self.uniform_arena,
                        job,
                    );
                    self.backend
                        .dispatch_compute(job.threads_x, job.threads_y, job.threads_z);
                }
                if debug_groups {
                    self.backend.pop_debug_group();
                }
            }

            // this can currently only happen on error
            if current.allocated == 0 {
                if debug_groups {
                    self.backend.pop_debug_group();
                }
                continue;
            }

            if current.reconfigure {
                self.backend
                    .bind_framebuffer(glow::FRAMEBUFFER, current.gl_fbos[0]);
                canvas::reconfigure(self.backend.as_mut(), &current);
                current.reconfigure = false;
            }

            // rendering into a cube face mip through the msaa fbo is not
            // expressible; layered targets bind the resolve fbo directly
            let bind_msaa = current.msaa && canvas_layer <= 0;
            self.backend.bind_framebuffer(
                glow::FRAMEBUFFER,
                if bind_msaa {
                    current.gl_fbos[1]
                } else {
                    current.gl_fbos[0]
                },
            );

            if canvas_layer >= 0
                && i32::from(current.current_mip) != canvas_layer
                && !current.cube
            {
                self.retarget_mip(&mut current, canvas_layer as u16);
            }

            if viewports.is_empty() {
                viewports.push(Rect::new(0, 0, current.current_width, current.current_height));
            }
            if self.backend.has_indexed_viewports() {
                for (i, vp) in viewports.iter().enumerate() {
                    self.backend.viewport_indexed(
                        i as u32,
                        f32::from(vp.x),
                        f32::from(vp.y),
                        f32::from(vp.w),
                        f32::from(vp.h),
                    );
                }
            } else {
                let vp = &viewports[0];
                self.backend.viewport(
                    i32::from(vp.x),
                    i32::from(vp.y),
                    i32::from(vp.w),
                    i32::from(vp.h),
                );
            }

            if canvas_layer < 0 {
                // layered rendering: attach whole textures, the shader picks
                // the layer
                debug_assert!(current.allocated <= 2);
                for i in 0..current.allocated as usize {
                    let attachment = current.attachments[i];
                    let attach = if attachment.is_depth {
                        glow::DEPTH_ATTACHMENT
                    } else {
                        glow::COLOR_ATTACHMENT0
                    };
                    self.backend
                        .framebuffer_texture(attach, attachment.gl_ids[0], 0);
                }
            } else if current.cube {
                debug_assert!(current.allocated <= 2);
                for i in 0..current.allocated as usize {
                    let attachment = current.attachments[i];
                    let attach = if attachment.is_depth {
                        glow::DEPTH_ATTACHMENT
                    } else {
                        glow::COLOR_ATTACHMENT0
                    };
                    self.backend.framebuffer_texture_2d(
                        attach,
                        glow::TEXTURE_CUBE_MAP_POSITIVE_X + canvas_layer as u32,
                        attachment.gl_ids[0],
                        0,
                    );
                }
            }

            // regenerate mip chains on the target we just left
            if canvas_changed && let Some((_, last)) = &last_canvas {
                let target = if last.cube {
                    glow::TEXTURE_CUBE_MAP
                } else if last.attachments[0].layers > 1 {
                    glow::TEXTURE_2D_ARRAY
                } else {
                    glow::TEXTURE_2D
                };
                for i in 0..last.allocated as usize {
                    let attachment = last.attachments[i];
                    if !attachment.flags.contains(TextureFlags::GEN_MIPS) {
                        continue;
                    }
                    self.backend.bind_texture(target, attachment.gl_id());
                    self.backend.generate_mipmap(target);
                }
            }

            if view_flags.contains(ViewState::SCISSOR) {
                let rect = view_scissor;
                self.backend.enable(glow::SCISSOR_TEST);
                self.backend.scissor(
                    i32::from(rect.x),
                    i32::from(current.height) - i32::from(rect.y) - i32::from(rect.h),
                    i32::from(rect.w),
                    i32::from(rect.h),
                );
            } else {
                self.backend.disable(glow::SCISSOR_TEST);
            }

            if view_flags.contains(ViewState::INVALIDATE) && self.backend.has_invalidate() {
                let mut attachments: SmallVec<[u32; 8]> = SmallVec::new();
                let mut offset = 0;
                for i in 0..current.allocated as usize {
                    if current.attachments[i].is_depth {
                        attachments.push(glow::DEPTH_ATTACHMENT);
                    } else {
                        attachments.push(glow::COLOR_ATTACHMENT0 + offset);
                        offset += 1;
                    }
                }
                self.backend.invalidate_framebuffer(&attachments);
            }

            let mut clear_mask = 0;
            if view_flags.contains(ViewState::CLEAR_COLOR) {
                clear_mask |= glow::COLOR_BUFFER_BIT;
                let color = self.views[id].clear_color;
                self.backend.clear_color(
                    ((color >> 24) & 0xff) as f32 / 255.0,
                    ((color >> 16) & 0xff) as f32 / 255.0,
                    ((color >> 8) & 0xff) as f32 / 255.0,
                    (color & 0xff) as f32 / 255.0,
                );
                self.backend.color_mask(true, true, true, true);
            }
            if view_flags.contains(ViewState::CLEAR_DEPTH) {
                clear_mask |= glow::DEPTH_BUFFER_BIT;
                let depth = self.views[id].clear_depth;
                self.backend.clear_depth(depth);
                self.backend.depth_mask(true);
            }
            if clear_mask != 0 {
                self.backend.clear(clear_mask);
            }

            if view_flags.intersects(ViewState::DEPTH_TEST_MASK) {
                self.backend.enable(glow::DEPTH_TEST);
                if view_flags.contains(ViewState::DEPTH_TEST_LT) {
                    self.backend.depth_func(glow::LEQUAL);
                } else if view_flags.contains(ViewState::DEPTH_TEST_GT) {
                    self.backend.depth_func(glow::GEQUAL);
                } else if view_flags.contains(ViewState::DEPTH_TEST_EQ) {
                    self.backend.depth_func(glow::EQUAL);
                }
            } else {
                self.backend.disable(glow::DEPTH_TEST);
            }

            // the draw queue, state-diffed against the previous draw; the
            // first draw of a pass diffs against everything
            let mut last_flags = DrawFlags::default();
            for (i, draw) in draws.iter().enumerate() {
                if draw.program != last_program {
                    self.backend.use_program(draw.program);
                    last_program = draw.program;
                }

                if i == 0 {
                    last_flags = DrawFlags::from_bits_retain(!draw.flags.bits());
                }

                // the flag diff cuts total native calls by about 20%
                let diff = draw.flags ^ last_flags;
                last_flags = draw.flags;

                if diff.contains(DrawFlags::DEPTH_WRITE) {
                    self.backend
                        .depth_mask(draw.flags.contains(DrawFlags::DEPTH_WRITE));
                }

                if diff.contains(DrawFlags::MSAA) && self.caps.multisample {
                    if draw.flags.contains(DrawFlags::MSAA) {
                        self.backend.enable(glow::MULTISAMPLE);
                    } else {
                        self.backend.disable(glow::MULTISAMPLE);
                    }
                }

                if diff.intersects(DrawFlags::CULL_MASK) {
                    if draw.flags.contains(DrawFlags::CULL_CW) {
                        self.backend.enable(glow::CULL_FACE);
                        self.backend.front_face(glow::CW);
                    } else if draw.flags.contains(DrawFlags::CULL_CCW) {
                        self.backend.enable(glow::CULL_FACE);
                        self.backend.front_face(glow::CCW);
                    } else {
                        self.backend.disable(glow::CULL_FACE);
                    }
                }

                if diff.intersects(DrawFlags::BLEND_MASK) {
                    if draw.flags.intersects(DrawFlags::BLEND_MASK) {
                        self.backend.enable(glow::BLEND);
                        if draw.flags.contains(DrawFlags::BLEND_ALPHA) {
                            self.backend
                                .blend_func(glow::ONE, glow::ONE_MINUS_SRC_ALPHA);
                        }
                    } else {
                        self.backend.disable(glow::BLEND);
                    }
                }

                if diff.intersects(DrawFlags::WRITE_MASK) {
                    let rgb = draw.flags.contains(DrawFlags::RGB_WRITE);
                    let alpha = draw.flags.contains(DrawFlags::ALPHA_WRITE);
                    self.backend.color_mask(rgb, rgb, rgb, alpha);
                }

                if view_flags.contains(ViewState::SCISSOR) || draw.scissor.is_some() {
                    self.backend.enable(glow::SCISSOR_TEST);
                    let rect = draw.scissor.unwrap_or(view_scissor);
                    self.backend.scissor(
                        i32::from(rect.x),
                        i32::from(current.height) - i32::from(rect.y) - i32::from(rect.h),
                        i32::from(rect.w),
                        i32::from(rect.h),
                    );
                } else {
                    self.backend.disable(glow::SCISSOR_TEST);
                }

                flush_uniforms(
                    self.backend.as_mut(),
                    &self.uniform_map,
                    &self.uniform_arena,
                    draw,
                );

                if let Some(callback) = &draw.callback {
                    callback(self.backend.as_mut());
                }

                if draw.is_empty() {
                    continue;
                }

                // unspecified = triangles
                let mode = if draw.flags.contains(DrawFlags::DRAW_POINTS) {
                    glow::POINTS
                } else if draw.flags.contains(DrawFlags::DRAW_LINES) {
                    glow::LINES
                } else if draw.flags.contains(DrawFlags::DRAW_LINE_STRIP) {
                    glow::LINE_STRIP
                } else if draw.flags.contains(DrawFlags::DRAW_LINE_LOOP) {
                    glow::LINE_LOOP
                } else if draw.flags.contains(DrawFlags::DRAW_TRI_STRIP) {
                    glow::TRIANGLE_STRIP
                } else if draw.flags.contains(DrawFlags::DRAW_TRI_FAN) {
                    glow::TRIANGLE_FAN
                } else {
                    glow::TRIANGLES
                };

                if let Some(vbo) = &draw.vbo {
                    debug_assert!(vbo.gl_id != 0);

                    if self.dirty_buffers.remove(&vbo.gl_id) {
                        self.backend
                            .memory_barrier(glow::VERTEX_ATTRIB_ARRAY_BARRIER_BIT);
                    }

                    let Some(format) = draw.tvb_format.as_ref().or(vbo.format.as_ref()) else {
                        debug_assert!(false, "vertex buffer without a format");
                        continue;
                    };
                    let va_offset = if draw.tvb_format.is_some() {
                        draw.offset
                    } else {
                        0
                    };
                    debug_assert!(format.stride > 0);

                    self.backend.bind_buffer(glow::ARRAY_BUFFER, vbo.gl_id);

                    let mut real: u32 = 0;
                    for slot in 0..format.count as usize {
                        if format.component_mask & (1 << slot) == 0 {
                            continue;
                        }
                        let component = format.components[slot];
                        let gl_type = match component.ty {
                            ComponentType::Skip => continue,
                            ComponentType::Ubyte => glow::UNSIGNED_BYTE,
                            ComponentType::Byte => glow::BYTE,
                            ComponentType::Ushort => glow::UNSIGNED_SHORT,
                            ComponentType::Short => glow::SHORT,
                            ComponentType::Float => glow::FLOAT,
                        };
                        if real >= last_attrib_count {
                            self.backend.enable_vertex_attrib_array(real);
                        }
                        self.backend.vertex_attrib_pointer(
                            real,
                            component.size as i32,
                            gl_type,
                            component.normalized,
                            format.stride as i32,
                            (component.offset + va_offset) as i32,
                        );
                        real += 1;
                    }
                    for slot in real..last_attrib_count {
                        self.backend.disable_vertex_attrib_array(slot);
                    }
                    last_attrib_count = real;
                } else if last_attrib_count > 0 {
                    for slot in 0..last_attrib_count {
                        self.backend.disable_vertex_attrib_array(slot);
                    }
                    last_attrib_count = 0;
                }

                for slot in 0..MAX_SLOTS {
                    if let Some(ssbo) = &draw.ssbos[slot] {
                        if self.dirty_buffers.remove(&ssbo.gl_id) {
                            self.backend
                                .memory_barrier(glow::SHADER_STORAGE_BARRIER_BIT);
                        }
                        if draw.ssbo_write[slot] {
                            self.dirty_buffers.insert(ssbo.gl_id);
                        }
                        self.backend.bind_buffer_base(
                            glow::SHADER_STORAGE_BUFFER,
                            slot as u32,
                            ssbo.gl_id,
                        );
                    }

                    if let Some(texture) = &draw.textures[slot] {
                        if self.dirty_textures.remove(&track_id(texture)) {
                            self.backend
                                .memory_barrier(glow::TEXTURE_FETCH_BARRIER_BIT);
                        }
                        let id = live_id(&self.texture_generation, texture);
                        self.backend.active_texture(slot as u32);
                        self.backend.bind_texture(texture.target(), id);
                    }
                }

                let mut instances = view_instance_mul;
                if instances == 0 {
                    instances = viewports.len() as u32;
                    // layered rendering multiplies instances to cover every
                    // face and layer in one pass
                    if canvas_layer < 0 {
                        if current.cube {
                            instances *= 6;
                        }
                        if current.attachments[0].layers > 1 {
                            instances *= u32::from(current.attachments[0].layers);
                        }
                    }
                }

                if let Some(ibo) = &draw.ibo {
                    if self.dirty_buffers.remove(&ibo.gl_id) {
                        self.backend.memory_barrier(glow::ELEMENT_ARRAY_BARRIER_BIT);
                    }
                    self.backend
                        .bind_buffer(glow::ELEMENT_ARRAY_BUFFER, ibo.gl_id);
                    let index_type = if ibo.flags.contains(crate::buffer::BufferFlags::INDEX_32) {
                        glow::UNSIGNED_INT
                    } else {
                        glow::UNSIGNED_SHORT
                    };
                    self.backend.draw_elements_instanced(
                        mode,
                        draw.indices as i32,
                        index_type,
                        draw.offset as i32,
                        instances as i32,
                    );
                } else {
                    self.backend.draw_arrays_instanced(
                        mode,
                        0,
                        draw.indices as i32,
                        instances as i32,
                    );
                }
            }

            if let Some((owner, last)) = last_canvas.take() {
                self.store_canvas(owner, last);
            }
            last_canvas = Some((id as u8, current));

            if debug_groups {
                self.backend.pop_debug_group();
            }
        }

        if let Some((owner, last)) = last_canvas.take() {
            self.store_canvas(owner, last);
        }

        // the closing timestamp resolves the final view's delta
        if self.use_timers {
            let q = self.timers[VIEW_MAX + self.timer_offset];
            self.backend.query_timestamp(q);

            if !stats.timings.is_empty() {
                let idx = VIEW_MAX + next_offset;
                if self.backend.query_result_available(self.timers[idx]) {
                    let result = self.backend.query_result(self.timers[idx]);
                    if let Some(last) = stats.timings.last_mut() {
                        *last = result.wrapping_sub(last_result);
                    }
                }
            }
            self.timer_offset = next_offset;
        }

        // reset all per-frame state
        self.tmp_draw = Draw::default();
        self.transient.offset = 0;
        self.pending_uniforms.clear();
        self.uniform_arena.clear();

        self.backend.disable(glow::SCISSOR_TEST);
        self.backend.color_mask(true, true, true, true);

        if vao != 0 {
            self.backend.bind_vertex_array(0);
            self.backend.delete_vertex_array(vao);
        }

        if self.flags.contains(ResetFlags::DEBUG_OVERLAY) {
            debug!("frame: {} draws, {} blits", stats.draws, stats.blits);
        }

        stats
    }

    fn release_compiler(&mut self) {
        if !self.shaderc_allocated {
            return;
        }
        if self.backend.shader_compiler_present() {
            self.backend.release_shader_compiler();
        }
        self.shaderc_allocated = false;
    }

    /// Phase 2: flush the transient arena, pending buffer updates, and
    /// pending texture uploads (rotating each texture's double buffer).
    fn upload_pending_resources(&mut self) {
        if self.transient.offset > 0 {
            self.backend
                .bind_buffer(glow::ARRAY_BUFFER, self.transient.gl_id);
            let used = self.transient.offset as usize;
            // split borrow: the arena bytes and the backend are distinct fields
            let data = std::mem::take(&mut self.transient.data);
            self.backend.buffer_update(glow::ARRAY_BUFFER, 0, &data[..used]);
            self.transient.data = data;
        }

        for i in 0..self.buffers.len() {
            let Some(update) = self.buffers[i].pending.take() else {
                continue;
            };
            let gl_id = self.buffers[i].buffer.gl_id;
            self.backend.bind_buffer(glow::ARRAY_BUFFER, gl_id);
            self.backend
                .buffer_update(glow::ARRAY_BUFFER, update.offset, &update.data);
        }

        for i in 0..self.textures.len() {
            let Some(data) = self.textures[i].pending.take() else {
                continue;
            };
            let texture = self.textures[i].texture;
            if !texture.flags.contains(TextureFlags::CPU_WRITABLE) {
                continue;
            }
            debug_assert!(!texture.is_cube());
            // spin the generation before updating, so the upload never
            // touches the id in flight
            let generation = self
                .texture_generation
                .entry(track_id(&texture))
                .or_insert(0);
            *generation = (*generation + 1) % texture.gl_count;
            let id = texture.gl_ids[*generation as usize];
            self.textures[i].texture.gl_idx = *generation;
            self.backend.bind_texture(glow::TEXTURE_2D, id);
            self.backend.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                i32::from(texture.width),
                i32::from(texture.height),
                texture.format,
                &data,
            );
        }
    }

    fn run_blits(&mut self, blits: &[crate::draw::BlitOp], canvas: &Canvas) {
        for blit in blits {
            let src = &blit.source;
            if self.backend.has_image_copy() {
                // when reading into a depth-first canvas the matching source
                // attachment sits behind the color one
                let src_index = usize::from(canvas.attachments[0].is_depth);
                self.backend.copy_image(
                    src.attachments[src_index.min(src.allocated as usize - 1)].gl_ids[0],
                    i32::from(blit.source_mip),
                    canvas.attachments[0].gl_ids[0],
                    i32::from(canvas.current_mip),
                    i32::from(blit.rect.x),
                    i32::from(blit.rect.y),
                    i32::from(blit.rect.w),
                    i32::from(blit.rect.h),
                );
            } else {
                self.backend.bind_framebuffer(
                    glow::DRAW_FRAMEBUFFER,
                    if canvas.msaa {
                        canvas.gl_fbos[1]
                    } else {
                        canvas.gl_fbos[0]
                    },
                );
                self.backend.bind_framebuffer(
                    glow::READ_FRAMEBUFFER,
                    if src.msaa { src.gl_fbos[1] } else { src.gl_fbos[0] },
                );
                debug_assert!(
                    blit.source_mip == src.current_mip,
                    "blitting a non-current mip needs the image-copy path"
                );
                let rect = Rect2::new(
                    i32::from(blit.rect.x),
                    i32::from(blit.rect.y),
                    i32::from(blit.rect.w),
                    i32::from(blit.rect.h),
                );
                self.backend
                    .blit_framebuffer(rect, rect, blit.mask, glow::NEAREST);
            }
        }
    }

    /// Bind `mip` as the render target on every attachment, clamping
    /// sampling to the level below so feedback loops cannot form.
    fn retarget_mip(&mut self, canvas: &mut Canvas, mip: u16) {
        canvas.current_width = canvas.width;
        canvas.current_height = canvas.height;
        canvas.current_mip = mip;
        for _ in 0..mip {
            canvas.current_width = (canvas.current_width / 2).max(1);
            canvas.current_height = (canvas.current_height / 2).max(1);
        }

        let mut offset = 0;
        for i in 0..canvas.allocated as usize {
            let attachment = canvas.attachments[i];
            let attach = if attachment.is_depth {
                glow::DEPTH_ATTACHMENT
            } else {
                let a = glow::COLOR_ATTACHMENT0 + offset;
                offset += 1;
                a
            };

            self.backend.framebuffer_texture_2d(
                attach,
                glow::TEXTURE_2D,
                attachment.gl_ids[0],
                i32::from(mip),
            );

            // restrict fetches to the level below the one being rendered
            self.backend
                .bind_texture(glow::TEXTURE_2D, attachment.gl_ids[0]);
            if mip > 0 {
                self.backend.tex_parameter_i32(
                    glow::TEXTURE_2D,
                    glow::TEXTURE_BASE_LEVEL,
                    i32::from(mip) - 1,
                );
                self.backend.tex_parameter_i32(
                    glow::TEXTURE_2D,
                    glow::TEXTURE_MAX_LEVEL,
                    i32::from(mip) - 1,
                );
            } else {
                self.backend
                    .tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_BASE_LEVEL, 0);
                self.backend.tex_parameter_i32(
                    glow::TEXTURE_2D,
                    glow::TEXTURE_MAX_LEVEL,
                    i32::from(attachment.mip_count.max(1)) - 1,
                );
            }
        }
    }

    /// Write a mutated canvas copy back to the view that owns it (or the
    /// backbuffer).
    fn store_canvas(&mut self, owner: u8, canvas: Canvas) {
        match &mut self.views[owner as usize].canvas {
            Some(stored) => *stored = canvas,
            None => self.backbuffer = canvas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::recording::{Call, CallLog, RecordingBackend};
    use crate::buffer::{Buffer, BufferFlags};
    use crate::format::{TextureFormat, VertexFormat};
    use crate::program::Program;
    use crate::state::DepthTest;
    use crate::uniform::Uniform;

    fn test_context() -> (Context, CallLog) {
        let _ = env_logger::builder().is_test(true).try_init();
        let (backend, log) = RecordingBackend::with_log();
        let mut ctx = Context::new(backend);
        ctx.reset(640, 480, crate::state::ResetFlags::empty());
        log.clear();
        (ctx, log)
    }

    fn position_color_format() -> VertexFormat {
        let mut fmt = VertexFormat::start();
        fmt.add(0, 3, false, ComponentType::Float);
        fmt.add(1, 4, true, ComponentType::Float);
        fmt.end();
        fmt
    }

    fn triangle_buffer(ctx: &mut Context) -> Buffer {
        let fmt = position_color_format();
        let verts = [0u8; 3 * 28];
        ctx.buffer_new(Some(&verts), 0, Some(&fmt), BufferFlags::empty())
    }

    fn forward_program(ctx: &mut Context) -> Program {
        ctx.program_new(
            "in vec3 a_position;\nin vec4 a_color;\nvoid main() {}",
            "void main() {}",
            &["a_position", "a_color"],
        )
        .unwrap()
    }

    fn draw_calls(log: &CallLog) -> usize {
        log.count(|c| {
            matches!(
                c,
                Call::DrawArraysInstanced { .. } | Call::DrawElementsInstanced { .. }
            )
        })
    }

    #[test]
    fn untouched_views_issue_no_clears() {
        let (mut ctx, log) = test_context();
        // configured but never submitted to: must stay silent
        ctx.view_set_clear_color(5, 0xff00ffff);
        ctx.view_set_clear_depth(5, 1.0);

        let stats = ctx.frame();
        assert_eq!(stats.draws, 0);
        assert_eq!(log.count(|c| matches!(c, Call::Clear { .. })), 0);
        assert_eq!(log.count(|c| matches!(c, Call::ClearColor { .. })), 0);
        assert_eq!(draw_calls(&log), 0);
    }

    #[test]
    fn touch_forces_clear_without_rendering() {
        let (mut ctx, log) = test_context();
        ctx.view_set_clear_color(2, 0x555555ff);
        ctx.touch(2);

        let stats = ctx.frame();
        assert_eq!(stats.draws, 1);
        assert_eq!(log.count(|c| matches!(c, Call::Clear { .. })), 1);
        assert_eq!(draw_calls(&log), 0);
    }

    #[test]
    fn forward_pass_end_to_end() {
        let (mut ctx, log) = test_context();
        ctx.view_set_clear_color(1, 0x555555ff);
        ctx.view_set_clear_depth(1, 1.0);
        ctx.view_set_depth_test(1, DepthTest::Less);

        let vbo = triangle_buffer(&mut ctx);
        let program = forward_program(&mut ctx);
        log.clear();

        ctx.set_vertices(&vbo, 3);
        ctx.set_state(DrawFlags::RGB_WRITE | DrawFlags::ALPHA_WRITE);
        ctx.submit(1, program, false);
        let stats = ctx.frame();

        assert_eq!(stats.draws, 1);
        assert_eq!(stats.blits, 0);

        // clear color unpacked from 0x555555ff
        let grey = 85.0 / 255.0;
        assert_eq!(
            log.count(|c| match c {
                Call::ClearColor { r, g, b, a } =>
                    (r - grey).abs() < 1e-6
                        && (g - grey).abs() < 1e-6
                        && (b - grey).abs() < 1e-6
                        && (a - 1.0).abs() < 1e-6,
                _ => false,
            }),
            1
        );
        assert_eq!(
            log.count(|c| matches!(
                c,
                Call::Clear { mask } if *mask == (glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT)
            )),
            1
        );

        // depth test LESS maps to LEQUAL
        assert_eq!(
            log.count(|c| matches!(c, Call::DepthFunc { func } if *func == glow::LEQUAL)),
            1
        );

        // exactly one non-indexed triangle draw with 3 vertices
        assert_eq!(
            log.count(|c| matches!(
                c,
                Call::DrawArraysInstanced { mode, first: 0, count: 3, instances: 1 }
                    if *mode == glow::TRIANGLES
            )),
            1
        );
        assert_eq!(
            log.count(|c| matches!(c, Call::DrawElementsInstanced { .. })),
            0
        );

        // default full-target viewport was derived
        assert_eq!(
            log.count(|c| matches!(c, Call::ViewportIndexed { index: 0, w, h, .. }
                if *w == 640.0 && *h == 480.0)),
            1
        );
    }

    #[test]
    fn uniform_last_write_wins_at_submission() {
        let (mut ctx, log) = test_context();
        let color = Uniform::new("u_color", UniformType::Vec4, 1);
        let scale = Uniform::new("u_scale", UniformType::Float, 1);
        let vbo = triangle_buffer(&mut ctx);
        let program = forward_program(&mut ctx);

        ctx.set_uniform(&color, &[1.0, 0.0, 0.0, 1.0], None);
        ctx.set_uniform(&scale, &[2.0], None);
        ctx.set_uniform(&color, &[0.0, 1.0, 0.0, 1.0], None);

        ctx.set_vertices(&vbo, 3);
        ctx.submit(1, program, false);
        log.clear();
        ctx.frame();

        // one upload per name, carrying the newest value
        assert_eq!(
            log.count(|c| matches!(c, Call::UniformVec4 { .. })),
            1
        );
        assert_eq!(
            log.count(|c| matches!(c, Call::UniformVec4 { values, .. }
                if values == &[0.0, 1.0, 0.0, 1.0])),
            1
        );
        assert_eq!(log.count(|c| matches!(c, Call::UniformF32 { .. })), 1);
    }

    #[test]
    fn state_diff_skips_redundant_calls_between_draws() {
        let (mut ctx, log) = test_context();
        let vbo = triangle_buffer(&mut ctx);
        let program = forward_program(&mut ctx);
        log.clear();

        for _ in 0..3 {
            ctx.set_vertices(&vbo, 3);
            ctx.set_state(DrawFlags::RGB_WRITE | DrawFlags::ALPHA_WRITE | DrawFlags::DEPTH_WRITE);
            ctx.submit(1, program, false);
        }
        ctx.frame();

        // first draw sets the mask, frame end restores it; the two repeat
        // draws add nothing
        assert_eq!(log.count(|c| matches!(c, Call::ColorMask { .. })), 2);
        // depth write toggles once for the pass
        assert_eq!(log.count(|c| matches!(c, Call::DepthMask { .. })), 1);
        assert_eq!(draw_calls(&log), 3);
        // one program bind serves all three draws
        assert_eq!(log.count(|c| matches!(c, Call::UseProgram { .. })), 1);
    }

    #[test]
    fn cross_view_order_is_view_id_not_submission_order() {
        let (mut ctx, log) = test_context();
        let vbo = triangle_buffer(&mut ctx);
        let program = forward_program(&mut ctx);
        ctx.view_set_clear_color(3, 0x000000ff);
        ctx.view_set_clear_color(9, 0xffffffff);
        log.clear();

        // submitted high view first; replay must clear 3 before 9
        ctx.set_vertices(&vbo, 3);
        ctx.submit(9, program, false);
        ctx.set_vertices(&vbo, 3);
        ctx.submit(3, program, false);
        ctx.frame();

        let colors: Vec<f32> = log
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::ClearColor { r, .. } => Some(*r),
                _ => None,
            })
            .collect();
        assert_eq!(colors.len(), 2);
        assert!(colors[0] < 0.5 && colors[1] > 0.5);
    }

    #[test]
    fn compute_write_then_draw_read_inserts_one_barrier() {
        let (mut ctx, log) = test_context();
        let ssbo = ctx.buffer_new(None, 1024, None, BufferFlags::empty());
        let vbo = triangle_buffer(&mut ctx);
        let compute = ctx.program_cs_new("void main() {}").unwrap();
        let program = forward_program(&mut ctx);
        log.clear();

        ctx.set_buffer(&ssbo, 0, true);
        ctx.dispatch(0, compute, 8, 8, 1);
        ctx.frame();
        assert_eq!(
            log.count(|c| matches!(c, Call::MemoryBarrier { mask }
                if *mask == glow::SHADER_STORAGE_BARRIER_BIT)),
            0
        );
        assert_eq!(log.count(|c| matches!(c, Call::DispatchCompute { x: 8, y: 8, z: 1 })), 1);
        log.clear();

        // next frame reads the same buffer from a draw
        ctx.set_vertices(&vbo, 3);
        ctx.set_buffer(&ssbo, 0, false);
        ctx.submit(1, program, false);
        ctx.frame();
        assert_eq!(
            log.count(|c| matches!(c, Call::MemoryBarrier { mask }
                if *mask == glow::SHADER_STORAGE_BARRIER_BIT)),
            1
        );

        // a second read frame needs no further barrier
        log.clear();
        ctx.set_vertices(&vbo, 3);
        ctx.set_buffer(&ssbo, 0, false);
        ctx.submit(1, program, false);
        ctx.frame();
        assert_eq!(log.count(|c| matches!(c, Call::MemoryBarrier { .. })), 0);
    }

    #[test]
    fn blits_run_before_draws_and_count_in_stats() {
        let (mut ctx, log) = test_context();
        let src_canvas = ctx
            .canvas_new(64, 64, TextureFormat::Rgba8, TextureFlags::empty())
            .unwrap();
        let vbo = triangle_buffer(&mut ctx);
        let program = forward_program(&mut ctx);
        ctx.view_set_canvas(0, &src_canvas, 0);
        log.clear();

        ctx.blit(1, 0, 0, 0, 64, 64, 0);
        ctx.set_vertices(&vbo, 3);
        ctx.submit(1, program, false);
        let stats = ctx.frame();

        assert_eq!(stats.blits, 1);
        assert_eq!(log.count(|c| matches!(c, Call::CopyImage { .. })), 1);

        let calls = log.calls();
        let copy_at = calls
            .iter()
            .position(|c| matches!(c, Call::CopyImage { .. }))
            .unwrap();
        let draw_at = calls
            .iter()
            .position(|c| matches!(c, Call::DrawArraysInstanced { .. }))
            .unwrap();
        assert!(copy_at < draw_at);
    }

    #[test]
    fn instance_count_follows_viewports() {
        let (mut ctx, log) = test_context();
        let vbo = triangle_buffer(&mut ctx);
        let program = forward_program(&mut ctx);
        ctx.view_set_viewports(
            1,
            &[Rect::new(0, 0, 320, 480), Rect::new(320, 0, 320, 480)],
        );
        log.clear();

        ctx.set_vertices(&vbo, 3);
        ctx.submit(1, program, false);
        ctx.frame();

        assert_eq!(
            log.count(|c| matches!(c, Call::DrawArraysInstanced { instances: 2, .. })),
            1
        );
        assert_eq!(
            log.count(|c| matches!(c, Call::ViewportIndexed { .. })),
            2
        );
    }

    #[test]
    fn layered_cube_target_multiplies_instances_by_six() {
        let (mut ctx, log) = test_context();
        let face = ctx.texture_new(64, 64, 1, None, TextureFormat::Rgba8, TextureFlags::CUBE);
        let canvas = ctx.canvas_attachments_new(true, &[face]).unwrap();
        let vbo = triangle_buffer(&mut ctx);
        let program = forward_program(&mut ctx);
        ctx.view_set_canvas(1, &canvas, -1);
        log.clear();

        ctx.set_vertices(&vbo, 3);
        ctx.submit(1, program, false);
        ctx.frame();

        assert_eq!(
            log.count(|c| matches!(c, Call::DrawArraysInstanced { instances: 6, .. })),
            1
        );
    }

    #[test]
    fn pending_buffer_update_uploads_exactly_once() {
        let (mut ctx, log) = test_context();
        let buf = ctx.buffer_new(None, 64, None, BufferFlags::MUTABLE);
        log.clear();

        ctx.buffer_update(&buf, vec![7u8; 16], 4);
        ctx.frame();
        assert_eq!(
            log.count(|c| matches!(c, Call::BufferUpdate { offset: 4, data, .. }
                if data.len() == 16 && data[0] == 7)),
            1
        );

        log.clear();
        ctx.frame();
        assert_eq!(log.count(|c| matches!(c, Call::BufferUpdate { .. })), 0);
    }

    #[test]
    fn texture_update_rotates_the_double_buffer() {
        let (mut ctx, log) = test_context();
        let tex = ctx.texture_new(
            8,
            8,
            1,
            None,
            TextureFormat::Rgba8,
            TextureFlags::CPU_WRITABLE,
        );
        log.clear();

        ctx.texture_update(&tex, vec![0u8; 8 * 8 * 4]);
        ctx.frame();
        assert_eq!(
            log.count(|c| matches!(c, Call::TexSubImage2d { w: 8, h: 8, .. })),
            1
        );
        assert_eq!(ctx.texture_generation.get(&tex.gl_ids[0]), Some(&1));

        ctx.texture_update(&tex, vec![0u8; 8 * 8 * 4]);
        ctx.frame();
        assert_eq!(ctx.texture_generation.get(&tex.gl_ids[0]), Some(&0));
    }

    #[test]
    fn transient_geometry_uploads_and_draws_from_its_offset() {
        let (mut ctx, log) = test_context();
        let fmt = position_color_format();
        let program = forward_program(&mut ctx);

        // burn some arena space so the draw's reservation has an offset
        let _pad = ctx.transient_buffer(Some(&fmt), 2);
        let tb = ctx.transient_buffer(Some(&fmt), 3);
        ctx.transient_data(&tb).fill(0xab);
        let tvb_offset = tb.offset as usize;
        log.clear();

        ctx.set_transient_buffer(tb);
        ctx.submit(1, program, false);
        ctx.frame();

        // the whole arena uploads once, from offset zero
        assert_eq!(
            log.count(|c| matches!(c, Call::BufferUpdate { offset: 0, .. })),
            1
        );
        // attribute pointers are rebased onto the reservation
        assert_eq!(
            log.count(|c| matches!(c, Call::VertexAttribPointer { index: 0, offset, .. }
                if *offset == tvb_offset as i32)),
            1
        );
        assert_eq!(
            log.count(|c| matches!(c, Call::DrawArraysInstanced { count: 3, .. })),
            1
        );
    }

    #[test]
    fn attribute_arrays_track_format_width() {
        let (mut ctx, log) = test_context();
        let program = forward_program(&mut ctx);
        let two_attr = triangle_buffer(&mut ctx);
        let mut narrow = VertexFormat::start();
        narrow.add(0, 3, false, ComponentType::Float);
        narrow.end();
        let one_attr = ctx.buffer_new(Some(&[0u8; 36]), 0, Some(&narrow), BufferFlags::empty());
        log.clear();

        ctx.set_vertices(&two_attr, 3);
        ctx.submit(1, program, false);
        ctx.set_vertices(&one_attr, 3);
        ctx.submit(1, program, false);
        ctx.frame();

        // two enables for the wide format, then one disable shrinking to it
        assert_eq!(
            log.count(|c| matches!(c, Call::EnableVertexAttribArray { .. })),
            2
        );
        assert_eq!(
            log.count(|c| matches!(c, Call::DisableVertexAttribArray { index: 1 })),
            1
        );
    }

    #[test]
    fn gpu_timings_report_per_active_view() {
        let (backend, log) = RecordingBackend::with_log();
        let mut ctx = Context::new(backend);
        ctx.reset(640, 480, crate::state::ResetFlags::REPORT_GPU_TIMINGS);
        let vbo = triangle_buffer(&mut ctx);
        let program = forward_program(&mut ctx);
        log.clear();

        ctx.set_vertices(&vbo, 3);
        ctx.submit(0, program, false);
        ctx.set_vertices(&vbo, 3);
        ctx.submit(4, program, false);
        let stats = ctx.frame();

        // two active views, each opening a timestamp, plus the closing one
        assert_eq!(stats.timings.len(), 2);
        assert_eq!(log.count(|c| matches!(c, Call::QueryTimestamp { .. })), 3);
        // recorded results are monotonic, so every delta lands non-zero
        assert!(stats.timings.iter().all(|&t| t > 0));
    }

    #[test]
    fn frame_restores_global_state_and_resets_recorders() {
        let (mut ctx, log) = test_context();
        let vbo = triangle_buffer(&mut ctx);
        let program = forward_program(&mut ctx);

        ctx.set_vertices(&vbo, 3);
        ctx.set_scissor(0, 0, 8, 8);
        ctx.submit(1, program, false);
        ctx.frame();

        assert!(ctx.tmp_draw.vbo.is_none());
        assert!(ctx.pending_uniforms.is_empty());
        assert_eq!(ctx.uniform_arena.len(), 0);
        assert_eq!(ctx.transient.offset, 0);

        let calls = log.calls();
        let last_scissor_toggle = calls
            .iter()
            .rev()
            .find(|c| matches!(c, Call::Enable { cap } | Call::Disable { cap } if *cap == glow::SCISSOR_TEST));
        assert!(matches!(last_scissor_toggle, Some(Call::Disable { .. })));
        assert!(matches!(
            calls.iter().rev().find(|c| matches!(c, Call::ColorMask { .. })),
            Some(Call::ColorMask { r: true, g: true, b: true, a: true })
        ));
    }

    #[test]
    fn consecutive_views_on_one_canvas_stay_on_the_same_target() {
        let (mut ctx, log) = test_context();
        let canvas = ctx
            .canvas_new(128, 128, TextureFormat::Rgba8D16, TextureFlags::empty())
            .unwrap();
        let vbo = triangle_buffer(&mut ctx);
        let program = forward_program(&mut ctx);
        ctx.view_set_canvas(1, &canvas, 0);
        ctx.view_set_canvas(2, &canvas, 0);
        log.clear();

        ctx.set_vertices(&vbo, 3);
        ctx.submit(1, program, false);
        ctx.set_vertices(&vbo, 3);
        ctx.submit(2, program, false);
        ctx.frame();

        // one FRAMEBUFFER bind per view, same fbo, no churn in between
        let binds: Vec<u32> = log
            .calls()
            .iter()
            .filter_map(|c| match c {
                Call::BindFramebuffer { target, framebuffer }
                    if *target == glow::FRAMEBUFFER =>
                {
                    Some(*framebuffer)
                }
                _ => None,
            })
            .collect();
        assert_eq!(binds.len(), 2);
        assert_eq!(binds[0], binds[1]);
    }
}
