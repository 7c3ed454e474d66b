//! Off-screen render targets: a framebuffer plus its attachments.

use crate::backend::GlBackend;
use crate::texture::Texture;

pub(crate) const MAX_ATTACHMENTS: usize = 8;

/// A render target: up to 8 attachments (color plus at most one depth) and
/// one or two framebuffers (the second only when multisampled). A plain
/// value; views hold copies, and
/// [`Context::canvas_free`](crate::Context::canvas_free) releases the GPU
/// objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct Canvas {
    pub(crate) gl_fbos: [u32; 2],
    pub(crate) attachments: [Texture; MAX_ATTACHMENTS],
    pub(crate) allocated: u8,
    pub width: u16,
    pub height: u16,
    /// Dimensions and mip of the level currently bound for rendering; differ
    /// from `width`/`height` while a view targets a smaller mip.
    pub(crate) current_width: u16,
    pub(crate) current_height: u16,
    pub(crate) current_mip: u16,
    pub(crate) cube: bool,
    pub(crate) msaa: bool,
    /// Freeing the canvas also frees the attachment textures.
    pub(crate) own_attachments: bool,
    /// Attachment set changed; rebuild bindings at next use.
    pub(crate) reconfigure: bool,
}

impl Canvas {
    pub fn is_valid(&self) -> bool {
        self.allocated > 0
    }

    pub(crate) fn attachments(&self) -> &[Texture] {
        &self.attachments[..self.allocated as usize]
    }

    /// Same framebuffer object (the backbuffer counts as one, id 0).
    pub(crate) fn same_target(&self, other: &Canvas) -> bool {
        self.gl_fbos[0] == other.gl_fbos[0]
    }

    /// The native clear mask covering every attachment present.
    pub(crate) fn clear_mask(&self) -> u32 {
        let mut mask = 0;
        for attachment in self.attachments() {
            if attachment.is_depth {
                mask |= glow::DEPTH_BUFFER_BIT;
            } else {
                mask |= glow::COLOR_BUFFER_BIT;
            }
        }
        mask
    }
}

/// (Re)attach every texture to the currently bound framebuffer and wire the
/// draw/read buffer lists. Returns false on an incomplete framebuffer.
pub(crate) fn reconfigure(backend: &mut dyn GlBackend, canvas: &Canvas) -> bool {
    let mut found_color = false;
    let mut found_depth = false;

    let mut offset = 0;
    for attachment in canvas.attachments() {
        let attach = if attachment.is_depth {
            debug_assert!(!found_depth, "only one depth attachment per canvas");
            found_depth = true;
            glow::DEPTH_ATTACHMENT
        } else {
            found_color = true;
            let a = glow::COLOR_ATTACHMENT0 + offset;
            offset += 1;
            a
        };

        if canvas.cube || attachment.layers > 1 {
            backend.framebuffer_texture(attach, attachment.gl_ids[0], 0);
            continue;
        }
        backend.framebuffer_texture_2d(attach, glow::TEXTURE_2D, attachment.gl_ids[0], 0);
    }

    if found_depth && !found_color {
        backend.draw_buffers(&[glow::NONE]);
        backend.read_buffer(glow::NONE);
    }

    if found_color {
        let buffers: Vec<u32> = (0..offset).map(|i| glow::COLOR_ATTACHMENT0 + i).collect();
        backend.draw_buffers(&buffers);
        backend.read_buffer(glow::COLOR_ATTACHMENT0);
    }

    backend.check_framebuffer_complete()
}
