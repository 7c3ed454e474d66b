//! Texture descriptors.

use crate::format::TextureFormat;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TextureFlags: u16 {
        /// Updatable from the CPU each frame. Allocates two native textures
        /// and ping-pongs between them so an upload never stalls on a
        /// texture the GPU is still reading.
        const CPU_WRITABLE = 1 << 0;
        const MSAA_X2 = 1 << 1;
        const MSAA_X4 = 1 << 2;
        /// Generate a full mip chain from level 0 at creation and after
        /// rendering into the texture.
        const GEN_MIPS = 1 << 3;
        /// Allocate a full mip chain but leave the levels for the caller to
        /// render into (hi-z style).
        const RESERVE_MIPS = 1 << 4;
        const CUBE = 1 << 5;
        const FILTER_POINT = 1 << 6;
    }
}

/// A texture (2D, 2D array, or cube). A plain value; the registry owns the
/// GPU objects until [`Context::texture_free`](crate::Context::texture_free).
#[derive(Debug, Clone, Copy, Default)]
pub struct Texture {
    pub(crate) gl_ids: [u32; 2],
    pub(crate) gl_count: u8,
    /// Which of `gl_ids` is current; rotated by CPU uploads.
    pub(crate) gl_idx: u8,
    pub(crate) gl_msaa_id: u32,
    pub width: u16,
    pub height: u16,
    /// Layer count; > 1 makes this a 2D array.
    pub layers: u16,
    pub(crate) format: TextureFormat,
    pub(crate) flags: TextureFlags,
    pub(crate) mip_count: u16,
    pub(crate) is_depth: bool,
}

impl Texture {
    pub fn is_valid(&self) -> bool {
        self.gl_ids[0] != 0
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn flags(&self) -> TextureFlags {
        self.flags
    }

    /// The native id currently safe to sample.
    pub(crate) fn gl_id(&self) -> u32 {
        self.gl_ids[self.gl_idx as usize]
    }

    pub(crate) fn is_cube(&self) -> bool {
        self.flags.contains(TextureFlags::CUBE)
    }

    /// Native binding target for this texture's shape.
    pub(crate) fn target(&self) -> u32 {
        if self.layers > 1 {
            debug_assert!(!self.is_cube(), "cube arrays are not supported");
            glow::TEXTURE_2D_ARRAY
        } else if self.is_cube() {
            glow::TEXTURE_CUBE_MAP
        } else {
            glow::TEXTURE_2D
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct TextureEntry {
    pub texture: Texture,
    /// Deferred full-surface upload, consumed at the next `frame()`.
    pub pending: Option<Vec<u8>>,
}
