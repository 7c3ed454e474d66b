//! GPU buffers and per-frame transient geometry.

use crate::format::VertexFormat;
use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BufferFlags: u32 {
        /// Contents may be replaced after creation via
        /// [`Context::buffer_update`](crate::Context::buffer_update).
        const MUTABLE = 1 << 0;
        /// Treat as 32-bit indices when bound as an index buffer.
        const INDEX_32 = 1 << 1;
    }
}

/// A vertex, index or shader-storage buffer. A plain value: copy it freely,
/// the registry owns the GPU object until
/// [`Context::buffer_free`](crate::Context::buffer_free).
#[derive(Debug, Clone, Copy, Default)]
pub struct Buffer {
    pub(crate) gl_id: u32,
    pub(crate) format: Option<VertexFormat>,
    pub(crate) flags: BufferFlags,
}

impl Buffer {
    /// False for the sentinel returned when allocation failed.
    pub fn is_valid(&self) -> bool {
        self.gl_id != 0
    }
}

/// A slice of the shared per-frame arena for geometry that lives one frame.
/// Not individually freeable; the whole arena resets at `frame()`.
#[derive(Debug, Clone, Copy)]
pub struct TransientBuffer {
    pub(crate) offset: u32,
    pub(crate) num: u16,
    pub(crate) format: Option<VertexFormat>,
}

impl TransientBuffer {
    pub fn count(&self) -> u16 {
        self.num
    }
}

/// Deferred upload attached to a mutable buffer, consumed at the start of
/// the next `frame()`.
#[derive(Debug)]
pub(crate) struct BufferUpdate {
    pub offset: usize,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct BufferEntry {
    pub buffer: Buffer,
    pub pending: Option<BufferUpdate>,
}
