//! The queued draw/dispatch record and its blit counterpart.

use crate::backend::GlBackend;
use crate::buffer::Buffer;
use crate::canvas::Canvas;
use crate::format::VertexFormat;
use crate::state::{DrawFlags, Rect};
use crate::texture::Texture;
use crate::uniform::PendingUniform;
use std::rc::Rc;

pub(crate) const MAX_SLOTS: usize = 8;

/// Invoked mid-replay, after the draw's state and uniforms are applied and
/// before its draw call is issued.
pub type DrawCallback = Rc<dyn Fn(&mut dyn GlBackend)>;

/// One recorded draw or compute job: everything the replay engine needs,
/// snapshotted at submission so later recorder calls cannot disturb it.
#[derive(Clone, Default)]
pub(crate) struct Draw {
    pub callback: Option<DrawCallback>,
    pub flags: DrawFlags,

    pub program: u32,
    /// Last-write-wins uniform snapshot taken at submission.
    pub uniforms: Vec<PendingUniform>,

    pub textures: [Option<Texture>; MAX_SLOTS],
    pub textures_mip: [u8; MAX_SLOTS],
    pub textures_write: [bool; MAX_SLOTS],
    pub ssbos: [Option<Buffer>; MAX_SLOTS],
    pub ssbo_write: [bool; MAX_SLOTS],

    pub vbo: Option<Buffer>,
    pub ibo: Option<Buffer>,

    /// Set when the vertex source is the transient arena; carries the format
    /// since the arena's shared native buffer has none of its own.
    pub tvb_format: Option<VertexFormat>,

    pub scissor: Option<Rect>,

    /// Byte offset into the index buffer, or into the transient arena.
    pub offset: usize,
    /// Vertex count, or index count when an index buffer is set.
    pub indices: u32,

    // compute dispatch dimensions
    pub threads_x: u32,
    pub threads_y: u32,
    pub threads_z: u32,
}

impl Draw {
    /// True when nothing was recorded into this draw — the shape `touch`
    /// queues to force a view's clear without rendering.
    pub fn is_empty(&self) -> bool {
        self.vbo.is_none() && self.tvb_format.is_none() && self.ibo.is_none()
    }
}

/// A queued canvas-to-canvas copy, executed before the view's draws.
#[derive(Clone)]
pub(crate) struct BlitOp {
    pub source: Canvas,
    pub source_mip: u16,
    pub rect: Rect,
    pub mask: u32,
}
