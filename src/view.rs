//! The view table entry: one addressable render pass.

use crate::canvas::Canvas;
use crate::draw::{BlitOp, Draw};
use crate::state::{Rect, ViewState};
use smallvec::SmallVec;

pub(crate) const VIEW_MAX: usize = 256;
pub(crate) const MAX_VIEWPORTS: usize = 16;

/// Fixed per-pass configuration plus the three queues a frame fills.
/// Configuration persists across frames; queues drain at `frame()`.
#[derive(Default)]
pub(crate) struct View {
    pub flags: ViewState,
    pub name: Option<String>,

    /// Render target; `None` means the backbuffer.
    pub canvas: Option<Canvas>,
    /// Mip level (non-cube), cube face, or -1 for layered rendering into
    /// every layer at once.
    pub canvas_layer: i32,

    pub draws: Vec<Draw>,
    pub jobs: Vec<Draw>,
    pub blits: Vec<BlitOp>,

    pub clear_color: u32,
    pub clear_depth: f32,

    pub scissor: Rect,
    pub viewports: SmallVec<[Rect; 4]>,

    /// 0 = derive from viewport count and target layers.
    pub instance_mul: u32,
}

impl View {
    /// A view with nothing queued is skipped entirely by replay.
    pub fn is_idle(&self) -> bool {
        self.draws.is_empty() && self.jobs.is_empty()
    }
}
