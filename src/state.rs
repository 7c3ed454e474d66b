//! Draw-state flags and the small value types shared across the crate.

use bitflags::bitflags;

bitflags! {
    /// Per-draw render state, combined with `|` and stamped into the scratch
    /// draw by [`Context::set_state`](crate::Context::set_state).
    ///
    /// The replay engine diffs consecutive draws' bits and only emits native
    /// calls for the bits that changed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DrawFlags: u64 {
        // cull modes
        const CULL_CW  = 1 << 0;
        const CULL_CCW = 1 << 1;

        const DEPTH_WRITE = 1 << 2;
        const RGB_WRITE   = 1 << 3;
        const ALPHA_WRITE = 1 << 4;

        // blending
        const BLEND_ALPHA = 1 << 5;

        const MSAA = 1 << 6;

        // primitive modes; unset = triangles
        const DRAW_POINTS     = 1 << 7;
        const DRAW_LINES      = 1 << 8;
        const DRAW_LINE_STRIP = 1 << 9;
        const DRAW_LINE_LOOP  = 1 << 10;
        const DRAW_TRI_STRIP  = 1 << 11;
        const DRAW_TRI_FAN    = 1 << 12;

        const CULL_MASK  = Self::CULL_CW.bits() | Self::CULL_CCW.bits();
        const BLEND_MASK = Self::BLEND_ALPHA.bits();
        const DRAW_MASK  = Self::DRAW_POINTS.bits()
            | Self::DRAW_LINES.bits() | Self::DRAW_LINE_STRIP.bits()
            | Self::DRAW_LINE_LOOP.bits()
            | Self::DRAW_TRI_STRIP.bits() | Self::DRAW_TRI_FAN.bits();
        const WRITE_MASK = Self::RGB_WRITE.bits() | Self::ALPHA_WRITE.bits();
    }
}

bitflags! {
    /// Behavior toggles for [`Context::reset`](crate::Context::reset).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResetFlags: u32 {
        const MAX_ANISOTROPY     = 1 << 0;
        const REPORT_GPU_TIMINGS = 1 << 1;
        const DEBUG_OVERLAY      = 1 << 2;
    }
}

bitflags! {
    /// Per-view toggles set through [`Context::view_set_flags`](crate::Context::view_set_flags).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ViewFlags: u32 {
        /// Invalidate all attachments before the view's clear, where the
        /// driver supports it. Saves bandwidth on tiled GPUs.
        const INVALIDATE = 1 << 0;
    }
}

bitflags! {
    /// Internal per-view state. Clear and depth-test bits are mutually
    /// exclusive within their masks; the setters enforce that.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct ViewState: u32 {
        const CLEAR_COLOR = 1 << 0;
        const CLEAR_DEPTH = 1 << 1;

        const DEPTH_TEST_LT = 1 << 2;
        const DEPTH_TEST_GT = 1 << 3;
        const DEPTH_TEST_EQ = 1 << 4;

        const SCISSOR    = 1 << 5;
        const INVALIDATE = 1 << 6;

        const DEPTH_TEST_MASK = Self::DEPTH_TEST_LT.bits()
            | Self::DEPTH_TEST_GT.bits()
            | Self::DEPTH_TEST_EQ.bits();
    }
}

/// Depth comparison for a view, translated to the masked flag set. Setting a
/// mode always clears the previously set one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepthTest {
    #[default]
    None,
    Less,
    Greater,
    Equal,
}

/// A scissor or viewport rectangle, in pixels from the bottom-left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
}

impl Rect {
    pub fn new(x: u16, y: u16, w: u16, h: u16) -> Self {
        Self { x, y, w, h }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_diff_only_reports_changed_bits() {
        let a = DrawFlags::RGB_WRITE | DrawFlags::ALPHA_WRITE | DrawFlags::CULL_CW;
        let b = DrawFlags::RGB_WRITE | DrawFlags::ALPHA_WRITE | DrawFlags::BLEND_ALPHA;
        let diff = a ^ b;
        assert!(diff.intersects(DrawFlags::CULL_MASK));
        assert!(diff.intersects(DrawFlags::BLEND_MASK));
        assert!(!diff.intersects(DrawFlags::WRITE_MASK));
        assert!(!diff.intersects(DrawFlags::DRAW_MASK));
    }
}
