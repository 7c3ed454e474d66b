//! Uniform descriptors and the per-frame staging records.
//!
//! Payload bytes never live in these types: `set_uniform` copies them into
//! the context's staging arena immediately, so the caller's source slice is
//! free to be reused the moment the call returns. Records carry a byte range
//! into the arena and are reinterpreted as the declared type only at replay.

use std::ops::Range;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UniformType {
    Int,
    #[default]
    Float,
    Vec2,
    Vec3,
    Vec4,
    Mat2,
    Mat3,
    Mat4,
}

impl UniformType {
    /// Bytes per declared element.
    pub(crate) fn element_size(self) -> usize {
        match self {
            Self::Int | Self::Float => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 | Self::Mat2 => 16,
            Self::Mat3 => 36,
            Self::Mat4 => 64,
        }
    }
}

/// A named uniform, reusable across programs. The name is the lookup key
/// against each program's uniform-location cache.
#[derive(Debug, Clone)]
pub struct Uniform {
    pub(crate) name: Arc<str>,
    pub(crate) ty: UniformType,
    pub(crate) count: u16,
}

impl Uniform {
    pub fn new(name: &str, ty: UniformType, count: u16) -> Self {
        debug_assert!(count > 0);
        Self {
            name: Arc::from(name),
            ty,
            count,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn size(&self) -> usize {
        self.count as usize * self.ty.element_size()
    }
}

/// One `set_uniform` record: the value as staged, before submission filters
/// the pending stack down to last-write-wins per name.
#[derive(Debug, Clone)]
pub(crate) struct PendingUniform {
    pub name: Arc<str>,
    pub ty: UniformType,
    /// Effective element count for this update (callers may set fewer than
    /// the declared count).
    pub count: u16,
    pub range: Range<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_sizes_match_gl_layout() {
        assert_eq!(UniformType::Float.element_size(), 4);
        assert_eq!(UniformType::Vec3.element_size(), 12);
        assert_eq!(UniformType::Mat3.element_size(), 36);
        assert_eq!(UniformType::Mat4.element_size(), 64);
    }

    #[test]
    fn declared_count_scales_size() {
        let u = Uniform::new("u_bones", UniformType::Mat4, 32);
        assert_eq!(u.size(), 32 * 64);
    }
}
