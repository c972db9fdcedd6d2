//! Frame layout -- per-plane byte geometry of one video frame.
//!
//! A [`FrameLayout`] describes where each plane of a frame lives inside its
//! backing buffer: byte offset, stride (pitch), packed row width, and row
//! count. It is a read-only view description and owns no pixel storage.
//!
//! Layouts are the geometry contract of a transfer: both sides of a copy
//! must agree on plane count and per-plane `(width_in_bytes, rows)`, while
//! strides are free to differ on each side.

use serde::{Deserialize, Serialize};

use crate::color::PixelFormat;
use crate::types::Resolution;

/// Maximum number of planes any supported pixel format can have.
pub const MAX_PLANES: usize = 4;

/// Row stride alignment for tightly allocated layouts, in bytes.
const STRIDE_ALIGN: usize = 4;

/// Byte geometry of a single plane inside a buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaneLayout {
    /// Byte offset of the plane from the start of the buffer.
    pub offset: usize,
    /// Bytes between the start of consecutive rows (>= `width_bytes`).
    pub stride: usize,
    /// Packed width of one row in bytes.
    pub width_bytes: usize,
    /// Number of rows.
    pub rows: usize,
}

impl PlaneLayout {
    /// Total bytes this plane spans in its buffer (stride-padded).
    pub fn byte_span(&self) -> usize {
        self.stride * self.rows
    }
}

/// Complete per-plane geometry of one video frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameLayout {
    pub resolution: Resolution,
    pub format: PixelFormat,
    planes: Vec<PlaneLayout>,
}

impl FrameLayout {
    /// Build a tight layout for `format` at `resolution`.
    ///
    /// Strides are the packed row width rounded up to 4 bytes; planes are
    /// packed back to back in format order.
    pub fn new(format: PixelFormat, resolution: Resolution) -> Self {
        let mut planes = Vec::with_capacity(format.plane_count());
        let mut offset = 0usize;

        for plane in 0..format.plane_count() {
            let (width_bytes, rows) = format.plane_dimensions(plane, resolution);
            let stride = width_bytes.next_multiple_of(STRIDE_ALIGN);
            planes.push(PlaneLayout {
                offset,
                stride,
                width_bytes,
                rows,
            });
            offset += stride * rows;
        }

        Self {
            resolution,
            format,
            planes,
        }
    }

    /// Build a layout with caller-chosen strides (one per plane), packing
    /// planes back to back.
    ///
    /// Returns `None` if the stride count does not match the format's plane
    /// count or any stride is smaller than the packed row width.
    pub fn with_strides(
        format: PixelFormat,
        resolution: Resolution,
        strides: &[usize],
    ) -> Option<Self> {
        if strides.len() != format.plane_count() {
            return None;
        }

        let mut planes = Vec::with_capacity(strides.len());
        let mut offset = 0usize;
        for (plane, &stride) in strides.iter().enumerate() {
            let (width_bytes, rows) = format.plane_dimensions(plane, resolution);
            if stride < width_bytes {
                return None;
            }
            planes.push(PlaneLayout {
                offset,
                stride,
                width_bytes,
                rows,
            });
            offset += stride * rows;
        }

        Some(Self {
            resolution,
            format,
            planes,
        })
    }

    /// Number of planes in this layout.
    pub fn plane_count(&self) -> usize {
        self.planes.len()
    }

    /// Geometry of one plane.
    ///
    /// # Panics
    ///
    /// Panics if `plane >= plane_count()`.
    pub fn plane(&self, plane: usize) -> &PlaneLayout {
        &self.planes[plane]
    }

    /// All planes in order.
    pub fn planes(&self) -> &[PlaneLayout] {
        &self.planes
    }

    /// Total byte size of a buffer holding this layout.
    pub fn byte_size(&self) -> usize {
        self.planes
            .iter()
            .map(|p| p.offset + p.byte_span())
            .max()
            .unwrap_or(0)
    }

    /// Whether `other` is copy-compatible with this layout: equal plane
    /// count and equal `(width_bytes, rows)` on every plane. Strides and
    /// offsets may differ.
    pub fn matches_geometry(&self, other: &FrameLayout) -> bool {
        self.planes.len() == other.planes.len()
            && self
                .planes
                .iter()
                .zip(other.planes.iter())
                .all(|(a, b)| a.width_bytes == b.width_bytes && a.rows == b.rows)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tight_nv12_layout() {
        let layout = FrameLayout::new(PixelFormat::Nv12, Resolution::new(640, 480));
        assert_eq!(layout.plane_count(), 2);

        let y = layout.plane(0);
        assert_eq!(y.offset, 0);
        assert_eq!(y.stride, 640);
        assert_eq!(y.rows, 480);

        let uv = layout.plane(1);
        assert_eq!(uv.offset, 640 * 480);
        assert_eq!(uv.width_bytes, 640);
        assert_eq!(uv.rows, 240);

        assert_eq!(layout.byte_size(), 640 * 480 + 640 * 240);
    }

    #[test]
    fn odd_width_stride_is_aligned() {
        let layout = FrameLayout::new(PixelFormat::Nv12, Resolution::new(641, 480));
        assert_eq!(layout.plane(0).width_bytes, 641);
        assert_eq!(layout.plane(0).stride, 644);
    }

    #[test]
    fn custom_strides() {
        let layout =
            FrameLayout::with_strides(PixelFormat::Nv12, Resolution::new(640, 480), &[1024, 1024])
                .unwrap();
        assert_eq!(layout.plane(0).stride, 1024);
        assert_eq!(layout.plane(1).offset, 1024 * 480);
        assert_eq!(layout.byte_size(), 1024 * 480 + 1024 * 240);
    }

    #[test]
    fn custom_strides_rejects_bad_input() {
        // Wrong stride count.
        assert!(
            FrameLayout::with_strides(PixelFormat::Nv12, Resolution::new(640, 480), &[640])
                .is_none()
        );
        // Stride smaller than the packed row.
        assert!(
            FrameLayout::with_strides(PixelFormat::Nv12, Resolution::new(640, 480), &[639, 640])
                .is_none()
        );
    }

    #[test]
    fn geometry_match_ignores_strides() {
        let a = FrameLayout::new(PixelFormat::Nv12, Resolution::new(640, 480));
        let b =
            FrameLayout::with_strides(PixelFormat::Nv12, Resolution::new(640, 480), &[768, 768])
                .unwrap();
        assert!(a.matches_geometry(&b));
        assert!(b.matches_geometry(&a));
    }

    #[test]
    fn geometry_mismatch_on_plane_count() {
        let nv12 = FrameLayout::new(PixelFormat::Nv12, Resolution::new(640, 480));
        let i420 = FrameLayout::new(PixelFormat::I420, Resolution::new(640, 480));
        assert!(!nv12.matches_geometry(&i420));
    }

    #[test]
    fn geometry_mismatch_on_dimensions() {
        let a = FrameLayout::new(PixelFormat::Nv12, Resolution::new(640, 480));
        let b = FrameLayout::new(PixelFormat::Nv12, Resolution::new(1280, 720));
        assert!(!a.matches_geometry(&b));
    }
}
