//! Pixel formats and their per-plane geometry.
//!
//! The transfer engine never converts between formats; it only needs to know
//! how many planes a format has and what each plane's byte geometry is for a
//! given frame resolution. Chroma dimensions round up so odd resolutions do
//! not drop the last column/row.

use serde::{Deserialize, Serialize};

use crate::types::Resolution;

/// Pixel format of a video frame in any memory domain.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 4 channels, 8 bits each, single plane.
    Rgba8,
    /// BGRA ordering (some GPU APIs prefer this), single plane.
    Bgra8,
    /// NV12: Y plane + interleaved UV at half resolution (HW decoder output).
    Nv12,
    /// I420: Y plane + separate U and V planes at quarter resolution.
    I420,
    /// P010: 10-bit NV12 variant in 16-bit containers (HDR content).
    P010,
}

impl PixelFormat {
    /// Number of planes this format occupies.
    pub fn plane_count(self) -> usize {
        match self {
            Self::Rgba8 | Self::Bgra8 => 1,
            Self::Nv12 | Self::P010 => 2,
            Self::I420 => 3,
        }
    }

    pub fn is_planar(self) -> bool {
        self.plane_count() > 1
    }

    /// Geometry of one plane at the given frame resolution, as
    /// `(width_in_bytes, rows)`.
    ///
    /// `width_in_bytes` is the tightly packed row width; the actual stride
    /// of a buffer may be larger due to alignment.
    ///
    /// # Panics
    ///
    /// Panics if `plane >= plane_count()`.
    pub fn plane_dimensions(self, plane: usize, res: Resolution) -> (usize, usize) {
        let w = res.width as usize;
        let h = res.height as usize;
        // Chroma dimensions round up for odd frame sizes.
        let cw = w.div_ceil(2);
        let ch = h.div_ceil(2);

        match (self, plane) {
            (Self::Rgba8 | Self::Bgra8, 0) => (w * 4, h),
            (Self::Nv12, 0) => (w, h),
            (Self::Nv12, 1) => (cw * 2, ch),
            (Self::P010, 0) => (w * 2, h),
            (Self::P010, 1) => (cw * 4, ch),
            (Self::I420, 0) => (w, h),
            (Self::I420, 1 | 2) => (cw, ch),
            _ => panic!("plane {plane} out of range for {self:?}"),
        }
    }
}
