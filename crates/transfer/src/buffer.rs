//! Domain-tagged frame buffers and the domain classifier.

use fl_common::{FrameLayout, MemoryDomain};

use crate::interop::GlBufferPlane;
use crate::memory::DeviceFrameBuffer;
use crate::surface::SurfaceBuffer;

/// A frame in plain host memory.
#[derive(Debug)]
pub struct SystemBuffer {
    data: Vec<u8>,
    layout: FrameLayout,
}

impl SystemBuffer {
    /// Allocate zeroed host storage for `layout`.
    pub fn alloc(layout: FrameLayout) -> Self {
        let data = vec![0u8; layout.byte_size()];
        Self { data, layout }
    }

    /// Wrap existing bytes. Returns `None` if `data` is too small for the
    /// layout.
    pub fn from_vec(data: Vec<u8>, layout: FrameLayout) -> Option<Self> {
        if data.len() < layout.byte_size() {
            return None;
        }
        Some(Self { data, layout })
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Take the backing storage (used by pools to recycle it).
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// A frame spread over GL buffer objects, one per plane.
#[derive(Debug)]
pub struct InteropBuffer {
    planes: Vec<GlBufferPlane>,
    layout: FrameLayout,
}

impl InteropBuffer {
    /// Wrap one GL buffer object per plane of `layout`. Returns `None` on
    /// a plane-count mismatch.
    pub fn new(gl_buffer_ids: &[u32], layout: FrameLayout) -> Option<Self> {
        if gl_buffer_ids.len() != layout.plane_count() {
            return None;
        }
        let planes = gl_buffer_ids
            .iter()
            .zip(layout.planes())
            .map(|(&id, plane)| GlBufferPlane::new(id, plane.byte_span()))
            .collect();
        Some(Self { planes, layout })
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn planes(&self) -> &[GlBufferPlane] {
        &self.planes
    }

    pub fn planes_mut(&mut self) -> &mut [GlBufferPlane] {
        &mut self.planes
    }
}

/// One frame's pixel storage, tagged with the memory domain it lives in.
#[derive(Debug)]
pub enum TransferBuffer {
    System(SystemBuffer),
    Device(DeviceFrameBuffer),
    Surface(SurfaceBuffer),
    Interop(InteropBuffer),
}

impl TransferBuffer {
    /// The frame geometry this buffer holds.
    pub fn layout(&self) -> &FrameLayout {
        match self {
            Self::System(b) => b.layout(),
            Self::Device(b) => b.layout(),
            Self::Surface(b) => b.layout(),
            Self::Interop(b) => b.layout(),
        }
    }
}

/// Report which memory domain a buffer currently occupies.
///
/// Deterministic, side-effect-free, O(1). An interop buffer only counts as
/// `Interop` while the engine holds a usable interop context
/// (`interop_active`); without one it degrades to `System` through its
/// host-visible staging, which keeps the pure-host fallback reachable.
pub fn classify(buffer: &TransferBuffer, interop_active: bool) -> MemoryDomain {
    match buffer {
        TransferBuffer::Device(_) => MemoryDomain::Device,
        TransferBuffer::Surface(_) => MemoryDomain::Surface,
        TransferBuffer::Interop(_) if interop_active => MemoryDomain::Interop,
        TransferBuffer::Interop(_) | TransferBuffer::System(_) => MemoryDomain::System,
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fl_common::{PixelFormat, Resolution};

    fn nv12_layout() -> FrameLayout {
        FrameLayout::new(PixelFormat::Nv12, Resolution::new(640, 480))
    }

    #[test]
    fn system_buffer_sizes_to_layout() {
        let buf = SystemBuffer::alloc(nv12_layout());
        assert_eq!(buf.data().len(), nv12_layout().byte_size());
    }

    #[test]
    fn from_vec_rejects_short_storage() {
        let layout = nv12_layout();
        assert!(SystemBuffer::from_vec(vec![0u8; 16], layout.clone()).is_none());
        assert!(SystemBuffer::from_vec(vec![0u8; layout.byte_size()], layout).is_some());
    }

    #[test]
    fn interop_buffer_requires_one_object_per_plane() {
        let layout = nv12_layout();
        assert!(InteropBuffer::new(&[1], layout.clone()).is_none());
        let buf = InteropBuffer::new(&[1, 2], layout).unwrap();
        assert_eq!(buf.planes().len(), 2);
        assert_eq!(buf.planes()[1].id(), 2);
    }

    #[test]
    fn classify_reports_tagged_domain() {
        let sys = TransferBuffer::System(SystemBuffer::alloc(nv12_layout()));
        let surf = TransferBuffer::Surface(crate::surface::SurfaceBuffer::host_backed(
            nv12_layout(),
        ));
        assert_eq!(classify(&sys, true), MemoryDomain::System);
        assert_eq!(classify(&surf, true), MemoryDomain::Surface);
        assert_eq!(classify(&surf, false), MemoryDomain::Surface);
    }

    #[test]
    fn interop_degrades_to_system_without_context() {
        let buf = TransferBuffer::Interop(InteropBuffer::new(&[1, 2], nv12_layout()).unwrap());
        assert_eq!(classify(&buf, true), MemoryDomain::Interop);
        assert_eq!(classify(&buf, false), MemoryDomain::System);
    }
}
