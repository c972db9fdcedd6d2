//! Platform hardware-surface buffers.
//!
//! A hardware surface is an opaque descriptor produced by the platform's
//! surface allocator. The transfer engine never allocates device-side
//! surfaces itself; it reads the surface's fixed-layout header to find out
//! where each plane lives and with what pitch, and copies against those
//! locations.
//!
//! The surface runtime (the platform allocator library) is probed once per
//! process; the outcome is cached and permanent, and decides whether the
//! Surface domain is offered during negotiation.

use std::sync::OnceLock;

use tracing::{info, warn};

use fl_common::{FrameLayout, SurfacePlacement, MAX_PLANES};

/// Fixed on-wire header of a hardware surface, shared with the platform
/// allocator. One frame per surface (`batch_size` stays 1 for transfers).
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct SurfaceHeader {
    /// Number of frame slots in this surface.
    pub batch_size: u32,
    /// Number of slots holding pixel data.
    pub num_filled: u32,
    /// Raw [`SurfacePlacement`] encoding.
    pub placement: u32,
    /// Plane count of the stored frame.
    pub num_planes: u32,
    /// Base address of the pixel data (device or host, per `placement`).
    pub data_ptr: u64,
    /// Per-plane byte offset from `data_ptr`.
    pub plane_offset: [u64; MAX_PLANES],
    /// Per-plane pitch in bytes.
    pub plane_pitch: [u32; MAX_PLANES],
    /// Per-plane width in elements.
    pub plane_width: [u32; MAX_PLANES],
    /// Per-plane height in rows.
    pub plane_height: [u32; MAX_PLANES],
    /// Per-plane bytes per element.
    pub plane_bpp: [u32; MAX_PLANES],
}

/// A buffer in the platform hardware-surface domain.
///
/// Either owns host-backed storage (host-pinned surfaces, also used by
/// tests) or borrows a foreign header produced by the platform allocator.
#[derive(Debug)]
pub struct SurfaceBuffer {
    storage: Storage,
    /// Negotiated frame geometry this surface is expected to hold.
    layout: FrameLayout,
}

#[derive(Debug)]
enum Storage {
    /// Header plus pixel storage owned by us (host-visible placements).
    HostBacked {
        header: Box<SurfaceHeader>,
        data: Vec<u8>,
    },
    /// Foreign surface; the header and pixels are owned elsewhere.
    Foreign { header: *mut SurfaceHeader },
}

// SAFETY: the Foreign variant's raw header pointer is only dereferenced
// while a transfer holds the buffer, and a surface is never transferred
// from two threads at once. HostBacked storage is ordinary owned memory.
unsafe impl Send for SurfaceBuffer {}
unsafe impl Sync for SurfaceBuffer {}

impl SurfaceBuffer {
    /// Create a host-backed surface for `layout`, with the header filled
    /// from the layout's plane geometry.
    pub fn host_backed(layout: FrameLayout) -> Self {
        Self::host_backed_with_placement(layout, SurfacePlacement::HostPinned)
    }

    /// Host-backed surface with an explicit placement value in the header.
    /// Only host-visible placements can actually be copied from host code;
    /// other values are useful to model foreign surfaces in tests.
    pub fn host_backed_with_placement(layout: FrameLayout, placement: SurfacePlacement) -> Self {
        let mut data = vec![0u8; layout.byte_size()];
        let header = Box::new(Self::header_from_layout(
            &layout,
            placement,
            data.as_mut_ptr() as u64,
        ));
        Self {
            storage: Storage::HostBacked { header, data },
            layout,
        }
    }

    /// Host-backed surface with a raw placement value, bypassing the
    /// [`SurfacePlacement`] encoding. Models surfaces whose placement the
    /// engine does not understand.
    pub fn host_backed_with_raw_placement(layout: FrameLayout, raw_placement: u32) -> Self {
        let mut surface = Self::host_backed(layout);
        if let Storage::HostBacked { header, .. } = &mut surface.storage {
            header.placement = raw_placement;
        }
        surface
    }

    /// Wrap a foreign surface header.
    ///
    /// # Safety
    ///
    /// `header` must point to a valid [`SurfaceHeader`] that outlives this
    /// buffer, and the locations it describes must stay valid for the
    /// duration of every transfer using this buffer.
    pub unsafe fn from_raw(header: *mut SurfaceHeader, layout: FrameLayout) -> Self {
        Self {
            storage: Storage::Foreign { header },
            layout,
        }
    }

    /// Read access to the surface header.
    pub fn header(&self) -> &SurfaceHeader {
        match &self.storage {
            Storage::HostBacked { header, .. } => header,
            // SAFETY: from_raw's contract guarantees the pointer is valid
            // for the lifetime of this buffer.
            Storage::Foreign { header } => unsafe { &**header },
        }
    }

    /// Negotiated frame geometry.
    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// Host pixel storage, if this surface owns it.
    pub fn host_data(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::HostBacked { data, .. } => Some(data),
            Storage::Foreign { .. } => None,
        }
    }

    /// Mutable host pixel storage, if this surface owns it.
    pub fn host_data_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.storage {
            Storage::HostBacked { data, .. } => Some(data),
            Storage::Foreign { .. } => None,
        }
    }

    /// Swap the negotiated layout under an existing header, to model a
    /// surface whose producer and negotiated caps disagree.
    #[cfg(test)]
    pub(crate) fn set_layout_for_tests(&mut self, layout: FrameLayout) {
        self.layout = layout;
    }

    fn header_from_layout(
        layout: &FrameLayout,
        placement: SurfacePlacement,
        data_ptr: u64,
    ) -> SurfaceHeader {
        let mut header = SurfaceHeader {
            batch_size: 1,
            num_filled: 1,
            placement: placement.as_raw(),
            num_planes: layout.plane_count() as u32,
            data_ptr,
            plane_offset: [0; MAX_PLANES],
            plane_pitch: [0; MAX_PLANES],
            plane_width: [0; MAX_PLANES],
            plane_height: [0; MAX_PLANES],
            plane_bpp: [0; MAX_PLANES],
        };
        for (i, plane) in layout.planes().iter().enumerate() {
            header.plane_offset[i] = plane.offset as u64;
            header.plane_pitch[i] = plane.stride as u32;
            header.plane_width[i] = plane.width_bytes as u32;
            header.plane_height[i] = plane.rows as u32;
            header.plane_bpp[i] = 1;
        }
        header
    }
}

/// Shared library implementing the platform surface allocator.
#[cfg(target_os = "linux")]
const SURFACE_LIBRARY: &str = "libnvbufsurface.so.1";

static SURFACE_RUNTIME: OnceLock<bool> = OnceLock::new();

/// One-time probe of the platform surface runtime.
///
/// The first call attempts to load the allocator library; the outcome is
/// cached for the lifetime of the process. Surfaces are only advertised
/// during negotiation when this returns `true`.
pub fn surface_runtime_available() -> bool {
    *SURFACE_RUNTIME.get_or_init(|| {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: loading a well-known platform allocator library; its
            // constructors only register allocator state.
            match unsafe { libloading::Library::new(SURFACE_LIBRARY) } {
                Ok(lib) => {
                    // Keep the runtime loaded for the process lifetime.
                    std::mem::forget(lib);
                    info!(library = SURFACE_LIBRARY, "Surface runtime available");
                    true
                }
                Err(e) => {
                    warn!(error = %e, "Surface runtime not available; Surface domain disabled");
                    false
                }
            }
        }
        #[cfg(not(target_os = "linux"))]
        {
            warn!("Surface runtime is Linux-only; Surface domain disabled");
            false
        }
    })
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
    fn host_backed_header_matches_layout() {
        let layout = nv12_layout();
        let surface = SurfaceBuffer::host_backed(layout.clone());
        let header = surface.header();

        assert_eq!(header.batch_size, 1);
        assert_eq!(header.num_filled, 1);
        assert_eq!(header.num_planes, 2);
        assert_eq!(header.placement, SurfacePlacement::HostPinned.as_raw());
        assert_eq!(header.plane_pitch[0], layout.plane(0).stride as u32);
        assert_eq!(header.plane_offset[1], layout.plane(1).offset as u64);
        assert_eq!(header.plane_height[1], 240);
        assert_eq!(surface.host_data().unwrap().len(), layout.byte_size());
    }

    #[test]
    fn header_data_ptr_points_into_host_storage() {
        let surface = SurfaceBuffer::host_backed(nv12_layout());
        let data_ptr = surface.header().data_ptr;
        assert_eq!(data_ptr, surface.host_data().unwrap().as_ptr() as u64);
    }

    #[test]
    fn raw_placement_is_preserved() {
        let surface = SurfaceBuffer::host_backed_with_raw_placement(nv12_layout(), 42);
        assert_eq!(surface.header().placement, 42);
        assert_eq!(SurfacePlacement::from_raw(42), None);
    }

    #[test]
    fn probe_is_idempotent() {
        let first = surface_runtime_available();
        let second = surface_runtime_available();
        assert_eq!(first, second);
    }
}
