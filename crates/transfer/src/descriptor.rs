//! Per-plane copy descriptor construction.
//!
//! Every transfer attempt builds its copy description from scratch: each
//! side of the copy is mapped for the required access, yielding one
//! [`PlaneView`] per plane (location, pitch, byte geometry). The two sides
//! are then zipped into [`CopyDescriptor`]s after a geometry cross-check.
//! Nothing here is cached between transfers.
//!
//! The mapping is scoped: [`MappedPlanes`] borrows the buffer it was built
//! from, so the views cannot outlive the storage they point into, and the
//! mapping is released exactly once on every exit path when the value
//! drops, including early-error returns after a partial per-plane fill.

use std::marker::PhantomData;

use fl_common::{
    FrameLayout, MappingError, MemoryDomain, SurfacePlacement, TransferError, TransferResult,
};

use crate::buffer::TransferBuffer;
use crate::surface::SurfaceBuffer;

/// Where one side of a 2D copy reads or writes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CopyLocation {
    /// Host-accessible pointer.
    Host(*mut u8),
    /// CUDA device pointer.
    Device(u64),
    /// Unified (managed) pointer, addressed like device memory.
    Unified(u64),
}

impl CopyLocation {
    /// Whether plain host code can read/write this location.
    pub fn is_host(self) -> bool {
        matches!(self, Self::Host(_))
    }
}

/// One plane of a mapped buffer, ready to be copied from or into.
#[derive(Copy, Clone, Debug)]
pub struct PlaneView {
    pub location: CopyLocation,
    /// Bytes between consecutive rows.
    pub pitch: usize,
    /// Packed row width in bytes.
    pub width_bytes: usize,
    /// Number of rows.
    pub rows: usize,
}

/// A buffer mapped for one transfer attempt.
///
/// Holds the borrow of the underlying buffer for as long as the plane
/// views are alive; dropping it is the single release of the mapping.
#[derive(Debug)]
pub struct MappedPlanes<'a> {
    planes: Vec<PlaneView>,
    domain: MemoryDomain,
    _borrow: PhantomData<&'a ()>,
}

impl MappedPlanes<'_> {
    pub fn planes(&self) -> &[PlaneView] {
        &self.planes
    }

    pub fn domain(&self) -> MemoryDomain {
        self.domain
    }
}

/// Source and destination of one plane's 2D copy.
#[derive(Copy, Clone, Debug)]
pub struct CopyDescriptor {
    pub src: CopyLocation,
    pub src_pitch: usize,
    pub dst: CopyLocation,
    pub dst_pitch: usize,
    pub width_bytes: usize,
    pub rows: usize,
}

impl TransferBuffer {
    /// Map this buffer for reading and describe every plane.
    pub fn map_read(&self) -> TransferResult<MappedPlanes<'_>> {
        let (planes, domain) = match self {
            TransferBuffer::System(buf) => (
                host_views(buf.data().as_ptr() as *mut u8, buf.layout()),
                MemoryDomain::System,
            ),
            TransferBuffer::Device(buf) => (device_views(buf), MemoryDomain::Device),
            TransferBuffer::Surface(buf) => (surface_views(buf, "read")?, MemoryDomain::Surface),
            TransferBuffer::Interop(buf) => {
                // Host-degraded view of the buffer objects' CPU staging.
                // The device-visible view only exists inside the interop
                // worker's map/unmap bracket.
                let planes = buf
                    .planes()
                    .iter()
                    .zip(buf.layout().planes())
                    .map(|(plane, p)| PlaneView {
                        location: CopyLocation::Host(plane.staging().as_ptr() as *mut u8),
                        pitch: p.stride,
                        width_bytes: p.width_bytes,
                        rows: p.rows,
                    })
                    .collect();
                (planes, MemoryDomain::System)
            }
        };
        Ok(MappedPlanes {
            planes,
            domain,
            _borrow: PhantomData,
        })
    }

    /// Map this buffer for writing and describe every plane.
    pub fn map_write(&mut self) -> TransferResult<MappedPlanes<'_>> {
        let (planes, domain) = match self {
            TransferBuffer::System(buf) => {
                let base = buf.data_mut().as_mut_ptr();
                (host_views(base, buf.layout()), MemoryDomain::System)
            }
            TransferBuffer::Device(buf) => (device_views(buf), MemoryDomain::Device),
            TransferBuffer::Surface(buf) => (surface_views(buf, "write")?, MemoryDomain::Surface),
            TransferBuffer::Interop(buf) => {
                let layout = buf.layout().clone();
                let planes = buf
                    .planes_mut()
                    .iter_mut()
                    .zip(layout.planes())
                    .map(|(plane, p)| PlaneView {
                        location: CopyLocation::Host(plane.staging_mut().as_mut_ptr()),
                        pitch: p.stride,
                        width_bytes: p.width_bytes,
                        rows: p.rows,
                    })
                    .collect();
                (planes, MemoryDomain::System)
            }
        };
        Ok(MappedPlanes {
            planes,
            domain,
            _borrow: PhantomData,
        })
    }
}

/// Views over a host allocation laid out per `layout`.
fn host_views(base: *mut u8, layout: &FrameLayout) -> Vec<PlaneView> {
    layout
        .planes()
        .iter()
        .map(|p| PlaneView {
            // SAFETY: plane offsets stay inside the allocation because the
            // buffer was sized from this same layout.
            location: CopyLocation::Host(unsafe { base.add(p.offset) }),
            pitch: p.stride,
            width_bytes: p.width_bytes,
            rows: p.rows,
        })
        .collect()
}

/// Views over a device frame's planes.
fn device_views(buf: &crate::memory::DeviceFrameBuffer) -> Vec<PlaneView> {
    let base = buf.base_ptr();
    buf.layout()
        .planes()
        .iter()
        .map(|p| PlaneView {
            location: CopyLocation::Device(base + p.offset as u64),
            pitch: p.stride,
            width_bytes: p.width_bytes,
            rows: p.rows,
        })
        .collect()
}

/// Views read out of a surface's fixed-layout header.
///
/// Fails distinctly on an empty surface, a plane count that disagrees
/// with the negotiated layout, and a placement kind the engine does not
/// understand.
fn surface_views(buf: &SurfaceBuffer, access: &'static str) -> TransferResult<Vec<PlaneView>> {
    let header = buf.header();

    if header.num_filled == 0 {
        return Err(MappingError::MapFailed {
            domain: MemoryDomain::Surface,
            access,
            reason: "surface holds no pixel data".into(),
        }
        .into());
    }

    let layout_planes = buf.layout().plane_count();
    let header_planes = header.num_planes as usize;
    if header_planes != layout_planes {
        return Err(TransferError::GeometryMismatch {
            what: "surface plane count",
            src: header_planes,
            dst: layout_planes,
        });
    }

    let placement = SurfacePlacement::from_raw(header.placement).ok_or(
        MappingError::UnsupportedPlacement {
            kind: header.placement,
        },
    )?;

    let mut planes = Vec::with_capacity(header_planes);
    for i in 0..header_planes {
        let addr = header.data_ptr + header.plane_offset[i];
        let location = match placement {
            SurfacePlacement::Device => CopyLocation::Device(addr),
            SurfacePlacement::HostPinned => CopyLocation::Host(addr as *mut u8),
            SurfacePlacement::Unified => CopyLocation::Unified(addr),
        };
        planes.push(PlaneView {
            location,
            pitch: header.plane_pitch[i] as usize,
            width_bytes: (header.plane_width[i] * header.plane_bpp[i]) as usize,
            rows: header.plane_height[i] as usize,
        });
    }
    Ok(planes)
}

/// Zip mapped source and destination planes into copy descriptors,
/// enforcing the geometry invariant: equal plane count and equal
/// `(width_bytes, rows)` per plane. Pitches may differ.
pub fn build_descriptors(
    src: &[PlaneView],
    dst: &[PlaneView],
) -> TransferResult<Vec<CopyDescriptor>> {
    if src.len() != dst.len() {
        return Err(TransferError::GeometryMismatch {
            what: "plane count",
            src: src.len(),
            dst: dst.len(),
        });
    }

    let mut descriptors = Vec::with_capacity(src.len());
    for (s, d) in src.iter().zip(dst.iter()) {
        if s.width_bytes != d.width_bytes {
            return Err(TransferError::GeometryMismatch {
                what: "plane width",
                src: s.width_bytes,
                dst: d.width_bytes,
            });
        }
        if s.rows != d.rows {
            return Err(TransferError::GeometryMismatch {
                what: "plane rows",
                src: s.rows,
                dst: d.rows,
            });
        }
        descriptors.push(CopyDescriptor {
            src: s.location,
            src_pitch: s.pitch,
            dst: d.location,
            dst_pitch: d.pitch,
            width_bytes: s.width_bytes,
            rows: s.rows,
        });
    }
    Ok(descriptors)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SystemBuffer;
    use crate::surface::SurfaceBuffer;
    use fl_common::{PixelFormat, Resolution};

    fn nv12_layout() -> FrameLayout {
        FrameLayout::new(PixelFormat::Nv12, Resolution::new(640, 480))
    }

    // ── System mapping ───────────────────────────────────────────

    #[test]
    fn system_planes_map_to_host_locations() {
        let buf = TransferBuffer::System(SystemBuffer::alloc(nv12_layout()));
        let mapped = buf.map_read().unwrap();

        assert_eq!(mapped.planes().len(), 2);
        assert!(mapped.planes()[0].location.is_host());
        assert_eq!(mapped.planes()[0].pitch, 640);
        assert_eq!(mapped.planes()[1].rows, 240);

        // Plane 1 starts one Y-plane past plane 0.
        let (CopyLocation::Host(p0), CopyLocation::Host(p1)) =
            (mapped.planes()[0].location, mapped.planes()[1].location)
        else {
            panic!("expected host locations");
        };
        assert_eq!(p1 as usize - p0 as usize, 640 * 480);
    }

    // ── Surface mapping ──────────────────────────────────────────

    #[test]
    fn host_pinned_surface_maps_to_host_locations() {
        let buf = TransferBuffer::Surface(SurfaceBuffer::host_backed(nv12_layout()));
        let mapped = buf.map_read().unwrap();
        assert_eq!(mapped.domain(), MemoryDomain::Surface);
        assert!(mapped.planes().iter().all(|p| p.location.is_host()));
        assert_eq!(mapped.planes()[0].width_bytes, 640);
    }

    #[test]
    fn device_placement_maps_to_device_locations() {
        let buf = TransferBuffer::Surface(SurfaceBuffer::host_backed_with_placement(
            nv12_layout(),
            SurfacePlacement::Device,
        ));
        let mapped = buf.map_read().unwrap();
        assert!(matches!(
            mapped.planes()[0].location,
            CopyLocation::Device(_)
        ));
    }

    #[test]
    fn unified_placement_maps_to_unified_locations() {
        let buf = TransferBuffer::Surface(SurfaceBuffer::host_backed_with_placement(
            nv12_layout(),
            SurfacePlacement::Unified,
        ));
        let mapped = buf.map_read().unwrap();
        assert!(matches!(
            mapped.planes()[1].location,
            CopyLocation::Unified(_)
        ));
    }

    #[test]
    fn unsupported_placement_is_a_distinct_mapping_error() {
        let buf = TransferBuffer::Surface(SurfaceBuffer::host_backed_with_raw_placement(
            nv12_layout(),
            9,
        ));
        let err = buf.map_read().unwrap_err();
        assert!(matches!(
            err,
            TransferError::Mapping(MappingError::UnsupportedPlacement { kind: 9 })
        ));
    }

    #[test]
    fn surface_plane_count_mismatch_is_geometry_error() {
        // Header describes I420 (3 planes); negotiated layout says NV12 (2).
        let i420 = FrameLayout::new(PixelFormat::I420, Resolution::new(640, 480));
        let mut surface = SurfaceBuffer::host_backed(i420);
        surface.set_layout_for_tests(nv12_layout());

        let buf = TransferBuffer::Surface(surface);
        let err = buf.map_read().unwrap_err();
        assert!(matches!(
            err,
            TransferError::GeometryMismatch {
                what: "surface plane count",
                ..
            }
        ));
    }

    // ── Geometry cross-check ─────────────────────────────────────

    #[test]
    fn descriptors_pair_planes_and_keep_pitches() {
        let wide = FrameLayout::with_strides(
            PixelFormat::Nv12,
            Resolution::new(640, 480),
            &[1024, 1024],
        )
        .unwrap();

        let src = TransferBuffer::System(SystemBuffer::alloc(nv12_layout()));
        let mut dst = TransferBuffer::System(SystemBuffer::alloc(wide));

        let src_map = src.map_read().unwrap();
        let dst_map = dst.map_write().unwrap();
        let descs = build_descriptors(src_map.planes(), dst_map.planes()).unwrap();

        assert_eq!(descs.len(), 2);
        assert_eq!(descs[0].src_pitch, 640);
        assert_eq!(descs[0].dst_pitch, 1024);
        assert_eq!(descs[0].width_bytes, 640);
        assert_eq!(descs[1].rows, 240);
    }

    #[test]
    fn plane_count_mismatch_rejected() {
        let nv12 = TransferBuffer::System(SystemBuffer::alloc(nv12_layout()));
        let mut i420 = TransferBuffer::System(SystemBuffer::alloc(FrameLayout::new(
            PixelFormat::I420,
            Resolution::new(640, 480),
        )));

        let src_map = nv12.map_read().unwrap();
        let dst_map = i420.map_write().unwrap();
        let err = build_descriptors(src_map.planes(), dst_map.planes()).unwrap_err();
        assert!(matches!(
            err,
            TransferError::GeometryMismatch {
                what: "plane count",
                ..
            }
        ));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let a = TransferBuffer::System(SystemBuffer::alloc(nv12_layout()));
        let mut b = TransferBuffer::System(SystemBuffer::alloc(FrameLayout::new(
            PixelFormat::Nv12,
            Resolution::new(1280, 720),
        )));

        let src_map = a.map_read().unwrap();
        let dst_map = b.map_write().unwrap();
        assert!(build_descriptors(src_map.planes(), dst_map.planes()).is_err());
    }
}
